//! Sample-accurate rendering of scheduled chunks.
//!
//! The timeline turns absolute start times into frame offsets at the device
//! rate and mixes every chunk that overlaps the frames being rendered. It is
//! the piece of state shared between the scheduler thread and the device
//! callback.

use crate::audio::resample::resample;
use crate::playback::scheduler::{CompletionToken, ScheduledChunk};

struct TimelineEntry {
    token: CompletionToken,
    start_frame: u64,
    samples: Vec<f32>,
}

impl TimelineEntry {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Renders scheduled chunks into device buffers.
pub struct OutputTimeline {
    device_rate: u32,
    frame: u64,
    gain: f32,
    entries: Vec<TimelineEntry>,
    /// Nominal end time and actual end frame of the last inserted chunk.
    cursor: Option<(f64, u64)>,
}

impl OutputTimeline {
    pub fn new(device_rate: u32) -> Self {
        Self {
            device_rate: device_rate.max(1),
            frame: 0,
            gain: 1.0,
            entries: Vec::new(),
            cursor: None,
        }
    }

    /// Adds a chunk, converting it to the device rate.
    ///
    /// A chunk that starts where the previous one ended continues at that
    /// entry's last frame, since start times and resampled lengths round
    /// independently. Entries never overlap each other or the playhead.
    pub fn insert(&mut self, scheduled: ScheduledChunk) {
        let samples = resample(
            scheduled.chunk.samples(),
            scheduled.chunk.sample_rate(),
            self.device_rate,
        );
        let half_frame = 0.5 / self.device_rate as f64;
        let nominal = (scheduled.start.max(0.0) * self.device_rate as f64).round() as u64;
        let start_frame = match self.cursor {
            Some((end_secs, end_frame)) if (scheduled.start - end_secs).abs() < half_frame => {
                end_frame
            }
            Some((_, end_frame)) => nominal.max(end_frame),
            None => nominal,
        }
        .max(self.frame);

        if start_frame > nominal {
            tracing::trace!(
                shift = start_frame - nominal,
                "chunk placed after its nominal start frame"
            );
        }
        self.cursor = Some((
            scheduled.start + scheduled.chunk.duration_secs(),
            start_frame + samples.len() as u64,
        ));
        self.entries.push(TimelineEntry {
            token: scheduled.token,
            start_frame,
            samples,
        });
    }

    /// Fills `out` (interleaved, `channels` wide) and advances the playhead.
    ///
    /// Returns the tokens of chunks whose last frame has now been rendered,
    /// in the order they ended.
    pub fn render(&mut self, out: &mut [f32], channels: usize) -> Vec<CompletionToken> {
        let channels = channels.max(1);
        for (offset, frame) in out.chunks_mut(channels).enumerate() {
            let position = self.frame + offset as u64;
            let mut mixed = 0.0f32;
            for entry in &self.entries {
                if position >= entry.start_frame && position < entry.end_frame() {
                    mixed += entry.samples[(position - entry.start_frame) as usize];
                }
            }
            let value = (mixed * self.gain).clamp(-1.0, 1.0);
            frame.fill(value);
        }
        self.frame += (out.len() / channels) as u64;

        let playhead = self.frame;
        let mut finished: Vec<(u64, CompletionToken)> = Vec::new();
        self.entries.retain(|entry| {
            if entry.end_frame() <= playhead {
                finished.push((entry.end_frame(), entry.token));
                false
            } else {
                true
            }
        });
        finished.sort_by_key(|(end, _)| *end);
        finished.into_iter().map(|(_, token)| token).collect()
    }

    /// Drops every pending chunk without reporting completions.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, 1.0);
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Frames rendered so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn position_secs(&self) -> f64 {
        self.frame as f64 / self.device_rate as f64
    }

    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::chunk::AudioChunk;
    use crate::playback::clock::ManualClock;
    use crate::playback::output::RecordingOutput;
    use crate::playback::scheduler::{PlaybackScheduler, SchedulerConfig};

    /// Scheduled chunks produced by a real scheduler, so tokens are genuine.
    fn scheduled(levels: &[f32], len: usize, rate: u32) -> Vec<ScheduledChunk> {
        let config = SchedulerConfig {
            sample_rate: rate,
            prebuffer_chunks: 1,
            lookahead_chunks: levels.len(),
            rebuffer_threshold: 0,
            ..SchedulerConfig::default()
        };
        let mut scheduler = PlaybackScheduler::new(config, ManualClock::new(), RecordingOutput::new());
        for &level in levels {
            scheduler
                .push(AudioChunk::new(vec![level; len], rate))
                .unwrap();
        }
        scheduler.output().scheduled().to_vec()
    }

    #[test]
    fn renders_back_to_back_chunks_without_gap() {
        let chunks = scheduled(&[0.25, 0.5], 4, 8);
        let mut timeline = OutputTimeline::new(8);
        for chunk in chunks.iter().cloned() {
            timeline.insert(chunk);
        }

        let mut out = vec![0.0; 8];
        let finished = timeline.render(&mut out, 1);
        assert_eq!(out, vec![0.25, 0.25, 0.25, 0.25, 0.5, 0.5, 0.5, 0.5]);
        assert_eq!(finished, vec![chunks[0].token, chunks[1].token]);
        assert_eq!(timeline.pending(), 0);
    }

    #[test]
    fn completion_reported_only_after_last_frame() {
        let chunks = scheduled(&[0.1], 4, 8);
        let mut timeline = OutputTimeline::new(8);
        timeline.insert(chunks[0].clone());

        let mut out = vec![0.0; 3];
        assert!(timeline.render(&mut out, 1).is_empty());
        let mut out = vec![0.0; 1];
        assert_eq!(timeline.render(&mut out, 1), vec![chunks[0].token]);
    }

    #[test]
    fn duplicates_mono_across_channels() {
        let chunks = scheduled(&[0.5], 2, 8);
        let mut timeline = OutputTimeline::new(8);
        timeline.insert(chunks[0].clone());

        let mut out = vec![0.0; 6];
        timeline.render(&mut out, 2);
        assert_eq!(out, vec![0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
        assert_eq!(timeline.frame(), 3);
    }

    #[test]
    fn gain_scales_output() {
        let chunks = scheduled(&[0.8], 2, 8);
        let mut timeline = OutputTimeline::new(8);
        timeline.set_gain(0.5);
        timeline.insert(chunks[0].clone());

        let mut out = vec![0.0; 2];
        timeline.render(&mut out, 1);
        assert!(out.iter().all(|&s| (s - 0.4).abs() < 1e-6));
    }

    #[test]
    fn chunk_is_resampled_to_device_rate() {
        let chunks = scheduled(&[0.3], 4, 8);
        let mut timeline = OutputTimeline::new(16);
        timeline.insert(chunks[0].clone());

        let mut out = vec![0.0; 8];
        let finished = timeline.render(&mut out, 1);
        assert_eq!(finished.len(), 1);
        assert!(out.iter().all(|&s| (s - 0.3).abs() < 1e-6));
    }

    #[test]
    fn clear_drops_pending_without_completions() {
        let chunks = scheduled(&[0.3, 0.3], 4, 8);
        let mut timeline = OutputTimeline::new(8);
        for chunk in chunks {
            timeline.insert(chunk);
        }
        timeline.clear();

        let mut out = vec![1.0; 8];
        assert!(timeline.render(&mut out, 1).is_empty());
        assert!(out.iter().all(|&s| s == 0.0));
        assert!((timeline.position_secs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn fractional_rate_ratio_stays_gapless() {
        // 1000 samples at 24kHz is 1837.5 frames at 44.1kHz.
        let chunks = scheduled(&[0.5; 12], 1000, 24_000);
        let mut timeline = OutputTimeline::new(44_100);
        for chunk in chunks.iter().cloned() {
            timeline.insert(chunk);
        }

        let mut rendered = Vec::new();
        let mut finished = Vec::new();
        while timeline.pending() > 0 {
            let mut out = vec![0.0; 512];
            finished.extend(timeline.render(&mut out, 1));
            rendered.extend(out);
        }

        let audible = rendered.iter().take_while(|&&s| s != 0.0).count();
        assert!(
            rendered[..audible].iter().all(|&s| (s - 0.5).abs() < 1e-6),
            "overlapping frames found"
        );
        assert!(rendered[audible..].iter().all(|&s| s == 0.0), "gap found");
        assert_eq!(audible, 12 * 1838);
        let tokens: Vec<_> = chunks.iter().map(|c| c.token).collect();
        assert_eq!(finished, tokens);
    }

    #[test]
    fn late_insert_starts_at_playhead() {
        let chunks = scheduled(&[0.25], 4, 8);
        let mut timeline = OutputTimeline::new(8);
        let mut out = vec![0.0; 2];
        timeline.render(&mut out, 1);

        // Start time 0 is already behind the playhead.
        timeline.insert(chunks[0].clone());
        let mut out = vec![0.0; 6];
        let finished = timeline.render(&mut out, 1);
        assert_eq!(out, vec![0.25, 0.25, 0.25, 0.25, 0.0, 0.0]);
        assert_eq!(finished, vec![chunks[0].token]);
    }

    #[test]
    fn clear_resets_continuation() {
        let chunks = scheduled(&[0.3, 0.6], 4, 8);
        let mut timeline = OutputTimeline::new(8);
        timeline.insert(chunks[0].clone());
        timeline.clear();

        // The second chunk keeps its nominal frame instead of following the dropped one.
        timeline.insert(chunks[1].clone());
        let mut out = vec![0.0; 8];
        timeline.render(&mut out, 1);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.0, 0.6, 0.6, 0.6, 0.6]);
    }
}
