//! Jitter-buffered playback scheduling.
//!
//! Decoded chunks arrive at irregular times and sizes. The scheduler holds
//! them in a FIFO queue and hands them to an [`OutputLine`] with absolute
//! start times, keeping a small look-ahead window scheduled so that chunk
//! completion latency never turns into an audible gap.
//!
//! ```text
//!  Empty ──push──▶ PreBuffering ──queue ≥ prebuffer──▶ Playing
//!                                                     │    ▲
//!                                   queue < threshold │    │ queue ≥ threshold + hysteresis
//!                                                     ▼    │
//!                                                   ReBuffering
//!  any ──stop──▶ Stopped ──push──▶ PreBuffering
//! ```
//!
//! Each chunk starts at `max(now, next_start)` and the next one at
//! `start + duration`. The running schedule is reset to `now` when it has
//! fallen more than `stale_after` seconds behind the clock.

use crate::audio::chunk::AudioChunk;
use crate::audio::codec;
use crate::config::PlaybackConfig;
use crate::defaults;
use crate::error::{Result, VoxlinkError};
use crate::playback::clock::PlaybackClock;
use crate::playback::output::OutputLine;
use std::collections::{HashSet, VecDeque};
use std::fmt;

/// Buffering mode of a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    /// Nothing queued, nothing scheduled.
    Empty,
    /// Queueing without scheduling until the pre-buffer target is reached.
    PreBuffering,
    /// Scheduling continuously, keeping the look-ahead window full.
    Playing,
    /// Queue ran low; scheduled chunks finish but nothing new is scheduled.
    ReBuffering,
    /// Halted by `stop`. The next push starts a fresh session.
    Stopped,
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BufferState::Empty => "empty",
            BufferState::PreBuffering => "pre-buffering",
            BufferState::Playing => "playing",
            BufferState::ReBuffering => "re-buffering",
            BufferState::Stopped => "stopped",
        };
        f.pad(label)
    }
}

/// Tuning for a playback session.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Rate every pushed chunk must carry.
    pub sample_rate: u32,
    /// Chunks to queue before the first one is scheduled.
    pub prebuffer_chunks: usize,
    /// Chunks kept scheduled ahead of the playhead.
    pub lookahead_chunks: usize,
    /// Queue depth below which Playing falls back to ReBuffering.
    pub rebuffer_threshold: usize,
    /// Extra depth above the threshold required to leave ReBuffering.
    pub rebuffer_hysteresis: usize,
    /// Seconds the schedule may lag the clock before it is reset.
    pub stale_after: f64,
    /// Queue capacity; `None` is unbounded.
    pub max_queued_chunks: Option<usize>,
}

impl SchedulerConfig {
    /// Queue depth at which ReBuffering resumes scheduling.
    pub fn resume_depth(&self) -> usize {
        self.rebuffer_threshold + self.rebuffer_hysteresis
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::PLAYBACK_SAMPLE_RATE,
            prebuffer_chunks: defaults::PREBUFFER_CHUNKS,
            lookahead_chunks: defaults::LOOKAHEAD_CHUNKS,
            rebuffer_threshold: defaults::REBUFFER_THRESHOLD,
            rebuffer_hysteresis: defaults::REBUFFER_HYSTERESIS,
            stale_after: defaults::STALE_SCHEDULE_MS as f64 / 1000.0,
            max_queued_chunks: Some(defaults::MAX_QUEUED_CHUNKS),
        }
    }
}

impl From<&PlaybackConfig> for SchedulerConfig {
    fn from(config: &PlaybackConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            prebuffer_chunks: config.prebuffer_chunks,
            lookahead_chunks: config.lookahead_chunks.max(1),
            rebuffer_threshold: config.rebuffer_threshold,
            rebuffer_hysteresis: config.rebuffer_hysteresis,
            stale_after: config.stale_after_ms as f64 / 1000.0,
            max_queued_chunks: (config.max_queued_chunks > 0).then_some(config.max_queued_chunks),
        }
    }
}

/// Identifies one scheduled chunk when its completion is reported.
///
/// Tokens carry the session generation, so completions from before a `stop`
/// are recognised and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompletionToken {
    generation: u64,
    sequence: u64,
}

impl CompletionToken {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// A chunk handed to the output line with its absolute start time.
#[derive(Debug, Clone)]
pub struct ScheduledChunk {
    pub token: CompletionToken,
    /// Start on the playback clock's axis, in seconds.
    pub start: f64,
    pub chunk: AudioChunk,
}

impl ScheduledChunk {
    pub fn end(&self) -> f64 {
        self.start + self.chunk.duration_secs()
    }
}

/// Mutable scheduling state of one playback session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleState {
    /// Chunks handed to the output that have not completed yet.
    pub scheduled: usize,
    /// Where the next chunk continues the timeline; `None` before the first.
    pub next_start: Option<f64>,
    pub state: BufferState,
}

impl Default for ScheduleState {
    fn default() -> Self {
        Self {
            scheduled: 0,
            next_start: None,
            state: BufferState::Empty,
        }
    }
}

/// Counters describing how a session has gone so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub scheduled: u64,
    pub completed: u64,
    /// Chunks discarded because they could not be decoded.
    pub dropped: u64,
    /// Transitions from Playing into ReBuffering.
    pub underruns: u64,
    /// Chunks that started after the point where the previous one ended.
    pub late_starts: u64,
    /// Times the schedule was reset because it lagged too far behind.
    pub stale_resets: u64,
}

/// Adaptive jitter buffer in front of an output line.
pub struct PlaybackScheduler<C: PlaybackClock, O: OutputLine> {
    config: SchedulerConfig,
    clock: C,
    output: O,
    queue: VecDeque<AudioChunk>,
    schedule: ScheduleState,
    in_flight: HashSet<u64>,
    generation: u64,
    next_sequence: u64,
    draining: bool,
    volume: f32,
    stats: PlaybackStats,
}

impl<C: PlaybackClock, O: OutputLine> PlaybackScheduler<C, O> {
    pub fn new(config: SchedulerConfig, clock: C, output: O) -> Self {
        Self {
            config,
            clock,
            output,
            queue: VecDeque::new(),
            schedule: ScheduleState::default(),
            in_flight: HashSet::new(),
            generation: 0,
            next_sequence: 0,
            draining: false,
            volume: 1.0,
            stats: PlaybackStats::default(),
        }
    }

    /// Queues a decoded chunk and schedules whatever the current state allows.
    ///
    /// # Errors
    /// - `SampleRateMismatch` when the chunk's rate differs from the session rate.
    /// - `PlaybackQueueFull` when the queue is at capacity; the queue is untouched.
    pub fn push(&mut self, chunk: AudioChunk) -> Result<BufferState> {
        if chunk.sample_rate() != self.config.sample_rate {
            return Err(VoxlinkError::SampleRateMismatch {
                expected: self.config.sample_rate,
                actual: chunk.sample_rate(),
            });
        }
        if chunk.is_empty() {
            return Ok(self.schedule.state);
        }
        if let Some(capacity) = self.config.max_queued_chunks
            && self.queue.len() >= capacity
        {
            return Err(VoxlinkError::PlaybackQueueFull { capacity });
        }

        if matches!(self.schedule.state, BufferState::Empty | BufferState::Stopped) {
            self.transition(BufferState::PreBuffering);
        }
        self.queue.push_back(chunk);

        match self.schedule.state {
            BufferState::PreBuffering if self.queue.len() >= self.config.prebuffer_chunks => {
                self.transition(BufferState::Playing);
            }
            BufferState::ReBuffering if self.queue.len() >= self.config.resume_depth() => {
                self.transition(BufferState::Playing);
            }
            _ => {}
        }
        self.fill();
        Ok(self.schedule.state)
    }

    /// Decodes a wire payload and queues it.
    ///
    /// A payload that fails to decode is logged and dropped; the stream
    /// carries on with the next chunk.
    pub fn push_encoded(&mut self, data: &str) -> Result<BufferState> {
        match codec::decode_chunk(data, self.config.sample_rate) {
            Ok(chunk) => self.push(chunk),
            Err(e) => {
                self.stats.dropped += 1;
                tracing::warn!("dropping undecodable audio chunk: {e}");
                Ok(self.schedule.state)
            }
        }
    }

    /// Reports that a scheduled chunk has finished playing.
    ///
    /// Completions from a previous session (before `stop`) or for tokens
    /// already reported are ignored.
    pub fn on_chunk_ended(&mut self, token: CompletionToken) {
        if token.generation != self.generation || !self.in_flight.remove(&token.sequence) {
            tracing::trace!(sequence = token.sequence, "ignoring stale completion");
            return;
        }
        self.schedule.scheduled -= 1;
        self.stats.completed += 1;
        self.fill();

        if self.draining && self.queue.is_empty() && self.schedule.scheduled == 0 {
            self.draining = false;
            self.schedule.next_start = None;
            self.transition(BufferState::Empty);
        }
    }

    /// Marks the end of the current response: whatever is queued plays out
    /// regardless of the pre-buffer and re-buffer thresholds.
    pub fn finish_turn(&mut self) {
        if self.is_idle() {
            if self.schedule.state != BufferState::Stopped {
                self.schedule.next_start = None;
                self.transition(BufferState::Empty);
            }
            return;
        }
        self.draining = true;
        if matches!(
            self.schedule.state,
            BufferState::PreBuffering | BufferState::ReBuffering
        ) {
            self.transition(BufferState::Playing);
        }
        self.fill();
    }

    /// Halts all output and discards the queue. Safe from any state.
    pub fn stop(&mut self) {
        self.output.cancel_all();
        self.queue.clear();
        self.in_flight.clear();
        self.schedule = ScheduleState {
            state: BufferState::Stopped,
            ..ScheduleState::default()
        };
        self.generation += 1;
        self.draining = false;
        tracing::debug!(generation = self.generation, "playback stopped");
    }

    /// Sets output gain, clamped to [0, 1].
    pub fn set_volume(&mut self, volume: f32) {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.volume = volume;
        self.output.set_gain(volume);
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn state(&self) -> BufferState {
        self.schedule.state
    }

    pub fn schedule_state(&self) -> ScheduleState {
        self.schedule
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn scheduled(&self) -> usize {
        self.schedule.scheduled
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// True when nothing is queued or waiting to finish.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.schedule.scheduled == 0
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn transition(&mut self, next: BufferState) {
        if self.schedule.state != next {
            tracing::debug!(
                from = %self.schedule.state,
                to = %next,
                queued = self.queue.len(),
                scheduled = self.schedule.scheduled,
                "playback state"
            );
            self.schedule.state = next;
        }
    }

    /// Tops up the look-ahead window from the queue.
    fn fill(&mut self) {
        while self.schedule.scheduled < self.config.lookahead_chunks {
            if self.schedule.state != BufferState::Playing {
                return;
            }
            if !self.draining && self.queue.len() < self.config.rebuffer_threshold {
                self.stats.underruns += 1;
                self.transition(BufferState::ReBuffering);
                return;
            }
            let Some(chunk) = self.queue.pop_front() else {
                return;
            };
            self.schedule_chunk(chunk);
        }
    }

    fn schedule_chunk(&mut self, chunk: AudioChunk) {
        let now = self.clock.now();

        let mut next_start = self.schedule.next_start.unwrap_or(now);
        if next_start < now - self.config.stale_after {
            tracing::warn!(
                behind_secs = now - next_start,
                "playback schedule fell behind the clock; resetting"
            );
            self.stats.stale_resets += 1;
            next_start = now;
        } else if next_start < now {
            self.stats.late_starts += 1;
        }
        let start = next_start.max(now);

        let token = CompletionToken {
            generation: self.generation,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.schedule.next_start = Some(start + chunk.duration_secs());
        self.schedule.scheduled += 1;
        self.in_flight.insert(token.sequence);
        self.stats.scheduled += 1;

        self.output.schedule(ScheduledChunk {
            token,
            start,
            chunk,
        });
    }
}
