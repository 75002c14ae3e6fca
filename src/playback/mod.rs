pub mod clock;
pub mod output;
pub mod player;
pub mod scheduler;
pub mod timeline;

pub use clock::{FrameClock, ManualClock, PlaybackClock};
#[cfg(feature = "cpal-audio")]
pub use output::CpalOutputLine;
pub use output::{OutputLine, RecordingOutput};
pub use player::AudioPlayer;
pub use scheduler::{
    BufferState, CompletionToken, PlaybackScheduler, PlaybackStats, ScheduleState,
    ScheduledChunk, SchedulerConfig,
};
pub use timeline::OutputTimeline;
