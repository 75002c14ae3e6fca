//! Error types for voxlink.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxlinkError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Device errors
    #[error("Audio device unavailable ({device}): {message}")]
    DeviceUnavailable { device: String, message: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio playback failed: {message}")]
    AudioPlayback { message: String },

    #[error("A capture session is already active")]
    CaptureAlreadyActive,

    // Chunk errors
    #[error("Failed to decode audio chunk: {message}")]
    DecodeFailure { message: String },

    #[error("Sample rate mismatch: expected {expected}Hz, got {actual}Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },

    #[error("Playback queue is full ({capacity} chunks)")]
    PlaybackQueueFull { capacity: usize },

    // Transport errors
    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxlinkError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_device_unavailable_display() {
        let error = VoxlinkError::DeviceUnavailable {
            device: "default".to_string(),
            message: "permission denied".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Audio device unavailable (default): permission denied"
        );
    }

    #[test]
    fn test_decode_failure_display() {
        let error = VoxlinkError::DecodeFailure {
            message: "odd byte count 3".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to decode audio chunk: odd byte count 3"
        );
    }

    #[test]
    fn test_sample_rate_mismatch_display() {
        let error = VoxlinkError::SampleRateMismatch {
            expected: 24000,
            actual: 16000,
        };
        assert_eq!(
            error.to_string(),
            "Sample rate mismatch: expected 24000Hz, got 16000Hz"
        );
    }

    #[test]
    fn test_queue_full_display() {
        let error = VoxlinkError::PlaybackQueueFull { capacity: 8 };
        assert_eq!(error.to_string(), "Playback queue is full (8 chunks)");
    }

    #[test]
    fn test_capture_already_active_display() {
        assert_eq!(
            VoxlinkError::CaptureAlreadyActive.to_string(),
            "A capture session is already active"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = VoxlinkError::ConfigInvalidValue {
            key: "playback.lookahead_chunks".to_string(),
            message: "must be at least 1".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for playback.lookahead_chunks: must be at least 1"
        );
    }

    #[test]
    fn test_session_not_found_display() {
        let error = VoxlinkError::SessionNotFound {
            id: "abc".to_string(),
        };
        assert_eq!(error.to_string(), "Session not found: abc");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: VoxlinkError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: VoxlinkError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: VoxlinkError = json_error.into();
        assert!(error.to_string().starts_with("JSON error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: VoxlinkError = io_error.into();

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<VoxlinkError>();
        assert_sync::<VoxlinkError>();
    }
}
