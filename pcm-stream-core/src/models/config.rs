use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::StreamError;
use super::format::DeviceId;

/// Samples (not frames) per slot when nothing else is configured.
pub const DEFAULT_SAMPLES_PER_BUFFER: usize = 7500;
pub const DEFAULT_PLAYBACK_BUFFERS: usize = 4;
pub const DEFAULT_CAPTURE_BUFFERS: usize = 6;

pub const DEFAULT_PLAYBACK_RATE: u32 = 11025;
pub const DEFAULT_CAPTURE_RATE: u32 = 22050;
pub const DEFAULT_CAPTURE_CHANNELS: u16 = 1;

/// What to do when the device rejects a single buffer submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitPolicy {
    /// Log the failure, drop the buffer and keep streaming.
    #[default]
    LogAndDrop,
    /// Abort the streaming call with the transport error.
    Strict,
}

/// Configuration for a playback or capture session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Number of rotating slots (N, at least 2).
    pub buffer_count: usize,

    /// Interleaved 16-bit samples per slot (L).
    pub samples_per_buffer: usize,

    /// Length of one bounded wait slice; the stop flag is checked between slices.
    pub poll_interval_ms: u64,

    /// Give up with `Timeout` after this long without a completion (None = never).
    pub completion_timeout_ms: Option<u64>,

    pub submit_policy: SubmitPolicy,

    pub device: DeviceId,
}

impl StreamConfig {
    pub fn playback() -> Self {
        Self::default()
    }

    pub fn capture() -> Self {
        Self {
            buffer_count: DEFAULT_CAPTURE_BUFFERS,
            ..Self::default()
        }
    }

    pub fn with_buffers(mut self, buffer_count: usize, samples_per_buffer: usize) -> Self {
        self.buffer_count = buffer_count;
        self.samples_per_buffer = samples_per_buffer;
        self
    }

    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = device;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn completion_timeout(&self) -> Option<Duration> {
        self.completion_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.buffer_count < 2 {
            return Err(StreamError::Configuration(format!(
                "at least 2 buffers required, got {}",
                self.buffer_count
            )));
        }
        if self.samples_per_buffer == 0 {
            return Err(StreamError::Configuration("samples per buffer must be positive".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(StreamError::Configuration("poll interval must be positive".into()));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, StreamError> {
        let config: StreamConfig = serde_json::from_str(json)
            .map_err(|e| StreamError::Configuration(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, StreamError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| StreamError::Configuration(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_count: DEFAULT_PLAYBACK_BUFFERS,
            samples_per_buffer: DEFAULT_SAMPLES_PER_BUFFER,
            poll_interval_ms: 50,
            completion_timeout_ms: None,
            submit_policy: SubmitPolicy::LogAndDrop,
            device: DeviceId::Default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(StreamConfig::playback().validate().is_ok());
        let capture = StreamConfig::capture();
        assert_eq!(capture.buffer_count, DEFAULT_CAPTURE_BUFFERS);
        assert!(capture.validate().is_ok());
    }

    #[test]
    fn rejects_single_buffer() {
        let config = StreamConfig::default().with_buffers(1, 512);
        assert!(matches!(config.validate(), Err(StreamError::Configuration(_))));
    }

    #[test]
    fn parses_partial_json_over_defaults() {
        let config = StreamConfig::from_json_str(
            r#"{ "buffer_count": 8, "completion_timeout_ms": 2000, "submit_policy": "strict",
                 "device": { "index": 1 } }"#,
        )
        .unwrap();
        assert_eq!(config.buffer_count, 8);
        assert_eq!(config.samples_per_buffer, DEFAULT_SAMPLES_PER_BUFFER);
        assert_eq!(config.completion_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(config.submit_policy, SubmitPolicy::Strict);
        assert_eq!(config.device, DeviceId::Index(1));
    }

    #[test]
    fn invalid_json_config_is_rejected() {
        assert!(StreamConfig::from_json_str(r#"{ "buffer_count": 0 }"#).is_err());
        assert!(StreamConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn loads_from_file() {
        let path = std::env::temp_dir().join("pcm_stream_test_config.json");
        std::fs::write(&path, r#"{ "samples_per_buffer": 1024 }"#).unwrap();
        let config = StreamConfig::from_json_file(&path).unwrap();
        assert_eq!(config.samples_per_buffer, 1024);
        std::fs::remove_file(&path).ok();
    }
}
