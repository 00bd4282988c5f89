use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::StreamError;

/// The only sample width the engine streams.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Sample rate bounds accepted during playback negotiation.
pub const MIN_SAMPLE_RATE: u32 = 8000;
pub const MAX_SAMPLE_RATE: u32 = 44100;

/// Stream direction of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Application pulls samples from a producer and the device plays them.
    Playback,
    /// The device fills buffers and the application pushes them to a consumer.
    Capture,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Playback => f.write_str("playback"),
            Self::Capture => f.write_str("capture"),
        }
    }
}

/// Which endpoint to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceId {
    /// Let the backend pick (WAVE_MAPPER on WinMM).
    #[default]
    Default,
    Index(u32),
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Index(i) => write!(f, "#{}", i),
        }
    }
}

/// Linear PCM format: 16-bit signed, interleaved, native-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn bits_per_sample(&self) -> u16 {
        BITS_PER_SAMPLE
    }

    pub fn bytes_per_sample(&self) -> usize {
        (BITS_PER_SAMPLE / 8) as usize
    }

    /// Bytes per interleaved frame (`channels × bytes_per_sample`).
    pub fn block_align(&self) -> u16 {
        self.channels.saturating_mul(BITS_PER_SAMPLE / 8)
    }

    pub fn avg_bytes_per_sec(&self) -> u32 {
        self.sample_rate.saturating_mul(self.block_align() as u32)
    }

    /// Playback time represented by `samples` interleaved samples.
    pub fn samples_to_duration(&self, samples: usize) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = samples as f64 / self.channels as f64;
        Duration::from_secs_f64(frames / self.sample_rate as f64)
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.sample_rate == 0 {
            return Err(StreamError::FormatUnsupported("sample rate must be positive".into()));
        }
        if self.channels == 0 {
            return Err(StreamError::FormatUnsupported("channel count must be positive".into()));
        }
        if self.block_align() as usize != self.channels as usize * self.bytes_per_sample()
            || self.sample_rate.checked_mul(self.block_align() as u32).is_none()
        {
            return Err(StreamError::FormatUnsupported(format!(
                "block align {} does not match {}-bit samples",
                self.block_align(),
                BITS_PER_SAMPLE
            )));
        }
        Ok(())
    }

    /// Negotiate a playback format from a requested one.
    ///
    /// Channels are clamped to mono/stereo and the rate to
    /// [`MIN_SAMPLE_RATE`]..=[`MAX_SAMPLE_RATE`]. A zero rate falls back to
    /// `preferred_rate`.
    pub fn negotiate(channels: u16, rate: u32, preferred_rate: u32) -> Self {
        let channels = channels.clamp(1, 2);
        let rate = if rate == 0 { preferred_rate } else { rate };
        Self::new(rate.clamp(MIN_SAMPLE_RATE, MAX_SAMPLE_RATE), channels)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}-bit",
            self.sample_rate, self.channels, BITS_PER_SAMPLE
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn derived_fields_44k_stereo() {
        let format = AudioFormat::new(44100, 2);
        assert_eq!(format.block_align(), 4);
        assert_eq!(format.avg_bytes_per_sec(), 176_400);
        assert_eq!(format.bits_per_sample(), 16);
    }

    #[test]
    fn duration_of_one_block() {
        let format = AudioFormat::new(44100, 2);
        // 7500 interleaved samples = 3750 frames
        let d = format.samples_to_duration(7500);
        assert_relative_eq!(d.as_secs_f64(), 3750.0 / 44100.0, epsilon = 1e-9);
    }

    #[test]
    fn validate_rejects_zero_fields() {
        assert!(matches!(
            AudioFormat::new(0, 2).validate(),
            Err(StreamError::FormatUnsupported(_))
        ));
        assert!(matches!(
            AudioFormat::new(22050, 0).validate(),
            Err(StreamError::FormatUnsupported(_))
        ));
        assert!(AudioFormat::new(22050, 1).validate().is_ok());
    }

    #[test]
    fn negotiate_clamps_to_supported_range() {
        assert_eq!(AudioFormat::negotiate(6, 96000, 11025), AudioFormat::new(44100, 2));
        assert_eq!(AudioFormat::negotiate(0, 4000, 11025), AudioFormat::new(8000, 1));
        assert_eq!(AudioFormat::negotiate(1, 0, 11025), AudioFormat::new(11025, 1));
    }
}
