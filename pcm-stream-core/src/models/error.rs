use thiserror::Error;

/// Errors that can occur while opening or streaming a PCM session.
///
/// End-of-stream is not an error: it travels as [`Pull::EndOfStream`] and
/// [`Capture::EndOfStream`].
///
/// [`Pull::EndOfStream`]: crate::traits::source::Pull::EndOfStream
/// [`Capture::EndOfStream`]: crate::session::capture::Capture::EndOfStream
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The endpoint does not exist or another process holds it exclusively.
    #[error("device not available: {0}")]
    DeviceUnavailable(String),

    /// The endpoint rejected the rate/channel/bit-depth combination.
    #[error("format not supported: {0}")]
    FormatUnsupported(String),

    /// The buffer arena or the completion signal could not be created.
    #[error("allocation failed: {0}")]
    AllocationFailure(String),

    /// The completion signal fired but the slot at the cursor is not done.
    #[error("buffer {expected} not ready (out-of-order completion)")]
    BufferNotReady { expected: usize },

    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A per-buffer submit/prepare failure reported by the device.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("timed out waiting for buffer completion")]
    Timeout,

    #[error("configuration failed: {0}")]
    Configuration(String),

    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        StreamError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
