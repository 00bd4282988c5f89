use crate::models::error::StreamError;
use crate::models::format::Direction;
use crate::models::state::SessionState;

/// Event delegate for session notifications.
///
/// All methods are called from the streaming thread. Implementations should
/// return quickly; the device keeps consuming buffers meanwhile.
pub trait StreamDelegate: Send + Sync {
    /// Called when the session state changes.
    fn on_state_changed(&self, direction: Direction, state: SessionState);

    /// Called when the device rejected a submission and the buffer was dropped.
    fn on_buffer_dropped(&self, _slot: usize, _error: &StreamError) {}

    /// Called when a streaming call fails.
    fn on_error(&self, error: &StreamError);

    /// Called once when capture starts delivering audio.
    fn on_capture_started(&self) {}
}
