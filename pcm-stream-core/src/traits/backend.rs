use crate::buffer::pool::DeviceBuffer;
use crate::models::error::StreamError;
use crate::models::format::{AudioFormat, DeviceId, Direction};
use crate::signal::CompletionSignal;

/// Factory for platform wave endpoints.
///
/// Implemented by:
/// - `SimulatedBackend` (in-memory, this crate)
/// - `WinmmBackend` (Windows waveOut/waveIn)
pub trait WaveBackend: Send + Sync {
    type Device: WaveDevice;

    /// Number of endpoints available for `direction`.
    fn device_count(&self, direction: Direction) -> usize;

    /// Query-only open: validate that `format` is supported without
    /// allocating device resources.
    fn query_format(&self, direction: Direction, format: &AudioFormat, device: DeviceId) -> Result<(), StreamError>;

    /// Open the endpoint. The device must set `signal` every time a
    /// submitted buffer completes.
    fn open(
        &self,
        direction: Direction,
        format: &AudioFormat,
        device: DeviceId,
        signal: CompletionSignal,
    ) -> Result<Self::Device, StreamError>;
}

/// An opened endpoint.
///
/// Buffers are submitted and completed in FIFO order. Between `submit` and
/// the slot reporting done, the device owns the slot memory.
pub trait WaveDevice: Send {
    /// Register slot memory with the device.
    fn prepare(&mut self, buffer: DeviceBuffer) -> Result<(), StreamError>;

    fn unprepare(&mut self, index: usize) -> Result<(), StreamError>;

    /// Queue a prepared buffer. Playback plays `buffer.length()` bytes;
    /// capture fills up to `buffer.capacity()` bytes.
    fn submit(&mut self, buffer: DeviceBuffer) -> Result<(), StreamError>;

    /// Bytes processed if slot `index` completed since its last submit.
    fn poll_done(&self, index: usize) -> Option<usize>;

    /// Begin capturing. Playback devices start on first submit.
    fn start(&mut self) -> Result<(), StreamError>;

    /// Stop immediately and mark every queued buffer done.
    fn reset(&mut self) -> Result<(), StreamError>;

    /// Release the endpoint. Every slot must be unprepared first.
    fn close(&mut self) -> Result<(), StreamError>;
}
