//! # pcm-stream-core
//!
//! Platform-agnostic core of a low-latency block streaming engine for
//! 16-bit linear PCM.
//!
//! A fixed pool of N slots rotates between the application and an audio
//! device. Playback pulls samples from a producer into the next free slot
//! and queues it; capture pre-queues every slot and hands each completed
//! block to a consumer before queueing it again. Platform backends
//! (Windows waveOut/waveIn, the in-memory simulator) implement
//! `WaveBackend` and plug into the generic `Player` and `Recorder`.
//!
//! ## Architecture
//!
//! ```text
//! pcm-stream-core (this crate)
//! ├── traits/       ← WaveBackend, WaveDevice, SampleSource, SampleSink, StreamDelegate
//! ├── models/       ← StreamError, AudioFormat, StreamConfig, SessionState, StreamStats
//! ├── buffer/       ← Arena (contiguous slot memory), BufferPool (slots + cursor)
//! ├── signal/       ← CompletionSignal, StopHandle
//! ├── session/      ← DeviceSession, Player (pull), Recorder (push), StreamThread
//! ├── processing/   ← WAV header generation
//! ├── storage/      ← WavFileWriter
//! └── sim/          ← SimulatedBackend (FIFO in-memory device)
//! ```

pub mod buffer;
pub mod models;
pub mod processing;
pub mod session;
pub mod signal;
pub mod sim;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use buffer::arena::Arena;
pub use buffer::pool::{BufferPool, BufferSlot, DeviceBuffer, SlotRegion, SlotState};
pub use models::config::{StreamConfig, SubmitPolicy};
pub use models::error::{Result, StreamError};
pub use models::format::{AudioFormat, DeviceId, Direction};
pub use models::state::SessionState;
pub use models::stats::StreamStats;
pub use session::capture::{Capture, CaptureThread, Recorder};
pub use session::device::{DeviceSession, SlotWait};
pub use session::playback::{PlaybackSummary, PlaybackThread, Player};
pub use session::thread::StreamThread;
pub use signal::{CompletionSignal, StopHandle, WaitOutcome};
pub use sim::{AutoComplete, SimulatedBackend, SimulatedDevice};
pub use storage::wav_writer::WavFileWriter;
pub use traits::backend::{WaveBackend, WaveDevice};
pub use traits::delegate::StreamDelegate;
pub use traits::sink::SampleSink;
pub use traits::source::{Pull, SampleSource, VecSource};
