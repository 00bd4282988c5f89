//! # pcm-stream-windows
//!
//! Windows WinMM backend for pcm-stream.
//!
//! Provides:
//! - `WinmmBackend`: `WaveBackend` over waveOut (playback) and waveIn (capture)
//! - `WinmmDevice`: an opened endpoint with its registered `WAVEHDR`s
//! - `MmError`: MMRESULT codes and their mapping onto `StreamError`
//!
//! ## Usage
//! ```ignore
//! use pcm_stream_core::{Recorder, WavFileWriter, AudioFormat};
//! use pcm_stream_windows::WinmmBackend;
//!
//! let mut recorder = Recorder::new(WinmmBackend);
//! if recorder.init_recorder(22050, 1, 0) {
//!     let mut wav = WavFileWriter::new("take.wav", AudioFormat::new(22050, 1));
//!     wav.open()?;
//!     let capture = recorder.spawn(wav, 22050)?;
//!     // ...
//!     capture.stop();
//! }
//! ```

#[cfg(target_os = "windows")]
pub mod error;
#[cfg(target_os = "windows")]
pub mod winmm;

#[cfg(target_os = "windows")]
pub use error::MmError;
#[cfg(target_os = "windows")]
pub use winmm::{WinmmBackend, WinmmDevice};
