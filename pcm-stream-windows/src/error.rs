use thiserror::Error;
use windows::Win32::Media::Audio::WAVERR_BADFORMAT;
use windows::Win32::Media::{
    MMSYSERR_ALLOCATED, MMSYSERR_BADDEVICEID, MMSYSERR_NODRIVER, MMSYSERR_NOERROR, MMSYSERR_NOMEM,
};

use pcm_stream_core::models::error::StreamError;

/// A failed WinMM call and its MMRESULT.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("{call} failed (MMRESULT {code})")]
pub struct MmError {
    pub call: &'static str,
    pub code: u32,
}

impl MmError {
    /// `Ok` for MMSYSERR_NOERROR, otherwise the error for `call`.
    pub fn check(call: &'static str, code: u32) -> Result<(), MmError> {
        if code == MMSYSERR_NOERROR {
            Ok(())
        } else {
            Err(MmError { call, code })
        }
    }
}

impl From<MmError> for StreamError {
    fn from(e: MmError) -> Self {
        match e.code {
            MMSYSERR_ALLOCATED => {
                StreamError::DeviceUnavailable(format!("{}: device is in use by another application", e))
            }
            MMSYSERR_BADDEVICEID | MMSYSERR_NODRIVER => StreamError::DeviceUnavailable(e.to_string()),
            WAVERR_BADFORMAT => StreamError::FormatUnsupported(e.to_string()),
            MMSYSERR_NOMEM => StreamError::AllocationFailure(e.to_string()),
            _ => StreamError::Transport(e.to_string()),
        }
    }
}
