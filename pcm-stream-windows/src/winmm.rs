//! WinMM waveOut/waveIn backend.
//!
//! Each open registers a `CALLBACK_EVENT` on an auto-reset Win32 event.
//! The driver sets it on every finished buffer; a small bridge thread per
//! device forwards each wakeup into the session's `CompletionSignal`.
//! Per-slot completion is read back from `WHDR_DONE` and `dwBytesRecorded`
//! in the slot's `WAVEHDR`.

use std::ffi::c_void;
use std::mem::size_of;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use windows::core::{PCWSTR, PSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Threading::{
    CreateEventW, ResetEvent, SetEvent, WaitForMultipleObjects, WaitForSingleObject, INFINITE,
};

use pcm_stream_core::buffer::pool::DeviceBuffer;
use pcm_stream_core::models::error::StreamError;
use pcm_stream_core::models::format::{AudioFormat, DeviceId, Direction};
use pcm_stream_core::signal::CompletionSignal;
use pcm_stream_core::traits::backend::{WaveBackend, WaveDevice};

use crate::error::MmError;

const WAVEHDR_SIZE: u32 = size_of::<WAVEHDR>() as u32;

const FLUSH_TIMEOUT_MS: u32 = 1000;

/// WinMM endpoints of this machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct WinmmBackend;

impl WaveBackend for WinmmBackend {
    type Device = WinmmDevice;

    fn device_count(&self, direction: Direction) -> usize {
        // SAFETY: plain queries without arguments.
        unsafe {
            match direction {
                Direction::Playback => waveOutGetNumDevs() as usize,
                Direction::Capture => waveInGetNumDevs() as usize,
            }
        }
    }

    fn query_format(&self, direction: Direction, format: &AudioFormat, device: DeviceId) -> Result<(), StreamError> {
        let wfx = wave_format(format);
        let id = device_index(device);
        // SAFETY: WAVE_FORMAT_QUERY opens nothing; `wfx` outlives the call.
        let code = unsafe {
            match direction {
                Direction::Playback => waveOutOpen(None, id, &wfx, None, None, WAVE_FORMAT_QUERY),
                Direction::Capture => waveInOpen(None, id, &wfx, None, None, WAVE_FORMAT_QUERY),
            }
        };
        MmError::check(query_call(direction), code).map_err(|e| match StreamError::from(e) {
            StreamError::Transport(msg) => StreamError::FormatUnsupported(msg),
            other => other,
        })
    }

    fn open(
        &self,
        direction: Direction,
        format: &AudioFormat,
        device: DeviceId,
        signal: CompletionSignal,
    ) -> Result<WinmmDevice, StreamError> {
        let wfx = wave_format(format);
        let id = device_index(device);
        let bridge = EventBridge::new()?;
        let event = Some(bridge.completion.raw());

        // SAFETY: `wfx` outlives the call and the event stays open for as
        // long as the device.
        let handle = unsafe {
            match direction {
                Direction::Playback => {
                    let mut h = HWAVEOUT::default();
                    let code = waveOutOpen(Some(&mut h as *mut _), id, &wfx, event, None, CALLBACK_EVENT);
                    MmError::check("waveOutOpen", code)?;
                    Handle::Out(h)
                }
                Direction::Capture => {
                    let mut h = HWAVEIN::default();
                    let code = waveInOpen(Some(&mut h as *mut _), id, &wfx, event, None, CALLBACK_EVENT);
                    MmError::check("waveInOpen", code)?;
                    Handle::In(h)
                }
            }
        };
        // The driver sets the event once on open; that is not a completion.
        bridge.completion.clear();

        let mut device = WinmmDevice {
            handle: Some(handle),
            headers: Vec::new(),
            bridge,
        };
        device.bridge.start(signal, direction)?;

        log::debug!("WinMM {} device {} opened ({})", direction, device, format);
        Ok(device)
    }
}

fn wave_format(format: &AudioFormat) -> WAVEFORMATEX {
    WAVEFORMATEX {
        wFormatTag: WAVE_FORMAT_PCM as u16,
        nChannels: format.channels,
        nSamplesPerSec: format.sample_rate,
        nAvgBytesPerSec: format.avg_bytes_per_sec(),
        nBlockAlign: format.block_align(),
        wBitsPerSample: format.bits_per_sample(),
        cbSize: 0,
    }
}

fn device_index(device: DeviceId) -> u32 {
    match device {
        DeviceId::Default => WAVE_MAPPER,
        DeviceId::Index(i) => i,
    }
}

fn query_call(direction: Direction) -> &'static str {
    match direction {
        Direction::Playback => "waveOutOpen(WAVE_FORMAT_QUERY)",
        Direction::Capture => "waveInOpen(WAVE_FORMAT_QUERY)",
    }
}

/// Unnamed auto-reset Win32 event, closed on drop.
struct Event(HANDLE);

impl Event {
    fn new() -> Result<Self, StreamError> {
        // SAFETY: no security attributes, no name.
        let handle = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }
            .map_err(|e| StreamError::AllocationFailure(format!("CreateEventW failed: {}", e)))?;
        Ok(Self(handle))
    }

    fn raw(&self) -> usize {
        self.0 .0 as usize
    }

    fn set(&self) {
        // SAFETY: the handle is open until drop.
        let _ = unsafe { SetEvent(self.0) };
    }

    fn clear(&self) {
        // SAFETY: as above.
        let _ = unsafe { ResetEvent(self.0) };
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        // SAFETY: the handle was created in `new` and is closed exactly once.
        let _ = unsafe { CloseHandle(self.0) };
    }
}

/// Forwards the driver's completion event into a `CompletionSignal`.
///
/// WinMM allows only a few calls such as `SetEvent` from driver context, so
/// the driver sets `completion` and this thread does the rest. `control`
/// asks the thread to acknowledge on `flushed`, or to exit once `quit` is set.
struct EventBridge {
    completion: Event,
    control: Event,
    flushed: Event,
    quit: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl EventBridge {
    fn new() -> Result<Self, StreamError> {
        Ok(Self {
            completion: Event::new()?,
            control: Event::new()?,
            flushed: Event::new()?,
            quit: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    fn start(&mut self, signal: CompletionSignal, direction: Direction) -> Result<(), StreamError> {
        let completion = self.completion.raw();
        let control = self.control.raw();
        let quit = Arc::clone(&self.quit);
        let flushed = self.flushed.raw();
        let handle = thread::Builder::new()
            .name(format!("winmm-{}-events", direction))
            .spawn(move || forward_events(completion, control, flushed, &quit, &signal))
            .map_err(|e| StreamError::AllocationFailure(format!("failed to spawn event thread: {}", e)))?;
        self.thread = Some(handle);
        Ok(())
    }

    /// Return once every completion the driver has set so far reached the
    /// signal. The bridge serves the lower-indexed completion event first.
    fn flush(&self) {
        if self.thread.is_none() {
            return;
        }
        self.flushed.clear();
        self.control.set();
        // SAFETY: the handle is open until drop.
        let _ = unsafe { WaitForSingleObject(self.flushed.0, FLUSH_TIMEOUT_MS) };
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.quit.store(true, Ordering::SeqCst);
            self.control.set();
            if thread.join().is_err() {
                log::error!("WinMM event thread panicked");
            }
        }
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

fn forward_events(completion: usize, control: usize, flushed: usize, quit: &AtomicBool, signal: &CompletionSignal) {
    let handles = [HANDLE(completion as *mut c_void), HANDLE(control as *mut c_void)];
    let flushed = HANDLE(flushed as *mut c_void);
    loop {
        // SAFETY: the events are closed only after this thread is joined.
        let result = unsafe { WaitForMultipleObjects(&handles, false, INFINITE) };
        if result == WAIT_OBJECT_0 {
            signal.set();
        } else if result.0 == WAIT_OBJECT_0.0 + 1 {
            if quit.load(Ordering::SeqCst) {
                break;
            }
            // SAFETY: as above.
            let _ = unsafe { SetEvent(flushed) };
        } else {
            log::error!("WinMM event wait failed ({:?})", result);
            break;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Handle {
    Out(HWAVEOUT),
    In(HWAVEIN),
}

/// An open waveOut or waveIn endpoint.
///
/// Headers are boxed so their addresses stay fixed while the driver holds
/// them.
pub struct WinmmDevice {
    handle: Option<Handle>,
    headers: Vec<Option<Box<WAVEHDR>>>,
    bridge: EventBridge,
}

// SAFETY: the handle and headers are only touched through &mut self by the
// streaming thread; the driver accesses headers only between submit and done.
// Event handles may be used from any thread.
unsafe impl Send for WinmmDevice {}

impl WinmmDevice {
    fn handle(&self) -> Result<Handle, StreamError> {
        self.handle
            .ok_or_else(|| StreamError::InvalidState("WinMM device is closed".into()))
    }

    fn header_mut(&mut self, index: usize) -> Result<&mut WAVEHDR, StreamError> {
        self.headers
            .get_mut(index)
            .and_then(|h| h.as_deref_mut())
            .ok_or_else(|| StreamError::InvalidState(format!("slot {} is not prepared", index)))
    }
}

impl WaveDevice for WinmmDevice {
    fn prepare(&mut self, buffer: DeviceBuffer) -> Result<(), StreamError> {
        let handle = self.handle()?;
        let index = buffer.index();
        if index >= self.headers.len() {
            self.headers.resize_with(index + 1, || None);
        }

        let mut header = Box::new(WAVEHDR {
            lpData: PSTR(buffer.as_ptr()),
            dwBufferLength: buffer.capacity() as u32,
            ..Default::default()
        });
        // SAFETY: the header is boxed and kept in `headers` until unprepared.
        let code = unsafe {
            match handle {
                Handle::Out(h) => waveOutPrepareHeader(h, &mut *header, WAVEHDR_SIZE),
                Handle::In(h) => waveInPrepareHeader(h, &mut *header, WAVEHDR_SIZE),
            }
        };
        MmError::check("wave*PrepareHeader", code)?;
        self.headers[index] = Some(header);
        Ok(())
    }

    fn unprepare(&mut self, index: usize) -> Result<(), StreamError> {
        let handle = self.handle()?;
        let Some(mut header) = self.headers.get_mut(index).and_then(Option::take) else {
            return Ok(());
        };
        // SAFETY: the header was prepared on this handle.
        let code = unsafe {
            match handle {
                Handle::Out(h) => waveOutUnprepareHeader(h, &mut *header, WAVEHDR_SIZE),
                Handle::In(h) => waveInUnprepareHeader(h, &mut *header, WAVEHDR_SIZE),
            }
        };
        if let Err(e) = MmError::check("wave*UnprepareHeader", code) {
            // Still queued; keep the header alive for the driver.
            self.headers[index] = Some(header);
            return Err(e.into());
        }
        Ok(())
    }

    fn submit(&mut self, buffer: DeviceBuffer) -> Result<(), StreamError> {
        let handle = self.handle()?;
        let header = self.header_mut(buffer.index())?;
        header.lpData = PSTR(buffer.as_ptr());
        header.dwBytesRecorded = 0;
        let header_ptr: *mut WAVEHDR = header;

        // SAFETY: the header is prepared and boxed; slot memory stays with
        // the driver until it reports WHDR_DONE.
        unsafe {
            match handle {
                Handle::Out(h) => {
                    (*header_ptr).dwBufferLength = buffer.length() as u32;
                    MmError::check("waveOutWrite", waveOutWrite(h, header_ptr, WAVEHDR_SIZE))?;
                }
                Handle::In(h) => {
                    (*header_ptr).dwBufferLength = buffer.capacity() as u32;
                    MmError::check("waveInAddBuffer", waveInAddBuffer(h, header_ptr, WAVEHDR_SIZE))?;
                }
            }
        }
        Ok(())
    }

    fn poll_done(&self, index: usize) -> Option<usize> {
        let header = self.headers.get(index)?.as_deref()?;
        // SAFETY: the driver updates these fields concurrently; read them
        // through volatile loads.
        let (flags, bytes) = unsafe {
            let flags = ptr::read_volatile(&header.dwFlags);
            let bytes = match self.handle? {
                Handle::Out(_) => ptr::read_volatile(&header.dwBufferLength),
                Handle::In(_) => ptr::read_volatile(&header.dwBytesRecorded),
            };
            (flags, bytes)
        };
        (flags & WHDR_DONE != 0).then_some(bytes as usize)
    }

    fn start(&mut self) -> Result<(), StreamError> {
        match self.handle()? {
            // waveOut starts playing on the first write.
            Handle::Out(_) => Ok(()),
            // SAFETY: valid open handle.
            Handle::In(h) => Ok(MmError::check("waveInStart", unsafe { waveInStart(h) })?),
        }
    }

    fn reset(&mut self) -> Result<(), StreamError> {
        // SAFETY: valid open handle; reset marks every queued header done.
        let code = unsafe {
            match self.handle()? {
                Handle::Out(h) => waveOutReset(h),
                Handle::In(h) => waveInReset(h),
            }
        };
        // Forward the completions reset produced before the caller clears
        // the signal.
        self.bridge.flush();
        Ok(MmError::check("wave*Reset", code)?)
    }

    fn close(&mut self) -> Result<(), StreamError> {
        let Some(handle) = self.handle else {
            return Ok(());
        };
        // SAFETY: every header has been unprepared by the session.
        let code = unsafe {
            match handle {
                Handle::Out(h) => waveOutClose(h),
                Handle::In(h) => waveInClose(h),
            }
        };
        MmError::check("wave*Close", code)?;
        self.handle = None;
        self.bridge.stop();
        Ok(())
    }
}

impl Drop for WinmmDevice {
    fn drop(&mut self) {
        if self.handle.is_none() {
            return;
        }
        let _ = self.reset();
        for index in 0..self.headers.len() {
            let _ = self.unprepare(index);
        }
        if let Err(e) = self.close() {
            log::warn!("WinMM device close on drop failed: {}", e);
        }
    }
}
