//! In-memory wave backend.
//!
//! Behaves like a FIFO hardware queue: submitted buffers complete in
//! submission order, each completion marks the slot done and sets the
//! session's completion signal. Completions are either scripted from the
//! test thread (`complete_capture`, `complete_playback`, `complete_slot`)
//! or produced by a driver thread when auto-completion is enabled.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::buffer::pool::DeviceBuffer;
use crate::models::error::StreamError;
use crate::models::format::{AudioFormat, DeviceId, Direction};
use crate::signal::CompletionSignal;
use crate::traits::backend::{WaveBackend, WaveDevice};

/// Driver-thread behaviour for hands-off streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoComplete {
    /// Time the simulated hardware spends on each buffer.
    pub block_delay: Duration,
    /// Samples recorded per capture buffer (None = full capacity).
    pub capture_samples: Option<usize>,
}

impl Default for AutoComplete {
    fn default() -> Self {
        Self {
            block_delay: Duration::from_millis(1),
            capture_samples: None,
        }
    }
}

#[derive(Debug)]
struct BackendState {
    playback_devices: usize,
    capture_devices: usize,
    rejected_formats: Vec<AudioFormat>,
    busy: bool,
    failing_submits: usize,
    failing_prepares: usize,
    auto: Option<AutoComplete>,
    open_count: usize,
    close_count: usize,
    playback: Option<Arc<DeviceCore>>,
    capture: Option<Arc<DeviceCore>>,
}

impl Default for BackendState {
    fn default() -> Self {
        Self {
            playback_devices: 1,
            capture_devices: 1,
            rejected_formats: Vec::new(),
            busy: false,
            failing_submits: 0,
            failing_prepares: 0,
            auto: None,
            open_count: 0,
            close_count: 0,
            playback: None,
            capture: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct SimSlot {
    prepared: bool,
    buffer: Option<DeviceBuffer>,
    done: Option<usize>,
}

#[derive(Debug, Default)]
struct DeviceState {
    slots: Vec<SimSlot>,
    queue: VecDeque<usize>,
    open: bool,
    started: bool,
    submissions: Vec<usize>,
    played: Vec<i16>,
    blocks_recorded: u64,
}

impl DeviceState {
    fn slot_mut(&mut self, index: usize) -> &mut SimSlot {
        if index >= self.slots.len() {
            self.slots.resize(index + 1, SimSlot::default());
        }
        &mut self.slots[index]
    }
}

#[derive(Debug)]
struct DeviceCore {
    direction: Direction,
    state: Mutex<DeviceState>,
    changed: Condvar,
    signal: CompletionSignal,
}

impl DeviceCore {
    /// Finish queued slot `index`, which must be in the queue.
    fn complete(&self, state: &mut DeviceState, index: usize, recorded: &[i16]) -> Option<usize> {
        let position = state.queue.iter().position(|&i| i == index)?;
        state.queue.remove(position);

        let buffer = state.slots.get(index)?.buffer?;
        let bytes = match self.direction {
            Direction::Playback => {
                // SAFETY: the slot is queued, so the device owns it until `done` is set.
                let payload = unsafe { buffer.payload() };
                state.played.extend(
                    payload
                        .chunks_exact(2)
                        .map(|b| i16::from_ne_bytes([b[0], b[1]])),
                );
                payload.len()
            }
            Direction::Capture => {
                // SAFETY: as above.
                let storage = unsafe { buffer.storage_mut() };
                let count = recorded.len().min(storage.len() / 2);
                for (dst, sample) in storage.chunks_exact_mut(2).zip(&recorded[..count]) {
                    dst.copy_from_slice(&sample.to_ne_bytes());
                }
                state.blocks_recorded += 1;
                count * 2
            }
        };

        state.slot_mut(index).done = Some(bytes);
        self.signal.set();
        self.changed.notify_all();
        Some(bytes)
    }
}

/// Scriptable in-memory backend. Clones share the same simulated hardware,
/// so a test keeps one clone as a controller.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBackend {
    shared: Arc<Mutex<BackendState>>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device_count(self, direction: Direction, count: usize) -> Self {
        {
            let mut s = self.shared.lock();
            match direction {
                Direction::Playback => s.playback_devices = count,
                Direction::Capture => s.capture_devices = count,
            }
        }
        self
    }

    /// The endpoint refuses `format` on query and open.
    pub fn reject_format(self, format: AudioFormat) -> Self {
        self.shared.lock().rejected_formats.push(format);
        self
    }

    /// Another process holds the device exclusively.
    pub fn busy(self) -> Self {
        self.shared.lock().busy = true;
        self
    }

    pub fn auto_complete(self, auto: AutoComplete) -> Self {
        self.shared.lock().auto = Some(auto);
        self
    }

    /// Make the next `count` submissions fail with a transport error.
    pub fn fail_next_submits(&self, count: usize) {
        self.shared.lock().failing_submits = count;
    }

    /// Make the next `count` prepares fail with a transport error.
    pub fn fail_next_prepares(&self, count: usize) {
        self.shared.lock().failing_prepares = count;
    }

    pub fn open_count(&self) -> usize {
        self.shared.lock().open_count
    }

    pub fn close_count(&self) -> usize {
        self.shared.lock().close_count
    }

    fn core(&self, direction: Direction) -> Option<Arc<DeviceCore>> {
        let s = self.shared.lock();
        match direction {
            Direction::Playback => s.playback.clone(),
            Direction::Capture => s.capture.clone(),
        }
    }

    fn any_core(&self) -> Option<Arc<DeviceCore>> {
        self.core(Direction::Capture).or_else(|| self.core(Direction::Playback))
    }

    /// Prepared slots on the most recently opened device.
    pub fn prepared_count(&self) -> usize {
        self.any_core()
            .map(|core| core.state.lock().slots.iter().filter(|s| s.prepared).count())
            .unwrap_or(0)
    }

    /// Slot indices in submission order on the device for `direction`.
    pub fn submissions(&self, direction: Direction) -> Vec<usize> {
        self.core(direction)
            .map(|core| core.state.lock().submissions.clone())
            .unwrap_or_default()
    }

    /// Slots currently queued on the device, oldest first.
    pub fn queued(&self, direction: Direction) -> Vec<usize> {
        self.core(direction)
            .map(|core| core.state.lock().queue.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_started(&self, direction: Direction) -> bool {
        self.core(direction)
            .map(|core| core.state.lock().started)
            .unwrap_or(false)
    }

    /// Every sample the playback device has consumed so far.
    pub fn played(&self) -> Vec<i16> {
        self.core(Direction::Playback)
            .map(|core| core.state.lock().played.clone())
            .unwrap_or_default()
    }

    /// Complete the oldest queued capture buffer with `recorded` samples.
    /// Returns the slot index.
    pub fn complete_capture(&self, recorded: &[i16]) -> Option<usize> {
        let core = self.core(Direction::Capture)?;
        let mut state = core.state.lock();
        let index = *state.queue.front()?;
        core.complete(&mut state, index, recorded).map(|_| index)
    }

    /// Complete the oldest queued playback buffer. Returns the samples it held.
    pub fn complete_playback(&self) -> Option<Vec<i16>> {
        let core = self.core(Direction::Playback)?;
        let mut state = core.state.lock();
        let index = *state.queue.front()?;
        let before = state.played.len();
        core.complete(&mut state, index, &[])?;
        Some(state.played[before..].to_vec())
    }

    /// Complete a specific queued slot, ignoring FIFO order.
    pub fn complete_slot(&self, index: usize, recorded: &[i16]) -> Option<usize> {
        let core = self.any_core()?;
        let mut state = core.state.lock();
        core.complete(&mut state, index, recorded)
    }

    /// Block until the device for `direction` has seen `count` submissions.
    pub fn wait_for_submissions(&self, direction: Direction, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(core) = self.core(direction) {
                let mut state = core.state.lock();
                while state.submissions.len() < count {
                    if core.changed.wait_until(&mut state, deadline).timed_out() {
                        return state.submissions.len() >= count;
                    }
                }
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl WaveBackend for SimulatedBackend {
    type Device = SimulatedDevice;

    fn device_count(&self, direction: Direction) -> usize {
        let s = self.shared.lock();
        match direction {
            Direction::Playback => s.playback_devices,
            Direction::Capture => s.capture_devices,
        }
    }

    fn query_format(&self, direction: Direction, format: &AudioFormat, device: DeviceId) -> Result<(), StreamError> {
        let s = self.shared.lock();
        let count = match direction {
            Direction::Playback => s.playback_devices,
            Direction::Capture => s.capture_devices,
        };
        if let DeviceId::Index(i) = device {
            if i as usize >= count {
                return Err(StreamError::DeviceUnavailable(format!("no {} device {}", direction, device)));
            }
        }
        if s.rejected_formats.contains(format) {
            return Err(StreamError::FormatUnsupported(format!("{} rejected by {} device", format, direction)));
        }
        Ok(())
    }

    fn open(
        &self,
        direction: Direction,
        format: &AudioFormat,
        device: DeviceId,
        signal: CompletionSignal,
    ) -> Result<SimulatedDevice, StreamError> {
        if self.shared.lock().busy {
            return Err(StreamError::DeviceUnavailable(
                "another application is using the audio device".into(),
            ));
        }
        self.query_format(direction, format, device)?;

        let core = Arc::new(DeviceCore {
            direction,
            state: Mutex::new(DeviceState {
                open: true,
                ..DeviceState::default()
            }),
            changed: Condvar::new(),
            signal,
        });

        let auto = {
            let mut s = self.shared.lock();
            s.open_count += 1;
            match direction {
                Direction::Playback => s.playback = Some(Arc::clone(&core)),
                Direction::Capture => s.capture = Some(Arc::clone(&core)),
            }
            s.auto
        };

        let driver = match auto {
            Some(auto) => {
                let core = Arc::clone(&core);
                let handle = thread::Builder::new()
                    .name(format!("sim-{}-driver", direction))
                    .spawn(move || driver_loop(core, auto))
                    .map_err(|e| StreamError::AllocationFailure(format!("failed to spawn driver thread: {}", e)))?;
                Some(handle)
            }
            None => None,
        };

        Ok(SimulatedDevice {
            core,
            backend: Arc::clone(&self.shared),
            driver,
        })
    }
}

/// Completes queued buffers in FIFO order, one every `block_delay`.
fn driver_loop(core: Arc<DeviceCore>, auto: AutoComplete) {
    let mut state = core.state.lock();
    loop {
        while state.open && !(can_run(&core, &state) && !state.queue.is_empty()) {
            core.changed.wait(&mut state);
        }
        if !state.open {
            break;
        }

        drop(state);
        thread::sleep(auto.block_delay);
        state = core.state.lock();

        if !can_run(&core, &state) {
            continue;
        }
        let Some(&index) = state.queue.front() else {
            continue;
        };
        let recorded = match core.direction {
            Direction::Playback => Vec::new(),
            Direction::Capture => {
                let capacity = state
                    .slots
                    .get(index)
                    .and_then(|s| s.buffer)
                    .map(|b| b.capacity() / 2)
                    .unwrap_or(0);
                let count = auto.capture_samples.unwrap_or(capacity).min(capacity);
                let base = state.blocks_recorded as usize * capacity;
                (0..count).map(|i| (base + i) as i16).collect()
            }
        };
        core.complete(&mut state, index, &recorded);
    }
}

fn can_run(core: &DeviceCore, state: &DeviceState) -> bool {
    core.direction == Direction::Playback || state.started
}

/// An opened simulated endpoint.
#[derive(Debug)]
pub struct SimulatedDevice {
    core: Arc<DeviceCore>,
    backend: Arc<Mutex<BackendState>>,
    driver: Option<thread::JoinHandle<()>>,
}

impl WaveDevice for SimulatedDevice {
    fn prepare(&mut self, buffer: DeviceBuffer) -> Result<(), StreamError> {
        {
            let mut backend = self.backend.lock();
            if backend.failing_prepares > 0 {
                backend.failing_prepares -= 1;
                return Err(StreamError::Transport(format!(
                    "injected prepare failure on slot {}",
                    buffer.index()
                )));
            }
        }
        let mut state = self.core.state.lock();
        let slot = state.slot_mut(buffer.index());
        slot.prepared = true;
        slot.buffer = Some(buffer);
        slot.done = None;
        Ok(())
    }

    fn unprepare(&mut self, index: usize) -> Result<(), StreamError> {
        let mut state = self.core.state.lock();
        if state.queue.contains(&index) {
            return Err(StreamError::Transport(format!("slot {} is still queued", index)));
        }
        state.slot_mut(index).prepared = false;
        Ok(())
    }

    fn submit(&mut self, buffer: DeviceBuffer) -> Result<(), StreamError> {
        {
            let mut backend = self.backend.lock();
            if backend.failing_submits > 0 {
                backend.failing_submits -= 1;
                return Err(StreamError::Transport(format!(
                    "injected failure on slot {}",
                    buffer.index()
                )));
            }
        }

        let mut state = self.core.state.lock();
        let index = buffer.index();
        if !state.slots.get(index).is_some_and(|s| s.prepared) {
            return Err(StreamError::Transport(format!("slot {} is not prepared", index)));
        }
        let slot = state.slot_mut(index);
        slot.buffer = Some(buffer);
        slot.done = None;
        state.queue.push_back(index);
        state.submissions.push(index);
        self.core.changed.notify_all();
        Ok(())
    }

    fn poll_done(&self, index: usize) -> Option<usize> {
        self.core.state.lock().slots.get(index).and_then(|s| s.done)
    }

    fn start(&mut self) -> Result<(), StreamError> {
        self.core.state.lock().started = true;
        self.core.changed.notify_all();
        Ok(())
    }

    fn reset(&mut self) -> Result<(), StreamError> {
        let mut state = self.core.state.lock();
        while let Some(index) = state.queue.pop_front() {
            state.slot_mut(index).done = Some(0);
        }
        state.started = false;
        self.core.signal.set();
        self.core.changed.notify_all();
        Ok(())
    }

    fn close(&mut self) -> Result<(), StreamError> {
        {
            let mut state = self.core.state.lock();
            if !state.queue.is_empty() {
                return Err(StreamError::Transport("buffers still queued".into()));
            }
            state.open = false;
            self.core.changed.notify_all();
        }
        if let Some(driver) = self.driver.take() {
            let _ = driver.join();
        }
        self.backend.lock().close_count += 1;
        Ok(())
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.core.state.lock().open = false;
        self.core.changed.notify_all();
        if let Some(driver) = self.driver.take() {
            let _ = driver.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::pool::BufferPool;

    #[test]
    fn completes_in_fifo_order() {
        let backend = SimulatedBackend::new();
        let signal = CompletionSignal::new();
        let mut device = backend
            .open(Direction::Capture, &AudioFormat::new(8000, 1), DeviceId::Default, signal.clone())
            .unwrap();
        let pool = BufferPool::new(3, 4, 2).unwrap();
        for i in 0..3 {
            device.prepare(pool.device_buffer(i)).unwrap();
            device.submit(pool.device_buffer(i)).unwrap();
        }

        assert_eq!(backend.complete_capture(&[5, 6]), Some(0));
        assert_eq!(device.poll_done(0), Some(4));
        assert_eq!(device.poll_done(1), None);
        assert!(signal.is_set());
        assert_eq!(backend.queued(Direction::Capture), vec![1, 2]);
    }

    #[test]
    fn busy_device_is_unavailable() {
        let backend = SimulatedBackend::new().busy();
        let result = backend.open(
            Direction::Playback,
            &AudioFormat::new(11025, 1),
            DeviceId::Default,
            CompletionSignal::new(),
        );
        assert!(matches!(result, Err(StreamError::DeviceUnavailable(_))));
    }

    #[test]
    fn unknown_device_index_is_unavailable() {
        let backend = SimulatedBackend::new();
        let result = backend.query_format(Direction::Capture, &AudioFormat::new(8000, 1), DeviceId::Index(3));
        assert!(matches!(result, Err(StreamError::DeviceUnavailable(_))));
    }

    #[test]
    fn reset_marks_queue_done() {
        let backend = SimulatedBackend::new();
        let mut device = backend
            .open(Direction::Playback, &AudioFormat::new(8000, 1), DeviceId::Default, CompletionSignal::new())
            .unwrap();
        let pool = BufferPool::new(2, 4, 2).unwrap();
        device.prepare(pool.device_buffer(0)).unwrap();
        device.submit(pool.device_buffer(0)).unwrap();
        assert!(device.unprepare(0).is_err());
        assert!(device.close().is_err());

        device.reset().unwrap();
        assert_eq!(device.poll_done(0), Some(0));
        device.unprepare(0).unwrap();
        device.close().unwrap();
        assert_eq!(backend.close_count(), 1);
    }
}
