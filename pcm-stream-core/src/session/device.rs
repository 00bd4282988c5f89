use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::buffer::pool::{BufferPool, SlotState};
use crate::models::config::{StreamConfig, SubmitPolicy};
use crate::models::error::StreamError;
use crate::models::format::{AudioFormat, Direction};
use crate::models::state::SessionState;
use crate::models::stats::StreamStats;
use crate::signal::{CompletionSignal, WaitOutcome};
use crate::traits::backend::{WaveBackend, WaveDevice};
use crate::traits::delegate::StreamDelegate;

/// Outcome of waiting for one slot to come back from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotWait {
    /// The slot is owned by the application; carries the bytes the device processed.
    Ready(usize),
    /// A stop was requested while waiting.
    Stopped,
}

/// An opened endpoint together with the slot pool it references.
///
/// Owns the device handle exclusively. Fields drop in declaration order, so
/// the device is always released before the arena it points into.
pub struct DeviceSession<D: WaveDevice> {
    device: Option<D>,
    pool: BufferPool,
    signal: CompletionSignal,
    id: Uuid,
    direction: Direction,
    format: AudioFormat,
    config: StreamConfig,
    state: SessionState,
    stats: StreamStats,
    delegate: Option<Arc<dyn StreamDelegate>>,
}

impl<D: WaveDevice> DeviceSession<D> {
    /// Open `direction` on `backend` and prepare every slot.
    ///
    /// Capture sessions validate the format with a query-only open first.
    /// On any failure nothing stays open.
    pub fn open<B>(
        backend: &B,
        direction: Direction,
        format: AudioFormat,
        config: StreamConfig,
        signal: CompletionSignal,
        delegate: Option<Arc<dyn StreamDelegate>>,
    ) -> Result<Self, StreamError>
    where
        B: WaveBackend<Device = D>,
    {
        config.validate()?;
        format.validate()?;

        if backend.device_count(direction) == 0 {
            return Err(StreamError::DeviceUnavailable(format!("no {} device present", direction)));
        }
        if direction == Direction::Capture {
            backend.query_format(direction, &format, config.device)?;
        }

        let pool = BufferPool::new(config.buffer_count, config.samples_per_buffer, format.bytes_per_sample())?;

        signal.reset();
        let device = backend.open(direction, &format, config.device, signal.clone())?;

        let mut session = Self {
            device: Some(device),
            pool,
            signal,
            id: Uuid::new_v4(),
            direction,
            format,
            config,
            state: SessionState::Closed,
            stats: StreamStats::default(),
            delegate,
        };

        for index in 0..session.pool.len() {
            if let Err(e) = session.prepare(index) {
                let _ = session.close();
                return Err(e);
            }
        }

        log::info!(
            "[{}] opened {} device {} ({}, {} × {} samples)",
            session.id,
            direction,
            session.config.device,
            format,
            session.pool.len(),
            session.pool.samples_per_slot()
        );
        session.set_state(SessionState::Ready)?;
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut StreamStats {
        &mut self.stats
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut BufferPool {
        &mut self.pool
    }

    pub fn signal(&self) -> &CompletionSignal {
        &self.signal
    }

    pub fn delegate(&self) -> Option<&Arc<dyn StreamDelegate>> {
        self.delegate.as_ref()
    }

    fn device_mut(&mut self) -> Result<&mut D, StreamError> {
        self.device
            .as_mut()
            .ok_or_else(|| StreamError::InvalidState("device is closed".into()))
    }

    pub fn set_state(&mut self, next: SessionState) -> Result<(), StreamError> {
        if self.state == next {
            return Ok(());
        }
        self.state.transition(next)?;
        log::debug!("[{}] {} session -> {:?}", self.id, self.direction, next);
        if let Some(delegate) = &self.delegate {
            delegate.on_state_changed(self.direction, next);
        }
        Ok(())
    }

    pub fn prepare(&mut self, index: usize) -> Result<(), StreamError> {
        let buffer = self.pool.device_buffer(index);
        self.device_mut()?.prepare(buffer)?;
        self.pool.set_state(index, SlotState::Prepared);
        Ok(())
    }

    pub fn unprepare(&mut self, index: usize) -> Result<(), StreamError> {
        if self.pool.slot(index).state == SlotState::Free {
            return Ok(());
        }
        self.device_mut()?.unprepare(index)?;
        self.pool.set_state(index, SlotState::Free);
        Ok(())
    }

    /// Hand slot `index` to the device with its current length.
    ///
    /// Returns `Ok(false)` when the device rejected the buffer and the
    /// policy is to log and drop it.
    pub fn submit(&mut self, index: usize) -> Result<bool, StreamError> {
        let buffer = self.pool.device_buffer(index);
        match self.device_mut()?.submit(buffer) {
            Ok(()) => {
                self.pool.set_state(index, SlotState::Submitted);
                self.stats.buffers_submitted += 1;
                log::trace!("[{}] submitted slot {} ({} bytes)", self.id, index, buffer.length());
                Ok(true)
            }
            Err(e) => self.dropped(index, "submit", e),
        }
    }

    /// Re-prepare slot `index` if it was released, then submit it.
    ///
    /// A failed prepare is handled like a failed submit: the slot stays
    /// free and is retried on the next requeue.
    pub fn requeue(&mut self, index: usize) -> Result<bool, StreamError> {
        if self.pool.slot(index).state == SlotState::Free {
            if let Err(e) = self.prepare(index) {
                return self.dropped(index, "prepare", e);
            }
        }
        self.submit(index)
    }

    fn dropped(&mut self, index: usize, call: &str, e: StreamError) -> Result<bool, StreamError> {
        self.stats.buffers_dropped += 1;
        log::warn!("[{}] {} {} of slot {} failed: {}", self.id, self.direction, call, index, e);
        if let Some(delegate) = &self.delegate {
            delegate.on_buffer_dropped(index, &e);
        }
        match self.config.submit_policy {
            SubmitPolicy::LogAndDrop => Ok(false),
            SubmitPolicy::Strict => Err(e),
        }
    }

    /// Start the device. Transitions ready → streaming.
    pub fn start(&mut self) -> Result<(), StreamError> {
        self.device_mut()?.start()?;
        self.mark_streaming()
    }

    pub(crate) fn mark_streaming(&mut self) -> Result<(), StreamError> {
        if self.stats.started_at.is_none() {
            self.stats.started_at = Some(chrono::Utc::now());
        }
        self.set_state(SessionState::Streaming)
    }

    /// Mark slot `index` done if the device finished it.
    fn harvest(&mut self, index: usize) -> Option<usize> {
        if self.pool.slot(index).state != SlotState::Submitted {
            return None;
        }
        let bytes = self.device.as_ref()?.poll_done(index)?;
        self.pool.set_state(index, SlotState::Done);
        self.pool.set_bytes_valid(index, bytes);
        self.stats.buffers_completed += 1;
        Some(bytes)
    }

    fn out_of_order(&mut self, index: usize) -> StreamError {
        self.stats.out_of_order_events += 1;
        let e = StreamError::BufferNotReady { expected: index };
        log::error!("[{}] {}", self.id, e);
        e
    }

    /// Block on the completion signal once.
    ///
    /// The wait runs in `poll_interval` slices so a stop request is always
    /// observed; `completion_timeout` bounds the total.
    pub fn await_completion(&self) -> Result<WaitOutcome, StreamError> {
        let deadline = self.config.completion_timeout().map(|t| Instant::now() + t);
        let slice = self.config.poll_interval();
        loop {
            match self.signal.wait_timeout(slice) {
                WaitOutcome::TimedOut => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        log::warn!("[{}] no {} completion before timeout", self.id, self.direction);
                        return Err(StreamError::Timeout);
                    }
                }
                outcome => return Ok(outcome),
            }
        }
    }

    /// Wait for the completion signal, then claim slot `index`.
    ///
    /// A slot that is not submitted returns immediately. If the signal fired
    /// but the slot is still not done, the device broke FIFO order and
    /// `BufferNotReady` is returned without waiting again.
    pub fn await_slot(&mut self, index: usize) -> Result<SlotWait, StreamError> {
        if self.pool.slot(index).state != SlotState::Submitted {
            return Ok(SlotWait::Ready(self.pool.slot(index).bytes_valid));
        }
        if self.await_completion()? == WaitOutcome::Stopped {
            return Ok(SlotWait::Stopped);
        }
        match self.harvest(index) {
            Some(bytes) => Ok(SlotWait::Ready(bytes)),
            None => Err(self.out_of_order(index)),
        }
    }

    /// Claim slot `index` without waiting. A slot still in flight is a
    /// `BufferNotReady`.
    pub fn reclaim(&mut self, index: usize) -> Result<usize, StreamError> {
        if self.pool.slot(index).state != SlotState::Submitted {
            return Ok(self.pool.slot(index).bytes_valid);
        }
        match self.harvest(index) {
            Some(bytes) => Ok(bytes),
            None => Err(self.out_of_order(index)),
        }
    }

    /// Wait for every in-flight slot, oldest first.
    pub fn drain(&mut self) -> Result<SlotWait, StreamError> {
        loop {
            let next = self.pool.submitted_from_cursor().next();
            let Some(oldest) = next else {
                break;
            };
            if self.harvest(oldest).is_some() {
                continue;
            }
            if self.await_slot(oldest)? == SlotWait::Stopped {
                return Ok(SlotWait::Stopped);
            }
        }
        Ok(SlotWait::Ready(0))
    }

    /// Discard all queued buffers immediately. Safe to call repeatedly.
    pub fn reset(&mut self) -> Result<(), StreamError> {
        if !self.state.is_open() {
            return Ok(());
        }
        if let Some(device) = self.device.as_mut() {
            if let Err(e) = device.reset() {
                log::warn!("[{}] {} reset failed: {}", self.id, self.direction, e);
            }
        }
        // The device marks every queued buffer done on reset.
        for index in 0..self.pool.len() {
            if self.harvest(index).is_none() && self.pool.slot(index).state == SlotState::Submitted {
                self.pool.set_state(index, SlotState::Done);
                self.pool.set_bytes_valid(index, 0);
            }
        }
        self.signal.reset();
        self.pool.reset_cursor();
        self.set_state(SessionState::Stopped)
    }

    pub fn unprepare_all(&mut self) {
        for index in 0..self.pool.len() {
            if let Err(e) = self.unprepare(index) {
                log::warn!("[{}] unprepare of slot {} failed: {}", self.id, index, e);
                self.pool.set_state(index, SlotState::Free);
            }
        }
    }

    /// Reset, unprepare every slot and release the device. Safe to call repeatedly.
    pub fn close(&mut self) -> Result<(), StreamError> {
        if self.device.is_none() {
            self.state = SessionState::Closed;
            return Ok(());
        }
        self.reset()?;
        self.unprepare_all();

        let result = match self.device.take() {
            Some(mut device) => device.close(),
            None => Ok(()),
        };
        if let Err(e) = &result {
            log::warn!("[{}] {} close failed: {}", self.id, self.direction, e);
        }
        self.set_state(SessionState::Closed)?;
        log::info!("[{}] closed {} device", self.id, self.direction);
        result
    }
}

impl<D: WaveDevice> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        if self.device.is_some() {
            let _ = self.close();
        }
    }
}
