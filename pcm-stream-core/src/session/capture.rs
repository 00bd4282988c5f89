use std::sync::Arc;

use uuid::Uuid;

use crate::buffer::pool::SlotState;
use crate::models::config::StreamConfig;
use crate::models::error::StreamError;
use crate::models::format::{AudioFormat, DeviceId, Direction};
use crate::models::state::SessionState;
use crate::models::stats::StreamStats;
use crate::session::device::{DeviceSession, SlotWait};
use crate::session::thread::StreamThread;
use crate::signal::{CompletionSignal, StopHandle};
use crate::traits::backend::WaveBackend;
use crate::traits::delegate::StreamDelegate;
use crate::traits::sink::SampleSink;

/// Result of one [`Recorder::get_samples`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// This many samples were copied into the caller's buffer.
    Samples(usize),
    /// The recorder was reset or stopped; every later call returns this too.
    EndOfStream,
}

/// Handle of a background capture loop. Joining gives the recorder back
/// together with the number of samples delivered.
pub type CaptureThread<B> = StreamThread<(Recorder<B>, Result<u64, StreamError>)>;

/// Push-model capture over a rotating set of pre-submitted slots.
///
/// `init_recorder` queues every slot before any audio is consumed; each
/// `get_samples` harvests the slot at the cursor, copies it out and puts it
/// straight back on the device queue.
pub struct Recorder<B: WaveBackend> {
    session: Option<DeviceSession<B::Device>>,
    backend: B,
    config: StreamConfig,
    signal: CompletionSignal,
    delegate: Option<Arc<dyn StreamDelegate>>,
    started: bool,
    eof: bool,
}

impl<B: WaveBackend> Recorder<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, StreamConfig::capture())
    }

    pub fn with_config(backend: B, config: StreamConfig) -> Self {
        Self {
            session: None,
            backend,
            config,
            signal: CompletionSignal::new(),
            delegate: None,
            started: false,
            eof: true,
        }
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn StreamDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// True once the recorder was reset; `get_samples` only reports end-of-stream.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.session.as_ref().map(|s| *s.format())
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.state())
            .unwrap_or(SessionState::Closed)
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id())
    }

    pub fn stats(&self) -> StreamStats {
        self.session
            .as_ref()
            .map(|s| s.stats().clone())
            .unwrap_or_default()
    }

    /// Samples one `get_samples` call can return at most.
    pub fn samples_per_block(&self) -> usize {
        self.session
            .as_ref()
            .map(|s| s.pool().samples_per_slot())
            .unwrap_or(self.config.samples_per_buffer)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(self.signal.clone())
    }

    pub fn has_sound_card(&self) -> bool {
        self.backend.device_count(Direction::Capture) > 0
    }

    /// Open input device `device_id` with the given format and queue every
    /// slot. Returns false if the format is rejected or the device cannot
    /// be opened.
    pub fn init_recorder(&mut self, rate: u32, channels: u16, device_id: u32) -> bool {
        self.config.device = DeviceId::Index(device_id);
        match self.open(AudioFormat::new(rate, channels)) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to initialize recorder: {}", e);
                self.notify_error(&e);
                false
            }
        }
    }

    /// Open the configured input device and submit all slots.
    pub fn open(&mut self, format: AudioFormat) -> Result<(), StreamError> {
        self.close_recorder();
        self.signal.clear_stop();

        let mut session = DeviceSession::open(
            &self.backend,
            Direction::Capture,
            format,
            self.config.clone(),
            self.signal.clone(),
            self.delegate.clone(),
        )?;
        for index in 0..session.pool().len() {
            session.submit(index)?;
        }

        self.session = Some(session);
        self.started = false;
        self.eof = false;
        Ok(())
    }

    /// Copy the next recorded block into `out[offset..]`.
    ///
    /// Blocks on the completion signal once, then takes the slot at the
    /// cursor; a slot that is still not done is a `BufferNotReady`. The
    /// first call starts the device.
    pub fn get_samples(&mut self, out: &mut [i16], offset: usize) -> Result<Capture, StreamError> {
        if self.eof {
            return Ok(Capture::EndOfStream);
        }
        let result = self.next_block(out, offset);
        if let Err(e) = &result {
            log::error!("Failed to read captured samples: {}", e);
            self.notify_error(e);
        }
        result
    }

    /// [`get_samples`](Self::get_samples) with the count as an integer:
    /// -1 for end-of-stream or any error.
    pub fn get_samples_raw(&mut self, out: &mut [i16], offset: usize) -> i32 {
        match self.get_samples(out, offset) {
            Ok(Capture::Samples(n)) => i32::try_from(n).unwrap_or(i32::MAX),
            Ok(Capture::EndOfStream) | Err(_) => -1,
        }
    }

    fn next_block(&mut self, out: &mut [i16], offset: usize) -> Result<Capture, StreamError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| StreamError::InvalidState("recorder is not initialized".into()))?;

        let block = session.pool().samples_per_slot();
        if offset > out.len() || out.len() - offset < block {
            return Err(StreamError::InvalidState(format!(
                "output buffer too small: {} samples at offset {} need {}",
                out.len(),
                offset,
                offset.saturating_add(block)
            )));
        }

        if !self.started {
            session.start()?;
            self.started = true;
            log::info!("[{}] capture started ({})", session.id(), session.format());
            if let Some(delegate) = &self.delegate {
                delegate.on_capture_started();
            }
        }

        let index = session.pool().current_index();
        if session.pool().slot(index).state != SlotState::Submitted {
            // An earlier re-prepare or resubmit was dropped. Requeue the slot
            // behind the ones in flight and move on so the cursor keeps
            // matching the device's completion order.
            session.requeue(index)?;
            session.pool_mut().advance();
            return Ok(Capture::Samples(0));
        }

        let bytes = match session.await_slot(index)? {
            SlotWait::Ready(bytes) => bytes,
            SlotWait::Stopped => {
                log::info!("[{}] capture stopped", session.id());
                self.signal.clear_stop();
                self.reset_recorder();
                return Ok(Capture::EndOfStream);
            }
        };

        session.unprepare(index)?;
        let count = (bytes / session.format().bytes_per_sample()).min(block);
        out[offset..offset + count].copy_from_slice(session.pool().samples(index, count)?);

        session.stats_mut().samples_transferred += count as u64;
        session.pool_mut().advance();

        let capacity = session.pool().slot_capacity();
        session.pool_mut().set_length(index, capacity);
        session.requeue(index)?;

        log::trace!("[{}] slot {} delivered {} samples", session.id(), index, count);
        Ok(Capture::Samples(count))
    }

    /// Stop capturing: discard queued buffers, unprepare every slot and
    /// make all later `get_samples` calls return end-of-stream.
    pub fn reset_recorder(&mut self) {
        self.eof = true;
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.reset() {
                log::warn!("[{}] reset failed: {}", session.id(), e);
            }
            session.unprepare_all();
        }
    }

    /// Reset if needed and release the device. Safe to call repeatedly.
    pub fn close_recorder(&mut self) -> bool {
        let Some(mut session) = self.session.take() else {
            return true;
        };
        self.eof = true;
        self.started = false;
        match session.close() {
            Ok(()) => true,
            Err(e) => {
                log::error!("[{}] failed to close recorder: {}", session.id(), e);
                self.notify_error(&e);
                false
            }
        }
    }

    /// Push loop: read blocks into a batch buffer of `batch_samples` and
    /// hand each to `sink` until end-of-stream. Blocks are delivered at
    /// increasing offsets, wrapping to the start when the next block would
    /// not fit. Returns the number of samples delivered.
    pub fn record<S>(&mut self, sink: &mut S, batch_samples: usize) -> Result<u64, StreamError>
    where
        S: SampleSink + ?Sized,
    {
        if self.session.is_none() {
            return Err(StreamError::InvalidState("recorder is not initialized".into()));
        }
        let block = self.samples_per_block();
        let mut batch = vec![0i16; batch_samples.max(block)];
        let mut offset = 0;
        let mut delivered = 0u64;

        loop {
            if batch.len() - offset < block {
                offset = 0;
            }
            match self.get_samples(&mut batch, offset)? {
                Capture::EndOfStream => break,
                Capture::Samples(0) => {}
                Capture::Samples(n) => {
                    sink.deliver_samples(&batch, offset, n)?;
                    offset += n;
                    delivered += n as u64;
                }
            }
        }
        Ok(delivered)
    }

    fn notify_error(&self, error: &StreamError) {
        if let Some(delegate) = &self.delegate {
            delegate.on_error(error);
        }
    }
}

impl<B> Recorder<B>
where
    B: WaveBackend + 'static,
{
    /// Run [`record`](Self::record) on a dedicated thread.
    pub fn spawn<S>(mut self, mut sink: S, batch_samples: usize) -> Result<CaptureThread<B>, StreamError>
    where
        S: SampleSink + Send + 'static,
    {
        if !self.is_open() {
            return Err(StreamError::InvalidState("recorder is not initialized".into()));
        }
        self.signal.clear_stop();
        let stop = self.stop_handle();
        StreamThread::spawn("pcm-capture", stop, move || {
            let result = self.record(&mut sink, batch_samples);
            (self, result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedBackend;
    use std::thread;
    use std::time::Duration;

    fn recorder(backend: &SimulatedBackend, buffers: usize, samples: usize) -> Recorder<SimulatedBackend> {
        let mut recorder = Recorder::with_config(
            backend.clone(),
            StreamConfig::capture().with_buffers(buffers, samples),
        );
        assert!(recorder.init_recorder(8000, 1, 0));
        recorder
    }

    #[test]
    fn init_queues_every_slot_before_start() {
        let backend = SimulatedBackend::new();
        let recorder = recorder(&backend, 6, 16);
        assert_eq!(backend.queued(Direction::Capture), vec![0, 1, 2, 3, 4, 5]);
        assert!(!backend.is_started(Direction::Capture));
        assert_eq!(recorder.state(), SessionState::Ready);
        assert!(!recorder.is_eof());
    }

    #[test]
    fn first_read_starts_device_and_requeues_slot() {
        let backend = SimulatedBackend::new();
        let mut recorder = recorder(&backend, 3, 16);
        backend.complete_capture(&[10, 20, 30]);

        let mut out = [0i16; 20];
        assert_eq!(recorder.get_samples(&mut out, 2).unwrap(), Capture::Samples(3));
        assert_eq!(&out[..6], &[0, 0, 10, 20, 30, 0]);
        assert!(backend.is_started(Direction::Capture));
        assert_eq!(recorder.state(), SessionState::Streaming);
        assert_eq!(backend.queued(Direction::Capture), vec![1, 2, 0]);
        assert_eq!(recorder.stats().samples_transferred, 3);
    }

    #[test]
    fn small_output_buffer_leaves_slot_untouched() {
        let backend = SimulatedBackend::new();
        let mut recorder = recorder(&backend, 2, 16);
        backend.complete_capture(&[1; 16]);

        let mut out = [0i16; 20];
        let result = recorder.get_samples(&mut out, 8);
        assert!(matches!(result, Err(StreamError::InvalidState(_))));
        assert_eq!(recorder.get_samples(&mut out, 4).unwrap(), Capture::Samples(16));
    }

    #[test]
    fn out_of_order_completion_is_not_rewaited() {
        let backend = SimulatedBackend::new();
        let mut recorder = recorder(&backend, 3, 8);
        backend.complete_slot(2, &[1, 2]);

        let mut out = [0i16; 8];
        assert_eq!(
            recorder.get_samples(&mut out, 0),
            Err(StreamError::BufferNotReady { expected: 0 })
        );
        backend.complete_slot(1, &[3, 4]);
        assert_eq!(recorder.get_samples_raw(&mut out, 0), -1);
        assert_eq!(recorder.stats().out_of_order_events, 2);
    }

    #[test]
    fn dropped_resubmit_is_requeued_behind_in_flight_slots() {
        let backend = SimulatedBackend::new();
        let mut recorder = recorder(&backend, 2, 4);
        let mut out = [0i16; 4];

        backend.fail_next_submits(1);
        backend.complete_capture(&[1; 4]);
        assert_eq!(recorder.get_samples(&mut out, 0).unwrap(), Capture::Samples(4));
        assert_eq!(backend.queued(Direction::Capture), vec![1]);
        assert_eq!(recorder.stats().buffers_dropped, 1);

        backend.complete_capture(&[2; 4]);
        assert_eq!(recorder.get_samples(&mut out, 0).unwrap(), Capture::Samples(4));
        assert_eq!(out, [2; 4]);

        // Slot 0 is not in flight: requeued, cursor moves on.
        assert_eq!(recorder.get_samples(&mut out, 0).unwrap(), Capture::Samples(0));
        assert_eq!(backend.queued(Direction::Capture), vec![1, 0]);

        backend.complete_capture(&[3; 4]);
        assert_eq!(recorder.get_samples(&mut out, 0).unwrap(), Capture::Samples(4));
        assert_eq!(out, [3; 4]);
        backend.complete_capture(&[4; 4]);
        assert_eq!(recorder.get_samples(&mut out, 0).unwrap(), Capture::Samples(4));
        assert_eq!(out, [4; 4]);
    }

    #[test]
    fn failed_reprepare_keeps_samples_and_recovers() {
        let backend = SimulatedBackend::new();
        let mut recorder = recorder(&backend, 2, 4);
        let mut out = [0i16; 4];

        backend.fail_next_prepares(1);
        backend.complete_capture(&[7, 8, 9]);
        assert_eq!(recorder.get_samples(&mut out, 0).unwrap(), Capture::Samples(3));
        assert_eq!(&out[..3], &[7, 8, 9]);
        assert_eq!(recorder.stats().buffers_dropped, 1);
        assert_eq!(backend.queued(Direction::Capture), vec![1]);

        backend.complete_capture(&[2; 4]);
        assert_eq!(recorder.get_samples(&mut out, 0).unwrap(), Capture::Samples(4));

        // Slot 0 was released: prepared again and requeued.
        assert_eq!(recorder.get_samples(&mut out, 0).unwrap(), Capture::Samples(0));
        assert_eq!(backend.queued(Direction::Capture), vec![1, 0]);
        assert_eq!(backend.prepared_count(), 2);

        backend.complete_capture(&[3; 4]);
        assert_eq!(recorder.get_samples(&mut out, 0).unwrap(), Capture::Samples(4));
        backend.complete_capture(&[4; 4]);
        assert_eq!(recorder.get_samples(&mut out, 0).unwrap(), Capture::Samples(4));
        assert_eq!(out, [4; 4]);
    }

    #[test]
    fn reset_makes_every_read_end_of_stream() {
        let backend = SimulatedBackend::new();
        let mut recorder = recorder(&backend, 2, 8);
        let mut out = [0i16; 8];

        recorder.reset_recorder();
        recorder.reset_recorder();
        assert!(backend.queued(Direction::Capture).is_empty());
        assert_eq!(backend.prepared_count(), 0);
        assert_eq!(recorder.get_samples(&mut out, 0).unwrap(), Capture::EndOfStream);
        assert_eq!(recorder.get_samples_raw(&mut out, 0), -1);

        assert!(recorder.close_recorder());
        assert!(recorder.close_recorder());
        assert_eq!(backend.close_count(), 1);
    }

    #[test]
    fn stop_ends_blocked_read() {
        let backend = SimulatedBackend::new();
        let mut recorder = recorder(&backend, 2, 8);
        let stop = recorder.stop_handle();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            stop.stop();
        });

        let mut out = [0i16; 8];
        assert_eq!(recorder.get_samples(&mut out, 0).unwrap(), Capture::EndOfStream);
        stopper.join().unwrap();
        assert!(recorder.is_eof());
        assert!(!recorder.stop_handle().is_stopped());
    }

    #[test]
    fn init_fails_for_missing_device_or_format() {
        let backend = SimulatedBackend::new().with_device_count(Direction::Capture, 0);
        let mut recorder = Recorder::new(backend);
        assert!(!recorder.has_sound_card());
        assert!(!recorder.init_recorder(22050, 1, 0));

        let backend = SimulatedBackend::new().reject_format(AudioFormat::new(22050, 2));
        let mut recorder = Recorder::new(backend);
        assert!(recorder.has_sound_card());
        assert!(!recorder.init_recorder(22050, 2, 0));
        assert!(recorder.init_recorder(22050, 1, 0));
    }

    #[test]
    fn reads_require_initialized_recorder() {
        let mut recorder = Recorder::new(SimulatedBackend::new());
        let mut out = [0i16; 16];
        assert_eq!(recorder.get_samples(&mut out, 0).unwrap(), Capture::EndOfStream);
        let mut sink = |_: &[i16], _: usize, _: usize| {};
        assert!(matches!(
            recorder.record(&mut sink, 64),
            Err(StreamError::InvalidState(_))
        ));
    }
}
