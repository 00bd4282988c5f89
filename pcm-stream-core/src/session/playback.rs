use std::sync::Arc;

use uuid::Uuid;

use crate::models::config::{StreamConfig, DEFAULT_PLAYBACK_RATE};
use crate::models::error::StreamError;
use crate::models::format::{AudioFormat, Direction};
use crate::models::state::SessionState;
use crate::models::stats::StreamStats;
use crate::session::device::{DeviceSession, SlotWait};
use crate::session::thread::StreamThread;
use crate::signal::{CompletionSignal, StopHandle, WaitOutcome};
use crate::traits::backend::{WaveBackend, WaveDevice};
use crate::traits::delegate::StreamDelegate;
use crate::traits::source::{Pull, SampleSource};

/// What one `play` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackSummary {
    /// Producer calls, including the one that returned end-of-stream.
    pub requests: usize,
    pub buffers_submitted: u64,
    pub samples_submitted: u64,
    /// The loop ended on a stop request rather than end-of-stream.
    pub stopped: bool,
}

/// Handle of a background playback loop. Joining gives the player back.
pub type PlaybackThread<B> = StreamThread<(Player<B>, Result<PlaybackSummary, StreamError>)>;

/// Pull-model playback: the device asks for data, a producer fills slots.
///
/// ```text
/// producer → [slot idx] → submit → device queue ──(done)──→ completion signal
///     ↑                                                           │
///     └──────────────────── wait after every submit ──────────────┘
/// ```
pub struct Player<B: WaveBackend> {
    session: Option<DeviceSession<B::Device>>,
    backend: B,
    config: StreamConfig,
    signal: CompletionSignal,
    delegate: Option<Arc<dyn StreamDelegate>>,
}

impl<B: WaveBackend> Player<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, StreamConfig::playback())
    }

    pub fn with_config(backend: B, config: StreamConfig) -> Self {
        Self {
            session: None,
            backend,
            config,
            signal: CompletionSignal::new(),
            delegate: None,
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

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(self.signal.clone())
    }

    /// Negotiate a format from `channels`/`rate` and open the default
    /// output device with it. Returns false if the device is busy, missing
    /// or rejects the format.
    pub fn select_device(&mut self, channels: u16, rate: u32) -> bool {
        let format = AudioFormat::negotiate(channels, rate, DEFAULT_PLAYBACK_RATE);
        match self.open(format) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to select playback device: {}", e);
                self.notify_error(&e);
                false
            }
        }
    }

    /// Open the output device with `format`. Reopens if a different
    /// format is already open.
    pub fn open(&mut self, format: AudioFormat) -> Result<(), StreamError> {
        if self.format() == Some(format) {
            return Ok(());
        }
        self.close()?;

        let session = DeviceSession::open(
            &self.backend,
            Direction::Playback,
            format,
            self.config.clone(),
            self.signal.clone(),
            self.delegate.clone(),
        )?;
        self.session = Some(session);
        Ok(())
    }

    /// Stream from `source` until it reports end-of-stream, then wait for
    /// the queued buffers to finish.
    pub fn play<S>(&mut self, source: &mut S) -> Result<PlaybackSummary, StreamError>
    where
        S: SampleSource + ?Sized,
    {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| StreamError::InvalidState("no playback device selected".into()))?;

        let result = run(session, source);
        if let Err(e) = &result {
            log::error!("[{}] playback failed: {}", session.id(), e);
            self.notify_error(e);
        }
        result
    }

    /// Drop every queued buffer immediately.
    pub fn reset(&mut self) -> Result<(), StreamError> {
        match self.session.as_mut() {
            Some(session) => session.reset(),
            None => Ok(()),
        }
    }

    /// Reset and release the device. Safe to call repeatedly.
    pub fn close(&mut self) -> Result<(), StreamError> {
        match self.session.take() {
            Some(mut session) => session.close(),
            None => Ok(()),
        }
    }

    fn notify_error(&self, error: &StreamError) {
        if let Some(delegate) = &self.delegate {
            delegate.on_error(error);
        }
    }
}

impl<B> Player<B>
where
    B: WaveBackend + 'static,
{
    /// Run [`play`](Self::play) on a dedicated thread.
    pub fn spawn<S>(mut self, mut source: S) -> Result<PlaybackThread<B>, StreamError>
    where
        S: SampleSource + Send + 'static,
    {
        if !self.is_open() {
            return Err(StreamError::InvalidState("no playback device selected".into()));
        }
        self.signal.clear_stop();
        let stop = self.stop_handle();
        StreamThread::spawn("pcm-playback", stop, move || {
            let result = self.play(&mut source);
            (self, result)
        })
    }
}

fn run<D, S>(session: &mut DeviceSession<D>, source: &mut S) -> Result<PlaybackSummary, StreamError>
where
    D: WaveDevice,
    S: SampleSource + ?Sized,
{
    let bytes_per_sample = session.format().bytes_per_sample();
    let mut summary = PlaybackSummary::default();

    loop {
        let index = session.pool().current_index();
        session.reclaim(index)?;

        let dest = session.pool_mut().samples_mut(index)?;
        let capacity = dest.len();
        summary.requests += 1;
        let count = match source.request_samples(dest) {
            Pull::EndOfStream => break,
            Pull::Samples(n) => n.min(capacity),
        };

        session.pool_mut().set_length(index, count * bytes_per_sample);
        if !session.state().is_streaming() {
            session.mark_streaming()?;
        }
        let queued = session.submit(index)?;
        if queued {
            summary.buffers_submitted += 1;
            summary.samples_submitted += count as u64;
            session.stats_mut().samples_transferred += count as u64;
        }
        session.pool_mut().advance();

        // A dropped buffer never completes, so there is nothing to wait for.
        let stop = if queued {
            session.await_completion()? == WaitOutcome::Stopped
        } else {
            session.signal().is_stop_requested()
        };
        if stop {
            return stopped(session, summary);
        }
    }

    log::debug!(
        "[{}] end of stream after {} requests, draining {} buffers",
        session.id(),
        summary.requests,
        session.pool().in_flight()
    );
    if session.drain()? == SlotWait::Stopped {
        return stopped(session, summary);
    }
    Ok(summary)
}

fn stopped<D>(session: &mut DeviceSession<D>, mut summary: PlaybackSummary) -> Result<PlaybackSummary, StreamError>
where
    D: WaveDevice,
{
    log::info!("[{}] playback stopped", session.id());
    session.signal().clear_stop();
    session.reset()?;
    summary.stopped = true;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::SubmitPolicy;
    use crate::sim::{AutoComplete, SimulatedBackend};
    use crate::traits::source::VecSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn auto_player(buffers: usize, samples: usize) -> (SimulatedBackend, Player<SimulatedBackend>) {
        let backend = SimulatedBackend::new().auto_complete(AutoComplete::default());
        let player = Player::with_config(
            backend.clone(),
            StreamConfig::playback().with_buffers(buffers, samples),
        );
        (backend, player)
    }

    #[test]
    fn plays_every_sample_in_order() {
        let (backend, mut player) = auto_player(2, 10);
        assert!(player.select_device(1, 8000));

        let samples: Vec<i16> = (0..25).collect();
        let summary = player.play(&mut VecSource::new(samples.clone())).unwrap();

        assert_eq!(summary.requests, 4);
        assert_eq!(summary.buffers_submitted, 3);
        assert_eq!(summary.samples_submitted, 25);
        assert!(!summary.stopped);
        assert_eq!(backend.played(), samples);
        assert_eq!(backend.submissions(Direction::Playback), vec![0, 1, 0]);
        assert_eq!(player.state(), SessionState::Streaming);
    }

    #[test]
    fn immediate_end_of_stream_submits_nothing() {
        let (backend, mut player) = auto_player(4, 16);
        assert!(player.select_device(2, 44100));
        let summary = player.play(&mut |_: &mut [i16]| Pull::EndOfStream).unwrap();
        assert_eq!(summary.requests, 1);
        assert_eq!(summary.buffers_submitted, 0);
        assert!(backend.submissions(Direction::Playback).is_empty());
        assert_eq!(player.state(), SessionState::Ready);
    }

    #[test]
    fn select_device_negotiates_format() {
        let (_, mut player) = auto_player(2, 8);
        assert!(player.select_device(6, 100_000));
        assert_eq!(player.format(), Some(AudioFormat::new(44100, 2)));
        assert!(player.select_device(0, 0));
        assert_eq!(player.format(), Some(AudioFormat::new(DEFAULT_PLAYBACK_RATE, 1)));
    }

    #[test]
    fn select_device_fails_when_busy() {
        let mut player = Player::new(SimulatedBackend::new().busy());
        assert!(!player.select_device(1, 11025));
        assert!(!player.is_open());
        assert_eq!(player.state(), SessionState::Closed);
    }

    #[test]
    fn play_requires_open_device() {
        let mut player = Player::new(SimulatedBackend::new());
        let result = player.play(&mut VecSource::new(vec![1, 2, 3]));
        assert!(matches!(result, Err(StreamError::InvalidState(_))));
    }

    #[test]
    fn dropped_submission_keeps_streaming() {
        let (backend, mut player) = auto_player(2, 4);
        assert!(player.select_device(1, 8000));
        backend.fail_next_submits(1);

        let summary = player.play(&mut VecSource::new((0..12).collect())).unwrap();
        assert_eq!(summary.buffers_submitted, 2);
        assert_eq!(player.stats().buffers_dropped, 1);
        assert_eq!(backend.played(), (4..12).collect::<Vec<i16>>());
    }

    #[test]
    fn strict_policy_propagates_submit_failure() {
        let backend = SimulatedBackend::new().auto_complete(AutoComplete::default());
        let mut config = StreamConfig::playback().with_buffers(2, 4);
        config.submit_policy = SubmitPolicy::Strict;
        let mut player = Player::with_config(backend.clone(), config);
        assert!(player.select_device(1, 8000));
        backend.fail_next_submits(1);

        let result = player.play(&mut VecSource::new((0..12).collect()));
        assert!(matches!(result, Err(StreamError::Transport(_))));
    }

    #[test]
    fn empty_blocks_still_wait_for_the_device() {
        let backend = SimulatedBackend::new();
        let mut player = Player::with_config(backend.clone(), StreamConfig::playback().with_buffers(4, 16));
        assert!(player.select_device(1, 8000));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let playback = player
            .spawn(move |_: &mut [i16]| {
                counter.fetch_add(1, Ordering::SeqCst);
                Pull::Samples(0)
            })
            .unwrap();

        assert!(backend.wait_for_submissions(Direction::Playback, 1, Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(backend.complete_playback(), Some(Vec::new()));
        assert!(backend.wait_for_submissions(Direction::Playback, 2, Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        playback.stop();
        let (_, summary) = playback.join().unwrap();
        let summary = summary.unwrap();
        assert!(summary.stopped);
        assert_eq!(summary.buffers_submitted, 2);
        assert_eq!(summary.samples_submitted, 0);
    }

    #[test]
    fn reset_and_close_are_idempotent() {
        let (backend, mut player) = auto_player(2, 4);
        player.reset().unwrap();
        player.close().unwrap();
        assert!(player.select_device(1, 8000));
        player.reset().unwrap();
        player.reset().unwrap();
        player.close().unwrap();
        player.close().unwrap();
        assert_eq!(backend.open_count(), 1);
        assert_eq!(backend.close_count(), 1);
    }
}
