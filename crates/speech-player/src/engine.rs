//! Streaming playback engine.
//!
//! Accepts an open-ended sequence of encoded audio chunks for one utterance
//! and plays them back-to-back with no silence or overlap. Each buffer is
//! scheduled at the previous buffer's start time plus its exact duration
//! (sample count over sample rate), never at wall-clock "now". That cursor
//! arithmetic is what makes the playback gapless.
//!
//! The engine is a cheap clone-able handle over shared state. A background
//! pump thread consumes sink events and drives the scheduler; callers hear
//! back through [`PlayerEngine::subscribe`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};
use thiserror::Error;

use crate::chunk::{self, ChunkError};
use crate::config::EngineConfig;
use crate::sink::{OutputSink, SinkError, SinkEvent};
use crate::stats::EngineStats;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The chunk payload could not be decoded; terminal for the utterance.
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    /// The sink refused a buffer.
    #[error("output device error: {0}")]
    Device(String),
    /// The engine has been closed and must be reconstructed.
    #[error("engine is closed")]
    Closed,
}

impl From<SinkError> for EngineError {
    fn from(err: SinkError) -> Self {
        EngineError::Device(err.to_string())
    }
}

/// Notifications delivered to engine subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// The pending-buffer queue drained naturally. Fired exactly once per
    /// playback session.
    Completed,
    /// Asynchronous output device failure. The playing flag has already been
    /// reset, so a subsequent `play()` is possible.
    Error(String),
}

/// Per-session scheduler state. Created implicitly on the first chunk after
/// idle, reset by `stop()`.
struct Session {
    pending: VecDeque<Vec<f32>>,
    next_start: f64,
    playing: bool,
    volume: f32,
    chunks_received: u64,
    bytes_received: u64,
    buffers_played: u64,
}

impl Session {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            next_start: 0.0,
            playing: false,
            volume: 1.0,
            chunks_received: 0,
            bytes_received: 0,
            buffers_played: 0,
        }
    }
}

struct EngineShared {
    sample_rate: u32,
    sink: Arc<dyn OutputSink>,
    session: Mutex<Session>,
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
    closed: AtomicBool,
}

impl EngineShared {
    /// Begin a session: place the cursor on the device clock and schedule the
    /// oldest queued buffer.
    fn start(&self, s: &mut Session) -> Result<(), SinkError> {
        s.next_start = self.sink.clock();
        s.playing = true;
        tracing::debug!(at = s.next_start, queued = s.pending.len(), "playback starting");
        if let Err(e) = self.schedule_next(s) {
            s.playing = false;
            return Err(e);
        }
        Ok(())
    }

    /// Pop the oldest buffer and hand it to the sink at the cursor, then
    /// advance the cursor by the buffer's exact duration.
    fn schedule_next(&self, s: &mut Session) -> Result<(), SinkError> {
        let Some(samples) = s.pending.pop_front() else {
            return Ok(());
        };
        s.buffers_played += 1;
        let duration = samples.len() as f64 / self.sample_rate as f64;
        self.sink.schedule(samples, s.next_start)?;
        s.next_start += duration;
        Ok(())
    }

    fn on_buffer_ended(&self) {
        let mut s = self.session.lock().unwrap();
        if !s.playing {
            return;
        }
        if s.pending.is_empty() {
            // Natural drain ends the session; the cursor is only reset by stop().
            s.playing = false;
            tracing::debug!(
                chunks = s.chunks_received,
                bytes = s.bytes_received,
                buffers = s.buffers_played,
                "playback drained"
            );
            drop(s);
            self.publish(EngineEvent::Completed);
            return;
        }
        if let Err(e) = self.schedule_next(&mut s) {
            s.playing = false;
            drop(s);
            self.publish(EngineEvent::Error(e.to_string()));
        }
    }

    fn on_sink_error(&self, message: String) {
        {
            let mut s = self.session.lock().unwrap();
            s.playing = false;
        }
        tracing::warn!(error = %message, "output device error");
        self.publish(EngineEvent::Error(message));
    }

    fn publish(&self, event: EngineEvent) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Handle to the streaming playback engine.
///
/// Exactly one engine may exist per logical output device; it holds a live
/// hardware resource and must be released with [`PlayerEngine::close`].
#[derive(Clone)]
pub struct PlayerEngine {
    shared: Arc<EngineShared>,
}

impl PlayerEngine {
    /// Build an engine over `sink`, consuming its event stream.
    pub fn new(
        sink: Arc<dyn OutputSink>,
        sink_events: Receiver<SinkEvent>,
        config: &EngineConfig,
    ) -> Self {
        let shared = Arc::new(EngineShared {
            sample_rate: config.sample_rate,
            sink,
            session: Mutex::new(Session::new()),
            subscribers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let pump: Weak<EngineShared> = Arc::downgrade(&shared);
        thread::spawn(move || {
            while let Ok(event) = sink_events.recv() {
                let Some(shared) = pump.upgrade() else {
                    break;
                };
                match event {
                    SinkEvent::BufferEnded => shared.on_buffer_ended(),
                    SinkEvent::Error(message) => shared.on_sink_error(message),
                }
            }
        });

        Self { shared }
    }

    /// Decode and enqueue one encoded chunk.
    ///
    /// Self-starting: when the engine is idle the new buffer begins playing
    /// immediately, so producers never need to call [`PlayerEngine::play`]
    /// after the first chunk.
    pub fn append_chunk(&self, encoded: &str) -> Result<(), EngineError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        let samples = chunk::decode_chunk(encoded)?;

        let mut s = self.shared.session.lock().unwrap();
        s.chunks_received += 1;
        s.bytes_received += (samples.len() * chunk::BYTES_PER_SAMPLE) as u64;
        tracing::debug!(
            chunk = s.chunks_received,
            samples = samples.len(),
            queued = s.pending.len() + 1,
            "chunk accepted"
        );
        s.pending.push_back(samples);
        if !s.playing {
            self.shared.start(&mut s)?;
        }
        Ok(())
    }

    /// Start playback when idle and buffers are queued; otherwise a no-op.
    pub fn play(&self) -> Result<(), EngineError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        let mut s = self.shared.session.lock().unwrap();
        if s.playing || s.pending.is_empty() {
            return Ok(());
        }
        self.shared.start(&mut s)?;
        Ok(())
    }

    /// Suspend the output device without discarding queued buffers.
    ///
    /// No-op when no session is active.
    pub fn pause(&self) {
        let s = self.shared.session.lock().unwrap();
        if !s.playing {
            return;
        }
        drop(s);
        self.shared.sink.pause();
    }

    /// Resume a paused session where the device left off.
    pub fn resume(&self) {
        let s = self.shared.session.lock().unwrap();
        if !s.playing {
            return;
        }
        drop(s);
        self.shared.sink.resume();
    }

    /// Hard stop: cancel the sounding buffer, drop the entire pending queue,
    /// clear the playing flag and reset the cursor.
    ///
    /// Synchronous from the caller's point of view; this is the interruption
    /// primitive, and the only safe call on a preemption path. Interruption
    /// callers must still wait the settle delay before appending a new stream
    /// so that trailing events from the old stream cannot interleave.
    pub fn stop(&self) {
        self.shared.sink.cancel_all();
        let mut s = self.shared.session.lock().unwrap();
        let dropped = s.pending.len();
        s.pending.clear();
        s.playing = false;
        s.next_start = 0.0;
        if dropped > 0 {
            tracing::debug!(dropped, "pending buffers discarded");
        }
    }

    /// Set the shared output gain, clamped to `[0.0, 1.0]`.
    ///
    /// Applies to the currently-sounding and all future buffers identically.
    pub fn set_volume(&self, level: f32) {
        let clamped = level.clamp(0.0, 1.0);
        {
            let mut s = self.shared.session.lock().unwrap();
            s.volume = clamped;
        }
        self.shared.sink.set_gain(clamped);
    }

    /// Stop playback and release the output device.
    ///
    /// Idempotent; the engine is unusable afterwards and callers must
    /// construct a new one.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop();
        self.shared.sink.close();
    }

    /// Subscribe to completion and error notifications.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = unbounded();
        self.shared.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Diagnostic snapshot of session counters and state.
    pub fn stats(&self) -> EngineStats {
        let s = self.shared.session.lock().unwrap();
        EngineStats {
            chunks_received: s.chunks_received,
            bytes_received: s.bytes_received,
            buffers_played: s.buffers_played,
            pending_buffers: s.pending.len(),
            playing: s.playing,
            volume: s.volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const RATE: u32 = 44_100;

    struct MockSink {
        clock: Mutex<f64>,
        schedules: Mutex<Vec<(usize, f64)>>,
        gains: Mutex<Vec<f32>>,
        cancels: AtomicUsize,
        pauses: AtomicUsize,
        resumes: AtomicUsize,
        closes: AtomicUsize,
        reject: AtomicBool,
    }

    impl MockSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                clock: Mutex::new(0.0),
                schedules: Mutex::new(Vec::new()),
                gains: Mutex::new(Vec::new()),
                cancels: AtomicUsize::new(0),
                pauses: AtomicUsize::new(0),
                resumes: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                reject: AtomicBool::new(false),
            })
        }

        fn set_clock(&self, at: f64) {
            *self.clock.lock().unwrap() = at;
        }

        fn schedules(&self) -> Vec<(usize, f64)> {
            self.schedules.lock().unwrap().clone()
        }
    }

    impl OutputSink for MockSink {
        fn clock(&self) -> f64 {
            *self.clock.lock().unwrap()
        }

        fn schedule(&self, samples: Vec<f32>, at: f64) -> Result<(), SinkError> {
            if self.reject.load(Ordering::SeqCst) {
                return Err(SinkError::Rejected("mock failure".to_string()));
            }
            self.schedules.lock().unwrap().push((samples.len(), at));
            Ok(())
        }

        fn cancel_all(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }

        fn pause(&self) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
        }

        fn resume(&self) {
            self.resumes.fetch_add(1, Ordering::SeqCst);
        }

        fn set_gain(&self, gain: f32) {
            self.gains.lock().unwrap().push(gain);
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn encode(samples: &[f32]) -> String {
        let mut bytes = Vec::with_capacity(samples.len() * 4);
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        STANDARD.encode(bytes)
    }

    fn make_engine() -> (PlayerEngine, Arc<MockSink>) {
        let sink = MockSink::new();
        // Events are driven directly through the shared state in these tests;
        // the pump thread idles on this unused channel.
        let (_tx, rx) = unbounded();
        let engine = PlayerEngine::new(sink.clone(), rx, &EngineConfig::default());
        (engine, sink)
    }

    #[test]
    fn first_chunk_auto_starts_at_device_clock() {
        let (engine, sink) = make_engine();
        sink.set_clock(1.25);

        engine.append_chunk(&encode(&[0.1; 441])).unwrap();

        assert_eq!(sink.schedules(), vec![(441, 1.25)]);
        assert!(engine.stats().playing);
    }

    #[test]
    fn buffers_are_scheduled_back_to_back() {
        let (engine, sink) = make_engine();
        engine.append_chunk(&encode(&[0.0; 4410])).unwrap();
        engine.append_chunk(&encode(&[0.0; 2205])).unwrap();
        engine.append_chunk(&encode(&[0.0; 441])).unwrap();

        engine.shared.on_buffer_ended();
        engine.shared.on_buffer_ended();

        let schedules = sink.schedules();
        assert_eq!(schedules.len(), 3);
        for pair in schedules.windows(2) {
            let (len, at) = pair[0];
            let (_, next_at) = pair[1];
            let duration = len as f64 / RATE as f64;
            assert!((next_at - (at + duration)).abs() < 1e-9);
        }
    }

    #[test]
    fn total_scheduled_duration_matches_sample_arithmetic() {
        let (engine, sink) = make_engine();
        let lengths = [441usize, 1323, 882, 44100];
        for len in lengths {
            engine.append_chunk(&encode(&vec![0.0; len])).unwrap();
        }
        for _ in 0..lengths.len() {
            engine.shared.on_buffer_ended();
        }

        let schedules = sink.schedules();
        let first_at = schedules[0].1;
        let (last_len, last_at) = *schedules.last().unwrap();
        let total: f64 = lengths.iter().map(|l| *l as f64 / RATE as f64).sum();
        let scheduled_total = last_at + last_len as f64 / RATE as f64 - first_at;
        assert!((scheduled_total - total).abs() < 1e-9);
    }

    #[test]
    fn play_is_noop_when_queue_empty_or_already_playing() {
        let (engine, sink) = make_engine();
        engine.play().unwrap();
        assert!(sink.schedules().is_empty());

        engine.append_chunk(&encode(&[0.0; 100])).unwrap();
        engine.play().unwrap();
        assert_eq!(sink.schedules().len(), 1);
    }

    #[test]
    fn stop_discards_queue_and_resets_cursor() {
        let (engine, sink) = make_engine();
        engine.append_chunk(&encode(&[0.0; 441])).unwrap();
        engine.append_chunk(&encode(&[0.0; 441])).unwrap();

        engine.stop();

        let stats = engine.stats();
        assert!(!stats.playing);
        assert_eq!(stats.pending_buffers, 0);
        assert_eq!(sink.cancels.load(Ordering::SeqCst), 1);

        // A new session starts from the current device clock, not the old cursor.
        sink.set_clock(9.0);
        engine.append_chunk(&encode(&[0.0; 441])).unwrap();
        assert_eq!(sink.schedules().last().unwrap().1, 9.0);
    }

    #[test]
    fn stop_when_idle_is_safe() {
        let (engine, _sink) = make_engine();
        engine.stop();
        assert!(!engine.stats().playing);
    }

    #[test]
    fn completion_fires_exactly_once_per_drain() {
        let (engine, _sink) = make_engine();
        let events = engine.subscribe();

        engine.append_chunk(&encode(&[0.0; 441])).unwrap();
        engine.shared.on_buffer_ended();

        assert_eq!(
            events.recv_timeout(Duration::from_secs(1)).unwrap(),
            EngineEvent::Completed
        );

        // A stale buffer-ended after the session drained is ignored.
        engine.shared.on_buffer_ended();
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn decode_error_rejects_chunk_and_leaves_queue_untouched() {
        let (engine, sink) = make_engine();
        assert!(matches!(
            engine.append_chunk("***"),
            Err(EngineError::Chunk(ChunkError::Payload(_)))
        ));

        // Three bytes: valid base64, not sample aligned.
        let misaligned = STANDARD.encode([1u8, 2, 3]);
        assert!(matches!(
            engine.append_chunk(&misaligned),
            Err(EngineError::Chunk(ChunkError::Misaligned { len: 3 }))
        ));

        assert!(sink.schedules().is_empty());
        assert_eq!(engine.stats().pending_buffers, 0);
    }

    #[test]
    fn device_error_resets_playing_state_and_is_surfaced() {
        let (engine, _sink) = make_engine();
        let events = engine.subscribe();
        engine.append_chunk(&encode(&[0.0; 441])).unwrap();
        engine.append_chunk(&encode(&[0.0; 441])).unwrap();

        engine.shared.on_sink_error("device unplugged".to_string());

        assert_eq!(
            events.recv_timeout(Duration::from_secs(1)).unwrap(),
            EngineEvent::Error("device unplugged".to_string())
        );
        assert!(!engine.stats().playing);

        // A subsequent play() must be possible.
        engine.play().unwrap();
        assert!(engine.stats().playing);
    }

    #[test]
    fn volume_is_clamped_and_forwarded_to_the_gain_stage() {
        let (engine, sink) = make_engine();
        engine.set_volume(1.5);
        engine.set_volume(-0.2);
        engine.set_volume(0.4);
        assert_eq!(*sink.gains.lock().unwrap(), vec![1.0, 0.0, 0.4]);
        assert_eq!(engine.stats().volume, 0.4);
    }

    #[test]
    fn pause_and_resume_are_noops_without_a_session() {
        let (engine, sink) = make_engine();
        engine.pause();
        engine.resume();
        assert_eq!(sink.pauses.load(Ordering::SeqCst), 0);
        assert_eq!(sink.resumes.load(Ordering::SeqCst), 0);

        engine.append_chunk(&encode(&[0.0; 100])).unwrap();
        engine.pause();
        engine.resume();
        assert_eq!(sink.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(sink.resumes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn counters_accumulate_across_chunks() {
        let (engine, _sink) = make_engine();
        engine.append_chunk(&encode(&[0.0; 100])).unwrap();
        engine.append_chunk(&encode(&[0.0; 50])).unwrap();

        let stats = engine.stats();
        assert_eq!(stats.chunks_received, 2);
        assert_eq!(stats.bytes_received, 600);
        assert_eq!(stats.buffers_played, 1);
        assert_eq!(stats.pending_buffers, 1);
    }

    #[test]
    fn close_releases_sink_and_rejects_further_use() {
        let (engine, sink) = make_engine();
        engine.append_chunk(&encode(&[0.0; 100])).unwrap();
        engine.close();
        engine.close();

        assert_eq!(sink.closes.load(Ordering::SeqCst), 1);
        assert_eq!(sink.cancels.load(Ordering::SeqCst), 1);
        assert!(matches!(
            engine.append_chunk(&encode(&[0.0; 100])),
            Err(EngineError::Closed)
        ));
        assert!(matches!(engine.play(), Err(EngineError::Closed)));
    }

    #[test]
    fn schedule_failure_on_append_surfaces_device_error() {
        let (engine, sink) = make_engine();
        sink.reject.store(true, Ordering::SeqCst);

        let err = engine.append_chunk(&encode(&[0.0; 100])).unwrap_err();
        assert!(matches!(err, EngineError::Device(_)));
        assert!(!engine.stats().playing);
    }

    #[test]
    fn sink_events_drive_the_engine_through_the_pump() {
        let sink = MockSink::new();
        let (tx, rx) = unbounded();
        let engine = PlayerEngine::new(sink.clone(), rx, &EngineConfig::default());
        let events = engine.subscribe();

        engine.append_chunk(&encode(&[0.0; 441])).unwrap();
        tx.send(SinkEvent::BufferEnded).unwrap();

        assert_eq!(
            events.recv_timeout(Duration::from_secs(1)).unwrap(),
            EngineEvent::Completed
        );
    }
}
