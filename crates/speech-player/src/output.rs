//! CPAL-backed output sink.
//!
//! Owns the output stream on a dedicated thread (a `cpal::Stream` is not
//! `Send`) and renders from a shared mono sample FIFO. The realtime callback:
//! - resamples from the fixed source rate to the device rate by linear
//!   interpolation
//! - duplicates the mono source to every output channel
//! - applies the shared gain and converts `f32` to the device sample format
//! - emits `SinkEvent::BufferEnded` whenever consumption crosses a scheduled
//!   buffer boundary
//!
//! The sink timeline counts **rendered source frames**: it does not advance
//! while paused or starved, which is what lets the engine restart a starved
//! session seamlessly from `clock()`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, bounded};

use crate::config::EngineConfig;
use crate::device;
use crate::sink::{OutputSink, SinkError, SinkEvent};

/// Timeline and FIFO state shared with the realtime callback.
///
/// Positions are in source frames; fractional values come from the
/// interpolating resampler.
struct SinkState {
    samples: VecDeque<f32>,
    /// Cumulative end position of each scheduled buffer, in source frames.
    segment_ends: VecDeque<f64>,
    /// Source frames ever appended (the timeline head).
    appended_frames: f64,
    /// Whole source frames drained from the FIFO.
    base_frames: f64,
    /// Fractional read position into the FIFO front.
    interp_pos: f64,
}

struct SinkShared {
    source_rate: u32,
    state: Mutex<SinkState>,
    gain_bits: AtomicU32,
    paused: AtomicBool,
    closed: AtomicBool,
    events: Sender<SinkEvent>,
}

impl SinkShared {
    fn new(source_rate: u32, events: Sender<SinkEvent>) -> Self {
        Self {
            source_rate,
            state: Mutex::new(SinkState {
                samples: VecDeque::new(),
                segment_ends: VecDeque::new(),
                appended_frames: 0.0,
                base_frames: 0.0,
                interp_pos: 0.0,
            }),
            gain_bits: AtomicU32::new(1.0_f32.to_bits()),
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            events,
        }
    }
}

/// Sink handle bound to one output device.
pub struct CpalSink {
    shared: Arc<SinkShared>,
    shutdown_tx: Sender<()>,
}

impl CpalSink {
    /// Open the output device and start its stream thread.
    ///
    /// Blocks until the stream is running (or failed to build) so callers get
    /// device errors synchronously.
    pub fn spawn(config: &EngineConfig, events: Sender<SinkEvent>) -> Result<Self> {
        let shared = Arc::new(SinkShared::new(config.sample_rate, events));
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let (ready_tx, ready_rx) = bounded(1);

        let needle = config.device.clone();
        let thread_shared = shared.clone();
        thread::spawn(move || stream_thread_main(thread_shared, needle, shutdown_rx, ready_tx));

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shared,
                shutdown_tx,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(anyhow!("audio thread exited before reporting readiness")),
        }
    }
}

impl OutputSink for CpalSink {
    fn clock(&self) -> f64 {
        let st = self.shared.state.lock().unwrap();
        (st.base_frames + st.interp_pos) / self.shared.source_rate as f64
    }

    fn schedule(&self, samples: Vec<f32>, at: f64) -> Result<(), SinkError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        let mut st = self.shared.state.lock().unwrap();
        let expected = st.appended_frames / self.shared.source_rate as f64;
        if (at - expected).abs() * self.shared.source_rate as f64 > 0.5 {
            tracing::warn!(at, expected, "scheduled start deviates from sink timeline");
        }
        let end = st.appended_frames + samples.len() as f64;
        st.segment_ends.push_back(end);
        st.appended_frames = end;
        st.samples.extend(samples);
        Ok(())
    }

    fn cancel_all(&self) {
        let mut st = self.shared.state.lock().unwrap();
        st.samples.clear();
        st.segment_ends.clear();
        // Collapse the timeline to what was actually rendered.
        st.base_frames += st.interp_pos;
        st.interp_pos = 0.0;
        st.appended_frames = st.base_frames;
        drop(st);
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    fn set_gain(&self, gain: f32) {
        self.shared
            .gain_bits
            .store(gain.to_bits(), Ordering::Relaxed);
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.try_send(());
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Build the stream, report readiness, then park until shutdown.
fn stream_thread_main(
    shared: Arc<SinkShared>,
    needle: Option<String>,
    shutdown_rx: Receiver<()>,
    ready_tx: Sender<Result<()>>,
) {
    let host = cpal::default_host();
    let built = build_stream_for_host(&host, &shared, needle.as_deref());
    match built {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            let _ = shutdown_rx.recv();
            drop(stream);
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
        }
    }
}

fn build_stream_for_host(
    host: &cpal::Host,
    shared: &Arc<SinkShared>,
    needle: Option<&str>,
) -> Result<cpal::Stream> {
    let dev = device::pick_device(host, needle)?;
    let supported = device::pick_output_config(&dev, Some(shared.source_rate))?;
    let mut stream_config: cpal::StreamConfig = supported.clone().into();
    if let Some(buf) = device::pick_buffer_size(&supported) {
        stream_config.buffer_size = buf;
    }

    tracing::info!(
        device = %dev.description().map(|d| d.to_string()).unwrap_or_default(),
        rate_hz = stream_config.sample_rate,
        channels = stream_config.channels,
        source_rate_hz = shared.source_rate,
        "output stream"
    );

    let stream = build_output_stream(&dev, &stream_config, supported.sample_format(), shared)
        .context("build output stream")?;
    stream.play().context("start output stream")?;
    Ok(stream)
}

/// Build a CPAL output stream rendering from the shared FIFO.
fn build_output_stream(
    dev: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    shared: &Arc<SinkShared>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(dev, config, shared),
        cpal::SampleFormat::I32 => build_stream::<i32>(dev, config, shared),
        cpal::SampleFormat::I16 => build_stream::<i16>(dev, config, shared),
        cpal::SampleFormat::U16 => build_stream::<u16>(dev, config, shared),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    dev: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: &Arc<SinkShared>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;
    // Source frames consumed per output frame.
    let step = shared.source_rate as f64 / config.sample_rate as f64;

    let cb_shared = shared.clone();
    let err_events = shared.events.clone();
    let err_fn = move |err: cpal::StreamError| {
        tracing::warn!("stream error: {err}");
        let _ = err_events.send(SinkEvent::Error(err.to_string()));
    };

    let stream = dev.build_output_stream(
        config,
        move |data: &mut [T], _| {
            render::<T>(&cb_shared, data, channels_out, step);
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Realtime render: resample, apply gain, fan out to channels, track segment
/// boundaries.
///
/// Paused or closed sinks output silence **without draining** the FIFO, and
/// starvation outputs silence without advancing the timeline.
fn render<T>(shared: &SinkShared, data: &mut [T], channels_out: usize, step: f64)
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
    if shared.paused.load(Ordering::Relaxed) || shared.closed.load(Ordering::Relaxed) {
        data.fill(silence);
        return;
    }

    let gain = f32::from_bits(shared.gain_bits.load(Ordering::Relaxed));
    let mut st = shared.state.lock().unwrap();

    for frame in data.chunks_mut(channels_out.max(1)) {
        let idx = st.interp_pos as usize;
        let value = if idx < st.samples.len() {
            let frac = (st.interp_pos - idx as f64) as f32;
            let s1 = st.samples[idx];
            let s2 = st.samples.get(idx + 1).copied().unwrap_or(s1);
            st.interp_pos += step;
            (s1 * (1.0 - frac) + s2 * frac) * gain
        } else {
            0.0
        };

        let out = <T as cpal::Sample>::from_sample::<f32>(value);
        for ch in frame.iter_mut() {
            *ch = out;
        }

        // Drain whole consumed samples so the FIFO stays small.
        let whole = st.interp_pos as usize;
        if whole > 0 {
            let take = whole.min(st.samples.len());
            st.samples.drain(..take);
            st.base_frames += take as f64;
            st.interp_pos -= take as f64;
        }
        // The final step can overshoot the data end; land exactly on it.
        if st.samples.is_empty() {
            st.interp_pos = 0.0;
        }
    }

    let consumed = st.base_frames + st.interp_pos;
    while st
        .segment_ends
        .front()
        .is_some_and(|end| *end <= consumed + 1e-9)
    {
        st.segment_ends.pop_front();
        let _ = shared.events.send(SinkEvent::BufferEnded);
    }
}
