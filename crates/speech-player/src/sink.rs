//! Output sink abstraction.
//!
//! The engine schedules decoded buffers against an [`OutputSink`] instead of
//! a concrete device, which keeps the gapless scheduling logic testable
//! without audio hardware. The CPAL-backed implementation lives in
//! [`crate::output`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink has been closed and no longer accepts buffers.
    #[error("output sink is closed")]
    Closed,
    /// The sink could not accept the buffer.
    #[error("output sink rejected buffer: {0}")]
    Rejected(String),
}

/// Asynchronous notifications from a sink, delivered in schedule order.
#[derive(Clone, Debug, PartialEq)]
pub enum SinkEvent {
    /// A scheduled buffer finished rendering naturally.
    BufferEnded,
    /// The output device failed; distinct from normal end-of-stream.
    Error(String),
}

/// An output device with a sample-accurate scheduling timeline.
///
/// ## Contract
/// - `schedule` enqueues one mono buffer to start at exactly `at` seconds on
///   the sink timeline; buffers play strictly in schedule order.
/// - One `SinkEvent::BufferEnded` is emitted per scheduled buffer, in order,
///   on the channel handed to the sink at construction.
/// - `clock` reports rendered audio only: it does not advance while the sink
///   is paused or starved of data.
/// - `cancel_all` synchronously drops the sounding buffer and everything
///   scheduled behind it, and clears any device pause so the next session
///   starts clean. Events already in flight may still be delivered;
///   interruption callers are expected to observe a settle delay before
///   scheduling a new stream.
pub trait OutputSink: Send + Sync {
    /// Seconds of scheduled audio rendered so far.
    fn clock(&self) -> f64;

    /// Enqueue `samples` to start at `at` seconds on the sink timeline.
    fn schedule(&self, samples: Vec<f32>, at: f64) -> Result<(), SinkError>;

    /// Drop the sounding buffer and all scheduled audio.
    fn cancel_all(&self);

    /// Suspend rendering without discarding scheduled audio.
    fn pause(&self);

    /// Resume rendering where the device left off.
    fn resume(&self);

    /// Set the shared gain applied to current and future buffers alike.
    fn set_gain(&self, gain: f32);

    /// Release the underlying device. The sink is unusable afterwards.
    fn close(&self);
}
