//! Synthesis transport abstraction.
//!
//! Implementations translate an utterance into a stream of synthesis frames.
//! The network synthesis service itself is out of scope; the dispatcher only
//! sees the returned channel.

use crossbeam_channel::Receiver;
use thiserror::Error;

use speech_types::{QueueItem, SynthesisEvent};

#[derive(Debug, Error)]
pub enum TransportError {
    /// The synthesis backend cannot be reached at all.
    #[error("synthesis service is unavailable")]
    Unavailable,
    /// The request was rejected or failed to start.
    #[error("synthesis request failed: {0}")]
    Request(String),
}

/// Starts one synthesis stream per request.
///
/// Frames arrive in order on the returned channel, one active stream at a
/// time, terminated by `Done` or `Error`.
pub trait SynthesisTransport: Send {
    fn request(&self, item: &QueueItem) -> Result<Receiver<SynthesisEvent>, TransportError>;
}
