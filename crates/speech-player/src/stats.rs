//! Diagnostic counters exposed by the engine.

/// Point-in-time snapshot of the engine's session state.
///
/// Counters are engine-lifetime diagnostics; `stop()` resets only the queue,
/// cursor and playing flag.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EngineStats {
    /// Chunks accepted by `append_chunk` since construction.
    pub chunks_received: u64,
    /// Decoded payload bytes accepted since construction.
    pub bytes_received: u64,
    /// Buffers handed to the sink since construction.
    pub buffers_played: u64,
    /// Buffers currently queued and not yet scheduled.
    pub pending_buffers: usize,
    /// Whether a playback session is active.
    pub playing: bool,
    /// Current output volume after clamping.
    pub volume: f32,
}

impl EngineStats {
    /// True when no session is active and nothing is queued.
    pub fn is_idle(&self) -> bool {
        !self.playing && self.pending_buffers == 0
    }
}
