/// Engine tuning shared by the scheduler and the output sink.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Sample rate of incoming PCM chunks (Hz).
    pub sample_rate: u32,
    /// Output device selector (case-insensitive substring match).
    ///
    /// The host default output device is used when unset.
    pub device: Option<String>,
}

impl Default for EngineConfig {
    /// Defaults matching the synthesis service output format.
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            device: None,
        }
    }
}
