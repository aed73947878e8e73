use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Urgency of a queued utterance.
///
/// Serialized as the integers `3`/`2`/`1` to stay wire compatible with the
/// persisted queue format. Ordering follows urgency: `High > Normal > Low`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        match p {
            Priority::High => 3,
            Priority::Normal => 2,
            Priority::Low => 1,
        }
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            3 => Ok(Priority::High),
            2 => Ok(Priority::Normal),
            1 => Ok(Priority::Low),
            other => Err(format!("invalid priority: {other}")),
        }
    }
}

/// Lifecycle state of a queued utterance.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

/// One utterance waiting for (or finished with) synthesis and playback.
///
/// Items are plain values owned by the queue; timestamps serialize as
/// ISO-8601 via chrono.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub text: String,
    pub priority: Priority,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// On-disk representation of a saved queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueFile {
    pub version: String,
    pub items: Vec<QueueItem>,
}

/// Current queue file format version.
pub const QUEUE_FILE_VERSION: &str = "1.0";

/// Frames delivered by a synthesis stream, in arrival order.
///
/// One stream is active at a time; `Chunk` carries a base64 payload of raw
/// little-endian `f32` mono PCM, `Done` terminates the stream normally and
/// `Error` terminates it abnormally.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SynthesisEvent {
    Chunk { data: String },
    Done,
    Error { error: String },
}

/// Speech parameters forwarded to the synthesis layer.
///
/// Builder setters clamp their inputs so a stored config can never carry an
/// out-of-range value.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SynthesisOptions {
    pub model_id: String,
    pub voice_id: String,
    pub speed: f32,
    pub volume: f32,
    pub language: String,
    pub voice_speed: f32,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            model_id: "sonic-multilingual".to_string(),
            voice_id: "sonic".to_string(),
            speed: 1.0,
            volume: 1.0,
            language: "ja".to_string(),
            voice_speed: 0.0,
        }
    }
}

impl SynthesisOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Playback rate multiplier, clamped to `[0.5, 2.0]`.
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed.clamp(0.5, 2.0);
        self
    }

    /// Output volume, clamped to `[0.0, 1.0]`.
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }

    /// Voice-level speed bias, clamped to `[-1.0, 1.0]`.
    pub fn with_voice_speed(mut self, voice_speed: f32) -> Self {
        self.voice_speed = voice_speed.clamp(-1.0, 1.0);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_voice(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = voice_id.into();
        self
    }
}
