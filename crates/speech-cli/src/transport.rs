//! File-backed synthesis transport.
//!
//! Streams a raw f32le PCM file as base64 chunk frames, the same shape a
//! network synthesis service would deliver. Used for end-to-end verification
//! without the out-of-scope network layer.

use std::fs;
use std::thread;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use crossbeam_channel::{Receiver, unbounded};

use speech_dispatch::transport::{SynthesisTransport, TransportError};
use speech_types::{QueueItem, SynthesisEvent};

pub struct FileTransport {
    chunk_bytes: usize,
}

impl FileTransport {
    pub fn new(chunk_bytes: usize) -> Self {
        Self {
            chunk_bytes: chunk_bytes.max(4),
        }
    }
}

impl SynthesisTransport for FileTransport {
    /// Treats the item text as a file path and streams its bytes.
    fn request(&self, item: &QueueItem) -> Result<Receiver<SynthesisEvent>, TransportError> {
        let path = item.text.clone();
        let chunk_bytes = self.chunk_bytes;
        let (tx, rx) = unbounded();

        thread::spawn(move || {
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx.send(SynthesisEvent::Error {
                        error: format!("read {path}: {e}"),
                    });
                    return;
                }
            };

            tracing::debug!(path = %path, bytes = bytes.len(), "streaming file");
            for chunk in bytes.chunks(chunk_bytes) {
                if tx
                    .send(SynthesisEvent::Chunk {
                        data: STANDARD.encode(chunk),
                    })
                    .is_err()
                {
                    // Receiver gone: the utterance was preempted or failed.
                    return;
                }
            }
            let _ = tx.send(SynthesisEvent::Done);
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use speech_types::{ItemStatus, Priority};
    use std::io::Write;

    fn item_for(path: &str) -> QueueItem {
        QueueItem {
            id: "test".to_string(),
            text: path.to_string(),
            priority: Priority::Normal,
            status: ItemStatus::Processing,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn streams_file_in_chunks_and_terminates_with_done() {
        let mut file = std::env::temp_dir();
        file.push("speech-cli-transport-test.f32");
        let samples: Vec<u8> = (0..32u8).collect();
        std::fs::File::create(&file)
            .unwrap()
            .write_all(&samples)
            .unwrap();

        let transport = FileTransport::new(16);
        let rx = transport.request(&item_for(file.to_str().unwrap())).unwrap();

        let events: Vec<SynthesisEvent> = rx.iter().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], SynthesisEvent::Chunk { .. }));
        assert!(matches!(events[1], SynthesisEvent::Chunk { .. }));
        assert_eq!(events[2], SynthesisEvent::Done);

        let _ = std::fs::remove_file(&file);
    }

    #[test]
    fn missing_file_yields_an_error_frame() {
        let transport = FileTransport::new(1024);
        let rx = transport
            .request(&item_for("/nonexistent/audio.f32"))
            .unwrap();

        let events: Vec<SynthesisEvent> = rx.iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SynthesisEvent::Error { .. }));
    }
}
