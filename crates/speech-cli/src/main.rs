//! Speech CLI: streams raw PCM files through the playback stack.
//!
//! ## Pipeline
//! 1. **Transport**: a background thread reads each file and streams it as
//!    base64 chunk frames, the way a synthesis service would.
//! 2. **Dispatch**: the dispatcher thread orders utterances by priority and
//!    feeds the active stream into the engine.
//! 3. **Playback**: the engine schedules buffers gaplessly against the CPAL
//!    sink, which resamples to the device rate in its output callback.

mod cli;
mod transport;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use tracing_subscriber::EnvFilter;

use speech_dispatch::dispatch::{DispatchConfig, spawn_dispatcher};
use speech_dispatch::events::{DispatchEvent, EventBus};
use speech_dispatch::queue::SpeechQueue;
use speech_player::config::EngineConfig;
use speech_player::device;
use speech_player::engine::PlayerEngine;
use speech_player::output::CpalSink;

use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,speech_cli=info")),
        )
        .init();

    if args.list_devices {
        let host = cpal::default_host();
        device::list_devices(&host)?;
        return Ok(());
    }

    let Some(cli::Command::Play {
        files,
        priority,
        chunk_bytes,
    }) = args.cmd
    else {
        anyhow::bail!("nothing to do; see --help");
    };
    if files.is_empty() {
        anyhow::bail!("no input files");
    }

    let engine_config = EngineConfig {
        device: args.device.clone(),
        ..EngineConfig::default()
    };

    let (sink_tx, sink_rx) = unbounded();
    let sink = Arc::new(CpalSink::spawn(&engine_config, sink_tx).context("open output device")?);
    let engine = PlayerEngine::new(sink, sink_rx, &engine_config);
    engine.set_volume(args.volume);

    let bus = EventBus::new();
    let bus_rx = bus.subscribe();
    let (handle, join) = spawn_dispatcher(
        engine,
        transport::FileTransport::new(chunk_bytes),
        SpeechQueue::new(),
        bus,
        DispatchConfig {
            settle: Duration::from_millis(args.settle_ms),
        },
    );

    let ctrlc_handle = handle.clone();
    let _ = ctrlc::set_handler(move || {
        ctrlc_handle.stop();
        ctrlc_handle.shutdown();
    });

    let total = files.len();
    for file in files {
        handle.enqueue(file.to_string_lossy().to_string(), priority.into());
    }

    let mut finished = 0usize;
    let mut failed = 0usize;
    while finished < total {
        match bus_rx.recv() {
            Ok(DispatchEvent::ItemCompleted { .. }) => finished += 1,
            Ok(DispatchEvent::ItemFailed { id, message }) => {
                tracing::warn!(id = %id, error = %message, "utterance failed");
                finished += 1;
                failed += 1;
            }
            Ok(DispatchEvent::PlaybackError { message }) => {
                tracing::warn!(error = %message, "playback error");
            }
            Ok(_) => {}
            // Dispatcher gone (ctrl-c shutdown); stop waiting.
            Err(_) => break,
        }
    }

    handle.shutdown();
    let _ = join.join();

    if failed > 0 {
        anyhow::bail!("{failed} of {total} files failed");
    }
    Ok(())
}
