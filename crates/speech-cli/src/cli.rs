use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use speech_types::Priority;

#[derive(Parser, Debug)]
#[command(name = "speech-cli", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Output volume (0.0..=1.0)
    #[arg(long, default_value_t = 1.0)]
    pub volume: f32,

    /// Settle delay between a stop and the next stream, in milliseconds
    #[arg(long, default_value_t = 50)]
    pub settle_ms: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play raw f32le mono 44.1 kHz PCM files in queue order
    Play {
        /// Paths to raw PCM files
        files: Vec<PathBuf>,

        /// Queue priority for every file
        #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,

        /// Bytes per streamed chunk
        #[arg(long, default_value_t = 88_200)]
        chunk_bytes: usize,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum PriorityArg {
    High,
    Normal,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(p: PriorityArg) -> Self {
        match p {
            PriorityArg::High => Priority::High,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::Low => Priority::Low,
        }
    }
}
