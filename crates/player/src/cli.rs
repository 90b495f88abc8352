use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "player", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Audio host (driver) name, e.g. ALSA or JACK. Defaults to the platform host.
    #[arg(long)]
    pub host: Option<String>,

    /// Requested device period in frames (the device may pick another size)
    #[arg(long, default_value_t = 4096)]
    pub period_frames: u32,

    /// Discovery attempts before giving up on a file's duration
    #[arg(long, default_value_t = 3)]
    pub probe_attempts: u32,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print duration and tags of a local file
    Probe {
        /// Path or file:// URI of the audio file
        path: String,
    },

    /// Play a local file. Reads commands from stdin: p play, s pause, f/b seek, q quit
    Play {
        /// Path to audio file
        path: PathBuf,
    },
}
