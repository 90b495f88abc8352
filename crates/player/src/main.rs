//! Player: a small CLI around `audio-engine`.
//!
//! - `probe`: print duration and tags of a file.
//! - `play`: decode a file through a [`DecodePipeline`] and play it on an [`OutputDevice`],
//!   with transport commands read line by line from stdin.

mod cli;

use std::io::BufRead;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use audio_engine::device::{self, CpalBackend};
use audio_engine::source::SharedPipeline;
use audio_engine::symphonia_backend::SymphoniaBackend;
use audio_engine::{
    DecodePipeline, EngineConfig, MetadataProbe, OutputDevice, OutputRequest, PipelineSource,
    RuntimeConfig, runtime,
};
use clap::Parser;
use crossbeam_channel::select;
use tracing_subscriber::EnvFilter;

const SEEK_STEP_SECS: f64 = 5.0;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,audio_engine=info,player=info")
        }))
        .init();

    runtime::initialize_with(&RuntimeConfig {
        host: args.host.clone(),
    })?;
    let result = run(&args);
    runtime::shutdown();
    result
}

fn run(args: &cli::Args) -> Result<()> {
    if args.list_devices {
        for name in device::list_devices(&runtime::host()?)? {
            println!("{name}");
        }
        return Ok(());
    }

    let config = EngineConfig {
        probe_attempts: args.probe_attempts,
        period_frames: args.period_frames,
        ..EngineConfig::default()
    };

    match &args.cmd {
        Some(cli::Command::Probe { path }) => {
            let meta = MetadataProbe::new(&config).probe(path)?;
            println!("duration: {:.3}s", meta.duration);
            println!("title:    {}", meta.title.as_deref().unwrap_or("-"));
            println!("artist:   {}", meta.artist.as_deref().unwrap_or("-"));
            println!("album:    {}", meta.album.as_deref().unwrap_or("-"));
            Ok(())
        }
        Some(cli::Command::Play { path }) => play(args, &config, path),
        None => Err(anyhow!("no command given (try `player play <PATH>`)")),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Key {
    Play,
    Pause,
    Forward,
    Back,
    Quit,
}

fn parse_key(line: &str) -> Option<Key> {
    match line.trim() {
        "p" => Some(Key::Play),
        "s" => Some(Key::Pause),
        "f" => Some(Key::Forward),
        "b" => Some(Key::Back),
        "q" => Some(Key::Quit),
        _ => None,
    }
}

fn play(args: &cli::Args, config: &EngineConfig, path: &Path) -> Result<()> {
    let uri = path.to_string_lossy();
    let meta = MetadataProbe::new(config).probe(&uri)?;
    tracing::info!(
        duration_secs = meta.duration,
        title = meta.title.as_deref().unwrap_or(""),
        artist = meta.artist.as_deref().unwrap_or(""),
        "track"
    );

    let pipeline = DecodePipeline::open_with(&SymphoniaBackend, path, config)
        .with_context(|| format!("open {}", path.display()))?;
    let (channels, rate) = (pipeline.channels(), pipeline.sample_rate());
    let shared: SharedPipeline = Arc::new(Mutex::new(pipeline));

    let backend = CpalBackend::from_runtime(args.device.clone())?;
    let output = OutputDevice::open_with(&backend, OutputRequest::new(channels, rate, config))?;
    let format = output.format();
    if format.sample_rate != rate || format.channels != channels {
        tracing::warn!(
            source_channels = channels,
            source_rate_hz = rate,
            device_channels = format.channels,
            device_rate_hz = format.sample_rate,
            "device format differs from source; playback will be distorted"
        );
    }

    let source = PipelineSource::new(shared.clone());
    let control = source.control();
    output.set_sample_source(source.into_sample_source());
    output.play();

    let (quit_tx, quit_rx) = crossbeam_channel::bounded::<()>(1);
    let _ = ctrlc::set_handler(move || {
        let _ = quit_tx.try_send(());
    });

    let (key_tx, key_rx) = crossbeam_channel::unbounded::<Key>();
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match parse_key(&line) {
                    Some(key) => {
                        if key_tx.send(key).is_err() {
                            break;
                        }
                    }
                    None => tracing::warn!(input = %line, "unknown command (p, s, f, b, q)"),
                }
            }
        })
        .context("spawn stdin reader")?;

    let closed_stdin = crossbeam_channel::never::<Key>();
    let mut stdin_open = true;
    loop {
        let keys = if stdin_open { &key_rx } else { &closed_stdin };
        select! {
            recv(keys) -> key => match key {
                Ok(Key::Play) => output.play(),
                Ok(Key::Pause) => output.pause(),
                Ok(Key::Forward) => seek_by(&shared, &control, SEEK_STEP_SECS),
                Ok(Key::Back) => seek_by(&shared, &control, -SEEK_STEP_SECS),
                Ok(Key::Quit) => break,
                // stdin closed; keep playing until end of stream.
                Err(_) => stdin_open = false,
            },
            recv(quit_rx) -> _ => {
                tracing::info!("interrupted");
                break;
            }
            default(Duration::from_millis(200)) => {
                if control.is_ended() {
                    tracing::info!("end of stream");
                    break;
                }
            }
        }
    }

    output.close();
    output.join();
    lock(&shared).close();
    Ok(())
}

fn seek_by(shared: &SharedPipeline, control: &audio_engine::SourceControl, delta: f64) {
    let mut pipeline = lock(shared);
    let target = (pipeline.position() + delta).max(0.0);
    if pipeline.seek(target) {
        control.reset();
        tracing::info!(position_secs = target, "seek");
    }
}

fn lock(shared: &SharedPipeline) -> MutexGuard<'_, DecodePipeline> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_maps_single_letters() {
        assert_eq!(parse_key("p"), Some(Key::Play));
        assert_eq!(parse_key(" s \n"), Some(Key::Pause));
        assert_eq!(parse_key("f"), Some(Key::Forward));
        assert_eq!(parse_key("b"), Some(Key::Back));
        assert_eq!(parse_key("q"), Some(Key::Quit));
        assert_eq!(parse_key("x"), None);
        assert_eq!(parse_key(""), None);
    }

    #[test]
    fn args_parse_play_with_options() {
        let args = cli::Args::try_parse_from([
            "player",
            "--device",
            "usb",
            "--period-frames",
            "1024",
            "play",
            "a.flac",
        ])
        .unwrap();
        assert_eq!(args.device.as_deref(), Some("usb"));
        assert_eq!(args.period_frames, 1024);
        assert_eq!(args.probe_attempts, 3);
        assert!(matches!(args.cmd, Some(cli::Command::Play { .. })));
    }
}
