use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use voxlink::audio::capture::{Direction, list_devices, suppress_audio_warnings};
use voxlink::audio::resample::resample;
use voxlink::audio::{AudioChunk, CaptureEngine, CaptureSettings, CpalInputDevice, EncodedChunk};
use voxlink::audio::{LevelPoller, WavInputDevice};
use voxlink::cli::{Cli, Commands, ConfigAction};
use voxlink::config::Config;
use voxlink::playback::{AudioPlayer, CpalOutputLine, FrameClock};
use voxlink::transport::{RealtimeInput, ServerMessage};
use voxlink::{VoxlinkError, logging};

type Player = AudioPlayer<FrameClock, CpalOutputLine>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet, cli.log_json)?;

    match cli.command {
        Commands::Devices => {
            suppress_audio_warnings();
            list_audio_devices()?;
        }
        Commands::Loopback { seconds } => {
            let config = load_config(&cli)?;
            suppress_audio_warnings();
            run_loopback(config, seconds.map(Duration::from_secs), cli.quiet).await?;
        }
        Commands::Encode { ref path, realtime } => {
            let config = load_config(&cli)?;
            run_encode(&config, path, realtime).await?;
        }
        Commands::Play { ref file } => {
            let config = load_config(&cli)?;
            suppress_audio_warnings();
            run_play(&config, file.as_deref(), cli.quiet).await?;
        }
        Commands::Config { ref action } => {
            handle_config_command(action, &cli)?;
        }
    }

    Ok(())
}

/// Load configuration with the same precedence everywhere: file, environment, flags.
fn load_config(cli: &Cli) -> Result<Config> {
    let config = if let Some(path) = cli.config.as_deref() {
        Config::load(path)?
    } else if let Some(path) = Config::default_path() {
        Config::load_or_default(&path)?
    } else {
        Config::default()
    };

    let mut config = config.with_env_overrides();
    if let Some(device) = &cli.input_device {
        config.capture.device = Some(device.clone());
    }
    if let Some(device) = &cli.output_device {
        config.playback.device = Some(device.clone());
    }
    config.validate()?;
    Ok(config)
}

/// List available audio input and output devices.
fn list_audio_devices() -> Result<()> {
    for (label, direction) in [("input", Direction::Input), ("output", Direction::Output)] {
        let devices = list_devices(direction)?;
        if devices.is_empty() {
            println!("No audio {} devices found", label);
            continue;
        }
        println!("Available audio {} devices:", label);
        for (idx, device) in devices.iter().enumerate() {
            println!("  [{}] {}", idx, device);
        }
    }
    Ok(())
}

/// Converts a captured chunk into a chunk the player accepts.
fn to_playback_chunk(encoded: &EncodedChunk, playback_rate: u32) -> voxlink::Result<AudioChunk> {
    let captured = encoded.decode()?;
    let samples = resample(captured.samples(), captured.sample_rate(), playback_rate);
    Ok(AudioChunk::new(samples, playback_rate))
}

/// Microphone -> capture engine -> wire encoding -> decode -> jitter buffer -> speaker.
async fn run_loopback(config: Config, limit: Option<Duration>, quiet: bool) -> Result<()> {
    let player = Arc::new(Player::open(&config.playback)?);
    let device = CpalInputDevice::new(config.capture.device.as_deref())?;
    let mut engine = CaptureEngine::new(Box::new(device), CaptureSettings::from(&config.capture));

    let playback_rate = config.playback.sample_rate;
    let sink_player = Arc::clone(&player);
    engine.start(move |encoded: EncodedChunk| {
        match to_playback_chunk(&encoded, playback_rate) {
            Ok(chunk) => {
                if let Err(e) = sink_player.push(chunk) {
                    tracing::warn!(sequence = encoded.sequence, "dropping loopback chunk: {}", e);
                }
            }
            Err(e) => tracing::warn!(sequence = encoded.sequence, "undecodable chunk: {}", e),
        }
    })?;

    let mut poller = engine.analysis_tap().map(|tap| {
        LevelPoller::spawn(tap, config.meter.poll_interval(), config.meter.scale)
    });
    let level = poller.as_ref().map(LevelPoller::level);

    if !quiet {
        eprintln!("{}", "Loopback running, press Ctrl-C to stop".green());
    }

    let deadline = limit.map(|limit| tokio::time::Instant::now() + limit);
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => break,
            _ = ticker.tick() => {
                if !quiet && let Some(level) = &level {
                    eprint!("\r{} {:<13}", render_meter(level.get()), player.state());
                }
            }
        }
    }

    engine.stop();
    if let Some(poller) = poller.as_mut() {
        poller.stop();
    }
    if !quiet {
        eprintln!();
    }
    let stats = player.stats();
    tracing::info!(
        scheduled = stats.scheduled,
        completed = stats.completed,
        underruns = stats.underruns,
        late_starts = stats.late_starts,
        "loopback finished"
    );
    player.stop();
    Ok(())
}

fn render_meter(level: u8) -> String {
    let filled = usize::from(level) / 5;
    let bar = format!("{:<20}", "#".repeat(filled));
    let bar = match level {
        0..=40 => bar.green().to_string(),
        41..=80 => bar.yellow().to_string(),
        _ => bar.red().to_string(),
    };
    format!("[{}] {:>3}", bar, level)
}

/// Replay a WAV file through the capture engine and print one wire message per chunk.
async fn run_encode(config: &Config, path: &Path, realtime: bool) -> Result<()> {
    let device = WavInputDevice::open_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .with_realtime_pacing(realtime);
    let completion = device.completion();
    tracing::debug!(duration = ?device.duration(), "replaying wav file");

    let mut engine = CaptureEngine::new(Box::new(device), CaptureSettings::from(&config.capture));
    let emitted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&emitted);
    engine.start(move |encoded: EncodedChunk| {
        match RealtimeInput::audio(&encoded).to_json() {
            Ok(line) => {
                let mut stdout = std::io::stdout().lock();
                if let Err(e) = writeln!(stdout, "{}", line) {
                    tracing::warn!(sequence = encoded.sequence, "failed to write chunk: {}", e);
                    return;
                }
                counter.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => tracing::warn!(sequence = encoded.sequence, "failed to serialize chunk: {}", e),
        }
    })?;

    tokio::task::spawn_blocking(move || completion.recv())
        .await?
        .context("wav replay ended without completing")?;
    engine.stop();

    let count = emitted.load(Ordering::Relaxed);
    tracing::info!(chunks = count, "encode finished");
    Ok(())
}

/// Feed agent messages (one JSON object per line) into the jitter buffer.
async fn run_play(config: &Config, file: Option<&Path>, quiet: bool) -> Result<()> {
    let player = Player::open(&config.playback)?;
    let reader: Box<dyn AsyncBufRead + Unpin> = match file {
        Some(path) => Box::new(BufReader::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                player.stop();
                return Ok(());
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parsed = match ServerMessage::from_json(line) {
            Ok(message) => message.parse(),
            Err(e) => {
                tracing::warn!("skipping malformed message: {}", e);
                continue;
            }
        };
        if let Some(text) = parsed.text.as_deref()
            && !quiet
        {
            println!("{} {}", "agent:".cyan(), text);
        }
        if let Some(data) = parsed.audio_data.as_deref() {
            push_with_backpressure(&player, data).await?;
        }
        if parsed.turn_complete {
            player.finish_turn();
        }
    }

    // Input ended: play whatever is left even if no turnComplete arrived.
    player.finish_turn();
    wait_until_idle(&player).await;

    let stats = player.stats();
    tracing::info!(
        scheduled = stats.scheduled,
        completed = stats.completed,
        dropped = stats.dropped,
        underruns = stats.underruns,
        "playback finished"
    );
    Ok(())
}

async fn push_with_backpressure(player: &Player, data: &str) -> Result<()> {
    loop {
        match player.push_encoded(data) {
            Ok(_) => return Ok(()),
            Err(VoxlinkError::PlaybackQueueFull { .. }) => {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn wait_until_idle(player: &Player) {
    let mut ticker = tokio::time::interval(Duration::from_millis(20));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                player.stop();
                return;
            }
            _ = ticker.tick() => {
                if player.is_idle() {
                    return;
                }
            }
        }
    }
}

/// Handle configuration commands.
fn handle_config_command(action: &ConfigAction, cli: &Cli) -> Result<()> {
    match action {
        ConfigAction::Path => {
            let path: Option<PathBuf> = cli.config.clone().or_else(Config::default_path);
            match path {
                Some(path) => println!("{}", path.display()),
                None => anyhow::bail!("no configuration directory on this system"),
            }
        }
        ConfigAction::Show => {
            let config = load_config(cli)?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Dump => {
            print!("{}", Config::default().to_toml()?);
        }
    }
    Ok(())
}
