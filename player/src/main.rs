//! Emuhost player - headless harness for the synchronization core
//!
//! Boots a tone-generating machine inside one emulator instance, attaches
//! the configured audio and microphone devices and lets it run.
//!
//! # Usage
//!
//! ```bash
//! # Play the tone derived from a file for five seconds
//! emuhost some.rom --frames 300
//!
//! # Boot without a cartridge and run until interrupted
//! emuhost
//!
//! # No audio devices, savestate written at the end
//! emuhost some.rom --frames 60 --no-audio --save-state run.state
//! ```

mod tone;

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use emuhost_core::{InstanceRegistry, config};
use tracing::info;

use tone::ToneFactory;

/// Status poll interval of the main thread.
const POLL: Duration = Duration::from_millis(100);

/// Emuhost - run a machine through the emulation worker
#[derive(Parser)]
#[command(name = "emuhost")]
#[command(version)]
struct Cli {
    /// ROM to boot; boots the firmware menu when omitted
    rom: Option<PathBuf>,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Read settings from this file instead of the platform config dir
    #[arg(long)]
    config: Option<PathBuf>,

    /// Do not open audio or microphone devices
    #[arg(long)]
    no_audio: bool,

    /// Directory for the firmware save file
    #[arg(long)]
    firmware_dir: Option<PathBuf>,

    /// Load this savestate after booting
    #[arg(long)]
    load_state: Option<PathBuf>,

    /// Write a savestate here before exiting
    #[arg(long)]
    save_state: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_from(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => config::load(),
    };
    let factory = ToneFactory::new(config.emu.core_sample_rate, config.emu.target_fps);

    let mut registry = InstanceRegistry::new(config.clone());
    if let Some(dir) = cli.firmware_dir.clone() {
        registry = registry.with_firmware_dir(dir);
    }
    let id = registry.create(Box::new(factory))?;
    registry.set_focus(Some(id))?;

    if !cli.no_audio {
        open_devices(&mut registry, id, &config);
    }

    let instance = registry
        .get(id)
        .context("instance disappeared after creation")?;
    let worker = instance.worker();

    match &cli.rom {
        Some(rom) => worker.boot_rom(std::slice::from_ref(rom))?,
        None => worker.boot_firmware()?,
    }
    if let Some(path) = &cli.load_state {
        worker.load_state(path)?;
    }
    worker.run()?;

    loop {
        thread::sleep(POLL);
        for message in worker.take_osd_messages() {
            info!("[OSD] {}", message);
        }
        if !worker.is_active() || !worker.is_alive() {
            info!("Machine stopped");
            break;
        }
        if cli.frames.is_some_and(|limit| worker.frames() >= limit) {
            break;
        }
    }

    if let Some(path) = &cli.save_state {
        worker.pause()?;
        worker.save_state(path)?;
        info!("Savestate written to {}", path.display());
    }
    info!("Ran {} frames", worker.frames());
    worker.exit()?;

    registry.destroy_all();
    Ok(())
}

#[cfg(feature = "device")]
fn open_devices(registry: &mut InstanceRegistry, id: usize, config: &config::Config) {
    if let Some(instance) = registry.get_mut(id) {
        if let Err(e) = instance.open_devices(config) {
            tracing::warn!("Running without audio: {}", e);
        }
    }
}

#[cfg(not(feature = "device"))]
fn open_devices(_registry: &mut InstanceRegistry, _id: usize, _config: &config::Config) {
    tracing::warn!("Built without device support; running without audio");
}
