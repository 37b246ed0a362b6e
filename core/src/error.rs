//! Error types shared across the crate

use std::io;

/// Failure reported by the emulated machine or while preparing its inputs.
#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    #[error("{0}")]
    Io(#[from] io::Error),

    /// No machine has been booted yet.
    #[error("no machine is running")]
    NoMachine,

    #[error("no file path provided")]
    NoPath,

    /// Savestate data rejected by the machine.
    #[error("invalid savestate: {0}")]
    InvalidState(String),

    /// Boot failed for a reason the machine describes itself (missing BIOS, bad ROM, ...).
    #[error("{0}")]
    Boot(String),
}

/// Result of a synchronous worker command.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Machine(#[from] MachineError),

    /// The worker thread stopped before answering.
    #[error("emulation worker is not running")]
    Disconnected,

    /// The command arrived after an exit request.
    #[error("emulation worker is exiting")]
    Exiting,

    #[error("no savestate load to undo")]
    NothingToUndo,
}

/// Failure opening or starting an audio device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no audio {0} device available")]
    NoDevice(&'static str),

    #[error("audio device '{0}' not found")]
    NotFound(String),

    #[error("failed to query audio device configuration: {0}")]
    Config(String),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to build audio stream: {0}")]
    Build(String),

    #[error("failed to start audio stream: {0}")]
    Play(String),
}

/// Failure managing emulator instances.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("all {0} emulator instance slots are in use")]
    Full(usize),

    #[error("no emulator instance with id {0}")]
    UnknownInstance(usize),
}

/// Failure reading or writing the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}
