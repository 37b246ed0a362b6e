//! Emuhost Core - Synchronization core for emulator frontends
//!
//! This crate runs an emulated machine on its own thread and keeps the
//! frontend around it in step: commands in, audio out, saves to disk.
//!
//! # Architecture
//!
//! - [`WorkerHandle`] - Command mailbox and status of one emulation thread
//! - [`AudioPipeline`] - Backpressured audio buffer between worker and device
//! - [`MicInput`] - Microphone frames from a device, a WAV file or noise
//! - [`SaveFlusher`] - Debounced, atomic persistence of save images
//! - [`InstanceRegistry`] - Owned table of up to 16 concurrent instances
//!
//! The emulated machine itself is supplied through the [`Machine`] and
//! [`MachineFactory`] traits.

pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
pub mod input;
pub mod instance;
pub mod machine;
pub mod mic;
pub mod registry;
pub mod save_flush;
pub mod worker;

#[cfg(test)]
mod test_utils;

pub use audio::{AudioPipeline, AudioRenderer, MuteMode, MuteState, SampleBuffer};
#[cfg(feature = "device")]
pub use audio::{CaptureDevice, OutputDevice};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{ConfigError, DeviceError, MachineError, RegistryError, WorkerError};
pub use input::{FrameInput, Hotkey, InputState, KEYS_RELEASED};
pub use instance::{EmuInstance, InstanceId};
pub use machine::{
    MIC_FRAME_LEN, Machine, MachineContext, MachineFactory, RomImage, StereoFrame, StopRequest,
};
pub use mic::{MicInput, MicInputMode};
pub use registry::{InstanceRegistry, MAX_INSTANCES};
pub use save_flush::{FlushTiming, SaveFlusher, SaveWriter};
pub use worker::{Command, EmuStatus, WorkerHandle, WorkerIo, WorkerOptions};
