//! Audio synchronization between the emulation worker and the output device
//!
//! # Architecture
//!
//! ```text
//! Worker Thread                                   cpal Thread
//!     │                                               │
//! [run_frame]                                         │
//! [read_output]──►[push]──(SampleBuffer)──►[read]◄──[render]
//! [sync]◄──────────────(condvar notify)──────────────┘
//!     │  waits while queued > device buffer size,
//!     │  at most sync_timeout
//! ```
//!
//! The renderer resamples from the machine's rate to the device rate,
//! applies volume and the multi-instance mute policy, and pads short reads
//! with the last sample instead of dropping to silence.

mod buffer;
#[cfg(feature = "device")]
mod device;
mod mute;
mod pipeline;
mod resample;

pub use buffer::{HEADROOM, SampleBuffer};
#[cfg(feature = "device")]
pub use device::{CaptureDevice, OutputDevice};
pub use mute::{MuteMode, MuteState};
pub use pipeline::{AudioPipeline, AudioRenderer, MAX_READ, UNDERRUN_MARGIN, VOLUME_STEP};
pub use resample::{RateConverter, resample};
