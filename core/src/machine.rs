//! Contract between the frontend and the emulated machine
//!
//! The machine is opaque: the worker advances it one frame at a time, pulls
//! its audio output and forwards commands. Everything the machine needs from
//! the frontend (the save-write hook and the stop flag) arrives through
//! [`MachineContext`] at boot.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::MachineError;
use crate::input::FrameInput;
use crate::save_flush::SaveWriter;

/// One interleaved left/right sample pair.
pub type StereoFrame = [i16; 2];

/// Microphone samples consumed per emulated frame (44100 Hz / 60 fps).
pub const MIC_FRAME_LEN: usize = 735;

/// An emulated machine owned by the worker thread.
pub trait Machine: Send {
    fn start(&mut self);

    fn stop(&mut self);

    fn reset(&mut self);

    /// Advance one frame.
    fn run_frame(&mut self, input: &FrameInput);

    /// Stereo frames ready to be read.
    fn output_len(&self) -> usize;

    /// Move up to `out.len()` buffered frames into `out`, returning how many
    /// were written.
    fn read_output(&mut self, out: &mut [StereoFrame]) -> usize;

    /// Microphone input for the next frame. `None` means no signal.
    fn mic_input_frame(&mut self, samples: Option<&[i16]>);

    fn save_state(&mut self) -> Result<Vec<u8>, MachineError>;

    fn load_state(&mut self, data: &[u8]) -> Result<(), MachineError>;

    fn insert_cart(&mut self, rom: &RomImage) -> Result<(), MachineError>;

    fn eject_cart(&mut self);

    /// Replace the cartridge save with an external save file.
    fn import_save(&mut self, data: &[u8]) -> Result<(), MachineError>;

    fn set_cheats_enabled(&mut self, enabled: bool);
}

/// Creates machines for the worker.
pub trait MachineFactory: Send + 'static {
    fn boot_rom(
        &mut self,
        rom: &RomImage,
        ctx: &MachineContext,
    ) -> Result<Box<dyn Machine>, MachineError>;

    /// Boot into the firmware menu without a cartridge.
    fn boot_firmware(&mut self, ctx: &MachineContext) -> Result<Box<dyn Machine>, MachineError>;
}

/// Flag a machine raises to ask the frontend to stop it (e.g. the emulated
/// power button).
#[derive(Debug, Clone, Default)]
pub struct StopRequest(Arc<AtomicBool>);

impl StopRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Frontend services handed to a machine at boot.
#[derive(Clone)]
pub struct MachineContext {
    /// Save-write hook for the cartridge save.
    pub cart_save: SaveWriter,
    /// Save-write hook for the firmware image.
    pub firmware_save: SaveWriter,
    pub stop_request: StopRequest,
}

/// A ROM file loaded into memory.
#[derive(Debug, Clone)]
pub struct RomImage {
    pub data: Vec<u8>,
    pub path: PathBuf,
    pub dir: PathBuf,
    pub name: String,
}

impl RomImage {
    /// Load the first of `paths`.
    pub fn load(paths: &[PathBuf]) -> Result<Self, MachineError> {
        let path = paths.first().ok_or(MachineError::NoPath)?;
        let data = std::fs::read(path)?;
        debug!("Loaded ROM {} ({} bytes)", path.display(), data.len());
        Ok(Self::from_bytes(path, data))
    }

    pub fn from_bytes(path: &Path, data: Vec<u8>) -> Self {
        Self {
            data,
            path: path.to_path_buf(),
            dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

/// File name suffix distinguishing instances: empty for the first, `.2`
/// for the second, and so on.
pub fn instance_suffix(instance: usize) -> String {
    if instance == 0 {
        String::new()
    } else {
        format!(".{}", instance + 1)
    }
}

/// Cartridge save file for `rom` when run by `instance`.
pub fn cart_save_path(rom: &Path, instance: usize) -> PathBuf {
    let mut path = rom.with_extension("sav").into_os_string();
    path.push(instance_suffix(instance));
    PathBuf::from(path)
}
