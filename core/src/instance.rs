//! One emulator instance and everything it owns

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::audio::{AudioPipeline, MuteState};
#[cfg(feature = "device")]
use crate::audio::{CaptureDevice, OutputDevice};
use crate::clock::SystemClock;
use crate::config::Config;
#[cfg(feature = "device")]
use crate::error::DeviceError;
use crate::error::WorkerError;
use crate::input::InputState;
use crate::machine::{MachineContext, MachineFactory, StopRequest};
use crate::mic::MicInput;
#[cfg(feature = "device")]
use crate::mic::MicInputMode;
use crate::save_flush::SaveFlusher;
use crate::worker::{WorkerHandle, WorkerIo, WorkerOptions};

/// Identifies an instance inside an [`InstanceRegistry`](crate::registry::InstanceRegistry).
pub type InstanceId = usize;

/// A worker plus the audio, microphone, input and save state it runs with.
///
/// Fields drop in declaration order: the worker is stopped and joined
/// before the devices close and before the flushers write their last image.
pub struct EmuInstance {
    worker: WorkerHandle,
    #[cfg(feature = "device")]
    output: Option<OutputDevice>,
    #[cfg(feature = "device")]
    capture: Option<CaptureDevice>,
    cart_flusher: SaveFlusher,
    firmware_flusher: SaveFlusher,
    audio: Arc<AudioPipeline>,
    mic: Arc<MicInput>,
    input: Arc<InputState>,
    pause_on_focus_loss: bool,
    focus_paused: bool,
}

impl EmuInstance {
    /// Spawn the worker and flush threads. No devices are opened.
    pub fn new(
        id: InstanceId,
        config: &Config,
        factory: Box<dyn MachineFactory>,
        mute: Arc<MuteState>,
        firmware_save: Option<PathBuf>,
    ) -> Self {
        let timing = config.save.timing();
        let cart_flusher = SaveFlusher::spawn(None, timing, Arc::new(SystemClock));
        let firmware_flusher = SaveFlusher::spawn(firmware_save, timing, Arc::new(SystemClock));

        let audio = Arc::new(AudioPipeline::new(id, &config.audio, &config.emu, mute));
        let mic = Arc::new(MicInput::new(config.mic.input, config.mic.wav_path.as_deref()));
        let input = Arc::new(InputState::new());

        let io = WorkerIo {
            audio: audio.clone(),
            mic: mic.clone(),
            input: input.clone(),
            context: MachineContext {
                cart_save: cart_flusher.writer().clone(),
                firmware_save: firmware_flusher.writer().clone(),
                stop_request: StopRequest::new(),
            },
        };
        let worker = WorkerHandle::start(WorkerOptions::from_config(id, &config.emu), factory, io);
        debug!("Created emulator instance {}", id);

        Self {
            worker,
            #[cfg(feature = "device")]
            output: None,
            #[cfg(feature = "device")]
            capture: None,
            cart_flusher,
            firmware_flusher,
            audio,
            mic,
            input,
            pause_on_focus_loss: config.emu.pause_on_focus_loss,
            focus_paused: false,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.worker.instance()
    }

    pub fn worker(&self) -> &WorkerHandle {
        &self.worker
    }

    pub fn audio(&self) -> &Arc<AudioPipeline> {
        &self.audio
    }

    pub fn mic(&self) -> &Arc<MicInput> {
        &self.mic
    }

    pub fn input(&self) -> &Arc<InputState> {
        &self.input
    }

    pub fn cart_flusher(&self) -> &SaveFlusher {
        &self.cart_flusher
    }

    pub fn firmware_flusher(&self) -> &SaveFlusher {
        &self.firmware_flusher
    }

    /// Open the output device, and the capture device when the mic is in
    /// external mode. A capture failure only disables the microphone.
    #[cfg(feature = "device")]
    pub fn open_devices(&mut self, config: &Config) -> Result<(), DeviceError> {
        self.output = Some(OutputDevice::open(&self.audio, &config.audio)?);

        if config.mic.input == MicInputMode::External {
            match CaptureDevice::open(self.mic.clone(), config.mic.device.as_deref()) {
                Ok(capture) => self.capture = Some(capture),
                Err(e) => warn!("Microphone unavailable: {}", e),
            }
        }
        Ok(())
    }

    /// Whether an output device is attached.
    #[cfg(feature = "device")]
    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Pause for as long as the window is unfocused, if configured to.
    pub fn focus_lost(&mut self) {
        if !self.pause_on_focus_loss || self.focus_paused {
            return;
        }
        match self.worker.pause() {
            Ok(()) => self.focus_paused = true,
            Err(e) => warn!("Instance {}: focus pause failed: {}", self.id(), e),
        }
    }

    /// Undo the pause taken by [`EmuInstance::focus_lost`].
    pub fn focus_gained(&mut self) {
        if !self.focus_paused {
            return;
        }
        self.focus_paused = false;
        if let Err(e) = self.worker.unpause() {
            warn!("Instance {}: focus resume failed: {}", self.id(), e);
        }
    }

    pub fn is_focus_paused(&self) -> bool {
        self.focus_paused
    }

    pub fn pause(&self) -> Result<(), WorkerError> {
        self.worker.pause()
    }

    pub fn unpause(&self) -> Result<(), WorkerError> {
        self.worker.unpause()
    }

    pub fn refresh_mute(&self) {
        self.audio.refresh_mute();
    }
}

impl Drop for EmuInstance {
    fn drop(&mut self) {
        debug!("Destroying emulator instance {}", self.id());
    }
}
