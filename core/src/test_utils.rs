//! Shared test utilities for unit tests

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::audio::{AudioPipeline, MuteState};
use crate::config::{AudioConfig, EmuConfig};
use crate::error::MachineError;
use crate::input::{FrameInput, InputState};
use crate::machine::{Machine, MachineContext, MachineFactory, RomImage, StereoFrame, StopRequest};
use crate::mic::{MicInput, MicInputMode};
use crate::save_flush::SaveFlusher;
use crate::worker::{WorkerHandle, WorkerIo, WorkerOptions};

// ============================================================================
// Test Machine
// ============================================================================

/// Everything a [`TestMachine`] has been asked to do.
#[derive(Debug, Default)]
pub struct MachineLog {
    pub boots: Vec<String>,
    pub frames: u64,
    pub starts: u32,
    pub stops: u32,
    pub resets: u32,
    /// Opaque machine state; savestates capture and restore it.
    pub state: Vec<u8>,
    pub carts: Vec<String>,
    pub ejects: u32,
    pub imported: Vec<Vec<u8>>,
    pub cheats: Option<bool>,
    pub mic_frames: u64,
    pub null_mic_frames: u64,
    pub last_input: Option<FrameInput>,
}

pub type SharedLog = Arc<Mutex<MachineLog>>;

pub fn lock(log: &SharedLog) -> MutexGuard<'_, MachineLog> {
    log.lock().unwrap_or_else(|e| e.into_inner())
}

/// Machine that records calls and emits a fixed number of samples per frame.
pub struct TestMachine {
    log: SharedLog,
    ctx: MachineContext,
    samples_per_frame: usize,
    pending: usize,
    save_every: Option<u64>,
}

impl Machine for TestMachine {
    fn start(&mut self) {
        lock(&self.log).starts += 1;
    }

    fn stop(&mut self) {
        lock(&self.log).stops += 1;
    }

    fn reset(&mut self) {
        lock(&self.log).resets += 1;
    }

    fn run_frame(&mut self, input: &FrameInput) {
        let frames = {
            let mut log = lock(&self.log);
            log.frames += 1;
            log.last_input = Some(*input);
            log.frames
        };
        self.pending += self.samples_per_frame;

        if let Some(every) = self.save_every {
            if frames % every == 0 {
                let image = vec![frames as u8; 64];
                self.ctx.cart_save.request_flush(&image, 0, 4);
            }
        }
    }

    fn output_len(&self) -> usize {
        self.pending
    }

    fn read_output(&mut self, out: &mut [StereoFrame]) -> usize {
        let n = self.pending.min(out.len());
        out[..n].fill([1000, -1000]);
        self.pending -= n;
        n
    }

    fn mic_input_frame(&mut self, samples: Option<&[i16]>) {
        let mut log = lock(&self.log);
        match samples {
            Some(_) => log.mic_frames += 1,
            None => log.null_mic_frames += 1,
        }
    }

    fn save_state(&mut self) -> Result<Vec<u8>, MachineError> {
        Ok(lock(&self.log).state.clone())
    }

    fn load_state(&mut self, data: &[u8]) -> Result<(), MachineError> {
        if data.starts_with(b"BAD") {
            return Err(MachineError::InvalidState("corrupt header".into()));
        }
        lock(&self.log).state = data.to_vec();
        Ok(())
    }

    fn insert_cart(&mut self, rom: &RomImage) -> Result<(), MachineError> {
        if rom.data.starts_with(b"BAD") {
            return Err(MachineError::Boot(format!("{} is not a cartridge", rom.name)));
        }
        lock(&self.log).carts.push(rom.name.clone());
        Ok(())
    }

    fn eject_cart(&mut self) {
        lock(&self.log).ejects += 1;
    }

    fn import_save(&mut self, data: &[u8]) -> Result<(), MachineError> {
        lock(&self.log).imported.push(data.to_vec());
        Ok(())
    }

    fn set_cheats_enabled(&mut self, enabled: bool) {
        lock(&self.log).cheats = Some(enabled);
    }
}

/// Factory for [`TestMachine`]s. ROMs whose contents start with `BAD` fail
/// to boot, as does firmware while `fail_firmware` is set.
#[derive(Clone, Default)]
pub struct TestFactory {
    pub log: SharedLog,
    pub samples_per_frame: usize,
    pub save_every: Option<u64>,
    pub fail_firmware: Arc<AtomicBool>,
}

impl TestFactory {
    fn build(&self, name: &str, ctx: &MachineContext) -> Box<dyn Machine> {
        let mut log = lock(&self.log);
        log.boots.push(name.to_string());
        log.state = format!("boot:{}", name).into_bytes();
        Box::new(TestMachine {
            log: self.log.clone(),
            ctx: ctx.clone(),
            samples_per_frame: self.samples_per_frame,
            pending: 0,
            save_every: self.save_every,
        })
    }
}

impl MachineFactory for TestFactory {
    fn boot_rom(
        &mut self,
        rom: &RomImage,
        ctx: &MachineContext,
    ) -> Result<Box<dyn Machine>, MachineError> {
        if rom.data.starts_with(b"BAD") {
            return Err(MachineError::Boot(format!("{} is not a valid ROM", rom.name)));
        }
        Ok(self.build(&rom.name, ctx))
    }

    fn boot_firmware(&mut self, ctx: &MachineContext) -> Result<Box<dyn Machine>, MachineError> {
        if self.fail_firmware.load(Ordering::Acquire) {
            return Err(MachineError::Boot("firmware not found".into()));
        }
        Ok(self.build("firmware", ctx))
    }
}

// ============================================================================
// Worker Harness
// ============================================================================

/// A worker wired to a [`TestFactory`] with fast pacing and no devices.
pub struct TestWorker {
    pub handle: WorkerHandle,
    pub log: SharedLog,
    pub factory: TestFactory,
    pub audio: Arc<AudioPipeline>,
    pub input: Arc<InputState>,
    pub stop_request: StopRequest,
    pub cart_flusher: SaveFlusher,
    pub firmware_flusher: SaveFlusher,
    pub dir: tempfile::TempDir,
}

impl TestWorker {
    pub fn new() -> Self {
        Self::with_factory(TestFactory::default())
    }

    pub fn with_factory(factory: TestFactory) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let emu = EmuConfig::default();
        let audio = Arc::new(AudioPipeline::new(
            0,
            &AudioConfig::default(),
            &emu,
            Arc::new(MuteState::default()),
        ));
        let input = Arc::new(InputState::new());
        let stop_request = StopRequest::new();
        let cart_flusher = SaveFlusher::new(None);
        let firmware_flusher = SaveFlusher::new(None);

        let io = WorkerIo {
            audio: audio.clone(),
            mic: Arc::new(MicInput::new(MicInputMode::Silence, None)),
            input: input.clone(),
            context: MachineContext {
                cart_save: cart_flusher.writer().clone(),
                firmware_save: firmware_flusher.writer().clone(),
                stop_request: stop_request.clone(),
            },
        };
        let options = WorkerOptions {
            instance: 0,
            frame_period: Duration::from_millis(2),
            idle_period: Duration::from_millis(5),
        };

        Self {
            handle: WorkerHandle::start(options, Box::new(factory.clone()), io),
            log: factory.log.clone(),
            factory,
            audio,
            input,
            stop_request,
            cart_flusher,
            firmware_flusher,
            dir,
        }
    }

    /// Write a ROM file into the temp dir and return its path.
    pub fn rom(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Boot a valid ROM called `name`.
    pub fn boot(&self, name: &str) -> PathBuf {
        let path = self.rom(name, b"ROM");
        self.handle.boot_rom(&[path.clone()]).unwrap();
        path
    }

    pub fn frames(&self) -> u64 {
        lock(&self.log).frames
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
