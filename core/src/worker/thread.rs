//! The emulation worker loop
//!
//! Owns the machine exclusively. Each pass polls hotkeys, runs one frame if
//! running or frame-stepping, waits out the rest of the frame budget (or the
//! idle period), then drains every queued command.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::audio::AudioPipeline;
use crate::error::{MachineError, WorkerError};
use crate::input::{Hotkey, HotkeyEdges, InputState};
use crate::machine::{
    MIC_FRAME_LEN, Machine, MachineContext, MachineFactory, RomImage, StereoFrame, cart_save_path,
};
use crate::mic::MicInput;

use super::handle::{WorkerIo, WorkerOptions};
use super::message::{Command, Envelope, Reply};
use super::status::{EmuStatus, PauseStack, WorkerShared};

/// Frames moved from the machine to the audio buffer per read.
const OUTPUT_CHUNK: usize = 1024;

/// Machine snapshot taken before a savestate load.
struct StateBackup {
    data: Vec<u8>,
    save_path: Option<PathBuf>,
}

pub(super) struct EmuWorker {
    id: usize,
    options: WorkerOptions,
    rx: Receiver<Envelope>,
    shared: Arc<WorkerShared>,
    factory: Box<dyn MachineFactory>,
    machine: Option<Box<dyn Machine>>,
    ctx: MachineContext,
    audio: Arc<AudioPipeline>,
    mic: Arc<MicInput>,
    input: Arc<InputState>,

    status: EmuStatus,
    pause: PauseStack,
    active: bool,
    hotkeys: HotkeyEdges,
    fast_forward_latched: bool,
    fast_forward: bool,
    backup: Option<StateBackup>,
    /// Frame-step callers waiting for their frame to run, in arrival order.
    pending_steps: VecDeque<SyncSender<Reply>>,

    output: Vec<StereoFrame>,
    mic_frame: [i16; MIC_FRAME_LEN],
}

impl EmuWorker {
    pub fn new(
        options: WorkerOptions,
        rx: Receiver<Envelope>,
        shared: Arc<WorkerShared>,
        factory: Box<dyn MachineFactory>,
        io: WorkerIo,
    ) -> Self {
        Self {
            id: options.instance,
            options,
            rx,
            shared,
            factory,
            machine: None,
            ctx: io.context,
            audio: io.audio,
            mic: io.mic,
            input: io.input,
            status: EmuStatus::Paused,
            pause: PauseStack::default(),
            active: false,
            hotkeys: HotkeyEdges::default(),
            fast_forward_latched: false,
            fast_forward: false,
            backup: None,
            pending_steps: VecDeque::new(),
            output: vec![[0, 0]; OUTPUT_CHUNK],
            mic_frame: [0; MIC_FRAME_LEN],
        }
    }

    pub fn run(mut self) {
        debug!("Emulation worker {} started", self.id);
        self.publish();

        while self.shared.running.load(Ordering::Acquire) {
            self.poll_hotkeys();

            if self.ctx.stop_request.take() {
                info!("Machine requested stop");
                self.apply(&Command::Stop { external: false })
                    .unwrap_or_else(|e| warn!("Stop request failed: {}", e));
                self.settle();
            }

            let first = if self.status.runs_frame() {
                let started = Instant::now();
                self.run_frame();

                // One frame per queued step; the last one leaves the worker paused.
                let step = if self.status == EmuStatus::FrameStep {
                    let reply = self.pending_steps.pop_front();
                    if self.pending_steps.is_empty() {
                        self.status = EmuStatus::Paused;
                    }
                    reply
                } else {
                    None
                };
                self.publish();
                if let Some(reply) = step {
                    let _ = reply.send(Ok(()));
                }

                if !self.fast_forward {
                    let budget = self.options.frame_period.saturating_sub(started.elapsed());
                    if !budget.is_zero() {
                        thread::sleep(budget);
                    }
                }
                self.rx.try_recv().map_err(|e| match e {
                    TryRecvError::Empty => RecvTimeoutError::Timeout,
                    TryRecvError::Disconnected => RecvTimeoutError::Disconnected,
                })
            } else {
                self.rx.recv_timeout(self.options.idle_period)
            };

            match first {
                Ok(envelope) => self.handle(envelope),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
            while let Ok(envelope) = self.rx.try_recv() {
                self.handle(envelope);
            }
        }

        self.shutdown();
    }

    fn publish(&self) {
        self.shared.publish(self.status, &self.pause, self.active);
    }

    fn handle(&mut self, envelope: Envelope) {
        if self.status == EmuStatus::Exiting {
            debug!("Ignoring {:?}: worker is exiting", envelope.command);
            envelope.respond(Err(WorkerError::Exiting));
            return;
        }

        let result = self.apply(&envelope.command);
        if let Err(e) = &result {
            debug!("{:?} failed: {}", envelope.command, e);
        }

        // Publish before answering so the caller sees the new state.
        if envelope.command == Command::FrameStep && result.is_ok() {
            self.pending_steps.extend(envelope.reply);
            self.settle();
        } else {
            self.settle();
            envelope.respond(result);
        }
    }

    /// Publish the new state and answer frame steps that will no longer run.
    fn settle(&mut self) {
        match self.status {
            EmuStatus::FrameStep => {}
            EmuStatus::Exiting => self.answer_steps(true),
            _ => self.answer_steps(false),
        }
        self.publish();
    }

    fn answer_steps(&mut self, exiting: bool) {
        for reply in self.pending_steps.drain(..) {
            let _ = reply.send(if exiting {
                Err(WorkerError::Exiting)
            } else {
                Ok(())
            });
        }
    }

    fn apply(&mut self, command: &Command) -> Reply {
        match command {
            Command::Run => {
                self.status = EmuStatus::Running;
                self.pause.clear();
                self.active = true;
                self.audio.refresh_mute();
                self.audio.enable();
                debug!("Instance {} running", self.id);
            }
            Command::Pause => self.pause(),
            Command::Unpause => self.unpause(),
            Command::Stop { external } => {
                if *external {
                    if let Some(machine) = self.machine.as_mut() {
                        machine.stop();
                    }
                }
                self.status = EmuStatus::Paused;
                self.active = false;
                self.audio.disable();
                debug!("Instance {} stopped (external: {})", self.id, external);
            }
            Command::FrameStep => {
                if self.pause.depth() == 0 {
                    self.pause();
                }
                self.status = EmuStatus::FrameStep;
            }
            Command::Reset => {
                let machine = self.machine.as_mut().ok_or(MachineError::NoMachine)?;
                machine.reset();
                self.status = EmuStatus::Running;
                self.pause.clear();
                self.active = true;
                self.audio.refresh_mute();
                self.audio.enable();
                self.shared.push_osd(self.id, "Reset");
            }
            Command::Exit => {
                self.status = EmuStatus::Exiting;
                self.pause.clear();
                self.audio.disable();
                debug!("Instance {} exiting", self.id);
            }
            Command::BootRom(paths) => self.boot_rom(paths)?,
            Command::BootFirmware => self.boot_firmware()?,
            Command::InsertCart(paths) => self.insert_cart(paths)?,
            Command::EjectCart => {
                if let Some(machine) = self.machine.as_mut() {
                    machine.eject_cart();
                }
                self.retarget_cart_save(None);
            }
            Command::SaveState(path) => self.save_state(path)?,
            Command::LoadState(path) => self.load_state(path)?,
            Command::UndoStateLoad => self.undo_state_load()?,
            Command::ImportSavefile(path) => {
                let machine = self.machine.as_mut().ok_or(MachineError::NoMachine)?;
                let data = std::fs::read(path).map_err(MachineError::from)?;
                machine.import_save(&data)?;
                info!("Imported save file {}", path.display());
            }
            Command::EnableCheats(enabled) => {
                if let Some(machine) = self.machine.as_mut() {
                    machine.set_cheats_enabled(*enabled);
                }
            }
        }
        Ok(())
    }

    fn pause(&mut self) {
        let previous = self.status;
        if !self.pause.push(previous) {
            return;
        }
        self.status = EmuStatus::Paused;
        if previous != EmuStatus::Paused {
            self.audio.disable();
            self.audio.refresh_mute();
            self.shared.push_osd(self.id, "Paused");
        }
    }

    fn unpause(&mut self) {
        let Some(restored) = self.pause.pop() else {
            return;
        };
        self.status = restored;
        if restored != EmuStatus::Paused {
            self.audio.refresh_mute();
            self.audio.enable();
            self.shared.push_osd(self.id, "Resumed");
        }
    }

    /// Flush the current cartridge save and point it somewhere else.
    /// Returns the previous path.
    fn retarget_cart_save(&self, path: Option<PathBuf>) -> Option<PathBuf> {
        let previous = self.ctx.cart_save.path();
        if !self.ctx.cart_save.check_flush() {
            debug!("Pending cartridge save could not be written before switching");
        }
        self.ctx.cart_save.set_path(path);
        previous
    }

    fn install(&mut self, mut machine: Box<dyn Machine>) {
        if let Some(mut old) = self.machine.take() {
            old.stop();
        }
        machine.start();
        self.machine = Some(machine);
        self.backup = None;
    }

    fn boot_rom(&mut self, paths: &[PathBuf]) -> Result<(), MachineError> {
        let rom = RomImage::load(paths)?;
        let previous = self.retarget_cart_save(Some(cart_save_path(&rom.path, self.id)));
        match self.factory.boot_rom(&rom, &self.ctx) {
            Ok(machine) => {
                self.install(machine);
                info!("Booted {}", rom.name);
                Ok(())
            }
            Err(e) => {
                self.ctx.cart_save.set_path(previous);
                warn!("Failed to boot {}: {}", rom.path.display(), e);
                Err(e)
            }
        }
    }

    fn boot_firmware(&mut self) -> Result<(), MachineError> {
        let previous = self.retarget_cart_save(None);
        match self.factory.boot_firmware(&self.ctx) {
            Ok(machine) => {
                self.install(machine);
                info!("Booted firmware");
                Ok(())
            }
            Err(e) => {
                self.ctx.cart_save.set_path(previous);
                warn!("Failed to boot firmware: {}", e);
                Err(e)
            }
        }
    }

    fn insert_cart(&mut self, paths: &[PathBuf]) -> Result<(), MachineError> {
        if self.machine.is_none() {
            return Err(MachineError::NoMachine);
        }
        let rom = RomImage::load(paths)?;
        let previous = self.retarget_cart_save(Some(cart_save_path(&rom.path, self.id)));
        let result = self
            .machine
            .as_mut()
            .map_or(Err(MachineError::NoMachine), |machine| machine.insert_cart(&rom));
        match result {
            Ok(()) => {
                info!("Inserted {}", rom.name);
                Ok(())
            }
            Err(e) => {
                self.ctx.cart_save.set_path(previous);
                Err(e)
            }
        }
    }

    fn save_state(&mut self, path: &Path) -> Result<(), MachineError> {
        let machine = self.machine.as_mut().ok_or(MachineError::NoMachine)?;
        let data = machine.save_state()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, &data)?;
        info!("Saved state to {} ({} bytes)", path.display(), data.len());
        Ok(())
    }

    fn load_state(&mut self, path: &Path) -> Result<(), MachineError> {
        let machine = self.machine.as_mut().ok_or(MachineError::NoMachine)?;

        if self.active {
            match machine.save_state() {
                Ok(data) => {
                    self.backup = Some(StateBackup {
                        data,
                        save_path: self.ctx.cart_save.path(),
                    });
                }
                Err(e) => {
                    warn!("Could not back up state before loading: {}", e);
                    self.backup = None;
                }
            }
        }

        let data = std::fs::read(path)?;
        machine.load_state(&data)?;
        info!("Loaded state from {}", path.display());
        Ok(())
    }

    fn undo_state_load(&mut self) -> Result<(), WorkerError> {
        let machine = self.machine.as_mut().ok_or(MachineError::NoMachine)?;
        let backup = self.backup.take().ok_or(WorkerError::NothingToUndo)?;
        machine.load_state(&backup.data)?;
        if backup.save_path.is_some() {
            self.ctx.cart_save.set_path(backup.save_path);
        }
        info!("Undid state load");
        Ok(())
    }

    fn poll_hotkeys(&mut self) {
        self.hotkeys.update(self.input.hotkeys_down());
        if self.status == EmuStatus::Exiting {
            return;
        }

        if self.hotkeys.pressed(Hotkey::PAUSE) {
            if self.status == EmuStatus::Paused {
                self.unpause();
            } else {
                self.pause();
            }
        }
        if self.hotkeys.pressed(Hotkey::RESET) {
            if let Err(e) = self.apply(&Command::Reset) {
                debug!("Reset hotkey ignored: {}", e);
            }
        }
        if self.hotkeys.pressed(Hotkey::POWER_BUTTON) && self.active {
            info!("Power button pressed");
            // Cannot fail.
            let _ = self.apply(&Command::Stop { external: true });
        }
        if self.hotkeys.pressed(Hotkey::FRAME_STEP) {
            // Cannot fail.
            let _ = self.apply(&Command::FrameStep);
        }

        if self.hotkeys.pressed(Hotkey::FAST_FORWARD_TOGGLE) {
            self.fast_forward_latched = !self.fast_forward_latched;
        }
        self.fast_forward =
            self.hotkeys.down(Hotkey::FAST_FORWARD) || self.fast_forward_latched;

        if self.hotkeys.pressed(Hotkey::VOLUME_UP) {
            let volume = self.audio.step_volume(true);
            self.shared.push_osd(self.id, &format!("Volume: {}", volume));
        }
        if self.hotkeys.pressed(Hotkey::VOLUME_DOWN) {
            let volume = self.audio.step_volume(false);
            self.shared.push_osd(self.id, &format!("Volume: {}", volume));
        }

        self.settle();
    }

    fn run_frame(&mut self) {
        let Some(machine) = self.machine.as_mut() else {
            return;
        };

        let mic_held = self.hotkeys.down(Hotkey::MIC);
        let signal = self.mic.fill_frame(mic_held, &mut self.mic_frame);
        machine.mic_input_frame(signal.then_some(&self.mic_frame[..]));

        machine.run_frame(&self.input.frame_input());

        while machine.output_len() > 0 {
            let read = machine.read_output(&mut self.output);
            if read == 0 {
                break;
            }
            self.audio.push(&self.output[..read]);
        }

        self.shared.frame_executed();
        self.audio.sync();
    }

    fn shutdown(&mut self) {
        if let Some(mut machine) = self.machine.take() {
            machine.stop();
        }
        self.audio.disable();
        self.active = false;
        self.status = EmuStatus::Exiting;
        self.answer_steps(true);
        self.publish();
        debug!("Emulation worker {} finished", self.id);
    }
}
