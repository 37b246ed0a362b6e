//! UI-side handle to an emulation worker
//!
//! Every synchronous wrapper enqueues one command and blocks until the
//! worker has answered it. If the worker is gone the call fails with
//! [`WorkerError::Disconnected`] instead of blocking forever.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::audio::AudioPipeline;
use crate::config::EmuConfig;
use crate::error::WorkerError;
use crate::input::InputState;
use crate::machine::{MachineContext, MachineFactory};
use crate::mic::MicInput;

use super::message::{Command, Envelope};
use super::status::{EmuStatus, WorkerShared};
use super::thread::EmuWorker;

/// Commands that can be queued before senders block.
pub const MAILBOX_CAPACITY: usize = 64;

/// Pacing for one worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    pub instance: usize,
    /// Real-time budget per emulated frame.
    pub frame_period: Duration,
    /// Sleep between loop passes while not running.
    pub idle_period: Duration,
}

impl WorkerOptions {
    pub fn from_config(instance: usize, emu: &EmuConfig) -> Self {
        Self {
            instance,
            frame_period: emu.frame_period(),
            idle_period: emu.idle_period(),
        }
    }
}

/// Everything the worker shares with the rest of the instance.
pub struct WorkerIo {
    pub audio: Arc<AudioPipeline>,
    pub mic: Arc<MicInput>,
    pub input: Arc<InputState>,
    pub context: MachineContext,
}

/// Handle to a running emulation worker.
///
/// Dropping the handle stops the worker and joins its thread.
pub struct WorkerHandle {
    instance: usize,
    tx: Option<SyncSender<Envelope>>,
    handle: Option<JoinHandle<()>>,
    shared: Arc<WorkerShared>,
}

impl WorkerHandle {
    /// Spawn the worker thread. No machine is loaded until a boot command.
    pub fn start(options: WorkerOptions, factory: Box<dyn MachineFactory>, io: WorkerIo) -> Self {
        let (tx, rx) = mpsc::sync_channel::<Envelope>(MAILBOX_CAPACITY);
        let shared = Arc::new(WorkerShared::new());

        let worker = EmuWorker::new(options, rx, shared.clone(), factory, io);
        let handle = thread::Builder::new()
            .name(format!("emu-worker-{}", options.instance))
            .spawn(move || worker.run())
            .expect("failed to spawn emulation worker thread");

        Self {
            instance: options.instance,
            tx: Some(tx),
            handle: Some(handle),
            shared,
        }
    }

    pub fn instance(&self) -> usize {
        self.instance
    }

    /// Queue a command without waiting for it to be processed.
    pub fn enqueue(&self, command: Command) -> Result<(), WorkerError> {
        self.send(Envelope {
            command,
            reply: None,
        })
    }

    fn send(&self, envelope: Envelope) -> Result<(), WorkerError> {
        let tx = self.tx.as_ref().ok_or(WorkerError::Disconnected)?;
        tx.send(envelope).map_err(|_| WorkerError::Disconnected)
    }

    /// Queue a command and block until the worker answers it.
    pub fn call(&self, command: Command) -> Result<(), WorkerError> {
        let (reply, response) = mpsc::sync_channel(1);
        self.send(Envelope {
            command,
            reply: Some(reply),
        })?;
        response.recv().map_err(|_| WorkerError::Disconnected)?
    }

    pub fn boot_rom(&self, paths: &[PathBuf]) -> Result<(), WorkerError> {
        self.call(Command::BootRom(paths.to_vec()))
    }

    /// Boot to the firmware menu.
    pub fn boot_firmware(&self) -> Result<(), WorkerError> {
        self.call(Command::BootFirmware)
    }

    pub fn insert_cart(&self, paths: &[PathBuf]) -> Result<(), WorkerError> {
        self.call(Command::InsertCart(paths.to_vec()))
    }

    pub fn eject_cart(&self) -> Result<(), WorkerError> {
        self.call(Command::EjectCart)
    }

    pub fn save_state(&self, path: &Path) -> Result<(), WorkerError> {
        self.call(Command::SaveState(path.to_path_buf()))
    }

    pub fn load_state(&self, path: &Path) -> Result<(), WorkerError> {
        self.call(Command::LoadState(path.to_path_buf()))
    }

    /// Restore the state from before the last savestate load.
    pub fn undo_state_load(&self) -> Result<(), WorkerError> {
        self.call(Command::UndoStateLoad)
    }

    pub fn import_savefile(&self, path: &Path) -> Result<(), WorkerError> {
        self.call(Command::ImportSavefile(path.to_path_buf()))
    }

    pub fn enable_cheats(&self, enabled: bool) -> Result<(), WorkerError> {
        self.call(Command::EnableCheats(enabled))
    }

    pub fn reset(&self) -> Result<(), WorkerError> {
        self.call(Command::Reset)
    }

    pub fn run(&self) -> Result<(), WorkerError> {
        self.call(Command::Run)
    }

    pub fn pause(&self) -> Result<(), WorkerError> {
        self.call(Command::Pause)
    }

    pub fn unpause(&self) -> Result<(), WorkerError> {
        self.call(Command::Unpause)
    }

    pub fn toggle_pause(&self) -> Result<(), WorkerError> {
        if self.is_paused() {
            self.unpause()
        } else {
            self.pause()
        }
    }

    /// Run exactly one frame, leaving the worker paused. Returns after the
    /// frame has executed.
    pub fn frame_step(&self) -> Result<(), WorkerError> {
        self.call(Command::FrameStep)
    }

    /// Stop emulation; `external` also stops the machine.
    pub fn stop_emulation(&self, external: bool) -> Result<(), WorkerError> {
        self.call(Command::Stop { external })
    }

    /// Enter the terminal state. Later commands fail with
    /// [`WorkerError::Exiting`].
    pub fn exit(&self) -> Result<(), WorkerError> {
        self.call(Command::Exit)
    }

    pub fn status(&self) -> EmuStatus {
        self.shared.status()
    }

    pub fn is_running(&self) -> bool {
        self.status() == EmuStatus::Running
    }

    pub fn is_paused(&self) -> bool {
        self.status() == EmuStatus::Paused
    }

    /// Whether a machine has been started and not stopped since.
    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    pub fn pause_depth(&self) -> u32 {
        self.shared.pause_depth()
    }

    /// Frames executed since the worker started.
    pub fn frames(&self) -> u64 {
        self.shared.frames()
    }

    /// Collect queued on-screen notifications.
    pub fn take_osd_messages(&self) -> Vec<String> {
        self.shared.take_osd()
    }

    pub fn is_alive(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Ask the worker to exit. Queued commands are still drained; waiting
    /// callers of anything left over get [`WorkerError::Disconnected`].
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        // Dropping the sender wakes the worker out of its idle wait.
        drop(self.tx.take());
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Emulation worker {} panicked", self.instance);
            } else {
                debug!("Emulation worker {} joined", self.instance);
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}
