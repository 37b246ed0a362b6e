//! Commands accepted by the emulation worker

use std::path::PathBuf;
use std::sync::mpsc::SyncSender;

use crate::error::WorkerError;

/// Commands are processed in the order they were sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Clear the pause stack and run.
    Run,
    Pause,
    Unpause,
    /// Stop emulation. `external` requests come from outside the machine
    /// and also stop the machine itself.
    Stop { external: bool },
    /// Pause if not already paused, then run a single frame.
    FrameStep,
    Reset,
    Exit,
    BootRom(Vec<PathBuf>),
    /// Boot to the firmware menu.
    BootFirmware,
    InsertCart(Vec<PathBuf>),
    EjectCart,
    SaveState(PathBuf),
    LoadState(PathBuf),
    UndoStateLoad,
    ImportSavefile(PathBuf),
    EnableCheats(bool),
}

pub(crate) type Reply = Result<(), WorkerError>;

/// A command plus, for synchronous callers, where to send the result.
pub(crate) struct Envelope {
    pub command: Command,
    pub reply: Option<SyncSender<Reply>>,
}

impl Envelope {
    /// Answer the caller, if one is waiting.
    pub fn respond(self, result: Reply) {
        if let Some(reply) = self.reply {
            // The caller may have given up; nothing to do then.
            let _ = reply.send(result);
        }
    }
}
