//! Emulation worker and its command protocol
//!
//! # Architecture
//!
//! ```text
//! UI Thread                         Worker Thread
//!     │                                  │
//! [boot_rom]──(Envelope + reply)──►[drain queue]
//!     │ blocks on reply                  │ apply command
//!     │◄──────────(Result)───────────────┤
//!     │                            [poll hotkeys]
//!     │                            [run_frame]──►[AudioPipeline]
//!     │                            [sleep rest of frame / idle]
//! [status()]◄──(atomics)─────────────────┘
//! ```
//!
//! The worker is the only thread that touches the machine. State changes
//! happen only while processing commands (or hotkeys, which are applied the
//! same way), apart from `FrameStep` reverting to `Paused` after its frame
//! and machine stop requests turning into a stop.

mod handle;
mod message;
mod status;
mod thread;

pub use handle::{MAILBOX_CAPACITY, WorkerHandle, WorkerIo, WorkerOptions};
pub use message::Command;
pub use status::{EmuStatus, OSD_CAPACITY, PauseStack};
