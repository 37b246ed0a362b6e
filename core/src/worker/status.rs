//! Worker state machine and the status mirror read by other threads

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::{info, warn};

/// OSD messages kept until the UI collects them.
pub const OSD_CAPACITY: usize = 16;

/// The worker's single state variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EmuStatus {
    Running = 0,
    Paused = 1,
    /// Run exactly one frame, then become `Paused`.
    FrameStep = 2,
    Exiting = 3,
}

impl EmuStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EmuStatus::Running,
            2 => EmuStatus::FrameStep,
            3 => EmuStatus::Exiting,
            _ => EmuStatus::Paused,
        }
    }

    /// Whether the loop executes a frame in this state.
    pub fn runs_frame(self) -> bool {
        matches!(self, EmuStatus::Running | EmuStatus::FrameStep)
    }
}

/// Nested pause requests.
///
/// Only the first push actually pauses and only the matching last pop
/// resumes, restoring whatever status was current before the first push.
#[derive(Debug, Clone, Copy)]
pub struct PauseStack {
    depth: u32,
    saved: EmuStatus,
}

impl Default for PauseStack {
    fn default() -> Self {
        Self {
            depth: 0,
            saved: EmuStatus::Paused,
        }
    }
}

impl PauseStack {
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Add a pause request. Returns true if this one crossed the threshold,
    /// in which case `current` is saved for the matching resume.
    pub fn push(&mut self, current: EmuStatus) -> bool {
        self.depth += 1;
        if self.depth > 1 {
            return false;
        }
        self.saved = current;
        true
    }

    /// Drop a pause request. Returns the status to restore once the last
    /// request is gone; unbalanced pops are ignored.
    pub fn pop(&mut self) -> Option<EmuStatus> {
        if self.depth == 0 {
            return None;
        }
        self.depth -= 1;
        if self.depth > 0 {
            return None;
        }
        Some(self.saved)
    }

    /// Back to the running baseline.
    pub fn clear(&mut self) {
        self.depth = 0;
    }
}

/// Worker state mirrored for the UI thread.
pub(crate) struct WorkerShared {
    pub running: AtomicBool,
    status: AtomicU8,
    pause_depth: AtomicU32,
    active: AtomicBool,
    frames: AtomicU64,
    osd: Mutex<VecDeque<String>>,
}

impl WorkerShared {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            status: AtomicU8::new(EmuStatus::Paused as u8),
            pause_depth: AtomicU32::new(0),
            active: AtomicBool::new(false),
            frames: AtomicU64::new(0),
            osd: Mutex::new(VecDeque::with_capacity(OSD_CAPACITY)),
        }
    }

    pub fn publish(&self, status: EmuStatus, pause: &PauseStack, active: bool) {
        self.status.store(status as u8, Ordering::Release);
        self.pause_depth.store(pause.depth(), Ordering::Release);
        self.active.store(active, Ordering::Release);
    }

    pub fn status(&self) -> EmuStatus {
        EmuStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn pause_depth(&self) -> u32 {
        self.pause_depth.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn frame_executed(&self) {
        self.frames.fetch_add(1, Ordering::AcqRel);
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    fn osd(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.osd.lock().unwrap_or_else(|e| {
            warn!("OSD queue mutex poisoned; continuing");
            e.into_inner()
        })
    }

    pub fn push_osd(&self, instance: usize, message: &str) {
        info!("[instance {}] {}", instance, message);
        let mut osd = self.osd();
        if osd.len() == OSD_CAPACITY {
            osd.pop_front();
        }
        osd.push_back(message.to_string());
    }

    pub fn take_osd(&self) -> Vec<String> {
        self.osd().drain(..).collect()
    }
}
