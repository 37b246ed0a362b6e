//! Multi-instance mute policy
//!
//! With a single instance nothing is ever muted. Once two or more run at
//! once, [`MuteMode`] decides which of them reach the speakers.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

const NO_FOCUS: usize = usize::MAX;

/// Which instances are audible when several run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MuteMode {
    /// Every instance is audible.
    #[default]
    All,
    /// Only the first instance is audible.
    FirstOnly,
    /// Only the focused instance is audible.
    ActiveOnly,
}

impl MuteMode {
    fn to_u8(self) -> u8 {
        match self {
            MuteMode::All => 0,
            MuteMode::FirstOnly => 1,
            MuteMode::ActiveOnly => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => MuteMode::FirstOnly,
            2 => MuteMode::ActiveOnly,
            _ => MuteMode::All,
        }
    }
}

/// Inputs to the mute decision, shared by every instance's audio pipeline.
#[derive(Debug)]
pub struct MuteState {
    mode: AtomicU8,
    instances: AtomicUsize,
    focused: AtomicUsize,
}

impl Default for MuteState {
    fn default() -> Self {
        Self::new(MuteMode::default())
    }
}

impl MuteState {
    pub fn new(mode: MuteMode) -> Self {
        Self {
            mode: AtomicU8::new(mode.to_u8()),
            instances: AtomicUsize::new(0),
            focused: AtomicUsize::new(NO_FOCUS),
        }
    }

    pub fn mode(&self) -> MuteMode {
        MuteMode::from_u8(self.mode.load(Ordering::Relaxed))
    }

    pub fn set_mode(&self, mode: MuteMode) {
        self.mode.store(mode.to_u8(), Ordering::Relaxed);
    }

    pub fn set_instance_count(&self, count: usize) {
        self.instances.store(count, Ordering::Relaxed);
    }

    pub fn instance_count(&self) -> usize {
        self.instances.load(Ordering::Relaxed)
    }

    pub fn set_focused(&self, id: Option<usize>) {
        self.focused.store(id.unwrap_or(NO_FOCUS), Ordering::Relaxed);
    }

    pub fn focused(&self) -> Option<usize> {
        match self.focused.load(Ordering::Relaxed) {
            NO_FOCUS => None,
            id => Some(id),
        }
    }

    /// Whether instance `id` should be silenced.
    pub fn is_muted(&self, id: usize) -> bool {
        if self.instance_count() < 2 {
            return false;
        }
        match self.mode() {
            MuteMode::All => false,
            MuteMode::FirstOnly => id > 0,
            MuteMode::ActiveOnly => self.focused() != Some(id),
        }
    }
}
