//! Input shared between the UI thread and the emulation worker
//!
//! The UI writes key, touch and hotkey state whenever events arrive; the
//! worker samples it once per loop iteration. Everything is a single atomic
//! word so neither side ever blocks the other.

use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

/// All twelve buttons released (the machine's key mask is active-low).
pub const KEYS_RELEASED: u16 = 0x0FFF;

const TOUCH_ACTIVE: u32 = 1 << 31;
/// Largest touch X coordinate the packed word can carry.
pub const TOUCH_X_MAX: u16 = 0x7FFF;

bitflags! {
    /// Frontend hotkeys, one bit each.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Hotkey: u32 {
        const MIC = 1 << 0;
        const PAUSE = 1 << 1;
        const RESET = 1 << 2;
        const FAST_FORWARD = 1 << 3;
        const FAST_FORWARD_TOGGLE = 1 << 4;
        const FRAME_STEP = 1 << 5;
        const POWER_BUTTON = 1 << 6;
        const VOLUME_UP = 1 << 7;
        const VOLUME_DOWN = 1 << 8;
    }
}

/// Per-frame input handed to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInput {
    /// Active-low button mask.
    pub keys: u16,
    /// Touch screen contact point, if touching.
    pub touch: Option<(u16, u16)>,
}

impl Default for FrameInput {
    fn default() -> Self {
        Self {
            keys: KEYS_RELEASED,
            touch: None,
        }
    }
}

/// Input state written by the UI thread.
#[derive(Debug)]
pub struct InputState {
    keys: AtomicU32,
    touch: AtomicU32,
    hotkeys: AtomicU32,
}

impl Default for InputState {
    fn default() -> Self {
        Self::new()
    }
}

impl InputState {
    pub fn new() -> Self {
        Self {
            keys: AtomicU32::new(KEYS_RELEASED as u32),
            touch: AtomicU32::new(0),
            hotkeys: AtomicU32::new(0),
        }
    }

    /// Set the active-low button mask.
    pub fn set_keys(&self, mask: u16) {
        self.keys.store(mask as u32, Ordering::Relaxed);
    }

    /// Record a touch. `x` is clamped to [`TOUCH_X_MAX`].
    pub fn touch(&self, x: u16, y: u16) {
        let packed = TOUCH_ACTIVE | ((x.min(TOUCH_X_MAX) as u32) << 16) | y as u32;
        self.touch.store(packed, Ordering::Relaxed);
    }

    pub fn release_touch(&self) {
        self.touch.store(0, Ordering::Relaxed);
    }

    pub fn press_hotkey(&self, hotkey: Hotkey) {
        self.hotkeys.fetch_or(hotkey.bits(), Ordering::Relaxed);
    }

    pub fn release_hotkey(&self, hotkey: Hotkey) {
        self.hotkeys.fetch_and(!hotkey.bits(), Ordering::Relaxed);
    }

    /// Release every button and hotkey (e.g. when focus is lost).
    pub fn release_all(&self) {
        self.keys.store(KEYS_RELEASED as u32, Ordering::Relaxed);
        self.hotkeys.store(0, Ordering::Relaxed);
        self.release_touch();
    }

    pub fn frame_input(&self) -> FrameInput {
        let touch = self.touch.load(Ordering::Relaxed);
        FrameInput {
            keys: self.keys.load(Ordering::Relaxed) as u16,
            touch: (touch & TOUCH_ACTIVE != 0)
                .then(|| (((touch >> 16) as u16) & TOUCH_X_MAX, (touch & 0xFFFF) as u16)),
        }
    }

    pub fn hotkeys_down(&self) -> Hotkey {
        Hotkey::from_bits_truncate(self.hotkeys.load(Ordering::Relaxed))
    }
}

/// Press edge detection over successive hotkey samples.
///
/// Owned by the worker; sampled once per loop iteration.
#[derive(Debug, Default, Clone, Copy)]
pub struct HotkeyEdges {
    down: Hotkey,
    pressed: Hotkey,
}

impl HotkeyEdges {
    pub fn update(&mut self, down: Hotkey) {
        self.pressed = down & !self.down;
        self.down = down;
    }

    pub fn down(&self, hotkey: Hotkey) -> bool {
        self.down.contains(hotkey)
    }

    pub fn pressed(&self, hotkey: Hotkey) -> bool {
        self.pressed.contains(hotkey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hotkey_press_is_reported_once() {
        let input = InputState::new();
        let mut edges = HotkeyEdges::default();

        input.press_hotkey(Hotkey::PAUSE);
        edges.update(input.hotkeys_down());
        assert!(edges.pressed(Hotkey::PAUSE));
        assert!(edges.down(Hotkey::PAUSE));

        edges.update(input.hotkeys_down());
        assert!(!edges.pressed(Hotkey::PAUSE));
        assert!(edges.down(Hotkey::PAUSE));

        input.release_hotkey(Hotkey::PAUSE);
        edges.update(input.hotkeys_down());
        assert!(!edges.pressed(Hotkey::PAUSE));
        assert!(!edges.down(Hotkey::PAUSE));

        input.press_hotkey(Hotkey::PAUSE);
        edges.update(input.hotkeys_down());
        assert!(edges.pressed(Hotkey::PAUSE));
    }

    #[test]
    fn default_edges_see_nothing_down() {
        let edges = HotkeyEdges::default();
        assert!(!edges.down(Hotkey::PAUSE));
        assert!(!edges.pressed(Hotkey::MIC));
        assert!(Hotkey::default().is_empty());
    }

    #[test]
    fn touch_roundtrips_through_packed_word() {
        let input = InputState::new();
        assert_eq!(input.frame_input().touch, None);

        input.touch(255, 191);
        assert_eq!(input.frame_input().touch, Some((255, 191)));

        input.release_touch();
        assert_eq!(input.frame_input().touch, None);
    }

    #[test]
    fn wide_touch_x_is_clamped() {
        let input = InputState::new();
        input.touch(0x8000, 7);
        assert_eq!(input.frame_input().touch, Some((TOUCH_X_MAX, 7)));

        input.touch(u16::MAX, u16::MAX);
        assert_eq!(input.frame_input().touch, Some((TOUCH_X_MAX, u16::MAX)));
    }

    #[test]
    fn release_all_restores_idle_state() {
        let input = InputState::new();
        input.set_keys(0x0FFE);
        input.press_hotkey(Hotkey::FAST_FORWARD | Hotkey::MIC);
        input.touch(10, 20);

        input.release_all();
        assert_eq!(input.frame_input(), FrameInput::default());
        assert!(input.hotkeys_down().is_empty());
    }
}
