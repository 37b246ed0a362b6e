//! Rate conversion from the machine's output rate to the device rate

use crate::machine::StereoFrame;

/// Frame rate the machine's nominal sample rate is specified at.
const NOMINAL_FPS: f64 = 60.0;

/// Tracks how many input frames each device callback needs.
///
/// The fractional remainder is carried between calls so the long-run
/// consumption rate matches the production rate exactly.
#[derive(Debug, Clone)]
pub struct RateConverter {
    core_rate: f64,
    target_fps: f64,
    device_rate: f64,
    frac: f64,
}

impl RateConverter {
    pub fn new(core_rate: f64, target_fps: f64, device_rate: u32) -> Self {
        Self {
            core_rate,
            target_fps,
            device_rate: device_rate.max(1) as f64,
            frac: 0.0,
        }
    }

    /// Input frames to consume for `out_len` output frames.
    pub fn input_len(&mut self, out_len: usize) -> usize {
        let exact = out_len as f64 * self.core_rate * (self.target_fps / NOMINAL_FPS)
            / self.device_rate
            + self.frac;
        let whole = exact.floor();
        self.frac = exact - whole;
        whole as usize
    }

    pub fn set_target_fps(&mut self, fps: f64) {
        self.target_fps = fps;
    }

    /// Fractional input frame carried into the next call.
    pub fn phase(&self) -> f64 {
        self.frac
    }
}

/// Linearly resample `input` into exactly `output.len()` frames, scaling by
/// `volume` (256 is unity).
///
/// Empty input produces silence.
pub fn resample(input: &[StereoFrame], output: &mut [StereoFrame], volume: u16) {
    let Some(last) = input.len().checked_sub(1) else {
        output.fill([0, 0]);
        return;
    };
    if output.is_empty() {
        return;
    }

    let volume = volume as i32;
    let incr = input.len() as f64 / output.len() as f64;
    let mut timer = -0.5f64;
    let mut pos = 0usize;

    for out in output.iter_mut() {
        let a = input[pos.min(last)];
        let b = input[(pos + 1).min(last)];
        for ch in 0..2 {
            let s = a[ch] as f64 + (b[ch] as f64 - a[ch] as f64) * timer;
            out[ch] = ((s.round() as i32 * volume) >> 8).clamp(i16::MIN as i32, i16::MAX as i32)
                as i16;
        }

        timer += incr;
        while timer >= 1.0 {
            timer -= 1.0;
            pos += 1;
        }
    }
}
