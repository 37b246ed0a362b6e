//! Producer and consumer halves of an instance's audio path

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::config::{AudioConfig, EmuConfig, MAX_VOLUME};
use crate::machine::StereoFrame;

use super::buffer::SampleBuffer;
use super::mute::MuteState;
use super::resample::{RateConverter, resample};

/// Short reads within this many frames of the request are not padded.
pub const UNDERRUN_MARGIN: usize = 6;
/// Upper bound on input frames consumed by one callback.
pub const MAX_READ: usize = 4096;
/// Volume change per volume hotkey press.
pub const VOLUME_STEP: u16 = 16;

/// Flags read by the output callback on every invocation.
#[derive(Debug)]
struct AudioControls {
    enabled: AtomicBool,
    muted: AtomicBool,
    volume: AtomicU16,
    renderers: AtomicUsize,
}

/// Audio state for one emulator instance.
///
/// The worker pushes machine output and calls [`AudioPipeline::sync`] once
/// per frame; an [`AudioRenderer`] obtained from
/// [`AudioPipeline::renderer`] drains it from the device callback.
pub struct AudioPipeline {
    instance: usize,
    buffer: Arc<SampleBuffer>,
    controls: Arc<AudioControls>,
    mute: Arc<MuteState>,
    sync_timeout: Duration,
    core_rate: f64,
    target_fps: f64,
}

impl AudioPipeline {
    pub fn new(instance: usize, audio: &AudioConfig, emu: &EmuConfig, mute: Arc<MuteState>) -> Self {
        let pipeline = Self {
            instance,
            buffer: Arc::new(SampleBuffer::new(audio.buffer_size as usize)),
            controls: Arc::new(AudioControls {
                enabled: AtomicBool::new(false),
                muted: AtomicBool::new(false),
                volume: AtomicU16::new(audio.volume.min(MAX_VOLUME)),
                renderers: AtomicUsize::new(0),
            }),
            mute,
            sync_timeout: audio.sync_timeout(),
            core_rate: emu.core_sample_rate,
            target_fps: emu.target_fps,
        };
        pipeline.refresh_mute();
        pipeline
    }

    pub fn instance(&self) -> usize {
        self.instance
    }

    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    /// Start consuming samples (the device is "unpaused").
    pub fn enable(&self) {
        if !self.controls.enabled.swap(true, Ordering::AcqRel) {
            debug!("Audio enabled for instance {}", self.instance);
        }
    }

    /// Stop consuming samples; the renderer outputs silence.
    pub fn disable(&self) {
        if self.controls.enabled.swap(false, Ordering::AcqRel) {
            debug!("Audio disabled for instance {}", self.instance);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.controls.enabled.load(Ordering::Acquire)
    }

    pub fn volume(&self) -> u16 {
        self.controls.volume.load(Ordering::Relaxed)
    }

    pub fn set_volume(&self, volume: u16) {
        self.controls
            .volume
            .store(volume.min(MAX_VOLUME), Ordering::Relaxed);
    }

    /// Raise or lower the volume by one step.
    pub fn step_volume(&self, up: bool) -> u16 {
        let current = self.volume();
        let volume = if up {
            current.saturating_add(VOLUME_STEP).min(MAX_VOLUME)
        } else {
            current.saturating_sub(VOLUME_STEP)
        };
        self.set_volume(volume);
        volume
    }

    /// Re-evaluate the multi-instance mute policy for this instance.
    pub fn refresh_mute(&self) {
        let muted = self.mute.is_muted(self.instance);
        if self.controls.muted.swap(muted, Ordering::AcqRel) != muted {
            debug!(
                "Instance {} {}",
                self.instance,
                if muted { "muted" } else { "unmuted" }
            );
        }
    }

    pub fn is_muted(&self) -> bool {
        self.controls.muted.load(Ordering::Acquire)
    }

    /// Create the consumer half for a device running at `device_rate`.
    pub fn renderer(&self, device_rate: u32) -> AudioRenderer {
        self.controls.renderers.fetch_add(1, Ordering::AcqRel);
        AudioRenderer {
            buffer: self.buffer.clone(),
            controls: self.controls.clone(),
            converter: RateConverter::new(self.core_rate, self.target_fps, device_rate),
            input: vec![[0, 0]; MAX_READ],
        }
    }

    /// Whether a renderer is currently draining the buffer.
    pub fn has_renderer(&self) -> bool {
        self.controls.renderers.load(Ordering::Acquire) > 0
    }

    /// Queue machine output.
    pub fn push(&self, frames: &[StereoFrame]) -> usize {
        self.buffer.push(frames)
    }

    /// Producer-side backpressure: wait (bounded) until the device has
    /// drained the buffer down to its configured size.
    ///
    /// Returns immediately while disabled or with nothing consuming.
    pub fn sync(&self) -> bool {
        if !self.is_enabled() || !self.has_renderer() {
            return true;
        }
        self.buffer.wait_for_space(self.sync_timeout)
    }
}

/// Consumer half, owned by the output device callback.
pub struct AudioRenderer {
    buffer: Arc<SampleBuffer>,
    controls: Arc<AudioControls>,
    converter: RateConverter,
    input: Vec<StereoFrame>,
}

impl AudioRenderer {
    /// Fill `out` with device-rate frames.
    pub fn render(&mut self, out: &mut [StereoFrame]) {
        if !self.controls.enabled.load(Ordering::Acquire) {
            out.fill([0, 0]);
            return;
        }

        let len_in = self
            .converter
            .input_len(out.len())
            .min(self.buffer.threshold())
            .min(MAX_READ);

        let num_in = self.buffer.read(&mut self.input[..len_in]);

        if num_in == 0 || self.controls.muted.load(Ordering::Acquire) {
            out.fill([0, 0]);
            return;
        }

        let mut len = num_in;
        let target = len_in.saturating_sub(UNDERRUN_MARGIN);
        if num_in < target {
            let last = self.input[num_in - 1];
            self.input[num_in..target].fill(last);
            len = target;
        }

        let volume = self.controls.volume.load(Ordering::Relaxed);
        resample(&self.input[..len], out, volume);
    }
}

impl Drop for AudioRenderer {
    fn drop(&mut self) {
        self.controls.renderers.fetch_sub(1, Ordering::AcqRel);
    }
}
