//! Microphone input
//!
//! Once per frame the worker asks [`MicInput::fill_frame`] for
//! [`MIC_FRAME_LEN`] samples to hand to the machine. Depending on the mode
//! those come from a capture device (via the ring buffer), a looped WAV
//! file, white noise, or nothing at all.

mod ring;
mod wav;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use crate::machine::MIC_FRAME_LEN;
pub use ring::{MIC_RING_CAPACITY, MicRingBuffer};
pub use wav::load_wav;

/// Sample rate of microphone input delivered to the machine.
pub const MIC_RATE: u32 = 44_100;

/// Source of microphone samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicInputMode {
    #[default]
    Silence,
    /// A capture device; always live.
    External,
    /// A looped WAV file, live while the mic hotkey is held.
    Wav,
    /// White noise, live while the mic hotkey is held.
    Noise,
}

struct MicState {
    mode: MicInputMode,
    ring: MicRingBuffer,
    wav: Vec<i16>,
    wav_pos: usize,
}

/// Microphone state shared by the capture callback and the worker.
pub struct MicInput {
    state: Mutex<MicState>,
}

impl MicInput {
    pub fn new(mode: MicInputMode, wav_path: Option<&Path>) -> Self {
        let input = Self {
            state: Mutex::new(MicState {
                mode: MicInputMode::Silence,
                ring: MicRingBuffer::new(),
                wav: Vec::new(),
                wav_pos: 0,
            }),
        };
        input.reconfigure(mode, wav_path);
        input
    }

    fn lock(&self) -> MutexGuard<'_, MicState> {
        self.state.lock().unwrap_or_else(|e| {
            warn!("Mic state mutex poisoned; continuing");
            e.into_inner()
        })
    }

    /// Switch source, discarding buffered samples and reloading the WAV
    /// file if needed.
    pub fn reconfigure(&self, mode: MicInputMode, wav_path: Option<&Path>) {
        let wav = match (mode, wav_path) {
            (MicInputMode::Wav, Some(path)) => match load_wav(path) {
                Ok(samples) => {
                    debug!("Loaded mic WAV {} ({} samples)", path.display(), samples.len());
                    samples
                }
                Err(e) => {
                    warn!("Failed to load mic WAV {}: {}", path.display(), e);
                    Vec::new()
                }
            },
            (MicInputMode::Wav, None) => {
                warn!("Mic input set to WAV but no file is configured");
                Vec::new()
            }
            _ => Vec::new(),
        };

        let mut state = self.lock();
        state.mode = mode;
        state.ring.clear();
        state.wav = wav;
        state.wav_pos = 0;
        debug!("Mic input mode: {:?}", mode);
    }

    pub fn mode(&self) -> MicInputMode {
        self.lock().mode
    }

    /// Queue captured samples (mono, [`MIC_RATE`]). Ignored unless the mode
    /// is [`MicInputMode::External`].
    pub fn push_capture(&self, samples: &[i16]) -> usize {
        let mut state = self.lock();
        if state.mode != MicInputMode::External {
            return 0;
        }
        state.ring.write(samples)
    }

    /// Samples waiting in the capture ring.
    pub fn buffered(&self) -> usize {
        self.lock().ring.len()
    }

    /// Produce the next frame of microphone input.
    ///
    /// Returns false when there is no signal, in which case the machine
    /// should get a null frame and `out` is left untouched.
    pub fn fill_frame(&self, mic_held: bool, out: &mut [i16; MIC_FRAME_LEN]) -> bool {
        let mut state = self.lock();
        let mode = match state.mode {
            MicInputMode::External => MicInputMode::External,
            _ if !mic_held => MicInputMode::Silence,
            mode => mode,
        };

        match mode {
            MicInputMode::Silence => {
                state.wav_pos = 0;
                false
            }
            MicInputMode::External => {
                let read = state.ring.read(out);
                pad_frame(out, read);
                true
            }
            MicInputMode::Wav => {
                if state.wav.is_empty() {
                    state.wav_pos = 0;
                    return false;
                }
                let MicState { wav, wav_pos, .. } = &mut *state;
                for sample in out.iter_mut() {
                    *sample = wav[*wav_pos];
                    *wav_pos = (*wav_pos + 1) % wav.len();
                }
                true
            }
            MicInputMode::Noise => {
                let mut rng = rand::rng();
                for sample in out.iter_mut() {
                    *sample = rng.random();
                }
                true
            }
        }
    }
}

/// Fill the tail after a short read: zeros if nothing was read, otherwise
/// the last sample repeated.
fn pad_frame(out: &mut [i16], read: usize) {
    if read == 0 {
        out.fill(0);
    } else if read < out.len() {
        let last = out[read - 1];
        out[read..].fill(last);
    }
}

#[cfg(test)]
mod tests;
