//! A stand-in machine that plays a square wave
//!
//! The pitch comes from the ROM contents, so different files sound
//! different. Holding any key silences the tone; the machine also writes a
//! small save image once a second to exercise the save flusher.

use emuhost_core::{
    FrameInput, KEYS_RELEASED, Machine, MachineContext, MachineError, MachineFactory, RomImage,
    StereoFrame,
};
use tracing::{debug, info};

const SAVE_SIZE: usize = 512;
const STATE_LEN: usize = 16;
const AMPLITUDE: i16 = 4000;

pub struct ToneFactory {
    sample_rate: f64,
    fps: f64,
}

impl ToneFactory {
    pub fn new(sample_rate: f64, fps: f64) -> Self {
        Self { sample_rate, fps }
    }

    fn build(&self, pitch: f64, ctx: &MachineContext) -> Box<dyn Machine> {
        Box::new(ToneMachine {
            ctx: ctx.clone(),
            sample_rate: self.sample_rate,
            samples_per_frame: self.sample_rate / self.fps,
            step: pitch / self.sample_rate,
            fps: self.fps.round().max(1.0) as u64,
            phase: 0.0,
            carry: 0.0,
            frame: 0,
            output: Vec::new(),
            save: vec![0; SAVE_SIZE],
            mic_level: 0,
        })
    }
}

impl MachineFactory for ToneFactory {
    fn boot_rom(
        &mut self,
        rom: &RomImage,
        ctx: &MachineContext,
    ) -> Result<Box<dyn Machine>, MachineError> {
        if rom.data.is_empty() {
            return Err(MachineError::Boot(format!("{} is empty", rom.name)));
        }
        let pitch = pitch_for(&rom.data);
        info!("Tone machine for {} at {:.0} Hz", rom.name, pitch);
        Ok(self.build(pitch, ctx))
    }

    fn boot_firmware(&mut self, ctx: &MachineContext) -> Result<Box<dyn Machine>, MachineError> {
        Ok(self.build(440.0, ctx))
    }
}

/// 220 Hz to 880 Hz, chosen by the byte sum.
fn pitch_for(data: &[u8]) -> f64 {
    let sum: u32 = data.iter().map(|&b| b as u32).sum();
    220.0 + (sum % 660) as f64
}

struct ToneMachine {
    ctx: MachineContext,
    sample_rate: f64,
    samples_per_frame: f64,
    /// Phase advance per sample, in cycles.
    step: f64,
    fps: u64,
    phase: f64,
    carry: f64,
    frame: u64,
    output: Vec<StereoFrame>,
    save: Vec<u8>,
    mic_level: i16,
}

impl Machine for ToneMachine {
    fn start(&mut self) {
        debug!("Tone machine started");
    }

    fn stop(&mut self) {
        debug!("Tone machine stopped after {} frames", self.frame);
    }

    fn reset(&mut self) {
        self.phase = 0.0;
        self.carry = 0.0;
        self.frame = 0;
        self.output.clear();
    }

    fn run_frame(&mut self, input: &FrameInput) {
        self.carry += self.samples_per_frame;
        let count = self.carry as usize;
        self.carry -= count as f64;

        let silent = input.keys != KEYS_RELEASED;
        for _ in 0..count {
            let level = if silent {
                0
            } else if self.phase < 0.5 {
                AMPLITUDE
            } else {
                -AMPLITUDE
            };
            let level = level.saturating_add(self.mic_level);
            self.output.push([level, level]);
            self.phase = (self.phase + self.step).fract();
        }

        self.frame += 1;
        if self.frame % self.fps == 0 {
            let offset = (self.frame / self.fps) as usize % SAVE_SIZE;
            self.save[offset] = self.save[offset].wrapping_add(1);
            self.ctx.cart_save.request_flush(&self.save, offset, 1);
        }
    }

    fn output_len(&self) -> usize {
        self.output.len()
    }

    fn read_output(&mut self, out: &mut [StereoFrame]) -> usize {
        let n = self.output.len().min(out.len());
        out[..n].copy_from_slice(&self.output[..n]);
        self.output.drain(..n);
        n
    }

    fn mic_input_frame(&mut self, samples: Option<&[i16]>) {
        // Mix a little of the microphone's loudness into the tone.
        self.mic_level = samples
            .map(|s| {
                let peak = s.iter().map(|v| v.unsigned_abs()).max().unwrap_or(0);
                (peak / 8) as i16
            })
            .unwrap_or(0);
    }

    fn save_state(&mut self) -> Result<Vec<u8>, MachineError> {
        let mut data = Vec::with_capacity(STATE_LEN);
        data.extend_from_slice(&self.frame.to_le_bytes());
        data.extend_from_slice(&self.phase.to_le_bytes());
        Ok(data)
    }

    fn load_state(&mut self, data: &[u8]) -> Result<(), MachineError> {
        let (frame, phase) = match (data.get(..8), data.get(8..STATE_LEN)) {
            (Some(frame), Some(phase)) if data.len() == STATE_LEN => (frame, phase),
            _ => {
                return Err(MachineError::InvalidState(format!(
                    "expected {} bytes, got {}",
                    STATE_LEN,
                    data.len()
                )));
            }
        };
        let mut buf = [0u8; 8];
        buf.copy_from_slice(frame);
        self.frame = u64::from_le_bytes(buf);
        buf.copy_from_slice(phase);
        self.phase = f64::from_le_bytes(buf);
        Ok(())
    }

    fn insert_cart(&mut self, rom: &RomImage) -> Result<(), MachineError> {
        self.step = pitch_for(&rom.data) / self.sample_rate;
        Ok(())
    }

    fn eject_cart(&mut self) {
        self.step = 0.0;
    }

    fn import_save(&mut self, data: &[u8]) -> Result<(), MachineError> {
        let n = data.len().min(SAVE_SIZE);
        self.save[..n].copy_from_slice(&data[..n]);
        self.ctx.cart_save.request_flush(&self.save, 0, n);
        Ok(())
    }

    fn set_cheats_enabled(&mut self, enabled: bool) {
        debug!("Tone machine has no cheats (enabled: {})", enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emuhost_core::{SaveFlusher, StopRequest};

    fn machine(flusher: &SaveFlusher) -> Box<dyn Machine> {
        let ctx = MachineContext {
            cart_save: flusher.writer().clone(),
            firmware_save: flusher.writer().clone(),
            stop_request: StopRequest::new(),
        };
        ToneFactory::new(48_000.0, 60.0).boot_firmware(&ctx).unwrap()
    }

    #[test]
    fn produces_one_frame_of_samples() {
        let flusher = SaveFlusher::new(None);
        let mut m = machine(&flusher);
        m.run_frame(&FrameInput::default());
        assert_eq!(m.output_len(), 800);

        let mut out = vec![[0, 0]; 1000];
        assert_eq!(m.read_output(&mut out), 800);
        assert_eq!(m.output_len(), 0);
        assert!(out[..800].iter().any(|f| f[0] == AMPLITUDE));
        assert!(out[..800].iter().any(|f| f[0] == -AMPLITUDE));
    }

    #[test]
    fn held_keys_silence_tone() {
        let flusher = SaveFlusher::new(None);
        let mut m = machine(&flusher);
        m.run_frame(&FrameInput {
            keys: KEYS_RELEASED & !1,
            touch: None,
        });
        let mut out = vec![[1, 1]; 800];
        m.read_output(&mut out);
        assert!(out.iter().all(|f| *f == [0, 0]));
    }

    #[test]
    fn state_roundtrips_and_rejects_garbage() {
        let flusher = SaveFlusher::new(None);
        let mut m = machine(&flusher);
        for _ in 0..3 {
            m.run_frame(&FrameInput::default());
        }
        let state = m.save_state().unwrap();
        m.reset();
        m.load_state(&state).unwrap();
        assert_eq!(m.save_state().unwrap(), state);

        assert!(matches!(
            m.load_state(b"short"),
            Err(MachineError::InvalidState(_))
        ));
    }

    #[test]
    fn writes_save_once_a_second() {
        let flusher = SaveFlusher::new(None);
        let mut m = machine(&flusher);
        for _ in 0..59 {
            m.run_frame(&FrameInput::default());
        }
        assert!(!flusher.writer().needs_flush());
        m.run_frame(&FrameInput::default());
        assert!(flusher.writer().needs_flush());
    }
}
