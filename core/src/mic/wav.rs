//! WAV sources for the looped-sample microphone mode

use std::path::Path;

use hound::{SampleFormat, WavReader};

use super::{MIC_RATE, MIC_FRAME_LEN};

/// Load the first channel of a WAV file, resampled to [`MIC_RATE`].
///
/// The result is never shorter than one frame of microphone input.
pub fn load_wav(path: &Path) -> Result<Vec<i16>, hound::Error> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<i16> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .step_by(channels)
            .map(|s| s.map(float_to_i16))
            .collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            reader
                .samples::<i32>()
                .step_by(channels)
                .map(|s| s.map(|v| int_to_i16(v, bits)))
                .collect::<Result<_, _>>()?
        }
    };

    Ok(resample_to_mic_rate(&samples, spec.sample_rate))
}

fn float_to_i16(sample: f32) -> i16 {
    ((sample * 32768.0) as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn int_to_i16(sample: i32, bits: u16) -> i16 {
    if bits > 16 {
        (sample >> (bits - 16)) as i16
    } else {
        (sample << (16 - bits)) as i16
    }
}

/// Step through `samples` at the ratio of the two rates.
fn resample_to_mic_rate(samples: &[i16], rate: u32) -> Vec<i16> {
    if samples.is_empty() {
        return Vec::new();
    }

    let len = samples.len();
    let out_len = ((len as u64 * MIC_RATE as u64) / rate.max(1) as u64) as usize;
    let out_len = out_len.max(MIC_FRAME_LEN);

    let incr = len as f64 / out_len as f64;
    let mut timer = 0.0f64;
    let mut pos = 0usize;
    let mut out = Vec::with_capacity(out_len);
    for _ in 0..out_len {
        out.push(samples[pos.min(len - 1)]);
        timer += incr;
        while timer >= 1.0 {
            timer -= 1.0;
            pos += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, spec: hound::WavSpec, frames: usize, value: impl Fn(usize) -> i32) {
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            for _ in 0..spec.channels {
                writer.write_sample(value(i)).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn loads_mono_16_bit_at_mic_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blow.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: MIC_RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        write_wav(&path, spec, 2000, |i| i as i32);

        let samples = load_wav(&path).unwrap();
        assert_eq!(samples.len(), 2000);
        assert_eq!(samples[..4], [0, 1, 2, 3]);
        assert_eq!(samples[1999], 1999);
    }

    #[test]
    fn takes_first_channel_and_resamples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: MIC_RATE * 2,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        write_wav(&path, spec, 4000, |i| i as i32);

        let samples = load_wav(&path).unwrap();
        assert_eq!(samples.len(), 2000);
        assert_eq!(samples[..3], [0, 2, 4]);
    }

    #[test]
    fn short_file_is_stretched_to_one_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("click.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: MIC_RATE,
            bits_per_sample: 8,
            sample_format: SampleFormat::Int,
        };
        write_wav(&path, spec, 10, |_| 64);

        let samples = load_wav(&path).unwrap();
        assert_eq!(samples.len(), MIC_FRAME_LEN);
        assert!(samples.iter().all(|&s| s == 64 << 8));
    }

    #[test]
    fn float_samples_are_scaled_and_clamped() {
        assert_eq!(float_to_i16(0.5), 16384);
        assert_eq!(float_to_i16(1.0), i16::MAX);
        assert_eq!(float_to_i16(-1.5), i16::MIN);
    }

    #[test]
    fn wide_samples_keep_the_top_sixteen_bits() {
        assert_eq!(int_to_i16(0x12_3456, 24), 0x1234);
        assert_eq!(int_to_i16(-0x10_0000, 24), -0x1000);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_wav(&dir.path().join("missing.wav")).is_err());
    }
}
