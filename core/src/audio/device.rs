//! Audio devices through cpal
//!
//! The output stream owns an [`AudioRenderer`] and converts its stereo
//! frames to whatever format and channel count the device wants. The capture
//! stream downmixes to mono, resamples to [`MIC_RATE`] and feeds the
//! microphone ring buffer.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use tracing::{debug, error, info, warn};

use crate::config::AudioConfig;
use crate::error::DeviceError;
use crate::machine::StereoFrame;
use crate::mic::{MIC_RATE, MicInput};

use super::pipeline::{AudioPipeline, AudioRenderer};

/// A running output stream. Dropping it stops playback.
pub struct OutputDevice {
    _stream: cpal::Stream,
    sample_rate: u32,
    channels: u16,
}

impl OutputDevice {
    /// Open the default output device and start rendering `pipeline`.
    pub fn open(pipeline: &AudioPipeline, audio: &AudioConfig) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(DeviceError::NoDevice("output"))?;

        let supported = output_config(&device, audio.frequency)?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();

        let mut config: cpal::StreamConfig = supported.config();
        if let cpal::SupportedBufferSize::Range { min, max } = supported.buffer_size() {
            if (*min..=*max).contains(&audio.buffer_size) {
                config.buffer_size = cpal::BufferSize::Fixed(audio.buffer_size);
            }
        }

        let renderer = pipeline.renderer(sample_rate);
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => build_output::<f32>(&device, &config, renderer)?,
            cpal::SampleFormat::I16 => build_output::<i16>(&device, &config, renderer)?,
            cpal::SampleFormat::U16 => build_output::<u16>(&device, &config, renderer)?,
            cpal::SampleFormat::I32 => build_output::<i32>(&device, &config, renderer)?,
            other => return Err(DeviceError::UnsupportedFormat(format!("{:?}", other))),
        };

        stream
            .play()
            .map_err(|e| DeviceError::Play(e.to_string()))?;

        info!(
            "Audio output started at {}Hz, {} channel(s)",
            sample_rate, channels
        );

        Ok(Self {
            _stream: stream,
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

/// A running capture stream feeding a [`MicInput`].
pub struct CaptureDevice {
    _stream: cpal::Stream,
    sample_rate: u32,
}

impl CaptureDevice {
    /// Open the input device called `name`, or the default one.
    pub fn open(mic: Arc<MicInput>, name: Option<&str>) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = match name {
            Some(name) => find_input(&host, name)?,
            None => host
                .default_input_device()
                .ok_or(DeviceError::NoDevice("input"))?,
        };

        let supported = device
            .default_input_config()
            .map_err(|e| DeviceError::Config(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.config();

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => build_input::<f32>(&device, &config, mic)?,
            cpal::SampleFormat::I16 => build_input::<i16>(&device, &config, mic)?,
            cpal::SampleFormat::U16 => build_input::<u16>(&device, &config, mic)?,
            cpal::SampleFormat::I32 => build_input::<i32>(&device, &config, mic)?,
            other => return Err(DeviceError::UnsupportedFormat(format!("{:?}", other))),
        };

        stream
            .play()
            .map_err(|e| DeviceError::Play(e.to_string()))?;

        debug!("Microphone capture started at {}Hz", sample_rate);

        Ok(Self {
            _stream: stream,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Prefer a configuration at `frequency` in the default format, falling
/// back to the device default.
fn output_config(
    device: &cpal::Device,
    frequency: u32,
) -> Result<cpal::SupportedStreamConfig, DeviceError> {
    let default = device
        .default_output_config()
        .map_err(|e| DeviceError::Config(e.to_string()))?;

    let rate = cpal::SampleRate(frequency);
    let preferred = device
        .supported_output_configs()
        .ok()
        .and_then(|mut configs| {
            configs.find(|c| {
                c.sample_format() == default.sample_format()
                    && c.channels() == default.channels()
                    && c.min_sample_rate() <= rate
                    && rate <= c.max_sample_rate()
            })
        })
        .map(|c| c.with_sample_rate(rate));

    if preferred.is_none() {
        debug!(
            "Output device does not support {}Hz; using {}Hz",
            frequency,
            default.sample_rate().0
        );
    }
    Ok(preferred.unwrap_or(default))
}

fn find_input(host: &cpal::Host, name: &str) -> Result<cpal::Device, DeviceError> {
    let devices = host
        .input_devices()
        .map_err(|e| DeviceError::Config(e.to_string()))?;
    for device in devices {
        match device.name() {
            Ok(n) if n == name => return Ok(device),
            Ok(_) => {}
            Err(e) => warn!("Skipping input device with unreadable name: {}", e),
        }
    }
    Err(DeviceError::NotFound(name.to_string()))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: AudioRenderer,
) -> Result<cpal::Stream, DeviceError>
where
    T: SizedSample + FromSample<i16>,
{
    let channels = config.channels as usize;
    let mut frames: Vec<StereoFrame> = vec![[0, 0]; 4096];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let count = data.len() / channels.max(1);
                if frames.len() < count {
                    frames.resize(count, [0, 0]);
                }
                renderer.render(&mut frames[..count]);
                interleave(&frames[..count], data, channels);
            },
            |err| error!("Audio stream error: {}", err),
            None,
        )
        .map_err(|e| DeviceError::Build(e.to_string()))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mic: Arc<MicInput>,
) -> Result<cpal::Stream, DeviceError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let channels = config.channels as usize;
    let mut resampler = CaptureResampler::new(config.sample_rate.0);
    let mut mono: Vec<i16> = Vec::with_capacity(4096);
    let mut resampled: Vec<i16> = Vec::with_capacity(4096);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                downmix(data, channels, &mut mono);
                resampler.process(&mono, &mut resampled);
                mic.push_capture(&resampled);
            },
            |err| error!("Microphone stream error: {}", err),
            None,
        )
        .map_err(|e| DeviceError::Build(e.to_string()))
}

/// Spread stereo frames over `channels` interleaved output channels. Mono
/// outputs get the average of left and right; channels past the second are
/// silent.
fn interleave<T>(frames: &[StereoFrame], data: &mut [T], channels: usize)
where
    T: Sample + FromSample<i16>,
{
    if channels == 0 {
        return;
    }
    for (frame, out) in frames.iter().zip(data.chunks_exact_mut(channels)) {
        if channels == 1 {
            let mid = ((frame[0] as i32 + frame[1] as i32) / 2) as i16;
            out[0] = T::from_sample(mid);
            continue;
        }
        out[0] = T::from_sample(frame[0]);
        out[1] = T::from_sample(frame[1]);
        for sample in &mut out[2..] {
            *sample = T::EQUILIBRIUM;
        }
    }
    // Trailing partial frame
    let written = frames.len() * channels;
    if data.len() > written {
        for sample in &mut data[written..] {
            *sample = T::EQUILIBRIUM;
        }
    }
}

/// Average interleaved capture data down to one channel.
fn downmix<T>(data: &[T], channels: usize, out: &mut Vec<i16>)
where
    T: Sample,
    i16: FromSample<T>,
{
    out.clear();
    let channels = channels.max(1);
    out.extend(data.chunks_exact(channels).map(|frame| {
        let sum: i32 = frame.iter().map(|&s| i16::from_sample(s) as i32).sum();
        (sum / channels as i32) as i16
    }));
}

/// Nearest-neighbour conversion from the capture rate to [`MIC_RATE`],
/// carrying the read position across callbacks.
struct CaptureResampler {
    step: f64,
    pos: f64,
}

impl CaptureResampler {
    fn new(input_rate: u32) -> Self {
        Self {
            step: input_rate.max(1) as f64 / MIC_RATE as f64,
            pos: 0.0,
        }
    }

    fn process(&mut self, input: &[i16], out: &mut Vec<i16>) {
        out.clear();
        let len = input.len() as f64;
        while self.pos < len {
            out.push(input[self.pos as usize]);
            self.pos += self.step;
        }
        self.pos -= len;
    }
}
