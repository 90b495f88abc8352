//! CPAL output stream construction and the real-time audio callback.
//!
//! The callback:
//! - asks the registered [`SourceSlot`] to fill one period of interleaved `f32` without blocking
//! - converts `f32` samples to the device sample format
//!
//! ## Real-time constraints
//! The callback never waits on a lock, never logs, and never allocates once the scratch
//! buffer has reached the period size. Anything unexpected produces silence.

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::output::SourceSlot;

/// Build a CPAL output stream that plays audio pulled from `source`.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    source: SourceSlot,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_f32_stream(device, config, source),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, source),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, source),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, source),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_f32_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    source: SourceSlot,
) -> Result<cpal::Stream> {
    let err_fn = |err| tracing::warn!("stream error: {err}");
    let stream = device.build_output_stream(
        config,
        move |data: &mut [f32], _| source.fill(data),
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Type-specialized stream builder for integer device formats.
///
/// The source fills a scratch `f32` period which is then converted sample by sample.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    source: SourceSlot,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut scratch = vec![0.0f32; scratch_len(config)];

    let err_fn = |err| tracing::warn!("stream error: {err}");
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if scratch.len() < data.len() {
                scratch.resize(data.len(), 0.0);
            }
            let period = &mut scratch[..data.len()];
            source.fill(period);
            for (dst, &src) in data.iter_mut().zip(period.iter()) {
                *dst = <T as cpal::Sample>::from_sample::<f32>(src);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Period size assumed when the device picks its own buffer size.
const DEFAULT_SCRATCH_FRAMES: usize = 8192;

/// Scratch size for one period: fixed buffer size × channels, or a generous default when the
/// device decides. The callback only grows it if the device exceeds that.
fn scratch_len(config: &cpal::StreamConfig) -> usize {
    let frames = match config.buffer_size {
        cpal::BufferSize::Fixed(frames) => frames as usize,
        cpal::BufferSize::Default => DEFAULT_SCRATCH_FRAMES,
    };
    frames * config.channels as usize
}
