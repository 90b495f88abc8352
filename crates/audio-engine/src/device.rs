//! Output device discovery, selection, and format negotiation.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - picking the supported config closest to a requested channel count/rate
//!
//! [`CpalBackend`] ties these together as the production [`OutputBackend`].

use anyhow::{Context, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::error::{EngineError, Result};
use crate::output::{OutputBackend, OutputFormat, OutputRequest, OutputStream, PreparedOutput, SourceSlot};
use crate::{playback, runtime};

/// Pick the first output device whose name contains `needle` (case-insensitive), or the
/// host default device.
///
/// Returns an error if no suitable device is found.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> anyhow::Result<cpal::Device> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .context("No output devices")?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose the supported output config closest to `channels` @ `target_rate`.
///
/// Prefers, in order: an exact channel-count match, a range containing the target rate,
/// `f32` over integer formats, then the rate nearest the target.
pub fn pick_output_config(
    device: &cpal::Device,
    channels: u16,
    target_rate: u32,
) -> anyhow::Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();
    if ranges.is_empty() {
        return Err(anyhow!("No supported output configs"));
    }

    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;

    for range in ranges {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate {
            channels_match: range.channels() == channels,
            rate_match: rate == target_rate,
            format_rank: sample_format_rank(range.sample_format()),
            rate_distance: rate.abs_diff(target_rate),
        };
        let replace = match &best {
            None => true,
            Some((b, _)) => is_better_candidate(&candidate, b),
        };
        if replace {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Pick a fixed period size as close to `requested_frames` as the device allows.
///
/// Returns `None` when the device does not advertise a range, so CPAL uses its default.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    requested_frames: u32,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(requested_frames.clamp(*min, (*max).max(*min))))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Names of the available output devices, in host order.
pub fn list_devices(host: &cpal::Host) -> anyhow::Result<Vec<String>> {
    let devices = host.output_devices().context("No output devices")?;
    let mut out = Vec::new();
    for d in devices {
        out.push(d.description()?.to_string());
    }
    Ok(out)
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    channels_match: bool,
    rate_match: bool,
    format_rank: u8,
    rate_distance: u32,
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    if target < min {
        min
    } else if target > max {
        max
    } else {
        target
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn is_better_candidate(candidate: &Candidate, best: &Candidate) -> bool {
    if candidate.channels_match != best.channels_match {
        candidate.channels_match
    } else if candidate.rate_match != best.rate_match {
        candidate.rate_match
    } else if candidate.format_rank != best.format_rank {
        candidate.format_rank < best.format_rank
    } else {
        candidate.rate_distance < best.rate_distance
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

/// CPAL output backend bound to one host and an optional device name filter.
pub struct CpalBackend {
    host: cpal::Host,
    device: Option<String>,
}

impl CpalBackend {
    pub fn new(host: cpal::Host, device: Option<String>) -> Self {
        Self { host, device }
    }

    /// Use the host selected by [`runtime::initialize`].
    pub fn from_runtime(device: Option<String>) -> Result<Self> {
        Ok(Self::new(runtime::host()?, device))
    }
}

impl OutputBackend for CpalBackend {
    type Prepared = CpalPrepared;

    fn prepare(&self, request: &OutputRequest) -> Result<CpalPrepared> {
        let device = pick_device(&self.host, self.device.as_deref()).map_err(device_open)?;
        let supported = pick_output_config(&device, request.channels, request.sample_rate)
            .map_err(device_open)?;

        let mut config: cpal::StreamConfig = supported.config();
        if let Some(buf) = pick_buffer_size(&supported, request.period_frames) {
            config.buffer_size = buf;
        }
        if let Ok(desc) = device.description() {
            tracing::info!(device = %desc, "output device");
        }

        Ok(CpalPrepared {
            device,
            config,
            sample_format: supported.sample_format(),
        })
    }
}

fn device_open(err: anyhow::Error) -> EngineError {
    EngineError::DeviceOpen(format!("{err:#}"))
}

/// Negotiated CPAL device + stream config, ready to be started on the executor thread.
pub struct CpalPrepared {
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
}

impl PreparedOutput for CpalPrepared {
    type Stream = CpalStream;

    fn format(&self) -> OutputFormat {
        OutputFormat {
            channels: self.config.channels,
            sample_rate: self.config.sample_rate,
            period_frames: match self.config.buffer_size {
                cpal::BufferSize::Fixed(frames) => Some(frames),
                cpal::BufferSize::Default => None,
            },
            sample_format: self.sample_format,
        }
    }

    fn start(self, source: SourceSlot) -> Result<CpalStream> {
        let stream =
            playback::build_output_stream(&self.device, &self.config, self.sample_format, source)
                .map_err(device_open)?;
        // Devices open suspended; `Play` resumes them.
        if let Err(e) = stream.pause() {
            tracing::debug!("initial pause not supported: {e}");
        }
        Ok(CpalStream { stream })
    }
}

/// A built CPAL stream, owned by the executor thread.
pub struct CpalStream {
    stream: cpal::Stream,
}

impl OutputStream for CpalStream {
    fn resume(&mut self) -> anyhow::Result<()> {
        self.stream.play()?;
        Ok(())
    }

    fn suspend(&mut self) -> anyhow::Result<()> {
        self.stream.pause()?;
        Ok(())
    }

    fn close(self) {
        let _ = self.stream.pause();
        drop(self.stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(channels_match: bool, rate_match: bool, format_rank: u8, rate_distance: u32) -> Candidate {
        Candidate {
            channels_match,
            rate_match,
            format_rank,
            rate_distance,
        }
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", ""));
    }

    #[test]
    fn pick_rate_for_range_prefers_target_when_in_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, 48_000), 48_000);
    }

    #[test]
    fn pick_rate_for_range_clamps() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, 22_050), 44_100);
        assert_eq!(pick_rate_for_range(44_100, 96_000, 192_000), 96_000);
    }

    #[test]
    fn channel_match_outranks_everything() {
        let better = is_better_candidate(&candidate(true, false, 3, 1000), &candidate(false, true, 0, 0));
        assert!(better);
    }

    #[test]
    fn exact_rate_outranks_format() {
        assert!(is_better_candidate(&candidate(true, true, 2, 0), &candidate(true, false, 0, 100)));
    }

    #[test]
    fn f32_preferred_at_equal_rate() {
        assert!(is_better_candidate(&candidate(true, true, 0, 0), &candidate(true, true, 2, 0)));
        assert!(!is_better_candidate(&candidate(true, true, 2, 0), &candidate(true, true, 0, 0)));
    }

    #[test]
    fn nearer_rate_wins_last() {
        assert!(is_better_candidate(&candidate(true, false, 0, 100), &candidate(true, false, 0, 200)));
    }

    #[test]
    fn sample_format_rank_orders_float_first() {
        assert!(sample_format_rank(cpal::SampleFormat::F32) < sample_format_rank(cpal::SampleFormat::I16));
        assert_eq!(sample_format_rank(cpal::SampleFormat::U8), 10);
    }
}
