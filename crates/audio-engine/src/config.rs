use std::time::Duration;

/// Engine tuning parameters shared by probe/decode/output stages.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Discovery attempts before a probe gives up on a missing duration.
    pub probe_attempts: u32,
    /// Per-attempt discovery timeout.
    pub probe_timeout: Duration,
    /// Upper bound on how long a seek waits for the backend to settle.
    pub seek_wait: Duration,
    /// Starting capacity of the pipeline sample buffer, in samples.
    pub initial_buffer_capacity: usize,
    /// Requested device period in frames (the device may negotiate another size).
    pub period_frames: u32,
    /// Sink caps: accepted channel counts.
    pub min_channels: u16,
    pub max_channels: u16,
    /// Sink caps: accepted sample rates in Hz.
    pub min_rate: u32,
    pub max_rate: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            probe_attempts: 3,
            probe_timeout: Duration::from_secs(5),
            seek_wait: Duration::from_secs(1),
            initial_buffer_capacity: 64,
            period_frames: 4096,
            min_channels: 1,
            max_channels: 16,
            min_rate: 8_000,
            max_rate: 96_000,
        }
    }
}

impl EngineConfig {
    /// Float sink constraints derived from this config.
    pub fn sink_caps(&self) -> crate::backend::SinkCaps {
        crate::backend::SinkCaps {
            channels: self.min_channels..=self.max_channels,
            rate: self.min_rate..=self.max_rate,
        }
    }
}

/// Process-wide audio subsystem settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Audio host (driver) name, matched case-insensitively. `None` picks the platform default.
    pub host: Option<String>,
}
