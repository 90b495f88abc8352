//! One-shot duration/tag probe with transient-failure retry.
//!
//! Some containers report a zero duration on the first discovery pass and a valid one on a
//! later pass. Each attempt uses a fresh [`Discoverer`] that is dropped before the next one.

use std::time::Duration;

use crate::backend::{DecodeBackend, Discoverer};
use crate::config::EngineConfig;
use crate::error::{BackendError, EngineError, Result};
use crate::symphonia_backend::SymphoniaBackend;

/// Duration and tags for a playable source.
#[derive(Clone, Debug, PartialEq)]
pub struct Metadata {
    /// Duration in seconds (always `> 0`).
    pub duration: f64,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

/// Retrying metadata query against a decode backend.
pub struct MetadataProbe<B = SymphoniaBackend> {
    backend: B,
    attempts: u32,
    timeout: Duration,
}

impl MetadataProbe<SymphoniaBackend> {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_backend(SymphoniaBackend, config)
    }
}

impl<B: DecodeBackend> MetadataProbe<B> {
    pub fn with_backend(backend: B, config: &EngineConfig) -> Self {
        Self {
            backend,
            attempts: config.probe_attempts.max(1),
            timeout: config.probe_timeout,
        }
    }

    /// Query `uri`, retrying up to the configured bound on backend errors or a missing duration.
    pub fn probe(&self, uri: &str) -> Result<Metadata> {
        for attempt in 1..=self.attempts {
            match self.attempt(uri) {
                Ok(Some(metadata)) => return Ok(metadata),
                Ok(None) => {
                    tracing::warn!(uri, attempt, "discovery reported no duration");
                }
                Err(e) => {
                    tracing::warn!(uri, attempt, error = %e, "discovery failed");
                }
            }
        }

        tracing::warn!(uri, attempts = self.attempts, "giving up on duration");
        Err(EngineError::DurationUnavailable {
            uri: uri.to_string(),
            attempts: self.attempts,
        })
    }

    fn attempt(&self, uri: &str) -> std::result::Result<Option<Metadata>, BackendError> {
        let mut discoverer = self.backend.discoverer(self.timeout)?;
        let discovery = discoverer.discover(uri)?;
        if discovery.duration.is_nan() || discovery.duration <= 0.0 {
            return Ok(None);
        }
        Ok(Some(Metadata {
            duration: discovery.duration,
            title: discovery.tags.title,
            artist: discovery.tags.artist,
            album: discovery.tags.album,
        }))
    }
}

/// Probe `uri` with the default backend and config.
pub fn probe(uri: &str) -> Result<Metadata> {
    MetadataProbe::new(&EngineConfig::default()).probe(uri)
}
