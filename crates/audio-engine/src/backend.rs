//! Decode backend boundary.
//!
//! The engine never demuxes or decodes on its own; it drives an implementation of
//! [`DecodeBackend`] through three narrow surfaces:
//! - a [`Discoverer`] for one-shot duration/tag queries
//! - a [`DecodeStream`] for pull-based sample retrieval, seek, and position
//! - [`SinkCaps`] describing the float sink a stream must negotiate with
//!
//! Format negotiation (channel count + rate) happens once inside
//! [`DecodeBackend::open_stream`]; by the time it returns, [`DecodeStream::format`] is latched.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::BackendError;

/// Constraints of the 32-bit float sample sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkCaps {
    pub channels: RangeInclusive<u16>,
    pub rate: RangeInclusive<u32>,
}

impl SinkCaps {
    /// Whether a stream with this layout can be linked to the sink.
    pub fn accepts(&self, channels: u16, rate: u32) -> bool {
        self.channels.contains(&channels) && self.rate.contains(&rate)
    }
}

/// Negotiated stream layout, latched when the first audio stream appears.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub channels: u16,
    pub sample_rate: u32,
}

/// Tag values extracted during discovery.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

/// Result of a single discovery pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Discovery {
    /// Duration in seconds; `<= 0.0` when the backend could not determine it.
    pub duration: f64,
    pub tags: Tags,
}

/// How a seek request ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SeekOutcome {
    /// The backend confirmed the new position synchronously.
    Completed,
    /// The seek was accepted but did not settle within the wait bound.
    Pending,
    /// The backend rejected the seek.
    Failed(String),
}

/// A media decoding engine.
pub trait DecodeBackend {
    type Discoverer: Discoverer;
    type Stream: DecodeStream;

    /// Create a fresh discovery resource bounded by `timeout` per query.
    fn discoverer(&self, timeout: Duration) -> Result<Self::Discoverer, BackendError>;

    /// Open `path`, link its first audio stream to a sink with `caps`, and preroll.
    fn open_stream(&self, path: &Path, caps: &SinkCaps) -> Result<Self::Stream, BackendError>;
}

/// One-shot metadata query resource. Dropped after each attempt.
pub trait Discoverer {
    fn discover(&mut self, uri: &str) -> Result<Discovery, BackendError>;
}

/// An opened, prerolled decode stream.
pub trait DecodeStream: Send {
    /// Layout latched during negotiation.
    fn format(&self) -> StreamFormat;

    /// Next block of interleaved samples, or `None` at end of stream.
    ///
    /// The slice is only valid until the next call on this stream.
    fn pull(&mut self) -> Option<&[f32]>;

    /// Flushing, accurate seek. Waits at most `wait` for the new position to settle.
    fn seek(&mut self, seconds: f64, wait: Duration) -> SeekOutcome;

    /// Current position in seconds, `None` if it cannot be determined.
    fn query_position(&self) -> Option<f64>;

    fn is_eos(&self) -> bool;

    /// Transition to idle and drop decode state. Further pulls return `None`.
    fn stop(&mut self);
}

/// Map a `file://` URI or plain path to a filesystem path.
///
/// URIs are percent-decoded (`my%20song.wav` becomes `my song.wav`); plain paths are taken as-is.
pub fn uri_to_path(uri: &str) -> PathBuf {
    let Some(rest) = uri.strip_prefix("file://") else {
        return PathBuf::from(uri);
    };
    let rest = rest.strip_prefix("localhost").unwrap_or(rest);
    match urlencoding::decode(rest) {
        Ok(decoded) => PathBuf::from(decoded.into_owned()),
        Err(_) => PathBuf::from(rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_caps_bounds_are_inclusive() {
        let caps = SinkCaps {
            channels: 1..=16,
            rate: 8_000..=96_000,
        };
        assert!(caps.accepts(1, 8_000));
        assert!(caps.accepts(16, 96_000));
        assert!(!caps.accepts(0, 44_100));
        assert!(!caps.accepts(17, 44_100));
        assert!(!caps.accepts(2, 192_000));
    }

    #[test]
    fn uri_to_path_strips_file_scheme() {
        assert_eq!(uri_to_path("file:///tmp/a.wav"), PathBuf::from("/tmp/a.wav"));
        assert_eq!(uri_to_path("/tmp/a.wav"), PathBuf::from("/tmp/a.wav"));
        assert_eq!(uri_to_path("a.wav"), PathBuf::from("a.wav"));
    }

    #[test]
    fn uri_to_path_percent_decodes_uris_only() {
        assert_eq!(
            uri_to_path("file:///tmp/x/my%20song.wav"),
            PathBuf::from("/tmp/x/my song.wav")
        );
        assert_eq!(
            uri_to_path("file://localhost/tmp/caf%C3%A9.flac"),
            PathBuf::from("/tmp/café.flac")
        );
        assert_eq!(uri_to_path("/tmp/100%25.wav"), PathBuf::from("/tmp/100%25.wav"));
    }
}
