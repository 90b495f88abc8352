//! Pull-based decode pipeline.
//!
//! Wraps a [`DecodeStream`] plus the pipeline-owned [`SampleBuffer`] and exposes a simple
//! read/seek/position surface:
//! - `read()` never fails: past end of stream it returns silence at the buffer's current capacity
//! - `seek()` reports success as a bool and leaves the pipeline usable on failure
//! - `position()` masks query failures to `0.0`
//!
//! A pipeline is single-writer. Share it across threads behind a mutex (see [`crate::source`]).

use std::path::Path;
use std::time::Duration;

use crate::backend::{DecodeBackend, DecodeStream, SeekOutcome, StreamFormat};
use crate::buffer::SampleBuffer;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::symphonia_backend::{SymphoniaBackend, SymphoniaStream};

/// A block of interleaved samples borrowed from the pipeline.
///
/// Valid until the next `read()`; copy it to retain the samples.
#[derive(Clone, Copy, Debug)]
pub struct SampleBlock<'a> {
    pub samples: &'a [f32],
    pub channels: u16,
    pub sample_rate: u32,
}

impl SampleBlock<'_> {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }
}

/// Decoding pipeline for a single file.
pub struct DecodePipeline<S: DecodeStream = SymphoniaStream> {
    stream: Option<S>,
    buffer: SampleBuffer,
    format: StreamFormat,
    seek_wait: Duration,
}

impl DecodePipeline<SymphoniaStream> {
    /// Open `path` with the Symphonia backend and default config.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(&SymphoniaBackend, path, &EngineConfig::default())
    }
}

impl<S: DecodeStream> DecodePipeline<S> {
    /// Open `path` on `backend`; returns once the first block is prerolled.
    pub fn open_with<B>(backend: &B, path: impl AsRef<Path>, config: &EngineConfig) -> Result<Self>
    where
        B: DecodeBackend<Stream = S>,
    {
        let path = path.as_ref();
        let stream = backend.open_stream(path, &config.sink_caps())?;
        let format = stream.format();
        tracing::info!(
            path = %path.display(),
            channels = format.channels,
            rate_hz = format.sample_rate,
            "decode pipeline opened"
        );
        Ok(Self {
            stream: Some(stream),
            buffer: SampleBuffer::new(config.initial_buffer_capacity),
            format,
            seek_wait: config.seek_wait,
        })
    }

    pub fn channels(&self) -> u16 {
        self.format.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Current sample buffer capacity in samples.
    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Pull the next block. Past end of stream, returns zeros at the current buffer capacity.
    ///
    /// After `close()` the block is empty.
    pub fn read(&mut self) -> SampleBlock<'_> {
        match self.stream.as_mut() {
            Some(stream) => match stream.pull() {
                Some(samples) => self.buffer.overwrite(samples),
                None => {
                    let capacity = self.buffer.capacity();
                    self.buffer.fill_zero(capacity);
                }
            },
            None => self.buffer.fill_zero(0),
        }
        SampleBlock {
            samples: self.buffer.view(),
            channels: self.format.channels,
            sample_rate: self.format.sample_rate,
        }
    }

    /// Flushing, accurate seek. `true` only when the backend confirmed completion in time.
    pub fn seek(&mut self, position_seconds: f64) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            tracing::warn!("seek on closed pipeline");
            return false;
        };
        match stream.seek(position_seconds, self.seek_wait) {
            SeekOutcome::Completed => true,
            SeekOutcome::Pending => {
                tracing::warn!(
                    position = position_seconds,
                    wait_ms = self.seek_wait.as_millis() as u64,
                    "seek did not complete within wait bound"
                );
                false
            }
            SeekOutcome::Failed(reason) => {
                tracing::warn!(position = position_seconds, reason = %reason, "seek failed");
                false
            }
        }
    }

    /// Playback position in seconds; `0.0` when it cannot be determined.
    pub fn position(&self) -> f64 {
        match self.stream.as_ref().and_then(|s| s.query_position()) {
            Some(pos) => pos,
            None => {
                tracing::debug!("position query failed");
                0.0
            }
        }
    }

    pub fn is_eos(&self) -> bool {
        self.stream.as_ref().is_none_or(|s| s.is_eos())
    }

    /// Stop the backend and release the sample buffer. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            self.buffer.release();
            tracing::debug!("decode pipeline closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

impl<S: DecodeStream> Drop for DecodePipeline<S> {
    fn drop(&mut self) {
        self.close();
    }
}
