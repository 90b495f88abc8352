//! Fixed-period adapter between a shared [`DecodePipeline`] and a device callback.
//!
//! Device periods rarely line up with decoded block sizes, so [`PipelineSource`] keeps the
//! unread tail of the last block and serves it first on the next period. It never waits on
//! the pipeline lock: while another thread holds it (seek, position query) the period is
//! silence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::DecodeStream;
use crate::decode::DecodePipeline;
use crate::symphonia_backend::SymphoniaStream;

/// Carry-over reserved up front, in samples. Covers the largest blocks Symphonia's decoders
/// emit for up to 8 channels, so the callback does not allocate in steady state.
pub const DEFAULT_CARRY_CAPACITY: usize = 8 * 8192;

/// Pipeline shared between the controlling thread and the real-time callback.
pub type SharedPipeline<S = SymphoniaStream> = Arc<Mutex<DecodePipeline<S>>>;

/// Caller-side handle for a [`PipelineSource`] that has been moved into a device.
#[derive(Clone, Debug, Default)]
pub struct SourceControl {
    ended: Arc<AtomicBool>,
    flush: Arc<AtomicBool>,
}

impl SourceControl {
    /// Set once the pipeline has reached end of stream.
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Drop carried-over samples and clear the ended flag. Call after a successful seek.
    pub fn reset(&self) {
        self.flush.store(true, Ordering::SeqCst);
        self.ended.store(false, Ordering::SeqCst);
    }
}

pub struct PipelineSource<S: DecodeStream = SymphoniaStream> {
    pipeline: SharedPipeline<S>,
    carry: Vec<f32>,
    carry_pos: usize,
    control: SourceControl,
}

impl<S: DecodeStream> PipelineSource<S> {
    pub fn new(pipeline: SharedPipeline<S>) -> Self {
        Self::with_capacity(pipeline, DEFAULT_CARRY_CAPACITY)
    }

    /// Reserve room for `carry_samples` of carry-over before the first period.
    pub fn with_capacity(pipeline: SharedPipeline<S>, carry_samples: usize) -> Self {
        Self {
            pipeline,
            carry: Vec::with_capacity(carry_samples),
            carry_pos: 0,
            control: SourceControl::default(),
        }
    }

    pub fn control(&self) -> SourceControl {
        self.control.clone()
    }

    /// Fill all of `out` with interleaved samples.
    pub fn fill(&mut self, out: &mut [f32]) {
        if self.control.flush.swap(false, Ordering::SeqCst) {
            self.carry.clear();
            self.carry_pos = 0;
        }

        let mut written = self.drain_carry(out);
        if written == out.len() {
            return;
        }
        if self.control.is_ended() {
            out[written..].fill(0.0);
            return;
        }

        let Ok(mut pipeline) = self.pipeline.try_lock() else {
            out[written..].fill(0.0);
            return;
        };

        while written < out.len() {
            let block = pipeline.read();
            if block.samples.is_empty() {
                break;
            }
            let take = block.samples.len().min(out.len() - written);
            out[written..written + take].copy_from_slice(&block.samples[..take]);
            self.carry.clear();
            self.carry.extend_from_slice(&block.samples[take..]);
            self.carry_pos = 0;
            written += take;

            if pipeline.is_eos() {
                self.control.ended.store(true, Ordering::SeqCst);
                self.carry.clear();
                break;
            }
        }
        out[written..].fill(0.0);
    }

    fn drain_carry(&mut self, out: &mut [f32]) -> usize {
        let available = &self.carry[self.carry_pos..];
        let take = available.len().min(out.len());
        out[..take].copy_from_slice(&available[..take]);
        self.carry_pos += take;
        if self.carry_pos == self.carry.len() {
            self.carry.clear();
            self.carry_pos = 0;
        }
        take
    }
}

impl<S: DecodeStream + 'static> PipelineSource<S> {
    /// Consume the adapter into a callback for [`crate::OutputDevice::set_sample_source`].
    pub fn into_sample_source(mut self) -> impl FnMut(&mut [f32]) + Send + 'static {
        move |out: &mut [f32]| self.fill(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::tests::{FakeStream, open_fake};

    fn source(blocks: Vec<Vec<f32>>) -> (PipelineSource<FakeStream>, SharedPipeline<FakeStream>) {
        let shared = Arc::new(Mutex::new(open_fake(blocks)));
        (PipelineSource::new(shared.clone()), shared)
    }

    #[test]
    fn periods_span_block_boundaries() {
        let (mut src, _shared) = source(vec![vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![7.0, 8.0]]);
        let mut out = [0.0f32; 4];

        src.fill(&mut out);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
        src.fill(&mut out);
        assert_eq!(out, [5.0, 6.0, 7.0, 8.0]);
        assert!(!src.control().is_ended());
    }

    #[test]
    fn end_of_stream_pads_silence_and_raises_flag() {
        let (mut src, _shared) = source(vec![vec![0.5; 6]]);
        let control = src.control();
        let mut out = [1.0f32; 8];

        src.fill(&mut out);
        assert_eq!(&out[..6], &[0.5; 6]);
        assert_eq!(&out[6..], &[0.0; 2]);
        assert!(control.is_ended());

        out.fill(1.0);
        src.fill(&mut out);
        assert_eq!(out, [0.0; 8]);
    }

    #[test]
    fn locked_pipeline_yields_silence() {
        let (mut src, shared) = source(vec![vec![0.5; 4]]);
        let guard = shared.lock().unwrap();
        let mut out = [1.0f32; 4];
        src.fill(&mut out);
        assert_eq!(out, [0.0; 4]);
        drop(guard);

        src.fill(&mut out);
        assert_eq!(out, [0.5; 4]);
    }

    #[test]
    fn reset_after_seek_discards_carry() {
        let (mut src, shared) = source(vec![vec![1.0, 2.0, 3.0, 4.0]]);
        let control = src.control();
        let mut out = [0.0f32; 2];
        src.fill(&mut out);
        assert_eq!(out, [1.0, 2.0]);

        assert!(shared.lock().unwrap().seek(0.0));
        control.reset();
        src.fill(&mut out);
        assert_eq!(out, [1.0, 2.0]);
        assert!(!control.is_ended());
    }

    #[test]
    fn carry_does_not_reallocate_within_reserve() {
        let shared = Arc::new(Mutex::new(open_fake(vec![vec![0.25; 96], vec![0.5; 128]])));
        let mut src = PipelineSource::with_capacity(shared, 128);
        let reserved = src.carry.capacity();
        let ptr = src.carry.as_ptr();

        let mut out = [0.0f32; 32];
        for _ in 0..6 {
            src.fill(&mut out);
        }
        assert_eq!(src.carry.capacity(), reserved);
        assert_eq!(src.carry.as_ptr(), ptr);
    }

    #[test]
    fn closed_pipeline_yields_silence() {
        let (src, shared) = source(vec![vec![1.0; 4]]);
        shared.lock().unwrap().close();
        let mut callback = src.into_sample_source();
        let mut out = [1.0f32; 4];
        callback(&mut out);
        assert_eq!(out, [0.0; 4]);
    }
}
