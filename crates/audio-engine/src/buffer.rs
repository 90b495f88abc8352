//! Growable interleaved `f32` sample storage owned by a decode pipeline.
//!
//! `capacity` is the allocated length and never shrinks; `size` is the logically valid prefix.
//! Growth is exact (no amortized over-allocation): block sizes are bounded by the negotiated
//! stream parameters, so growth stops after the first few blocks.

pub struct SampleBuffer {
    samples: Vec<f32>,
    size: usize,
}

impl SampleBuffer {
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            samples: vec![0.0; initial_capacity],
            size: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Grow storage to exactly `n` samples if it is currently smaller.
    pub fn ensure_capacity(&mut self, n: usize) {
        if n > self.samples.len() {
            self.samples.resize(n, 0.0);
        }
    }

    /// Replace the valid prefix with `data`.
    pub fn overwrite(&mut self, data: &[f32]) {
        self.ensure_capacity(data.len());
        self.samples[..data.len()].copy_from_slice(data);
        self.size = data.len();
    }

    /// Make the first `n` samples valid and silent.
    pub fn fill_zero(&mut self, n: usize) {
        self.ensure_capacity(n);
        self.samples[..n].fill(0.0);
        self.size = n;
    }

    /// Read-only view of the valid prefix.
    pub fn view(&self) -> &[f32] {
        &self.samples[..self.size]
    }

    /// Drop the storage. Capacity becomes zero.
    pub(crate) fn release(&mut self) {
        self.samples = Vec::new();
        self.size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_with_initial_capacity() {
        let buf = SampleBuffer::new(64);
        assert_eq!(buf.capacity(), 64);
        assert_eq!(buf.size(), 0);
        assert!(buf.view().is_empty());
    }

    #[test]
    fn grows_to_exact_request() {
        let mut buf = SampleBuffer::new(64);
        buf.ensure_capacity(100);
        assert_eq!(buf.capacity(), 100);
        buf.ensure_capacity(80);
        assert_eq!(buf.capacity(), 100);
    }

    #[test]
    fn overwrite_after_ensure_does_not_grow() {
        let mut buf = SampleBuffer::new(4);
        buf.ensure_capacity(6);
        buf.overwrite(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(buf.capacity(), 6);
        assert_eq!(buf.view(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn smaller_overwrite_keeps_capacity() {
        let mut buf = SampleBuffer::new(4);
        buf.overwrite(&[1.0; 10]);
        buf.overwrite(&[2.0, 3.0]);
        assert_eq!(buf.capacity(), 10);
        assert_eq!(buf.size(), 2);
        assert_eq!(buf.view(), &[2.0, 3.0]);
    }

    #[test]
    fn fill_zero_silences_prefix() {
        let mut buf = SampleBuffer::new(4);
        buf.overwrite(&[1.0, 1.0, 1.0, 1.0]);
        let cap = buf.capacity();
        buf.fill_zero(cap);
        assert_eq!(buf.view(), &[0.0; 4]);
    }

    #[test]
    fn release_drops_storage() {
        let mut buf = SampleBuffer::new(64);
        buf.overwrite(&[1.0; 8]);
        buf.release();
        assert_eq!(buf.capacity(), 0);
        assert!(buf.view().is_empty());
    }
}
