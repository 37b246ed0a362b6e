//! Fixed-capacity sample ring between the capture callback and the worker

use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer};
use tracing::trace;

/// Samples held by the ring (about 93ms at 44.1kHz).
pub const MIC_RING_CAPACITY: usize = 4096;

/// Circular buffer of mono microphone samples.
///
/// Writes that do not fit are truncated to the free space; reads return the
/// oldest samples first.
pub struct MicRingBuffer {
    ring: HeapRb<i16>,
}

impl Default for MicRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MicRingBuffer {
    pub fn new() -> Self {
        Self::with_capacity(MIC_RING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity),
        }
    }

    /// Append samples, returning how many were stored.
    pub fn write(&mut self, samples: &[i16]) -> usize {
        let written = self.ring.push_slice(samples);
        if written < samples.len() {
            trace!("Mic ring full: dropped {} samples", samples.len() - written);
        }
        written
    }

    /// Move up to `out.len()` of the oldest samples into `out`.
    pub fn read(&mut self, out: &mut [i16]) -> usize {
        self.ring.pop_slice(out)
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity().get()
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }
}
