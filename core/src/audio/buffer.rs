//! Sample buffer shared by the worker (producer) and the output callback
//! (consumer)

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer};
use tracing::{trace, warn};

use crate::machine::StereoFrame;

/// Storage beyond the backpressure threshold, so one frame of output (plus
/// whatever the device has not consumed yet) always fits.
pub const HEADROOM: usize = 4096;

/// Bounded stereo sample queue guarded by one lock.
pub struct SampleBuffer {
    ring: Mutex<HeapRb<StereoFrame>>,
    drained: Condvar,
    threshold: usize,
}

impl SampleBuffer {
    /// `threshold` is the device buffer size in frames; the producer waits
    /// while more than this many frames are queued.
    pub fn new(threshold: usize) -> Self {
        Self {
            ring: Mutex::new(HeapRb::new(threshold + HEADROOM)),
            drained: Condvar::new(),
            threshold,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HeapRb<StereoFrame>> {
        self.ring.lock().unwrap_or_else(|e| {
            warn!("Audio buffer mutex poisoned; continuing");
            e.into_inner()
        })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn capacity(&self) -> usize {
        self.threshold + HEADROOM
    }

    pub fn len(&self) -> usize {
        self.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue frames, returning how many fit. Frames that do not fit are
    /// dropped.
    pub fn push(&self, frames: &[StereoFrame]) -> usize {
        let pushed = self.lock().push_slice(frames);
        if pushed < frames.len() {
            trace!("Audio buffer overflow: dropped {} frames", frames.len() - pushed);
        }
        pushed
    }

    /// Move up to `out.len()` frames into `out` and wake the producer.
    ///
    /// The producer is notified after every read, including empty ones.
    pub fn read(&self, out: &mut [StereoFrame]) -> usize {
        let read = self.lock().pop_slice(out);
        self.drained.notify_one();
        read
    }

    /// Block while more than `threshold` frames are queued, for at most
    /// `timeout`. Returns false if the wait timed out.
    pub fn wait_for_space(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let threshold = self.threshold;
        let (guard, result) = match self
            .drained
            .wait_timeout_while(guard, timeout, |ring| ring.occupied_len() > threshold)
        {
            Ok(r) => r,
            Err(e) => {
                warn!("Audio buffer condvar wait mutex poisoned; continuing");
                e.into_inner()
            }
        };
        if result.timed_out() {
            trace!(
                "Audio sync timed out with {} frames queued",
                guard.occupied_len()
            );
            return false;
        }
        true
    }

    /// Discard all queued frames.
    pub fn clear(&self) {
        self.lock().clear();
        self.drained.notify_one();
    }
}
