//! Device-side buffer queue
//!
//! The output device drains PCM buffers from this queue and, each time it
//! finishes one, invokes the registered consumption callback so the producer
//! can enqueue the next buffer. Submitted PCM is copied in, so the producer's
//! reusable buffer is never aliased by the device.

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Invoked once for every buffer the device finishes consuming
pub type ConsumedCallback = Box<dyn FnMut(&BufferQueue) + Send>;

/// Bytes per interleaved stereo S16 frame
const FRAME_BYTES: usize = 4;

struct Slots {
    queued: VecDeque<Vec<u8>>,
    /// Byte offset into the front buffer
    read_pos: usize,
    /// Drained buffers kept for reuse
    spare: Vec<Vec<u8>>,
}

/// Bounded queue of stereo S16LE buffers awaiting playback.
pub struct BufferQueue {
    depth: usize,
    slots: Mutex<Slots>,
    callback: Mutex<Option<ConsumedCallback>>,
    /// Set by `request_refill`; the device runs the callback on its next read
    refill_requested: AtomicBool,
}

impl BufferQueue {
    /// Create a queue holding at most `depth` buffers (minimum 1)
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            depth,
            slots: Mutex::new(Slots {
                queued: VecDeque::with_capacity(depth),
                read_pos: 0,
                spare: Vec::with_capacity(depth),
            }),
            callback: Mutex::new(None),
            refill_requested: AtomicBool::new(false),
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_callback(&self) -> MutexGuard<'_, Option<ConsumedCallback>> {
        self.callback.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install the consumption callback, replacing any previous one
    pub fn register_callback(&self, callback: ConsumedCallback) {
        *self.lock_callback() = Some(callback);
    }

    /// Remove the consumption callback.
    ///
    /// Blocks until an in-flight invocation has returned; no invocation
    /// starts afterwards. Must not be called from inside the callback.
    pub fn unregister_callback(&self) {
        let previous = self.lock_callback().take();
        if previous.is_some() {
            trace!("Buffer queue callback unregistered");
        }
    }

    pub fn has_callback(&self) -> bool {
        self.lock_callback().is_some()
    }

    /// Copy `pcm` into the queue.
    ///
    /// # Errors
    /// - Empty buffer, or length not a whole number of stereo S16 frames
    /// - Queue already holds `depth` buffers
    pub fn enqueue(&self, pcm: &[u8]) -> Result<()> {
        if pcm.is_empty() {
            return Err(Error::AudioOutput("Cannot enqueue empty buffer".to_string()));
        }
        if pcm.len() % FRAME_BYTES != 0 {
            return Err(Error::AudioOutput(format!(
                "Buffer length {} is not a multiple of {} bytes",
                pcm.len(),
                FRAME_BYTES
            )));
        }

        let mut slots = self.lock_slots();
        if slots.queued.len() >= self.depth {
            return Err(Error::AudioOutput(format!(
                "Buffer queue full ({} buffers)",
                self.depth
            )));
        }

        let mut buf = slots.spare.pop().unwrap_or_default();
        buf.clear();
        buf.extend_from_slice(pcm);
        slots.queued.push_back(buf);
        trace!("Enqueued {} bytes ({} queued)", pcm.len(), slots.queued.len());
        Ok(())
    }

    /// Run the consumption callback once, if one is registered.
    ///
    /// Called by the device after each drained buffer, and once by the sink
    /// to prime the queue.
    pub fn notify_consumed(&self) {
        let mut callback = self.lock_callback();
        if let Some(cb) = callback.as_mut() {
            cb(self);
        }
    }

    /// Ask the device to run the callback on its next read even though no
    /// buffer was drained. Used when the producer becomes ready after the
    /// queue ran dry.
    pub fn request_refill(&self) {
        self.refill_requested.store(true, Ordering::Release);
    }

    /// Fill `out` with interleaved samples from the queue.
    ///
    /// Returns the number of samples copied; the remainder of `out` is
    /// zero-filled. The callback runs once per fully drained buffer, with no
    /// queue lock held. A pending `request_refill` runs it once up front.
    pub fn read_samples(&self, out: &mut [i16]) -> usize {
        if self.refill_requested.swap(false, Ordering::AcqRel) {
            self.notify_consumed();
        }

        let mut written = 0;

        while written < out.len() {
            let drained = {
                let mut guard = self.lock_slots();
                let slots = &mut *guard;
                let Some(front) = slots.queued.front() else {
                    break;
                };

                let available = (front.len() - slots.read_pos) / 2;
                let count = available.min(out.len() - written);
                let bytes = &front[slots.read_pos..slots.read_pos + count * 2];
                for (dst, src) in out[written..written + count]
                    .iter_mut()
                    .zip(bytes.chunks_exact(2))
                {
                    *dst = i16::from_le_bytes([src[0], src[1]]);
                }
                written += count;
                slots.read_pos += count * 2;

                if slots.read_pos >= front.len() {
                    slots.read_pos = 0;
                    if let Some(buf) = slots.queued.pop_front() {
                        slots.spare.push(buf);
                    }
                    true
                } else {
                    false
                }
            };

            if drained {
                self.notify_consumed();
            }
        }

        out[written..].fill(0);
        written
    }

    /// Drop every queued buffer
    pub fn clear(&self) {
        let mut slots = self.lock_slots();
        while let Some(buf) = slots.queued.pop_front() {
            slots.spare.push(buf);
        }
        slots.read_pos = 0;
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of buffers waiting to be played
    pub fn queued(&self) -> usize {
        self.lock_slots().queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_slots().queued.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_enqueue_copies_input() {
        let queue = BufferQueue::new(2);
        let mut data = pcm(&[1, 2, 3, 4]);
        queue.enqueue(&data).unwrap();
        data.fill(0xFF);

        let mut out = [0i16; 4];
        assert_eq!(queue.read_samples(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_enqueue_rejects_bad_buffers() {
        let queue = BufferQueue::new(1);
        assert!(queue.enqueue(&[]).is_err());
        assert!(queue.enqueue(&[0, 1, 2]).is_err());

        queue.enqueue(&pcm(&[0, 0])).unwrap();
        assert!(queue.enqueue(&pcm(&[0, 0])).is_err());
        assert_eq!(queue.queued(), 1);
    }

    #[test]
    fn test_read_zero_fills_underrun() {
        let queue = BufferQueue::new(2);
        queue.enqueue(&pcm(&[7, 8])).unwrap();

        let mut out = [99i16; 6];
        assert_eq!(queue.read_samples(&mut out), 2);
        assert_eq!(out, [7, 8, 0, 0, 0, 0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_partial_reads_keep_position() {
        let queue = BufferQueue::new(2);
        queue.enqueue(&pcm(&[1, 2, 3, 4, 5, 6])).unwrap();

        let mut out = [0i16; 4];
        assert_eq!(queue.read_samples(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(queue.queued(), 1);

        assert_eq!(queue.read_samples(&mut out), 2);
        assert_eq!(out, [5, 6, 0, 0]);
    }

    #[test]
    fn test_callback_refills_once_per_drained_buffer() {
        let queue = BufferQueue::new(2);
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            queue.register_callback(Box::new(move |q: &BufferQueue| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    q.enqueue(&pcm(&[n as i16 + 10, n as i16 + 10])).unwrap();
                }
            }));
        }

        queue.enqueue(&pcm(&[1, 1])).unwrap();

        let mut out = [0i16; 8];
        assert_eq!(queue.read_samples(&mut out), 6);
        assert_eq!(out, [1, 1, 10, 10, 11, 11, 0, 0]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_notify_without_callback_is_noop() {
        let queue = BufferQueue::new(2);
        queue.notify_consumed();
        assert!(queue.is_empty());
        assert!(!queue.has_callback());
    }

    #[test]
    fn test_unregister_waits_for_in_flight_callback() {
        let queue = Arc::new(BufferQueue::new(2));
        let entered = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        {
            let entered = Arc::clone(&entered);
            let finished = Arc::clone(&finished);
            queue.register_callback(Box::new(move |_: &BufferQueue| {
                entered.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
                finished.store(true, Ordering::SeqCst);
            }));
        }

        let device = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.notify_consumed())
        };

        while !entered.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        queue.unregister_callback();
        assert!(finished.load(Ordering::SeqCst));
        assert!(!queue.has_callback());

        device.join().unwrap();
    }

    #[test]
    fn test_clear_resets_read_position() {
        let queue = BufferQueue::new(2);
        queue.enqueue(&pcm(&[1, 2, 3, 4])).unwrap();
        let mut out = [0i16; 2];
        queue.read_samples(&mut out);

        queue.clear();
        assert!(queue.is_empty());

        queue.enqueue(&pcm(&[9, 9])).unwrap();
        assert_eq!(queue.read_samples(&mut out), 2);
        assert_eq!(out, [9, 9]);
    }

    #[test]
    fn test_requested_refill_runs_on_next_read() {
        let queue = BufferQueue::new(2);
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            queue.register_callback(Box::new(move |q: &BufferQueue| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    q.enqueue(&pcm(&[5, 5])).unwrap();
                }
            }));
        }

        // Dry queue: reads do not call back on their own
        let mut out = [0i16; 2];
        assert_eq!(queue.read_samples(&mut out), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        queue.request_refill();
        assert_eq!(queue.read_samples(&mut out), 2);
        assert_eq!(out, [5, 5]);
        // Once for the request, once for the drained buffer
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert_eq!(queue.read_samples(&mut out), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
