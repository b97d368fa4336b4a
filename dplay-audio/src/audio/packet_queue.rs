//! Blocking packet queue between the demuxer and the decode engine
//!
//! Thread-safe FIFO of compressed packets. `pop()` blocks until a packet is
//! available or the queue is closed; closing is how shutdown wakes a decode
//! loop that is parked inside `pop()`.
//!
//! Consumers can also claim the queue by epoch: `interrupt()` starts a new
//! epoch, and `pop_in_epoch` with an older epoch returns `None` from then on.
//! This retires a consumer that was replaced while parked in a pop.

use crate::audio::types::Packet;
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

struct QueueInner {
    packets: VecDeque<Packet>,
    closed: bool,
    epoch: u64,
}

/// Packet queue shared by one producer (demuxer) and one consumer (engine).
pub struct PacketQueue {
    inner: Mutex<QueueInner>,

    /// Signalled when a packet is pushed or the queue is closed
    not_empty: Condvar,

    /// Signalled when a packet is popped or the queue is closed
    not_full: Condvar,

    /// Maximum queued packets (None = unbounded)
    capacity: Option<usize>,
}

impl PacketQueue {
    /// Create a queue. `capacity` of 0 means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                packets: VecDeque::new(),
                closed: false,
                epoch: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: (capacity > 0).then_some(capacity),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a packet, blocking while a bounded queue is full.
    ///
    /// # Errors
    /// Returns `InvalidState` once the queue has been closed.
    pub fn push(&self, packet: Packet) -> Result<()> {
        let mut inner = self.lock();

        if let Some(capacity) = self.capacity {
            while inner.packets.len() >= capacity && !inner.closed {
                inner = self
                    .not_full
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        if inner.closed {
            return Err(Error::InvalidState("Packet queue is closed".to_string()));
        }

        inner.packets.push_back(packet);
        trace!("Packet queued ({} pending)", inner.packets.len());
        drop(inner);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest packet, blocking until one is available.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<Packet> {
        self.pop_where(|_| true)
    }

    /// Like `pop`, but returns `None` as soon as the queue's epoch is no
    /// longer `epoch`, without taking a packet.
    pub fn pop_in_epoch(&self, epoch: u64) -> Option<Packet> {
        self.pop_where(|current| current == epoch)
    }

    fn pop_where(&self, current_epoch: impl Fn(u64) -> bool) -> Option<Packet> {
        let mut inner = self.lock();

        loop {
            if !current_epoch(inner.epoch) {
                trace!("Consumer epoch superseded");
                return None;
            }
            if let Some(packet) = inner.packets.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Some(packet);
            }
            if inner.closed {
                return None;
            }
            inner = self
                .not_empty
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Current consumer epoch
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Start a new consumer epoch and wake every blocked consumer.
    ///
    /// Returns the new epoch. Consumers popping with an older epoch get
    /// `None`; queued packets stay for the new consumer.
    pub fn interrupt(&self) -> u64 {
        let epoch = {
            let mut inner = self.lock();
            inner.epoch += 1;
            inner.epoch
        };
        self.not_empty.notify_all();
        epoch
    }

    /// Remove the oldest packet without blocking
    pub fn try_pop(&self) -> Option<Packet> {
        let packet = self.lock().packets.pop_front();
        if packet.is_some() {
            self.not_full.notify_one();
        }
        packet
    }

    /// Close the queue and wake every blocked producer and consumer.
    ///
    /// Packets already queued can still be popped.
    pub fn close(&self) {
        let mut inner = self.lock();
        if !inner.closed {
            inner.closed = true;
            debug!("Packet queue closed ({} pending)", inner.packets.len());
        }
        drop(inner);

        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Drop all queued packets
    pub fn clear(&self) {
        let dropped = {
            let mut inner = self.lock();
            let count = inner.packets.len();
            inner.packets.clear();
            count
        };
        if dropped > 0 {
            debug!("Dropped {} queued packets", dropped);
        }
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().packets.is_empty()
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new(0)
    }
}
