//! Decode-resample engine
//!
//! Pulls one packet at a time from the packet queue, decodes it, converts the
//! frame to the output format and hands back one ready-to-play PCM buffer.
//! Called from the device's consumption callback (and once to prime).

use crate::audio::clock::PlaybackClock;
use crate::audio::converter::SampleFormatConverter;
use crate::audio::decoder::AudioDecoder;
use crate::audio::packet_queue::PacketQueue;
use crate::audio::types::{pcm_byte_len, StreamDescriptor, TimeBase};
use dplay_common::status::PlayerStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use tracing::{debug, trace, warn};

/// Engine slot shared between the lifecycle controller and the device
/// callback.
pub type SharedEngine = Arc<EngineSlot>;

/// Holds the active engine, plus a replacement installed while the device
/// callback was inside the active one.
///
/// The callback keeps `active` locked for a whole `produce_next_buffer`,
/// which may block on the packet queue. `install` never waits for it: the
/// new engine claims the packet queue (retiring the old engine's pop) and
/// parks in `pending` until the callback swaps it in.
#[derive(Default)]
pub struct EngineSlot {
    active: Mutex<Option<DecodeResampleEngine>>,
    pending: Mutex<Option<DecodeResampleEngine>>,
}

impl EngineSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<DecodeResampleEngine>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_lock_active(&self) -> Option<MutexGuard<'_, Option<DecodeResampleEngine>>> {
        match self.active.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Lock the active engine, waiting for an in-flight callback.
    pub fn lock_active(&self) -> MutexGuard<'_, Option<DecodeResampleEngine>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `engine` without blocking.
    ///
    /// Returns true when it became active immediately, false when it waits
    /// for the running callback to pick it up.
    pub fn install(&self, mut engine: DecodeResampleEngine) -> bool {
        {
            let mut pending = self.lock_pending();
            engine.claim_packet_queue();
            if let Some(mut stale) = pending.replace(engine) {
                stale.release();
            }
        }

        // Fails only while the callback holds the active engine; it checks
        // `pending` after letting go.
        match self.try_lock_active() {
            Some(mut active) => self.promote_pending(&mut active),
            None => {
                debug!("Engine busy in callback, replacement pending");
                false
            }
        }
    }

    /// Move a pending engine into `active`, releasing the one it replaces.
    pub fn promote_pending(&self, active: &mut Option<DecodeResampleEngine>) -> bool {
        let Some(next) = self.lock_pending().take() else {
            return false;
        };
        if let Some(mut previous) = active.replace(next) {
            debug!("Replacing engine from previous stream analysis");
            previous.release();
        }
        true
    }

    pub fn has_pending(&self) -> bool {
        self.lock_pending().is_some()
    }

    /// Release the pending engine, and the active one unless the callback
    /// is using it. Never blocks.
    pub fn discard(&self) {
        if let Some(mut stale) = self.lock_pending().take() {
            stale.release();
        }
        if let Some(mut active) = self.try_lock_active() {
            if let Some(mut stale) = active.take() {
                stale.release();
            }
        }
    }

    /// Take every engine out of the slot, waiting for an in-flight
    /// callback. The pending engine, if any, is released here.
    pub fn take(&self) -> Option<DecodeResampleEngine> {
        let mut active = self.lock_active();
        self.promote_pending(&mut active);
        active.take()
    }

    /// True when an engine is active or pending. Never blocks; an active
    /// engine busy in the callback counts as installed.
    pub fn is_installed(&self) -> bool {
        if self.has_pending() {
            return true;
        }
        match self.try_lock_active() {
            Some(active) => active.is_some(),
            None => true,
        }
    }
}

/// Result of stream analysis, delivered once per stream
pub struct StreamAnalysis {
    pub descriptor: StreamDescriptor,
    pub time_base: TimeBase,
    pub decoder: Box<dyn AudioDecoder>,
}

impl StreamAnalysis {
    pub fn new(
        descriptor: StreamDescriptor,
        time_base: TimeBase,
        decoder: Box<dyn AudioDecoder>,
    ) -> Self {
        Self {
            descriptor,
            time_base,
            decoder,
        }
    }
}

/// Counters for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub frames_decoded: u64,
    pub packets_rejected: u64,
    pub packets_without_frame: u64,
    pub buffers_produced: u64,
    pub discontinuities: u64,
}

pub struct DecodeResampleEngine {
    decoder: Option<Box<dyn AudioDecoder>>,
    converter: Option<SampleFormatConverter>,
    packets: Arc<PacketQueue>,
    /// Packet queue epoch this engine reads in
    epoch: u64,
    status: Arc<PlayerStatus>,
    clock: Arc<PlaybackClock>,
    time_base: TimeBase,

    /// Extrapolated timestamp for a frame that carries none
    next_pts: Option<i64>,

    /// Timestamp of the last packet, to detect a backwards jump
    last_packet_pts: Option<i64>,

    /// Resampler tail already flushed at end of stream
    flushed: bool,

    stats: EngineStats,
}

impl DecodeResampleEngine {
    pub fn new(
        decoder: Box<dyn AudioDecoder>,
        converter: SampleFormatConverter,
        time_base: TimeBase,
        packets: Arc<PacketQueue>,
        status: Arc<PlayerStatus>,
        clock: Arc<PlaybackClock>,
    ) -> Self {
        let epoch = packets.epoch();
        Self {
            decoder: Some(decoder),
            converter: Some(converter),
            packets,
            epoch,
            status,
            clock,
            time_base,
            next_pts: None,
            last_packet_pts: None,
            flushed: false,
            stats: EngineStats::default(),
        }
    }

    /// Become the packet queue's only consumer. A previous engine still
    /// parked in `pop` wakes up and reads nothing more.
    fn claim_packet_queue(&mut self) {
        self.epoch = self.packets.interrupt();
    }

    /// Produce the next PCM buffer.
    ///
    /// Loops until a packet decodes and converts to at least one sample.
    /// Rejected packets and packets that yield no frame are discarded. May
    /// block inside the packet queue; closing the queue wakes it.
    ///
    /// Returns an empty slice when the exit flag is set, the session is
    /// fatal, the queue is closed and drained, or the engine was released.
    /// The slice borrows the converter's reusable buffer and is only valid
    /// until the next call.
    pub fn produce_next_buffer(&mut self) -> &[u8] {
        let Some(byte_len) = self.fill_next() else {
            return &[];
        };
        match self.converter.as_ref() {
            Some(converter) => &converter.output()[..byte_len],
            None => &[],
        }
    }

    fn fill_next(&mut self) -> Option<usize> {
        while !self.status.is_exit() && !self.status.is_fatal() {
            if self.decoder.is_none() || self.converter.is_none() {
                return None;
            }

            let Some(packet) = self.packets.pop_in_epoch(self.epoch) else {
                return self.finish();
            };

            let (Some(decoder), Some(converter)) =
                (self.decoder.as_mut(), self.converter.as_mut())
            else {
                return None;
            };

            if let (Some(last), Some(pts)) = (self.last_packet_pts, packet.pts) {
                if pts < last {
                    debug!("Timestamp jumped back {} -> {}, resetting decoder", last, pts);
                    decoder.reset();
                    converter.reset();
                    self.next_pts = None;
                    self.stats.discontinuities += 1;
                }
            }
            if packet.pts.is_some() {
                self.last_packet_pts = packet.pts;
            }

            let frame = match decoder.decode(&packet) {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.stats.packets_without_frame += 1;
                    trace!("Packet produced no frame");
                    continue;
                }
                Err(e) => {
                    self.stats.packets_rejected += 1;
                    debug!("Discarding packet: {}", e);
                    continue;
                }
            };
            self.stats.frames_decoded += 1;

            let count = match converter.convert(&frame) {
                Ok(count) => count,
                Err(e) => {
                    warn!("Dropping frame: {}", e);
                    continue;
                }
            };

            let pts = frame.pts.or(self.next_pts);
            if let Some(ts) = pts {
                self.next_pts = Some(ts.saturating_add(
                    self.time_base
                        .ticks_for_frames(frame.nb_samples, frame.sample_rate),
                ));
            }

            if count == 0 {
                trace!("Frame buffered by resampler, fetching next packet");
                continue;
            }

            if let Some(ts) = pts {
                let now = self.clock.advance_to(self.time_base.seconds(ts));
                trace!("Audio clock at {:.3}s", now);
            }

            self.stats.buffers_produced += 1;
            return Some(pcm_byte_len(count));
        }

        None
    }

    /// The packet source gave nothing more. At a real end of stream, emit
    /// the resampler's pending tail once.
    fn finish(&mut self) -> Option<usize> {
        if self.packets.epoch() != self.epoch {
            debug!("Engine superseded by a newer stream analysis");
            return None;
        }
        debug!("Packet source exhausted");
        if self.flushed {
            return None;
        }
        self.flushed = true;

        let converter = self.converter.as_mut()?;
        match converter.flush() {
            Ok(0) => None,
            Ok(count) => {
                self.stats.buffers_produced += 1;
                Some(pcm_byte_len(count))
            }
            Err(e) => {
                warn!("Dropping resampler tail: {}", e);
                None
            }
        }
    }

    /// True when a packet is waiting, so `produce_next_buffer` will not block
    /// on the queue.
    pub fn has_pending_input(&self) -> bool {
        self.converter.is_some() && !self.packets.is_empty()
    }

    /// Free the decoder, then the converter. Each is freed at most once.
    pub fn release(&mut self) {
        if self.decoder.take().is_some() {
            debug!("Decoder released");
        }
        if self.converter.take().is_some() {
            debug!("Converter released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.decoder.is_none() && self.converter.is_none()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn clock(&self) -> &Arc<PlaybackClock> {
        &self.clock
    }
}
