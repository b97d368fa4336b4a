//! Lifecycle controller
//!
//! Owns every per-session resource (packet queue, clock, buffer queue,
//! engine slot, device thread) and orchestrates:
//! - Stream analysis: build the converter and install the engine
//! - Asynchronous start: device initialisation on a named worker thread
//! - Synchronous, idempotent release
//!
//! **Release order:**
//! 1. Mark `Releasing`
//! 2. Close and clear the packet queue (wakes a decode loop blocked in `pop`)
//! 3. Stop and join the device thread (unregisters the callback first, which
//!    waits for an in-flight invocation)
//! 4. Free the engine (decoder, then converter)
//! 5. Clear the buffer queue
//! 6. Mark `Released`

use crate::audio::buffer_queue::BufferQueue;
use crate::audio::clock::PlaybackClock;
use crate::audio::converter::SampleFormatConverter;
use crate::audio::output::{AudioOutputSink, DeviceFactory, SinkContext};
use crate::audio::packet_queue::PacketQueue;
use crate::error::{Error, Result};
use crate::playback::engine::{DecodeResampleEngine, EngineSlot, SharedEngine, StreamAnalysis};
use crate::playback::state::{LifecycleState, SharedLifecycle};
use dplay_common::config::{AudioSettings, PlayerConfig};
use dplay_common::events::EventBus;
use dplay_common::status::{ErrorSink, PlayerStatus, ThreadMode, DEVICE_INIT_ERROR_CODE};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Init worker handle; dropping `shutdown` tells the worker to stop the sink
struct DeviceThread {
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Audio rendering session.
pub struct AudioPlayer {
    settings: AudioSettings,
    status: Arc<PlayerStatus>,
    events: EventBus,
    error_sink: Arc<dyn ErrorSink>,
    lifecycle: SharedLifecycle,
    packets: Arc<PacketQueue>,
    clock: Arc<PlaybackClock>,
    buffer_queue: Arc<BufferQueue>,
    engine: SharedEngine,
    device_thread: Option<DeviceThread>,
}

impl AudioPlayer {
    /// Create a session. Errors are reported through `events` unless another
    /// sink is installed with `with_error_sink`.
    pub fn new(settings: AudioSettings, status: Arc<PlayerStatus>, events: EventBus) -> Self {
        let packets = Arc::new(PacketQueue::new(settings.packet_queue_capacity));
        let buffer_queue = Arc::new(BufferQueue::new(settings.buffer_queue_depth));

        Self {
            error_sink: Arc::new(events.clone()),
            lifecycle: SharedLifecycle::new(events.clone()),
            settings,
            status,
            events,
            packets,
            clock: Arc::new(PlaybackClock::new()),
            buffer_queue,
            engine: Arc::new(EngineSlot::new()),
            device_thread: None,
        }
    }

    /// Create a session from a full configuration, validating it first
    pub fn from_config(
        config: &PlayerConfig,
        status: Arc<PlayerStatus>,
        events: EventBus,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.audio.clone(), status, events))
    }

    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = sink;
        self
    }

    /// Install the engine for a newly analysed stream.
    ///
    /// A converter failure is reported once through the error sink with its
    /// stage code, marks the session fatal and is returned. Once the session
    /// is fatal further analyses are ignored.
    ///
    /// Never waits for the device callback. A replacement installed while
    /// the callback is blocked on the packet queue takes over the queue at
    /// once and is swapped in by that callback.
    pub fn on_analysis_stream(&self, mode: ThreadMode, analysis: StreamAnalysis) -> Result<()> {
        if self.status.is_fatal() {
            debug!("Session is fatal, ignoring stream analysis");
            return Ok(());
        }

        let state = self.lifecycle.get();
        if matches!(state, LifecycleState::Releasing | LifecycleState::Released) {
            return Err(Error::InvalidState(format!(
                "Cannot analyse stream in {} state",
                state
            )));
        }

        let converter =
            match SampleFormatConverter::new(&analysis.descriptor, self.settings.resampler) {
                Ok(converter) => converter,
                Err(e) => {
                    if self.status.mark_fatal() {
                        self.error_sink.report_error(mode, e.code(), &e.to_string());
                    }
                    self.engine.discard();
                    // Wakes a callback parked in the old engine; the fatal
                    // flag keeps it from producing again
                    self.packets.interrupt();
                    return Err(e.into());
                }
            };

        info!(
            "Stream analysed: {:?} {:?} {}Hz -> stereo S16 {}Hz (frame size {})",
            analysis.descriptor.source_layout,
            analysis.descriptor.source_format,
            analysis.descriptor.source_rate,
            analysis.descriptor.target_rate,
            analysis.descriptor.frame_size
        );

        let engine = DecodeResampleEngine::new(
            analysis.decoder,
            converter,
            analysis.time_base,
            Arc::clone(&self.packets),
            Arc::clone(&self.status),
            Arc::clone(&self.clock),
        );

        let active = self.engine.install(engine);

        // Playback already started and ran dry: have the device call back
        // for the first buffer of this stream
        if active && self.buffer_queue.has_callback() && self.buffer_queue.is_empty() {
            debug!("Requesting refill for the new stream");
            self.buffer_queue.request_refill();
        }

        Ok(())
    }

    /// Start playback asynchronously.
    ///
    /// Moves to `Initializing` and returns; the named init worker creates the
    /// device and starts the sink. `Playing` follows once the device has
    /// accepted its first buffer. A device failure is
    /// reported with `DEVICE_INIT_ERROR_CODE` and the state returns to
    /// `Created`.
    pub fn play(&mut self, factory: DeviceFactory) -> Result<()> {
        if self.status.is_fatal() {
            return Err(Error::InvalidState(
                "Session has a fatal error; playback not started".to_string(),
            ));
        }

        if !self
            .lifecycle
            .transition(LifecycleState::Created, LifecycleState::Initializing)
        {
            return Err(Error::InvalidState(format!(
                "Cannot start playback in {} state",
                self.lifecycle.get()
            )));
        }

        // A previous worker that failed device init has already finished
        if let Some(previous) = self.device_thread.take() {
            drop(previous.shutdown);
            if previous.handle.join().is_err() {
                warn!("Previous audio init thread panicked");
            }
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let lifecycle = self.lifecycle.clone();
        let queue = Arc::clone(&self.buffer_queue);
        let context = SinkContext {
            engine: Arc::clone(&self.engine),
            status: Arc::clone(&self.status),
            events: self.events.clone(),
            lifecycle: self.lifecycle.clone(),
        };
        let error_sink = Arc::clone(&self.error_sink);

        let spawned = std::thread::Builder::new()
            .name("dplay-audio-init".to_string())
            .spawn(move || {
                let started =
                    factory().and_then(|device| AudioOutputSink::start(device, queue, context));

                match started {
                    Ok(mut sink) => {
                        // The refill callback moves to Playing on the first
                        // enqueued buffer. Park until release drops the sender
                        let _ = shutdown_rx.recv();
                        sink.stop();
                        debug!("Audio init thread exiting");
                    }
                    Err(e) => {
                        error!("Audio device initialisation failed: {}", e);
                        error_sink.report_error(
                            ThreadMode::Worker,
                            DEVICE_INIT_ERROR_CODE,
                            &e.to_string(),
                        );
                        lifecycle.transition(LifecycleState::Initializing, LifecycleState::Created);
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                self.device_thread = Some(DeviceThread {
                    shutdown: shutdown_tx,
                    handle,
                });
                Ok(())
            }
            Err(e) => {
                self.lifecycle
                    .transition(LifecycleState::Initializing, LifecycleState::Created);
                Err(Error::AudioOutput(format!(
                    "Failed to spawn audio init thread: {}",
                    e
                )))
            }
        }
    }

    /// Tear the session down. Safe to call from any state, any number of
    /// times; only the first call does anything.
    pub fn release(&mut self) {
        if !self.lifecycle.begin_release() {
            return;
        }

        self.packets.close();
        self.packets.clear();

        if let Some(thread) = self.device_thread.take() {
            drop(thread.shutdown);
            if thread.handle.join().is_err() {
                warn!("Audio init thread panicked");
            }
        }
        self.buffer_queue.unregister_callback();

        if let Some(mut engine) = self.engine.take() {
            let stats = engine.stats();
            engine.release();
            info!(
                "Engine released: {} frames decoded, {} packets rejected, {} buffers produced",
                stats.frames_decoded, stats.packets_rejected, stats.buffers_produced
            );
        }

        self.buffer_queue.clear();

        self.lifecycle
            .transition(LifecycleState::Releasing, LifecycleState::Released);
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.get()
    }

    /// Current audio presentation time in seconds
    pub fn current_time(&self) -> f64 {
        self.clock.current()
    }

    pub fn clock(&self) -> Arc<PlaybackClock> {
        Arc::clone(&self.clock)
    }

    /// Queue the demuxer feeds
    pub fn packet_queue(&self) -> Arc<PacketQueue> {
        Arc::clone(&self.packets)
    }

    pub fn buffer_queue(&self) -> Arc<BufferQueue> {
        Arc::clone(&self.buffer_queue)
    }

    pub fn status(&self) -> Arc<PlayerStatus> {
        Arc::clone(&self.status)
    }

    /// True once stream analysis installed an engine that is not released.
    /// Does not wait for the device callback.
    pub fn has_engine(&self) -> bool {
        self.engine.is_installed()
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.release();
    }
}
