//! Audio output using cpal
//!
//! The output side of a session is three layers:
//! - `OutputDevice`: an engine/route/player triple (cpal host, device, stream)
//! - `BufferQueue`: the double-buffer the device drains
//! - `AudioOutputSink`: wires the decode engine to the queue's consumption
//!   callback and owns the device for the lifetime of playback
//!
//! Devices are created through a `DeviceFactory` on the thread that will own
//! them, since cpal streams cannot move between threads on every platform.

use crate::audio::buffer_queue::{BufferQueue, ConsumedCallback};
use crate::audio::types::PcmFormat;
use crate::error::{Error, Result};
use crate::playback::engine::SharedEngine;
use crate::playback::state::{LifecycleState, SharedLifecycle};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use dplay_common::events::{EventBus, PlayerEvent};
use dplay_common::status::PlayerStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A PCM output device.
///
/// `create_player` acquires whatever the device needs to play `format` from
/// `queue` without starting playback; `set_playing` starts draining. `stop`
/// releases everything and is safe to call in any state.
pub trait OutputDevice {
    fn name(&self) -> String;

    fn create_player(&mut self, format: &PcmFormat, queue: Arc<BufferQueue>) -> Result<()>;

    fn set_playing(&mut self) -> Result<()>;

    fn stop(&mut self);
}

/// Creates the output device on the thread that will own it
pub type DeviceFactory = Box<dyn FnOnce() -> Result<Box<dyn OutputDevice>> + Send>;

/// cpal-backed output device.
pub struct CpalDevice {
    device: Device,
    name: String,
    stream: Option<Stream>,
}

impl CpalDevice {
    /// List available audio output devices.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device by name, falling back to the default device.
    ///
    /// # Errors
    /// - Device not found and no default device available
    pub fn open(device_name: Option<String>) -> Result<Self> {
        let host = cpal::default_host();

        let (device, name) = if let Some(requested) = device_name.as_ref() {
            let mut devices = host
                .output_devices()
                .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;

            match devices.find(|d| d.name().ok().as_ref() == Some(requested)) {
                Some(dev) => {
                    info!("Found requested audio device: {}", requested);
                    (dev, requested.clone())
                }
                None => {
                    warn!(
                        "Requested device '{}' not found, falling back to default device",
                        requested
                    );

                    let default_dev = host.default_output_device().ok_or_else(|| {
                        Error::AudioOutput(format!(
                            "Device '{}' not found and no default device available",
                            requested
                        ))
                    })?;

                    let default_name = default_dev
                        .name()
                        .unwrap_or_else(|_| "Unknown".to_string());
                    info!("Using default audio device as fallback: {}", default_name);
                    (default_dev, default_name)
                }
            }
        } else {
            let dev = host
                .default_output_device()
                .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?;

            let name = dev.name().unwrap_or_else(|_| "Unknown".to_string());
            info!("Using default audio device: {}", name);
            (dev, name)
        };

        Ok(Self {
            device,
            name,
            stream: None,
        })
    }

    /// Factory that opens `device_name` on the calling thread
    pub fn factory(device_name: Option<String>) -> DeviceFactory {
        Box::new(move || {
            let device = CpalDevice::open(device_name)?;
            Ok(Box::new(device) as Box<dyn OutputDevice>)
        })
    }

    /// Find a device config matching `format`, preferring i16 then f32.
    fn select_config(&self, format: &PcmFormat) -> Result<(StreamConfig, SampleFormat)> {
        let rate = format.sample_rate;
        let candidates: Vec<_> = self
            .device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
            .filter(|c| {
                c.channels() == format.channels
                    && c.min_sample_rate().0 <= rate
                    && c.max_sample_rate().0 >= rate
            })
            .collect();

        let chosen = candidates
            .iter()
            .find(|c| c.sample_format() == SampleFormat::I16)
            .or_else(|| {
                candidates
                    .iter()
                    .find(|c| c.sample_format() == SampleFormat::F32)
            })
            .ok_or_else(|| {
                Error::AudioOutput(format!(
                    "Device '{}' does not support {} channels at {}Hz in i16 or f32",
                    self.name, format.channels, rate
                ))
            })?;

        let sample_format = chosen.sample_format();
        let config = chosen
            .clone()
            .with_sample_rate(cpal::SampleRate(rate))
            .config();
        Ok((config, sample_format))
    }

    fn build_stream_i16(&self, config: &StreamConfig, queue: Arc<BufferQueue>) -> Result<Stream> {
        self.device
            .build_output_stream(
                config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    queue.read_samples(data);
                },
                |err| error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
    }

    fn build_stream_f32(&self, config: &StreamConfig, queue: Arc<BufferQueue>) -> Result<Stream> {
        let mut scratch: Vec<i16> = Vec::new();
        self.device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0);
                    queue.read_samples(&mut scratch);
                    for (dst, src) in data.iter_mut().zip(scratch.iter()) {
                        *dst = *src as f32 / i16::MAX as f32;
                    }
                },
                |err| error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
    }
}

impl OutputDevice for CpalDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn create_player(&mut self, format: &PcmFormat, queue: Arc<BufferQueue>) -> Result<()> {
        let (config, sample_format) = self.select_config(format)?;
        debug!(
            "Audio config: sample_rate={}, channels={}, format={:?}, buffer_size={:?}",
            config.sample_rate.0, config.channels, sample_format, config.buffer_size
        );

        let stream = match sample_format {
            SampleFormat::I16 => self.build_stream_i16(&config, queue)?,
            SampleFormat::F32 => self.build_stream_f32(&config, queue)?,
            other => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {:?}",
                    other
                )))
            }
        };

        self.stream = Some(stream);
        Ok(())
    }

    fn set_playing(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| Error::InvalidState("No player created".to_string()))?;
        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
        info!("Audio stream started on {}", self.name);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("Failed to pause stream: {}", e);
            }
            info!("Audio stream stopped on {}", self.name);
        }
    }
}

/// Headless device that drains the buffer queue in real time.
pub struct NullDevice {
    period: Duration,
    queue: Option<Arc<BufferQueue>>,
    samples_per_period: usize,
    running: Arc<AtomicBool>,
    drain: Option<JoinHandle<()>>,
}

impl NullDevice {
    pub fn new() -> Self {
        Self::with_period(Duration::from_millis(10))
    }

    /// Drain one period's worth of samples every `period`
    pub fn with_period(period: Duration) -> Self {
        Self {
            period,
            queue: None,
            samples_per_period: 0,
            running: Arc::new(AtomicBool::new(false)),
            drain: None,
        }
    }

    pub fn factory() -> DeviceFactory {
        Box::new(|| Ok(Box::new(NullDevice::new()) as Box<dyn OutputDevice>))
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDevice for NullDevice {
    fn name(&self) -> String {
        "null".to_string()
    }

    fn create_player(&mut self, format: &PcmFormat, queue: Arc<BufferQueue>) -> Result<()> {
        let frames = (format.sample_rate as f64 * self.period.as_secs_f64()).ceil() as usize;
        self.samples_per_period = frames.max(1) * format.channels as usize;
        self.queue = Some(queue);
        Ok(())
    }

    fn set_playing(&mut self) -> Result<()> {
        let queue = self
            .queue
            .clone()
            .ok_or_else(|| Error::InvalidState("No player created".to_string()))?;
        if self.drain.is_some() {
            return Ok(());
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let period = self.period;
        let mut buf = vec![0i16; self.samples_per_period];

        let handle = std::thread::Builder::new()
            .name("dplay-null-output".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    queue.read_samples(&mut buf);
                    std::thread::sleep(period);
                }
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn drain thread: {}", e)))?;

        self.drain = Some(handle);
        debug!("Null output draining every {:?}", self.period);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.drain.take() {
            if handle.join().is_err() {
                warn!("Null output drain thread panicked");
            }
        }
        self.queue = None;
    }
}

/// Connects the decode engine to an output device.
///
/// Each time the device finishes a buffer, the engine produces the next one
/// and it is enqueued. The first enqueued buffer moves the session from
/// `Initializing` to `Playing`. An empty buffer means end of stream: nothing
/// is enqueued and `PlayerEvent::EndOfStream` is emitted once, unless the
/// session is exiting, fatal or being released.
pub struct AudioOutputSink {
    device: Box<dyn OutputDevice>,
    queue: Arc<BufferQueue>,
    stopped: bool,
}

/// Everything the refill callback needs besides the queue
pub struct SinkContext {
    pub engine: SharedEngine,
    pub status: Arc<PlayerStatus>,
    pub events: EventBus,
    pub lifecycle: SharedLifecycle,
}

impl AudioOutputSink {
    /// Acquire the player, register the refill callback, start playback and
    /// prime the queue once.
    ///
    /// On any failure the device is stopped before the error is returned.
    /// Priming may queue nothing (no engine yet, or the stream is already
    /// over); the session then stays `Initializing` until a later refill
    /// enqueues a buffer.
    pub fn start(
        mut device: Box<dyn OutputDevice>,
        queue: Arc<BufferQueue>,
        context: SinkContext,
    ) -> Result<Self> {
        if let Err(e) = device.create_player(&PcmFormat::TARGET, Arc::clone(&queue)) {
            device.stop();
            return Err(e);
        }

        queue.register_callback(Self::refill_callback(context));

        if let Err(e) = device.set_playing() {
            queue.unregister_callback();
            device.stop();
            return Err(e);
        }

        queue.notify_consumed();
        if queue.is_empty() {
            debug!("Priming queued nothing, waiting for the first buffer");
        }
        info!("Audio output started on {}", device.name());

        Ok(Self {
            device,
            queue,
            stopped: false,
        })
    }

    fn refill_callback(context: SinkContext) -> ConsumedCallback {
        let SinkContext {
            engine,
            status,
            events,
            lifecycle,
        } = context;
        let mut ended = false;

        Box::new(move |queue: &BufferQueue| loop {
            {
                let mut active = engine.lock_active();
                if engine.promote_pending(&mut active) {
                    ended = false;
                }

                if let Some(current) = active.as_mut() {
                    let pcm = current.produce_next_buffer();
                    if !pcm.is_empty() {
                        match queue.enqueue(pcm) {
                            Ok(()) => {
                                lifecycle.transition(
                                    LifecycleState::Initializing,
                                    LifecycleState::Playing,
                                );
                            }
                            Err(e) => warn!("Dropping converted buffer: {}", e),
                        }
                        return;
                    }

                    let releasing = matches!(
                        lifecycle.get(),
                        LifecycleState::Releasing | LifecycleState::Released
                    );
                    if !ended
                        && !engine.has_pending()
                        && !releasing
                        && !status.is_exit()
                        && !status.is_fatal()
                    {
                        ended = true;
                        info!("End of stream reached");
                        events.emit(PlayerEvent::EndOfStream);
                    }
                }
            }

            // An engine installed while this invocation held the active one
            if !engine.has_pending() {
                return;
            }
        })
    }

    /// Unregister the callback (waiting for an in-flight one) and stop the
    /// device. Idempotent.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.queue.unregister_callback();
        self.device.stop();
    }
}

impl Drop for AudioOutputSink {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::engine::EngineSlot;

    #[test]
    fn test_null_device_drains_queue() {
        let queue = Arc::new(BufferQueue::new(2));
        queue.enqueue(&[1, 0, 2, 0, 3, 0, 4, 0]).unwrap();

        let mut device = NullDevice::with_period(Duration::from_millis(1));
        device
            .create_player(&PcmFormat::TARGET, Arc::clone(&queue))
            .unwrap();
        device.set_playing().unwrap();

        for _ in 0..200 {
            if queue.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        device.stop();

        assert!(queue.is_empty());
    }

    #[test]
    fn test_null_device_requires_player() {
        let mut device = NullDevice::new();
        assert!(matches!(device.set_playing(), Err(Error::InvalidState(_))));
        device.stop();
    }

    struct FailingDevice {
        fail_create: bool,
        stopped: Arc<AtomicBool>,
    }

    impl OutputDevice for FailingDevice {
        fn name(&self) -> String {
            "failing".to_string()
        }

        fn create_player(&mut self, _: &PcmFormat, _: Arc<BufferQueue>) -> Result<()> {
            if self.fail_create {
                return Err(Error::AudioOutput("no route".to_string()));
            }
            Ok(())
        }

        fn set_playing(&mut self) -> Result<()> {
            Err(Error::AudioOutput("cannot play".to_string()))
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_start_failure_stops_device() {
        for fail_create in [true, false] {
            let stopped = Arc::new(AtomicBool::new(false));
            let device = Box::new(FailingDevice {
                fail_create,
                stopped: Arc::clone(&stopped),
            });
            let queue = Arc::new(BufferQueue::new(2));
            let events = EventBus::new(8);
            let context = SinkContext {
                engine: Arc::new(EngineSlot::new()),
                status: Arc::new(PlayerStatus::new()),
                lifecycle: SharedLifecycle::new(events.clone()),
                events,
            };

            let result = AudioOutputSink::start(device, Arc::clone(&queue), context);

            assert!(result.is_err());
            assert!(stopped.load(Ordering::SeqCst));
            assert!(!queue.has_callback());
        }
    }
}
