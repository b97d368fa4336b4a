//! Test doubles for the pipeline's external collaborators

use dplay_audio::audio::{
    AudioDecoder, BufferQueue, DecodedFrame, DeviceFactory, OutputDevice, Packet, PcmFormat,
};
use dplay_audio::{Error, Result};
use dplay_common::status::{ErrorSink, ThreadMode};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What the scripted decoder does with the next packet
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Yield a frame of `nb_samples`, stamped with the packet's pts
    Frame { nb_samples: usize },
    /// Accept the packet but yield nothing yet
    NoFrame,
    /// Reject the packet
    Reject,
}

/// Decoder that follows a script, then yields frames forever.
pub struct ScriptedDecoder {
    script: VecDeque<Step>,
    default_samples: usize,
    channels: u16,
    sample_rate: u32,
    pub resets: Arc<AtomicUsize>,
}

impl ScriptedDecoder {
    /// Always yields `nb_samples` of silence per packet
    pub fn frames(nb_samples: usize, channels: u16, sample_rate: u32) -> Self {
        Self {
            script: VecDeque::new(),
            default_samples: nb_samples,
            channels,
            sample_rate,
            resets: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn scripted(steps: Vec<Step>, nb_samples: usize, channels: u16, sample_rate: u32) -> Self {
        Self {
            script: steps.into(),
            ..Self::frames(nb_samples, channels, sample_rate)
        }
    }
}

impl AudioDecoder for ScriptedDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<DecodedFrame>> {
        let step = self.script.pop_front().unwrap_or(Step::Frame {
            nb_samples: self.default_samples,
        });
        match step {
            Step::Frame { nb_samples } => Ok(Some(DecodedFrame::silence(
                nb_samples,
                self.channels,
                self.sample_rate,
                packet.pts,
            ))),
            Step::NoFrame => Ok(None),
            Step::Reject => Err(Error::Decode("scripted rejection".to_string())),
        }
    }

    fn reset(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Observations of a `ManualDevice`, shared with the test
#[derive(Default)]
pub struct DeviceProbe {
    pub created: AtomicBool,
    pub playing: AtomicBool,
    pub stopped: AtomicBool,
    pub fail_play: AtomicBool,
    queue: Mutex<Option<Arc<BufferQueue>>>,
}

impl DeviceProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Buffer queue handed to the device, once the player was created
    pub fn queue(&self) -> Option<Arc<BufferQueue>> {
        self.queue.lock().unwrap().clone()
    }

    /// Play `samples` interleaved samples as the device would
    pub fn pull(&self, samples: usize) -> Vec<i16> {
        let mut out = vec![0i16; samples];
        if let Some(queue) = self.queue() {
            queue.read_samples(&mut out);
        }
        out
    }
}

/// Output device driven by the test through its `DeviceProbe`
pub struct ManualDevice {
    probe: Arc<DeviceProbe>,
}

impl ManualDevice {
    pub fn new(probe: Arc<DeviceProbe>) -> Self {
        Self { probe }
    }
}

impl OutputDevice for ManualDevice {
    fn name(&self) -> String {
        "manual".to_string()
    }

    fn create_player(&mut self, format: &PcmFormat, queue: Arc<BufferQueue>) -> Result<()> {
        assert_eq!(*format, PcmFormat::TARGET);
        *self.probe.queue.lock().unwrap() = Some(queue);
        self.probe.created.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn set_playing(&mut self) -> Result<()> {
        if self.probe.fail_play.load(Ordering::SeqCst) {
            return Err(Error::AudioOutput("scripted play failure".to_string()));
        }
        self.probe.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.probe.playing.store(false, Ordering::SeqCst);
        self.probe.stopped.store(true, Ordering::SeqCst);
    }
}

pub fn manual_factory(probe: Arc<DeviceProbe>) -> DeviceFactory {
    Box::new(move || Ok(Box::new(ManualDevice::new(probe)) as Box<dyn OutputDevice>))
}

pub fn failing_factory(message: &str) -> DeviceFactory {
    let message = message.to_string();
    Box::new(move || Err(Error::AudioOutput(message)))
}

/// One call to `ErrorSink::report_error`
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub mode: ThreadMode,
    pub code: i32,
    pub message: String,
}

/// Error sink that records every report
#[derive(Default)]
pub struct RecordingErrorSink {
    reports: Mutex<Vec<Report>>,
}

impl RecordingErrorSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }
}

impl ErrorSink for RecordingErrorSink {
    fn report_error(&self, mode: ThreadMode, code: i32, message: &str) {
        self.reports.lock().unwrap().push(Report {
            mode,
            code,
            message: message.to_string(),
        });
    }
}
