//! Core audio data types
//!
//! Defines the stream descriptor, packets, decoded frames and the fixed PCM
//! output format used throughout the audio pipeline.
//!
//! **Output format:** stereo, signed 16-bit little-endian, 44100 Hz. It is
//! not configurable per session.

/// Output sample rate for all audio
pub const TARGET_SAMPLE_RATE: u32 = 44100;

/// Output channel count (stereo)
pub const TARGET_CHANNELS: usize = 2;

/// Bytes per output sample (signed 16-bit)
pub const TARGET_BYTES_PER_SAMPLE: usize = 2;

/// Byte length of `sample_count` converted stereo S16 samples.
///
/// `sample_count` is per channel, i.e. the number of stereo frames.
pub const fn pcm_byte_len(sample_count: usize) -> usize {
    sample_count * TARGET_BYTES_PER_SAMPLE * TARGET_CHANNELS
}

/// Sample representation of decoded audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    S16,
    S24,
    S32,
    F32,
    F64,
}

/// Channel layout of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Mono,
    Stereo,
    /// Any other count; channels are ordered front-left, front-right,
    /// front-centre, ...
    Multi(u16),
}

impl ChannelLayout {
    pub fn from_count(count: usize) -> Self {
        match count {
            1 => ChannelLayout::Mono,
            2 => ChannelLayout::Stereo,
            n => ChannelLayout::Multi(n.min(u16::MAX as usize) as u16),
        }
    }

    pub fn channel_count(&self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
            ChannelLayout::Multi(n) => *n as usize,
        }
    }
}

/// PCM format presented to the output device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub little_endian: bool,
}

impl PcmFormat {
    /// The only format the output sink negotiates
    pub const TARGET: PcmFormat = PcmFormat {
        channels: TARGET_CHANNELS as u16,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: (TARGET_BYTES_PER_SAMPLE * 8) as u16,
        little_endian: true,
    };

    /// Bytes per interleaved frame
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }
}

/// Rational time base of a stream, in seconds per tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub numer: u32,
    pub denom: u32,
}

impl TimeBase {
    pub fn new(numer: u32, denom: u32) -> Self {
        Self { numer, denom }
    }

    /// Seconds per tick as a float (0.0 for a degenerate time base)
    pub fn as_secs_f64(&self) -> f64 {
        if self.denom == 0 {
            return 0.0;
        }
        self.numer as f64 / self.denom as f64
    }

    /// Convert a timestamp in ticks to seconds
    pub fn seconds(&self, ts: i64) -> f64 {
        ts as f64 * self.as_secs_f64()
    }

    /// Number of ticks covered by `frames` samples at `sample_rate`
    pub fn ticks_for_frames(&self, frames: usize, sample_rate: u32) -> i64 {
        let per_tick = self.as_secs_f64();
        if per_tick == 0.0 || sample_rate == 0 {
            return 0;
        }
        ((frames as f64 / sample_rate as f64) / per_tick).round() as i64
    }
}

/// Immutable per-session stream parameters.
///
/// Created once when the stream is analysed; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub source_layout: ChannelLayout,
    pub source_format: SampleFormat,
    pub source_rate: u32,
    pub target_layout: ChannelLayout,
    pub target_format: SampleFormat,
    pub target_rate: u32,
    /// Codec frame size hint, in samples per channel
    pub frame_size: usize,
}

impl StreamDescriptor {
    /// Describe a source stream converted to the fixed output format
    pub fn new(
        source_layout: ChannelLayout,
        source_format: SampleFormat,
        source_rate: u32,
        frame_size: usize,
    ) -> Self {
        Self {
            source_layout,
            source_format,
            source_rate,
            target_layout: ChannelLayout::Stereo,
            target_format: SampleFormat::S16,
            target_rate: TARGET_SAMPLE_RATE,
            frame_size,
        }
    }

    /// Override the target side of the conversion
    pub fn with_target(
        mut self,
        layout: ChannelLayout,
        format: SampleFormat,
        rate: u32,
    ) -> Self {
        self.target_layout = layout;
        self.target_format = format;
        self.target_rate = rate;
        self
    }

    /// True when the target matches `PcmFormat::TARGET`
    pub fn has_supported_target(&self) -> bool {
        self.target_layout == ChannelLayout::Stereo
            && self.target_format == SampleFormat::S16
            && self.target_rate == TARGET_SAMPLE_RATE
    }
}

/// A unit of compressed audio as produced by the demuxer
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub data: Box<[u8]>,
    /// Presentation timestamp in stream time-base ticks
    pub pts: Option<i64>,
    /// Duration in stream time-base ticks (0 = unknown)
    pub duration: u64,
}

impl Packet {
    pub fn new(data: impl Into<Box<[u8]>>, pts: Option<i64>, duration: u64) -> Self {
        Self {
            data: data.into(),
            pts,
            duration,
        }
    }
}

/// Decoded audio for one packet.
///
/// **Format:**
/// - Samples are f32 (floating point -1.0 to 1.0)
/// - Interleaved: [C0, C1, ..., C0, C1, ...]
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
    /// Samples per channel
    pub nb_samples: usize,
    /// Presentation timestamp in stream time-base ticks
    pub pts: Option<i64>,
}

impl DecodedFrame {
    /// Build a frame from interleaved samples
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32, pts: Option<i64>) -> Self {
        let nb_samples = if channels == 0 {
            0
        } else {
            samples.len() / channels as usize
        };
        Self {
            samples,
            channels,
            sample_rate,
            nb_samples,
            pts,
        }
    }

    /// A silent frame
    pub fn silence(nb_samples: usize, channels: u16, sample_rate: u32, pts: Option<i64>) -> Self {
        Self::new(
            vec![0.0; nb_samples * channels as usize],
            channels,
            sample_rate,
            pts,
        )
    }
}
