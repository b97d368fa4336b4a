//! Sample format conversion using rubato
//!
//! Converts decoded frames from the source layout/format/rate to the fixed
//! output format: stereo, signed 16-bit little-endian, 44.1kHz.
//!
//! Construction happens in two stages that fail with distinct errors:
//! 1. **Allocation:** validate the source side and reserve the output buffer
//! 2. **Initialisation:** validate the target and build the resampler
//!
//! Either failure ends the session; the caller reports it once.

use crate::audio::types::{pcm_byte_len, DecodedFrame, StreamDescriptor, TARGET_CHANNELS};
use crate::error::{Error, Result};
use dplay_common::config::ResamplerQuality;
use dplay_common::status::{CONVERTER_ALLOC_ERROR_CODE, CONVERTER_INIT_ERROR_CODE};
use rubato::{
    FastFixedIn, PolynomialDegree, ResampleError, Resampler as RubatoResampler, SincFixedIn,
    SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use thiserror::Error;
use tracing::debug;

/// Gain applied to the front-centre channel when folding it into stereo (-3 dB)
const CENTRE_MIX_GAIN: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Converter setup failure, by stage
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConverterError {
    /// Source parameters unusable or output buffer could not be reserved
    #[error("converter allocation failed: {0}")]
    Alloc(String),

    /// Target format unsupported or resampler construction failed
    #[error("converter initialisation failed: {0}")]
    Init(String),
}

impl ConverterError {
    /// Error code reported through the error sink
    pub fn code(&self) -> i32 {
        match self {
            ConverterError::Alloc(_) => CONVERTER_ALLOC_ERROR_CODE,
            ConverterError::Init(_) => CONVERTER_INIT_ERROR_CODE,
        }
    }
}

enum Kernel {
    Fast(FastFixedIn<f32>),
    Sinc(SincFixedIn<f32>),
}

impl Kernel {
    fn input_frames_next(&self) -> usize {
        match self {
            Kernel::Fast(r) => r.input_frames_next(),
            Kernel::Sinc(r) => r.input_frames_next(),
        }
    }

    fn output_frames_max(&self) -> usize {
        match self {
            Kernel::Fast(r) => r.output_frames_max(),
            Kernel::Sinc(r) => r.output_frames_max(),
        }
    }

    fn output_buffer_allocate(&self) -> Vec<Vec<f32>> {
        match self {
            Kernel::Fast(r) => r.output_buffer_allocate(true),
            Kernel::Sinc(r) => r.output_buffer_allocate(true),
        }
    }

    fn process(
        &mut self,
        input: &[&[f32]],
        output: &mut [Vec<f32>],
    ) -> std::result::Result<(usize, usize), ResampleError> {
        match self {
            Kernel::Fast(r) => r.process_into_buffer(input, output, None),
            Kernel::Sinc(r) => r.process_into_buffer(input, output, None),
        }
    }

    /// Process a final input shorter than one chunk, zero-padded
    fn process_partial(
        &mut self,
        input: &[&[f32]],
        output: &mut [Vec<f32>],
    ) -> std::result::Result<(usize, usize), ResampleError> {
        match self {
            Kernel::Fast(r) => r.process_partial_into_buffer(Some(input), output, None),
            Kernel::Sinc(r) => r.process_partial_into_buffer(Some(input), output, None),
        }
    }

    fn reset(&mut self) {
        match self {
            Kernel::Fast(r) => r.reset(),
            Kernel::Sinc(r) => r.reset(),
        }
    }
}

/// Converts decoded frames into a reusable S16 stereo byte buffer.
pub struct SampleFormatConverter {
    source_rate: u32,
    target_rate: u32,

    /// None when source and target rates match
    kernel: Option<Kernel>,

    /// Planar stereo input waiting for a full resampler chunk
    pending: Vec<Vec<f32>>,

    /// Planar resampler output for one chunk
    planar_out: Vec<Vec<f32>>,

    /// Interleaved S16LE output; overwritten by every `convert`
    output: Vec<u8>,
}

impl SampleFormatConverter {
    /// Allocate and initialise a converter for `desc`.
    pub fn new(
        desc: &StreamDescriptor,
        quality: ResamplerQuality,
    ) -> std::result::Result<Self, ConverterError> {
        let mut converter = Self::alloc(desc)?;
        converter.init(desc, quality)?;
        Ok(converter)
    }

    /// Allocation stage: validate the source side and reserve the output
    /// buffer for one worst-case frame.
    fn alloc(desc: &StreamDescriptor) -> std::result::Result<Self, ConverterError> {
        if desc.source_layout.channel_count() == 0 {
            return Err(ConverterError::Alloc("source has no channels".to_string()));
        }
        if desc.source_rate == 0 {
            return Err(ConverterError::Alloc("source sample rate is zero".to_string()));
        }
        if desc.frame_size == 0 {
            return Err(ConverterError::Alloc("frame size hint is zero".to_string()));
        }

        let mut output = Vec::new();
        output
            .try_reserve_exact(pcm_byte_len(desc.frame_size))
            .map_err(|e| ConverterError::Alloc(format!("output buffer: {}", e)))?;

        Ok(Self {
            source_rate: desc.source_rate,
            target_rate: desc.target_rate,
            kernel: None,
            pending: vec![Vec::new(); TARGET_CHANNELS],
            planar_out: Vec::new(),
            output,
        })
    }

    /// Initialisation stage: accept only the fixed output format and build
    /// the resampler when the rates differ.
    fn init(
        &mut self,
        desc: &StreamDescriptor,
        quality: ResamplerQuality,
    ) -> std::result::Result<(), ConverterError> {
        if !desc.has_supported_target() {
            return Err(ConverterError::Init(format!(
                "unsupported target format: {:?} {:?} {}Hz",
                desc.target_layout, desc.target_format, desc.target_rate
            )));
        }

        self.target_rate = desc.target_rate;

        if desc.source_rate == desc.target_rate {
            debug!(
                "Sample rate already at {}Hz, converter will not resample",
                desc.target_rate
            );
            return Ok(());
        }

        let ratio = desc.target_rate as f64 / desc.source_rate as f64;
        let kernel = match quality {
            ResamplerQuality::Fast => FastFixedIn::<f32>::new(
                ratio,
                1.0,
                PolynomialDegree::Septic,
                desc.frame_size,
                TARGET_CHANNELS,
            )
            .map(Kernel::Fast)
            .map_err(|e| ConverterError::Init(format!("resampler: {}", e)))?,
            ResamplerQuality::Sinc => {
                let params = SincInterpolationParameters {
                    sinc_len: 256,
                    f_cutoff: 0.95,
                    interpolation: SincInterpolationType::Linear,
                    oversampling_factor: 256,
                    window: WindowFunction::BlackmanHarris2,
                };
                SincFixedIn::<f32>::new(ratio, 1.0, params, desc.frame_size, TARGET_CHANNELS)
                    .map(Kernel::Sinc)
                    .map_err(|e| ConverterError::Init(format!("sinc resampler: {}", e)))?
            }
        };

        let max_out = kernel.output_frames_max();
        self.output
            .try_reserve_exact(pcm_byte_len(max_out).saturating_sub(self.output.capacity()))
            .map_err(|e| ConverterError::Init(format!("output buffer: {}", e)))?;
        for channel in &mut self.pending {
            channel.reserve(desc.frame_size * 2);
        }
        self.planar_out = kernel.output_buffer_allocate();

        debug!(
            "Resampling {}Hz -> {}Hz ({:?}, chunk={} frames, max_out={} frames)",
            desc.source_rate, desc.target_rate, quality, desc.frame_size, max_out
        );

        self.kernel = Some(kernel);
        Ok(())
    }

    /// Convert one decoded frame into the output buffer.
    ///
    /// Returns the number of converted samples per channel. The output buffer
    /// holds exactly `pcm_byte_len(count)` bytes afterwards. When resampling,
    /// input is processed in whole chunks, so a short frame can legitimately
    /// yield zero samples.
    pub fn convert(&mut self, frame: &DecodedFrame) -> Result<usize> {
        self.output.clear();

        let channels = frame.channels as usize;
        if channels == 0 || frame.nb_samples == 0 {
            return Ok(0);
        }

        let interleaved = frame
            .samples
            .chunks_exact(channels)
            .take(frame.nb_samples)
            .map(stereo_pair);

        let Some(kernel) = self.kernel.as_mut() else {
            let mut count = 0;
            for (left, right) in interleaved {
                push_s16(&mut self.output, left);
                push_s16(&mut self.output, right);
                count += 1;
            }
            return Ok(count);
        };

        for (left, right) in interleaved {
            self.pending[0].push(left);
            self.pending[1].push(right);
        }

        let mut produced = 0;
        loop {
            let needed = kernel.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }

            let input = [&self.pending[0][..needed], &self.pending[1][..needed]];
            let (read, written) = kernel
                .process(&input, &mut self.planar_out)
                .map_err(|e| Error::Decode(format!("Resampling failed: {}", e)))?;

            for i in 0..written {
                push_s16(&mut self.output, self.planar_out[0][i]);
                push_s16(&mut self.output, self.planar_out[1][i]);
            }
            produced += written;

            for channel in &mut self.pending {
                channel.drain(..read);
            }
        }

        Ok(produced)
    }

    /// Resample input still waiting for a full chunk.
    ///
    /// Called once the stream has ended. Returns the number of samples per
    /// channel now in the output buffer, 0 when nothing was pending.
    pub fn flush(&mut self) -> Result<usize> {
        self.output.clear();

        let pending = self.pending[0].len();
        let Some(kernel) = self.kernel.as_mut() else {
            return Ok(0);
        };
        if pending == 0 {
            return Ok(0);
        }

        let input = [&self.pending[0][..], &self.pending[1][..]];
        let (_, written) = kernel
            .process_partial(&input, &mut self.planar_out)
            .map_err(|e| Error::Decode(format!("Resampler flush failed: {}", e)))?;

        // The padding resamples to silence; keep only the real input's share
        let ratio = self.target_rate as f64 / self.source_rate as f64;
        let keep = ((pending as f64 * ratio).ceil() as usize).min(written);
        for i in 0..keep {
            push_s16(&mut self.output, self.planar_out[0][i]);
            push_s16(&mut self.output, self.planar_out[1][i]);
        }
        for channel in &mut self.pending {
            channel.clear();
        }

        debug!("Flushed {} pending frames into {} output frames", pending, keep);
        Ok(keep)
    }

    /// Drop pending input and resampler history after a discontinuity
    pub fn reset(&mut self) {
        for channel in &mut self.pending {
            channel.clear();
        }
        if let Some(kernel) = self.kernel.as_mut() {
            kernel.reset();
        }
        self.output.clear();
    }

    /// Bytes written by the last `convert` or `flush`
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// True when source and target rates differ
    pub fn is_resampling(&self) -> bool {
        self.kernel.is_some()
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }
}

/// Fold one interleaved input frame to a stereo pair.
///
/// Mono is duplicated; more than two channels keep front left/right and mix
/// the front centre in at -3 dB.
fn stereo_pair(frame: &[f32]) -> (f32, f32) {
    match frame {
        [] => (0.0, 0.0),
        [mono] => (*mono, *mono),
        [left, right] => (*left, *right),
        [left, right, centre, ..] => (
            left + centre * CENTRE_MIX_GAIN,
            right + centre * CENTRE_MIX_GAIN,
        ),
    }
}

fn push_s16(out: &mut Vec<u8>, sample: f32) {
    let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
    out.extend_from_slice(&value.to_le_bytes());
}
