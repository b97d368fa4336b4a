//! Audio decoder using symphonia
//!
//! Decodes one compressed packet at a time to interleaved f32 samples.
//! Stream analysis (descriptor + time base) is derived from the same codec
//! parameters the decoder is built from.

use crate::audio::types::{
    ChannelLayout, DecodedFrame, Packet, SampleFormat, StreamDescriptor, TimeBase,
};
use crate::error::{Error, Result};
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet as SymphoniaPacket;
use symphonia::core::sample::SampleFormat as SymphoniaSampleFormat;
use tracing::{debug, warn};

/// Stateful packet decoder.
///
/// `decode` returns:
/// - `Ok(Some(frame))` when the packet produced audio
/// - `Ok(None)` when the decoder needs more input (no frame yet)
/// - `Err(_)` when the packet was rejected; the caller discards it and moves on
pub trait AudioDecoder: Send {
    fn decode(&mut self, packet: &Packet) -> Result<Option<DecodedFrame>>;

    /// Drop internal codec state (after a discontinuity)
    fn reset(&mut self);
}

/// Packet decoder backed by a symphonia codec.
pub struct SymphoniaDecoder {
    decoder: Box<dyn Decoder>,
    track_id: u32,
    /// Reused across packets; rebuilt when the signal spec or size changes
    sample_buf: Option<SampleBuffer<f32>>,
    sample_spec: Option<SignalSpec>,
}

impl SymphoniaDecoder {
    /// Create a decoder for the codec described by `params`.
    ///
    /// # Errors
    /// - No codec in the parameters
    /// - Codec not supported by the registered decoders
    pub fn new(params: &CodecParameters) -> Result<Self> {
        if params.codec == CODEC_TYPE_NULL {
            return Err(Error::Decode("No codec in stream parameters".to_string()));
        }

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

        debug!("Created decoder for codec {:?}", decoder.codec_params().codec);

        Ok(Self {
            decoder,
            track_id: 0,
            sample_buf: None,
            sample_spec: None,
        })
    }

    /// Track id stamped on packets handed to symphonia
    pub fn with_track_id(mut self, track_id: u32) -> Self {
        self.track_id = track_id;
        self
    }

    /// Derive the stream descriptor and time base from codec parameters.
    ///
    /// `default_frame_size` is used when the codec reports no maximum frame
    /// count per packet. The time base falls back to 1/sample_rate.
    pub fn analyse(
        params: &CodecParameters,
        default_frame_size: usize,
    ) -> Result<(StreamDescriptor, TimeBase)> {
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| Error::Decode("Sample rate not found".to_string()))?;

        let channels = params
            .channels
            .map(|c| c.count())
            .or_else(|| params.channel_layout.map(|l| l.into_channels().count()))
            .ok_or_else(|| Error::Decode("Channel count not found".to_string()))?;

        let source_format = params
            .sample_format
            .map(map_sample_format)
            .unwrap_or(SampleFormat::F32);

        let frame_size = params
            .max_frames_per_packet
            .map(|n| n as usize)
            .filter(|&n| n > 0)
            .unwrap_or(default_frame_size);

        let time_base = params
            .time_base
            .map(|tb| TimeBase::new(tb.numer, tb.denom))
            .unwrap_or_else(|| TimeBase::new(1, sample_rate));

        debug!(
            "Stream analysis: sample_rate={}, channels={}, format={:?}, frame_size={}, time_base={}/{}",
            sample_rate, channels, source_format, frame_size, time_base.numer, time_base.denom
        );

        let descriptor = StreamDescriptor::new(
            ChannelLayout::from_count(channels),
            source_format,
            sample_rate,
            frame_size,
        );

        Ok((descriptor, time_base))
    }
}

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<DecodedFrame>> {
        let ts = packet.pts.unwrap_or(0).max(0) as u64;
        let sym_packet =
            SymphoniaPacket::new_from_slice(self.track_id, ts, packet.duration, &packet.data);

        let decoded = match self.decoder.decode(&sym_packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::ResetRequired) => {
                warn!("Decoder reset required, discarding packet");
                self.decoder.reset();
                self.sample_buf = None;
                self.sample_spec = None;
                return Err(Error::Decode("Decoder reset required".to_string()));
            }
            Err(e) => return Err(Error::Decode(e.to_string())),
        };

        if decoded.frames() == 0 {
            return Ok(None);
        }

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let needed = decoded.capacity() * channels;

        let reusable = self.sample_spec == Some(spec)
            && self
                .sample_buf
                .as_ref()
                .map_or(false, |buf| buf.capacity() >= needed);
        if !reusable {
            self.sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            self.sample_spec = Some(spec);
        }

        let Some(buf) = self.sample_buf.as_mut() else {
            return Ok(None);
        };
        buf.copy_interleaved_ref(decoded);

        Ok(Some(DecodedFrame::new(
            buf.samples().to_vec(),
            channels as u16,
            spec.rate,
            packet.pts,
        )))
    }

    fn reset(&mut self) {
        self.decoder.reset();
    }
}

fn map_sample_format(format: SymphoniaSampleFormat) -> SampleFormat {
    match format {
        SymphoniaSampleFormat::U8 | SymphoniaSampleFormat::S8 => SampleFormat::U8,
        SymphoniaSampleFormat::U16 | SymphoniaSampleFormat::S16 => SampleFormat::S16,
        SymphoniaSampleFormat::U24 | SymphoniaSampleFormat::S24 => SampleFormat::S24,
        SymphoniaSampleFormat::U32 | SymphoniaSampleFormat::S32 => SampleFormat::S32,
        SymphoniaSampleFormat::F32 => SampleFormat::F32,
        SymphoniaSampleFormat::F64 => SampleFormat::F64,
    }
}
