//! File packet source using symphonia
//!
//! Stands in for the external demuxer: probes a local file, exposes its
//! stream analysis, and feeds the packet queue from a background thread.

use crate::audio::decoder::SymphoniaDecoder;
use crate::audio::packet_queue::PacketQueue;
use crate::audio::types::Packet;
use crate::error::{Error, Result};
use crate::playback::engine::StreamAnalysis;
use dplay_common::status::PlayerStatus;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use symphonia::core::codecs::{CodecParameters, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

/// An opened audio file with one selected track.
pub struct FileSource {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    track_id: u32,
    params: CodecParameters,
}

impl FileSource {
    /// Probe `path` and select its first decodable audio track.
    ///
    /// # Errors
    /// - File cannot be opened
    /// - Container not recognised
    /// - No audio track
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| Error::Decode(format!("Failed to probe {}: {}", path.display(), e)))?;

        let format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode(format!("No audio track in {}", path.display())))?;

        let track_id = track.id;
        let params = track.codec_params.clone();
        info!("Opened {} (track {})", path.display(), track_id);

        Ok(Self {
            path: path.to_path_buf(),
            format,
            track_id,
            params,
        })
    }

    /// Stream analysis for the selected track
    pub fn analyse(&self, default_frame_size: usize) -> Result<StreamAnalysis> {
        let (descriptor, time_base) = SymphoniaDecoder::analyse(&self.params, default_frame_size)?;
        let decoder = SymphoniaDecoder::new(&self.params)?.with_track_id(self.track_id);
        Ok(StreamAnalysis::new(descriptor, time_base, Box::new(decoder)))
    }

    pub fn codec_params(&self) -> &CodecParameters {
        &self.params
    }

    /// Push every packet of the selected track into `packets` from a named
    /// thread, then close the queue.
    ///
    /// Stops early when the exit flag is set or the queue is closed.
    pub fn spawn_feeder(
        self,
        packets: Arc<PacketQueue>,
        status: Arc<PlayerStatus>,
    ) -> Result<JoinHandle<u64>> {
        std::thread::Builder::new()
            .name("dplay-feeder".to_string())
            .spawn(move || self.feed(&packets, &status))
            .map_err(Error::Io)
    }

    /// Feed packets on the calling thread; returns the number queued.
    pub fn feed(mut self, packets: &PacketQueue, status: &PlayerStatus) -> u64 {
        let mut queued = 0u64;

        while !status.is_exit() {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    debug!("End of file: {}", self.path.display());
                    break;
                }
                Err(e) => {
                    warn!("Stopping packet feed for {}: {}", self.path.display(), e);
                    break;
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let ts = i64::try_from(packet.ts()).ok();
            let dur = packet.dur();
            if packets.push(Packet::new(packet.data, ts, dur)).is_err() {
                debug!("Packet queue closed, stopping feed");
                break;
            }
            queued += 1;
        }

        packets.close();
        info!("Fed {} packets from {}", queued, self.path.display());
        queued
    }
}
