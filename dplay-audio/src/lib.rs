//! # dplay Audio Pipeline Library (dplay-audio)
//!
//! Audio-rendering leg of a media player.
//!
//! **Purpose:** Pull compressed packets from a queue, decode them, convert the
//! samples to stereo S16 at 44.1kHz and hand PCM buffers to a callback-driven
//! output device.
//!
//! **Architecture:** symphonia (decode) + rubato (resample) + cpal (output),
//! with a buffer-queue protocol between the device and the decode engine.

pub mod audio;
pub mod error;
pub mod playback;

pub use error::{Error, Result};
pub use playback::{AudioPlayer, DecodeResampleEngine, StreamAnalysis};
