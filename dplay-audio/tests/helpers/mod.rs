//! Test helper modules for dplay-audio integration tests
//!
//! - `fakes`: scripted decoder, manually driven output device, recording
//!   error sink
//! - `audio_generator`: deterministic WAV files for the symphonia path

#![allow(dead_code)]

pub mod audio_generator;
pub mod fakes;

pub use audio_generator::{generate_sine_wav, generate_silent_wav};
pub use fakes::{
    failing_factory, manual_factory, DeviceProbe, ManualDevice, RecordingErrorSink, Report,
    ScriptedDecoder, Step,
};
