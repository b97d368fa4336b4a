//! Error types for dplay-audio
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use crate::audio::converter::ConverterError;
use thiserror::Error;

/// Main error type for dplay-audio
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration or shared-library errors
    #[error(transparent)]
    Common(#[from] dplay_common::Error),

    /// Audio decoding errors (recoverable per packet)
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Sample format converter setup errors (fatal for the session)
    #[error("Converter error: {0}")]
    Converter(#[from] ConverterError),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using dplay-audio Error
pub type Result<T> = std::result::Result<T, Error>;
