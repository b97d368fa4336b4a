//! Playback: decode-resample engine and session lifecycle

pub mod engine;
pub mod player;
pub mod state;

pub use engine::{DecodeResampleEngine, EngineSlot, EngineStats, SharedEngine, StreamAnalysis};
pub use player::AudioPlayer;
pub use state::{LifecycleState, SharedLifecycle};
