//! # dplay Common Library
//!
//! Shared code for the dplay audio pipeline crates:
//! - Session status object (exit flag, fatal flag)
//! - Error sink contract and error codes
//! - Event types (PlayerEvent enum) and the event bus
//! - Configuration loading

pub mod config;
pub mod error;
pub mod events;
pub mod status;

pub use error::{Error, Result};
pub use events::{EventBus, LifecycleState, PlayerEvent};
pub use status::{ErrorSink, PlayerStatus, ThreadMode};
