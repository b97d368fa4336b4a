//! Session status and error reporting contract
//!
//! One `PlayerStatus` exists per playback session and is handed to every
//! component by `Arc`. Nothing in the pipeline reads process-wide state.

use std::sync::atomic::{AtomicBool, Ordering};

/// Converter could not be allocated (invalid source parameters or buffer
/// allocation failure).
pub const CONVERTER_ALLOC_ERROR_CODE: i32 = 1001;

/// Converter was allocated but could not be initialised for the requested
/// target format.
pub const CONVERTER_INIT_ERROR_CODE: i32 = 1002;

/// Output device, route or player could not be acquired.
pub const DEVICE_INIT_ERROR_CODE: i32 = 1003;

/// Which thread detected the error being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadMode {
    /// The thread that owns the player (stream analysis, release)
    Main,
    /// A pipeline-owned thread (device init worker, driver callback)
    Worker,
}

/// Receiver of fatal pipeline errors.
///
/// Called synchronously on the thread that detected the failure, so
/// implementations must not block for long.
pub trait ErrorSink: Send + Sync {
    fn report_error(&self, mode: ThreadMode, code: i32, message: &str);
}

/// Session-scoped status shared by all pipeline components.
#[derive(Debug, Default)]
pub struct PlayerStatus {
    /// Set by the owning controller to stop the decode loop
    exit: AtomicBool,

    /// Set when a session-ending error has been reported
    fatal: AtomicBool,
}

impl PlayerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the decode loop to stop at its next iteration.
    ///
    /// Does not wake a consumer already blocked on the packet queue; the
    /// queue has to be closed for that.
    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::SeqCst);
    }

    pub fn is_exit(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }

    /// Mark the session as failed. Returns true only for the first call.
    pub fn mark_fatal(&self) -> bool {
        !self.fatal.swap(true, Ordering::SeqCst)
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }
}
