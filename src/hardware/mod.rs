//! Reward actuator and response sensor boundary.
//!
//! Device drivers live outside this crate; they implement [`HardwareBridge`]
//! on top of whatever wire protocol the rig speaks.

pub mod monitor;
pub mod sim;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use thiserror::Error;

use crate::core::sign::Sign;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HardwareError {
    /// Raised once at startup; the session cannot run.
    #[error("hardware connect failed: {0}")]
    Connect(String),
    /// A single command did not reach the device.
    #[error("hardware write failed: {0}")]
    Write(String),
}

/// Decoded sensor event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseEvent {
    pub side: Sign,
    pub timestamp: Instant,
}

impl ResponseEvent {
    pub fn now(side: Sign) -> Self {
        Self {
            side,
            timestamp: Instant::now(),
        }
    }
}

pub trait HardwareBridge: Send + Sync {
    /// Open the device. Called once before any other method.
    fn connect(&self) -> Result<(), HardwareError>;

    /// Next pending event, if any. Must not block.
    fn read_event(&self) -> Option<ResponseEvent>;

    fn deliver_reward(&self, side: Sign, volume_ul: f64) -> Result<(), HardwareError>;

    /// Switch the cue light on one side.
    fn set_indicator(&self, side: Sign, on: bool) -> Result<(), HardwareError>;
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
