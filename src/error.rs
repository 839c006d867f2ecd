//! Error types for the audio driver.
//!
//! Only structural operations (`start`, session negotiation, clip loading)
//! return errors. Interruptions and route changes are not errors; they are
//! recovered in place and logged.

use std::path::PathBuf;

use crate::audio::Direction;

/// Errors surfaced synchronously to callers of the driver.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    /// The shared audio session could not be negotiated or activated.
    #[error("audio session negotiation failed: {0}")]
    Session(String),

    /// The hardware unit for a direction could not be constructed.
    #[error("{direction} unit setup failed: {reason}")]
    UnitSetup {
        /// Direction whose unit failed.
        direction: Direction,
        /// Backend-provided reason.
        reason: String,
    },

    /// The hardware unit was built but refused to start.
    #[error("{direction} unit failed to start: {reason}")]
    UnitStart {
        /// Direction whose unit failed.
        direction: Direction,
        /// Backend-provided reason.
        reason: String,
    },

    /// A different audio bus is already bound to this driver.
    #[error("audio bus already bound")]
    BusAlreadyBound,

    /// A ringtone clip could not be opened or decoded.
    #[error("ringtone clip {}: {reason}", path.display())]
    ClipLoad {
        /// Path of the clip.
        path: PathBuf,
        /// Why loading failed.
        reason: String,
    },

    /// The ringtone player could not start playback.
    #[error("ringtone playback failed: {0}")]
    ClipPlayback(String),

    /// The recovery queue could not be started or has shut down.
    #[error("recovery queue unavailable: {0}")]
    Scheduler(String),
}

impl AudioError {
    /// Creates a unit setup error for the given direction.
    pub fn unit_setup(direction: Direction, reason: impl Into<String>) -> Self {
        Self::UnitSetup {
            direction,
            reason: reason.into(),
        }
    }

    /// Creates a unit start error for the given direction.
    pub fn unit_start(direction: Direction, reason: impl Into<String>) -> Self {
        Self::UnitStart {
            direction,
            reason: reason.into(),
        }
    }

    /// Creates a session negotiation error.
    pub fn session(reason: impl Into<String>) -> Self {
        Self::Session(reason.into())
    }
}
