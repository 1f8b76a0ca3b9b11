//! Controller State Reporting

use serde::{Deserialize, Serialize};

use crate::error::{AudioError, ErrorKind, VOLUME_WARNING_MESSAGE};

/// Lifecycle of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "kind")]
pub enum SessionState {
    /// Never started
    Idle,
    /// Waiting for device acquisition
    Initializing,
    Active,
    Stopped,
    Failed(ErrorKind),
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }
}

/// The single user-visible error or warning slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: ErrorKind,
    pub message: String,
    /// Clears itself after a delay
    pub transient: bool,
}

impl Notice {
    pub fn from_error(err: &AudioError) -> Option<Self> {
        err.kind().map(|kind| Self {
            kind,
            message: err.user_message(),
            transient: false,
        })
    }

    pub fn volume_warning() -> Self {
        Self {
            kind: ErrorKind::VolumeWarning,
            message: VOLUME_WARNING_MESSAGE.to_string(),
            transient: true,
        }
    }
}

/// Snapshot returned by [`crate::AudioController::status`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub state: SessionState,
    pub is_active: bool,
    /// The signal chain parameters have been built
    pub is_initialized: bool,
    pub volume_percent: f32,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}
