//! Event Types
//!
//! Events flow from the controller and session threads to whoever drives
//! the UI, through a bounded channel drained by
//! [`crate::AudioController::poll_event`]. When nobody drains it, new
//! events are dropped; [`crate::AudioController::status`] always has the
//! current picture.

use serde::{Deserialize, Serialize};

use crate::device::SessionInfo;
use crate::error::ErrorKind;
use crate::status::{Notice, SessionState};

/// Events kept while nobody polls
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Events sent from the controller to the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    /// Controller moved to a new lifecycle state
    StateChanged { state: SessionState },

    /// Requested volume and the linear gain it maps to
    VolumeChanged { percent: f32, linear_gain: f32 },

    /// A band gain was applied (value after clamping)
    BandGainChanged { frequency_hz: u32, gain_db: f32 },

    /// An error or warning was raised
    Notice(Notice),

    /// The notice slot was cleared
    NoticeCleared { kind: ErrorKind },

    /// Devices were acquired and wired to the signal chain
    DeviceOpened(SessionInfo),

    /// Streams were released
    DeviceClosed,
}
