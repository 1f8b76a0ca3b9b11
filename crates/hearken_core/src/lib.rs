//! Hearken Core - Audio Controller
//!
//! This crate drives the hearing-assist pass-through:
//! - Device acquisition with voice processing disabled (via CPAL)
//! - Start/stop lifecycle with cancellation of in-flight starts
//! - Live volume and band gain control without rebuilding the chain
//! - A single user-visible error/warning slot with a timed hearing warning
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Control Thread                         │
//! │   UI ──start/stop/set_*──▶ AudioController ──events──▶ UI   │
//! └─────────────────────────────────────────────────────────────┘
//!            │ crossbeam-channel            │ atomics (ChainControl)
//!            ▼                              ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │     Session Thread       │   │        Audio Threads         │
//! │  acquire ─▶ wire ─▶ own  │──▶│ Capture ──rtrb──▶ Chain ─▶ Out│
//! │  streams, release them   │   │  (Zero allocation path)      │
//! └──────────────────────────┘   └──────────────────────────────┘
//! ```

pub mod backend;
mod config;
mod controller;
mod device;
mod error;
mod message;
mod session;
mod status;
mod warning;

pub use backend::{AcquisitionGate, AudioBackend, CpalBackend, SimulatedBackend};
pub use config::{ControllerConfig, SafetyConfig, StreamConfig};
pub use controller::{AudioController, PendingStart};
pub use device::{AudioDevice, CaptureRequest, DeviceType, SessionInfo};
pub use error::{AudioError, AudioResult, DeviceError, ErrorKind, VOLUME_WARNING_MESSAGE};
pub use message::{Event, EVENT_QUEUE_CAPACITY};
pub use session::DeviceState;
pub use status::{ControllerStatus, Notice, SessionState};

// Re-export DSP types for convenience
pub use hearken_dsp::{BandSetting, ChainLayout, Levels, BAND_FREQUENCIES, MAX_GAIN_DB, MIN_GAIN_DB};
