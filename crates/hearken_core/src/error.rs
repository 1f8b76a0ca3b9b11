//! Controller Error Types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message shown while the volume sits above the warning threshold
pub const VOLUME_WARNING_MESSAGE: &str =
    "High volume can damage your hearing. Consider turning it down.";

/// Failures reported by an audio backend while acquiring or driving devices
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device unavailable: {0}")]
    Unavailable(String),
}

/// Category of a surfaced notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    PermissionDenied,
    DeviceNotFound,
    DeviceUnavailable,
    InitializationFailed,
    /// Advisory only, the session keeps running
    VolumeWarning,
}

/// Errors returned by the audio controller
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("No input device found: {0}")]
    DeviceNotFound(String),

    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Signal chain initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Start was cancelled by a stop request")]
    Cancelled,

    #[error("Device session has shut down")]
    SessionClosed,
}

impl AudioError {
    /// Notice category, or `None` for outcomes that are not failures
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            AudioError::PermissionDenied(_) => Some(ErrorKind::PermissionDenied),
            AudioError::DeviceNotFound(_) => Some(ErrorKind::DeviceNotFound),
            AudioError::DeviceUnavailable(_) | AudioError::SessionClosed => {
                Some(ErrorKind::DeviceUnavailable)
            }
            AudioError::InitializationFailed(_) | AudioError::Config(_) => {
                Some(ErrorKind::InitializationFailed)
            }
            AudioError::Cancelled => None,
        }
    }

    /// Text for the person wearing the headphones
    pub fn user_message(&self) -> String {
        match self {
            AudioError::PermissionDenied(_) => {
                "Microphone access was denied. Please allow microphone access and try again."
                    .to_string()
            }
            AudioError::DeviceNotFound(_) => {
                "No microphone was found. Please connect a microphone and try again.".to_string()
            }
            AudioError::DeviceUnavailable(detail) => {
                format!("Audio could not be started: {detail}")
            }
            AudioError::SessionClosed => {
                "Audio could not be started: the device session has shut down.".to_string()
            }
            AudioError::InitializationFailed(_) | AudioError::Config(_) => {
                "The audio system could not be initialized.".to_string()
            }
            AudioError::Cancelled => "Audio start was cancelled.".to_string(),
        }
    }
}

impl From<DeviceError> for AudioError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::PermissionDenied(detail) => AudioError::PermissionDenied(detail),
            DeviceError::NotFound(detail) => AudioError::DeviceNotFound(detail),
            DeviceError::Unavailable(detail) => AudioError::DeviceUnavailable(detail),
        }
    }
}

impl From<hearken_dsp::DspError> for AudioError {
    fn from(err: hearken_dsp::DspError) -> Self {
        AudioError::InitializationFailed(err.to_string())
    }
}

/// Result type alias for controller operations
pub type AudioResult<T> = Result<T, AudioError>;
