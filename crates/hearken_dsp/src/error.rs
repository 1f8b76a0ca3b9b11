//! DSP Error Types

use thiserror::Error;

/// Errors that can occur while building or configuring the signal chain
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("Invalid band index: {0}")]
    InvalidBandIndex(usize),

    #[error("Invalid filter coefficients for frequency {frequency}Hz at sample rate {sample_rate}Hz")]
    InvalidCoefficients { frequency: f32, sample_rate: f32 },

    #[error("Sample rate must be positive, got {0}")]
    InvalidSampleRate(f32),

    #[error("Channel count must be at least 1, got {0}")]
    InvalidChannelCount(usize),

    #[error("Band {0}Hz is configured more than once")]
    DuplicateBand(u32),

    #[error("Boost factor must be a positive finite number, got {0}")]
    InvalidBoostFactor(f32),
}
