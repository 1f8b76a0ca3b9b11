//! Hearken DSP - Hearing-Assist Signal Chain
//!
//! This crate provides the real-time processing path for Hearken:
//! - Six-band peaking equalizer using BiQuad filters
//! - Soft-knee dynamics compressor guarding against loud spikes
//! - Boosted output gain with a clamped range
//! - Lock-free parameter updates through [`ChainControl`]
//!
//! # Architecture
//!
//! The chain follows a strict "no allocation in audio callback" rule.
//! The control side writes parameters into atomics; the audio callback
//! picks them up at the start of each block.

mod chain;
mod dynamics;
mod error;
mod filter_bank;
mod output_gain;
mod params;
pub mod presets;
mod processor;

pub use chain::{ChainLayout, SignalChain, Stage};
pub use dynamics::{CompressorSettings, DynamicsStage};
pub use error::DspError;
pub use filter_bank::{
    clamp_gain_db, default_bands, BandSetting, FilterBank, BAND_FREQUENCIES, BAND_Q, MAX_GAIN_DB,
    MIN_GAIN_DB,
};
pub use output_gain::{clamp_percent, OutputGain, OutputLevel, DEFAULT_BOOST_FACTOR};
pub use params::{ChainControl, Levels};
pub use presets::{Preset, PRESETS, UI_DEFAULT};
pub use processor::{AudioProcessor, ProcessContext};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        // Verify all public types are accessible
        let control = ChainControl::new(&ChainLayout::default(), 75.0).unwrap();
        let _chain = control.instantiate(ProcessContext::new(48000.0, 2, 256)).unwrap();
    }
}
