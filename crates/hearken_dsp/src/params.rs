//! Live Chain Parameters
//!
//! The control thread writes, the audio thread reads. Every value is an
//! f32 stored as `AtomicU32` bits (there is no `AtomicF32`), so neither side
//! ever takes a lock. The audio thread picks up new values at the start of
//! its next block.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chain::ChainLayout;
use crate::dynamics::CompressorSettings;
use crate::error::DspError;
use crate::filter_bank::{clamp_gain_db, BandSetting};
use crate::output_gain::OutputLevel;

#[derive(Debug)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    fn load(&self) -> f32 {
        // Relaxed is enough: each value stands alone, nothing is published through it
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct BandCell {
    frequency_hz: u32,
    gain_db: AtomicF32,
}

#[derive(Debug)]
struct SharedParams {
    bands: Box<[BandCell]>,
    compressor: CompressorSettings,
    boost_factor: f32,
    volume_percent: AtomicF32,
    linear_gain: AtomicF32,
    output_peak: AtomicF32,
    gain_reduction_db: AtomicF32,
}

/// Meter readings published by the audio thread
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Levels {
    /// Peak absolute sample of the last processed block
    pub output_peak: f32,
    /// Compressor gain reduction in dB (non-positive)
    pub gain_reduction_db: f32,
}

/// Handle to the parameters of a signal chain.
///
/// Cloning is cheap; all clones address the same parameter set. Band
/// membership is fixed at construction, only values change.
#[derive(Debug, Clone)]
pub struct ChainControl {
    shared: Arc<SharedParams>,
}

impl ChainControl {
    /// Validate the layout and allocate the parameter cells
    pub fn new(layout: &ChainLayout, volume_percent: f32) -> Result<Self, DspError> {
        layout.validate()?;

        let bands = layout
            .bands
            .iter()
            .map(|band| BandCell {
                frequency_hz: band.frequency_hz,
                gain_db: AtomicF32::new(clamp_gain_db(band.gain_db)),
            })
            .collect();
        let level = OutputLevel::new(volume_percent, layout.boost_factor);

        Ok(Self {
            shared: Arc::new(SharedParams {
                bands,
                compressor: layout.compressor,
                boost_factor: layout.boost_factor,
                volume_percent: AtomicF32::new(level.requested_percent),
                linear_gain: AtomicF32::new(level.linear_gain()),
                output_peak: AtomicF32::new(0.0),
                gain_reduction_db: AtomicF32::new(0.0),
            }),
        })
    }

    /// Set a band's gain by center frequency.
    ///
    /// Returns the clamped value now in effect, or `None` for an unknown band.
    pub fn set_band_gain(&self, frequency_hz: u32, gain_db: f32) -> Option<f32> {
        let cell = self
            .shared
            .bands
            .iter()
            .find(|b| b.frequency_hz == frequency_hz)?;
        let clamped = clamp_gain_db(gain_db);
        cell.gain_db.store(clamped);
        Some(clamped)
    }

    pub fn band_gain(&self, frequency_hz: u32) -> Option<f32> {
        self.shared
            .bands
            .iter()
            .find(|b| b.frequency_hz == frequency_hz)
            .map(|b| b.gain_db.load())
    }

    /// Snapshot of every band in chain order
    pub fn bands(&self) -> Vec<BandSetting> {
        self.shared
            .bands
            .iter()
            .map(|b| BandSetting {
                frequency_hz: b.frequency_hz,
                gain_db: b.gain_db.load(),
            })
            .collect()
    }

    pub fn band_count(&self) -> usize {
        self.shared.bands.len()
    }

    /// Set the requested volume and derive the linear gain
    pub fn set_volume_percent(&self, percent: f32) -> OutputLevel {
        let level = OutputLevel::new(percent, self.shared.boost_factor);
        self.shared.volume_percent.store(level.requested_percent);
        self.shared.linear_gain.store(level.linear_gain());
        level
    }

    pub fn output_level(&self) -> OutputLevel {
        OutputLevel {
            requested_percent: self.shared.volume_percent.load(),
            boost_factor: self.shared.boost_factor,
        }
    }

    pub fn linear_gain(&self) -> f32 {
        self.shared.linear_gain.load()
    }

    pub fn boost_factor(&self) -> f32 {
        self.shared.boost_factor
    }

    pub fn compressor(&self) -> CompressorSettings {
        self.shared.compressor
    }

    /// Latest meter values from the audio thread
    pub fn levels(&self) -> Levels {
        Levels {
            output_peak: self.shared.output_peak.load(),
            gain_reduction_db: self.shared.gain_reduction_db.load(),
        }
    }

    /// Layout reflecting current gains, for rebuilding at another sample rate
    pub fn layout(&self) -> ChainLayout {
        ChainLayout {
            bands: self.bands(),
            compressor: self.shared.compressor,
            boost_factor: self.shared.boost_factor,
        }
    }

    #[inline]
    pub(crate) fn band_gain_at(&self, index: usize) -> f32 {
        self.shared.bands[index].gain_db.load()
    }

    #[inline]
    pub(crate) fn publish_levels(&self, output_peak: f32, gain_reduction_db: f32) {
        self.shared.output_peak.store(output_peak);
        self.shared.gain_reduction_db.store(gain_reduction_db);
    }

    /// True if both handles address the same parameter set
    pub fn same_as(&self, other: &ChainControl) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control() -> ChainControl {
        ChainControl::new(&ChainLayout::default(), 75.0).unwrap()
    }

    #[test]
    fn test_initial_values() {
        let control = control();
        assert_eq!(control.band_count(), 6);
        assert_eq!(control.band_gain(1000), Some(0.0));
        assert_eq!(control.output_level().requested_percent, 75.0);
        assert_eq!(control.linear_gain(), 1.5);
        assert_eq!(control.levels(), Levels::default());
    }

    #[test]
    fn test_band_gain_is_clamped() {
        let control = control();
        for value in [-100.0_f32, -12.5, -3.0, 0.0, 7.25, 12.0, 99.0] {
            let stored = control.set_band_gain(500, value).unwrap();
            assert_eq!(stored, value.clamp(-12.0, 12.0));
            assert_eq!(control.band_gain(500), Some(stored));
        }
    }

    #[test]
    fn test_unknown_band_is_ignored() {
        let control = control();
        assert_eq!(control.set_band_gain(440, 6.0), None);
        assert_eq!(control.band_gain(440), None);
        assert!(control.bands().iter().all(|b| b.gain_db == 0.0));
    }

    #[test]
    fn test_volume_maps_to_linear_gain() {
        let control = control();
        for percent in [-20.0_f32, 0.0, 10.0, 50.0, 90.0, 100.0, 140.0] {
            let level = control.set_volume_percent(percent);
            let expected = percent.clamp(0.0, 100.0) / 100.0 * 2.0;
            assert_eq!(level.linear_gain(), expected);
            assert_eq!(control.linear_gain(), expected);
            assert!(control.linear_gain() <= control.boost_factor());
        }
    }

    #[test]
    fn test_clones_share_parameters() {
        let a = control();
        let b = a.clone();
        a.set_band_gain(8000, 6.0);
        assert_eq!(b.band_gain(8000), Some(6.0));
        assert!(a.same_as(&b));
        assert!(!a.same_as(&control()));
    }

    #[test]
    fn test_layout_snapshot_tracks_gains() {
        let control = control();
        control.set_band_gain(2000, -4.0);
        let layout = control.layout();
        assert_eq!(layout.bands[3], BandSetting::new(2000, -4.0));
        assert_eq!(layout.boost_factor, 2.0);
    }

    #[test]
    fn test_invalid_layout_rejected() {
        let layout = ChainLayout {
            boost_factor: 0.0,
            ..ChainLayout::default()
        };
        assert_eq!(
            ChainControl::new(&layout, 50.0).err(),
            Some(DspError::InvalidBoostFactor(0.0))
        );
    }
}
