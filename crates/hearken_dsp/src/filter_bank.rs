//! Six-Band Peaking Filter Bank
//!
//! A serial cascade of BiQuad peaking filters, one per frequency band.
//! Based on the RBJ (Robert Bristow-Johnson) Audio EQ Cookbook.
//!
//! Gain changes recompute coefficients in place; the delay lines are kept,
//! so a slider move never produces a click.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};
use serde::{Deserialize, Serialize};

use crate::error::DspError;
use crate::processor::{AudioProcessor, ProcessContext};

/// Center frequencies (Hz) of the speech-range bands
pub const BAND_FREQUENCIES: [u32; 6] = [250, 500, 1000, 2000, 4000, 8000];

/// Quality factor shared by every band
pub const BAND_Q: f32 = 1.0;

/// Lowest gain a band accepts (dB)
pub const MIN_GAIN_DB: f32 = -12.0;

/// Highest gain a band accepts (dB)
pub const MAX_GAIN_DB: f32 = 12.0;

/// Clamp a requested band gain into the supported range.
///
/// NaN is treated as flat (0 dB).
#[inline]
pub fn clamp_gain_db(gain_db: f32) -> f32 {
    if gain_db.is_nan() {
        0.0
    } else {
        gain_db.clamp(MIN_GAIN_DB, MAX_GAIN_DB)
    }
}

/// One tunable band: identity is the center frequency
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandSetting {
    pub frequency_hz: u32,
    pub gain_db: f32,
}

impl BandSetting {
    /// Create a band, clamping the gain
    pub fn new(frequency_hz: u32, gain_db: f32) -> Self {
        Self {
            frequency_hz,
            gain_db: clamp_gain_db(gain_db),
        }
    }

    /// A band with 0 dB gain
    pub fn flat(frequency_hz: u32) -> Self {
        Self::new(frequency_hz, 0.0)
    }

    /// Generate peaking BiQuad coefficients for this band
    fn to_coefficients(self, context: &ProcessContext) -> Result<Coefficients<f32>, DspError> {
        let invalid = DspError::InvalidCoefficients {
            frequency: self.frequency_hz as f32,
            sample_rate: context.sample_rate,
        };

        // `hz()` panics on non-positive values, so check before converting
        let frequency = self.frequency_hz as f32;
        if self.frequency_hz == 0 || frequency >= context.nyquist() {
            return Err(invalid);
        }

        Coefficients::<f32>::from_params(
            Type::PeakingEQ(self.gain_db),
            context.sample_rate.hz(),
            frequency.hz(),
            BAND_Q,
        )
        .map_err(|_| invalid)
    }
}

/// The default band set, all flat
pub fn default_bands() -> Vec<BandSetting> {
    BAND_FREQUENCIES.iter().copied().map(BandSetting::flat).collect()
}

/// The filter bank processor
///
/// Holds one filter per band per channel. Designed for real-time use:
/// no allocations in `process_interleaved()` or `set_gain()`.
pub struct FilterBank {
    frequencies: Vec<u32>,
    gains_db: Vec<f32>,
    // Indexed [band][channel]; each channel keeps its own delay line
    filters: Vec<Vec<DirectForm2Transposed<f32>>>,
    context: ProcessContext,
}

impl FilterBank {
    /// Build the bank in the order the bands are given
    pub fn new(bands: &[BandSetting], context: &ProcessContext) -> Result<Self, DspError> {
        context.validate()?;

        let mut frequencies = Vec::with_capacity(bands.len());
        let mut gains_db = Vec::with_capacity(bands.len());
        let mut filters = Vec::with_capacity(bands.len());

        for band in bands {
            if frequencies.contains(&band.frequency_hz) {
                return Err(DspError::DuplicateBand(band.frequency_hz));
            }
            let band = BandSetting::new(band.frequency_hz, band.gain_db);
            let coeffs = band.to_coefficients(context)?;

            frequencies.push(band.frequency_hz);
            gains_db.push(band.gain_db);
            filters.push(
                (0..context.channels)
                    .map(|_| DirectForm2Transposed::<f32>::new(coeffs))
                    .collect(),
            );
        }

        Ok(Self {
            frequencies,
            gains_db,
            filters,
            context: *context,
        })
    }

    /// Number of bands
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    /// True when the bank has no bands (pure pass-through)
    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// Band center frequencies in processing order
    pub fn frequencies(&self) -> &[u32] {
        &self.frequencies
    }

    /// Gain currently applied to the band at `index`
    pub fn gain_db(&self, index: usize) -> Option<f32> {
        self.gains_db.get(index).copied()
    }

    /// Gain currently applied to the band centered at `frequency_hz`
    pub fn gain_for(&self, frequency_hz: u32) -> Option<f32> {
        self.index_of(frequency_hz).and_then(|i| self.gain_db(i))
    }

    /// Position of a band in the cascade
    pub fn index_of(&self, frequency_hz: u32) -> Option<usize> {
        self.frequencies.iter().position(|&f| f == frequency_hz)
    }

    /// Retune one band without touching filter state.
    ///
    /// Returns the clamped gain that is now in effect.
    pub fn set_gain(&mut self, index: usize, gain_db: f32) -> Result<f32, DspError> {
        let frequency_hz = match self.frequencies.get(index) {
            Some(&f) => f,
            None => return Err(DspError::InvalidBandIndex(index)),
        };
        let band = BandSetting::new(frequency_hz, gain_db);
        let coeffs = band.to_coefficients(&self.context)?;
        for filter in self.filters[index].iter_mut() {
            filter.update_coefficients(coeffs);
        }
        self.gains_db[index] = band.gain_db;
        Ok(band.gain_db)
    }

    /// Process an interleaved buffer in-place
    ///
    /// # Real-time Safety
    /// No allocations. O(n * bands) where n = buffer length.
    #[inline]
    pub fn process_interleaved(&mut self, buffer: &mut [f32]) {
        if self.filters.is_empty() {
            return;
        }
        for frame in buffer.chunks_exact_mut(self.context.channels) {
            for (channel, sample) in frame.iter_mut().enumerate() {
                let mut s = *sample;
                for band in self.filters.iter_mut() {
                    s = band[channel].run(s);
                }
                *sample = s;
            }
        }
    }

    /// Clear delay lines
    pub fn reset(&mut self) {
        for band in self.filters.iter_mut() {
            for filter in band.iter_mut() {
                filter.reset_state();
            }
        }
    }

    /// Sample rate the coefficients were computed for
    pub fn sample_rate(&self) -> f32 {
        self.context.sample_rate
    }
}

impl AudioProcessor for FilterBank {
    fn process(&mut self, buffer: &mut [f32], _context: &ProcessContext) {
        self.process_interleaved(buffer);
    }

    fn reset(&mut self) {
        FilterBank::reset(self);
    }

    fn name(&self) -> &'static str {
        "Peaking Filter Bank"
    }
}
