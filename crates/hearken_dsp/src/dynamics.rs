//! Dynamics Compressor
//!
//! Feed-forward compressor that keeps sudden loudness spikes (feedback
//! squeal, a shout next to the microphone) from reaching the ear at full
//! gain. It sits after the filter bank so EQ boosts are limited before the
//! final output gain.
//!
//! # Characteristic
//!
//! ```text
//! reduction (dB)
//!     │                        ╱ slope (1 - 1/ratio)
//!     │                     ╱
//!     │                ..╱
//!     │           . ˙
//!     └──────────┴─────────┴──────── input (dB)
//!            threshold  threshold + knee
//! ```
//!
//! The knee starts at the threshold and widens upwards, so nothing below the
//! threshold is ever touched. Detection is linked across channels (frame
//! peak) to keep the stereo image steady.

use serde::{Deserialize, Serialize};

use crate::error::DspError;
use crate::processor::{AudioProcessor, ProcessContext};

/// Floor for level detection, avoids log10(0)
const SILENCE_DB: f32 = -120.0;

/// Fixed compressor characteristic
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressorSettings {
    pub threshold_db: f32,
    pub knee_db: f32,
    pub ratio: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
}

impl CompressorSettings {
    /// The hearing-protection curve every chain uses
    pub const HEARING_SAFE: Self = Self {
        threshold_db: -24.0,
        knee_db: 30.0,
        ratio: 12.0,
        attack_ms: 3.0,
        release_ms: 250.0,
    };
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self::HEARING_SAFE
    }
}

#[inline]
fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        SILENCE_DB
    } else {
        (20.0 * linear.log10()).max(SILENCE_DB)
    }
}

#[inline]
fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// One-pole smoothing coefficient for a time constant in milliseconds
fn time_coefficient(time_ms: f32, sample_rate: f32) -> f32 {
    let samples = (time_ms.max(0.01) / 1000.0) * sample_rate;
    (-1.0 / samples).exp()
}

/// Static gain curve
#[derive(Debug, Clone, Copy)]
struct GainComputer {
    threshold_db: f32,
    knee_db: f32,
    slope: f32,
}

impl GainComputer {
    fn new(settings: &CompressorSettings) -> Self {
        Self {
            threshold_db: settings.threshold_db,
            knee_db: settings.knee_db.max(0.0),
            slope: 1.0 - 1.0 / settings.ratio.max(1.0),
        }
    }

    /// Gain reduction in dB (non-negative) for a detected level
    #[inline]
    fn reduction_db(&self, input_db: f32) -> f32 {
        let overshoot = input_db - self.threshold_db;
        if overshoot <= 0.0 {
            0.0
        } else if overshoot < self.knee_db {
            self.slope * overshoot * overshoot / (2.0 * self.knee_db)
        } else {
            self.slope * (overshoot - self.knee_db / 2.0)
        }
    }
}

/// The compressor stage
pub struct DynamicsStage {
    settings: CompressorSettings,
    computer: GainComputer,
    attack_coeff: f32,
    release_coeff: f32,
    /// Smoothed gain reduction in dB (non-negative)
    reduction_db: f32,
    channels: usize,
}

impl DynamicsStage {
    pub fn new(settings: CompressorSettings, context: &ProcessContext) -> Result<Self, DspError> {
        context.validate()?;
        Ok(Self {
            settings,
            computer: GainComputer::new(&settings),
            attack_coeff: time_coefficient(settings.attack_ms, context.sample_rate),
            release_coeff: time_coefficient(settings.release_ms, context.sample_rate),
            reduction_db: 0.0,
            channels: context.channels,
        })
    }

    pub fn settings(&self) -> &CompressorSettings {
        &self.settings
    }

    /// Current gain reduction in dB (always non-positive).
    ///
    /// 0.0 means the compressor is idle; -6.0 means the signal is being
    /// pulled down by 6 dB.
    pub fn gain_reduction_db(&self) -> f32 {
        -self.reduction_db
    }

    /// Process an interleaved buffer in-place
    ///
    /// # Real-time Safety
    /// No allocations, O(n) time.
    #[inline]
    pub fn process_interleaved(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(self.channels) {
            let peak = frame.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
            let target = self.computer.reduction_db(linear_to_db(peak));

            // Reduction growing = attack, shrinking = release
            let coeff = if target > self.reduction_db {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.reduction_db = coeff * self.reduction_db + (1.0 - coeff) * target;

            if self.reduction_db > 0.0 {
                let gain = db_to_linear(-self.reduction_db);
                for sample in frame.iter_mut() {
                    *sample *= gain;
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.reduction_db = 0.0;
    }
}

impl AudioProcessor for DynamicsStage {
    fn process(&mut self, buffer: &mut [f32], _context: &ProcessContext) {
        self.process_interleaved(buffer);
    }

    fn reset(&mut self) {
        DynamicsStage::reset(self);
    }

    fn name(&self) -> &'static str {
        "Dynamics Compressor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(channels: usize) -> DynamicsStage {
        DynamicsStage::new(
            CompressorSettings::HEARING_SAFE,
            &ProcessContext::new(48000.0, channels, 256),
        )
        .unwrap()
    }

    #[test]
    fn test_hearing_safe_constants() {
        let s = CompressorSettings::default();
        assert_eq!(s.threshold_db, -24.0);
        assert_eq!(s.knee_db, 30.0);
        assert_eq!(s.ratio, 12.0);
        assert_eq!(s.attack_ms, 3.0);
        assert_eq!(s.release_ms, 250.0);
    }

    #[test]
    fn test_curve_is_flat_below_threshold() {
        let computer = GainComputer::new(&CompressorSettings::HEARING_SAFE);
        assert_eq!(computer.reduction_db(-60.0), 0.0);
        assert_eq!(computer.reduction_db(-24.0), 0.0);
        assert!(computer.reduction_db(-20.0) > 0.0);
    }

    #[test]
    fn test_curve_is_continuous_at_knee_end() {
        let computer = GainComputer::new(&CompressorSettings::HEARING_SAFE);
        let knee_end = -24.0 + 30.0;
        let below = computer.reduction_db(knee_end - 0.001);
        let above = computer.reduction_db(knee_end + 0.001);
        assert!((above - below).abs() < 0.01, "{} vs {}", below, above);
    }

    #[test]
    fn test_quiet_signal_passes_untouched() {
        let mut comp = stage(2);
        // -40 dBFS stays well below the threshold
        let mut buffer = vec![0.01_f32; 2 * 4800];
        comp.process_interleaved(&mut buffer);
        assert!(buffer.iter().all(|&s| s == 0.01));
        assert_eq!(comp.gain_reduction_db(), 0.0);
    }

    #[test]
    fn test_loud_signal_is_reduced() {
        let mut comp = stage(1);
        let mut buffer = vec![1.0_f32; 9600];
        comp.process_interleaved(&mut buffer);

        // 0 dBFS: overshoot 24 dB, inside the knee -> 11/12 * 24^2 / 60 = 8.8 dB
        let settled = buffer[buffer.len() - 1];
        assert!((settled - 0.363).abs() < 0.01, "settled output {}", settled);
        assert!((comp.gain_reduction_db() + 8.8).abs() < 0.1);
    }

    #[test]
    fn test_signal_past_knee_follows_ratio() {
        let mut comp = stage(1);
        let mut buffer = vec![4.0_f32; 9600];
        comp.process_interleaved(&mut buffer);

        // +12 dBFS: overshoot 36 dB -> (36 - 15) * 11/12 = 19.3 dB
        let settled = buffer[buffer.len() - 1];
        assert!((settled - 0.434).abs() < 0.01, "settled output {}", settled);
        assert!((comp.gain_reduction_db() + 19.29).abs() < 0.1);
    }

    #[test]
    fn test_attack_is_faster_than_release() {
        let mut comp = stage(1);

        // 10 ms of full scale: attack (3 ms) has mostly engaged
        let mut loud = vec![1.0_f32; 480];
        comp.process_interleaved(&mut loud);
        let engaged = comp.gain_reduction_db();
        assert!(engaged < -6.0, "attack too slow: {}", engaged);

        // 10 ms of silence: release (250 ms) has barely let go
        let mut quiet = vec![0.0_f32; 480];
        comp.process_interleaved(&mut quiet);
        let after = comp.gain_reduction_db();
        assert!(after < engaged * 0.8, "release too fast: {}", after);
    }

    #[test]
    fn test_linked_detection_applies_same_gain() {
        let mut comp = stage(2);
        let mut buffer = Vec::with_capacity(4800);
        for _ in 0..2400 {
            buffer.push(1.0);
            buffer.push(0.1);
        }
        comp.process_interleaved(&mut buffer);
        let frame = &buffer[buffer.len() - 2..];
        assert!((frame[0] / frame[1] - 10.0).abs() < 0.001, "channel ratio must be preserved");
    }

    #[test]
    fn test_reset_releases_immediately() {
        let mut comp = stage(1);
        let mut loud = vec![1.0_f32; 4800];
        comp.process_interleaved(&mut loud);
        assert!(comp.gain_reduction_db() < 0.0);
        comp.reset();
        assert_eq!(comp.gain_reduction_db(), 0.0);
    }
}
