//! Output Gain Stage
//!
//! Final scalar multiplier. The volume control is expressed as 0-100 %;
//! the boost factor lets 100 % go past unity so quiet microphones can
//! still be brought up to a comfortable level.

use serde::{Deserialize, Serialize};

use crate::processor::{AudioProcessor, ProcessContext};

/// Linear gain at 100 % volume
pub const DEFAULT_BOOST_FACTOR: f32 = 2.0;

/// Clamp a requested volume to 0-100 %. NaN counts as silence.
#[inline]
pub fn clamp_percent(percent: f32) -> f32 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}

/// Requested volume plus the boost that maps it to a linear gain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutputLevel {
    pub requested_percent: f32,
    pub boost_factor: f32,
}

impl OutputLevel {
    pub fn new(requested_percent: f32, boost_factor: f32) -> Self {
        Self {
            requested_percent: clamp_percent(requested_percent),
            boost_factor,
        }
    }

    /// `clamp(percent / 100, 0, 1) * boost_factor`, always in `[0, boost_factor]`
    pub fn linear_gain(&self) -> f32 {
        (clamp_percent(self.requested_percent) / 100.0).clamp(0.0, 1.0) * self.boost_factor
    }
}

/// Scalar gain node
#[derive(Debug, Clone)]
pub struct OutputGain {
    gain: f32,
    max_gain: f32,
}

impl OutputGain {
    pub fn new(level: OutputLevel) -> Self {
        Self {
            gain: level.linear_gain(),
            max_gain: level.boost_factor,
        }
    }

    /// Set the linear gain; anything outside `[0, boost_factor]` is clamped
    #[inline]
    pub fn set_gain(&mut self, gain: f32) {
        self.gain = if gain.is_nan() {
            0.0
        } else {
            gain.clamp(0.0, self.max_gain)
        };
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    #[inline]
    pub fn process_interleaved(&self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample *= self.gain;
        }
    }
}

impl AudioProcessor for OutputGain {
    fn process(&mut self, buffer: &mut [f32], _context: &ProcessContext) {
        self.process_interleaved(buffer);
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "Output Gain"
    }
}
