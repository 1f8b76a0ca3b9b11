//! Signal Chain
//!
//! Fixed processing topology, built once per session:
//!
//! ```text
//! input ──▶ Band[0] ──▶ … ──▶ Band[n-1] ──▶ Dynamics ──▶ Output gain ──▶ output
//! ```
//!
//! One serial path, no fan-out. The chain is owned by the audio callback;
//! the control side talks to it only through [`ChainControl`].

use serde::{Deserialize, Serialize};

use crate::dynamics::{CompressorSettings, DynamicsStage};
use crate::error::DspError;
use crate::filter_bank::{default_bands, BandSetting, FilterBank};
use crate::output_gain::{OutputGain, OutputLevel, DEFAULT_BOOST_FACTOR};
use crate::params::ChainControl;
use crate::processor::{AudioProcessor, ProcessContext};

/// A node in the chain, in processing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Peaking filter centered at the given frequency (Hz)
    Band(u32),
    Dynamics,
    Output,
}

/// Description of the graph to build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainLayout {
    pub bands: Vec<BandSetting>,
    #[serde(default)]
    pub compressor: CompressorSettings,
    pub boost_factor: f32,
}

impl Default for ChainLayout {
    fn default() -> Self {
        Self {
            bands: default_bands(),
            compressor: CompressorSettings::HEARING_SAFE,
            boost_factor: DEFAULT_BOOST_FACTOR,
        }
    }
}

impl ChainLayout {
    /// Checks that do not depend on the sample rate
    pub fn validate(&self) -> Result<(), DspError> {
        if !self.boost_factor.is_finite() || self.boost_factor <= 0.0 {
            return Err(DspError::InvalidBoostFactor(self.boost_factor));
        }
        for (i, band) in self.bands.iter().enumerate() {
            if band.frequency_hz == 0 {
                return Err(DspError::InvalidCoefficients {
                    frequency: 0.0,
                    sample_rate: 0.0,
                });
            }
            if self.bands[..i]
                .iter()
                .any(|b| b.frequency_hz == band.frequency_hz)
            {
                return Err(DspError::DuplicateBand(band.frequency_hz));
            }
        }
        Ok(())
    }
}

impl ChainControl {
    /// Build a processing chain for a concrete stream format.
    ///
    /// Starting values come from the current parameters, and the chain keeps
    /// following this handle afterwards.
    pub fn instantiate(&self, context: ProcessContext) -> Result<SignalChain, DspError> {
        context.validate()?;

        let layout = self.layout();
        let filter_bank = FilterBank::new(&layout.bands, &context)?;
        let dynamics = DynamicsStage::new(layout.compressor, &context)?;
        let output = OutputGain::new(OutputLevel {
            requested_percent: self.output_level().requested_percent,
            boost_factor: layout.boost_factor,
        });

        Ok(SignalChain {
            filter_bank,
            dynamics,
            output,
            control: self.clone(),
            context,
        })
    }
}

/// The running processing graph
pub struct SignalChain {
    filter_bank: FilterBank,
    dynamics: DynamicsStage,
    output: OutputGain,
    control: ChainControl,
    context: ProcessContext,
}

impl SignalChain {
    /// Where external input enters the chain.
    ///
    /// The first band, or the compressor when no bands are configured.
    pub fn entry_stage(&self) -> Stage {
        self.filter_bank
            .frequencies()
            .first()
            .map_or(Stage::Dynamics, |&f| Stage::Band(f))
    }

    /// Every stage in processing order
    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.filter_bank
            .frequencies()
            .iter()
            .map(|&f| Stage::Band(f))
            .chain([Stage::Dynamics, Stage::Output])
    }

    pub fn context(&self) -> &ProcessContext {
        &self.context
    }

    /// Parameter handle this chain follows
    pub fn control(&self) -> &ChainControl {
        &self.control
    }

    /// Gain the filter for `frequency_hz` is currently running with
    pub fn applied_band_gain(&self, frequency_hz: u32) -> Option<f32> {
        self.filter_bank.gain_for(frequency_hz)
    }

    /// Linear gain the output stage is currently running with
    pub fn applied_output_gain(&self) -> f32 {
        self.output.gain()
    }

    /// Pull parameter changes made since the last block.
    ///
    /// Values take effect at the current position in the stream, never
    /// retroactively, and filters keep their state.
    #[inline]
    fn sync_params(&mut self) {
        for index in 0..self.filter_bank.len() {
            let wanted = self.control.band_gain_at(index);
            let applied = self.filter_bank.gain_db(index).unwrap_or(wanted);
            if wanted.to_bits() != applied.to_bits() {
                // Frequencies were validated at build time, so this cannot fail;
                // on error the previous coefficients stay in place
                let _ = self.filter_bank.set_gain(index, wanted);
            }
        }
        self.output.set_gain(self.control.linear_gain());
    }

    /// Process an interleaved block in place
    ///
    /// # Real-time Safety
    /// No allocations, no locks.
    #[inline]
    pub fn process(&mut self, buffer: &mut [f32]) {
        self.sync_params();

        self.filter_bank.process_interleaved(buffer);
        self.dynamics.process_interleaved(buffer);
        self.output.process_interleaved(buffer);

        let peak = buffer.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
        self.control
            .publish_levels(peak, self.dynamics.gain_reduction_db());
    }

    /// Clear filter and envelope state
    pub fn reset(&mut self) {
        self.filter_bank.reset();
        self.dynamics.reset();
    }
}

impl AudioProcessor for SignalChain {
    fn process(&mut self, buffer: &mut [f32], _context: &ProcessContext) {
        SignalChain::process(self, buffer);
    }

    fn reset(&mut self) {
        SignalChain::reset(self);
    }

    fn name(&self) -> &'static str {
        "Signal Chain"
    }
}
