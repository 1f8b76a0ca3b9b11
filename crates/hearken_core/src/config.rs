//! Controller and Stream Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use hearken_dsp::{default_bands, BandSetting, ChainLayout, CompressorSettings};

use crate::device::CaptureRequest;

/// Audio stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Sample rate in Hz requested from the devices
    pub sample_rate: u32,

    /// Number of audio channels (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Buffer size in frames (lower = less latency, higher = more stability)
    pub buffer_size: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            buffer_size: 256,
        }
    }
}

impl StreamConfig {
    /// Calculate latency in milliseconds for one buffer
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.sample_rate as f32) * 1000.0
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate < 8000 || self.sample_rate > 192000 {
            return Err(format!("Invalid sample rate: {}", self.sample_rate));
        }
        if self.channels == 0 || self.channels > 8 {
            return Err(format!("Invalid channel count: {}", self.channels));
        }
        if self.buffer_size < 32 || self.buffer_size > 8192 {
            return Err(format!("Invalid buffer size: {}", self.buffer_size));
        }
        Ok(())
    }
}

/// Loudness protection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Linear gain reached at 100 % volume
    pub boost_factor: f32,

    /// Volumes strictly above this raise a hearing warning
    pub warning_threshold_percent: f32,

    /// How long the warning stays up before clearing itself
    pub warning_duration_ms: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            boost_factor: 2.0,
            warning_threshold_percent: 90.0,
            warning_duration_ms: 5000,
        }
    }
}

impl SafetyConfig {
    pub fn warning_duration(&self) -> Duration {
        Duration::from_millis(self.warning_duration_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.boost_factor.is_finite() || self.boost_factor <= 0.0 {
            return Err(format!("Invalid boost factor: {}", self.boost_factor));
        }
        if !(0.0..=100.0).contains(&self.warning_threshold_percent) {
            return Err(format!(
                "Invalid warning threshold: {}",
                self.warning_threshold_percent
            ));
        }
        Ok(())
    }
}

/// Overall controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Stream configuration requested from the devices
    pub stream: StreamConfig,

    pub safety: SafetyConfig,

    /// Bands of the filter bank with their starting gains
    pub bands: Vec<BandSetting>,

    /// Volume used when the chain is first built
    pub initial_volume_percent: f32,

    /// Capacity of the capture-to-playback ring in frames
    pub ring_buffer_frames: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl ControllerConfig {
    /// Unity gain at half volume, 48 kHz
    pub fn standard() -> Self {
        Self {
            stream: StreamConfig::default(),
            safety: SafetyConfig::default(),
            bands: default_bands(),
            initial_volume_percent: 75.0,
            // 4 buffers worth of ring buffer capacity
            ring_buffer_frames: 256 * 4,
        }
    }

    /// Higher ceiling for quiet microphones, 44.1 kHz
    pub fn amplified() -> Self {
        Self {
            stream: StreamConfig {
                sample_rate: 44100,
                ..StreamConfig::default()
            },
            safety: SafetyConfig {
                boost_factor: 3.0,
                ..SafetyConfig::default()
            },
            ..Self::standard()
        }
    }

    /// Chain description built from this configuration
    pub fn layout(&self) -> ChainLayout {
        ChainLayout {
            bands: self.bands.clone(),
            compressor: CompressorSettings::HEARING_SAFE,
            boost_factor: self.safety.boost_factor,
        }
    }

    /// Capture request for the session; voice processing is always off
    pub fn capture_request(&self) -> CaptureRequest {
        CaptureRequest::unprocessed(self.stream.sample_rate, self.stream.channels)
            .with_buffer_size(self.stream.buffer_size)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.stream.validate()?;
        self.safety.validate()?;
        self.layout().validate().map_err(|e| e.to_string())?;

        // Every band must be representable at the requested rate
        self.layout()
            .bands
            .iter()
            .try_for_each(|band| {
                if band.frequency_hz as f32 >= self.stream.sample_rate as f32 / 2.0 {
                    Err(format!(
                        "Band {}Hz is above Nyquist for {}Hz",
                        band.frequency_hz, self.stream.sample_rate
                    ))
                } else {
                    Ok(())
                }
            })?;

        if self.ring_buffer_frames < self.stream.buffer_size as usize {
            return Err(format!(
                "Ring buffer ({} frames) smaller than one buffer ({} frames)",
                self.ring_buffer_frames, self.stream.buffer_size
            ));
        }
        Ok(())
    }
}
