//! Capture Requests and Device Enumeration

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// What the session asks the backend for.
///
/// Voice processing (echo cancellation, noise suppression, automatic gain)
/// is always off: the signal has to reach the filter bank unaltered. The
/// only constructor is [`CaptureRequest::unprocessed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptureRequest {
    sample_rate: u32,
    channels: u16,
    buffer_size: u32,
    echo_cancellation: bool,
    noise_suppression: bool,
    auto_gain_control: bool,
}

impl CaptureRequest {
    pub fn unprocessed(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            buffer_size: 256,
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
        }
    }

    pub fn with_buffer_size(mut self, frames: u32) -> Self {
        self.buffer_size = frames;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    pub fn echo_cancellation(&self) -> bool {
        self.echo_cancellation
    }

    pub fn noise_suppression(&self) -> bool {
        self.noise_suppression
    }

    pub fn auto_gain_control(&self) -> bool {
        self.auto_gain_control
    }
}

/// What the backend actually opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub backend: String,
    pub input_device: String,
    pub output_device: String,
    /// Rate both streams run at; the chain is built for it
    pub sample_rate: u32,
    pub input_channels: u16,
    pub output_channels: u16,
}

/// Type of audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Input,
    Output,
}

/// An audio device (input or output) as seen by the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDevice {
    /// Human-readable device name
    pub name: String,

    pub device_type: DeviceType,

    /// Whether this is the system default device
    pub is_default: bool,

    /// Supported sample rates (may be empty if querying failed)
    pub sample_rates: Vec<u32>,

    /// Maximum supported channels
    pub max_channels: u16,
}

impl AudioDevice {
    /// Enumerate every input and output on the default host
    pub fn enumerate_all() -> Result<Vec<AudioDevice>, DeviceError> {
        let host = cpal::default_host();

        let default_input = host.default_input_device().and_then(|d| d.name().ok());
        let default_output = host.default_output_device().and_then(|d| d.name().ok());

        let mut devices: Vec<AudioDevice> = host
            .input_devices()?
            .filter_map(|d| Self::describe(&d, DeviceType::Input, default_input.as_deref()))
            .collect();
        devices.extend(
            host.output_devices()?
                .filter_map(|d| Self::describe(&d, DeviceType::Output, default_output.as_deref())),
        );

        if devices.is_empty() {
            return Err(DeviceError::NotFound("no audio devices".into()));
        }
        Ok(devices)
    }

    /// Inputs only; the session always captures from the default one
    pub fn enumerate_inputs() -> Result<Vec<AudioDevice>, DeviceError> {
        Ok(Self::enumerate_all()?
            .into_iter()
            .filter(|d| d.device_type == DeviceType::Input)
            .collect())
    }

    fn describe(
        device: &cpal::Device,
        device_type: DeviceType,
        default_name: Option<&str>,
    ) -> Option<Self> {
        let name = device.name().ok()?;
        let is_default = default_name == Some(name.as_str());

        let ranges: Vec<cpal::SupportedStreamConfigRange> = match device_type {
            DeviceType::Input => device.supported_input_configs().ok()?.collect(),
            DeviceType::Output => device.supported_output_configs().ok()?.collect(),
        };
        let (sample_rates, max_channels) = summarize(&ranges);

        Some(AudioDevice {
            name,
            device_type,
            is_default,
            sample_rates,
            max_channels,
        })
    }
}

/// Common rates covered by the ranges, and the widest channel count
fn summarize(ranges: &[cpal::SupportedStreamConfigRange]) -> (Vec<u32>, u16) {
    const COMMON_RATES: [u32; 6] = [16000, 22050, 44100, 48000, 88200, 96000];

    let mut sample_rates: Vec<u32> = COMMON_RATES
        .iter()
        .copied()
        .filter(|&rate| {
            ranges
                .iter()
                .any(|r| r.min_sample_rate().0 <= rate && rate <= r.max_sample_rate().0)
        })
        .collect();
    sample_rates.sort_unstable();

    let max_channels = ranges.iter().map(|r| r.channels()).max().unwrap_or(0);
    (sample_rates, max_channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_request_defaults() {
        let request = CaptureRequest::unprocessed(44100, 1).with_buffer_size(128);
        assert_eq!(request.sample_rate(), 44100);
        assert_eq!(request.channels(), 1);
        assert_eq!(request.buffer_size(), 128);
        assert!(!request.echo_cancellation());
        assert!(!request.noise_suppression());
        assert!(!request.auto_gain_control());
    }

    #[test]
    fn test_summarize_ranges() {
        let ranges = [
            cpal::SupportedStreamConfigRange::new(
                1,
                cpal::SampleRate(44100),
                cpal::SampleRate(48000),
                cpal::SupportedBufferSize::Unknown,
                cpal::SampleFormat::F32,
            ),
            cpal::SupportedStreamConfigRange::new(
                2,
                cpal::SampleRate(48000),
                cpal::SampleRate(48000),
                cpal::SupportedBufferSize::Unknown,
                cpal::SampleFormat::F32,
            ),
        ];
        let (rates, channels) = summarize(&ranges);
        assert_eq!(rates, vec![44100, 48000]);
        assert_eq!(channels, 2);
    }

    #[test]
    fn test_audio_device_serialization() {
        let device = AudioDevice {
            name: "Headset Microphone".to_string(),
            device_type: DeviceType::Input,
            is_default: true,
            sample_rates: vec![44100, 48000],
            max_channels: 1,
        };

        let json = serde_json::to_string(&device).unwrap();
        let deserialized: AudioDevice = serde_json::from_str(&json).unwrap();

        assert_eq!(device.name, deserialized.name);
        assert_eq!(device.device_type, deserialized.device_type);
    }

    // Hardware-dependent tests are marked with #[ignore]
    // Run them with: cargo test -- --ignored

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_enumerate_all_devices() {
        let devices = AudioDevice::enumerate_all();
        assert!(devices.is_ok());
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_enumerate_inputs() {
        if let Ok(inputs) = AudioDevice::enumerate_inputs() {
            assert!(inputs.iter().all(|d| d.device_type == DeviceType::Input));
        }
    }
}
