//! CPAL Backend
//!
//! Microphone to headphones through two CPAL streams:
//!
//! ```text
//!  input callback ──rtrb──▶ output callback
//!   (capture)               channel map → SignalChain → device
//! ```
//!
//! The chain runs inside the output callback so the processed block is the
//! one the device plays. Both callbacks are allocation-free and lock-free.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SupportedStreamConfigRange};
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, info, warn};

use hearken_dsp::SignalChain;

use super::{AcquiredDevices, AudioBackend, LiveStreams};
use crate::device::{CaptureRequest, SessionInfo};
use crate::error::DeviceError;

/// Input channels beyond this are read but not routed
const MAX_MAPPED_CHANNELS: usize = 8;

/// Backend-specific messages that mean the OS refused microphone access
const PERMISSION_MARKERS: [&str; 4] = ["permission", "denied", "not authorized", "not permitted"];

/// Default system devices via the platform's default CPAL host
#[derive(Debug, Clone)]
pub struct CpalBackend {
    ring_frames: usize,
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self { ring_frames: 1024 }
    }
}

impl CpalBackend {
    pub fn new(ring_frames: usize) -> Self {
        Self {
            ring_frames: ring_frames.max(1),
        }
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn acquire(&self, request: &CaptureRequest) -> Result<Box<dyn AcquiredDevices>, DeviceError> {
        let host = cpal::default_host();
        debug!("Acquiring devices on host {:?}", host.id());

        let input = host
            .default_input_device()
            .ok_or_else(|| DeviceError::NotFound("no default input device".into()))?;
        let output = host
            .default_output_device()
            .ok_or_else(|| DeviceError::NotFound("no default output device".into()))?;

        let output_config = negotiate(
            &output.supported_output_configs()?.collect::<Vec<_>>(),
            output.default_output_config()?,
            request,
            None,
        )
        .ok_or_else(|| DeviceError::Unavailable("output has no f32 configuration".into()))?;

        // Input has to follow the output rate; the chain runs at one rate
        let input_config = negotiate(
            &input.supported_input_configs()?.collect::<Vec<_>>(),
            input.default_input_config()?,
            request,
            Some(output_config.sample_rate.0),
        )
        .ok_or_else(|| {
            DeviceError::Unavailable(format!(
                "input cannot run at {} Hz",
                output_config.sample_rate.0
            ))
        })?;

        if output_config.sample_rate.0 != request.sample_rate() {
            warn!(
                "Requested {} Hz, running at device rate {} Hz",
                request.sample_rate(),
                output_config.sample_rate.0
            );
        }

        Ok(Box::new(CpalDevices {
            input_name: input.name().unwrap_or_else(|_| "Unknown input".into()),
            output_name: output.name().unwrap_or_else(|_| "Unknown output".into()),
            input,
            output,
            input_config,
            output_config,
            ring_frames: self.ring_frames,
        }))
    }
}

/// Pick an f32 stream config.
///
/// Tries the requested rate then the device default (or only `fixed_rate`
/// when given), preferring the requested channel count.
fn negotiate(
    ranges: &[SupportedStreamConfigRange],
    default: cpal::SupportedStreamConfig,
    request: &CaptureRequest,
    fixed_rate: Option<u32>,
) -> Option<cpal::StreamConfig> {
    let rates = match fixed_rate {
        Some(rate) => vec![rate],
        None => vec![request.sample_rate(), default.sample_rate().0],
    };
    let channel_preference = [request.channels(), default.channels()];

    for rate in rates {
        let usable: Vec<&SupportedStreamConfigRange> = ranges
            .iter()
            .filter(|r| {
                r.sample_format() == SampleFormat::F32
                    && r.min_sample_rate().0 <= rate
                    && rate <= r.max_sample_rate().0
            })
            .collect();

        let chosen = channel_preference
            .iter()
            .find_map(|&ch| usable.iter().find(|r| r.channels() == ch))
            .or_else(|| usable.first());

        if let Some(range) = chosen {
            let buffer_size = match range.buffer_size() {
                cpal::SupportedBufferSize::Range { min, max }
                    if (*min..=*max).contains(&request.buffer_size()) =>
                {
                    BufferSize::Fixed(request.buffer_size())
                }
                _ => BufferSize::Default,
            };
            return Some(cpal::StreamConfig {
                channels: range.channels(),
                sample_rate: cpal::SampleRate(rate),
                buffer_size,
            });
        }
    }
    None
}

struct CpalDevices {
    input: cpal::Device,
    output: cpal::Device,
    input_name: String,
    output_name: String,
    input_config: cpal::StreamConfig,
    output_config: cpal::StreamConfig,
    ring_frames: usize,
}

/// Glitch counters written by the callbacks
#[derive(Debug, Default)]
struct StreamStats {
    overruns: AtomicU64,
    underruns: AtomicU64,
    errors: AtomicU64,
}

impl AcquiredDevices for CpalDevices {
    fn describe(&self) -> SessionInfo {
        SessionInfo {
            backend: "cpal".into(),
            input_device: self.input_name.clone(),
            output_device: self.output_name.clone(),
            sample_rate: self.output_config.sample_rate.0,
            input_channels: self.input_config.channels,
            output_channels: self.output_config.channels,
        }
    }

    fn wire(self: Box<Self>, chain: SignalChain) -> Result<Box<dyn LiveStreams>, DeviceError> {
        let input_channels = self.input_config.channels as usize;
        let (producer, consumer) = RingBuffer::<f32>::new(self.ring_frames * input_channels);
        let stats = Arc::new(StreamStats::default());

        let input = build_capture_stream(&self.input, &self.input_config, producer, &stats)?;
        let output = build_playback_stream(
            &self.output,
            &self.output_config,
            input_channels,
            consumer,
            chain,
            &stats,
        )?;

        // Start the output first so the ring is drained from the first input block
        output.play()?;
        input.play()?;
        info!(
            "Streams running: {} -> {} at {} Hz",
            self.input_name, self.output_name, self.output_config.sample_rate.0
        );

        Ok(Box::new(CpalStreams {
            input,
            output,
            stats,
        }))
    }
}

fn build_capture_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: Producer<f32>,
    stats: &Arc<StreamStats>,
) -> Result<cpal::Stream, DeviceError> {
    let channels = config.channels as usize;
    let callback_stats = Arc::clone(stats);
    let error_stats = Arc::clone(stats);

    let stream = device.build_input_stream(
        config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            // Whole frames only, so channels never shift
            let writable = producer.slots().min(data.len());
            let writable = writable - writable % channels;
            if let Ok(chunk) = producer.write_chunk_uninit(writable) {
                chunk.fill_from_iter(data[..writable].iter().copied());
            }
            if writable < data.len() {
                callback_stats.overruns.fetch_add(1, Ordering::Relaxed);
            }
        },
        move |_err| {
            error_stats.errors.fetch_add(1, Ordering::Relaxed);
        },
        None,
    )?;
    Ok(stream)
}

fn build_playback_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    input_channels: usize,
    mut consumer: Consumer<f32>,
    mut chain: SignalChain,
    stats: &Arc<StreamStats>,
) -> Result<cpal::Stream, DeviceError> {
    let output_channels = config.channels as usize;
    let mapped_channels = input_channels.min(MAX_MAPPED_CHANNELS);
    let callback_stats = Arc::clone(stats);
    let error_stats = Arc::clone(stats);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let wanted_frames = data.len() / output_channels;
            let frames = (consumer.slots() / input_channels).min(wanted_frames);

            if let Ok(chunk) = consumer.read_chunk(frames * input_channels) {
                {
                    let (first, second) = chunk.as_slices();
                    let mut samples = first.iter().chain(second.iter());
                    for out_frame in data[..frames * output_channels].chunks_exact_mut(output_channels)
                    {
                        let mut in_frame = [0.0_f32; MAX_MAPPED_CHANNELS];
                        for i in 0..input_channels {
                            let sample = samples.next().copied().unwrap_or(0.0);
                            if let Some(slot) = in_frame.get_mut(i) {
                                *slot = sample;
                            }
                        }
                        // Mono input feeds every output channel
                        for (c, sample) in out_frame.iter_mut().enumerate() {
                            *sample = in_frame[c % mapped_channels];
                        }
                    }
                }
                chunk.commit_all();
            }

            if frames < wanted_frames {
                data[frames * output_channels..].fill(0.0);
                callback_stats.underruns.fetch_add(1, Ordering::Relaxed);
            }

            chain.process(data);
        },
        move |_err| {
            error_stats.errors.fetch_add(1, Ordering::Relaxed);
        },
        None,
    )?;
    Ok(stream)
}

struct CpalStreams {
    input: cpal::Stream,
    output: cpal::Stream,
    stats: Arc<StreamStats>,
}

impl LiveStreams for CpalStreams {
    fn release(self: Box<Self>) -> Result<(), DeviceError> {
        let CpalStreams {
            input,
            output,
            stats,
        } = *self;

        // Input first so nothing is left writing into a dead ring
        let paused = input.pause().and(output.pause());
        drop(input);
        drop(output);

        debug!(
            "Streams released: {} overruns, {} underruns, {} stream errors",
            stats.overruns.load(Ordering::Relaxed),
            stats.underruns.load(Ordering::Relaxed),
            stats.errors.load(Ordering::Relaxed)
        );
        paused.map_err(DeviceError::from)
    }
}

/// Map a backend-specific message onto a device error category
fn classify(message: String) -> DeviceError {
    let lower = message.to_lowercase();
    if PERMISSION_MARKERS.iter().any(|marker| lower.contains(marker)) {
        DeviceError::PermissionDenied(message)
    } else {
        DeviceError::Unavailable(message)
    }
}

macro_rules! impl_from_cpal_error {
    ($($error:ident),+ $(,)?) => {
        $(
            impl From<cpal::$error> for DeviceError {
                fn from(err: cpal::$error) -> Self {
                    match err {
                        cpal::$error::DeviceNotAvailable => DeviceError::NotFound(err.to_string()),
                        other => classify(other.to_string()),
                    }
                }
            }
        )+
    };
}

impl_from_cpal_error!(
    BuildStreamError,
    PlayStreamError,
    PauseStreamError,
    DefaultStreamConfigError,
    SupportedStreamConfigsError,
);

impl From<cpal::DevicesError> for DeviceError {
    fn from(err: cpal::DevicesError) -> Self {
        classify(err.to_string())
    }
}
