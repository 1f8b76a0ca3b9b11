//! Hearken CLI - drive the hearing-assist pass-through from a terminal.
//!
//! Reads one command per line from stdin:
//!
//! ```text
//! start | stop | volume <percent> | band <hz> <db> | bands | levels | status | quit
//! ```

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use hearken_core::{
    AudioBackend, AudioController, AudioDevice, ControllerConfig, CpalBackend, DeviceType,
    SimulatedBackend,
};
use hearken_dsp::presets::{preset_bands, PRESETS};
use hearken_dsp::BandSetting;

#[derive(Parser)]
#[command(name = "hearken")]
#[command(author, version, about = "Hearing-assist pass-through: microphone to headphones", long_about = None)]
struct Cli {
    /// Controller configuration (JSON file); missing fields use defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start from the amplified preset (boost 3.0, 44.1 kHz)
    #[arg(long)]
    amplified: bool,

    /// Initial volume in percent
    #[arg(long)]
    volume: Option<f32>,

    /// Band gain override (e.g., "2000=6")
    #[arg(long, value_parser = parse_band)]
    band: Vec<(u32, f32)>,

    /// Named band preset ("flat" or "speech")
    #[arg(long, conflicts_with = "ui_defaults")]
    preset: Option<String>,

    /// Start from the settings-screen gains (+6 dB on every other band)
    #[arg(long)]
    ui_defaults: bool,

    /// Linear gain at 100 % volume
    #[arg(long)]
    boost: Option<f32>,

    /// Requested sample rate
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Use the simulated backend and feed it a test tone
    #[arg(long)]
    simulate: bool,

    /// List audio devices and exit
    #[arg(long)]
    list_devices: bool,

    /// With --list-devices, show microphones only
    #[arg(long, requires = "list_devices")]
    inputs_only: bool,

    /// Start audio immediately
    #[arg(long)]
    autostart: bool,
}

fn parse_band(s: &str) -> Result<(u32, f32), String> {
    let (freq, gain) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid band format: '{}' (expected FREQ=DB)", s))?;
    let freq = freq
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("Invalid band frequency '{}': {}", freq, e))?;
    let gain = gain
        .trim()
        .parse::<f32>()
        .map_err(|e| format!("Invalid band gain '{}': {}", gain, e))?;
    Ok((freq, gain))
}

impl Cli {
    /// Merge file, preset and flag overrides into one configuration
    fn controller_config(&self) -> anyhow::Result<ControllerConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("Invalid configuration in {}", path.display()))?
            }
            None if self.amplified => ControllerConfig::amplified(),
            None => ControllerConfig::standard(),
        };

        if self.ui_defaults {
            config.bands = preset_bands("speech").unwrap_or_default();
        }
        if let Some(name) = &self.preset {
            config.bands = match preset_bands(name) {
                Some(bands) => bands,
                None => {
                    let known: Vec<&str> = PRESETS.iter().map(|(n, _)| *n).collect();
                    bail!("Unknown preset '{}' (known: {})", name, known.join(", "));
                }
            };
        }
        for &(frequency_hz, gain_db) in &self.band {
            match config.bands.iter_mut().find(|b| b.frequency_hz == frequency_hz) {
                Some(band) => *band = BandSetting::new(frequency_hz, gain_db),
                None => bail!("No band at {} Hz", frequency_hz),
            }
        }
        if let Some(volume) = self.volume {
            config.initial_volume_percent = volume;
        }
        if let Some(boost) = self.boost {
            config.safety.boost_factor = boost;
        }
        if let Some(rate) = self.sample_rate {
            config.stream.sample_rate = rate;
        }

        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }
}

/// Pushes a quiet tone through the simulated devices in real time
struct ToneFeeder {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ToneFeeder {
    fn spawn(backend: SimulatedBackend, config: &ControllerConfig) -> anyhow::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let rate = config.stream.sample_rate as f32;
        let channels = config.stream.channels as usize;
        let frames = config.stream.buffer_size as usize;
        let period = Duration::from_secs_f32(frames as f32 / rate);

        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("hearken-tone".into())
            .spawn(move || {
                let step = 2.0 * std::f32::consts::PI * 1000.0 / rate;
                let mut phase = 0.0_f32;
                let mut block = vec![0.0_f32; frames * channels];
                while flag.load(Ordering::Relaxed) {
                    for frame in block.chunks_exact_mut(channels) {
                        frame.fill(0.05 * phase.sin());
                        phase = (phase + step) % (2.0 * std::f32::consts::PI);
                    }
                    // Nothing to do while stopped
                    let _ = backend.render(&block);
                    thread::sleep(period);
                }
            })
            .context("Failed to spawn tone thread")?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }
}

impl Drop for ToneFeeder {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn print_devices(title: &str, devices: &[AudioDevice], kind: DeviceType) {
    println!("{}", title);
    for device in devices.iter().filter(|d| d.device_type == kind) {
        let default = if device.is_default { " (default)" } else { "" };
        println!(
            "  {} - {} ch, rates {:?}{}",
            device.name, device.max_channels, device.sample_rates, default
        );
    }
    println!();
}

fn list_devices(inputs_only: bool) -> anyhow::Result<()> {
    if inputs_only {
        let inputs = AudioDevice::enumerate_inputs()?;
        print_devices("Input Devices:", &inputs, DeviceType::Input);
        return Ok(());
    }

    let devices = AudioDevice::enumerate_all()?;
    print_devices("Input Devices:", &devices, DeviceType::Input);
    print_devices("Output Devices:", &devices, DeviceType::Output);
    Ok(())
}

fn print_events(controller: &AudioController) {
    while let Some(event) = controller.poll_event() {
        match serde_json::to_string(&event) {
            Ok(json) => println!("event: {}", json),
            Err(e) => warn!("Could not encode event: {}", e),
        }
    }
}

/// Run one stdin command. Returns `false` on quit.
fn handle(controller: &AudioController, line: &str) -> anyhow::Result<bool> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        [] => {}
        ["quit"] | ["exit"] => return Ok(false),
        ["start"] => match controller.start() {
            Ok(()) => println!("Audio active"),
            Err(e) => println!("Start failed: {}", e.user_message()),
        },
        ["stop"] => controller.stop(),
        ["volume", percent] => {
            let percent: f32 = percent.parse().context("volume expects a number")?;
            controller.set_volume(percent);
        }
        ["band", freq, gain] => {
            let freq: u32 = freq.parse().context("band expects a frequency in Hz")?;
            let gain: f32 = gain.parse().context("band expects a gain in dB")?;
            controller.set_band_gain(freq, gain);
        }
        ["bands"] => {
            for band in controller.band_gains() {
                println!("  {:>5} Hz  {:+.1} dB", band.frequency_hz, band.gain_db);
            }
        }
        ["levels"] => match controller.levels() {
            Some(levels) => println!(
                "  peak {:.3}  gain reduction {:.1} dB",
                levels.output_peak, levels.gain_reduction_db
            ),
            None => println!("  not running"),
        },
        ["status"] => println!("{}", serde_json::to_string_pretty(&controller.status())?),
        _ => println!("Commands: start, stop, volume <percent>, band <hz> <db>, bands, levels, status, quit"),
    }
    Ok(true)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hearken=info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        return list_devices(cli.inputs_only);
    }

    let config = cli.controller_config()?;
    info!(
        "Requesting {} Hz, {} channels, {:.1} ms buffer",
        config.stream.sample_rate,
        config.stream.channels,
        config.stream.latency_ms()
    );

    let simulated = SimulatedBackend::new();
    let backend: Arc<dyn AudioBackend> = if cli.simulate {
        Arc::new(simulated.clone())
    } else {
        Arc::new(CpalBackend::new(config.ring_buffer_frames))
    };
    let _feeder = if cli.simulate {
        Some(ToneFeeder::spawn(simulated, &config)?)
    } else {
        None
    };

    let controller = AudioController::with_backend(config, backend)?;
    if cli.autostart {
        handle(&controller, "start")?;
    }
    print_events(&controller);

    let stdin = io::stdin();
    print!("> ");
    io::stdout().flush()?;
    for line in stdin.lock().lines() {
        let line = line?;
        match handle(&controller, line.trim()) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("error: {:#}", e),
        }
        print_events(&controller);
        print!("> ");
        io::stdout().flush()?;
    }

    controller.stop();
    print_events(&controller);
    Ok(())
}
