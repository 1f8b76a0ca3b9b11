//! Simulated Backend
//!
//! Headless stand-in for real devices. Blocks are pushed through the wired
//! chain by hand with [`SimulatedBackend::render`]; failures and slow
//! acquisitions can be injected. Cloning yields a handle to the same
//! backend, so a test can keep one while the controller owns another.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use hearken_dsp::SignalChain;

use super::{AcquiredDevices, AudioBackend, LiveStreams};
use crate::device::{CaptureRequest, SessionInfo};
use crate::error::DeviceError;

#[derive(Default)]
struct SimState {
    failure: Mutex<Option<DeviceError>>,
    device_rate: Mutex<Option<u32>>,
    gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
    chain: Mutex<Option<SignalChain>>,
    fail_release: AtomicBool,
    acquisitions: AtomicUsize,
    streams_opened: AtomicUsize,
    live_streams: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct SimulatedBackend {
    state: Arc<SimState>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every acquisition fails with `err` until cleared
    pub fn fail_with(&self, err: DeviceError) {
        *self.state.failure.lock() = Some(err);
    }

    pub fn clear_failure(&self) {
        *self.state.failure.lock() = None;
    }

    /// Make releasing streams report an error (the streams still go away)
    pub fn fail_release(&self, fail: bool) {
        self.state.fail_release.store(fail, Ordering::SeqCst);
    }

    /// Pretend the hardware only runs at `rate`, whatever is requested
    pub fn set_device_rate(&self, rate: Option<u32>) {
        *self.state.device_rate.lock() = rate;
    }

    /// Hold the next acquisition until the returned gate is dropped
    pub fn gate_acquisition(&self) -> AcquisitionGate {
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(0);
        *self.state.gate.lock() = Some((entered_tx, release_rx));
        AcquisitionGate {
            entered: entered_rx,
            _release: release_tx,
        }
    }

    /// Calls to `acquire`, successful or not
    pub fn acquisitions(&self) -> usize {
        self.state.acquisitions.load(Ordering::SeqCst)
    }

    /// Stream sets ever wired
    pub fn streams_opened(&self) -> usize {
        self.state.streams_opened.load(Ordering::SeqCst)
    }

    /// Stream sets currently running
    pub fn live_streams(&self) -> usize {
        self.state.live_streams.load(Ordering::SeqCst)
    }

    /// Process one interleaved block through the live chain.
    ///
    /// Returns `None` when no streams are running.
    pub fn render(&self, input: &[f32]) -> Option<Vec<f32>> {
        let mut slot = self.state.chain.lock();
        let chain = slot.as_mut()?;
        let mut block = input.to_vec();
        chain.process(&mut block);
        Some(block)
    }

    /// Look at the live chain without processing
    pub fn inspect<R>(&self, f: impl FnOnce(&SignalChain) -> R) -> Option<R> {
        self.state.chain.lock().as_ref().map(f)
    }
}

impl AudioBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn acquire(&self, request: &CaptureRequest) -> Result<Box<dyn AcquiredDevices>, DeviceError> {
        self.state.acquisitions.fetch_add(1, Ordering::SeqCst);

        let gate = self.state.gate.lock().take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            // Returns once the gate is dropped
            let _ = release.recv();
        }

        if let Some(err) = self.state.failure.lock().clone() {
            return Err(err);
        }

        let sample_rate = self.state.device_rate.lock().unwrap_or(request.sample_rate());
        Ok(Box::new(SimulatedDevices {
            state: Arc::clone(&self.state),
            info: SessionInfo {
                backend: "simulated".into(),
                input_device: "Simulated Microphone".into(),
                output_device: "Simulated Headphones".into(),
                sample_rate,
                input_channels: request.channels(),
                output_channels: request.channels(),
            },
        }))
    }
}

/// Holds a simulated acquisition open; dropping it lets the acquisition finish
pub struct AcquisitionGate {
    entered: Receiver<()>,
    _release: Sender<()>,
}

impl AcquisitionGate {
    /// Wait until an acquisition is blocked on this gate
    pub fn wait_entered(&self, timeout: Duration) -> bool {
        self.entered.recv_timeout(timeout).is_ok()
    }

    pub fn open(self) {}
}

struct SimulatedDevices {
    state: Arc<SimState>,
    info: SessionInfo,
}

impl AcquiredDevices for SimulatedDevices {
    fn describe(&self) -> SessionInfo {
        self.info.clone()
    }

    fn wire(self: Box<Self>, chain: SignalChain) -> Result<Box<dyn LiveStreams>, DeviceError> {
        *self.state.chain.lock() = Some(chain);
        self.state.streams_opened.fetch_add(1, Ordering::SeqCst);
        self.state.live_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedStreams { state: self.state }))
    }
}

struct SimulatedStreams {
    state: Arc<SimState>,
}

impl LiveStreams for SimulatedStreams {
    fn release(self: Box<Self>) -> Result<(), DeviceError> {
        let fail = self.state.fail_release.load(Ordering::SeqCst);
        drop(self);
        if fail {
            Err(DeviceError::Unavailable("simulated release failure".into()))
        } else {
            Ok(())
        }
    }
}

impl Drop for SimulatedStreams {
    fn drop(&mut self) {
        *self.state.chain.lock() = None;
        self.state.live_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearken_dsp::{ChainControl, ChainLayout, ProcessContext};

    fn wired(backend: &SimulatedBackend) -> (ChainControl, Box<dyn LiveStreams>) {
        let request = CaptureRequest::unprocessed(48000, 2);
        let devices = backend.acquire(&request).unwrap();
        let info = devices.describe();
        let control = ChainControl::new(&ChainLayout::default(), 50.0).unwrap();
        let chain = control
            .instantiate(ProcessContext::new(
                info.sample_rate as f32,
                info.output_channels as usize,
                256,
            ))
            .unwrap();
        (control, devices.wire(chain).unwrap())
    }

    #[test]
    fn test_render_requires_live_streams() {
        let backend = SimulatedBackend::new();
        assert!(backend.render(&[0.0; 4]).is_none());

        let (_control, streams) = wired(&backend);
        assert_eq!(backend.live_streams(), 1);
        let out = backend.render(&[0.01, 0.01]).unwrap();
        assert_eq!(out.len(), 2);

        streams.release().unwrap();
        assert_eq!(backend.live_streams(), 0);
        assert_eq!(backend.streams_opened(), 1);
        assert!(backend.render(&[0.0; 4]).is_none());
    }

    #[test]
    fn test_failure_injection() {
        let backend = SimulatedBackend::new();
        backend.fail_with(DeviceError::PermissionDenied("user said no".into()));
        let request = CaptureRequest::unprocessed(48000, 2);
        assert!(matches!(
            backend.acquire(&request).err(),
            Some(DeviceError::PermissionDenied(_))
        ));

        backend.clear_failure();
        assert!(backend.acquire(&request).is_ok());
        assert_eq!(backend.acquisitions(), 2);
    }

    #[test]
    fn test_release_failure_still_releases() {
        let backend = SimulatedBackend::new();
        let (_control, streams) = wired(&backend);
        backend.fail_release(true);
        assert!(streams.release().is_err());
        assert_eq!(backend.live_streams(), 0);
    }

    #[test]
    fn test_device_rate_override() {
        let backend = SimulatedBackend::new();
        backend.set_device_rate(Some(44100));
        let devices = backend
            .acquire(&CaptureRequest::unprocessed(48000, 1))
            .unwrap();
        assert_eq!(devices.describe().sample_rate, 44100);
        assert_eq!(devices.describe().output_channels, 1);
    }

    #[test]
    fn test_gate_blocks_until_dropped() {
        let backend = SimulatedBackend::new();
        let gate = backend.gate_acquisition();

        let worker = {
            let backend = backend.clone();
            std::thread::spawn(move || {
                backend
                    .acquire(&CaptureRequest::unprocessed(48000, 2))
                    .is_ok()
            })
        };

        assert!(gate.wait_entered(Duration::from_secs(2)));
        assert!(!worker.is_finished());
        gate.open();
        assert!(worker.join().unwrap());
    }
}
