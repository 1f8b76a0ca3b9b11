//! Device Session
//!
//! Owns the running streams on a dedicated thread. Backend stream handles
//! are not `Send` on every platform, so they are created, kept and dropped
//! here and nowhere else; the controller only sends commands.
//!
//! ```text
//! Closed ──Open──▶ Opening ──wired──▶ Open ──Close──▶ Closed
//!                     │
//!                     └──error──▶ Failed
//! ```
//!
//! Every `Open` carries the epoch it was issued under. A `stop()` bumps the
//! epoch, so an acquisition that finishes after it is discarded without the
//! streams ever starting.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use hearken_dsp::{ChainControl, ProcessContext};

use crate::backend::{AudioBackend, LiveStreams};
use crate::device::{CaptureRequest, SessionInfo};
use crate::error::AudioError;
use crate::message::Event;

/// Hardware side of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceState {
    Closed = 0,
    Opening = 1,
    Open = 2,
    Failed = 3,
}

impl DeviceState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => DeviceState::Opening,
            2 => DeviceState::Open,
            3 => DeviceState::Failed,
            _ => DeviceState::Closed,
        }
    }
}

/// Receives the outcome of an `Open`. Returns `false` when the streams are
/// no longer wanted.
pub(crate) type Completion = Box<dyn FnOnce(Result<SessionInfo, AudioError>) -> bool + Send>;

pub(crate) enum SessionCommand {
    Open {
        request: CaptureRequest,
        control: ChainControl,
        token: u64,
        on_complete: Completion,
    },
    Close,
    Shutdown,
}

/// Handle to the session thread
pub(crate) struct DeviceSession {
    commands: Sender<SessionCommand>,
    state: Arc<AtomicU8>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceSession {
    pub(crate) fn spawn(
        backend: Arc<dyn AudioBackend>,
        epoch: Arc<AtomicU64>,
        events: Sender<Event>,
    ) -> Result<Self, AudioError> {
        let (commands, receiver) = unbounded();
        let state = Arc::new(AtomicU8::new(DeviceState::Closed as u8));

        let worker_state = Arc::clone(&state);
        let thread = thread::Builder::new()
            .name("hearken-session".into())
            .spawn(move || {
                // Built here: live streams must never cross threads
                let worker = SessionWorker {
                    backend,
                    epoch,
                    events,
                    state: worker_state,
                    live: None,
                };
                worker.run(receiver)
            })
            .map_err(|e| AudioError::InitializationFailed(e.to_string()))?;

        Ok(Self {
            commands,
            state,
            thread: Some(thread),
        })
    }

    pub(crate) fn open(
        &self,
        request: CaptureRequest,
        control: ChainControl,
        token: u64,
        on_complete: Completion,
    ) -> Result<(), AudioError> {
        self.commands
            .send(SessionCommand::Open {
                request,
                control,
                token,
                on_complete,
            })
            .map_err(|_| AudioError::SessionClosed)
    }

    pub(crate) fn close(&self) -> Result<(), AudioError> {
        self.commands
            .send(SessionCommand::Close)
            .map_err(|_| AudioError::SessionClosed)
    }

    pub(crate) fn state(&self) -> DeviceState {
        DeviceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Release everything and join the thread
    pub(crate) fn shutdown(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = self.commands.send(SessionCommand::Shutdown);
            if handle.join().is_err() {
                warn!("Session thread panicked");
            }
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct LiveSession {
    streams: Box<dyn LiveStreams>,
    info: SessionInfo,
    control: ChainControl,
}

struct SessionWorker {
    backend: Arc<dyn AudioBackend>,
    epoch: Arc<AtomicU64>,
    events: Sender<Event>,
    state: Arc<AtomicU8>,
    live: Option<LiveSession>,
}

impl SessionWorker {
    fn run(mut self, commands: Receiver<SessionCommand>) {
        info!("Session thread started ({} backend)", self.backend.name());

        for command in commands.iter() {
            match command {
                SessionCommand::Open {
                    request,
                    control,
                    token,
                    on_complete,
                } => self.open(request, control, token, on_complete),
                SessionCommand::Close => self.close(),
                SessionCommand::Shutdown => break,
            }
        }

        self.close();
        info!("Session thread exiting");
    }

    fn set_state(&self, state: DeviceState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn is_current(&self, token: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == token
    }

    fn open(
        &mut self,
        request: CaptureRequest,
        control: ChainControl,
        token: u64,
        on_complete: Completion,
    ) {
        if let Some(live) = &self.live {
            if live.control.same_as(&control) {
                debug!("Streams already open, reusing them");
                if !on_complete(Ok(live.info.clone())) {
                    self.close();
                }
                return;
            }
            self.close();
        }

        if !self.is_current(token) {
            debug!("Open request superseded before acquisition");
            on_complete(Err(AudioError::Cancelled));
            return;
        }

        self.set_state(DeviceState::Opening);
        info!(
            "Acquiring devices: {} Hz, {} channels, voice processing off",
            request.sample_rate(),
            request.channels()
        );

        let acquired = match self.backend.acquire(&request) {
            Ok(acquired) => acquired,
            Err(err) => {
                warn!("Device acquisition failed: {}", err);
                self.set_state(DeviceState::Failed);
                on_complete(Err(err.into()));
                return;
            }
        };

        if !self.is_current(token) {
            info!("Stop requested during acquisition, discarding devices");
            drop(acquired);
            self.set_state(DeviceState::Closed);
            on_complete(Err(AudioError::Cancelled));
            return;
        }

        let info = acquired.describe();
        let context = ProcessContext::new(
            info.sample_rate as f32,
            info.output_channels as usize,
            request.buffer_size() as usize,
        );
        let chain = match control.instantiate(context) {
            Ok(chain) => chain,
            Err(err) => {
                warn!("Signal chain cannot run at {} Hz: {}", info.sample_rate, err);
                self.set_state(DeviceState::Failed);
                on_complete(Err(err.into()));
                return;
            }
        };

        let streams = match acquired.wire(chain) {
            Ok(streams) => streams,
            Err(err) => {
                warn!("Failed to start streams: {}", err);
                self.set_state(DeviceState::Failed);
                on_complete(Err(err.into()));
                return;
            }
        };

        if on_complete(Ok(info.clone())) {
            info!(
                "Session open: {} -> {} at {} Hz",
                info.input_device, info.output_device, info.sample_rate
            );
            self.set_state(DeviceState::Open);
            let _ = self.events.try_send(Event::DeviceOpened(info.clone()));
            self.live = Some(LiveSession {
                streams,
                info,
                control,
            });
        } else {
            info!("Start cancelled after wiring, releasing streams");
            if let Err(err) = streams.release() {
                warn!("Error releasing cancelled streams: {}", err);
            }
            self.set_state(DeviceState::Closed);
        }
    }

    fn close(&mut self) {
        if let Some(live) = self.live.take() {
            match live.streams.release() {
                Ok(()) => info!("Streams released"),
                Err(err) => warn!("Error releasing streams: {}", err),
            }
            let _ = self.events.try_send(Event::DeviceClosed);
        }
        self.set_state(DeviceState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedBackend;
    use crate::error::DeviceError;
    use crossbeam_channel::bounded;
    use hearken_dsp::ChainLayout;
    use std::time::Duration;

    struct Fixture {
        session: DeviceSession,
        backend: SimulatedBackend,
        epoch: Arc<AtomicU64>,
        events: Receiver<Event>,
    }

    fn fixture() -> Fixture {
        let backend = SimulatedBackend::new();
        let epoch = Arc::new(AtomicU64::new(1));
        let (events_tx, events) = unbounded();
        let session =
            DeviceSession::spawn(Arc::new(backend.clone()), Arc::clone(&epoch), events_tx).unwrap();
        Fixture {
            session,
            backend,
            epoch,
            events,
        }
    }

    fn control() -> ChainControl {
        ChainControl::new(&ChainLayout::default(), 50.0).unwrap()
    }

    /// Send an Open and wait for its outcome
    fn open(
        fixture: &Fixture,
        control: &ChainControl,
        token: u64,
        accept: bool,
    ) -> Result<SessionInfo, AudioError> {
        let (tx, rx) = bounded(1);
        fixture
            .session
            .open(
                CaptureRequest::unprocessed(48000, 2),
                control.clone(),
                token,
                Box::new(move |result| {
                    let _ = tx.send(result);
                    accept
                }),
            )
            .unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_open_and_close() {
        let mut fixture = fixture();
        let control = control();

        let info = open(&fixture, &control, 1, true).unwrap();
        assert_eq!(info.sample_rate, 48000);
        assert_eq!(fixture.backend.live_streams(), 1);

        fixture.session.close().unwrap();
        fixture.session.shutdown();
        assert_eq!(fixture.backend.live_streams(), 0);
        assert_eq!(fixture.session.state(), DeviceState::Closed);

        let events: Vec<Event> = fixture.events.try_iter().collect();
        assert!(matches!(events.first(), Some(Event::DeviceOpened(_))));
        assert!(events.contains(&Event::DeviceClosed));
    }

    #[test]
    fn test_second_open_reuses_streams() {
        let fixture = fixture();
        let control = control();

        open(&fixture, &control, 1, true).unwrap();
        open(&fixture, &control, 1, true).unwrap();
        assert_eq!(fixture.backend.streams_opened(), 1);
        assert_eq!(fixture.backend.acquisitions(), 1);
        assert_eq!(fixture.session.state(), DeviceState::Open);
    }

    #[test]
    fn test_stale_token_never_acquires() {
        let fixture = fixture();
        fixture.epoch.store(5, Ordering::SeqCst);

        let result = open(&fixture, &control(), 4, true);
        assert_eq!(result, Err(AudioError::Cancelled));
        assert_eq!(fixture.backend.acquisitions(), 0);
    }

    #[test]
    fn test_acquisition_failure() {
        let fixture = fixture();
        fixture
            .backend
            .fail_with(DeviceError::NotFound("no microphone".into()));

        let result = open(&fixture, &control(), 1, true);
        assert!(matches!(result, Err(AudioError::DeviceNotFound(_))));
        assert_eq!(fixture.session.state(), DeviceState::Failed);
        assert_eq!(fixture.backend.live_streams(), 0);
    }

    #[test]
    fn test_rejected_completion_releases_streams() {
        let mut fixture = fixture();
        open(&fixture, &control(), 1, false).unwrap();
        fixture.session.shutdown();
        assert_eq!(fixture.backend.streams_opened(), 1);
        assert_eq!(fixture.backend.live_streams(), 0);
    }

    #[test]
    fn test_shutdown_releases_live_streams() {
        let fixture = fixture();
        open(&fixture, &control(), 1, true).unwrap();
        let backend = fixture.backend.clone();
        drop(fixture);
        assert_eq!(backend.live_streams(), 0);
    }
}
