//! Audio Controller
//!
//! Public entry point of the core. Owns the lifecycle state, the chain
//! parameters and the two helper threads (device session and warning
//! timer).
//!
//! ```text
//! Idle ──start──▶ Initializing ──ok──▶ Active
//!                      │   └──error──▶ Failed(kind)
//!                      └──stop──▶ Stopped ◀──stop── Active / Failed
//! ```
//!
//! All methods take `&self`. State lives behind a `parking_lot::Mutex` the
//! audio thread never touches; parameter writes go straight to the chain's
//! atomics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use hearken_dsp::{clamp_gain_db, clamp_percent, BandSetting, ChainControl, Levels, OutputLevel};

use crate::backend::{AudioBackend, CpalBackend};
use crate::config::ControllerConfig;
use crate::device::SessionInfo;
use crate::error::{AudioError, AudioResult, ErrorKind};
use crate::message::{Event, EVENT_QUEUE_CAPACITY};
use crate::session::{Completion, DeviceSession, DeviceState};
use crate::status::{ControllerStatus, Notice, SessionState};
use crate::warning::WarningTimer;

struct ControllerState {
    session: SessionState,
    volume_percent: f32,
    /// Built on the first start, kept across stop/start
    control: Option<ChainControl>,
    notice: Option<Notice>,
    warning_generation: u64,
}

/// State shared with the session and timer threads
struct Shared {
    config: ControllerConfig,
    state: Mutex<ControllerState>,
    /// Bumped by every start attempt and every stop
    epoch: Arc<AtomicU64>,
    events: Sender<Event>,
}

impl Shared {
    /// Queue an event; dropped when the queue is full
    fn emit(&self, event: Event) {
        if self.events.try_send(event).is_err() {
            trace!("Event queue full, dropping event");
        }
    }

    fn transition(&self, state: &mut ControllerState, next: SessionState) {
        if state.session != next {
            debug!("State {:?} -> {:?}", state.session, next);
            state.session = next;
            self.emit(Event::StateChanged { state: next });
        }
    }

    fn raise(&self, state: &mut ControllerState, notice: Notice) {
        state.notice = Some(notice.clone());
        self.emit(Event::Notice(notice));
    }

    fn clear_notice(&self, state: &mut ControllerState) {
        if let Some(notice) = state.notice.take() {
            self.emit(Event::NoticeCleared { kind: notice.kind });
        }
    }

    fn fail(&self, state: &mut ControllerState, err: &AudioError) {
        if let Some(notice) = Notice::from_error(err) {
            let kind = notice.kind;
            self.raise(state, notice);
            self.transition(state, SessionState::Failed(kind));
        }
    }

    /// Runs on the session thread once an `Open` has an outcome.
    ///
    /// The epoch is compared under the state lock, so a `stop()` that got
    /// there first always wins.
    fn finish_start(
        &self,
        token: u64,
        result: Result<SessionInfo, AudioError>,
        reply: &Sender<AudioResult<()>>,
    ) -> bool {
        let mut state = self.state.lock();

        if self.epoch.load(Ordering::SeqCst) != token {
            drop(state);
            debug!("Start superseded, reporting cancellation");
            let _ = reply.send(Err(AudioError::Cancelled));
            return false;
        }

        match result {
            Ok(info) => {
                info!("Audio active on {} ({} Hz)", info.input_device, info.sample_rate);
                self.transition(&mut state, SessionState::Active);
                let _ = reply.send(Ok(()));
                true
            }
            Err(err) => {
                warn!("Start failed: {}", err);
                self.fail(&mut state, &err);
                let _ = reply.send(Err(err));
                false
            }
        }
    }

    fn expire_warning(&self, generation: u64) {
        let mut state = self.state.lock();
        let showing = matches!(&state.notice, Some(n) if n.kind == ErrorKind::VolumeWarning);
        if showing && state.warning_generation == generation {
            debug!("Volume warning expired");
            self.clear_notice(&mut state);
        }
    }
}

/// Outcome of [`AudioController::begin_start`]
#[derive(Debug)]
pub struct PendingStart {
    receiver: Receiver<AudioResult<()>>,
    outcome: Option<AudioResult<()>>,
}

impl PendingStart {
    fn ready(result: AudioResult<()>) -> Self {
        let (sender, receiver) = bounded(1);
        let _ = sender.send(result);
        Self {
            receiver,
            outcome: None,
        }
    }

    /// Non-blocking check; `None` while acquisition is still running
    pub fn poll(&mut self) -> Option<AudioResult<()>> {
        if self.outcome.is_none() {
            self.outcome = match self.receiver.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => Some(Err(AudioError::SessionClosed)),
            };
        }
        self.outcome.clone()
    }

    /// Block until the start attempt resolves
    pub fn wait(mut self) -> AudioResult<()> {
        if let Some(outcome) = self.outcome.take() {
            return outcome;
        }
        self.receiver
            .recv()
            .unwrap_or(Err(AudioError::SessionClosed))
    }
}

/// Microphone-to-headphones controller
///
/// Dropping it stops audio, releases the devices and joins its threads.
pub struct AudioController {
    shared: Arc<Shared>,
    session: DeviceSession,
    warning: WarningTimer,
    events: Receiver<Event>,
}

impl AudioController {
    /// Controller on the system's default devices
    pub fn new(config: ControllerConfig) -> AudioResult<Self> {
        let backend = CpalBackend::new(config.ring_buffer_frames);
        Self::with_backend(config, Arc::new(backend))
    }

    pub fn with_backend(
        config: ControllerConfig,
        backend: Arc<dyn AudioBackend>,
    ) -> AudioResult<Self> {
        config.validate().map_err(AudioError::Config)?;
        info!("Creating audio controller ({} backend)", backend.name());

        let (event_sender, events) = bounded(EVENT_QUEUE_CAPACITY);
        let epoch = Arc::new(AtomicU64::new(0));
        let session = DeviceSession::spawn(backend, Arc::clone(&epoch), event_sender.clone())?;

        let shared = Arc::new(Shared {
            state: Mutex::new(ControllerState {
                session: SessionState::Idle,
                volume_percent: clamp_percent(config.initial_volume_percent),
                control: None,
                notice: None,
                warning_generation: 0,
            }),
            config,
            epoch,
            events: event_sender,
        });

        let timer_shared = Arc::downgrade(&shared);
        let warning = WarningTimer::spawn(move |generation| {
            if let Some(shared) = timer_shared.upgrade() {
                shared.expire_warning(generation);
            }
        })?;

        Ok(Self {
            shared,
            session,
            warning,
            events,
        })
    }

    /// Start audio and wait for the devices
    pub fn start(&self) -> AudioResult<()> {
        self.begin_start().wait()
    }

    /// Start audio without waiting.
    ///
    /// While active, or while another start is pending, this resolves to
    /// `Ok(())` immediately without touching the devices.
    pub fn begin_start(&self) -> PendingStart {
        let mut state = self.shared.state.lock();

        if matches!(
            state.session,
            SessionState::Active | SessionState::Initializing
        ) {
            debug!("start() while {:?}, nothing to do", state.session);
            return PendingStart::ready(Ok(()));
        }

        self.shared.clear_notice(&mut state);
        self.warning.cancel();

        let control = match &state.control {
            Some(control) => control.clone(),
            None => {
                match ChainControl::new(&self.shared.config.layout(), state.volume_percent) {
                    Ok(control) => {
                        state.control = Some(control.clone());
                        control
                    }
                    Err(err) => {
                        let err = AudioError::from(err);
                        warn!("Could not build signal chain: {}", err);
                        self.shared.fail(&mut state, &err);
                        return PendingStart::ready(Err(err));
                    }
                }
            }
        };

        let token = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared
            .transition(&mut state, SessionState::Initializing);

        let (reply, receiver) = bounded(1);
        let weak = Arc::downgrade(&self.shared);
        let on_complete: Completion = Box::new(move |result| match weak.upgrade() {
            Some(shared) => shared.finish_start(token, result, &reply),
            None => {
                let _ = reply.send(Err(AudioError::Cancelled));
                false
            }
        });

        let request = self.shared.config.capture_request();
        if let Err(err) = self.session.open(request, control, token, on_complete) {
            warn!("Device session unavailable: {}", err);
            self.shared.fail(&mut state, &err);
            return PendingStart::ready(Err(err));
        }

        PendingStart {
            receiver,
            outcome: None,
        }
    }

    /// Stop audio and release the devices. Never fails; calling it again,
    /// or before any start, does nothing.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        // Invalidates any acquisition still in flight
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);

        self.shared.clear_notice(&mut state);
        self.warning.cancel();

        if state.session == SessionState::Idle {
            debug!("stop() before start, nothing to release");
            return;
        }
        self.shared.transition(&mut state, SessionState::Stopped);
        drop(state);

        if let Err(err) = self.session.close() {
            warn!("Could not reach device session: {}", err);
        }
    }

    /// Set the volume in percent (clamped to 0-100).
    ///
    /// Above the warning threshold a transient hearing warning is raised;
    /// at or below it a showing warning is cleared at once. A device error
    /// in the slot is never replaced by the warning.
    pub fn set_volume(&self, percent: f32) {
        let percent = clamp_percent(percent);
        let safety = &self.shared.config.safety;
        let mut state = self.shared.state.lock();

        state.volume_percent = percent;
        let level = match &state.control {
            Some(control) => control.set_volume_percent(percent),
            None => OutputLevel::new(percent, safety.boost_factor),
        };
        self.shared.emit(Event::VolumeChanged {
            percent,
            linear_gain: level.linear_gain(),
        });

        let showing_warning =
            matches!(&state.notice, Some(n) if n.kind == ErrorKind::VolumeWarning);
        let showing_error = matches!(&state.notice, Some(n) if !n.transient);

        if showing_error {
            debug!("Device error showing, volume warning suppressed");
        } else if percent > safety.warning_threshold_percent {
            state.warning_generation += 1;
            if !showing_warning {
                self.shared.raise(&mut state, Notice::volume_warning());
            }
            self.warning
                .arm(state.warning_generation, safety.warning_duration());
        } else if showing_warning {
            self.shared.clear_notice(&mut state);
            self.warning.cancel();
        }
    }

    /// Set one band's gain in dB (clamped to ±12).
    ///
    /// Ignored for unknown frequencies and before the first start.
    pub fn set_band_gain(&self, frequency_hz: u32, value_db: f32) {
        let state = self.shared.state.lock();
        let Some(control) = &state.control else {
            debug!("set_band_gain({}) before start, ignored", frequency_hz);
            return;
        };

        match control.set_band_gain(frequency_hz, value_db) {
            Some(gain_db) => self.shared.emit(Event::BandGainChanged {
                frequency_hz,
                gain_db,
            }),
            None => debug!("No band at {} Hz, ignored", frequency_hz),
        }
    }

    pub fn status(&self) -> ControllerStatus {
        let state = self.shared.state.lock();
        ControllerStatus {
            state: state.session,
            is_active: state.session.is_active(),
            is_initialized: state.control.is_some(),
            volume_percent: state.volume_percent,
            error: state.notice.as_ref().map(|n| n.message.clone()),
            error_kind: state.notice.as_ref().map(|n| n.kind),
        }
    }

    /// Current band gains, for persisting
    pub fn band_gains(&self) -> Vec<BandSetting> {
        let state = self.shared.state.lock();
        match &state.control {
            Some(control) => control.bands(),
            None => self
                .shared
                .config
                .bands
                .iter()
                .map(|b| BandSetting::new(b.frequency_hz, clamp_gain_db(b.gain_db)))
                .collect(),
        }
    }

    /// Meter readings while active
    pub fn levels(&self) -> Option<Levels> {
        let state = self.shared.state.lock();
        if state.session.is_active() {
            state.control.as_ref().map(|c| c.levels())
        } else {
            None
        }
    }

    pub fn device_state(&self) -> DeviceState {
        self.session.state()
    }

    /// Get next event (non-blocking)
    pub fn poll_event(&self) -> Option<Event> {
        self.events.try_recv().ok()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.shared.config
    }
}

impl Drop for AudioController {
    fn drop(&mut self) {
        self.stop();
        self.session.shutdown();
        self.warning.shutdown();
    }
}
