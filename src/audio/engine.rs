//! The hardware audio engine.
//!
//! Owns the capture and render units and the shared session. Structural
//! transitions (start, stop, interruption handling, restarts) are serialized
//! by the control mutex; the I/O threads only see [`Shared`] through
//! [`RealtimeContext`] and never take that mutex.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::mpsc;

use super::bus::AudioBus;
use super::delay::DelaySettings;
use super::device::AudioDevice;
use super::format::{AudioFormat, Direction};
use super::realtime::{RealtimeContext, Shared, StateSnapshot};
use super::recovery::{RecoveryQueue, RetryDecision, RetryState};
use super::session::{
    AudioSession, InterruptionPhase, RouteChangeReason, RouteInfo, SessionConfig, SessionEvent,
    SessionSnapshot,
};
use super::state_cell::StateCell;
use super::unit::{HardwareUnit, UnitFactory};
use crate::error::AudioError;

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fixed sample rate; `None` uses the session's current rate.
    pub sample_rate: Option<u32>,
    /// Preferred io buffer duration requested from the session.
    pub io_buffer_duration: Duration,
    /// Attempts per interruption recovery chain.
    pub retry_count: u32,
    /// Spacing between recovery attempts.
    pub retry_interval: Duration,
    pub capture_delay: DelaySettings,
    pub render_delay: DelaySettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: None,
            io_buffer_duration: Duration::from_millis(10),
            retry_count: 5,
            retry_interval: Duration::from_secs(1),
            capture_delay: DelaySettings::CAPTURE,
            render_delay: DelaySettings::RENDER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopCause {
    Explicit,
    Interruption,
}

struct Control {
    capture_unit: Option<Box<dyn HardwareUnit>>,
    render_unit: Option<Box<dyn HardwareUnit>>,
    capture_initialized: bool,
    render_initialized: bool,
    saved_session: Option<SessionSnapshot>,
    /// Input port the capture unit was built against.
    preferred_input: Option<String>,
    listener_attached: bool,
    capture_retry: RetryState,
    render_retry: RetryState,
}

impl Control {
    fn unit_mut(&mut self, direction: Direction) -> &mut Option<Box<dyn HardwareUnit>> {
        match direction {
            Direction::Capture => &mut self.capture_unit,
            Direction::Render => &mut self.render_unit,
        }
    }

    fn initialized_mut(&mut self, direction: Direction) -> &mut bool {
        match direction {
            Direction::Capture => &mut self.capture_initialized,
            Direction::Render => &mut self.render_initialized,
        }
    }

    fn retry_mut(&mut self, direction: Direction) -> &mut RetryState {
        match direction {
            Direction::Capture => &mut self.capture_retry,
            Direction::Render => &mut self.render_retry,
        }
    }
}

pub struct AudioEngine {
    config: EngineConfig,
    format: AudioFormat,
    shared: Arc<Shared>,
    units: Arc<dyn UnitFactory>,
    control: Mutex<Control>,
    route: StateCell<RouteInfo>,
    recovery: RecoveryQueue,
    this: Weak<AudioEngine>,
}

impl AudioEngine {
    pub fn new(
        session: Arc<dyn AudioSession>,
        units: Arc<dyn UnitFactory>,
        config: EngineConfig,
    ) -> Result<Arc<Self>, AudioError> {
        let recovery = RecoveryQueue::start("audio-recovery")?;
        let format = AudioFormat::mono(config.sample_rate.unwrap_or_else(|| session.sample_rate()));
        let shared = Arc::new(Shared::new(
            session,
            config.capture_delay,
            config.render_delay,
        ));
        let retry = RetryState::new(config.retry_count);

        log::info!(
            "AudioEngine created: rate={}Hz, io_buffer={:?}, retries={}x{:?}",
            format.sample_rate,
            config.io_buffer_duration,
            config.retry_count,
            config.retry_interval,
        );

        Ok(Arc::new_cyclic(|this| Self {
            config,
            format,
            shared,
            units,
            control: Mutex::new(Control {
                capture_unit: None,
                render_unit: None,
                capture_initialized: false,
                render_initialized: false,
                saved_session: None,
                preferred_input: None,
                listener_attached: false,
                capture_retry: retry,
                render_retry: retry,
            }),
            route: StateCell::new(RouteInfo::default()),
            recovery,
            this: this.clone(),
        }))
    }

    /// Entry points for hardware I/O threads.
    pub fn realtime(&self) -> RealtimeContext {
        RealtimeContext::new(self.shared.clone())
    }

    /// The engine's non-real-time queue; also used by the ringtone overlay.
    pub fn scheduler(&self) -> &RecoveryQueue {
        &self.recovery
    }

    pub fn state(&self) -> StateSnapshot {
        self.shared.state.snapshot()
    }

    /// Failed attempts in the current recovery chain for `direction`.
    pub fn retry_attempts(&self, direction: Direction) -> u32 {
        self.lock_control().retry_mut(direction).attempts()
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock()
    }

    fn io_buffer_frames(&self) -> usize {
        self.format
            .frames_for(self.config.io_buffer_duration.as_secs_f64())
    }

    // ======================== Session ========================

    fn setup_session(&self, ctl: &mut Control) -> Result<(), AudioError> {
        let state = &self.shared.state;
        if state.session_configured.get() {
            return Ok(());
        }
        let session = &self.shared.session;
        let snapshot = session.snapshot();
        let wanted = SessionConfig::voice(self.format.sample_rate, self.config.io_buffer_duration);

        if let Err(e) = session.configure(&wanted) {
            self.restore_session(&snapshot);
            return Err(e);
        }

        if !ctl.listener_attached {
            self.attach_listener();
            ctl.listener_attached = true;
        }

        if let Err(e) = session.set_active(true) {
            self.restore_session(&snapshot);
            return Err(e);
        }

        ctl.saved_session = Some(snapshot);
        ctl.preferred_input = self.apply_wireless_input();
        state.session_configured.set(true);
        log::info!(
            "Audio session configured: rate={}Hz, io_buffer={:?}",
            self.format.sample_rate,
            self.config.io_buffer_duration
        );
        Ok(())
    }

    fn restore_session(&self, snapshot: &SessionSnapshot) {
        if let Err(e) = self.shared.session.restore(snapshot) {
            log::warn!("Failed to restore audio session: {}", e);
        }
    }

    fn attach_listener(&self) {
        let (tx, mut rx) = mpsc::unbounded_channel::<SessionEvent>();
        self.shared.session.subscribe(tx);
        let engine = self.this.clone();
        self.recovery.spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.handle_session_event(event);
            }
        });
    }

    fn teardown_session(&self, ctl: &mut Control) {
        for direction in Direction::BOTH {
            Self::dispose_unit(ctl, direction);
        }
        self.shared.release_capture_buffer();

        if let Some(snapshot) = ctl.saved_session.take() {
            self.restore_session(&snapshot);
        }
        ctl.preferred_input = None;
        if let Err(e) = self.shared.session.set_active(false) {
            log::warn!("Failed to deactivate audio session: {}", e);
        }
        self.shared.state.session_configured.set(false);
        log::info!("Audio session torn down");
    }

    /// Tears the session down once nothing runs and no recovery is pending.
    fn teardown_if_idle(&self, ctl: &mut Control) {
        let state = &self.shared.state;
        let busy = Direction::BOTH
            .iter()
            .any(|&d| state.running(d).get() || state.interrupted(d).get());
        if !busy && !state.resetting.get() && state.session_configured.get() {
            self.teardown_session(ctl);
        }
    }

    fn dispose_unit(ctl: &mut Control, direction: Direction) {
        if let Some(mut unit) = ctl.unit_mut(direction).take() {
            if let Err(e) = unit.stop() {
                log::debug!("Stopping {} unit during dispose: {}", direction, e);
            }
            log::debug!("Disposed {} unit", direction);
        }
    }

    // ======================== Start / Stop ========================

    fn start_locked(&self, ctl: &mut Control, direction: Direction) -> Result<(), AudioError> {
        let state = &self.shared.state;
        if state.running(direction).get() {
            return Ok(());
        }

        let fresh_session = !state.session_configured.get();
        self.setup_session(ctl)?;

        match self.build_and_start(ctl, direction) {
            Ok(()) => {
                state.running(direction).set(true);
                state.interrupted(direction).set(false);
                log::info!("{} started", direction);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to start {}: {}", direction, e);
                Self::dispose_unit(ctl, direction);
                if fresh_session
                    && !state.running(direction.other()).get()
                    && !state.resetting.get()
                {
                    self.teardown_session(ctl);
                }
                Err(e)
            }
        }
    }

    fn build_and_start(&self, ctl: &mut Control, direction: Direction) -> Result<(), AudioError> {
        let slot = ctl.unit_mut(direction);
        let mut unit = match slot.take() {
            Some(unit) => unit,
            None => {
                let unit = self.units.create(
                    direction,
                    self.format,
                    self.io_buffer_frames(),
                    self.realtime(),
                )?;
                self.shared.delay(direction).set_unit_latency(unit.latency());
                unit
            }
        };
        let result = unit.start();
        *slot = Some(unit);
        result
    }

    fn stop_locked(
        &self,
        ctl: &mut Control,
        direction: Direction,
        cause: StopCause,
    ) -> Result<(), AudioError> {
        let state = &self.shared.state;
        if !state.running(direction).get() {
            // An explicit stop cancels a pending resume of a suspended direction.
            if cause == StopCause::Explicit && state.interrupted(direction).get() {
                state.interrupted(direction).set(false);
                ctl.retry_mut(direction).begin_chain();
                log::info!("{} stopped while suspended; not resuming", direction);
                self.teardown_if_idle(ctl);
            }
            return Ok(());
        }

        state.running(direction).set(false);
        if let Some(unit) = ctl.unit_mut(direction).as_mut() {
            if let Err(e) = unit.stop() {
                log::warn!("Failed to stop {} unit: {}", direction, e);
            }
        }
        if direction == Direction::Capture {
            self.shared.release_capture_buffer();
        }
        if cause == StopCause::Interruption {
            state.interrupted(direction).set(true);
        }
        log::info!("{} stopped ({:?})", direction, cause);

        self.teardown_if_idle(ctl);
        Ok(())
    }

    // ======================== Session events ========================

    pub fn handle_session_event(&self, event: SessionEvent) {
        log::debug!("Session event: {:?}", event);
        match event {
            SessionEvent::Interruption(phase) => self.handle_interruption(phase),
            SessionEvent::RouteChange(reason) => self.handle_route_change(reason),
            SessionEvent::MediaServicesReset => self.handle_media_services_reset(),
            SessionEvent::AppActivated => self.handle_interruption(InterruptionPhase::Ended),
        }
    }

    pub fn handle_interruption(&self, phase: InterruptionPhase) {
        let mut ctl = self.lock_control();
        let state = &self.shared.state;
        match phase {
            InterruptionPhase::Began => {
                for direction in Direction::BOTH {
                    if state.running(direction).get() {
                        log::info!("Interruption began, suspending {}", direction);
                        let _ = self.stop_locked(&mut ctl, direction, StopCause::Interruption);
                    }
                }
            }
            InterruptionPhase::Ended => {
                let selected = self.apply_wireless_input();
                if selected.is_some() && selected != ctl.preferred_input {
                    // The suspended capture unit is bound to the old input.
                    if state.interrupted(Direction::Capture).get() {
                        log::info!("Input changed during interruption, rebuilding capture unit");
                        Self::dispose_unit(&mut ctl, Direction::Capture);
                    }
                    ctl.preferred_input = selected;
                }
                for direction in Direction::BOTH {
                    if state.interrupted(direction).get() {
                        let chain = ctl.retry_mut(direction).begin_chain();
                        self.resume_after_interruption(&mut ctl, direction, chain);
                    }
                }
            }
        }
    }

    fn resume_after_interruption(&self, ctl: &mut Control, direction: Direction, chain: u64) {
        let state = &self.shared.state;
        if !ctl.retry_mut(direction).is_current(chain) || !state.interrupted(direction).get() {
            return;
        }

        if self.start_locked(ctl, direction).is_ok() {
            ctl.retry_mut(direction).reset();
            log::info!("{} resumed after interruption", direction);
            return;
        }

        match ctl.retry_mut(direction).record_failure() {
            RetryDecision::Retry { attempt, chain } => {
                log::warn!(
                    "Resuming {} failed (attempt {}), retrying in {:?}",
                    direction,
                    attempt,
                    self.config.retry_interval
                );
                let engine = self.this.clone();
                self.recovery
                    .dispatch_after(self.config.retry_interval, move || {
                        if let Some(engine) = engine.upgrade() {
                            let mut ctl = engine.lock_control();
                            engine.resume_after_interruption(&mut ctl, direction, chain);
                        }
                    });
            }
            RetryDecision::GiveUp { attempts } => {
                log::warn!(
                    "Giving up resuming {} after {} attempts",
                    direction,
                    attempts
                );
                state.interrupted(direction).set(false);
                self.teardown_if_idle(ctl);
            }
        }
    }

    pub fn handle_route_change(&self, reason: RouteChangeReason) {
        self.detect_current_route();
        if !reason.requires_restart() {
            log::debug!("Route change ({:?}) ignored", reason);
            return;
        }
        log::info!("Route change ({:?}), restarting audio units", reason);
        self.restart_units();
    }

    pub fn handle_media_services_reset(&self) {
        log::warn!("Media services were reset, restarting audio units");
        self.restart_units();
    }

    /// Stops, disposes and restarts every running direction.
    fn restart_units(&self) {
        let mut ctl = self.lock_control();
        let state = &self.shared.state;
        state.resetting.set(true);

        for direction in Direction::BOTH {
            if !state.running(direction).get() {
                continue;
            }
            let _ = self.stop_locked(&mut ctl, direction, StopCause::Explicit);
            Self::dispose_unit(&mut ctl, direction);
            if let Err(e) = self.start_locked(&mut ctl, direction) {
                log::error!("Restarting {} failed: {}", direction, e);
            }
        }

        state.resetting.set(false);
        self.teardown_if_idle(&mut ctl);
    }

    // ======================== Routing ========================

    /// Selects the first available bluetooth input. Returns `true` if one was set.
    pub fn prefer_wireless_input(&self) -> bool {
        self.apply_wireless_input().is_some()
    }

    /// Name of the bluetooth input made preferred, if any.
    fn apply_wireless_input(&self) -> Option<String> {
        let session = &self.shared.session;
        let port = session
            .available_inputs()
            .into_iter()
            .find(|port| port.kind.is_bluetooth())?;
        match session.set_preferred_input(&port) {
            Ok(()) => {
                log::info!("Preferred input set to {} ({:?})", port.name, port.kind);
                Some(port.name)
            }
            Err(e) => {
                log::warn!("Failed to prefer input {}: {}", port.name, e);
                None
            }
        }
    }

    pub fn force_speaker_output(&self) -> Result<(), AudioError> {
        self.shared.session.override_output_to_speaker()
    }

    /// Re-reads the current route and caches the classification.
    pub fn detect_current_route(&self) -> RouteInfo {
        let info = RouteInfo::from_route(&self.shared.session.current_route());
        self.route.set(info);
        info
    }

    /// Last classification from [`AudioEngine::detect_current_route`].
    pub fn route_info(&self) -> RouteInfo {
        self.route.get()
    }

    /// Bluetooth if present, else a wired headset, else the built-in speaker.
    pub fn configure_desired_route(&self) -> RouteInfo {
        let info = self.detect_current_route();
        if info.bluetooth_available {
            self.prefer_wireless_input();
        } else if !info.headset_available {
            if let Err(e) = self.force_speaker_output() {
                log::warn!("Failed to route output to speaker: {}", e);
            }
        }
        info
    }
}

impl AudioDevice for AudioEngine {
    fn set_audio_bus(&self, bus: Arc<dyn AudioBus>) -> Result<(), AudioError> {
        let wanted = Arc::as_ptr(&bus) as *const ();
        match self.shared.bus.set(bus) {
            Ok(()) => Ok(()),
            Err(_) => match self.shared.bus.get() {
                Some(bound) if Arc::as_ptr(bound) as *const () == wanted => Ok(()),
                _ => Err(AudioError::BusAlreadyBound),
            },
        }
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn is_available(&self, _direction: Direction) -> bool {
        true
    }

    fn initialize(&self, direction: Direction) -> bool {
        let mut ctl = self.lock_control();
        if self.shared.state.running(direction).get() {
            return false;
        }
        *ctl.initialized_mut(direction) = true;
        true
    }

    fn is_initialized(&self, direction: Direction) -> bool {
        *self.lock_control().initialized_mut(direction)
    }

    fn start(&self, direction: Direction) -> Result<(), AudioError> {
        let mut ctl = self.lock_control();
        self.start_locked(&mut ctl, direction)
    }

    fn stop(&self, direction: Direction) -> Result<(), AudioError> {
        let mut ctl = self.lock_control();
        self.stop_locked(&mut ctl, direction, StopCause::Explicit)
    }

    fn is_active(&self, direction: Direction) -> bool {
        self.shared.state.running(direction).get()
    }

    fn estimated_delay(&self, direction: Direction) -> u16 {
        self.shared.delay(direction).estimate_ms()
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        let mut ctl = self.lock_control();
        let state = &self.shared.state;
        for direction in Direction::BOTH {
            state.running(direction).set(false);
            state.interrupted(direction).set(false);
        }
        if state.session_configured.get() {
            self.teardown_session(&mut ctl);
        } else {
            for direction in Direction::BOTH {
                Self::dispose_unit(&mut ctl, direction);
            }
        }
    }
}
