//! In-process audio session over ALSA.
//!
//! Linux has no system-wide audio session, so this keeps the negotiated
//! configuration locally, classifies ALSA device hints into ports, and turns
//! device-list changes into route-change events. Selecting a different input
//! or forcing the speaker is reported as an `Override` route change so running
//! units are reopened on the new device.
//!
//! The session reports zero input and output latency. ALSA has no latency
//! apart from the PCM ring buffer, and each unit already reports that buffer
//! through `HardwareUnit::latency`, so a session value would count it twice.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alsa::device_name::HintIter;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::format::Direction;
use super::session::{
    AudioPort, AudioSession, PortKind, RouteChangeReason, RouteDescription, SessionConfig,
    SessionEvent, SessionSnapshot,
};
use super::state_cell::{Flag, StateCell};
use crate::error::AudioError;

/// ALSA device names currently selected for each direction.
///
/// Shared between the session (which changes them) and the unit factory
/// (which opens them).
#[derive(Debug)]
pub struct AlsaRouting {
    default_capture: String,
    default_playback: String,
    speaker: String,
    capture: StateCell<String>,
    playback: StateCell<String>,
}

impl AlsaRouting {
    pub fn new(capture: &str, playback: &str, speaker: &str) -> Self {
        Self {
            default_capture: capture.to_string(),
            default_playback: playback.to_string(),
            speaker: speaker.to_string(),
            capture: StateCell::new(capture.to_string()),
            playback: StateCell::new(playback.to_string()),
        }
    }

    pub fn device_for(&self, direction: Direction) -> String {
        match direction {
            Direction::Capture => self.capture.get(),
            Direction::Render => self.playback.get(),
        }
    }

    fn reset(&self) {
        self.capture.set(self.default_capture.clone());
        self.playback.set(self.default_playback.clone());
    }
}

pub struct AlsaSession {
    routing: Arc<AlsaRouting>,
    sample_rate: AtomicU32,
    io_buffer_bits: AtomicU64,
    current: StateCell<SessionSnapshot>,
    active: Flag,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
}

impl AlsaSession {
    pub fn new(routing: Arc<AlsaRouting>, sample_rate: u32) -> Self {
        Self {
            routing,
            sample_rate: AtomicU32::new(sample_rate),
            io_buffer_bits: AtomicU64::new(0f64.to_bits()),
            current: StateCell::new(SessionSnapshot {
                preferred_sample_rate: sample_rate,
                input_channels: 1,
                ..SessionSnapshot::default()
            }),
            active: Flag::new(false),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Delivers `event` to every live subscriber.
    pub fn notify(&self, event: SessionEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event).is_ok());
    }

    /// Polls the ALSA device list and reports additions/removals as route changes.
    pub async fn watch_routes(self: Arc<Self>, period: Duration) {
        let mut known = device_names();
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let now = device_names();
            if now == known {
                continue;
            }
            let reason = if now.difference(&known).next().is_some() {
                RouteChangeReason::NewDeviceAvailable
            } else {
                RouteChangeReason::OldDeviceUnavailable
            };
            log::info!("ALSA device list changed ({:?})", reason);
            known = now;
            self.notify(SessionEvent::RouteChange(reason));
        }
    }

    /// Points `direction` at `device`, announcing an override if it moved.
    fn select_device(&self, direction: Direction, device: String) {
        let cell = match direction {
            Direction::Capture => &self.routing.capture,
            Direction::Render => &self.routing.playback,
        };
        let previous = cell.replace(device.clone());
        if previous != device {
            log::info!("{} device: {} -> {}", direction, previous, device);
            self.notify(SessionEvent::RouteChange(RouteChangeReason::Override));
        }
    }

    fn lookup_port(&self, name: &str, direction: Direction) -> AudioPort {
        list_ports(direction)
            .into_iter()
            .find(|port| port.name == name)
            .unwrap_or_else(|| AudioPort::new(name, classify(name, "", direction)))
    }
}

impl AudioSession for AlsaSession {
    fn snapshot(&self) -> SessionSnapshot {
        self.current.get()
    }

    fn configure(&self, config: &SessionConfig) -> Result<(), AudioError> {
        if config.sample_rate == 0 {
            return Err(AudioError::session("sample rate must be non-zero"));
        }
        self.sample_rate.store(config.sample_rate, Ordering::Release);
        self.io_buffer_bits.store(
            config.io_buffer_duration.as_secs_f64().to_bits(),
            Ordering::Release,
        );
        self.current.set(SessionSnapshot {
            category: config.category,
            mode: config.mode,
            preferred_sample_rate: config.sample_rate,
            input_channels: config.input_channels,
        });
        Ok(())
    }

    fn restore(&self, snapshot: &SessionSnapshot) -> Result<(), AudioError> {
        self.current.set(snapshot.clone());
        if snapshot.preferred_sample_rate > 0 {
            self.sample_rate
                .store(snapshot.preferred_sample_rate, Ordering::Release);
        }
        self.routing.reset();
        Ok(())
    }

    fn set_active(&self, active: bool) -> Result<(), AudioError> {
        self.active.set(active);
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    fn input_latency(&self) -> f64 {
        0.0
    }

    fn output_latency(&self) -> f64 {
        0.0
    }

    fn io_buffer_duration(&self) -> f64 {
        f64::from_bits(self.io_buffer_bits.load(Ordering::Acquire))
    }

    fn available_inputs(&self) -> Vec<AudioPort> {
        list_ports(Direction::Capture)
    }

    fn set_preferred_input(&self, port: &AudioPort) -> Result<(), AudioError> {
        self.select_device(Direction::Capture, port.name.clone());
        Ok(())
    }

    fn override_output_to_speaker(&self) -> Result<(), AudioError> {
        self.select_device(Direction::Render, self.routing.speaker.clone());
        Ok(())
    }

    fn current_route(&self) -> RouteDescription {
        RouteDescription {
            inputs: vec![self.lookup_port(&self.routing.capture.get(), Direction::Capture)],
            outputs: vec![self.lookup_port(&self.routing.playback.get(), Direction::Render)],
        }
    }

    fn subscribe(&self, events: mpsc::UnboundedSender<SessionEvent>) {
        self.subscribers.lock().push(events);
    }
}

fn device_names() -> BTreeSet<String> {
    Direction::BOTH
        .iter()
        .flat_map(|&d| list_ports(d))
        .map(|port| port.name)
        .collect()
}

/// PCM hints usable in `direction`.
fn list_ports(direction: Direction) -> Vec<AudioPort> {
    let wanted = match direction {
        Direction::Capture => alsa::Direction::Capture,
        Direction::Render => alsa::Direction::Playback,
    };
    let hints = match HintIter::new_str(None, "pcm") {
        Ok(hints) => hints,
        Err(e) => {
            log::debug!("ALSA hint enumeration failed: {}", e);
            return Vec::new();
        }
    };
    hints
        .filter(|hint| hint.direction.is_none_or(|d| d == wanted))
        .filter_map(|hint| {
            let name = hint.name?;
            if name == "null" {
                return None;
            }
            let kind = classify(&name, hint.desc.as_deref().unwrap_or(""), direction);
            Some(AudioPort { name, kind })
        })
        .collect()
}

/// Best-effort port kind from an ALSA device name and description.
pub fn classify(name: &str, desc: &str, direction: Direction) -> PortKind {
    let text = format!("{} {}", name, desc).to_lowercase();
    if text.contains("bluealsa") || text.contains("bluetooth") {
        if text.contains("a2dp") {
            PortKind::BluetoothA2dp
        } else {
            PortKind::BluetoothHfp
        }
    } else if text.contains("headset") {
        PortKind::HeadsetMic
    } else if text.contains("headphone") {
        PortKind::Headphones
    } else if text.contains("usb") {
        PortKind::Usb
    } else {
        match direction {
            Direction::Capture => PortKind::BuiltInMic,
            Direction::Render => PortKind::BuiltInSpeaker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::session::SessionCategory;

    fn session() -> AlsaSession {
        AlsaSession::new(Arc::new(AlsaRouting::new("default", "default", "hw:0,0")), 48000)
    }

    #[test]
    fn classifies_bluealsa_profiles() {
        assert_eq!(
            classify("bluealsa:PROFILE=sco", "", Direction::Capture),
            PortKind::BluetoothHfp
        );
        assert_eq!(
            classify("bluealsa:PROFILE=a2dp", "", Direction::Render),
            PortKind::BluetoothA2dp
        );
        assert_eq!(
            classify("hw:1,0", "Jabra USB Headset", Direction::Capture),
            PortKind::HeadsetMic
        );
        assert_eq!(classify("default", "", Direction::Render), PortKind::BuiltInSpeaker);
    }

    #[test]
    fn configure_then_restore_round_trips_snapshot() {
        let session = session();
        let before = session.snapshot();
        session
            .configure(&SessionConfig::voice(16000, Duration::from_millis(10)))
            .unwrap();
        assert_eq!(session.snapshot().category, SessionCategory::PlayAndRecord);
        assert_eq!(session.sample_rate(), 16000);
        assert!((session.io_buffer_duration() - 0.010).abs() < 1e-9);

        session.restore(&before).unwrap();
        assert_eq!(session.snapshot(), before);
        assert_eq!(session.sample_rate(), 48000);
    }

    #[test]
    fn preferred_input_and_speaker_override_change_devices() {
        let routing = Arc::new(AlsaRouting::new("default", "default", "hw:0,0"));
        let session = AlsaSession::new(routing.clone(), 48000);
        session
            .set_preferred_input(&AudioPort::new("bluealsa:PROFILE=sco", PortKind::BluetoothHfp))
            .unwrap();
        session.override_output_to_speaker().unwrap();
        assert_eq!(routing.device_for(Direction::Capture), "bluealsa:PROFILE=sco");
        assert_eq!(routing.device_for(Direction::Render), "hw:0,0");

        session.restore(&SessionSnapshot::default()).unwrap();
        assert_eq!(routing.device_for(Direction::Capture), "default");
        assert_eq!(routing.device_for(Direction::Render), "default");
    }

    #[test]
    fn device_switch_announces_override_once() {
        let session = session();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.subscribe(tx);
        let bt = AudioPort::new("bluealsa:PROFILE=sco", PortKind::BluetoothHfp);

        session.set_preferred_input(&bt).unwrap();
        session.set_preferred_input(&bt).unwrap();
        session.override_output_to_speaker().unwrap();
        session.override_output_to_speaker().unwrap();

        let override_change = SessionEvent::RouteChange(RouteChangeReason::Override);
        assert_eq!(rx.try_recv().unwrap(), override_change);
        assert_eq!(rx.try_recv().unwrap(), override_change);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn latency_comes_from_units_not_session() {
        let session = session();
        session
            .configure(&SessionConfig::voice(16000, Duration::from_millis(10)))
            .unwrap();
        assert_eq!(session.input_latency(), 0.0);
        assert_eq!(session.output_latency(), 0.0);
    }

    #[test]
    fn notify_drops_closed_subscribers() {
        let session = session();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        drop(closed_rx);
        session.subscribe(tx);
        session.subscribe(closed_tx);

        session.notify(SessionEvent::MediaServicesReset);
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::MediaServicesReset);
        assert_eq!(session.subscribers.lock().len(), 1);
    }
}
