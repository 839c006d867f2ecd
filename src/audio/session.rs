//! The shared platform audio session.
//!
//! One session exists per process. The engine negotiates it on first start,
//! saves what was there before, and restores that on full teardown.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::AudioError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionCategory {
    #[default]
    SoloAmbient,
    Playback,
    PlayAndRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    Default,
    VoiceChat,
    VideoChat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CategoryOptions {
    pub allow_bluetooth: bool,
    pub default_to_speaker: bool,
}

/// What the engine asks the session for.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub category: SessionCategory,
    pub mode: SessionMode,
    pub options: CategoryOptions,
    pub sample_rate: u32,
    pub input_channels: u16,
    pub io_buffer_duration: Duration,
}

impl SessionConfig {
    /// Duplex voice configuration: mono, speaker fallback, bluetooth allowed.
    pub fn voice(sample_rate: u32, io_buffer_duration: Duration) -> Self {
        Self {
            category: SessionCategory::PlayAndRecord,
            mode: SessionMode::VideoChat,
            options: CategoryOptions {
                allow_bluetooth: true,
                default_to_speaker: true,
            },
            sample_rate,
            input_channels: 1,
            io_buffer_duration,
        }
    }
}

/// Session state saved before the engine first touches the session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub category: SessionCategory,
    pub mode: SessionMode,
    pub preferred_sample_rate: u32,
    pub input_channels: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    BuiltInMic,
    BuiltInSpeaker,
    Receiver,
    Headphones,
    HeadsetMic,
    BluetoothHfp,
    BluetoothLe,
    BluetoothA2dp,
    Usb,
    LineOut,
    Other,
}

impl PortKind {
    pub fn is_bluetooth(self) -> bool {
        matches!(
            self,
            PortKind::BluetoothHfp | PortKind::BluetoothLe | PortKind::BluetoothA2dp
        )
    }

    pub fn is_headset(self) -> bool {
        matches!(self, PortKind::Headphones | PortKind::HeadsetMic)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPort {
    pub name: String,
    pub kind: PortKind,
}

impl AudioPort {
    pub fn new(name: impl Into<String>, kind: PortKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouteDescription {
    pub inputs: Vec<AudioPort>,
    pub outputs: Vec<AudioPort>,
}

/// Result of classifying the current output route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteInfo {
    pub headset_available: bool,
    pub bluetooth_available: bool,
}

impl RouteInfo {
    pub fn from_route(route: &RouteDescription) -> Self {
        let mut info = RouteInfo::default();
        for port in &route.outputs {
            if port.kind.is_headset() {
                info.headset_available = true;
            } else if port.kind.is_bluetooth() {
                info.bluetooth_available = true;
            }
        }
        info
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionPhase {
    Began,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteChangeReason {
    Unknown,
    NewDeviceAvailable,
    OldDeviceUnavailable,
    CategoryChange,
    Override,
    WakeFromSleep,
    NoSuitableRouteForCategory,
    RouteConfigurationChange,
}

impl RouteChangeReason {
    /// Category-only and configuration-only changes leave the units alone.
    pub fn requires_restart(self) -> bool {
        !matches!(
            self,
            RouteChangeReason::CategoryChange | RouteChangeReason::RouteConfigurationChange
        )
    }
}

/// Signals delivered by the platform about the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Interruption(InterruptionPhase),
    RouteChange(RouteChangeReason),
    MediaServicesReset,
    /// The host came back to the foreground; treated as an interruption end
    /// because some platforms never deliver one.
    AppActivated,
}

/// Platform audio session.
///
/// `sample_rate`, the latency getters and `io_buffer_duration` are read
/// from real-time threads and must be cheap and non-blocking.
pub trait AudioSession: Send + Sync {
    fn snapshot(&self) -> SessionSnapshot;
    fn configure(&self, config: &SessionConfig) -> Result<(), AudioError>;
    fn restore(&self, snapshot: &SessionSnapshot) -> Result<(), AudioError>;
    fn set_active(&self, active: bool) -> Result<(), AudioError>;

    fn sample_rate(&self) -> u32;
    /// Seconds.
    fn input_latency(&self) -> f64;
    /// Seconds.
    fn output_latency(&self) -> f64;
    /// Seconds.
    fn io_buffer_duration(&self) -> f64;

    fn available_inputs(&self) -> Vec<AudioPort>;
    fn set_preferred_input(&self, port: &AudioPort) -> Result<(), AudioError>;
    fn override_output_to_speaker(&self) -> Result<(), AudioError>;
    fn current_route(&self) -> RouteDescription;

    /// Registers a listener for session events.
    fn subscribe(&self, events: mpsc::UnboundedSender<SessionEvent>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_category_and_configuration_changes_skip_restart() {
        assert!(!RouteChangeReason::CategoryChange.requires_restart());
        assert!(!RouteChangeReason::RouteConfigurationChange.requires_restart());
        assert!(RouteChangeReason::NewDeviceAvailable.requires_restart());
        assert!(RouteChangeReason::OldDeviceUnavailable.requires_restart());
        assert!(RouteChangeReason::Override.requires_restart());
        assert!(RouteChangeReason::Unknown.requires_restart());
    }

    #[test]
    fn route_info_classifies_outputs() {
        let route = RouteDescription {
            inputs: vec![AudioPort::new("mic", PortKind::BuiltInMic)],
            outputs: vec![
                AudioPort::new("bluealsa", PortKind::BluetoothA2dp),
                AudioPort::new("speaker", PortKind::BuiltInSpeaker),
            ],
        };
        let info = RouteInfo::from_route(&route);
        assert!(info.bluetooth_available);
        assert!(!info.headset_available);
    }
}
