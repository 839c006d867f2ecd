//! audio - Full-duplex voice I/O over ALSA
//!
//! The hardware engine owns one capture and one render unit behind a shared
//! session, recovers from interruptions and route changes, and estimates
//! per-direction delay. The ringtone overlay sits on top of it behind the
//! same [`AudioDevice`] contract.

pub mod alsa_device;
pub mod alsa_session;
pub mod alsa_unit;
pub mod buffer;
pub mod bus;
pub mod clip;
pub mod delay;
pub mod device;
pub mod engine;
pub mod format;
pub mod realtime;
pub mod recovery;
pub mod ringtone;
pub mod session;
pub mod state_cell;
pub mod unit;

pub use alsa_session::{AlsaRouting, AlsaSession};
pub use alsa_unit::AlsaUnitFactory;
pub use bus::{AudioBus, LoopbackBus};
pub use clip::{AlsaClipPlayerFactory, ClipSource, Haptics, LogHaptics};
pub use delay::DelaySettings;
pub use device::AudioDevice;
pub use engine::{AudioEngine, EngineConfig};
pub use format::{AudioFormat, Direction};
pub use ringtone::{DeferredCommand, RingtoneConfig, RingtoneOverlay};
