//! The driver contract the communications engine talks to.

use std::sync::Arc;

use super::bus::AudioBus;
use super::format::{AudioFormat, Direction};
use crate::error::AudioError;

/// Per-direction lifecycle exposed to the communications engine.
///
/// Implemented by the hardware engine and by the ringtone overlay sitting on
/// top of it, so callers cannot tell which one they hold.
pub trait AudioDevice: Send + Sync {
    /// Binds the bus for the lifetime of the driver.
    fn set_audio_bus(&self, bus: Arc<dyn AudioBus>) -> Result<(), AudioError>;

    fn format(&self) -> AudioFormat;

    fn is_available(&self, direction: Direction) -> bool;

    /// `true` if initialized (now or before); `false` while the direction runs.
    fn initialize(&self, direction: Direction) -> bool;

    fn is_initialized(&self, direction: Direction) -> bool;

    /// Idempotent: succeeds immediately if already running.
    fn start(&self, direction: Direction) -> Result<(), AudioError>;

    /// Idempotent: succeeds immediately if not running.
    fn stop(&self, direction: Direction) -> Result<(), AudioError>;

    fn is_active(&self, direction: Direction) -> bool;

    /// Clamped delay estimate in milliseconds.
    fn estimated_delay(&self, direction: Direction) -> u16;
}
