//! Hardware unit seam: one unit per direction, built lazily by the engine.

use super::format::{AudioFormat, Direction};
use super::realtime::RealtimeContext;
use crate::error::AudioError;

/// A started/stopped hardware endpoint for one direction.
///
/// While started, the unit's I/O thread calls [`RealtimeContext::on_capture`]
/// or [`RealtimeContext::on_render`] once per hardware period.
pub trait HardwareUnit: Send {
    fn start(&mut self) -> Result<(), AudioError>;
    fn stop(&mut self) -> Result<(), AudioError>;
    /// Unit-reported latency in seconds.
    fn latency(&self) -> f64;
}

/// Builds hardware units bound to the engine's real-time context.
pub trait UnitFactory: Send + Sync {
    fn create(
        &self,
        direction: Direction,
        format: AudioFormat,
        io_buffer_frames: usize,
        context: RealtimeContext,
    ) -> Result<Box<dyn HardwareUnit>, AudioError>;
}
