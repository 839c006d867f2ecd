//! State shared with the real-time I/O threads and the callback entry points.
//!
//! Nothing here takes the engine's control lock. The only lock on this path
//! is the capture buffer, acquired with `try_lock` so a callback that races a
//! stop skips one block instead of waiting.

use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::buffer::AudioBuffer;
use super::bus::AudioBus;
use super::delay::{DelayEstimator, DelaySettings, LatencySample};
use super::format::Direction;
use super::session::AudioSession;
use super::state_cell::Flag;

/// Lifecycle flags read by the I/O threads and written under the control lock.
#[derive(Debug, Default)]
pub struct EngineState {
    pub capturing: Flag,
    pub rendering: Flag,
    pub capture_interrupted: Flag,
    pub render_interrupted: Flag,
    pub resetting: Flag,
    pub session_configured: Flag,
}

impl EngineState {
    pub fn running(&self, direction: Direction) -> &Flag {
        match direction {
            Direction::Capture => &self.capturing,
            Direction::Render => &self.rendering,
        }
    }

    pub fn interrupted(&self, direction: Direction) -> &Flag {
        match direction {
            Direction::Capture => &self.capture_interrupted,
            Direction::Render => &self.render_interrupted,
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            capturing: self.capturing.get(),
            rendering: self.rendering.get(),
            capture_interrupted: self.capture_interrupted.get(),
            render_interrupted: self.render_interrupted.get(),
            resetting: self.resetting.get(),
            session_configured: self.session_configured.get(),
        }
    }
}

/// Point-in-time copy of [`EngineState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateSnapshot {
    pub capturing: bool,
    pub rendering: bool,
    pub capture_interrupted: bool,
    pub render_interrupted: bool,
    pub resetting: bool,
    pub session_configured: bool,
}

/// What a callback did with its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    /// Samples were exchanged with the bus.
    Forwarded(usize),
    /// The direction is not running or no bus is bound; nothing forwarded.
    Idle,
    /// The capture buffer was being released by the control thread.
    Busy,
    /// The hardware pull failed; the failure was logged.
    PullFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub frames: usize,
    pub byte_len: usize,
    pub capacity_frames: usize,
    pub reallocations: u64,
}

pub(crate) struct Shared {
    pub(crate) state: EngineState,
    pub(crate) bus: OnceLock<Arc<dyn AudioBus>>,
    pub(crate) capture_buffer: Mutex<AudioBuffer>,
    pub(crate) capture_delay: DelayEstimator,
    pub(crate) render_delay: DelayEstimator,
    pub(crate) session: Arc<dyn AudioSession>,
}

impl Shared {
    pub(crate) fn new(
        session: Arc<dyn AudioSession>,
        capture_delay: DelaySettings,
        render_delay: DelaySettings,
    ) -> Self {
        Self {
            state: EngineState::default(),
            bus: OnceLock::new(),
            capture_buffer: Mutex::new(AudioBuffer::new()),
            capture_delay: DelayEstimator::new(capture_delay),
            render_delay: DelayEstimator::new(render_delay),
            session,
        }
    }

    pub(crate) fn delay(&self, direction: Direction) -> &DelayEstimator {
        match direction {
            Direction::Capture => &self.capture_delay,
            Direction::Render => &self.render_delay,
        }
    }

    /// Frees the capture buffer. Blocks at most for one in-flight callback.
    pub(crate) fn release_capture_buffer(&self) {
        self.capture_buffer.lock().release();
    }
}

/// Handle given to hardware units so their I/O threads can drive the engine.
#[derive(Clone)]
pub struct RealtimeContext {
    shared: Arc<Shared>,
}

impl RealtimeContext {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Capture callback.
    ///
    /// `pull` fills the slice with up to `frames` hardware samples and returns
    /// how many it wrote. When capturing, the filled part goes to the bus.
    pub fn on_capture<E, F>(&self, frames: usize, pull: F) -> CallbackStatus
    where
        E: fmt::Display,
        F: FnOnce(&mut [i16]) -> Result<usize, E>,
    {
        let shared = &*self.shared;
        let Some(mut buffer) = shared.capture_buffer.try_lock() else {
            return CallbackStatus::Busy;
        };
        let samples = buffer.ensure_frames(frames);

        let filled = match pull(&mut *samples) {
            Ok(n) => n.min(frames),
            Err(e) => {
                log::warn!("Capture pull failed: {}", e);
                return CallbackStatus::PullFailed;
            }
        };

        let status = match shared.bus.get() {
            Some(bus) if shared.state.capturing.get() => {
                bus.write_capture_data(&samples[..filled]);
                CallbackStatus::Forwarded(filled)
            }
            _ => CallbackStatus::Idle,
        };
        drop(buffer);

        shared.capture_delay.tick(|| LatencySample {
            device_latency: shared.session.input_latency(),
            io_buffer_duration: shared.session.io_buffer_duration(),
        });
        status
    }

    /// Render callback. Fills `out` from the bus, padding with silence.
    pub fn on_render(&self, out: &mut [i16]) -> CallbackStatus {
        let shared = &*self.shared;
        if !shared.state.rendering.get() {
            out.fill(0);
            return CallbackStatus::Idle;
        }
        let Some(bus) = shared.bus.get() else {
            out.fill(0);
            return CallbackStatus::Idle;
        };

        let written = bus.read_render_data(out).min(out.len());
        out[written..].fill(0);

        shared.render_delay.tick(|| LatencySample {
            device_latency: shared.session.output_latency(),
            io_buffer_duration: shared.session.io_buffer_duration(),
        });
        CallbackStatus::Forwarded(written)
    }

    pub fn capture_buffer_info(&self) -> BufferInfo {
        let buffer = self.shared.capture_buffer.lock();
        BufferInfo {
            frames: buffer.frames(),
            byte_len: buffer.byte_len(),
            capacity_frames: buffer.capacity_frames(),
            reallocations: buffer.reallocations(),
        }
    }
}
