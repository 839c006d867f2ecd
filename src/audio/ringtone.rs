//! Ringtone overlay.
//!
//! Sits on top of [`AudioEngine`] behind the same [`AudioDevice`] contract.
//! While a clip plays, live audio is stopped and every start/stop the caller
//! issues is recorded instead of applied; when the clip stops, live audio is
//! restarted and the recorded commands are replayed in order.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use super::bus::AudioBus;
use super::clip::{ClipPlayer, ClipPlayerFactory, ClipSource, Haptics, PlaybackEnd};
use super::device::AudioDevice;
use super::engine::AudioEngine;
use super::format::{AudioFormat, Direction};
use super::recovery::TaskHandle;
use crate::error::AudioError;

#[derive(Debug, Clone)]
pub struct RingtoneConfig {
    /// Clip played automatically after the first capture start; `None`
    /// disables auto-play.
    pub clip: Option<ClipSource>,
    pub vibrate: bool,
    pub pulse_period: Duration,
    /// Settle time between the first capture start and auto-play.
    pub autoplay_delay: Duration,
}

impl Default for RingtoneConfig {
    fn default() -> Self {
        Self {
            clip: None,
            vibrate: false,
            pulse_period: Duration::from_secs(1),
            autoplay_delay: Duration::from_millis(100),
        }
    }
}

/// A structural command recorded while the ringtone plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredCommand {
    StartCapture,
    StopCapture,
    StartRender,
    StopRender,
}

impl DeferredCommand {
    pub fn start(direction: Direction) -> Self {
        match direction {
            Direction::Capture => DeferredCommand::StartCapture,
            Direction::Render => DeferredCommand::StartRender,
        }
    }

    pub fn stop(direction: Direction) -> Self {
        match direction {
            Direction::Capture => DeferredCommand::StopCapture,
            Direction::Render => DeferredCommand::StopRender,
        }
    }

    /// Re-issues the command through the regular entry points.
    pub fn apply(self, device: &dyn AudioDevice) -> Result<(), AudioError> {
        match self {
            DeferredCommand::StartCapture => device.start(Direction::Capture),
            DeferredCommand::StopCapture => device.stop(Direction::Capture),
            DeferredCommand::StartRender => device.start(Direction::Render),
            DeferredCommand::StopRender => device.stop(Direction::Render),
        }
    }
}

struct Playing {
    player: Box<dyn ClipPlayer>,
    generation: u64,
    pulse: Option<TaskHandle>,
}

#[derive(Default)]
struct OverlayState {
    playing: Option<Playing>,
    deferred: VecDeque<DeferredCommand>,
    autoplay_fired: bool,
    generation: u64,
}

pub struct RingtoneOverlay {
    engine: Arc<AudioEngine>,
    players: Arc<dyn ClipPlayerFactory>,
    haptics: Arc<dyn Haptics>,
    config: RingtoneConfig,
    state: Mutex<OverlayState>,
    this: Weak<RingtoneOverlay>,
}

impl RingtoneOverlay {
    pub fn new(
        engine: Arc<AudioEngine>,
        players: Arc<dyn ClipPlayerFactory>,
        haptics: Arc<dyn Haptics>,
        config: RingtoneConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            engine,
            players,
            haptics,
            config,
            state: Mutex::new(OverlayState::default()),
            this: this.clone(),
        })
    }

    /// The live engine underneath, for routing queries and overrides.
    pub fn engine(&self) -> &Arc<AudioEngine> {
        &self.engine
    }

    pub fn is_playing(&self) -> bool {
        self.lock_state().playing.is_some()
    }

    /// Commands waiting for the ringtone to stop, oldest first.
    pub fn deferred_commands(&self) -> Vec<DeferredCommand> {
        self.lock_state().deferred.iter().copied().collect()
    }

    fn lock_state(&self) -> MutexGuard<'_, OverlayState> {
        self.state.lock()
    }

    /// Silences live audio and starts looping `source`.
    ///
    /// If the clip cannot be played, live audio is resumed right away as if
    /// the ringtone had been stopped.
    pub fn play_ringtone(&self, source: &ClipSource) {
        let mut state = self.lock_state();

        for direction in Direction::BOTH {
            if let Err(e) = self.engine.stop(direction) {
                log::warn!("Pausing {} for ringtone failed: {}", direction, e);
            }
        }

        if let Some(mut previous) = state.playing.take() {
            previous.player.stop();
            log::debug!("Replacing ringtone player #{}", previous.generation);
        }

        state.generation += 1;
        let generation = state.generation;
        let overlay = self.this.clone();
        let on_end = Box::new(move |end: PlaybackEnd| {
            if let Some(overlay) = overlay.upgrade() {
                overlay.handle_playback_end(generation, end);
            }
        });

        match self.players.play_looped(source, on_end) {
            Ok(player) => {
                let pulse = self.config.vibrate.then(|| {
                    let haptics = self.haptics.clone();
                    let period = self.config.pulse_period.max(Duration::from_millis(1));
                    self.engine.scheduler().every(period, move || haptics.pulse())
                });
                state.playing = Some(Playing {
                    player,
                    generation,
                    pulse,
                });
                log::info!("Ringtone #{} playing", generation);
            }
            Err(e) => {
                log::error!("Ringtone audio player initialization failure: {}", e);
                self.resume_live_audio(&mut state);
            }
        }
    }

    /// Stops the ringtone, restarts live audio and replays deferred commands.
    ///
    /// Returns `false` if no ringtone was playing.
    pub fn stop_ringtone(&self) -> bool {
        let mut state = self.lock_state();
        let Some(mut playing) = state.playing.take() else {
            log::debug!("stop_ringtone: nothing playing");
            return false;
        };
        playing.player.stop();
        if let Some(mut pulse) = playing.pulse.take() {
            pulse.cancel();
        }
        log::info!("Ringtone #{} stopped", playing.generation);
        self.resume_live_audio(&mut state);
        true
    }

    fn handle_playback_end(&self, generation: u64, end: PlaybackEnd) {
        let current = self
            .lock_state()
            .playing
            .as_ref()
            .map(|playing| playing.generation);
        if current != Some(generation) {
            return;
        }
        match &end {
            PlaybackEnd::Finished => log::info!("Ringtone finished"),
            PlaybackEnd::Failed(reason) => log::error!("Ringtone playback failed: {}", reason),
        }
        self.stop_ringtone();
    }

    /// Starts both directions on the engine, then drains the deferred queue
    /// against it. Runs with the overlay lock held so nothing is queued
    /// behind the drain.
    fn resume_live_audio(&self, state: &mut OverlayState) {
        for direction in Direction::BOTH {
            if let Err(e) = self.engine.start(direction) {
                log::error!("Resuming {} after ringtone failed: {}", direction, e);
            }
        }
        while let Some(command) = state.deferred.pop_front() {
            log::info!("Performing deferred {:?}", command);
            if let Err(e) = command.apply(&*self.engine) {
                log::error!("Deferred {:?} failed: {}", command, e);
            }
        }
    }

    fn schedule_autoplay(&self, state: &mut OverlayState) {
        if state.autoplay_fired {
            return;
        }
        state.autoplay_fired = true;
        let Some(clip) = self.config.clip.clone() else {
            return;
        };
        let overlay = self.this.clone();
        self.engine
            .scheduler()
            .dispatch_after(self.config.autoplay_delay, move || {
                if let Some(overlay) = overlay.upgrade() {
                    overlay.play_ringtone(&clip);
                }
            });
    }
}

impl AudioDevice for RingtoneOverlay {
    fn set_audio_bus(&self, bus: Arc<dyn AudioBus>) -> Result<(), AudioError> {
        self.engine.set_audio_bus(bus)
    }

    fn format(&self) -> AudioFormat {
        self.engine.format()
    }

    fn is_available(&self, direction: Direction) -> bool {
        self.engine.is_available(direction)
    }

    fn initialize(&self, direction: Direction) -> bool {
        self.engine.initialize(direction)
    }

    fn is_initialized(&self, direction: Direction) -> bool {
        self.engine.is_initialized(direction)
    }

    fn start(&self, direction: Direction) -> Result<(), AudioError> {
        let mut state = self.lock_state();
        if state.playing.is_some() {
            state.deferred.push_back(DeferredCommand::start(direction));
            return Ok(());
        }
        let result = self.engine.start(direction);
        if direction == Direction::Capture {
            self.schedule_autoplay(&mut state);
        }
        result
    }

    fn stop(&self, direction: Direction) -> Result<(), AudioError> {
        let mut state = self.lock_state();
        if state.playing.is_some() {
            state.deferred.push_back(DeferredCommand::stop(direction));
            return Ok(());
        }
        self.engine.stop(direction)
    }

    fn is_active(&self, direction: Direction) -> bool {
        self.engine.is_active(direction)
    }

    fn estimated_delay(&self, direction: Direction) -> u16 {
        self.engine.estimated_delay(direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_constructors_match_direction() {
        assert_eq!(
            DeferredCommand::start(Direction::Capture),
            DeferredCommand::StartCapture
        );
        assert_eq!(
            DeferredCommand::stop(Direction::Render),
            DeferredCommand::StopRender
        );
    }
}
