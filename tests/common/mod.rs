//! Test doubles for the platform seams.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use duplex_audio_rs::audio::bus::AudioBus;
use duplex_audio_rs::audio::clip::{
    ClipPlayer, ClipPlayerFactory, ClipSource, Haptics, PlaybackCallback, PlaybackEnd,
};
use duplex_audio_rs::audio::engine::{AudioEngine, EngineConfig};
use duplex_audio_rs::audio::format::{AudioFormat, Direction};
use duplex_audio_rs::audio::realtime::RealtimeContext;
use duplex_audio_rs::audio::session::{
    AudioPort, AudioSession, RouteDescription, SessionConfig, SessionEvent, SessionSnapshot,
};
use duplex_audio_rs::audio::unit::{HardwareUnit, UnitFactory};
use duplex_audio_rs::error::AudioError;
use tokio::sync::mpsc;

pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// ======================== Session ========================

#[derive(Default)]
pub struct MockSession {
    pub configures: AtomicU32,
    pub restores: AtomicU32,
    pub active: AtomicBool,
    pub fail_configure: AtomicBool,
    pub subscriptions: AtomicU32,
    latency_bits: AtomicU64,
    inputs: Mutex<Vec<AudioPort>>,
    outputs: Mutex<Vec<AudioPort>>,
    pub preferred_input: Mutex<Option<String>>,
    pub speaker_overrides: AtomicU32,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
}

impl MockSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reported input/output latency in seconds.
    pub fn set_latency(&self, seconds: f64) {
        self.latency_bits.store(seconds.to_bits(), Ordering::SeqCst);
    }

    pub fn set_inputs(&self, ports: Vec<AudioPort>) {
        *self.inputs.lock().unwrap() = ports;
    }

    pub fn set_outputs(&self, ports: Vec<AudioPort>) {
        *self.outputs.lock().unwrap() = ports;
    }

    pub fn emit(&self, event: SessionEvent) {
        for tx in self.subscribers.lock().unwrap().iter() {
            let _ = tx.send(event);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl AudioSession for MockSession {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::default()
    }

    fn configure(&self, _config: &SessionConfig) -> Result<(), AudioError> {
        if self.fail_configure.load(Ordering::SeqCst) {
            return Err(AudioError::session("configure refused"));
        }
        self.configures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn restore(&self, _snapshot: &SessionSnapshot) -> Result<(), AudioError> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_active(&self, active: bool) -> Result<(), AudioError> {
        self.active.store(active, Ordering::SeqCst);
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        48000
    }

    fn input_latency(&self) -> f64 {
        f64::from_bits(self.latency_bits.load(Ordering::SeqCst))
    }

    fn output_latency(&self) -> f64 {
        f64::from_bits(self.latency_bits.load(Ordering::SeqCst))
    }

    fn io_buffer_duration(&self) -> f64 {
        0.010
    }

    fn available_inputs(&self) -> Vec<AudioPort> {
        self.inputs.lock().unwrap().clone()
    }

    fn set_preferred_input(&self, port: &AudioPort) -> Result<(), AudioError> {
        *self.preferred_input.lock().unwrap() = Some(port.name.clone());
        Ok(())
    }

    fn override_output_to_speaker(&self) -> Result<(), AudioError> {
        self.speaker_overrides.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn current_route(&self) -> RouteDescription {
        RouteDescription {
            inputs: self.inputs.lock().unwrap().clone(),
            outputs: self.outputs.lock().unwrap().clone(),
        }
    }

    fn subscribe(&self, events: mpsc::UnboundedSender<SessionEvent>) {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().unwrap().push(events);
    }
}

// ======================== Units ========================

#[derive(Default)]
pub struct UnitCounters {
    pub created: AtomicU32,
    pub started: AtomicU32,
    pub failed_starts: AtomicU32,
    pub stopped: AtomicU32,
    pub disposed: AtomicU32,
}

#[derive(Default)]
pub struct MockUnits {
    pub capture: Arc<UnitCounters>,
    pub render: Arc<UnitCounters>,
    fail_start: Arc<AtomicBool>,
    pub latency: f64,
}

impl MockUnits {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn counters(&self, direction: Direction) -> &Arc<UnitCounters> {
        match direction {
            Direction::Capture => &self.capture,
            Direction::Render => &self.render,
        }
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }
}

impl UnitFactory for MockUnits {
    fn create(
        &self,
        direction: Direction,
        _format: AudioFormat,
        _io_buffer_frames: usize,
        _context: RealtimeContext,
    ) -> Result<Box<dyn HardwareUnit>, AudioError> {
        let counters = self.counters(direction).clone();
        counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockUnit {
            direction,
            counters,
            fail_start: self.fail_start.clone(),
            latency: self.latency,
        }))
    }
}

struct MockUnit {
    direction: Direction,
    counters: Arc<UnitCounters>,
    fail_start: Arc<AtomicBool>,
    latency: f64,
}

impl HardwareUnit for MockUnit {
    fn start(&mut self) -> Result<(), AudioError> {
        if self.fail_start.load(Ordering::SeqCst) {
            self.counters.failed_starts.fetch_add(1, Ordering::SeqCst);
            return Err(AudioError::unit_start(self.direction, "hardware busy"));
        }
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn latency(&self) -> f64 {
        self.latency
    }
}

impl Drop for MockUnit {
    fn drop(&mut self) {
        self.counters.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

// ======================== Bus ========================

#[derive(Default)]
pub struct RecordingBus {
    pub captured: Mutex<Vec<i16>>,
    pub render_value: i16,
}

impl AudioBus for RecordingBus {
    fn write_capture_data(&self, samples: &[i16]) {
        self.captured.lock().unwrap().extend_from_slice(samples);
    }

    fn read_render_data(&self, out: &mut [i16]) -> usize {
        out.fill(self.render_value);
        out.len()
    }
}

// ======================== Ringtone ========================

#[derive(Default)]
pub struct MockPlayers {
    pub plays: AtomicU32,
    pub stops: Arc<AtomicU32>,
    pub fail: AtomicBool,
    on_end: Mutex<Vec<Option<PlaybackCallback>>>,
}

impl MockPlayers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulates the `index`th player's clip ending on its own.
    pub fn finish(&self, index: usize, end: PlaybackEnd) {
        let callback = self
            .on_end
            .lock()
            .unwrap()
            .get_mut(index)
            .and_then(Option::take);
        if let Some(callback) = callback {
            callback(end);
        }
    }
}

impl ClipPlayerFactory for MockPlayers {
    fn play_looped(
        &self,
        _source: &ClipSource,
        on_end: PlaybackCallback,
    ) -> Result<Box<dyn ClipPlayer>, AudioError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AudioError::ClipPlayback("cannot decode clip".into()));
        }
        self.plays.fetch_add(1, Ordering::SeqCst);
        self.on_end.lock().unwrap().push(Some(on_end));
        Ok(Box::new(MockPlayer {
            stops: self.stops.clone(),
        }))
    }
}

struct MockPlayer {
    stops: Arc<AtomicU32>,
}

impl ClipPlayer for MockPlayer {
    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct CountingHaptics {
    pub pulses: AtomicU32,
}

impl Haptics for CountingHaptics {
    fn pulse(&self) {
        self.pulses.fetch_add(1, Ordering::SeqCst);
    }
}

// ======================== Setup ========================

pub fn fast_config() -> EngineConfig {
    EngineConfig {
        sample_rate: Some(48000),
        retry_interval: Duration::from_millis(5),
        ..EngineConfig::default()
    }
}

pub fn engine_with(
    session: &Arc<MockSession>,
    units: &Arc<MockUnits>,
    config: EngineConfig,
) -> Arc<AudioEngine> {
    AudioEngine::new(session.clone(), units.clone(), config).unwrap()
}
