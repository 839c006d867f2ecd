//! ALSA hardware units.
//!
//! Each running unit owns a dedicated OS thread (not a tokio task) that
//! blocks on the PCM one period at a time and drives the engine's
//! real-time callbacks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use alsa::pcm::PCM;
use anyhow::Result;

use super::alsa_device::{self, AlsaParams};
use super::alsa_session::AlsaRouting;
use super::format::{AudioFormat, Direction};
use super::realtime::{CallbackStatus, RealtimeContext};
use super::unit::{HardwareUnit, UnitFactory};
use crate::error::AudioError;

/// Consecutive write failures tolerated before a render block is dropped.
const MAX_WRITE_RETRIES: u32 = 3;

pub struct AlsaUnitFactory {
    routing: Arc<AlsaRouting>,
    open_attempts: u32,
    open_spacing: Duration,
}

impl AlsaUnitFactory {
    pub fn new(routing: Arc<AlsaRouting>) -> Self {
        Self {
            routing,
            open_attempts: 5,
            open_spacing: Duration::from_millis(100),
        }
    }
}

impl UnitFactory for AlsaUnitFactory {
    fn create(
        &self,
        direction: Direction,
        format: AudioFormat,
        io_buffer_frames: usize,
        context: RealtimeContext,
    ) -> Result<Box<dyn HardwareUnit>, AudioError> {
        let device = self.routing.device_for(direction);
        let (pcm, params) = alsa_device::open_with_retry(self.open_attempts, self.open_spacing, || {
            match direction {
                Direction::Capture => {
                    alsa_device::open_capture(&device, format.sample_rate, io_buffer_frames)
                }
                Direction::Render => {
                    alsa_device::open_playback(&device, format.sample_rate, Some(io_buffer_frames))
                }
            }
        })
        .map_err(|e| AudioError::unit_setup(direction, format!("{:#}", e)))?;

        if params.sample_rate != format.sample_rate || params.channels != 1 {
            log::warn!(
                "ALSA {} negotiated {}Hz/{}ch, expected {}Hz mono",
                direction,
                params.sample_rate,
                params.channels,
                format.sample_rate
            );
        }

        Ok(Box::new(AlsaUnit {
            direction,
            device,
            pcm: Some(pcm),
            params,
            context,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }))
    }
}

pub struct AlsaUnit {
    direction: Direction,
    device: String,
    pcm: Option<PCM>,
    params: AlsaParams,
    context: RealtimeContext,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<PCM>>,
}

impl HardwareUnit for AlsaUnit {
    fn start(&mut self) -> Result<(), AudioError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let pcm = self
            .pcm
            .take()
            .ok_or_else(|| AudioError::unit_start(self.direction, "PCM handle lost"))?;

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let context = self.context.clone();
        let period = self.params.period_size.max(1);
        let direction = self.direction;

        let worker = thread::Builder::new()
            .name(format!("audio-{}", direction))
            .spawn(move || {
                let result = match direction {
                    Direction::Capture => capture_loop(&pcm, period, &context, &running),
                    Direction::Render => render_loop(&pcm, period, &context, &running),
                };
                if let Err(e) = result {
                    log::error!("ALSA {} thread error: {:#}", direction, e);
                }
                pcm
            })
            .map_err(|e| AudioError::unit_start(self.direction, e.to_string()))?;

        self.worker = Some(worker);
        log::debug!("ALSA {} unit started on {}", self.direction, self.device);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        self.running.store(false, Ordering::SeqCst);
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let pcm = worker
            .join()
            .map_err(|_| AudioError::unit_start(self.direction, "I/O thread panicked"))?;
        // Discard pending frames and leave the PCM ready for the next start.
        if let Err(e) = pcm.drop() {
            log::debug!("ALSA {} drop: {}", self.direction, e);
        }
        if let Err(e) = pcm.prepare() {
            log::warn!("ALSA {} prepare after stop: {}", self.direction, e);
        }
        self.pcm = Some(pcm);
        log::debug!("ALSA {} unit stopped", self.direction);
        Ok(())
    }

    fn latency(&self) -> f64 {
        self.params.buffer_latency()
    }
}

impl Drop for AlsaUnit {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn capture_loop(
    pcm: &PCM,
    period: usize,
    context: &RealtimeContext,
    running: &AtomicBool,
) -> Result<()> {
    let io = pcm.io_i16()?;
    log::info!("Capture thread running: period={}", period);

    while running.load(Ordering::Relaxed) {
        let status = context.on_capture(period, |samples| io.readi(samples));
        if status == CallbackStatus::PullFailed {
            if let Err(e) = pcm.prepare() {
                log::error!("Failed to recover PCM capture: {}", e);
                break;
            }
        }
    }

    log::info!("Capture thread exiting");
    Ok(())
}

fn render_loop(
    pcm: &PCM,
    period: usize,
    context: &RealtimeContext,
    running: &AtomicBool,
) -> Result<()> {
    let io = pcm.io_i16()?;
    let mut block = vec![0i16; period];
    log::info!("Render thread running: period={}", period);

    while running.load(Ordering::Relaxed) {
        context.on_render(&mut block);

        // Short writes and XRUNs: recover and keep writing the rest of the block.
        let mut frames_written = 0;
        let mut retry_count = 0u32;
        while frames_written < block.len() {
            match io.writei(&block[frames_written..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        return Err(e2.into());
                    }
                    if retry_count >= MAX_WRITE_RETRIES {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            block.len() - frames_written
                        );
                        break;
                    }
                }
            }
        }
    }

    log::info!("Render thread exiting");
    Ok(())
}
