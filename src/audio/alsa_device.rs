//! ALSA PCM device wrappers for mono S16 capture and playback.

use std::thread;
use std::time::Duration;

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames
    pub period_size: usize,
    /// Ring buffer size in frames
    pub buffer_size: usize,
}

impl AlsaParams {
    /// Latency of one full hardware buffer, in seconds.
    pub fn buffer_latency(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.buffer_size as f64 / self.sample_rate as f64
    }
}

/// Open a PCM device for capture (recording).
pub fn open_capture(device: &str, sample_rate: u32, period_size: usize) -> Result<(PCM, AlsaParams)> {
    open_pcm(device, Direction::Capture, sample_rate, 1, Some(period_size), "Capture")
}

/// Open a PCM device for playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    open_pcm(device, Direction::Playback, sample_rate, 1, period_size, "Playback")
}

/// Retries `open` up to `attempts` times, `spacing` apart.
///
/// Devices that were just released (e.g. after a route change) can stay busy
/// for a short while.
pub fn open_with_retry<T>(
    attempts: u32,
    spacing: Duration,
    mut open: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut result = open();
    let mut tries = 1;
    while result.is_err() && tries < attempts {
        thread::sleep(spacing);
        result = open();
        tries += 1;
    }
    result
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
    dir_name: &str,
) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    // Configure hardware parameters
    {
        let hwp =
            HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    // Read back actual negotiated parameters
    let params = {
        let hwp = pcm.hw_params_current()?;
        AlsaParams {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
            buffer_size: hwp.get_buffer_size()? as usize,
        }
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}, buffer_size={}",
        dir_name,
        device,
        params.sample_rate,
        params.channels,
        params.period_size,
        params.buffer_size,
    );

    Ok((pcm, params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_with_retry_stops_on_first_success() {
        let mut calls = 0;
        let value = open_with_retry(5, Duration::from_millis(1), || {
            calls += 1;
            if calls < 3 {
                anyhow::bail!("busy")
            }
            Ok(calls)
        })
        .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn open_with_retry_gives_up() {
        let mut calls = 0;
        let result: Result<()> = open_with_retry(5, Duration::from_millis(1), || {
            calls += 1;
            anyhow::bail!("busy")
        });
        assert!(result.is_err());
        assert_eq!(calls, 5);
    }

    #[test]
    fn buffer_latency_in_seconds() {
        let params = AlsaParams {
            sample_rate: 48000,
            channels: 1,
            period_size: 480,
            buffer_size: 960,
        };
        assert!((params.buffer_latency() - 0.02).abs() < 1e-9);
    }
}
