//! Capture/render delay estimation.
//!
//! Each callback ticks the estimator; every `update_interval` ticks the
//! estimate is recomputed from the session-reported latency, the io buffer
//! duration and the unit latency, minus a fixed compensation, then clamped.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Tuning for one direction's estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelaySettings {
    /// Recompute every this many callbacks.
    pub update_interval: u32,
    /// Upper bound of the reported estimate in milliseconds.
    pub clamp_ms: u32,
    /// Subtracted from the summed latency before conversion to milliseconds.
    pub compensation_us: u32,
}

impl DelaySettings {
    pub const CAPTURE: DelaySettings = DelaySettings {
        update_interval: 100,
        clamp_ms: 500,
        compensation_us: 500,
    };

    pub const RENDER: DelaySettings = DelaySettings {
        update_interval: 100,
        clamp_ms: 150,
        compensation_us: 500,
    };
}

/// Latency components reported by the session at sampling time, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencySample {
    pub device_latency: f64,
    pub io_buffer_duration: f64,
}

#[derive(Debug)]
pub struct DelayEstimator {
    settings: DelaySettings,
    counter: AtomicU32,
    delay_ms: AtomicU32,
    unit_latency_bits: AtomicU64,
}

impl DelayEstimator {
    pub fn new(settings: DelaySettings) -> Self {
        Self {
            settings,
            counter: AtomicU32::new(0),
            delay_ms: AtomicU32::new(0),
            unit_latency_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// Records the latency reported by a freshly built hardware unit.
    pub fn set_unit_latency(&self, seconds: f64) {
        self.unit_latency_bits
            .store(seconds.to_bits(), Ordering::Release);
    }

    pub fn unit_latency(&self) -> f64 {
        f64::from_bits(self.unit_latency_bits.load(Ordering::Acquire))
    }

    /// Called once per callback. `sample` is only invoked on update ticks.
    ///
    /// Returns `true` when the estimate was recomputed.
    pub fn tick(&self, sample: impl FnOnce() -> LatencySample) -> bool {
        let interval = self.settings.update_interval.max(1);
        let count = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if count % interval != 0 {
            return false;
        }
        let sample = sample();
        let delay = compute_delay_ms(
            &[
                sample.device_latency,
                sample.io_buffer_duration,
                self.unit_latency(),
            ],
            self.settings,
        );
        self.delay_ms.store(delay, Ordering::Release);
        true
    }

    /// Current clamped estimate in milliseconds.
    pub fn estimate_ms(&self) -> u16 {
        let clamped = self
            .delay_ms
            .load(Ordering::Acquire)
            .min(self.settings.clamp_ms);
        u16::try_from(clamped).unwrap_or(u16::MAX)
    }
}

/// Sums latency components (seconds) and converts to a clamped millisecond value.
pub fn compute_delay_ms(components: &[f64], settings: DelaySettings) -> u32 {
    let total_us = components
        .iter()
        .fold(0u32, |acc, &secs| acc.saturating_add(seconds_to_us(secs)));
    let ms = total_us.saturating_sub(settings.compensation_us) / 1000;
    ms.min(settings.clamp_ms)
}

fn seconds_to_us(secs: f64) -> u32 {
    if secs.is_finite() && secs > 0.0 {
        // `as` saturates for values beyond u32::MAX.
        (secs * 1_000_000.0) as u32
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(device: f64, io: f64) -> LatencySample {
        LatencySample {
            device_latency: device,
            io_buffer_duration: io,
        }
    }

    #[test]
    fn recomputes_only_every_interval() {
        let est = DelayEstimator::new(DelaySettings::RENDER);
        let mut updates = 0;
        for _ in 0..250 {
            if est.tick(|| sample(0.020, 0.010)) {
                updates += 1;
            }
        }
        assert_eq!(updates, 2);
        // 20ms + 10ms - 0.5ms = 29.5ms, truncated
        assert_eq!(est.estimate_ms(), 29);
    }

    #[test]
    fn includes_unit_latency_and_compensation() {
        let settings = DelaySettings {
            update_interval: 1,
            ..DelaySettings::CAPTURE
        };
        let est = DelayEstimator::new(settings);
        est.set_unit_latency(0.005);
        assert!(est.tick(|| sample(0.010, 0.010)));
        assert_eq!(est.estimate_ms(), 24);
    }

    #[test]
    fn tiny_latency_rounds_to_zero() {
        assert_eq!(compute_delay_ms(&[0.0003], DelaySettings::CAPTURE), 0);
        assert_eq!(compute_delay_ms(&[], DelaySettings::RENDER), 0);
    }

    #[test]
    fn clamps_pathological_inputs() {
        let huge = [1.0e12, f64::MAX, 3600.0];
        assert_eq!(compute_delay_ms(&huge, DelaySettings::CAPTURE), 500);
        assert_eq!(compute_delay_ms(&huge, DelaySettings::RENDER), 150);

        let garbage = [f64::NAN, f64::INFINITY, -5.0];
        assert_eq!(compute_delay_ms(&garbage, DelaySettings::RENDER), 0);

        let est = DelayEstimator::new(DelaySettings {
            update_interval: 1,
            ..DelaySettings::RENDER
        });
        est.set_unit_latency(f64::MAX);
        est.tick(|| sample(1.0e9, 1.0e9));
        assert_eq!(est.estimate_ms(), 150);
    }

    #[test]
    fn counter_wraps_without_panicking() {
        let est = DelayEstimator::new(DelaySettings::CAPTURE);
        est.counter.store(u32::MAX, Ordering::Relaxed);
        est.tick(|| sample(0.0, 0.0));
        est.tick(|| sample(0.0, 0.0));
        assert_eq!(est.counter.load(Ordering::Relaxed), 1);
    }
}
