//! Direction and sample format shared by the engine and its backends.

use std::fmt;

/// One of the two independent audio paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Microphone to bus.
    Capture,
    /// Bus to speaker.
    Render,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Capture, Direction::Render];

    /// The opposite path.
    pub fn other(self) -> Direction {
        match self {
            Direction::Capture => Direction::Render,
            Direction::Render => Direction::Capture,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Capture => f.write_str("capture"),
            Direction::Render => f.write_str("render"),
        }
    }
}

/// Sample format exchanged with the audio bus: always signed 16-bit linear PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub const BYTES_PER_SAMPLE: usize = 2;

    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }

    /// Frames covered by `duration_secs` at this rate, never less than one.
    pub fn frames_for(&self, duration_secs: f64) -> usize {
        ((self.sample_rate as f64 * duration_secs).round() as usize).max(1)
    }
}
