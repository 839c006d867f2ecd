//! Reusable capture buffer: mono, signed 16-bit samples, grow-only.

#[derive(Debug, Default)]
pub struct AudioBuffer {
    samples: Vec<i16>,
    frames: usize,
    reallocations: u64,
}

impl AudioBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a slice of exactly `frames` samples.
    ///
    /// Allocates only when `frames` exceeds the current capacity; smaller or
    /// equal requests reuse the existing storage.
    pub fn ensure_frames(&mut self, frames: usize) -> &mut [i16] {
        if frames > self.samples.len() {
            self.samples = vec![0; frames];
            self.reallocations += 1;
        }
        self.frames = frames;
        &mut self.samples[..frames]
    }

    /// Frames requested by the last callback.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn byte_len(&self) -> usize {
        self.frames * super::AudioFormat::BYTES_PER_SAMPLE
    }

    pub fn capacity_frames(&self) -> usize {
        self.samples.len()
    }

    /// How many times storage has been (re)allocated since construction.
    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }

    /// Frees the storage. The next callback allocates again.
    pub fn release(&mut self) {
        self.samples = Vec::new();
        self.frames = 0;
    }
}
