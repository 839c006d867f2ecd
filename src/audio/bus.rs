//! The audio bus: the communications engine's side of the driver.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Consumer of captured audio and producer of audio to render.
///
/// Both methods are called from real-time I/O threads and must not block.
pub trait AudioBus: Send + Sync {
    /// Hands a block of captured mono samples to the engine.
    fn write_capture_data(&self, samples: &[i16]);

    /// Fills `out` with samples to play; returns the number of frames written.
    fn read_render_data(&self, out: &mut [i16]) -> usize;
}

/// Bus that plays captured audio straight back out.
///
/// Backed by a lock-free SPSC ring: the capture thread only touches the
/// producer half and the render thread only the consumer half, so neither
/// side waits on the other. Samples that do not fit are dropped and counted.
pub struct LoopbackBus {
    // Each half is locked only by its own I/O thread.
    producer: Mutex<HeapProd<i16>>,
    consumer: Mutex<HeapCons<i16>>,
    overflow_count: AtomicU64,
}

impl LoopbackBus {
    /// `capacity` is in samples and is raised to at least one.
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = HeapRb::<i16>::new(capacity.max(1)).split();
        Self {
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
            overflow_count: AtomicU64::new(0),
        }
    }

    pub fn buffered(&self) -> usize {
        self.consumer.lock().occupied_len()
    }

    /// Captured samples dropped because the render side fell behind.
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }
}

impl AudioBus for LoopbackBus {
    fn write_capture_data(&self, samples: &[i16]) {
        let pushed = self.producer.lock().push_slice(samples);
        let dropped = samples.len() - pushed;
        if dropped > 0 {
            let total = self
                .overflow_count
                .fetch_add(dropped as u64, Ordering::Relaxed)
                + dropped as u64;
            log::debug!("Loopback bus full: dropped {} samples ({} total)", dropped, total);
        }
    }

    fn read_render_data(&self, out: &mut [i16]) -> usize {
        self.consumer.lock().pop_slice(out)
    }
}
