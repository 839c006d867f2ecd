//! Ringtone clips and the looping ALSA clip player.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use hound::{SampleFormat, WavReader};

use super::alsa_device;
use crate::error::AudioError;

/// Decoded mono clip.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub samples: Arc<[i16]>,
    pub sample_rate: u32,
}

/// Where a ringtone comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ClipSource {
    File(PathBuf),
    Memory(Clip),
}

impl ClipSource {
    pub fn load(&self) -> Result<Clip, AudioError> {
        match self {
            ClipSource::File(path) => load_wav(path),
            ClipSource::Memory(clip) => Ok(clip.clone()),
        }
    }
}

/// Reads a WAV file and downmixes it to mono i16.
pub fn load_wav(path: &Path) -> Result<Clip, AudioError> {
    let clip_err = |reason: String| AudioError::ClipLoad {
        path: path.to_path_buf(),
        reason,
    };

    let reader = WavReader::open(path).map_err(|e| clip_err(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .into_samples::<i16>()
            .collect::<Result<_, _>>()
            .map_err(|e| clip_err(e.to_string()))?,
        (SampleFormat::Int, bits) if bits <= 32 => reader
            .into_samples::<i32>()
            .map(|s| s.map(|v| scale_to_i16(v, bits)))
            .collect::<Result<_, _>>()
            .map_err(|e| clip_err(e.to_string()))?,
        (SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<_, _>>()
            .map_err(|e| clip_err(e.to_string()))?,
        (format, bits) => {
            return Err(clip_err(format!("unsupported sample format {:?}/{}bit", format, bits)));
        }
    };

    let samples: Vec<i16> = interleaved
        .chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect();

    if samples.is_empty() {
        return Err(clip_err("clip contains no samples".to_string()));
    }

    log::info!(
        "Loaded ringtone {}: {} frames at {}Hz ({}ch source)",
        path.display(),
        samples.len(),
        spec.sample_rate,
        channels
    );

    Ok(Clip {
        samples: samples.into(),
        sample_rate: spec.sample_rate,
    })
}

fn scale_to_i16(value: i32, bits: u16) -> i16 {
    if bits >= 16 {
        (value >> (bits - 16)) as i16
    } else {
        (value << (16 - bits)) as i16
    }
}

/// How a looping clip ended on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEnd {
    Finished,
    Failed(String),
}

pub type PlaybackCallback = Box<dyn FnOnce(PlaybackEnd) + Send>;

/// A clip currently playing.
pub trait ClipPlayer: Send {
    /// Stops playback. Must not wait for the player's own thread, since it
    /// may be called from the end-of-playback callback.
    fn stop(&mut self);
}

pub trait ClipPlayerFactory: Send + Sync {
    /// Starts looping `source` indefinitely. `on_end` fires only if playback
    /// ends without [`ClipPlayer::stop`] being called.
    fn play_looped(
        &self,
        source: &ClipSource,
        on_end: PlaybackCallback,
    ) -> Result<Box<dyn ClipPlayer>, AudioError>;
}

/// Vibration (or equivalent) accompaniment for the ringtone.
pub trait Haptics: Send + Sync {
    fn pulse(&self);
}

/// Haptics for devices without a vibration motor.
pub struct LogHaptics;

impl Haptics for LogHaptics {
    fn pulse(&self) {
        log::info!("Ringtone pulse");
    }
}

/// Plays clips on their own ALSA playback device.
pub struct AlsaClipPlayerFactory {
    device: String,
}

impl AlsaClipPlayerFactory {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl ClipPlayerFactory for AlsaClipPlayerFactory {
    fn play_looped(
        &self,
        source: &ClipSource,
        on_end: PlaybackCallback,
    ) -> Result<Box<dyn ClipPlayer>, AudioError> {
        let clip = source.load()?;
        let running = Arc::new(AtomicBool::new(true));
        let device = self.device.clone();

        {
            let running = running.clone();
            thread::Builder::new()
                .name("ringtone-play".into())
                .spawn(move || {
                    let end = match play_loop(&device, &clip, &running) {
                        Ok(()) => PlaybackEnd::Finished,
                        Err(e) => PlaybackEnd::Failed(format!("{:#}", e)),
                    };
                    // An explicit stop is not reported back.
                    if running.swap(false, Ordering::SeqCst) {
                        on_end(end);
                    }
                })
                .map_err(|e| AudioError::ClipPlayback(e.to_string()))?;
        }

        Ok(Box::new(AlsaClipPlayer { running }))
    }
}

struct AlsaClipPlayer {
    running: Arc<AtomicBool>,
}

impl ClipPlayer for AlsaClipPlayer {
    fn stop(&mut self) {
        // The playback thread notices within one period and exits on its own.
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for AlsaClipPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn play_loop(device: &str, clip: &Clip, running: &AtomicBool) -> anyhow::Result<()> {
    let (pcm, params) = alsa_device::open_playback(device, clip.sample_rate, None)?;
    let io = pcm.io_i16()?;
    let period = params.period_size.max(1);

    let mut position = 0;
    while running.load(Ordering::Relaxed) {
        let end = (position + period).min(clip.samples.len());
        let chunk = &clip.samples[position..end];
        match io.writei(chunk) {
            Ok(n) => position += n,
            Err(e) => {
                log::warn!("Ringtone playback error: {}, recovering...", e);
                pcm.prepare()?;
            }
        }
        if position >= clip.samples.len() {
            position = 0;
        }
    }

    let _ = pcm.drop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};
    use tempfile::tempdir;

    #[test]
    fn loads_stereo_wav_as_mono() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ring.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for (l, r) in [(100i16, 300i16), (-200, -400), (0, 10)] {
            writer.write_sample(l).unwrap();
            writer.write_sample(r).unwrap();
        }
        writer.finalize().unwrap();

        let clip = load_wav(&path).unwrap();
        assert_eq!(clip.sample_rate, 16000);
        assert_eq!(&*clip.samples, &[200, -300, 5]);
    }

    #[test]
    fn scales_24_bit_samples() {
        assert_eq!(scale_to_i16(0x7F_FFFF, 24), i16::MAX);
        assert_eq!(scale_to_i16(-0x80_0000, 24), i16::MIN);
        assert_eq!(scale_to_i16(127, 8), 127 << 8);
    }

    #[test]
    fn missing_file_is_clip_load_error() {
        let err = load_wav(Path::new("/definitely/not/here.wav")).unwrap_err();
        assert!(matches!(err, AudioError::ClipLoad { .. }));
    }

    #[test]
    fn empty_wav_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        WavWriter::create(&path, spec).unwrap().finalize().unwrap();
        assert!(load_wav(&path).is_err());
    }

    #[test]
    fn memory_source_returns_clip() {
        let clip = Clip {
            samples: vec![1, 2, 3].into(),
            sample_rate: 8000,
        };
        let loaded = ClipSource::Memory(clip.clone()).load().unwrap();
        assert_eq!(loaded, clip);
    }
}
