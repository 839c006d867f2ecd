use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::clip::ClipSource;
use crate::audio::delay::DelaySettings;
use crate::audio::engine::EngineConfig;
use crate::audio::ringtone::RingtoneConfig;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 音频配置
    pub sample_rate: u32,
    pub io_buffer_duration_ms: u64,
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub speaker_device: &'static str,

    // 中断恢复
    pub retry_count: u32,
    pub retry_interval_ms: u64,

    // 延迟估计
    pub delay_update_interval: u32,
    pub capture_clamp_ms: u32,
    pub render_clamp_ms: u32,
    pub compensation_us: u32,

    // 铃声 (路径为空表示不自动播放)
    pub ringtone_path: String,
    pub ringtone_device: &'static str,
    pub vibrate: bool,
    pub pulse_period_ms: u64,
    pub autoplay_delay_ms: u64,
    pub ring_timeout_secs: u64,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            sample_rate: env!("AUDIO_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse AUDIO_SAMPLE_RATE")?,
            io_buffer_duration_ms: env!("AUDIO_IO_BUFFER_MS").parse()
                .map_err(|_| "Failed to parse AUDIO_IO_BUFFER_MS")?,
            capture_device: env!("AUDIO_CAPTURE_DEVICE"),
            playback_device: env!("AUDIO_PLAYBACK_DEVICE"),
            speaker_device: env!("AUDIO_SPEAKER_DEVICE"),

            retry_count: env!("RECOVERY_RETRY_COUNT").parse()
                .map_err(|_| "Failed to parse RECOVERY_RETRY_COUNT")?,
            retry_interval_ms: env!("RECOVERY_RETRY_INTERVAL_MS").parse()
                .map_err(|_| "Failed to parse RECOVERY_RETRY_INTERVAL_MS")?,

            delay_update_interval: env!("DELAY_UPDATE_INTERVAL").parse()
                .map_err(|_| "Failed to parse DELAY_UPDATE_INTERVAL")?,
            capture_clamp_ms: env!("DELAY_CAPTURE_CLAMP_MS").parse()
                .map_err(|_| "Failed to parse DELAY_CAPTURE_CLAMP_MS")?,
            render_clamp_ms: env!("DELAY_RENDER_CLAMP_MS").parse()
                .map_err(|_| "Failed to parse DELAY_RENDER_CLAMP_MS")?,
            compensation_us: env!("DELAY_COMPENSATION_US").parse()
                .map_err(|_| "Failed to parse DELAY_COMPENSATION_US")?,

            ringtone_path: env!("RINGTONE_PATH").to_string(),
            ringtone_device: env!("RINGTONE_PLAYBACK_DEVICE"),
            vibrate: env!("RINGTONE_VIBRATE").parse()
                .map_err(|_| "Failed to parse RINGTONE_VIBRATE")?,
            pulse_period_ms: env!("RINGTONE_PULSE_PERIOD_MS").parse()
                .map_err(|_| "Failed to parse RINGTONE_PULSE_PERIOD_MS")?,
            autoplay_delay_ms: env!("RINGTONE_AUTOPLAY_DELAY_MS").parse()
                .map_err(|_| "Failed to parse RINGTONE_AUTOPLAY_DELAY_MS")?,
            ring_timeout_secs: env!("RINGTONE_TIMEOUT_SECS").parse()
                .map_err(|_| "Failed to parse RINGTONE_TIMEOUT_SECS")?,
        })
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            sample_rate: Some(self.sample_rate),
            io_buffer_duration: Duration::from_millis(self.io_buffer_duration_ms),
            retry_count: self.retry_count,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            capture_delay: DelaySettings {
                update_interval: self.delay_update_interval,
                clamp_ms: self.capture_clamp_ms,
                compensation_us: self.compensation_us,
            },
            render_delay: DelaySettings {
                update_interval: self.delay_update_interval,
                clamp_ms: self.render_clamp_ms,
                compensation_us: self.compensation_us,
            },
        }
    }

    pub fn ringtone(&self) -> RingtoneConfig {
        let clip = (!self.ringtone_path.is_empty())
            .then(|| ClipSource::File(PathBuf::from(&self.ringtone_path)));
        RingtoneConfig {
            clip,
            vibrate: self.vibrate,
            pulse_period: Duration::from_millis(self.pulse_period_ms),
            autoplay_delay: Duration::from_millis(self.autoplay_delay_ms),
        }
    }

    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_time_config_parses() {
        let config = Config::new().unwrap();
        assert!(config.sample_rate > 0);
        assert!(config.delay_update_interval > 0);
    }

    #[test]
    fn engine_config_carries_per_direction_clamps() {
        let config = Config::new().unwrap();
        let engine = config.engine();
        assert_eq!(engine.capture_delay.clamp_ms, config.capture_clamp_ms);
        assert_eq!(engine.render_delay.clamp_ms, config.render_clamp_ms);
        assert_eq!(engine.retry_count, config.retry_count);
    }

    #[test]
    fn empty_ringtone_path_disables_autoplay() {
        let mut config = Config::new().unwrap();
        config.ringtone_path.clear();
        assert!(config.ringtone().clip.is_none());
    }
}
