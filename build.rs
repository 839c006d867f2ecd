use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    audio: Audio,
    recovery: Recovery,
    delay: Delay,
    ringtone: Ringtone,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Audio {
    sample_rate: u32,
    io_buffer_duration_ms: u64,
    capture_device: String,
    playback_device: String,
    speaker_device: String,
}

#[derive(Deserialize)]
struct Recovery {
    retry_count: u32,
    retry_interval_ms: u64,
}

#[derive(Deserialize)]
struct Delay {
    update_interval: u32,
    capture_clamp_ms: u32,
    render_clamp_ms: u32,
    compensation_us: u32,
}

#[derive(Deserialize)]
struct Ringtone {
    path: String,
    playback_device: String,
    vibrate: bool,
    pulse_period_ms: u64,
    autoplay_delay_ms: u64,
    ring_timeout_secs: u64,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 音频配置
    println!("cargo:rustc-env=AUDIO_SAMPLE_RATE={}", config.audio.sample_rate);
    println!("cargo:rustc-env=AUDIO_IO_BUFFER_MS={}", config.audio.io_buffer_duration_ms);
    println!("cargo:rustc-env=AUDIO_CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=AUDIO_SPEAKER_DEVICE={}", config.audio.speaker_device);

    // 中断恢复
    println!("cargo:rustc-env=RECOVERY_RETRY_COUNT={}", config.recovery.retry_count);
    println!("cargo:rustc-env=RECOVERY_RETRY_INTERVAL_MS={}", config.recovery.retry_interval_ms);

    // 延迟估计
    println!("cargo:rustc-env=DELAY_UPDATE_INTERVAL={}", config.delay.update_interval);
    println!("cargo:rustc-env=DELAY_CAPTURE_CLAMP_MS={}", config.delay.capture_clamp_ms);
    println!("cargo:rustc-env=DELAY_RENDER_CLAMP_MS={}", config.delay.render_clamp_ms);
    println!("cargo:rustc-env=DELAY_COMPENSATION_US={}", config.delay.compensation_us);

    // 铃声
    println!("cargo:rustc-env=RINGTONE_PATH={}", config.ringtone.path);
    println!("cargo:rustc-env=RINGTONE_PLAYBACK_DEVICE={}", config.ringtone.playback_device);
    println!("cargo:rustc-env=RINGTONE_VIBRATE={}", config.ringtone.vibrate);
    println!("cargo:rustc-env=RINGTONE_PULSE_PERIOD_MS={}", config.ringtone.pulse_period_ms);
    println!("cargo:rustc-env=RINGTONE_AUTOPLAY_DELAY_MS={}", config.ringtone.autoplay_delay_ms);
    println!("cargo:rustc-env=RINGTONE_TIMEOUT_SECS={}", config.ringtone.ring_timeout_secs);
}
