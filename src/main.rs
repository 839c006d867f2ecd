use std::sync::Arc;
use std::time::Duration;

use duplex_audio_rs::audio::{
    AlsaClipPlayerFactory, AlsaRouting, AlsaSession, AlsaUnitFactory, AudioDevice, AudioEngine,
    Direction, LogHaptics, LoopbackBus, RingtoneOverlay,
};
use duplex_audio_rs::config::Config;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().unwrap_or_default();
    log::info!("{} v{} starting", config.app_name, config.app_version);

    // 会话与设备路由
    let routing = Arc::new(AlsaRouting::new(
        config.capture_device,
        config.playback_device,
        config.speaker_device,
    ));
    let session = Arc::new(AlsaSession::new(routing.clone(), config.sample_rate));
    let units = Arc::new(AlsaUnitFactory::new(routing));

    let engine = AudioEngine::new(session.clone(), units, config.engine())?;
    let overlay = RingtoneOverlay::new(
        engine,
        Arc::new(AlsaClipPlayerFactory::new(config.ringtone_device)),
        Arc::new(LogHaptics),
        config.ringtone(),
    );

    // 回环总线: 采集到的声音直接播放出来 (最多缓存1秒)
    overlay.set_audio_bus(Arc::new(LoopbackBus::new(config.sample_rate as usize)))?;

    // 监听设备插拔
    tokio::spawn(session.clone().watch_routes(Duration::from_secs(2)));

    // 打开设备会阻塞, 放到阻塞线程池
    let starter = overlay.clone();
    tokio::task::spawn_blocking(move || {
        let route = starter.engine().configure_desired_route();
        log::info!("Route: {:?}", route);
        for direction in [Direction::Render, Direction::Capture] {
            if !starter.initialize(direction) {
                log::warn!("{} could not be initialized", direction);
            }
            starter.start(direction)?;
        }
        Ok::<_, duplex_audio_rs::error::AudioError>(())
    })
    .await??;

    // 回车停止铃声
    let ring_stopper = overlay.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(_)) = lines.next_line().await {
            let overlay = ring_stopper.clone();
            let _ = tokio::task::spawn_blocking(move || overlay.stop_ringtone()).await;
        }
    });

    // 超时自动停止铃声
    let ring_timeout = config.ring_timeout();
    let timeout_stopper = overlay.clone();
    tokio::spawn(async move {
        tokio::time::sleep(ring_timeout).await;
        let overlay = timeout_stopper;
        let stopped = tokio::task::spawn_blocking(move || overlay.stop_ringtone()).await;
        if let Ok(true) = stopped {
            log::info!("Ringtone timed out after {:?}", ring_timeout);
        }
    });

    // 定期打印延迟估计
    let reporter = overlay.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            log::info!(
                "capture={} render={} delay: capture={}ms render={}ms",
                reporter.is_active(Direction::Capture),
                reporter.is_active(Direction::Render),
                reporter.estimated_delay(Direction::Capture),
                reporter.estimated_delay(Direction::Render),
            );
        }
    });

    signal::ctrl_c().await?;
    log::info!("Shutting down");

    let overlay_for_shutdown = overlay.clone();
    tokio::task::spawn_blocking(move || {
        overlay_for_shutdown.stop_ringtone();
        for direction in Direction::BOTH {
            if let Err(e) = overlay_for_shutdown.stop(direction) {
                log::warn!("Failed to stop {}: {}", direction, e);
            }
        }
    })
    .await?;

    Ok(())
}
