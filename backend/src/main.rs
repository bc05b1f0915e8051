use camera_backup::{AppConfig, BackupContext, CameraBackup, DeviceFingerprint, RunOutcome};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志系统
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    info!("Camera Backup v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let config_path = AppConfig::config_path();
    let config = AppConfig::load_or_default(&config_path).await;
    if let Err(e) = config.validate() {
        error!("配置无效: {}", e);
        anyhow::bail!("invalid config {}: {}", config_path, e);
    }

    let device = DeviceFingerprint::detect();
    info!("设备指纹: {}", device);

    let ctx = BackupContext::from_config(&config, device)?;
    let backup = CameraBackup::new(ctx);
    let report = backup.run_once().await;

    match report.outcome {
        RunOutcome::Completed => info!("本次备份完成"),
        RunOutcome::StoppedOnFailure => {
            if let Some(failed) = &report.failed_file {
                error!("本次备份因文件失败提前结束: {}", failed);
            }
        }
        RunOutcome::DestinationUnavailable => error!("备份目录不可用"),
        RunOutcome::StagingUnavailable => error!("暂存目录不可用"),
    }

    Ok(())
}
