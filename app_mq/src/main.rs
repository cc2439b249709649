use biz_mq::manager::supervisor::Supervisor;
use common::config::AppConfig;
use common::errors::AppError;
use log::{LevelFilter, warn};
use std::str::FromStr;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let file = std::env::args().nth(1).unwrap_or_else(|| "mq-config.toml".to_string());
    let app_cfg = AppConfig::new(&file)?;
    //初始化日志
    init_log(&app_cfg)?;

    let kafka_cfg = app_cfg.get_kafka();
    let supervisor = Supervisor::new(&kafka_cfg)?;
    warn!(
        "Starting mq client => brokers={:?}, topic={}, group={}",
        supervisor.config().brokers(),
        supervisor.config().topic(),
        supervisor.config().group_id()
    );

    let report = supervisor.start(shutdown_signal()).await?;
    warn!(
        "mq client stopped: published={}, committed={}, skipped={}, failed={}",
        report.publish.published,
        report.process.committed,
        report.process.skipped,
        report.process.failed + report.publish.failed
    );
    Ok(())
}

pub fn init_log(config: &AppConfig) -> Result<(), AppError> {
    let log_level = &config.get_sys().log_level;
    let level = LevelFilter::from_str(log_level)
        .map_err(|e| AppError::Config(format!("invalid log_level {log_level:?}: {e}")))?;
    env_logger::Builder::new()
        .filter(None, level)
        .try_init()
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(())
}

/// Ctrl-C 触发优雅退出；监听失败则永久运行
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("❌ failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
