use thiserror::Error;

/// 启动阶段错误类型
///
/// 配置相关错误（`Config` / `Validation` / `Source`）在启动时直接失败，
/// 由进程退出路径返回非零退出码。
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("configuration source error: {0}")]
    Source(#[from] ::config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// 是否属于配置错误（启动即失败）
    pub fn is_config(&self) -> bool {
        matches!(self, AppError::Config(_) | AppError::Validation(_) | AppError::Source(_))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}
