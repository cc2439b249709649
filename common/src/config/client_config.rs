use super::{KafkaConfig, PartitionStrategy, DEFAULT_MAX_FETCH_BYTES, DEFAULT_MIN_FETCH_BYTES};
use crate::errors::AppError;
use std::borrow::Cow;
use validator::{Validate, ValidationError};

/// 客户端连接配置
///
/// 构造时校验一次，之后不可变：只暴露只读访问器。
#[derive(Debug, Clone, Validate)]
#[validate(schema(function = "validate_fetch_bounds"))]
pub struct ClientConfig {
    #[validate(custom(function = "validate_brokers"))]
    brokers: Vec<String>,
    #[validate(length(min = 1, message = "topic must not be empty"))]
    topic: String,
    #[validate(length(min = 1, message = "group_id must not be empty"))]
    group_id: String,
    min_fetch_bytes: usize,
    max_fetch_bytes: usize,
    partition_strategy: PartitionStrategy,
}

impl ClientConfig {
    /// 使用默认拉取阈值和分区策略构造
    pub fn new(
        brokers: Vec<String>,
        topic: impl Into<String>,
        group_id: impl Into<String>,
    ) -> Result<Self, AppError> {
        Self::checked(Self {
            brokers,
            topic: topic.into(),
            group_id: group_id.into(),
            min_fetch_bytes: DEFAULT_MIN_FETCH_BYTES,
            max_fetch_bytes: DEFAULT_MAX_FETCH_BYTES,
            partition_strategy: PartitionStrategy::default(),
        })
    }

    pub fn from_kafka(cfg: &KafkaConfig) -> Result<Self, AppError> {
        Self::checked(Self {
            brokers: cfg.brokers.clone(),
            topic: cfg.topic.clone(),
            group_id: cfg.group_id.clone(),
            min_fetch_bytes: cfg.min_fetch_bytes,
            max_fetch_bytes: cfg.max_fetch_bytes,
            partition_strategy: cfg.partition_strategy,
        })
    }

    fn checked(cfg: Self) -> Result<Self, AppError> {
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn brokers(&self) -> &[String] {
        &self.brokers
    }
    /// 写入端只连接第一个 broker 做 bootstrap
    pub fn bootstrap(&self) -> &str {
        &self.brokers[0]
    }
    pub fn topic(&self) -> &str {
        &self.topic
    }
    pub fn group_id(&self) -> &str {
        &self.group_id
    }
    pub fn min_fetch_bytes(&self) -> usize {
        self.min_fetch_bytes
    }
    pub fn max_fetch_bytes(&self) -> usize {
        self.max_fetch_bytes
    }
    pub fn partition_strategy(&self) -> PartitionStrategy {
        self.partition_strategy
    }
}

fn validate_brokers(brokers: &Vec<String>) -> Result<(), ValidationError> {
    if brokers.is_empty() {
        return Err(ValidationError::new("brokers_empty")
            .with_message(Cow::from("at least one broker address is required")));
    }
    if brokers.iter().any(|b| b.trim().is_empty()) {
        return Err(ValidationError::new("broker_blank")
            .with_message(Cow::from("broker address must not be blank")));
    }
    Ok(())
}

fn validate_fetch_bounds(cfg: &ClientConfig) -> Result<(), ValidationError> {
    if cfg.min_fetch_bytes == 0 || cfg.min_fetch_bytes > cfg.max_fetch_bytes {
        return Err(ValidationError::new("fetch_bounds")
            .with_message(Cow::from("require 1 <= min_fetch_bytes <= max_fetch_bytes")));
    }
    Ok(())
}
