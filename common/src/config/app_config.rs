use crate::errors::AppError;
use ::config::{Config, Environment, File, Map};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    pub sys: Option<SysConfig>,
    pub kafka: Option<KafkaConfig>,
}

impl AppConfig {
    /// 加载配置：TOML 文件（可缺省）+ 环境变量覆盖
    ///
    /// 环境变量前缀 `APP`，层级分隔符 `__`，例如 `APP_KAFKA__GROUP_ID=my-group`；
    /// `APP_KAFKA__BROKERS` 支持逗号分隔的列表。
    pub fn new(file: &str) -> Result<Self, AppError> {
        Self::load(file, None)
    }

    /// 同 `new`，`env` 为 `Some` 时用给定的变量表代替进程环境
    pub fn load(file: &str, env: Option<Map<String, String>>) -> Result<Self, AppError> {
        let config = Config::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("kafka.brokers")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;
        let cfg = config.try_deserialize::<AppConfig>()?;
        Ok(cfg)
    }

    pub fn get_sys(&self) -> SysConfig {
        self.sys.clone().unwrap_or_default()
    }
    pub fn get_kafka(&self) -> KafkaConfig {
        self.kafka.clone().unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SysConfig {
    //全局日志级别
    pub log_level: String,
}
impl Default for SysConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string() }
    }
}

/// 分区选择策略
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// 选择累计写入字节最少的分区
    #[default]
    LeastBytes,
    RoundRobin,
    /// 按 key 哈希（同 key 同分区）
    Hash,
}

/// broker 驱动
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BrokerDriver {
    #[default]
    Kafka,
    /// 进程内 broker，用于本地演示与测试
    Memory,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    /// 失败后立即重试，无退避、无上限
    #[default]
    Immediate,
    /// 指数退避 + 抖动
    Backoff,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub mode: RetryMode,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}
impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            mode: RetryMode::Immediate,
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
        }
    }
}

pub const DEFAULT_MIN_FETCH_BYTES: usize = 100;
pub const DEFAULT_MAX_FETCH_BYTES: usize = 10_000_000;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
    pub min_fetch_bytes: usize,
    pub max_fetch_bytes: usize,
    pub partition_strategy: PartitionStrategy,
    pub driver: BrokerDriver,
    //消息发送周期（毫秒）
    pub publish_interval_ms: u64,
    pub write_timeout_ms: u64,
    pub message_key: String,
    //memory 驱动的分区数
    pub memory_partitions: i32,
    pub retry: RetryConfig,
}
impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec![],
            topic: String::new(),
            group_id: String::new(),
            min_fetch_bytes: DEFAULT_MIN_FETCH_BYTES,
            max_fetch_bytes: DEFAULT_MAX_FETCH_BYTES,
            partition_strategy: PartitionStrategy::default(),
            driver: BrokerDriver::default(),
            publish_interval_ms: 1000,
            write_timeout_ms: 10_000,
            message_key: "message : ".to_string(),
            memory_partitions: 2,
            retry: RetryConfig::default(),
        }
    }
}
