use crate::error::MqError;
use crate::kafka_util::broker::{BrokerReader, BrokerWriter};
use crate::kafka_util::kafka_consumer::KafkaReader;
use crate::kafka_util::kafka_producer::KafkaWriter;
use crate::kafka_util::memory_broker::MemoryBroker;
use crate::service::consumer::Consumer;
use crate::service::process_job::{LogHandler, MessageHandler, ProcessLoop, ProcessStats};
use crate::service::producer::Producer;
use crate::service::publish_job::{PublishLoop, PublishStats};
use crate::service::retry_policy::RetryPolicy;
use common::config::{BrokerDriver, ClientConfig, KafkaConfig};
use common::errors::AppError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 循环运行参数
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub driver: BrokerDriver,
    pub publish_interval: Duration,
    pub write_timeout: Duration,
    pub message_key: String,
    pub memory_partitions: i32,
    pub retry: RetryPolicy,
}

impl LoopSettings {
    pub fn from_kafka(cfg: &KafkaConfig) -> Result<Self, AppError> {
        if cfg.publish_interval_ms == 0 {
            return Err(AppError::Config("publish_interval_ms must be positive".to_string()));
        }
        if cfg.memory_partitions < 1 {
            return Err(AppError::Config("memory_partitions must be at least 1".to_string()));
        }
        Ok(Self {
            driver: cfg.driver,
            publish_interval: Duration::from_millis(cfg.publish_interval_ms),
            write_timeout: Duration::from_millis(cfg.write_timeout_ms.max(1)),
            message_key: cfg.message_key.clone(),
            memory_partitions: cfg.memory_partitions,
            retry: RetryPolicy::from_config(&cfg.retry),
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorReport {
    pub publish: PublishStats,
    pub process: ProcessStats,
}

/// 启动发送与消费两个独立任务，阻塞到收到停止信号
#[derive(Debug)]
pub struct Supervisor {
    config: ClientConfig,
    settings: LoopSettings,
}

impl Supervisor {
    /// 校验配置；brokers / topic / group_id 任一为空即返回配置错误
    pub fn new(cfg: &KafkaConfig) -> Result<Self, AppError> {
        let config = ClientConfig::from_kafka(cfg)?;
        let settings = LoopSettings::from_kafka(cfg)?;
        Ok(Self { config, settings })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// 按配置的驱动打开连接并运行
    pub async fn start<F>(&self, shutdown: F) -> Result<SupervisorReport, MqError>
    where
        F: Future<Output = ()> + Send,
    {
        match self.settings.driver {
            BrokerDriver::Kafka => {
                let writer = KafkaWriter::open(&self.config)?;
                let reader = KafkaReader::open(&self.config)?;
                Ok(self.run(writer, reader, LogHandler, shutdown).await)
            }
            BrokerDriver::Memory => {
                log::warn!(
                    "using in-memory broker, topic [{}] with {} partitions",
                    self.config.topic(),
                    self.settings.memory_partitions
                );
                let broker = MemoryBroker::new(self.config.topic(), self.settings.memory_partitions);
                let reader = broker.reader(self.config.group_id());
                Ok(self.run(broker, reader, LogHandler, shutdown).await)
            }
        }
    }

    /// 运行两个循环，`shutdown` 完成后取消并等待两者退出。
    ///
    /// 传入 `std::future::pending()` 即永久运行。
    pub async fn run<W, R, H, F>(&self, writer: W, reader: R, handler: H, shutdown: F) -> SupervisorReport
    where
        W: BrokerWriter + 'static,
        R: BrokerReader + 'static,
        H: MessageHandler + 'static,
        F: Future<Output = ()> + Send,
    {
        let token = CancellationToken::new();

        let producer = Producer::new(writer, self.config.topic(), self.config.partition_strategy())
            .with_write_timeout(self.settings.write_timeout);
        let publish = PublishLoop::new(producer, self.settings.publish_interval, self.settings.message_key.clone())
            .with_retry(self.settings.retry);
        let process = ProcessLoop::new(Consumer::new(reader), handler).with_retry(self.settings.retry);

        let publish_handle = tokio::spawn(publish.run(token.clone()));
        let process_handle = tokio::spawn(process.run(token.clone()));
        log::info!(
            "supervisor started => topic={}, group={}, brokers={:?}",
            self.config.topic(),
            self.config.group_id(),
            self.config.brokers()
        );

        shutdown.await;
        log::warn!("🛑 shutdown signal received, stopping loops");
        token.cancel();

        let (publish, process) = tokio::join!(publish_handle, process_handle);
        let report = SupervisorReport {
            publish: publish.unwrap_or_else(|e| {
                log::error!("❌ publish loop panicked: {:?}", e);
                PublishStats::default()
            }),
            process: process.unwrap_or_else(|e| {
                log::error!("❌ process loop panicked: {:?}", e);
                ProcessStats::default()
            }),
        };
        log::info!("supervisor stopped: {:?}", report);
        report
    }
}
