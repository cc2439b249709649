use crate::entitys::message_entity::Message;
use crate::error::{MqError, PublishError};
use crate::kafka_util::broker::BrokerWriter;
use async_trait::async_trait;
use common::config::ClientConfig;
use futures::future::try_join_all;
use rdkafka::ClientConfig as KafkaClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

//本地队列满时的等待时间
const QUEUE_TIMEOUT: Duration = Duration::from_millis(50);
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const METADATA_TTL: Duration = Duration::from_secs(30);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// 基于 rdkafka `FutureProducer` 的写入端
pub struct KafkaWriter {
    producer: FutureProducer,
    broker_addr: String,
    //分区元数据缓存
    partitions: RwLock<Option<(Instant, Vec<i32>)>>,
}

impl fmt::Debug for KafkaWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaWriter")
            .field("broker_addr", &self.broker_addr)
            .field("producer", &"FutureProducer(...)")
            .finish()
    }
}

impl KafkaWriter {
    /// 连接第一个 broker 作为 bootstrap
    pub fn open(config: &ClientConfig) -> Result<Self, MqError> {
        let broker_addr = config.bootstrap().to_string();
        let producer: FutureProducer = KafkaClientConfig::new()
            .set("bootstrap.servers", &broker_addr)
            // leader 确认即返回
            .set("acks", "1")
            .set("message.timeout.ms", "30000")
            .set("queue.buffering.max.ms", "5")
            .create()
            .map_err(MqError::classify)?;
        log::info!("✅ Kafka producer created, bootstrap [{}]", broker_addr);
        Ok(Self {
            producer,
            broker_addr,
            partitions: RwLock::new(None),
        })
    }

    async fn fetch_partitions(&self, topic: &str) -> Result<Vec<i32>, MqError> {
        let producer = self.producer.clone();
        let topic_name = topic.to_string();
        // fetch_metadata 是阻塞调用
        tokio::task::spawn_blocking(move || -> Result<Vec<i32>, MqError> {
            let metadata = producer
                .client()
                .fetch_metadata(Some(topic_name.as_str()), METADATA_TIMEOUT)
                .map_err(MqError::classify)?;
            let topic_meta = metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic_name)
                .ok_or_else(|| MqError::UnknownTopic(topic_name.clone()))?;
            if let Some(err) = topic_meta.error() {
                return Err(MqError::UnknownTopic(format!("{topic_name}: {err:?}")));
            }
            Ok(topic_meta.partitions().iter().map(|p| p.id()).collect())
        })
        .await
        .map_err(|e| MqError::Connectivity(format!("metadata task failed: {e}")))?
    }
}

#[async_trait]
impl BrokerWriter for KafkaWriter {
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, MqError> {
        if let Some((at, ids)) = self.partitions.read().await.as_ref() {
            if at.elapsed() < METADATA_TTL {
                return Ok(ids.clone());
            }
        }
        let ids = self.fetch_partitions(topic).await?;
        log::debug!("Kafka metadata refreshed => topic={}, partitions={:?}", topic, ids);
        *self.partitions.write().await = Some((Instant::now(), ids.clone()));
        Ok(ids)
    }

    async fn write(&self, topic: &str, records: &[(i32, Message)]) -> Result<(), PublishError> {
        // 按顺序入队，librdkafka 保证同分区内顺序
        let sends = records.iter().map(|(partition, msg)| async move {
            let record = FutureRecord::to(topic)
                .key(&msg.key()[..])
                .payload(&msg.value()[..])
                .partition(*partition);
            match self.producer.send(record, QUEUE_TIMEOUT).await {
                Ok(_) => {
                    log::debug!("Kafka OK => topic={}, partition={}", topic, partition);
                    Ok(())
                }
                Err((err, _)) => Err(MqError::classify(err)),
            }
        });
        try_join_all(sends).await?;
        Ok(())
    }

    async fn close(&self) {
        log::info!("Shutting down Kafka producer for broker [{}]", self.broker_addr);
        let producer = self.producer.clone();
        let broker = self.broker_addr.clone();
        let flushed = tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT)).await;
        match flushed {
            Ok(Ok(())) => log::info!("✅ Kafka producer flushed for broker [{}]", broker),
            Ok(Err(e)) => log::warn!("⚠️ Kafka producer flush failed: {:?}", e),
            Err(e) => log::warn!("⚠️ Kafka shutdown task panicked: {:?}", e),
        }
    }
}
