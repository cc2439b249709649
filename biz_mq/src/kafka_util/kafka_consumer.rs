use crate::entitys::message_entity::{FetchedMessage, Message};
use crate::error::{CommitError, FetchError, MqError};
use crate::kafka_util::broker::BrokerReader;
use async_trait::async_trait;
use bytes::Bytes;
use common::config::ClientConfig;
use rdkafka::ClientConfig as KafkaClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message as KafkaMessageTrait;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// 基于 rdkafka `StreamConsumer` 的读取端，手动提交 offset
pub struct KafkaReader {
    consumer: Arc<StreamConsumer>,
    topic: String,
    group_id: String,
}

impl KafkaReader {
    pub fn open(config: &ClientConfig) -> Result<Self, MqError> {
        let consumer: StreamConsumer = KafkaClientConfig::new()
            .set("group.id", config.group_id())
            .set("bootstrap.servers", config.brokers().join(","))
            .set("enable.auto.commit", "false") // 手动提交 offset
            .set("auto.offset.reset", "earliest")
            .set("fetch.min.bytes", config.min_fetch_bytes().to_string())
            .set("fetch.max.bytes", config.max_fetch_bytes().to_string())
            .create()
            .map_err(MqError::classify)?;
        consumer
            .subscribe(&[config.topic()])
            .map_err(MqError::classify)?;
        log::info!(
            "✅ Kafka 消费者已启动，订阅主题 {}，消费组 {}",
            config.topic(),
            config.group_id()
        );
        Ok(Self {
            consumer: Arc::new(consumer),
            topic: config.topic().to_string(),
            group_id: config.group_id().to_string(),
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }
}

#[async_trait]
impl BrokerReader for KafkaReader {
    async fn fetch(&self) -> Result<FetchedMessage, FetchError> {
        let msg = self.consumer.recv().await.map_err(MqError::classify)?;
        let message = Message::new(
            Bytes::copy_from_slice(msg.key().unwrap_or_default()),
            Bytes::copy_from_slice(msg.payload().unwrap_or_default()),
        );
        let fetched = FetchedMessage::new(message, msg.topic(), msg.partition(), msg.offset());
        Ok(match msg.timestamp().to_millis() {
            Some(ts) => fetched.with_timestamp(ts),
            None => fetched,
        })
    }

    async fn commit(&self, topic: &str, partition: i32, next_offset: i64) -> Result<(), CommitError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(next_offset))
            .map_err(MqError::classify)?;
        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync))
            .await
            .map_err(|e| MqError::Connectivity(format!("commit task failed: {e}")))?
            .map_err(|e| MqError::classify_commit(e, topic, partition))
    }

    async fn rewind(&self, topic: &str, partition: i32, offset: i64) -> Result<(), FetchError> {
        let consumer = self.consumer.clone();
        let topic_name = topic.to_string();
        tokio::task::spawn_blocking(move || {
            consumer.seek(&topic_name, partition, Offset::Offset(offset), SEEK_TIMEOUT)
        })
        .await
        .map_err(|e| MqError::Connectivity(format!("seek task failed: {e}")))?
        .map_err(MqError::classify)
    }

    async fn close(&self) {
        self.consumer.unsubscribe();
        log::info!("Kafka consumer for topic [{}] unsubscribed", self.topic);
    }
}
