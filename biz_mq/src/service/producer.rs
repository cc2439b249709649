use crate::entitys::message_entity::Message;
use crate::error::{MqError, PublishError};
use crate::kafka_util::balancer::{Balancer, balancer_for};
use crate::kafka_util::broker::BrokerWriter;
use common::config::PartitionStrategy;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// 消息发送端：解析分区后同步等待 broker 确认，不做内部重试
pub struct Producer<W: BrokerWriter> {
    writer: W,
    topic: String,
    balancer: Box<dyn Balancer>,
    write_timeout: Duration,
}

impl<W: BrokerWriter> Producer<W> {
    pub fn new(writer: W, topic: impl Into<String>, strategy: PartitionStrategy) -> Self {
        Self {
            writer,
            topic: topic.into(),
            balancer: balancer_for(strategy),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_write_timeout(self, write_timeout: Duration) -> Self {
        Self { write_timeout, ..self }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 发送一批消息；空批次直接返回
    ///
    /// 返回 `Ok` 时批内所有消息均已被分区 leader 确认。
    pub async fn publish(&self, messages: Vec<Message>, cancel: &CancellationToken) -> Result<(), PublishError> {
        if messages.is_empty() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(MqError::Cancelled);
        }
        let partitions = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MqError::Cancelled),
            res = self.writer.partitions(&self.topic) => res?,
        };
        if partitions.is_empty() {
            return Err(MqError::UnknownTopic(format!("{} has no partitions", self.topic)));
        }
        let records = self.assign(messages, &partitions)?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MqError::Cancelled),
            res = tokio::time::timeout(self.write_timeout, self.writer.write(&self.topic, &records)) => match res {
                Ok(written) => written,
                Err(_) => Err(MqError::Timeout(format!(
                    "write of {} records to {} exceeded {:?}",
                    records.len(),
                    self.topic,
                    self.write_timeout
                ))),
            },
        }
    }

    /// 为每条消息确定分区：有提示则校验提示，否则交给分区策略
    ///
    /// 先校验整批提示，任一非法则整批拒绝且不计入分区负载。
    fn assign(&self, messages: Vec<Message>, partitions: &[i32]) -> Result<Vec<(i32, Message)>, MqError> {
        if let Some(p) = messages
            .iter()
            .filter_map(Message::partition)
            .find(|p| !partitions.contains(p))
        {
            return Err(MqError::UnknownTopic(format!("{}/{}", self.topic, p)));
        }
        Ok(messages
            .into_iter()
            .map(|msg| {
                let partition = msg
                    .partition()
                    .unwrap_or_else(|| self.balancer.balance(&msg, partitions));
                self.balancer.record(partition, msg.size());
                (partition, msg)
            })
            .collect())
    }

    pub async fn close(&self) {
        self.writer.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka_util::memory_broker::MemoryBroker;
    use crate::kafka_util::broker::BrokerReader;

    #[tokio::test]
    async fn test_empty_publish_is_noop() {
        let broker = MemoryBroker::new("t", 2);
        let producer = Producer::new(broker.clone(), "t", PartitionStrategy::LeastBytes);
        // 即使已取消，空批次也直接成功
        let cancel = CancellationToken::new();
        cancel.cancel();
        producer.publish(vec![], &cancel).await.unwrap();
        assert_eq!(broker.partition_len(0) + broker.partition_len(1), 0);
    }

    #[tokio::test]
    async fn test_least_bytes_targets_lighter_partition() {
        let broker = MemoryBroker::new("t", 2);
        let producer = Producer::new(broker.clone(), "t", PartitionStrategy::LeastBytes);
        let cancel = CancellationToken::new();

        // 预先给分区 0 注入 300 字节负载
        let heavy: Vec<Message> = (0..3)
            .map(|_| Message::new("k", vec![b'x'; 99]).with_partition(0))
            .collect();
        producer.publish(heavy, &cancel).await.unwrap();

        // 后续 20 字节的消息全部落在较轻的分区 1，直到负载追平
        for _ in 0..5 {
            producer.publish(vec![Message::new("k", vec![b'y'; 19])], &cancel).await.unwrap();
        }
        assert_eq!(broker.partition_len(0), 3);
        assert_eq!(broker.partition_len(1), 5);

        // 同一批次内负载即时计入：分区 1 从 100 涨到 300 后平局，
        // 平局取分区 0，之后两边交替
        let burst: Vec<Message> = (0..12).map(|_| Message::new("k", vec![b'z'; 19])).collect();
        producer.publish(burst, &cancel).await.unwrap();
        assert_eq!(broker.partition_len(1), 16);
        assert_eq!(broker.partition_len(0), 4);
    }

    #[tokio::test]
    async fn test_unknown_partition_hint_rejected() {
        let broker = MemoryBroker::new("t", 2);
        let producer = Producer::new(broker.clone(), "t", PartitionStrategy::RoundRobin);
        let err = producer
            .publish(vec![Message::new("k", "v").with_partition(9)], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MqError::UnknownTopic(_)));
        assert_eq!(broker.partition_len(0) + broker.partition_len(1), 0);
    }

    #[tokio::test]
    async fn test_publish_cancelled_before_write() {
        let broker = MemoryBroker::new("t", 1);
        let producer = Producer::new(broker.clone(), "t", PartitionStrategy::LeastBytes);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = producer.publish(vec![Message::new("k", "v")], &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(broker.partition_len(0), 0);
    }

    #[tokio::test]
    async fn test_broker_failure_surfaces_without_retry() {
        let broker = MemoryBroker::new("t", 1);
        let producer = Producer::new(broker.clone(), "t", PartitionStrategy::LeastBytes);
        broker.fail_next_writes(1);
        let err = producer
            .publish(vec![Message::new("k", "v")], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MqError::Connectivity(_)));
        assert_eq!(broker.partition_len(0), 0);

        producer.publish(vec![Message::new("k", "v")], &CancellationToken::new()).await.unwrap();
        let msg = broker.reader("g").fetch().await.unwrap();
        assert_eq!(msg.message().render(), "kv");
    }

    #[tokio::test]
    async fn test_rejected_batch_leaves_load_untouched() {
        let broker = MemoryBroker::new("t", 2);
        let producer = Producer::new(broker.clone(), "t", PartitionStrategy::LeastBytes);
        let cancel = CancellationToken::new();

        // 首条消息本会计入分区 0，但同批次的非法提示使整批被拒
        let batch = vec![
            Message::new("k", vec![b'x'; 99]),
            Message::new("k", "v").with_partition(9),
        ];
        assert!(matches!(
            producer.publish(batch, &cancel).await,
            Err(MqError::UnknownTopic(_))
        ));

        // 两个分区负载仍然相同，平局取分区 0
        producer.publish(vec![Message::new("k", "v")], &cancel).await.unwrap();
        assert_eq!(broker.partition_len(0), 1);
        assert_eq!(broker.partition_len(1), 0);
    }
}
