use crate::entitys::message_entity::{FetchedMessage, Message};
use crate::error::{CommitError, FetchError, MqError, PublishError};
use async_trait::async_trait;

/// broker 写入端能力
///
/// 实现需保证 `write` 返回 `Ok` 时所有记录均已被对应分区 leader 确认。
#[async_trait]
pub trait BrokerWriter: Send + Sync {
    /// topic 当前的分区列表
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, MqError>;

    /// 写入已解析分区的记录，按顺序确认
    async fn write(&self, topic: &str, records: &[(i32, Message)]) -> Result<(), PublishError>;

    /// 刷出缓冲并释放连接
    async fn close(&self) {}
}

/// broker 读取端能力（单 topic + 消费组）
#[async_trait]
pub trait BrokerReader: Send + Sync {
    /// 阻塞直到有消息可读
    async fn fetch(&self) -> Result<FetchedMessage, FetchError>;

    /// 将 (topic, partition, group) 的存储位点设为 `next_offset`
    async fn commit(&self, topic: &str, partition: i32, next_offset: i64) -> Result<(), CommitError>;

    /// 把分区读取位置回退到 `offset`，下一次 fetch 重新投递该消息
    async fn rewind(&self, topic: &str, partition: i32, offset: i64) -> Result<(), FetchError>;

    async fn close(&self) {}
}
