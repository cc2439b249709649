use crate::entitys::message_entity::{FetchedMessage, Message};
use crate::error::{CommitError, FetchError, MqError, PublishError};
use crate::kafka_util::broker::{BrokerReader, BrokerWriter};
use crate::kafka_util::codec::MessageCodec;
use async_trait::async_trait;
use bytes::Bytes;
use common::util::date_util::now_millis;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify};

/// 一次位点提交记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub group_id: String,
    pub partition: i32,
    pub next_offset: i64,
}

#[derive(Debug, Default)]
struct Faults {
    writes: AtomicUsize,
    fetches: AtomicUsize,
    commits: AtomicUsize,
    rewinds: AtomicUsize,
}

impl Faults {
    /// 消耗一次注入的故障
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

struct Inner {
    topic: String,
    partition_count: i32,
    //分区日志：(写入时间戳, 编码帧)
    logs: DashMap<i32, Vec<(i64, Bytes)>>,
    //(group, partition) -> 已提交位点
    committed: DashMap<(String, i32), i64>,
    commit_log: Mutex<Vec<CommitRecord>>,
    appended: Notify,
    faults: Faults,
}

/// 进程内 broker：单 topic、N 个分区，按消费组记录提交位点。
///
/// 用于本地运行（`driver = "memory"`）以及测试中的假 broker：
/// 支持注入写入/拉取/提交故障，读取端"重启"即重新从已提交位点开始。
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new(topic: impl Into<String>, partitions: i32) -> Self {
        let partition_count = partitions.max(1);
        let logs = DashMap::new();
        for p in 0..partition_count {
            logs.insert(p, Vec::new());
        }
        Self {
            inner: Arc::new(Inner {
                topic: topic.into(),
                partition_count,
                logs,
                committed: DashMap::new(),
                commit_log: Mutex::new(Vec::new()),
                appended: Notify::new(),
                faults: Faults::default(),
            }),
        }
    }

    /// 为消费组打开一个读取端，起始位置为该组已提交位点
    pub fn reader(&self, group_id: impl Into<String>) -> MemoryReader {
        MemoryReader {
            broker: self.clone(),
            group_id: group_id.into(),
            positions: DashMap::new(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn committed_offset(&self, group_id: &str, partition: i32) -> Option<i64> {
        self.inner
            .committed
            .get(&(group_id.to_string(), partition))
            .map(|v| *v)
    }

    pub async fn commit_log(&self) -> Vec<CommitRecord> {
        self.inner.commit_log.lock().await.clone()
    }

    pub fn partition_len(&self, partition: i32) -> usize {
        self.inner.logs.get(&partition).map(|log| log.len()).unwrap_or(0)
    }

    /// 分区内已写入的帧字节数
    pub fn partition_bytes(&self, partition: i32) -> usize {
        self.inner
            .logs
            .get(&partition)
            .map(|log| log.iter().map(|(_, frame)| frame.len()).sum())
            .unwrap_or(0)
    }

    pub fn fail_next_writes(&self, n: usize) {
        self.inner.faults.writes.store(n, Ordering::SeqCst);
    }
    pub fn fail_next_fetches(&self, n: usize) {
        self.inner.faults.fetches.store(n, Ordering::SeqCst);
    }
    pub fn fail_next_commits(&self, n: usize) {
        self.inner.faults.commits.store(n, Ordering::SeqCst);
    }
    /// 回退失败模拟 seek 时遇到重平衡
    pub fn fail_next_rewinds(&self, n: usize) {
        self.inner.faults.rewinds.store(n, Ordering::SeqCst);
    }

    fn check_topic(&self, topic: &str) -> Result<(), MqError> {
        if topic != self.inner.topic {
            return Err(MqError::UnknownTopic(topic.to_string()));
        }
        Ok(())
    }

    fn check_partition(&self, partition: i32) -> Result<(), MqError> {
        if !(0..self.inner.partition_count).contains(&partition) {
            return Err(MqError::UnknownTopic(format!("{}/{}", self.inner.topic, partition)));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerWriter for MemoryBroker {
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, MqError> {
        self.check_topic(topic)?;
        Ok((0..self.inner.partition_count).collect())
    }

    async fn write(&self, topic: &str, records: &[(i32, Message)]) -> Result<(), PublishError> {
        if Faults::take(&self.inner.faults.writes) {
            return Err(MqError::Connectivity("injected write failure".to_string()));
        }
        self.check_topic(topic)?;
        // 先整体校验、编码，保证一批要么全部写入要么全部拒绝
        let mut frames = Vec::with_capacity(records.len());
        for (partition, msg) in records {
            self.check_partition(*partition)?;
            frames.push((*partition, MessageCodec::encode(msg)?));
        }
        let ts = now_millis();
        for (partition, frame) in frames {
            self.inner.logs.entry(partition).or_default().push((ts, frame));
        }
        self.inner.appended.notify_waiters();
        Ok(())
    }
}

/// 内存 broker 的消费组读取端
pub struct MemoryReader {
    broker: MemoryBroker,
    group_id: String,
    //分区 -> 下一次读取位置
    positions: DashMap<i32, i64>,
    cursor: AtomicUsize,
}

impl MemoryReader {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// 按分区轮转找到下一条未读消息
    fn poll_next(&self) -> Result<Option<FetchedMessage>, FetchError> {
        let inner = &self.broker.inner;
        let count = inner.partition_count as usize;
        let start = self.cursor.load(Ordering::Relaxed);
        for i in 0..count {
            let partition = ((start + i) % count) as i32;
            let mut position = self.positions.entry(partition).or_insert_with(|| {
                self.broker
                    .committed_offset(&self.group_id, partition)
                    .unwrap_or(0)
            });
            let Some(log) = inner.logs.get(&partition) else {
                continue;
            };
            let Some((ts, frame)) = usize::try_from(*position).ok().and_then(|idx| log.get(idx)) else {
                continue;
            };
            let msg = MessageCodec::decode(frame)?;
            let fetched = FetchedMessage::new(msg, inner.topic.clone(), partition, *position)
                .with_timestamp(*ts);
            *position += 1;
            self.cursor.store(partition as usize + 1, Ordering::Relaxed);
            return Ok(Some(fetched));
        }
        Ok(None)
    }
}

#[async_trait]
impl BrokerReader for MemoryReader {
    async fn fetch(&self) -> Result<FetchedMessage, FetchError> {
        loop {
            if Faults::take(&self.broker.inner.faults.fetches) {
                return Err(MqError::Connectivity("injected fetch failure".to_string()));
            }
            // 先登记唤醒，再检查日志，避免写入发生在两者之间时丢失通知
            let notified = self.broker.inner.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(msg) = self.poll_next()? {
                return Ok(msg);
            }
            notified.await;
        }
    }

    async fn commit(&self, topic: &str, partition: i32, next_offset: i64) -> Result<(), CommitError> {
        if Faults::take(&self.broker.inner.faults.commits) {
            return Err(MqError::Connectivity("injected commit failure".to_string()));
        }
        self.broker.check_topic(topic)?;
        if self.broker.check_partition(partition).is_err() {
            return Err(MqError::NotOwned {
                topic: topic.to_string(),
                partition,
            });
        }
        let inner = &self.broker.inner;
        inner
            .committed
            .insert((self.group_id.clone(), partition), next_offset);
        inner.commit_log.lock().await.push(CommitRecord {
            group_id: self.group_id.clone(),
            partition,
            next_offset,
        });
        Ok(())
    }

    async fn rewind(&self, topic: &str, partition: i32, offset: i64) -> Result<(), FetchError> {
        if Faults::take(&self.broker.inner.faults.rewinds) {
            return Err(MqError::Rebalance);
        }
        self.broker.check_topic(topic)?;
        self.broker.check_partition(partition)?;
        self.positions.insert(partition, offset);
        self.cursor.store(partition as usize, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(p: i32, key: &'static str, value: &'static str) -> (i32, Message) {
        (p, Message::new(key, value))
    }

    #[tokio::test]
    async fn test_fetch_waits_for_write() {
        let broker = MemoryBroker::new("t", 2);
        let reader = broker.reader("g");

        let pending = tokio::time::timeout(Duration::from_millis(20), reader.fetch()).await;
        assert!(pending.is_err(), "fetch must block on an empty topic");

        let writer = broker.clone();
        let handle = tokio::spawn(async move { reader.fetch().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        writer.write("t", &[record(1, "k", "v")]).await.unwrap();

        let msg = handle.await.unwrap().unwrap();
        assert_eq!(msg.partition(), 1);
        assert_eq!(msg.offset(), 0);
        assert_eq!(msg.message().render(), "kv");
        assert!(msg.timestamp().is_some());
    }

    #[tokio::test]
    async fn test_reader_resumes_from_committed_offset() {
        let broker = MemoryBroker::new("t", 1);
        broker
            .write("t", &[record(0, "a", "1"), record(0, "b", "2"), record(0, "c", "3")])
            .await
            .unwrap();

        let first = broker.reader("g");
        let m0 = first.fetch().await.unwrap();
        first.commit("t", 0, m0.next_offset()).await.unwrap();
        let m1 = first.fetch().await.unwrap();
        assert_eq!(m1.offset(), 1);
        drop(first);

        // 未提交的 offset 1 在新读取端上重新投递
        let restarted = broker.reader("g");
        let again = restarted.fetch().await.unwrap();
        assert_eq!(again.offset(), 1);
        assert_eq!(again.key(), m1.key());

        // 其他消费组独立
        let other = broker.reader("other");
        assert_eq!(other.fetch().await.unwrap().offset(), 0);
        assert_eq!(broker.committed_offset("g", 0), Some(1));
        assert_eq!(broker.committed_offset("other", 0), None);
    }

    #[tokio::test]
    async fn test_write_is_all_or_nothing() {
        let broker = MemoryBroker::new("t", 2);
        let err = broker
            .write("t", &[record(0, "a", "1"), record(7, "b", "2")])
            .await
            .unwrap_err();
        assert!(matches!(err, MqError::UnknownTopic(_)));
        assert_eq!(broker.partition_len(0), 0);

        assert!(broker.write("other", &[record(0, "a", "1")]).await.is_err());
        assert!(broker.partitions("other").await.is_err());
        assert_eq!(broker.partitions("t").await.unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed() {
        let broker = MemoryBroker::new("t", 1);
        broker.fail_next_writes(1);
        assert!(matches!(
            broker.write("t", &[record(0, "a", "1")]).await,
            Err(MqError::Connectivity(_))
        ));
        broker.write("t", &[record(0, "a", "1")]).await.unwrap();
        assert_eq!(broker.partition_bytes(0), MessageCodec::encoded_len(&Message::new("a", "1")));

        let reader = broker.reader("g");
        broker.fail_next_fetches(1);
        assert!(reader.fetch().await.is_err());
        let msg = reader.fetch().await.unwrap();

        broker.fail_next_commits(1);
        assert!(reader.commit("t", 0, msg.next_offset()).await.is_err());
        reader.commit("t", 0, msg.next_offset()).await.unwrap();
        assert_eq!(
            broker.commit_log().await,
            vec![CommitRecord {
                group_id: "g".into(),
                partition: 0,
                next_offset: 1
            }]
        );

        broker.fail_next_rewinds(1);
        assert!(matches!(reader.rewind("t", 0, 0).await, Err(MqError::Rebalance)));
        reader.rewind("t", 0, 0).await.unwrap();
        assert_eq!(reader.fetch().await.unwrap().offset(), 0);
    }

    #[tokio::test]
    async fn test_rewind_redelivers() {
        let broker = MemoryBroker::new("t", 1);
        broker.write("t", &[record(0, "a", "1"), record(0, "b", "2")]).await.unwrap();
        let reader = broker.reader("g");
        let m0 = reader.fetch().await.unwrap();
        reader.rewind("t", 0, m0.offset()).await.unwrap();
        assert_eq!(reader.fetch().await.unwrap(), m0);
        assert_eq!(reader.group_id(), "g");
    }
}
