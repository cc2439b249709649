use crate::entitys::message_entity::FetchedMessage;
use crate::error::{CommitError, FetchError, MqError};
use crate::kafka_util::broker::BrokerReader;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// 消费端：拉取 + 手动提交
///
/// 记录每个分区最近一次拉取但未提交的 offset，提交时必须与之一致，
/// 过期或乱序的提交直接拒绝，保证同一分区的提交位点单调递增。
///
/// 回退失败的分区记下待重投的 offset，回退成功之前不再拉取新消息，
/// 该分区上也不接受任何提交。
pub struct Consumer<R: BrokerReader> {
    reader: R,
    //分区 -> 在途 offset
    in_flight: DashMap<i32, i64>,
    //分区 -> (topic, 必须从此 offset 重投)
    rewind_floor: DashMap<i32, (String, i64)>,
}

impl<R: BrokerReader> Consumer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            in_flight: DashMap::new(),
            rewind_floor: DashMap::new(),
        }
    }

    /// 阻塞直到有消息或取消；已取消的信号立即返回 `Cancelled`
    pub async fn fetch_next(&self, cancel: &CancellationToken) -> Result<FetchedMessage, FetchError> {
        if cancel.is_cancelled() {
            return Err(MqError::Cancelled);
        }
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MqError::Cancelled),
            res = self.fetch_after_rewind() => res?,
        };
        self.in_flight.insert(msg.partition(), msg.offset());
        Ok(msg)
    }

    /// 先补做之前失败的回退，全部成功后才读取下一条
    async fn fetch_after_rewind(&self) -> Result<FetchedMessage, FetchError> {
        let pending: Vec<(i32, String, i64)> = self
            .rewind_floor
            .iter()
            .map(|e| (*e.key(), e.value().0.clone(), e.value().1))
            .collect();
        for (partition, topic, offset) in pending {
            self.reader.rewind(&topic, partition, offset).await?;
            self.rewind_floor.remove(&partition);
            log::info!("🔁 分区重新回退成功 topic={}, partition={}, offset={}", topic, partition, offset);
        }
        self.reader.fetch().await
    }

    /// 提交消息，分区存储位点推进到 `offset + 1`
    pub async fn commit(&self, msg: FetchedMessage, cancel: &CancellationToken) -> Result<(), CommitError> {
        let partition = msg.partition();
        let in_flight = self.in_flight.get(&partition).map(|v| *v);
        if in_flight != Some(msg.offset()) || self.rewind_floor.contains_key(&partition) {
            return Err(MqError::StaleCommit {
                partition,
                offset: msg.offset(),
                in_flight,
            });
        }
        if cancel.is_cancelled() {
            return Err(MqError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MqError::Cancelled),
            res = self.reader.commit(msg.topic(), partition, msg.next_offset()) => res?,
        }
        self.in_flight.remove_if(&partition, |_, offset| *offset == msg.offset());
        Ok(())
    }

    /// 放弃提交并回退读取位置，该消息会被重新投递
    ///
    /// 回退失败时保留重投位点，下一次 `fetch_next` 会先重试回退。
    pub async fn redeliver(&self, msg: FetchedMessage) -> Result<(), FetchError> {
        let partition = msg.partition();
        self.in_flight.remove(&partition);
        self.rewind_floor
            .insert(partition, (msg.topic().to_string(), msg.offset()));
        self.reader.rewind(msg.topic(), partition, msg.offset()).await?;
        self.rewind_floor.remove(&partition);
        Ok(())
    }

    pub async fn close(&self) {
        self.reader.close().await;
    }
}
