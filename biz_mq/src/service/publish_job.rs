use crate::entitys::message_entity::Message;
use crate::error::PublishError;
use crate::kafka_util::broker::BrokerWriter;
use crate::service::producer::Producer;
use crate::service::retry_policy::RetryPolicy;
use common::util::date_util::now_rfc3339;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    pub published: u64,
    pub failed: u64,
}

/// 周期发送任务：每个周期构造一条带当前时间的消息并发送
pub struct PublishLoop<W: BrokerWriter> {
    producer: Producer<W>,
    interval: Duration,
    key: String,
    retry: RetryPolicy,
    stats: PublishStats,
}

impl<W: BrokerWriter> PublishLoop<W> {
    pub fn new(producer: Producer<W>, interval: Duration, key: impl Into<String>) -> Self {
        Self {
            producer,
            interval,
            key: key.into(),
            retry: RetryPolicy::default(),
            stats: PublishStats::default(),
        }
    }

    pub fn with_retry(self, retry: RetryPolicy) -> Self {
        Self { retry, ..self }
    }

    pub fn stats(&self) -> PublishStats {
        self.stats
    }

    pub fn build_message(&self) -> Message {
        Message::new(self.key.clone(), now_rfc3339())
    }

    /// 发送一条消息；被取消的发送不计入失败
    pub async fn tick(&mut self, cancel: &CancellationToken) -> Result<(), PublishError> {
        let msg = self.build_message();
        match self.producer.publish(vec![msg], cancel).await {
            Ok(()) => {
                self.stats.published += 1;
                Ok(())
            }
            Err(e) => {
                if !e.is_cancelled() {
                    self.stats.failed += 1;
                }
                Err(e)
            }
        }
    }

    /// 首个周期结束时第一次发送，直到 `shutdown` 被取消
    pub async fn run(mut self, shutdown: CancellationToken) -> PublishStats {
        log::info!("publish loop started, interval {:?}", self.interval);
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut attempt = 0u32;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.tick(&shutdown).await {
                Ok(()) => attempt = 0,
                Err(e) if e.is_cancelled() && shutdown.is_cancelled() => break,
                Err(e) => {
                    if e.is_transient() {
                        log::error!("❌ 消息发送失败: {}", e);
                    } else {
                        log::warn!("⚠️ 消息发送被拒绝: {}", e);
                    }
                    attempt = attempt.saturating_add(1);
                    if !self.retry.pause(attempt, &shutdown).await {
                        break;
                    }
                }
            }
        }
        self.producer.close().await;
        log::info!("publish loop stopped: {:?}", self.stats);
        self.stats
    }
}
