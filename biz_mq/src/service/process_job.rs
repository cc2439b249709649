use crate::entitys::message_entity::FetchedMessage;
use crate::error::MqError;
use crate::kafka_util::broker::BrokerReader;
use crate::service::consumer::Consumer;
use crate::service::retry_policy::RetryPolicy;
use async_trait::async_trait;
use common::util::date_util::millis_to_rfc3339;
use tokio_util::sync::CancellationToken;

/// 处理循环状态：`Idle -> Fetching -> Processing -> Committing -> Idle`，
/// 拉取或提交失败进入 `Failed`，记录日志后回到 `Idle`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Fetching,
    Processing,
    Committing,
    Failed,
}

/// 单条消息的业务处理
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, msg: &FetchedMessage) -> anyhow::Result<()>;
}

/// 默认处理：把消息按 `<key><value>` 输出到日志
pub struct LogHandler;

#[async_trait]
impl MessageHandler for LogHandler {
    async fn handle(&self, msg: &FetchedMessage) -> anyhow::Result<()> {
        log::info!("{}", msg.message().render());
        log::debug!(
            "consumed => topic={}, partition={}, offset={}, time={:?}",
            msg.topic(),
            msg.partition(),
            msg.offset(),
            msg.timestamp().and_then(millis_to_rfc3339)
        );
        Ok(())
    }
}

/// 单次迭代的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Committed { partition: i32, offset: i64 },
    /// 处理失败，未提交，消息将被重新投递
    Skipped { partition: i32, offset: i64 },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStats {
    pub fetched: u64,
    pub committed: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// 拉取 -> 处理 -> 提交 循环（至少一次投递）
pub struct ProcessLoop<R: BrokerReader, H: MessageHandler> {
    consumer: Consumer<R>,
    handler: H,
    retry: RetryPolicy,
    state: LoopState,
    stats: ProcessStats,
}

impl<R: BrokerReader, H: MessageHandler> ProcessLoop<R, H> {
    pub fn new(consumer: Consumer<R>, handler: H) -> Self {
        Self {
            consumer,
            handler,
            retry: RetryPolicy::default(),
            state: LoopState::Idle,
            stats: ProcessStats::default(),
        }
    }

    pub fn with_retry(self, retry: RetryPolicy) -> Self {
        Self { retry, ..self }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> ProcessStats {
        self.stats
    }

    /// 执行一次迭代；处理完成之前绝不提交
    pub async fn step(&mut self, cancel: &CancellationToken) -> Result<StepOutcome, MqError> {
        self.state = LoopState::Fetching;
        let msg = match self.consumer.fetch_next(cancel).await {
            Ok(msg) => msg,
            Err(e) => return Err(self.fail(e)),
        };
        self.stats.fetched += 1;
        let (partition, offset) = (msg.partition(), msg.offset());

        self.state = LoopState::Processing;
        if let Err(e) = self.handler.handle(&msg).await {
            log::warn!(
                "⚠️ 消息处理失败，跳过提交 topic={}, partition={}, offset={}: {:?}",
                msg.topic(),
                partition,
                offset,
                e
            );
            self.stats.skipped += 1;
            if let Err(e) = self.consumer.redeliver(msg).await {
                return Err(self.fail(e));
            }
            self.state = LoopState::Idle;
            return Ok(StepOutcome::Skipped { partition, offset });
        }

        self.state = LoopState::Committing;
        if let Err(e) = self.consumer.commit(msg, cancel).await {
            return Err(self.fail(e));
        }
        self.stats.committed += 1;
        self.state = LoopState::Idle;
        Ok(StepOutcome::Committed { partition, offset })
    }

    /// 取消不算失败，回到 `Idle`
    fn fail(&mut self, e: MqError) -> MqError {
        if e.is_cancelled() {
            self.state = LoopState::Idle;
        } else {
            self.state = LoopState::Failed;
            self.stats.failed += 1;
        }
        e
    }

    /// 持续运行直到 `shutdown` 被取消；单次失败只记录日志，不退出
    pub async fn run(mut self, shutdown: CancellationToken) -> ProcessStats {
        log::info!("process loop started");
        let mut attempt = 0u32;
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.step(&shutdown).await {
                Ok(StepOutcome::Committed { .. }) => attempt = 0,
                Ok(StepOutcome::Skipped { .. }) => {
                    attempt = attempt.saturating_add(1);
                    if !self.retry.pause(attempt, &shutdown).await {
                        break;
                    }
                }
                Err(e) if e.is_cancelled() && shutdown.is_cancelled() => break,
                Err(e) => {
                    if e.is_transient() {
                        log::error!("❌ Kafka 消费错误: {}", e);
                    } else {
                        log::warn!("⚠️ 消费调用被拒绝: {}", e);
                    }
                    self.state = LoopState::Idle;
                    attempt = attempt.saturating_add(1);
                    if !self.retry.pause(attempt, &shutdown).await {
                        break;
                    }
                }
            }
        }
        self.state = LoopState::Idle;
        self.consumer.close().await;
        log::info!("process loop stopped: {:?}", self.stats);
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitys::message_entity::Message;
    use crate::kafka_util::broker::BrokerWriter;
    use crate::kafka_util::memory_broker::MemoryBroker;
    use std::sync::{Arc, Mutex};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 记录处理过的消息，可按次数注入失败
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(i32, i64)>>,
        fail_times: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for Arc<Recorder> {
        async fn handle(&self, msg: &FetchedMessage) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push((msg.partition(), msg.offset()));
            if self
                .fail_times
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                anyhow::bail!("handler rejected offset {}", msg.offset());
            }
            Ok(())
        }
    }

    fn recorder(fail_times: usize) -> Arc<Recorder> {
        Arc::new(Recorder {
            seen: Mutex::new(vec![]),
            fail_times: AtomicUsize::new(fail_times),
        })
    }

    async fn broker_with(values: &[&'static str]) -> MemoryBroker {
        let broker = MemoryBroker::new("t", 1);
        let records: Vec<(i32, Message)> = values.iter().map(|v| (0, Message::new("k", *v))).collect();
        broker.write("t", &records).await.unwrap();
        broker
    }

    #[tokio::test]
    async fn test_step_commits_after_processing() {
        let broker = broker_with(&["a"]).await;
        let mut job = ProcessLoop::new(Consumer::new(broker.reader("g")), LogHandler);
        assert_eq!(job.state(), LoopState::Idle);
        let outcome = job.step(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, StepOutcome::Committed { partition: 0, offset: 0 });
        assert_eq!(job.state(), LoopState::Idle);
        assert_eq!(broker.committed_offset("g", 0), Some(1));
    }

    #[tokio::test]
    async fn test_processing_failure_skips_commit() {
        let broker = broker_with(&["a", "b"]).await;
        let handler = recorder(1);
        let mut job = ProcessLoop::new(Consumer::new(broker.reader("g")), handler.clone());
        let cancel = CancellationToken::new();

        let outcome = job.step(&cancel).await.unwrap();
        assert_eq!(outcome, StepOutcome::Skipped { partition: 0, offset: 0 });
        assert!(broker.commit_log().await.is_empty());
        assert_eq!(broker.committed_offset("g", 0), None);

        // 被跳过的消息重新投递，处理成功后才提交
        let outcome = job.step(&cancel).await.unwrap();
        assert_eq!(outcome, StepOutcome::Committed { partition: 0, offset: 0 });
        assert_eq!(*handler.seen.lock().unwrap(), vec![(0, 0), (0, 0)]);
        let commits: Vec<i64> = broker.commit_log().await.iter().map(|c| c.next_offset).collect();
        assert_eq!(commits, vec![1]);
        assert_eq!(job.stats().skipped, 1);
        assert_eq!(job.stats().committed, 1);
    }

    #[tokio::test]
    async fn test_commit_failure_enters_failed_state() {
        let broker = broker_with(&["a"]).await;
        let mut job = ProcessLoop::new(Consumer::new(broker.reader("g")), LogHandler);
        broker.fail_next_commits(1);
        let err = job.step(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MqError::Connectivity(_)));
        assert_eq!(job.state(), LoopState::Failed);
        assert_eq!(job.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_run_survives_errors_until_shutdown() {
        let broker = broker_with(&["a", "b", "c"]).await;
        broker.fail_next_fetches(2);
        broker.fail_next_commits(1);
        let job = ProcessLoop::new(Consumer::new(broker.reader("g")), LogHandler);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(job.run(shutdown.clone()));

        // 等待全部消息提交完成
        for _ in 0..200 {
            if broker.committed_offset("g", 0) == Some(3) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(broker.committed_offset("g", 0), Some(3));

        shutdown.cancel();
        let stats = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop must exit on shutdown")
            .unwrap();
        // 两次拉取失败 + 一次提交失败；"a" 已处理，其位点由 "b" 的提交覆盖
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.committed, 2);
        assert_eq!(stats.fetched, 3);
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown_while_blocked() {
        let broker = MemoryBroker::new("t", 1);
        let job = ProcessLoop::new(Consumer::new(broker.reader("g")), LogHandler);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(job.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.cancel();
        let stats = tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(stats, ProcessStats::default());
    }

    #[tokio::test]
    async fn test_cancelled_step_is_not_a_failure() {
        let broker = broker_with(&["a"]).await;
        let mut job = ProcessLoop::new(Consumer::new(broker.reader("g")), LogHandler);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(job.step(&cancel).await.unwrap_err().is_cancelled());
        assert_eq!(job.state(), LoopState::Idle);
        assert_eq!(job.stats(), ProcessStats::default());
        assert_eq!(broker.committed_offset("g", 0), None);
    }

    #[tokio::test]
    async fn test_failed_rewind_never_commits_past_message() {
        let broker = broker_with(&["a", "b"]).await;
        broker.fail_next_rewinds(2);
        let handler = recorder(1);
        let mut job = ProcessLoop::new(Consumer::new(broker.reader("g")), handler.clone());
        let cancel = CancellationToken::new();

        // 处理失败且回退失败
        assert!(matches!(job.step(&cancel).await, Err(MqError::Rebalance)));
        assert_eq!(job.state(), LoopState::Failed);
        // 回退重试仍失败，不会读到 "b"
        assert!(matches!(job.step(&cancel).await, Err(MqError::Rebalance)));
        assert_eq!(broker.committed_offset("g", 0), None);

        let outcome = job.step(&cancel).await.unwrap();
        assert_eq!(outcome, StepOutcome::Committed { partition: 0, offset: 0 });
        assert_eq!(broker.committed_offset("g", 0), Some(1));
        let outcome = job.step(&cancel).await.unwrap();
        assert_eq!(outcome, StepOutcome::Committed { partition: 0, offset: 1 });
        assert_eq!(*handler.seen.lock().unwrap(), vec![(0, 0), (0, 0), (0, 1)]);
        assert_eq!(job.stats().failed, 2);
        assert_eq!(job.stats().skipped, 1);
    }
}
