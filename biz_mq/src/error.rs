use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use thiserror::Error;

/// 消息收发统一错误类型
#[derive(Debug, Error)]
pub enum MqError {
    #[error("broker connectivity error: {0}")]
    Connectivity(String),

    #[error("broker request timed out: {0}")]
    Timeout(String),

    #[error("broker rejected request: {0}")]
    Rejected(String),

    #[error("consumer group rebalance in progress")]
    Rebalance,

    #[error("partition {partition} of topic {topic} is not owned by this consumer")]
    NotOwned { topic: String, partition: i32 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("stale commit on partition {partition}: offset {offset}, in-flight {in_flight:?}")]
    StaleCommit {
        partition: i32,
        offset: i64,
        in_flight: Option<i64>,
    },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("unknown topic or partition: {0}")]
    UnknownTopic(String),

    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

pub type PublishError = MqError;
pub type FetchError = MqError;
pub type CommitError = MqError;

impl MqError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MqError::Cancelled)
    }

    /// 可由所属循环重试的错误；调用方错误（位点、编码）与取消不算
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            MqError::Cancelled | MqError::StaleCommit { .. } | MqError::Codec(_)
        )
    }

    /// 按 librdkafka 错误码归类
    pub fn classify(err: KafkaError) -> Self {
        match err.rdkafka_error_code() {
            Some(
                RDKafkaErrorCode::MessageTimedOut
                | RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::OperationTimedOut,
            ) => MqError::Timeout(err.to_string()),
            Some(
                RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::NetworkException
                | RDKafkaErrorCode::BrokerNotAvailable,
            ) => MqError::Connectivity(err.to_string()),
            Some(
                RDKafkaErrorCode::UnknownTopicOrPartition
                | RDKafkaErrorCode::UnknownTopic
                | RDKafkaErrorCode::UnknownPartition,
            ) => MqError::UnknownTopic(err.to_string()),
            Some(RDKafkaErrorCode::RebalanceInProgress) => MqError::Rebalance,
            Some(
                RDKafkaErrorCode::MessageSizeTooLarge
                | RDKafkaErrorCode::InvalidMessage
                | RDKafkaErrorCode::TopicAuthorizationFailed
                | RDKafkaErrorCode::NotLeaderForPartition,
            ) => MqError::Rejected(err.to_string()),
            _ => MqError::Kafka(err),
        }
    }

    /// 提交位点失败的归类：成员身份失效视为分区已不归本消费者所有
    pub fn classify_commit(err: KafkaError, topic: &str, partition: i32) -> Self {
        match err.rdkafka_error_code() {
            Some(
                RDKafkaErrorCode::UnknownMemberId
                | RDKafkaErrorCode::IllegalGeneration
                | RDKafkaErrorCode::FencedInstanceId,
            ) => MqError::NotOwned {
                topic: topic.to_string(),
                partition,
            },
            _ => MqError::classify(err),
        }
    }
}
