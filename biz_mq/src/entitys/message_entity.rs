use bytes::Bytes;

/// 一条待发送的消息：key + value，可选分区提示。构造后不可变。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    key: Bytes,
    value: Bytes,
    partition: Option<i32>,
}

impl Message {
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            partition: None,
        }
    }

    /// 指定目标分区，跳过分区策略
    pub fn with_partition(self, partition: i32) -> Self {
        Self {
            partition: Some(partition),
            ..self
        }
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }
    pub fn value(&self) -> &Bytes {
        &self.value
    }
    pub fn partition(&self) -> Option<i32> {
        self.partition
    }

    /// key + value 字节数，用于分区负载统计
    pub fn size(&self) -> usize {
        self.key.len() + self.value.len()
    }

    /// 日志输出格式 `<key><value>`
    pub fn render(&self) -> String {
        format!(
            "{}{}",
            String::from_utf8_lossy(&self.key),
            String::from_utf8_lossy(&self.value)
        )
    }
}

/// 拉取到的消息：附带 topic / partition / offset。
///
/// 不实现 `Clone`：从 fetch 到 commit 期间由处理循环独占，
/// `commit` 按值接收，提交后即被消费。
#[derive(Debug, PartialEq, Eq)]
pub struct FetchedMessage {
    message: Message,
    topic: String,
    partition: i32,
    offset: i64,
    //毫秒时间戳（broker 提供时）
    timestamp: Option<i64>,
}

impl FetchedMessage {
    pub fn new(message: Message, topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            message,
            topic: topic.into(),
            partition,
            offset,
            timestamp: None,
        }
    }

    pub fn with_timestamp(self, millis: i64) -> Self {
        Self {
            timestamp: Some(millis),
            ..self
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }
    pub fn key(&self) -> &Bytes {
        self.message.key()
    }
    pub fn value(&self) -> &Bytes {
        self.message.value()
    }
    pub fn topic(&self) -> &str {
        &self.topic
    }
    pub fn partition(&self) -> i32 {
        self.partition
    }
    pub fn offset(&self) -> i64 {
        self.offset
    }
    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    /// 提交后该分区的存储位点
    pub fn next_offset(&self) -> i64 {
        self.offset + 1
    }
}
