use crate::entitys::message_entity::Message;
use common::config::PartitionStrategy;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use twox_hash::XxHash64;

/// 分区选择策略
pub trait Balancer: Send + Sync {
    /// 从非空的 `partitions` 中为消息选择分区
    fn balance(&self, msg: &Message, partitions: &[i32]) -> i32;

    /// 记录分区上新增的负载
    fn record(&self, _partition: i32, _bytes: usize) {}
}

pub fn balancer_for(strategy: PartitionStrategy) -> Box<dyn Balancer> {
    match strategy {
        PartitionStrategy::LeastBytes => Box::new(LeastBytes::default()),
        PartitionStrategy::RoundRobin => Box::new(RoundRobin::default()),
        PartitionStrategy::Hash => Box::new(KeyHash::default()),
    }
}

/// 选择累计字节数最少的分区，相同时取分区号最小者。
///
/// 负载在分配时计入（含带分区提示的消息），同一批次内的后续消息
/// 会看到前面消息带来的负载。
#[derive(Debug, Default)]
pub struct LeastBytes {
    counters: DashMap<i32, u64>,
}

impl LeastBytes {
    pub fn load(&self, partition: i32) -> u64 {
        self.counters.get(&partition).map(|c| *c).unwrap_or(0)
    }
}

impl Balancer for LeastBytes {
    fn balance(&self, _msg: &Message, partitions: &[i32]) -> i32 {
        partitions
            .iter()
            .copied()
            .min_by_key(|p| (self.load(*p), *p))
            .unwrap_or_default()
    }

    fn record(&self, partition: i32, bytes: usize) {
        *self.counters.entry(partition).or_insert(0) += bytes as u64;
    }
}

#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl Balancer for RoundRobin {
    fn balance(&self, _msg: &Message, partitions: &[i32]) -> i32 {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % partitions.len();
        partitions[idx]
    }
}

/// key 哈希路由；空 key 退化为轮询
#[derive(Debug, Default)]
pub struct KeyHash {
    fallback: RoundRobin,
}

impl Balancer for KeyHash {
    fn balance(&self, msg: &Message, partitions: &[i32]) -> i32 {
        if msg.key().is_empty() {
            return self.fallback.balance(msg, partitions);
        }
        let hash = XxHash64::oneshot(0, msg.key());
        partitions[(hash % partitions.len() as u64) as usize]
    }
}
