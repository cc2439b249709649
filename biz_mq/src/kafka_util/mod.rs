pub mod balancer;
pub mod broker;
pub mod codec;
pub mod kafka_consumer;
pub mod kafka_producer;
pub mod memory_broker;
