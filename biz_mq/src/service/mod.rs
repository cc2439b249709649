pub mod consumer;
pub mod process_job;
pub mod producer;
pub mod publish_job;
pub mod retry_policy;
