pub mod entitys;
pub mod error;
pub mod kafka_util;
pub mod manager;
pub mod service;

pub use entitys::message_entity::{FetchedMessage, Message};
pub use error::{CommitError, FetchError, MqError, PublishError};
