pub mod message_entity;
