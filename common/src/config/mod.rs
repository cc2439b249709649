mod app_config;
mod client_config;

pub use app_config::*;
pub use client_config::*;
