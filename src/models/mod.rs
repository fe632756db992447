//! Data models for chat entities

mod message;

pub use message::*;
