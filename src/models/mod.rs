//! Data models for the messaging core

pub mod conversation;
pub mod message;

pub use conversation::{ConversationSummary, RawConversation};
pub use message::{Message, MessageKey, RawMessage};
