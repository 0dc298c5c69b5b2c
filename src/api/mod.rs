//! REST API client for the chat service

pub mod chat;
pub mod client;

use anyhow::Result;

/// List users known to the chat service
pub async fn online() -> Result<()> {
    chat::online().await
}

/// List recent conversations
pub async fn conversations() -> Result<()> {
    chat::conversations().await
}

/// Print message history with a peer
pub async fn history(peer: &str, limit: usize) -> Result<()> {
    chat::history(peer, limit).await
}

/// Show moderation send-eligibility
pub async fn can_chat() -> Result<()> {
    chat::can_chat().await
}
