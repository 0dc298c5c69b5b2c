//! Chat REST surface
//!
//! All payloads are normalized into canonical models here, at the boundary.
//! The online-users endpoint is the worst offender: entries arrive either as
//! bare username strings or as `{username, is_online}` objects.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ApiError;
use crate::models::{ConversationSummary, Message, RawConversation, RawMessage};
use crate::state::moderation::{self, SendPolicy};

use super::client::ApiClient;

// -- Response types --

#[derive(Debug, Deserialize)]
struct OnlineUsersResponse {
    #[serde(default)]
    users: Vec<UserEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UserEntry {
    Name(String),
    Detailed {
        username: String,
        #[serde(default)]
        is_online: bool,
    },
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ConversationsResponse {
    #[serde(default)]
    conversations: Vec<RawConversation>,
}

#[derive(Debug, Deserialize)]
struct CanChatResponse {
    can_chat: bool,
    #[serde(default)]
    bullying_count: u32,
    #[serde(default)]
    max_allowed: u32,
    #[serde(default)]
    message: Option<String>,
}

/// A user known to the chat service.
pub struct UserInfo {
    pub username: String,
    pub is_online: bool,
}

// -- Data-returning endpoints --

/// GET /api/chat/online-users
pub async fn fetch_online_users(
    client: &mut ApiClient,
) -> std::result::Result<Vec<UserInfo>, ApiError> {
    let resp = client.get("/api/chat/online-users").await?;
    let body: OnlineUsersResponse = resp.json().await?;

    Ok(body
        .users
        .into_iter()
        .map(|entry| match entry {
            UserEntry::Name(username) => UserInfo {
                username,
                is_online: true,
            },
            UserEntry::Detailed {
                username,
                is_online,
            } => UserInfo {
                username,
                is_online,
            },
        })
        .collect())
}

/// GET /api/chat/messages/{username} -- full ordered history with a peer.
pub async fn fetch_history(
    client: &mut ApiClient,
    peer: &str,
) -> std::result::Result<Vec<Message>, ApiError> {
    let path = format!("/api/chat/messages/{}", peer);
    let resp = client.get(&path).await?;
    let body: MessagesResponse = resp.json().await?;

    tracing::debug!(
        "Fetched {} messages for {} (total={:?})",
        body.messages.len(),
        peer,
        body.total
    );

    let local = client.username().to_string();
    Ok(body
        .messages
        .into_iter()
        .map(|m| m.normalize(&local))
        .collect())
}

/// GET /api/chat/conversations -- per-peer summaries for the peer list.
pub async fn fetch_conversations(
    client: &mut ApiClient,
) -> std::result::Result<Vec<ConversationSummary>, ApiError> {
    let resp = client.get("/api/chat/conversations").await?;
    let body: ConversationsResponse = resp.json().await?;
    Ok(body
        .conversations
        .into_iter()
        .map(RawConversation::normalize)
        .collect())
}

/// GET /api/chat/can-chat -- moderation send-eligibility for the local user.
pub async fn fetch_send_policy(
    client: &mut ApiClient,
) -> std::result::Result<SendPolicy, ApiError> {
    let resp = client.get("/api/chat/can-chat").await?;
    let body: CanChatResponse = resp.json().await?;
    Ok(SendPolicy {
        can_send: body.can_chat,
        flagged_count: body.bullying_count,
        max_allowed: body.max_allowed,
        notice: body.message,
    })
}

// ---------------------------------------------------------------------------
// Command-level functions (print to stdout)
// ---------------------------------------------------------------------------

/// List users known to the chat service, with online markers.
pub async fn online() -> Result<()> {
    let mut client = ApiClient::new()?;
    let users = fetch_online_users(&mut client)
        .await
        .context("Failed to fetch online users")?;

    println!("\nUsers:");
    println!("{:-<40}", "");

    if users.is_empty() {
        println!("  (no users)");
        return Ok(());
    }

    for user in &users {
        let marker = if user.is_online { "*" } else { " " };
        println!("{} {}", marker, user.username);
    }
    println!("\n(* = online)");

    Ok(())
}

/// List recent conversations with unread counts and previews.
pub async fn conversations() -> Result<()> {
    let mut client = ApiClient::new()?;
    let convs = fetch_conversations(&mut client)
        .await
        .context("Failed to fetch conversations")?;

    println!("\nConversations:");
    println!("{:-<60}", "");

    if convs.is_empty() {
        println!("  (no conversations)");
        return Ok(());
    }

    for conv in &convs {
        let online = if conv.is_online { " [online]" } else { "" };
        let unread = if conv.unread > 0 {
            format!(" ({} unread)", conv.unread)
        } else {
            String::new()
        };
        println!("{}{}{}", conv.peer, online, unread);

        if let Some(ref preview) = conv.last_message {
            let when = conv
                .last_timestamp
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            println!("  [{}] {}", when, preview);
        }
        println!();
    }

    Ok(())
}

/// Print message history with a peer. Flagged messages stay suppressed.
pub async fn history(peer: &str, limit: usize) -> Result<()> {
    let mut client = ApiClient::new()?;
    let messages = fetch_history(&mut client, peer)
        .await
        .with_context(|| format!("Failed to fetch history for {}", peer))?;

    if messages.is_empty() {
        println!("(no messages)");
        return Ok(());
    }

    let start = messages.len().saturating_sub(limit);
    for msg in &messages[start..] {
        println!(
            "[{}] {}: {}",
            msg.sent_at.format("%Y-%m-%d %H:%M"),
            msg.sender,
            moderation::display_body(msg, false),
        );
    }

    Ok(())
}

/// Show the local user's moderation send-eligibility.
pub async fn can_chat() -> Result<()> {
    let mut client = ApiClient::new()?;
    let policy = fetch_send_policy(&mut client)
        .await
        .context("Failed to fetch chat permissions")?;

    println!("\nChat Permissions:");
    if policy.can_send {
        println!("  Sending: allowed");
    } else {
        println!("  Sending: BLOCKED");
        println!(
            "  Flagged messages: {}/{}",
            policy.flagged_count, policy.max_allowed
        );
    }
    if let Some(ref notice) = policy.notice {
        println!("  Note: {}", notice);
    }

    Ok(())
}
