//! Real-time event channel client
//!
//! Owns the single duplex connection per login and runs the session event
//! loop: channel events, the interactive prompt, and the typing timers are
//! all serialized onto one execution context, so state mutation never needs
//! a lock. On transient disconnects the loop reconnects with exponential
//! backoff; each connection refetches the moderation policy and conversation
//! summaries, and the presence set stays invalid until the server's fresh
//! snapshot arrives.

pub mod events;
pub mod socket;

use anyhow::Result;
use chrono::Utc;
use std::time::{Duration, Instant};
use tokio::io::AsyncBufReadExt;
use tokio::time;

use crate::api::chat as rest;
use crate::api::client::ApiClient;
use crate::error::ApiError;
use crate::state::{ChatState, Compose, SendPolicy, TypingSignal, Update};
use events::{ClientEvent, ServerEvent};
use socket::ChatSocket;

/// Interval driving typing-deadline expiry.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Messages shown when a conversation is opened.
const BACKLOG_LINES: usize = 20;

/// Reason the inner connection loop exited.
enum DisconnectReason {
    /// Clean shutdown (Ctrl+C, :quit, stdin closed). Do not reconnect.
    Shutdown,
    /// Error or server-initiated close. Should reconnect.
    Error(anyhow::Error),
}

enum LineOutcome {
    Continue,
    Quit,
}

/// Run the interactive session with automatic reconnection.
///
/// On transient errors, reconnects with exponential backoff (1s, 2s, 4s,
/// ... capped at 64s), reset after 60s of stable connection. Auth expiry is
/// the one error that ends the session instead of retrying.
pub async fn connect_and_run() -> Result<()> {
    let mut client = ApiClient::new()?;
    let mut backoff = 1u64;

    loop {
        match run_session(&mut client).await {
            Ok(DisconnectReason::Shutdown) => {
                return Ok(());
            }
            Ok(DisconnectReason::Error(e)) => {
                // Connection was stable (>60s), reset backoff before reconnecting.
                backoff = 1;
                tracing::warn!(
                    "Channel disconnected after stable session: {:#}. Reconnecting in 1s...",
                    e,
                );

                tokio::select! {
                    _ = time::sleep(Duration::from_secs(1)) => {}
                    _ = tokio::signal::ctrl_c() => {
                        println!("Shutting down...");
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                if e.downcast_ref::<ApiError>()
                    .map_or(false, ApiError::is_auth_expired)
                {
                    return Err(e);
                }

                tracing::warn!(
                    "Channel disconnected: {:#}. Reconnecting in {}s...",
                    e,
                    backoff
                );

                tokio::select! {
                    _ = time::sleep(Duration::from_secs(backoff)) => {}
                    _ = tokio::signal::ctrl_c() => {
                        println!("Shutting down...");
                        return Ok(());
                    }
                }

                backoff = (backoff * 2).min(64);
            }
        }
    }
}

/// Run one full channel session: REST refresh, connect, event loop.
async fn run_session(client: &mut ApiClient) -> Result<DisconnectReason> {
    // Per-connection REST refresh. Auth failure tears the session down;
    // anything else degrades to defaults so the prompt never blocks.
    let policy = match rest::fetch_send_policy(client).await {
        Ok(p) => p,
        Err(e @ ApiError::AuthExpired) => return Err(e.into()),
        Err(e) => {
            tracing::warn!("Could not fetch send policy: {:#}. Assuming sending allowed.", e);
            SendPolicy::default()
        }
    };
    let summaries = match rest::fetch_conversations(client).await {
        Ok(s) => s,
        Err(e @ ApiError::AuthExpired) => return Err(e.into()),
        Err(e) => {
            tracing::warn!("Could not fetch conversations: {:#}", e);
            Vec::new()
        }
    };

    // Teardown-before-reopen: the previous socket was dropped before we get
    // here, so this is the only live connection for the login.
    let epid = uuid::Uuid::new_v4().to_string();
    let mut socket = ChatSocket::connect(&client.ws_url(&epid)).await?;

    let username = client.username().to_string();
    let mut state = ChatState::new(&username);
    state.on_connect(policy, summaries);

    if !state.moderation.can_send() {
        print_restriction(state.moderation.policy());
    }

    println!(
        "Connected as {}. Commands: :open <peer>, :close, :who, :reveal <n>, :quit; plain text sends.",
        username
    );

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut tick = time::interval(TICK_INTERVAL);

    let connected_at = Instant::now();
    let stability_threshold = Duration::from_secs(60);

    let disconnect_reason = loop {
        tokio::select! {
            event = socket.recv_event() => {
                match event {
                    Ok(Some(event)) => {
                        let updates = state.apply_event(event, Instant::now());
                        render_updates(&state, &updates);
                    }
                    Ok(None) => {
                        break DisconnectReason::Error(anyhow::anyhow!("Channel closed by server"));
                    }
                    Err(e) => {
                        break DisconnectReason::Error(e.context("Channel receive error"));
                    }
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        match handle_line(&line, client, &mut state, &mut socket).await? {
                            LineOutcome::Continue => {}
                            LineOutcome::Quit => break DisconnectReason::Shutdown,
                        }
                    }
                    Ok(None) => break DisconnectReason::Shutdown,
                    Err(e) => {
                        break DisconnectReason::Error(
                            anyhow::Error::from(e).context("stdin read error"),
                        );
                    }
                }
            }
            _ = tick.tick() => {
                let now = Instant::now();
                let (stop, cleared) = state.tick(now);
                if let Some(signal) = stop {
                    send_typing(&mut socket, &state, signal).await?;
                }
                for peer in cleared {
                    if state.conversations.is_open(&peer) {
                        println!("-- {} stopped typing", peer);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break DisconnectReason::Shutdown;
            }
        }
    };

    // Leave no stuck typing indicator behind on teardown.
    if let Some(signal) = state.typing.cancel() {
        let _ = send_typing(&mut socket, &state, signal).await;
    }

    if connected_at.elapsed() >= stability_threshold {
        return Ok(disconnect_reason);
    }

    match disconnect_reason {
        DisconnectReason::Shutdown => Ok(DisconnectReason::Shutdown),
        DisconnectReason::Error(e) => Err(e),
    }
}

/// Handle one line from the prompt: `:` commands or a plain-text send.
async fn handle_line(
    line: &str,
    client: &mut ApiClient,
    state: &mut ChatState,
    socket: &mut ChatSocket,
) -> Result<LineOutcome> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(LineOutcome::Continue);
    }

    if let Some(rest) = line.strip_prefix(':') {
        let mut parts = rest.splitn(2, ' ');
        let cmd = parts.next().unwrap_or("");
        let arg = parts.next().map(str::trim).unwrap_or("");

        match cmd {
            "open" if !arg.is_empty() => open_peer(arg, client, state, socket).await?,
            "open" => println!("usage: :open <peer>"),
            "close" => {
                if let Some(signal) = state.close_conversation() {
                    send_typing(socket, state, signal).await?;
                }
                println!("(conversation closed)");
            }
            "who" => print_roster(state),
            "reveal" => match arg.parse::<usize>() {
                Ok(n) => toggle_reveal(n, state),
                Err(_) => println!("usage: :reveal <message-number>"),
            },
            "quit" | "q" => return Ok(LineOutcome::Quit),
            other => println!("unknown command :{}", other),
        }
        return Ok(LineOutcome::Continue);
    }

    match state.compose(line, Utc::now(), Instant::now()) {
        Compose::Blocked => print_restriction(state.moderation.policy()),
        Compose::Invalid => {
            if state.conversations.open_peer().is_none() {
                println!("(no open conversation -- use :open <peer>)");
            }
        }
        Compose::Sent {
            start,
            message,
            stop,
        } => {
            if let Some(signal) = start {
                send_typing(socket, state, signal).await?;
            }
            socket
                .send_event(&ClientEvent::SendMessage {
                    sender: message.sender.clone(),
                    receiver: message.receiver.clone(),
                    message: message.body.clone(),
                    timestamp: message.sent_at,
                })
                .await?;
            if let Some(signal) = stop {
                send_typing(socket, state, signal).await?;
            }
            println!(
                "[{}] {} -> {}: {}",
                message.sent_at.format("%H:%M"),
                message.sender,
                message.receiver,
                message.body
            );
        }
    }
    Ok(LineOutcome::Continue)
}

/// Open a conversation: unconditional history refetch (cached state may be
/// stale after reconnect/relogin), tagged with the store's generation so a
/// slow response cannot overwrite a newer selection.
async fn open_peer(
    peer: &str,
    client: &mut ApiClient,
    state: &mut ChatState,
    socket: &mut ChatSocket,
) -> Result<()> {
    let (generation, stop) = state.open_conversation(peer);
    if let Some(signal) = stop {
        send_typing(socket, state, signal).await?;
    }

    // A failed fetch shows an empty conversation rather than blocking the
    // prompt; auth expiry is the exception and ends the session.
    let messages = match rest::fetch_history(client, peer).await {
        Ok(m) => m,
        Err(e @ ApiError::AuthExpired) => return Err(e.into()),
        Err(e) => {
            tracing::warn!("History fetch for {} failed: {:#}", peer, e);
            Vec::new()
        }
    };
    state.conversations.apply_history(peer, generation, messages);

    let status = if state.presence.is_online(peer) {
        "online"
    } else {
        "offline"
    };
    println!("-- {} ({})", peer, status);
    render_backlog(state, peer);
    Ok(())
}

fn render_backlog(state: &ChatState, peer: &str) {
    let messages = state.conversations.messages(peer);
    if messages.is_empty() {
        println!("(no messages yet)");
        return;
    }

    let start = messages.len().saturating_sub(BACKLOG_LINES);
    for (i, msg) in messages.iter().enumerate().skip(start) {
        let flag = if msg.is_flagged { " [flagged]" } else { "" };
        println!(
            "{:>3} [{}] {}: {}{}",
            i,
            msg.sent_at.format("%H:%M"),
            msg.sender,
            state.moderation.display_body(msg),
            flag
        );
    }
}

/// Toggle reveal/suppress for one flagged message in the open conversation.
fn toggle_reveal(n: usize, state: &mut ChatState) {
    let peer = match state.conversations.open_peer() {
        Some(p) => p.to_string(),
        None => {
            println!("(no open conversation)");
            return;
        }
    };

    let key = match state.conversations.messages(&peer).get(n) {
        Some(msg) if msg.is_flagged => msg.key(),
        Some(_) => {
            println!("(message {} is not flagged)", n);
            return;
        }
        None => {
            println!("(no message {})", n);
            return;
        }
    };

    state.moderation.toggle_reveal(key);
    if let Some(msg) = state.conversations.messages(&peer).get(n) {
        println!(
            "{:>3} [{}] {}: {}",
            n,
            msg.sent_at.format("%H:%M"),
            msg.sender,
            state.moderation.display_body(msg)
        );
    }
}

fn print_roster(state: &ChatState) {
    if !state.presence.is_fresh() {
        println!("(presence not yet synced)");
    } else {
        let online = state.presence.online_peers();
        if online.is_empty() {
            println!("(nobody online)");
        } else {
            println!("online: {}", online.join(", "));
        }
    }

    for peer in state.conversations.peers() {
        let unread = state.conversations.unread(peer);
        if unread > 0 {
            println!("  {} ({} unread)", peer, unread);
        }
    }
}

fn print_restriction(policy: &SendPolicy) {
    println!("-- you are blocked from sending messages");
    if policy.max_allowed > 0 {
        println!(
            "   flagged messages: {}/{}",
            policy.flagged_count, policy.max_allowed
        );
    }
    if let Some(ref notice) = policy.notice {
        println!("   {}", notice);
    }
}

fn render_updates(state: &ChatState, updates: &[Update]) {
    for update in updates {
        match update {
            Update::MessageReceived {
                peer,
                shown_body,
                unread,
                open,
            } => {
                if *open {
                    println!("{}: {}", peer, shown_body);
                } else {
                    println!("-- new message from {} ({} unread)", peer, unread);
                }
            }
            Update::Delivered { .. } => {
                // Already logged at debug level by the state layer.
            }
            Update::PresenceReplaced { online } => {
                println!("-- presence synced: {} online", online);
            }
            Update::PeerJoined { peer } => {
                println!("-- {} joined", peer);
            }
            Update::TypingChanged { peer, is_typing } => {
                if *is_typing && state.conversations.is_open(peer) {
                    println!("-- {} is typing...", peer);
                }
            }
            Update::ChannelError { message } => {
                println!("-- server error: {}", message);
            }
        }
    }
}

async fn send_typing(socket: &mut ChatSocket, state: &ChatState, signal: TypingSignal) -> Result<()> {
    socket
        .send_event(&ClientEvent::Typing {
            sender: state.local_user().to_string(),
            receiver: signal.receiver,
            is_typing: signal.is_typing,
        })
        .await
}

/// One-shot send: open the channel, emit the message, wait briefly for the
/// delivery ack, close.
pub async fn send_once(to: &str, message: &str) -> Result<()> {
    anyhow::ensure!(!message.trim().is_empty(), "Message body is empty");

    let mut client = ApiClient::new()?;

    // Advisory client-side gate; the server re-validates on its end.
    match rest::fetch_send_policy(&mut client).await {
        Ok(policy) if !policy.can_send => {
            anyhow::bail!(
                "Sending is blocked ({}/{} flagged messages)",
                policy.flagged_count,
                policy.max_allowed
            );
        }
        Ok(_) => {}
        Err(e @ ApiError::AuthExpired) => return Err(e.into()),
        Err(e) => tracing::warn!("Could not fetch send policy: {:#}", e),
    }

    let epid = uuid::Uuid::new_v4().to_string();
    let mut socket = ChatSocket::connect(&client.ws_url(&epid)).await?;

    socket
        .send_event(&ClientEvent::SendMessage {
            sender: client.username().to_string(),
            receiver: to.to_string(),
            message: message.trim().to_string(),
            timestamp: Utc::now(),
        })
        .await?;

    match time::timeout(Duration::from_secs(5), wait_for_ack(&mut socket)).await {
        Ok(Ok(Some(status))) => println!("Message sent ({}).", status),
        Ok(Ok(None)) => println!("Message sent (channel closed before ack)."),
        Ok(Err(e)) => return Err(e),
        Err(_) => println!("Message sent (no delivery ack within 5s)."),
    }

    Ok(())
}

async fn wait_for_ack(socket: &mut ChatSocket) -> Result<Option<String>> {
    loop {
        match socket.recv_event().await? {
            Some(ServerEvent::MessageSent { status }) => return Ok(Some(status)),
            Some(ServerEvent::Error { message }) => {
                anyhow::bail!("Server rejected message: {}", message);
            }
            Some(_) => continue,
            None => return Ok(None),
        }
    }
}
