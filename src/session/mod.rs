//! Session token provider
//!
//! The messaging core consumes exactly two things from the auth flow: "get
//! the current bearer token" (refreshed on demand shortly before expiry) and
//! "on auth failure, force logout". Both live behind [`SessionContext`], an
//! explicit object handed to each component -- there is no global auth state.

pub mod tokens;

pub use tokens::{StoredToken, TokenStore};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::config::Config;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    refresh_token: Option<String>,
    username: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
}

/// Explicit session object with well-defined init (login) and teardown
/// (logout) lifecycle.
pub struct SessionContext {
    config: Config,
    http: reqwest::Client,
}

impl SessionContext {
    /// Load the stored session. Fails if nobody is logged in.
    pub fn load() -> Result<Self> {
        let config = Config::load()?;
        if config.access_token.is_none() {
            bail!("Not logged in. Run 'feedchat-cli login' first.");
        }
        if config.username.is_none() {
            bail!("Stored session has no username. Run 'feedchat-cli login' again.");
        }
        Ok(Self {
            config,
            http: reqwest::Client::new(),
        })
    }

    pub fn username(&self) -> &str {
        self.config.username.as_deref().unwrap_or("")
    }

    pub fn server_url(&self) -> String {
        self.config.server_url()
    }

    /// Current bearer token, refreshed on demand when close to expiry.
    pub async fn bearer_token(&mut self) -> std::result::Result<String, ApiError> {
        let token = match self.config.get_access_token() {
            Some(t) => t,
            None => return Err(ApiError::AuthExpired),
        };
        if !token.is_expired() {
            return Ok(token.token);
        }

        tracing::info!("Access token near expiry, refreshing");
        self.refresh().await?;
        self.config
            .get_access_token()
            .map(|t| t.token)
            .ok_or(ApiError::AuthExpired)
    }

    /// Exchange the refresh token for a fresh access token.
    pub async fn refresh(&mut self) -> std::result::Result<(), ApiError> {
        let refresh_token = match self.config.get_refresh_token() {
            Some(t) => t,
            None => {
                self.force_logout();
                return Err(ApiError::AuthExpired);
            }
        };

        let url = format!("{}/api/refresh", self.server_url());
        tracing::debug!("POST {}", url);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&refresh_token)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.force_logout();
            return Err(ApiError::AuthExpired);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Http {
                status: status.as_u16(),
                url,
                body,
            });
        }

        let body: RefreshResponse = resp.json().await?;
        self.config.set_access_token(body.access_token);
        if let Err(e) = self.config.save() {
            tracing::warn!("Failed to persist refreshed token: {:#}", e);
        }
        Ok(())
    }

    /// Logout collaborator: clear the stored session so the next command
    /// lands back at login.
    pub fn force_logout(&mut self) {
        tracing::warn!("Auth failure, clearing local session");
        self.config.clear_tokens();
        if let Err(e) = self.config.save() {
            tracing::warn!("Failed to clear stored session: {:#}", e);
        }
    }
}

/// Log in with email + password and store the session.
pub async fn login(email: &str, password: Option<String>, server: Option<String>) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(server) = server {
        config.server_url = Some(server.trim_end_matches('/').to_string());
    }

    let password = match password {
        Some(p) => p,
        None => prompt_password()?,
    };

    let url = format!("{}/api/login", config.server_url());
    let http = reqwest::Client::new();
    let resp = http
        .post(&url)
        .json(&serde_json::json!({ "email": email, "password": password }))
        .send()
        .await
        .context("Login request failed")?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("Login failed: {} -- {}", status, body);
    }

    let body: LoginResponse = resp.json().await.context("Failed to parse login response")?;
    let username = body
        .username
        .context("Login response missing username")?;

    config.set_access_token(body.access_token);
    if let Some(rt) = body.refresh_token {
        config.set_refresh_token(rt);
    }
    config.username = Some(username.clone());
    config.email = body.email.or_else(|| Some(email.to_string()));
    config.save()?;

    println!("Logged in as {}", username);
    Ok(())
}

/// Log out and clear cached credentials.
pub async fn logout() -> Result<()> {
    let mut config = Config::load()?;
    config.clear_tokens();
    config.save()?;
    println!("Logged out.");
    Ok(())
}

/// Show current authentication status.
pub async fn status() -> Result<()> {
    let config = Config::load()?;

    println!("\nSession Status:");
    println!("  Server: {}", config.server_url());
    match config.username {
        Some(ref username) => println!("  User: {}", username),
        None => {
            println!("  Not logged in.");
            return Ok(());
        }
    }
    if let Some(ref email) = config.email {
        println!("  Email: {}", email);
    }
    match config.access_token {
        Some(ref token) if token.is_expired() => println!("  Access token: expired"),
        Some(_) => println!("  Access token: valid"),
        None => println!("  Access token: none"),
    }
    println!(
        "  Refresh token: {}",
        if config.refresh_token.is_some() {
            "present"
        } else {
            "none"
        }
    );

    Ok(())
}

fn prompt_password() -> Result<String> {
    use std::io::Write;

    print!("Password: ");
    std::io::stdout().flush().ok();
    let mut pw = String::new();
    std::io::stdin()
        .read_line(&mut pw)
        .context("Failed to read password")?;
    Ok(pw.trim_end().to_string())
}
