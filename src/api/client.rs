//! Authenticated HTTP client for the chat REST API
//!
//! Wraps reqwest::Client with bearer injection and on-demand token refresh.
//! A 401 is retried once after a forced refresh; a second 401 tears down the
//! session via the logout collaborator and surfaces `AuthExpired`.

use anyhow::Result;

use crate::error::ApiError;
use crate::session::SessionContext;

/// Authenticated client owning the session context.
pub struct ApiClient {
    http: reqwest::Client,
    ctx: SessionContext,
}

impl ApiClient {
    /// Load the stored session and build a client.
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            ctx: SessionContext::load()?,
        })
    }

    pub fn username(&self) -> &str {
        self.ctx.username()
    }

    pub fn server_url(&self) -> String {
        self.ctx.server_url()
    }

    /// Event-channel URL: identity is bound server-side by the `username`
    /// query parameter; `epid` is a per-connection endpoint id for
    /// correlation in server logs.
    pub fn ws_url(&self, epid: &str) -> String {
        let base = self
            .ctx
            .server_url()
            .replace("https://", "wss://")
            .replace("http://", "ws://");
        let e = |s: &str| url::form_urlencoded::byte_serialize(s.as_bytes()).collect::<String>();
        format!(
            "{}/ws/chat?username={}&epid={}",
            base,
            e(self.ctx.username()),
            e(epid),
        )
    }

    /// GET request with bearer auth (one refresh-and-retry on 401).
    pub async fn get(&mut self, path: &str) -> std::result::Result<reqwest::Response, ApiError> {
        let url = format!("{}{}", self.ctx.server_url(), path);
        let token = self.ctx.bearer_token().await?;
        tracing::debug!("GET {}", url);

        let resp = self.http.get(&url).bearer_auth(&token).send().await?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            tracing::debug!("401 for {}, refreshing token and retrying", url);
            self.ctx.refresh().await?;
            let token = self.ctx.bearer_token().await?;
            let retry = self.http.get(&url).bearer_auth(&token).send().await?;
            if retry.status() == reqwest::StatusCode::UNAUTHORIZED {
                self.ctx.force_logout();
                return Err(ApiError::AuthExpired);
            }
            return check_response(retry, &url).await;
        }

        check_response(resp, &url).await
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(
    resp: reqwest::Response,
    url: &str,
) -> std::result::Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ApiError::Http {
            status: status.as_u16(),
            url: url.to_string(),
            body,
        });
    }
    Ok(resp)
}
