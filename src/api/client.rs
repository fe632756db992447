//! Authenticated HTTP client for the storefront chat endpoints
//!
//! Wraps reqwest::Client with the Django session cookie and CSRF header.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::Config;
use crate::error::ChatError;

/// Client bound to one storefront origin and one logged-in session.
#[derive(Clone)]
pub struct ChatHttpClient {
    http: reqwest::Client,
    base: Url,
    session_id: Option<String>,
    csrf_token: Option<String>,
}

impl ChatHttpClient {
    /// Build a client from config.
    pub fn new(config: &Config) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid base_url '{}'", config.base_url))?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base,
            session_id: config.session_id.clone(),
            csrf_token: config.csrf_token.clone(),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// `Cookie` header value carrying the session and CSRF cookies.
    pub fn cookie_header(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(ref sid) = self.session_id {
            parts.push(format!("sessionid={}", sid));
        }
        if let Some(ref csrf) = self.csrf_token {
            parts.push(format!("csrftoken={}", csrf));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }

    fn url(&self, path: &str) -> Result<Url, ChatError> {
        self.base
            .join(path)
            .map_err(|e| ChatError::Protocol(format!("bad endpoint path {}: {}", path, e)))
    }

    /// GET a JSON resource.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ChatError> {
        let url = self.url(path)?;
        tracing::debug!("GET {}", url);

        let mut req = self.http.get(url.clone());
        if let Some(cookie) = self.cookie_header() {
            req = req.header(reqwest::header::COOKIE, cookie);
        }
        let resp = req.send().await?;
        let resp = check_response(resp, url.as_str()).await?;
        Ok(resp.json().await?)
    }

    /// POST a form and decode the JSON reply, whatever the HTTP status.
    ///
    /// The send endpoints answer errors with a JSON body too, so the status
    /// code is returned alongside the decoded body for the caller to judge.
    pub async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        fields: &[(&str, &str)],
    ) -> Result<(reqwest::StatusCode, T), ChatError> {
        let url = self.url(path)?;
        tracing::debug!("POST {}", url);

        let mut req = self.http.post(url.clone()).form(fields);
        if let Some(cookie) = self.cookie_header() {
            req = req.header(reqwest::header::COOKIE, cookie);
        }
        if let Some(ref csrf) = self.csrf_token {
            req = req.header("X-CSRFToken", csrf);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        let parsed = decode_reply(status, url.as_str(), &body)?;
        Ok((status, parsed))
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response, ChatError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(status_failure(status, url, &body))
}

/// Error for a non-success status.
fn status_failure(status: reqwest::StatusCode, url: &str, body: &str) -> ChatError {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return ChatError::Protocol(format!(
            "{} for {}. Session may be invalid -- log in again and run 'support-chat configure'.",
            status.as_u16(),
            url
        ));
    }
    ChatError::Protocol(format!("HTTP {} for {}: {}", status.as_u16(), url, body))
}

fn decode_reply<T: DeserializeOwned>(
    status: reqwest::StatusCode,
    url: &str,
    body: &str,
) -> Result<T, ChatError> {
    serde_json::from_str(body).map_err(|e| {
        ChatError::Protocol(format!(
            "invalid JSON from {} (HTTP {}): {}",
            url,
            status.as_u16(),
            e
        ))
    })
}
