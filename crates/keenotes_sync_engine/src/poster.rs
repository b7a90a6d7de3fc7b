//! Outbound note submission.
//!
//! Independent of the sync channel: a posted note comes back to every client
//! through the normal sync path, so this module never touches the watermark.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use keenotes_crypto::{EnvelopeCodec, Password};
use keenotes_sync_protocol::{PostNoteRequest, PostNoteResponse};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, info};

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

/// HTTP client abstraction.
///
/// Implement this trait to post through a different client, or to capture
/// requests in tests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a JSON POST with a bearer token.
    async fn post_json(&self, url: &str, bearer: &str, body: String) -> SyncResult<HttpResponse>;
}

/// [`HttpClient`] over `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client with a per-request timeout.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn post_json(&self, url: &str, bearer: &str, body: String) -> SyncResult<HttpResponse> {
        let response = self
            .client
            .post(url)
            .bearer_auth(bearer)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

/// Encrypts notes and submits them.
pub struct NotePoster<H: HttpClient> {
    http: H,
    codec: EnvelopeCodec,
    password: Password,
    post_url: String,
    token: String,
    channel: String,
}

impl<H: HttpClient> NotePoster<H> {
    /// Creates a poster. Refuses to act without endpoint, token or password.
    pub fn new(config: &SyncConfig, http: H, password: Password) -> SyncResult<Self> {
        config.validate_posting()?;
        if password.is_empty() {
            return Err(SyncError::Configuration("missing encryption password".into()));
        }
        Ok(Self {
            http,
            codec: EnvelopeCodec::new(),
            password,
            post_url: config.post_url.clone(),
            token: config.require_token()?.to_string(),
            channel: config.channel.clone(),
        })
    }

    /// Encrypts `text` and posts it, returning the server-assigned id.
    pub async fn post(&self, text: &str) -> SyncResult<i64> {
        if text.trim().is_empty() {
            return Err(SyncError::Format("note is empty".into()));
        }

        let codec = self.codec;
        let password = self.password.clone();
        let plaintext = text.to_string();
        let envelope = tokio::task::spawn_blocking(move || codec.encrypt(&plaintext, &password))
            .await
            .map_err(|_| SyncError::Cancelled)??;

        let request = PostNoteRequest {
            channel: self.channel.clone(),
            text: envelope,
            ts: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            encrypted: true,
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| SyncError::Protocol(format!("failed to encode note: {e}")))?;

        debug!(url = %self.post_url, bytes = body.len(), "posting note");
        let response = self.http.post_json(&self.post_url, &self.token, body).await?;
        let id = parse_post_response(&response)?;
        info!(id, "note posted");
        Ok(id)
    }
}

fn parse_post_response(response: &HttpResponse) -> SyncResult<i64> {
    match response.status {
        200..=299 => {}
        401 | 403 => {
            return Err(SyncError::AuthenticationFailed(format!(
                "server returned {}",
                response.status
            )))
        }
        500..=599 => {
            return Err(SyncError::ServerError(format!(
                "server returned {}",
                response.status
            )))
        }
        status => {
            return Err(SyncError::Protocol(format!(
                "unexpected status {status}: {}",
                response.body
            )))
        }
    }

    let parsed: PostNoteResponse = serde_json::from_str(&response.body)
        .map_err(|e| SyncError::Protocol(format!("invalid post response: {e}")))?;
    parsed.note_id().ok_or_else(|| {
        SyncError::ServerError(
            parsed
                .message
                .unwrap_or_else(|| "server did not assign an id".to_string()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn success_yields_id() {
        assert_eq!(parse_post_response(&response(200, r#"{"id":9}"#)).unwrap(), 9);
        assert_eq!(
            parse_post_response(&response(201, r#"{"success":true,"id":10}"#)).unwrap(),
            10
        );
    }

    #[test]
    fn failures_are_classified() {
        assert!(matches!(
            parse_post_response(&response(401, "")),
            Err(SyncError::AuthenticationFailed(_))
        ));
        let err = parse_post_response(&response(503, "")).unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            parse_post_response(&response(400, "bad")),
            Err(SyncError::Protocol(_))
        ));
        let err =
            parse_post_response(&response(200, r#"{"success":false,"message":"quota"}"#))
                .unwrap_err();
        assert_eq!(err.to_string(), "server error: quota");
    }

    #[test]
    fn poster_refuses_incomplete_config() {
        let http = ReqwestClient::new(Duration::from_secs(1)).unwrap();
        let no_token = SyncConfig::new("https://h");
        assert!(matches!(
            NotePoster::new(&no_token, http.clone(), Password::new("p")),
            Err(SyncError::Configuration(_))
        ));

        let config = SyncConfig::new("https://h").with_token("t");
        assert!(matches!(
            NotePoster::new(&config, http, Password::new("")),
            Err(SyncError::Configuration(_))
        ));
    }
}
