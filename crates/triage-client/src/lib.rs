//! HTTP client for the triage backend.
//!
//! Every response body is read as text first and then parsed into the
//! `protocol` types; anything that does not fit becomes
//! [`BackendError::Malformed`] instead of leaking loosely-typed JSON into the
//! controller.

use async_trait::async_trait;
use protocol::{ChatRequest, ChatResponse, ErrorBody, HealthResponse, HistoryEntry, SessionDetails, StartSessionResponse, TriageResponse};
use reqwest::{Client as Http, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use triage_core::{BackendError, ChatReply, HealthStatus, SessionGreeting, TriageBackend, TriageResult};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct Client {
    http: Http,
    base_url: String,
    timeout: Duration,
}

impl Client {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let http = Http::builder()
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(format!("cannot build http client: {}", e)))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url, timeout })
    }

    /// Convenience: pick up `TRIAGE_API_URL` and `TRIAGE_TIMEOUT_SECS` from env.
    pub fn from_env() -> Result<Self, BackendError> {
        let base_url = std::env::var("TRIAGE_API_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let timeout = std::env::var("TRIAGE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        Self::new(base_url, timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `{base}/session/{id}[/{tail}]`. Session ids are opaque, so the id is
    /// percent-encoded as a single path segment.
    fn session_url(&self, session_id: &str, tail: Option<&str>) -> Result<Url, BackendError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| BackendError::Transport(format!("invalid base url {}: {}", self.base_url, e)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| BackendError::Transport(format!("base url {} cannot take a path", self.base_url)))?;
            segments.pop_if_empty().push("session").push(session_id);
            if let Some(tail) = tail {
                segments.push(tail);
            }
        }
        Ok(url)
    }

    async fn execute<T: DeserializeOwned>(&self, what: &str, request: RequestBuilder) -> Result<T, BackendError> {
        let resp = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.transport_error(e))?;
        debug!(request = what, status = status.as_u16(), bytes = body.len(), "triage backend responded");

        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        serde_json::from_str(&body).map_err(|e| BackendError::Malformed(format!("{}: {}", what, e)))
    }

    fn transport_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Transport(e.to_string())
        }
    }

    /// `GET /session/{id}`, diagnostics only.
    pub async fn session_details(&self, session_id: &str) -> Result<SessionDetails, BackendError> {
        let url = self.session_url(session_id, None)?;
        self.execute("session details", self.http.get(url)).await
    }
}

/// The backend reports failures as `{"error": ...}` or `{"message": ...}`;
/// fall back to the raw body, then to the status reason.
fn status_error(status: StatusCode, body: &str) -> BackendError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.text().map(str::to_string))
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
    BackendError::Status { status: status.as_u16(), message }
}

#[async_trait]
impl TriageBackend for Client {
    async fn start_session(&self) -> Result<SessionGreeting, BackendError> {
        let resp: StartSessionResponse = self.execute("start session", self.http.post(self.url("/start-session"))).await?;
        SessionGreeting::try_from(resp)
    }

    async fn send_message(&self, session_id: &str, message: &str, history: &[HistoryEntry]) -> Result<ChatReply, BackendError> {
        let body = ChatRequest {
            session_id: session_id.to_string(),
            message: message.to_string(),
            message_history: history.to_vec(),
        };
        let resp: ChatResponse = self.execute("chat", self.http.post(self.url("/chat")).json(&body)).await?;
        Ok(resp.into())
    }

    async fn fetch_triage(&self, session_id: &str) -> Result<TriageResult, BackendError> {
        let url = self.session_url(session_id, Some("triage"))?;
        let resp: TriageResponse = self.execute("triage", self.http.get(url)).await?;
        Ok(TriageResult::from_wire(resp, session_id))
    }

    async fn health(&self) -> Result<HealthStatus, BackendError> {
        let resp: HealthResponse = self.execute("health", self.http.get(self.url("/health"))).await?;
        Ok(resp.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_prefers_body_fields() {
        let err = status_error(StatusCode::BAD_REQUEST, r#"{"error": "session_id and message are required"}"#);
        assert_eq!(
            err,
            BackendError::Status { status: 400, message: "session_id and message are required".into() }
        );

        let err = status_error(StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded");
        assert_eq!(err, BackendError::Status { status: 500, message: "upstream exploded".into() });

        let err = status_error(StatusCode::SERVICE_UNAVAILABLE, "");
        assert_eq!(err, BackendError::Status { status: 503, message: "Service Unavailable".into() });
    }

    #[test]
    fn test_base_url_is_normalised() {
        let client = Client::new("http://localhost:5000/api/", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(client.base_url(), "http://localhost:5000/api");
        assert_eq!(client.url("/chat"), "http://localhost:5000/api/chat");
    }

    #[test]
    fn test_session_id_is_one_encoded_segment() {
        let client = Client::new("http://localhost:5000/api/", DEFAULT_TIMEOUT).unwrap();
        let url = client.session_url("s1", Some("triage")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/api/session/s1/triage");

        let url = client.session_url("a/b c?x#y", Some("triage")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/api/session/a%2Fb%20c%3Fx%23y/triage");
        assert_eq!(url.path_segments().unwrap().count(), 4);

        let url = client.session_url("../admin", None).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/api/session/..%2Fadmin");
    }
}
