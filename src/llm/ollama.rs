//! Ollama gateway client.
//!
//! One non-streaming completion endpoint plus a liveness probe. Every
//! network or server failure is absorbed here and turned into a fixed
//! fallback string; nothing past this module ever sees an LLM error.

use std::ops::Deref;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Returned when the model answered with no `response` field.
pub const FALLBACK_EMPTY: &str = "I have no words.";
/// Returned on a non-success HTTP status from the endpoint.
pub const FALLBACK_SERVER: &str = "Sorry, my brain is offline.";
/// Returned when the request itself failed (refused, timeout, bad body).
pub const FALLBACK_TRANSPORT: &str = "I encountered a neural error.";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

/// Explicit lifecycle of the underlying HTTP handle. Built on first use,
/// reused until `close()`, rebuilt lazily afterwards.
#[derive(Debug)]
enum ConnectionState {
    Unopened,
    Open(Client),
    Closed,
}

#[derive(Debug)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    handle: Mutex<ConnectionState>,
    opens: AtomicU64,
}

impl OllamaClient {
    /// Validates the endpoint before anything touches the network. Only
    /// plain or secure HTTP is accepted; `file://` and friends are refused
    /// outright as a minimal SSRF guard.
    pub fn new(host: &str, model: &str) -> Result<Self, ConfigError> {
        let parsed = Url::parse(host)
            .map_err(|e| ConfigError::Validation(format!("invalid LLM endpoint '{host}': {e}")))?;

        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ConfigError::Validation(format!(
                    "unsupported LLM endpoint scheme '{other}' (expected http or https)"
                )));
            }
        }

        Ok(Self {
            base_url: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            handle: Mutex::new(ConnectionState::Unopened),
            opens: AtomicU64::new(0),
        })
    }

    pub fn host(&self) -> &str {
        &self.base_url
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ConnectionState> {
        self.handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Lazily build the HTTP handle. Reused across calls; a fresh one is
    /// only built after an explicit `close()`.
    fn client(&self) -> Client {
        let mut state = self.lock_state();
        if let ConnectionState::Open(client) = &*state {
            return client.clone();
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300)) // local models can be slow
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        self.opens.fetch_add(1, Ordering::Relaxed);
        *state = ConnectionState::Open(client.clone());
        client
    }

    /// How many times the HTTP handle has been built. Diagnostic only.
    pub fn times_opened(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.lock_state(), ConnectionState::Open(_))
    }

    /// Drop the HTTP handle. Idempotent; fine to call before first use.
    pub fn close(&self) {
        *self.lock_state() = ConnectionState::Closed;
    }

    /// Borrow the client with release-on-drop semantics, guaranteeing the
    /// handle is closed on every exit path of the enclosing scope.
    pub fn scoped(&self) -> ScopedClient<'_> {
        ScopedClient { inner: self }
    }

    /// Liveness probe against `/api/tags`. Failures are logged, never raised.
    pub async fn check_connectivity(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client().get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::error!("Could not connect to Ollama at {}: {e}", self.base_url);
                false
            }
        }
    }

    /// Single non-streaming completion round trip. Infallible by contract:
    /// every failure mode maps to one of the fixed fallback strings.
    pub async fn complete(&self, prompt: &str) -> String {
        let url = format!("{}/api/generate", self.base_url);
        let payload = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let resp = match self.client().post(&url).json(&payload).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!("LLM request failed: {e}");
                return FALLBACK_TRANSPORT.to_string();
            }
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            tracing::error!("Ollama error: {status} - {body}");
            return FALLBACK_SERVER.to_string();
        }

        match resp.json::<GenerateResponse>().await {
            Ok(data) => data
                .response
                .unwrap_or_else(|| FALLBACK_EMPTY.to_string()),
            Err(e) => {
                tracing::error!("Ollama response unreadable: {e}");
                FALLBACK_TRANSPORT.to_string()
            }
        }
    }
}

/// RAII wrapper from [`OllamaClient::scoped`]; closes the handle on drop.
pub struct ScopedClient<'a> {
    inner: &'a OllamaClient,
}

impl Deref for ScopedClient<'_> {
    type Target = OllamaClient;

    fn deref(&self) -> &Self::Target {
        self.inner
    }
}

impl Drop for ScopedClient<'_> {
    fn drop(&mut self) {
        self.inner.close();
    }
}
