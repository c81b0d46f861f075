//! Session/retry transport.
//!
//! [`HttpBackend`] performs exactly one blocking attempt. [`Session`] layers the
//! retry loop, per-call timeouts and the bearer token on top of it; every other
//! component talks to the service through a `Session`.
//!
//! TLS certificate verification is disabled in [`ReqwestBackend`]. The clusters
//! this client targets serve internal or self-signed certificates, and the
//! operator trusts the configured host explicitly.

use crate::config::{CallKind, ClientConfig};
use crate::error::{TransportError, WkcError, WkcResult};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A fully prepared request, as handed to the backend.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub bearer: Option<String>,
    pub body: Option<Value>,
    pub no_cache: bool,
    pub timeout: Duration,
}

impl ApiRequest {
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json_body(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx answer into [`WkcError::ServerRejected`].
    pub fn ensure_success(self, operation: &str) -> WkcResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(WkcError::ServerRejected {
                operation: operation.to_string(),
                status: self.status,
                body: self.body,
            })
        }
    }

    pub fn json<T: DeserializeOwned>(&self, operation: &str) -> WkcResult<T> {
        serde_json::from_str(&self.body).map_err(|e| WkcError::InvalidResponse {
            operation: operation.to_string(),
            message: e.to_string(),
        })
    }

    /// Body as JSON; an empty body reads as `null`.
    pub fn value(&self, operation: &str) -> WkcResult<Value> {
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        self.json(operation)
    }
}

/// One blocking HTTP attempt.
pub trait HttpBackend: Send + Sync {
    fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

impl<F> HttpBackend for F
where
    F: Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync,
{
    fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self(request)
    }
}

pub struct ReqwestBackend {
    client: reqwest::blocking::Client,
}

impl ReqwestBackend {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpBackend for ReqwestBackend {
    fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if request.no_cache {
            builder = builder.header(reqwest::header::CACHE_CONTROL, "no-cache");
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    url: request.url.clone(),
                    timeout: request.timeout,
                }
            } else {
                TransportError::Network {
                    url: request.url.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().map_err(|e| TransportError::Network {
            url: request.url.clone(),
            message: format!("failed to read response body: {e}"),
        })?;
        Ok(ApiResponse { status, body })
    }
}

/// A call description before the session fills in host, token and timeout.
#[derive(Debug, Clone)]
pub struct Call {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    kind: CallKind,
    no_cache: bool,
}

impl Call {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            kind: CallKind::Default,
            no_cache: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn kind(mut self, kind: CallKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }
}

/// Host + token + retry policy, shared by every component of one client.
#[derive(Clone)]
pub struct Session {
    backend: Arc<dyn HttpBackend>,
    config: Arc<ClientConfig>,
    token: Option<String>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.config.host)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl Session {
    pub fn new(config: ClientConfig, backend: Arc<dyn HttpBackend>) -> Self {
        Self {
            backend,
            config: Arc::new(config),
            token: None,
        }
    }

    /// Same host and backend, carrying `token` on every call. The token is
    /// never refreshed.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: Arc::clone(&self.config),
            token: Some(token.into()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Issue `call`, retrying transient statuses with backoff.
    ///
    /// Transport faults are returned immediately. A status still in the
    /// force-list after the retry budget is spent becomes
    /// [`TransportError::RetriesExhausted`]. Any other status is returned to
    /// the caller as-is.
    pub fn send(&self, call: Call) -> WkcResult<ApiResponse> {
        let policy = self.config.retry_for(call.kind);
        let request = ApiRequest {
            method: call.method,
            url: format!("{}{}", self.config.host, call.path),
            path: call.path,
            query: call.query,
            bearer: self.token.clone(),
            body: call.body,
            no_cache: call.no_cache,
            timeout: self.config.timeouts.for_call(call.kind),
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            debug!(method = %request.method, url = %request.url, attempt, "sending request");
            let response = self.backend.execute(&request)?;
            if !policy.should_retry(response.status) {
                return Ok(response);
            }
            if attempt > policy.total {
                return Err(TransportError::RetriesExhausted {
                    url: request.url.clone(),
                    status: response.status,
                    attempts: attempt,
                }
                .into());
            }
            let delay = policy.backoff(attempt);
            warn!(
                method = %request.method,
                url = %request.url,
                status = response.status,
                attempt,
                "transient status, retrying in {:?}",
                delay
            );
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
    }
}
