//! Credential sources and the login exchange.
//!
//! A [`TokenSource`] knows where username/password come from; the default
//! [`TokenSource::fetch_token`] posts them to the login endpoint. The token is
//! obtained once per client and never renewed.

use crate::error::{WkcError, WkcResult};
use crate::transport::{Call, Session};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const AUTHORIZE_PATH: &str = "/icp4d-api/v1/authorize";

#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub trait TokenSource {
    fn credentials(&self) -> WkcResult<Credentials>;

    fn fetch_token(&self, session: &Session) -> WkcResult<String> {
        let credentials = self.credentials()?;
        authorize(session, &credentials)
    }
}

/// JSON file holding `{"username": ..., "password": ...}`.
#[derive(Debug, Clone)]
pub struct FileTokenSource {
    path: PathBuf,
}

impl FileTokenSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenSource for FileTokenSource {
    fn credentials(&self) -> WkcResult<Credentials> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            WkcError::Credentials(format!("failed to read {}: {e}", self.path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            WkcError::Credentials(format!(
                "{} is not a {{\"username\", \"password\"}} JSON object: {e}",
                self.path.display()
            ))
        })
    }
}

/// Asks on the terminal: plain prompt for the username, masked for the password.
#[derive(Debug, Clone, Default)]
pub struct PromptTokenSource;

impl TokenSource for PromptTokenSource {
    fn credentials(&self) -> WkcResult<Credentials> {
        let mut stdout = io::stdout();
        write!(stdout, "1) Please enter your ID: ")?;
        stdout.flush()?;

        let mut username = String::new();
        io::stdin().lock().read_line(&mut username)?;
        let username = username.trim().to_string();
        if username.is_empty() {
            return Err(WkcError::Credentials("empty username".to_string()));
        }

        let password = rpassword::prompt_password("2) Password: ")?;
        Ok(Credentials::new(username, password))
    }
}

/// Credentials handed in by the caller (batch jobs, tests).
#[derive(Debug, Clone)]
pub struct DirectTokenSource {
    credentials: Credentials,
}

impl DirectTokenSource {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::new(username, password),
        }
    }
}

impl TokenSource for DirectTokenSource {
    fn credentials(&self) -> WkcResult<Credentials> {
        Ok(self.credentials.clone())
    }
}

#[derive(Deserialize)]
struct AuthorizeResponse {
    token: String,
}

/// Exchange credentials for a bearer token.
pub fn authorize(session: &Session, credentials: &Credentials) -> WkcResult<String> {
    info!(user = %credentials.username, host = %session.host(), "requesting access token");
    let body = json!({
        "username": credentials.username,
        "password": credentials.password,
    });

    let result = session
        .send(Call::post(AUTHORIZE_PATH).json(body).no_cache())
        .and_then(|response| response.ensure_success("authorize"))
        .and_then(|response| response.json::<AuthorizeResponse>("authorize"));

    match result {
        Ok(parsed) if !parsed.token.is_empty() => Ok(parsed.token),
        Ok(_) => {
            error!("login endpoint returned an empty token");
            Err(WkcError::InvalidResponse {
                operation: "authorize".to_string(),
                message: "empty token".to_string(),
            })
        }
        Err(e) => {
            error!("authentication failed: {e}");
            Err(e)
        }
    }
}
