//! Error taxonomy for catalog calls.
//!
//! Three kinds of failure flow through the client:
//! - [`TransportError`]: the request never produced a usable response
//!   (network fault, timeout, transient status that outlived the retry budget).
//!   Fatal for the current command.
//! - [`WkcError::ServerRejected`]: the service answered with a non-success
//!   status. Callers decide whether that is tolerable (attribute re-creation is).
//!   401 and 403 are always fatal: no later row can succeed without access.
//! - [`Unresolved`]: a human-readable name did not map to an id. This is not an
//!   error value; lookups return it inside [`Resolved`].

use std::fmt;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to build http client: {0}")]
    Client(String),
    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("request to {url} still returned status {status} after {attempts} attempts")]
    RetriesExhausted {
        url: String,
        status: u16,
        attempts: u32,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum WkcError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("server rejected {operation} with status {status}: {body}")]
    ServerRejected {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("invalid response from {operation}: {message}")]
    InvalidResponse { operation: String, message: String },
    #[error("credentials error: {0}")]
    Credentials(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("worklist error: {0}")]
    Worklist(String),
    #[error("run cancelled")]
    Cancelled,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WkcError {
    /// Errors that must stop a batch run instead of being recorded per row.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WkcError::Transport(_)
                | WkcError::Cancelled
                | WkcError::ServerRejected {
                    status: 401 | 403,
                    ..
                }
        )
    }
}

pub type WkcResult<T> = std::result::Result<T, WkcError>;

/// A name that did not resolve to an id on the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    Catalog { name: String },
    Category { path: String },
    BusinessTerm { term: String, category: String },
    Asset { asset: String, catalog: String },
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unresolved::Catalog { name } => {
                write!(f, "catalog '{name}' does not exist")
            }
            Unresolved::Category { path } => {
                write!(f, "category '{path}' does not exist")
            }
            Unresolved::BusinessTerm { term, category } => {
                write!(f, "business term '{term}' does not exist in category '{category}'")
            }
            Unresolved::Asset { asset, catalog } => {
                write!(f, "asset '{asset}' does not exist in catalog '{catalog}'")
            }
        }
    }
}

/// Outcome of a name lookup: the id, or which name failed to resolve.
pub type Resolved<T> = std::result::Result<T, Unresolved>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_cancel_and_access_denial_are_fatal() {
        let transport = WkcError::from(TransportError::Network {
            url: "https://cpd/v2/catalogs".to_string(),
            message: "connection refused".to_string(),
        });
        assert!(transport.is_fatal());
        assert!(WkcError::Cancelled.is_fatal());

        let rejected = WkcError::ServerRejected {
            operation: "patch column_info".to_string(),
            status: 400,
            body: String::new(),
        };
        assert!(!rejected.is_fatal());

        for status in [401, 403] {
            let denied = WkcError::ServerRejected {
                operation: "create column_info".to_string(),
                status,
                body: String::new(),
            };
            assert!(denied.is_fatal(), "status {status}");
        }
    }

    #[test]
    fn unresolved_messages_name_the_missing_thing() {
        let missing = Unresolved::BusinessTerm {
            term: "Customer Identifier".to_string(),
            category: "Sales>>Customer".to_string(),
        };
        let text = missing.to_string();
        assert!(text.contains("Customer Identifier"));
        assert!(text.contains("Sales>>Customer"));
    }
}
