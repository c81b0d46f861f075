//! WKC Client: business-term column mapping for a governance catalog
//!
//! Resolves human-readable names (catalog, category path, business term, data
//! asset) to service ids and maintains each asset's `column_info` attribute,
//! which records the business term attached to every column.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                      COLUMN MAPPING PIPELINE                      │
//! ├───────────────────────────────────────────────────────────────────┤
//! │                                                                   │
//! │  ┌───────────┐    ┌────────────────┐    ┌──────────────────────┐  │
//! │  │ Worklist  │───►│ MappingDriver  │───►│ Resolver (memoized)  │  │
//! │  │  (CSV)    │◄───│ row / bulk     │    │ catalog · category · │  │
//! │  └───────────┘Done└───────┬────────┘    │ term map · asset     │  │
//! │                           │             └──────────┬───────────┘  │
//! │                           ▼                        │              │
//! │                  ┌──────────────────┐              │              │
//! │                  │ AttributeManager │              │              │
//! │                  │ create/read/patch│              │              │
//! │                  └────────┬─────────┘              │              │
//! │                           ▼                        ▼              │
//! │                  ┌─────────────────────────────────────────┐     │
//! │                  │ Session: token · timeouts · retry/backoff│     │
//! │                  └────────────────────┬────────────────────┘     │
//! │                                       ▼                          │
//! │                              HttpBackend (reqwest)               │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure model
//! - Unknown names are [`Unresolved`], never errors; the dependent call is skipped.
//! - Transport failures are fatal to the current command.
//! - Non-success answers are [`WkcError::ServerRejected`]; duplicate attribute
//!   creation is tolerated.

pub mod attributes;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod mapping;
pub mod resolver;
pub mod transport;
pub mod worklist;

pub use attributes::{AttributeManager, ColumnInfo, CreateOutcome, PatchOp, TermRef, COLUMN_INFO};
pub use auth::{Credentials, DirectTokenSource, FileTokenSource, PromptTokenSource, TokenSource};
pub use client::WkcClient;
pub use config::{CallKind, ClientConfig, RetryPolicy, Timeouts};
pub use error::{Resolved, TransportError, Unresolved, WkcError, WkcResult};
pub use mapping::{
    AssetSummary, CancelToken, MappingDriver, MappingOptions, MappingReport, PendingRow, Strategy,
};
pub use resolver::{AssetTarget, CategoryPath, Resolver, TermMap};
pub use transport::{ApiRequest, ApiResponse, HttpBackend, Method, ReqwestBackend, Session};
pub use worklist::{DoneFlag, MappingRow, Worklist};
