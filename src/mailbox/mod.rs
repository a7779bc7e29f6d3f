//! Mailbox provider integration.
//!
//! Everything that talks to the Gmail-style REST API lives here:
//!
//! - `client`: thin typed wrapper over the provider endpoints
//! - `backoff`: exponential-backoff retry for provider calls
//! - `fetch`: paginated single-query fetch, parallel multi-query full fetch,
//!   and history-based delta fetch
//! - `decode`: raw message → decoded `(subject, sender, body, received)` parts
//! - `queries`: the full-sync query set partitioning the job-related space
//! - `token_store`: the per-user on-disk OAuth token vault
//! - `oauth`: OAuth client configuration, code exchange, and the single-use
//!   state store backing the callback

pub mod backoff;
pub mod client;
pub mod decode;
pub mod fetch;
pub mod oauth;
pub mod queries;
pub mod token_store;

use thiserror::Error;

pub use client::{ClientFactory, GmailClient, RawMessage};
pub use fetch::{DeltaFetch, fetch_delta, fetch_full, fetch_query};
pub use token_store::{StoredToken, TokenStore};

#[derive(Debug, Error)]
pub enum MailboxError {
    /// Missing/expired credential with no refresh path. Non-retryable from the
    /// pipeline; the user must reauthorize interactively.
    #[error("mailbox authorization required: {0}")]
    AuthRequired(String),
    #[error("mailbox transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("mailbox returned status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("all fetch queries failed: {0}")]
    AllQueriesFailed(String),
    #[error("mailbox configuration error: {0}")]
    Config(String),
    #[error("token vault io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("token blob malformed: {0}")]
    TokenFormat(#[from] serde_json::Error),
}

impl MailboxError {
    pub fn status(status: u16, detail: impl Into<String>) -> Self {
        MailboxError::Status {
            status,
            detail: detail.into(),
        }
    }

    /// Retryable under exponential backoff: provider throttling/5xx and
    /// transient transport failures.
    pub fn is_transient(&self) -> bool {
        match self {
            MailboxError::Status { status, .. } => matches!(status, 429 | 500 | 503),
            MailboxError::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            _ => false,
        }
    }
}
