//! OAuth client configuration, authorization-code exchange, and the
//! single-use state store backing the callback.
//!
//! State tokens are random, short-lived (15 minutes), bound to a user and a
//! kind, and consumed exactly once. When per-user tokens are enabled the state
//! must carry the user id; the callback rejects states without one.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rocket_db_pools::sqlx::{self, PgPool};
use serde::Deserialize;
use std::path::Path;

use crate::mailbox::token_store::StoredToken;
use crate::mailbox::MailboxError;

pub const STATE_TTL_MINUTES: i64 = 15;

pub const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.readonly",
];

/// What flow a state token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Mailbox,
    Login,
}

impl StateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Mailbox => "mailbox",
            StateKind::Login => "login",
        }
    }

    pub fn parse(raw: &str) -> Option<StateKind> {
        match raw {
            "mailbox" => Some(StateKind::Mailbox),
            "login" => Some(StateKind::Login),
            _ => None,
        }
    }
}

/// A consumed state row.
#[derive(Debug, Clone)]
pub struct OAuthStateEntry {
    pub token: String,
    pub user_id: Option<i32>,
    pub kind: StateKind,
    pub redirect_url: Option<String>,
}

fn random_state_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Create a state row and return its token.
pub async fn create_state(
    pool: &PgPool,
    kind: StateKind,
    user_id: Option<i32>,
    redirect_url: Option<&str>,
) -> Result<String, sqlx::Error> {
    let token = random_state_token();
    let expires_at: DateTime<Utc> = Utc::now() + Duration::minutes(STATE_TTL_MINUTES);

    sqlx::query(
        r#"INSERT INTO oauth_state (token, user_id, kind, redirect_url, expires_at)
           VALUES ($1, $2, $3, $4, $5)"#,
    )
    .bind(&token)
    .bind(user_id)
    .bind(kind.as_str())
    .bind(redirect_url)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(token)
}

/// Consume a state token exactly once. Returns `None` for unknown or expired
/// tokens; a second consume of the same token also returns `None`.
pub async fn consume_state(
    pool: &PgPool,
    token: &str,
) -> Result<Option<OAuthStateEntry>, sqlx::Error> {
    let row: Option<(String, Option<i32>, String, Option<String>)> = sqlx::query_as(
        r#"DELETE FROM oauth_state
           WHERE token = $1 AND expires_at > NOW()
           RETURNING token, user_id, kind, redirect_url"#,
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|(token, user_id, kind, redirect_url)| {
        StateKind::parse(&kind).map(|kind| OAuthStateEntry {
            token,
            user_id,
            kind,
            redirect_url,
        })
    }))
}

/// Drop expired state rows; run periodically from a janitor task.
pub async fn purge_expired_states(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM oauth_state WHERE expires_at <= NOW()")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// OAuth client credentials, loaded from the standard downloaded JSON file
/// (either an `installed` or `web` application).
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
}

#[derive(Deserialize)]
struct CredentialsFile {
    installed: Option<CredentialsEntry>,
    web: Option<CredentialsEntry>,
}

#[derive(Deserialize)]
struct CredentialsEntry {
    client_id: String,
    client_secret: String,
    #[serde(default = "default_auth_uri")]
    auth_uri: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl OAuthClientConfig {
    pub fn load(path: &Path) -> Result<Self, MailboxError> {
        let data = std::fs::read_to_string(path).map_err(|_| {
            MailboxError::Config(format!(
                "OAuth credentials not found at {}; download the client file from the provider console",
                path.display()
            ))
        })?;
        let parsed: CredentialsFile = serde_json::from_str(&data)?;
        let entry = parsed.installed.or(parsed.web).ok_or_else(|| {
            MailboxError::Config("credentials file has neither `installed` nor `web` section".into())
        })?;

        Ok(Self {
            client_id: entry.client_id,
            client_secret: entry.client_secret,
            auth_uri: entry.auth_uri,
            token_uri: entry.token_uri,
        })
    }

    /// Build the provider authorization URL for the kickoff redirect.
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> String {
        let scope = SCOPES.join(" ");
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&access_type=offline&prompt=consent",
            self.auth_uri,
            urlencode(&self.client_id),
            urlencode(redirect_uri),
            urlencode(&scope),
            urlencode(state),
        )
    }

    /// Exchange an authorization code for a token blob.
    pub async fn exchange_code(
        &self,
        http: &reqwest::Client,
        code: &str,
        redirect_uri: &str,
    ) -> Result<StoredToken, MailboxError> {
        #[derive(Deserialize)]
        struct ExchangeResponse {
            access_token: String,
            refresh_token: Option<String>,
            expires_in: Option<i64>,
            scope: Option<String>,
        }

        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ];

        let response = http.post(&self.token_uri).form(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(MailboxError::status(status.as_u16(), detail));
        }

        let parsed: ExchangeResponse = response.json().await?;
        Ok(StoredToken {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
            expiry: parsed
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            scopes: parsed
                .scope
                .map(|s| s.split(' ').map(str::to_string).collect())
                .unwrap_or_else(|| SCOPES.iter().map(|s| s.to_string()).collect()),
        })
    }
}

fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
