//! Per-user on-disk OAuth token vault.
//!
//! One JSON blob per user at `${token_dir}/token_<user_id>`, mode 0600, parent
//! directory auto-created. Written only by the OAuth callback; read by the
//! fetcher. Refresh-on-read: an expired blob with a refresh credential is
//! refreshed and rewritten; a refresh failure surfaces as `AuthRequired` so
//! background work never blocks on an interactive flow.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::mailbox::MailboxError;

/// Tokens are treated as expired slightly early to absorb clock skew.
const EXPIRY_SLACK_SECS: i64 = 60;

/// The opaque blob persisted per user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl StoredToken {
    pub fn is_expired(&self) -> bool {
        match self.expiry {
            Some(expiry) => expiry <= Utc::now() + Duration::seconds(EXPIRY_SLACK_SECS),
            // No expiry recorded: assume stale and let refresh sort it out.
            None => true,
        }
    }

    /// Usable without interaction: either still valid or refreshable.
    pub fn is_usable(&self) -> bool {
        !self.is_expired() || self.refresh_token.is_some()
    }
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct TokenStore {
    token_dir: Option<PathBuf>,
    legacy_path: PathBuf,
    token_endpoint: String,
    http: reqwest::Client,
}

impl TokenStore {
    pub fn new(
        token_dir: Option<PathBuf>,
        legacy_path: PathBuf,
        token_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            token_dir,
            legacy_path,
            token_endpoint: token_endpoint.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Resolve the on-disk path for a user's token.
    ///
    /// When a token directory is configured, a user id is mandatory; the
    /// legacy single shared file is only used when `token_dir` is unset.
    pub fn path_for(&self, user_id: Option<i32>) -> Result<PathBuf, MailboxError> {
        match (&self.token_dir, user_id) {
            (Some(dir), Some(user_id)) => Ok(dir.join(format!("token_{}", user_id))),
            (Some(_), None) => Err(MailboxError::Config(
                "token_dir is set; a user id is required for token access".into(),
            )),
            (None, _) => Ok(self.legacy_path.clone()),
        }
    }

    fn write_blob(path: &Path, token: &StoredToken) -> Result<(), MailboxError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(token)?;
        std::fs::write(path, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Store a token blob for a user. Called by the OAuth callback and on
    /// refresh; overwrites any previous blob.
    pub fn put(&self, user_id: Option<i32>, token: &StoredToken) -> Result<(), MailboxError> {
        let path = self.path_for(user_id)?;
        Self::write_blob(&path, token)?;
        log::info!("stored mailbox token at {}", path.display());
        Ok(())
    }

    /// Read a user's raw token blob without refreshing.
    pub fn get(&self, user_id: Option<i32>) -> Result<StoredToken, MailboxError> {
        let path = self.path_for(user_id)?;
        let data = std::fs::read_to_string(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                MailboxError::AuthRequired(
                    "no mailbox token on file; authorize via the OAuth endpoint".into(),
                )
            } else {
                MailboxError::Io(err)
            }
        })?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Delete a user's token (explicit revocation).
    pub fn delete(&self, user_id: Option<i32>) -> Result<(), MailboxError> {
        let path = self.path_for(user_id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(MailboxError::Io(err)),
        }
    }

    /// Whether a sync could start for this user without interactive auth.
    pub fn has_usable_token(&self, user_id: Option<i32>) -> bool {
        self.get(user_id).map(|t| t.is_usable()).unwrap_or(false)
    }

    /// Return a live access token, refreshing and rewriting the blob if the
    /// stored one has expired.
    pub async fn access_token(&self, user_id: Option<i32>) -> Result<String, MailboxError> {
        let token = self.get(user_id)?;
        if !token.is_expired() {
            return Ok(token.access_token);
        }

        let Some(refresh_token) = token.refresh_token.clone() else {
            return Err(MailboxError::AuthRequired(
                "mailbox token expired and no refresh credential is available".into(),
            ));
        };

        log::info!("refreshing expired mailbox token");
        let refreshed = self.refresh(&token, &refresh_token).await?;
        self.put(user_id, &refreshed)?;
        Ok(refreshed.access_token)
    }

    async fn refresh(
        &self,
        token: &StoredToken,
        refresh_token: &str,
    ) -> Result<StoredToken, MailboxError> {
        let params = [
            ("client_id", token.client_id.as_str()),
            ("client_secret", token.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|err| {
                MailboxError::AuthRequired(format!("token refresh request failed: {}", err))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(MailboxError::AuthRequired(format!(
                "token refresh was rejected with status {}; reauthorize via the OAuth endpoint",
                status
            )));
        }

        let parsed: RefreshResponse = response.json().await.map_err(|err| {
            MailboxError::AuthRequired(format!("token refresh response malformed: {}", err))
        })?;

        Ok(StoredToken {
            access_token: parsed.access_token,
            refresh_token: Some(refresh_token.to_string()),
            expiry: parsed
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
            client_id: token.client_id.clone(),
            client_secret: token.client_secret.clone(),
            scopes: token.scopes.clone(),
        })
    }
}
