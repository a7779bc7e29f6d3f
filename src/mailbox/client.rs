//! Typed client for the mailbox provider's REST API.
//!
//! One client wraps one access token and one `reqwest` connection pool.
//! Parallel fetch paths must construct one client per task via
//! [`ClientFactory`]; sharing a single client across parallel queries is a
//! defect, not an optimization.

use serde::Deserialize;

use crate::mailbox::MailboxError;
use crate::mailbox::backoff::with_backoff;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessageListPage {
    #[serde(default)]
    pub messages: Vec<MessageRef>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    pub mime_type: Option<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: MessageBody,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

/// A full-format provider message.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    pub message: MessageRef,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    #[serde(default)]
    pub messages_added: Vec<HistoryMessage>,
    #[serde(default)]
    pub messages_deleted: Vec<HistoryMessage>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    #[serde(default)]
    pub history: Vec<HistoryRecord>,
    pub next_page_token: Option<String>,
    pub history_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub history_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GmailClient {
    base_url: String,
    access_token: String,
    http: reqwest::Client,
}

impl GmailClient {
    pub fn new(base_url: impl Into<String>, access_token: String) -> Self {
        let base = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url: base,
            access_token,
            http: reqwest::Client::new(),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        name: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, MailboxError> {
        with_backoff(name, || async {
            let url = format!("{}{}", self.base_url, path);
            let response = self
                .http
                .get(&url)
                .bearer_auth(&self.access_token)
                .query(query)
                .send()
                .await?;

            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(MailboxError::AuthRequired(format!(
                    "provider returned {} for {}",
                    status, name
                )));
            }
            if !status.is_success() {
                let detail = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "failed to read error body".to_string());
                return Err(MailboxError::status(status.as_u16(), detail));
            }

            Ok(response.json::<T>().await?)
        })
        .await
    }

    /// List message ids matching a provider search query (one page).
    pub async fn list_messages(
        &self,
        query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessageListPage, MailboxError> {
        let mut params = vec![
            ("q", query.to_string()),
            ("maxResults", page_size.to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        self.get_json("messages.list", "/gmail/v1/users/me/messages", &params)
            .await
    }

    /// Fetch one message in full format.
    pub async fn get_message(&self, id: &str) -> Result<RawMessage, MailboxError> {
        let params = vec![("format", "full".to_string())];
        self.get_json(
            "messages.get",
            &format!("/gmail/v1/users/me/messages/{}", id),
            &params,
        )
        .await
    }

    /// List one page of mailbox history starting from a cursor.
    ///
    /// The provider rejects cursors that are too old with a 404; callers map
    /// that to a full-sync fallback.
    pub async fn list_history(
        &self,
        start_history_id: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, MailboxError> {
        let mut params = vec![
            ("startHistoryId", start_history_id.to_string()),
            ("maxResults", page_size.to_string()),
            ("historyTypes", "messageAdded".to_string()),
            ("historyTypes", "messageDeleted".to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        self.get_json("history.list", "/gmail/v1/users/me/history", &params)
            .await
    }

    /// Fetch the profile, which carries the current history cursor.
    pub async fn get_profile(&self) -> Result<Profile, MailboxError> {
        self.get_json("getProfile", "/gmail/v1/users/me/profile", &[])
            .await
    }
}

/// Builds one [`GmailClient`] per parallel fetch task.
#[derive(Debug, Clone)]
pub struct ClientFactory {
    base_url: String,
    access_token: String,
}

impl ClientFactory {
    pub fn new(base_url: impl Into<String>, access_token: String) -> Self {
        Self {
            base_url: base_url.into(),
            access_token,
        }
    }

    pub fn client(&self) -> GmailClient {
        GmailClient::new(self.base_url.clone(), self.access_token.clone())
    }
}
