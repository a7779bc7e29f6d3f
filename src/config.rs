//! Runtime configuration loaded from environment variables.
//!
//! Follows the same pattern as the auth configuration: every knob has a
//! conservative default and can be overridden with a `JOBTRACK_`-prefixed
//! variable. Missing *required* settings surface as a `Config` error before
//! any background work starts.

use std::path::PathBuf;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "on"))
        .unwrap_or(default)
}

/// Mailbox provider settings (endpoints, pagination, full-sync windows).
#[derive(Debug, Clone)]
pub struct MailboxSettings {
    /// Base URL of the Gmail-style REST API. Overridable for tests.
    pub base_url: String,
    /// OAuth token endpoint used for code exchange and refresh.
    pub token_endpoint: String,
    /// OAuth client credentials file (`credentials.json`).
    pub credentials_path: PathBuf,
    /// Per-user token vault directory. When unset, a single shared legacy file.
    pub token_dir: Option<PathBuf>,
    /// Legacy shared token path, used only when `token_dir` is unset.
    pub token_path: PathBuf,
    /// Redirect URI registered for the OAuth callback.
    pub oauth_redirect_uri: Option<String>,
    /// Where to send the browser after a callback with no stored target.
    pub post_auth_default_url: String,
    pub history_page_size: u32,
    pub list_page_size: u32,
    pub full_sync_max_per_query: usize,
    pub full_sync_days_back: i64,
    pub full_sync_after_date: Option<String>,
    pub ignore_last_synced: bool,
    pub max_pages: u32,
    /// Bounded pool size for parallel full-sync queries.
    pub fetch_workers: usize,
}

impl MailboxSettings {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("JOBTRACK_MAILBOX_BASE_URL")
                .unwrap_or_else(|_| "https://gmail.googleapis.com".into()),
            token_endpoint: std::env::var("JOBTRACK_OAUTH_TOKEN_ENDPOINT")
                .unwrap_or_else(|_| "https://oauth2.googleapis.com/token".into()),
            credentials_path: std::env::var("JOBTRACK_CREDENTIALS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("credentials.json")),
            token_dir: std::env::var("JOBTRACK_TOKEN_DIR").ok().map(PathBuf::from),
            token_path: std::env::var("JOBTRACK_TOKEN_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("token.json")),
            oauth_redirect_uri: std::env::var("JOBTRACK_OAUTH_REDIRECT_URI").ok(),
            post_auth_default_url: std::env::var("JOBTRACK_POST_AUTH_URL")
                .unwrap_or_else(|_| "http://localhost:5173".into()),
            history_page_size: env_parse("JOBTRACK_MAILBOX_HISTORY_PAGE_SIZE", 100),
            list_page_size: env_parse("JOBTRACK_MAILBOX_LIST_PAGE_SIZE", 100),
            full_sync_max_per_query: env_parse("JOBTRACK_FULL_SYNC_MAX_PER_QUERY", 2000),
            full_sync_days_back: env_parse("JOBTRACK_FULL_SYNC_DAYS_BACK", 90),
            full_sync_after_date: std::env::var("JOBTRACK_FULL_SYNC_AFTER_DATE").ok(),
            ignore_last_synced: env_bool("JOBTRACK_IGNORE_LAST_SYNCED", false),
            max_pages: env_parse("JOBTRACK_SYNC_MAX_PAGES", 2000),
            fetch_workers: env_parse("JOBTRACK_FETCH_WORKERS", 7),
        }
    }
}

/// LLM classification settings.
#[derive(Debug, Clone)]
pub struct ClassifySettings {
    /// Base URL of the chat-completion API. Overridable for tests.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub batch_size: usize,
    pub batch_confidence_threshold: f32,
    pub use_batch: bool,
}

impl ClassifySettings {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("JOBTRACK_LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            api_key: std::env::var("JOBTRACK_LLM_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .unwrap_or_default(),
            model: std::env::var("JOBTRACK_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            temperature: env_parse("JOBTRACK_LLM_TEMPERATURE", 0.2_f32),
            batch_size: env_parse("JOBTRACK_CLASSIFICATION_BATCH_SIZE", 10),
            batch_confidence_threshold: env_parse(
                "JOBTRACK_CLASSIFICATION_BATCH_CONFIDENCE_THRESHOLD",
                0.6_f32,
            ),
            use_batch: env_bool("JOBTRACK_CLASSIFICATION_USE_BATCH", true),
        }
    }
}

/// Ingestion loop settings.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub workers: usize,
    pub batch_size: usize,
    pub batch_commit_size: usize,
}

impl IngestSettings {
    pub fn from_env() -> Self {
        Self {
            workers: env_parse("JOBTRACK_INGESTION_WORKERS", 6),
            batch_size: env_parse("JOBTRACK_INGESTION_BATCH_SIZE", 25),
            batch_commit_size: env_parse("JOBTRACK_BATCH_COMMIT_SIZE", 50),
        }
    }
}

/// Bundle handed to the dispatcher and managed as Rocket state.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub mailbox: MailboxSettings,
    pub classify: ClassifySettings,
    pub ingest: IngestSettings,
}

impl AppSettings {
    pub fn from_env() -> Self {
        Self {
            mailbox: MailboxSettings::from_env(),
            classify: ClassifySettings::from_env(),
            ingest: IngestSettings::from_env(),
        }
    }
}
