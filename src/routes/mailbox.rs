//! Mailbox authorization endpoints: OAuth kickoff, callback, revocation.
//!
//! The kickoff mints a single-use state token bound to the user and returns
//! the provider authorization URL. The callback validates and consumes the
//! state exactly once, exchanges the code, writes the token blob into the
//! vault, and redirects the browser to the stored post-auth target.

use rocket::State;
use rocket::response::Redirect;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::config::AppSettings;
use crate::error::ApiError;
use crate::mailbox::TokenStore;
use crate::mailbox::oauth::{self, OAuthClientConfig, StateKind};
use crate::models::DataResponse;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthKickoffResponse {
    pub authorization_url: String,
}

fn load_oauth_config(settings: &AppSettings) -> Result<OAuthClientConfig, ApiError> {
    OAuthClientConfig::load(&settings.mailbox.credentials_path)
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn redirect_uri(settings: &AppSettings) -> Result<String, ApiError> {
    settings
        .mailbox
        .oauth_redirect_uri
        .clone()
        .ok_or_else(|| ApiError::BadRequest("OAuth redirect URI is not configured".into()))
}

#[openapi(tag = "Mailbox")]
#[get("/mailbox/auth?<redirect>")]
pub async fn mailbox_auth(
    user: AuthUser,
    pool: &State<PgPool>,
    settings: &State<AppSettings>,
    redirect: Option<String>,
) -> Result<Json<DataResponse<AuthKickoffResponse>>, ApiError> {
    let config = load_oauth_config(settings)?;
    let redirect_uri = redirect_uri(settings)?;

    let state_token = oauth::create_state(
        pool.inner(),
        StateKind::Mailbox,
        Some(user.id),
        redirect.as_deref(),
    )
    .await?;

    let authorization_url = config.authorization_url(&redirect_uri, &state_token);
    log::info!("user {}: mailbox OAuth kickoff", user.id);

    Ok(Json(DataResponse::new(AuthKickoffResponse {
        authorization_url,
    })))
}

/// OAuth callback. Mounted outside the OpenAPI route set because it redirects
/// the browser rather than returning JSON.
#[get("/mailbox/oauth/callback?<code>&<state>")]
pub async fn mailbox_oauth_callback(
    pool: &State<PgPool>,
    settings: &State<AppSettings>,
    token_store: &State<TokenStore>,
    code: String,
    state: String,
) -> Result<Redirect, ApiError> {
    let entry = oauth::consume_state(pool.inner(), &state)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("invalid or expired OAuth state".into()))?;

    if entry.kind != StateKind::Mailbox {
        return Err(ApiError::Unauthorized("invalid or expired OAuth state".into()));
    }

    // Multi-user safety: when per-user tokens are enabled the state must be
    // bound to a user.
    if settings.mailbox.token_dir.is_some() && entry.user_id.is_none() {
        return Err(ApiError::Unauthorized(
            "OAuth state is missing its user binding".into(),
        ));
    }

    let config = load_oauth_config(settings)?;
    let redirect_uri = redirect_uri(settings)?;

    let http = reqwest::Client::new();
    let token = config
        .exchange_code(&http, &code, &redirect_uri)
        .await
        .map_err(|e| ApiError::Unauthorized(format!("code exchange failed: {}", e)))?;

    token_store
        .put(entry.user_id, &token)
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    let target = entry
        .redirect_url
        .unwrap_or_else(|| settings.mailbox.post_auth_default_url.clone());
    Ok(Redirect::to(target))
}

#[openapi(tag = "Mailbox")]
#[delete("/mailbox/token")]
pub async fn revoke_mailbox_token(
    user: AuthUser,
    token_store: &State<TokenStore>,
) -> Result<Json<DataResponse<bool>>, ApiError> {
    token_store
        .delete(Some(user.id))
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    log::info!("user {}: mailbox token revoked", user.id);
    Ok(Json(DataResponse::new(true)))
}
