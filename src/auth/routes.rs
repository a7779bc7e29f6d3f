//! Registration, login, and identity endpoints.

use chrono::{DateTime, Utc};
use rocket::State;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, AuthState, AuthUser};
use crate::error::ApiError;
use crate::models::DataResponse;
use crate::storage::users;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct TokenResponse {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "userId")]
    pub user_id: i32,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct MeResponse {
    pub id: i32,
    pub email: String,
}

fn validate_credentials(request: &CredentialsRequest) -> Result<(), ApiError> {
    if !request.email.contains('@') {
        return Err(ApiError::BadRequest("email must contain '@'".into()));
    }
    if request.password.len() < 8 {
        return Err(ApiError::BadRequest(
            "password must be at least 8 characters".into(),
        ));
    }
    Ok(())
}

#[openapi(tag = "Auth")]
#[post("/auth/register", data = "<request>")]
pub async fn register(
    auth: &State<AuthState>,
    pool: &State<PgPool>,
    request: Json<CredentialsRequest>,
) -> Result<Json<DataResponse<TokenResponse>>, ApiError> {
    validate_credentials(&request)?;

    if users::find_by_email(pool.inner(), &request.email)
        .await?
        .is_some()
    {
        return Err(AuthError::EmailTaken.into());
    }

    let hash = auth
        .password_service
        .hash_password(&request.password)
        .map_err(ApiError::from)?;
    let user = users::create(pool.inner(), &request.email, Some(&hash), None).await?;

    let token = auth
        .jwt_service
        .issue_access_token(user.id, &user.email)
        .map_err(ApiError::from)?;

    log::info!("registered user {} ({})", user.id, user.email);

    Ok(Json(DataResponse::new(TokenResponse {
        access_token: token.token,
        expires_at: token.expires_at,
        user_id: user.id,
        email: user.email,
    })))
}

#[openapi(tag = "Auth")]
#[post("/auth/login", data = "<request>")]
pub async fn login(
    auth: &State<AuthState>,
    pool: &State<PgPool>,
    request: Json<CredentialsRequest>,
) -> Result<Json<DataResponse<TokenResponse>>, ApiError> {
    let user = users::find_by_email(pool.inner(), &request.email)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    let Some(hash) = user.password_hash.as_deref() else {
        // Third-party-only account; no password verifier on file.
        return Err(AuthError::InvalidCredentials.into());
    };

    let verified = auth
        .password_service
        .verify_password(&request.password, hash)
        .map_err(ApiError::from)?;
    if !verified {
        return Err(AuthError::InvalidCredentials.into());
    }

    let token = auth
        .jwt_service
        .issue_access_token(user.id, &user.email)
        .map_err(ApiError::from)?;

    Ok(Json(DataResponse::new(TokenResponse {
        access_token: token.token,
        expires_at: token.expires_at,
        user_id: user.id,
        email: user.email,
    })))
}

#[openapi(tag = "Auth")]
#[get("/auth/me")]
pub async fn me(user: AuthUser) -> Json<DataResponse<MeResponse>> {
    Json(DataResponse::new(MeResponse {
        id: user.id,
        email: user.email,
    }))
}
