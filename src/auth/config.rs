use crate::auth::{AuthError, AuthResult};

/// Authentication configuration loaded from environment variables.
///
/// `JOBTRACK_JWT_SECRET` is required; refusing to guess a signing key is the
/// one configuration error that should stop the server from starting.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_ttl_minutes: i64,
    /// Optional static API key for automation clients.
    pub api_key: Option<String>,
    /// The user the API key acts as; required when `api_key` is set.
    pub api_key_user_id: Option<i32>,
}

impl AuthConfig {
    pub fn from_env() -> AuthResult<Self> {
        let jwt_secret = std::env::var("JOBTRACK_JWT_SECRET")
            .map_err(|_| AuthError::Config("JOBTRACK_JWT_SECRET is required".into()))?;
        if jwt_secret.len() < 16 {
            return Err(AuthError::Config(
                "JOBTRACK_JWT_SECRET must be at least 16 bytes".into(),
            ));
        }

        let jwt_ttl_minutes = std::env::var("JOBTRACK_JWT_TTL_MINUTES")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(60);

        let api_key = std::env::var("JOBTRACK_API_KEY").ok().filter(|k| !k.is_empty());
        let api_key_user_id = std::env::var("JOBTRACK_API_KEY_USER_ID")
            .ok()
            .and_then(|v| v.parse::<i32>().ok());

        if api_key.is_some() && api_key_user_id.is_none() {
            return Err(AuthError::Config(
                "JOBTRACK_API_KEY_USER_ID is required when JOBTRACK_API_KEY is set".into(),
            ));
        }

        Ok(Self {
            jwt_secret,
            jwt_ttl_minutes,
            api_key,
            api_key_user_id,
        })
    }
}
