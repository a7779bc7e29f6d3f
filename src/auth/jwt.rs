use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use crate::auth::{AuthConfig, AuthError, AuthResult};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct SignedAccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_token_ttl: Duration,
}

impl JwtService {
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        let secret = config.jwt_secret.as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 30;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            access_token_ttl: Duration::minutes(config.jwt_ttl_minutes),
        })
    }

    pub fn issue_access_token(&self, user_id: i32, email: &str) -> AuthResult<SignedAccessToken> {
        let now = Utc::now();
        let expires_at = now + self.access_token_ttl;

        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            email: email.to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(SignedAccessToken { token, expires_at })
    }

    pub fn decode_access_token(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        let token_data =
            decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation).map_err(
                |err| match err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    _ => AuthError::TokenInvalid,
                },
            )?;
        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config(ttl_minutes: i64) -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret-with-enough-bytes".into(),
            jwt_ttl_minutes: ttl_minutes,
            api_key: None,
            api_key_user_id: None,
        }
    }

    #[test]
    fn issues_and_decodes_access_tokens() {
        let service = JwtService::from_config(&make_config(60)).expect("jwt service");

        let token = service
            .issue_access_token(42, "user@example.com")
            .expect("issue token");
        let claims = service
            .decode_access_token(&token.token)
            .expect("decode token");

        assert_eq!(claims.sub, "42");
        assert_eq!(claims.email, "user@example.com");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let service = JwtService::from_config(&make_config(60)).expect("jwt service");
        let other = JwtService::from_config(&AuthConfig {
            jwt_secret: "a-completely-different-secret".into(),
            jwt_ttl_minutes: 60,
            api_key: None,
            api_key_user_id: None,
        })
        .expect("jwt service");

        let token = other
            .issue_access_token(42, "user@example.com")
            .expect("issue token");
        assert!(matches!(
            service.decode_access_token(&token.token),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn rejects_expired_tokens() {
        let service = JwtService::from_config(&make_config(-10)).expect("jwt service");
        let token = service
            .issue_access_token(42, "user@example.com")
            .expect("issue token");
        assert!(matches!(
            service.decode_access_token(&token.token),
            Err(AuthError::TokenExpired)
        ));
    }
}
