use rocket::Request;
use rocket::State;
use rocket::request::{FromRequest, Outcome};
use rocket_db_pools::sqlx;

use crate::auth::{AuthError, AuthResult, AuthState};
use crate::storage::users;

/// The authenticated principal attached to a request, resolved from either a
/// Bearer JWT or the configured static API key.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i32,
    pub email: String,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match extract_user(request).await {
            Ok(user) => Outcome::Success(user),
            Err(err) => Outcome::Error((err.status(), err)),
        }
    }
}

async fn extract_user(request: &Request<'_>) -> AuthResult<AuthUser> {
    let auth_state = request
        .guard::<&State<AuthState>>()
        .await
        .succeeded()
        .ok_or_else(|| AuthError::Config("AuthState missing from state".into()))?;

    let pool = request
        .guard::<&State<sqlx::PgPool>>()
        .await
        .succeeded()
        .ok_or_else(|| AuthError::Config("database pool missing from state".into()))?;

    // API key path: constant key bound to a fixed user id.
    if let Some(provided) = request.headers().get_one("X-API-Key") {
        let configured = auth_state
            .config
            .api_key
            .as_deref()
            .ok_or(AuthError::Unauthorized)?;
        if provided != configured {
            return Err(AuthError::Unauthorized);
        }
        let user_id = auth_state
            .config
            .api_key_user_id
            .ok_or_else(|| AuthError::Config("api key user id not configured".into()))?;
        let user = users::find_by_id(pool.inner(), user_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        return Ok(AuthUser {
            id: user.id,
            email: user.email,
        });
    }

    let token = bearer_token_from_request(request)?;
    let claims = auth_state.jwt_service.decode_access_token(token)?;
    let user_id: i32 = claims.sub.parse().map_err(|_| AuthError::Unauthorized)?;

    let user = users::find_by_id(pool.inner(), user_id)
        .await?
        .ok_or(AuthError::Unauthorized)?;

    Ok(AuthUser {
        id: user.id,
        email: user.email,
    })
}

impl<'r> rocket_okapi::request::OpenApiFromRequest<'r> for AuthUser {
    fn from_request_input(
        _generator: &mut rocket_okapi::r#gen::OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<rocket_okapi::request::RequestHeaderInput> {
        use rocket_okapi::okapi::openapi3::{
            Object, SecurityRequirement, SecurityScheme, SecuritySchemeData,
        };

        let scheme = SecurityScheme {
            description: Some("Bearer access token (or X-API-Key)".to_owned()),
            data: SecuritySchemeData::Http {
                scheme: "bearer".to_owned(),
                bearer_format: Some("JWT".to_owned()),
            },
            extensions: Object::default(),
        };
        let mut requirement = SecurityRequirement::new();
        requirement.insert("bearer_auth".to_owned(), Vec::new());

        Ok(rocket_okapi::request::RequestHeaderInput::Security(
            "bearer_auth".to_owned(),
            scheme,
            requirement,
        ))
    }
}

fn bearer_token_from_request<'r>(request: &'r Request<'_>) -> AuthResult<&'r str> {
    let header = request
        .headers()
        .get_one("Authorization")
        .ok_or(AuthError::Unauthorized)?;
    let mut parts = header.splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default();
    if scheme.eq_ignore_ascii_case("Bearer") && !token.is_empty() {
        Ok(token)
    } else {
        Err(AuthError::Unauthorized)
    }
}
