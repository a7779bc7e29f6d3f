//! Read and delete endpoints over application records.

use rocket::State;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::openapi;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{Application, DataResponse, PaginatedResponse};
use crate::storage::applications;

#[openapi(tag = "Applications")]
#[get("/applications?<page>&<size>")]
pub async fn list_applications(
    user: AuthUser,
    pool: &State<PgPool>,
    page: Option<i64>,
    size: Option<i64>,
) -> Result<Json<PaginatedResponse<Application>>, ApiError> {
    let page = page.unwrap_or(1);
    let size = size.unwrap_or(25);

    let (rows, total) = applications::list_for_user(pool.inner(), user.id, page, size).await?;
    Ok(Json(PaginatedResponse::new(rows, page, size, total)))
}

#[openapi(tag = "Applications")]
#[get("/applications/<id>")]
pub async fn get_application(
    user: AuthUser,
    pool: &State<PgPool>,
    id: i32,
) -> Result<Json<DataResponse<Application>>, ApiError> {
    let app = applications::get(pool.inner(), user.id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("application {} not found", id)))?;
    Ok(Json(DataResponse::new(app)))
}

#[openapi(tag = "Applications")]
#[delete("/applications/<id>")]
pub async fn delete_application(
    user: AuthUser,
    pool: &State<PgPool>,
    id: i32,
) -> Result<Json<DataResponse<bool>>, ApiError> {
    let deleted = applications::delete(pool.inner(), user.id, id).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("application {} not found", id)));
    }
    Ok(Json(DataResponse::new(true)))
}
