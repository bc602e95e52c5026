use crate::server::{Result, ServerError, ServerRouter, json::Json, payload::SuccessBody};
use axum_extra::routing::{RouterExt, TypedPath};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub fn routes() -> ServerRouter {
    ServerRouter::new().typed_get(health)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/health", rejection(ServerError))]
struct HealthPath();

#[derive(Clone, Debug, Serialize)]
struct Health {
    status: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    environment: String,
}

async fn health(HealthPath(): HealthPath) -> Result<Json<SuccessBody<Health>>> {
    let environment =
        std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_owned());

    Ok(Json(SuccessBody::new(Health {
        status: "ok",
        timestamp: OffsetDateTime::now_utc(),
        environment,
    })))
}
