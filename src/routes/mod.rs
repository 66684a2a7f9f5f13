use axum::response::IntoResponse;
use axum::Router;
use axum::routing::{any, get};
use crate::SharedAppState;

pub mod webhook;
pub mod portone;

pub fn router() -> Router<SharedAppState> {
    Router::new()
        .route("/", get(home_handler))
        .route("/webhook", any(portone::webhook::handler))
        .nest("/portone", portone::router())
}

pub async fn home_handler() -> impl IntoResponse {
    "PortOne donation webhook"
}
