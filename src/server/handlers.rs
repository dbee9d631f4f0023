use anyhow::{Context, Result};
use axum::extract::{Form, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tracing::info;

use super::models::{ErrorResponse, ServerError};
use super::state::ServerState;
use crate::notify::{Notification, NotificationHandler, NotificationResponse};
use crate::orchestrator::{TranslationOrchestrator, UnitReport};

pub fn router(orchestrator: Arc<TranslationOrchestrator>) -> Router {
    let state = Arc::new(ServerState {
        notifications: NotificationHandler::new(orchestrator.clone()),
        orchestrator,
    });
    Router::new()
        .route("/health", get(health))
        .route("/webhook", get(webhook).post(webhook_form))
        .route("/units/:id", get(unit))
        .with_state(state)
}

pub async fn run_server(orchestrator: Arc<TranslationOrchestrator>, addr: String) -> Result<()> {
    let app = router(orchestrator);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind server address {}", addr))?;
    info!("listening for TMS notifications on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn webhook(
    State(state): State<Arc<ServerState>>,
    Query(notification): Query<Notification>,
) -> Result<Json<NotificationResponse>, (StatusCode, Json<ErrorResponse>)> {
    state
        .notifications
        .handle(notification)
        .await
        .map(Json)
        .map_err(|err| ServerError::from(err).into_response())
}

/// Form-encoded body parameters win over the query string.
async fn webhook_form(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<Notification>,
    body: Option<Form<Notification>>,
) -> Result<Json<NotificationResponse>, (StatusCode, Json<ErrorResponse>)> {
    let notification = match body {
        Some(Form(body)) => body.or(query),
        None => query,
    };
    webhook(State(state), Query(notification)).await
}

async fn unit(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<UnitReport>, (StatusCode, Json<ErrorResponse>)> {
    state
        .orchestrator
        .report(&id.into())
        .map(Json)
        .map_err(|err| ServerError::from(err).into_response())
}
