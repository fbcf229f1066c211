//! HTTP transport layer.
//!
//! `POST /identify` accepts `{"email"?, "phoneNumber"?}` and answers
//! `{"contact": ConsolidatedIdentity}`. Failures carry a fixed, human-readable
//! `{"error": ...}` body; repository internals are logged, never echoed.

use std::future::Future;
use std::io;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::engine::IdentityEngine;
use crate::error::ResolveError;
use crate::identity::ConsolidatedIdentity;
use crate::observation::Observation;

/// Phone numbers arrive either as strings or as bare JSON numbers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PhoneField {
    /// `"phoneNumber": "123456"`
    Text(String),
    /// `"phoneNumber": 123456`
    Number(serde_json::Number),
}

impl PhoneField {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

/// Request body of `POST /identify`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Phone number.
    #[serde(default)]
    pub phone_number: Option<PhoneField>,
}

/// Success body of `POST /identify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyResponse {
    /// The consolidated identity.
    pub contact: ConsolidatedIdentity,
}

/// Error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
}

/// Body of `GET /healthz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `"ok"` or `"error"`.
    pub status: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

fn status_from_resolve_error(err: &ResolveError) -> (StatusCode, String) {
    match err {
        ResolveError::InvalidInput(v) => (StatusCode::BAD_REQUEST, v.to_string()),
        ResolveError::Conflict { .. } => (
            StatusCode::CONFLICT,
            "Contact cluster changed concurrently; retry the request".to_string(),
        ),
        ResolveError::RepositoryUnavailable { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Contact storage is temporarily unavailable".to_string(),
        ),
        ResolveError::ConsistencyViolation { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Stored contact links are inconsistent; the incident has been logged".to_string(),
        ),
        ResolveError::Internal { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        ),
    }
}

/// Builds the HTTP router.
pub fn router(engine: IdentityEngine) -> Router {
    Router::new()
        .route("/identify", post(identify))
        .route("/healthz", get(healthz))
        .with_state(engine)
}

/// Serves `engine` on `listener` until `shutdown` completes.
pub async fn serve<F>(listener: TcpListener, engine: IdentityEngine, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn identify(
    State(engine): State<IdentityEngine>,
    payload: Result<Json<IdentifyRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let phone = request.phone_number.map(PhoneField::into_string);
    let observation = match Observation::new(request.email.as_deref(), phone.as_deref()) {
        Ok(obs) => obs,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    // The engine blocks on storage and identity-key locks.
    let joined = tokio::task::spawn_blocking(move || engine.resolve(&observation)).await;
    match joined {
        Ok(Ok(contact)) => (StatusCode::OK, Json(IdentifyResponse { contact })).into_response(),
        Ok(Err(err)) => {
            let (status, message) = status_from_resolve_error(&err);
            if status.is_server_error() {
                tracing::error!(error = %err, %status, "identify failed");
            }
            error_response(status, message)
        }
        Err(join_err) => {
            tracing::error!(error = %join_err, "identify task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

async fn healthz(State(engine): State<IdentityEngine>) -> (StatusCode, Json<HealthResponse>) {
    let probe = tokio::task::spawn_blocking(move || engine.probe()).await;
    match probe {
        Ok(Ok(())) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
            }),
        ),
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "health probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "error".to_string(),
                }),
            )
        }
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(HealthResponse {
                status: "error".to_string(),
            }),
        ),
    }
}
