// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP middleware: bearer-token gate, request logging, error mapping.
//!
//! Applied outermost-first: the error mapping (via `IntoResponse` for
//! `OpsCoreError`) turns typed failures into `{"detail": ...}` bodies; the
//! request logger records method, path, remote, status and latency for every
//! request.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, info, warn};

use crate::domain::error::OpsCoreError;
use crate::presentation::api::AppState;

impl IntoResponse for OpsCoreError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            // Full detail goes to the log; the client gets a safe summary.
            error!(error = %self, status = status.as_u16(), "request failed");
        }
        (status, Json(json!({ "detail": self.public_detail() }))).into_response()
    }
}

/// Compare the presented token against the configured secret without leaking
/// timing information about the first mismatching byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Bearer-token gate for the authenticated `/v1/opscore` routes.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());

    let token = match header {
        None => {
            return OpsCoreError::Unauthorized("Authorization header missing".to_string())
                .into_response();
        }
        Some(value) => value.strip_prefix("Bearer "),
    };

    match token {
        Some(token) if constant_time_eq(token.as_bytes(), state.api_key.as_bytes()) => {
            next.run(req).await
        }
        _ => {
            warn!(path = %req.uri().path(), "rejected request with invalid credentials");
            OpsCoreError::Unauthorized("Invalid authentication credentials".to_string())
                .into_response()
        }
    }
}

/// Structured request log: method, path, remote, status, latency.
pub async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let start = Instant::now();
    let response = next.run(req).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    info!(
        %method,
        %path,
        %remote,
        status = response.status().as_u16(),
        latency_ms,
        "request handled"
    );
    response
}
