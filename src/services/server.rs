//! Shared backend: relays chat completions to the provider using a
//! server-side key so clients can draft without one.

use crate::core::config::ServerConfig;
use crate::services::llm::TEMPERATURE;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use log::{debug, error, info};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct AppState {
    config: Arc<ServerConfig>,
    client: reqwest::Client,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            client: reqwest::Client::new(),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/chat", post(chat))
        .route("/api/chat/completions", post(chat))
        .with_state(state)
}

/// Binds `0.0.0.0:<port>` and serves until the process is stopped.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Inkwell backend listening on http://{}", addr);
    info!("API key configured: {}", if config.has_api_key() { "yes" } else { "no" });
    info!("Model: {}", config.model);

    axum::serve(listener, create_router(AppState::new(config)))
        .await
        .context("Backend server stopped unexpectedly")
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "hasApiKey": state.config.has_api_key(),
        "model": state.config.model,
    }))
}

fn error_response(status: StatusCode, message: &str, error_type: &str, code: Option<&str>) -> Response {
    let mut body = json!({ "message": message, "type": error_type });
    if let Some(code) = code {
        body["code"] = json!(code);
    }
    (status, Json(json!({ "error": body }))).into_response()
}

async fn chat(State(state): State<AppState>, body: Bytes) -> Response {
    let Some(api_key) = state.config.api_key.as_deref() else {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Server API key not configured. Please set OPENAI_API_KEY in the server environment.",
            "configuration_error",
            Some("missing_api_key"),
        );
    };

    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let Some(messages) = request.get("messages").filter(|m| m.is_array()) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid request: messages array is required",
            "invalid_request_error",
            None,
        );
    };
    let temperature = request.get("temperature").and_then(Value::as_f64).unwrap_or(TEMPERATURE);

    let url = format!("{}/chat/completions", state.config.base_url.trim_end_matches('/'));
    debug!("Relaying chat request to {}", url);

    let upstream = state
        .client
        .post(&url)
        .bearer_auth(api_key)
        .json(&json!({
            "model": state.config.model,
            "messages": messages,
            "temperature": temperature,
        }))
        .send()
        .await;

    let resp = match upstream {
        Ok(resp) => resp,
        Err(e) => {
            error!("Upstream request failed: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string(), "server_error", None);
        }
    };

    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let payload = resp.json::<Value>().await;

    if !status.is_success() {
        error!("Upstream returned {}", status);
        return (status, Json(payload.unwrap_or_else(|_| json!({})))).into_response();
    }

    match payload {
        Ok(data) => (StatusCode::OK, Json(data)).into_response(),
        Err(e) => {
            error!("Upstream response was not JSON: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string(), "server_error", None)
        }
    }
}
