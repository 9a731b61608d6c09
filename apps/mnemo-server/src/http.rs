//! HTTP transport: JSON-RPC over `POST /mcp` with bearer authentication,
//! CORS, and the user-serving 30s deadline.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
	Json, Router,
	extract::State,
	http::{HeaderMap, HeaderValue, Method, StatusCode, header},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};

use mnemo_service::Error as ServiceError;

use crate::{rpc, state::ServerState};

pub const REQUEST_DEADLINE: Duration = Duration::from_secs(30);

pub async fn serve(state: Arc<ServerState>) -> color_eyre::Result<()> {
	let http_bind: SocketAddr = state.service.cfg.server.http_bind.parse()?;
	let app = router(state);
	let listener = TcpListener::bind(http_bind).await?;

	tracing::info!(%http_bind, "HTTP transport listening.");
	axum::serve(listener, app).await?;

	Ok(())
}

pub fn router(state: Arc<ServerState>) -> Router {
	let cors = cors_layer(&state.service.cfg.cors_allowed_origins);

	Router::new()
		.route("/health", get(health))
		.route("/mcp", post(mcp))
		.layer(cors)
		.with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
	let origins: Vec<HeaderValue> =
		origins.iter().filter_map(|origin| origin.parse().ok()).collect();

	CorsLayer::new()
		.allow_origin(AllowOrigin::list(origins))
		.allow_methods([Method::POST])
		.allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn mcp(
	State(state): State<Arc<ServerState>>,
	headers: HeaderMap,
	Json(body): Json<Value>,
) -> Response {
	let token = match bearer_token(&headers) {
		Some(token) => token,
		None => {
			return auth_failure(
				StatusCode::UNAUTHORIZED,
				"A bearer token is required.",
				None,
			);
		},
	};
	let session = match state.service.authenticate(&token).await {
		Ok(session) => session,
		Err(ServiceError::RateLimited { retry_after_seconds }) => {
			return auth_failure(
				StatusCode::TOO_MANY_REQUESTS,
				"Rate limit exceeded.",
				Some(retry_after_seconds),
			);
		},
		Err(ServiceError::Unauthenticated { message }) => {
			return auth_failure(StatusCode::UNAUTHORIZED, &message, None);
		},
		Err(err) => {
			return auth_failure(StatusCode::SERVICE_UNAVAILABLE, &err.to_string(), None);
		},
	};

	let request: rpc::RpcRequest = match serde_json::from_value(body) {
		Ok(request) => request,
		Err(err) => {
			let response = rpc::RpcResponse::error(
				Value::from(state.next_auto_id()),
				rpc::PARSE_ERROR,
				format!("Parse error: {err}."),
				None,
			);

			return Json(response).into_response();
		},
	};

	match rpc::handle_request(&state, &session.user_id, request, Some(REQUEST_DEADLINE)).await {
		Some(response) => Json(response).into_response(),
		None => StatusCode::NO_CONTENT.into_response(),
	}
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
	let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
	let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;

	(!token.trim().is_empty()).then(|| token.trim().to_string())
}

fn auth_failure(status: StatusCode, message: &str, retry_after: Option<u64>) -> Response {
	let body = serde_json::json!({ "error": message });
	let mut response = (status, Json(body)).into_response();

	if let Some(retry_after) = retry_after
		&& let Ok(value) = HeaderValue::from_str(&retry_after.to_string())
	{
		response.headers_mut().insert(header::RETRY_AFTER, value);
	}

	response
}
