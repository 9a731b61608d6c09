//! JSON-RPC 2.0 envelope handling shared by both transports. Internal
//! errors never escape; every failure becomes a well-formed error response.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use mnemo_service::Error as ServiceError;

use crate::{state::ServerState, tools};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const SERVER_ERROR: i64 = -32000;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
	pub jsonrpc: Option<String>,
	#[serde(default)]
	pub id: Option<Value>,
	pub method: String,
	#[serde(default)]
	pub params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
	pub jsonrpc: &'static str,
	pub id: Value,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
	pub code: i64,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

impl RpcResponse {
	pub fn result(id: Value, result: Value) -> Self {
		Self { jsonrpc: "2.0", id, result: Some(result), error: None }
	}

	pub fn error(id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
		Self {
			jsonrpc: "2.0",
			id,
			result: None,
			error: Some(RpcError { code, message: message.into(), data }),
		}
	}
}

/// Handles one raw input line/body. Returns `None` for notifications.
pub async fn handle_raw(
	state: &Arc<ServerState>,
	user_id: &str,
	raw: &str,
	deadline: Option<Duration>,
) -> Option<RpcResponse> {
	let request: RpcRequest = match serde_json::from_str(raw) {
		Ok(request) => request,
		Err(err) => {
			return Some(RpcResponse::error(
				Value::from(state.next_auto_id()),
				PARSE_ERROR,
				format!("Parse error: {err}."),
				None,
			));
		},
	};

	handle_request(state, user_id, request, deadline).await
}

pub async fn handle_request(
	state: &Arc<ServerState>,
	user_id: &str,
	request: RpcRequest,
	deadline: Option<Duration>,
) -> Option<RpcResponse> {
	if request.jsonrpc.as_deref().is_some_and(|version| version != "2.0") {
		let id = request.id.unwrap_or_else(|| Value::from(state.next_auto_id()));

		return Some(RpcResponse::error(
			id,
			INVALID_REQUEST,
			"Unsupported JSON-RPC version.",
			None,
		));
	}

	// A missing id marks a notification only for the notification methods;
	// anything else receives an auto-assigned monotonic id so every
	// response is addressable.
	if request.id.is_none() && is_notification(&request.method) {
		debug!(method = %request.method, "Notification acknowledged.");

		return None;
	}

	let id = request.id.unwrap_or_else(|| Value::from(state.next_auto_id()));
	let params = request.params.unwrap_or_else(|| json!({}));
	let dispatched = dispatch(state, user_id, &request.method, params);
	let result = match deadline {
		Some(deadline) => match tokio::time::timeout(deadline, dispatched).await {
			Ok(result) => result,
			Err(_) => {
				return Some(RpcResponse::error(
					id,
					SERVER_ERROR,
					"Operation timed out.",
					Some(json!({ "reason": "timeout" })),
				));
			},
		},
		None => dispatched.await,
	};

	Some(match result {
		Ok(result) => RpcResponse::result(id, result),
		Err(err) => error_response(id, err),
	})
}

fn is_notification(method: &str) -> bool {
	method == "initialized" || method.starts_with("notifications/")
}

async fn dispatch(
	state: &Arc<ServerState>,
	user_id: &str,
	method: &str,
	params: Value,
) -> Result<Value, RpcFailure> {
	match method {
		"initialize" => Ok(json!({
			"protocolVersion": PROTOCOL_VERSION,
			"serverInfo": {
				"name": "mnemo",
				"version": mnemo_cli::VERSION,
			},
			"capabilities": {
				"tools": {},
				"prompts": {},
				"resources": {},
			},
		})),
		"initialized" => Ok(json!({})),
		"ping" => Ok(json!({})),
		"tools/list" => {
			let tools: Vec<Value> = state
				.tools
				.iter()
				.map(|tool| {
					json!({
						"name": tool.name,
						"description": tool.description,
						"inputSchema": tool.input_schema,
					})
				})
				.collect();

			Ok(json!({ "tools": tools }))
		},
		"tools/call" => {
			let name = params
				.get("name")
				.and_then(|v| v.as_str())
				.ok_or_else(|| RpcFailure::invalid_params("tool name is required."))?;
			let tool = state
				.tool(name)
				.ok_or_else(|| RpcFailure::invalid_params(format!("Unknown tool {name:?}.")))?;
			let arguments =
				params.get("arguments").cloned().unwrap_or_else(|| json!({}));

			tools::validate_arguments(&tool.input_schema, &arguments)
				.map_err(RpcFailure::invalid_params)?;

			let result =
				tools::execute_tool(&state.service, user_id, name, arguments).await?;
			let text = serde_json::to_string(&result)
				.unwrap_or_else(|_| "{\"status\":\"error\"}".to_string());

			Ok(json!({ "content": [{ "type": "text", "text": text }] }))
		},
		"prompts/list" => Ok(json!({ "prompts": [] })),
		"resources/list" => Ok(json!({ "resources": [] })),
		_ => Err(RpcFailure::method_not_found(method)),
	}
}

/// Dispatch-level failure: either a protocol error or a service error that
/// still needs mapping to an error envelope.
pub enum RpcFailure {
	Protocol { code: i64, message: String, data: Option<Value> },
	Service(ServiceError),
}

impl RpcFailure {
	fn invalid_params(message: impl Into<String>) -> Self {
		Self::Protocol { code: INVALID_PARAMS, message: message.into(), data: None }
	}

	fn method_not_found(method: &str) -> Self {
		Self::Protocol {
			code: METHOD_NOT_FOUND,
			message: format!("Method {method:?} not found."),
			data: None,
		}
	}
}

impl From<ServiceError> for RpcFailure {
	fn from(err: ServiceError) -> Self {
		Self::Service(err)
	}
}

fn error_response(id: Value, failure: RpcFailure) -> RpcResponse {
	match failure {
		RpcFailure::Protocol { code, message, data } =>
			RpcResponse::error(id, code, message, data),
		RpcFailure::Service(err) => {
			let data = json!({ "reason": err.reason() });
			let code = match &err {
				ServiceError::InvalidArgument { .. } => INVALID_PARAMS,
				ServiceError::Timeout { .. } => SERVER_ERROR,
				ServiceError::InvariantViolation { .. } => INTERNAL_ERROR,
				_ => SERVER_ERROR,
			};

			RpcResponse::error(id, code, err.to_string(), Some(data))
		},
	}
}
