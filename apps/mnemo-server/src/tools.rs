//! Tool surface exposed over JSON-RPC. Argument shapes are the contract;
//! every call is validated against its declared schema before dispatch.

use serde_json::{Value, json};

use mnemo_service::{
	Envelope, Error, MemoryService, Result,
	memories::{AddMemoryRequest, UpdateMemoryRequest},
	search::SearchRequest,
	sync::SyncContactsRequest,
};
use mnemo_sync::vcard_file::VcardFileProvider;

use crate::Transport;

pub const TOOL_STORE_MEMORY: &str = "store_memory";
pub const TOOL_RECALL_MEMORIES: &str = "recall_memories";
pub const TOOL_GET_MEMORY: &str = "get_memory";
pub const TOOL_UPDATE_MEMORY: &str = "update_memory";
pub const TOOL_DELETE_MEMORY: &str = "delete_memory";
pub const TOOL_GET_MEMORY_STATS: &str = "get_memory_stats";
pub const TOOL_UPDATE_MISSING_EMBEDDINGS: &str = "update_missing_embeddings";
pub const TOOL_GET_DAILY_COSTS: &str = "get_daily_costs";
pub const TOOL_SYNC_CONTACTS: &str = "sync_contacts";

#[derive(Clone, Debug)]
pub struct ToolDefinition {
	pub name: &'static str,
	pub description: &'static str,
	pub input_schema: Value,
}

pub fn build_tools(transport: Transport) -> Vec<ToolDefinition> {
	let mut tools = vec![
		ToolDefinition {
			name: TOOL_STORE_MEMORY,
			description: "Store a memory.",
			input_schema: json!({
				"type": "object",
				"properties": {
					"content": { "type": "string" },
					"type": { "type": "string" },
					"importance": { "type": "number" },
					"title": { "type": "string" },
					"tags": { "type": "array", "items": { "type": "string" } },
					"metadata": { "type": "object" }
				},
				"required": ["content"]
			}),
		},
		ToolDefinition {
			name: TOOL_RECALL_MEMORIES,
			description: "Search memories by semantic similarity, keywords, and metadata.",
			input_schema: json!({
				"type": "object",
				"properties": {
					"query": { "type": "string" },
					"limit": { "type": "integer" },
					"strategy": { "type": "string" },
					"threshold": { "type": "number" }
				},
				"required": ["query"]
			}),
		},
		ToolDefinition {
			name: TOOL_GET_MEMORY,
			description: "Fetch one memory by id.",
			input_schema: json!({
				"type": "object",
				"properties": { "id": { "type": "string" } },
				"required": ["id"]
			}),
		},
		ToolDefinition {
			name: TOOL_UPDATE_MEMORY,
			description: "Partially update a memory.",
			input_schema: json!({
				"type": "object",
				"properties": {
					"id": { "type": "string" },
					"title": { "type": "string" },
					"content": { "type": "string" },
					"importance": { "type": "number" },
					"tags": { "type": "array", "items": { "type": "string" } },
					"metadata": { "type": "object" }
				},
				"required": ["id"]
			}),
		},
		ToolDefinition {
			name: TOOL_DELETE_MEMORY,
			description: "Delete a memory by id.",
			input_schema: json!({
				"type": "object",
				"properties": { "id": { "type": "string" } },
				"required": ["id"]
			}),
		},
		ToolDefinition {
			name: TOOL_GET_MEMORY_STATS,
			description: "Per-tenant counts, embedding coverage, and health recommendation.",
			input_schema: json!({ "type": "object", "properties": {} }),
		},
		ToolDefinition {
			name: TOOL_UPDATE_MISSING_EMBEDDINGS,
			description: "Trigger an embedding backfill pass.",
			input_schema: json!({ "type": "object", "properties": {} }),
		},
		ToolDefinition {
			name: TOOL_GET_DAILY_COSTS,
			description: "Aggregate provider usage for one day.",
			input_schema: json!({
				"type": "object",
				"properties": { "date": { "type": "string" } }
			}),
		},
	];

	// Contact syncs can outlive the short-lived HTTP deadline; the tool is
	// registered on the long-lived transport only.
	if transport == Transport::Stdio {
		tools.push(ToolDefinition {
			name: TOOL_SYNC_CONTACTS,
			description: "Synchronize person entities with a vCard contact file.",
			input_schema: json!({
				"type": "object",
				"properties": {
					"file": { "type": "string" },
					"direction": { "type": "string" },
					"conflict_policy": { "type": "string" },
					"dry_run": { "type": "boolean" },
					"auto_merge": { "type": "boolean" },
					"threshold": { "type": "integer" }
				},
				"required": ["file", "direction"]
			}),
		});
	}

	tools
}

/// Validates call arguments against the declared input schema: required
/// properties must be present and typed properties must match.
pub fn validate_arguments(schema: &Value, args: &Value) -> std::result::Result<(), String> {
	let Some(args_map) = args.as_object() else {
		return Err("arguments must be an object.".to_string());
	};

	if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
		for name in required.iter().filter_map(|v| v.as_str()) {
			if !args_map.contains_key(name) {
				return Err(format!("missing required argument {name:?}."));
			}
		}
	}

	let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) else {
		return Ok(());
	};

	for (name, value) in args_map {
		let Some(declared) = properties.get(name) else {
			continue;
		};
		let Some(expected) = declared.get("type").and_then(|v| v.as_str()) else {
			continue;
		};
		let ok = match expected {
			"string" => value.is_string(),
			"number" => value.is_number(),
			"integer" => value.is_i64() || value.is_u64(),
			"boolean" => value.is_boolean(),
			"array" => value.is_array(),
			"object" => value.is_object(),
			_ => true,
		};

		if !ok {
			return Err(format!("argument {name:?} must be of type {expected}."));
		}
	}

	Ok(())
}

pub async fn execute_tool(
	service: &MemoryService,
	user_id: &str,
	name: &str,
	args: Value,
) -> Result<Value> {
	match name {
		TOOL_STORE_MEMORY => {
			let req: AddMemoryRequest = decode(args)?;
			let response = service.add_memory(user_id, req).await?;

			envelope(response, "Memory stored.")
		},
		TOOL_RECALL_MEMORIES => {
			let req: SearchRequest = decode(args)?;
			let response = service.search_memories(user_id, req).await?;
			let message = format!("{} memories ({} search).", response.memories.len(), response.mode);

			envelope(response, message)
		},
		TOOL_GET_MEMORY => {
			let id = require_str(&args, "id")?;
			let response = service.get_memory(user_id, &id).await?;

			envelope(response, "Memory found.")
		},
		TOOL_UPDATE_MEMORY => {
			let id = require_str(&args, "id")?;
			let req: UpdateMemoryRequest = decode(args)?;
			let response = service.update_memory(user_id, &id, req).await?;

			envelope(response, "Memory updated.")
		},
		TOOL_DELETE_MEMORY => {
			let id = require_str(&args, "id")?;

			service.delete_memory(user_id, &id).await?;

			envelope(json!({ "id": id }), "Memory deleted.")
		},
		TOOL_GET_MEMORY_STATS => {
			let response = service.get_statistics(user_id).await?;

			envelope(response, "Statistics collected.")
		},
		TOOL_UPDATE_MISSING_EMBEDDINGS => {
			service.update_missing_embeddings(user_id).await?;

			envelope(json!({ "triggered": true }), "Backfill pass triggered.")
		},
		TOOL_GET_DAILY_COSTS => {
			let date = args.get("date").and_then(|v| v.as_str()).map(str::to_string);
			let response = service.get_daily_costs(user_id, date.as_deref()).await?;

			envelope(response, "Daily costs aggregated.")
		},
		TOOL_SYNC_CONTACTS => {
			let file = require_str(&args, "file")?;
			let req: SyncContactsRequest = decode(args)?;
			let provider = VcardFileProvider::new(file);
			let summary = service.sync_contacts(user_id, &provider, req, None).await?;
			let message = if summary.errors.is_empty() {
				"Contact sync complete.".to_string()
			} else {
				format!("Contact sync finished with {} errors.", summary.errors.len())
			};

			envelope(summary, message)
		},
		other => Err(Error::NotFound { message: format!("Unknown tool {other}.") }),
	}
}

fn decode<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
	serde_json::from_value(args)
		.map_err(|err| Error::InvalidArgument { message: format!("Invalid arguments: {err}.") })
}

fn require_str(args: &Value, key: &str) -> Result<String> {
	args.get(key)
		.and_then(|v| v.as_str())
		.map(str::to_string)
		.filter(|value| !value.trim().is_empty())
		.ok_or_else(|| Error::InvalidArgument { message: format!("{key} is required.") })
}

fn envelope<T: serde::Serialize>(data: T, message: impl Into<String>) -> Result<Value> {
	let envelope = Envelope::success(data, message);

	serde_json::to_value(&envelope)
		.map_err(|err| Error::InvariantViolation { message: err.to_string() })
}
