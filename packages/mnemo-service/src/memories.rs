use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use mnemo_storage::{
	buffer, memories,
	models::{BufferedPayload, Memory, MemoryDraft, MemoryPatch, MemoryType},
};

use crate::{Error, MemoryService, Result, embedding_text, validate_importance};

pub const DEFAULT_IMPORTANCE: f32 = 0.5;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddMemoryRequest {
	#[serde(default)]
	pub title: String,
	pub content: String,
	#[serde(rename = "type")]
	pub memory_type: Option<MemoryType>,
	pub importance: Option<f32>,
	#[serde(default)]
	pub tags: Vec<String>,
	#[serde(default)]
	pub entity_refs: Vec<String>,
	#[serde(default)]
	pub metadata: Map<String, Value>,
	pub generate_embedding: Option<bool>,
	pub use_buffer: Option<bool>,
}

#[derive(Clone, Debug, Serialize)]
pub struct AddMemoryResponse {
	pub id: String,
	pub buffered: bool,
	pub embedded: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpdateMemoryRequest {
	pub title: Option<String>,
	pub content: Option<String>,
	#[serde(rename = "type")]
	pub memory_type: Option<MemoryType>,
	pub importance: Option<f32>,
	pub tags: Option<Vec<String>>,
	pub entity_refs: Option<Vec<String>>,
	pub metadata: Option<Map<String, Value>>,
	pub is_archived: Option<bool>,
}

/// Wire shape of a memory. Embeddings never leave the service; only their
/// presence is reported.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryView {
	pub id: String,
	pub title: String,
	pub content: String,
	#[serde(rename = "type")]
	pub memory_type: MemoryType,
	pub importance: f32,
	pub tags: Vec<String>,
	pub entity_refs: Vec<String>,
	pub metadata: Map<String, Value>,
	pub is_archived: bool,
	pub has_embedding: bool,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub updated_at: OffsetDateTime,
}

impl MemoryView {
	pub fn from_memory(memory: &Memory) -> Self {
		Self {
			id: memory.id.clone(),
			title: memory.title.clone(),
			content: memory.content.clone(),
			memory_type: memory.memory_type,
			importance: memory.importance,
			tags: memory.tags.clone(),
			entity_refs: memory.entity_refs.clone(),
			metadata: memory.metadata.clone(),
			is_archived: memory.is_archived,
			has_embedding: memory.embedding.is_some(),
			created_at: memory.created_at,
			updated_at: memory.updated_at,
		}
	}
}

impl MemoryService {
	pub async fn add_memory(
		&self,
		user_id: &str,
		req: AddMemoryRequest,
	) -> Result<AddMemoryResponse> {
		self.require_user(user_id).await?;

		if req.content.trim().is_empty() {
			return Err(Error::InvalidArgument { message: "content is required.".to_string() });
		}

		let importance = req.importance.unwrap_or(DEFAULT_IMPORTANCE);

		validate_importance(importance)?;
		self.check_memory_quota(user_id).await?;

		let id = Uuid::new_v4().to_string();
		let generate_embedding = req.generate_embedding.unwrap_or(true);
		let draft = MemoryDraft {
			id: id.clone(),
			title: req.title,
			content: req.content,
			memory_type: req.memory_type.unwrap_or(MemoryType::Memory),
			importance,
			tags: dedupe(req.tags),
			entity_refs: dedupe(req.entity_refs),
			metadata: req.metadata,
			generate_embedding,
		};

		if req.use_buffer.unwrap_or(false) {
			let now = OffsetDateTime::now_utc();

			buffer::enqueue_write(
				&self.db,
				user_id,
				&id,
				&BufferedPayload::CreateMemory { draft },
				now,
			)
			.await?;

			return Ok(AddMemoryResponse { id, buffered: true, embedded: false });
		}

		let memory = self.store_draft(user_id, draft).await?;

		Ok(AddMemoryResponse { id, buffered: false, embedded: memory.embedding.is_some() })
	}

	/// Synchronous store path, also used by the worker when flushing
	/// buffered creates. Embedding failures leave the row for backfill
	/// instead of failing the write.
	pub(crate) async fn store_draft(&self, user_id: &str, draft: MemoryDraft) -> Result<Memory> {
		let now = OffsetDateTime::now_utc();
		let mut memory = Memory {
			id: draft.id,
			user_id: user_id.to_string(),
			title: draft.title,
			content: draft.content,
			memory_type: draft.memory_type,
			importance: draft.importance,
			tags: draft.tags,
			entity_refs: draft.entity_refs,
			embedding: None,
			metadata: draft.metadata,
			is_archived: false,
			created_at: now,
			updated_at: now,
		};

		memories::insert_memory(&self.db, &memory).await?;

		if draft.generate_embedding {
			match self.embed_memory_text(user_id, &memory.title, &memory.content).await {
				Ok(vector) => {
					memories::write_embedding(&self.db, &memory.id, &vector).await?;
					memory.embedding = Some(vector);
				},
				Err(err) => {
					warn!(
						memory_id = %memory.id,
						error = %err,
						"Embedding deferred to backfill."
					);
				},
			}
		}

		Ok(memory)
	}

	pub async fn get_memory(&self, user_id: &str, id: &str) -> Result<MemoryView> {
		self.require_user(user_id).await?;

		let memory = memories::get_memory(&self.db, id, user_id)
			.await?
			.ok_or_else(|| Error::NotFound { message: format!("Memory {id} not found.") })?;

		Ok(MemoryView::from_memory(&memory))
	}

	pub async fn update_memory(
		&self,
		user_id: &str,
		id: &str,
		req: UpdateMemoryRequest,
	) -> Result<MemoryView> {
		self.require_user(user_id).await?;

		if let Some(importance) = req.importance {
			validate_importance(importance)?;
		}

		let patch = MemoryPatch {
			title: req.title,
			content: req.content,
			memory_type: req.memory_type,
			importance: req.importance,
			tags: req.tags.map(dedupe),
			entity_refs: req.entity_refs.map(dedupe),
			metadata: req.metadata,
			is_archived: req.is_archived,
		};

		if patch.is_empty() {
			return Err(Error::InvalidArgument {
				message: "The update patch is empty.".to_string(),
			});
		}

		let changes_text = patch.changes_text();
		let now = OffsetDateTime::now_utc();
		let mut memory = memories::update_memory(&self.db, id, user_id, &patch, now).await?;

		if changes_text {
			match self.embed_memory_text(user_id, &memory.title, &memory.content).await {
				Ok(vector) => {
					memories::write_embedding(&self.db, &memory.id, &vector).await?;
					memory.embedding = Some(vector);
				},
				Err(err) => {
					warn!(
						memory_id = %memory.id,
						error = %err,
						"Re-embedding deferred to backfill."
					);
				},
			}
		}

		Ok(MemoryView::from_memory(&memory))
	}

	pub async fn delete_memory(&self, user_id: &str, id: &str) -> Result<()> {
		self.require_user(user_id).await?;

		if !memories::delete_memory(&self.db, id, user_id).await? {
			return Err(Error::NotFound { message: format!("Memory {id} not found.") });
		}

		Ok(())
	}

	pub async fn list_memories(
		&self,
		user_id: &str,
		filter: &memories::MemoryFilter,
	) -> Result<Vec<MemoryView>> {
		self.require_user(user_id).await?;

		let records = memories::list_memories(&self.db, user_id, filter).await?;

		Ok(records.iter().map(MemoryView::from_memory).collect())
	}

	pub(crate) async fn embed_memory_text(
		&self,
		user_id: &str,
		title: &str,
		content: &str,
	) -> Result<Vec<f32>> {
		let texts = vec![embedding_text(title, content)];
		let mut vectors = self.embed_and_record(user_id, &texts).await?;

		vectors.pop().ok_or_else(|| Error::DependencyUnavailable {
			message: "Embedder returned no vectors.".to_string(),
		})
	}

	pub(crate) async fn check_memory_quota(&self, user_id: &str) -> Result<()> {
		let stored = memories::count_memories(&self.db, user_id).await?;
		let buffered = buffer::pending_count(&self.db, user_id).await?;
		let quota = self.cfg.quota.memories_per_user;

		if (stored + buffered) as u64 >= quota {
			return Err(Error::QuotaExceeded {
				message: format!("Memory quota of {quota} records reached."),
			});
		}

		Ok(())
	}
}

fn dedupe(values: Vec<String>) -> Vec<String> {
	let mut seen = Vec::with_capacity(values.len());

	for value in values {
		let trimmed = value.trim().to_string();

		if !trimmed.is_empty() && !seen.contains(&trimmed) {
			seen.push(trimmed);
		}
	}

	seen
}
