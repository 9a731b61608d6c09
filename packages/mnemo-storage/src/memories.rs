use sqlx::{FromRow, QueryBuilder, Sqlite};
use time::OffsetDateTime;

use crate::{
	Error, Result,
	db::Db,
	models::{self, Memory, MemoryPatch, MemoryRow, MemoryType},
	vector,
};

const MEMORY_COLUMNS: &str = "id, user_id, title, content, memory_type, importance, tags, \
	 entity_refs, embedding, metadata, is_archived, created_at, updated_at";

#[derive(Clone, Debug, Default)]
pub struct MemoryFilter {
	pub memory_type: Option<MemoryType>,
	pub tags_any_of: Option<Vec<String>>,
	pub archived: Option<bool>,
	pub created_after: Option<OffsetDateTime>,
	pub has_embedding: Option<bool>,
}

/// Row shape returned by the missing-embedding scan. The scan selects id
/// plus the text columns; single-column selects of a nullable id are
/// collapsed by some backend drivers.
#[derive(Clone, Debug, FromRow)]
pub struct MissingEmbedding {
	pub id: Option<String>,
	pub user_id: String,
	pub title: String,
	pub content: String,
}

pub async fn insert_memory(db: &Db, memory: &Memory) -> Result<()> {
	if memory.id.trim().is_empty() {
		return Err(Error::InvalidArgument("Memory id must be non-empty.".to_string()));
	}

	let result = sqlx::query(
		"INSERT INTO memories (id, user_id, title, content, memory_type, importance, tags, \
		 entity_refs, embedding, metadata, is_archived, created_at, updated_at) \
		 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(&memory.id)
	.bind(&memory.user_id)
	.bind(&memory.title)
	.bind(&memory.content)
	.bind(memory.memory_type.as_str())
	.bind(memory.importance)
	.bind(models::encode_string_list(&memory.tags))
	.bind(models::encode_string_list(&memory.entity_refs))
	.bind(memory.embedding.as_ref().map(|vec| vector::encode_vector(vec)))
	.bind(models::encode_metadata(&memory.metadata))
	.bind(memory.is_archived)
	.bind(memory.created_at)
	.bind(memory.updated_at)
	.execute(&db.pool)
	.await;

	match result {
		Ok(_) => Ok(()),
		Err(err) if crate::users::is_unique_violation(&err) =>
			Err(Error::Conflict(format!("Memory id {} already exists.", memory.id))),
		Err(err) => Err(err.into()),
	}
}

pub async fn get_memory(db: &Db, id: &str, user_id: &str) -> Result<Option<Memory>> {
	let row = sqlx::query_as::<_, MemoryRow>(&format!(
		"SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ? AND user_id = ?"
	))
	.bind(id)
	.bind(user_id)
	.fetch_optional(&db.pool)
	.await?;

	row.map(MemoryRow::into_memory).transpose()
}

/// Applies a partial update and bumps `updated_at`. When the patch touches
/// title or content the stored embedding is cleared; the caller either
/// re-embeds immediately or leaves the row for the backfill scan.
pub async fn update_memory(
	db: &Db,
	id: &str,
	user_id: &str,
	patch: &MemoryPatch,
	now: OffsetDateTime,
) -> Result<Memory> {
	let mut tx = db.pool.begin().await?;
	let row = sqlx::query_as::<_, MemoryRow>(&format!(
		"SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ? AND user_id = ?"
	))
	.bind(id)
	.bind(user_id)
	.fetch_optional(&mut *tx)
	.await?
	.ok_or_else(|| Error::NotFound(format!("Memory {id} not found.")))?;
	let mut memory = row.into_memory()?;

	if let Some(title) = patch.title.as_ref() {
		memory.title = title.clone();
	}
	if let Some(content) = patch.content.as_ref() {
		memory.content = content.clone();
	}
	if let Some(memory_type) = patch.memory_type {
		memory.memory_type = memory_type;
	}
	if let Some(importance) = patch.importance {
		memory.importance = importance;
	}
	if let Some(tags) = patch.tags.as_ref() {
		memory.tags = tags.clone();
	}
	if let Some(entity_refs) = patch.entity_refs.as_ref() {
		memory.entity_refs = entity_refs.clone();
	}
	if let Some(metadata) = patch.metadata.as_ref() {
		memory.metadata = metadata.clone();
	}
	if let Some(is_archived) = patch.is_archived {
		memory.is_archived = is_archived;
	}
	if patch.changes_text() {
		memory.embedding = None;
	}

	memory.updated_at = now;

	sqlx::query(
		"UPDATE memories SET title = ?, content = ?, memory_type = ?, importance = ?, tags = ?, \
		 entity_refs = ?, embedding = ?, metadata = ?, is_archived = ?, updated_at = ? \
		 WHERE id = ? AND user_id = ?",
	)
	.bind(&memory.title)
	.bind(&memory.content)
	.bind(memory.memory_type.as_str())
	.bind(memory.importance)
	.bind(models::encode_string_list(&memory.tags))
	.bind(models::encode_string_list(&memory.entity_refs))
	.bind(memory.embedding.as_ref().map(|vec| vector::encode_vector(vec)))
	.bind(models::encode_metadata(&memory.metadata))
	.bind(memory.is_archived)
	.bind(memory.updated_at)
	.bind(id)
	.bind(user_id)
	.execute(&mut *tx)
	.await?;

	tx.commit().await?;

	Ok(memory)
}

pub async fn delete_memory(db: &Db, id: &str, user_id: &str) -> Result<bool> {
	let result = sqlx::query("DELETE FROM memories WHERE id = ? AND user_id = ?")
		.bind(id)
		.bind(user_id)
		.execute(&db.pool)
		.await?;

	Ok(result.rows_affected() > 0)
}

pub async fn list_memories(db: &Db, user_id: &str, filter: &MemoryFilter) -> Result<Vec<Memory>> {
	let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
		"SELECT {MEMORY_COLUMNS} FROM memories WHERE id IS NOT NULL AND user_id = "
	));

	builder.push_bind(user_id);

	if let Some(memory_type) = filter.memory_type {
		builder.push(" AND memory_type = ");
		builder.push_bind(memory_type.as_str());
	}
	if let Some(archived) = filter.archived {
		builder.push(" AND is_archived = ");
		builder.push_bind(archived);
	}
	if let Some(created_after) = filter.created_after {
		builder.push(" AND created_at > ");
		builder.push_bind(created_after);
	}
	if let Some(has_embedding) = filter.has_embedding {
		if has_embedding {
			builder.push(" AND embedding IS NOT NULL AND length(embedding) > 0");
		} else {
			builder.push(" AND (embedding IS NULL OR length(embedding) = 0)");
		}
	}

	builder.push(" ORDER BY updated_at DESC, id ASC");

	let rows: Vec<MemoryRow> = builder.build_query_as().fetch_all(&db.pool).await?;
	let mut memories = Vec::with_capacity(rows.len());

	for row in rows {
		memories.push(row.into_memory()?);
	}

	if let Some(tags) = filter.tags_any_of.as_ref().filter(|tags| !tags.is_empty()) {
		memories.retain(|memory| memory.tags.iter().any(|tag| tags.contains(tag)));
	}

	Ok(memories)
}

pub async fn count_memories(db: &Db, user_id: &str) -> Result<i64> {
	let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM memories WHERE user_id = ?")
		.bind(user_id)
		.fetch_one(&db.pool)
		.await?;

	Ok(count)
}

pub async fn count_memories_with_embeddings(db: &Db, user_id: &str) -> Result<i64> {
	let count: i64 = sqlx::query_scalar(
		"SELECT COUNT(*) FROM memories \
		 WHERE user_id = ? AND embedding IS NOT NULL AND length(embedding) > 0",
	)
	.bind(user_id)
	.fetch_one(&db.pool)
	.await?;

	Ok(count)
}

pub async fn scan_missing_embeddings(
	db: &Db,
	user_id: Option<&str>,
	batch_size: u32,
) -> Result<Vec<MissingEmbedding>> {
	let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
		"SELECT id, user_id, title, content FROM memories \
		 WHERE (embedding IS NULL OR length(embedding) = 0) AND is_archived = 0",
	);

	if let Some(user_id) = user_id {
		builder.push(" AND user_id = ");
		builder.push_bind(user_id);
	}

	builder.push(" ORDER BY updated_at ASC LIMIT ");
	builder.push_bind(batch_size as i64);

	let rows: Vec<MissingEmbedding> = builder.build_query_as().fetch_all(&db.pool).await?;

	Ok(rows)
}

pub async fn write_embedding(db: &Db, id: &str, vec: &[f32]) -> Result<()> {
	let result = sqlx::query("UPDATE memories SET embedding = ? WHERE id = ?")
		.bind(vector::encode_vector(vec))
		.bind(id)
		.execute(&db.pool)
		.await?;

	if result.rows_affected() == 0 {
		return Err(Error::NotFound(format!("Memory {id} not found.")));
	}

	Ok(())
}
