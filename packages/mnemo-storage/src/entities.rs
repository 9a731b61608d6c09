use sqlx::{QueryBuilder, Sqlite};
use time::OffsetDateTime;

use crate::{
	Error, Result,
	db::Db,
	models::{self, Entity, EntityRow},
};

const ENTITY_COLUMNS: &str = "id, user_id, entity_type, name, person_type, first_name, \
	 last_name, company, title, email, phone, address, website, notes, tags, importance, \
	 metadata, created_at, updated_at";

pub async fn insert_entity(db: &Db, entity: &Entity) -> Result<()> {
	if entity.id.trim().is_empty() {
		return Err(Error::InvalidArgument("Entity id must be non-empty.".to_string()));
	}

	let result = sqlx::query(
		"INSERT INTO entities (id, user_id, entity_type, name, person_type, first_name, \
		 last_name, company, title, email, phone, address, website, notes, tags, importance, \
		 metadata, created_at, updated_at) \
		 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(&entity.id)
	.bind(&entity.user_id)
	.bind(&entity.entity_type)
	.bind(&entity.name)
	.bind(&entity.person_type)
	.bind(&entity.first_name)
	.bind(&entity.last_name)
	.bind(&entity.company)
	.bind(&entity.title)
	.bind(&entity.email)
	.bind(&entity.phone)
	.bind(&entity.address)
	.bind(&entity.website)
	.bind(&entity.notes)
	.bind(models::encode_string_list(&entity.tags))
	.bind(entity.importance)
	.bind(models::encode_metadata(&entity.metadata))
	.bind(entity.created_at)
	.bind(entity.updated_at)
	.execute(&db.pool)
	.await;

	match result {
		Ok(_) => Ok(()),
		Err(err) if crate::users::is_unique_violation(&err) =>
			Err(Error::Conflict(format!("Entity id {} already exists.", entity.id))),
		Err(err) => Err(err.into()),
	}
}

pub async fn get_entity(db: &Db, id: &str, user_id: &str) -> Result<Option<Entity>> {
	let row = sqlx::query_as::<_, EntityRow>(&format!(
		"SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ? AND user_id = ?"
	))
	.bind(id)
	.bind(user_id)
	.fetch_optional(&db.pool)
	.await?;

	row.map(EntityRow::into_entity).transpose()
}

/// Full-row update; the caller fetched, mutated, and bumped `updated_at`.
pub async fn update_entity(db: &Db, entity: &Entity) -> Result<()> {
	let result = sqlx::query(
		"UPDATE entities SET entity_type = ?, name = ?, person_type = ?, first_name = ?, \
		 last_name = ?, company = ?, title = ?, email = ?, phone = ?, address = ?, website = ?, \
		 notes = ?, tags = ?, importance = ?, metadata = ?, updated_at = ? \
		 WHERE id = ? AND user_id = ?",
	)
	.bind(&entity.entity_type)
	.bind(&entity.name)
	.bind(&entity.person_type)
	.bind(&entity.first_name)
	.bind(&entity.last_name)
	.bind(&entity.company)
	.bind(&entity.title)
	.bind(&entity.email)
	.bind(&entity.phone)
	.bind(&entity.address)
	.bind(&entity.website)
	.bind(&entity.notes)
	.bind(models::encode_string_list(&entity.tags))
	.bind(entity.importance)
	.bind(models::encode_metadata(&entity.metadata))
	.bind(entity.updated_at)
	.bind(&entity.id)
	.bind(&entity.user_id)
	.execute(&db.pool)
	.await?;

	if result.rows_affected() == 0 {
		return Err(Error::NotFound(format!("Entity {} not found.", entity.id)));
	}

	Ok(())
}

/// Deletes the entity and sweeps its id out of every memory's `entity_refs`
/// for the same tenant, in one transaction.
pub async fn delete_entity(db: &Db, id: &str, user_id: &str, now: OffsetDateTime) -> Result<bool> {
	let mut tx = db.pool.begin().await?;
	let result = sqlx::query("DELETE FROM entities WHERE id = ? AND user_id = ?")
		.bind(id)
		.bind(user_id)
		.execute(&mut *tx)
		.await?;

	if result.rows_affected() == 0 {
		tx.commit().await?;

		return Ok(false);
	}

	let referencing: Vec<(String, String)> = sqlx::query_as(
		"SELECT id, entity_refs FROM memories \
		 WHERE id IS NOT NULL AND user_id = ? AND entity_refs LIKE ?",
	)
	.bind(user_id)
	.bind(format!("%{id}%"))
	.fetch_all(&mut *tx)
	.await?;

	for (memory_id, raw_refs) in referencing {
		let mut refs = models::decode_string_list(&raw_refs)?;
		let before = refs.len();

		refs.retain(|entity_ref| entity_ref != id);

		if refs.len() == before {
			continue;
		}

		sqlx::query("UPDATE memories SET entity_refs = ?, updated_at = ? WHERE id = ?")
			.bind(models::encode_string_list(&refs))
			.bind(now)
			.bind(&memory_id)
			.execute(&mut *tx)
			.await?;
	}

	tx.commit().await?;

	Ok(true)
}

pub async fn list_entities(
	db: &Db,
	user_id: &str,
	entity_type: Option<&str>,
) -> Result<Vec<Entity>> {
	let mut builder: QueryBuilder<Sqlite> =
		QueryBuilder::new(format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE user_id = "));

	builder.push_bind(user_id);

	if let Some(entity_type) = entity_type {
		builder.push(" AND entity_type = ");
		builder.push_bind(entity_type);
	}

	builder.push(" ORDER BY updated_at DESC, id ASC");

	let rows: Vec<EntityRow> = builder.build_query_as().fetch_all(&db.pool).await?;
	let mut entities = Vec::with_capacity(rows.len());

	for row in rows {
		entities.push(row.into_entity()?);
	}

	Ok(entities)
}

pub async fn count_entities(db: &Db, user_id: &str) -> Result<i64> {
	let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE user_id = ?")
		.bind(user_id)
		.fetch_one(&db.pool)
		.await?;

	Ok(count)
}
