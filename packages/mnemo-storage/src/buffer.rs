use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Result,
	db::Db,
	models::{BufferedPayload, BufferedWrite, WriteState},
};

const WRITE_COLUMNS: &str =
	"id, user_id, memory_id, payload, attempts, next_attempt_at, state, last_error, enqueued_at";

pub async fn enqueue_write(
	db: &Db,
	user_id: &str,
	memory_id: &str,
	payload: &BufferedPayload,
	now: OffsetDateTime,
) -> Result<BufferedWrite> {
	let write = BufferedWrite {
		id: Uuid::new_v4().to_string(),
		user_id: user_id.to_string(),
		memory_id: memory_id.to_string(),
		payload: serde_json::to_string(payload).map_err(|err| {
			crate::Error::InvalidArgument(format!("Unserializable buffer payload: {err}."))
		})?,
		attempts: 0,
		next_attempt_at: now,
		state: WriteState::Pending.as_str().to_string(),
		last_error: None,
		enqueued_at: now,
	};

	sqlx::query(
		"INSERT INTO buffered_writes (id, user_id, memory_id, payload, attempts, \
		 next_attempt_at, state, last_error, enqueued_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(&write.id)
	.bind(&write.user_id)
	.bind(&write.memory_id)
	.bind(&write.payload)
	.bind(write.attempts)
	.bind(write.next_attempt_at)
	.bind(&write.state)
	.bind(&write.last_error)
	.bind(write.enqueued_at)
	.execute(&db.pool)
	.await?;

	Ok(write)
}

/// Claims the oldest due pending write that is also the oldest live write
/// for its `(user_id, memory_id)` key, so writes to one memory apply in
/// enqueue order even across retries. The claimed row is moved to
/// `in_flight` inside the same transaction.
pub async fn fetch_next_due(db: &Db, now: OffsetDateTime) -> Result<Option<BufferedWrite>> {
	let mut tx = db.pool.begin().await?;
	let write = sqlx::query_as::<_, BufferedWrite>(&format!(
		"SELECT {WRITE_COLUMNS} FROM buffered_writes AS bw \
		 WHERE bw.state = 'pending' AND bw.next_attempt_at <= ? \
		 AND NOT EXISTS ( \
		     SELECT 1 FROM buffered_writes AS older \
		     WHERE older.user_id = bw.user_id AND older.memory_id = bw.memory_id \
		     AND older.state != 'failed' AND older.rowid < bw.rowid \
		 ) \
		 ORDER BY bw.rowid ASC LIMIT 1"
	))
	.bind(now)
	.fetch_optional(&mut *tx)
	.await?;

	let Some(mut write) = write else {
		tx.commit().await?;

		return Ok(None);
	};

	sqlx::query("UPDATE buffered_writes SET state = 'in_flight' WHERE id = ?")
		.bind(&write.id)
		.execute(&mut *tx)
		.await?;
	tx.commit().await?;

	write.state = WriteState::InFlight.as_str().to_string();

	Ok(Some(write))
}

/// A flushed write leaves the queue entirely; the observable effect is
/// at-most-once.
pub async fn mark_done(db: &Db, id: &str) -> Result<()> {
	sqlx::query("DELETE FROM buffered_writes WHERE id = ?").bind(id).execute(&db.pool).await?;

	Ok(())
}

pub async fn mark_retry(
	db: &Db,
	id: &str,
	attempts: i64,
	next_attempt_at: OffsetDateTime,
	error: &str,
) -> Result<()> {
	sqlx::query(
		"UPDATE buffered_writes SET state = 'pending', attempts = ?, next_attempt_at = ?, \
		 last_error = ? WHERE id = ?",
	)
	.bind(attempts)
	.bind(next_attempt_at)
	.bind(error)
	.bind(id)
	.execute(&db.pool)
	.await?;

	Ok(())
}

pub async fn mark_failed(db: &Db, id: &str, attempts: i64, error: &str) -> Result<()> {
	sqlx::query(
		"UPDATE buffered_writes SET state = 'failed', attempts = ?, last_error = ? WHERE id = ?",
	)
	.bind(attempts)
	.bind(error)
	.bind(id)
	.execute(&db.pool)
	.await?;

	Ok(())
}

/// Returns claims abandoned by a crashed worker to the pending state.
pub async fn reset_in_flight(db: &Db, now: OffsetDateTime) -> Result<u64> {
	let result = sqlx::query(
		"UPDATE buffered_writes SET state = 'pending', next_attempt_at = ? \
		 WHERE state = 'in_flight'",
	)
	.bind(now)
	.execute(&db.pool)
	.await?;

	Ok(result.rows_affected())
}

pub async fn pending_count(db: &Db, user_id: &str) -> Result<i64> {
	let count: i64 = sqlx::query_scalar(
		"SELECT COUNT(*) FROM buffered_writes WHERE user_id = ? AND state != 'failed'",
	)
	.bind(user_id)
	.fetch_one(&db.pool)
	.await?;

	Ok(count)
}

pub async fn failed_writes(db: &Db, user_id: &str) -> Result<Vec<BufferedWrite>> {
	let writes = sqlx::query_as::<_, BufferedWrite>(&format!(
		"SELECT {WRITE_COLUMNS} FROM buffered_writes \
		 WHERE user_id = ? AND state = 'failed' ORDER BY enqueued_at ASC"
	))
	.bind(user_id)
	.fetch_all(&db.pool)
	.await?;

	Ok(writes)
}
