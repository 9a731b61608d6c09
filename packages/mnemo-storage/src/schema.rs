use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use tracing::info;

use crate::{Error, Result, db::Db};

/// Highest migration version this build knows about.
pub const SCHEMA_VERSION: i64 = 2;

// memories.id is deliberately declared without NOT NULL: SQLite accepts NULL
// in a TEXT primary key, and the null-id guard paths must stay reachable.
const MIGRATION_V1: &str = "\
CREATE TABLE IF NOT EXISTS users (
	user_id TEXT PRIMARY KEY NOT NULL,
	email TEXT NOT NULL UNIQUE,
	display_name TEXT NOT NULL,
	is_active INTEGER NOT NULL DEFAULT 1,
	created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS memories (
	id TEXT PRIMARY KEY,
	user_id TEXT NOT NULL,
	title TEXT NOT NULL,
	content TEXT NOT NULL,
	memory_type TEXT NOT NULL,
	importance REAL NOT NULL,
	tags TEXT NOT NULL DEFAULT '[]',
	entity_refs TEXT NOT NULL DEFAULT '[]',
	embedding BLOB,
	metadata TEXT NOT NULL DEFAULT '{}',
	is_archived INTEGER NOT NULL DEFAULT 0,
	created_at TEXT NOT NULL,
	updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memories_user_id ON memories (user_id);
CREATE TABLE IF NOT EXISTS entities (
	id TEXT PRIMARY KEY NOT NULL,
	user_id TEXT NOT NULL,
	entity_type TEXT NOT NULL,
	name TEXT NOT NULL,
	person_type TEXT,
	first_name TEXT,
	last_name TEXT,
	company TEXT,
	title TEXT,
	email TEXT,
	phone TEXT,
	address TEXT,
	website TEXT,
	notes TEXT,
	tags TEXT NOT NULL DEFAULT '[]',
	importance REAL NOT NULL DEFAULT 0.5,
	metadata TEXT NOT NULL DEFAULT '{}',
	created_at TEXT NOT NULL,
	updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entities_user_id ON entities (user_id);
CREATE TABLE IF NOT EXISTS interactions (
	id TEXT PRIMARY KEY NOT NULL,
	user_id TEXT NOT NULL,
	entity_refs TEXT NOT NULL DEFAULT '[]',
	content TEXT NOT NULL,
	direction TEXT NOT NULL DEFAULT 'none',
	occurred_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_interactions_user_id ON interactions (user_id);
CREATE TABLE IF NOT EXISTS api_usage_tracking (
	id TEXT PRIMARY KEY NOT NULL,
	user_id TEXT NOT NULL,
	provider TEXT NOT NULL,
	operation TEXT NOT NULL,
	tokens INTEGER NOT NULL,
	cost REAL NOT NULL,
	timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_api_usage_tracking_user_id ON api_usage_tracking (user_id);
CREATE TABLE IF NOT EXISTS buffered_writes (
	id TEXT PRIMARY KEY NOT NULL,
	user_id TEXT NOT NULL,
	memory_id TEXT NOT NULL,
	payload TEXT NOT NULL,
	attempts INTEGER NOT NULL DEFAULT 0,
	next_attempt_at TEXT NOT NULL,
	state TEXT NOT NULL DEFAULT 'pending',
	last_error TEXT,
	enqueued_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_buffered_writes_user_id ON buffered_writes (user_id)";

const MIGRATION_V2: &str = "\
CREATE INDEX IF NOT EXISTS idx_memories_updated_at ON memories (user_id, updated_at);
CREATE INDEX IF NOT EXISTS idx_entities_email ON entities (user_id, email);
CREATE INDEX IF NOT EXISTS idx_buffered_writes_due ON buffered_writes (state, next_attempt_at)";

pub struct Migration {
	pub version: i64,
	pub sql: &'static str,
}

pub const MIGRATIONS: [Migration; 2] = [
	Migration { version: 1, sql: MIGRATION_V1 },
	Migration { version: 2, sql: MIGRATION_V2 },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrateMode {
	Apply,
	DryRun,
}

#[derive(Clone, Debug)]
pub struct MigrationReport {
	pub from_version: i64,
	pub to_version: i64,
	pub applied: Vec<i64>,
	pub dry_run: bool,
}

pub async fn current_version(db: &Db) -> Result<i64> {
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL, applied_at TEXT NOT NULL)",
	)
	.execute(&db.pool)
	.await?;

	let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
		.fetch_one(&db.pool)
		.await?;

	Ok(version.unwrap_or(0))
}

pub async fn migrate(db: &Db, mode: MigrateMode) -> Result<MigrationReport> {
	let from_version = current_version(db).await?;
	let pending: Vec<&Migration> =
		MIGRATIONS.iter().filter(|migration| migration.version > from_version).collect();
	let applied: Vec<i64> = pending.iter().map(|migration| migration.version).collect();

	if mode == MigrateMode::DryRun {
		return Ok(MigrationReport {
			from_version,
			to_version: from_version + applied.len() as i64,
			applied,
			dry_run: true,
		});
	}

	let now = OffsetDateTime::now_utc();
	let mut tx = db.pool.begin().await?;

	for migration in &pending {
		for statement in migration.sql.split(';') {
			let trimmed = statement.trim();

			if trimmed.is_empty() {
				continue;
			}

			sqlx::query(trimmed).execute(&mut *tx).await?;
		}

		sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
			.bind(migration.version)
			.bind(now)
			.execute(&mut *tx)
			.await?;
	}

	tx.commit().await?;

	if !applied.is_empty() {
		info!(from = from_version, to = SCHEMA_VERSION, "Applied schema migrations.");
	}

	Ok(MigrationReport { from_version, to_version: SCHEMA_VERSION, applied, dry_run: false })
}

/// Snapshot the live database into `<db_path>.bak-v<version>` before
/// migrating. Uses `VACUUM INTO`, which is safe on an open database.
pub async fn backup_before_migrate(db: &Db, db_path: &Path) -> Result<PathBuf> {
	let version = current_version(db).await?;
	let backup_path = db_path.with_extension(format!("bak-v{version}"));
	let target = backup_path.to_string_lossy().replace('\'', "''");

	if backup_path.exists() {
		std::fs::remove_file(&backup_path)
			.map_err(|err| Error::Migration(format!("Failed to clear old backup: {err}.")))?;
	}

	sqlx::query(&format!("VACUUM INTO '{target}'")).execute(&db.pool).await?;

	Ok(backup_path)
}

/// Restore a backup produced by [`backup_before_migrate`]. The pool must be
/// closed first; this replaces the database file on disk.
pub fn rollback_from_backup(db_path: &Path, backup_path: &Path) -> Result<()> {
	if !backup_path.exists() {
		return Err(Error::Migration(format!("Backup {backup_path:?} does not exist.")));
	}

	std::fs::copy(backup_path, db_path)
		.map_err(|err| Error::Migration(format!("Failed to restore backup: {err}.")))?;

	Ok(())
}
