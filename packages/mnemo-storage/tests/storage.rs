use serde_json::{Map, json};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use mnemo_storage::{
	buffer, db::Db, entities, memories,
	memories::MemoryFilter,
	models::{
		BufferedPayload, Entity, Memory, MemoryDraft, MemoryPatch, MemoryType, UsageRecord,
	},
	schema, usage, users, vector,
};
use mnemo_testkit::TestDatabase;

async fn test_db() -> (TestDatabase, Db) {
	let tdb = TestDatabase::new();
	let db = Db::connect(&tdb.database_config()).await.expect("connect failed");

	db.ensure_schema().await.expect("migrate failed");

	(tdb, db)
}

fn memory(id: &str, user_id: &str, title: &str, content: &str) -> Memory {
	let now = OffsetDateTime::now_utc();

	Memory {
		id: id.to_string(),
		user_id: user_id.to_string(),
		title: title.to_string(),
		content: content.to_string(),
		memory_type: MemoryType::Memory,
		importance: 0.5,
		tags: vec!["test".to_string()],
		entity_refs: Vec::new(),
		embedding: None,
		metadata: Map::new(),
		is_archived: false,
		created_at: now,
		updated_at: now,
	}
}

#[tokio::test]
async fn migrations_are_versioned_and_idempotent() {
	let (_tdb, db) = test_db().await;

	assert_eq!(schema::current_version(&db).await.unwrap(), schema::SCHEMA_VERSION);

	// Re-running applies nothing.
	let report = schema::migrate(&db, schema::MigrateMode::Apply).await.unwrap();

	assert!(report.applied.is_empty());

	// Dry run on a fresh database reports every migration without applying.
	let tdb2 = TestDatabase::new();
	let db2 = Db::connect(&tdb2.database_config()).await.unwrap();
	let dry = schema::migrate(&db2, schema::MigrateMode::DryRun).await.unwrap();

	assert!(dry.dry_run);
	assert_eq!(dry.applied.len(), schema::MIGRATIONS.len());
	assert_eq!(schema::current_version(&db2).await.unwrap(), 0);
}

#[tokio::test]
async fn backup_and_rollback_restore_the_database_file() {
	let (tdb, db) = test_db().await;
	let user = users::insert_user(&db, "backup@test.dev", "Backup").await.unwrap();

	memories::insert_memory(&db, &memory("m-1", &user.user_id, "a", "b")).await.unwrap();

	let backup = schema::backup_before_migrate(&db, tdb.path()).await.unwrap();

	assert!(backup.exists());

	memories::delete_memory(&db, "m-1", &user.user_id).await.unwrap();
	db.pool.close().await;

	schema::rollback_from_backup(tdb.path(), &backup).unwrap();

	let db = Db::connect(&tdb.database_config()).await.unwrap();

	assert!(memories::get_memory(&db, "m-1", &user.user_id).await.unwrap().is_some());

	let _ = std::fs::remove_file(backup);
}

#[tokio::test]
async fn duplicate_emails_and_ids_conflict() {
	let (_tdb, db) = test_db().await;
	let user = users::insert_user(&db, "Dup@Test.dev", "Dup").await.unwrap();

	// Emails are stored lowercase and unique case-insensitively.
	assert_eq!(user.email, "dup@test.dev");
	assert!(matches!(
		users::insert_user(&db, "dup@test.dev", "Again").await,
		Err(mnemo_storage::Error::Conflict(_))
	));

	memories::insert_memory(&db, &memory("m-1", &user.user_id, "t", "c")).await.unwrap();
	assert!(matches!(
		memories::insert_memory(&db, &memory("m-1", &user.user_id, "t2", "c2")).await,
		Err(mnemo_storage::Error::Conflict(_))
	));
}

#[tokio::test]
async fn user_cascade_delete_removes_owned_records() {
	let (_tdb, db) = test_db().await;
	let user = users::insert_user(&db, "cascade@test.dev", "Cascade").await.unwrap();
	let other = users::insert_user(&db, "other@test.dev", "Other").await.unwrap();

	memories::insert_memory(&db, &memory("m-1", &user.user_id, "t", "c")).await.unwrap();
	memories::insert_memory(&db, &memory("m-2", &other.user_id, "t", "c")).await.unwrap();
	usage::record_usage(
		&db,
		&UsageRecord {
			id: Uuid::new_v4().to_string(),
			user_id: user.user_id.clone(),
			provider: "embedder".to_string(),
			operation: "embed".to_string(),
			tokens: 10,
			cost: 0.001,
			timestamp: OffsetDateTime::now_utc(),
		},
	)
	.await
	.unwrap();

	assert!(users::delete_user(&db, &user.user_id).await.unwrap());
	assert!(users::get_user(&db, &user.user_id).await.unwrap().is_none());
	assert_eq!(memories::count_memories(&db, &user.user_id).await.unwrap(), 0);
	// The other tenant is untouched.
	assert_eq!(memories::count_memories(&db, &other.user_id).await.unwrap(), 1);
}

#[tokio::test]
async fn cross_tenant_reads_and_writes_miss() {
	let (_tdb, db) = test_db().await;
	let alice = users::insert_user(&db, "alice@test.dev", "Alice").await.unwrap();
	let bob = users::insert_user(&db, "bob@test.dev", "Bob").await.unwrap();

	memories::insert_memory(&db, &memory("m-a", &alice.user_id, "secret", "a-secret"))
		.await
		.unwrap();

	assert!(memories::get_memory(&db, "m-a", &bob.user_id).await.unwrap().is_none());
	assert!(matches!(
		memories::update_memory(
			&db,
			"m-a",
			&bob.user_id,
			&MemoryPatch { title: Some("stolen".to_string()), ..MemoryPatch::default() },
			OffsetDateTime::now_utc(),
		)
		.await,
		Err(mnemo_storage::Error::NotFound(_))
	));
	assert!(!memories::delete_memory(&db, "m-a", &bob.user_id).await.unwrap());

	// Alice's record is unchanged.
	let original = memories::get_memory(&db, "m-a", &alice.user_id).await.unwrap().unwrap();

	assert_eq!(original.title, "secret");
}

#[tokio::test]
async fn list_filters_compose() {
	let (_tdb, db) = test_db().await;
	let user = users::insert_user(&db, "list@test.dev", "List").await.unwrap();
	let base = OffsetDateTime::now_utc();

	let mut old = memory("m-old", &user.user_id, "old", "old");

	old.memory_type = MemoryType::Episodic;
	old.created_at = base - Duration::days(10);
	old.updated_at = base - Duration::days(10);
	old.tags = vec!["work".to_string()];

	let mut fresh = memory("m-new", &user.user_id, "new", "new");

	fresh.memory_type = MemoryType::Semantic;
	fresh.tags = vec!["home".to_string()];
	fresh.embedding = Some(vec![0.1, 0.2]);

	let mut archived = memory("m-arch", &user.user_id, "archived", "archived");

	archived.is_archived = true;

	memories::insert_memory(&db, &old).await.unwrap();
	memories::insert_memory(&db, &fresh).await.unwrap();
	memories::insert_memory(&db, &archived).await.unwrap();

	let by_type = memories::list_memories(
		&db,
		&user.user_id,
		&MemoryFilter { memory_type: Some(MemoryType::Episodic), ..MemoryFilter::default() },
	)
	.await
	.unwrap();

	assert_eq!(by_type.len(), 1);
	assert_eq!(by_type[0].id, "m-old");

	let recent = memories::list_memories(
		&db,
		&user.user_id,
		&MemoryFilter {
			created_after: Some(base - Duration::days(1)),
			archived: Some(false),
			..MemoryFilter::default()
		},
	)
	.await
	.unwrap();

	assert_eq!(recent.len(), 1);
	assert_eq!(recent[0].id, "m-new");

	let with_embedding = memories::list_memories(
		&db,
		&user.user_id,
		&MemoryFilter { has_embedding: Some(true), ..MemoryFilter::default() },
	)
	.await
	.unwrap();

	assert_eq!(with_embedding.len(), 1);
	assert_eq!(with_embedding[0].embedding.as_deref(), Some(&[0.1_f32, 0.2][..]));

	let by_tags = memories::list_memories(
		&db,
		&user.user_id,
		&MemoryFilter {
			tags_any_of: Some(vec!["work".to_string(), "nope".to_string()]),
			..MemoryFilter::default()
		},
	)
	.await
	.unwrap();

	assert_eq!(by_tags.len(), 1);
	assert_eq!(by_tags[0].id, "m-old");
}

#[tokio::test]
async fn update_clears_embedding_only_on_text_change() {
	let (_tdb, db) = test_db().await;
	let user = users::insert_user(&db, "patch@test.dev", "Patch").await.unwrap();
	let mut record = memory("m-1", &user.user_id, "title", "content");

	record.embedding = Some(vec![1.0, 0.0]);
	memories::insert_memory(&db, &record).await.unwrap();

	let now = OffsetDateTime::now_utc();
	let untouched = memories::update_memory(
		&db,
		"m-1",
		&user.user_id,
		&MemoryPatch { importance: Some(0.9), ..MemoryPatch::default() },
		now,
	)
	.await
	.unwrap();

	assert!(untouched.embedding.is_some());
	assert_eq!(untouched.importance, 0.9);

	let retitled = memories::update_memory(
		&db,
		"m-1",
		&user.user_id,
		&MemoryPatch { title: Some("new title".to_string()), ..MemoryPatch::default() },
		now + Duration::seconds(1),
	)
	.await
	.unwrap();

	assert!(retitled.embedding.is_none());
	assert!(retitled.updated_at > untouched.updated_at);
}

#[tokio::test]
async fn missing_embedding_scan_returns_extra_columns_and_null_ids() {
	let (_tdb, db) = test_db().await;
	let user = users::insert_user(&db, "scan@test.dev", "Scan").await.unwrap();

	memories::insert_memory(&db, &memory("m-1", &user.user_id, "t1", "c1")).await.unwrap();

	let mut embedded = memory("m-2", &user.user_id, "t2", "c2");

	embedded.embedding = Some(vec![0.5; 4]);
	memories::insert_memory(&db, &embedded).await.unwrap();

	// Out-of-band poke: SQLite accepts NULL in a TEXT primary key.
	sqlx::query(
		"INSERT INTO memories (id, user_id, title, content, memory_type, importance, tags, \
		 entity_refs, metadata, is_archived, created_at, updated_at) \
		 VALUES (NULL, ?, 'poked', 'poked', 'MEMORY', 0.5, '[]', '[]', '{}', 0, ?, ?)",
	)
	.bind(&user.user_id)
	.bind(OffsetDateTime::now_utc())
	.bind(OffsetDateTime::now_utc())
	.execute(&db.pool)
	.await
	.unwrap();

	let rows =
		memories::scan_missing_embeddings(&db, Some(&user.user_id), 10).await.unwrap();

	assert_eq!(rows.len(), 2);
	assert!(rows.iter().any(|row| row.id.as_deref() == Some("m-1")));
	assert!(rows.iter().any(|row| row.id.is_none()));
	assert!(rows.iter().all(|row| !row.title.is_empty() && !row.content.is_empty()));

	// Null-id rows never surface through list.
	let listed =
		memories::list_memories(&db, &user.user_id, &MemoryFilter::default()).await.unwrap();

	assert_eq!(listed.len(), 2);
	assert!(listed.iter().all(|memory| !memory.id.is_empty()));
}

#[tokio::test]
async fn buffer_preserves_per_key_fifo_across_retries() {
	let (_tdb, db) = test_db().await;
	let user = users::insert_user(&db, "fifo@test.dev", "Fifo").await.unwrap();
	let now = OffsetDateTime::now_utc();
	let payload = |title: &str| BufferedPayload::UpdateMemory {
		id: "m-1".to_string(),
		patch: MemoryPatch { title: Some(title.to_string()), ..MemoryPatch::default() },
	};

	let first =
		buffer::enqueue_write(&db, &user.user_id, "m-1", &payload("first"), now).await.unwrap();
	let _second =
		buffer::enqueue_write(&db, &user.user_id, "m-1", &payload("second"), now).await.unwrap();
	let other = buffer::enqueue_write(
		&db,
		&user.user_id,
		"m-2",
		&BufferedPayload::CreateMemory {
			draft: MemoryDraft {
				id: "m-2".to_string(),
				title: "t".to_string(),
				content: "c".to_string(),
				memory_type: MemoryType::Memory,
				importance: 0.5,
				tags: Vec::new(),
				entity_refs: Vec::new(),
				metadata: Map::new(),
				generate_embedding: false,
			},
		},
		now,
	)
	.await
	.unwrap();

	// First claim is the oldest write overall.
	let claimed = buffer::fetch_next_due(&db, now).await.unwrap().unwrap();

	assert_eq!(claimed.id, first.id);

	// While m-1's head is in flight, m-1's second write must not be
	// claimable, but m-2's write is.
	let next = buffer::fetch_next_due(&db, now).await.unwrap().unwrap();

	assert_eq!(next.id, other.id);
	assert!(buffer::fetch_next_due(&db, now).await.unwrap().is_none());

	// A retry pushes the head into the future; the second write for the
	// same key still waits for it.
	buffer::mark_retry(&db, &claimed.id, 1, now + Duration::seconds(60), "boom")
		.await
		.unwrap();
	buffer::mark_done(&db, &other.id).await.unwrap();
	assert!(buffer::fetch_next_due(&db, now).await.unwrap().is_none());

	// Once the head becomes due again it is claimed first.
	let later = now + Duration::seconds(61);
	let reclaimed = buffer::fetch_next_due(&db, later).await.unwrap().unwrap();

	assert_eq!(reclaimed.id, first.id);

	// A terminally failed head releases the key.
	buffer::mark_failed(&db, &reclaimed.id, 5, "gave up").await.unwrap();

	let released = buffer::fetch_next_due(&db, later).await.unwrap().unwrap();

	assert!(released.payload.contains("second"));

	let failed = buffer::failed_writes(&db, &user.user_id).await.unwrap();

	assert_eq!(failed.len(), 1);
	assert_eq!(failed[0].id, first.id);
}

#[tokio::test]
async fn usage_aggregates_by_provider_within_a_day() {
	let (_tdb, db) = test_db().await;
	let user = users::insert_user(&db, "usage@test.dev", "Usage").await.unwrap();
	let day = OffsetDateTime::now_utc();
	let record = |provider: &str, tokens: i64, cost: f64, at: OffsetDateTime| UsageRecord {
		id: Uuid::new_v4().to_string(),
		user_id: user.user_id.clone(),
		provider: provider.to_string(),
		operation: "op".to_string(),
		tokens,
		cost,
		timestamp: at,
	};

	usage::record_usage(&db, &record("embedder", 100, 0.002, day)).await.unwrap();
	usage::record_usage(&db, &record("embedder", 50, 0.001, day)).await.unwrap();
	usage::record_usage(&db, &record("llm", 500, 0.01, day)).await.unwrap();
	// Outside the window.
	usage::record_usage(&db, &record("llm", 999, 9.99, day - Duration::days(2)))
		.await
		.unwrap();

	let rows = usage::usage_by_provider(
		&db,
		&user.user_id,
		day - Duration::hours(1),
		day + Duration::hours(1),
	)
	.await
	.unwrap();

	assert_eq!(rows.len(), 2);

	let embedder = rows.iter().find(|row| row.provider == "embedder").unwrap();

	assert_eq!(embedder.requests, 2);
	assert_eq!(embedder.tokens, 150);
	assert!((embedder.cost - 0.003).abs() < 1e-9);
}

#[tokio::test]
async fn entity_delete_sweeps_memory_references() {
	let (_tdb, db) = test_db().await;
	let user = users::insert_user(&db, "sweep@test.dev", "Sweep").await.unwrap();
	let now = OffsetDateTime::now_utc();
	let entity = Entity {
		id: "e-1".to_string(),
		user_id: user.user_id.clone(),
		entity_type: "person".to_string(),
		name: "Ada".to_string(),
		person_type: None,
		first_name: None,
		last_name: None,
		company: None,
		title: None,
		email: None,
		phone: None,
		address: None,
		website: None,
		notes: None,
		tags: Vec::new(),
		importance: 0.5,
		metadata: Map::new(),
		created_at: now,
		updated_at: now,
	};

	entities::insert_entity(&db, &entity).await.unwrap();

	let mut referencing = memory("m-1", &user.user_id, "t", "c");

	referencing.entity_refs = vec!["e-1".to_string(), "e-2".to_string()];
	memories::insert_memory(&db, &referencing).await.unwrap();

	assert!(entities::delete_entity(&db, "e-1", &user.user_id, now).await.unwrap());

	let swept = memories::get_memory(&db, "m-1", &user.user_id).await.unwrap().unwrap();

	assert_eq!(swept.entity_refs, vec!["e-2".to_string()]);
}

#[test]
fn metadata_round_trips_through_json_columns() {
	let mut metadata = Map::new();

	metadata.insert("project".to_string(), json!("alpha"));
	metadata.insert("count".to_string(), json!(3));

	let encoded = mnemo_storage::models::encode_metadata(&metadata);
	let decoded = mnemo_storage::models::decode_metadata(&encoded).unwrap();

	assert_eq!(decoded, metadata);

	let raw = vector::encode_vector(&[0.25, -0.5]);

	assert_eq!(vector::decode_vector(&raw).unwrap(), vec![0.25, -0.5]);
}
