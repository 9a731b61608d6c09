mod common;

use std::sync::Arc;

use serde_json::Map;

use mnemo_service::{
	Error,
	entities::{CreateEntityRequest, UpdateEntityRequest},
	memories::{AddMemoryRequest, UpdateMemoryRequest},
	search::SearchRequest,
};
use mnemo_storage::models::EntityType;

use common::{DIM, FailingEmbedder, StubEmbedder, TestService, build_service, build_service_with};

fn add_request(title: &str, content: &str) -> AddMemoryRequest {
	AddMemoryRequest {
		title: title.to_string(),
		content: content.to_string(),
		memory_type: None,
		importance: None,
		tags: vec!["acceptance".to_string()],
		entity_refs: Vec::new(),
		metadata: Map::new(),
		generate_embedding: Some(true),
		use_buffer: None,
	}
}

fn person(name: &str, email: Option<&str>) -> CreateEntityRequest {
	CreateEntityRequest {
		entity_type: EntityType::Person,
		name: name.to_string(),
		person_type: None,
		first_name: None,
		last_name: None,
		company: None,
		title: None,
		email: email.map(str::to_string),
		phone: None,
		address: None,
		website: None,
		notes: None,
		tags: Vec::new(),
		importance: None,
		metadata: Map::new(),
	}
}

#[tokio::test]
async fn memory_crud_round_trip() {
	let (embedder, _) = StubEmbedder::shared();
	let TestService { tdb: _tdb, service, user_id, .. } = build_service(embedder).await;
	let stored = service.add_memory(&user_id, add_request("title", "the content")).await.unwrap();

	assert!(!stored.id.is_empty());
	assert!(stored.embedded);
	assert!(!stored.buffered);

	let fetched = service.get_memory(&user_id, &stored.id).await.unwrap();

	assert_eq!(fetched.title, "title");
	assert!(fetched.has_embedding);

	let updated = service
		.update_memory(
			&user_id,
			&stored.id,
			UpdateMemoryRequest { importance: Some(0.8), ..Default::default() },
		)
		.await
		.unwrap();

	assert_eq!(updated.importance, 0.8);
	assert!(updated.updated_at >= fetched.updated_at);

	service.delete_memory(&user_id, &stored.id).await.unwrap();

	assert!(matches!(
		service.get_memory(&user_id, &stored.id).await,
		Err(Error::NotFound { .. })
	));
}

#[tokio::test]
async fn importance_validation_names_the_range() {
	let TestService { tdb: _tdb, service, user_id, .. } =
		build_service(Arc::new(FailingEmbedder)).await;

	for invalid in [-0.5_f32, 1.5, 2.0] {
		let mut req = add_request("x", "y");

		req.importance = Some(invalid);

		let err = service.add_memory(&user_id, req).await.expect_err("accepted bad importance");

		assert!(matches!(err, Error::InvalidArgument { .. }));
		assert!(err.to_string().contains("between 0.0 and 1.0"), "message: {err}");
	}

	// Boundary values pass.
	for valid in [0.0_f32, 1.0] {
		let mut req = add_request("x", "y");

		req.importance = Some(valid);
		req.generate_embedding = Some(false);

		service.add_memory(&user_id, req).await.unwrap();
	}
}

#[tokio::test]
async fn tenants_are_fully_isolated() {
	let TestService { tdb: _tdb, service, user_id: alice, .. } =
		build_service(Arc::new(FailingEmbedder)).await;
	let bob = service.ensure_user("bob@mnemo.test", "Bob").await.unwrap().user_id;
	let secret = {
		let mut req = add_request("A-secret", "alice keeps this");

		req.generate_embedding = Some(false);

		service.add_memory(&alice, req).await.unwrap()
	};

	let search = service
		.search_memories(
			&bob,
			SearchRequest {
				query: "secret".to_string(),
				limit: None,
				threshold: Some(0.0),
				strategy: None,
				memory_types: None,
				tags_any_of: None,
			},
		)
		.await
		.unwrap();

	assert!(search.memories.is_empty());
	assert!(matches!(
		service.get_memory(&bob, &secret.id).await,
		Err(Error::NotFound { .. })
	));
	assert!(matches!(
		service
			.update_memory(
				&bob,
				&secret.id,
				UpdateMemoryRequest { title: Some("stolen".to_string()), ..Default::default() },
			)
			.await,
		Err(Error::NotFound { .. })
	));

	// Alice's record is untouched.
	let original = service.get_memory(&alice, &secret.id).await.unwrap();

	assert_eq!(original.title, "A-secret");
}

#[tokio::test]
async fn unknown_and_inactive_users_are_rejected() {
	let TestService { tdb: _tdb, service, .. } = build_service(Arc::new(FailingEmbedder)).await;

	let err = service
		.get_memory("nobody", "some-id")
		.await
		.expect_err("unknown user accepted");

	assert!(matches!(err, Error::NotFound { .. }));

	let err = service
		.add_memory("", add_request("t", "c"))
		.await
		.expect_err("blank user accepted");

	assert!(matches!(err, Error::InvalidArgument { .. }));
}

#[tokio::test]
async fn quotas_cap_memories_and_entities() {
	let TestService { tdb: _tdb, service, user_id, .. } =
		build_service_with(Arc::new(FailingEmbedder), |cfg| {
			cfg.quota.memories_per_user = 2;
			cfg.quota.entities_per_user = 1;
		})
		.await;

	for idx in 0..2 {
		let mut req = add_request(&format!("m{idx}"), "body");

		req.generate_embedding = Some(false);
		service.add_memory(&user_id, req).await.unwrap();
	}

	let err = service
		.add_memory(&user_id, add_request("over", "body"))
		.await
		.expect_err("quota ignored");

	assert!(matches!(err, Error::QuotaExceeded { .. }));

	service.create_entity(&user_id, person("Ada", None)).await.unwrap();

	let err = service
		.create_entity(&user_id, person("Bob", None))
		.await
		.expect_err("entity quota ignored");

	assert!(matches!(err, Error::QuotaExceeded { .. }));
}

#[tokio::test]
async fn entity_crud_and_search() {
	let TestService { tdb: _tdb, service, user_id, .. } =
		build_service(Arc::new(FailingEmbedder)).await;
	let ada = service
		.create_entity(&user_id, person("Ada Lovelace", Some("ada@engines.test")))
		.await
		.unwrap();

	service.create_entity(&user_id, person("Charles Babbage", None)).await.unwrap();

	let updated = service
		.update_entity(
			&user_id,
			&ada.id,
			UpdateEntityRequest {
				company: Some("Analytical Engines".to_string()),
				..Default::default()
			},
		)
		.await
		.unwrap();

	assert_eq!(updated.company.as_deref(), Some("Analytical Engines"));

	let by_email = service
		.search_entities(&user_id, "ada@engines.test", None, 10)
		.await
		.unwrap();

	assert_eq!(by_email.len(), 1);
	assert_eq!(by_email[0].id, ada.id);

	let by_company = service
		.search_entities(&user_id, "analytical", Some(EntityType::Person), 10)
		.await
		.unwrap();

	assert_eq!(by_company.len(), 1);

	service.delete_entity(&user_id, &ada.id).await.unwrap();
	assert!(matches!(
		service.get_entity(&user_id, &ada.id).await,
		Err(Error::NotFound { .. })
	));
}

#[tokio::test]
async fn statistics_report_coverage_and_recommendation() {
	let (embedder, _) = StubEmbedder::shared();
	let TestService { tdb: _tdb, service, user_id, .. } = build_service(embedder).await;
	let empty = service.get_statistics(&user_id).await.unwrap();

	assert_eq!(empty.total_memories, 0);
	assert!(empty.recommendation.contains("first memory"));

	service.add_memory(&user_id, add_request("a", "embedded one")).await.unwrap();

	let mut plain = add_request("b", "plain one");

	plain.generate_embedding = Some(false);
	service.add_memory(&user_id, plain).await.unwrap();

	let stats = service.get_statistics(&user_id).await.unwrap();

	assert_eq!(stats.total_memories, 2);
	assert_eq!(stats.with_embeddings, 1);
	assert!((stats.coverage_pct - 50.0).abs() < 1e-9);
	assert!(stats.recommendation.contains("update_missing_embeddings"));
}

#[tokio::test]
async fn daily_costs_aggregate_embedder_usage() {
	let (embedder, _) = StubEmbedder::shared();
	let TestService { tdb: _tdb, service, user_id, .. } = build_service(embedder).await;

	service.add_memory(&user_id, add_request("spend", "some text to embed")).await.unwrap();

	let costs = service.get_daily_costs(&user_id, None).await.unwrap();
	let embedder_usage = costs.providers.get("embedder").expect("no embedder usage row");

	assert!(embedder_usage.requests >= 1);
	assert!(embedder_usage.tokens >= 1);
	assert!(costs.total > 0.0);

	// Malformed dates are rejected.
	assert!(matches!(
		service.get_daily_costs(&user_id, Some("not-a-date")).await,
		Err(Error::InvalidArgument { .. })
	));
}

#[tokio::test]
async fn authentication_caches_sessions_and_rate_limits() {
	let TestService { tdb: _tdb, service, .. } = build_service_with(Arc::new(FailingEmbedder), |cfg| {
		cfg.rate_limit.requests_per_minute = 2;
	})
	.await;

	let first = service.authenticate("good-token").await.unwrap();

	assert_eq!(first.email, "idp@mnemo.test");

	// Cache hit: same token resolves without a second verify (the limiter
	// still counts it).
	let second = service.authenticate("good-token").await.unwrap();

	assert_eq!(second.user_id, first.user_id);
	assert_eq!(service.sessions().len(), 1);

	let err = service.authenticate("good-token").await.expect_err("limiter ignored");

	assert!(matches!(err, Error::RateLimited { .. }));

	let err = service.authenticate("bad-token").await.expect_err("bad token accepted");

	assert!(matches!(err, Error::Unauthenticated { .. }));
}

#[tokio::test]
async fn interactions_are_recorded_and_filtered_by_entity() {
	let TestService { tdb: _tdb, service, user_id, .. } =
		build_service(Arc::new(FailingEmbedder)).await;
	let ada = service
		.create_entity(&user_id, person("Ada Lovelace", Some("ada@engines.test")))
		.await
		.unwrap();

	service
		.record_interaction(
			&user_id,
			mnemo_service::interactions::RecordInteractionRequest {
				entity_refs: vec![ada.id.clone()],
				content: "Discussed the difference engine.".to_string(),
				direction: None,
				occurred_at: None,
			},
		)
		.await
		.unwrap();
	service
		.record_interaction(
			&user_id,
			mnemo_service::interactions::RecordInteractionRequest {
				entity_refs: Vec::new(),
				content: "Unrelated note.".to_string(),
				direction: None,
				occurred_at: None,
			},
		)
		.await
		.unwrap();

	let all = service.list_interactions(&user_id, None, None).await.unwrap();

	assert_eq!(all.len(), 2);

	let for_ada = service.list_interactions(&user_id, Some(&ada.id), None).await.unwrap();

	assert_eq!(for_ada.len(), 1);
	assert!(for_ada[0].content.contains("difference engine"));
}

#[tokio::test]
async fn embeddings_have_the_configured_dimension() {
	let (embedder, _) = StubEmbedder::shared();
	let TestService { tdb: _tdb, service, user_id, .. } = build_service(embedder).await;

	service.add_memory(&user_id, add_request("dim check", "dimension body")).await.unwrap();

	let memories = mnemo_storage::memories::list_memories(
		&service.db,
		&user_id,
		&mnemo_storage::memories::MemoryFilter {
			has_embedding: Some(true),
			..Default::default()
		},
	)
	.await
	.unwrap();

	assert_eq!(memories.len(), 1);
	assert_eq!(memories[0].embedding.as_ref().unwrap().len(), DIM);
}
