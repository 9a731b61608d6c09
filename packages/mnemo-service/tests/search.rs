mod common;

use std::sync::Arc;

use serde_json::{Map, json};

use mnemo_service::{
	memories::AddMemoryRequest,
	search::{SearchRequest, SearchResponse},
	search::ranking::SearchStrategy,
};
use mnemo_storage::models::MemoryType;

use common::{FailingEmbedder, StubEmbedder, TestService, build_service};

fn add_request(title: &str, content: &str, embed: bool) -> AddMemoryRequest {
	AddMemoryRequest {
		title: title.to_string(),
		content: content.to_string(),
		memory_type: None,
		importance: None,
		tags: Vec::new(),
		entity_refs: Vec::new(),
		metadata: Map::new(),
		generate_embedding: Some(embed),
		use_buffer: None,
	}
}

fn search(query: &str, threshold: f32) -> SearchRequest {
	SearchRequest {
		query: query.to_string(),
		limit: None,
		threshold: Some(threshold),
		strategy: None,
		memory_types: None,
		tags_any_of: None,
	}
}

fn titles(response: &SearchResponse) -> Vec<&str> {
	response.memories.iter().map(|hit| hit.memory.title.as_str()).collect()
}

#[tokio::test]
async fn multi_word_keyword_search_is_or_semantics() {
	let TestService { tdb: _tdb, service, user_id, .. } =
		build_service(Arc::new(FailingEmbedder)).await;

	for title in ["episodic A", "episodic B", "semantic C"] {
		service
			.add_memory(&user_id, add_request(title, &format!("{title} body"), false))
			.await
			.unwrap();
	}

	let both = service.search_memories(&user_id, search("episodic semantic", 0.0)).await.unwrap();

	assert_eq!(both.memories.len(), 3);

	let single = service.search_memories(&user_id, search("episodic", 0.0)).await.unwrap();
	let mut found = titles(&single);

	found.sort_unstable();

	assert_eq!(found, vec!["episodic A", "episodic B"]);
}

#[tokio::test]
async fn semantic_ranking_puts_the_on_topic_memory_first() {
	let (embedder, _) = StubEmbedder::shared();
	let TestService { tdb: _tdb, service, user_id, .. } = build_service(embedder).await;

	service
		.add_memory(
			&user_id,
			add_request(
				"Machine Learning: neural networks and AI",
				"Notes on machine learning and neural networks.",
				true,
			),
		)
		.await
		.unwrap();
	service
		.add_memory(
			&user_id,
			add_request("Coffee Brewing: espresso tips", "Espresso brewing notes.", true),
		)
		.await
		.unwrap();

	let mut req = search("artificial intelligence", 0.3);

	req.strategy = Some(SearchStrategy::Similarity);

	let response = service.search_memories(&user_id, req).await.unwrap();

	assert!(!response.memories.is_empty());
	assert!(response.memories[0].memory.title.starts_with("Machine Learning"));
	// The coffee memory is filtered out or ranked strictly below.
	if let Some(coffee) = response
		.memories
		.iter()
		.find(|hit| hit.memory.title.starts_with("Coffee"))
	{
		assert!(coffee.similarity < response.memories[0].similarity);
	}

	// Similarity results honor the threshold and are non-increasing.
	let mut last = f32::MAX;

	for hit in &response.memories {
		assert!(hit.similarity >= 0.3);
		assert!(hit.similarity <= last);
		last = hit.similarity;
	}
}

#[tokio::test]
async fn metadata_predicates_filter_exactly() {
	let TestService { tdb: _tdb, service, user_id, .. } =
		build_service(Arc::new(FailingEmbedder)).await;
	let mut alpha = add_request("alpha memo", "about the alpha project", false);
	let mut beta = add_request("beta memo", "about the beta project", false);

	alpha.metadata.insert("project".to_string(), json!("alpha"));
	beta.metadata.insert("project".to_string(), json!("beta"));

	service.add_memory(&user_id, alpha).await.unwrap();
	service.add_memory(&user_id, beta).await.unwrap();

	for query in ["project:alpha", "metadata.project:alpha"] {
		let response = service.search_memories(&user_id, search(query, 0.3)).await.unwrap();

		assert_eq!(titles(&response), vec!["alpha memo"], "query {query:?}");
		assert_eq!(response.mode, "metadata");
	}

	// Predicates AND-combine with keywords.
	let combined =
		service.search_memories(&user_id, search("project project:beta", 0.0)).await.unwrap();

	assert_eq!(titles(&combined), vec!["beta memo"]);
	assert!(combined.mode.contains("keyword"));
	assert!(combined.mode.contains("metadata"));

	// Case-insensitive value comparison.
	let upper = service.search_memories(&user_id, search("project:ALPHA", 0.3)).await.unwrap();

	assert_eq!(upper.memories.len(), 1);
}

#[tokio::test]
async fn empty_query_returns_nothing_without_scanning() {
	let TestService { tdb: _tdb, service, user_id, .. } =
		build_service(Arc::new(FailingEmbedder)).await;

	service.add_memory(&user_id, add_request("anything", "something", false)).await.unwrap();

	let response = service.search_memories(&user_id, search("   ", 0.0)).await.unwrap();

	assert!(response.memories.is_empty());
	assert_eq!(response.mode, "none");
}

#[tokio::test]
async fn embedder_failure_falls_back_to_keywords() {
	let TestService { tdb: _tdb, service, user_id, .. } =
		build_service(Arc::new(FailingEmbedder)).await;

	service
		.add_memory(&user_id, add_request("fallback target", "resilient content", false))
		.await
		.unwrap();

	let response = service.search_memories(&user_id, search("resilient", 0.3)).await.unwrap();

	assert_eq!(response.memories.len(), 1);
	assert!(response.embedding_error.is_some());
	assert!(response.mode.contains("keyword"));
}

#[tokio::test]
async fn strategies_order_by_recency_and_importance() {
	let TestService { tdb: _tdb, service, user_id, .. } =
		build_service(Arc::new(FailingEmbedder)).await;
	let mut low = add_request("note one", "shared term", false);

	low.importance = Some(0.1);

	let mut high = add_request("note two", "shared term", false);

	high.importance = Some(0.9);

	service.add_memory(&user_id, low).await.unwrap();

	// A later write is the more recent one.
	tokio::time::sleep(std::time::Duration::from_millis(5)).await;
	service.add_memory(&user_id, high).await.unwrap();

	let mut by_importance = search("shared", 0.0);

	by_importance.strategy = Some(SearchStrategy::Importance);

	let response = service.search_memories(&user_id, by_importance).await.unwrap();

	assert_eq!(titles(&response), vec!["note two", "note one"]);

	let mut by_recency = search("shared", 0.0);

	by_recency.strategy = Some(SearchStrategy::Recency);

	let response = service.search_memories(&user_id, by_recency).await.unwrap();

	assert_eq!(titles(&response)[0], "note two");
}

#[tokio::test]
async fn type_and_tag_filters_restrict_candidates() {
	let TestService { tdb: _tdb, service, user_id, .. } =
		build_service(Arc::new(FailingEmbedder)).await;
	let mut fact = add_request("tagged fact", "searchable body", false);

	fact.memory_type = Some(MemoryType::Fact);
	fact.tags = vec!["work".to_string()];

	let mut episode = add_request("tagged episode", "searchable body", false);

	episode.memory_type = Some(MemoryType::Episodic);
	episode.tags = vec!["home".to_string()];

	service.add_memory(&user_id, fact).await.unwrap();
	service.add_memory(&user_id, episode).await.unwrap();

	let mut req = search("searchable", 0.0);

	req.memory_types = Some(vec![MemoryType::Fact]);

	let response = service.search_memories(&user_id, req).await.unwrap();

	assert_eq!(titles(&response), vec!["tagged fact"]);

	let mut req = search("searchable", 0.0);

	req.tags_any_of = Some(vec!["home".to_string()]);

	let response = service.search_memories(&user_id, req).await.unwrap();

	assert_eq!(titles(&response), vec!["tagged episode"]);
}

#[tokio::test]
async fn archived_memories_are_not_searched() {
	let TestService { tdb: _tdb, service, user_id, .. } =
		build_service(Arc::new(FailingEmbedder)).await;
	let stored =
		service.add_memory(&user_id, add_request("shelved", "dusty content", false)).await.unwrap();

	service
		.update_memory(
			&user_id,
			&stored.id,
			mnemo_service::memories::UpdateMemoryRequest {
				is_archived: Some(true),
				..Default::default()
			},
		)
		.await
		.unwrap();

	let response = service.search_memories(&user_id, search("dusty", 0.0)).await.unwrap();

	assert!(response.memories.is_empty());
	// Still reachable by id.
	assert!(service.get_memory(&user_id, &stored.id).await.is_ok());
}
