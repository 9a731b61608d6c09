//! Hybrid retrieval: vector similarity, keyword substring matching, and
//! metadata predicates over one tenant's memories.

pub mod query;
pub mod ranking;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use mnemo_providers::cosine_similarity;
use mnemo_storage::{memories::MemoryFilter, models::Memory, models::MemoryType};

use crate::{Error, MemoryService, Result, memories::MemoryView};
use query::{MetadataPredicate, ParsedQuery};
use ranking::{Ranked, SearchStrategy};

pub const DEFAULT_THRESHOLD: f32 = 0.3;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchRequest {
	pub query: String,
	pub limit: Option<u32>,
	pub threshold: Option<f32>,
	pub strategy: Option<SearchStrategy>,
	pub memory_types: Option<Vec<MemoryType>>,
	pub tags_any_of: Option<Vec<String>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SearchHit {
	#[serde(flatten)]
	pub memory: MemoryView,
	pub similarity: f32,
	pub score: f32,
}

#[derive(Clone, Debug, Serialize)]
pub struct SearchResponse {
	pub memories: Vec<SearchHit>,
	/// Which passes actually contributed, e.g. "vector+keyword".
	pub mode: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub embedding_error: Option<String>,
}

impl MemoryService {
	pub async fn search_memories(
		&self,
		user_id: &str,
		req: SearchRequest,
	) -> Result<SearchResponse> {
		self.require_user(user_id).await?;

		let threshold = req.threshold.unwrap_or(DEFAULT_THRESHOLD);

		if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
			return Err(Error::InvalidArgument {
				message: "threshold must be between 0.0 and 1.0.".to_string(),
			});
		}

		let limit = req.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT) as usize;
		let strategy = req.strategy.unwrap_or_default();
		let parsed = query::parse_query(&req.query);

		// An empty query never scans the tenant.
		if parsed.is_empty() {
			return Ok(SearchResponse {
				memories: Vec::new(),
				mode: "none".to_string(),
				embedding_error: None,
			});
		}

		// One snapshot of the tenant's live memories backs every pass; the
		// unfiltered set also feeds the link boost.
		let snapshot = mnemo_storage::memories::list_memories(
			&self.db,
			user_id,
			&MemoryFilter { archived: Some(false), ..MemoryFilter::default() },
		)
		.await?;
		let candidates: Vec<&Memory> = snapshot
			.iter()
			.filter(|memory| {
				req.memory_types
					.as_ref()
					.is_none_or(|types| types.contains(&memory.memory_type))
			})
			.filter(|memory| {
				req.tags_any_of
					.as_ref()
					.filter(|tags| !tags.is_empty())
					.is_none_or(|tags| memory.tags.iter().any(|tag| tags.contains(tag)))
			})
			.collect();

		let mut pool: HashMap<&str, f32> = HashMap::new();
		let mut embedding_error = None;
		let mut vector_used = false;

		// Vector pass: only when the query has text beyond predicates.
		if !parsed.keywords.is_empty() {
			let query_text = parsed.keywords.join(" ");

			match self.embed_and_record(user_id, &[query_text]).await {
				Ok(vectors) if !vectors.is_empty() => {
					let query_vector = &vectors[0];

					vector_used = true;

					for memory in &candidates {
						let Some(embedding) = memory.embedding.as_ref() else {
							continue;
						};
						let similarity = cosine_similarity(query_vector, embedding);

						if similarity >= threshold {
							merge_hit(&mut pool, &memory.id, similarity);
						}
					}
				},
				Ok(_) => {
					embedding_error = Some("Embedder returned no vectors.".to_string());
				},
				Err(err) => {
					debug!(error = %err, "Query embedding failed; falling back to keywords.");
					embedding_error = Some(err.to_string());
				},
			}
		}

		// Keyword pass always runs: OR across terms, base relevance at the
		// threshold so keyword and vector hits are comparable.
		let keyword_used = !parsed.keywords.is_empty();

		if keyword_used {
			for memory in &candidates {
				if keyword_match(memory, &parsed.keywords) {
					merge_hit(&mut pool, &memory.id, threshold);
				}
			}
		}

		// Metadata pass: predicates AND-filter the pool; a pure-metadata
		// query scans the candidates directly.
		let metadata_used = !parsed.predicates.is_empty();

		if metadata_used {
			if parsed.keywords.is_empty() {
				for memory in &candidates {
					if matches_all_predicates(memory, &parsed.predicates) {
						merge_hit(&mut pool, &memory.id, threshold);
					}
				}
			} else {
				let by_id: HashMap<&str, &Memory> =
					candidates.iter().map(|memory| (memory.id.as_str(), *memory)).collect();

				pool.retain(|id, _| {
					by_id
						.get(id)
						.is_some_and(|memory| matches_all_predicates(memory, &parsed.predicates))
				});
			}
		}

		let now = OffsetDateTime::now_utc();
		let mut ranked: Vec<Ranked> = Vec::with_capacity(pool.len());

		for memory in &candidates {
			let Some(similarity) = pool.get(memory.id.as_str()).copied() else {
				continue;
			};
			let score = match strategy {
				SearchStrategy::Composite =>
					ranking::composite_score(similarity, memory, &snapshot, now),
				_ => similarity,
			};

			ranked.push(Ranked { memory: (*memory).clone(), similarity, score });
		}

		ranking::sort_ranked(&mut ranked, strategy);
		ranked.truncate(limit);

		let mode = search_mode(vector_used, keyword_used, metadata_used);
		let memories = ranked
			.into_iter()
			.map(|hit| SearchHit {
				memory: MemoryView::from_memory(&hit.memory),
				similarity: hit.similarity,
				score: hit.score,
			})
			.collect();

		Ok(SearchResponse { memories, mode, embedding_error })
	}
}

fn merge_hit<'a>(pool: &mut HashMap<&'a str, f32>, id: &'a String, similarity: f32) {
	pool.entry(id.as_str())
		.and_modify(|existing| *existing = existing.max(similarity))
		.or_insert(similarity);
}

fn keyword_match(memory: &Memory, keywords: &[String]) -> bool {
	let haystack = format!("{}\n{}", memory.title, memory.content).to_lowercase();

	keywords.iter().any(|term| haystack.contains(&term.to_lowercase()))
}

fn matches_all_predicates(memory: &Memory, predicates: &[MetadataPredicate]) -> bool {
	predicates.iter().all(|predicate| {
		memory
			.metadata
			.get(&predicate.key)
			.map(stringify_metadata_value)
			.is_some_and(|value| value.eq_ignore_ascii_case(&predicate.value))
	})
}

fn stringify_metadata_value(value: &Value) -> String {
	match value {
		Value::String(raw) => raw.clone(),
		other => other.to_string(),
	}
}

fn search_mode(vector: bool, keyword: bool, metadata: bool) -> String {
	let mut parts = Vec::new();

	if vector {
		parts.push("vector");
	}
	if keyword {
		parts.push("keyword");
	}
	if metadata {
		parts.push("metadata");
	}
	if parts.is_empty() {
		return "none".to_string();
	}

	parts.join("+")
}
