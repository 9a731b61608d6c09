//! Result ordering. The composite score blends similarity, importance,
//! temporal decay, and a semantic-link boost from shared tags.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use mnemo_storage::models::Memory;

const SIMILARITY_WEIGHT: f32 = 0.5;
const IMPORTANCE_WEIGHT: f32 = 0.2;
const DECAY_WEIGHT: f32 = 0.2;
const LINK_WEIGHT: f32 = 0.1;
/// Shared-tag neighbor count is normalized by this divisor, capped at 1.0.
const LINK_BOOST_DIVISOR: f32 = 10.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
	Recency,
	Importance,
	Similarity,
	#[default]
	Composite,
}

#[derive(Clone, Debug)]
pub struct Ranked {
	pub memory: Memory,
	pub similarity: f32,
	pub score: f32,
}

/// Temporal decay: memories never fully expire, floored at 0.1.
pub fn decay(age_days: f64) -> f64 {
	(1.0 / (1.0 + (1.0 + age_days.max(0.0)).ln())).max(0.1)
}

/// Normalized count of other memories in the tenant sharing at least one
/// tag with this one.
pub fn link_boost(memory: &Memory, neighbors: &[Memory]) -> f32 {
	if memory.tags.is_empty() {
		return 0.0;
	}

	let linked = neighbors
		.iter()
		.filter(|other| other.id != memory.id)
		.filter(|other| other.tags.iter().any(|tag| memory.tags.contains(tag)))
		.count();

	(linked as f32 / LINK_BOOST_DIVISOR).min(1.0)
}

pub fn composite_score(
	similarity: f32,
	memory: &Memory,
	neighbors: &[Memory],
	now: OffsetDateTime,
) -> f32 {
	let age_days = (now - memory.updated_at).as_seconds_f64() / 86_400.0;

	SIMILARITY_WEIGHT * similarity
		+ IMPORTANCE_WEIGHT * memory.importance
		+ DECAY_WEIGHT * decay(age_days) as f32
		+ LINK_WEIGHT * link_boost(memory, neighbors)
}

pub fn sort_ranked(ranked: &mut [Ranked], strategy: SearchStrategy) {
	ranked.sort_by(|a, b| compare(strategy, a, b));
}

fn compare(strategy: SearchStrategy, a: &Ranked, b: &Ranked) -> Ordering {
	let primary = match strategy {
		SearchStrategy::Similarity => b.similarity.total_cmp(&a.similarity),
		SearchStrategy::Recency => b.memory.updated_at.cmp(&a.memory.updated_at),
		SearchStrategy::Importance => b.memory.importance.total_cmp(&a.memory.importance),
		SearchStrategy::Composite => b.score.total_cmp(&a.score),
	};

	primary.then_with(|| tie_break(a, b))
}

/// Shared tie-break: higher importance, then newer update, then
/// lexicographic id.
fn tie_break(a: &Ranked, b: &Ranked) -> Ordering {
	b.memory
		.importance
		.total_cmp(&a.memory.importance)
		.then_with(|| b.memory.updated_at.cmp(&a.memory.updated_at))
		.then_with(|| a.memory.id.cmp(&b.memory.id))
}
