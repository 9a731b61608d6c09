use serde::Serialize;

use mnemo_storage::{buffer, entities, memories};

use crate::{MemoryService, Result};

const HEALTHY_COVERAGE_PCT: f64 = 80.0;

#[derive(Clone, Debug, Serialize)]
pub struct StatisticsResponse {
	pub total_memories: i64,
	pub with_embeddings: i64,
	pub coverage_pct: f64,
	pub total_entities: i64,
	pub buffered_writes: i64,
	pub recommendation: String,
}

impl MemoryService {
	pub async fn get_statistics(&self, user_id: &str) -> Result<StatisticsResponse> {
		self.require_user(user_id).await?;

		let total_memories = memories::count_memories(&self.db, user_id).await?;
		let with_embeddings =
			memories::count_memories_with_embeddings(&self.db, user_id).await?;
		let total_entities = entities::count_entities(&self.db, user_id).await?;
		let buffered_writes = buffer::pending_count(&self.db, user_id).await?;
		let coverage_pct = if total_memories > 0 {
			with_embeddings as f64 / total_memories as f64 * 100.0
		} else {
			100.0
		};
		let recommendation = recommendation(total_memories, coverage_pct);

		Ok(StatisticsResponse {
			total_memories,
			with_embeddings,
			coverage_pct,
			total_entities,
			buffered_writes,
			recommendation,
		})
	}
}

fn recommendation(total_memories: i64, coverage_pct: f64) -> String {
	if total_memories == 0 {
		return "Store a first memory to enable retrieval.".to_string();
	}
	if coverage_pct < HEALTHY_COVERAGE_PCT {
		return format!(
			"Vector search covers {coverage_pct:.0}% of memories; run update_missing_embeddings."
		);
	}

	"Vector search is healthy.".to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn recommendation_tracks_coverage() {
		assert!(recommendation(0, 100.0).contains("first memory"));
		assert!(recommendation(10, 50.0).contains("update_missing_embeddings"));
		assert!(recommendation(10, 95.0).contains("healthy"));
	}
}
