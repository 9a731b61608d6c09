//! Contact synchronization as a service operation. The engine does the
//! work; this layer wires providers, applies config defaults, and books
//! LLM spend.

use serde::Deserialize;

use mnemo_sync::{
	adapter::ContactProvider,
	conflict::ConflictPolicy,
	engine::{ProgressCallback, SyncDirection, SyncEngine, SyncOptions, SyncSummary},
};

use crate::{MemoryService, Result};

#[derive(Clone, Debug, Deserialize)]
pub struct SyncContactsRequest {
	pub direction: SyncDirection,
	pub conflict_policy: Option<ConflictPolicy>,
	pub dry_run: Option<bool>,
	pub auto_merge: Option<bool>,
	pub threshold: Option<u32>,
}

impl MemoryService {
	pub async fn sync_contacts(
		&self,
		user_id: &str,
		provider: &dyn ContactProvider,
		req: SyncContactsRequest,
		progress: Option<ProgressCallback>,
	) -> Result<SyncSummary> {
		self.require_user(user_id).await?;

		let mut options = SyncOptions::from_config(&self.cfg.sync, req.direction);

		if let Some(policy) = req.conflict_policy {
			options.conflict_policy = policy;
		}
		if let Some(dry_run) = req.dry_run {
			options.dry_run = dry_run;
		}
		if let Some(auto_merge) = req.auto_merge {
			options.auto_merge = auto_merge;
		}
		if let Some(threshold) = req.threshold {
			options.confidence_threshold = threshold.min(100);
		}

		let mut engine =
			SyncEngine::new(&self.db, provider, self.providers().judge.as_ref(), options);

		if let Some(progress) = progress {
			engine = engine.with_progress(progress);
		}

		let summary = engine.run(user_id).await?;

		if summary.llm_tokens > 0 {
			self.record_usage(
				user_id,
				"llm",
				"judge_duplicate",
				summary.llm_tokens,
				&self.cfg.llm.model,
			)
			.await?;
		}

		Ok(summary)
	}
}
