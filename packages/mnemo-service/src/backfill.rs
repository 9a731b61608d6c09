//! Embedding backfill: finds memories whose embedding is missing or empty
//! and computes them in batches.

use serde::Serialize;
use tracing::{info, warn};

use mnemo_storage::memories;

use crate::{FailureReport, MemoryService, Result, embedding_text};

pub const BACKFILL_BATCH_SIZE: u32 = 16;

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct BackfillReport {
	pub scanned: u64,
	pub embedded: u64,
	pub null_ids: u64,
	pub failed: u64,
}

impl MemoryService {
	/// One bounded backfill pass. Rows with a null id are reported to the
	/// failure channel and skipped; they can only come from out-of-band
	/// writes and must never reach the embedder.
	pub async fn backfill_missing_embeddings(
		&self,
		user_id: Option<&str>,
	) -> Result<BackfillReport> {
		let mut report = BackfillReport::default();
		let rows =
			memories::scan_missing_embeddings(&self.db, user_id, BACKFILL_BATCH_SIZE).await?;

		report.scanned = rows.len() as u64;

		for row in rows {
			let Some(id) = row.id.as_deref() else {
				report.null_ids += 1;

				let _ = self.failures().send(FailureReport {
					user_id: Some(row.user_id.clone()),
					subject: "memory with null id".to_string(),
					reason: "Backfill scan found a memory row with a null id.".to_string(),
				});

				continue;
			};

			let text = vec![embedding_text(&row.title, &row.content)];

			match self.embed_and_record(&row.user_id, &text).await {
				Ok(mut vectors) => {
					let Some(vector) = vectors.pop() else {
						report.failed += 1;

						continue;
					};

					memories::write_embedding(&self.db, id, &vector).await?;

					report.embedded += 1;
				},
				Err(err) => {
					warn!(memory_id = %id, error = %err, "Backfill embedding failed.");

					report.failed += 1;
				},
			}
		}

		if report.embedded > 0 || report.null_ids > 0 {
			info!(
				embedded = report.embedded,
				null_ids = report.null_ids,
				failed = report.failed,
				"Backfill pass complete."
			);
		}

		Ok(report)
	}

	/// Fire-and-forget trigger used by `update_missing_embeddings`; the pass
	/// runs on its own task and the caller does not wait.
	pub async fn update_missing_embeddings(&self, user_id: &str) -> Result<()> {
		self.require_user(user_id).await?;

		let service = self.clone();
		let user_id = user_id.to_string();

		tokio::spawn(async move {
			if let Err(err) = service.backfill_missing_embeddings(Some(&user_id)).await {
				warn!(error = %err, "Triggered backfill pass failed.");
			}
		});

		Ok(())
	}
}
