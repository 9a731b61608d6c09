//! Bidirectional contact synchronization between the tenant's person
//! entities and an external provider.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};

use mnemo_storage::{db::Db, entities, models::Entity};

use crate::{
	PROVIDER_UID_KEY, Result,
	adapter::{AdapterError, Contact, ContactProvider},
	conflict::{self, ConflictPolicy},
	dedup::{self, DuplicateJudge},
	matching::{self, MatchKind},
};

const RATE_LIMIT_ATTEMPTS: u32 = 3;
const MAX_RETRY_AFTER_SECONDS: u64 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
	Import,
	Export,
	Both,
}

#[derive(Clone, Debug)]
pub struct SyncOptions {
	pub direction: SyncDirection,
	pub conflict_policy: ConflictPolicy,
	pub dry_run: bool,
	pub auto_merge: bool,
	pub pre_threshold: f32,
	pub confidence_threshold: u32,
	pub batch_size: u32,
	pub max_remote_in_memory: u32,
}

impl SyncOptions {
	pub fn from_config(cfg: &mnemo_config::Sync, direction: SyncDirection) -> Self {
		Self {
			direction,
			conflict_policy: ConflictPolicy::Newest,
			dry_run: false,
			auto_merge: cfg.auto_merge,
			pre_threshold: cfg.pre_threshold,
			confidence_threshold: cfg.confidence_threshold,
			// A batch is the unit held in memory; it never exceeds the cap.
			batch_size: cfg.batch_size.min(cfg.max_remote_in_memory),
			max_remote_in_memory: cfg.max_remote_in_memory,
		}
	}
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SyncSummary {
	pub exported: u64,
	pub imported: u64,
	pub updated: u64,
	pub merged: u64,
	pub duplicates_found: u64,
	pub skipped: u64,
	pub failed: u64,
	pub matched_by_uid: u64,
	pub llm_tokens: i64,
	pub errors: Vec<String>,
}

#[derive(Clone, Copy, Debug)]
pub struct SyncProgress {
	pub phase: &'static str,
	pub processed: u64,
	pub total: u64,
}

pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

pub struct SyncEngine<'a> {
	db: &'a Db,
	provider: &'a dyn ContactProvider,
	judge: &'a dyn DuplicateJudge,
	options: SyncOptions,
	progress: Option<ProgressCallback>,
}

impl<'a> SyncEngine<'a> {
	pub fn new(
		db: &'a Db,
		provider: &'a dyn ContactProvider,
		judge: &'a dyn DuplicateJudge,
		options: SyncOptions,
	) -> Self {
		Self { db, provider, judge, options, progress: None }
	}

	pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
		self.progress = Some(progress);

		self
	}

	pub async fn run(&self, user_id: &str) -> Result<SyncSummary> {
		let mut locals = entities::list_entities(self.db, user_id, Some("person")).await?;
		let mut consumed = vec![false; locals.len()];
		let mut summary = SyncSummary::default();
		let total = self.provider_count().await?;
		let mut processed = 0_u64;
		let mut offset = 0_u64;

		// The remote set is streamed batch by batch; only one batch is ever
		// resident, so the in-memory cap holds for arbitrarily large
		// providers.
		loop {
			let batch = self.provider_list(offset, self.options.batch_size).await?;

			if batch.is_empty() {
				break;
			}

			offset += batch.len() as u64;

			for contact in &batch {
				if let Err(err) = self
					.process_remote(user_id, contact, &mut locals, &mut consumed, &mut summary)
					.await
				{
					summary.failed += 1;
					summary.errors.push(format!("{}: {err}", contact.uid));
				}

				processed += 1;
			}

			self.report(SyncProgress { phase: "remote", processed, total });
		}

		if matches!(self.options.direction, SyncDirection::Export | SyncDirection::Both) {
			self.export_unmatched(&mut locals, &mut consumed, &mut summary).await?;
		}

		Ok(summary)
	}

	async fn process_remote(
		&self,
		user_id: &str,
		contact: &Contact,
		locals: &mut Vec<Entity>,
		consumed: &mut Vec<bool>,
		summary: &mut SyncSummary,
	) -> Result<()> {
		if let Some((idx, kind)) = matching::match_contact(locals, consumed, contact) {
			consumed[idx] = true;

			if kind == MatchKind::Uid {
				summary.matched_by_uid += 1;
			}

			return self.sync_pair(idx, locals, contact, summary).await;
		}

		if self.options.direction == SyncDirection::Export {
			summary.skipped += 1;

			return Ok(());
		}

		self.import_or_merge(user_id, contact, locals, consumed, summary).await
	}

	async fn sync_pair(
		&self,
		idx: usize,
		locals: &mut [Entity],
		contact: &Contact,
		summary: &mut SyncSummary,
	) -> Result<()> {
		let now = OffsetDateTime::now_utc();
		let entity = &mut locals[idx];
		let (resolution, next_contact) =
			conflict::resolve(entity, contact, self.options.conflict_policy, now);
		let write_local =
			resolution.local_changed && self.options.direction != SyncDirection::Export;
		let write_remote =
			resolution.remote_changed && self.options.direction != SyncDirection::Import;

		if !write_local && !write_remote {
			summary.skipped += 1;

			return Ok(());
		}
		if self.options.dry_run {
			summary.updated += 1;

			return Ok(());
		}

		if write_local {
			entities::update_entity(self.db, entity).await?;
		}
		if write_remote {
			self.provider_upsert(&next_contact).await?;
		}

		summary.updated += 1;

		Ok(())
	}

	async fn import_or_merge(
		&self,
		user_id: &str,
		contact: &Contact,
		locals: &mut Vec<Entity>,
		consumed: &mut Vec<bool>,
		summary: &mut SyncSummary,
	) -> Result<()> {
		// Candidate search covers already-consumed locals too: a second card
		// for the same person must surface as a duplicate, not a fresh
		// import.
		let mut best: Option<(usize, f32)> = None;

		for (idx, entity) in locals.iter().enumerate() {
			let score = dedup::similarity_score(&conflict::contact_from_entity(entity), contact);

			if best.is_none_or(|(_, best_score)| score > best_score) {
				best = Some((idx, score));
			}
		}

		if let Some((idx, score)) = best
			&& score >= self.options.pre_threshold
		{
			let candidate = conflict::contact_from_entity(&locals[idx]);
			let response = self.judge.judge(&candidate, contact).await?;

			summary.llm_tokens += response.tokens;

			if response.verdict.duplicate {
				summary.duplicates_found += 1;

				if dedup::should_merge(
					&response.verdict,
					self.options.confidence_threshold,
					self.options.auto_merge,
				) {
					let now = OffsetDateTime::now_utc();
					let entity = &mut locals[idx];
					let (resolution, _) =
						conflict::resolve(entity, contact, ConflictPolicy::Merge, now);

					if resolution.local_changed && !self.options.dry_run {
						entities::update_entity(self.db, entity).await?;
					}

					summary.merged += 1;
				} else {
					debug!(
						uid = %contact.uid,
						confidence = response.verdict.confidence,
						"Duplicate reported below merge threshold."
					);
					summary.skipped += 1;
				}

				return Ok(());
			}
		}

		let now = OffsetDateTime::now_utc();
		let entity = conflict::entity_from_contact(user_id, contact, now);

		if !self.options.dry_run {
			entities::insert_entity(self.db, &entity).await?;
		}

		locals.push(entity);
		consumed.push(true);

		summary.imported += 1;

		Ok(())
	}

	async fn export_unmatched(
		&self,
		locals: &mut Vec<Entity>,
		consumed: &mut Vec<bool>,
		summary: &mut SyncSummary,
	) -> Result<()> {
		self.merge_local_duplicates(locals, consumed, summary).await?;

		let total = consumed.iter().filter(|done| !**done).count() as u64;
		let mut processed = 0_u64;

		for (idx, entity) in locals.iter_mut().enumerate() {
			if consumed[idx] {
				continue;
			}

			let contact = conflict::contact_from_entity(entity);
			let result = async {
				if self.options.dry_run {
					return Ok::<_, crate::Error>(None);
				}

				let receipt = self.provider_upsert(&contact).await?;

				Ok(Some(receipt))
			}
			.await;

			match result {
				Ok(receipt) => {
					summary.exported += 1;

					if let Some(receipt) = receipt
						&& matching::entity_provider_uid(entity).as_deref()
							!= Some(receipt.uid.as_str())
					{
						entity.metadata.insert(
							PROVIDER_UID_KEY.to_string(),
							Value::String(receipt.uid.clone()),
						);
						entity.updated_at = OffsetDateTime::now_utc();
						entities::update_entity(self.db, entity).await?;
					}
				},
				Err(err) => {
					summary.failed += 1;
					summary.errors.push(format!("{}: {err}", entity.id));
				},
			}

			processed += 1;

			if processed % self.options.batch_size as u64 == 0 || processed == total {
				self.report(SyncProgress { phase: "export", processed, total });
			}
		}

		Ok(())
	}

	/// Pairwise duplicate pass over the locals that did not match any
	/// remote. Judge-confirmed pairs merge into the earlier entity and the
	/// later one is removed.
	async fn merge_local_duplicates(
		&self,
		locals: &mut Vec<Entity>,
		consumed: &mut Vec<bool>,
		summary: &mut SyncSummary,
	) -> Result<()> {
		let mut removed: Vec<usize> = Vec::new();

		for i in 0..locals.len() {
			if consumed[i] || removed.contains(&i) {
				continue;
			}

			for j in (i + 1)..locals.len() {
				if consumed[j] || removed.contains(&j) {
					continue;
				}

				let left = conflict::contact_from_entity(&locals[i]);
				let right = conflict::contact_from_entity(&locals[j]);

				if dedup::similarity_score(&left, &right) < self.options.pre_threshold {
					continue;
				}

				let response = match self.judge.judge(&left, &right).await {
					Ok(response) => response,
					Err(err) => {
						summary.failed += 1;
						summary.errors.push(format!("{}: {err}", locals[j].id));

						continue;
					},
				};

				summary.llm_tokens += response.tokens;

				if !response.verdict.duplicate {
					continue;
				}

				summary.duplicates_found += 1;

				if !dedup::should_merge(
					&response.verdict,
					self.options.confidence_threshold,
					self.options.auto_merge,
				) {
					continue;
				}

				let duplicate = locals[j].clone();
				let now = OffsetDateTime::now_utc();
				let (resolution, _) = conflict::resolve(
					&mut locals[i],
					&conflict::contact_from_entity(&duplicate),
					ConflictPolicy::Merge,
					now,
				);

				if !self.options.dry_run {
					if resolution.local_changed {
						entities::update_entity(self.db, &locals[i]).await?;
					}

					entities::delete_entity(self.db, &duplicate.id, &duplicate.user_id, now)
						.await?;
				}

				removed.push(j);

				summary.merged += 1;
			}
		}

		removed.sort_unstable();

		for idx in removed.into_iter().rev() {
			locals.remove(idx);
			consumed.remove(idx);
		}

		Ok(())
	}

	fn report(&self, progress: SyncProgress) {
		if let Some(callback) = self.progress.as_ref() {
			callback(progress);
		}
	}

	async fn provider_count(&self) -> Result<u64> {
		let mut attempt = 0;

		loop {
			match self.provider.count().await {
				Err(AdapterError::RateLimit { retry_after_seconds })
					if attempt < RATE_LIMIT_ATTEMPTS =>
				{
					attempt += 1;
					self.rate_limit_wait(retry_after_seconds).await;
				},
				other => return Ok(other?),
			}
		}
	}

	async fn provider_list(&self, offset: u64, limit: u32) -> Result<Vec<Contact>> {
		let mut attempt = 0;

		loop {
			match self.provider.list(offset, limit).await {
				Err(AdapterError::RateLimit { retry_after_seconds })
					if attempt < RATE_LIMIT_ATTEMPTS =>
				{
					attempt += 1;
					self.rate_limit_wait(retry_after_seconds).await;
				},
				other => return Ok(other?),
			}
		}
	}

	async fn provider_upsert(&self, contact: &Contact) -> Result<crate::adapter::UpsertReceipt> {
		let mut attempt = 0;

		loop {
			match self.provider.upsert(contact).await {
				Err(AdapterError::RateLimit { retry_after_seconds })
					if attempt < RATE_LIMIT_ATTEMPTS =>
				{
					attempt += 1;
					self.rate_limit_wait(retry_after_seconds).await;
				},
				other => return Ok(other?),
			}
		}
	}

	async fn rate_limit_wait(&self, retry_after_seconds: u64) {
		let wait = retry_after_seconds.min(MAX_RETRY_AFTER_SECONDS);

		warn!(retry_after_seconds = wait, "Provider rate limit hit; backing off.");
		tokio::time::sleep(Duration::from_secs(wait)).await;
	}
}
