//! Durable write buffering and the flush step the worker drives. Failures
//! are never silently dropped: terminal ones land on the failure channel.

use time::{Duration, OffsetDateTime};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use mnemo_storage::{
	buffer,
	models::{BufferedPayload, BufferedWrite},
};

use crate::{Error, MemoryService, Result, breaker::Breakers};

#[derive(Clone, Debug)]
pub struct FailureReport {
	pub user_id: Option<String>,
	pub subject: String,
	pub reason: String,
}

pub type FailureSender = mpsc::UnboundedSender<FailureReport>;
pub type FailureReceiver = mpsc::UnboundedReceiver<FailureReport>;

pub fn failure_channel() -> (FailureSender, FailureReceiver) {
	mpsc::unbounded_channel()
}

/// What one flush step did; the worker uses this to pace itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
	Idle,
	Applied,
	Retried,
	Failed,
	BreakerOpen,
}

impl MemoryService {
	/// Processes at most one due buffered write.
	pub async fn flush_buffer_once(&self, breakers: &Breakers) -> Result<FlushOutcome> {
		let now = OffsetDateTime::now_utc();

		// While the store circuit is open the queue is left untouched;
		// buffered writes stay durable and the user never sees a rejection.
		if !breakers.store.allow(now) {
			return Ok(FlushOutcome::BreakerOpen);
		}

		let write = match buffer::fetch_next_due(&self.db, now).await {
			Ok(write) => {
				breakers.store.record_success();

				write
			},
			Err(err) => {
				breakers.store.record_failure(now);

				return Err(err.into());
			},
		};
		let Some(write) = write else {
			return Ok(FlushOutcome::Idle);
		};

		match self.apply_buffered_write(&write, breakers).await {
			Ok(()) => {
				buffer::mark_done(&self.db, &write.id).await?;
				debug!(write_id = %write.id, memory_id = %write.memory_id, "Buffered write applied.");

				Ok(FlushOutcome::Applied)
			},
			Err(err) if err.is_retryable() => self.reschedule(&write, &err).await,
			Err(err) => {
				self.fail_write(&write, &err).await?;

				Ok(FlushOutcome::Failed)
			},
		}
	}

	async fn apply_buffered_write(
		&self,
		write: &BufferedWrite,
		breakers: &Breakers,
	) -> Result<()> {
		let payload: BufferedPayload = serde_json::from_str(&write.payload).map_err(|err| {
			Error::InvalidArgument { message: format!("Malformed buffer payload: {err}.") }
		})?;
		let now = OffsetDateTime::now_utc();

		match payload {
			BufferedPayload::CreateMemory { draft } => {
				self.store_draft(&write.user_id, draft).await?;

				Ok(())
			},
			BufferedPayload::UpdateMemory { id, patch } => {
				let changes_text = patch.changes_text();
				let memory = mnemo_storage::memories::update_memory(
					&self.db,
					&id,
					&write.user_id,
					&patch,
					now,
				)
				.await?;

				if changes_text {
					// Per-key ordering holds the write in the queue until the
					// embedder circuit admits it.
					if !breakers.embedder.allow(now) {
						return Err(Error::DependencyUnavailable {
							message: "Embedder circuit is open.".to_string(),
						});
					}

					let embedded = self
						.embed_memory_text(&write.user_id, &memory.title, &memory.content)
						.await;

					match embedded {
						Ok(vector) => {
							breakers.embedder.record_success();
							mnemo_storage::memories::write_embedding(&self.db, &id, &vector)
								.await?;
						},
						Err(err) => {
							if err.is_retryable() {
								breakers.embedder.record_failure(now);
							}

							return Err(err);
						},
					}
				}

				Ok(())
			},
		}
	}

	async fn reschedule(&self, write: &BufferedWrite, err: &Error) -> Result<FlushOutcome> {
		let attempts = write.attempts + 1;
		let max_attempts = self.cfg.buffer.max_attempts as i64;

		if attempts >= max_attempts {
			self.fail_write(write, err).await?;

			return Ok(FlushOutcome::Failed);
		}

		let backoff = backoff_for_attempt(
			attempts,
			self.cfg.buffer.backoff_base_ms,
			self.cfg.buffer.backoff_cap_ms,
		);
		let next_attempt_at = OffsetDateTime::now_utc() + backoff;

		buffer::mark_retry(&self.db, &write.id, attempts, next_attempt_at, &err.to_string())
			.await?;
		debug!(
			write_id = %write.id,
			attempts,
			backoff_ms = backoff.whole_milliseconds(),
			"Buffered write rescheduled."
		);

		Ok(FlushOutcome::Retried)
	}

	async fn fail_write(&self, write: &BufferedWrite, err: &Error) -> Result<()> {
		buffer::mark_failed(&self.db, &write.id, write.attempts + 1, &err.to_string()).await?;
		warn!(write_id = %write.id, error = %err, "Buffered write failed terminally.");

		let _ = self.failures().send(FailureReport {
			user_id: Some(write.user_id.clone()),
			subject: format!("buffered write {} for memory {}", write.id, write.memory_id),
			reason: err.to_string(),
		});

		Ok(())
	}

	/// Returns abandoned in-flight claims to pending. Run once at worker
	/// startup.
	pub async fn recover_buffer(&self) -> Result<u64> {
		let recovered = buffer::reset_in_flight(&self.db, OffsetDateTime::now_utc()).await?;

		if recovered > 0 {
			warn!(recovered, "Recovered in-flight buffered writes.");
		}

		Ok(recovered)
	}
}

pub fn backoff_for_attempt(attempt: i64, base_ms: u64, cap_ms: u64) -> Duration {
	let exp = attempt.max(1).saturating_sub(1).min(16) as u32;
	let backoff = base_ms.saturating_mul(1_u64 << exp).min(cap_ms);

	Duration::milliseconds(backoff as i64)
}
