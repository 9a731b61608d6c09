//! Background worker: drains the write buffer, backfills missing
//! embeddings, and surfaces terminal failures on stderr.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info};

use mnemo_service::{
	MemoryService,
	breaker::Breakers,
	buffer::{FailureReceiver, FlushOutcome},
};

const IDLE_POLL_MS: u64 = 500;
const BREAKER_SLEEP_MS: u64 = 2_000;

pub struct WorkerState {
	pub service: MemoryService,
	pub breakers: Breakers,
	failures: FailureReceiver,
}

impl WorkerState {
	pub fn new(service: MemoryService, failures: FailureReceiver) -> Self {
		Self { service, breakers: Breakers::new(), failures }
	}
}

pub async fn run_worker(mut state: WorkerState) -> color_eyre::Result<()> {
	let recovered = state.service.recover_buffer().await?;

	if recovered > 0 {
		info!(recovered, "Returned abandoned claims to the queue.");
	}

	let monitor = state.service.cfg.embedder.monitor.clone();
	let mut next_backfill = Instant::now();

	info!("Worker running.");

	loop {
		drain_failures(&mut state.failures);

		let outcome = match state.service.flush_buffer_once(&state.breakers).await {
			Ok(outcome) => outcome,
			Err(err) => {
				error!(error = %err, "Buffer flush step failed.");
				tokio::time::sleep(Duration::from_millis(BREAKER_SLEEP_MS)).await;

				continue;
			},
		};

		if monitor.enabled && Instant::now() >= next_backfill {
			if let Err(err) = state.service.backfill_missing_embeddings(None).await {
				error!(error = %err, "Backfill pass failed.");
			}

			next_backfill = Instant::now() + Duration::from_millis(monitor.interval_ms);
		}

		match outcome {
			// More work may be due immediately.
			FlushOutcome::Applied | FlushOutcome::Retried | FlushOutcome::Failed => {},
			FlushOutcome::Idle => {
				tokio::time::sleep(Duration::from_millis(IDLE_POLL_MS)).await;
			},
			FlushOutcome::BreakerOpen => {
				tokio::time::sleep(Duration::from_millis(BREAKER_SLEEP_MS)).await;
			},
		}
	}
}

fn drain_failures(failures: &mut FailureReceiver) {
	while let Ok(report) = failures.try_recv() {
		error!(
			user_id = report.user_id.as_deref().unwrap_or("-"),
			subject = %report.subject,
			reason = %report.reason,
			"Background failure."
		);
	}
}
