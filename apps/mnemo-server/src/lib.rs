pub mod http;
pub mod rpc;
pub mod state;
pub mod stdio;
pub mod tools;

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, ValueEnum};
use color_eyre::eyre;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

use mnemo_service::{MemoryService, Providers, buffer};
use mnemo_storage::db::Db;

use crate::state::ServerState;

const SESSION_SWEEP_SECONDS: u64 = 300;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Transport {
	/// Line-delimited JSON-RPC on stdin/stdout for local integrations.
	Stdio,
	/// JSON-RPC over POST /mcp with bearer authentication.
	Http,
}

#[derive(Debug, Parser)]
#[command(
	version = mnemo_cli::VERSION,
	rename_all = "kebab",
	styles = mnemo_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[arg(long, value_enum, default_value = "http")]
	pub transport: Transport,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = mnemo_config::load(&args.config)?;

	init_tracing(&config)?;

	if args.transport == Transport::Http && config.auth.disabled {
		return Err(eyre::eyre!(
			"auth.disabled is only permitted on the stdio transport."
		));
	}

	let db = Db::connect(&config.database).await?;

	db.ensure_schema().await?;

	let providers = Providers::http(&config);
	let (failures, mut failure_rx) = buffer::failure_channel();
	let service = MemoryService::new(config, db, providers, failures);

	// Background failures must surface somewhere visible even when no
	// worker process is attached.
	tokio::spawn(async move {
		while let Some(report) = failure_rx.recv().await {
			tracing::error!(
				user_id = report.user_id.as_deref().unwrap_or("-"),
				subject = %report.subject,
				reason = %report.reason,
				"Background failure."
			);
		}
	});

	let default_user = match args.transport {
		Transport::Stdio => {
			let email = service
				.cfg
				.auth
				.default_user_email
				.clone()
				.ok_or_else(|| eyre::eyre!("auth.default_user_email is required for stdio."))?;
			let user = service.ensure_user(&email, &email).await?;

			Some(user)
		},
		Transport::Http => None,
	};
	let state = Arc::new(ServerState::new(service, args.transport, default_user));

	spawn_session_sweeper(state.clone());

	match args.transport {
		Transport::Stdio => stdio::serve(state).await,
		Transport::Http => http::serve(state).await,
	}
}

fn init_tracing(config: &mnemo_config::Config) -> color_eyre::Result<()> {
	let filter =
		EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	// The stdio transport owns stdout for protocol frames; diagnostics go to
	// stderr on every transport.
	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

	Ok(())
}

fn spawn_session_sweeper(state: Arc<ServerState>) {
	tokio::spawn(async move {
		let mut interval = tokio::time::interval(Duration::from_secs(SESSION_SWEEP_SECONDS));

		loop {
			interval.tick().await;

			let evicted = state.service.sessions().evict_expired(OffsetDateTime::now_utc());

			if evicted > 0 {
				tracing::debug!(evicted, "Evicted expired sessions.");
			}
		}
	});
}
