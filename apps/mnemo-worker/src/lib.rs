pub mod worker;

// std
use std::path::PathBuf;

// crates.io
use clap::Parser;
use tracing_subscriber::EnvFilter;

// self
use mnemo_service::{MemoryService, Providers, buffer};
use mnemo_storage::db::Db;

#[derive(Debug, Parser)]
#[command(
	version = mnemo_cli::VERSION,
	rename_all = "kebab",
	styles = mnemo_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = mnemo_config::load(&args.config)?;
	let filter =
		EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

	let db = Db::connect(&config.database).await?;

	db.ensure_schema().await?;

	let providers = Providers::http(&config);
	let (failures, failure_rx) = buffer::failure_channel();
	let service = MemoryService::new(config, db, providers, failures);
	let state = worker::WorkerState::new(service, failure_rx);

	worker::run_worker(state).await
}
