// crates.io
use clap::Parser;
// self
use mnemo_worker::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;
	let args = Args::parse();
	mnemo_worker::run(args).await
}
