// crates.io
use clap::Parser;
// self
use mnemo_server::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;
	let args = Args::parse();
	mnemo_server::run(args).await
}
