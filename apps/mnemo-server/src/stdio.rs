//! Line-delimited transport: one JSON-RPC request per stdin line, one
//! response per stdout line. Trusted local OS user; no authentication.
//! Nothing but protocol frames may be written to stdout.

use std::sync::Arc;

use color_eyre::eyre;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::{rpc, state::ServerState};

pub async fn serve(state: Arc<ServerState>) -> color_eyre::Result<()> {
	let user_id = state
		.default_user
		.as_ref()
		.map(|user| user.user_id.clone())
		.ok_or_else(|| eyre::eyre!("The stdio transport requires a default user."))?;
	let stdin = BufReader::new(tokio::io::stdin());
	let mut stdout = tokio::io::stdout();
	let mut lines = stdin.lines();

	tracing::info!("Line transport ready.");

	while let Some(line) = lines.next_line().await? {
		let trimmed = line.trim();

		if trimmed.is_empty() {
			continue;
		}

		// The background transport carries no deadline; long operations
		// (contact syncs, large backfills) are only reachable here.
		let Some(response) = rpc::handle_raw(&state, &user_id, trimmed, None).await else {
			continue;
		};
		let serialized = serde_json::to_string(&response)?;

		stdout.write_all(serialized.as_bytes()).await?;
		stdout.write_all(b"\n").await?;
		stdout.flush().await?;
	}

	tracing::info!("Line transport closed.");

	Ok(())
}
