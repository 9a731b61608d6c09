use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use mnemo_storage::{
	interactions,
	models::{Direction, Interaction},
};

use crate::{Error, MemoryService, Result};

const DEFAULT_LIST_LIMIT: u32 = 50;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordInteractionRequest {
	#[serde(default)]
	pub entity_refs: Vec<String>,
	pub content: String,
	pub direction: Option<Direction>,
	#[serde(default, with = "crate::time_serde::option")]
	pub occurred_at: Option<OffsetDateTime>,
}

#[derive(Clone, Debug, Serialize)]
pub struct InteractionView {
	pub id: String,
	pub entity_refs: Vec<String>,
	pub content: String,
	pub direction: Direction,
	#[serde(with = "crate::time_serde")]
	pub occurred_at: OffsetDateTime,
}

impl MemoryService {
	pub async fn record_interaction(
		&self,
		user_id: &str,
		req: RecordInteractionRequest,
	) -> Result<InteractionView> {
		self.require_user(user_id).await?;

		if req.content.trim().is_empty() {
			return Err(Error::InvalidArgument { message: "content is required.".to_string() });
		}

		let interaction = Interaction {
			id: Uuid::new_v4().to_string(),
			user_id: user_id.to_string(),
			entity_refs: req.entity_refs,
			content: req.content,
			direction: req.direction.unwrap_or(Direction::None),
			occurred_at: req.occurred_at.unwrap_or_else(OffsetDateTime::now_utc),
		};

		interactions::insert_interaction(&self.db, &interaction).await?;

		Ok(view(&interaction))
	}

	pub async fn list_interactions(
		&self,
		user_id: &str,
		entity_id: Option<&str>,
		limit: Option<u32>,
	) -> Result<Vec<InteractionView>> {
		self.require_user(user_id).await?;

		let records = interactions::list_interactions(
			&self.db,
			user_id,
			entity_id,
			limit.unwrap_or(DEFAULT_LIST_LIMIT),
		)
		.await?;

		Ok(records.iter().map(view).collect())
	}
}

fn view(interaction: &Interaction) -> InteractionView {
	InteractionView {
		id: interaction.id.clone(),
		entity_refs: interaction.entity_refs.clone(),
		content: interaction.content.clone(),
		direction: interaction.direction,
		occurred_at: interaction.occurred_at,
	}
}
