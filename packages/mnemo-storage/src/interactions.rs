use crate::{
	Result,
	db::Db,
	models::{self, Interaction, InteractionRow},
};

pub async fn insert_interaction(db: &Db, interaction: &Interaction) -> Result<()> {
	sqlx::query(
		"INSERT INTO interactions (id, user_id, entity_refs, content, direction, occurred_at) \
		 VALUES (?, ?, ?, ?, ?, ?)",
	)
	.bind(&interaction.id)
	.bind(&interaction.user_id)
	.bind(models::encode_string_list(&interaction.entity_refs))
	.bind(&interaction.content)
	.bind(interaction.direction.as_str())
	.bind(interaction.occurred_at)
	.execute(&db.pool)
	.await?;

	Ok(())
}

pub async fn list_interactions(
	db: &Db,
	user_id: &str,
	entity_id: Option<&str>,
	limit: u32,
) -> Result<Vec<Interaction>> {
	let rows = sqlx::query_as::<_, InteractionRow>(
		"SELECT id, user_id, entity_refs, content, direction, occurred_at \
		 FROM interactions WHERE user_id = ? ORDER BY occurred_at DESC",
	)
	.bind(user_id)
	.fetch_all(&db.pool)
	.await?;
	let mut interactions = Vec::with_capacity(rows.len());

	for row in rows {
		interactions.push(row.into_interaction()?);
	}

	if let Some(entity_id) = entity_id {
		interactions
			.retain(|interaction| interaction.entity_refs.iter().any(|id| id == entity_id));
	}

	interactions.truncate(limit as usize);

	Ok(interactions)
}
