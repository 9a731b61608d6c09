use sqlx::FromRow;
use time::OffsetDateTime;

use crate::{Result, db::Db, models::UsageRecord};

#[derive(Clone, Debug, FromRow)]
pub struct ProviderUsage {
	pub provider: String,
	pub requests: i64,
	pub tokens: i64,
	pub cost: f64,
}

pub async fn record_usage(db: &Db, record: &UsageRecord) -> Result<()> {
	sqlx::query(
		"INSERT INTO api_usage_tracking (id, user_id, provider, operation, tokens, cost, timestamp) \
		 VALUES (?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(&record.id)
	.bind(&record.user_id)
	.bind(&record.provider)
	.bind(&record.operation)
	.bind(record.tokens)
	.bind(record.cost)
	.bind(record.timestamp)
	.execute(&db.pool)
	.await?;

	Ok(())
}

pub async fn usage_by_provider(
	db: &Db,
	user_id: &str,
	from: OffsetDateTime,
	to: OffsetDateTime,
) -> Result<Vec<ProviderUsage>> {
	let rows = sqlx::query_as::<_, ProviderUsage>(
		"SELECT provider, COUNT(*) AS requests, SUM(tokens) AS tokens, SUM(cost) AS cost \
		 FROM api_usage_tracking \
		 WHERE user_id = ? AND timestamp >= ? AND timestamp < ? \
		 GROUP BY provider ORDER BY provider ASC",
	)
	.bind(user_id)
	.bind(from)
	.bind(to)
	.fetch_all(&db.pool)
	.await?;

	Ok(rows)
}
