use std::collections::BTreeMap;

use serde::Serialize;
use time::{Date, Duration, OffsetDateTime, Time, macros::format_description};

use mnemo_storage::usage;

use crate::{Error, MemoryService, Result};

#[derive(Clone, Debug, Serialize)]
pub struct ProviderCost {
	pub requests: i64,
	pub tokens: i64,
	pub cost: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct DailyCostsResponse {
	pub date: String,
	pub providers: BTreeMap<String, ProviderCost>,
	pub total: f64,
}

impl MemoryService {
	/// Aggregates usage records for one UTC day. `date` is `YYYY-MM-DD`;
	/// absent means today.
	pub async fn get_daily_costs(
		&self,
		user_id: &str,
		date: Option<&str>,
	) -> Result<DailyCostsResponse> {
		self.require_user(user_id).await?;

		let day = match date {
			Some(raw) => parse_date(raw)?,
			None => OffsetDateTime::now_utc().date(),
		};
		let from = day.with_time(Time::MIDNIGHT).assume_utc();
		let to = from + Duration::days(1);
		let rows = usage::usage_by_provider(&self.db, user_id, from, to).await?;
		let mut providers = BTreeMap::new();
		let mut total = 0.0;

		for row in rows {
			total += row.cost;
			providers.insert(
				row.provider,
				ProviderCost { requests: row.requests, tokens: row.tokens, cost: row.cost },
			);
		}

		Ok(DailyCostsResponse { date: day.to_string(), providers, total })
	}
}

fn parse_date(raw: &str) -> Result<Date> {
	let format = format_description!("[year]-[month]-[day]");

	Date::parse(raw.trim(), &format).map_err(|_| Error::InvalidArgument {
		message: format!("date must be YYYY-MM-DD; got {raw:?}."),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_iso_dates_and_rejects_garbage() {
		assert!(parse_date("2026-08-01").is_ok());
		assert!(parse_date("01/08/2026").is_err());
		assert!(parse_date("yesterday").is_err());
	}
}
