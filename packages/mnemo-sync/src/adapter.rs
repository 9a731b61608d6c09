//! The capability set every contact provider must expose. Adapters stay
//! dumb: paging, matching, and conflict handling live in the engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::BoxFuture;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Contact {
	pub uid: String,
	pub full_name: String,
	pub first: Option<String>,
	pub last: Option<String>,
	pub org: Option<String>,
	pub title: Option<String>,
	pub emails: Vec<String>,
	pub phones: Vec<String>,
	pub addresses: Vec<String>,
	pub notes: Option<String>,
	pub categories: Vec<String>,
	/// Provider-side modification time when the provider reports one
	/// (vCard REV). Unknown means the record is treated as older.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub updated_at: Option<OffsetDateTime>,
	/// Custom fields; carries the `X-MCP-UUID` round-trip field.
	pub extra: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
	#[error("Provider rate limit hit; retry after {retry_after_seconds}s.")]
	RateLimit { retry_after_seconds: u64 },
	#[error("Contact {uid} not found.")]
	NotFound { uid: String },
	#[error("Provider requires authentication.")]
	AuthRequired,
	#[error("Transient provider failure: {message}")]
	TransientFailure { message: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
	Created,
	Updated,
}

#[derive(Clone, Debug)]
pub struct UpsertReceipt {
	pub uid: String,
	pub outcome: UpsertOutcome,
}

pub trait ContactProvider
where
	Self: Send + Sync,
{
	fn count<'a>(&'a self) -> BoxFuture<'a, Result<u64, AdapterError>>;

	fn list<'a>(
		&'a self,
		offset: u64,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<Contact>, AdapterError>>;

	fn get<'a>(&'a self, uid: &'a str) -> BoxFuture<'a, Result<Contact, AdapterError>>;

	fn upsert<'a>(
		&'a self,
		contact: &'a Contact,
	) -> BoxFuture<'a, Result<UpsertReceipt, AdapterError>>;

	fn delete<'a>(&'a self, uid: &'a str) -> BoxFuture<'a, Result<(), AdapterError>>;
}

/// Escapes a raw value for provider command emission. Order matters:
/// backslash first so later escapes are not themselves re-escaped.
pub fn escape_value(raw: &str) -> String {
	raw.replace('\\', "\\\\")
		.replace('"', "\\\"")
		.replace('\'', "\\'")
		.replace('\n', "\\n")
		.replace('\r', "\\r")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn escapes_backslash_before_everything_else() {
		assert_eq!(escape_value(r#"a\b"#), r#"a\\b"#);
		assert_eq!(escape_value(r#"say "hi""#), r#"say \"hi\""#);
		assert_eq!(escape_value("it's"), r#"it\'s"#);
		assert_eq!(escape_value("line1\nline2\r"), r#"line1\nline2\r"#);
	}

	#[test]
	fn escaping_is_not_applied_twice() {
		// A backslash followed by a quote must come out as escaped backslash
		// plus escaped quote, not a doubly escaped sequence.
		assert_eq!(escape_value(r#"\""#), r#"\\\""#);
	}
}
