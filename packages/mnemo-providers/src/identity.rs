//! Identity-provider verification. The provider exposes a single verify
//! endpoint; session caching happens in the service layer.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;
use time::OffsetDateTime;

use crate::{Error, Result};

const VERIFY_TIMEOUT_MS: u64 = 10_000;

#[derive(Clone, Debug)]
pub struct VerifiedIdentity {
	pub user_id: String,
	pub email: String,
	pub expires_at: Option<OffsetDateTime>,
}

pub async fn verify(cfg: &mnemo_config::Auth, token: &str) -> Result<VerifiedIdentity> {
	let provider_url = cfg.provider_url.as_deref().ok_or_else(|| Error::InvalidConfig {
		message: "auth.provider_url is not configured.".to_string(),
	})?;
	let provider_key = cfg.provider_key.as_deref().ok_or_else(|| Error::InvalidConfig {
		message: "auth.provider_key is not configured.".to_string(),
	})?;
	let client = Client::builder().timeout(Duration::from_millis(VERIFY_TIMEOUT_MS)).build()?;
	let res = client
		.post(provider_url)
		.headers(crate::auth_headers(provider_key)?)
		.json(&serde_json::json!({ "token": token }))
		.send()
		.await?;
	let status = res.status();

	if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
		return Err(Error::Unauthenticated);
	}
	if !status.is_success() {
		return Err(Error::Unavailable {
			message: format!("Identity provider returned {status}."),
			retryable: status.is_server_error(),
		});
	}

	let json: Value = res.json().await?;

	parse_verify_response(json)
}

fn parse_verify_response(json: Value) -> Result<VerifiedIdentity> {
	let user_id = json.get("user_id").and_then(|v| v.as_str()).ok_or_else(|| {
		Error::InvalidResponse { message: "Verify response is missing user_id.".to_string() }
	})?;
	let email = json.get("email").and_then(|v| v.as_str()).ok_or_else(|| {
		Error::InvalidResponse { message: "Verify response is missing email.".to_string() }
	})?;
	let expires_at = json
		.get("expires_in")
		.and_then(|v| v.as_i64())
		.filter(|seconds| *seconds > 0)
		.map(|seconds| OffsetDateTime::now_utc() + time::Duration::seconds(seconds));

	Ok(VerifiedIdentity {
		user_id: user_id.to_string(),
		email: email.to_lowercase(),
		expires_at,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_identity_with_expiry() {
		let json = serde_json::json!({
			"user_id": "u-1",
			"email": "User@Example.Test",
			"expires_in": 3600
		});
		let identity = parse_verify_response(json).expect("parse failed");

		assert_eq!(identity.user_id, "u-1");
		assert_eq!(identity.email, "user@example.test");
		assert!(identity.expires_at.is_some());
	}

	#[test]
	fn rejects_missing_user_id() {
		let json = serde_json::json!({ "email": "user@example.test" });

		assert!(parse_verify_response(json).is_err());
	}
}
