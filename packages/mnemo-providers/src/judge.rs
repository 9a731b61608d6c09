//! LLM duplicate judge for contact dedup. The model is asked one question
//! and must answer in strict JSON.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};

#[derive(Clone, Debug, Deserialize)]
pub struct JudgeVerdict {
	pub duplicate: bool,
	pub confidence: u32,
	#[serde(default)]
	pub reason: String,
}

#[derive(Clone, Debug)]
pub struct JudgeResponse {
	pub verdict: JudgeVerdict,
	pub tokens: i64,
}

pub async fn judge_duplicate(
	cfg: &mnemo_config::Llm,
	left: &str,
	right: &str,
) -> Result<JudgeResponse> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}/chat/completions", cfg.api_base.trim_end_matches('/'));
	let body = serde_json::json!({
		"model": cfg.model,
		"temperature": 0.0,
		"messages": [
			{
				"role": "system",
				"content": "You compare two contact records and decide: are these the same person? \
					Respond with JSON only: {\"duplicate\": bool, \"confidence\": 0-100, \"reason\": string}.",
			},
			{
				"role": "user",
				"content": format!("Contact A:\n{left}\n\nContact B:\n{right}"),
			}
		],
	});
	let res = client
		.post(&url)
		.headers(crate::auth_headers(&cfg.api_key)?)
		.json(&body)
		.send()
		.await?;
	let status = res.status();

	if !status.is_success() {
		return Err(Error::Unavailable {
			message: format!("Judge endpoint returned {status}."),
			retryable: status.is_server_error() || status.as_u16() == 429,
		});
	}

	let json: Value = res.json().await?;

	parse_judge_response(json)
}

fn parse_judge_response(json: Value) -> Result<JudgeResponse> {
	let content = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Judge response is missing message content.".to_string(),
		})?;
	let trimmed = content.trim().trim_start_matches("```json").trim_matches('`').trim();
	let verdict: JudgeVerdict = serde_json::from_str(trimmed).map_err(|_| {
		Error::InvalidResponse { message: "Judge content is not valid JSON.".to_string() }
	})?;

	if verdict.confidence > 100 {
		return Err(Error::InvalidResponse {
			message: "Judge confidence must be in the range 0-100.".to_string(),
		});
	}

	let tokens = json
		.get("usage")
		.and_then(|usage| usage.get("total_tokens"))
		.and_then(|v| v.as_i64())
		.unwrap_or(0);

	Ok(JudgeResponse { verdict, tokens })
}
