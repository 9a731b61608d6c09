use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::{Error, Result};

/// Upper bound on texts per provider call; larger inputs are the caller's
/// responsibility to chunk.
pub const MAX_BATCH_SIZE: usize = 64;

const MAX_ATTEMPTS: usize = 3;

#[derive(Clone, Debug)]
pub struct EmbeddingBatch {
	pub vectors: Vec<Vec<f32>>,
	pub tokens: i64,
}

pub async fn embed(cfg: &mnemo_config::Embedder, texts: &[String]) -> Result<EmbeddingBatch> {
	if texts.is_empty() {
		return Ok(EmbeddingBatch { vectors: Vec::new(), tokens: 0 });
	}
	if texts.len() > MAX_BATCH_SIZE {
		return Err(Error::InvalidConfig {
			message: format!("Embedding batch exceeds {MAX_BATCH_SIZE} texts."),
		});
	}

	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}/embeddings", cfg.api_base.trim_end_matches('/'));
	let body = serde_json::json!({
		"model": cfg.model,
		"input": texts,
		"dimensions": cfg.dimension,
	});
	let mut last_err = None;

	for attempt in 1..=MAX_ATTEMPTS {
		let result = request_once(&client, &url, cfg, &body, texts.len()).await;

		match result {
			Ok(batch) => return Ok(batch),
			Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
				let backoff = Duration::from_millis(200 * (1 << (attempt - 1)));

				tokio::time::sleep(backoff).await;
				last_err = Some(err);
			},
			Err(err) => return Err(err),
		}
	}

	Err(last_err.unwrap_or(Error::Unavailable {
		message: "Embedding provider failed without a cause.".to_string(),
		retryable: true,
	}))
}

async fn request_once(
	client: &Client,
	url: &str,
	cfg: &mnemo_config::Embedder,
	body: &Value,
	expected: usize,
) -> Result<EmbeddingBatch> {
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key)?)
		.json(body)
		.send()
		.await?;
	let status = res.status();

	if status == StatusCode::TOO_MANY_REQUESTS {
		let retry_after_seconds = res
			.headers()
			.get(reqwest::header::RETRY_AFTER)
			.and_then(|value| value.to_str().ok())
			.and_then(|value| value.parse().ok());

		return Err(Error::QuotaExceeded { retry_after_seconds });
	}
	if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
		return Err(Error::Unauthenticated);
	}
	if !status.is_success() {
		return Err(Error::Unavailable {
			message: format!("Embedding endpoint returned {status}."),
			retryable: status.is_server_error(),
		});
	}

	let json: Value = res.json().await?;

	parse_embedding_response(json, expected, cfg.dimension as usize)
}

fn parse_embedding_response(json: Value, expected: usize, dimension: usize) -> Result<EmbeddingBatch> {
	let data = json.get("data").and_then(|v| v.as_array()).ok_or_else(|| {
		Error::InvalidResponse { message: "Embedding response is missing data array.".to_string() }
	})?;
	let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());

	for (fallback_index, item) in data.iter().enumerate() {
		let index = item
			.get("index")
			.and_then(|v| v.as_u64())
			.map(|v| v as usize)
			.unwrap_or(fallback_index);
		let embedding = item.get("embedding").and_then(|v| v.as_array()).ok_or_else(|| {
			Error::InvalidResponse { message: "Embedding item missing embedding array.".to_string() }
		})?;
		let mut vec = Vec::with_capacity(embedding.len());

		for value in embedding {
			let number = value.as_f64().ok_or_else(|| Error::InvalidResponse {
				message: "Embedding value must be numeric.".to_string(),
			})?;

			vec.push(number as f32);
		}

		if vec.len() != dimension {
			return Err(Error::InvalidResponse {
				message: format!(
					"Embedding dimension {} does not match the configured dimension {dimension}.",
					vec.len()
				),
			});
		}

		indexed.push((index, vec));
	}

	if indexed.len() != expected {
		return Err(Error::InvalidResponse {
			message: format!(
				"Embedding response returned {} vectors for {expected} inputs.",
				indexed.len()
			),
		});
	}

	indexed.sort_by_key(|(index, _)| *index);

	let tokens = json
		.get("usage")
		.and_then(|usage| usage.get("total_tokens"))
		.and_then(|v| v.as_i64())
		.unwrap_or(0);

	Ok(EmbeddingBatch { vectors: indexed.into_iter().map(|(_, vec)| vec).collect(), tokens })
}
