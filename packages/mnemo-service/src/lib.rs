pub mod auth;
pub mod backfill;
pub mod breaker;
pub mod buffer;
pub mod costs;
pub mod entities;
pub mod interactions;
pub mod memories;
pub mod search;
pub mod stats;
pub mod sync;
pub mod time_serde;

mod error;

pub use error::{Error, Result};

use std::{future::Future, pin::Pin, sync::Arc};

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use mnemo_providers::{embedding::EmbeddingBatch, identity::VerifiedIdentity, pricing};
use mnemo_storage::{db::Db, models::UsageRecord, usage, users};
use mnemo_sync::dedup::{DuplicateJudge, HttpDuplicateJudge};

pub use buffer::{FailureReport, FailureSender};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait Embedder
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		texts: &'a [String],
	) -> BoxFuture<'a, mnemo_providers::Result<EmbeddingBatch>>;
}

pub trait IdentityVerifier
where
	Self: Send + Sync,
{
	fn verify<'a>(
		&'a self,
		token: &'a str,
	) -> BoxFuture<'a, mnemo_providers::Result<VerifiedIdentity>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedder: Arc<dyn Embedder>,
	pub identity: Arc<dyn IdentityVerifier>,
	pub judge: Arc<dyn DuplicateJudge>,
}

impl Providers {
	/// Production wiring backed by the configured HTTP endpoints.
	pub fn http(cfg: &mnemo_config::Config) -> Self {
		Self {
			embedder: Arc::new(HttpEmbedder { cfg: cfg.embedder.clone() }),
			identity: Arc::new(HttpIdentityVerifier { cfg: cfg.auth.clone() }),
			judge: Arc::new(HttpDuplicateJudge::new(cfg.llm.clone())),
		}
	}
}

struct HttpEmbedder {
	cfg: mnemo_config::Embedder,
}
impl Embedder for HttpEmbedder {
	fn embed<'a>(
		&'a self,
		texts: &'a [String],
	) -> BoxFuture<'a, mnemo_providers::Result<EmbeddingBatch>> {
		Box::pin(mnemo_providers::embedding::embed(&self.cfg, texts))
	}
}

struct HttpIdentityVerifier {
	cfg: mnemo_config::Auth,
}
impl IdentityVerifier for HttpIdentityVerifier {
	fn verify<'a>(
		&'a self,
		token: &'a str,
	) -> BoxFuture<'a, mnemo_providers::Result<VerifiedIdentity>> {
		Box::pin(mnemo_providers::identity::verify(&self.cfg, token))
	}
}

/// Common response envelope for every user-facing operation.
#[derive(Clone, Debug, Serialize)]
pub struct Envelope<T> {
	pub status: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	pub message: String,
}

impl<T> Envelope<T> {
	pub fn success(data: T, message: impl Into<String>) -> Self {
		Self {
			status: "success".to_string(),
			data: Some(data),
			error: None,
			message: message.into(),
		}
	}

	pub fn failure(error: &Error) -> Self {
		Self {
			status: "error".to_string(),
			data: None,
			error: Some(error.reason().to_string()),
			message: error.to_string(),
		}
	}
}

#[derive(Clone)]
pub struct MemoryService {
	pub cfg: Arc<mnemo_config::Config>,
	pub db: Arc<Db>,
	providers: Providers,
	failures: FailureSender,
	sessions: Arc<auth::SessionCache>,
	limiter: Arc<auth::RateLimiter>,
}

impl MemoryService {
	pub fn new(
		cfg: mnemo_config::Config,
		db: Db,
		providers: Providers,
		failures: FailureSender,
	) -> Self {
		let sessions = Arc::new(auth::SessionCache::new(cfg.session.ttl_minutes));
		let limiter = Arc::new(auth::RateLimiter::new(cfg.rate_limit.requests_per_minute));

		Self { cfg: Arc::new(cfg), db: Arc::new(db), providers, failures, sessions, limiter }
	}

	pub fn providers(&self) -> &Providers {
		&self.providers
	}

	pub fn sessions(&self) -> &auth::SessionCache {
		&self.sessions
	}

	pub(crate) fn failures(&self) -> &FailureSender {
		&self.failures
	}

	pub async fn ensure_user(
		&self,
		email: &str,
		display_name: &str,
	) -> Result<mnemo_storage::models::User> {
		let user = users::ensure_user(&self.db, email, display_name).await?;

		Ok(user)
	}

	pub async fn delete_user(&self, user_id: &str) -> Result<bool> {
		let deleted = users::delete_user(&self.db, user_id).await?;

		Ok(deleted)
	}

	pub(crate) async fn require_user(&self, user_id: &str) -> Result<()> {
		let trimmed = user_id.trim();

		if trimmed.is_empty() {
			return Err(Error::InvalidArgument { message: "user_id is required.".to_string() });
		}

		users::require_active_user(&self.db, trimmed).await?;

		Ok(())
	}

	/// Embeds texts and books the spend against the tenant. Invariant: the
	/// gateway has already checked the vector count and dimension.
	pub(crate) async fn embed_and_record(
		&self,
		user_id: &str,
		texts: &[String],
	) -> Result<Vec<Vec<f32>>> {
		let batch = self.providers.embedder.embed(texts).await?;

		self.record_usage(user_id, "embedder", "embed", batch.tokens, &self.cfg.embedder.model)
			.await?;

		Ok(batch.vectors)
	}

	pub(crate) async fn record_usage(
		&self,
		user_id: &str,
		provider: &str,
		operation: &str,
		tokens: i64,
		model: &str,
	) -> Result<()> {
		let record = UsageRecord {
			id: Uuid::new_v4().to_string(),
			user_id: user_id.to_string(),
			provider: provider.to_string(),
			operation: operation.to_string(),
			tokens,
			cost: pricing::cost_for_tokens(model, tokens),
			timestamp: OffsetDateTime::now_utc(),
		};

		usage::record_usage(&self.db, &record).await?;

		Ok(())
	}
}

pub(crate) fn validate_importance(importance: f32) -> Result<()> {
	if !importance.is_finite() || !(0.0..=1.0).contains(&importance) {
		return Err(Error::InvalidArgument {
			message: format!("importance must be between 0.0 and 1.0; got {importance}."),
		});
	}

	Ok(())
}

/// Text handed to the embedder for a memory: the title provides context, the
/// content carries the substance.
pub(crate) fn embedding_text(title: &str, content: &str) -> String {
	if title.trim().is_empty() {
		return content.to_string();
	}

	format!("{title}\n{content}")
}
