//! Session cache and rate limiting for the HTTP transport. Tokens are never
//! stored; only their blake3 hashes key the cache.

use std::{
	collections::HashMap,
	sync::{Mutex, RwLock},
};

use time::{Duration, OffsetDateTime};
use tracing::warn;

use crate::{Error, MemoryService, Result};

#[derive(Clone, Debug)]
pub struct Session {
	pub user_id: String,
	pub email: String,
	pub issued_at: OffsetDateTime,
	pub expires_at: OffsetDateTime,
}

pub struct SessionCache {
	sessions: RwLock<HashMap<String, Session>>,
	ttl: Duration,
}

impl SessionCache {
	pub fn new(ttl_minutes: i64) -> Self {
		Self { sessions: RwLock::new(HashMap::new()), ttl: Duration::minutes(ttl_minutes) }
	}

	pub fn get(&self, token_hash: &str, now: OffsetDateTime) -> Option<Session> {
		let sessions = self.sessions.read().unwrap_or_else(|err| err.into_inner());
		let session = sessions.get(token_hash)?;

		(session.expires_at > now).then(|| session.clone())
	}

	/// Caches a verified identity. The TTL is the provider expiry capped by
	/// the configured session lifetime.
	pub fn insert(
		&self,
		token_hash: String,
		user_id: String,
		email: String,
		provider_expiry: Option<OffsetDateTime>,
		now: OffsetDateTime,
	) -> Session {
		let local_cap = now + self.ttl;
		let expires_at = match provider_expiry {
			Some(provider) => provider.min(local_cap),
			None => local_cap,
		};
		let session = Session { user_id, email, issued_at: now, expires_at };
		let mut sessions = self.sessions.write().unwrap_or_else(|err| err.into_inner());

		sessions.insert(token_hash, session.clone());

		session
	}

	pub fn evict_expired(&self, now: OffsetDateTime) -> usize {
		let mut sessions = self.sessions.write().unwrap_or_else(|err| err.into_inner());
		let before = sessions.len();

		sessions.retain(|_, session| session.expires_at > now);

		before - sessions.len()
	}

	pub fn len(&self) -> usize {
		self.sessions.read().unwrap_or_else(|err| err.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

pub fn hash_token(token: &str) -> String {
	blake3::hash(token.as_bytes()).to_hex().to_string()
}

struct Bucket {
	tokens: f64,
	last_refill: OffsetDateTime,
}

/// Token bucket per email. Capacity and refill rate both come from
/// `rate_limit.requests_per_minute`.
pub struct RateLimiter {
	buckets: Mutex<HashMap<String, Bucket>>,
	per_minute: u32,
}

impl RateLimiter {
	pub fn new(per_minute: u32) -> Self {
		Self { buckets: Mutex::new(HashMap::new()), per_minute }
	}

	pub fn check(&self, key: &str, now: OffsetDateTime) -> Result<()> {
		let mut buckets = self.buckets.lock().unwrap_or_else(|err| err.into_inner());
		let capacity = self.per_minute as f64;
		let bucket = buckets
			.entry(key.to_string())
			.or_insert_with(|| Bucket { tokens: capacity, last_refill: now });
		let elapsed_seconds = (now - bucket.last_refill).as_seconds_f64().max(0.0);

		bucket.tokens = (bucket.tokens + elapsed_seconds * capacity / 60.0).min(capacity);
		bucket.last_refill = now;

		if bucket.tokens >= 1.0 {
			bucket.tokens -= 1.0;

			return Ok(());
		}

		let deficit = 1.0 - bucket.tokens;
		let retry_after_seconds = (deficit * 60.0 / capacity).ceil().max(1.0) as u64;

		Err(Error::RateLimited { retry_after_seconds })
	}
}

impl MemoryService {
	/// Bearer-token authentication: hashed-token cache lookup first, the
	/// identity provider on a miss. The verified identity is mapped onto a
	/// local tenant by email, created on first sight.
	pub async fn authenticate(&self, bearer_token: &str) -> Result<Session> {
		let token = bearer_token.trim();

		if token.is_empty() {
			return Err(Error::Unauthenticated {
				message: "A bearer token is required.".to_string(),
			});
		}

		let now = OffsetDateTime::now_utc();
		let token_hash = hash_token(token);

		if let Some(session) = self.sessions().get(&token_hash, now) {
			self.limiter.check(&session.email, now)?;

			return Ok(session);
		}

		let identity = match self.providers().identity.verify(token).await {
			Ok(identity) => identity,
			Err(mnemo_providers::Error::Unauthenticated) => {
				warn!("Identity provider rejected a token.");

				return Err(Error::Unauthenticated {
					message: "Token verification failed.".to_string(),
				});
			},
			Err(err) => return Err(err.into()),
		};
		let user = self.ensure_user(&identity.email, &identity.email).await?;

		self.limiter.check(&user.email, now)?;

		Ok(self.sessions().insert(
			token_hash,
			user.user_id,
			user.email,
			identity.expires_at,
			now,
		))
	}
}
