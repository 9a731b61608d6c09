#![allow(dead_code)]

use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};

use mnemo_providers::{
	embedding::EmbeddingBatch,
	identity::VerifiedIdentity,
	judge::{JudgeResponse, JudgeVerdict},
};
use mnemo_service::{
	BoxFuture, Embedder, IdentityVerifier, MemoryService, Providers,
	buffer::{self, FailureReceiver},
};
use mnemo_storage::db::Db;
use mnemo_sync::{adapter::Contact, dedup::DuplicateJudge};
use mnemo_testkit::TestDatabase;

pub const DIM: usize = 8;

const AI_WORDS: [&str; 6] =
	["artificial", "intelligence", "ai", "neural", "machine", "learning"];
const COFFEE_WORDS: [&str; 4] = ["coffee", "espresso", "brewing", "latte"];

/// Deterministic topical embedding: known vocabulary maps to fixed axes so
/// semantic-ranking assertions are stable; everything else lands lightly on
/// hashed axes.
pub fn topic_vector(text: &str) -> Vec<f32> {
	let mut vector = vec![0.0_f32; DIM];

	for token in text.to_lowercase().split(|ch: char| !ch.is_alphanumeric()) {
		if token.is_empty() {
			continue;
		}
		if AI_WORDS.contains(&token) {
			vector[0] += 1.0;

			continue;
		}
		if COFFEE_WORDS.contains(&token) {
			vector[1] += 1.0;

			continue;
		}

		let mut hash = 0_usize;

		for byte in token.bytes() {
			hash = hash.wrapping_mul(31).wrapping_add(byte as usize);
		}

		vector[2 + hash % (DIM - 2)] += 0.2;
	}

	vector
}

pub struct StubEmbedder {
	pub calls: Arc<AtomicUsize>,
}

impl StubEmbedder {
	pub fn shared() -> (Arc<Self>, Arc<AtomicUsize>) {
		let calls = Arc::new(AtomicUsize::new(0));

		(Arc::new(Self { calls: calls.clone() }), calls)
	}
}

impl Embedder for StubEmbedder {
	fn embed<'a>(
		&'a self,
		texts: &'a [String],
	) -> BoxFuture<'a, mnemo_providers::Result<EmbeddingBatch>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let vectors = texts.iter().map(|text| topic_vector(text)).collect();
		let tokens = texts.iter().map(|text| (text.len() / 4) as i64).sum::<i64>().max(1);

		Box::pin(async move { Ok(EmbeddingBatch { vectors, tokens }) })
	}
}

pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
	fn embed<'a>(
		&'a self,
		_texts: &'a [String],
	) -> BoxFuture<'a, mnemo_providers::Result<EmbeddingBatch>> {
		Box::pin(async move {
			Err(mnemo_providers::Error::Unavailable {
				message: "embedder down".to_string(),
				retryable: true,
			})
		})
	}
}

pub struct StaticIdentity {
	pub email: String,
	pub calls: Arc<AtomicUsize>,
}

impl IdentityVerifier for StaticIdentity {
	fn verify<'a>(
		&'a self,
		token: &'a str,
	) -> BoxFuture<'a, mnemo_providers::Result<VerifiedIdentity>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let email = self.email.clone();

		Box::pin(async move {
			if token == "bad-token" {
				return Err(mnemo_providers::Error::Unauthenticated);
			}

			Ok(VerifiedIdentity {
				user_id: format!("idp-{email}"),
				email,
				expires_at: None,
			})
		})
	}
}

pub struct StaticJudge {
	pub duplicate: bool,
	pub confidence: u32,
}

impl DuplicateJudge for StaticJudge {
	fn judge<'a>(
		&'a self,
		_left: &'a Contact,
		_right: &'a Contact,
	) -> BoxFuture<'a, mnemo_sync::Result<JudgeResponse>> {
		let verdict = JudgeVerdict {
			duplicate: self.duplicate,
			confidence: self.confidence,
			reason: "static".to_string(),
		};

		Box::pin(async move { Ok(JudgeResponse { verdict, tokens: 7 }) })
	}
}

pub fn test_config(database_url: String) -> mnemo_config::Config {
	let cfg = mnemo_config::Config {
		log_level: "info".to_string(),
		cors_allowed_origins: Vec::new(),
		server: mnemo_config::Server { http_bind: "127.0.0.1:0".to_string() },
		database: mnemo_config::Database {
			url: database_url,
			auth_token: None,
			pool_max_conns: 2,
		},
		embedder: mnemo_config::Embedder {
			api_base: "http://127.0.0.1:1".to_string(),
			api_key: "test-key".to_string(),
			model: "text-embedding-3-small".to_string(),
			dimension: DIM as u32,
			timeout_ms: 1_000,
			monitor: mnemo_config::Monitor { enabled: true, interval_ms: 60_000 },
		},
		llm: mnemo_config::Llm {
			api_base: "http://127.0.0.1:1".to_string(),
			api_key: "test-key".to_string(),
			model: "gpt-4o-mini".to_string(),
			timeout_ms: 1_000,
		},
		auth: mnemo_config::Auth {
			disabled: true,
			provider_url: None,
			provider_key: None,
			default_user_email: Some("local@mnemo.test".to_string()),
		},
		rate_limit: mnemo_config::RateLimit { requests_per_minute: 1_000 },
		session: mnemo_config::Session { ttl_minutes: 60 },
		buffer: mnemo_config::Buffer { max_attempts: 2, backoff_base_ms: 1, backoff_cap_ms: 4 },
		quota: mnemo_config::Quota { memories_per_user: 10_000, entities_per_user: 10_000 },
		sync: mnemo_config::Sync::default(),
	};

	mnemo_config::validate(&cfg).expect("invalid test config");

	cfg
}

pub struct TestService {
	pub tdb: TestDatabase,
	pub service: MemoryService,
	pub failures: FailureReceiver,
	pub user_id: String,
}

pub async fn build_service(embedder: Arc<dyn Embedder>) -> TestService {
	build_service_with(embedder, |_| {}).await
}

pub async fn build_service_with(
	embedder: Arc<dyn Embedder>,
	tweak: impl FnOnce(&mut mnemo_config::Config),
) -> TestService {
	let tdb = TestDatabase::new();
	let mut cfg = test_config(tdb.url().to_string());

	tweak(&mut cfg);

	let db = Db::connect(&cfg.database).await.expect("connect failed");

	db.ensure_schema().await.expect("migrate failed");

	let identity_calls = Arc::new(AtomicUsize::new(0));
	let providers = Providers {
		embedder,
		identity: Arc::new(StaticIdentity {
			email: "idp@mnemo.test".to_string(),
			calls: identity_calls,
		}),
		judge: Arc::new(StaticJudge { duplicate: false, confidence: 0 }),
	};
	let (failures_tx, failures_rx) = buffer::failure_channel();
	let service = MemoryService::new(cfg, db, providers, failures_tx);
	let user =
		service.ensure_user("local@mnemo.test", "Local").await.expect("user bootstrap failed");

	TestService { tdb, service, failures: failures_rx, user_id: user.user_id }
}
