use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	#[serde(default = "default_log_level")]
	pub log_level: String,
	#[serde(default)]
	pub cors_allowed_origins: Vec<String>,
	pub server: Server,
	pub database: Database,
	pub embedder: Embedder,
	pub llm: Llm,
	pub auth: Auth,
	pub rate_limit: RateLimit,
	pub session: Session,
	pub buffer: Buffer,
	pub quota: Quota,
	#[serde(default)]
	pub sync: Sync,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
	pub http_bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Database {
	pub url: String,
	pub auth_token: Option<String>,
	#[serde(default = "default_pool_max_conns")]
	pub pool_max_conns: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Embedder {
	pub api_base: String,
	pub api_key: String,
	pub model: String,
	pub dimension: u32,
	#[serde(default = "default_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default)]
	pub monitor: Monitor,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Monitor {
	pub enabled: bool,
	pub interval_ms: u64,
}
impl Default for Monitor {
	fn default() -> Self {
		Self { enabled: true, interval_ms: 60_000 }
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct Llm {
	pub api_base: String,
	pub api_key: String,
	pub model: String,
	#[serde(default = "default_timeout_ms")]
	pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Auth {
	#[serde(default)]
	pub disabled: bool,
	pub provider_url: Option<String>,
	pub provider_key: Option<String>,
	pub default_user_email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimit {
	pub requests_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Session {
	#[serde(default = "default_session_ttl_minutes")]
	pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Buffer {
	pub max_attempts: u32,
	pub backoff_base_ms: u64,
	pub backoff_cap_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Quota {
	pub memories_per_user: u64,
	pub entities_per_user: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Sync {
	pub batch_size: u32,
	pub pre_threshold: f32,
	pub confidence_threshold: u32,
	pub auto_merge: bool,
	pub max_remote_in_memory: u32,
}
impl Default for Sync {
	fn default() -> Self {
		Self {
			batch_size: 25,
			pre_threshold: 0.6,
			confidence_threshold: 90,
			auto_merge: false,
			max_remote_in_memory: 2_000,
		}
	}
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_pool_max_conns() -> u32 {
	8
}

fn default_timeout_ms() -> u64 {
	30_000
}

fn default_session_ttl_minutes() -> i64 {
	60
}
