mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Auth, Buffer, Config, Database, Embedder, Llm, Monitor, Quota, RateLimit, Server, Session, Sync,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	validate_general(cfg)?;
	validate_database(cfg)?;
	validate_providers(cfg)?;
	validate_auth(cfg)?;
	validate_limits(cfg)?;
	validate_sync(cfg)?;

	Ok(())
}

fn validate_general(cfg: &Config) -> Result<()> {
	if !matches!(cfg.log_level.as_str(), "debug" | "info" | "warn" | "error") {
		return Err(Error::Validation {
			message: "log_level must be one of debug, info, warn, or error.".to_string(),
		});
	}
	if cfg.server.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "server.http_bind must be non-empty.".to_string(),
		});
	}

	for (idx, origin) in cfg.cors_allowed_origins.iter().enumerate() {
		if origin.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("cors_allowed_origins[{idx}] must be non-empty."),
			});
		}
	}

	Ok(())
}

fn validate_database(cfg: &Config) -> Result<()> {
	if cfg.database.url.trim().is_empty() {
		return Err(Error::Validation { message: "database.url must be non-empty.".to_string() });
	}
	if let Some(token) = cfg.database.auth_token.as_ref()
		&& token.trim().is_empty()
	{
		return Err(Error::Validation {
			message: "database.auth_token must be non-empty when provided.".to_string(),
		});
	}
	if cfg.database.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "database.pool_max_conns must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn validate_providers(cfg: &Config) -> Result<()> {
	if cfg.embedder.dimension == 0 {
		return Err(Error::Validation {
			message: "embedder.dimension must be greater than zero.".to_string(),
		});
	}
	if cfg.embedder.monitor.enabled && cfg.embedder.monitor.interval_ms == 0 {
		return Err(Error::Validation {
			message: "embedder.monitor.interval_ms must be greater than zero when enabled."
				.to_string(),
		});
	}

	for (label, key) in [("embedder", &cfg.embedder.api_key), ("llm", &cfg.llm.api_key)] {
		if key.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("{label}.api_key must be non-empty."),
			});
		}
	}
	for (label, model) in [("embedder", &cfg.embedder.model), ("llm", &cfg.llm.model)] {
		if model.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label}.model must be non-empty.") });
		}
	}

	Ok(())
}

fn validate_auth(cfg: &Config) -> Result<()> {
	if cfg.auth.disabled {
		let has_default_user = cfg
			.auth
			.default_user_email
			.as_ref()
			.map(|email| !email.trim().is_empty())
			.unwrap_or(false);

		if !has_default_user {
			return Err(Error::Validation {
				message: "auth.default_user_email is required when auth.disabled is true."
					.to_string(),
			});
		}

		return Ok(());
	}

	let has_provider = cfg
		.auth
		.provider_key
		.as_ref()
		.zip(cfg.auth.provider_url.as_ref())
		.map(|(key, url)| !key.trim().is_empty() && !url.trim().is_empty())
		.unwrap_or(false);

	if !has_provider {
		return Err(Error::Validation {
			message:
				"auth.provider_url and auth.provider_key are required unless auth.disabled is true."
					.to_string(),
		});
	}

	Ok(())
}

fn validate_limits(cfg: &Config) -> Result<()> {
	if cfg.rate_limit.requests_per_minute == 0 {
		return Err(Error::Validation {
			message: "rate_limit.requests_per_minute must be greater than zero.".to_string(),
		});
	}
	if cfg.session.ttl_minutes <= 0 {
		return Err(Error::Validation {
			message: "session.ttl_minutes must be greater than zero.".to_string(),
		});
	}
	if cfg.buffer.max_attempts == 0 {
		return Err(Error::Validation {
			message: "buffer.max_attempts must be greater than zero.".to_string(),
		});
	}
	if cfg.buffer.backoff_base_ms == 0 {
		return Err(Error::Validation {
			message: "buffer.backoff_base_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.buffer.backoff_cap_ms < cfg.buffer.backoff_base_ms {
		return Err(Error::Validation {
			message: "buffer.backoff_cap_ms must be greater than or equal to buffer.backoff_base_ms."
				.to_string(),
		});
	}
	if cfg.quota.memories_per_user == 0 || cfg.quota.entities_per_user == 0 {
		return Err(Error::Validation {
			message: "quota.memories_per_user and quota.entities_per_user must be greater than zero."
				.to_string(),
		});
	}

	Ok(())
}

fn validate_sync(cfg: &Config) -> Result<()> {
	if cfg.sync.batch_size == 0 {
		return Err(Error::Validation {
			message: "sync.batch_size must be greater than zero.".to_string(),
		});
	}
	if !cfg.sync.pre_threshold.is_finite() || !(0.0..=1.0).contains(&cfg.sync.pre_threshold) {
		return Err(Error::Validation {
			message: "sync.pre_threshold must be in the range 0.0-1.0.".to_string(),
		});
	}
	if cfg.sync.confidence_threshold > 100 {
		return Err(Error::Validation {
			message: "sync.confidence_threshold must be 100 or less.".to_string(),
		});
	}
	if cfg.sync.max_remote_in_memory == 0 {
		return Err(Error::Validation {
			message: "sync.max_remote_in_memory must be greater than zero.".to_string(),
		});
	}

	Ok(())
}
