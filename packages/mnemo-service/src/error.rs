pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Unauthenticated: {message}")]
	Unauthenticated { message: String },
	#[error("Unauthorized: {message}")]
	Unauthorized { message: String },
	#[error("Invalid argument: {message}")]
	InvalidArgument { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Conflict: {message}")]
	Conflict { message: String },
	#[error("Quota exceeded: {message}")]
	QuotaExceeded { message: String },
	#[error("Rate limited; retry after {retry_after_seconds}s.")]
	RateLimited { retry_after_seconds: u64 },
	#[error("Dependency unavailable: {message}")]
	DependencyUnavailable { message: String },
	#[error("Timed out: {message}")]
	Timeout { message: String },
	#[error("Invariant violation: {message}")]
	InvariantViolation { message: String },
}

impl Error {
	/// Stable machine-readable reason for protocol error envelopes.
	pub fn reason(&self) -> &'static str {
		match self {
			Self::Unauthenticated { .. } => "unauthenticated",
			Self::Unauthorized { .. } => "unauthorized",
			Self::InvalidArgument { .. } => "invalid_argument",
			Self::NotFound { .. } => "not_found",
			Self::Conflict { .. } => "conflict",
			Self::QuotaExceeded { .. } => "quota_exceeded",
			Self::RateLimited { .. } => "rate_limited",
			Self::DependencyUnavailable { .. } => "dependency_unavailable",
			Self::Timeout { .. } => "timeout",
			Self::InvariantViolation { .. } => "invariant_violation",
		}
	}

	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			Self::DependencyUnavailable { .. } | Self::Timeout { .. } | Self::RateLimited { .. }
		)
	}
}

impl From<mnemo_storage::Error> for Error {
	fn from(err: mnemo_storage::Error) -> Self {
		match err {
			mnemo_storage::Error::InvalidArgument(message) => Self::InvalidArgument { message },
			mnemo_storage::Error::NotFound(message) => Self::NotFound { message },
			mnemo_storage::Error::Conflict(message) => Self::Conflict { message },
			mnemo_storage::Error::InvariantViolation(message) =>
				Self::InvariantViolation { message },
			mnemo_storage::Error::Migration(message) =>
				Self::DependencyUnavailable { message },
			mnemo_storage::Error::Sqlx(inner) =>
				Self::DependencyUnavailable { message: inner.to_string() },
		}
	}
}

impl From<mnemo_providers::Error> for Error {
	fn from(err: mnemo_providers::Error) -> Self {
		match err {
			mnemo_providers::Error::Unauthenticated =>
				Self::Unauthenticated { message: "Provider rejected the credential.".to_string() },
			mnemo_providers::Error::QuotaExceeded { retry_after_seconds } =>
				Self::RateLimited { retry_after_seconds: retry_after_seconds.unwrap_or(60) },
			other => Self::DependencyUnavailable { message: other.to_string() },
		}
	}
}

impl From<mnemo_sync::Error> for Error {
	fn from(err: mnemo_sync::Error) -> Self {
		match err {
			mnemo_sync::Error::InvalidArgument(message) => Self::InvalidArgument { message },
			mnemo_sync::Error::Storage(inner) => inner.into(),
			mnemo_sync::Error::Provider(inner) => inner.into(),
			other => Self::DependencyUnavailable { message: other.to_string() },
		}
	}
}
