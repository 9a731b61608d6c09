pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
	#[error(transparent)]
	InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
	#[error("{message}")]
	InvalidConfig { message: String },
	#[error("{message}")]
	InvalidResponse { message: String },
	#[error("Provider unavailable: {message}")]
	Unavailable { message: String, retryable: bool },
	#[error("Provider quota exceeded.")]
	QuotaExceeded { retry_after_seconds: Option<u64> },
	#[error("Authentication rejected by provider.")]
	Unauthenticated,
}

impl Error {
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			Self::Unavailable { retryable: true, .. } | Self::QuotaExceeded { .. }
		)
	}
}

impl From<reqwest::Error> for Error {
	fn from(err: reqwest::Error) -> Self {
		let retryable = err.is_timeout() || err.is_connect() || err.is_request();

		Self::Unavailable { message: err.to_string(), retryable }
	}
}
