#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Conflict: {0}")]
	Conflict(String),
	#[error("Invariant violation: {0}")]
	InvariantViolation(String),
	#[error("Migration failed: {0}")]
	Migration(String),
}

impl Error {
	/// Connection-level failures may be retried; constraint violations and
	/// invariant breaks must surface to the caller.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::Sqlx(err) => matches!(
				err,
				sqlx::Error::Io(_)
					| sqlx::Error::PoolTimedOut
					| sqlx::Error::PoolClosed
					| sqlx::Error::WorkerCrashed
			),
			_ => false,
		}
	}
}
