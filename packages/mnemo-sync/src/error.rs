use crate::adapter::AdapterError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error(transparent)]
	Adapter(#[from] AdapterError),
	#[error(transparent)]
	Storage(#[from] mnemo_storage::Error),
	#[error(transparent)]
	Provider(#[from] mnemo_providers::Error),
	#[error("Malformed card: {0}")]
	MalformedCard(String),
}
