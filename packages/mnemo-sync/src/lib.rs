pub mod adapter;
pub mod conflict;
pub mod dedup;
pub mod engine;
pub mod matching;
pub mod vcard;
pub mod vcard_file;

mod error;

pub use error::{Error, Result};

use std::{future::Future, pin::Pin};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Custom field used to round-trip an internal entity id through an external
/// contact provider.
pub const EXTERNAL_UID_FIELD: &str = "X-MCP-UUID";

/// Entity metadata key holding the provider-side uid of a synced contact.
pub const PROVIDER_UID_KEY: &str = "external_uid";
