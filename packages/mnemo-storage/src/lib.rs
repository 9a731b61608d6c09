pub mod buffer;
pub mod db;
pub mod entities;
pub mod interactions;
pub mod memories;
pub mod models;
pub mod schema;
pub mod usage;
pub mod users;
pub mod vector;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
