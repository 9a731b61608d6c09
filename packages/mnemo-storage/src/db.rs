use sqlx::sqlite::SqlitePoolOptions;

use crate::{Result, schema};

pub struct Db {
	pub pool: sqlx::SqlitePool,
}

impl Db {
	pub async fn connect(cfg: &mnemo_config::Database) -> Result<Self> {
		let pool = SqlitePoolOptions::new()
			.max_connections(cfg.pool_max_conns)
			.connect(&cfg.url)
			.await?;

		Ok(Self { pool })
	}

	pub async fn ensure_schema(&self) -> Result<()> {
		schema::migrate(self, schema::MigrateMode::Apply).await?;

		Ok(())
	}
}
