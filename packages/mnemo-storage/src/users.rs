use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result, db::Db, models::User};

pub async fn insert_user(db: &Db, email: &str, display_name: &str) -> Result<User> {
	let email = email.trim().to_lowercase();

	if email.is_empty() {
		return Err(Error::InvalidArgument("User email must be non-empty.".to_string()));
	}

	let user = User {
		user_id: Uuid::new_v4().to_string(),
		email,
		display_name: display_name.to_string(),
		is_active: true,
		created_at: OffsetDateTime::now_utc(),
	};
	let result = sqlx::query(
		"INSERT INTO users (user_id, email, display_name, is_active, created_at) \
		 VALUES (?, ?, ?, ?, ?)",
	)
	.bind(&user.user_id)
	.bind(&user.email)
	.bind(&user.display_name)
	.bind(user.is_active)
	.bind(user.created_at)
	.execute(&db.pool)
	.await;

	match result {
		Ok(_) => Ok(user),
		Err(err) if is_unique_violation(&err) =>
			Err(Error::Conflict(format!("User email {} already exists.", user.email))),
		Err(err) => Err(err.into()),
	}
}

pub async fn get_user(db: &Db, user_id: &str) -> Result<Option<User>> {
	let user = sqlx::query_as::<_, User>(
		"SELECT user_id, email, display_name, is_active, created_at FROM users WHERE user_id = ?",
	)
	.bind(user_id)
	.fetch_optional(&db.pool)
	.await?;

	Ok(user)
}

pub async fn get_user_by_email(db: &Db, email: &str) -> Result<Option<User>> {
	let user = sqlx::query_as::<_, User>(
		"SELECT user_id, email, display_name, is_active, created_at \
		 FROM users WHERE email = ?",
	)
	.bind(email.trim().to_lowercase())
	.fetch_optional(&db.pool)
	.await?;

	Ok(user)
}

pub async fn ensure_user(db: &Db, email: &str, display_name: &str) -> Result<User> {
	if let Some(user) = get_user_by_email(db, email).await? {
		return Ok(user);
	}

	insert_user(db, email, display_name).await
}

/// Requires an existing active user; the canonical ownership check every
/// service operation runs first.
pub async fn require_active_user(db: &Db, user_id: &str) -> Result<User> {
	let user = get_user(db, user_id)
		.await?
		.ok_or_else(|| Error::NotFound(format!("Unknown user {user_id}.")))?;

	if !user.is_active {
		return Err(Error::NotFound(format!("User {user_id} is inactive.")));
	}

	Ok(user)
}

/// Deleting a user cascades to everything the tenant owns, in one
/// transaction.
pub async fn delete_user(db: &Db, user_id: &str) -> Result<bool> {
	let mut tx = db.pool.begin().await?;

	for table in
		["memories", "entities", "interactions", "api_usage_tracking", "buffered_writes"]
	{
		sqlx::query(&format!("DELETE FROM {table} WHERE user_id = ?"))
			.bind(user_id)
			.execute(&mut *tx)
			.await?;
	}

	let result =
		sqlx::query("DELETE FROM users WHERE user_id = ?").bind(user_id).execute(&mut *tx).await?;

	tx.commit().await?;

	Ok(result.rows_affected() > 0)
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
	err.as_database_error().is_some_and(|db_err| db_err.is_unique_violation())
}
