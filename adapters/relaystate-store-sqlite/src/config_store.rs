//! [`ConfigStore`] backed by a single `setting` table keyed on
//! `(scope, scope_id, key)`, grounded on `adapters/meta-adapter-sqlite`'s
//! settings table (`cloudillo-core::settings` persists the same
//! scope/key/value triad).

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use relaystate_types::error::{ClResult, Error};
use relaystate_types::snowflake::Id;
use relaystate_types::store::{ConfigScope, ConfigStore};

fn inspect(err: &sqlx::Error) {
	tracing::warn!(?err, "sqlite error");
}

fn scope_label(scope: ConfigScope) -> &'static str {
	match scope {
		ConfigScope::System => "system",
		ConfigScope::User => "user",
		ConfigScope::Identity => "identity",
	}
}

fn scope_id_value(scope_id: Option<Id>) -> i64 {
	scope_id.map_or(0, |id| i64::try_from(id.0).unwrap_or(i64::MAX))
}

pub async fn create_setting_table(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<(), sqlx::Error> {
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS setting (
			scope TEXT NOT NULL,
			scope_id INTEGER NOT NULL,
			key TEXT NOT NULL,
			value TEXT NOT NULL,
			PRIMARY KEY (scope, scope_id, key)
		)",
	)
	.execute(&mut **tx)
	.await?;
	Ok(())
}

pub struct SqliteConfigStore {
	pool: SqlitePool,
}

impl SqliteConfigStore {
	#[must_use]
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl ConfigStore for SqliteConfigStore {
	async fn get_raw(
		&self,
		scope: ConfigScope,
		scope_id: Option<Id>,
		key: &str,
	) -> ClResult<Option<String>> {
		let row = sqlx::query("SELECT value FROM setting WHERE scope = ? AND scope_id = ? AND key = ?")
			.bind(scope_label(scope))
			.bind(scope_id_value(scope_id))
			.bind(key)
			.fetch_optional(&self.pool)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		row.map(|row| row.try_get::<String, _>("value").map_err(|_| Error::DbError)).transpose()
	}

	async fn set_raw(
		&self,
		scope: ConfigScope,
		scope_id: Option<Id>,
		key: &str,
		value: &str,
	) -> ClResult<()> {
		sqlx::query(
			"INSERT INTO setting (scope, scope_id, key, value) VALUES (?, ?, ?, ?)
			 ON CONFLICT (scope, scope_id, key) DO UPDATE SET value = excluded.value",
		)
		.bind(scope_label(scope))
		.bind(scope_id_value(scope_id))
		.bind(key)
		.bind(value)
		.execute(&self.pool)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
		Ok(())
	}

	async fn delete(&self, scope: ConfigScope, scope_id: Option<Id>, key: &str) -> ClResult<()> {
		sqlx::query("DELETE FROM setting WHERE scope = ? AND scope_id = ? AND key = ?")
			.bind(scope_label(scope))
			.bind(scope_id_value(scope_id))
			.bind(key)
			.execute(&self.pool)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		Ok(())
	}
}
