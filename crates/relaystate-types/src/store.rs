//! Adapter traits for persisted state.
//!
//! These generalise the teacher's `TaskStore<S>` trait
//! (`cloudillo-core::scheduler`) from "arbitrary task kind" to "entity kind
//! managed by a declarative state graph". A concrete storage backend (e.g.
//! `relaystate-store-sqlite`) implements `StatorStore<E>` once per entity
//! type `E`, plus whatever entity-specific repository trait
//! (`relaystate-federation`) it needs for domain queries.

use async_trait::async_trait;

use crate::error::ClResult;
use crate::snowflake::Id;
use crate::types::{StatorFields, Timestamp};

/// An entity managed by the stator workflow engine: it has an id and a set
/// of the five stator columns. `MODEL` is a stable name used in stats
/// bucketing and log lines (mirrors Django's `model._meta.label`).
pub trait StatorEntity: Send + Sync + 'static {
	const MODEL: &'static str;

	fn id(&self) -> Id;
	fn stator_fields(&self) -> &StatorFields;
}

/// Storage primitives the stator runner needs for one entity type, independent
/// of that entity's domain-specific columns. Mirrors
/// `original_source/stator/models.py`'s `atransition_schedule_due`,
/// `transition_get_with_lock`, `atransition_clean_locks`, and `Stats`.
#[async_trait]
pub trait StatorStore<E: StatorEntity>: Send + Sync {
	/// Mark rows `state_ready = true` whose `try_interval` has elapsed since
	/// `state_changed` (or `state_attempted` if later), restricted to the
	/// given candidate states. Returns the number of rows marked.
	async fn sweep_schedule(
		&self,
		states: &[(&str, i64)],
		now: Timestamp,
	) -> ClResult<u64>;

	/// Clear `state_locked_until` on rows whose lease has expired. Returns
	/// the number of rows unlocked.
	async fn sweep_locks(&self, now: Timestamp) -> ClResult<u64>;

	/// Permanently delete rows in each given terminal state whose
	/// `state_changed` is older than that state's own `delete_after`
	/// horizon (seconds), relative to `now`. Returns the number of rows
	/// deleted.
	async fn sweep_delete(&self, states: &[(&str, i64)], now: Timestamp) -> ClResult<u64>;

	/// Atomically select up to `limit` ready, unlocked rows in the given
	/// states and lock them until `lock_until`. The lock acquisition and the
	/// row fetch happen as one unit (`SELECT ... FOR UPDATE` in the sqlx
	/// backend), so two runners never race on the same row.
	async fn get_with_lock(
		&self,
		states: &[&str],
		limit: u32,
		lock_until: Timestamp,
	) -> ClResult<Vec<E>>;

	/// Apply a successful transition: set `state`, clear the lock, mark
	/// `state_changed = now`. If `attempt_immediately` is true also set
	/// `state_ready = true` so the next sweep picks it straight up rather
	/// than waiting out `try_interval`.
	async fn transition_perform(
		&self,
		id: Id,
		new_state: &str,
		attempt_immediately: bool,
		now: Timestamp,
	) -> ClResult<()>;

	/// Record a no-op attempt (handler returned `None` or a recoverable
	/// `TryAgainLater`): clear the lock, set `state_attempted = now`, leave
	/// `state` untouched.
	async fn transition_failed(&self, id: Id, now: Timestamp) -> ClResult<()>;

	/// Count of rows currently `state_ready = true` and unlocked, for the
	/// `queued` stats bucket.
	async fn queued_count(&self, states: &[&str]) -> ClResult<u64>;
}

/// The three scopes a configuration key can be set at, narrowest wins.
/// Grounded on `cloudillo-core::settings::types::SettingScope`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigScope {
	System,
	User,
	Identity,
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
	async fn get_raw(&self, scope: ConfigScope, scope_id: Option<Id>, key: &str)
		-> ClResult<Option<String>>;
	async fn set_raw(
		&self,
		scope: ConfigScope,
		scope_id: Option<Id>,
		key: &str,
		value: &str,
	) -> ClResult<()>;
	async fn delete(&self, scope: ConfigScope, scope_id: Option<Id>, key: &str) -> ClResult<()>;
}
