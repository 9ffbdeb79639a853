//! SQLite-backed [`StatorStore`](relaystate_types::store::StatorStore),
//! [`ConfigStore`](relaystate_types::store::ConfigStore) and federation
//! repository implementation.
//!
//! Grounded on `adapters/meta-adapter-sqlite`: a single write pool opened
//! with `journal_mode = WAL` and `max_connections(1)` so the stator runner's
//! row-locking transactions serialise without a real row-level lock,
//! generalised from one bespoke table per Cloudillo concept to one
//! JSON-blob table per stator entity type (see [`json_store`]).

pub mod config_store;
pub mod json_store;
pub mod repos;
pub mod tables;

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use relaystate_types::error::{ClResult, Error};

pub use config_store::SqliteConfigStore;
pub use repos::SqliteAdapter;

fn inspect(err: &sqlx::Error) {
	tracing::warn!(?err, "sqlite connect error");
}

/// Opens (creating if missing) a SQLite database at `dir/relaystate.db` and
/// runs every `CREATE TABLE IF NOT EXISTS` this adapter needs, returning the
/// entity store bundle and the configuration store sharing one pool.
pub async fn connect(dir: impl AsRef<Path>) -> ClResult<(SqliteAdapter, SqliteConfigStore)> {
	tokio::fs::create_dir_all(dir.as_ref()).await.map_err(Error::Io)?;
	let db_path = dir.as_ref().join("relaystate.db");
	let opts = SqliteConnectOptions::new()
		.filename(&db_path)
		.create_if_missing(true)
		.journal_mode(SqliteJournalMode::Wal);

	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.connect_with(opts)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	init_db(&pool).await.inspect_err(inspect).map_err(|_| Error::DbError)?;

	Ok((SqliteAdapter::new(pool.clone()), SqliteConfigStore::new(pool)))
}

async fn init_db(pool: &SqlitePool) -> Result<(), sqlx::Error> {
	let mut tx = pool.begin().await?;
	for table in tables::ALL {
		json_store::create_entity_table(&mut tx, table).await?;
	}
	config_store::create_setting_table(&mut tx).await?;
	tx.commit().await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use relaystate_federation::entities::follow::Follow;
	use relaystate_federation::entities::identity::{Identity, Restriction};
	use relaystate_federation::repo::{FollowRepo, IdentityRepo};
	use relaystate_types::snowflake::{EntityTag, Id};
	use relaystate_types::store::{ConfigScope, ConfigStore, StatorStore};
	use relaystate_types::types::{StatorFields, Timestamp};

	async fn in_memory() -> (SqliteAdapter, SqliteConfigStore) {
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.connect("sqlite::memory:")
			.await
			.expect("open in-memory sqlite");
		init_db(&pool).await.expect("init schema");
		(SqliteAdapter::new(pool.clone()), SqliteConfigStore::new(pool))
	}

	fn sample_identity(username: &str, local: bool) -> Identity {
		Identity {
			id: Id::new(EntityTag::Identity),
			local,
			username: username.to_string(),
			domain: Id::new(EntityTag::Other),
			actor_uri: format!("https://example.social/users/{username}"),
			display_name: username.to_string(),
			summary: None,
			icon_uri: None,
			image_uri: None,
			inbox_uri: format!("https://example.social/users/{username}/inbox"),
			shared_inbox_uri: None,
			outbox_uri: String::new(),
			followers_uri: String::new(),
			following_uri: String::new(),
			featured_collection_uri: String::new(),
			public_key_pem: String::new(),
			private_key_pem: if local { Some("key".into()) } else { None },
			public_key_id: String::new(),
			restriction: Restriction::None,
			discoverable: true,
			manually_approves_followers: false,
			pinned_post_uris: vec![],
			metadata: vec![],
			fetched: None,
			deleted: None,
			created: Timestamp::now(),
			fields: StatorFields::initial("fetched"),
		}
	}

	#[tokio::test]
	async fn identity_round_trips_by_id_and_actor_uri() {
		let (adapter, _config) = in_memory().await;
		let alice = sample_identity("alice", true);
		adapter.identities.insert(&alice).await.unwrap();

		let by_id = adapter.get(alice.id).await.unwrap().unwrap();
		assert_eq!(by_id.username, "alice");

		let by_uri = adapter.find_by_actor_uri(&alice.actor_uri).await.unwrap().unwrap();
		assert_eq!(by_uri.id, alice.id);

		assert!(adapter.find_by_actor_uri("https://example.social/users/nobody").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn active_followers_only_counts_accepted_follows() {
		let (adapter, _config) = in_memory().await;
		let alice = sample_identity("alice", true);
		let bob = sample_identity("bob", false);
		let carol = sample_identity("carol", false);
		adapter.identities.insert(&alice).await.unwrap();
		adapter.identities.insert(&bob).await.unwrap();
		adapter.identities.insert(&carol).await.unwrap();

		let accepted = Follow {
			id: Id::new(EntityTag::Follow),
			source: bob.id,
			target: alice.id,
			uri: Some("https://remote.example/follows/1".into()),
			boosts: true,
			created: Timestamp::now(),
			fields: StatorFields::initial("accepted"),
		};
		let pending = Follow {
			id: Id::new(EntityTag::Follow),
			source: carol.id,
			target: alice.id,
			uri: None,
			boosts: true,
			created: Timestamp::now(),
			fields: StatorFields::initial("local_requested"),
		};
		adapter.follows.insert(&accepted).await.unwrap();
		adapter.follows.insert(&pending).await.unwrap();

		let followers = adapter.active_followers(alice.id).await.unwrap();
		assert_eq!(followers.len(), 1);
		assert_eq!(followers[0].id, bob.id);
	}

	#[tokio::test]
	async fn follow_lookup_by_pair_and_uri() {
		let (adapter, _config) = in_memory().await;
		let follow = Follow {
			id: Id::new(EntityTag::Follow),
			source: Id::new(EntityTag::Identity),
			target: Id::new(EntityTag::Identity),
			uri: Some("https://remote.example/follows/7".into()),
			boosts: false,
			created: Timestamp::now(),
			fields: StatorFields::initial("remote_requested"),
		};
		adapter.follows.insert(&follow).await.unwrap();

		assert!(adapter.find_by_pair(follow.source, follow.target).await.unwrap().is_some());
		assert!(adapter.find_by_uri(follow.uri.as_deref().unwrap()).await.unwrap().is_some());
		assert!(adapter.find_by_pair(follow.target, follow.source).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn transition_perform_updates_state_and_data_blob_together() {
		let (adapter, _config) = in_memory().await;
		let alice = sample_identity("alice", true);
		adapter.identities.insert(&alice).await.unwrap();

		adapter.identities.transition_perform(alice.id, "edited", false, Timestamp::now()).await.unwrap();
		let reloaded = adapter.identities.get(alice.id).await.unwrap().unwrap();
		assert_eq!(reloaded.fields.state, "edited");
	}

	#[tokio::test]
	async fn config_store_falls_back_across_scopes() {
		let (_adapter, config) = in_memory().await;
		let identity = Id::new(EntityTag::Identity);
		assert!(config.get_raw(ConfigScope::Identity, Some(identity), "x").await.unwrap().is_none());
		config.set_raw(ConfigScope::System, None, "x", "default-value").await.unwrap();
		config.set_raw(ConfigScope::Identity, Some(identity), "x", "scoped-value").await.unwrap();
		assert_eq!(
			config.get_raw(ConfigScope::Identity, Some(identity), "x").await.unwrap().as_deref(),
			Some("scoped-value")
		);
		let other = Id::new(EntityTag::Identity);
		assert!(config.get_raw(ConfigScope::Identity, Some(other), "x").await.unwrap().is_none());
	}
}
