//! Process startup: open the store, load or generate the system actor's
//! keys, and assemble the shared [`FederationCtx`].
//!
//! Grounded on the teacher's `server/src/bootstrap.rs` (idempotent
//! first-run setup gated on a database lookup, generating what's missing)
//! generalised from "create the base tenant" to "create the system actor's
//! key pair".

use std::sync::Arc;

use relaystate_crypto::keys::KeyPair;
use relaystate_federation::ctx::{FederationCtx, SystemActor};
use relaystate_net::http_client::SignedHttpClient;
use relaystate_net::key_cache::KeyFetchFailureCache;
use relaystate_stator::config::SettingsRegistry;
use relaystate_store_sqlite::{SqliteAdapter, SqliteConfigStore};
use relaystate_types::error::ClResult;
use relaystate_types::store::ConfigScope;

use crate::config::ServerConfig;

const SYSTEM_ACTOR_KEY_SETTING: &str = "federation.system_actor_private_key_pem";

/// Everything a running process needs: the federation context handed to
/// every stator handler and HTTP route, plus the raw adapter for the
/// natural-key queries and direct-table access (`InboxMessage` persistence,
/// nodeinfo usage counts) that have no counterpart in the narrow repo
/// traits.
pub struct App {
	pub ctx: Arc<FederationCtx<SqliteConfigStore>>,
	pub adapter: Arc<SqliteAdapter>,
	/// The public-facing origin discovery documents are built against —
	/// copied out of [`ServerConfig`] so route handlers don't need their own
	/// copy of the process-level config.
	pub base_url: String,
	pub open_registration: bool,
}

/// Opens (or creates) the on-disk store, loads the system actor's key pair
/// (generating and persisting a fresh one on first run), and wires up the
/// [`FederationCtx`] every handler and route shares.
pub async fn bootstrap(config: &ServerConfig) -> ClResult<App> {
	let (adapter, config_store) = relaystate_store_sqlite::connect(&config.db_dir).await?;
	let adapter = Arc::new(adapter);

	let keys = load_or_generate_system_actor_key(&config_store).await?;
	let actor_uri = config.system_actor_uri();
	let system_actor =
		SystemActor { public_key_id: format!("{actor_uri}#main-key"), actor_uri, keys };

	let settings = Arc::new(SettingsRegistry::with_defaults(config_store));
	let http_client = Arc::new(SignedHttpClient::new()?);
	let key_cache = Arc::new(KeyFetchFailureCache::new());

	let ctx = Arc::new(FederationCtx {
		identity_repo: adapter.clone(),
		domain_repo: adapter.clone(),
		post_repo: adapter.clone(),
		follow_repo: adapter.clone(),
		block_repo: adapter.clone(),
		interaction_repo: adapter.clone(),
		emoji_repo: adapter.clone(),
		hashtag_repo: adapter.clone(),
		timeline_repo: adapter.clone(),
		report_repo: adapter.clone(),
		fan_out_repo: adapter.clone(),
		attachment_repo: adapter.clone(),
		http_client,
		key_cache,
		settings,
		system_actor,
	});

	Ok(App { ctx, adapter, base_url: config.base_url.clone(), open_registration: config.open_registration })
}

async fn load_or_generate_system_actor_key(config_store: &SqliteConfigStore) -> ClResult<KeyPair> {
	use relaystate_types::store::ConfigStore;

	if let Some(pem) = config_store.get_raw(ConfigScope::System, None, SYSTEM_ACTOR_KEY_SETTING).await? {
		return KeyPair::from_private_pem(&pem);
	}
	let keys = KeyPair::generate()?;
	let pem = keys.private_pem()?;
	config_store.set_raw(ConfigScope::System, None, SYSTEM_ACTOR_KEY_SETTING, &pem).await?;
	Ok(keys)
}
