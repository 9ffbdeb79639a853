//! The shared context every `StateHandler` in this crate receives.
//!
//! Grounded on `cloudillo-core::app::AppState`'s pattern of bundling
//! repositories, a signed HTTP client and the settings registry behind one
//! `Arc<Ctx>` threaded through every handler, generalised from a single
//! storage adapter to one trait object per repository so `relaystate-store-sqlite`
//! (or any other backend) only has to implement the narrow repo traits in
//! `relaystate_federation::repo`.

use std::sync::Arc;

use relaystate_crypto::keys::KeyPair;
use relaystate_net::http_client::SignedHttpClient;
use relaystate_net::key_cache::KeyFetchFailureCache;
use relaystate_stator::config::SettingsRegistry;
use relaystate_types::store::ConfigStore;

use crate::repo::{
	BlockRepo, DomainRepo, EmojiRepo, FanOutRepo, FollowRepo, HashtagRepo, IdentityRepo, InteractionRepo,
	PostAttachmentRepo, PostRepo, ReportRepo, TimelineRepo,
};

/// This server's own distinguished actor, used to sign outbound GETs that
/// are not on behalf of any particular local account (spec.md §9's "System
/// actor"). Its keys live in the configuration store so they survive
/// restarts, not in this struct's construction.
pub struct SystemActor {
	pub actor_uri: String,
	pub public_key_id: String,
	pub keys: KeyPair,
}

pub struct FederationCtx<C: ConfigStore> {
	pub identity_repo: Arc<dyn IdentityRepo>,
	pub domain_repo: Arc<dyn DomainRepo>,
	pub post_repo: Arc<dyn PostRepo>,
	pub follow_repo: Arc<dyn FollowRepo>,
	pub block_repo: Arc<dyn BlockRepo>,
	pub interaction_repo: Arc<dyn InteractionRepo>,
	pub emoji_repo: Arc<dyn EmojiRepo>,
	pub hashtag_repo: Arc<dyn HashtagRepo>,
	pub timeline_repo: Arc<dyn TimelineRepo>,
	pub report_repo: Arc<dyn ReportRepo>,
	pub fan_out_repo: Arc<dyn FanOutRepo>,
	pub attachment_repo: Arc<dyn PostAttachmentRepo>,
	pub http_client: Arc<SignedHttpClient>,
	pub key_cache: Arc<KeyFetchFailureCache>,
	pub settings: Arc<SettingsRegistry<C>>,
	pub system_actor: SystemActor,
}
