//! The `Identity` state handler: actor resolution (spec.md §4.5) run from
//! both the `new` (first sighting) and `edited` (re-fetch after an inbound
//! `Update{actor}` or a scheduled refresh) states.

use async_trait::async_trait;
use serde_json::Value;

use relaystate_net::resolver;
use relaystate_stator::runner::StateHandler;
use relaystate_types::error::{ClResult, Error};
use relaystate_types::store::ConfigStore;
use relaystate_types::types::Timestamp;

use crate::ctx::FederationCtx;
use crate::entities::domain::Domain;
use crate::entities::identity::{Identity, MetadataField};

/// Handles both `new` and `edited`: for a remote identity, resolves the
/// actor document and settles in `fetched`; for a local identity (already
/// fully populated at row-creation time by the not-yet-fetched registration
/// flow) it is a straight pass-through, since there is nothing to fetch from
/// a server this process hosts itself.
pub struct IdentityHandler;

#[async_trait]
impl<C: ConfigStore + Send + Sync + 'static> StateHandler<FederationCtx<C>, Identity> for IdentityHandler {
	async fn handle(&self, ctx: &FederationCtx<C>, identity: &Identity) -> ClResult<Option<&'static str>> {
		if identity.local {
			return Ok(Some("fetched"));
		}

		// `new` and `edited` both declare `fetched` as their only valid child
		// (spec.md §4.1's graph-definition invariant), so a permanently failed
		// fetch — including the 410 "actor is gone" case spec.md §4.5 calls
		// out — lands in `fetched` too, with `deleted` recording the fact
		// instead of a dedicated state. An explicit inbound `Delete{actor}`
		// (handled in `inbox.rs`) is the only path to the literal `deleted`
		// state.
		let actor = match resolver::fetch_actor(
			&ctx.http_client,
			&identity.actor_uri,
			&ctx.system_actor.public_key_id,
			&ctx.system_actor.keys,
		)
		.await
		{
			Ok(actor) => actor,
			Err(Error::PermanentHttp { status: 410, .. }) => {
				let mut deleted = identity.clone();
				deleted.deleted = Some(Timestamp::now());
				deleted.fetched = Some(Timestamp::now());
				ctx.identity_repo.upsert(deleted).await?;
				return Ok(Some("fetched"));
			}
			Err(Error::TransientHttp(_) | Error::Timeout) => return Ok(None),
			Err(Error::BlockedIp(_) | Error::PermanentHttp { .. }) => {
				let mut stale = identity.clone();
				stale.fetched = Some(Timestamp::now());
				ctx.identity_repo.upsert(stale).await?;
				return Ok(Some("fetched"));
			}
			Err(err) => return Err(err),
		};

		let mut resolved = apply_actor_document(identity.clone(), &actor);

		if let Some(featured_uri) = non_empty(&resolved.featured_collection_uri) {
			if let Ok(collection) = resolver::fetch_featured(
				&ctx.http_client,
				featured_uri,
				&ctx.system_actor.public_key_id,
				&ctx.system_actor.keys,
			)
			.await
			{
				resolved.pinned_post_uris = extract_collection_uris(&collection);
			}
		}

		if !resolved.username.is_empty() {
			if let Some(canonical_domain) = resolve_canonical_domain(ctx, &resolved).await {
				resolved.domain = canonical_domain;
			}
		}

		resolved.fetched = Some(Timestamp::now());
		ctx.identity_repo.upsert(resolved).await?;
		Ok(Some("fetched"))
	}
}

fn non_empty(s: &str) -> Option<&str> {
	if s.is_empty() {
		None
	} else {
		Some(s)
	}
}

/// Maps an AS2 actor document onto `Identity`'s fields, per spec.md §4.5's
/// field list. Fields the document omits keep whatever the row already had.
fn apply_actor_document(mut identity: Identity, actor: &Value) -> Identity {
	if let Some(name) = actor.get("name").and_then(Value::as_str) {
		identity.display_name = name.to_string();
	}
	if let Some(username) = actor.get("preferredUsername").and_then(Value::as_str) {
		identity.username = username.to_string();
	}
	if let Some(summary) = actor.get("summary").and_then(Value::as_str) {
		identity.summary = Some(summary.to_string());
	}
	if let Some(icon) = actor.get("icon").and_then(extract_media_url) {
		identity.icon_uri = Some(icon);
	}
	if let Some(image) = actor.get("image").and_then(extract_media_url) {
		identity.image_uri = Some(image);
	}
	if let Some(inbox) = actor.get("inbox").and_then(Value::as_str) {
		identity.inbox_uri = inbox.to_string();
	}
	if let Some(outbox) = actor.get("outbox").and_then(Value::as_str) {
		identity.outbox_uri = outbox.to_string();
	}
	if let Some(followers) = actor.get("followers").and_then(Value::as_str) {
		identity.followers_uri = followers.to_string();
	}
	if let Some(following) = actor.get("following").and_then(Value::as_str) {
		identity.following_uri = following.to_string();
	}
	if let Some(shared_inbox) =
		actor.get("endpoints").and_then(|e| e.get("sharedInbox")).and_then(Value::as_str)
	{
		identity.shared_inbox_uri = Some(shared_inbox.to_string());
	}
	if let Some(featured) = actor.get("featured").and_then(Value::as_str) {
		identity.featured_collection_uri = featured.to_string();
	}
	if let Some(key) = actor.get("publicKey") {
		if let Some(pem) = key.get("publicKeyPem").and_then(Value::as_str) {
			identity.public_key_pem = pem.to_string();
		}
		if let Some(id) = key.get("id").and_then(Value::as_str) {
			identity.public_key_id = id.to_string();
		}
	}
	if let Some(approves) = actor.get("manuallyApprovesFollowers").and_then(Value::as_bool) {
		identity.manually_approves_followers = approves;
	}
	if let Some(discoverable) = actor.get("discoverable").and_then(Value::as_bool) {
		identity.discoverable = discoverable;
	}
	if let Some(also_known_as) = actor.get("alsoKnownAs") {
		let aliases: Vec<String> = match also_known_as {
			Value::Array(items) => items.iter().filter_map(Value::as_str).map(ToString::to_string).collect(),
			Value::String(single) => vec![single.clone()],
			_ => vec![],
		};
		identity.metadata.retain(|field| field.name != "also_known_as");
		for alias in aliases {
			identity.metadata.push(MetadataField { name: "also_known_as".into(), value: alias });
		}
	}
	identity
}

/// AS2 `icon`/`image` are either a bare URI string or an embedded `Image`
/// object with a `url` field.
fn extract_media_url(value: &Value) -> Option<String> {
	match value {
		Value::String(uri) => Some(uri.clone()),
		Value::Object(_) => value.get("url").and_then(Value::as_str).map(ToString::to_string),
		Value::Array(items) => items.first().and_then(extract_media_url),
		_ => None,
	}
}

fn extract_collection_uris(collection: &Value) -> Vec<String> {
	let items = collection
		.get("orderedItems")
		.or_else(|| collection.get("items"))
		.and_then(Value::as_array)
		.cloned()
		.unwrap_or_default();
	items
		.iter()
		.filter_map(|item| match item {
			Value::String(uri) => Some(uri.clone()),
			Value::Object(_) => item.get("id").and_then(Value::as_str).map(ToString::to_string),
			_ => None,
		})
		.collect()
}

/// Re-resolves webfinger on `username@actor-host` (spec.md §4.5) to find the
/// display domain, which may differ from the host actually serving the
/// actor document; records it as a `Domain` row (creating one on first
/// sighting) and returns its id. Best-effort: any failure here keeps the
/// identity's existing domain assignment rather than blocking the fetch.
async fn resolve_canonical_domain<C: ConfigStore>(
	ctx: &FederationCtx<C>,
	identity: &Identity,
) -> Option<relaystate_types::snowflake::Id> {
	let actor_host = identity.actor_uri.split_once("://").map(|(_, rest)| rest)?.split('/').next()?;
	let account = format!("{}@{actor_host}", identity.username);
	let webfinger = resolver::resolve_webfinger(&ctx.http_client, &account).await.ok()?;
	let canonical_host = webfinger.subject.rsplit_once('@').map(|(_, host)| host)?;

	if ctx.domain_repo.find_by_hostname(canonical_host).await.ok()?.is_none() {
		ctx.domain_repo
			.upsert(Domain {
				id: relaystate_types::snowflake::Id::new(relaystate_types::snowflake::EntityTag::Other),
				domain: canonical_host.to_string(),
				service_domain: if canonical_host == actor_host { None } else { Some(actor_host.to_string()) },
				local: false,
				blocked: false,
				public: true,
				nodeinfo: None,
				first_seen: Timestamp::now(),
			})
			.await
			.ok()?;
	}
	ctx.domain_repo.find_by_hostname(canonical_host).await.ok()?.map(|domain| domain.id)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn extracts_a_bare_string_icon() {
		assert_eq!(extract_media_url(&json!("https://example.social/icon.png")).as_deref(), Some("https://example.social/icon.png"));
	}

	#[test]
	fn extracts_an_embedded_image_icon() {
		let icon = json!({"type": "Image", "url": "https://example.social/icon.png"});
		assert_eq!(extract_media_url(&icon).as_deref(), Some("https://example.social/icon.png"));
	}

	#[test]
	fn collection_uris_read_either_items_key() {
		let ordered = json!({"orderedItems": ["https://example.social/posts/1"]});
		assert_eq!(extract_collection_uris(&ordered), vec!["https://example.social/posts/1".to_string()]);
		let items = json!({"items": [{"id": "https://example.social/posts/2"}]});
		assert_eq!(extract_collection_uris(&items), vec!["https://example.social/posts/2".to_string()]);
	}

	#[test]
	fn applying_an_actor_document_fills_known_fields() {
		let base = sample_identity();
		let actor = json!({
			"name": "Alice",
			"preferredUsername": "alice",
			"inbox": "https://remote.example/users/alice/inbox",
			"publicKey": {"id": "https://remote.example/users/alice#main-key", "publicKeyPem": "-----BEGIN PUBLIC KEY-----"},
			"manuallyApprovesFollowers": true,
		});
		let resolved = apply_actor_document(base, &actor);
		assert_eq!(resolved.display_name, "Alice");
		assert_eq!(resolved.username, "alice");
		assert_eq!(resolved.inbox_uri, "https://remote.example/users/alice/inbox");
		assert!(resolved.manually_approves_followers);
		assert_eq!(resolved.public_key_id, "https://remote.example/users/alice#main-key");
	}

	fn sample_identity() -> Identity {
		Identity {
			id: relaystate_types::snowflake::Id::new(relaystate_types::snowflake::EntityTag::Identity),
			local: false,
			username: String::new(),
			domain: relaystate_types::snowflake::Id::new(relaystate_types::snowflake::EntityTag::Other),
			actor_uri: "https://remote.example/users/alice".into(),
			display_name: String::new(),
			summary: None,
			icon_uri: None,
			image_uri: None,
			inbox_uri: String::new(),
			shared_inbox_uri: None,
			outbox_uri: String::new(),
			followers_uri: String::new(),
			following_uri: String::new(),
			featured_collection_uri: String::new(),
			public_key_pem: String::new(),
			private_key_pem: None,
			public_key_id: String::new(),
			restriction: crate::entities::identity::Restriction::None,
			discoverable: false,
			manually_approves_followers: false,
			pinned_post_uris: vec![],
			metadata: vec![],
			fetched: None,
			deleted: None,
			created: Timestamp::now(),
			fields: relaystate_types::types::StatorFields::initial("new"),
		}
	}
}
