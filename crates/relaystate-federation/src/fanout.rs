//! Recipient computation and the `FanOut` handler dispatch table, spec.md
//! §4.3.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::{json, Value};

use relaystate_crypto::canon;
use relaystate_net::http_client;
use relaystate_stator::runner::StateHandler;
use relaystate_types::error::{ClResult, Error};
use relaystate_types::snowflake::Id;
use relaystate_types::store::ConfigStore;
use relaystate_types::types::Timestamp;

use crate::ctx::FederationCtx;
use crate::entities::fan_out::{FanOut, FanOutKind};
use crate::entities::identity::Identity;
use crate::entities::interaction::{InteractionKind, PostInteraction};
use crate::entities::post::{Post, Visibility};
use crate::entities::timeline_event::{TimelineEvent, TimelineEventKind};

const AS2_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

/// Enumerates the recipient set for a post (spec.md §4.3's "Recipient
/// computation"): mentioned identities, plus active followers for every
/// visibility except `mentioned` (narrowed to local-only targets for
/// `local_only`), plus the in-reply-to author, minus anyone who fully
/// blocks the author, with non-local targets deduplicated by shared inbox.
#[must_use]
pub fn compute_recipients(
	mentioned: &[Identity],
	visibility: Visibility,
	author_followers: &[Identity],
	in_reply_to_author: Option<&Identity>,
	blockers_of_author: &HashSet<Id>,
) -> Vec<Identity> {
	let mut set: HashMap<Id, Identity> = HashMap::new();
	for identity in mentioned {
		set.insert(identity.id, identity.clone());
	}
	if !matches!(visibility, Visibility::Mentioned) {
		for follower in author_followers {
			if matches!(visibility, Visibility::LocalOnly) && !follower.local {
				continue;
			}
			set.insert(follower.id, follower.clone());
		}
	}
	if let Some(author) = in_reply_to_author {
		set.insert(author.id, author.clone());
	}
	for blocked in blockers_of_author {
		set.remove(blocked);
	}
	dedupe_shared_inbox(set.into_values().collect())
}

/// Among non-local targets, keeps one representative per `shared_inbox_uri`
/// (spec.md §4.3: "Shared-inbox dedup"). Local targets never dedupe — each
/// gets its own timeline row.
fn dedupe_shared_inbox(identities: Vec<Identity>) -> Vec<Identity> {
	let mut seen_shared_inboxes = HashSet::new();
	let mut kept = Vec::with_capacity(identities.len());
	for identity in identities {
		if identity.local {
			kept.push(identity);
			continue;
		}
		match &identity.shared_inbox_uri {
			Some(uri) if !seen_shared_inboxes.insert(uri.clone()) => {}
			_ => kept.push(identity),
		}
	}
	kept
}

/// The `new` state's handler for every `FanOut` row: dispatches on `(kind,
/// recipient.local)` per spec.md §4.3's table.
pub struct FanOutHandler;

#[async_trait]
impl<C: ConfigStore + Send + Sync + 'static> StateHandler<FederationCtx<C>, FanOut> for FanOutHandler {
	async fn handle(&self, ctx: &FederationCtx<C>, fan_out: &FanOut) -> ClResult<Option<&'static str>> {
		let Some(recipient) = ctx.identity_repo.get(fan_out.identity).await? else {
			return Ok(Some("skipped"));
		};

		let result = if recipient.local {
			deliver_locally(ctx, fan_out, &recipient).await
		} else {
			deliver_remotely(ctx, fan_out, &recipient).await
		};

		match result {
			Ok(()) => Ok(Some("sent")),
			Err(Error::TransientHttp(_) | Error::Timeout) => Ok(None),
			Err(Error::BlockedIp(_) | Error::PermanentHttp { .. }) => Ok(Some("failed")),
			Err(err) => Err(err),
		}
	}
}

async fn deliver_locally<C: ConfigStore>(
	ctx: &FederationCtx<C>,
	fan_out: &FanOut,
	recipient: &Identity,
) -> ClResult<()> {
	match fan_out.kind {
		FanOutKind::Post => {
			ctx.timeline_repo
				.create_event(TimelineEvent {
					id: Id::new(relaystate_types::snowflake::EntityTag::TimelineEvent),
					owner: recipient.id,
					kind: TimelineEventKind::Post,
					subject_post: fan_out.subject_post,
					subject_post_interaction: None,
					subject_identity: None,
					created: Timestamp::now(),
					fields: relaystate_types::types::StatorFields::initial("created"),
				})
				.await
		}
		FanOutKind::PostEdited => Ok(()),
		FanOutKind::PostDeleted => {
			let Some(post) = fan_out.subject_post else { return Ok(()) };
			ctx.timeline_repo.delete_events_for_post(recipient.id, post).await
		}
		FanOutKind::Interaction => ctx
			.timeline_repo
			.create_event(TimelineEvent {
				id: Id::new(relaystate_types::snowflake::EntityTag::TimelineEvent),
				owner: recipient.id,
				kind: TimelineEventKind::Liked,
				subject_post: fan_out.subject_post,
				subject_post_interaction: fan_out.subject_post_interaction,
				subject_identity: None,
				created: Timestamp::now(),
				fields: relaystate_types::types::StatorFields::initial("created"),
			})
			.await,
		FanOutKind::UndoInteraction => {
			let Some(interaction) = fan_out.subject_post_interaction else { return Ok(()) };
			ctx.timeline_repo.delete_events_for_interaction(interaction).await
		}
		FanOutKind::IdentityCreated => ctx
			.timeline_repo
			.create_event(TimelineEvent {
				id: Id::new(relaystate_types::snowflake::EntityTag::TimelineEvent),
				owner: recipient.id,
				kind: TimelineEventKind::IdentityCreated,
				subject_post: None,
				subject_post_interaction: None,
				subject_identity: fan_out.subject_identity,
				created: Timestamp::now(),
				fields: relaystate_types::types::StatorFields::initial("created"),
			})
			.await,
		FanOutKind::IdentityEdited | FanOutKind::IdentityDeleted | FanOutKind::IdentityMoved => Ok(()),
	}
}

async fn deliver_remotely<C: ConfigStore>(
	ctx: &FederationCtx<C>,
	fan_out: &FanOut,
	recipient: &Identity,
) -> ClResult<()> {
	let activity = match fan_out.kind {
		FanOutKind::Post | FanOutKind::PostEdited => {
			let Some(post_id) = fan_out.subject_post else { return Ok(()) };
			let Some(post) = ctx.post_repo.get(post_id).await? else { return Ok(()) };
			let activity_type = if fan_out.kind == FanOutKind::Post { "Create" } else { "Update" };
			json!({
				"@context": "https://www.w3.org/ns/activitystreams",
				"type": activity_type,
				"actor": actor_uri(ctx, post.author).await?,
				"object": { "type": "Note", "id": post.object_uri, "content": post.content },
			})
		}
		FanOutKind::PostDeleted => {
			let Some(post_id) = fan_out.subject_post else { return Ok(()) };
			let Some(post) = ctx.post_repo.get(post_id).await? else { return Ok(()) };
			json!({
				"@context": "https://www.w3.org/ns/activitystreams",
				"type": "Delete",
				"actor": actor_uri(ctx, post.author).await?,
				"object": { "type": "Tombstone", "id": post.object_uri },
			})
		}
		FanOutKind::IdentityEdited | FanOutKind::IdentityDeleted => {
			let Some(subject) = fan_out.subject_identity else { return Ok(()) };
			let Some(identity) = ctx.identity_repo.get(subject).await? else { return Ok(()) };
			let activity_type = if fan_out.kind == FanOutKind::IdentityEdited { "Update" } else { "Delete" };
			json!({
				"@context": "https://www.w3.org/ns/activitystreams",
				"type": activity_type,
				"actor": identity.actor_uri,
				"object": identity.actor_uri,
			})
		}
		FanOutKind::Interaction | FanOutKind::UndoInteraction => {
			let Some(interaction_id) = fan_out.subject_post_interaction else { return Ok(()) };
			let Some(interaction) = ctx.interaction_repo.get(interaction_id).await? else { return Ok(()) };
			let Some(post_id) = fan_out.subject_post else { return Ok(()) };
			let Some(post) = ctx.post_repo.get(post_id).await? else { return Ok(()) };
			let actor = actor_uri(ctx, interaction.identity).await?;
			let inner = interaction_activity(&actor, &post, &interaction);
			if fan_out.kind == FanOutKind::Interaction {
				inner
			} else if interaction.kind == InteractionKind::Pin {
				json!({
					"@context": AS2_CONTEXT,
					"type": "Remove",
					"actor": actor,
					"object": inner.get("object").cloned().unwrap_or(Value::Null),
					"target": inner.get("target").cloned().unwrap_or(Value::Null),
				})
			} else {
				json!({ "@context": AS2_CONTEXT, "type": "Undo", "actor": actor, "object": inner })
			}
		}
		FanOutKind::IdentityCreated | FanOutKind::IdentityMoved => {
			return Ok(());
		}
	};

	let canonical = canon::canonicalize_value(&activity);
	let body = serde_json::to_vec(&canonical)
		.map_err(|e| Error::ActivityPubFormat(format!("activity serialisation failed: {e}")))?;
	let target = recipient.shared_inbox_uri.as_deref().unwrap_or(&recipient.inbox_uri);
	let (status, _body) = ctx
		.http_client
		.signed_post(target, &body, &ctx.system_actor.public_key_id, &ctx.system_actor.keys)
		.await?;
	if let Some(err) = http_client::classify_status(status) {
		return Err(err);
	}
	Ok(())
}

async fn actor_uri<C: ConfigStore>(ctx: &FederationCtx<C>, author: Id) -> ClResult<String> {
	ctx.identity_repo
		.get(author)
		.await?
		.map(|identity| identity.actor_uri)
		.ok_or_else(|| Error::ActivityPubFormat(format!("unknown post author {author:?}")))
}

/// The "forward" activity a `(interaction, false)` FanOut delivers (spec.md
/// §4.3's dispatch table row); `(undo_interaction, false)` wraps this in
/// `Undo` (or, for a pin, sends `Remove` against the same object/target
/// instead, since AS2 has no `Undo{Add}`).
fn interaction_activity(actor: &str, post: &Post, interaction: &PostInteraction) -> Value {
	match interaction.kind {
		InteractionKind::Like => json!({
			"@context": AS2_CONTEXT, "type": "Like", "actor": actor, "object": post.object_uri,
		}),
		InteractionKind::Boost => json!({
			"@context": AS2_CONTEXT, "type": "Announce", "actor": actor, "object": post.object_uri,
		}),
		InteractionKind::Vote => json!({
			"@context": AS2_CONTEXT,
			"type": "Create",
			"actor": actor,
			"object": { "type": "Note", "name": interaction.value, "inReplyTo": post.object_uri },
		}),
		InteractionKind::Pin => json!({
			"@context": AS2_CONTEXT, "type": "Add", "actor": actor, "object": post.object_uri,
		}),
	}
}

/// The `new` state's handler for a locally authored `Post`: enumerates the
/// recipient set (spec.md §4.3's recipient computation) and writes one
/// `FanOut` row per recipient. Remote-originated posts are upserted straight
/// into `fanned_out` by `inbox::dispatch_create` and never reach this
/// handler.
pub struct PostHandler;

#[async_trait]
impl<C: ConfigStore + Send + Sync + 'static> StateHandler<FederationCtx<C>, Post> for PostHandler {
	async fn handle(&self, ctx: &FederationCtx<C>, post: &Post) -> ClResult<Option<&'static str>> {
		let mut mentioned = Vec::with_capacity(post.mentions.len());
		for id in &post.mentions {
			if let Some(identity) = ctx.identity_repo.get(*id).await? {
				mentioned.push(identity);
			}
		}
		let followers = ctx.identity_repo.active_followers(post.author).await?;
		let in_reply_to_author = match &post.in_reply_to {
			Some(uri) => match ctx.post_repo.find_by_object_uri(uri).await? {
				Some(parent) => ctx.identity_repo.get(parent.author).await?,
				None => None,
			},
			None => None,
		};
		let blockers = ctx.block_repo.blockers_of(post.author).await?;
		let recipients =
			compute_recipients(&mentioned, post.visibility, &followers, in_reply_to_author.as_ref(), &blockers);

		let now = Timestamp::now();
		let fan_outs = recipients
			.into_iter()
			.map(|recipient| FanOut {
				id: Id::new(relaystate_types::snowflake::EntityTag::Other),
				identity: recipient.id,
				kind: FanOutKind::Post,
				subject_post: Some(post.id),
				subject_post_interaction: None,
				subject_identity: None,
				created: now,
				fields: relaystate_types::types::StatorFields::initial("new"),
			})
			.collect();
		ctx.fan_out_repo.create_batch(fan_outs).await?;
		Ok(Some("fanned_out"))
	}
}

/// `PostInteraction::new`'s handler (spec.md §4.3: "interaction new" is one
/// of the states whose handler fans out for a *local* entity). A locally
/// authored interaction notifies the post's author (and, for boosts, the
/// acting identity's own followers); an interaction ingested from a remote
/// actor (`inbox::dispatch_interaction` upserts those directly into `new`
/// too) only ever needs to notify a local post author, with no outbound
/// network delivery of its own.
pub struct InteractionHandler;

#[async_trait]
impl<C: ConfigStore + Send + Sync + 'static> StateHandler<FederationCtx<C>, PostInteraction> for InteractionHandler {
	async fn handle(&self, ctx: &FederationCtx<C>, interaction: &PostInteraction) -> ClResult<Option<&'static str>> {
		let Some(actor) = ctx.identity_repo.get(interaction.identity).await? else {
			return Ok(Some("fanned_out"));
		};
		let Some(post) = ctx.post_repo.get(interaction.post).await? else {
			return Ok(Some("fanned_out"));
		};

		let mut recipients = Vec::new();
		if let Some(author) = ctx.identity_repo.get(post.author).await? {
			if author.id != actor.id {
				recipients.push(author);
			}
		}
		if actor.local && interaction.kind == InteractionKind::Boost {
			recipients.extend(ctx.identity_repo.active_followers(actor.id).await?);
		}

		let now = Timestamp::now();
		let fan_outs = recipients
			.into_iter()
			.map(|recipient| FanOut {
				id: Id::new(relaystate_types::snowflake::EntityTag::Other),
				identity: recipient.id,
				kind: FanOutKind::Interaction,
				subject_post: Some(post.id),
				subject_post_interaction: Some(interaction.id),
				subject_identity: None,
				created: now,
				fields: relaystate_types::types::StatorFields::initial("new"),
			})
			.collect();
		ctx.fan_out_repo.create_batch(fan_outs).await?;
		Ok(Some("fanned_out"))
	}
}

/// `PostInteraction::undone`'s handler: the inverse fan-out, one
/// `undo_interaction` `FanOut` row per identity that received the original
/// `interaction` delivery.
pub struct UndoInteractionHandler;

#[async_trait]
impl<C: ConfigStore + Send + Sync + 'static> StateHandler<FederationCtx<C>, PostInteraction>
	for UndoInteractionHandler
{
	async fn handle(&self, ctx: &FederationCtx<C>, interaction: &PostInteraction) -> ClResult<Option<&'static str>> {
		let Some(actor) = ctx.identity_repo.get(interaction.identity).await? else {
			return Ok(Some("undone_fanned_out"));
		};
		let Some(post) = ctx.post_repo.get(interaction.post).await? else {
			return Ok(Some("undone_fanned_out"));
		};

		let mut recipients = Vec::new();
		if let Some(author) = ctx.identity_repo.get(post.author).await? {
			if author.id != actor.id {
				recipients.push(author);
			}
		}
		if actor.local && interaction.kind == InteractionKind::Boost {
			recipients.extend(ctx.identity_repo.active_followers(actor.id).await?);
		}

		let now = Timestamp::now();
		let fan_outs = recipients
			.into_iter()
			.map(|recipient| FanOut {
				id: Id::new(relaystate_types::snowflake::EntityTag::Other),
				identity: recipient.id,
				kind: FanOutKind::UndoInteraction,
				subject_post: Some(post.id),
				subject_post_interaction: Some(interaction.id),
				subject_identity: None,
				created: now,
				fields: relaystate_types::types::StatorFields::initial("new"),
			})
			.collect();
		ctx.fan_out_repo.create_batch(fan_outs).await?;
		Ok(Some("undone_fanned_out"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use relaystate_types::types::StatorFields;

	fn identity(id: u64, local: bool, shared_inbox: Option<&str>) -> Identity {
		Identity {
			id: Id(id),
			local,
			username: format!("user{id}"),
			domain: Id(1),
			actor_uri: format!("https://example.social/users/user{id}"),
			display_name: String::new(),
			summary: None,
			icon_uri: None,
			image_uri: None,
			inbox_uri: format!("https://remote.example/users/user{id}/inbox"),
			shared_inbox_uri: shared_inbox.map(ToString::to_string),
			outbox_uri: String::new(),
			followers_uri: String::new(),
			following_uri: String::new(),
			featured_collection_uri: String::new(),
			public_key_pem: String::new(),
			private_key_pem: None,
			public_key_id: String::new(),
			restriction: crate::entities::identity::Restriction::None,
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

	#[test]
	fn dedupes_non_local_followers_sharing_one_inbox() {
		let followers = vec![
			identity(1, false, Some("https://remote.example/inbox")),
			identity(2, false, Some("https://remote.example/inbox")),
			identity(3, true, None),
		];
		let recipients = compute_recipients(&[], Visibility::Public, &followers, None, &HashSet::new());
		assert_eq!(recipients.len(), 2);
	}

	#[test]
	fn local_only_excludes_remote_followers() {
		let followers = vec![identity(1, false, None), identity(2, true, None)];
		let recipients =
			compute_recipients(&[], Visibility::LocalOnly, &followers, None, &HashSet::new());
		assert_eq!(recipients.len(), 1);
		assert!(recipients[0].local);
	}

	#[test]
	fn mentioned_visibility_excludes_followers_entirely() {
		let mentioned = vec![identity(1, true, None)];
		let followers = vec![identity(2, true, None)];
		let recipients =
			compute_recipients(&mentioned, Visibility::Mentioned, &followers, None, &HashSet::new());
		assert_eq!(recipients.len(), 1);
		assert_eq!(recipients[0].id, Id(1));
	}

	#[test]
	fn blockers_of_the_author_are_excluded() {
		let followers = vec![identity(1, true, None), identity(2, true, None)];
		let mut blockers = HashSet::new();
		blockers.insert(Id(1));
		let recipients = compute_recipients(&[], Visibility::Public, &followers, None, &blockers);
		assert_eq!(recipients.len(), 1);
		assert_eq!(recipients[0].id, Id(2));
	}
}
