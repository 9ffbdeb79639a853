//! The inbox receive contract (spec.md §4.2 steps 1-8) and the `received`
//! state's dispatch table.
//!
//! The HTTP-layer steps (parse, canonicalise, blocked-identity
//! short-circuit, signature verification, persistence as `received`) run in
//! the axum handler before any `InboxMessage` row exists, so this module
//! exposes them as free functions the server crate's route handler calls in
//! order; only the dispatch table (step 9, "Dispatch (handler)") is a
//! [`relaystate_stator::runner::StateHandler`], since that is the part that
//! runs against an already-persisted row.

use async_trait::async_trait;
use serde_json::Value;

use relaystate_crypto::canon;
use relaystate_crypto::http_signature::{self, SignatureOptions};
use relaystate_stator::runner::StateHandler;
use relaystate_types::error::{ClResult, Error};
use relaystate_types::snowflake::{EntityTag, Id};
use relaystate_types::store::ConfigStore;
use relaystate_types::types::{StatorFields, Timestamp};

use crate::ap::{Activity, ActivityType, ObjectRef, ObjectType};
use crate::ctx::FederationCtx;
use crate::entities::domain::Domain;
use crate::entities::emoji::Emoji;
use crate::entities::follow::Follow;
use crate::entities::identity::{Identity, MetadataField, Restriction};
use crate::entities::inbox_message::InboxMessage;
use crate::entities::interaction::{InteractionKind, PostInteraction};
use crate::entities::post::{Post, PostType, Visibility};
use crate::entities::report::Report;

/// Step 1: JSON-LD expand+compact against the built-in AS2+security
/// context.
#[must_use]
pub fn canonicalize(body: &Value) -> Value {
	canon::canonicalize_value(body)
}

/// Step 2: resolve the signing actor to an existing `Identity` row, or
/// provision a transient stub (state `new`, almost every field empty) the
/// `Identity::new` handler fetches and fills in on its first attempt — the
/// same "auto-provision on first sighting" shape `resolve_emojis` uses for
/// remote emoji. Also records the actor's hostname as a `Domain` row on
/// first sighting, since `is_blocked` (step 3) and the moderation UI key off
/// that table.
pub async fn resolve_or_create_identity<C: ConfigStore>(
	ctx: &FederationCtx<C>,
	actor_uri: &str,
) -> ClResult<Identity> {
	if let Some(identity) = ctx.identity_repo.find_by_actor_uri(actor_uri).await? {
		return Ok(identity);
	}

	let hostname = actor_hostname(actor_uri)?;
	if ctx.domain_repo.find_by_hostname(&hostname).await?.is_none() {
		ctx.domain_repo
			.upsert(Domain {
				id: Id::new(EntityTag::Other),
				domain: hostname.clone(),
				service_domain: None,
				local: false,
				blocked: false,
				public: true,
				nodeinfo: None,
				first_seen: Timestamp::now(),
			})
			.await?;
	}
	let domain =
		ctx.domain_repo.find_by_hostname(&hostname).await?.ok_or_else(|| Error::Internal("domain upsert lost".into()))?;

	let identity = Identity {
		id: Id::new(EntityTag::Identity),
		local: false,
		username: String::new(),
		domain: domain.id,
		actor_uri: actor_uri.to_string(),
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
		restriction: Restriction::None,
		discoverable: false,
		manually_approves_followers: false,
		pinned_post_uris: vec![],
		metadata: vec![],
		fetched: None,
		deleted: None,
		created: Timestamp::now(),
		fields: StatorFields::initial("new"),
	};
	ctx.identity_repo.upsert(identity.clone()).await?;
	Ok(identity)
}

/// Step 3: the actor's identity carries a moderation `Restriction::Blocked`,
/// or its domain is recursively blocked.
pub async fn is_blocked<C: ConfigStore>(
	ctx: &FederationCtx<C>,
	actor_uri: &str,
) -> ClResult<bool> {
	let hostname = actor_hostname(actor_uri)?;
	if ctx.domain_repo.is_recursively_blocked(&hostname).await? {
		return Ok(true);
	}
	let Some(identity) = ctx.identity_repo.find_by_actor_uri(actor_uri).await? else {
		return Ok(false);
	};
	Ok(identity.restriction == crate::entities::identity::Restriction::Blocked)
}

fn actor_hostname(actor_uri: &str) -> ClResult<String> {
	let without_scheme = actor_uri
		.split_once("://")
		.map(|(_, rest)| rest)
		.ok_or_else(|| Error::ActivityPubFormat(format!("actor uri missing scheme: {actor_uri}")))?;
	let host = without_scheme.split('/').next().unwrap_or(without_scheme);
	Ok(host.split(':').next().unwrap_or(host).to_string())
}

/// Step 5: verify the HTTP Signature if the signer's key is already known.
/// An unknown key is accepted unsigned for now (spec.md §4.2: "the handler
/// will fetch the actor").
pub fn verify_http_signature(
	header_lookup: impl Fn(&str) -> Option<String>,
	body: &[u8],
	known_public_key_pem: Option<&str>,
) -> ClResult<()> {
	let Some(public_key_pem) = known_public_key_pem else {
		return Ok(());
	};
	http_signature::verify_request(header_lookup, body, public_key_pem, SignatureOptions::default())
}

/// Step 6: verify an embedded LD Signature if present and the creator's key
/// is known; an unverifiable or mismatched signature is stripped but the
/// message is still accepted (it may be relayed), never rejected outright.
#[must_use]
pub fn strip_unverifiable_ld_signature(mut body: Value, known_public_key_pem: Option<&str>) -> Value {
	let Some(public_key_pem) = known_public_key_pem else {
		return body;
	};
	if body.get("signature").is_none() {
		return body;
	}
	if relaystate_crypto::ld_signature::verify(&body, public_key_pem).is_err() {
		if let Some(obj) = body.as_object_mut() {
			obj.remove("signature");
		}
	}
	body
}

/// Step 7: reject reserved-internal activity types before persisting.
pub fn reject_reserved(body: &Value) -> ClResult<()> {
	Activity::from_canonical(body).map(|_| ())
}

/// The `received` state's handler: dispatches on `(type, object.type)` per
/// spec.md §4.2's table. Concrete per-case persistence (upserting a `Post`,
/// matching a `Follow` row, etc.) is delegated to the repo traits in
/// [`crate::repo`]; this function only decides which case applies and which
/// terminal state the message lands in.
///
/// Unknown activity types, and any `Error::ActivityPubFormat`/`ActorMismatch`
/// from a sub-handler, land the message in `errored` rather than bubbling —
/// spec.md §4.2's "On any `ActivityPubError` ... the message goes to
/// `errored`; all other exceptions bubble for retry."
pub struct ReceivedHandler;

#[async_trait]
impl<C: ConfigStore + Send + Sync + 'static> StateHandler<FederationCtx<C>, InboxMessage> for ReceivedHandler {
	async fn handle(
		&self,
		ctx: &FederationCtx<C>,
		message: &InboxMessage,
	) -> ClResult<Option<&'static str>> {
		let activity = match Activity::from_canonical(&message.body) {
			Ok(activity) => activity,
			Err(Error::ActivityPubFormat(_) | Error::ActorMismatch(_)) => return Ok(Some("errored")),
			Err(err) => return Err(err),
		};

		if activity.is_known_ignorable() {
			return Ok(Some("processed"));
		}

		let object_type = activity.object.as_ref().and_then(crate::ap::ObjectRef::object_type);

		let outcome = match (activity.activity_type, object_type) {
			(ActivityType::Follow, _) => dispatch_follow(ctx, &activity).await,
			(ActivityType::Accept, Some(ObjectType::Unknown) | None) => {
				dispatch_follow_response(ctx, &activity, "accepted").await
			}
			(ActivityType::Reject, Some(ObjectType::Unknown) | None) => {
				dispatch_follow_response(ctx, &activity, "rejected").await
			}
			(ActivityType::Undo, _) => dispatch_undo(ctx, &activity).await,
			(ActivityType::Create, Some(ObjectType::Note | ObjectType::Question | ObjectType::Article)) => {
				dispatch_create(ctx, &activity).await
			}
			(ActivityType::Update, _) => dispatch_update(ctx, &activity).await,
			(ActivityType::Delete, _) => dispatch_delete(ctx, &activity).await,
			(ActivityType::Like, _) | (ActivityType::Announce, _) => dispatch_interaction(ctx, &activity).await,
			(ActivityType::Add, _) | (ActivityType::Remove, _) => dispatch_pin(ctx, &activity).await,
			(ActivityType::Flag, _) => dispatch_flag(ctx, &activity).await,
			(ActivityType::Move, _) => dispatch_move(ctx, &activity).await,
			(ActivityType::Block, _) => Ok(()),
			(ActivityType::Unknown, _) => Err(Error::ActivityPubFormat(format!(
				"unrecognised activity type for {}",
				activity.id.as_deref().unwrap_or("<no id>")
			))),
		};

		match outcome {
			Ok(()) => Ok(Some("processed")),
			Err(Error::ActivityPubFormat(_) | Error::ActorMismatch(_)) => Ok(Some("errored")),
			Err(err) => Err(err),
		}
	}
}

/// `Follow ->` create a pending `Follow` row in `remote_requested` (spec.md
/// §4.2's dispatch table). Re-deliveries of the same activity (matched by its
/// own `id`) and an already-existing edge for the same pair are both no-ops.
async fn dispatch_follow<C: ConfigStore>(ctx: &FederationCtx<C>, activity: &Activity) -> ClResult<()> {
	let object_uri = activity
		.object
		.as_ref()
		.and_then(ObjectRef::uri)
		.ok_or_else(|| Error::ActivityPubFormat("Follow activity missing object".into()))?;
	let source = actor_or_format_error(ctx, &activity.actor_uri).await?;
	let target = ctx
		.identity_repo
		.find_by_actor_uri(object_uri)
		.await?
		.ok_or_else(|| Error::ActivityPubFormat(format!("follow target {object_uri} is not known here")))?;

	if let Some(activity_id) = &activity.id {
		if ctx.follow_repo.find_by_uri(activity_id).await?.is_some() {
			return Ok(());
		}
	}
	if ctx.follow_repo.find_by_pair(source.id, target.id).await?.is_some() {
		return Ok(());
	}

	let follow = Follow {
		id: Id::new(EntityTag::Follow),
		source: source.id,
		target: target.id,
		uri: activity.id.clone(),
		boosts: true,
		created: Timestamp::now(),
		fields: StatorFields::initial("remote_requested"),
	};
	ctx.follow_repo.upsert(follow).await
}

/// `Accept{Follow} ->` mark the matching `Follow` `accepted`; `Reject{Follow}
/// ->` mark it `rejected`. The object names the original `Follow` activity by
/// URI; an unresolvable object is silently accepted (spec.md §8's "unknown
/// object" boundary behaviour), not an error.
async fn dispatch_follow_response<C: ConfigStore>(
	ctx: &FederationCtx<C>,
	activity: &Activity,
	next_state: &'static str,
) -> ClResult<()> {
	let Some(object_uri) = activity.object.as_ref().and_then(ObjectRef::uri) else {
		return Ok(());
	};
	let Some(mut follow) = ctx.follow_repo.find_by_uri(object_uri).await? else {
		return Ok(());
	};
	let responder = actor_or_format_error(ctx, &activity.actor_uri).await?;
	if responder.id != follow.target {
		return Err(Error::ActorMismatch(format!(
			"{} is not the target of follow {object_uri}",
			activity.actor_uri
		)));
	}
	follow.fields = StatorFields::initial(next_state);
	ctx.follow_repo.upsert(follow).await
}

/// `Undo{Follow | Block} ->` delete the matching edge outright (neither has
/// any further life after an Undo). `Undo{Like | Announce} ->` drive the
/// matching `PostInteraction` through its own `undone` state instead of
/// deleting it (spec.md §8 scenario 5): the `undone` handler is what fans
/// out the inverse delivery and purges the interaction's TimelineEvents
/// (`fanout.rs`'s `UndoInteractionHandler` / `delete_events_for_interaction`),
/// so this just arms that transition and lets the engine's post-handler
/// UPDATE commit it. `Block` rows carry no activity URI of their own
/// (spec.md §3's shape has no `uri` field), so an unresolvable `Undo{Block}`
/// is accepted without effect, same as any other unmatched-object case here.
async fn dispatch_undo<C: ConfigStore>(ctx: &FederationCtx<C>, activity: &Activity) -> ClResult<()> {
	let Some(object_uri) = activity.object.as_ref().and_then(ObjectRef::uri) else {
		return Ok(());
	};
	if let Some(follow) = ctx.follow_repo.find_by_uri(object_uri).await? {
		return ctx.follow_repo.delete(follow.id).await;
	}
	if let Some(mut interaction) = ctx.interaction_repo.find_by_object_uri(object_uri).await? {
		interaction.fields = StatorFields::initial("undone");
		return ctx.interaction_repo.upsert(interaction).await;
	}
	Ok(())
}

/// `Create{Note | Question | Article} ->` upsert the `Post`; for a reply,
/// additionally create a `TimelineEvent` for every local identity actively
/// following the author (spec.md §4.2's narrower reply-notification rule —
/// full recipient fan-out only applies to locally authored posts, see
/// `fanout.rs`). A `Create{Note}` replying to a local `Question` with a
/// `name` is a vote, not a reply post, and is diverted to
/// [`dispatch_vote`] before a `Post` row is ever considered (spec.md §8
/// scenario 6).
async fn dispatch_create<C: ConfigStore>(ctx: &FederationCtx<C>, activity: &Activity) -> ClResult<()> {
	let Some(ObjectRef::Embedded(object)) = &activity.object else {
		return Err(Error::ActivityPubFormat("Create activity missing embedded object".into()));
	};
	let object_uri = object
		.get("id")
		.and_then(Value::as_str)
		.ok_or_else(|| Error::ActivityPubFormat("Create object missing id".into()))?;

	let author_uri = object.get("attributedTo").and_then(Value::as_str).unwrap_or(&activity.actor_uri);
	if author_uri != activity.actor_uri {
		return Err(Error::ActorMismatch(format!(
			"attributedTo {author_uri} does not match Create actor {}",
			activity.actor_uri
		)));
	}
	let author = actor_or_format_error(ctx, author_uri).await?;

	let in_reply_to = object.get("inReplyTo").and_then(Value::as_str).map(ToString::to_string);

	if object.get("type").and_then(Value::as_str) == Some("Note") {
		if let (Some(option), Some(reply_uri)) = (object.get("name").and_then(Value::as_str), in_reply_to.as_deref())
		{
			if let Some(question) = ctx.post_repo.find_by_object_uri(reply_uri).await? {
				if question.kind == PostType::Question && question.local {
					return dispatch_vote(ctx, &author, &question, option, object_uri).await;
				}
			}
		}
	}

	let kind = post_type(object)?;

	if ctx.post_repo.find_by_object_uri(object_uri).await?.is_some() {
		return Ok(());
	}

	let mentions = resolve_mentions(ctx, object).await?;
	let emojis = resolve_emojis(ctx, object).await?;
	let hashtags = resolve_hashtags(ctx, object).await?;

	let post = Post {
		id: Id::new(EntityTag::Post),
		author: author.id,
		local: false,
		object_uri: object_uri.to_string(),
		visibility: infer_visibility(&activity.to, &activity.cc),
		content: object.get("content").and_then(Value::as_str).unwrap_or_default().to_string(),
		summary: object.get("summary").and_then(Value::as_str).map(ToString::to_string),
		sensitive: object.get("sensitive").and_then(Value::as_bool).unwrap_or(false),
		url: object.get("url").and_then(Value::as_str).map(ToString::to_string),
		in_reply_to: in_reply_to.clone(),
		to: vec![],
		mentions,
		emojis,
		hashtags,
		attachments: vec![],
		kind,
		type_data: object.clone(),
		published: parse_published(object),
		edited: None,
		fields: StatorFields::initial("fanned_out"),
	};
	ctx.post_repo.upsert(post.clone()).await?;

	if in_reply_to.is_some() {
		for follower in ctx.identity_repo.active_followers(author.id).await?.into_iter().filter(|f| f.local) {
			let event = crate::entities::timeline_event::TimelineEvent {
				id: Id::new(EntityTag::Other),
				owner: follower.id,
				kind: crate::entities::timeline_event::TimelineEventKind::Post,
				subject_post: Some(post.id),
				subject_post_interaction: None,
				subject_identity: None,
				created: Timestamp::now(),
				fields: StatorFields::initial("created"),
			};
			ctx.timeline_repo.create_event(event).await?;
		}
	}
	Ok(())
}

/// A vote cast into a local `Question`: rejected with a permanent format
/// error (no interaction created, `InboxMessage` lands in `errored`) once
/// `question.poll_closed`; otherwise upserted as a `Vote` `PostInteraction`,
/// idempotent on the vote `Note`'s own id in case the remote retries
/// delivery (spec.md §9's "(object id, actor)" dedup key).
async fn dispatch_vote<C: ConfigStore>(
	ctx: &FederationCtx<C>,
	voter: &Identity,
	question: &Post,
	option: &str,
	vote_object_uri: &str,
) -> ClResult<()> {
	if question.poll_closed(Timestamp::now()) {
		return Err(Error::ActivityPubFormat(format!(
			"poll {} is closed, rejecting vote from {}",
			question.object_uri, voter.actor_uri
		)));
	}
	if ctx.interaction_repo.find_by_object_uri(vote_object_uri).await?.is_some() {
		return Ok(());
	}
	let interaction = PostInteraction {
		id: Id::new(EntityTag::Interaction),
		kind: InteractionKind::Vote,
		identity: voter.id,
		post: question.id,
		value: Some(option.to_string()),
		object_uri: Some(vote_object_uri.to_string()),
		published: Timestamp::now(),
		fields: StatorFields::initial("new"),
	};
	ctx.interaction_repo.upsert(interaction).await
}

/// `Update{Note | Question | actor-type} ->` patch the matching `Post`'s
/// content fields, or move the matching `Identity` to `edited` so its
/// `try_interval` handler re-fetches the full actor document (spec.md §4.2).
async fn dispatch_update<C: ConfigStore>(ctx: &FederationCtx<C>, activity: &Activity) -> ClResult<()> {
	let object_type = activity.object.as_ref().and_then(ObjectRef::object_type);
	if object_type.is_some_and(ObjectType::is_actor) {
		let mut identity = actor_or_format_error(ctx, &activity.actor_uri).await?;
		identity.fields = StatorFields::initial("edited");
		return ctx.identity_repo.upsert(identity).await;
	}

	let Some(ObjectRef::Embedded(object)) = &activity.object else {
		return Err(Error::ActivityPubFormat("Update activity missing embedded object".into()));
	};
	let object_uri = object
		.get("id")
		.and_then(Value::as_str)
		.ok_or_else(|| Error::ActivityPubFormat("Update object missing id".into()))?;
	let Some(mut post) = ctx.post_repo.find_by_object_uri(object_uri).await? else {
		return Ok(());
	};
	let actor = actor_or_format_error(ctx, &activity.actor_uri).await?;
	if actor.id != post.author {
		return Err(Error::ActorMismatch(format!("{} does not own post {object_uri}", activity.actor_uri)));
	}

	if let Some(content) = object.get("content").and_then(Value::as_str) {
		post.content = content.to_string();
	}
	if let Some(summary) = object.get("summary").and_then(Value::as_str) {
		post.summary = Some(summary.to_string());
	}
	if let Some(sensitive) = object.get("sensitive").and_then(Value::as_bool) {
		post.sensitive = sensitive;
	}
	post.type_data = object.clone();
	post.edited = Some(Timestamp::now());
	ctx.post_repo.upsert(post).await
}

/// `Delete{Note | Tombstone | actor-uri} ->` delete the matching `Post`, or,
/// when the object is the actor's own URI (self-deletion), mark the
/// `Identity` `deleted`. An unknown object is silently accepted (spec.md §8's
/// boundary behaviour), but an object that resolves locally to a *different*
/// author is rejected as `ActorMismatch`.
async fn dispatch_delete<C: ConfigStore>(ctx: &FederationCtx<C>, activity: &Activity) -> ClResult<()> {
	let Some(object_uri) = activity.object.as_ref().and_then(ObjectRef::uri) else {
		return Ok(());
	};
	let actor = actor_or_format_error(ctx, &activity.actor_uri).await?;

	if object_uri == actor.actor_uri {
		let mut actor = actor;
		actor.deleted = Some(Timestamp::now());
		actor.fields = StatorFields::initial("deleted");
		return ctx.identity_repo.upsert(actor).await;
	}

	let Some(post) = ctx.post_repo.find_by_object_uri(object_uri).await? else {
		return Ok(());
	};
	if post.author != actor.id {
		return Err(Error::ActorMismatch(format!("{} does not own post {object_uri}", activity.actor_uri)));
	}
	ctx.post_repo.delete(post.id).await
}

/// `Like / Announce ->` upsert a `PostInteraction`. A second delivery of the
/// same `(identity, post, kind)` is idempotent (spec.md §3's uniqueness
/// invariant); an object that names a post we don't have is accepted with no
/// effect.
async fn dispatch_interaction<C: ConfigStore>(ctx: &FederationCtx<C>, activity: &Activity) -> ClResult<()> {
	let kind = match activity.activity_type {
		ActivityType::Like => InteractionKind::Like,
		ActivityType::Announce => InteractionKind::Boost,
		other => return Err(Error::ActivityPubFormat(format!("{other:?} is not an interaction activity"))),
	};
	let Some(object_uri) = activity.object.as_ref().and_then(ObjectRef::uri) else {
		return Err(Error::ActivityPubFormat("interaction activity missing object".into()));
	};
	let identity = actor_or_format_error(ctx, &activity.actor_uri).await?;
	let Some(post) = ctx.post_repo.find_by_object_uri(object_uri).await? else {
		return Ok(());
	};
	if ctx.interaction_repo.find_active(identity.id, post.id, kind).await?.is_some() {
		return Ok(());
	}
	let interaction = PostInteraction {
		id: Id::new(EntityTag::Interaction),
		kind,
		identity: identity.id,
		post: post.id,
		value: None,
		object_uri: activity.id.clone(),
		published: Timestamp::now(),
		fields: StatorFields::initial("new"),
	};
	ctx.interaction_repo.upsert(interaction).await
}

/// `Add / Remove ->` pin or unpin, but only when `target` names the actor's
/// own featured collection (spec.md §4.2's parenthetical); anything else is
/// silently ignored, since it isn't a pin operation at all from this
/// server's point of view.
async fn dispatch_pin<C: ConfigStore>(ctx: &FederationCtx<C>, activity: &Activity) -> ClResult<()> {
	let mut actor = actor_or_format_error(ctx, &activity.actor_uri).await?;
	let target = activity.raw.get("target").and_then(Value::as_str);
	if target != Some(actor.featured_collection_uri.as_str()) {
		return Ok(());
	}
	let object_uri = activity
		.object
		.as_ref()
		.and_then(ObjectRef::uri)
		.ok_or_else(|| Error::ActivityPubFormat("Add/Remove activity missing object".into()))?;

	match activity.activity_type {
		ActivityType::Add => {
			if !actor.pinned_post_uris.iter().any(|uri| uri == object_uri) {
				actor.pinned_post_uris.push(object_uri.to_string());
			}
		}
		ActivityType::Remove => actor.pinned_post_uris.retain(|uri| uri != object_uri),
		other => return Err(Error::ActivityPubFormat(format!("{other:?} is not a pin activity"))),
	}
	ctx.identity_repo.upsert(actor).await
}

/// `Flag ->` create a `Report` row. The AS2 `Flag` shape puts every reported
/// object (accused actor, optionally specific posts) in `object` as an array
/// of URIs rather than the single string/embedded-dict shape [`Activity`]
/// parses generically, so this reads `activity.raw` directly. A report whose
/// objects resolve to nothing we know locally is dropped rather than filed,
/// since `Report::subject_identity` is not optional.
async fn dispatch_flag<C: ConfigStore>(ctx: &FederationCtx<C>, activity: &Activity) -> ClResult<()> {
	let objects: Vec<String> = match activity.raw.get("object") {
		Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(ToString::to_string).collect(),
		Some(Value::String(single)) => vec![single.clone()],
		_ => vec![],
	};

	let mut subject_identity = None;
	let mut subject_post = None;
	for uri in &objects {
		if subject_post.is_none() {
			if let Some(post) = ctx.post_repo.find_by_object_uri(uri).await? {
				subject_post = Some(post.id);
				subject_identity.get_or_insert(post.author);
				continue;
			}
		}
		if subject_identity.is_none() {
			if let Some(identity) = ctx.identity_repo.find_by_actor_uri(uri).await? {
				subject_identity = Some(identity.id);
			}
		}
	}
	let Some(subject_identity) = subject_identity else {
		return Ok(());
	};

	let source = ctx.identity_repo.find_by_actor_uri(&activity.actor_uri).await?.map(|identity| identity.id);
	let report = Report {
		id: Id::new(EntityTag::Report),
		source,
		subject_identity,
		subject_post,
		complaint: activity.raw.get("content").and_then(Value::as_str).unwrap_or_default().to_string(),
		created: Timestamp::now(),
		forwarded: None,
		fields: StatorFields::initial("new"),
	};
	ctx.report_repo.create(report).await
}

/// `Move ->` mark the matching `Identity` `moved`, recording the successor
/// account URI (`target`) as a metadata field since spec.md §3's Identity
/// shape has no dedicated "moved to" column.
async fn dispatch_move<C: ConfigStore>(ctx: &FederationCtx<C>, activity: &Activity) -> ClResult<()> {
	let target = activity
		.raw
		.get("target")
		.and_then(Value::as_str)
		.ok_or_else(|| Error::ActivityPubFormat("Move activity missing target".into()))?;
	let mut identity = actor_or_format_error(ctx, &activity.actor_uri).await?;
	identity.metadata.retain(|field| field.name != "moved_to");
	identity.metadata.push(MetadataField { name: "moved_to".into(), value: target.to_string() });
	identity.fields = StatorFields::initial("moved");
	ctx.identity_repo.upsert(identity).await
}

async fn actor_or_format_error<C: ConfigStore>(
	ctx: &FederationCtx<C>,
	actor_uri: &str,
) -> ClResult<crate::entities::identity::Identity> {
	ctx.identity_repo
		.find_by_actor_uri(actor_uri)
		.await?
		.ok_or_else(|| Error::ActivityPubFormat(format!("unknown actor {actor_uri}")))
}

fn post_type(object: &Value) -> ClResult<PostType> {
	match object.get("type").and_then(Value::as_str).map(ObjectType::parse) {
		Some(ObjectType::Note) => Ok(PostType::Note),
		Some(ObjectType::Question) => Ok(PostType::Question),
		Some(ObjectType::Article) => Ok(PostType::Article),
		other => Err(Error::ActivityPubFormat(format!("unsupported post object type {other:?}"))),
	}
}

const PUBLIC_COLLECTION: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Mastodon-convention visibility inference from the activity's own `to`/`cc`
/// (spec.md §4.3's visibility model, read in reverse for inbound posts).
fn infer_visibility(to: &[String], cc: &[String]) -> Visibility {
	if to.iter().any(|uri| uri == PUBLIC_COLLECTION) {
		Visibility::Public
	} else if cc.iter().any(|uri| uri == PUBLIC_COLLECTION) {
		Visibility::Unlisted
	} else if to.iter().chain(cc).any(|uri| uri.ends_with("/followers")) {
		Visibility::Followers
	} else {
		Visibility::Mentioned
	}
}

fn parse_published(object: &Value) -> Timestamp {
	object
		.get("published")
		.and_then(Value::as_str)
		.and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
		.map(|dt| Timestamp(dt.timestamp_millis()))
		.unwrap_or_else(Timestamp::now)
}

async fn resolve_mentions<C: ConfigStore>(ctx: &FederationCtx<C>, object: &Value) -> ClResult<Vec<Id>> {
	let mut mentions = Vec::new();
	for uri in crate::ap::extract_mention_uris(object) {
		if let Some(identity) = ctx.identity_repo.find_by_actor_uri(&uri).await? {
			mentions.push(identity.id);
		}
	}
	Ok(mentions)
}

async fn resolve_emojis<C: ConfigStore>(ctx: &FederationCtx<C>, object: &Value) -> ClResult<Vec<Id>> {
	let mut emojis = Vec::new();
	for tag in crate::ap::extract_emoji_tags(object) {
		let emoji = match ctx.emoji_repo.find_by_remote_id(&tag.id).await? {
			Some(existing) => existing,
			None => {
				let emoji = Emoji {
					id: Id::new(EntityTag::Other),
					shortcode: tag.name,
					local: false,
					mimetype: tag.icon.media_type,
					remote_url: Some(tag.icon.url),
					local_path: None,
					visible_in_picker: false,
					created: Timestamp::now(),
					fields: StatorFields::initial("outdated"),
				};
				ctx.emoji_repo.upsert(emoji.clone()).await?;
				emoji
			}
		};
		emojis.push(emoji.id);
	}
	Ok(emojis)
}

/// Upserts or creates a `Hashtag` row per `#tag` on the object, bumping
/// `usage_count`/`last_used` and re-arming the `outdated` recount state on
/// every sighting (spec.md §3's `new → fetched, outdated → updated` shape —
/// an already-`fetched`/`updated` tag seeing new usage needs its counters
/// recomputed same as a brand-new one needs them computed for the first
/// time).
async fn resolve_hashtags<C: ConfigStore>(ctx: &FederationCtx<C>, object: &Value) -> ClResult<Vec<Id>> {
	let mut hashtags = Vec::new();
	for name in crate::ap::extract_hashtags(object) {
		let hashtag = match ctx.hashtag_repo.find_by_name(&name).await? {
			Some(mut existing) => {
				existing.usage_count += 1;
				existing.last_used = Timestamp::now();
				existing.fields = StatorFields::initial("outdated");
				existing
			}
			None => crate::entities::hashtag::Hashtag {
				id: Id::new(EntityTag::Other),
				name,
				usage_count: 1,
				last_used: Timestamp::now(),
				fields: StatorFields::initial("new"),
			},
		};
		ctx.hashtag_repo.upsert(hashtag.clone()).await?;
		hashtags.push(hashtag.id);
	}
	Ok(hashtags)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn hostname_extraction_strips_scheme_path_and_port() {
		assert_eq!(actor_hostname("https://remote.example:8443/users/bob").unwrap(), "remote.example");
		assert_eq!(actor_hostname("https://remote.example/users/bob").unwrap(), "remote.example");
	}

	#[test]
	fn hostname_extraction_rejects_schemeless_input() {
		assert!(actor_hostname("remote.example/users/bob").is_err());
	}

	#[test]
	fn reject_reserved_rejects_double_underscore_types() {
		let body = json!({"type": "__Internal", "actor": "https://remote.example/users/bob"});
		assert!(reject_reserved(&body).is_err());
	}

	#[test]
	fn unsigned_verification_passes_when_key_is_unknown() {
		let result = verify_http_signature(|_| None, b"{}", None);
		assert!(result.is_ok());
	}

	#[test]
	fn stripping_an_ld_signature_is_a_no_op_without_a_known_key() {
		let body = json!({"type": "Create", "signature": {"type": "RsaSignature2017"}});
		let result = strip_unverifiable_ld_signature(body.clone(), None);
		assert_eq!(result, body);
	}

	#[test]
	fn post_type_accepts_the_three_known_object_kinds() {
		assert_eq!(post_type(&json!({"type": "Note"})).unwrap(), PostType::Note);
		assert_eq!(post_type(&json!({"type": "Question"})).unwrap(), PostType::Question);
		assert_eq!(post_type(&json!({"type": "Article"})).unwrap(), PostType::Article);
	}

	#[test]
	fn post_type_rejects_anything_else() {
		assert!(post_type(&json!({"type": "Tombstone"})).is_err());
		assert!(post_type(&json!({})).is_err());
	}

	#[test]
	fn visibility_prefers_public_to_over_public_cc() {
		let public = ["https://www.w3.org/ns/activitystreams#Public".to_string()];
		assert_eq!(infer_visibility(&public, &[]), Visibility::Public);
		assert_eq!(infer_visibility(&[], &public), Visibility::Unlisted);
	}

	#[test]
	fn visibility_falls_back_to_followers_suffix_then_mentioned() {
		let followers = ["https://example.social/users/alice/followers".to_string()];
		assert_eq!(infer_visibility(&followers, &[]), Visibility::Followers);
		assert_eq!(infer_visibility(&[], &[]), Visibility::Mentioned);
	}

	#[test]
	fn parse_published_reads_rfc3339_and_falls_back_to_now() {
		let object = json!({"published": "2024-01-01T00:00:00Z"});
		let ts = parse_published(&object);
		assert_eq!(ts, Timestamp(1_704_067_200_000));
		let fallback = parse_published(&json!({}));
		assert!(fallback.0 > 0);
	}
}
