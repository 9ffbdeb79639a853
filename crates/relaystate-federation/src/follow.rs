//! The `Follow` state handlers: deciding whether a freshly created follow
//! needs outbound delivery (spec.md §8 scenario 1), and performing that
//! delivery. `remote_requested`/`accepted`/`rejected` reached directly by
//! `inbox.rs`'s dispatch table are set by a plain repo upsert, never through
//! either handler here.

use async_trait::async_trait;
use serde_json::json;

use relaystate_crypto::canon;
use relaystate_net::http_client;
use relaystate_stator::runner::StateHandler;
use relaystate_types::error::{ClResult, Error};
use relaystate_types::store::ConfigStore;
use relaystate_types::types::Timestamp;

use crate::ctx::FederationCtx;
use crate::entities::follow::Follow;

const AS2_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

/// `unrequested`: a follow of a local target resolves immediately, with no
/// network traffic, since both ends of the edge live in this store; a
/// follow of a remote target needs the `local_requested` handler to
/// actually deliver a `Follow` activity.
pub struct FollowHandler;

#[async_trait]
impl<C: ConfigStore + Send + Sync + 'static> StateHandler<FederationCtx<C>, Follow> for FollowHandler {
	async fn handle(&self, ctx: &FederationCtx<C>, follow: &Follow) -> ClResult<Option<&'static str>> {
		let target = ctx
			.identity_repo
			.get(follow.target)
			.await?
			.ok_or_else(|| Error::ActivityPubFormat(format!("follow target {:?} is not known here", follow.target)))?;

		if !target.local {
			return Ok(Some("local_requested"));
		}
		if target.manually_approves_followers {
			Ok(Some("remote_requested"))
		} else {
			Ok(Some("accepted"))
		}
	}
}

/// `local_requested`: sends the `Follow` activity once (tracked by `uri`
/// becoming `Some`), then waits for an inbound `Accept`/`Reject` to move the
/// row out from under this handler entirely — a delivered-but-unanswered
/// follow is a no-op attempt every retry, not a resend.
pub struct FollowRequestHandler;

#[async_trait]
impl<C: ConfigStore + Send + Sync + 'static> StateHandler<FederationCtx<C>, Follow> for FollowRequestHandler {
	async fn handle(&self, ctx: &FederationCtx<C>, follow: &Follow) -> ClResult<Option<&'static str>> {
		if follow.uri.is_some() {
			return Ok(None);
		}

		let source = ctx
			.identity_repo
			.get(follow.source)
			.await?
			.ok_or_else(|| Error::ActivityPubFormat(format!("follow source {:?} is not known here", follow.source)))?;
		let target = ctx
			.identity_repo
			.get(follow.target)
			.await?
			.ok_or_else(|| Error::ActivityPubFormat(format!("follow target {:?} is not known here", follow.target)))?;

		let activity_id = format!("{}#follows/{}", source.actor_uri, follow.id.0);
		let activity = json!({
			"@context": AS2_CONTEXT,
			"id": activity_id,
			"type": "Follow",
			"actor": source.actor_uri,
			"object": target.actor_uri,
		});
		let canonical = canon::canonicalize_value(&activity);
		let body = serde_json::to_vec(&canonical)
			.map_err(|e| Error::ActivityPubFormat(format!("activity serialisation failed: {e}")))?;
		let inbox = target.shared_inbox_uri.as_deref().unwrap_or(&target.inbox_uri);

		match ctx
			.http_client
			.signed_post(inbox, &body, &ctx.system_actor.public_key_id, &ctx.system_actor.keys)
			.await
		{
			Ok((status, _)) => match http_client::classify_status(status) {
				None => {
					let mut sent = follow.clone();
					sent.uri = Some(activity_id);
					ctx.follow_repo.upsert(sent).await?;
					Ok(None)
				}
				Some(Error::TransientHttp(_) | Error::Timeout) => Ok(None),
				Some(_) => Ok(Some("rejected")),
			},
			Err(Error::TransientHttp(_) | Error::Timeout) => Ok(None),
			Err(Error::BlockedIp(_) | Error::PermanentHttp { .. }) => Ok(Some("rejected")),
			Err(err) => Err(err),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builds_a_follow_activity_with_a_stable_id() {
		let activity = json!({
			"@context": AS2_CONTEXT,
			"id": "https://local.example/users/alice#follows/1",
			"type": "Follow",
			"actor": "https://local.example/users/alice",
			"object": "https://remote.example/users/bob",
		});
		assert_eq!(activity["type"], "Follow");
		assert_eq!(activity["actor"], "https://local.example/users/alice");
	}

	#[test]
	fn timestamp_now_is_monotonic_enough_for_created_fields() {
		let a = Timestamp::now();
		let b = Timestamp::now();
		assert!(b.0 >= a.0);
	}
}
