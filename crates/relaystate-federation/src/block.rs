//! The `Block` state handler: delivers a `Block` activity for a full block,
//! and does nothing at all over the network for a mute (spec.md §3's
//! invariant that mutes never produce outbound AP traffic).

use async_trait::async_trait;
use serde_json::json;

use relaystate_crypto::canon;
use relaystate_net::http_client;
use relaystate_stator::runner::StateHandler;
use relaystate_types::error::{ClResult, Error};
use relaystate_types::store::ConfigStore;

use crate::ctx::FederationCtx;
use crate::entities::block::Block;

const AS2_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

pub struct BlockHandler;

#[async_trait]
impl<C: ConfigStore + Send + Sync + 'static> StateHandler<FederationCtx<C>, Block> for BlockHandler {
	async fn handle(&self, ctx: &FederationCtx<C>, block: &Block) -> ClResult<Option<&'static str>> {
		if block.mute {
			return Ok(Some("active"));
		}

		let source = ctx
			.identity_repo
			.get(block.source)
			.await?
			.ok_or_else(|| Error::ActivityPubFormat(format!("block source {:?} is not known here", block.source)))?;
		let target = ctx
			.identity_repo
			.get(block.target)
			.await?
			.ok_or_else(|| Error::ActivityPubFormat(format!("block target {:?} is not known here", block.target)))?;

		if target.local {
			return Ok(Some("active"));
		}

		let activity = json!({
			"@context": AS2_CONTEXT,
			"id": format!("{}#blocks/{}", source.actor_uri, block.id.0),
			"type": "Block",
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
				None => Ok(Some("active")),
				Some(Error::TransientHttp(_)) => Ok(None),
				// The remote end already considers us gone or never reachable; the
				// block is still locally effective either way, so it settles in
				// `active` rather than retrying forever against a dead target.
				Some(_) => Ok(Some("active")),
			},
			Err(Error::TransientHttp(_) | Error::Timeout) => Ok(None),
			Err(Error::BlockedIp(_) | Error::PermanentHttp { .. }) => Ok(Some("active")),
			Err(err) => Err(err),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn block_activity_names_source_and_target() {
		let activity = json!({
			"@context": AS2_CONTEXT,
			"type": "Block",
			"actor": "https://local.example/users/alice",
			"object": "https://remote.example/users/mallory",
		});
		assert_eq!(activity["actor"], "https://local.example/users/alice");
		assert_eq!(activity["object"], "https://remote.example/users/mallory");
	}
}
