//! Handlers for the three small "fetch once, recount on sighting" entities:
//! `Emoji`, `Hashtag`, `PostAttachment`. None of them deliver anything over
//! the network outbound; all three only ever make best-effort unsigned GETs
//! against remote-hosted media URLs — static image assets, not ActivityPub
//! documents, so unlike `relaystate_net::resolver`'s actor/featured fetches
//! they carry no `keyId` to sign against and no server expects one.

use async_trait::async_trait;

use relaystate_net::http_client;
use relaystate_stator::runner::StateHandler;
use relaystate_types::error::{ClResult, Error};
use relaystate_types::store::ConfigStore;
use relaystate_types::types::Timestamp;

use crate::ctx::FederationCtx;
use crate::entities::attachment::PostAttachment;
use crate::entities::emoji::Emoji;
use crate::entities::hashtag::Hashtag;

/// `outdated → fetched`: confirms the remote image is reachable. Local
/// emoji are created directly in `fetched` by whoever uploads them and
/// never pass through here in practice, but the check is defensive rather
/// than assumed.
pub struct EmojiHandler;

#[async_trait]
impl<C: ConfigStore + Send + Sync + 'static> StateHandler<FederationCtx<C>, Emoji> for EmojiHandler {
	async fn handle(&self, ctx: &FederationCtx<C>, emoji: &Emoji) -> ClResult<Option<&'static str>> {
		if emoji.local {
			return Ok(Some("fetched"));
		}
		let Some(remote_url) = &emoji.remote_url else {
			return Ok(Some("fetched"));
		};

		match ctx.http_client.get(remote_url).await {
			Ok((status, _)) => match http_client::classify_status(status) {
				None => Ok(Some("fetched")),
				Some(Error::TransientHttp(_)) => Ok(None),
				// A dead or forbidden icon URL still settles in `fetched` — there
				// is no dedicated "broken" state, and an emoji with a shortcode
				// the rest of a post's content already references can't be
				// un-ingested.
				Some(_) => Ok(Some("fetched")),
			},
			Err(Error::TransientHttp(_) | Error::Timeout) => Ok(None),
			Err(Error::BlockedIp(_) | Error::PermanentHttp { .. }) => Ok(Some("fetched")),
			Err(err) => Err(err),
		}
	}
}

/// `new → fetched`: the counters are already current as of row construction
/// (`inbox.rs`'s `resolve_hashtags` sets `usage_count`/`last_used` before
/// ever writing the row), so this is a pure state advance.
pub struct HashtagHandler;

#[async_trait]
impl<C: ConfigStore + Send + Sync + 'static> StateHandler<FederationCtx<C>, Hashtag> for HashtagHandler {
	async fn handle(&self, _ctx: &FederationCtx<C>, _hashtag: &Hashtag) -> ClResult<Option<&'static str>> {
		Ok(Some("fetched"))
	}
}

/// `outdated → updated`: a later sighting already bumped the counters
/// (`resolve_hashtags` updates `usage_count`/`last_used` on the existing
/// row before re-arming `outdated`), so this handler's only job is to
/// acknowledge that recount and settle back down.
pub struct HashtagRecountHandler;

#[async_trait]
impl<C: ConfigStore + Send + Sync + 'static> StateHandler<FederationCtx<C>, Hashtag> for HashtagRecountHandler {
	async fn handle(&self, _ctx: &FederationCtx<C>, _hashtag: &Hashtag) -> ClResult<Option<&'static str>> {
		Ok(Some("updated"))
	}
}

/// `new → fetched`: confirms a remote attachment's URL is reachable before
/// serving it; local attachments are assumed already on disk by the time
/// their row exists (spec.md §3's "local ones skip straight to `fetched`").
pub struct PostAttachmentHandler;

#[async_trait]
impl<C: ConfigStore + Send + Sync + 'static> StateHandler<FederationCtx<C>, PostAttachment> for PostAttachmentHandler {
	async fn handle(&self, ctx: &FederationCtx<C>, attachment: &PostAttachment) -> ClResult<Option<&'static str>> {
		if attachment.local {
			return Ok(Some("fetched"));
		}
		let Some(remote_url) = &attachment.remote_url else {
			return Ok(Some("fetched"));
		};

		match ctx.http_client.get(remote_url).await {
			Ok((status, _)) => match http_client::classify_status(status) {
				None => Ok(Some("fetched")),
				Some(Error::TransientHttp(_)) => Ok(None),
				Some(_) => Ok(Some("fetched")),
			},
			Err(Error::TransientHttp(_) | Error::Timeout) => Ok(None),
			Err(Error::BlockedIp(_) | Error::PermanentHttp { .. }) => Ok(Some("fetched")),
			Err(err) => Err(err),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use relaystate_types::snowflake::{EntityTag, Id};
	use relaystate_types::types::StatorFields;

	fn sample_hashtag() -> Hashtag {
		Hashtag {
			id: Id::new(EntityTag::Other),
			name: "rustlang".into(),
			usage_count: 1,
			last_used: Timestamp::now(),
			fields: StatorFields::initial("new"),
		}
	}

	#[test]
	fn hashtag_rows_carry_their_own_counters() {
		let hashtag = sample_hashtag();
		assert_eq!(hashtag.usage_count, 1);
		assert_eq!(hashtag.name, "rustlang");
	}
}
