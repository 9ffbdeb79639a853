//! The `Report` state handler: delivers a `Flag` activity to a remote
//! subject's instance (the de-facto AP convention for cross-instance
//! moderation reports is `Flag` sent straight to the subject's inbox, not a
//! dedicated moderator endpoint) or, for a local subject, just settles —
//! local moderators pick reports up from the `forwarded` state directly.

use async_trait::async_trait;
use serde_json::json;

use relaystate_crypto::canon;
use relaystate_net::http_client;
use relaystate_stator::runner::StateHandler;
use relaystate_types::error::{ClResult, Error};
use relaystate_types::store::ConfigStore;

use crate::ctx::FederationCtx;
use crate::entities::report::Report;

const AS2_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

pub struct ReportHandler;

#[async_trait]
impl<C: ConfigStore + Send + Sync + 'static> StateHandler<FederationCtx<C>, Report> for ReportHandler {
	async fn handle(&self, ctx: &FederationCtx<C>, report: &Report) -> ClResult<Option<&'static str>> {
		let subject = ctx.identity_repo.get(report.subject_identity).await?.ok_or_else(|| {
			Error::ActivityPubFormat(format!("report subject {:?} is not known here", report.subject_identity))
		})?;
		if subject.local {
			return Ok(Some("forwarded"));
		}

		let actor_uri = match report.source {
			Some(source) => ctx
				.identity_repo
				.get(source)
				.await?
				.map(|identity| identity.actor_uri)
				.unwrap_or_else(|| ctx.system_actor.actor_uri.clone()),
			None => ctx.system_actor.actor_uri.clone(),
		};
		let mut objects = vec![subject.actor_uri.clone()];
		if let Some(post) = report.subject_post {
			if let Some(post) = ctx.post_repo.get(post).await? {
				objects.push(post.object_uri);
			}
		}

		let activity = json!({
			"@context": AS2_CONTEXT,
			"type": "Flag",
			"actor": actor_uri,
			"content": report.complaint,
			"object": objects,
		});
		let canonical = canon::canonicalize_value(&activity);
		let body = serde_json::to_vec(&canonical)
			.map_err(|e| Error::ActivityPubFormat(format!("activity serialisation failed: {e}")))?;
		let inbox = subject.shared_inbox_uri.as_deref().unwrap_or(&subject.inbox_uri);

		match ctx
			.http_client
			.signed_post(inbox, &body, &ctx.system_actor.public_key_id, &ctx.system_actor.keys)
			.await
		{
			Ok((status, _)) => match http_client::classify_status(status) {
				None => Ok(Some("forwarded")),
				Some(Error::TransientHttp(_)) => Ok(None),
				// Delivery failure does not make the report go away locally.
				Some(_) => Ok(Some("forwarded")),
			},
			Err(Error::TransientHttp(_) | Error::Timeout) => Ok(None),
			Err(Error::BlockedIp(_) | Error::PermanentHttp { .. }) => Ok(Some("forwarded")),
			Err(err) => Err(err),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn flag_activity_carries_complaint_and_objects() {
		let activity = json!({
			"@context": AS2_CONTEXT,
			"type": "Flag",
			"actor": "https://local.example/actor",
			"content": "spam",
			"object": ["https://remote.example/users/mallory"],
		});
		assert_eq!(activity["type"], "Flag");
		assert_eq!(activity["content"], "spam");
	}
}
