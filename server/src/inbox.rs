//! The HTTP-layer half of spec.md §4.2's receive contract (steps 1-8): body
//! size enforcement, JSON parsing, the blocked-identity and
//! known-ignorable-type short-circuits, signature verification, and
//! persistence as a `received` `InboxMessage`. Step 9 (the `(type,
//! object.type)` dispatch table) runs later, out of process from this
//! handler's point of view, as `relaystate_federation::inbox::ReceivedHandler`
//! inside the stator runner.
//!
//! One handler serves both `POST /inbox/` (shared inbox) and `POST
//! /@<handle>/inbox/` (per-identity inbox): the receive contract makes no
//! distinction between them beyond the body they're handed, so there is no
//! per-identity routing logic here — the `handle` path segment is accepted
//! and ignored.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use relaystate_federation::ap::Activity;
use relaystate_federation::entities::inbox_message::InboxMessage;
use relaystate_store_sqlite::json_store::JsonEntityStore;
use relaystate_store_sqlite::tables;
use relaystate_types::error::{ClResult, Error};
use relaystate_types::snowflake::{EntityTag, Id};
use relaystate_types::store::ConfigScope;
use relaystate_types::types::{StatorFields, Timestamp};

use crate::bootstrap::App;

/// The axum handler for both `POST /inbox/` and `POST /@<handle>/inbox/`.
pub async fn receive(State(app): State<Arc<App>>, method: Method, uri: Uri, headers: HeaderMap, body: Body) -> Response {
	let max_bytes = match app
		.ctx
		.settings
		.get_i64("federation.max_inbox_body_bytes", ConfigScope::System, None)
		.await
	{
		Ok(limit) => usize::try_from(limit).unwrap_or(usize::MAX),
		Err(err) => return err.into_response(),
	};

	let raw_body = match axum::body::to_bytes(body, max_bytes).await {
		Ok(bytes) => bytes,
		Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, "inbox body exceeds the configured size cap").into_response(),
	};

	match process(&app, &method, &uri, &headers, &raw_body).await {
		Ok(()) => StatusCode::ACCEPTED.into_response(),
		Err(err) => err.into_response(),
	}
}

/// Steps 1-8. A `202` with no persisted row (the blocked-identity and
/// known-ignorable short-circuits) and a `202` with a persisted row (a
/// clean accept) both return `Ok(())` — the caller can't and needn't tell
/// them apart.
async fn process(app: &App, method: &Method, uri: &Uri, headers: &HeaderMap, raw_body: &Bytes) -> ClResult<()> {
	let body: Value =
		serde_json::from_slice(raw_body).map_err(|e| Error::ActivityPubFormat(format!("invalid JSON body: {e}")))?;
	let canonical = relaystate_federation::inbox::canonicalize(&body);

	let actor_uri = canonical
		.get("actor")
		.and_then(Value::as_str)
		.ok_or_else(|| Error::ActivityPubFormat("activity missing actor".into()))?
		.to_string();

	let identity = relaystate_federation::inbox::resolve_or_create_identity(&app.ctx, &actor_uri).await?;

	if relaystate_federation::inbox::is_blocked(&app.ctx, &actor_uri).await? {
		return Ok(());
	}

	let activity = Activity::from_canonical(&canonical)?;
	if activity.is_known_ignorable() {
		return Ok(());
	}

	let known_public_key_pem =
		(!identity.public_key_pem.is_empty()).then_some(identity.public_key_pem.as_str());

	let path = uri.path().to_string();
	let request_target = format!("{} {path}", method.as_str().to_ascii_lowercase());
	let header_lookup = |name: &str| -> Option<String> {
		if name.eq_ignore_ascii_case("(request-target)") {
			return Some(request_target.clone());
		}
		headers.get(name).and_then(|value| value.to_str().ok()).map(str::to_string)
	};
	relaystate_federation::inbox::verify_http_signature(header_lookup, raw_body, known_public_key_pem)?;

	let canonical = relaystate_federation::inbox::strip_unverifiable_ld_signature(canonical, known_public_key_pem);
	relaystate_federation::inbox::reject_reserved(&canonical)?;

	let message = InboxMessage {
		id: Id::new(EntityTag::Other),
		sender_actor_uri: actor_uri,
		body: canonical,
		received: Timestamp::now(),
		fields: StatorFields::initial("received"),
	};
	let store = JsonEntityStore::<InboxMessage>::new(app.adapter.pool.clone(), tables::INBOX_MESSAGE);
	store.insert(&message).await
}

#[cfg(test)]
mod tests {
	use super::*;

	/// Each test gets its own on-disk database: `bootstrap` opens a
	/// single-connection WAL pool per call, and tests sharing a file would
	/// otherwise see each other's persisted settings and identities when
	/// run in parallel.
	async fn test_app(name: &str) -> App {
		let dir = std::env::temp_dir().join(format!("relaystate-inbox-test-{}-{name}", std::process::id()));
		let config = crate::config::ServerConfig {
			db_dir: dir,
			listen: "127.0.0.1:0".into(),
			base_url: "https://relay.example".into(),
			open_registration: false,
		};
		crate::bootstrap::bootstrap(&config).await.expect("bootstrap in-memory app")
	}

	#[tokio::test]
	async fn oversized_body_is_rejected_with_413() {
		let app = test_app("oversized").await;
		app.ctx
			.settings
			.set("federation.max_inbox_body_bytes", ConfigScope::System, None, "16")
			.await
			.expect("override size cap");
		let response = receive(
			State(Arc::new(app)),
			Method::POST,
			"/inbox/".parse().unwrap(),
			HeaderMap::new(),
			Body::from(vec![b'a'; 1024]),
		)
		.await;
		assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
	}

	#[tokio::test]
	async fn malformed_json_is_rejected_with_400() {
		let app = test_app("malformed").await;
		let response = receive(
			State(Arc::new(app)),
			Method::POST,
			"/inbox/".parse().unwrap(),
			HeaderMap::new(),
			Body::from("not json"),
		)
		.await;
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn an_activity_with_no_known_public_key_is_accepted_unverified_and_persisted() {
		let app = test_app("happy_path").await;
		let body = serde_json::json!({
			"@context": "https://www.w3.org/ns/activitystreams",
			"id": "https://remote.example/activities/1",
			"type": "Follow",
			"actor": "https://remote.example/users/bob",
			"object": "https://relay.example/users/alice",
		});
		let response = receive(
			State(Arc::new(app)),
			Method::POST,
			"/inbox/".parse().unwrap(),
			HeaderMap::new(),
			Body::from(serde_json::to_vec(&body).expect("serialize")),
		)
		.await;
		assert_eq!(response.status(), StatusCode::ACCEPTED);
	}
}
