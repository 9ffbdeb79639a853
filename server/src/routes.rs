//! The read-only discovery and collection surface spec.md §6 names, plus
//! the router that ties it and the inbox handler together.
//!
//! Grounded on the teacher's `routes::init` (one function building the full
//! `axum::Router` from per-concern handler modules) generalised from the
//! teacher's many-module REST API to this crate's small ActivityPub
//! discovery surface.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;

use relaystate_federation::discovery::{self, NodeinfoUsage};
use relaystate_types::error::{ClResult, Error};

use crate::bootstrap::App;
use crate::config::{SOFTWARE_NAME, SOFTWARE_VERSION};
use crate::rate_limit::{self, InboxRateLimiter};

/// Builds the full router: discovery documents, per-identity collections,
/// and the rate-limited inbox endpoints.
pub fn router(app: Arc<App>, rate_limiter: Arc<InboxRateLimiter>) -> Router {
	let inbox_routes = Router::new()
		.route("/inbox/", post(crate::inbox::receive))
		.route("/@{handle}/inbox/", post(crate::inbox::receive))
		.layer(axum::middleware::from_fn_with_state(rate_limiter, rate_limit::throttle));

	Router::new()
		.merge(inbox_routes)
		.route("/actor/", get(system_actor))
		.route("/@{handle}/", get(actor))
		.route("/@{handle}/outbox/", get(outbox))
		.route("/@{handle}/collections/featured/", get(featured))
		.route("/.well-known/webfinger", get(webfinger))
		.route("/.well-known/host-meta", get(host_meta))
		.route("/.well-known/nodeinfo", get(nodeinfo_link))
		.route("/nodeinfo/2.0/", get(nodeinfo))
		.with_state(app)
}

/// `true` if the request prefers `application/activity+json` (or the bare
/// `application/json` most test clients send) over `text/html` — an HTML
/// renderer is out of scope per spec.md §6, so an HTML-preferring request
/// gets a plain 406 rather than a page.
fn wants_activity_json(headers: &HeaderMap) -> bool {
	let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()).unwrap_or("");
	accept.contains("json") || accept.is_empty() || accept.contains('*')
}

fn activity_json(value: serde_json::Value) -> Response {
	(
		[(header::CONTENT_TYPE, "application/activity+json")],
		Json(value),
	)
		.into_response()
}

async fn actor(State(app): State<Arc<App>>, headers: HeaderMap, Path(handle): Path<String>) -> Response {
	if !wants_activity_json(&headers) {
		return StatusCode::NOT_ACCEPTABLE.into_response();
	}
	match find_local(&app, &handle).await {
		Ok(identity) => activity_json(discovery::actor_document(&identity)),
		Err(err) => err.into_response(),
	}
}

/// `GET /actor/` serves this server's own distinguished system actor
/// (spec.md §9), not a per-account identity — a small, dedicated document
/// rather than forcing a fake [`relaystate_federation::entities::identity::Identity`]
/// row into existence just to reuse `discovery::actor_document`.
async fn system_actor(State(app): State<Arc<App>>, headers: HeaderMap) -> Response {
	if !wants_activity_json(&headers) {
		return StatusCode::NOT_ACCEPTABLE.into_response();
	}
	let actor = &app.ctx.system_actor;
	activity_json(serde_json::json!({
		"@context": [
			"https://www.w3.org/ns/activitystreams",
			"https://w3id.org/security/v1",
		],
		"id": actor.actor_uri,
		"type": "Application",
		"preferredUsername": "relay",
		"inbox": format!("{}/inbox/", app.base_url),
		"publicKey": {
			"id": actor.public_key_id,
			"owner": actor.actor_uri,
			"publicKeyPem": actor.keys.public_pem().unwrap_or_default(),
		},
	}))
}

async fn outbox(State(app): State<Arc<App>>, headers: HeaderMap, Path(handle): Path<String>) -> Response {
	if !wants_activity_json(&headers) {
		return StatusCode::NOT_ACCEPTABLE.into_response();
	}
	let identity = match find_local(&app, &handle).await {
		Ok(identity) => identity,
		Err(err) => return err.into_response(),
	};
	let posts = match app.ctx.post_repo.list_public_by_author(identity.id, 20).await {
		Ok(posts) => posts,
		Err(err) => return err.into_response(),
	};
	let items = posts.iter().map(|post| discovery::note_object(post, &identity.actor_uri)).collect();
	activity_json(discovery::ordered_collection(&identity.outbox_uri, items))
}

async fn featured(State(app): State<Arc<App>>, headers: HeaderMap, Path(handle): Path<String>) -> Response {
	if !wants_activity_json(&headers) {
		return StatusCode::NOT_ACCEPTABLE.into_response();
	}
	let identity = match find_local(&app, &handle).await {
		Ok(identity) => identity,
		Err(err) => return err.into_response(),
	};
	let mut items = Vec::with_capacity(identity.pinned_post_uris.len());
	for uri in &identity.pinned_post_uris {
		match app.ctx.post_repo.find_by_object_uri(uri).await {
			Ok(Some(post)) => items.push(discovery::note_object(&post, &identity.actor_uri)),
			Ok(None) => {}
			Err(err) => return err.into_response(),
		}
	}
	activity_json(discovery::ordered_collection(&identity.featured_collection_uri, items))
}

#[derive(Debug, Deserialize)]
struct WebfingerQuery {
	resource: String,
}

async fn webfinger(State(app): State<Arc<App>>, Query(query): Query<WebfingerQuery>) -> Response {
	let Some(acct) = query.resource.strip_prefix("acct:") else {
		return Error::ActivityPubFormat("resource must be an acct: URI".into()).into_response();
	};
	let Some((username, _domain)) = acct.split_once('@') else {
		return Error::ActivityPubFormat("resource must be acct:user@domain".into()).into_response();
	};
	match find_local(&app, username).await {
		Ok(identity) => {
			let doc = discovery::webfinger_response(&query.resource, &identity.actor_uri, None);
			([(header::CONTENT_TYPE, "application/jrd+json")], Json(doc)).into_response()
		}
		Err(err) => err.into_response(),
	}
}

async fn host_meta(State(app): State<Arc<App>>) -> Response {
	let xrd = discovery::host_meta_xrd(&app.base_url);
	([(header::CONTENT_TYPE, "application/xrd+xml")], xrd).into_response()
}

async fn nodeinfo_link(State(app): State<Arc<App>>) -> Response {
	Json(discovery::nodeinfo_pointer(&app.base_url)).into_response()
}

async fn nodeinfo(State(app): State<Arc<App>>) -> Response {
	match usage(&app).await {
		Ok(usage) => {
			Json(discovery::nodeinfo_document(SOFTWARE_NAME, SOFTWARE_VERSION, app.open_registration, usage))
				.into_response()
		}
		Err(err) => err.into_response(),
	}
}

/// Local-identity and local-post counts for `/nodeinfo/2.0/`. Neither
/// `IdentityRepo` nor `PostRepo` exposes a count (every other caller wants
/// rows, not totals), so this runs a one-off query against the stator
/// columns directly rather than growing either trait for a single caller.
async fn usage(app: &App) -> ClResult<NodeinfoUsage> {
	let local_identities: i64 = sqlx::query_scalar(&format!(
		"SELECT COUNT(*) FROM {} WHERE json_extract(data, '$.local') = 1",
		relaystate_store_sqlite::tables::IDENTITY,
	))
	.fetch_one(&app.adapter.pool)
	.await
	.map_err(|_| Error::DbError)?;
	let local_posts: i64 = sqlx::query_scalar(&format!(
		"SELECT COUNT(*) FROM {} WHERE json_extract(data, '$.local') = 1",
		relaystate_store_sqlite::tables::POST,
	))
	.fetch_one(&app.adapter.pool)
	.await
	.map_err(|_| Error::DbError)?;
	Ok(NodeinfoUsage {
		local_identities: u64::try_from(local_identities).unwrap_or(0),
		local_posts: u64::try_from(local_posts).unwrap_or(0),
	})
}

async fn find_local(app: &App, username: &str) -> ClResult<relaystate_federation::entities::identity::Identity> {
	app.ctx
		.identity_repo
		.find_local_by_username(username)
		.await?
		.ok_or(Error::NotFound)
}
