//! Actor resolution: webfinger (with host-meta fallback), actor-document
//! fetch, and public-key extraction, backed by the failure cache in
//! [`crate::key_cache`]. Grounded on `cloudillo-idp`'s resolver shape.

use serde::Deserialize;
use serde_json::Value;

use relaystate_crypto::keys::KeyPair;
use relaystate_types::error::{ClResult, Error};

use crate::http_client::{classify_status, SignedHttpClient};
use crate::key_cache::{FailureType, KeyFetchFailureCache};

#[derive(Debug, Deserialize)]
pub struct WebfingerLink {
	pub rel: String,
	#[serde(rename = "type")]
	pub media_type: Option<String>,
	pub href: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WebfingerResponse {
	pub subject: String,
	#[serde(default)]
	pub aliases: Vec<String>,
	#[serde(default)]
	pub links: Vec<WebfingerLink>,
}

impl WebfingerResponse {
	/// The `self` link with an ActivityStreams media type, i.e. the actor
	/// document URI this account resolves to.
	#[must_use]
	pub fn actor_uri(&self) -> Option<&str> {
		self.links
			.iter()
			.find(|link| {
				link.rel == "self"
					&& link
						.media_type
						.as_deref()
						.is_some_and(|t| t.contains("activity+json") || t.contains("ld+json"))
			})
			.and_then(|link| link.href.as_deref())
	}
}

/// Resolves `acct:user@domain` via `/.well-known/webfinger`, falling back to
/// `/.well-known/host-meta`'s `lrdd` template when the host doesn't serve
/// webfinger directly at the well-known path.
pub async fn resolve_webfinger(
	client: &SignedHttpClient,
	account: &str,
) -> ClResult<WebfingerResponse> {
	let domain = account
		.rsplit_once('@')
		.map(|(_, domain)| domain)
		.ok_or_else(|| Error::ActivityPubFormat("account is not user@domain".into()))?;
	let resource = format!("acct:{account}");
	let uri = format!(
		"https://{domain}/.well-known/webfinger?resource={}",
		urlencode(&resource)
	);

	match fetch_json::<WebfingerResponse>(client, &uri).await {
		Ok(response) => Ok(response),
		Err(Error::PermanentHttp { status: 404, .. }) => resolve_via_host_meta(client, domain, &resource).await,
		Err(other) => Err(other),
	}
}

async fn resolve_via_host_meta(
	client: &SignedHttpClient,
	domain: &str,
	resource: &str,
) -> ClResult<WebfingerResponse> {
	let host_meta_uri = format!("https://{domain}/.well-known/host-meta");
	let (status, body) = client.get(&host_meta_uri).await?;
	if let Some(err) = classify_status(status) {
		return Err(err);
	}
	let body = String::from_utf8_lossy(&body);
	let template = extract_lrdd_template(&body)
		.ok_or_else(|| Error::ActivityPubFormat("host-meta has no lrdd template".into()))?;
	let uri = template.replace("{uri}", &urlencode(resource));
	fetch_json(client, &uri).await
}

/// Pulls the `template` attribute out of `<Link rel="lrdd" ... template="...">`
/// with a minimal scan rather than a full XML parser, since host-meta's shape
/// is fixed and this server never needs to round-trip it.
fn extract_lrdd_template(xml: &str) -> Option<String> {
	for line in xml.split("<Link") {
		if !line.contains("lrdd") {
			continue;
		}
		if let Some(start) = line.find("template=\"") {
			let rest = &line[start + "template=\"".len()..];
			if let Some(end) = rest.find('"') {
				return Some(rest[..end].to_string());
			}
		}
	}
	None
}

fn urlencode(s: &str) -> String {
	let mut out = String::with_capacity(s.len());
	for byte in s.bytes() {
		match byte {
			b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b':' | b'@' => {
				out.push(byte as char);
			}
			_ => out.push_str(&format!("%{byte:02X}")),
		}
	}
	out
}

async fn fetch_json<T: serde::de::DeserializeOwned>(client: &SignedHttpClient, uri: &str) -> ClResult<T> {
	let (status, body) = client.get(uri).await?;
	if let Some(err) = classify_status(status) {
		return Err(err);
	}
	serde_json::from_slice(&body).map_err(|e| Error::ActivityPubFormat(format!("bad json: {e}")))
}

async fn fetch_json_signed<T: serde::de::DeserializeOwned>(
	client: &SignedHttpClient,
	uri: &str,
	key_id: &str,
	key: &KeyPair,
) -> ClResult<T> {
	let (status, body) = client.signed_get(uri, key_id, key).await?;
	if let Some(err) = classify_status(status) {
		return Err(err);
	}
	serde_json::from_slice(&body).map_err(|e| Error::ActivityPubFormat(format!("bad json: {e}")))
}

/// Fetches an actor document as a raw JSON value (the entity layer decides
/// how to map it onto the `Identity` model). Signed as the system actor
/// (spec.md §4.5, §4.6: "Signed GET on the actor URI as the system actor"),
/// matching `original_source`'s `SystemActor().signed_request(method="get", ...)`.
pub async fn fetch_actor(
	client: &SignedHttpClient,
	uri: &str,
	key_id: &str,
	key: &KeyPair,
) -> ClResult<Value> {
	fetch_json_signed(client, uri, key_id, key).await
}

/// Resolves `keyId` (an actor URI with a `#fragment`) to its PEM public key,
/// consulting and updating the failure cache.
pub async fn fetch_public_key(
	client: &SignedHttpClient,
	cache: &KeyFetchFailureCache,
	key_id: &str,
	signing_key_id: &str,
	signing_key: &KeyPair,
) -> ClResult<String> {
	if let Some(retry_in) = cache.should_skip(key_id) {
		return Err(Error::TransientHttp(format!(
			"key fetch for {key_id} cached as failed, retry in {retry_in}s"
		)));
	}
	let actor_uri = key_id.split('#').next().unwrap_or(key_id);
	let result = fetch_actor(client, actor_uri, signing_key_id, signing_key).await;
	match result {
		Ok(actor) => extract_public_key_pem(&actor).ok_or_else(|| {
			cache.record_failure(key_id, FailureType::ParseError);
			Error::ActivityPubFormat("actor document has no publicKeyPem".into())
		}),
		Err(Error::PermanentHttp { status: 401 | 403, .. }) => {
			cache.record_failure(key_id, FailureType::Unauthorized);
			Err(Error::Verification("key owner denied access".into()))
		}
		Err(Error::PermanentHttp { status: 404 | 410, .. }) => {
			cache.record_failure(key_id, FailureType::NotFound);
			Err(Error::NotFound)
		}
		Err(other) => {
			cache.record_failure(key_id, FailureType::NetworkError);
			Err(other)
		}
	}
}

fn extract_public_key_pem(actor: &Value) -> Option<String> {
	actor.get("publicKey")?.get("publicKeyPem")?.as_str().map(str::to_string)
}

/// Fetches a `featured` (pinned posts) `OrderedCollection` for an actor.
/// Signed as the system actor, same as [`fetch_actor`].
pub async fn fetch_featured(
	client: &SignedHttpClient,
	uri: &str,
	key_id: &str,
	key: &KeyPair,
) -> ClResult<Value> {
	fetch_json_signed(client, uri, key_id, key).await
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn webfinger_actor_uri_picks_activity_json_self_link() {
		let response: WebfingerResponse = serde_json::from_value(serde_json::json!({
			"subject": "acct:alice@example.com",
			"links": [
				{"rel": "self", "type": "text/html", "href": "https://example.com/@alice"},
				{"rel": "self", "type": "application/activity+json", "href": "https://example.com/users/alice"},
			],
		}))
		.unwrap();
		assert_eq!(response.actor_uri(), Some("https://example.com/users/alice"));
	}

	#[test]
	fn host_meta_template_extraction() {
		let xml = r#"<?xml version="1.0"?><XRD><Link rel="lrdd" type="application/xrd+xml" template="https://example.com/describe?uri={uri}"/></XRD>"#;
		assert_eq!(
			extract_lrdd_template(xml),
			Some("https://example.com/describe?uri={uri}".to_string())
		);
	}

	#[test]
	fn extract_public_key_pem_reads_nested_field() {
		let actor = serde_json::json!({"publicKey": {"publicKeyPem": "-----BEGIN PUBLIC KEY-----"}});
		assert_eq!(extract_public_key_pem(&actor).as_deref(), Some("-----BEGIN PUBLIC KEY-----"));
	}
}
