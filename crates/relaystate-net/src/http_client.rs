//! Signed outbound HTTP client: resolves and blocklist-checks the target
//! host, enforces a redirect cap and timeout, signs the request with HTTP
//! Signatures, and maps transport failures into the transient/permanent
//! split the stator retry policy depends on.

use std::net::IpAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use relaystate_crypto::http_signature::{self, SignatureOptions};
use relaystate_crypto::keys::KeyPair;
use relaystate_types::error::{ClResult, Error};

const MAX_REDIRECTS: u8 = 5;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

/// IP ranges a signed request is never allowed to land on, regardless of
/// what DNS or a redirect chain resolves to. Mirrors the private/loopback/
/// link-local guard every federation implementation needs to avoid SSRF
/// against its own infrastructure.
fn is_blocked(ip: IpAddr) -> bool {
	match ip {
		IpAddr::V4(v4) => {
			v4.is_loopback()
				|| v4.is_private()
				|| v4.is_link_local()
				|| v4.is_broadcast()
				|| v4.is_documentation()
				|| v4.is_unspecified()
		}
		IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00,
	}
}

pub struct SignedHttpClient {
	inner: Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>,
	resolver: hickory_resolver::TokioResolver,
}

impl SignedHttpClient {
	pub fn new() -> ClResult<Self> {
		let https = hyper_rustls::HttpsConnectorBuilder::new()
			.with_webpki_roots()
			.https_or_http()
			.enable_http1()
			.enable_http2()
			.build();
		let inner = Client::builder(TokioExecutor::new()).build(https);
		let resolver = hickory_resolver::TokioResolver::builder_tokio()
			.map_err(|e| Error::NetworkError(format!("resolver init: {e}")))?
			.build();
		Ok(Self { inner, resolver })
	}

	async fn assert_host_allowed(&self, host: &str) -> ClResult<()> {
		if let Ok(ip) = host.parse::<IpAddr>() {
			if is_blocked(ip) {
				return Err(Error::BlockedIp(format!("{host} is a blocked address")));
			}
			return Ok(());
		}
		let response = self
			.resolver
			.lookup_ip(host)
			.await
			.map_err(|e| Error::TransientHttp(format!("dns lookup failed for {host}: {e}")))?;
		for ip in response.iter() {
			if is_blocked(ip) {
				return Err(Error::BlockedIp(format!("{host} resolves to a blocked address")));
			}
		}
		Ok(())
	}

	/// Performs a signed `POST` of a JSON-LD document to `uri`, following
	/// up to `MAX_REDIRECTS` same-origin-safe redirects.
	pub async fn signed_post(
		&self,
		uri: &str,
		body: &[u8],
		key_id: &str,
		key: &KeyPair,
	) -> ClResult<(u16, Vec<u8>)> {
		let mut current = uri.to_string();
		for _ in 0..=MAX_REDIRECTS {
			let parsed: http::Uri =
				current.parse().map_err(|e| Error::ActivityPubFormat(format!("bad uri: {e}")))?;
			let host = parsed
				.host()
				.ok_or_else(|| Error::ActivityPubFormat("uri has no host".into()))?
				.to_string();
			self.assert_host_allowed(&host).await?;

			let path = parsed.path_and_query().map(|p| p.as_str()).unwrap_or("/").to_string();
			let headers = http_signature::sign_request("post", &path, &host, body, key_id, key, None)?;

			let mut request = http::Request::builder().method("POST").uri(&current);
			for (name, value) in &headers {
				request = request.header(name.as_str(), value.as_str());
			}
			let request = request
				.body(Full::new(Bytes::copy_from_slice(body)))
				.map_err(|e| Error::ActivityPubFormat(format!("bad request: {e}")))?;

			let response = tokio::time::timeout(REQUEST_TIMEOUT, self.inner.request(request))
				.await
				.map_err(|_| Error::Timeout)?
				.map_err(|e| Error::TransientHttp(format!("connect error: {e}")))?;

			let status = response.status();
			if status.is_redirection() {
				if let Some(location) = response.headers().get(http::header::LOCATION) {
					current = location
						.to_str()
						.map_err(|_| Error::TransientHttp("bad redirect location".into()))?
						.to_string();
					continue;
				}
			}

			let collected = response
				.into_body()
				.collect()
				.await
				.map_err(|e| Error::TransientHttp(format!("body read error: {e}")))?
				.to_bytes();
			if collected.len() > MAX_RESPONSE_BYTES {
				return Err(Error::TransientHttp("response body too large".into()));
			}
			return Ok((status.as_u16(), collected.to_vec()));
		}
		Err(Error::TransientHttp("too many redirects".into()))
	}

	/// Plain `GET` with an ActivityPub `Accept` header, no signature. Used
	/// for webfinger, host-meta, and nodeinfo discovery documents, which are
	/// public by convention and carry no `keyId` to sign against.
	pub async fn get(&self, uri: &str) -> ClResult<(u16, Vec<u8>)> {
		self.get_with_accept(uri, "application/activity+json, application/ld+json", None).await
	}

	/// Signed `GET`, as spec.md §4.5 requires for actor and featured-
	/// collection fetches: same `(request-target) host date digest
	/// content-type` signing string as [`Self::signed_post`], over an empty
	/// body, matching `original_source`'s `SystemActor().signed_request(method="get", ...)`.
	pub async fn signed_get(
		&self,
		uri: &str,
		key_id: &str,
		key: &KeyPair,
	) -> ClResult<(u16, Vec<u8>)> {
		self.get_with_accept(
			uri,
			"application/activity+json, application/ld+json",
			Some((key_id, key)),
		)
		.await
	}

	async fn get_with_accept(
		&self,
		uri: &str,
		accept: &str,
		signer: Option<(&str, &KeyPair)>,
	) -> ClResult<(u16, Vec<u8>)> {
		let mut current = uri.to_string();
		for _ in 0..=MAX_REDIRECTS {
			let parsed: http::Uri =
				current.parse().map_err(|e| Error::ActivityPubFormat(format!("bad uri: {e}")))?;
			let host = parsed
				.host()
				.ok_or_else(|| Error::ActivityPubFormat("uri has no host".into()))?
				.to_string();
			self.assert_host_allowed(&host).await?;

			let mut request = http::Request::builder()
				.method("GET")
				.uri(&current)
				.header(http::header::ACCEPT, accept);

			if let Some((key_id, key)) = signer {
				let path = parsed.path_and_query().map(|p| p.as_str()).unwrap_or("/").to_string();
				let headers = http_signature::sign_request("get", &path, &host, b"", key_id, key, None)?;
				for (name, value) in &headers {
					request = request.header(name.as_str(), value.as_str());
				}
			}

			let request = request
				.body(Full::new(Bytes::new()))
				.map_err(|e| Error::ActivityPubFormat(format!("bad request: {e}")))?;

			let response = tokio::time::timeout(REQUEST_TIMEOUT, self.inner.request(request))
				.await
				.map_err(|_| Error::Timeout)?
				.map_err(|e| Error::TransientHttp(format!("connect error: {e}")))?;

			let status = response.status();
			if status.is_redirection() {
				if let Some(location) = response.headers().get(http::header::LOCATION) {
					current = location
						.to_str()
						.map_err(|_| Error::TransientHttp("bad redirect location".into()))?
						.to_string();
					continue;
				}
			}

			let collected = response
				.into_body()
				.collect()
				.await
				.map_err(|e| Error::TransientHttp(format!("body read error: {e}")))?
				.to_bytes();
			if collected.len() > MAX_RESPONSE_BYTES {
				return Err(Error::TransientHttp("response body too large".into()));
			}
			return Ok((status.as_u16(), collected.to_vec()));
		}
		Err(Error::TransientHttp("too many redirects".into()))
	}
}

/// Classifies a non-2xx HTTP status the way spec.md's error taxonomy
/// expects: permanent client errors stop retries, everything else (5xx,
/// unexpected codes) is treated as transient.
#[must_use]
pub fn classify_status(status: u16) -> Option<Error> {
	match status {
		200..=299 => None,
		401 | 403 | 404 | 406 | 410 => Some(Error::PermanentHttp {
			status,
			message: format!("permanent failure: {status}"),
		}),
		_ => Some(Error::TransientHttp(format!("unexpected status {status}"))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn blocks_loopback_and_private_ranges() {
		assert!(is_blocked("127.0.0.1".parse().unwrap()));
		assert!(is_blocked("10.0.0.5".parse().unwrap()));
		assert!(is_blocked("192.168.1.1".parse().unwrap()));
		assert!(!is_blocked("93.184.216.34".parse().unwrap()));
	}

	#[test]
	fn classify_status_splits_permanent_from_transient() {
		assert!(matches!(classify_status(404), Some(Error::PermanentHttp { .. })));
		assert!(matches!(classify_status(500), Some(Error::TransientHttp(_))));
		assert!(classify_status(200).is_none());
	}
}
