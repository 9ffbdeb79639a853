//! draft-cavage HTTP Signatures: digest calculation, signing string
//! construction, and signature header (de)serialization.
//!
//! Ported from `original_source/core/signatures.py`'s `HttpSignature` class:
//! the same `(request-target)`/`Host`/`Date`/`Digest`/`Content-Type` header
//! set, the same `keyId="...",headers="...",signature="...",algorithm="rsa-sha256"`
//! wire format.

use base64::Engine as _;
use sha2::{Digest, Sha256};

use relaystate_types::error::{ClResult, Error};
use relaystate_types::types::Timestamp;

use crate::keys::{self, KeyPair};

/// Controls for behaviour that is normally strict but needs relaxing in
/// tests (per spec.md §9's ±5 minute date-skew decision).
#[derive(Debug, Clone, Copy)]
pub struct SignatureOptions {
	pub skip_date_check: bool,
	pub max_skew_seconds: i64,
}

impl Default for SignatureOptions {
	fn default() -> Self {
		Self { skip_date_check: false, max_skew_seconds: 300 }
	}
}

#[derive(Debug, Clone)]
pub struct SignatureDetails {
	pub key_id: String,
	pub headers: Vec<String>,
	pub signature: Vec<u8>,
	pub algorithm: String,
}

/// `SHA-256=<base64>` digest of a request/response body.
#[must_use]
pub fn calculate_digest(body: &[u8]) -> String {
	let mut hasher = Sha256::new();
	hasher.update(body);
	let digest = hasher.finalize();
	format!("SHA-256={}", base64::engine::general_purpose::STANDARD.encode(digest))
}

/// Builds the newline-joined signing string from an ordered list of
/// `(header name, value)` pairs, lower-casing header names the way the
/// reference implementation does.
#[must_use]
pub fn build_signing_string(headers: &[(String, String)]) -> String {
	headers
		.iter()
		.map(|(name, value)| format!("{}: {value}", name.to_lowercase()))
		.collect::<Vec<_>>()
		.join("\n")
}

pub fn parse_signature(header: &str) -> ClResult<SignatureDetails> {
	let mut key_id = None;
	let mut headers = None;
	let mut signature = None;
	let mut algorithm = None;
	for item in header.split(',') {
		let (name, value) = item
			.split_once('=')
			.ok_or_else(|| Error::VerificationFormat("malformed signature header".into()))?;
		let value = value.trim().trim_matches('"');
		match name.trim().to_lowercase().as_str() {
			"keyid" => key_id = Some(value.to_string()),
			"headers" => headers = Some(value.split_whitespace().map(str::to_string).collect()),
			"signature" => {
				signature = Some(
					base64::engine::general_purpose::STANDARD
						.decode(value)
						.map_err(|_| Error::VerificationFormat("bad signature base64".into()))?,
				);
			}
			"algorithm" => algorithm = Some(value.to_string()),
			_ => {}
		}
	}
	Ok(SignatureDetails {
		key_id: key_id.ok_or_else(|| Error::VerificationFormat("missing keyId".into()))?,
		headers: headers.ok_or_else(|| Error::VerificationFormat("missing headers".into()))?,
		signature: signature.ok_or_else(|| Error::VerificationFormat("missing signature".into()))?,
		algorithm: algorithm.unwrap_or_else(|| "rsa-sha256".to_string()),
	})
}

#[must_use]
pub fn compile_signature(details: &SignatureDetails) -> String {
	format!(
		"keyId=\"{}\",headers=\"{}\",signature=\"{}\",algorithm=\"{}\"",
		details.key_id,
		details.headers.join(" "),
		base64::engine::general_purpose::STANDARD.encode(&details.signature),
		details.algorithm,
	)
}

/// Signs an outbound request, returning the complete header set to attach
/// (including `Signature` but excluding the pseudo-header
/// `(request-target)`, which is only used in the signing string itself).
pub fn sign_request(
	method: &str,
	path: &str,
	host: &str,
	body: &[u8],
	key_id: &str,
	key: &KeyPair,
	date: Option<String>,
) -> ClResult<Vec<(String, String)>> {
	let date_string = date.unwrap_or_else(|| Timestamp::now().to_rfc2822());
	let mut headers = vec![
		("(request-target)".to_string(), format!("{} {path}", method.to_lowercase())),
		("host".to_string(), host.to_string()),
		("date".to_string(), date_string),
		("digest".to_string(), calculate_digest(body)),
		("content-type".to_string(), "application/activity+json".to_string()),
	];
	let signing_string = build_signing_string(&headers);
	let signature = key.sign(signing_string.as_bytes())?;
	let header_names: Vec<String> = headers.iter().map(|(n, _)| n.clone()).collect();
	let signature_header = compile_signature(&SignatureDetails {
		key_id: key_id.to_string(),
		headers: header_names,
		signature,
		algorithm: "rsa-sha256".to_string(),
	});
	headers.retain(|(name, _)| name != "(request-target)");
	headers.push(("signature".to_string(), signature_header));
	Ok(headers)
}

/// Verifies an inbound request's `Signature` header against the claimed
/// signer's public key. `header_lookup` resolves header values (including
/// the synthetic `(request-target)`) by lower-case name.
pub fn verify_request(
	header_lookup: impl Fn(&str) -> Option<String>,
	body: &[u8],
	public_key_pem: &str,
	options: SignatureOptions,
) -> ClResult<()> {
	let signature_header = header_lookup("signature")
		.ok_or_else(|| Error::VerificationFormat("missing Signature header".into()))?;
	let details = parse_signature(&signature_header)?;
	if !details.algorithm.eq_ignore_ascii_case("rsa-sha256") && !details.algorithm.eq_ignore_ascii_case("hs2019") {
		return Err(Error::VerificationFormat(format!(
			"unsupported signature algorithm {}",
			details.algorithm
		)));
	}

	if details.headers.iter().any(|h| h == "digest") {
		let expected = calculate_digest(body);
		let given = header_lookup("digest")
			.ok_or_else(|| Error::VerificationFormat("signed digest header missing".into()))?;
		if !given.eq_ignore_ascii_case(&expected) {
			return Err(Error::Verification("digest mismatch".into()));
		}
	}

	if !options.skip_date_check {
		if let Some(date) = header_lookup("date") {
			let parsed = chrono::DateTime::parse_from_rfc2822(&date)
				.map_err(|_| Error::VerificationFormat("bad Date header".into()))?;
			let skew = (Timestamp::now().0 / 1000 - parsed.timestamp()).abs();
			if skew > options.max_skew_seconds {
				return Err(Error::Verification(format!("date skew {skew}s exceeds limit")));
			}
		}
	}

	let mut headers = Vec::with_capacity(details.headers.len());
	for name in &details.headers {
		let value = header_lookup(name)
			.ok_or_else(|| Error::VerificationFormat(format!("signed header {name} absent")))?;
		headers.push((name.clone(), value));
	}
	let signing_string = build_signing_string(&headers);
	keys::verify(public_key_pem, signing_string.as_bytes(), &details.signature)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	#[test]
	fn digest_matches_known_vector() {
		let digest = calculate_digest(b"hello");
		assert!(digest.starts_with("SHA-256="));
	}

	#[test]
	fn sign_then_verify_request_round_trips() {
		let key = KeyPair::generate().unwrap();
		let body = br#"{"type":"Follow"}"#;
		let headers = sign_request(
			"post",
			"/users/alice/inbox",
			"example.com",
			body,
			"https://origin.example/users/bob#main-key",
			&key,
			Some("Tue, 07 Jun 2014 20:51:35 GMT".to_string()),
		)
		.unwrap();

		let mut map: HashMap<String, String> = headers.into_iter().collect();
		map.insert("(request-target)".to_string(), "post /users/alice/inbox".to_string());
		let mut options = SignatureOptions::default();
		options.skip_date_check = true;
		verify_request(
			|name| map.get(name).cloned(),
			body,
			&key.public_pem().unwrap(),
			options,
		)
		.unwrap();
	}

	#[test]
	fn verify_rejects_stale_date_outside_skew() {
		let key = KeyPair::generate().unwrap();
		let body = b"{}";
		let headers = sign_request(
			"post",
			"/inbox",
			"example.com",
			body,
			"https://origin.example/users/bob#main-key",
			&key,
			Some("Tue, 07 Jun 2014 20:51:35 GMT".to_string()),
		)
		.unwrap();
		let mut map: HashMap<String, String> = headers.into_iter().collect();
		map.insert("(request-target)".to_string(), "post /inbox".to_string());
		let err = verify_request(
			|name| map.get(name).cloned(),
			body,
			&key.public_pem().unwrap(),
			SignatureOptions::default(),
		);
		assert!(err.is_err());
	}
}
