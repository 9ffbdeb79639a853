//! `RsaSignature2017` JSON-LD signatures: the algorithm used for forwarded
//! activities the relay never directly received over HTTP (fan-out of
//! remotely-authored objects, and inbox messages for accounts without a
//! verifiable HTTP Signature key yet resolved).

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use relaystate_types::error::{ClResult, Error};
use relaystate_types::types::Timestamp;

use crate::canon::canonicalize_bytes;
use crate::keys::{self, KeyPair};

const SIGNATURE_TYPE: &str = "RsaSignature2017";

/// Signs `document` in place, inserting a `signature` object. The document
/// passed in must not already contain a `signature` field.
pub fn sign(document: &mut Value, creator: &str, key: &KeyPair) -> ClResult<()> {
	let created = Timestamp::now().to_rfc2822();
	let options = json!({
		"type": SIGNATURE_TYPE,
		"creator": creator,
		"created": created,
	});
	let to_sign = signing_input(document, &options)?;
	let signature = key.sign(&to_sign)?;
	let signature_value = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, signature);

	let Value::Object(map) = document else {
		return Err(Error::ActivityPubFormat("document to sign must be an object".into()));
	};
	map.insert(
		"signature".to_string(),
		json!({
			"type": SIGNATURE_TYPE,
			"creator": creator,
			"created": created,
			"signatureValue": signature_value,
		}),
	);
	Ok(())
}

/// Verifies an embedded `RsaSignature2017` signature against the given
/// public key, returning the `creator` key id on success for the caller to
/// cross-check against the claimed actor.
pub fn verify(document: &Value, public_key_pem: &str) -> ClResult<String> {
	let Value::Object(map) = document else {
		return Err(Error::ActivityPubFormat("signed document must be an object".into()));
	};
	let signature = map
		.get("signature")
		.ok_or_else(|| Error::VerificationFormat("missing signature block".into()))?;
	let sig_type = signature
		.get("type")
		.and_then(Value::as_str)
		.ok_or_else(|| Error::VerificationFormat("missing signature type".into()))?;
	if sig_type != SIGNATURE_TYPE {
		return Err(Error::VerificationFormat(format!("unsupported signature type {sig_type}")));
	}
	let creator = signature
		.get("creator")
		.and_then(Value::as_str)
		.ok_or_else(|| Error::VerificationFormat("missing signature creator".into()))?
		.to_string();
	let created = signature
		.get("created")
		.and_then(Value::as_str)
		.ok_or_else(|| Error::VerificationFormat("missing signature created".into()))?
		.to_string();
	let signature_value = signature
		.get("signatureValue")
		.and_then(Value::as_str)
		.ok_or_else(|| Error::VerificationFormat("missing signatureValue".into()))?;
	let signature_bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, signature_value)
		.map_err(|_| Error::VerificationFormat("bad signatureValue base64".into()))?;

	let options = json!({
		"type": SIGNATURE_TYPE,
		"creator": creator,
		"created": created,
	});
	let mut unsigned = document.clone();
	if let Value::Object(m) = &mut unsigned {
		m.remove("signature");
	}
	let to_verify = signing_input(&unsigned, &options)?;
	keys::verify(public_key_pem, &to_verify, &signature_bytes)?;
	Ok(creator)
}

/// `sha256(canonical(options)) || sha256(canonical(document))`, the input
/// the signature is computed/verified over.
fn signing_input(document: &Value, options: &Value) -> ClResult<Vec<u8>> {
	let options_hash = Sha256::digest(canonicalize_bytes(options)?);
	let document_hash = Sha256::digest(canonicalize_bytes(document)?);
	let mut combined = Vec::with_capacity(64);
	combined.extend_from_slice(&options_hash);
	combined.extend_from_slice(&document_hash);
	Ok(combined)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sign_then_verify_round_trips() {
		let key = KeyPair::generate().unwrap();
		let mut doc = json!({
			"type": "Create",
			"actor": "https://origin.example/users/alice",
			"object": {"type": "Note", "content": "hi"},
		});
		sign(&mut doc, "https://origin.example/users/alice#main-key", &key).unwrap();
		let creator = verify(&doc, &key.public_pem().unwrap()).unwrap();
		assert_eq!(creator, "https://origin.example/users/alice#main-key");
	}

	#[test]
	fn verify_rejects_tampered_document() {
		let key = KeyPair::generate().unwrap();
		let mut doc = json!({"type": "Create", "object": {"content": "hi"}});
		sign(&mut doc, "https://origin.example/users/alice#main-key", &key).unwrap();
		doc["object"]["content"] = json!("tampered");
		let err = verify(&doc, &key.public_pem().unwrap());
		assert!(err.is_err());
	}

	#[test]
	fn verify_rejects_unknown_signature_type() {
		let doc = json!({"type": "Create", "signature": {"type": "Ed25519Signature2020"}});
		let err = verify(&doc, "not-a-real-pem");
		assert!(matches!(err, Err(Error::VerificationFormat(_))));
	}
}
