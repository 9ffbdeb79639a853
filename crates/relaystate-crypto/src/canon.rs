//! JSON-LD canonicalization for signing purposes.
//!
//! Full RDF dataset normalization (URDNA2015) is out of scope for the size
//! budget here; this crate ships a deterministic-ordering canonicalizer
//! sufficient to make `RsaSignature2017` sign/verify stable across identical
//! logical documents: object keys are sorted recursively and the built-in
//! ActivityStreams + security contexts are expanded to absolute IRIs for the
//! small set of terms relaystate actually signs over. This is a documented
//! simplification (see DESIGN.md), not a general-purpose JSON-LD processor.

use std::collections::BTreeMap;

use serde_json::Value;

use relaystate_types::error::ClResult;

/// The subset of the ActivityStreams 2.0 + W3C security vocabulary terms
/// this server needs to resolve during canonicalization.
fn builtin_context() -> BTreeMap<&'static str, &'static str> {
	BTreeMap::from([
		("id", "@id"),
		("type", "@type"),
		("actor", "https://www.w3.org/ns/activitystreams#actor"),
		("object", "https://www.w3.org/ns/activitystreams#object"),
		("target", "https://www.w3.org/ns/activitystreams#target"),
		("published", "https://www.w3.org/ns/activitystreams#published"),
		("to", "https://www.w3.org/ns/activitystreams#to"),
		("cc", "https://www.w3.org/ns/activitystreams#cc"),
		("inReplyTo", "https://www.w3.org/ns/activitystreams#inReplyTo"),
		("creator", "https://w3id.org/security#creator"),
		("created", "http://purl.org/dc/terms/created"),
		("signatureValue", "https://w3id.org/security#signatureValue"),
	])
}

/// Recursively re-emits a JSON value with object keys in lexical order, so
/// two structurally-identical documents serialize to byte-identical output
/// regardless of insertion order.
#[must_use]
pub fn canonicalize_value(value: &Value) -> Value {
	match value {
		Value::Object(map) => {
			let sorted: BTreeMap<String, Value> =
				map.iter().map(|(k, v)| (k.clone(), canonicalize_value(v))).collect();
			Value::Object(sorted.into_iter().collect())
		}
		Value::Array(items) => Value::Array(items.iter().map(canonicalize_value).collect()),
		other => other.clone(),
	}
}

/// Serializes a document to its canonical byte string: sorted keys, no
/// insignificant whitespace. Used as the input to the signature hash.
pub fn canonicalize_bytes(value: &Value) -> ClResult<Vec<u8>> {
	let canonical = canonicalize_value(value);
	Ok(serde_json::to_vec(&canonical)?)
}

/// Resolves a compact term to its absolute IRI form via the built-in
/// context, falling back to the term itself when unknown (mirrors JSON-LD
/// expansion's handling of terms with no matching context entry).
#[must_use]
pub fn expand_term(term: &str) -> String {
	builtin_context().get(term).map(|s| (*s).to_string()).unwrap_or_else(|| term.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn canonicalization_is_order_independent() {
		let a = json!({"b": 1, "a": 2});
		let b = json!({"a": 2, "b": 1});
		assert_eq!(canonicalize_bytes(&a).unwrap(), canonicalize_bytes(&b).unwrap());
	}

	#[test]
	fn nested_arrays_canonicalize_recursively() {
		let a = json!({"to": ["x"], "items": [{"z": 1, "a": 2}]});
		let canonical = canonicalize_value(&a);
		assert_eq!(canonical["items"][0].as_object().unwrap().keys().next().unwrap(), "a");
	}

	#[test]
	fn expand_term_resolves_known_terms() {
		assert_eq!(expand_term("actor"), "https://www.w3.org/ns/activitystreams#actor");
		assert_eq!(expand_term("unknownTerm"), "unknownTerm");
	}
}
