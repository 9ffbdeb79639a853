//! Known remote (and local) domains: not stator-managed (no lifecycle
//! beyond create/moderate), just a lookup table for blocklisting and
//! software fingerprinting.
//!
//! Grounded on spec.md §3's Domain data-model entry, including its
//! "recursively blocked" invariant (a domain is blocked if it or any parent
//! suffix is blocked).

use relaystate_types::snowflake::Id;
use relaystate_types::types::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
	pub id: Id,
	/// The display hostname, e.g. `mastodon.example`.
	pub domain: String,
	/// The host actually serving AP traffic for `domain`, if it differs
	/// (reverse-proxy or multi-tenant setups).
	pub service_domain: Option<String>,
	pub local: bool,
	pub blocked: bool,
	pub public: bool,
	/// The raw fetched `/nodeinfo` document, if any.
	pub nodeinfo: Option<Value>,
	pub first_seen: Timestamp,
}

impl Domain {
	pub const MODEL_NAME: &'static str = "Domain";

	/// True if `candidate` equals this row's hostname or is a subdomain of
	/// it, and this row is blocked — the "recursively blocked" rule from
	/// spec.md §3.
	#[must_use]
	pub fn blocks(&self, candidate: &str) -> bool {
		self.blocked && (candidate == self.domain || candidate.ends_with(&format!(".{}", self.domain)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample(domain: &str, blocked: bool) -> Domain {
		Domain {
			id: Id::new(relaystate_types::snowflake::EntityTag::Other),
			domain: domain.to_string(),
			service_domain: None,
			local: false,
			blocked,
			public: true,
			nodeinfo: None,
			first_seen: Timestamp::now(),
		}
	}

	#[test]
	fn a_blocked_domain_blocks_itself_and_its_subdomains() {
		let row = sample("bad.example", true);
		assert!(row.blocks("bad.example"));
		assert!(row.blocks("sub.bad.example"));
		assert!(!row.blocks("notbad.example"));
	}

	#[test]
	fn an_unblocked_domain_blocks_nothing() {
		let row = sample("good.example", false);
		assert!(!row.blocks("good.example"));
	}
}
