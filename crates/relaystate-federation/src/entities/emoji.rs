//! A custom emoji, local or remote, referenced by shortcode in post content
//! and tags.
//!
//! Grounded on spec.md §8 scenario 4 (shortcode emoji ingest produces an
//! Emoji row with `state=outdated`) and §3's `new → fetched, outdated →
//! updated` shape: remote emoji start `outdated` because the inbound Create
//! handler only ever has the `icon.url` from the activity, never the image
//! bytes, so a follow-up fetch is always required before it can be served.

use relaystate_types::snowflake::Id;
use relaystate_types::types::{StatorFields, Timestamp};
use serde::{Deserialize, Serialize};

use relaystate_types::error::ClResult;

use super::impl_stator_entity;
use crate::graphs::StateGraph;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Emoji {
	pub id: Id,
	pub shortcode: String,
	pub local: bool,
	pub mimetype: String,
	pub remote_url: Option<String>,
	pub local_path: Option<String>,
	/// Only set for locally authored emoji; `false` for remote ones that
	/// administrators have not yet reviewed (see
	/// `emoji_unreviewed_are_public` in the configuration store).
	pub visible_in_picker: bool,
	pub created: Timestamp,
	pub fields: StatorFields,
}

impl_stator_entity!(Emoji, "Emoji");

impl Emoji {
	pub const MODEL_NAME: &'static str = "Emoji";
}

/// Local emoji are created directly in `fetched`. Remote emoji land in
/// `outdated` (icon URL known, image not yet mirrored), move to `fetched`
/// once downloaded, and fall back to `outdated` whenever a later activity
/// advertises a changed `icon.url` for the same shortcode+origin.
pub fn state_graph() -> ClResult<StateGraph> {
	StateGraph::build(
		Emoji::MODEL_NAME,
		vec![
			crate::graphs::node("outdated")
				.try_interval(600)
				.handler()
				.transitions_to("fetched"),
			crate::graphs::node("fetched").externally_progressed().transitions_to("outdated"),
		],
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn graph_builds() {
		let graph = state_graph().unwrap();
		assert_eq!(graph.initial, "outdated");
		assert!(graph.is_valid_transition("outdated", "fetched"));
		assert!(graph.is_valid_transition("fetched", "outdated"));
	}
}
