//! A moderation report, created by the inbox's `Flag` handler (spec.md
//! §4.2: "Flag → create a Report row").
//!
//! `Report` has no data-model entry in spec.md §3; grounded on the
//! Takahe-style moderation report shape described in SPEC_FULL.md §3.

use relaystate_types::snowflake::Id;
use relaystate_types::types::{StatorFields, Timestamp};
use serde::{Deserialize, Serialize};

use relaystate_types::error::ClResult;

use super::impl_stator_entity;
use crate::graphs::StateGraph;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
	pub id: Id,
	/// The reporting identity; `None` for server-generated reports (e.g.
	/// automated spam detection, out of scope here but reserved on the row).
	pub source: Option<Id>,
	pub subject_identity: Id,
	pub subject_post: Option<Id>,
	pub complaint: String,
	pub created: Timestamp,
	pub forwarded: Option<Timestamp>,
	pub fields: StatorFields,
}

impl_stator_entity!(Report, "Report");

impl Report {
	pub const MODEL_NAME: &'static str = "Report";
}

/// `new` delivers the report to the subject's moderators (or, for a local
/// subject, just files it) and moves to `forwarded`; moderation UI out of
/// scope picks up from there, driving `forwarded → resolved`/`dismissed`
/// directly without the engine's involvement.
pub fn state_graph() -> ClResult<StateGraph> {
	StateGraph::build(
		Report::MODEL_NAME,
		vec![
			crate::graphs::node("new").try_interval(600).handler().transitions_to("forwarded"),
			crate::graphs::node("forwarded")
				.externally_progressed()
				.transitions_to("resolved")
				.transitions_to("dismissed"),
			crate::graphs::node("resolved").delete_after(365 * 86_400),
			crate::graphs::node("dismissed").delete_after(365 * 86_400),
		],
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn graph_builds() {
		let graph = state_graph().unwrap();
		assert_eq!(graph.initial, "new");
		assert!(graph.is_valid_transition("forwarded", "resolved"));
		assert!(graph.is_valid_transition("forwarded", "dismissed"));
	}
}
