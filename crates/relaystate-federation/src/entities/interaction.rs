//! Like / boost / vote / pin: a single interaction of an identity on a post.
//!
//! Grounded on spec.md §8 scenario 5 ("Undo like ... transitions the
//! interaction to `undone_fanned_out`") for the exact terminal state name,
//! and on spec.md §3's invariant that at most one *active* (`new` or
//! `fanned_out`) interaction exists per `(identity, post, type)`.

use relaystate_types::snowflake::Id;
use relaystate_types::types::{StatorFields, Timestamp};
use serde::{Deserialize, Serialize};

use relaystate_types::error::ClResult;

use super::impl_stator_entity;
use crate::graphs::StateGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
	Like,
	Boost,
	Vote,
	Pin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostInteraction {
	pub id: Id,
	pub kind: InteractionKind,
	pub identity: Id,
	pub post: Id,
	/// The chosen option text, only set for `Vote`.
	pub value: Option<String>,
	pub object_uri: Option<String>,
	pub published: Timestamp,
	pub fields: StatorFields,
}

impl_stator_entity!(PostInteraction, "PostInteraction");

impl PostInteraction {
	pub const MODEL_NAME: &'static str = "PostInteraction";
}

/// `new` (fan out if locally authored, no-op if ingested from a remote
/// origin) → `fanned_out` (externally progressed, waits for an `Undo`) →
/// `undone` (enumerate undo fan-outs) → `undone_fanned_out` (terminal,
/// 24h tombstone per spec.md §4.3's fan-out retention).
pub fn state_graph() -> ClResult<StateGraph> {
	StateGraph::build(
		PostInteraction::MODEL_NAME,
		vec![
			crate::graphs::node("new").try_interval(0).handler().transitions_to("fanned_out"),
			crate::graphs::node("fanned_out").externally_progressed().transitions_to("undone"),
			crate::graphs::node("undone").try_interval(600).handler().transitions_to("undone_fanned_out"),
			crate::graphs::node("undone_fanned_out").delete_after(86_400),
		],
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn graph_builds_with_exact_scenario_state_names() {
		let graph = state_graph().unwrap();
		assert_eq!(graph.initial, "new");
		assert!(graph.is_valid_transition("undone", "undone_fanned_out"));
	}
}
