//! A single pending delivery unit: one recipient, one outbound (or local
//! timeline) effect of a source entity's transition.
//!
//! Grounded on spec.md §4.3's dispatch table and §3's FanOut row shape, and
//! on spec.md §4.1's `timeout → timeout_state` mechanic for the `new` state's
//! "`failed` (timeout after 3 days)" rule.

use relaystate_types::snowflake::Id;
use relaystate_types::types::{StatorFields, Timestamp};
use serde::{Deserialize, Serialize};

use relaystate_types::error::ClResult;

use super::impl_stator_entity;
use crate::graphs::StateGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutKind {
	Post,
	PostEdited,
	PostDeleted,
	Interaction,
	UndoInteraction,
	IdentityEdited,
	IdentityDeleted,
	IdentityCreated,
	IdentityMoved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOut {
	pub id: Id,
	/// The recipient identity this row delivers to.
	pub identity: Id,
	pub kind: FanOutKind,
	pub subject_post: Option<Id>,
	pub subject_post_interaction: Option<Id>,
	pub subject_identity: Option<Id>,
	pub created: Timestamp,
	pub fields: StatorFields,
}

impl_stator_entity!(FanOut, "FanOut");

impl FanOut {
	pub const MODEL_NAME: &'static str = "FanOut";
}

/// `new` retries delivery every `try_interval` (spec.md §4.3's default
/// 600s) until it reaches a terminal state, or until `timeout` (3 days)
/// forces a transition to `failed`. All three terminal states share the
/// 24h tombstone retention spec.md §4.3 prescribes for fan-outs.
pub fn state_graph() -> ClResult<StateGraph> {
	StateGraph::build(
		FanOut::MODEL_NAME,
		vec![
			crate::graphs::node("new")
				.try_interval(600)
				.handler()
				.timeout(3 * 86_400, "failed")
				.transitions_to("sent")
				.transitions_to("skipped")
				.transitions_to("failed"),
			crate::graphs::node("sent").delete_after(86_400),
			crate::graphs::node("skipped").delete_after(86_400),
			crate::graphs::node("failed").delete_after(86_400),
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
		assert_eq!(graph.node("new").unwrap().timeout, Some((3 * 86_400, "failed")));
	}
}
