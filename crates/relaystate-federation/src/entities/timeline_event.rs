//! A row in an identity's home/notifications view.
//!
//! Grounded on spec.md §3: "Pure derived data; idempotent on its natural
//! key." Timeline events are write-once and never transition — they exist
//! for the workflow engine's bookkeeping (creation timestamp, per-model
//! `Stats`) but not for its scheduling: there is only ever one state.

use relaystate_types::snowflake::Id;
use relaystate_types::types::{StatorFields, Timestamp};
use serde::{Deserialize, Serialize};

use relaystate_types::error::ClResult;

use super::impl_stator_entity;
use crate::graphs::StateGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventKind {
	Post,
	Boost,
	Mentioned,
	Liked,
	Followed,
	IdentityCreated,
	Boosted,
	Announcement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
	pub id: Id,
	/// The identity whose timeline this row appears in.
	pub owner: Id,
	pub kind: TimelineEventKind,
	pub subject_post: Option<Id>,
	pub subject_post_interaction: Option<Id>,
	pub subject_identity: Option<Id>,
	pub created: Timestamp,
	pub fields: StatorFields,
}

impl_stator_entity!(TimelineEvent, "TimelineEvent");

impl TimelineEvent {
	pub const MODEL_NAME: &'static str = "TimelineEvent";

	/// The natural key idempotency is defined over: repeated inserts with
	/// the same tuple must be no-ops (an `INSERT OR IGNORE` / upsert at the
	/// store layer, not a stator concern).
	#[must_use]
	pub fn natural_key(&self) -> (Id, TimelineEventKind, Option<Id>, Option<Id>, Option<Id>) {
		(self.owner, self.kind, self.subject_post, self.subject_post_interaction, self.subject_identity)
	}
}

/// A single terminal state with `delete_after` unset: timeline rows are
/// pruned by retention policy at the application layer (not modelled here),
/// never by the stator delete sweep.
pub fn state_graph() -> ClResult<StateGraph> {
	StateGraph::build(TimelineEvent::MODEL_NAME, vec![crate::graphs::node("created")])
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn graph_builds_as_a_single_terminal_state() {
		let graph = state_graph().unwrap();
		assert_eq!(graph.initial, "created");
		assert!(graph.terminal_states().any(|s| s == "created"));
	}
}
