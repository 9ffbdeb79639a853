//! Directed follow relation from a source identity to a target identity.
//!
//! Grounded on `original_source/stator/models.py`'s `InboxMessage`/`Follow`
//! state names and spec.md §8 scenario 1 (`unrequested → local_requested →
//! accepted`), generalised with a `remote_requested` branch for the inbound
//! side of the same relation (spec.md §4.2's dispatch table: `Follow → create
//! pending Follow row (remote_requested)`).

use relaystate_types::snowflake::Id;
use relaystate_types::types::{StatorFields, Timestamp};
use serde::{Deserialize, Serialize};

use relaystate_types::error::ClResult;

use super::impl_stator_entity;
use crate::graphs::StateGraph;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Follow {
	pub id: Id,
	pub source: Id,
	pub target: Id,
	/// The AP id of the `Follow` activity, assigned once it is sent or
	/// received. `None` only in the instant between row creation and the
	/// `unrequested` handler's first attempt.
	pub uri: Option<String>,
	/// Whether boosts by the target should also be delivered to the source
	/// (Mastodon-style per-follow boost muting).
	pub boosts: bool,
	pub created: Timestamp,
	pub fields: StatorFields,
}

impl_stator_entity!(Follow, "Follow");

impl Follow {
	pub const MODEL_NAME: &'static str = "Follow";
}

/// `unrequested` (initial — every locally-created follow starts here, and
/// the handler decides whether it needs outbound delivery or can resolve
/// immediately) splits into `local_requested` (outbound delivery pending)
/// or `remote_requested`/`accepted` (reached directly by row-creation for
/// inbound follows and for unmoderated local targets, never through the
/// handler — see DESIGN.md's note on why `unrequested` still declares both
/// as children to keep the single-initial-state invariant honest).
pub fn state_graph() -> ClResult<StateGraph> {
	StateGraph::build(
		Follow::MODEL_NAME,
		vec![
			crate::graphs::node("unrequested")
				.try_interval(0)
				.handler()
				.transitions_to("local_requested")
				.transitions_to("remote_requested")
				.transitions_to("accepted"),
			crate::graphs::node("local_requested")
				.try_interval(600)
				.handler()
				.transitions_to("accepted")
				.transitions_to("rejected")
				.transitions_to("undone"),
			crate::graphs::node("remote_requested")
				.externally_progressed()
				.transitions_to("accepted")
				.transitions_to("rejected"),
			crate::graphs::node("accepted").externally_progressed().transitions_to("undone"),
			crate::graphs::node("rejected").delete_after(86_400),
			crate::graphs::node("undone").delete_after(86_400),
		],
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn graph_builds() {
		let graph = state_graph().unwrap();
		assert_eq!(graph.initial, "unrequested");
		assert!(graph.is_valid_transition("remote_requested", "accepted"));
		assert!(graph.is_valid_transition("local_requested", "undone"));
	}
}
