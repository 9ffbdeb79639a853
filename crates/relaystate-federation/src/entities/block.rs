//! Directed block (or mute) from a source identity to a target identity.
//!
//! Grounded on spec.md §3's Block invariant ("mutes never produce outbound
//! AP traffic; full blocks do"): the `new` handler branches on `mute` before
//! ever touching the network, generalising `relaystate_federation::fan_out`'s
//! local/remote dispatch split to a single-recipient delivery.

use relaystate_types::snowflake::Id;
use relaystate_types::types::{StatorFields, Timestamp};
use serde::{Deserialize, Serialize};

use relaystate_types::error::ClResult;

use super::impl_stator_entity;
use crate::graphs::StateGraph;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
	pub id: Id,
	pub source: Id,
	pub target: Id,
	pub mute: bool,
	pub include_notifications: bool,
	pub expires: Option<Timestamp>,
	pub created: Timestamp,
	pub fields: StatorFields,
}

impl_stator_entity!(Block, "Block");

impl Block {
	pub const MODEL_NAME: &'static str = "Block";
}

/// `new` delivers the `Block` activity (skipped entirely for mutes) and
/// retries on transient failure; `active` waits for an explicit `Undo` or
/// expiry sweep (see `relaystate_federation::block` module for the expiry
/// check, which runs alongside the fan-out handler rather than as its own
/// stator state, since "expired" isn't one of spec.md's declared states).
pub fn state_graph() -> ClResult<StateGraph> {
	StateGraph::build(
		Block::MODEL_NAME,
		vec![
			crate::graphs::node("new").try_interval(600).handler().transitions_to("active"),
			crate::graphs::node("active").externally_progressed().transitions_to("undone"),
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
		assert_eq!(graph.initial, "new");
		assert!(graph.is_valid_transition("new", "active"));
		assert!(graph.is_valid_transition("active", "undone"));
	}
}
