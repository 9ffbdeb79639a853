//! A `#tag` extracted from post content, tracked for trend/volume stats.
//!
//! Grounded on spec.md §3's `new → fetched, outdated → updated` shape,
//! narrowed to hashtags' own lifecycle: there is nothing to download, only
//! usage counters to (re)compute, so `fetched`/`updated` both mean "counters
//! current as of `state_changed`".

use relaystate_types::snowflake::Id;
use relaystate_types::types::{StatorFields, Timestamp};
use serde::{Deserialize, Serialize};

use relaystate_types::error::ClResult;

use super::impl_stator_entity;
use crate::graphs::StateGraph;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hashtag {
	pub id: Id,
	/// Lower-cased, without the leading `#`.
	pub name: String,
	pub usage_count: u64,
	pub last_used: Timestamp,
	pub fields: StatorFields,
}

impl_stator_entity!(Hashtag, "Hashtag");

impl Hashtag {
	pub const MODEL_NAME: &'static str = "Hashtag";
}

/// `new` computes the initial counters and moves to `fetched`; from there a
/// scheduled re-tally moves it through `outdated` back to `updated` on the
/// same `try_interval` cadence as attachment/emoji re-sync.
pub fn state_graph() -> ClResult<StateGraph> {
	StateGraph::build(
		Hashtag::MODEL_NAME,
		vec![
			crate::graphs::node("new").try_interval(0).handler().transitions_to("fetched"),
			crate::graphs::node("fetched").externally_progressed().transitions_to("outdated"),
			crate::graphs::node("outdated")
				.try_interval(3600)
				.handler()
				.transitions_to("updated"),
			crate::graphs::node("updated").externally_progressed().transitions_to("outdated"),
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
		assert!(graph.is_valid_transition("outdated", "updated"));
		assert!(graph.is_valid_transition("updated", "outdated"));
	}
}
