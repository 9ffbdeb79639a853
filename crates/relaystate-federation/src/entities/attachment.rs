//! A media attachment (image, video, audio) referenced by a post.
//!
//! Grounded on spec.md §3 ("PostAttachment, Emoji, Hashtag — media/content
//! references with their own state graphs (new → fetched, outdated →
//! updated)"): remote attachments are fetched once and left alone; local
//! ones skip straight to `fetched` at creation time (handler is a no-op that
//! just confirms on-disk presence before the first attempt even runs).

use relaystate_types::snowflake::Id;
use relaystate_types::types::{StatorFields, Timestamp};
use serde::{Deserialize, Serialize};

use relaystate_types::error::ClResult;

use super::impl_stator_entity;
use crate::graphs::StateGraph;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostAttachment {
	pub id: Id,
	pub post: Id,
	pub local: bool,
	pub mimetype: String,
	pub remote_url: Option<String>,
	pub local_path: Option<String>,
	pub description: Option<String>,
	pub width: Option<u32>,
	pub height: Option<u32>,
	pub blurhash: Option<String>,
	pub created: Timestamp,
	pub fields: StatorFields,
}

impl_stator_entity!(PostAttachment, "PostAttachment");

impl PostAttachment {
	pub const MODEL_NAME: &'static str = "PostAttachment";
}

/// `new` downloads the remote blob (or, for local attachments, confirms it
/// is already on disk) and settles in `fetched`, which never changes again
/// — attachments are immutable once a post is published.
pub fn state_graph() -> ClResult<StateGraph> {
	StateGraph::build(
		PostAttachment::MODEL_NAME,
		vec![
			crate::graphs::node("new").try_interval(600).handler().transitions_to("fetched"),
			crate::graphs::node("fetched"),
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
		assert!(graph.is_valid_transition("new", "fetched"));
	}
}
