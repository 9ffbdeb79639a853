//! Content authored by an identity: a note, question, article, or similar.
//!
//! Grounded on spec.md §3's Post data-model entry and §4.3's fan-out
//! dispatch table (`post`/`post_edited`/`post_deleted` FanOut kinds): the
//! handler that creates the FanOut rows for a new post is the `new` state's
//! handler, matching `relaystate_federation::interaction`'s `new → fanned_out`
//! shape. `Update`/`Delete` activities act on an already-`fanned_out` post
//! without moving it through its own per-edit state — spec.md never lists an
//! `edited` Post state, only an `identity_edited`/`post_edited` FanOut kind,
//! so edits are modelled as in-place field patches (see `Patch<T>`) plus a
//! fresh batch of FanOut rows, not a state transition.

use relaystate_types::snowflake::Id;
use relaystate_types::types::{StatorFields, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use relaystate_types::error::ClResult;

use super::impl_stator_entity;
use crate::graphs::StateGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
	Public,
	Unlisted,
	Followers,
	Mentioned,
	LocalOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostType {
	Note,
	Question,
	Article,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
	pub id: Id,
	pub author: Id,
	pub local: bool,
	pub object_uri: String,
	pub visibility: Visibility,
	pub content: String,
	pub summary: Option<String>,
	pub sensitive: bool,
	pub url: Option<String>,
	/// An AP URI, never a foreign key — the referenced post may not exist
	/// locally.
	pub in_reply_to: Option<String>,
	pub to: Vec<Id>,
	pub mentions: Vec<Id>,
	pub emojis: Vec<Id>,
	pub hashtags: Vec<Id>,
	pub attachments: Vec<Id>,
	pub kind: PostType,
	/// Polymorphic per `kind`: question options/vote counts/end time,
	/// article title, etc.
	pub type_data: Value,
	pub published: Timestamp,
	pub edited: Option<Timestamp>,
	pub fields: StatorFields,
}

impl_stator_entity!(Post, "Post");

impl Post {
	pub const MODEL_NAME: &'static str = "Post";

	/// A Question whose `end_time` (in `type_data`) has passed rejects new
	/// votes (spec.md §8 scenario 6), independent of `state`.
	#[must_use]
	pub fn poll_closed(&self, now: Timestamp) -> bool {
		if self.kind != PostType::Question {
			return false;
		}
		let Some(end_time) = self.type_data.get("end_time").and_then(Value::as_i64) else {
			return false;
		};
		now.0 / 1000 >= end_time
	}
}

/// `new` enumerates the recipient set and writes the FanOut batch, then
/// settles in `fanned_out` for the rest of the post's life; only a `Delete`
/// moves it further, to `deleted`.
pub fn state_graph() -> ClResult<StateGraph> {
	StateGraph::build(
		Post::MODEL_NAME,
		vec![
			crate::graphs::node("new").try_interval(0).handler().transitions_to("fanned_out"),
			crate::graphs::node("fanned_out").externally_progressed().transitions_to("deleted"),
			crate::graphs::node("deleted"),
		],
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn graph_builds() {
		let graph = state_graph().unwrap();
		assert_eq!(graph.initial, "new");
		assert!(graph.is_valid_transition("new", "fanned_out"));
		assert!(graph.is_valid_transition("fanned_out", "deleted"));
	}

	fn sample_post(type_data: Value) -> Post {
		Post {
			id: Id::new(relaystate_types::snowflake::EntityTag::Post),
			author: Id::new(relaystate_types::snowflake::EntityTag::Identity),
			local: true,
			object_uri: "https://example.social/posts/1".into(),
			visibility: Visibility::Public,
			content: "<p>hello</p>".into(),
			summary: None,
			sensitive: false,
			url: None,
			in_reply_to: None,
			to: vec![],
			mentions: vec![],
			emojis: vec![],
			hashtags: vec![],
			attachments: vec![],
			kind: PostType::Question,
			type_data,
			published: Timestamp::now(),
			edited: None,
			fields: StatorFields::initial("fanned_out"),
		}
	}

	#[test]
	fn a_question_past_its_end_time_is_closed() {
		let post = sample_post(json!({"end_time": 0}));
		assert!(post.poll_closed(Timestamp::now()));
	}

	#[test]
	fn a_question_without_an_end_time_is_never_closed() {
		let post = sample_post(json!({}));
		assert!(!post.poll_closed(Timestamp::now()));
	}
}
