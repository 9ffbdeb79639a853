//! A raw JSON-LD document received over `/inbox/`, awaiting dispatch.
//!
//! Grounded on spec.md §4.2's receive contract (the HTTP handler persists
//! the validated-but-undispatched body in `received`, then returns 202
//! immediately) and §3's 3-day audit retention.

use relaystate_types::snowflake::Id;
use relaystate_types::types::{StatorFields, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use relaystate_types::error::ClResult;

use super::impl_stator_entity;
use crate::graphs::StateGraph;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
	pub id: Id,
	/// The actor URI that sent this, after `actor` extraction (step 2 of
	/// spec.md §4.2), even if the actor is not yet resolved to a full
	/// `Identity` row.
	pub sender_actor_uri: String,
	/// The full parsed JSON-LD body, canonicalised (step 1).
	pub body: Value,
	pub received: Timestamp,
	pub fields: StatorFields,
}

impl_stator_entity!(InboxMessage, "InboxMessage");

impl InboxMessage {
	pub const MODEL_NAME: &'static str = "InboxMessage";

	#[must_use]
	pub fn activity_type(&self) -> Option<&str> {
		self.body.get("type").and_then(Value::as_str)
	}

	#[must_use]
	pub fn object_type(&self) -> Option<&str> {
		self.body.get("object")?.get("type")?.as_str()
	}
}

/// `received` dispatches by `(type, object.type)` (spec.md §4.2's table) and
/// lands on `processed` or `errored`; both are retained 3 days for audit.
pub fn state_graph() -> ClResult<StateGraph> {
	StateGraph::build(
		InboxMessage::MODEL_NAME,
		vec![
			crate::graphs::node("received")
				.try_interval(0)
				.handler()
				.transitions_to("processed")
				.transitions_to("errored"),
			crate::graphs::node("processed").delete_after(3 * 86_400),
			crate::graphs::node("errored").delete_after(3 * 86_400),
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
		assert_eq!(graph.initial, "received");
	}

	#[test]
	fn activity_and_object_type_read_through_the_body() {
		let msg = InboxMessage {
			id: Id::new(relaystate_types::snowflake::EntityTag::Other),
			sender_actor_uri: "https://remote.example/users/bob".into(),
			body: json!({"type": "Create", "object": {"type": "Note"}}),
			received: Timestamp::now(),
			fields: StatorFields::initial("received"),
		};
		assert_eq!(msg.activity_type(), Some("Create"));
		assert_eq!(msg.object_type(), Some("Note"));
	}
}
