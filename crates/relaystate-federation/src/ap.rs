//! ActivityPub JSON-LD shapes and the minimal parsing helpers the inbox and
//! fan-out pipelines need.
//!
//! Grounded on spec.md §6: "`{@context, id, type, actor, object, published?,
//! to?, cc?}`. `object` may be a string (URI) or embedded dict." `object` is
//! the canonical "stringly-typed sum type" JSON-LD shape: everywhere else in
//! this pack (`relaystate-crypto::canon`) treats AS2 documents as bare
//! `serde_json::Value`, so `Activity` stays a thin typed view over a
//! `Value` rather than a fully round-trippable struct — re-serialising an
//! `Activity` is not a goal, only reading one.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use relaystate_types::error::{ClResult, Error};

/// The activity types spec.md §6 says this server recognises. Anything else
/// is `Unknown` and marks the owning `InboxMessage` as `errored` per the
/// inbox dispatch table's "Unknown activity types" rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityType {
	Create,
	Update,
	Delete,
	Follow,
	Accept,
	Reject,
	Undo,
	Like,
	Announce,
	Block,
	Add,
	Remove,
	Flag,
	Move,
	Unknown,
}

impl ActivityType {
	#[must_use]
	pub fn parse(raw: &str) -> Self {
		match raw {
			"Create" => Self::Create,
			"Update" => Self::Update,
			"Delete" => Self::Delete,
			"Follow" => Self::Follow,
			"Accept" => Self::Accept,
			"Reject" => Self::Reject,
			"Undo" => Self::Undo,
			"Like" => Self::Like,
			"Announce" => Self::Announce,
			"Block" => Self::Block,
			"Add" => Self::Add,
			"Remove" => Self::Remove,
			"Flag" => Self::Flag,
			"Move" => Self::Move,
			_ => Self::Unknown,
		}
	}
}

/// The object subtypes spec.md §6 lists: `Note`/`Question`/`Article` posts,
/// `Tombstone` for already-deleted remote objects, and the actor kinds used
/// when an activity's object is the actor document itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
	Note,
	Question,
	Article,
	Tombstone,
	Person,
	Service,
	Application,
	Group,
	Organization,
	EmojiReact,
	Unknown,
}

impl ObjectType {
	#[must_use]
	pub fn parse(raw: &str) -> Self {
		match raw {
			"Note" => Self::Note,
			"Question" => Self::Question,
			"Article" => Self::Article,
			"Tombstone" => Self::Tombstone,
			"Person" => Self::Person,
			"Service" => Self::Service,
			"Application" => Self::Application,
			"Group" => Self::Group,
			"Organization" => Self::Organization,
			"EmojiReact" => Self::EmojiReact,
			_ => Self::Unknown,
		}
	}

	#[must_use]
	pub fn is_actor(self) -> bool {
		matches!(self, Self::Person | Self::Service | Self::Application | Self::Group | Self::Organization)
	}
}

/// Either a bare URI reference or an embedded JSON-LD object, the shape
/// spec.md §6 says `object` (and `actor`) may take.
#[derive(Debug, Clone)]
pub enum ObjectRef {
	Uri(String),
	Embedded(Value),
}

impl ObjectRef {
	#[must_use]
	pub fn uri(&self) -> Option<&str> {
		match self {
			Self::Uri(uri) => Some(uri),
			Self::Embedded(value) => value.get("id").and_then(Value::as_str),
		}
	}

	#[must_use]
	pub fn object_type(&self) -> Option<ObjectType> {
		match self {
			Self::Uri(_) => None,
			Self::Embedded(value) => value.get("type").and_then(Value::as_str).map(ObjectType::parse),
		}
	}

	fn from_value(value: &Value) -> Option<Self> {
		match value {
			Value::String(uri) => Some(Self::Uri(uri.clone())),
			Value::Object(_) => Some(Self::Embedded(value.clone())),
			_ => None,
		}
	}
}

/// A typed, read-only view over a canonicalised AS2 activity document.
#[derive(Debug, Clone)]
pub struct Activity {
	pub activity_type: ActivityType,
	pub id: Option<String>,
	pub actor_uri: String,
	pub object: Option<ObjectRef>,
	pub to: Vec<String>,
	pub cc: Vec<String>,
	pub raw: Value,
}

impl Activity {
	/// Parses `body` (already JSON-LD canonicalised by the caller) into a
	/// typed `Activity`. Step 7 of spec.md §4.2 ("reject messages whose
	/// top-level `type` begins with `__`") is enforced here, as
	/// `Error::ActivityPubFormat`.
	pub fn from_canonical(body: &Value) -> ClResult<Self> {
		let type_raw = body
			.get("type")
			.and_then(Value::as_str)
			.ok_or_else(|| Error::ActivityPubFormat("missing top-level type".into()))?;
		if type_raw.starts_with("__") {
			return Err(Error::ActivityPubFormat(format!("reserved internal type {type_raw}")));
		}
		let actor_uri = body
			.get("actor")
			.and_then(Value::as_str)
			.or_else(|| body.get("actor").and_then(|a| a.get("id")).and_then(Value::as_str))
			.ok_or_else(|| Error::ActivityPubFormat("missing actor".into()))?
			.to_string();
		let object = body.get("object").and_then(ObjectRef::from_value);
		let to = string_array(body.get("to"));
		let cc = string_array(body.get("cc"));
		Ok(Self {
			activity_type: ActivityType::parse(type_raw),
			id: body.get("id").and_then(Value::as_str).map(ToString::to_string),
			actor_uri,
			object,
			to,
			cc,
			raw: body.clone(),
		})
	}

	/// Lemmy-style `Announce` wrapping one of `{Like, Dislike, Create, Undo,
	/// Update}` — spec.md §4.2 step 4's "known-ignorable types" rule. These
	/// are accepted (202) and dropped before dispatch, never reaching
	/// `errored`.
	#[must_use]
	pub fn is_known_ignorable(&self) -> bool {
		if self.activity_type != ActivityType::Announce {
			return false;
		}
		let Some(ObjectRef::Embedded(inner)) = &self.object else {
			return false;
		};
		matches!(
			inner.get("type").and_then(Value::as_str),
			Some("Like" | "Dislike" | "Create" | "Undo" | "Update")
		)
	}
}

fn string_array(value: Option<&Value>) -> Vec<String> {
	match value {
		Some(Value::Array(items)) => {
			items.iter().filter_map(Value::as_str).map(ToString::to_string).collect()
		}
		Some(Value::String(single)) => vec![single.clone()],
		_ => vec![],
	}
}

/// The `tag: [{type: "Emoji", ...}]` entries spec.md §8 scenario 4 describes
/// for shortcode emoji ingest.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmojiTag {
	pub name: String,
	pub id: String,
	pub icon: EmojiIcon,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmojiIcon {
	pub url: String,
	pub media_type: String,
}

/// Extracts `Emoji`-typed entries from an object's `tag` array, stripping
/// the leading/trailing `:` from `name` to recover the bare shortcode.
#[must_use]
pub fn extract_emoji_tags(object: &Value) -> Vec<EmojiTag> {
	let Some(Value::Array(tags)) = object.get("tag") else {
		return vec![];
	};
	tags.iter()
		.filter(|tag| tag.get("type").and_then(Value::as_str) == Some("Emoji"))
		.filter_map(|tag| {
			let name = tag.get("name")?.as_str()?.trim_matches(':').to_string();
			let id = tag.get("id")?.as_str()?.to_string();
			let icon = tag.get("icon")?;
			let url = icon.get("url")?.as_str()?.to_string();
			let media_type = icon.get("mediaType")?.as_str()?.to_string();
			Some(EmojiTag { name, id, icon: EmojiIcon { url, media_type } })
		})
		.collect()
}

/// Extracts `Mention`-typed entries from an object's `tag` array, returning
/// the mentioned actor URIs (`href`).
#[must_use]
pub fn extract_mention_uris(object: &Value) -> Vec<String> {
	let Some(Value::Array(tags)) = object.get("tag") else {
		return vec![];
	};
	tags.iter()
		.filter(|tag| tag.get("type").and_then(Value::as_str) == Some("Mention"))
		.filter_map(|tag| tag.get("href").and_then(Value::as_str).map(ToString::to_string))
		.collect()
}

/// Extracts `Hashtag`-typed entries from an object's `tag` array, returning
/// lower-cased names with the leading `#` stripped.
#[must_use]
pub fn extract_hashtags(object: &Value) -> Vec<String> {
	let Some(Value::Array(tags)) = object.get("tag") else {
		return vec![];
	};
	tags.iter()
		.filter(|tag| tag.get("type").and_then(Value::as_str) == Some("Hashtag"))
		.filter_map(|tag| tag.get("name").and_then(Value::as_str))
		.map(|name| name.trim_start_matches('#').to_lowercase())
		.filter(|name| !name.is_empty())
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn parses_a_minimal_follow_activity() {
		let body = json!({
			"type": "Follow",
			"actor": "https://remote.example/users/bob",
			"object": "https://example.social/users/alice",
		});
		let activity = Activity::from_canonical(&body).unwrap();
		assert_eq!(activity.activity_type, ActivityType::Follow);
		assert_eq!(activity.actor_uri, "https://remote.example/users/bob");
		assert_eq!(activity.object.unwrap().uri(), Some("https://example.social/users/alice"));
	}

	#[test]
	fn rejects_reserved_internal_types() {
		let body = json!({"type": "__Synthetic", "actor": "https://remote.example/users/bob"});
		assert!(Activity::from_canonical(&body).is_err());
	}

	#[test]
	fn rejects_missing_actor() {
		let body = json!({"type": "Follow"});
		assert!(Activity::from_canonical(&body).is_err());
	}

	#[test]
	fn recognises_lemmy_style_announce_wrapping_a_like() {
		let body = json!({
			"type": "Announce",
			"actor": "https://lemmy.example/c/community",
			"object": {"type": "Like", "actor": "https://remote.example/users/bob", "object": "https://example.social/posts/1"},
		});
		let activity = Activity::from_canonical(&body).unwrap();
		assert!(activity.is_known_ignorable());
	}

	#[test]
	fn does_not_flag_an_announce_of_a_note_as_ignorable() {
		let body = json!({
			"type": "Announce",
			"actor": "https://remote.example/users/bob",
			"object": "https://example.social/posts/1",
		});
		let activity = Activity::from_canonical(&body).unwrap();
		assert!(!activity.is_known_ignorable());
	}

	#[test]
	fn extracts_emoji_tags_with_bare_shortcodes() {
		let object = json!({
			"tag": [{"type": "Emoji", "name": ":blob:", "id": "https://remote.example/emoji/blob", "icon": {"url": "https://remote.example/emoji/blob.png", "mediaType": "image/png"}}],
		});
		let tags = extract_emoji_tags(&object);
		assert_eq!(tags.len(), 1);
		assert_eq!(tags[0].name, "blob");
		assert_eq!(tags[0].icon.media_type, "image/png");
	}

	#[test]
	fn extracts_mention_hrefs() {
		let object = json!({"tag": [{"type": "Mention", "href": "https://example.social/users/alice"}]});
		assert_eq!(extract_mention_uris(&object), vec!["https://example.social/users/alice".to_string()]);
	}

	#[test]
	fn extracts_and_lowercases_hashtag_names() {
		let object = json!({"tag": [{"type": "Hashtag", "name": "#RustLang"}]});
		assert_eq!(extract_hashtags(&object), vec!["rustlang".to_string()]);
	}
}
