//! Scalar types shared across every crate: timestamps, PATCH-semantics
//! partial updates, and the five workflow columns every stator-managed
//! entity carries.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
	#[must_use]
	pub fn now() -> Self {
		Self(chrono::Utc::now().timestamp_millis())
	}

	#[must_use]
	pub fn from_now(delta_seconds: i64) -> Self {
		Self::now().add_seconds(delta_seconds)
	}

	#[must_use]
	pub fn add_seconds(self, seconds: i64) -> Self {
		Self(self.0 + seconds * 1000)
	}

	#[must_use]
	pub fn seconds_since(self, other: Self) -> i64 {
		(self.0 - other.0) / 1000
	}

	#[must_use]
	pub fn to_rfc2822(self) -> String {
		chrono::DateTime::from_timestamp_millis(self.0)
			.unwrap_or_default()
			.to_rfc2822()
	}

	/// `xsd:dateTime` rendering (e.g. `2024-01-01T00:00:00Z`), the timestamp
	/// format every AS2 `published`/`updated` field uses.
	#[must_use]
	pub fn to_rfc3339(self) -> String {
		chrono::DateTime::from_timestamp_millis(self.0)
			.unwrap_or_default()
			.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
	}
}

/// Represents a field in a PATCH-style partial update: absent from the
/// payload (`Undefined`), explicitly nulled (`Null`), or set to a value.
#[derive(Debug, Clone, Default)]
pub enum Patch<T> {
	#[default]
	Undefined,
	Null,
	Value(T),
}

impl<T> Patch<T> {
	#[must_use]
	pub fn is_undefined(&self) -> bool {
		matches!(self, Self::Undefined)
	}

	#[must_use]
	pub fn into_option(self) -> Option<Option<T>> {
		match self {
			Self::Undefined => None,
			Self::Null => Some(None),
			Self::Value(v) => Some(Some(v)),
		}
	}

	pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Patch<U> {
		match self {
			Self::Undefined => Patch::Undefined,
			Self::Null => Patch::Null,
			Self::Value(v) => Patch::Value(f(v)),
		}
	}
}

impl<T: Serialize> Serialize for Patch<T> {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		match self {
			Self::Undefined | Self::Null => serializer.serialize_none(),
			Self::Value(v) => v.serialize(serializer),
		}
	}
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		Option::<T>::deserialize(deserializer).map(|opt| match opt {
			Some(v) => Self::Value(v),
			None => Self::Null,
		})
	}
}

/// The five columns the stator runner reads and writes on every managed
/// entity. Embedded by value (not behind a trait) because every entity
/// struct owns these fields directly, the way a Django model's abstract
/// base class contributes concrete columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatorFields {
	pub state: String,
	pub state_changed: Timestamp,
	pub state_attempted: Option<Timestamp>,
	pub state_locked_until: Option<Timestamp>,
	pub state_ready: bool,
}

impl StatorFields {
	#[must_use]
	pub fn initial(state: impl Into<String>) -> Self {
		Self {
			state: state.into(),
			state_changed: Timestamp::now(),
			state_attempted: None,
			state_locked_until: None,
			state_ready: true,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn patch_round_trips_through_json() {
		#[derive(Serialize, Deserialize)]
		struct Body {
			#[serde(default, skip_serializing_if = "Patch::is_undefined")]
			name: Patch<String>,
		}
		let body: Body = serde_json::from_str(r#"{"name":null}"#).unwrap();
		assert!(matches!(body.name, Patch::Null));
		let body: Body = serde_json::from_str(r#"{"name":"alice"}"#).unwrap();
		assert!(matches!(body.name, Patch::Value(v) if v == "alice"));
		let body: Body = serde_json::from_str("{}").unwrap();
		assert!(body.name.is_undefined());
	}

	#[test]
	fn timestamp_add_seconds_is_milliseconds_exact() {
		let t = Timestamp(0).add_seconds(5);
		assert_eq!(t, Timestamp(5000));
	}
}
