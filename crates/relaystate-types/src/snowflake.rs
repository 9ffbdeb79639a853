//! 63-bit snowflake identifiers.
//!
//! Layout (high to low bit): 41 bits milliseconds since the relaystate epoch
//! (2022-01-01T00:00:00Z), 19 bits random, 3 bits entity-type tag. The epoch
//! and field widths are fixed by the glossary; this module is the one place
//! that packs and unpacks them.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Milliseconds from the Unix epoch to 2022-01-01T00:00:00Z.
const RELAYSTATE_EPOCH_MS: i64 = 1_640_995_200_000;

const RANDOM_BITS: u32 = 19;
const TAG_BITS: u32 = 3;
const TAG_MASK: u64 = (1 << TAG_BITS) - 1;
const RANDOM_MASK: u64 = (1 << RANDOM_BITS) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EntityTag {
	Post = 0,
	Interaction = 1,
	Identity = 2,
	Report = 3,
	Follow = 4,
	Block = 5,
	TimelineEvent = 6,
	Other = 7,
}

impl EntityTag {
	fn from_bits(bits: u64) -> Self {
		match bits & TAG_MASK {
			0 => Self::Post,
			1 => Self::Interaction,
			2 => Self::Identity,
			3 => Self::Report,
			4 => Self::Follow,
			5 => Self::Block,
			6 => Self::TimelineEvent,
			_ => Self::Other,
		}
	}
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub u64);

impl Id {
	#[must_use]
	pub fn new(tag: EntityTag) -> Self {
		Self::new_at(tag, Timestamp::now())
	}

	#[must_use]
	pub fn new_at(tag: EntityTag, now: Timestamp) -> Self {
		let millis = (now.0 - RELAYSTATE_EPOCH_MS).max(0) as u64;
		let random: u64 = rand::rng().random::<u32>() as u64 & RANDOM_MASK;
		let bits = (millis << (RANDOM_BITS + TAG_BITS)) | (random << TAG_BITS) | (tag as u64);
		Self(bits)
	}

	#[must_use]
	pub fn tag(self) -> EntityTag {
		EntityTag::from_bits(self.0)
	}

	#[must_use]
	pub fn created_at(self) -> Timestamp {
		let millis = self.0 >> (RANDOM_BITS + TAG_BITS);
		Timestamp(millis as i64 + RELAYSTATE_EPOCH_MS)
	}
}

impl fmt::Debug for Id {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "Id({})", self.0)
	}
}

impl fmt::Display for Id {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_tag_and_timestamp() {
		let now = Timestamp(RELAYSTATE_EPOCH_MS + 123_456);
		let id = Id::new_at(EntityTag::Follow, now);
		assert_eq!(id.tag(), EntityTag::Follow);
		assert_eq!(id.created_at(), now);
	}

	#[test]
	fn ids_minted_in_order_stay_ordered() {
		let a = Id::new_at(EntityTag::Post, Timestamp(RELAYSTATE_EPOCH_MS + 1000));
		let b = Id::new_at(EntityTag::Post, Timestamp(RELAYSTATE_EPOCH_MS + 2000));
		assert!(a < b);
	}

	#[test]
	fn pre_epoch_timestamps_clamp_to_zero_millis() {
		let id = Id::new_at(EntityTag::Identity, Timestamp(RELAYSTATE_EPOCH_MS - 5000));
		assert_eq!(id.created_at(), Timestamp(RELAYSTATE_EPOCH_MS));
	}
}
