//! The entity set: one module per row of spec.md §3's data model, plus
//! `Report` (supplemented from `original_source`) and the snowflake-backed
//! id/stator-field plumbing every entity shares.

pub mod attachment;
pub mod block;
pub mod domain;
pub mod emoji;
pub mod fan_out;
pub mod follow;
pub mod hashtag;
pub mod identity;
pub mod inbox_message;
pub mod interaction;
pub mod post;
pub mod report;
pub mod timeline_event;

/// Implements [`relaystate_types::store::StatorEntity`] for a struct that
/// embeds a `pub fields: StatorFields` member and a `pub id: Id` member,
/// the way every stator-managed row in this crate is shaped.
macro_rules! impl_stator_entity {
	($ty:ty, $model:expr) => {
		impl relaystate_types::store::StatorEntity for $ty {
			const MODEL: &'static str = $model;

			fn id(&self) -> relaystate_types::snowflake::Id {
				self.id
			}

			fn stator_fields(&self) -> &relaystate_types::types::StatorFields {
				&self.fields
			}
		}
	};
}

pub(crate) use impl_stator_entity;
