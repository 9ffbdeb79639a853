//! Domain-specific query traits the inbox and fan-out handlers need beyond
//! the generic [`relaystate_types::store::StatorStore`] contract: lookups by
//! natural key (actor URI, object URI, `(source, target)` pairs) rather
//! than by id or state.
//!
//! Grounded on `cloudillo-core`'s split between a generic `TaskStore<S>` and
//! per-model repository traits (`adapters/meta-adapter-sqlite` implements
//! both for the teacher); `relaystate-store-sqlite` implements these the
//! same way, as SQL queries against indexed columns.

use async_trait::async_trait;

use relaystate_types::error::ClResult;
use relaystate_types::snowflake::Id;

use crate::entities::block::Block;
use crate::entities::domain::Domain;
use crate::entities::emoji::Emoji;
use crate::entities::fan_out::FanOut;
use crate::entities::follow::Follow;
use crate::entities::hashtag::Hashtag;
use crate::entities::identity::Identity;
use crate::entities::interaction::{InteractionKind, PostInteraction};
use crate::entities::attachment::PostAttachment;
use crate::entities::post::Post;
use crate::entities::report::Report;
use crate::entities::timeline_event::TimelineEvent;

#[async_trait]
pub trait IdentityRepo: Send + Sync {
	async fn find_by_actor_uri(&self, actor_uri: &str) -> ClResult<Option<Identity>>;
	async fn find_by_handle(&self, username: &str, domain: Id) -> ClResult<Option<Identity>>;
	async fn get(&self, id: Id) -> ClResult<Option<Identity>>;
	/// A local identity by username alone (no `domain` to compare against —
	/// every local identity lives on this server's own domain), for the
	/// actor/outbox routes spec.md §6 names (`GET /@<handle>/`, `GET
	/// /@<handle>/outbox/`).
	async fn find_local_by_username(&self, username: &str) -> ClResult<Option<Identity>>;
	/// Active (non-deleted) followers of `identity`, for recipient
	/// computation (spec.md §4.3).
	async fn active_followers(&self, identity: Id) -> ClResult<Vec<Identity>>;
	/// Inserts a brand-new row or replaces an existing one wholesale — the
	/// inbox dispatch table's "mark identity outdated/deleted/moved" actions
	/// are full-row replacements, not field patches, since the JSON-blob
	/// store has no partial-update primitive narrower than a whole entity.
	async fn upsert(&self, identity: Identity) -> ClResult<()>;
}

#[async_trait]
pub trait DomainRepo: Send + Sync {
	async fn find_by_hostname(&self, hostname: &str) -> ClResult<Option<Domain>>;
	/// True if `hostname` or any parent suffix is a blocked row (spec.md
	/// §3's "recursively blocked" rule).
	async fn is_recursively_blocked(&self, hostname: &str) -> ClResult<bool>;
	/// Inserts a brand-new row or replaces an existing one wholesale — used
	/// when the inbox's first-sighting path (spec.md §4.2 step 2) records a
	/// hostname it has never seen before.
	async fn upsert(&self, domain: Domain) -> ClResult<()>;
}

#[async_trait]
pub trait PostRepo: Send + Sync {
	async fn find_by_object_uri(&self, object_uri: &str) -> ClResult<Option<Post>>;
	async fn get(&self, id: Id) -> ClResult<Option<Post>>;
	async fn upsert(&self, post: Post) -> ClResult<()>;
	/// spec.md §4.2's `Delete → delete Post` action.
	async fn delete(&self, id: Id) -> ClResult<()>;
	/// The `limit` most recent fanned-out, non-deleted public posts by
	/// `author`, newest first — backs `GET /@<handle>/outbox/` (spec.md §6).
	async fn list_public_by_author(&self, author: Id, limit: u32) -> ClResult<Vec<Post>>;
}

#[async_trait]
pub trait FollowRepo: Send + Sync {
	async fn find_by_pair(&self, source: Id, target: Id) -> ClResult<Option<Follow>>;
	async fn find_by_uri(&self, uri: &str) -> ClResult<Option<Follow>>;
	async fn upsert(&self, follow: Follow) -> ClResult<()>;
	/// spec.md §4.2's `Undo{Follow} → delete matching edge` action.
	async fn delete(&self, id: Id) -> ClResult<()>;
}

#[async_trait]
pub trait BlockRepo: Send + Sync {
	/// The active (`new`/`active`) full block row, if any, for `(source,
	/// target)` — mutes are looked up separately via `find_mute`.
	async fn find_active_block(&self, source: Id, target: Id) -> ClResult<Option<Block>>;
	async fn find_mute(&self, source: Id, target: Id) -> ClResult<Option<Block>>;
	/// spec.md §4.2's `Undo{Block} → delete matching edge` action.
	async fn delete(&self, id: Id) -> ClResult<()>;
	/// Ids of every identity with an active (`new`/`active`), non-mute block
	/// row targeting `author` — recipients these ids name are excluded from
	/// fan-out (spec.md §4.3's `compute_recipients`).
	async fn blockers_of(&self, author: Id) -> ClResult<std::collections::HashSet<Id>>;
}

#[async_trait]
pub trait InteractionRepo: Send + Sync {
	/// The active (`new`/`fanned_out`) interaction, if any, for `(identity,
	/// post, kind)` — spec.md §3's uniqueness invariant.
	async fn find_active(
		&self,
		identity: Id,
		post: Id,
		kind: InteractionKind,
	) -> ClResult<Option<PostInteraction>>;
	async fn find_by_object_uri(&self, object_uri: &str) -> ClResult<Option<PostInteraction>>;
	async fn get(&self, id: Id) -> ClResult<Option<PostInteraction>>;
	async fn upsert(&self, interaction: PostInteraction) -> ClResult<()>;
	/// spec.md §4.2's `Undo{Like|Announce} → delete matching interaction`
	/// action.
	async fn delete(&self, id: Id) -> ClResult<()>;
}

#[async_trait]
pub trait EmojiRepo: Send + Sync {
	async fn find_by_shortcode(&self, shortcode: &str, local: bool) -> ClResult<Option<Emoji>>;
	async fn find_by_remote_id(&self, remote_id: &str) -> ClResult<Option<Emoji>>;
	async fn upsert(&self, emoji: Emoji) -> ClResult<()>;
}

#[async_trait]
pub trait HashtagRepo: Send + Sync {
	async fn find_by_name(&self, name: &str) -> ClResult<Option<Hashtag>>;
	async fn upsert(&self, hashtag: Hashtag) -> ClResult<()>;
}

#[async_trait]
pub trait PostAttachmentRepo: Send + Sync {
	async fn get(&self, id: Id) -> ClResult<Option<PostAttachment>>;
	/// Every attachment belonging to `post`, in no particular order — the
	/// `new` handler's fetch loop and `dispatch_create`'s row-creation both
	/// work a post at a time.
	async fn find_by_post(&self, post: Id) -> ClResult<Vec<PostAttachment>>;
	async fn upsert(&self, attachment: PostAttachment) -> ClResult<()>;
}

#[async_trait]
pub trait FanOutRepo: Send + Sync {
	/// Queues one fan-out row per recipient, all sharing `kind` and subject
	/// fields — spec.md §4.3's "create one FanOut row per recipient."
	async fn create_batch(&self, fan_outs: Vec<FanOut>) -> ClResult<()>;
}

#[async_trait]
pub trait ReportRepo: Send + Sync {
	/// spec.md §4.2's `Flag → create a Report row` action.
	async fn create(&self, report: Report) -> ClResult<()>;
}

#[async_trait]
pub trait TimelineRepo: Send + Sync {
	/// Idempotent on `event.natural_key()` (spec.md §3's "Pure derived
	/// data; idempotent on its natural key").
	async fn create_event(&self, event: TimelineEvent) -> ClResult<()>;
	/// spec.md §4.3's `(post_deleted, true)` case: "delete TimelineEvents
	/// referencing this post for this recipient."
	async fn delete_events_for_post(&self, owner: Id, post: Id) -> ClResult<()>;
	/// spec.md §8 scenario 5: "deletes all TimelineEvents referencing that
	/// interaction."
	async fn delete_events_for_interaction(&self, interaction: Id) -> ClResult<()>;
}
