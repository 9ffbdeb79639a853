//! Federation repo trait implementations, grounded on
//! `adapters/meta-adapter-sqlite`'s pattern of hand-written SQL per query
//! rather than a generic query builder: each lookup here reads one or two
//! JSON-blob tables with `json_extract` against indexed natural-key columns
//! it adds specifically for that lookup.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use relaystate_federation::entities::attachment::PostAttachment;
use relaystate_federation::entities::block::Block;
use relaystate_federation::entities::domain::Domain;
use relaystate_federation::entities::emoji::Emoji;
use relaystate_federation::entities::fan_out::FanOut;
use relaystate_federation::entities::follow::Follow;
use relaystate_federation::entities::hashtag::Hashtag;
use relaystate_federation::entities::identity::Identity;
use relaystate_federation::entities::interaction::{InteractionKind, PostInteraction};
use relaystate_federation::entities::post::Post;
use relaystate_federation::entities::report::Report;
use relaystate_federation::entities::timeline_event::TimelineEvent;
use relaystate_federation::repo::{
	BlockRepo, DomainRepo, EmojiRepo, FanOutRepo, FollowRepo, HashtagRepo, IdentityRepo, InteractionRepo,
	PostAttachmentRepo, PostRepo, ReportRepo, TimelineRepo,
};
use relaystate_types::error::{ClResult, Error};
use relaystate_types::snowflake::Id;

use crate::json_store::JsonEntityStore;
use crate::tables;

fn inspect(err: &sqlx::Error) {
	tracing::warn!(?err, "sqlite error");
}

fn id_to_i64(id: Id) -> i64 {
	i64::try_from(id.0).unwrap_or(i64::MAX)
}

fn decode_rows<E: serde::de::DeserializeOwned>(rows: Vec<sqlx::sqlite::SqliteRow>) -> ClResult<Vec<E>> {
	rows.iter()
		.map(|row| {
			let data: String = row.try_get("data").map_err(|_| Error::DbError)?;
			serde_json::from_str(&data).map_err(|e| Error::Internal(format!("entity deserialisation failed: {e}")))
		})
		.collect()
}

async fn find_one<E, V>(pool: &SqlitePool, table: &str, json_path: &str, value: V) -> ClResult<Option<E>>
where
	E: serde::de::DeserializeOwned,
	V: for<'q> sqlx::Encode<'q, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite> + Send + 'static,
{
	let sql = format!("SELECT data FROM {table} WHERE json_extract(data, '{json_path}') = ? LIMIT 1");
	let row = sqlx::query(&sql)
		.bind(value)
		.fetch_optional(pool)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	match row {
		None => Ok(None),
		Some(row) => {
			let data: String = row.try_get("data").map_err(|_| Error::DbError)?;
			let entity = serde_json::from_str(&data)
				.map_err(|e| Error::Internal(format!("entity deserialisation failed: {e}")))?;
			Ok(Some(entity))
		}
	}
}

/// Bundles one [`JsonEntityStore`] per entity type plus the repo-trait
/// implementations against the same tables. `relaystate-server` constructs
/// one of these per process and hands out `Arc<dyn ...Repo>` clones of it
/// for [`relaystate_federation::ctx::FederationCtx`].
pub struct SqliteAdapter {
	pub pool: SqlitePool,
	pub identities: JsonEntityStore<Identity>,
	pub domains: JsonEntityStore<Domain>,
	pub posts: JsonEntityStore<Post>,
	pub follows: JsonEntityStore<Follow>,
	pub blocks: JsonEntityStore<Block>,
	pub interactions: JsonEntityStore<PostInteraction>,
	pub emojis: JsonEntityStore<Emoji>,
	pub hashtags: JsonEntityStore<Hashtag>,
	pub timeline_events: JsonEntityStore<TimelineEvent>,
	pub reports: JsonEntityStore<Report>,
	pub fan_outs: JsonEntityStore<FanOut>,
	pub attachments: JsonEntityStore<PostAttachment>,
}

impl SqliteAdapter {
	#[must_use]
	pub fn new(pool: SqlitePool) -> Self {
		Self {
			identities: JsonEntityStore::new(pool.clone(), tables::IDENTITY),
			domains: JsonEntityStore::new(pool.clone(), tables::DOMAIN),
			posts: JsonEntityStore::new(pool.clone(), tables::POST),
			follows: JsonEntityStore::new(pool.clone(), tables::FOLLOW),
			blocks: JsonEntityStore::new(pool.clone(), tables::BLOCK),
			interactions: JsonEntityStore::new(pool.clone(), tables::POST_INTERACTION),
			emojis: JsonEntityStore::new(pool.clone(), tables::EMOJI),
			hashtags: JsonEntityStore::new(pool.clone(), tables::HASHTAG),
			timeline_events: JsonEntityStore::new(pool.clone(), tables::TIMELINE_EVENT),
			reports: JsonEntityStore::new(pool.clone(), tables::REPORT),
			fan_outs: JsonEntityStore::new(pool.clone(), tables::FAN_OUT),
			attachments: JsonEntityStore::new(pool.clone(), tables::POST_ATTACHMENT),
			pool,
		}
	}

	/// Count of local identities, for the `/nodeinfo/2.0/` usage block
	/// (spec.md §6: "user/post counts").
	pub async fn count_local_identities(&self) -> ClResult<u64> {
		let sql = format!("SELECT COUNT(*) AS n FROM {} WHERE json_extract(data, '$.local') = 1", tables::IDENTITY);
		let row = sqlx::query(&sql).fetch_one(&self.pool).await.inspect_err(inspect).map_err(|_| Error::DbError)?;
		let n: i64 = row.try_get("n").map_err(|_| Error::DbError)?;
		Ok(n.max(0) as u64)
	}

	/// Count of local, non-deleted posts, for the same nodeinfo usage block.
	pub async fn count_local_posts(&self) -> ClResult<u64> {
		let sql = format!("SELECT COUNT(*) AS n FROM {} WHERE json_extract(data, '$.local') = 1", tables::POST);
		let row = sqlx::query(&sql).fetch_one(&self.pool).await.inspect_err(inspect).map_err(|_| Error::DbError)?;
		let n: i64 = row.try_get("n").map_err(|_| Error::DbError)?;
		Ok(n.max(0) as u64)
	}
}

#[async_trait]
impl IdentityRepo for SqliteAdapter {
	async fn find_by_actor_uri(&self, actor_uri: &str) -> ClResult<Option<Identity>> {
		find_one(&self.pool, tables::IDENTITY, "$.actor_uri", actor_uri.to_string()).await
	}

	async fn find_by_handle(&self, username: &str, domain: Id) -> ClResult<Option<Identity>> {
		let sql = format!(
			"SELECT data FROM {} WHERE json_extract(data, '$.username') = ? AND json_extract(data, '$.domain') = ? LIMIT 1",
			tables::IDENTITY
		);
		let row = sqlx::query(&sql)
			.bind(username.to_string())
			.bind(id_to_i64(domain))
			.fetch_optional(&self.pool)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		match row {
			None => Ok(None),
			Some(row) => {
				let data: String = row.try_get("data").map_err(|_| Error::DbError)?;
				Ok(Some(serde_json::from_str(&data).map_err(|e| Error::Internal(e.to_string()))?))
			}
		}
	}

	async fn get(&self, id: Id) -> ClResult<Option<Identity>> {
		self.identities.get(id).await
	}

	async fn find_local_by_username(&self, username: &str) -> ClResult<Option<Identity>> {
		let sql = format!(
			"SELECT data FROM {} WHERE json_extract(data, '$.username') = ? AND json_extract(data, '$.local') = 1 LIMIT 1",
			tables::IDENTITY
		);
		let row = sqlx::query(&sql)
			.bind(username.to_string())
			.fetch_optional(&self.pool)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		match row {
			None => Ok(None),
			Some(row) => {
				let data: String = row.try_get("data").map_err(|_| Error::DbError)?;
				Ok(Some(serde_json::from_str(&data).map_err(|e| Error::Internal(e.to_string()))?))
			}
		}
	}

	async fn active_followers(&self, identity: Id) -> ClResult<Vec<Identity>> {
		let sql = format!(
			"SELECT i.data AS data FROM {identity} i
			 JOIN {follow} f ON json_extract(f.data, '$.source') = i.id
			 WHERE json_extract(f.data, '$.target') = ? AND f.state = 'accepted'",
			identity = tables::IDENTITY,
			follow = tables::FOLLOW,
		);
		let rows = sqlx::query(&sql)
			.bind(id_to_i64(identity))
			.fetch_all(&self.pool)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		decode_rows(rows)
	}

	async fn upsert(&self, identity: Identity) -> ClResult<()> {
		self.identities.upsert(&identity).await
	}
}

#[async_trait]
impl DomainRepo for SqliteAdapter {
	async fn find_by_hostname(&self, hostname: &str) -> ClResult<Option<Domain>> {
		find_one(&self.pool, tables::DOMAIN, "$.domain", hostname.to_string()).await
	}

	async fn is_recursively_blocked(&self, hostname: &str) -> ClResult<bool> {
		let sql = format!("SELECT data FROM {} WHERE json_extract(data, '$.blocked') = 1", tables::DOMAIN);
		let rows = sqlx::query(&sql)
			.fetch_all(&self.pool)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		let domains: Vec<Domain> = decode_rows(rows)?;
		Ok(domains.iter().any(|domain| domain.blocks(hostname)))
	}

	async fn upsert(&self, domain: Domain) -> ClResult<()> {
		// `Domain` carries no `StatorFields` (it isn't stator-managed), so it
		// can't go through `JsonEntityStore::upsert`'s generic `StatorEntity`
		// bound; the shared table still has the stator columns (every table in
		// `tables::ALL` is created the same way), so this just stamps them
		// with inert placeholder values nothing ever reads.
		let data = serde_json::to_string(&domain)
			.map_err(|e| Error::Internal(format!("entity serialisation failed: {e}")))?;
		let sql = format!(
			"INSERT INTO {} (id, state, state_changed, state_attempted, state_locked_until, state_ready, data)
			 VALUES (?, 'n/a', ?, NULL, NULL, 0, ?)
			 ON CONFLICT (id) DO UPDATE SET data = excluded.data",
			tables::DOMAIN
		);
		sqlx::query(&sql)
			.bind(id_to_i64(domain.id))
			.bind(relaystate_types::types::Timestamp::now().0)
			.bind(data)
			.execute(&self.pool)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		Ok(())
	}
}

#[async_trait]
impl PostRepo for SqliteAdapter {
	async fn find_by_object_uri(&self, object_uri: &str) -> ClResult<Option<Post>> {
		find_one(&self.pool, tables::POST, "$.object_uri", object_uri.to_string()).await
	}

	async fn get(&self, id: Id) -> ClResult<Option<Post>> {
		self.posts.get(id).await
	}

	async fn upsert(&self, post: Post) -> ClResult<()> {
		self.posts.upsert(&post).await
	}

	async fn delete(&self, id: Id) -> ClResult<()> {
		self.posts.delete(id).await
	}

	async fn list_public_by_author(&self, author: Id, limit: u32) -> ClResult<Vec<Post>> {
		let sql = format!(
			"SELECT data FROM {} WHERE json_extract(data, '$.author') = ? AND json_extract(data, '$.visibility') = 'public'
			   AND state != 'deleted' ORDER BY json_extract(data, '$.published') DESC LIMIT ?",
			tables::POST
		);
		let rows = sqlx::query(&sql)
			.bind(id_to_i64(author))
			.bind(i64::from(limit))
			.fetch_all(&self.pool)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		decode_rows(rows)
	}
}

#[async_trait]
impl FollowRepo for SqliteAdapter {
	async fn find_by_pair(&self, source: Id, target: Id) -> ClResult<Option<Follow>> {
		let sql = format!(
			"SELECT data FROM {} WHERE json_extract(data, '$.source') = ? AND json_extract(data, '$.target') = ? LIMIT 1",
			tables::FOLLOW
		);
		let row = sqlx::query(&sql)
			.bind(id_to_i64(source))
			.bind(id_to_i64(target))
			.fetch_optional(&self.pool)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		match row {
			None => Ok(None),
			Some(row) => {
				let data: String = row.try_get("data").map_err(|_| Error::DbError)?;
				Ok(Some(serde_json::from_str(&data).map_err(|e| Error::Internal(e.to_string()))?))
			}
		}
	}

	async fn find_by_uri(&self, uri: &str) -> ClResult<Option<Follow>> {
		find_one(&self.pool, tables::FOLLOW, "$.uri", uri.to_string()).await
	}

	async fn upsert(&self, follow: Follow) -> ClResult<()> {
		self.follows.upsert(&follow).await
	}

	async fn delete(&self, id: Id) -> ClResult<()> {
		self.follows.delete(id).await
	}
}

#[async_trait]
impl BlockRepo for SqliteAdapter {
	async fn find_active_block(&self, source: Id, target: Id) -> ClResult<Option<Block>> {
		find_pair_by_state(&self.pool, tables::BLOCK, source, target, false).await
	}

	async fn find_mute(&self, source: Id, target: Id) -> ClResult<Option<Block>> {
		find_pair_by_state(&self.pool, tables::BLOCK, source, target, true).await
	}

	async fn delete(&self, id: Id) -> ClResult<()> {
		self.blocks.delete(id).await
	}

	async fn blockers_of(&self, author: Id) -> ClResult<std::collections::HashSet<Id>> {
		let sql = format!(
			"SELECT json_extract(data, '$.source') AS source FROM {} WHERE json_extract(data, '$.target') = ?
			   AND json_extract(data, '$.mute') = 0 AND state IN ('new', 'active')",
			tables::BLOCK
		);
		let rows = sqlx::query(&sql)
			.bind(id_to_i64(author))
			.fetch_all(&self.pool)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		rows.iter()
			.map(|row| {
				let source: i64 = row.try_get("source").map_err(|_| Error::DbError)?;
				Ok(Id(source as u64))
			})
			.collect()
	}
}

async fn find_pair_by_state(
	pool: &SqlitePool,
	table: &str,
	source: Id,
	target: Id,
	mute: bool,
) -> ClResult<Option<Block>> {
	let sql = format!(
		"SELECT data FROM {table} WHERE json_extract(data, '$.source') = ? AND json_extract(data, '$.target') = ?
		   AND json_extract(data, '$.mute') = ? AND state IN ('new', 'active') LIMIT 1"
	);
	let row = sqlx::query(&sql)
		.bind(id_to_i64(source))
		.bind(id_to_i64(target))
		.bind(mute)
		.fetch_optional(pool)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	match row {
		None => Ok(None),
		Some(row) => {
			let data: String = row.try_get("data").map_err(|_| Error::DbError)?;
			Ok(Some(serde_json::from_str(&data).map_err(|e| Error::Internal(e.to_string()))?))
		}
	}
}

#[async_trait]
impl InteractionRepo for SqliteAdapter {
	async fn find_active(
		&self,
		identity: Id,
		post: Id,
		kind: InteractionKind,
	) -> ClResult<Option<PostInteraction>> {
		let kind_str = serde_json::to_value(kind)
			.ok()
			.and_then(|v| v.as_str().map(ToString::to_string))
			.unwrap_or_default();
		let sql = format!(
			"SELECT data FROM {} WHERE json_extract(data, '$.identity') = ? AND json_extract(data, '$.post') = ?
			   AND json_extract(data, '$.kind') = ? AND state IN ('new', 'fanned_out') LIMIT 1",
			tables::POST_INTERACTION
		);
		let row = sqlx::query(&sql)
			.bind(id_to_i64(identity))
			.bind(id_to_i64(post))
			.bind(kind_str)
			.fetch_optional(&self.pool)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		match row {
			None => Ok(None),
			Some(row) => {
				let data: String = row.try_get("data").map_err(|_| Error::DbError)?;
				Ok(Some(serde_json::from_str(&data).map_err(|e| Error::Internal(e.to_string()))?))
			}
		}
	}

	async fn find_by_object_uri(&self, object_uri: &str) -> ClResult<Option<PostInteraction>> {
		find_one(&self.pool, tables::POST_INTERACTION, "$.object_uri", object_uri.to_string()).await
	}

	async fn get(&self, id: Id) -> ClResult<Option<PostInteraction>> {
		self.interactions.get(id).await
	}

	async fn upsert(&self, interaction: PostInteraction) -> ClResult<()> {
		self.interactions.upsert(&interaction).await
	}

	async fn delete(&self, id: Id) -> ClResult<()> {
		self.interactions.delete(id).await
	}
}

#[async_trait]
impl EmojiRepo for SqliteAdapter {
	async fn find_by_shortcode(&self, shortcode: &str, local: bool) -> ClResult<Option<Emoji>> {
		let sql = format!(
			"SELECT data FROM {} WHERE json_extract(data, '$.shortcode') = ? AND json_extract(data, '$.local') = ? LIMIT 1",
			tables::EMOJI
		);
		let row = sqlx::query(&sql)
			.bind(shortcode.to_string())
			.bind(local)
			.fetch_optional(&self.pool)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		match row {
			None => Ok(None),
			Some(row) => {
				let data: String = row.try_get("data").map_err(|_| Error::DbError)?;
				Ok(Some(serde_json::from_str(&data).map_err(|e| Error::Internal(e.to_string()))?))
			}
		}
	}

	async fn find_by_remote_id(&self, remote_id: &str) -> ClResult<Option<Emoji>> {
		find_one(&self.pool, tables::EMOJI, "$.remote_url", remote_id.to_string()).await
	}

	async fn upsert(&self, emoji: Emoji) -> ClResult<()> {
		self.emojis.upsert(&emoji).await
	}
}

#[async_trait]
impl ReportRepo for SqliteAdapter {
	async fn create(&self, report: Report) -> ClResult<()> {
		self.reports.insert(&report).await
	}
}

#[async_trait]
impl HashtagRepo for SqliteAdapter {
	async fn find_by_name(&self, name: &str) -> ClResult<Option<Hashtag>> {
		find_one(&self.pool, tables::HASHTAG, "$.name", name.to_string()).await
	}

	async fn upsert(&self, hashtag: Hashtag) -> ClResult<()> {
		self.hashtags.upsert(&hashtag).await
	}
}

#[async_trait]
impl PostAttachmentRepo for SqliteAdapter {
	async fn get(&self, id: Id) -> ClResult<Option<PostAttachment>> {
		self.attachments.get(id).await
	}

	async fn find_by_post(&self, post: Id) -> ClResult<Vec<PostAttachment>> {
		let sql = format!(
			"SELECT data FROM {} WHERE json_extract(data, '$.post') = ?",
			tables::POST_ATTACHMENT
		);
		let rows = sqlx::query(&sql)
			.bind(id_to_i64(post))
			.fetch_all(&self.pool)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		decode_rows(rows)
	}

	async fn upsert(&self, attachment: PostAttachment) -> ClResult<()> {
		self.attachments.upsert(&attachment).await
	}
}

#[async_trait]
impl FanOutRepo for SqliteAdapter {
	async fn create_batch(&self, fan_outs: Vec<FanOut>) -> ClResult<()> {
		for fan_out in &fan_outs {
			self.fan_outs.insert(fan_out).await?;
		}
		Ok(())
	}
}

#[async_trait]
impl TimelineRepo for SqliteAdapter {
	async fn create_event(&self, event: TimelineEvent) -> ClResult<()> {
		let (owner, kind, post, interaction, identity) = event.natural_key();
		let kind_str = serde_json::to_value(kind)
			.ok()
			.and_then(|v| v.as_str().map(ToString::to_string))
			.unwrap_or_default();
		let exists_sql = format!(
			"SELECT 1 FROM {} WHERE json_extract(data, '$.owner') = ? AND json_extract(data, '$.kind') = ?
			   AND json_extract(data, '$.subject_post') IS ? AND json_extract(data, '$.subject_post_interaction') IS ?
			   AND json_extract(data, '$.subject_identity') IS ? LIMIT 1",
			tables::TIMELINE_EVENT
		);
		let exists = sqlx::query(&exists_sql)
			.bind(id_to_i64(owner))
			.bind(kind_str)
			.bind(post.map(id_to_i64))
			.bind(interaction.map(id_to_i64))
			.bind(identity.map(id_to_i64))
			.fetch_optional(&self.pool)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		if exists.is_some() {
			return Ok(());
		}
		self.timeline_events.insert(&event).await
	}

	async fn delete_events_for_post(&self, owner: Id, post: Id) -> ClResult<()> {
		let sql = format!(
			"DELETE FROM {} WHERE json_extract(data, '$.owner') = ? AND json_extract(data, '$.subject_post') = ?",
			tables::TIMELINE_EVENT
		);
		sqlx::query(&sql)
			.bind(id_to_i64(owner))
			.bind(id_to_i64(post))
			.execute(&self.pool)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		Ok(())
	}

	async fn delete_events_for_interaction(&self, interaction: Id) -> ClResult<()> {
		let sql = format!(
			"DELETE FROM {} WHERE json_extract(data, '$.subject_post_interaction') = ?",
			tables::TIMELINE_EVENT
		);
		sqlx::query(&sql)
			.bind(id_to_i64(interaction))
			.execute(&self.pool)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		Ok(())
	}
}
