//! Wires one [`Runner`] per stator-managed entity type: the state graph,
//! the handler(s) its non-terminal states declare, and a freshly
//! constructed [`JsonEntityStore`] over the shared connection pool.
//!
//! `Domain` and `TimelineEvent` are deliberately absent: neither declares a
//! non-terminal, handler-bearing state (`Domain` has no state graph at all;
//! `TimelineEvent`'s is a single terminal `created` state), so neither
//! needs a runner.
//!
//! Grounded on `cloudillo-core`'s scheduler bootstrap (one task runner per
//! background job, all spawned from a single startup function) generalised
//! from cron jobs to the per-entity graph/handler/store triad
//! [`relaystate_stator::runner::Runner`] defines.

use std::sync::Arc;

use relaystate_federation::block::BlockHandler;
use relaystate_federation::ctx::FederationCtx;
use relaystate_federation::entities::{
	attachment, block, emoji, fan_out, follow, hashtag, identity, inbox_message, interaction, post, report,
};
use relaystate_federation::fanout::{FanOutHandler, InteractionHandler, PostHandler, UndoInteractionHandler};
use relaystate_federation::follow::{FollowHandler, FollowRequestHandler};
use relaystate_federation::identity::IdentityHandler;
use relaystate_federation::inbox::ReceivedHandler;
use relaystate_federation::media::{EmojiHandler, HashtagHandler, HashtagRecountHandler, PostAttachmentHandler};
use relaystate_federation::report::ReportHandler;
use relaystate_store_sqlite::json_store::JsonEntityStore;
use relaystate_store_sqlite::{tables, SqliteConfigStore};
use relaystate_stator::runner::{Runner, RunnerConfig};
use relaystate_stator::stats::StatsRegistry;
use relaystate_types::error::ClResult;
use relaystate_types::store::ConfigScope;
use sqlx::sqlite::SqlitePool;

type Ctx = FederationCtx<SqliteConfigStore>;

/// Every spawned runner's background loop and watchdog, bundled so
/// `main.rs` only has to hold one value to keep them alive.
pub struct RunnerHandles {
	pub loops: Vec<tokio::task::JoinHandle<()>>,
	pub watchdogs: Vec<tokio::task::JoinHandle<()>>,
}

async fn runner_config(ctx: &Ctx) -> ClResult<RunnerConfig> {
	let settings = &ctx.settings;
	Ok(RunnerConfig {
		concurrency: settings.get_i64("stator.concurrency", ConfigScope::System, None).await? as usize,
		concurrency_per_model: settings
			.get_i64("stator.concurrency_per_model", ConfigScope::System, None)
			.await? as usize,
		schedule_interval_secs: settings.get_i64("stator.schedule_interval_seconds", ConfigScope::System, None).await?,
		delete_interval_secs: settings.get_i64("stator.delete_interval_seconds", ConfigScope::System, None).await?,
		lock_expiry_secs: settings.get_i64("stator.lock_expiry_seconds", ConfigScope::System, None).await?,
	})
}

/// Builds and spawns every entity's runner. `shutdown` is cloned once per
/// runner; sending `true` on it stops every loop after its current cycle.
pub async fn spawn_all(
	ctx: Arc<Ctx>,
	pool: SqlitePool,
	shutdown: tokio::sync::watch::Receiver<bool>,
) -> ClResult<RunnerHandles> {
	let config = runner_config(&ctx).await?;
	let stats = Arc::new(StatsRegistry::new());
	let mut handles = RunnerHandles { loops: Vec::new(), watchdogs: Vec::new() };

	{
		let store = Arc::new(JsonEntityStore::new(pool.clone(), tables::IDENTITY));
		let mut runner = Runner::new(ctx.clone(), identity::state_graph()?, store, stats.clone(), config);
		runner.register("new", Arc::new(IdentityHandler));
		runner.register("edited", Arc::new(IdentityHandler));
		spawn(&mut handles, runner, shutdown.clone());
	}
	{
		let store = Arc::new(JsonEntityStore::new(pool.clone(), tables::POST));
		let mut runner = Runner::new(ctx.clone(), post::state_graph()?, store, stats.clone(), config);
		runner.register("new", Arc::new(PostHandler));
		spawn(&mut handles, runner, shutdown.clone());
	}
	{
		let store = Arc::new(JsonEntityStore::new(pool.clone(), tables::FOLLOW));
		let mut runner = Runner::new(ctx.clone(), follow::state_graph()?, store, stats.clone(), config);
		runner.register("unrequested", Arc::new(FollowHandler));
		runner.register("local_requested", Arc::new(FollowRequestHandler));
		spawn(&mut handles, runner, shutdown.clone());
	}
	{
		let store = Arc::new(JsonEntityStore::new(pool.clone(), tables::BLOCK));
		let mut runner = Runner::new(ctx.clone(), block::state_graph()?, store, stats.clone(), config);
		runner.register("new", Arc::new(BlockHandler));
		spawn(&mut handles, runner, shutdown.clone());
	}
	{
		let store = Arc::new(JsonEntityStore::new(pool.clone(), tables::POST_INTERACTION));
		let mut runner = Runner::new(ctx.clone(), interaction::state_graph()?, store, stats.clone(), config);
		runner.register("new", Arc::new(InteractionHandler));
		runner.register("undone", Arc::new(UndoInteractionHandler));
		spawn(&mut handles, runner, shutdown.clone());
	}
	{
		let store = Arc::new(JsonEntityStore::new(pool.clone(), tables::EMOJI));
		let mut runner = Runner::new(ctx.clone(), emoji::state_graph()?, store, stats.clone(), config);
		runner.register("outdated", Arc::new(EmojiHandler));
		spawn(&mut handles, runner, shutdown.clone());
	}
	{
		let store = Arc::new(JsonEntityStore::new(pool.clone(), tables::HASHTAG));
		let mut runner = Runner::new(ctx.clone(), hashtag::state_graph()?, store, stats.clone(), config);
		runner.register("new", Arc::new(HashtagHandler));
		runner.register("outdated", Arc::new(HashtagRecountHandler));
		spawn(&mut handles, runner, shutdown.clone());
	}
	{
		let store = Arc::new(JsonEntityStore::new(pool.clone(), tables::POST_ATTACHMENT));
		let mut runner = Runner::new(ctx.clone(), attachment::state_graph()?, store, stats.clone(), config);
		runner.register("new", Arc::new(PostAttachmentHandler));
		spawn(&mut handles, runner, shutdown.clone());
	}
	{
		let store = Arc::new(JsonEntityStore::new(pool.clone(), tables::REPORT));
		let mut runner = Runner::new(ctx.clone(), report::state_graph()?, store, stats.clone(), config);
		runner.register("new", Arc::new(ReportHandler));
		spawn(&mut handles, runner, shutdown.clone());
	}
	{
		let store = Arc::new(JsonEntityStore::new(pool.clone(), tables::FAN_OUT));
		let mut runner = Runner::new(ctx.clone(), fan_out::state_graph()?, store, stats.clone(), config);
		runner.register("new", Arc::new(FanOutHandler));
		spawn(&mut handles, runner, shutdown.clone());
	}
	{
		let store = Arc::new(JsonEntityStore::new(pool.clone(), tables::INBOX_MESSAGE));
		let mut runner = Runner::new(ctx.clone(), inbox_message::state_graph()?, store, stats.clone(), config);
		runner.register("received", Arc::new(ReceivedHandler));
		spawn(&mut handles, runner, shutdown.clone());
	}

	Ok(handles)
}

fn spawn<E, S>(
	handles: &mut RunnerHandles,
	runner: Runner<Ctx, E, S>,
	shutdown: tokio::sync::watch::Receiver<bool>,
) where
	E: relaystate_types::store::StatorEntity + 'static,
	S: relaystate_types::store::StatorStore<E> + 'static,
{
	let runner = Arc::new(runner);
	handles.watchdogs.push(runner.spawn_watchdog());
	handles.loops.push(tokio::spawn(runner.run(shutdown)));
}
