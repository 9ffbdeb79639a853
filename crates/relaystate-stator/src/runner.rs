//! The runner: schedule sweep, lock sweep, task loop, delete sweep, and a
//! watchdog, all driven off one [`StateGraph`].
//!
//! Ported from `original_source/stator/runner.py`'s `StatorRunner`: the same
//! default cadences (`schedule_interval=60s`, `delete_interval=30s`,
//! `lock_expiry=300s`), the same adaptive idle backoff (0.5s up to 5s when a
//! cycle finds nothing to do), and the same "watch for a stuck loop and bail
//! out" guarantee — rendered here as a tokio watchdog task polling a
//! last-tick timestamp rather than a `SIGALRM` handler, since async Rust has
//! no analogue for interrupting a blocked thread from a signal.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use relaystate_types::error::ClResult;
use relaystate_types::snowflake::Id;
use relaystate_types::store::{StatorEntity, StatorStore};
use relaystate_types::types::Timestamp;

use crate::graph::StateGraph;
use crate::stats::StatsRegistry;

#[async_trait]
pub trait StateHandler<Ctx, E>: Send + Sync
where
	Ctx: Send + Sync,
	E: StatorEntity,
{
	/// Attempts to progress `entity` out of its current state. `Ok(Some(name))`
	/// transitions to `name`; `Ok(None)` is a no-op attempt (state unchanged,
	/// try again next interval); `Err` is logged and treated the same as
	/// `Ok(None)` — stator never lets a handler error wedge the row.
	async fn handle(&self, ctx: &Ctx, entity: &E) -> ClResult<Option<&'static str>>;
}

#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
	pub concurrency: usize,
	pub concurrency_per_model: usize,
	pub schedule_interval_secs: i64,
	pub delete_interval_secs: i64,
	pub lock_expiry_secs: i64,
}

impl Default for RunnerConfig {
	fn default() -> Self {
		Self {
			concurrency: 30,
			concurrency_per_model: 15,
			schedule_interval_secs: 60,
			delete_interval_secs: 30,
			lock_expiry_secs: 300,
		}
	}
}

pub struct Runner<Ctx, E, S>
where
	Ctx: Send + Sync + 'static,
	E: StatorEntity,
	S: StatorStore<E>,
{
	ctx: Arc<Ctx>,
	graph: Arc<StateGraph>,
	handlers: std::collections::HashMap<&'static str, Arc<dyn StateHandler<Ctx, E>>>,
	store: Arc<S>,
	stats: Arc<StatsRegistry>,
	config: RunnerConfig,
	concurrency_limiter: Arc<Semaphore>,
	last_tick_ms: Arc<AtomicI64>,
}

impl<Ctx, E, S> Runner<Ctx, E, S>
where
	Ctx: Send + Sync + 'static,
	E: StatorEntity,
	S: StatorStore<E> + 'static,
{
	pub fn new(
		ctx: Arc<Ctx>,
		graph: StateGraph,
		store: Arc<S>,
		stats: Arc<StatsRegistry>,
		config: RunnerConfig,
	) -> Self {
		Self {
			ctx,
			graph: Arc::new(graph),
			handlers: std::collections::HashMap::new(),
			store,
			stats,
			concurrency_limiter: Arc::new(Semaphore::new(config.concurrency_per_model)),
			config,
			last_tick_ms: Arc::new(AtomicI64::new(Timestamp::now().0)),
		}
	}

	pub fn register(&mut self, state: &'static str, handler: Arc<dyn StateHandler<Ctx, E>>) {
		self.handlers.insert(state, handler);
	}

	/// Marks rows ready whose `try_interval` has elapsed, and records the
	/// resulting queued count in [`StatsRegistry`].
	pub async fn run_schedule_sweep(&self) -> ClResult<u64> {
		let now = Timestamp::now();
		let states: Vec<(&str, i64)> = self.graph.schedulable_states().collect();
		let marked = self.store.sweep_schedule(&states, now).await?;
		let state_names: Vec<&str> = states.iter().map(|(name, _)| *name).collect();
		let queued = self.store.queued_count(&state_names).await?;
		self.stats.set_queued(self.graph.model, now, queued);
		Ok(marked)
	}

	pub async fn run_lock_sweep(&self) -> ClResult<u64> {
		self.store.sweep_locks(Timestamp::now()).await
	}

	/// Deletes terminal rows whose `state_changed` is older than that
	/// state's own declared `delete_after` horizon (mirrors
	/// `original_source`'s `add_deletion_tasks`, one threshold per terminal
	/// state rather than one global grace period).
	pub async fn run_delete_sweep(&self) -> ClResult<u64> {
		let horizons: Vec<(&str, i64)> = self.graph.terminal_states_with_delete_after().collect();
		if horizons.is_empty() {
			return Ok(0);
		}
		self.store.sweep_delete(&horizons, Timestamp::now()).await
	}

	/// Fetches and processes one batch of ready rows. Returns the number of
	/// rows handled, so the caller can drive the adaptive idle backoff.
	pub async fn run_single_cycle(&self) -> ClResult<usize> {
		let now = Timestamp::now();
		let lock_until = Timestamp(now.0 + self.config.lock_expiry_secs * 1000);
		let schedulable: Vec<&str> = self.graph.schedulable_states().map(|(name, _)| name).collect();
		let batch =
			self.store.get_with_lock(&schedulable, self.config.concurrency as u32, lock_until).await?;
		if batch.is_empty() {
			return Ok(0);
		}

		let mut joins = Vec::with_capacity(batch.len());
		for entity in batch {
			let permit = self.concurrency_limiter.clone().acquire_owned().await.ok();
			let ctx = self.ctx.clone();
			let store = self.store.clone();
			let stats = self.stats.clone();
			let graph = self.graph.clone();
			let handler = self.handlers.get(entity.stator_fields().state.as_str()).cloned();
			let model = self.graph.model;
			joins.push(tokio::spawn(async move {
				let _permit = permit;
				attempt_one(&ctx, &*graph, &*store, &stats, model, handler, entity).await;
			}));
		}
		let count = joins.len();
		for join in joins {
			let _ = join.await;
		}
		Ok(count)
	}

	/// Runs one full schedule+lock+cycle+delete pass synchronously, for
	/// tests that don't want a background task (mirrors
	/// `StatorRunner.run_single_cycle` in the original implementation).
	pub async fn run_once(&self) -> ClResult<usize> {
		self.run_schedule_sweep().await?;
		self.run_lock_sweep().await?;
		let handled = self.run_single_cycle().await?;
		self.run_delete_sweep().await?;
		Ok(handled)
	}

	/// Runs the full loop until `shutdown` resolves. Schedule/lock/delete
	/// sweeps fire on their own fixed intervals; the task cycle runs back
	/// to back with an idle backoff that grows from 0.5s to 5s.
	pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
		let mut schedule_interval =
			tokio::time::interval(Duration::from_secs(self.config.schedule_interval_secs as u64));
		let mut delete_interval =
			tokio::time::interval(Duration::from_secs(self.config.delete_interval_secs as u64));
		let mut idle_backoff_ms: u64 = 500;

		loop {
			self.last_tick_ms.store(Timestamp::now().0, Ordering::Relaxed);
			tokio::select! {
				_ = shutdown.changed() => {
					if *shutdown.borrow() {
						return;
					}
				}
				_ = schedule_interval.tick() => {
					if let Err(err) = self.run_schedule_sweep().await {
						tracing::warn!(model = self.graph.model, ?err, "schedule sweep failed");
					}
					if let Err(err) = self.run_lock_sweep().await {
						tracing::warn!(model = self.graph.model, ?err, "lock sweep failed");
					}
				}
				_ = delete_interval.tick() => {
					if let Err(err) = self.run_delete_sweep().await {
						tracing::warn!(model = self.graph.model, ?err, "delete sweep failed");
					}
				}
				() = tokio::time::sleep(Duration::from_millis(idle_backoff_ms)) => {
					match self.run_single_cycle().await {
						Ok(0) => idle_backoff_ms = (idle_backoff_ms * 3 / 2).min(5000),
						Ok(_) => idle_backoff_ms = 500,
						Err(err) => {
							tracing::warn!(model = self.graph.model, ?err, "task cycle failed");
							idle_backoff_ms = (idle_backoff_ms * 3 / 2).min(5000);
						}
					}
				}
			}
		}
	}

	/// Spawns the watchdog task: if `run()`'s loop hasn't ticked in
	/// `2 * schedule_interval`, the process exits with status 2 so a
	/// supervisor restarts it. The idiomatic-async substitute for the
	/// original's `SIGALRM` handler.
	pub fn spawn_watchdog(&self) -> tokio::task::JoinHandle<()> {
		let last_tick = self.last_tick_ms.clone();
		let threshold_ms = self.config.schedule_interval_secs * 2 * 1000;
		let model = self.graph.model;
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(Duration::from_secs(10));
			loop {
				interval.tick().await;
				let age = Timestamp::now().0 - last_tick.load(Ordering::Relaxed);
				if age > threshold_ms {
					tracing::error!(model, age_ms = age, "runner loop stalled, exiting process");
					std::process::exit(2);
				}
			}
		})
	}
}

async fn attempt_one<Ctx, E, S>(
	ctx: &Ctx,
	graph: &StateGraph,
	store: &S,
	stats: &StatsRegistry,
	model: &'static str,
	handler: Option<Arc<dyn StateHandler<Ctx, E>>>,
	entity: E,
) where
	Ctx: Send + Sync,
	E: StatorEntity,
	S: StatorStore<E>,
{
	let id = entity.id();
	let now = Timestamp::now();
	let Some(handler) = handler else {
		tracing::warn!(model, state = entity.stator_fields().state.as_str(), "no handler registered for state");
		let _ = store.transition_failed(id, now).await;
		return;
	};

	let outcome = handler.handle(ctx, &entity).await;
	stats.add_handled(model, now, 1);
	match outcome {
		Ok(Some(next_state)) => {
			if !graph.is_valid_transition(&entity.stator_fields().state, next_state) {
				tracing::error!(
					model,
					from = entity.stator_fields().state.as_str(),
					to = next_state,
					"handler returned an undeclared transition"
				);
				let _ = store.transition_failed(id, now).await;
				return;
			}
			let attempt_immediately =
				graph.node(next_state).is_some_and(|node| !node.externally_progressed);
			if let Err(err) = store.transition_perform(id, next_state, attempt_immediately, now).await {
				tracing::warn!(model, ?err, "failed to persist transition");
			}
		}
		Ok(None) => {
			let current_state = entity.stator_fields().state.as_str();
			let timed_out = graph.node(current_state).and_then(|node| node.timeout).filter(
				|(timeout_secs, _)| now.seconds_since(entity.stator_fields().state_changed) >= *timeout_secs,
			);
			if let Some((_, timeout_state)) = timed_out {
				if let Err(err) = store.transition_perform(id, timeout_state, true, now).await {
					tracing::warn!(model, ?err, "failed to persist timeout transition");
				}
			} else {
				let _ = store.transition_failed(id, now).await;
			}
		}
		Err(err) => {
			tracing::warn!(model, ?err, "handler returned an error, will retry");
			let _ = store.transition_failed(id, now).await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use parking_lot::Mutex;
	use relaystate_types::snowflake::EntityTag;
	use std::collections::HashMap;

	#[derive(Debug, Clone)]
	struct FakeEntity {
		id: Id,
		fields: relaystate_types::types::StatorFields,
	}

	impl StatorEntity for FakeEntity {
		const MODEL: &'static str = "FakeEntity";
		fn id(&self) -> Id {
			self.id
		}
		fn stator_fields(&self) -> &relaystate_types::types::StatorFields {
			&self.fields
		}
	}

	#[derive(Default)]
	struct FakeStore {
		rows: Mutex<HashMap<Id, FakeEntity>>,
	}

	#[async_trait]
	impl StatorStore<FakeEntity> for FakeStore {
		async fn sweep_schedule(&self, _states: &[(&str, i64)], _now: Timestamp) -> ClResult<u64> {
			Ok(0)
		}
		async fn sweep_locks(&self, _now: Timestamp) -> ClResult<u64> {
			Ok(0)
		}
		async fn sweep_delete(&self, _states: &[(&str, i64)], _now: Timestamp) -> ClResult<u64> {
			Ok(0)
		}
		async fn get_with_lock(
			&self,
			states: &[&str],
			limit: u32,
			_lock_until: Timestamp,
		) -> ClResult<Vec<FakeEntity>> {
			let rows = self.rows.lock();
			Ok(rows
				.values()
				.filter(|e| states.contains(&e.fields.state.as_str()))
				.take(limit as usize)
				.cloned()
				.collect())
		}
		async fn transition_perform(
			&self,
			id: Id,
			new_state: &str,
			_attempt_immediately: bool,
			now: Timestamp,
		) -> ClResult<()> {
			if let Some(row) = self.rows.lock().get_mut(&id) {
				row.fields.state = new_state.to_string();
				row.fields.state_changed = now;
			}
			Ok(())
		}
		async fn transition_failed(&self, id: Id, now: Timestamp) -> ClResult<()> {
			if let Some(row) = self.rows.lock().get_mut(&id) {
				row.fields.state_attempted = Some(now);
			}
			Ok(())
		}
		async fn queued_count(&self, states: &[&str]) -> ClResult<u64> {
			let rows = self.rows.lock();
			Ok(rows.values().filter(|e| states.contains(&e.fields.state.as_str())).count() as u64)
		}
	}

	struct AlwaysAdvance;

	#[async_trait]
	impl StateHandler<(), FakeEntity> for AlwaysAdvance {
		async fn handle(&self, _ctx: &(), _entity: &FakeEntity) -> ClResult<Option<&'static str>> {
			Ok(Some("done"))
		}
	}

	fn sample_graph() -> StateGraph {
		crate::graph::StateGraph::build(
			"FakeEntity",
			vec![
				crate::graph::StateNode::new("new").try_interval(60).handler().transitions_to("done"),
				crate::graph::StateNode::new("done"),
			],
		)
		.unwrap()
	}

	#[tokio::test]
	async fn single_cycle_advances_a_ready_row() {
		let store = Arc::new(FakeStore::default());
		let id = Id::new_at(EntityTag::Other, Timestamp(0));
		store.rows.lock().insert(
			id,
			FakeEntity { id, fields: relaystate_types::types::StatorFields::initial("new") },
		);

		let mut runner = Runner::new(
			Arc::new(()),
			sample_graph(),
			store.clone(),
			Arc::new(StatsRegistry::new()),
			RunnerConfig::default(),
		);
		runner.register("new", Arc::new(AlwaysAdvance));

		let handled = runner.run_single_cycle().await.unwrap();
		assert_eq!(handled, 1);
		assert_eq!(store.rows.lock().get(&id).unwrap().fields.state, "done");
	}

	#[tokio::test]
	async fn missing_handler_records_a_failed_attempt_without_panicking() {
		let store = Arc::new(FakeStore::default());
		let id = Id::new_at(EntityTag::Other, Timestamp(0));
		store.rows.lock().insert(
			id,
			FakeEntity { id, fields: relaystate_types::types::StatorFields::initial("new") },
		);
		let runner: Runner<(), FakeEntity, FakeStore> = Runner::new(
			Arc::new(()),
			sample_graph(),
			store.clone(),
			Arc::new(StatsRegistry::new()),
			RunnerConfig::default(),
		);
		let handled = runner.run_single_cycle().await.unwrap();
		assert_eq!(handled, 1);
		assert!(store.rows.lock().get(&id).unwrap().fields.state_attempted.is_some());
	}

	struct NeverAdvances;

	#[async_trait]
	impl StateHandler<(), FakeEntity> for NeverAdvances {
		async fn handle(&self, _ctx: &(), _entity: &FakeEntity) -> ClResult<Option<&'static str>> {
			Ok(None)
		}
	}

	fn timeout_graph() -> StateGraph {
		crate::graph::StateGraph::build(
			"FakeEntity",
			vec![
				crate::graph::StateNode::new("new")
					.try_interval(60)
					.handler()
					.timeout(60, "failed")
					.transitions_to("done")
					.transitions_to("failed"),
				crate::graph::StateNode::new("done"),
				crate::graph::StateNode::new("failed"),
			],
		)
		.unwrap()
	}

	#[tokio::test]
	async fn a_handler_returning_none_past_its_timeout_forces_the_timeout_transition() {
		let store = Arc::new(FakeStore::default());
		let id = Id::new_at(EntityTag::Other, Timestamp(0));
		let mut fields = relaystate_types::types::StatorFields::initial("new");
		fields.state_changed = Timestamp(0);
		store.rows.lock().insert(id, FakeEntity { id, fields });

		let mut runner = Runner::new(
			Arc::new(()),
			timeout_graph(),
			store.clone(),
			Arc::new(StatsRegistry::new()),
			RunnerConfig::default(),
		);
		runner.register("new", Arc::new(NeverAdvances));

		runner.run_single_cycle().await.unwrap();
		assert_eq!(store.rows.lock().get(&id).unwrap().fields.state, "failed");
	}

	#[tokio::test]
	async fn a_handler_returning_none_before_its_timeout_just_records_the_attempt() {
		let store = Arc::new(FakeStore::default());
		let id = Id::new_at(EntityTag::Other, Timestamp(0));
		let fields = relaystate_types::types::StatorFields::initial("new");
		store.rows.lock().insert(id, FakeEntity { id, fields });

		let mut runner = Runner::new(
			Arc::new(()),
			timeout_graph(),
			store.clone(),
			Arc::new(StatsRegistry::new()),
			RunnerConfig::default(),
		);
		runner.register("new", Arc::new(NeverAdvances));

		runner.run_single_cycle().await.unwrap();
		let row = store.rows.lock().get(&id).cloned().unwrap();
		assert_eq!(row.fields.state, "new");
		assert!(row.fields.state_attempted.is_some());
	}
}
