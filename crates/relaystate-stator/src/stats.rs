//! Per-model workflow statistics: how many entities are queued right now,
//! and how many handler attempts completed per hour/day/month.
//!
//! Ported from `original_source/stator/models.py`'s `Stats` class, including
//! its exact trim horizons: queued samples older than 2 hours, hourly
//! buckets older than 50 hours, daily buckets older than 62 days, monthly
//! buckets older than 3653 days (10 years) are dropped on every write.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use relaystate_types::types::Timestamp;

const QUEUED_HORIZON_SECS: i64 = 2 * 3600;
const HOURLY_HORIZON_SECS: i64 = 50 * 3600;
const DAILY_HORIZON_SECS: i64 = 62 * 86400;
const MONTHLY_HORIZON_SECS: i64 = 3653 * 86400;

const MINUTE_SECS: i64 = 60;
const HOUR_SECS: i64 = 3600;
const DAY_SECS: i64 = 86400;
const MONTH_SECS: i64 = 30 * 86400;

fn bucket(now: Timestamp, granularity_secs: i64) -> Timestamp {
	Timestamp((now.0 / 1000 / granularity_secs) * granularity_secs * 1000)
}

#[derive(Debug, Default, Clone)]
pub struct Stats {
	queued: BTreeMap<Timestamp, u64>,
	hourly: BTreeMap<Timestamp, u64>,
	daily: BTreeMap<Timestamp, u64>,
	monthly: BTreeMap<Timestamp, u64>,
}

impl Stats {
	pub fn set_queued(&mut self, now: Timestamp, count: u64) {
		self.queued.insert(bucket(now, MINUTE_SECS), count);
		self.trim_data(now);
	}

	pub fn add_handled(&mut self, now: Timestamp, count: u64) {
		*self.hourly.entry(bucket(now, HOUR_SECS)).or_insert(0) += count;
		*self.daily.entry(bucket(now, DAY_SECS)).or_insert(0) += count;
		*self.monthly.entry(bucket(now, MONTH_SECS)).or_insert(0) += count;
		self.trim_data(now);
	}

	pub fn trim_data(&mut self, now: Timestamp) {
		trim_before(&mut self.queued, now, QUEUED_HORIZON_SECS);
		trim_before(&mut self.hourly, now, HOURLY_HORIZON_SECS);
		trim_before(&mut self.daily, now, DAILY_HORIZON_SECS);
		trim_before(&mut self.monthly, now, MONTHLY_HORIZON_SECS);
	}

	#[must_use]
	pub fn most_recent_queued(&self) -> Option<(Timestamp, u64)> {
		self.queued.iter().next_back().map(|(t, c)| (*t, *c))
	}

	#[must_use]
	pub fn most_recent_handled(&self) -> Option<(Timestamp, u64)> {
		self.hourly.iter().next_back().map(|(t, c)| (*t, *c))
	}

	#[must_use]
	pub fn queued_series(&self) -> &BTreeMap<Timestamp, u64> {
		&self.queued
	}

	#[must_use]
	pub fn hourly_series(&self) -> &BTreeMap<Timestamp, u64> {
		&self.hourly
	}
}

fn trim_before(series: &mut BTreeMap<Timestamp, u64>, now: Timestamp, horizon_secs: i64) {
	let cutoff = Timestamp(now.0 - horizon_secs * 1000);
	series.retain(|ts, _| *ts >= cutoff);
}

/// Process-wide registry of [`Stats`] keyed by model name, guarded by a
/// single mutex the way the teacher guards its in-memory scheduler state.
#[derive(Default)]
pub struct StatsRegistry {
	by_model: Mutex<std::collections::HashMap<&'static str, Stats>>,
}

impl StatsRegistry {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_queued(&self, model: &'static str, now: Timestamp, count: u64) {
		self.by_model.lock().entry(model).or_default().set_queued(now, count);
	}

	pub fn add_handled(&self, model: &'static str, now: Timestamp, count: u64) {
		self.by_model.lock().entry(model).or_default().add_handled(now, count);
	}

	#[must_use]
	pub fn get_for_model(&self, model: &'static str) -> Stats {
		self.by_model.lock().entry(model).or_default().clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn queued_samples_older_than_two_hours_are_trimmed() {
		let mut stats = Stats::default();
		let start = Timestamp(0);
		stats.set_queued(start, 5);
		let later = Timestamp(start.0 + (QUEUED_HORIZON_SECS + 60) * 1000);
		stats.set_queued(later, 7);
		assert_eq!(stats.queued_series().len(), 1);
		assert_eq!(stats.most_recent_queued(), Some((bucket(later, MINUTE_SECS), 7)));
	}

	#[test]
	fn hourly_buckets_accumulate_within_the_same_hour() {
		let mut stats = Stats::default();
		let t0 = Timestamp(0);
		stats.add_handled(t0, 3);
		stats.add_handled(Timestamp(t0.0 + 10_000), 2);
		assert_eq!(stats.most_recent_handled(), Some((bucket(t0, HOUR_SECS), 5)));
	}

	#[test]
	fn registry_tracks_independent_models() {
		let registry = StatsRegistry::new();
		registry.set_queued("Post", Timestamp(0), 3);
		registry.set_queued("Follow", Timestamp(0), 9);
		assert_eq!(registry.get_for_model("Post").most_recent_queued(), Some((Timestamp(0), 3)));
		assert_eq!(registry.get_for_model("Follow").most_recent_queued(), Some((Timestamp(0), 9)));
	}
}
