//! Declarative state-graph definition and validation.
//!
//! Ported from `original_source/stator/graph.py`'s `StateGraph.__init_subclass__`:
//! a graph has exactly one initial state (no parents), every terminal state
//! (no children) is implicitly externally-progressed and carries no handler,
//! and every other state must declare both a `try_interval` and a handler.
//! Validation runs once, at graph construction, matching spec.md's
//! "graph-definition invariants enforced at startup".

use std::collections::{HashMap, HashSet};

use relaystate_types::error::{ClResult, Error};

#[derive(Debug, Clone)]
pub struct StateNode {
	pub name: &'static str,
	/// Seconds between automatic retry attempts while this state is ready
	/// but unhandled. `None` for terminal/externally-progressed states.
	pub try_interval: Option<i64>,
	/// True if nothing but an external signal (not the stator sweep) moves
	/// this entity out of the state. Every terminal state is implicitly
	/// externally progressed.
	pub externally_progressed: bool,
	pub has_handler: bool,
	pub children: Vec<&'static str>,
	/// Seconds after `state_changed` before a terminal row in this state is
	/// garbage-collected by the delete sweep. `None` means kept forever.
	pub delete_after: Option<i64>,
	/// If the handler keeps returning `None` for this many seconds since
	/// `state_changed`, the runner forces a transition to `timeout_state`
	/// instead of recording another no-op attempt.
	pub timeout: Option<(i64, &'static str)>,
}

impl StateNode {
	#[must_use]
	pub fn new(name: &'static str) -> Self {
		Self {
			name,
			try_interval: None,
			externally_progressed: false,
			has_handler: false,
			children: vec![],
			delete_after: None,
			timeout: None,
		}
	}

	#[must_use]
	pub fn try_interval(mut self, seconds: i64) -> Self {
		self.try_interval = Some(seconds);
		self
	}

	#[must_use]
	pub fn externally_progressed(mut self) -> Self {
		self.externally_progressed = true;
		self
	}

	#[must_use]
	pub fn handler(mut self) -> Self {
		self.has_handler = true;
		self
	}

	#[must_use]
	pub fn transitions_to(mut self, state: &'static str) -> Self {
		self.children.push(state);
		self
	}

	#[must_use]
	pub fn delete_after(mut self, seconds: i64) -> Self {
		self.delete_after = Some(seconds);
		self
	}

	#[must_use]
	pub fn timeout(mut self, seconds: i64, timeout_state: &'static str) -> Self {
		self.timeout = Some((seconds, timeout_state));
		self
	}
}

#[derive(Debug)]
pub struct StateGraph {
	pub model: &'static str,
	pub initial: &'static str,
	nodes: HashMap<&'static str, StateNode>,
}

impl StateGraph {
	/// Builds and validates a graph from its nodes. Mirrors the Python
	/// metaclass hook: invalid graphs fail fast, before the runner ever
	/// starts, rather than surfacing as a confusing runtime dispatch error.
	pub fn build(model: &'static str, mut nodes: Vec<StateNode>) -> ClResult<Self> {
		let mut parents: HashMap<&'static str, HashSet<&'static str>> = HashMap::new();
		let names: HashSet<&'static str> = nodes.iter().map(|n| n.name).collect();
		for node in &nodes {
			for child in &node.children {
				if !names.contains(child) {
					return Err(Error::ConfigError(format!(
						"{model}: state {} transitions to undeclared state {child}",
						node.name
					)));
				}
				parents.entry(child).or_default().insert(node.name);
			}
		}

		let initial_candidates: Vec<&'static str> =
			nodes.iter().map(|n| n.name).filter(|name| !parents.contains_key(name)).collect();
		if initial_candidates.len() != 1 {
			return Err(Error::ConfigError(format!(
				"{model}: expected exactly one initial state (no parents), found {initial_candidates:?}"
			)));
		}
		let initial = initial_candidates[0];

		for node in &mut nodes {
			let is_terminal = node.children.is_empty();
			if is_terminal {
				node.externally_progressed = true;
				if node.has_handler {
					return Err(Error::ConfigError(format!(
						"{model}: terminal state {} must not declare a handler",
						node.name
					)));
				}
			} else {
				if node.delete_after.is_some() {
					return Err(Error::ConfigError(format!(
						"{model}: non-terminal state {} must not declare delete_after",
						node.name
					)));
				}
				if !node.externally_progressed && (node.try_interval.is_none() || !node.has_handler) {
					return Err(Error::ConfigError(format!(
						"{model}: non-terminal, non-externally-progressed state {} needs both a try_interval and a handler",
						node.name
					)));
				}
				if let Some((_, timeout_state)) = node.timeout {
					if !node.children.contains(&timeout_state) {
						return Err(Error::ConfigError(format!(
							"{model}: state {} times out to undeclared child {timeout_state}",
							node.name
						)));
					}
				}
			}
		}

		let nodes = nodes.into_iter().map(|n| (n.name, n)).collect();
		Ok(Self { model, initial, nodes })
	}

	#[must_use]
	pub fn node(&self, name: &str) -> Option<&StateNode> {
		self.nodes.get(name)
	}

	/// States the scheduler sweep should scan: not terminal, not
	/// externally-progressed (those never become `state_ready` on a timer).
	pub fn schedulable_states(&self) -> impl Iterator<Item = (&'static str, i64)> + '_ {
		self.nodes
			.values()
			.filter(|n| !n.externally_progressed)
			.filter_map(|n| n.try_interval.map(|interval| (n.name, interval)))
	}

	/// Terminal, externally-progressed states eligible for the delete sweep.
	pub fn terminal_states(&self) -> impl Iterator<Item = &'static str> + '_ {
		self.nodes.values().filter(|n| n.children.is_empty()).map(|n| n.name)
	}

	/// Terminal states that declare a `delete_after`, paired with the
	/// horizon in seconds, for the delete sweep's per-state GC threshold.
	pub fn terminal_states_with_delete_after(&self) -> impl Iterator<Item = (&'static str, i64)> + '_ {
		self.nodes.values().filter_map(|n| n.delete_after.map(|secs| (n.name, secs)))
	}

	pub fn all_state_names(&self) -> impl Iterator<Item = &'static str> + '_ {
		self.nodes.keys().copied()
	}

	#[must_use]
	pub fn is_valid_transition(&self, from: &str, to: &str) -> bool {
		self.nodes.get(from).is_some_and(|n| n.children.contains(&to))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_graph() -> ClResult<StateGraph> {
		StateGraph::build(
			"sample",
			vec![
				StateNode::new("new").try_interval(60).handler().transitions_to("fanned_out"),
				StateNode::new("fanned_out").externally_progressed(),
			],
		)
	}

	#[test]
	fn valid_graph_builds() {
		let graph = sample_graph().unwrap();
		assert_eq!(graph.initial, "new");
		assert!(graph.is_valid_transition("new", "fanned_out"));
	}

	#[test]
	fn rejects_graphs_with_no_single_initial_state() {
		let result = StateGraph::build(
			"broken",
			vec![
				StateNode::new("a").transitions_to("b").externally_progressed(),
				StateNode::new("b").transitions_to("a").externally_progressed(),
			],
		);
		assert!(result.is_err());
	}

	#[test]
	fn rejects_non_terminal_state_missing_handler() {
		let result = StateGraph::build(
			"broken",
			vec![StateNode::new("new").try_interval(60).transitions_to("done"), StateNode::new("done")],
		);
		assert!(result.is_err());
	}

	#[test]
	fn rejects_terminal_state_with_handler() {
		let result = StateGraph::build(
			"broken",
			vec![StateNode::new("new").handler().transitions_to("done"), StateNode::new("done").handler()],
		);
		assert!(result.is_err());
	}

	#[test]
	fn terminal_states_are_implicitly_externally_progressed() {
		let graph = sample_graph().unwrap();
		assert!(graph.node("fanned_out").unwrap().externally_progressed);
	}

	#[test]
	fn rejects_non_terminal_state_with_delete_after() {
		let result = StateGraph::build(
			"broken",
			vec![
				StateNode::new("new").try_interval(60).handler().delete_after(3600).transitions_to("done"),
				StateNode::new("done"),
			],
		);
		assert!(result.is_err());
	}

	#[test]
	fn rejects_timeout_to_undeclared_child() {
		let result = StateGraph::build(
			"broken",
			vec![
				StateNode::new("new").try_interval(60).handler().timeout(300, "failed").transitions_to("done"),
				StateNode::new("done"),
			],
		);
		assert!(result.is_err());
	}

	#[test]
	fn accepts_timeout_to_declared_child() {
		let graph = StateGraph::build(
			"sample",
			vec![
				StateNode::new("new")
					.try_interval(60)
					.handler()
					.timeout(300, "failed")
					.transitions_to("done")
					.transitions_to("failed"),
				StateNode::new("done"),
				StateNode::new("failed"),
			],
		)
		.unwrap();
		assert_eq!(graph.node("new").unwrap().timeout, Some((300, "failed")));
	}

	#[test]
	fn terminal_delete_after_is_surfaced_for_the_delete_sweep() {
		let graph = StateGraph::build(
			"sample",
			vec![
				StateNode::new("new").try_interval(60).handler().transitions_to("done"),
				StateNode::new("done").delete_after(86400),
			],
		)
		.unwrap();
		let horizons: Vec<_> = graph.terminal_states_with_delete_after().collect();
		assert_eq!(horizons, vec![("done", 86400)]);
	}
}
