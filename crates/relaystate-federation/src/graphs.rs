//! Thin re-export + constructor shim so entity modules don't each spell out
//! `relaystate_stator::graph::{StateGraph, StateNode}`.

pub use relaystate_stator::graph::{StateGraph, StateNode};

#[must_use]
pub fn node(name: &'static str) -> StateNode {
	StateNode::new(name)
}
