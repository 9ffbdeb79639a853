//! Per-host throttling for the inbox endpoints (spec.md §6's inbound HTTP
//! surface is the only externally-writable one this crate exposes).
//!
//! Grounded on the teacher's `cloudillo-core::rate_limit::limiter`
//! (`governor`'s GCRA keyed limiter, wrapped in an `Arc` and shared across
//! requests) but reduced from its hierarchical IPv4/network + IPv6/subnet +
//! proof-of-work tiers to the single tier this crate's scope calls for: one
//! token bucket per remote IP address, quota read from
//! `federation.rate_limit_per_minute`.

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::state::keyed::DashMapStateStore;
use governor::{clock::DefaultClock, Quota, RateLimiter};

type KeyedLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

/// The quota is fixed at construction, read once at boot from
/// `federation.rate_limit_per_minute` — same as `runners.rs`'s
/// `RunnerConfig`, which is likewise not hot-reloaded.
pub struct InboxRateLimiter {
	limiter: KeyedLimiter,
}

impl InboxRateLimiter {
	/// `per_minute` is `federation.rate_limit_per_minute`, clamped to a
	/// minimum of 1 (`governor`'s `Quota` has no "unlimited" variant).
	#[must_use]
	pub fn new(per_minute: u32) -> Self {
		let per_minute = match NonZeroU32::new(per_minute) {
			Some(n) => n,
			None => match NonZeroU32::new(1) {
				Some(n) => n,
				None => unreachable!(),
			},
		};
		Self { limiter: RateLimiter::keyed(Quota::per_minute(per_minute)) }
	}

	/// `true` if `addr` is still within its per-minute budget.
	#[must_use]
	pub fn check(&self, addr: IpAddr) -> bool {
		self.limiter.check_key(&addr).is_ok()
	}
}

/// Layered onto the inbox routes only via `axum::middleware::from_fn_with_state`
/// (mirroring the teacher's `RateLimitLayer` applied just to the federation
/// router) — every other route in this crate is a read and carries no quota.
/// Requires the router to be served with
/// `into_make_service_with_connect_info::<SocketAddr>()` so `ConnectInfo` is
/// available to extract.
pub async fn throttle(
	State(limiter): State<Arc<InboxRateLimiter>>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
	request: axum::extract::Request,
	next: Next,
) -> Response {
	if limiter.check(addr.ip()) {
		next.run(request).await
	} else {
		(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn first_request_from_a_fresh_address_is_allowed() {
		let limiter = InboxRateLimiter::new(60);
		assert!(limiter.check("203.0.113.1".parse().unwrap()));
	}

	#[test]
	fn exhausting_the_quota_rejects_further_requests_from_the_same_address() {
		let limiter = InboxRateLimiter::new(1);
		let addr: IpAddr = "203.0.113.2".parse().unwrap();
		assert!(limiter.check(addr));
		assert!(!limiter.check(addr));
	}

	#[test]
	fn different_addresses_have_independent_budgets() {
		let limiter = InboxRateLimiter::new(1);
		let a: IpAddr = "203.0.113.3".parse().unwrap();
		let b: IpAddr = "203.0.113.4".parse().unwrap();
		assert!(limiter.check(a));
		assert!(limiter.check(b));
	}
}
