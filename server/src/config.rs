//! Process-level configuration read once at startup from the environment,
//! grounded on the teacher's `basic-server/src/main.rs` (`env::var` with a
//! fallback default, no config file parser). Distinct from
//! [`relaystate_stator::config::SettingsRegistry`], which holds the
//! runtime-tunable knobs that live in the database and can change without a
//! restart.

use std::path::PathBuf;

/// Server name and version reported in the `/nodeinfo/2.0/` document.
pub const SOFTWARE_NAME: &str = "relaystate";
pub const SOFTWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct ServerConfig {
	/// Directory the SQLite database and any other on-disk state live in.
	pub db_dir: PathBuf,
	/// Address the HTTP listener binds.
	pub listen: String,
	/// The public-facing origin (scheme + host, no trailing slash) this
	/// server's own actor URIs and discovery documents are built against.
	pub base_url: String,
	/// Whether new account registration is open, reported verbatim in
	/// `/nodeinfo/2.0/`'s `openRegistrations` field. This crate carries no
	/// registration endpoint of its own (out of scope per spec.md §1); the
	/// flag exists purely for accurate self-description.
	pub open_registration: bool,
}

impl ServerConfig {
	#[must_use]
	pub fn from_env() -> Self {
		Self {
			db_dir: PathBuf::from(std::env::var("RELAYSTATE_DB_DIR").unwrap_or_else(|_| "./data".into())),
			listen: std::env::var("RELAYSTATE_LISTEN").unwrap_or_else(|_| "127.0.0.1:8080".into()),
			base_url: std::env::var("RELAYSTATE_BASE_URL")
				.unwrap_or_else(|_| "https://localhost:8080".into())
				.trim_end_matches('/')
				.to_string(),
			open_registration: std::env::var("RELAYSTATE_OPEN_REGISTRATION")
				.map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
				.unwrap_or(false),
		}
	}

	#[must_use]
	pub fn system_actor_uri(&self) -> String {
		format!("{}/actor", self.base_url)
	}
}
