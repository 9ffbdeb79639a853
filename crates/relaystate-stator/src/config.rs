//! Three-scope (system/user/identity) configuration registry.
//!
//! Grounded on `cloudillo-core::settings`'s `SettingDefinition`/`SettingScope`/
//! `SettingsRegistry` triad: every key is declared once with its allowed
//! scope and a default, and lookups fall through system defaults unless a
//! narrower scope overrides them.

use std::collections::HashMap;

use relaystate_types::error::{ClResult, Error};
use relaystate_types::snowflake::Id;
use relaystate_types::store::{ConfigScope, ConfigStore};

#[derive(Debug, Clone, Copy)]
pub struct SettingDefinition {
	pub key: &'static str,
	/// The narrowest scope this key may be set at; system-scoped keys may
	/// only ever be set system-wide, user/identity-scoped keys may also be
	/// overridden system-wide as a default.
	pub scope: ConfigScope,
	pub default: &'static str,
	pub description: &'static str,
}

pub struct SettingsRegistry<S: ConfigStore> {
	store: S,
	definitions: HashMap<&'static str, SettingDefinition>,
}

impl<S: ConfigStore> SettingsRegistry<S> {
	#[must_use]
	pub fn new(store: S) -> Self {
		Self { store, definitions: HashMap::new() }
	}

	#[must_use]
	pub fn with_defaults(store: S) -> Self {
		let mut registry = Self::new(store);
		for definition in DEFAULT_SETTINGS {
			registry.define(*definition);
		}
		registry
	}

	pub fn define(&mut self, definition: SettingDefinition) {
		self.definitions.insert(definition.key, definition);
	}

	/// Resolves a key at the narrowest scope it was requested, falling back
	/// through system scope and finally to the declared default.
	pub async fn get(&self, key: &str, scope: ConfigScope, scope_id: Option<Id>) -> ClResult<String> {
		let definition = self
			.definitions
			.get(key)
			.ok_or_else(|| Error::ConfigError(format!("unknown setting {key}")))?;

		if let Some(value) = self.store.get_raw(scope, scope_id, key).await? {
			return Ok(value);
		}
		if scope != ConfigScope::System {
			if let Some(value) = self.store.get_raw(ConfigScope::System, None, key).await? {
				return Ok(value);
			}
		}
		Ok(definition.default.to_string())
	}

	pub async fn get_i64(&self, key: &str, scope: ConfigScope, scope_id: Option<Id>) -> ClResult<i64> {
		let raw = self.get(key, scope, scope_id).await?;
		raw.parse().map_err(|_| Error::ConfigError(format!("{key} is not an integer: {raw}")))
	}

	pub async fn set(
		&self,
		key: &str,
		scope: ConfigScope,
		scope_id: Option<Id>,
		value: &str,
	) -> ClResult<()> {
		self.definitions.get(key).ok_or_else(|| Error::ConfigError(format!("unknown setting {key}")))?;
		self.store.set_raw(scope, scope_id, key, value).await
	}
}

/// Well-known runner and federation tunables, matching the defaults
/// `original_source/stator/runner.py`'s `StatorRunner` hard-codes
/// (concurrency, schedule/delete intervals, lock expiry) plus the
/// federation-layer knobs spec.md's External Interfaces section names.
pub const DEFAULT_SETTINGS: &[SettingDefinition] = &[
	SettingDefinition {
		key: "stator.concurrency",
		scope: ConfigScope::System,
		default: "30",
		description: "maximum handler invocations running at once, across all models",
	},
	SettingDefinition {
		key: "stator.concurrency_per_model",
		scope: ConfigScope::System,
		default: "15",
		description: "maximum handler invocations running at once for a single model",
	},
	SettingDefinition {
		key: "stator.schedule_interval_seconds",
		scope: ConfigScope::System,
		default: "60",
		description: "how often the schedule sweep runs",
	},
	SettingDefinition {
		key: "stator.delete_interval_seconds",
		scope: ConfigScope::System,
		default: "30",
		description: "how often the terminal-state delete sweep runs",
	},
	SettingDefinition {
		key: "stator.lock_expiry_seconds",
		scope: ConfigScope::System,
		default: "300",
		description: "how long a row lease lasts before another runner may reclaim it",
	},
	SettingDefinition {
		key: "federation.max_inbox_body_bytes",
		scope: ConfigScope::System,
		default: "1048576",
		description: "maximum accepted inbox request body size",
	},
	SettingDefinition {
		key: "federation.signature_max_skew_seconds",
		scope: ConfigScope::System,
		default: "300",
		description: "maximum allowed clock skew on a signed request's Date header",
	},
	SettingDefinition {
		key: "federation.rate_limit_per_minute",
		scope: ConfigScope::System,
		default: "120",
		description: "inbox requests accepted per remote host per minute before throttling",
	},
	SettingDefinition {
		key: "identity.default_visibility",
		scope: ConfigScope::Identity,
		default: "public",
		description: "default audience for new posts by this identity",
	},
];

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use parking_lot::Mutex;
	use std::collections::HashMap as Map;

	#[derive(Default)]
	struct InMemoryConfigStore {
		values: Mutex<Map<(String, Option<Id>, String), String>>,
	}

	#[async_trait]
	impl ConfigStore for InMemoryConfigStore {
		async fn get_raw(
			&self,
			scope: ConfigScope,
			scope_id: Option<Id>,
			key: &str,
		) -> ClResult<Option<String>> {
			Ok(self.values.lock().get(&(format!("{scope:?}"), scope_id, key.to_string())).cloned())
		}

		async fn set_raw(
			&self,
			scope: ConfigScope,
			scope_id: Option<Id>,
			key: &str,
			value: &str,
		) -> ClResult<()> {
			self.values.lock().insert((format!("{scope:?}"), scope_id, key.to_string()), value.to_string());
			Ok(())
		}

		async fn delete(&self, scope: ConfigScope, scope_id: Option<Id>, key: &str) -> ClResult<()> {
			self.values.lock().remove(&(format!("{scope:?}"), scope_id, key.to_string()));
			Ok(())
		}
	}

	#[tokio::test]
	async fn falls_back_to_declared_default() {
		let registry = SettingsRegistry::with_defaults(InMemoryConfigStore::default());
		let value = registry.get_i64("stator.concurrency", ConfigScope::System, None).await.unwrap();
		assert_eq!(value, 30);
	}

	#[tokio::test]
	async fn identity_scope_overrides_system_default() {
		let registry = SettingsRegistry::with_defaults(InMemoryConfigStore::default());
		let identity = Id::new(relaystate_types::snowflake::EntityTag::Identity);
		registry
			.set("identity.default_visibility", ConfigScope::Identity, Some(identity), "unlisted")
			.await
			.unwrap();
		let value = registry
			.get("identity.default_visibility", ConfigScope::Identity, Some(identity))
			.await
			.unwrap();
		assert_eq!(value, "unlisted");
		let other = Id::new(relaystate_types::snowflake::EntityTag::Identity);
		let default_value = registry
			.get("identity.default_visibility", ConfigScope::Identity, Some(other))
			.await
			.unwrap();
		assert_eq!(default_value, "public");
	}

	#[tokio::test]
	async fn unknown_key_is_rejected() {
		let registry = SettingsRegistry::with_defaults(InMemoryConfigStore::default());
		let err = registry.get("not.a.real.key", ConfigScope::System, None).await;
		assert!(err.is_err());
	}
}
