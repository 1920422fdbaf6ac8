//! Process-lifetime cache of published rule configuration.
//!
//! Every request compares the store's last-change token with the cached
//! one and reloads everything on mismatch. A reload builds a fresh
//! [`CachedConfig`] and swaps the reference, so in-flight invocations keep
//! the snapshot they started with.

use std::collections::BTreeMap;
use std::sync::Arc;

use callflow_interchange::{RuleBundle, RuleSet};
use callflow_storage::{ConfigStore, StorageError};
use serde_json::Value;
use tokio::sync::RwLock;

/// One immutable snapshot of the rule configuration.
#[derive(Debug, Clone, Default)]
pub struct CachedConfig {
    pub token: String,
    /// Enabled rule sets by name, each holding only enabled rules sorted by
    /// descending priority.
    pub rule_sets: BTreeMap<String, RuleSet>,
    /// Inbound number to endpoint name.
    pub number_routes: BTreeMap<String, String>,
    /// Endpoint name to rule set name.
    pub endpoints: BTreeMap<String, String>,
    pub config: BTreeMap<String, String>,
    pub holidays: Vec<String>,
}

impl CachedConfig {
    pub fn from_bundle(token: &str, bundle: RuleBundle) -> Self {
        let mut rule_sets = BTreeMap::new();
        let mut endpoints = BTreeMap::new();

        for mut rule_set in bundle.rule_sets.into_iter().filter(|rs| rs.enabled) {
            rule_set.rules.retain(|r| r.enabled);
            rule_set.sort_rules();
            for endpoint in &rule_set.endpoints {
                if let Some(existing) = endpoints.get(endpoint) {
                    tracing::warn!(
                        endpoint = %endpoint,
                        kept = %existing,
                        ignored = %rule_set.name,
                        "endpoint routed to more than one rule set"
                    );
                    continue;
                }
                endpoints.insert(endpoint.clone(), rule_set.name.clone());
            }
            rule_sets.insert(rule_set.name.clone(), rule_set);
        }

        let number_routes = bundle
            .routes
            .into_iter()
            .map(|r| (r.number, r.endpoint))
            .collect();

        CachedConfig {
            token: token.to_string(),
            rule_sets,
            number_routes,
            endpoints,
            config: bundle.config,
            holidays: bundle.holidays,
        }
    }

    pub fn rule_set(&self, name: &str) -> Option<&RuleSet> {
        self.rule_sets.get(name)
    }

    /// Route a dialed number through its endpoint to a rule set.
    pub fn rule_set_for_number(&self, number: &str) -> Option<&RuleSet> {
        let endpoint = self.number_routes.get(number)?;
        let name = self.endpoints.get(endpoint)?;
        self.rule_sets.get(name)
    }

    /// Config key/values as the read-only `Config` object. Values that hold
    /// JSON objects or arrays are presented structured.
    pub fn config_json(&self) -> Value {
        Value::Object(
            self.config
                .iter()
                .map(|(k, v)| (k.clone(), crate::state::decode_value(v)))
                .collect(),
        )
    }
}

/// Token-invalidated cache in front of a [`ConfigStore`].
pub struct RuleSetCache {
    store: Arc<dyn ConfigStore>,
    current: RwLock<Option<Arc<CachedConfig>>>,
}

impl RuleSetCache {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        RuleSetCache {
            store,
            current: RwLock::new(None),
        }
    }

    /// Current snapshot, reloading first if the change token moved.
    pub async fn snapshot(&self) -> Result<Arc<CachedConfig>, StorageError> {
        let token = self.store.last_change_token().await?;
        if let Some(cached) = self.current.read().await.as_ref() {
            if cached.token == token {
                return Ok(Arc::clone(cached));
            }
        }

        let bundle = self.store.load_bundle().await?;
        let fresh = Arc::new(CachedConfig::from_bundle(&token, bundle));
        tracing::info!(
            token = %token,
            rule_sets = fresh.rule_sets.len(),
            routes = fresh.number_routes.len(),
            "rule configuration loaded"
        );
        *self.current.write().await = Some(Arc::clone(&fresh));
        Ok(fresh)
    }

    /// Drop the cached snapshot so the next request reloads.
    pub async fn invalidate(&self) {
        *self.current.write().await = None;
    }
}
