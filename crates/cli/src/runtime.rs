//! Wires the engine and batch runner to in-memory stores loaded from a
//! rule bundle file and a test catalogue file.

use std::path::Path;
use std::sync::Arc;

use callflow_batch::BatchCoordinator;
use callflow_eval::{
    Collaborators, HttpIntentClassifier, HttpPlatformClient, Orchestrator, SeededRandom,
};
use callflow_interchange::{from_bundle_str, RuleBundle};
use callflow_storage::memory::{
    MemoryBatchStore, MemoryBlobStore, MemoryConfigStore, MemorySessionStore, MemoryTestStore,
};
use callflow_storage::TestCaseRecord;

use crate::config::{CliConfig, CollaboratorConfig};

pub(crate) struct Runtime {
    pub engine: Arc<Orchestrator>,
    pub coordinator: Arc<BatchCoordinator>,
}

pub(crate) fn read_bundle(path: &Path) -> Result<RuleBundle, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("error reading rules '{}': {}", path.display(), e))?;
    from_bundle_str(&text).map_err(|e| format!("invalid rules '{}': {}", path.display(), e))
}

pub(crate) fn read_tests(path: &Path) -> Result<Vec<TestCaseRecord>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("error reading tests '{}': {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("invalid tests '{}': {}", path.display(), e))
}

/// Build the engine's collaborators from the `[collaborators]` table.
pub(crate) fn collaborators(config: &CollaboratorConfig) -> Collaborators {
    let mut collaborators = Collaborators::default();
    if let Some(url) = config.classifier_url.as_deref().filter(|u| !u.is_empty()) {
        tracing::info!(url, "intent classifier configured");
        collaborators.classifier = Some(Arc::new(HttpIntentClassifier::new(
            url,
            config.classifier_token.clone(),
        )));
    }
    if let Some(url) = config.platform_url.as_deref().filter(|u| !u.is_empty()) {
        tracing::info!(url, "platform client configured");
        collaborators.platform = Some(Arc::new(HttpPlatformClient::new(url)));
    }
    if let Some(seed) = config.random_seed {
        collaborators.random = Arc::new(SeededRandom::new(seed));
    }
    collaborators
}

impl Runtime {
    pub(crate) fn new(bundle: RuleBundle, tests: Vec<TestCaseRecord>, config: &CliConfig) -> Self {
        let config_store = Arc::new(MemoryConfigStore::new(bundle));
        let engine = Arc::new(
            Orchestrator::new(config_store.clone(), Arc::new(MemorySessionStore::new()))
                .with_config(config.engine.clone())
                .with_collaborators(collaborators(&config.collaborators)),
        );
        let coordinator = BatchCoordinator::new(
            Arc::new(MemoryTestStore::new(tests)),
            Arc::new(MemoryBatchStore::new()),
            Arc::new(MemoryBlobStore::new()),
            config_store,
            engine.clone(),
        )
        .with_config(config.batch.clone());
        Runtime {
            engine,
            coordinator: Arc::new(coordinator),
        }
    }

    /// Load the rule bundle and, when given, the test catalogue.
    pub(crate) fn load(
        rules: &Path,
        tests: Option<&Path>,
        config: &CliConfig,
    ) -> Result<Self, String> {
        let bundle = read_bundle(rules)?;
        let tests = match tests {
            Some(p) => read_tests(p)?,
            None => Vec::new(),
        };
        tracing::info!(
            rule_sets = bundle.rule_sets.len(),
            tests = tests.len(),
            "loaded rules and tests"
        );
        Ok(Runtime::new(bundle, tests, config))
    }
}
