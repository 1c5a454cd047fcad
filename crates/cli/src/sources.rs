//! Process-level implementations of the secret and target ports.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webhooks::{CredentialRef, SecretSource, SubscriberRegistry, Target, TargetSource};

use crate::config::{self, TargetSettings};
use crate::triggers::{TriggerRequest, TriggerSubscriber};

/// Resolves credentials from environment variables named by the reference.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretSource;

impl SecretSource for EnvSecretSource {
    fn secret(&self, credential: &CredentialRef) -> Option<String> {
        std::env::var(credential.as_str())
            .ok()
            .filter(|value| !value.is_empty())
    }
}

/// The target catalogue, re-read from the configuration file on every call.
///
/// Each read also brings the registry's trigger subscribers in line with
/// the file, so adding a target to the file is enough to get its hooks.
/// When the file cannot be read the previous catalogue is kept.
pub struct ConfigTargetSource {
    path: PathBuf,
    registry: Arc<SubscriberRegistry>,
    triggers: mpsc::Sender<TriggerRequest>,
    state: Mutex<SourceState>,
}

#[derive(Default)]
struct SourceState {
    targets: Vec<Target>,
    subscribed: BTreeSet<String>,
}

impl ConfigTargetSource {
    pub fn new(
        path: impl Into<PathBuf>,
        registry: Arc<SubscriberRegistry>,
        triggers: mpsc::Sender<TriggerRequest>,
    ) -> Self {
        Self {
            path: path.into(),
            registry,
            triggers,
            state: Mutex::new(SourceState::default()),
        }
    }

    /// Replaces the catalogue and trigger subscribers with `targets`.
    pub fn apply(&self, targets: Vec<TargetSettings>) -> Vec<Target> {
        let mut state = self.state.lock();
        let mut subscribed = BTreeSet::new();
        for settings in &targets {
            subscribed.insert(TriggerSubscriber::registry_name(&settings.target.name));
            self.registry.register(Arc::new(TriggerSubscriber::new(
                settings.target.clone(),
                settings.events.clone(),
                self.triggers.clone(),
            )));
        }
        for stale in state.subscribed.difference(&subscribed) {
            info!(subscriber = %stale, "Removing trigger for deleted target");
            self.registry.unregister(stale);
        }

        state.subscribed = subscribed;
        state.targets = targets.into_iter().map(|t| t.target).collect();
        state.targets.clone()
    }
}

#[async_trait]
impl TargetSource for ConfigTargetSource {
    async fn targets(&self) -> Vec<Target> {
        let path = self.path.clone();
        let loaded = tokio::task::spawn_blocking(move || config::load(&path)).await;
        match loaded {
            Ok(Ok(settings)) => {
                debug!(path = %self.path.display(), targets = settings.targets.len(), "Re-read targets");
                self.apply(settings.targets)
            }
            Ok(Err(err)) => {
                warn!(error = %err, "Keeping previous targets; configuration could not be reloaded");
                self.state.lock().targets.clone()
            }
            Err(err) => {
                warn!(error = %err, "Configuration reload task failed");
                self.state.lock().targets.clone()
            }
        }
    }
}

#[cfg(test)]
#[path = "sources_tests.rs"]
mod tests;
