//! Schedules reconciliation work for a changing catalogue of targets.
//!
//! [`HookRegistrationService`] owns the [`SerialQueue`] for one managed
//! callback URL. Every register or cleanup pass goes through that queue, so
//! at most one pass mutates remote state at a time and passes run in the
//! order their triggering changes were applied.
//!
//! The service remembers the last catalogue it applied. Applying a new one
//! reconciles targets that are new or whose desired events changed, and
//! cleans up targets (or individual repositories) that dropped out.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use webhooks::{EventType, RepositoryIdentity, Target, TargetName, TargetSource};

use crate::queue::{QueueError, SerialQueue, TaskHandle};
use crate::reconciler::{CleanupReport, ReconcileReport, WebhookManager};

#[derive(Debug, Clone, PartialEq, Eq)]
struct AppliedTarget {
    target: Target,
    events: BTreeSet<EventType>,
}

type Pending = Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send>>;

/// Work scheduled by one [`HookRegistrationService::apply_targets`] call.
#[derive(Default)]
pub struct AppliedChanges {
    /// Targets queued for the register path.
    pub reconciled: Vec<TargetName>,
    /// Targets queued for the cleanup path.
    pub cleaned_up: Vec<TargetName>,
    pending: Vec<Pending>,
}

impl fmt::Debug for AppliedChanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppliedChanges")
            .field("reconciled", &self.reconciled)
            .field("cleaned_up", &self.cleaned_up)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl AppliedChanges {
    /// Returns `true` if nothing was queued.
    pub fn is_empty(&self) -> bool {
        self.reconciled.is_empty() && self.cleaned_up.is_empty()
    }

    /// Waits until every queued pass has run.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Abandoned`] if any pass did not complete.
    pub async fn finished(self) -> Result<(), QueueError> {
        for pending in self.pending {
            pending.await?;
        }
        Ok(())
    }
}

/// Serialises register and cleanup passes for one managed callback URL.
pub struct HookRegistrationService {
    manager: Arc<WebhookManager>,
    queue: SerialQueue,
    applied: Mutex<BTreeMap<TargetName, AppliedTarget>>,
}

impl HookRegistrationService {
    /// Creates the service and starts its queue worker.
    pub fn new(manager: Arc<WebhookManager>, queue_capacity: usize) -> Self {
        Self {
            manager,
            queue: SerialQueue::start(queue_capacity),
            applied: Mutex::new(BTreeMap::new()),
        }
    }

    /// Queues the register path for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the queue refuses the job.
    pub fn register(&self, target: Target) -> Result<TaskHandle<ReconcileReport>, QueueError> {
        let manager = self.manager.clone();
        self.queue
            .submit(async move { manager.reconcile(&target).await })
    }

    /// Queues the cleanup path for `target`, keeping hooks `alive` targets still need.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the queue refuses the job.
    pub fn unregister(
        &self,
        target: Target,
        alive: Vec<Target>,
    ) -> Result<TaskHandle<CleanupReport>, QueueError> {
        let manager = self.manager.clone();
        self.queue
            .submit(async move { manager.cleanup(&target, &alive).await })
    }

    /// Applies a new target catalogue, queueing the passes needed to converge.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if a pass could not be queued. Passes queued
    /// before the failure still run, and the catalogue is not recorded, so
    /// the next call retries the whole diff.
    #[instrument(skip(self, targets), fields(targets = targets.len()))]
    pub fn apply_targets(&self, targets: Vec<Target>) -> Result<AppliedChanges, QueueError> {
        let registry = self.manager.registry();
        let next: BTreeMap<TargetName, AppliedTarget> = targets
            .into_iter()
            .map(|target| {
                let events = registry.desired_events(&target);
                (target.name.clone(), AppliedTarget { target, events })
            })
            .collect();
        let alive: Vec<Target> = next
            .values()
            .filter(|a| !a.events.is_empty())
            .map(|a| a.target.clone())
            .collect();

        let mut applied = self.applied.lock();
        let mut changes = AppliedChanges::default();

        for (name, current) in &next {
            let previous = applied.get(name).filter(|p| !p.events.is_empty());
            if current.events.is_empty() {
                if let Some(previous) = previous {
                    self.queue_cleanup(&mut changes, previous.target.clone(), &alive)?;
                }
                continue;
            }
            if previous == Some(current) {
                continue;
            }
            if let Some(previous) = previous {
                let dropped: Vec<RepositoryIdentity> = previous
                    .target
                    .repositories
                    .iter()
                    .filter(|repo| !current.target.references(repo))
                    .cloned()
                    .collect();
                if !dropped.is_empty() {
                    let mut gone = previous.target.clone();
                    gone.repositories = dropped;
                    self.queue_cleanup(&mut changes, gone, &alive)?;
                }
            }
            let handle = self.register(current.target.clone())?;
            changes.pending.push(discard(handle));
            changes.reconciled.push(name.clone());
        }

        for (name, previous) in applied.iter() {
            if !next.contains_key(name) && !previous.events.is_empty() {
                self.queue_cleanup(&mut changes, previous.target.clone(), &alive)?;
            }
        }

        *applied = next;
        if !changes.is_empty() {
            info!(
                reconciled = changes.reconciled.len(),
                cleaned_up = changes.cleaned_up.len(),
                "Queued hook changes"
            );
        }
        Ok(changes)
    }

    /// Queues the register path for every applied target that wants events.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if a pass could not be queued.
    pub fn reregister_all(&self) -> Result<Vec<TaskHandle<ReconcileReport>>, QueueError> {
        let targets: Vec<Target> = self
            .applied
            .lock()
            .values()
            .filter(|a| !a.events.is_empty())
            .map(|a| a.target.clone())
            .collect();
        info!(targets = targets.len(), "Re-registering hooks for all targets");
        targets
            .into_iter()
            .map(|target| self.register(target))
            .collect()
    }

    /// Re-reads `source` every `interval` and applies the result.
    ///
    /// The first pass runs immediately.
    pub fn spawn_sweep(
        self: Arc<Self>,
        source: Arc<dyn TargetSource>,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let targets = source.targets().await;
                debug!(targets = targets.len(), "Target sweep");
                match self.apply_targets(targets) {
                    Ok(_) => {}
                    Err(QueueError::Closed) => {
                        error!("Work queue closed; stopping target sweep");
                        break;
                    }
                    Err(err) => warn!(error = %err, "Target sweep could not queue all changes"),
                }
            }
        })
    }

    /// Stops accepting work and waits for queued passes to finish.
    pub async fn shutdown(self) {
        self.queue.shutdown().await;
    }

    fn queue_cleanup(
        &self,
        changes: &mut AppliedChanges,
        target: Target,
        alive: &[Target],
    ) -> Result<(), QueueError> {
        let name = target.name.clone();
        let handle = self.unregister(target, alive.to_vec())?;
        changes.pending.push(discard(handle));
        changes.cleaned_up.push(name);
        Ok(())
    }
}

/// Erases a handle's output type so handles of different passes can be collected.
fn discard<T: Send + 'static>(handle: TaskHandle<T>) -> Pending {
    Box::pin(async move { handle.wait().await.map(|_| ()) })
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
