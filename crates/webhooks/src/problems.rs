//! Per-repository reconciliation problems and the operator ignore list.
//!
//! [`ProblemMonitor`] keeps the latest reconciliation failure for each
//! repository until a later success (or a ping) resolves it. Operators can
//! put a repository on the ignore list, which:
//!
//! - resolves any current problem for it,
//! - makes future [`ProblemMonitor::register_problem`] calls for it no-ops, and
//! - tells the webhook manager to skip remote mutations for it.
//!
//! Problems live for the process lifetime only. The ignore list is persisted
//! through an [`IgnoreListStore`] and survives restarts.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::PersistenceError;
use crate::identifiers::RepositoryIdentity;
use crate::ports::IgnoreListStore;
use crate::types::Timestamp;

/// A reconciliation failure recorded for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProblemRecord {
    /// Repository the failure happened on.
    pub repository: RepositoryIdentity,
    /// Human-readable cause.
    pub message: String,
    /// When the failure was recorded.
    pub timestamp: Timestamp,
}

/// Tracks reconciliation problems and the persisted ignore list.
///
/// The problem map is a concurrent map safe to use from many reconciliation
/// tasks at once. Ignore-list reads are cheap snapshots; writes are
/// serialised behind a lock held across persistence.
pub struct ProblemMonitor {
    problems: DashMap<RepositoryIdentity, ProblemRecord>,
    ignored: RwLock<Arc<BTreeSet<RepositoryIdentity>>>,
    write_lock: Mutex<()>,
    store: Arc<dyn IgnoreListStore>,
}

impl ProblemMonitor {
    /// Creates a monitor, loading the ignore list from `store`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the persisted list cannot be read.
    pub fn new(store: Arc<dyn IgnoreListStore>) -> Result<Self, PersistenceError> {
        let ignored: BTreeSet<RepositoryIdentity> = store.load()?.into_iter().collect();
        Ok(Self {
            problems: DashMap::new(),
            ignored: RwLock::new(Arc::new(ignored)),
            write_lock: Mutex::new(()),
            store,
        })
    }

    /// Records `cause` as the current problem for `repo`.
    ///
    /// Does nothing if `repo` is ignored. Replaces any earlier problem.
    pub fn register_problem(&self, repo: &RepositoryIdentity, cause: impl Display) {
        if self.is_ignored(repo) {
            return;
        }
        let message = cause.to_string();
        warn!(repository = %repo, problem = %message, "Recorded hook registration problem");
        self.problems.insert(
            repo.clone(),
            ProblemRecord {
                repository: repo.clone(),
                message,
                timestamp: Timestamp::now(),
            },
        );
    }

    /// Clears the problem for `repo`, if any.
    pub fn resolve_problem(&self, repo: &RepositoryIdentity) {
        if self.problems.remove(repo).is_some() {
            info!(repository = %repo, "Resolved hook registration problem");
        }
    }

    /// Returns `true` if a problem is recorded for `repo`.
    pub fn is_problem_with(&self, repo: &RepositoryIdentity) -> bool {
        self.problems.contains_key(repo)
    }

    /// Snapshot of all current problems.
    pub fn problems(&self) -> BTreeMap<RepositoryIdentity, ProblemRecord> {
        self.problems
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Returns `true` if `repo` is on the ignore list.
    pub fn is_ignored(&self, repo: &RepositoryIdentity) -> bool {
        self.ignored.read().contains(repo)
    }

    /// Snapshot of the ignore list.
    pub fn ignored(&self) -> Arc<BTreeSet<RepositoryIdentity>> {
        self.ignored.read().clone()
    }

    /// Adds `repo` to the ignore list and resolves its current problem.
    ///
    /// Idempotent: ignoring an ignored repository does not touch the store.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the list cannot be saved; the
    /// in-memory list is then left unchanged.
    pub fn ignore(&self, repo: &RepositoryIdentity) -> Result<(), PersistenceError> {
        self.update_ignored(|set| set.insert(repo.clone()))?;
        self.resolve_problem(repo);
        Ok(())
    }

    /// Removes `repo` from the ignore list. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the list cannot be saved.
    pub fn unignore(&self, repo: &RepositoryIdentity) -> Result<(), PersistenceError> {
        self.update_ignored(|set| set.remove(repo))
    }

    fn update_ignored(
        &self,
        change: impl FnOnce(&mut BTreeSet<RepositoryIdentity>) -> bool,
    ) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock();
        let mut next = BTreeSet::clone(&self.ignored.read());
        if !change(&mut next) {
            return Ok(());
        }
        let list: Vec<RepositoryIdentity> = next.iter().cloned().collect();
        self.store.save(&list)?;
        *self.ignored.write() = Arc::new(next);
        info!(ignored = list.len(), "Updated ignored repositories");
        Ok(())
    }
}

/// An [`IgnoreListStore`] that keeps the list in memory only.
#[derive(Debug, Default)]
pub struct InMemoryIgnoreStore {
    list: Mutex<Vec<RepositoryIdentity>>,
}

impl InMemoryIgnoreStore {
    /// Creates a store pre-populated with `ignored`.
    pub fn with(ignored: Vec<RepositoryIdentity>) -> Self {
        Self {
            list: Mutex::new(ignored),
        }
    }
}

impl IgnoreListStore for InMemoryIgnoreStore {
    fn load(&self) -> Result<Vec<RepositoryIdentity>, PersistenceError> {
        Ok(self.list.lock().clone())
    }

    fn save(&self, ignored: &[RepositoryIdentity]) -> Result<(), PersistenceError> {
        *self.list.lock() = ignored.to_vec();
        Ok(())
    }
}

#[cfg(test)]
#[path = "problems_tests.rs"]
mod tests;
