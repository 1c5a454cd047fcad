//! Converges remote hooks with what local subscribers need.
//!
//! [`WebhookManager`] owns one managed callback URL. For each repository of a
//! target it:
//!
//! 1. computes the desired events from the [`SubscriberRegistry`],
//! 2. finds a server whose credential has admin rights on the repository,
//! 3. re-fetches the repository's hooks and picks out the ones delivering to
//!    our callback URL,
//! 4. stops if exactly one such hook already covers the desired events, and
//! 5. otherwise replaces them all with a single hook subscribed to the union
//!    of what they had and what is desired.
//!
//! The cleanup path removes hooks for repositories nobody wants any more, and
//! always retires the legacy service-hook kind.
//!
//! Failures are recorded in the [`ProblemMonitor`] against the repository and
//! are never retried here. Ignored repositories are never mutated.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use webhooks::{
    CallbackUrl, CreateHookRequest, EventType, HookApi, HookApiError, HookId, HookKind,
    HookSecretConfig, ProblemMonitor, RemoteHook, RepositoryIdentity, SecretSource,
    SubscriberRegistry, Target,
};

// ============================================================================
// ManagedServer
// ============================================================================

/// One configured server and the API client bound to its credential.
#[derive(Clone)]
pub struct ManagedServer {
    name: String,
    host: String,
    manage_hooks: bool,
    api: Arc<dyn HookApi>,
}

impl ManagedServer {
    /// Creates a server entry covering repositories on `host`.
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        manage_hooks: bool,
        api: Arc<dyn HookApi>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into().to_ascii_lowercase(),
            manage_hooks,
            api,
        }
    }

    /// Configuration name, for logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if this server hosts `repo`.
    pub fn serves(&self, repo: &RepositoryIdentity) -> bool {
        self.host == repo.host()
    }

    /// Whether the operator allowed hook management on this server.
    pub fn manages_hooks(&self) -> bool {
        self.manage_hooks
    }
}

impl std::fmt::Debug for ManagedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedServer")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("manage_hooks", &self.manage_hooks)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// What the register path did for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Exactly one managed hook already covered the desired events.
    AlreadyRegistered,
    /// Managed hooks were replaced by a single new hook.
    Registered {
        /// Id of the created hook.
        hook: HookId,
        /// Events it subscribes to.
        events: BTreeSet<EventType>,
        /// How many old managed hooks were deleted.
        replaced: usize,
    },
    /// No configured server has admin rights on the repository.
    NoAdminAccess,
    /// The repository is on the ignore list.
    Ignored,
    /// A remote call failed; the error was recorded as a problem.
    Failed(HookApiError),
}

/// What the cleanup path did for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Hooks were deleted (possibly none matched).
    Cleaned {
        /// Ids of the deleted hooks.
        deleted: Vec<HookId>,
    },
    /// No configured server has admin rights on the repository.
    NoAdminAccess,
    /// The repository is on the ignore list.
    Ignored,
    /// A remote call failed; the error was recorded as a problem.
    Failed(HookApiError),
}

/// Per-repository outcomes of one reconciliation.
pub type ReconcileReport = Vec<(RepositoryIdentity, RegisterOutcome)>;

/// Per-repository outcomes of one cleanup.
pub type CleanupReport = Vec<(RepositoryIdentity, CleanupOutcome)>;

// ============================================================================
// WebhookManager
// ============================================================================

/// Reconciles hooks delivering to one managed callback URL.
pub struct WebhookManager {
    callback: CallbackUrl,
    servers: Vec<ManagedServer>,
    registry: Arc<SubscriberRegistry>,
    problems: Arc<ProblemMonitor>,
    secrets: Arc<dyn SecretSource>,
    global_secret: Option<HookSecretConfig>,
}

impl WebhookManager {
    /// Creates a manager for `callback`.
    ///
    /// `servers` are tried in order when resolving a repository; the first
    /// one with admin rights wins.
    pub fn new(
        callback: CallbackUrl,
        servers: Vec<ManagedServer>,
        registry: Arc<SubscriberRegistry>,
        problems: Arc<ProblemMonitor>,
        secrets: Arc<dyn SecretSource>,
    ) -> Self {
        Self {
            callback,
            servers,
            registry,
            problems,
            secrets,
            global_secret: None,
        }
    }

    /// Sets the global secret attached to created hooks.
    pub fn with_global_secret(mut self, secret: Option<HookSecretConfig>) -> Self {
        self.global_secret = secret;
        self
    }

    /// The callback URL whose hooks this manager owns.
    pub fn callback(&self) -> &CallbackUrl {
        &self.callback
    }

    /// Registry the desired events are computed from.
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Register path: make every repository of `target` deliver the events
    /// its subscribers need.
    ///
    /// Does nothing when no subscriber is applicable to `target`.
    #[instrument(skip(self, target), fields(target = %target.name))]
    pub async fn reconcile(&self, target: &Target) -> ReconcileReport {
        let desired = self.registry.desired_events(target);
        if desired.is_empty() {
            debug!("No subscriber needs hooks for this target");
            return Vec::new();
        }

        let secret = self.hook_secret(target);
        let mut report = Vec::with_capacity(target.repositories.len());
        for repo in &target.repositories {
            let outcome = if self.problems.is_ignored(repo) {
                debug!(repository = %repo, "Skipping ignored repository");
                RegisterOutcome::Ignored
            } else {
                match self.register_repo(repo, &desired, secret.as_deref()).await {
                    Ok(outcome) => {
                        if !matches!(outcome, RegisterOutcome::NoAdminAccess) {
                            self.problems.resolve_problem(repo);
                        }
                        outcome
                    }
                    Err(err) => {
                        self.problems.register_problem(repo, &err);
                        RegisterOutcome::Failed(err)
                    }
                }
            };
            report.push((repo.clone(), outcome));
        }
        report
    }

    /// Cleanup path: remove our hooks from the repositories of `target`.
    ///
    /// For a repository still referenced by some target in `alive`, only the
    /// legacy service hook is removed; otherwise both kinds delivering to the
    /// callback URL are. Errors are recorded, never returned.
    #[instrument(skip(self, target, alive), fields(target = %target.name, alive = alive.len()))]
    pub async fn cleanup(&self, target: &Target, alive: &[Target]) -> CleanupReport {
        let mut report = Vec::with_capacity(target.repositories.len());
        for repo in &target.repositories {
            let outcome = if self.problems.is_ignored(repo) {
                debug!(repository = %repo, "Skipping ignored repository");
                CleanupOutcome::Ignored
            } else {
                let still_wanted = alive.iter().any(|t| t.references(repo));
                match self.cleanup_repo(repo, still_wanted).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        self.problems.register_problem(repo, &err);
                        CleanupOutcome::Failed(err)
                    }
                }
            };
            report.push((repo.clone(), outcome));
        }
        report
    }

    async fn register_repo(
        &self,
        repo: &RepositoryIdentity,
        desired: &BTreeSet<EventType>,
        secret: Option<&str>,
    ) -> Result<RegisterOutcome, HookApiError> {
        let Some(server) = self.admin_server(repo).await? else {
            debug!(repository = %repo, "No server with admin rights; skipping hook registration");
            return Ok(RegisterOutcome::NoAdminAccess);
        };

        let hooks = server.api.list_hooks(repo).await?;
        let managed: Vec<&RemoteHook> = hooks
            .iter()
            .filter(|hook| hook.is(HookKind::ManagedWebhook, &self.callback))
            .collect();
        let registered: BTreeSet<EventType> = managed
            .iter()
            .flat_map(|hook| hook.events.iter().cloned())
            .collect();

        if managed.len() == 1 && registered.is_superset(desired) {
            debug!(repository = %repo, hook = %managed[0].id, "Hook already subscribed to desired events");
            return Ok(RegisterOutcome::AlreadyRegistered);
        }

        let merged: BTreeSet<EventType> = registered.union(desired).cloned().collect();
        for hook in &managed {
            server.api.delete_hook(repo, hook.id).await?;
            debug!(repository = %repo, hook = %hook.id, "Deleted superseded hook");
        }

        let request = CreateHookRequest::webhook(&self.callback, merged.clone(), secret);
        let created = server.api.create_hook(repo, &request).await?;
        info!(
            repository = %repo,
            server = server.name(),
            hook = %created.id,
            events = ?merged,
            replaced = managed.len(),
            "Registered webhook"
        );
        Ok(RegisterOutcome::Registered {
            hook: created.id,
            events: merged,
            replaced: managed.len(),
        })
    }

    async fn cleanup_repo(
        &self,
        repo: &RepositoryIdentity,
        still_wanted: bool,
    ) -> Result<CleanupOutcome, HookApiError> {
        let Some(server) = self.admin_server(repo).await? else {
            debug!(repository = %repo, "No server with admin rights; skipping hook cleanup");
            return Ok(CleanupOutcome::NoAdminAccess);
        };

        let hooks = server.api.list_hooks(repo).await?;
        let doomed: Vec<HookId> = hooks
            .iter()
            .filter(|hook| {
                hook.is(HookKind::LegacyServiceHook, &self.callback)
                    || (!still_wanted && hook.is(HookKind::ManagedWebhook, &self.callback))
            })
            .map(|hook| hook.id)
            .collect();

        for id in &doomed {
            server.api.delete_hook(repo, *id).await?;
        }
        if !doomed.is_empty() {
            info!(
                repository = %repo,
                server = server.name(),
                deleted = doomed.len(),
                still_wanted,
                "Removed hooks"
            );
        }
        Ok(CleanupOutcome::Cleaned { deleted: doomed })
    }

    /// First server allowed to manage hooks whose credential is admin on `repo`.
    ///
    /// A server whose lookup fails is skipped. The first such error is
    /// returned only when no later server qualifies.
    async fn admin_server(
        &self,
        repo: &RepositoryIdentity,
    ) -> Result<Option<&ManagedServer>, HookApiError> {
        let mut first_error = None;
        for server in self
            .servers
            .iter()
            .filter(|s| s.manages_hooks() && s.serves(repo))
        {
            match server.api.repository(repo).await {
                Ok(Some(remote)) if remote.admin => return Ok(Some(server)),
                Ok(Some(_)) => {
                    debug!(repository = %repo, server = server.name(), "Credential lacks admin rights")
                }
                Ok(None) => debug!(repository = %repo, server = server.name(), "Repository not visible"),
                Err(err) => {
                    warn!(repository = %repo, server = server.name(), error = %err, "Repository lookup failed; trying next server");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    fn hook_secret(&self, target: &Target) -> Option<String> {
        let config = webhooks::select_secret(target.secret.as_ref(), self.global_secret.as_ref())?;
        let secret = self.secrets.secret(&config.credential);
        if secret.is_none() {
            warn!(
                credential = %config.credential,
                "Hook secret is configured but not set; creating unsigned hooks"
            );
        }
        secret
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
