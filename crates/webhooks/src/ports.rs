//! Port traits implemented by infrastructure crates.
//!
//! The domain defines *what* it needs from the outside world; the `github`,
//! `manager` and `cli` crates define *how* to supply it.

use async_trait::async_trait;

use crate::errors::{HookApiError, PersistenceError};
use crate::identifiers::{CredentialRef, HookId, RepositoryIdentity};
use crate::types::{CreateHookRequest, RemoteHook, RemoteRepository, Target};

/// The remote hook API of one server configuration.
///
/// The remote state has no transactions and no compare-and-swap, so callers
/// always re-fetch with [`HookApi::list_hooks`] before mutating.
#[async_trait]
pub trait HookApi: Send + Sync {
    /// Looks up `repo` under this server's credential.
    ///
    /// Returns `Ok(None)` if the repository is not reachable with it.
    async fn repository(
        &self,
        repo: &RepositoryIdentity,
    ) -> Result<Option<RemoteRepository>, HookApiError>;

    /// Lists every hook on `repo`, following pagination.
    async fn list_hooks(&self, repo: &RepositoryIdentity) -> Result<Vec<RemoteHook>, HookApiError>;

    /// Creates a hook on `repo`.
    async fn create_hook(
        &self,
        repo: &RepositoryIdentity,
        request: &CreateHookRequest,
    ) -> Result<RemoteHook, HookApiError>;

    /// Deletes hook `id` from `repo`.
    async fn delete_hook(&self, repo: &RepositoryIdentity, id: HookId) -> Result<(), HookApiError>;
}

/// Durable storage for the operator ignore list.
pub trait IgnoreListStore: Send + Sync {
    /// Loads the persisted list; an absent record is an empty list.
    fn load(&self) -> Result<Vec<RepositoryIdentity>, PersistenceError>;

    /// Replaces the persisted list.
    fn save(&self, ignored: &[RepositoryIdentity]) -> Result<(), PersistenceError>;
}

/// Supplies the current catalogue of targets.
#[async_trait]
pub trait TargetSource: Send + Sync {
    /// Returns every currently configured target.
    async fn targets(&self) -> Vec<Target>;
}

/// Resolves credential references to secret values.
pub trait SecretSource: Send + Sync {
    /// Returns the secret behind `credential`, or `None` if it is not set.
    fn secret(&self, credential: &CredentialRef) -> Option<String>;
}
