//! In-memory [`HookApi`] and helpers shared by the manager's unit tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use webhooks::{
    CallbackUrl, CreateHookRequest, DeliveryEvent, EventSubscriber, EventType, HookApi,
    HookApiError, HookId, InMemoryIgnoreStore, ProblemMonitor, RemoteHook, RemoteRepository,
    RepositoryIdentity, SecretSource, SubscriberError, Target, TargetName, CredentialRef,
};

pub const CALLBACK: &str = "https://ci.example.com/github-webhook/";

pub fn callback() -> CallbackUrl {
    CallbackUrl::new(CALLBACK).unwrap()
}

pub fn repo(path: &str) -> RepositoryIdentity {
    RepositoryIdentity::parse(&format!("https://github.com/{path}")).unwrap()
}

pub fn target(name: &str, repos: &[&str]) -> Target {
    Target::new(
        TargetName::new(name).unwrap(),
        repos.iter().map(|r| repo(r)).collect(),
    )
}

pub fn monitor() -> Arc<ProblemMonitor> {
    Arc::new(ProblemMonitor::new(Arc::new(InMemoryIgnoreStore::default())).unwrap())
}

pub fn web_hook(id: u64, url: &str, events: &[EventType]) -> RemoteHook {
    RemoteHook {
        id: HookId::new(id),
        name: "web".to_string(),
        config: BTreeMap::from([("url".to_string(), json!(url))]),
        events: events.iter().cloned().collect(),
        active: true,
    }
}

pub fn legacy_hook(id: u64, url: &str) -> RemoteHook {
    RemoteHook {
        id: HookId::new(id),
        name: "jenkins".to_string(),
        config: BTreeMap::from([("jenkins_hook_url".to_string(), json!(url))]),
        events: BTreeSet::from([EventType::Push]),
        active: true,
    }
}

/// A remote call observed by [`FakeHookApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Repository(String),
    List(String),
    Create(String, BTreeSet<EventType>),
    Delete(String, u64),
}

/// Hook API backed by a map, recording every call.
#[derive(Default)]
pub struct FakeHookApi {
    hooks: Mutex<HashMap<RepositoryIdentity, Vec<RemoteHook>>>,
    admin: Mutex<HashSet<RepositoryIdentity>>,
    visible: Mutex<HashSet<RepositoryIdentity>>,
    calls: Mutex<Vec<Call>>,
    secrets: Mutex<Vec<Option<String>>>,
    fail_list: Mutex<Option<HookApiError>>,
    fail_lookup: Mutex<Option<HookApiError>>,
    next_id: AtomicU64,
}

impl FakeHookApi {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1000),
            ..Self::default()
        }
    }

    /// Makes `repo` visible with admin rights and the given hooks.
    pub fn with_repo(self, repo: &RepositoryIdentity, hooks: Vec<RemoteHook>) -> Self {
        self.visible.lock().insert(repo.clone());
        self.admin.lock().insert(repo.clone());
        self.hooks.lock().insert(repo.clone(), hooks);
        self
    }

    /// Makes `repo` visible without admin rights.
    pub fn with_readonly_repo(self, repo: &RepositoryIdentity) -> Self {
        self.visible.lock().insert(repo.clone());
        self
    }

    pub fn failing_list(self, error: HookApiError) -> Self {
        *self.fail_list.lock() = Some(error);
        self
    }

    pub fn failing_lookup(self, error: HookApiError) -> Self {
        *self.fail_lookup.lock() = Some(error);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Create(..) | Call::Delete(..)))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn hooks(&self, repo: &RepositoryIdentity) -> Vec<RemoteHook> {
        self.hooks.lock().get(repo).cloned().unwrap_or_default()
    }

    pub fn created_secrets(&self) -> Vec<Option<String>> {
        self.secrets.lock().clone()
    }
}

#[async_trait]
impl HookApi for FakeHookApi {
    async fn repository(
        &self,
        repo: &RepositoryIdentity,
    ) -> Result<Option<RemoteRepository>, HookApiError> {
        self.calls.lock().push(Call::Repository(repo.full_name()));
        if let Some(error) = self.fail_lookup.lock().clone() {
            return Err(error);
        }
        if !self.visible.lock().contains(repo) {
            return Ok(None);
        }
        Ok(Some(RemoteRepository {
            identity: repo.clone(),
            admin: self.admin.lock().contains(repo),
        }))
    }

    async fn list_hooks(&self, repo: &RepositoryIdentity) -> Result<Vec<RemoteHook>, HookApiError> {
        self.calls.lock().push(Call::List(repo.full_name()));
        if let Some(error) = self.fail_list.lock().clone() {
            return Err(error);
        }
        Ok(self.hooks(repo))
    }

    async fn create_hook(
        &self,
        repo: &RepositoryIdentity,
        request: &CreateHookRequest,
    ) -> Result<RemoteHook, HookApiError> {
        self.calls
            .lock()
            .push(Call::Create(repo.full_name(), request.events.clone()));
        self.secrets.lock().push(request.config.get("secret").cloned());
        let hook = RemoteHook {
            id: HookId::new(self.next_id.fetch_add(1, Ordering::SeqCst)),
            name: request.name.clone(),
            config: request
                .config
                .iter()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect(),
            events: request.events.clone(),
            active: request.active,
        };
        self.hooks
            .lock()
            .entry(repo.clone())
            .or_default()
            .push(hook.clone());
        Ok(hook)
    }

    async fn delete_hook(&self, repo: &RepositoryIdentity, id: HookId) -> Result<(), HookApiError> {
        self.calls
            .lock()
            .push(Call::Delete(repo.full_name(), id.as_u64()));
        let mut hooks = self.hooks.lock();
        let list = hooks.entry(repo.clone()).or_default();
        let before = list.len();
        list.retain(|h| h.id != id);
        if list.len() == before {
            return Err(HookApiError::NotFound {
                resource: format!("hook {id}"),
            });
        }
        Ok(())
    }
}

/// Subscriber interested in fixed events on one named target.
pub struct StaticSubscriber {
    name: String,
    target: String,
    events: BTreeSet<EventType>,
}

impl StaticSubscriber {
    pub fn new(name: &str, target: &str, events: &[EventType]) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            events: events.iter().cloned().collect(),
        }
    }
}

#[async_trait]
impl EventSubscriber for StaticSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_applicable(&self, target: &Target) -> bool {
        target.name.as_str() == self.target
    }

    fn events(&self) -> BTreeSet<EventType> {
        self.events.clone()
    }

    async fn on_event(&self, _event: &DeliveryEvent) -> Result<(), SubscriberError> {
        Ok(())
    }
}

/// Secret source backed by a map.
#[derive(Default)]
pub struct MapSecrets(pub HashMap<String, String>);

impl SecretSource for MapSecrets {
    fn secret(&self, credential: &CredentialRef) -> Option<String> {
        self.0.get(credential.as_str()).cloned()
    }
}
