//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use github::{web_host, GithubHookClient};
use listener::{spawn_duplicate_sweeper, WebhookReceiver};
use manager::{
    HookRegistrationService, JsonFileIgnoreStore, ManagedServer, RegisterOutcome, WebhookManager,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use webhooks::{
    DuplicateDetector, DuplicateEventsSubscriber, PingSubscriber, ProblemMonitor,
    RepositoryIdentity, SecretSource, SubscriberRegistry, TargetSource,
};

use crate::config::{self, Settings};
use crate::sources::{ConfigTargetSource, EnvSecretSource};
use crate::triggers::spawn_trigger_log;

/// Everything `serve` and `reregister` share.
struct Components {
    settings: Settings,
    registry: Arc<SubscriberRegistry>,
    secrets: Arc<dyn SecretSource>,
    detector: Arc<DuplicateDetector>,
    targets: Arc<ConfigTargetSource>,
    service: Arc<HookRegistrationService>,
    trigger_log: JoinHandle<()>,
}

fn problem_monitor(settings: &Settings) -> anyhow::Result<Arc<ProblemMonitor>> {
    let store = JsonFileIgnoreStore::in_dir(&settings.state_dir);
    let path = store.path().to_path_buf();
    let monitor = ProblemMonitor::new(Arc::new(store))
        .with_context(|| format!("loading ignore list from {}", path.display()))?;
    Ok(Arc::new(monitor))
}

fn managed_servers(
    settings: &Settings,
    secrets: &dyn SecretSource,
) -> anyhow::Result<Vec<ManagedServer>> {
    settings
        .servers
        .iter()
        .map(|server| {
            let token = server.credential.as_ref().and_then(|credential| {
                let token = secrets.secret(credential);
                if token.is_none() {
                    warn!(server = %server.name, credential = %credential, "Server credential is not set; calls will be anonymous");
                }
                token
            });
            let Some(host) = web_host(&server.api_url) else {
                bail!("server '{}' api_url has no host", server.name);
            };
            let client = GithubHookClient::new(server.api_url.as_str(), token)
                .with_context(|| format!("creating client for server '{}'", server.name))?;
            if !server.manage_hooks {
                info!(server = %server.name, "Hook management disabled for server");
            }
            Ok(ManagedServer::new(
                server.name.as_str(),
                host,
                server.manage_hooks,
                Arc::new(client),
            ))
        })
        .collect()
}

fn build(path: &Path) -> anyhow::Result<Components> {
    let settings = config::load(path)?;
    let problems = problem_monitor(&settings)?;

    let registry = Arc::new(SubscriberRegistry::new());
    let detector = Arc::new(DuplicateDetector::new(settings.duplicate_ttl));
    registry.register(Arc::new(PingSubscriber::new(problems.clone())));
    registry.register(Arc::new(DuplicateEventsSubscriber::new(detector.clone())));

    let (trigger_tx, trigger_rx) = mpsc::channel(settings.queue_capacity);
    let trigger_log = spawn_trigger_log(trigger_rx);
    let targets = Arc::new(ConfigTargetSource::new(path, registry.clone(), trigger_tx));
    targets.apply(settings.targets.clone());

    let secrets: Arc<dyn SecretSource> = Arc::new(EnvSecretSource);
    let servers = managed_servers(&settings, secrets.as_ref())?;
    let manager = WebhookManager::new(
        settings.callback.clone(),
        servers,
        registry.clone(),
        problems,
        secrets.clone(),
    )
    .with_global_secret(settings.global_secret.clone());
    let service = Arc::new(HookRegistrationService::new(
        Arc::new(manager),
        settings.queue_capacity,
    ));

    Ok(Components {
        settings,
        registry,
        secrets,
        detector,
        targets,
        service,
        trigger_log,
    })
}

/// Runs the delivery endpoint until Ctrl-C.
pub async fn serve(path: &Path) -> anyhow::Result<()> {
    let components = build(path)?;
    let settings = &components.settings;

    if !settings.has_any_secret() {
        warn!("No webhook secret configured; deliveries will not be authenticated");
    }

    let mut receiver = WebhookReceiver::new(components.registry.clone(), components.secrets.clone())
        .with_global_secret(settings.global_secret.clone());
    for target in &settings.targets {
        receiver = receiver.with_target(target.target.name.clone(), target.target.secret.clone());
    }
    if let Some(id) = settings.instance_id {
        receiver = receiver.with_instance_id(id);
    }
    info!(
        instance_id = %receiver.instance_id(),
        callback = %settings.callback,
        targets = settings.targets.len(),
        "Starting hooksync"
    );

    let source: Arc<dyn TargetSource> = components.targets.clone();
    let sweep = components
        .service
        .clone()
        .spawn_sweep(source, settings.sweep_interval);
    let duplicate_sweeper = spawn_duplicate_sweeper(components.detector.clone());

    let socket = TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("binding {}", settings.listen))?;
    let served = listener::serve(socket, Arc::new(receiver), shutdown_signal()).await;

    info!("Shutting down");
    duplicate_sweeper.abort();
    sweep.abort();
    // The sweep holds a service reference until it has actually stopped.
    let _ = sweep.await;
    drain(components.service).await;
    components.trigger_log.abort();

    served.context("delivery endpoint failed")
}

/// Drains the work queue if this is the last reference to the service.
///
/// Returns `false`, after logging, when another holder keeps it alive and
/// queued passes are abandoned.
async fn drain(service: Arc<HookRegistrationService>) -> bool {
    match Arc::try_unwrap(service) {
        Ok(service) => {
            service.shutdown().await;
            true
        }
        Err(service) => {
            warn!(
                holders = Arc::strong_count(&service),
                "Work queue still shared at exit; queued passes were not drained"
            );
            false
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Could not listen for Ctrl-C; stopping");
    }
}

/// Registers hooks for every configured target and reports the outcome.
pub async fn reregister(path: &Path) -> anyhow::Result<()> {
    let components = build(path)?;
    let targets = components.targets.targets().await;

    let mut handles = Vec::with_capacity(targets.len());
    for target in targets {
        let name = target.name.clone();
        handles.push((name, components.service.register(target)?));
    }

    let mut failures = 0usize;
    for (name, handle) in handles {
        for (repo, outcome) in handle.wait().await? {
            if matches!(outcome, RegisterOutcome::Failed(_)) {
                failures += 1;
            }
            println!("{name}\t{repo}\t{}", describe(&outcome));
        }
    }

    drain(components.service).await;
    components.trigger_log.abort();
    if failures > 0 {
        bail!("{failures} repositories could not be registered");
    }
    Ok(())
}

fn describe(outcome: &RegisterOutcome) -> String {
    match outcome {
        RegisterOutcome::AlreadyRegistered => "up to date".to_string(),
        RegisterOutcome::Registered {
            hook,
            events,
            replaced,
        } => {
            let events: Vec<&str> = events.iter().map(|e| e.as_str()).collect();
            format!(
                "registered hook {hook} ({}), replaced {replaced}",
                events.join(",")
            )
        }
        RegisterOutcome::NoAdminAccess => "skipped: no admin access".to_string(),
        RegisterOutcome::Ignored => "skipped: ignored".to_string(),
        RegisterOutcome::Failed(err) => format!("failed: {err}"),
    }
}

fn parse_repository(url: &str) -> anyhow::Result<RepositoryIdentity> {
    RepositoryIdentity::parse(url).with_context(|| format!("'{url}' is not a repository URL"))
}

/// Adds a repository to the persisted ignore list.
///
/// A running `serve` process picks the change up on restart.
pub fn ignore(path: &Path, url: &str) -> anyhow::Result<()> {
    let repo = parse_repository(url)?;
    let problems = problem_monitor(&config::load(path)?)?;
    problems.ignore(&repo)?;
    println!("ignoring {repo}");
    Ok(())
}

/// Removes a repository from the persisted ignore list.
pub fn unignore(path: &Path, url: &str) -> anyhow::Result<()> {
    let repo = parse_repository(url)?;
    let problems = problem_monitor(&config::load(path)?)?;
    problems.unignore(&repo)?;
    println!("no longer ignoring {repo}");
    Ok(())
}

/// Prints the ignore list.
pub fn ignored(path: &Path) -> anyhow::Result<()> {
    let problems = problem_monitor(&config::load(path)?)?;
    for repo in problems.ignored().iter() {
        println!("{}", repo.html_url());
    }
    Ok(())
}

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;
