use super::*;
use crate::test_support::*;
use std::collections::HashMap;
use webhooks::CredentialRef;

fn manager_with(
    api: Arc<FakeHookApi>,
    registry: Arc<SubscriberRegistry>,
    problems: Arc<ProblemMonitor>,
) -> WebhookManager {
    WebhookManager::new(
        callback(),
        vec![ManagedServer::new("github", "github.com", true, api)],
        registry,
        problems,
        Arc::new(MapSecrets::default()),
    )
}

fn registry_for(target: &str, events: &[EventType]) -> Arc<SubscriberRegistry> {
    let registry = Arc::new(SubscriberRegistry::new());
    registry.register(Arc::new(StaticSubscriber::new("build", target, events)));
    registry
}

#[tokio::test]
async fn test_reconcile_creates_single_hook_when_none_exists() {
    let widgets = repo("acme/widgets");
    let api = Arc::new(FakeHookApi::new().with_repo(&widgets, vec![]));
    let manager = manager_with(api.clone(), registry_for("build", &[EventType::Push]), monitor());

    let report = manager.reconcile(&target("build", &["acme/widgets"])).await;

    assert!(matches!(
        report[0].1,
        RegisterOutcome::Registered { replaced: 0, .. }
    ));
    assert_eq!(
        api.mutations(),
        vec![Call::Create(
            "acme/widgets".to_string(),
            BTreeSet::from([EventType::Push])
        )]
    );
    assert_eq!(api.hooks(&widgets).len(), 1);
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let widgets = repo("acme/widgets");
    let api = Arc::new(FakeHookApi::new().with_repo(&widgets, vec![]));
    let manager = manager_with(api.clone(), registry_for("build", &[EventType::Push]), monitor());
    let build = target("build", &["acme/widgets"]);

    manager.reconcile(&build).await;
    api.clear_calls();
    let report = manager.reconcile(&build).await;

    assert_eq!(report[0].1, RegisterOutcome::AlreadyRegistered);
    assert!(api.mutations().is_empty());
}

#[tokio::test]
async fn test_reconcile_replaces_hook_with_union_of_events() {
    let widgets = repo("acme/widgets");
    let api = Arc::new(FakeHookApi::new().with_repo(
        &widgets,
        vec![web_hook(1, CALLBACK, &[EventType::Push])],
    ));
    let manager = manager_with(
        api.clone(),
        registry_for("build", &[EventType::PullRequest]),
        monitor(),
    );

    let report = manager.reconcile(&target("build", &["acme/widgets"])).await;

    let merged = BTreeSet::from([EventType::Push, EventType::PullRequest]);
    assert_eq!(
        report[0].1,
        RegisterOutcome::Registered {
            hook: HookId::new(1000),
            events: merged.clone(),
            replaced: 1,
        }
    );
    assert_eq!(
        api.mutations(),
        vec![
            Call::Delete("acme/widgets".to_string(), 1),
            Call::Create("acme/widgets".to_string(), merged),
        ]
    );
}

#[tokio::test]
async fn test_reconcile_collapses_multiple_managed_hooks() {
    let widgets = repo("acme/widgets");
    let api = Arc::new(FakeHookApi::new().with_repo(
        &widgets,
        vec![
            web_hook(1, CALLBACK, &[EventType::Push]),
            web_hook(2, CALLBACK, &[EventType::Push]),
        ],
    ));
    let manager = manager_with(api.clone(), registry_for("build", &[EventType::Push]), monitor());

    manager.reconcile(&target("build", &["acme/widgets"])).await;

    let managed: Vec<_> = api
        .hooks(&widgets)
        .into_iter()
        .filter(|h| h.is(HookKind::ManagedWebhook, &callback()))
        .collect();
    assert_eq!(managed.len(), 1);
    assert_eq!(managed[0].events, BTreeSet::from([EventType::Push]));
}

#[tokio::test]
async fn test_reconcile_leaves_foreign_hooks_alone() {
    let widgets = repo("acme/widgets");
    let api = Arc::new(FakeHookApi::new().with_repo(
        &widgets,
        vec![web_hook(5, "https://elsewhere.example.com/", &[EventType::Push])],
    ));
    let manager = manager_with(api.clone(), registry_for("build", &[EventType::Push]), monitor());

    manager.reconcile(&target("build", &["acme/widgets"])).await;

    assert!(api.hooks(&widgets).iter().any(|h| h.id == HookId::new(5)));
    assert!(!api
        .mutations()
        .contains(&Call::Delete("acme/widgets".to_string(), 5)));
}

#[tokio::test]
async fn test_reconcile_without_applicable_subscriber_does_nothing() {
    let widgets = repo("acme/widgets");
    let api = Arc::new(FakeHookApi::new().with_repo(&widgets, vec![]));
    let manager = manager_with(api.clone(), registry_for("other", &[EventType::Push]), monitor());

    let report = manager.reconcile(&target("build", &["acme/widgets"])).await;

    assert!(report.is_empty());
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn test_reconcile_skips_ignored_repository() {
    let widgets = repo("acme/widgets");
    let api = Arc::new(FakeHookApi::new().with_repo(&widgets, vec![]));
    let problems = monitor();
    problems.ignore(&widgets).unwrap();
    let manager = manager_with(api.clone(), registry_for("build", &[EventType::Push]), problems.clone());

    let report = manager.reconcile(&target("build", &["acme/widgets"])).await;

    assert_eq!(report[0].1, RegisterOutcome::Ignored);
    assert!(api.calls().is_empty());
    assert!(!problems.is_problem_with(&widgets));
}

#[tokio::test]
async fn test_reconcile_without_admin_rights_is_silent() {
    let widgets = repo("acme/widgets");
    let api = Arc::new(FakeHookApi::new().with_readonly_repo(&widgets));
    let problems = monitor();
    let manager = manager_with(api.clone(), registry_for("build", &[EventType::Push]), problems.clone());

    let report = manager.reconcile(&target("build", &["acme/widgets"])).await;

    assert_eq!(report[0].1, RegisterOutcome::NoAdminAccess);
    assert!(api.mutations().is_empty());
    assert!(!problems.is_problem_with(&widgets));
}

#[tokio::test]
async fn test_reconcile_failure_is_recorded_and_success_clears_it() {
    let widgets = repo("acme/widgets");
    let failing = Arc::new(
        FakeHookApi::new()
            .with_repo(&widgets, vec![])
            .failing_list(HookApiError::UnexpectedStatus {
                status: 500,
                body: "boom".to_string(),
            }),
    );
    let problems = monitor();
    let registry = registry_for("build", &[EventType::Push]);
    let build = target("build", &["acme/widgets"]);

    let report = manager_with(failing, registry.clone(), problems.clone())
        .reconcile(&build)
        .await;
    assert!(matches!(report[0].1, RegisterOutcome::Failed(_)));
    assert!(problems.is_problem_with(&widgets));
    assert!(problems.problems()[&widgets].message.contains("500"));

    let healthy = Arc::new(FakeHookApi::new().with_repo(&widgets, vec![]));
    manager_with(healthy, registry, problems.clone())
        .reconcile(&build)
        .await;
    assert!(!problems.is_problem_with(&widgets));
}

#[tokio::test]
async fn test_reconcile_uses_first_server_with_admin_rights() {
    let widgets = repo("acme/widgets");
    let readonly = Arc::new(FakeHookApi::new().with_readonly_repo(&widgets));
    let admin = Arc::new(FakeHookApi::new().with_repo(&widgets, vec![]));
    let unmanaged = Arc::new(FakeHookApi::new().with_repo(&widgets, vec![]));
    let manager = WebhookManager::new(
        callback(),
        vec![
            ManagedServer::new("unmanaged", "github.com", false, unmanaged.clone()),
            ManagedServer::new("readonly", "github.com", true, readonly.clone()),
            ManagedServer::new("admin", "github.com", true, admin.clone()),
        ],
        registry_for("build", &[EventType::Push]),
        monitor(),
        Arc::new(MapSecrets::default()),
    );

    manager.reconcile(&target("build", &["acme/widgets"])).await;

    assert!(unmanaged.calls().is_empty());
    assert!(readonly.mutations().is_empty());
    assert_eq!(admin.mutations().len(), 1);
}

fn bad_credentials() -> HookApiError {
    HookApiError::Unauthorized {
        status: 401,
        message: "Bad credentials".to_string(),
    }
}

#[tokio::test]
async fn test_reconcile_skips_server_whose_lookup_fails() {
    let widgets = repo("acme/widgets");
    let stale = Arc::new(FakeHookApi::new().failing_lookup(bad_credentials()));
    let admin = Arc::new(FakeHookApi::new().with_repo(&widgets, vec![]));
    let problems = monitor();
    let manager = WebhookManager::new(
        callback(),
        vec![
            ManagedServer::new("stale", "github.com", true, stale.clone()),
            ManagedServer::new("admin", "github.com", true, admin.clone()),
        ],
        registry_for("build", &[EventType::Push]),
        problems.clone(),
        Arc::new(MapSecrets::default()),
    );

    let report = manager.reconcile(&target("build", &["acme/widgets"])).await;

    assert!(matches!(report[0].1, RegisterOutcome::Registered { .. }));
    assert!(stale.mutations().is_empty());
    assert_eq!(admin.mutations().len(), 1);
    assert!(!problems.is_problem_with(&widgets));
}

#[tokio::test]
async fn test_reconcile_reports_lookup_error_when_no_server_qualifies() {
    let widgets = repo("acme/widgets");
    let stale = Arc::new(FakeHookApi::new().failing_lookup(bad_credentials()));
    let readonly = Arc::new(FakeHookApi::new().with_readonly_repo(&widgets));
    let problems = monitor();
    let manager = WebhookManager::new(
        callback(),
        vec![
            ManagedServer::new("stale", "github.com", true, stale),
            ManagedServer::new("readonly", "github.com", true, readonly),
        ],
        registry_for("build", &[EventType::Push]),
        problems.clone(),
        Arc::new(MapSecrets::default()),
    );

    let report = manager.reconcile(&target("build", &["acme/widgets"])).await;

    assert!(matches!(
        report[0].1,
        RegisterOutcome::Failed(HookApiError::Unauthorized { status: 401, .. })
    ));
    assert!(problems.problems()[&widgets].message.contains("Bad credentials"));
}

#[tokio::test]
async fn test_reconcile_ignores_servers_for_other_hosts() {
    let widgets = repo("acme/widgets");
    let enterprise = Arc::new(FakeHookApi::new().with_repo(&widgets, vec![]));
    let manager = WebhookManager::new(
        callback(),
        vec![ManagedServer::new("ghe", "ghe.example.com", true, enterprise.clone())],
        registry_for("build", &[EventType::Push]),
        monitor(),
        Arc::new(MapSecrets::default()),
    );

    let report = manager.reconcile(&target("build", &["acme/widgets"])).await;

    assert_eq!(report[0].1, RegisterOutcome::NoAdminAccess);
    assert!(enterprise.calls().is_empty());
}

#[tokio::test]
async fn test_reconcile_attaches_target_secret_over_global() {
    let widgets = repo("acme/widgets");
    let api = Arc::new(FakeHookApi::new().with_repo(&widgets, vec![]));
    let secrets = MapSecrets(HashMap::from([
        ("GLOBAL".to_string(), "global-secret".to_string()),
        ("BUILD".to_string(), "build-secret".to_string()),
    ]));
    let manager = WebhookManager::new(
        callback(),
        vec![ManagedServer::new("github", "github.com", true, api.clone())],
        registry_for("build", &[EventType::Push]),
        monitor(),
        Arc::new(secrets),
    )
    .with_global_secret(Some(HookSecretConfig {
        credential: CredentialRef::new("GLOBAL").unwrap(),
        algorithm: Default::default(),
    }));

    let mut build = target("build", &["acme/widgets"]);
    build.secret = Some(HookSecretConfig {
        credential: CredentialRef::new("BUILD").unwrap(),
        algorithm: Default::default(),
    });
    manager.reconcile(&build).await;

    assert_eq!(api.created_secrets(), vec![Some("build-secret".to_string())]);
}

#[tokio::test]
async fn test_cleanup_removes_both_kinds_when_no_longer_wanted() {
    let widgets = repo("acme/widgets");
    let api = Arc::new(FakeHookApi::new().with_repo(
        &widgets,
        vec![
            web_hook(1, CALLBACK, &[EventType::Push]),
            legacy_hook(2, CALLBACK),
            web_hook(3, "https://elsewhere.example.com/", &[EventType::Push]),
        ],
    ));
    let manager = manager_with(api.clone(), registry_for("build", &[EventType::Push]), monitor());

    let report = manager
        .cleanup(&target("build", &["acme/widgets"]), &[])
        .await;

    assert_eq!(
        report[0].1,
        CleanupOutcome::Cleaned {
            deleted: vec![HookId::new(1), HookId::new(2)]
        }
    );
    assert_eq!(api.hooks(&widgets).len(), 1);
}

#[tokio::test]
async fn test_cleanup_keeps_managed_hook_for_repository_still_in_use() {
    let widgets = repo("acme/widgets");
    let api = Arc::new(FakeHookApi::new().with_repo(
        &widgets,
        vec![web_hook(1, CALLBACK, &[EventType::Push]), legacy_hook(2, CALLBACK)],
    ));
    let manager = manager_with(api.clone(), registry_for("build", &[EventType::Push]), monitor());
    let other = target("other", &["acme/widgets"]);

    let report = manager
        .cleanup(&target("build", &["acme/widgets"]), &[other])
        .await;

    assert_eq!(
        report[0].1,
        CleanupOutcome::Cleaned {
            deleted: vec![HookId::new(2)]
        }
    );
    assert_eq!(api.mutations(), vec![Call::Delete("acme/widgets".to_string(), 2)]);
}

#[tokio::test]
async fn test_cleanup_skips_ignored_and_records_failures() {
    let ignored = repo("acme/ignored");
    let broken = repo("acme/broken");
    let api = Arc::new(
        FakeHookApi::new()
            .with_repo(&ignored, vec![web_hook(1, CALLBACK, &[EventType::Push])])
            .with_repo(&broken, vec![])
            .failing_list(HookApiError::Transport {
                message: "connection reset".to_string(),
            }),
    );
    let problems = monitor();
    problems.ignore(&ignored).unwrap();
    let manager = manager_with(api.clone(), registry_for("build", &[EventType::Push]), problems.clone());

    let report = manager
        .cleanup(&target("build", &["acme/ignored", "acme/broken"]), &[])
        .await;

    assert_eq!(report[0].1, CleanupOutcome::Ignored);
    assert!(matches!(report[1].1, CleanupOutcome::Failed(_)));
    assert!(problems.is_problem_with(&broken));
    assert_eq!(api.hooks(&ignored).len(), 1);
}
