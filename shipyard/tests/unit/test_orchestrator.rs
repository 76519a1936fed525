//! Orchestrator intake tests

use std::sync::Arc;
use std::time::Duration;

use shipyard::cache::deployments::DeploymentRegistry;
use shipyard::deploy::orchestrator::Orchestrator;
use shipyard::deploy::slug::is_generated_shape;
use shipyard::deploy::spawner::ExecutorExit;
use shipyard::errors::PipelineError;
use shipyard::models::deployment::DeploymentStatus;

use crate::support::{orchestrator, orchestrator_options, FakeSpawner};

#[tokio::test]
async fn test_create_assigns_generated_slug_and_spawns_executor() {
    let spawner = Arc::new(FakeSpawner::succeeding());
    let orchestrator = orchestrator(spawner.clone());

    let created = orchestrator
        .create_deployment("https://github.com/acme/widgets.git", None)
        .await
        .unwrap();

    assert!(is_generated_shape(&created.deployment_id));
    assert_eq!(created.status, DeploymentStatus::Queued);
    assert_eq!(
        created.preview_url,
        format!("http://{}.localhost:8000", created.deployment_id)
    );
    assert_eq!(
        spawner.spawned(),
        vec![(
            created.deployment_id.clone(),
            "https://github.com/acme/widgets".to_string()
        )]
    );
    assert!(orchestrator.registry().get(&created.deployment_id).is_some());
}

#[tokio::test]
async fn test_invalid_source_is_rejected_before_spawning() {
    let spawner = Arc::new(FakeSpawner::succeeding());
    let orchestrator = orchestrator(spawner.clone());

    for raw in ["", "not a url at all", "https://gitlab.com/acme/widgets", "https://github.com/acme"] {
        let result = orchestrator.create_deployment(raw, None).await;
        assert!(
            matches!(result, Err(PipelineError::InvalidInput(_))),
            "{raw:?} should be rejected"
        );
    }
    assert!(spawner.spawned().is_empty());
    assert!(orchestrator.registry().is_empty());
}

#[tokio::test]
async fn test_supplied_slug_is_validated_and_reserved() {
    let spawner = Arc::new(FakeSpawner::succeeding());
    let orchestrator = orchestrator(spawner.clone());

    let created = orchestrator
        .create_deployment("https://github.com/acme/widgets", Some("my-site"))
        .await
        .unwrap();
    assert_eq!(created.deployment_id, "my-site");

    assert!(matches!(
        orchestrator
            .create_deployment("https://github.com/acme/other", Some("my-site"))
            .await,
        Err(PipelineError::Conflict(_))
    ));
    assert!(matches!(
        orchestrator
            .create_deployment("https://github.com/acme/widgets", Some("Bad_Slug"))
            .await,
        Err(PipelineError::InvalidInput(_))
    ));
    assert_eq!(spawner.spawned().len(), 1);
}

#[tokio::test]
async fn test_slug_reuse_allowed_without_reservation() {
    let spawner = Arc::new(FakeSpawner::succeeding());
    let mut options = orchestrator_options();
    options.reserve_slugs = false;
    let orchestrator = Orchestrator::new(options, Arc::new(DeploymentRegistry::new(10)), spawner.clone());

    for _ in 0..2 {
        orchestrator
            .create_deployment("https://github.com/acme/widgets", Some("my-site"))
            .await
            .unwrap();
    }
    assert_eq!(spawner.spawned().len(), 2);
    assert_eq!(orchestrator.registry().len(), 1);
}

#[tokio::test]
async fn test_spawn_failure_releases_the_id() {
    let spawner = Arc::new(FakeSpawner {
        fail_spawn: true,
        ..FakeSpawner::succeeding()
    });
    let orchestrator = orchestrator(spawner);

    assert!(matches!(
        orchestrator
            .create_deployment("https://github.com/acme/widgets", Some("my-site"))
            .await,
        Err(PipelineError::SpawnError(_))
    ));
    assert!(orchestrator.registry().get("my-site").is_none());
}

#[tokio::test]
async fn test_executor_crash_marks_deployment_failed() {
    let spawner = Arc::new(FakeSpawner::with_exit(ExecutorExit::Failed(
        "executor exited with exit status: 137".to_string(),
    )));
    let orchestrator = orchestrator(spawner);

    let created = orchestrator
        .create_deployment("https://github.com/acme/widgets", None)
        .await
        .unwrap();

    let mut record = None;
    for _ in 0..100 {
        let current = orchestrator.registry().get(&created.deployment_id).unwrap();
        if current.deployment.status == DeploymentStatus::Failed {
            record = Some(current);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let record = record.expect("deployment never marked failed");
    assert_eq!(
        record.error.as_deref(),
        Some("executor exited with exit status: 137")
    );
}

#[tokio::test]
async fn test_concurrent_requests_get_distinct_ids() {
    let spawner = Arc::new(FakeSpawner::succeeding());
    let orchestrator = Arc::new(orchestrator(spawner.clone()));

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let orchestrator = orchestrator.clone();
        tasks.push(tokio::spawn(async move {
            orchestrator
                .create_deployment("https://github.com/acme/widgets", None)
                .await
                .unwrap()
                .deployment_id
        }));
    }
    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 20);
    assert_eq!(orchestrator.registry().len(), 20);
}
