use crate::support::{count, create_test_config, open_test_storage, start_pipeline, wait_until};
use std::time::Duration;
use sumi_dispatch::project::ProjectStatus;
use sumi_dispatch::task::NewTask;
use sumi_dispatch::TaskStatus;
use tempfile::TempDir;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_pages(server: &MockServer, expected: u64) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/t[0-9]+$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><head><title>Task</title></head></html>", "text/html"),
        )
        .expect(expected)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_active_tasks_survive_restart() {
    let mock_server = MockServer::start().await;
    mount_pages(&mock_server, 5).await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("dispatch.db");

    // First run: the project is paused, so tasks are only recorded
    {
        let config = create_test_config(&db_path, "paused", &[]);
        let storage = open_test_storage(&db_path);
        let (pipeline, _registry) = start_pipeline(&config, storage.clone());

        for i in 0..5 {
            pipeline
                .submit(NewTask::new("site", format!("{}/t{}", mock_server.uri(), i)))
                .await
                .unwrap();
        }

        let recorded = wait_until(Duration::from_secs(5), || {
            let storage = storage.clone();
            async move { count(&storage, TaskStatus::Active) == 5 }
        })
        .await;
        assert!(recorded, "tasks were not persisted");

        let report = pipeline.shutdown().await.unwrap();
        assert_eq!(report.scheduler.dispatched, 0);
    }

    // Second run: nothing is submitted, everything comes from the store
    let config = create_test_config(&db_path, "running", &[]);
    let storage = open_test_storage(&db_path);
    let (pipeline, _registry) = start_pipeline(&config, storage.clone());

    let done = wait_until(Duration::from_secs(10), || {
        let storage = storage.clone();
        async move { count(&storage, TaskStatus::Success) == 5 }
    })
    .await;
    assert!(done, "recovered tasks were not crawled");

    // Give a double dispatch the chance to show up
    tokio::time::sleep(Duration::from_millis(300)).await;
    let report = pipeline.shutdown().await.unwrap();
    assert_eq!(report.scheduler.dispatched, 5);
    assert_eq!(count(&storage, TaskStatus::Active), 0);
}

#[tokio::test]
async fn test_paused_project_resumes_on_registry_change() {
    let mock_server = MockServer::start().await;
    mount_pages(&mock_server, 3).await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("dispatch.db");
    let config = create_test_config(&db_path, "paused", &[]);
    let storage = open_test_storage(&db_path);
    let (pipeline, registry) = start_pipeline(&config, storage.clone());

    for i in 0..3 {
        pipeline
            .submit(NewTask::new("site", format!("{}/t{}", mock_server.uri(), i)))
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    let received = mock_server.received_requests().await.unwrap_or_default();
    assert!(received.is_empty(), "paused project was crawled");

    registry
        .set_status("site", ProjectStatus::Running)
        .unwrap();

    let done = wait_until(Duration::from_secs(10), || {
        let storage = storage.clone();
        async move { count(&storage, TaskStatus::Success) == 3 }
    })
    .await;
    assert!(done, "resumed project was not crawled");

    let report = pipeline.shutdown().await.unwrap();
    assert_eq!(report.scheduler.dispatched, 3);
}
