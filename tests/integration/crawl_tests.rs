use crate::support::{count, create_test_config, open_test_storage, start_pipeline, wait_until};
use std::time::Duration;
use sumi_dispatch::task::NewTask;
use sumi_dispatch::TaskStatus;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html")
}

#[tokio::test]
async fn test_full_pipeline_single_site() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    // The index links to itself, two pages and an external site
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(format!(
            r#"<html><head><title>Home</title></head><body>
            <a href="{0}/">Home</a>
            <a href="{0}/page1">Page 1</a>
            <a href="{0}/page2">Page 2</a>
            <a href="https://external.invalid/">Elsewhere</a>
            </body></html>"#,
            base_url
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page1"))
        .respond_with(html(format!(
            r#"<html><head><title>Page 1</title></head><body>
            <a href="{0}/page2">Page 2 again</a>
            </body></html>"#,
            base_url
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    // One retry is allowed, then the task is FAILED
    Mock::given(method("GET"))
        .and(path("/page2"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("dispatch.db");
    let config = create_test_config(&db_path, "running", &[format!("{}/", base_url)]);
    let storage = open_test_storage(&db_path);

    let (pipeline, _registry) = start_pipeline(&config, storage.clone());
    for task in sumi_dispatch::crawler::seed_tasks(&config.projects) {
        pipeline.submit(task).await.unwrap();
    }

    let finished = wait_until(Duration::from_secs(15), || {
        let storage = storage.clone();
        async move {
            count(&storage, TaskStatus::Success) == 2 && count(&storage, TaskStatus::Failed) == 1
        }
    })
    .await;
    assert!(finished, "pipeline did not finish the site in time");

    // Re-submitting a finished task without a change is a no-op
    pipeline
        .submit(NewTask::new("site", format!("{}/page1", base_url)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let report = pipeline.shutdown().await.unwrap();
    assert_eq!(report.scheduler.dispatched, 4);
    assert_eq!(report.scheduler.completed, 2);
    assert_eq!(report.scheduler.retried, 1);
    assert_eq!(report.scheduler.failed, 1);
    assert!(report.scheduler.duplicates >= 3);

    assert_eq!(count(&storage, TaskStatus::Active), 0);
    assert_eq!(storage.count_results("site").unwrap(), 2);
}

#[tokio::test]
async fn test_rejected_submissions_do_not_reach_fetchers() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("dispatch.db");
    let config = create_test_config(&db_path, "running", &[]);
    let storage = open_test_storage(&db_path);

    let (pipeline, _registry) = start_pipeline(&config, storage.clone());
    pipeline
        .submit(NewTask::new("site", "not a url").with_task_id("broken"))
        .await
        .unwrap();
    pipeline
        .submit(NewTask::new("ghost", format!("{}/", mock_server.uri())))
        .await
        .unwrap();

    let stored = wait_until(Duration::from_secs(5), || {
        let storage = storage.clone();
        async move { count(&storage, TaskStatus::Bad) == 1 }
    })
    .await;
    assert!(stored, "malformed task was not recorded as BAD");

    let report = pipeline.shutdown().await.unwrap();
    assert_eq!(report.scheduler.rejected, 2);
    assert_eq!(report.scheduler.dispatched, 0);
}
