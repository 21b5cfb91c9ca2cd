//! Processing of fetched pages
//!
//! A processor turns a [`FetchOutcome`] into three things: the status report
//! the scheduler needs to finish the task, follow-up task submissions, and
//! result records for the sink. The worker loop routes each of them to its
//! queue: reports and submissions wait for room on the control queue,
//! result records are dropped (and counted) when the result queue is full.

use crate::config::ProcessorConfig;
use crate::crawler::parser::parse_html;
use crate::queue::Queue;
use crate::task::{
    content_fingerprint, ControlMessage, FetchOutcome, NewTask, ResultRecord, StatusReport,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use url::Url;

/// Everything a processor produced for one fetched task
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    pub status: StatusReport,
    pub new_tasks: Vec<NewTask>,
    pub results: Vec<ResultRecord>,
}

impl ProcessOutput {
    /// A bare report with no follow-up work
    pub fn report(status: StatusReport) -> Self {
        Self {
            status,
            new_tasks: Vec::new(),
            results: Vec::new(),
        }
    }
}

/// Turns fetched content into reports, new tasks and results
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, outcome: &FetchOutcome) -> ProcessOutput;
}

/// Link-following processor
///
/// Reports a failure for transport errors and HTTP statuses >= 400. For
/// anything else it records the title, status code and link count of the
/// page, submits the links it finds as new tasks of the same project and
/// reports success with the SHA-256 of the body as the task's itag.
#[derive(Debug, Clone)]
pub struct LinkProcessor {
    config: ProcessorConfig,
}

impl LinkProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self { config }
    }

    fn is_html(outcome: &FetchOutcome) -> bool {
        outcome
            .fetch_result
            .content_type()
            .map_or(true, |content_type| content_type.contains("html"))
    }

    /// Links of a page that become new tasks
    fn follow(&self, page_url: &Url, links: Vec<String>) -> Vec<String> {
        if !self.config.follow_links {
            return Vec::new();
        }

        links
            .into_iter()
            .filter(|link| {
                !self.config.same_host_only
                    || Url::parse(link)
                        .map(|url| url.host_str() == page_url.host_str())
                        .unwrap_or(false)
            })
            .take(self.config.max_links_per_page)
            .collect()
    }
}

#[async_trait]
impl Processor for LinkProcessor {
    async fn process(&self, outcome: &FetchOutcome) -> ProcessOutput {
        let task = &outcome.task;
        let response = &outcome.fetch_result;

        if let Some(error) = &response.error {
            return ProcessOutput::report(StatusReport::failure(
                &task.project,
                &task.task_id,
                error.clone(),
            ));
        }

        let status_code = response.status_code.unwrap_or_default();
        if !response.is_ok() {
            return ProcessOutput::report(StatusReport::failure(
                &task.project,
                &task.task_id,
                format!("HTTP {}", status_code),
            ));
        }

        let itag = content_fingerprint(&response.body);
        let page_url = match Url::parse(&task.url) {
            Ok(url) => url,
            Err(e) => {
                return ProcessOutput::report(StatusReport::failure(
                    &task.project,
                    &task.task_id,
                    format!("Unparseable task URL: {}", e),
                ));
            }
        };

        let parsed = if Self::is_html(outcome) {
            parse_html(&String::from_utf8_lossy(&response.body), &page_url)
        } else {
            Default::default()
        };
        let link_count = parsed.links.len();

        let new_tasks = self
            .follow(&page_url, parsed.links)
            .into_iter()
            .map(|link| NewTask::new(&task.project, link).with_priority(task.priority))
            .collect();

        let result = ResultRecord {
            project: task.project.clone(),
            task_id: task.task_id.clone(),
            url: task.url.clone(),
            extracted_payload: serde_json::json!({
                "title": parsed.title,
                "status_code": status_code,
                "link_count": link_count,
            }),
            timestamp: Utc::now(),
        };

        ProcessOutput {
            status: StatusReport::success(&task.project, &task.task_id).with_itag(itag),
            new_tasks,
            results: vec![result],
        }
    }
}

/// A processor worker: process queue in, control and result queues out
pub struct ProcessWorker {
    id: usize,
    processor: Arc<dyn Processor>,
    input: Arc<Queue<FetchOutcome>>,
    control: Arc<Queue<ControlMessage>>,
    results: Arc<Queue<ResultRecord>>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ProcessWorker {
    pub fn new(
        id: usize,
        processor: Arc<dyn Processor>,
        input: Arc<Queue<FetchOutcome>>,
        control: Arc<Queue<ControlMessage>>,
        results: Arc<Queue<ResultRecord>>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            id,
            processor,
            input,
            control,
            results,
            shutdown_rx,
        }
    }

    /// Runs until shutdown or until a queue is closed
    ///
    /// # Returns
    ///
    /// The number of fetch outcomes processed
    pub async fn run(mut self) -> u64 {
        tracing::debug!("Process worker {} started", self.id);
        let mut processed = 0;

        loop {
            let outcome = tokio::select! {
                _ = self.shutdown_rx.recv() => break,
                received = self.input.get(None) => match received {
                    Ok(outcome) => outcome,
                    Err(_) => break,
                },
            };

            let output = self.processor.process(&outcome).await;
            processed += 1;
            tracing::debug!(
                "Processed {}: {:?}, {} new tasks, {} results",
                outcome.task.url,
                output.status.outcome,
                output.new_tasks.len(),
                output.results.len()
            );

            for record in output.results {
                self.results.put_or_drop(record, 0);
            }

            let mut messages: Vec<ControlMessage> = output
                .new_tasks
                .into_iter()
                .map(ControlMessage::NewTask)
                .collect();
            messages.push(ControlMessage::StatusReport(output.status));

            if !self.send_control(messages).await {
                break;
            }
        }

        tracing::debug!(
            "Process worker {} stopped after {} outcomes",
            self.id,
            processed
        );
        processed
    }

    /// Puts messages on the control queue, waiting for room
    ///
    /// Returns false if the worker should stop.
    async fn send_control(&mut self, messages: Vec<ControlMessage>) -> bool {
        for message in messages {
            let priority = message.queue_priority();
            let put = tokio::select! {
                _ = self.shutdown_rx.recv() => return false,
                put = self.control.put(message, priority, None) => put,
            };
            if let Err(e) = put {
                tracing::warn!(
                    "Process worker {} could not reach the scheduler: {}",
                    self.id,
                    e.reason
                );
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{FetchParams, FetchRequest, FetchResponse, Outcome};
    use std::collections::BTreeMap;
    use std::time::Duration;

    const PAGE: &str = r#"
        <html><head><title>Home</title></head><body>
            <a href="/a">a</a>
            <a href="/b">b</a>
            <a href="https://elsewhere.org/c">c</a>
        </body></html>
    "#;

    fn outcome(status: u16, body: &str) -> FetchOutcome {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "text/html; charset=utf-8".to_string());
        FetchOutcome {
            task: FetchRequest {
                task_id: "t".to_string(),
                project: "p".to_string(),
                url: "https://example.com/".to_string(),
                method: "GET".to_string(),
                fetch_params: FetchParams::default(),
                priority: 4,
            },
            fetch_result: FetchResponse {
                status_code: Some(status),
                headers,
                body: body.as_bytes().to_vec(),
                error: None,
            },
        }
    }

    fn processor(config: ProcessorConfig) -> LinkProcessor {
        LinkProcessor::new(config)
    }

    #[tokio::test]
    async fn test_success_extracts_links_and_result() {
        let output = processor(ProcessorConfig::default())
            .process(&outcome(200, PAGE))
            .await;

        assert_eq!(output.status.outcome, Outcome::Success);
        assert_eq!(
            output.status.itag,
            Some(content_fingerprint(PAGE.as_bytes()))
        );

        let urls: Vec<&str> = output.new_tasks.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/a", "https://example.com/b"]);
        assert!(output.new_tasks.iter().all(|t| t.priority == 4 && t.itag.is_none()));

        assert_eq!(output.results.len(), 1);
        let payload = &output.results[0].extracted_payload;
        assert_eq!(payload["title"], "Home");
        assert_eq!(payload["status_code"], 200);
        assert_eq!(payload["link_count"], 3);
    }

    #[tokio::test]
    async fn test_link_limits() {
        let config = ProcessorConfig {
            same_host_only: false,
            max_links_per_page: 2,
            ..ProcessorConfig::default()
        };
        let output = processor(config).process(&outcome(200, PAGE)).await;
        assert_eq!(output.new_tasks.len(), 2);

        let config = ProcessorConfig {
            follow_links: false,
            ..ProcessorConfig::default()
        };
        let output = processor(config).process(&outcome(200, PAGE)).await;
        assert!(output.new_tasks.is_empty());
        assert_eq!(output.results.len(), 1);
    }

    #[tokio::test]
    async fn test_http_error_reports_failure() {
        let output = processor(ProcessorConfig::default())
            .process(&outcome(404, "missing"))
            .await;

        assert_eq!(output.status.outcome, Outcome::Failure);
        assert_eq!(output.status.error.as_deref(), Some("HTTP 404"));
        assert!(output.new_tasks.is_empty());
        assert!(output.results.is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_reports_failure() {
        let mut failed = outcome(200, "");
        failed.fetch_result = FetchResponse::from_error("Request timeout");

        let output = processor(ProcessorConfig::default()).process(&failed).await;
        assert_eq!(output.status.outcome, Outcome::Failure);
        assert_eq!(output.status.error.as_deref(), Some("Request timeout"));
    }

    #[tokio::test]
    async fn test_non_html_is_not_parsed() {
        let mut json = outcome(200, r#"{"href": "/a"}"#);
        json.fetch_result
            .headers
            .insert("content-type".to_string(), "application/json".to_string());

        let output = processor(ProcessorConfig::default()).process(&json).await;
        assert_eq!(output.status.outcome, Outcome::Success);
        assert!(output.new_tasks.is_empty());
        assert_eq!(output.results[0].extracted_payload["link_count"], 0);
    }

    #[tokio::test]
    async fn test_process_worker_routes_output() {
        let input = Arc::new(Queue::new("process", 10));
        let control = Arc::new(Queue::new("control", 10));
        let results = Arc::new(Queue::new("result", 10));
        let (shutdown_tx, _) = broadcast::channel(1);

        let worker = ProcessWorker::new(
            0,
            Arc::new(processor(ProcessorConfig::default())),
            input.clone(),
            control.clone(),
            results.clone(),
            shutdown_tx.subscribe(),
        );
        let handle = tokio::spawn(worker.run());

        input.try_put(outcome(200, PAGE), 0).unwrap();

        let record = results.get(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(record.task_id, "t");

        for _ in 0..100 {
            if control.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // The report outranks the two submissions
        let mut messages = Vec::new();
        for _ in 0..3 {
            messages.push(control.get(Some(Duration::from_secs(5))).await.unwrap());
        }
        assert!(matches!(messages[0], ControlMessage::StatusReport(_)));
        assert!(matches!(messages[1], ControlMessage::NewTask(_)));
        assert!(matches!(messages[2], ControlMessage::NewTask(_)));

        shutdown_tx.send(()).unwrap();
        assert_eq!(handle.await.unwrap(), 1);
    }
}
