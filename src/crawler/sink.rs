//! Result sink worker

use crate::queue::Queue;
use crate::storage::ResultSink;
use crate::task::ResultRecord;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Drains the result queue into a [`ResultSink`]
pub struct SinkWorker {
    sink: Arc<dyn ResultSink>,
    input: Arc<Queue<ResultRecord>>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl SinkWorker {
    pub fn new(
        sink: Arc<dyn ResultSink>,
        input: Arc<Queue<ResultRecord>>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            sink,
            input,
            shutdown_rx,
        }
    }

    /// Saves results until shutdown, then keeps saving until the queue is
    /// closed and empty
    ///
    /// Processors may still be finishing when shutdown is signalled, so the
    /// queue owner must close the queue once they are joined.
    ///
    /// # Returns
    ///
    /// The number of records saved
    pub async fn run(mut self) -> u64 {
        let mut saved = 0;

        loop {
            let record = tokio::select! {
                _ = self.shutdown_rx.recv() => break,
                received = self.input.get(None) => match received {
                    Ok(record) => record,
                    Err(_) => break,
                },
            };
            saved += self.save(&record);
        }

        while let Ok(record) = self.input.get(None).await {
            saved += self.save(&record);
        }

        tracing::debug!("Result sink stopped after saving {} records", saved);
        saved
    }

    fn save(&self, record: &ResultRecord) -> u64 {
        match self.sink.save_result(record) {
            Ok(()) => 1,
            Err(e) => {
                tracing::error!(
                    "Failed to save result of {}:{}: {}",
                    record.project,
                    record.task_id,
                    e
                );
                0
            }
        }
    }
}
