//! Fan-out of filtered items to every registered sink.
//!
//! Sinks run sequentially in registration order. One sink failing (or
//! panicking) never prevents the others from being invoked; failures are
//! logged and collected into the `DispatchReport`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{error, info, warn};

use crate::error::SinkError;
use crate::pipeline::types::{Item, SubmissionMetadata};

/// A downstream consumer of extracted items (persistence, notification, ...).
#[async_trait]
pub trait ItemSink: Send + Sync {
    /// Stable name used in logs and reports.
    fn name(&self) -> &str;

    /// Deliver a non-empty batch of items.
    async fn deliver(&self, items: &[Item], metadata: &SubmissionMetadata) -> Result<(), SinkError>;
}

/// Per-sink outcome of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: Vec<String>,
    /// `(sink name, error message)` pairs.
    pub failed: Vec<(String, String)>,
}

impl DispatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// Ordered collection of sinks.
#[derive(Clone, Default)]
pub struct Dispatcher {
    sinks: Vec<Arc<dyn ItemSink>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn ItemSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Deliver `items` to every sink. An empty batch invokes no sink.
    pub async fn dispatch(&self, items: &[Item], metadata: &SubmissionMetadata) -> DispatchReport {
        let mut report = DispatchReport::default();
        if items.is_empty() {
            return report;
        }

        for sink in &self.sinks {
            let name = sink.name().to_string();
            let result = AssertUnwindSafe(sink.deliver(items, metadata))
                .catch_unwind()
                .await;

            match result {
                Ok(Ok(())) => {
                    info!(sink = %name, items = items.len(), "Items delivered");
                    report.delivered.push(name);
                }
                Ok(Err(e)) => {
                    warn!(sink = %name, error = %e, "Sink delivery failed");
                    report.failed.push((name, e.to_string()));
                }
                Err(_) => {
                    let e = SinkError::Panicked { sink: name.clone() };
                    error!(sink = %name, "Sink panicked during delivery");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every call into a shared log.
    struct RecordingSink {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        mode: Mode,
    }

    #[derive(Clone, Copy)]
    enum Mode {
        Ok,
        Fail,
        Panic,
    }

    #[async_trait]
    impl ItemSink for RecordingSink {
        fn name(&self) -> &str {
            self.name
        }

        async fn deliver(&self, items: &[Item], _metadata: &SubmissionMetadata) -> Result<(), SinkError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, items.len()));
            match self.mode {
                Mode::Ok => Ok(()),
                Mode::Fail => Err(SinkError::Delivery {
                    sink: self.name.to_string(),
                    reason: "database unavailable".into(),
                }),
                Mode::Panic => panic!("sink exploded"),
            }
        }
    }

    fn sink(name: &'static str, log: &Arc<Mutex<Vec<String>>>, mode: Mode) -> Arc<dyn ItemSink> {
        Arc::new(RecordingSink {
            name,
            log: log.clone(),
            mode,
        })
    }

    fn items() -> Vec<Item> {
        vec![Item::new("Pump", Some(2), ""), Item::new("Valve", Some(1), "")]
    }

    #[tokio::test]
    async fn empty_batch_invokes_nothing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new().with_sink(sink("persist", &log, Mode::Ok));

        let report = dispatcher.dispatch(&[], &SubmissionMetadata::default()).await;
        assert_eq!(report.attempted(), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn all_sinks_receive_same_batch_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new()
            .with_sink(sink("persist", &log, Mode::Ok))
            .with_sink(sink("notify", &log, Mode::Ok));

        let report = dispatcher.dispatch(&items(), &SubmissionMetadata::default()).await;
        assert!(report.all_succeeded());
        assert_eq!(report.delivered, vec!["persist", "notify"]);
        assert_eq!(*log.lock().unwrap(), vec!["persist:2", "notify:2"]);
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_others() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new()
            .with_sink(sink("persist", &log, Mode::Fail))
            .with_sink(sink("notify", &log, Mode::Ok));

        let report = dispatcher.dispatch(&items(), &SubmissionMetadata::default()).await;
        assert_eq!(report.delivered, vec!["notify"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "persist");
        assert!(report.failed[0].1.contains("database unavailable"));
    }

    #[tokio::test]
    async fn panicking_sink_is_contained() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new()
            .with_sink(sink("notify", &log, Mode::Panic))
            .with_sink(sink("persist", &log, Mode::Ok));

        let report = dispatcher.dispatch(&items(), &SubmissionMetadata::default()).await;
        assert_eq!(report.delivered, vec!["persist"]);
        assert_eq!(report.failed[0].0, "notify");
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn sink_names_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new()
            .with_sink(sink("persist", &log, Mode::Ok))
            .with_sink(sink("notify", &log, Mode::Ok));
        assert_eq!(dispatcher.sink_names(), vec!["persist", "notify"]);
        assert!(Dispatcher::new().is_empty());
    }
}
