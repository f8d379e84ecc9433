// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, error};

use crate::config::Config;
use crate::error::FlushError;
use crate::flusher::Flusher;
use crate::payload_aggregator::PayloadAggregator;
use crate::transport::Transport;

/// Well-known payload-type keys. The aggregator is keyed lazily by arbitrary
/// string, so additional payload types need no code change here.
pub mod payload_keys {
    pub const METRIC_DATA: &str = "metric_data";
    pub const ERROR_DATA: &str = "error_data";
    pub const TRANSACTION_SAMPLE_DATA: &str = "transaction_sample_data";
    pub const ANALYTIC_EVENT_DATA: &str = "analytic_event_data";
    pub const CUSTOM_EVENT_DATA: &str = "custom_event_data";
    pub const ERROR_EVENT_DATA: &str = "error_event_data";
    pub const SPAN_EVENT_DATA: &str = "span_event_data";
}

/// Submission surface for every telemetry payload type, backed by one
/// process-wide [`PayloadAggregator`] and a [`Flusher`].
///
/// There is no connection handshake in serverless mode: the collector is
/// "connected" from construction until [`ServerlessCollector::shutdown`].
pub struct ServerlessCollector {
    payload: Arc<Mutex<PayloadAggregator>>,
    flusher: Flusher,
    enabled: AtomicBool,
}

impl ServerlessCollector {
    pub fn new(config: &Config) -> Self {
        Self::build(Flusher::new(config))
    }

    /// Builds the collector over a caller-provided sink, e.g. an external
    /// network transport.
    pub fn with_transport(config: &Config, transport: Arc<dyn Transport>) -> Self {
        Self::build(Flusher::with_transport(config, transport))
    }

    fn build(flusher: Flusher) -> Self {
        ServerlessCollector {
            payload: Arc::new(Mutex::new(PayloadAggregator::new())),
            flusher,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Number of payload-type buckets currently awaiting flush.
    pub fn pending_payloads(&self) -> usize {
        #[allow(clippy::expect_used)]
        let payload = self.payload.lock().expect("lock poisoned");
        payload.len()
    }

    /// Merges `data` into the bucket for `key` and invokes `on_commit` once
    /// the merge is committed. The merge happens under the aggregator lock as
    /// one non-preemptible step; after shutdown the write is dropped.
    pub fn submit(&self, key: &str, data: Value, on_commit: impl FnOnce()) {
        if !self.enabled.load(Ordering::Acquire) {
            debug!(key, "collector shut down, dropping payload");
            return;
        }
        {
            #[allow(clippy::expect_used)]
            let mut payload = self.payload.lock().expect("lock poisoned");
            payload.merge(key, data);
        }
        on_commit();
    }

    pub fn metric_data(&self, data: Value, on_commit: impl FnOnce()) {
        self.submit(payload_keys::METRIC_DATA, data, on_commit);
    }

    pub fn error_data(&self, data: Value, on_commit: impl FnOnce()) {
        self.submit(payload_keys::ERROR_DATA, data, on_commit);
    }

    pub fn transaction_sample_data(&self, data: Value, on_commit: impl FnOnce()) {
        self.submit(payload_keys::TRANSACTION_SAMPLE_DATA, data, on_commit);
    }

    pub fn analytic_event_data(&self, data: Value, on_commit: impl FnOnce()) {
        self.submit(payload_keys::ANALYTIC_EVENT_DATA, data, on_commit);
    }

    pub fn custom_event_data(&self, data: Value, on_commit: impl FnOnce()) {
        self.submit(payload_keys::CUSTOM_EVENT_DATA, data, on_commit);
    }

    pub fn error_event_data(&self, data: Value, on_commit: impl FnOnce()) {
        self.submit(payload_keys::ERROR_EVENT_DATA, data, on_commit);
    }

    pub fn span_event_data(&self, data: Value, on_commit: impl FnOnce()) {
        self.submit(payload_keys::SPAN_EVENT_DATA, data, on_commit);
    }

    /// Drains and delivers the accumulation without yielding to the
    /// scheduler. Call at the end of an invocation when the process may be
    /// frozen or terminated immediately afterwards.
    pub fn flush_payload_sync(&self) -> Result<(), FlushError> {
        self.flusher.flush_sync(&self.payload)
    }

    /// Asynchronous drain-and-deliver; a concurrent call waits its turn and
    /// then flushes whatever accumulated since the first flush's snapshot.
    pub async fn flush_payload(&self) -> Result<(), FlushError> {
        self.flusher.flush(&self.payload).await
    }

    /// Final synchronous flush, then the collector drops all further
    /// submissions. `on_done` is invoked either way; a failed final flush is
    /// the agent's problem, never the application's.
    pub fn shutdown(&self, on_done: impl FnOnce()) {
        if self.enabled.swap(false, Ordering::AcqRel) {
            if let Err(flush_error) = self.flusher.flush_sync(&self.payload) {
                error!(error = %flush_error, "final telemetry flush failed during shutdown");
            }
        }
        on_done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use async_trait::async_trait;
    use serde_json::json;

    struct MemoryTransport {
        records: Mutex<Vec<String>>,
    }

    impl MemoryTransport {
        fn shared() -> Arc<Self> {
            Arc::new(MemoryTransport {
                records: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        fn name(&self) -> &'static str {
            "memory"
        }

        fn deliver_sync(&self, record: &str) -> Result<(), TransportError> {
            self.records.lock().unwrap().push(record.to_string());
            Ok(())
        }

        async fn deliver(&self, record: &str) -> Result<(), TransportError> {
            self.deliver_sync(record)
        }
    }

    #[test]
    fn test_each_payload_type_lands_in_its_bucket() {
        let collector = ServerlessCollector::with_transport(
            &Config::default(),
            MemoryTransport::shared(),
        );

        let mut committed = 0;
        collector.metric_data(json!({"type": "metric_data"}), || committed += 1);
        collector.error_data(json!({"type": "error_data"}), || committed += 1);
        collector.transaction_sample_data(json!({"type": "transaction_sample_data"}), || {
            committed += 1
        });
        collector.analytic_event_data(json!({"type": "analytic_event_data"}), || committed += 1);
        collector.custom_event_data(json!({"type": "custom_event_data"}), || committed += 1);
        collector.error_event_data(json!({"type": "error_event_data"}), || committed += 1);
        collector.span_event_data(json!({"type": "span_event_data"}), || committed += 1);

        assert_eq!(committed, 7);
        assert_eq!(collector.pending_payloads(), 7);
    }

    #[test]
    fn test_is_connected_until_shutdown() {
        let collector = ServerlessCollector::with_transport(
            &Config::default(),
            MemoryTransport::shared(),
        );
        assert!(collector.is_connected());
        let mut done = false;
        collector.shutdown(|| done = true);
        assert!(done);
        assert!(!collector.is_connected());
    }

    #[test]
    fn test_shutdown_flushes_then_drops_submissions() {
        let transport = MemoryTransport::shared();
        let collector =
            ServerlessCollector::with_transport(&Config::default(), Arc::clone(&transport) as Arc<dyn Transport>);

        collector.metric_data(json!({"count": 1}), || {});
        collector.shutdown(|| {});
        assert_eq!(transport.records.lock().unwrap().len(), 1);

        // Dropped, and the completion callback never runs.
        collector.metric_data(json!({"count": 2}), || panic!("must not commit"));
        assert_eq!(collector.pending_payloads(), 0);
    }

    #[test]
    fn test_second_shutdown_does_not_reflush() {
        let transport = MemoryTransport::shared();
        let collector =
            ServerlessCollector::with_transport(&Config::default(), Arc::clone(&transport) as Arc<dyn Transport>);
        collector.shutdown(|| {});
        collector.shutdown(|| {});
        assert_eq!(transport.records.lock().unwrap().len(), 1);
    }
}
