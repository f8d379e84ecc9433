// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::config::Config;
use crate::error::FlushError;
use crate::payload_aggregator::PayloadAggregator;
use crate::transport::{self, Transport};

/// First element of every flushed record.
pub const FORMAT_VERSION: u32 = 1;

/// Fixed discriminator marking a record as out-of-band monitoring data,
/// distinguishing it from the host's own output stream.
pub const TRANSPORT_LABEL: &str = "DD_SERVERLESS_TELEMETRY";

const PROTOCOL_VERSION: u32 = 16;
const METADATA_VERSION: u32 = 2;

/// Envelope metadata shipped alongside the accumulated data on every flush.
#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub protocol_version: u32,
    pub agent_version: &'static str,
    pub agent_language: &'static str,
    pub metadata_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_environment: Option<String>,
}

impl Metadata {
    fn from_config(config: &Config) -> Self {
        Metadata {
            protocol_version: PROTOCOL_VERSION,
            agent_version: env!("CARGO_PKG_VERSION"),
            agent_language: "rust",
            metadata_version: METADATA_VERSION,
            function_name: config.function_name.clone(),
            execution_environment: config.execution_environment.clone(),
        }
    }
}

/// Drains the payload aggregator and writes one encoded record through the
/// transport sink.
///
/// Both flush modes run the same pipeline: snapshot+reset the aggregator
/// under one lock acquisition, serialize `{metadata, data}`, gzip, base64,
/// then frame as the JSON array `[FORMAT_VERSION, TRANSPORT_LABEL, body]`.
/// The snapshot is always taken synchronously, so writes arriving while an
/// asynchronous flush is in flight land in the next flush window.
pub struct Flusher {
    transport: Arc<dyn Transport>,
    metadata: Metadata,
    // One in-flight asynchronous flush at a time; a second caller waits for
    // the gate and then flushes whatever accumulated since.
    flush_gate: tokio::sync::Mutex<()>,
}

impl Flusher {
    pub fn new(config: &Config) -> Self {
        Self::with_transport(config, transport::from_config(config))
    }

    pub fn with_transport(config: &Config, transport: Arc<dyn Transport>) -> Self {
        Flusher {
            transport,
            metadata: Metadata::from_config(config),
            flush_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Synchronous flush, for call sites after which the process may
    /// terminate immediately: no suspension between the snapshot and the
    /// completed transport write.
    pub fn flush_sync(&self, aggregator: &Mutex<PayloadAggregator>) -> Result<(), FlushError> {
        let snapshot = Self::take_snapshot(aggregator);
        debug!(
            buckets = snapshot.len(),
            transport = self.transport.name(),
            "flushing telemetry payload"
        );
        let record = self.encode(&snapshot)?;
        if let Err(transport_error) = self.transport.deliver_sync(&record) {
            Self::restore_snapshot(aggregator, snapshot);
            error!(error = %transport_error, "telemetry flush failed, payload requeued for next flush");
            return Err(transport_error.into());
        }
        Ok(())
    }

    /// Asynchronous flush: same pipeline, but compression and the transport
    /// write may suspend.
    pub async fn flush(&self, aggregator: &Mutex<PayloadAggregator>) -> Result<(), FlushError> {
        let _in_flight = self.flush_gate.lock().await;
        let snapshot = Self::take_snapshot(aggregator);
        debug!(
            buckets = snapshot.len(),
            transport = self.transport.name(),
            "flushing telemetry payload"
        );
        let record = self.encode(&snapshot)?;
        if let Err(transport_error) = self.transport.deliver(&record).await {
            Self::restore_snapshot(aggregator, snapshot);
            error!(error = %transport_error, "telemetry flush failed, payload requeued for next flush");
            return Err(transport_error.into());
        }
        Ok(())
    }

    fn take_snapshot(aggregator: &Mutex<PayloadAggregator>) -> HashMap<String, Value> {
        #[allow(clippy::expect_used)]
        let mut aggregator = aggregator.lock().expect("lock poisoned");
        aggregator.snapshot()
    }

    fn restore_snapshot(aggregator: &Mutex<PayloadAggregator>, snapshot: HashMap<String, Value>) {
        #[allow(clippy::expect_used)]
        let mut aggregator = aggregator.lock().expect("lock poisoned");
        aggregator.restore(snapshot);
    }

    fn encode(&self, data: &HashMap<String, Value>) -> Result<String, FlushError> {
        let body = serde_json::to_vec(&json!({
            "metadata": self.metadata,
            "data": data,
        }))
        .map_err(|serialize_error| {
            // Re-queueing cannot fix an unserializable payload; it is dropped
            // with a diagnostic and the host keeps running.
            error!(error = %serialize_error, "dropping telemetry snapshot, serialization failed");
            serialize_error
        })?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&body).map_err(Self::compress_failed)?;
        let compressed = encoder.finish().map_err(Self::compress_failed)?;

        let envelope = json!([FORMAT_VERSION, TRANSPORT_LABEL, BASE64.encode(compressed)]);
        Ok(serde_json::to_string(&envelope)?)
    }

    // Like the serialize arm: a payload that cannot be encoded is dropped, so
    // the drop must leave a diagnostic behind.
    fn compress_failed(compress_error: std::io::Error) -> FlushError {
        error!(error = %compress_error, "dropping telemetry snapshot, compression failed");
        FlushError::Compress(compress_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::io;

    struct FailingTransport;

    #[async_trait]
    impl Transport for FailingTransport {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn deliver_sync(&self, _record: &str) -> Result<(), TransportError> {
            Err(TransportError::Stdout(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stream closed",
            )))
        }

        async fn deliver(&self, record: &str) -> Result<(), TransportError> {
            self.deliver_sync(record)
        }
    }

    struct RecordingTransport {
        records: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn deliver_sync(&self, record: &str) -> Result<(), TransportError> {
            self.records.lock().unwrap().push(record.to_string());
            Ok(())
        }

        async fn deliver(&self, record: &str) -> Result<(), TransportError> {
            self.deliver_sync(record)
        }
    }

    fn aggregator_with(key: &str, data: Value) -> Mutex<PayloadAggregator> {
        let aggregator = Mutex::new(PayloadAggregator::new());
        aggregator.lock().unwrap().merge(key, data);
        aggregator
    }

    #[test]
    fn test_transport_failure_requeues_snapshot() {
        let flusher = Flusher::with_transport(&Config::default(), Arc::new(FailingTransport));
        let aggregator = aggregator_with("metric_data", json!({"count": 3}));

        let result = flusher.flush_sync(&aggregator);
        assert!(matches!(result, Err(FlushError::Transport(_))));

        // The snapshot went back; the next flush will retry it.
        let guard = aggregator.lock().unwrap();
        assert_eq!(guard.get("metric_data"), Some(&json!({"count": 3})));
    }

    #[tokio::test]
    async fn test_async_transport_failure_requeues_snapshot() {
        let flusher = Flusher::with_transport(&Config::default(), Arc::new(FailingTransport));
        let aggregator = aggregator_with("error_data", json!([{"type": "oops"}]));

        assert!(flusher.flush(&aggregator).await.is_err());
        assert!(!aggregator.lock().unwrap().is_empty());
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_compress_failure_leaves_a_diagnostic() {
        let flush_error = Flusher::compress_failed(io::Error::new(
            io::ErrorKind::WriteZero,
            "truncated gzip stream",
        ));
        assert!(matches!(flush_error, FlushError::Compress(_)));
        assert!(logs_contain("dropping telemetry snapshot, compression failed"));
    }

    #[test]
    fn test_successful_flush_leaves_aggregator_empty() {
        let transport = Arc::new(RecordingTransport {
            records: Mutex::new(Vec::new()),
        });
        let flusher = Flusher::with_transport(&Config::default(), Arc::clone(&transport) as Arc<dyn Transport>);
        let aggregator = aggregator_with("metric_data", json!({"count": 3}));

        flusher.flush_sync(&aggregator).unwrap();
        assert!(aggregator.lock().unwrap().is_empty());
        assert_eq!(transport.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_record_is_versioned_and_labeled() {
        let transport = Arc::new(RecordingTransport {
            records: Mutex::new(Vec::new()),
        });
        let flusher = Flusher::with_transport(&Config::default(), Arc::clone(&transport) as Arc<dyn Transport>);
        let aggregator = aggregator_with("metric_data", json!({"count": 3}));

        flusher.flush_sync(&aggregator).unwrap();
        let records = transport.records.lock().unwrap();
        let envelope: Value = serde_json::from_str(&records[0]).unwrap();
        let parts = envelope.as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], FORMAT_VERSION);
        assert_eq!(parts[1], TRANSPORT_LABEL);
        assert!(parts[2].is_string());
    }
}
