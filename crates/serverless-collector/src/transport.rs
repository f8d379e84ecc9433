// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::config::Config;
use crate::error::TransportError;

/// Destination for a finished, already-encoded telemetry record.
///
/// An HTTP intake client is just another implementation of this trait,
/// provided from outside; the core ships the two out-of-band sinks a
/// serverless runtime needs.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Delivers the record without yielding back to the scheduler. Used when
    /// the process may terminate as soon as the call returns.
    fn deliver_sync(&self, record: &str) -> Result<(), TransportError>;

    /// Asynchronous delivery; may suspend during the write.
    async fn deliver(&self, record: &str) -> Result<(), TransportError>;
}

/// Writes each record as a single newline-terminated line on stdout, where an
/// external forwarder tails it out of the host's log stream.
pub struct StdoutTransport;

#[async_trait]
impl Transport for StdoutTransport {
    fn name(&self) -> &'static str {
        "stdout"
    }

    fn deliver_sync(&self, record: &str) -> Result<(), TransportError> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{record}")
            .and_then(|()| stdout.flush())
            .map_err(TransportError::Stdout)
    }

    async fn deliver(&self, record: &str) -> Result<(), TransportError> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(record.as_bytes())
            .await
            .map_err(TransportError::Stdout)?;
        stdout.write_all(b"\n").await.map_err(TransportError::Stdout)?;
        stdout.flush().await.map_err(TransportError::Stdout)
    }
}

/// Writes each record as the full content of a file-system pipe. Write errors
/// surface to the flush caller instead of leaking onto the host's stdout.
pub struct PipeTransport {
    path: PathBuf,
}

impl PipeTransport {
    pub fn new(path: PathBuf) -> Self {
        PipeTransport { path }
    }

    fn pipe_error(&self, source: std::io::Error) -> TransportError {
        TransportError::Pipe {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl Transport for PipeTransport {
    fn name(&self) -> &'static str {
        "pipe"
    }

    fn deliver_sync(&self, record: &str) -> Result<(), TransportError> {
        std::fs::write(&self.path, record).map_err(|source| self.pipe_error(source))
    }

    async fn deliver(&self, record: &str) -> Result<(), TransportError> {
        tokio::fs::write(&self.path, record)
            .await
            .map_err(|source| self.pipe_error(source))
    }
}

/// Sink selection is a pure function of configuration, resolved once when the
/// flusher is built.
pub fn from_config(config: &Config) -> Arc<dyn Transport> {
    match &config.pipe_path {
        Some(path) => Arc::new(PipeTransport::new(path.clone())),
        None => Arc::new(StdoutTransport),
    }
}
