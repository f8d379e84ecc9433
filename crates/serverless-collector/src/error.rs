// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

/// Errors surfaced by a transport sink. These are reported to the caller of
/// the flush operation and never propagate into the instrumented application.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to write telemetry to stdout: {0}")]
    Stdout(#[source] std::io::Error),

    #[error("failed to write telemetry to pipe {}: {source}", path.display())]
    Pipe {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors from the flush pipeline.
#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("failed to serialize telemetry payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to compress telemetry payload: {0}")]
    Compress(#[source] std::io::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
