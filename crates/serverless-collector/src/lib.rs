// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Telemetry collection and out-of-band flushing for constrained serverless
//! environments.
//!
//! Instead of posting each telemetry payload to an HTTP intake, the collector
//! accumulates every payload type into a single keyed bucket map and, on
//! demand (or synchronously right before the process exits), flushes the
//! whole accumulation as one compressed, base64-encoded record through a
//! [`transport::Transport`] sink: the process's stdout by default, or a named
//! pipe when `DD_SERVERLESS_PIPE_PATH` is set. An external forwarder picks
//! the record up out of band and relays it to the backend.

pub mod collector;
pub mod config;
pub mod error;
pub mod flusher;
pub mod payload_aggregator;
pub mod transport;

pub use collector::ServerlessCollector;
pub use config::Config;
pub use error::{FlushError, TransportError};
pub use flusher::{Flusher, FORMAT_VERSION, TRANSPORT_LABEL};
pub use payload_aggregator::PayloadAggregator;
