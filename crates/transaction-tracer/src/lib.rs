// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transaction and segment timing core for the serverless APM agent.
//!
//! A [`Transaction`] owns a tree of timed [`Segment`]s rooted at one entry
//! point. Instrumentation creates segments under the ambient segment tracked
//! by a [`ContextTracker`], which propagates "which segment is active" across
//! asynchronous continuations without parameter threading. Once a transaction
//! ends, total and exclusive durations are derived for every node, with
//! overlapping or late-finishing children attributed by interval union rather
//! than naive subtraction.

pub mod context;
pub mod duration;
pub mod segment;
pub mod transaction;

pub use context::{ContextTracker, SegmentHandle, SharedTransaction, TraceContext};
pub use segment::{Segment, SegmentId, SegmentState};
pub use transaction::Transaction;
