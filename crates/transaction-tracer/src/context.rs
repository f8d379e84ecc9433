// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ambient-segment propagation across asynchronous continuations.
//!
//! Instead of a global thread-local, the active segment travels as an
//! explicit capability value: a [`TraceContext`] captured where a continuation
//! is scheduled and restored around its execution via [`ContextTracker::bind`]
//! or [`ContextTracker::run_in_context`]. Saving and restoring the previous
//! ambient context around each invocation keeps sibling asynchronous chains
//! from cross-contaminating each other's parentage.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::debug;

use crate::segment::SegmentId;
use crate::transaction::Transaction;

pub type SharedTransaction = Arc<Mutex<Transaction>>;

/// A captured "where new segments attach" value: one transaction plus the
/// segment that is ambient within it.
#[derive(Clone)]
pub struct TraceContext {
    transaction: SharedTransaction,
    segment: SegmentId,
}

impl TraceContext {
    pub fn new(transaction: SharedTransaction, segment: SegmentId) -> Self {
        TraceContext {
            transaction,
            segment,
        }
    }

    pub fn transaction(&self) -> &SharedTransaction {
        &self.transaction
    }

    pub fn segment(&self) -> SegmentId {
        self.segment
    }
}

/// Tracks the currently ambient [`TraceContext`] under the single-threaded
/// cooperative scheduling model: the ambient slot is only mutated around the
/// synchronous execution of a closure, and suspension points carry context by
/// value through [`ContextTracker::bind`] and [`SegmentHandle::context`].
#[derive(Clone, Default)]
pub struct ContextTracker {
    current: Arc<Mutex<Option<TraceContext>>>,
}

impl ContextTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The ambient context, if any chain established one.
    pub fn current(&self) -> Option<TraceContext> {
        #[allow(clippy::expect_used)]
        let current = self.current.lock().expect("lock poisoned");
        current.clone()
    }

    /// Runs `work` with `context` ambient, restoring whatever was ambient
    /// before once `work` finishes. Re-entrant. The restore also happens if
    /// `work` unwinds: the monitored application is free to panic, and a dead
    /// chain's context must not stay ambient and misparent later segments.
    pub fn run_in_context<R>(&self, context: TraceContext, work: impl FnOnce() -> R) -> R {
        let previous = {
            #[allow(clippy::expect_used)]
            let mut current = self.current.lock().expect("lock poisoned");
            current.replace(context)
        };
        let _restore = RestoreGuard {
            slot: Arc::clone(&self.current),
            previous,
        };
        work()
    }

    /// Runs `work` with the transaction's root segment ambient.
    pub fn run_in_transaction<R>(
        &self,
        transaction: &SharedTransaction,
        work: impl FnOnce() -> R,
    ) -> R {
        let root = {
            #[allow(clippy::expect_used)]
            let transaction = transaction.lock().expect("lock poisoned");
            transaction.root()
        };
        self.run_in_context(TraceContext::new(Arc::clone(transaction), root), work)
    }

    /// Wraps a continuation so that whenever it later runs (callback, spawned
    /// task, timer fire) it executes under `context`. This is the
    /// continuation-wrapping point every scheduled callback goes through.
    pub fn bind<R>(
        &self,
        context: TraceContext,
        work: impl FnOnce() -> R + Send + 'static,
    ) -> impl FnOnce() -> R + Send + 'static {
        let tracker = self.clone();
        move || tracker.run_in_context(context, work)
    }

    /// Creates and starts a segment under the ambient segment. With no
    /// ambient context the call is dropped: a segment never exists without an
    /// owning transaction. An ended transaction still accepts the child (its
    /// tree stays mutable for in-flight asynchronous work), but nothing here
    /// starts a new transaction.
    pub fn start_segment(&self, name: &str) -> Option<SegmentHandle> {
        let Some(context) = self.current() else {
            debug!(segment = name, "no ambient trace context, dropping segment");
            return None;
        };
        let id = {
            #[allow(clippy::expect_used)]
            let mut transaction = context.transaction().lock().expect("lock poisoned");
            transaction.start_segment(context.segment(), name)
        }?;
        Some(SegmentHandle {
            transaction: Arc::clone(context.transaction()),
            id,
        })
    }
}

// Writes the saved context back when dropped, on both normal return and
// unwind.
struct RestoreGuard {
    slot: Arc<Mutex<Option<TraceContext>>>,
    previous: Option<TraceContext>,
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        if let Ok(mut current) = self.slot.lock() {
            *current = self.previous.take();
        }
    }
}

/// Handle returned to instrumentation for a started segment.
#[derive(Clone)]
pub struct SegmentHandle {
    transaction: SharedTransaction,
    id: SegmentId,
}

impl SegmentHandle {
    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn transaction(&self) -> &SharedTransaction {
        &self.transaction
    }

    /// Stops the segment at the current offset. Idempotent; a double end is
    /// tolerated without moving the recorded stop time.
    pub fn end(&self) {
        #[allow(clippy::expect_used)]
        let mut transaction = self.transaction.lock().expect("lock poisoned");
        transaction.stop_segment(self.id);
    }

    /// Context for nesting continuations under this segment.
    pub fn context(&self) -> TraceContext {
        TraceContext::new(Arc::clone(&self.transaction), self.id)
    }

    pub fn set_attribute(&self, key: &str, value: Value) {
        #[allow(clippy::expect_used)]
        let mut transaction = self.transaction.lock().expect("lock poisoned");
        if let Some(segment) = transaction.segment_mut(self.id) {
            segment.set_attribute(key, value);
        }
    }
}
