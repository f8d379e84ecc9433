// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::duration::clipped_union;
use crate::segment::{Segment, SegmentId};

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// One logical unit of work (a request, an invocation) owning a tree of
/// segments.
///
/// Segments live in an arena indexed by [`SegmentId`], with the root at slot
/// zero. The arena stays mutable after [`Transaction::end`]: asynchronous
/// children created before the end may still stop late, and their recorded
/// interval still feeds duration attribution. Ending never reverses; nothing
/// resurrects an ended transaction.
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    started_at: Instant,
    segments: Vec<Segment>,
    ended: bool,
    end_offset: Option<Duration>,
}

impl Transaction {
    /// Begins a new transaction with a started root segment.
    pub fn begin(name: &str) -> Self {
        let mut root = Segment::new(name);
        root.start_at(Duration::ZERO);
        Transaction {
            id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
            started_at: Instant::now(),
            segments: vec![root],
            ended: false,
            end_offset: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn root(&self) -> SegmentId {
        SegmentId(0)
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// Monotonic offset from the transaction's start instant.
    pub fn now_offset(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(id.0)
    }

    pub fn segment_mut(&mut self, id: SegmentId) -> Option<&mut Segment> {
        self.segments.get_mut(id.0)
    }

    /// Creates a pending child segment under `parent`. Returns `None` for an
    /// unknown parent so no segment ever exists without an owner in the tree.
    pub fn add_segment(&mut self, parent: SegmentId, name: &str) -> Option<SegmentId> {
        self.segments.get(parent.0)?;
        let id = SegmentId(self.segments.len());
        self.segments.push(Segment::new(name));
        self.segments[parent.0].add_child(id);
        Some(id)
    }

    /// Creates and starts a child segment under `parent` at the current
    /// offset. Creation is always ordered after the parent's creation.
    pub fn start_segment(&mut self, parent: SegmentId, name: &str) -> Option<SegmentId> {
        let id = self.add_segment(parent, name)?;
        let now = self.now_offset();
        self.segments[id.0].start_at(now);
        Some(id)
    }

    /// Stops a segment at the current offset. No-op for unknown ids and for
    /// already-stopped segments.
    pub fn stop_segment(&mut self, id: SegmentId) {
        let now = self.now_offset();
        if let Some(segment) = self.segments.get_mut(id.0) {
            segment.stop_at(now);
        }
    }

    /// Marks the transaction ended: stops a still-running root at the end
    /// offset and prunes segments that never started from the tree.
    /// Idempotent. Still-running non-root segments stay open-ended until
    /// their own late stop arrives.
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        let now = self.now_offset();
        self.ended = true;
        self.end_offset = Some(now);
        // A root stopped by its own instrumentation keeps its stop offset.
        if self.segments[0].stop_offset().is_none() {
            self.segments[0].stop_at(now);
        }
        self.prune_unstarted();
    }

    pub fn end_offset(&self) -> Option<Duration> {
        self.end_offset
    }

    // An unstarted segment means the instrumentation path that created it was
    // skipped; it must not appear in the committed trace.
    fn prune_unstarted(&mut self) {
        let started: Vec<bool> = self
            .segments
            .iter()
            .map(|segment| segment.start_offset().is_some())
            .collect();
        for segment in &mut self.segments {
            segment.retain_children(|id| started[id.0]);
        }
    }

    /// Total duration: stop − start, or now − start while still running.
    pub fn duration(&self, id: SegmentId) -> Option<Duration> {
        let (start, stop) = self.segment(id)?.interval(self.now_offset())?;
        Some(stop - start)
    }

    /// Exclusive duration: total minus the union of child intervals clipped
    /// to this segment's own interval, saturating at zero.
    pub fn exclusive_duration(&self, id: SegmentId) -> Option<Duration> {
        self.exclusive_duration_at(id, self.now_offset())
    }

    fn exclusive_duration_at(&self, id: SegmentId, now: Duration) -> Option<Duration> {
        let segment = self.segment(id)?;
        let parent = segment.interval(now)?;
        let child_intervals: Vec<(Duration, Duration)> = segment
            .children()
            .iter()
            .filter_map(|&child| self.segment(child)?.interval(now))
            .collect();
        let covered = clipped_union(parent, &child_intervals);
        Some((parent.1 - parent.0).saturating_sub(covered))
    }

    /// Serializes the committed trace tree, one node per started segment with
    /// total and exclusive millisecond durations. This is the record handed
    /// to the collector as transaction trace data.
    pub fn trace(&self) -> Value {
        let now = self.now_offset();
        json!({
            "transaction_id": self.id,
            "duration_ms": self
                .duration(self.root())
                .map(|total| total.as_millis() as u64),
            "root": self.trace_node(self.root(), now),
        })
    }

    fn trace_node(&self, id: SegmentId, now: Duration) -> Option<Value> {
        let segment = self.segment(id)?;
        let (start, stop) = segment.interval(now)?;
        let children: Vec<Value> = segment
            .children()
            .iter()
            .filter_map(|&child| self.trace_node(child, now))
            .collect();
        let exclusive = self.exclusive_duration_at(id, now).unwrap_or(Duration::ZERO);
        Some(json!({
            "name": segment.name(),
            "start_ms": start.as_millis() as u64,
            "duration_ms": (stop - start).as_millis() as u64,
            "exclusive_ms": exclusive.as_millis() as u64,
            "attributes": segment.attributes(),
            "children": children,
        }))
    }
}
