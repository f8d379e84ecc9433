// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

/// Stable handle to a segment slot in its transaction's arena.
///
/// Handles stay valid after the transaction ends, which is what lets
/// in-flight asynchronous children record their stop time late.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Created but never started; pruned from the final tree.
    Pending,
    /// Started, no stop timestamp yet.
    Running,
    /// Terminal.
    Stopped,
}

/// One timed node in a transaction's tree.
///
/// Timestamps are stored as offsets from the owning transaction's start
/// instant. A child's interval is not constrained to lie inside its parent's:
/// asynchronous completions routinely stop long after the parent's nominal
/// end, and duration attribution accounts for that (see [`crate::duration`]).
#[derive(Debug)]
pub struct Segment {
    name: String,
    start: Option<Duration>,
    stop: Option<Duration>,
    children: Vec<SegmentId>,
    attributes: HashMap<String, Value>,
}

impl Segment {
    pub(crate) fn new(name: &str) -> Self {
        Segment {
            name: name.to_string(),
            start: None,
            stop: None,
            children: Vec::new(),
            attributes: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SegmentState {
        match (self.start, self.stop) {
            (None, _) => SegmentState::Pending,
            (Some(_), None) => SegmentState::Running,
            (Some(_), Some(_)) => SegmentState::Stopped,
        }
    }

    pub fn start_offset(&self) -> Option<Duration> {
        self.start
    }

    pub fn stop_offset(&self) -> Option<Duration> {
        self.stop
    }

    pub fn children(&self) -> &[SegmentId] {
        &self.children
    }

    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    pub fn set_attribute(&mut self, key: &str, value: Value) {
        self.attributes.insert(key.to_string(), value);
    }

    pub(crate) fn add_child(&mut self, id: SegmentId) {
        self.children.push(id);
    }

    pub(crate) fn retain_children(&mut self, keep: impl Fn(SegmentId) -> bool) {
        self.children.retain(|&id| keep(id));
    }

    /// Records the start timestamp. Starting twice is an instrumentation bug;
    /// the first timestamp wins.
    pub fn start_at(&mut self, offset: Duration) {
        if self.start.is_some() {
            warn!(segment = %self.name, "segment already started, ignoring start");
            return;
        }
        self.start = Some(offset);
    }

    /// Records the stop timestamp, idempotently. A second stop or a stop
    /// before any start is ignored; an already-set stop time never moves.
    /// A stop earlier than the start clamps to the start.
    pub fn stop_at(&mut self, offset: Duration) {
        let Some(start) = self.start else {
            warn!(segment = %self.name, "segment stopped before started, ignoring stop");
            return;
        };
        if self.stop.is_some() {
            warn!(segment = %self.name, "segment already stopped, ignoring stop");
            return;
        }
        self.stop = Some(offset.max(start));
    }

    /// The segment's `[start, stop)` interval, with `now` standing in for a
    /// missing stop. `None` while pending.
    pub(crate) fn interval(&self, now: Duration) -> Option<(Duration, Duration)> {
        let start = self.start?;
        let stop = self.stop.unwrap_or(now).max(start);
        Some((start, stop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_state_transitions() {
        let mut segment = Segment::new("db.query");
        assert_eq!(segment.state(), SegmentState::Pending);
        segment.start_at(ms(5));
        assert_eq!(segment.state(), SegmentState::Running);
        segment.stop_at(ms(12));
        assert_eq!(segment.state(), SegmentState::Stopped);
    }

    #[test]
    fn test_double_stop_keeps_first_timestamp() {
        let mut segment = Segment::new("db.query");
        segment.start_at(ms(0));
        segment.stop_at(ms(10));
        segment.stop_at(ms(50));
        assert_eq!(segment.stop_offset(), Some(ms(10)));
    }

    #[test]
    fn test_stop_before_start_is_ignored() {
        let mut segment = Segment::new("db.query");
        segment.stop_at(ms(10));
        assert_eq!(segment.state(), SegmentState::Pending);
        assert_eq!(segment.stop_offset(), None);
    }

    #[test]
    fn test_stop_clamps_to_start() {
        let mut segment = Segment::new("db.query");
        segment.start_at(ms(20));
        segment.stop_at(ms(5));
        assert_eq!(segment.stop_offset(), Some(ms(20)));
    }

    #[test]
    fn test_running_interval_uses_now() {
        let mut segment = Segment::new("db.query");
        segment.start_at(ms(10));
        assert_eq!(segment.interval(ms(45)), Some((ms(10), ms(45))));
    }
}
