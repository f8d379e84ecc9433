// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use serde_json::Value;

/// Keyed bucket map of telemetry payloads awaiting flush.
///
/// Keys are added lazily on first write. The whole map is consumed atomically
/// at flush time via [`PayloadAggregator::snapshot`], which is what couples
/// "read for serialization" and "reset to empty" into one step; the caller
/// holds the surrounding lock for the duration of that call.
#[derive(Debug, Default)]
pub struct PayloadAggregator {
    buckets: HashMap<String, Value>,
}

impl PayloadAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges new data into the bucket for `key`. Two array payloads
    /// concatenate (event lists accumulate across writes); anything else is a
    /// single-slot replacement (a newer trace payload supersedes the old
    /// one). Other keys are never touched.
    pub fn merge(&mut self, key: &str, data: Value) {
        match self.buckets.get_mut(key) {
            Some(Value::Array(existing)) if data.is_array() => {
                if let Value::Array(new_entries) = data {
                    existing.extend(new_entries);
                }
            }
            Some(existing) => *existing = data,
            None => {
                self.buckets.insert(key.to_string(), data);
            }
        }
    }

    /// Returns the full contents and resets the aggregator to empty in the
    /// same step.
    pub fn snapshot(&mut self) -> HashMap<String, Value> {
        std::mem::take(&mut self.buckets)
    }

    /// Puts a failed flush's snapshot back, merging any writes that arrived
    /// after the snapshot on top of it so nothing is lost or reordered.
    pub fn restore(&mut self, snapshot: HashMap<String, Value>) {
        let newer = std::mem::replace(&mut self.buckets, snapshot);
        for (key, value) in newer {
            self.merge(&key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.buckets.get(key)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
