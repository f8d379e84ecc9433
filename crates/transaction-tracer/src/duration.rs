// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Interval-union arithmetic for duration attribution.
//!
//! Exclusive duration of a segment is its total duration minus the portion of
//! its own interval covered by children. Children may overlap each other and
//! may outlive the parent, so the covered portion is the union of the child
//! intervals clipped to the parent's interval, never the sum.

use std::time::Duration;

/// Returns the total length of the parent interval covered by the given child
/// intervals.
///
/// Each child interval is clipped to `parent` before merging, so children that
/// start after the parent stopped contribute nothing here (their own duration
/// is still reported in full on their own node). Overlapping children are
/// merged so no portion of the parent interval is counted twice.
pub fn clipped_union(parent: (Duration, Duration), intervals: &[(Duration, Duration)]) -> Duration {
    let (lo, hi) = parent;
    let mut clipped: Vec<(Duration, Duration)> = intervals
        .iter()
        .map(|&(start, stop)| (start.max(lo), stop.min(hi)))
        .filter(|&(start, stop)| start < stop)
        .collect();
    clipped.sort_unstable_by_key(|&(start, _)| start);

    let mut covered = Duration::ZERO;
    let mut open: Option<(Duration, Duration)> = None;
    for (start, stop) in clipped {
        match open {
            Some((open_start, open_stop)) if start <= open_stop => {
                open = Some((open_start, open_stop.max(stop)));
            }
            Some((open_start, open_stop)) => {
                covered += open_stop - open_start;
                open = Some((start, stop));
            }
            None => open = Some((start, stop)),
        }
    }
    if let Some((open_start, open_stop)) = open {
        covered += open_stop - open_start;
    }
    covered
}
