//! Splits a sync window into contiguous sub-windows, one per extraction worker.

use chrono::{DateTime, Utc};

use crate::error::{Result, SyncError};
use crate::models::TimeRange;

/// Divide `[start, end)` into exactly `n` gapless, non-overlapping ranges of
/// equal duration.
///
/// Boundary `i` is computed as `start + delta * i` rather than by repeated
/// addition, and the last range ends exactly at `end`, so rounding of the
/// nanosecond division never opens a gap at the tail.
pub fn partition(start: DateTime<Utc>, end: DateTime<Utc>, n: usize) -> Result<Vec<TimeRange>> {
    let invalid = || SyncError::InvalidRange {
        start,
        end,
        partitions: n,
    };
    if start >= end || n < 1 {
        return Err(invalid());
    }
    let parts = i32::try_from(n).map_err(|_| invalid())?;
    let delta = (end - start) / parts;

    let mut ranges = Vec::with_capacity(n);
    let mut lower = start;
    for i in 1..=parts {
        let upper = if i == parts { end } else { start + delta * i };
        // A window shorter than n nanoseconds would produce empty ranges.
        if upper <= lower {
            return Err(invalid());
        }
        ranges.push(TimeRange {
            start: lower,
            end: upper,
        });
        lower = upper;
    }
    Ok(ranges)
}
