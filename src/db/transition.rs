//! Tracks when the primary signal last changed.
//!
//! The comparison runs inside the upsert statement against the pre-update row,
//! so two concurrent updates for one ticker cannot both miss (or both claim) a
//! transition. The statement also records its own verdict in
//! `last_merge_changed_signal`, which comes back through `RETURNING`; this
//! module owns both SQL fragments and interprets the result.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{IndicatorRecord, IndicatorUpdate};

/// `ON CONFLICT ... DO UPDATE` assignment for `signal_changed_at`.
///
/// SQLite evaluates every SET expression against the old row, so
/// `securities.signal` is the previously stored value even though the same
/// statement also assigns `signal`. `IS` treats NULLs as comparable.
pub const SIGNAL_CHANGED_AT_ASSIGNMENT: &str = "signal_changed_at = CASE \
     WHEN securities.signal IS excluded.signal THEN securities.signal_changed_at \
     ELSE excluded.signal_changed_at END";

/// Column holding the verdict of the most recent signal-carrying merge.
pub const CHANGED_FLAG_COLUMN: &str = "last_merge_changed_signal";

/// `ON CONFLICT ... DO UPDATE` assignment for the verdict column. A fresh
/// insert binds `true` directly, since a new ticker always counts as a change.
pub const CHANGED_FLAG_ASSIGNMENT: &str = "last_merge_changed_signal = CASE \
     WHEN securities.signal IS excluded.signal THEN 0 ELSE 1 END";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SignalTransition {
    /// The primary signal differs from the stored one (or the ticker is new).
    Changed { at: DateTime<Utc> },
    /// The primary signal was supplied and matched the stored value.
    Unchanged,
    /// The update did not carry the primary signal.
    NotObserved,
}

impl SignalTransition {
    pub fn changed(&self) -> bool {
        matches!(self, SignalTransition::Changed { .. })
    }
}

/// Classify a merge from the row the upsert returned and the verdict flag
/// that same statement wrote.
pub fn observe(update: &IndicatorUpdate, record: &IndicatorRecord, changed: bool) -> SignalTransition {
    if !update.carries_signal() {
        return SignalTransition::NotObserved;
    }
    match record.signal_changed_at {
        Some(at) if changed => SignalTransition::Changed { at },
        _ => SignalTransition::Unchanged,
    }
}
