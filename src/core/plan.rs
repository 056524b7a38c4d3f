//! Purpose: Turn an incoming cursor (or none) into point-in-time read parameters.
//! Exports: `plan`, `QuerySpec`, `SortKey`.
//! Role: Pure planning layer between the token codec and the snapshot store.
//! Invariants: No side effects; output depends only on `cursor`, `max_results`, `now`.
//! Invariants: A fresh pass always re-pins `snapshot_time` to `now`; a sync timestamp
//! only ever becomes `updated_after`.
use crate::core::clock::Timestamp;
use crate::core::token::Continuation;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SortKey {
    /// Name ascending, id as the tie-breaker.
    #[default]
    NameThenId,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct QuerySpec {
    pub snapshot_time: Timestamp,
    pub updated_after: Option<Timestamp>,
    pub order_by: SortKey,
    pub limit: usize,
    pub offset: u64,
}

impl QuerySpec {
    /// Offset of the page after this one, given how many rows this one returned.
    pub fn next_offset(&self, returned: usize) -> u64 {
        self.offset.saturating_add(returned as u64)
    }
}

/// Expiry is checked by the caller before planning.
pub fn plan(cursor: Option<&Continuation>, max_results: usize, now: Timestamp) -> QuerySpec {
    let (snapshot_time, updated_after, offset) = match cursor {
        None => (now, None, 0),
        Some(Continuation::Sync(token)) => (now, Some(token.timestamp), 0),
        Some(Continuation::NextPage(token)) => {
            (token.snapshot_time, token.updated_after, token.offset)
        }
    };
    QuerySpec {
        snapshot_time,
        updated_after,
        order_by: SortKey::NameThenId,
        limit: max_results,
        offset,
    }
}
