//! Purpose: Choose the continuation handed back after a page has been read.
//! Exports: `decide`.
//! Role: Pure decision step between the snapshot read and the token codec.
//! Invariants: Exactly one continuation is produced; a full page means "maybe more".
//! Invariants: Every token expires `retention` after issuance.
use crate::core::clock::Timestamp;
use crate::core::plan::QuerySpec;
use crate::core::token::{Continuation, NextPageToken, SyncToken};
use std::time::Duration;

pub fn decide(
    returned: usize,
    spec: &QuerySpec,
    now: Timestamp,
    retention: Duration,
) -> Continuation {
    let valid_until = now.saturating_add(retention);
    if returned == spec.limit {
        Continuation::NextPage(NextPageToken {
            snapshot_time: spec.snapshot_time,
            updated_after: spec.updated_after,
            offset: spec.next_offset(returned),
            valid_until,
        })
    } else {
        Continuation::Sync(SyncToken {
            timestamp: spec.snapshot_time,
            valid_until,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::decide;
    use crate::core::clock::Timestamp;
    use crate::core::plan::{QuerySpec, plan};
    use crate::core::token::{Continuation, NextPageToken, SyncToken};
    use std::time::Duration;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn chain_spec(offset: u64) -> QuerySpec {
        let cursor = Continuation::NextPage(NextPageToken {
            snapshot_time: Timestamp::from_secs(100),
            updated_after: Some(Timestamp::from_secs(50)),
            offset,
            valid_until: Timestamp::MAX,
        });
        plan(Some(&cursor), 10, Timestamp::from_secs(200))
    }

    #[test]
    fn full_page_emits_next_page_carrying_pass_state() {
        let now = Timestamp::from_secs(200);
        let continuation = decide(10, &chain_spec(20), now, DAY);
        assert_eq!(
            continuation,
            Continuation::NextPage(NextPageToken {
                snapshot_time: Timestamp::from_secs(100),
                updated_after: Some(Timestamp::from_secs(50)),
                offset: 30,
                valid_until: Timestamp::from_secs(200 + 86_400),
            })
        );
    }

    #[test]
    fn short_page_emits_sync_at_snapshot_time() {
        let now = Timestamp::from_secs(200);
        let continuation = decide(3, &chain_spec(20), now, DAY);
        assert_eq!(
            continuation,
            Continuation::Sync(SyncToken {
                timestamp: Timestamp::from_secs(100),
                valid_until: Timestamp::from_secs(200 + 86_400),
            })
        );
    }

    #[test]
    fn empty_page_emits_sync() {
        let spec = plan(None, 10, Timestamp::from_secs(7));
        let continuation = decide(0, &spec, Timestamp::from_secs(8), DAY);
        assert!(matches!(
            continuation,
            Continuation::Sync(SyncToken { timestamp, .. }) if timestamp == Timestamp::from_secs(7)
        ));
    }

    #[test]
    fn offsets_advance_by_page_size_along_a_chain() {
        let now = Timestamp::from_secs(200);
        let mut spec = plan(None, 4, now);
        let mut offsets = Vec::new();
        for _ in 0..3 {
            let Continuation::NextPage(token) = decide(4, &spec, now, DAY) else {
                panic!("expected next page");
            };
            offsets.push(token.offset);
            spec = plan(Some(&Continuation::NextPage(token)), 4, now);
        }
        assert_eq!(offsets, [4, 8, 12]);
    }
}
