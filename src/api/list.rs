//! Purpose: Single entry point for one page of the list protocol.
//! Exports: `list`, `ListQuery`, `ListOptions`, `ListResponse`.
//! Role: Decode cursor -> plan snapshot read -> read -> decide continuation -> encode.
//! Invariants: A successful response carries exactly one continuation token.
//! Invariants: When both tokens are supplied the sync token wins.
//! Invariants: Expired tokens are rejected before any read; the store rejects purged snapshots.
use crate::core::clock::{Clock, Timestamp};
use crate::core::decide::decide;
use crate::core::error::{Error, ErrorKind};
use crate::core::plan::plan;
use crate::core::table::{Record, SnapshotStore};
use crate::core::token::{Continuation, NextPageToken, SyncToken, TokenKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_MAX_RESULTS: usize = 10;
pub const DEFAULT_MAX_RESULTS_CAP: usize = 1000;

/// Raw query parameters as received from the transport.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct ListQuery {
    pub sync_token: Option<String>,
    pub next_page_token: Option<String>,
    pub max_results: Option<String>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sync_token(mut self, token: impl Into<String>) -> Self {
        self.sync_token = Some(token.into());
        self
    }

    pub fn with_next_page_token(mut self, token: impl Into<String>) -> Self {
        self.next_page_token = Some(token.into());
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results.to_string());
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ListOptions {
    /// Token lifetime; keep equal to the store's history retention.
    pub retention: Duration,
    pub default_max_results: usize,
    pub max_results_cap: usize,
}

impl ListOptions {
    pub fn new() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            default_max_results: DEFAULT_MAX_RESULTS,
            max_results_cap: DEFAULT_MAX_RESULTS_CAP,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_max_results_cap(mut self, cap: usize) -> Self {
        self.max_results_cap = cap;
        self
    }
}

impl Default for ListOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ListResponse {
    pub records: Vec<Record>,
    pub next_page_token: Option<String>,
    pub sync_token: Option<String>,
}

impl ListResponse {
    pub fn continuation_kind(&self) -> Option<TokenKind> {
        match (&self.next_page_token, &self.sync_token) {
            (Some(_), None) => Some(TokenKind::NextPage),
            (None, Some(_)) => Some(TokenKind::Sync),
            _ => None,
        }
    }
}

pub fn list(
    store: &dyn SnapshotStore,
    clock: &dyn Clock,
    options: &ListOptions,
    query: &ListQuery,
) -> Result<ListResponse, Error> {
    let cursor = decode_cursor(query)?;
    let now = clock.now();
    if let Some(cursor) = &cursor {
        check_not_expired(cursor, now)?;
    }
    let max_results = resolve_max_results(query.max_results.as_deref(), options)?;

    let spec = plan(cursor.as_ref(), max_results, now);
    let records = store.read_at(&spec).inspect_err(|err| {
        if err.kind() == ErrorKind::ExpiredToken {
            tracing::warn!(snapshot = %spec.snapshot_time, "snapshot no longer retained");
        }
    })?;
    let continuation = decide(records.len(), &spec, clock.now(), options.retention);
    tracing::debug!(
        snapshot = %spec.snapshot_time,
        offset = spec.offset,
        returned = records.len(),
        limit = spec.limit,
        continuation = continuation.kind().as_str(),
        "listed page"
    );

    let token = continuation.encode()?;
    let (next_page_token, sync_token) = match continuation {
        Continuation::NextPage(_) => (Some(token), None),
        Continuation::Sync(_) => (None, Some(token)),
    };
    Ok(ListResponse {
        records,
        next_page_token,
        sync_token,
    })
}

fn decode_cursor(query: &ListQuery) -> Result<Option<Continuation>, Error> {
    if let Some(text) = non_empty(query.sync_token.as_deref()) {
        let token = SyncToken::decode(text).map_err(|err| log_rejected(TokenKind::Sync, err))?;
        return Ok(Some(Continuation::Sync(token)));
    }
    if let Some(text) = non_empty(query.next_page_token.as_deref()) {
        let token = NextPageToken::decode(text)
            .map_err(|err| log_rejected(TokenKind::NextPage, err))?;
        return Ok(Some(Continuation::NextPage(token)));
    }
    Ok(None)
}

fn check_not_expired(cursor: &Continuation, now: Timestamp) -> Result<(), Error> {
    if !cursor.is_expired(now) {
        return Ok(());
    }
    let kind = cursor.kind();
    tracing::warn!(kind = kind.as_str(), valid_until = %cursor.valid_until(), "expired token");
    let label = match kind {
        TokenKind::NextPage => "next page",
        TokenKind::Sync => "sync",
    };
    Err(Error::new(ErrorKind::ExpiredToken)
        .with_message(format!("{label} token expired"))
        .with_hint("Restart the listing without a token."))
}

fn resolve_max_results(raw: Option<&str>, options: &ListOptions) -> Result<usize, Error> {
    let Some(raw) = non_empty(raw) else {
        return Ok(options.default_max_results.clamp(1, options.max_results_cap.max(1)));
    };
    let cap = options.max_results_cap.max(1);
    let Ok(requested) = raw.trim().parse::<i64>() else {
        tracing::debug!(raw, "ignoring unparseable max_results");
        return Ok(options.default_max_results.clamp(1, cap));
    };
    if requested <= 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("max_results must be positive, got {requested}"))
            .with_hint("Omit max_results or pass a value of at least 1."));
    }
    let requested = usize::try_from(requested).unwrap_or(usize::MAX);
    if requested > cap {
        tracing::debug!(requested, cap, "clamping max_results");
    }
    Ok(requested.min(cap))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|text| !text.is_empty())
}

fn log_rejected(kind: TokenKind, err: Error) -> Error {
    tracing::warn!(kind = kind.as_str(), error = %err, "rejected malformed token");
    err
}

#[cfg(test)]
mod tests {
    use super::{ListOptions, ListQuery, ListResponse, list};
    use crate::core::clock::{Clock, ManualClock, Timestamp};
    use crate::core::error::{Error, ErrorKind};
    use crate::core::plan::QuerySpec;
    use crate::core::table::{Record, SnapshotStore, VersionedTable};
    use crate::core::token::{Continuation, NextPageToken, SyncToken, TokenKind};
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        clock: ManualClock,
        table: VersionedTable,
        options: ListOptions,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = ManualClock::new(Timestamp::from_secs(1_700_000_000));
            let table = VersionedTable::new(Arc::new(clock.clone()));
            Self {
                clock,
                table,
                options: ListOptions::new(),
            }
        }

        fn seed(&self, count: usize) {
            for i in 0..count {
                self.table
                    .insert(format!("user-{i:02}"), format!("user{i}@example.com"))
                    .expect("insert");
            }
            self.tick();
        }

        fn tick(&self) {
            self.clock.advance(Duration::from_millis(5));
        }

        fn list(&self, query: ListQuery) -> Result<ListResponse, Error> {
            list(&self.table, &self.clock, &self.options, &query)
        }
    }

    fn names(response: &ListResponse) -> Vec<String> {
        response.records.iter().map(|r| r.name.clone()).collect()
    }

    fn exactly_one_token(response: &ListResponse) -> TokenKind {
        response
            .continuation_kind()
            .expect("exactly one continuation token")
    }

    #[test]
    fn exact_full_page_then_sync_then_empty_incremental() {
        let fx = Fixture::new();
        fx.seed(10);

        let first = fx.list(ListQuery::new()).expect("first");
        assert_eq!(first.records.len(), 10);
        assert_eq!(exactly_one_token(&first), TokenKind::NextPage);
        fx.tick();

        let next = first.next_page_token.clone().expect("next");
        let second = fx
            .list(ListQuery::new().with_next_page_token(next))
            .expect("second");
        assert!(second.records.is_empty());
        assert_eq!(exactly_one_token(&second), TokenKind::Sync);
        let first_sync = SyncToken::decode(second.sync_token.as_deref().expect("sync"))
            .expect("decode");
        fx.tick();

        let third = fx
            .list(ListQuery::new().with_sync_token(second.sync_token.clone().expect("sync")))
            .expect("third");
        assert!(third.records.is_empty());
        assert_eq!(exactly_one_token(&third), TokenKind::Sync);
        let second_sync = SyncToken::decode(third.sync_token.as_deref().expect("sync"))
            .expect("decode");
        assert!(second_sync.timestamp > first_sync.timestamp);
    }

    #[test]
    fn incremental_pass_returns_only_updated_record() {
        let fx = Fixture::new();
        fx.seed(5);
        let full = fx.list(ListQuery::new()).expect("full");
        assert_eq!(full.records.len(), 5);
        let sync = full.sync_token.clone().expect("sync");
        fx.tick();

        let target = full.records[2].id;
        fx.table
            .update(target, None, Some("changed@example.com".to_string()))
            .expect("update");
        fx.tick();

        let delta = fx.list(ListQuery::new().with_sync_token(sync)).expect("delta");
        assert_eq!(delta.records.len(), 1);
        assert_eq!(delta.records[0].id, target);
        assert_eq!(delta.records[0].email, "changed@example.com");
        assert_eq!(exactly_one_token(&delta), TokenKind::Sync);
    }

    #[test]
    fn inserts_mid_chain_do_not_disturb_pinned_pages() {
        let fx = Fixture::new();
        fx.seed(6);
        let query = ListQuery::new().with_max_results(2);
        let mut seen = Vec::new();
        let mut offsets = Vec::new();

        let mut response = fx.list(query.clone()).expect("page");
        loop {
            seen.extend(names(&response));
            fx.tick();
            fx.table.insert("aaa-intruder", "x@example.com").expect("insert");
            fx.tick();
            let Some(next) = response.next_page_token.clone() else {
                break;
            };
            offsets.push(NextPageToken::decode(&next).expect("decode").offset);
            response = fx
                .list(query.clone().with_next_page_token(next))
                .expect("page");
        }

        let expected: Vec<String> = (0..6).map(|i| format!("user-{i:02}")).collect();
        assert_eq!(seen, expected);
        assert_eq!(offsets, [2, 4, 6]);
    }

    #[test]
    fn sync_token_wins_over_next_page_token() {
        let fx = Fixture::new();
        fx.seed(3);
        let full = fx.list(ListQuery::new()).expect("full");
        let sync = full.sync_token.clone().expect("sync");
        fx.tick();

        let response = fx
            .list(
                ListQuery::new()
                    .with_sync_token(sync)
                    .with_next_page_token("garbage"),
            )
            .expect("list");
        assert!(response.records.is_empty());
        assert_eq!(exactly_one_token(&response), TokenKind::Sync);
    }

    #[test]
    fn empty_parameters_are_ignored() {
        let fx = Fixture::new();
        fx.seed(2);
        let query = ListQuery {
            sync_token: Some(String::new()),
            next_page_token: Some(String::new()),
            max_results: Some(String::new()),
        };
        let response = fx.list(query).expect("list");
        assert_eq!(response.records.len(), 2);
    }

    #[test]
    fn malformed_token_is_rejected_without_records() {
        let fx = Fixture::new();
        fx.seed(2);
        let err = fx
            .list(ListQuery::new().with_next_page_token("!!not-a-token!!"))
            .expect_err("err");
        assert_eq!(err.kind(), ErrorKind::MalformedToken);
        let err = fx
            .list(ListQuery::new().with_sync_token("e30"))
            .expect_err("err");
        assert_eq!(err.kind(), ErrorKind::MalformedToken);
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let fx = Fixture::new();
        fx.seed(1);
        let now = fx.clock.now();
        let stale = Continuation::NextPage(NextPageToken {
            snapshot_time: now,
            updated_after: None,
            offset: 0,
            valid_until: now.saturating_sub(Duration::from_micros(1)),
        })
        .encode()
        .expect("encode");
        let err = fx
            .list(ListQuery::new().with_next_page_token(stale))
            .expect_err("err");
        assert_eq!(err.kind(), ErrorKind::ExpiredToken);

        let stale_sync = SyncToken {
            timestamp: now,
            valid_until: Timestamp::from_secs(0),
        }
        .encode()
        .expect("encode");
        let err = fx
            .list(ListQuery::new().with_sync_token(stale_sync))
            .expect_err("err");
        assert_eq!(err.kind(), ErrorKind::ExpiredToken);
    }

    #[test]
    fn tokens_expire_after_retention_window() {
        let mut fx = Fixture::new();
        fx.options = ListOptions::new().with_retention(Duration::from_secs(3_600));
        fx.seed(1);
        let issued_at = fx.clock.now();
        let full = fx.list(ListQuery::new()).expect("full");
        let sync = full.sync_token.clone().expect("sync");
        let decoded = SyncToken::decode(&sync).expect("decode");
        assert_eq!(
            decoded.valid_until,
            issued_at.saturating_add(Duration::from_secs(3_600))
        );

        fx.clock.set(decoded.valid_until);
        fx.list(ListQuery::new().with_sync_token(sync.clone()))
            .expect("still valid at the boundary");
        fx.clock
            .set(decoded.valid_until.saturating_add(Duration::from_micros(1)));
        let err = fx
            .list(ListQuery::new().with_sync_token(sync))
            .expect_err("err");
        assert_eq!(err.kind(), ErrorKind::ExpiredToken);
    }

    #[test]
    fn purged_snapshot_is_rejected_even_if_token_is_valid() {
        let fx = Fixture::new();
        fx.seed(4);
        let page = fx
            .list(ListQuery::new().with_max_results(2))
            .expect("page");
        let next = page.next_page_token.clone().expect("next");
        fx.tick();
        fx.table.purge_history(fx.clock.now()).expect("purge");
        assert!(fx.table.retained_since() > Timestamp::MIN);

        let err = fx
            .list(ListQuery::new().with_next_page_token(next))
            .expect_err("err");
        assert_eq!(err.kind(), ErrorKind::ExpiredToken);
    }

    /// Runs a history purge right before every read, as the background purge task may.
    struct PurgeBeforeRead<'a> {
        table: &'a VersionedTable,
        clock: &'a ManualClock,
    }

    impl SnapshotStore for PurgeBeforeRead<'_> {
        fn read_at(&self, spec: &QuerySpec) -> Result<Vec<Record>, Error> {
            self.table.purge_history(self.clock.now())?;
            self.table.read_at(spec)
        }
    }

    #[test]
    fn purge_landing_mid_request_does_not_skip_rows() {
        let fx = Fixture::new();
        for name in ["a", "b", "c"] {
            fx.table
                .insert(name, format!("{name}@example.com"))
                .expect("insert");
        }
        fx.tick();
        let first = fx
            .list(ListQuery::new().with_max_results(1))
            .expect("first");
        assert_eq!(names(&first), ["a"]);
        fx.tick();

        let b = first.records[0].id + 1;
        fx.table
            .update(b, Some("zzz".to_string()), None)
            .expect("rename");
        fx.tick();

        let racing = PurgeBeforeRead {
            table: &fx.table,
            clock: &fx.clock,
        };
        let next = first.next_page_token.clone().expect("next");
        let err = list(
            &racing,
            &fx.clock,
            &fx.options,
            &ListQuery::new().with_max_results(1).with_next_page_token(next),
        )
        .expect_err("purged history must not be read");
        assert_eq!(err.kind(), ErrorKind::ExpiredToken);
    }

    #[test]
    fn incremental_pass_spans_pages_with_fixed_baseline() {
        let fx = Fixture::new();
        fx.seed(5);
        let full = fx.list(ListQuery::new()).expect("full");
        let sync = full.sync_token.clone().expect("sync");
        let baseline = SyncToken::decode(&sync).expect("decode").timestamp;
        fx.tick();

        for record in [&full.records[0], &full.records[2], &full.records[4]] {
            fx.table
                .update(record.id, None, Some(format!("new-{}", record.email)))
                .expect("update");
        }
        fx.tick();

        let query = ListQuery::new().with_max_results(2);
        let first = fx
            .list(query.clone().with_sync_token(sync))
            .expect("first");
        assert_eq!(names(&first), ["user-00", "user-02"]);
        let next = first.next_page_token.clone().expect("next");
        let decoded = NextPageToken::decode(&next).expect("decode");
        assert_eq!(decoded.updated_after, Some(baseline));
        assert_eq!(decoded.offset, 2);
        fx.tick();
        fx.table
            .update(full.records[1].id, None, Some("late@example.com".to_string()))
            .expect("update");
        fx.tick();

        let second = fx
            .list(query.with_next_page_token(next))
            .expect("second");
        assert_eq!(names(&second), ["user-04"]);
        assert!(second.records.iter().all(|r| r.email.starts_with("new-")));
        let closing = SyncToken::decode(second.sync_token.as_deref().expect("sync"))
            .expect("decode");
        assert_eq!(closing.timestamp, decoded.snapshot_time);
    }

    #[test]
    fn max_results_defaults_validates_and_clamps() {
        let mut fx = Fixture::new();
        fx.seed(12);
        assert_eq!(fx.list(ListQuery::new()).expect("list").records.len(), 10);

        for bad in ["0", "-1"] {
            let query = ListQuery {
                max_results: Some(bad.to_string()),
                ..ListQuery::new()
            };
            let err = fx.list(query).expect_err("err");
            assert_eq!(err.kind(), ErrorKind::Usage);
        }

        for unparseable in ["ten", "2.5", "99999999999999999999"] {
            let query = ListQuery {
                max_results: Some(unparseable.to_string()),
                ..ListQuery::new()
            };
            let page = fx.list(query).expect("falls back to default");
            assert_eq!(page.records.len(), 10);
        }

        fx.options = ListOptions::new().with_max_results_cap(5);
        let capped = fx
            .list(ListQuery::new().with_max_results(500))
            .expect("list");
        assert_eq!(capped.records.len(), 5);
        let next = NextPageToken::decode(capped.next_page_token.as_deref().expect("next"))
            .expect("decode");
        assert_eq!(next.offset, 5);
    }
}
