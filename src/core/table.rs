//! Purpose: System-versioned record table with point-in-time reads and bounded history.
//! Exports: `Record`, `SnapshotStore`, `VersionedTable`, `PurgeReport`.
//! Role: Storage engine behind the list protocol; the `SnapshotStore` trait is the seam.
//! Invariants: A version is visible at `t` iff `row_start <= t < row_end`.
//! Invariants: Reads pinned before `retained_since()` fail with `ExpiredToken` under the same lock.
//! Invariants: Writes never land at or before an instant that has already been read.
use crate::core::clock::{Clock, Timestamp};
use crate::core::error::{Error, ErrorKind};
use crate::core::plan::{QuerySpec, SortKey};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub updated_at: Timestamp,
    pub created_at: Timestamp,
}

/// Point-in-time read access; the only storage surface the list protocol needs.
pub trait SnapshotStore: Send + Sync {
    /// Fails with `ExpiredToken` when `spec.snapshot_time` predates retained history.
    fn read_at(&self, spec: &QuerySpec) -> Result<Vec<Record>, Error>;
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PurgeReport {
    pub versions_removed: usize,
    pub versions_kept: usize,
}

#[derive(Clone, Debug)]
struct RowVersion {
    record: Record,
    row_start: Timestamp,
    row_end: Timestamp,
}

impl RowVersion {
    fn visible_at(&self, at: Timestamp) -> bool {
        self.row_start <= at && at < self.row_end
    }

    fn is_current(&self) -> bool {
        self.row_end == Timestamp::MAX
    }
}

#[derive(Debug, Default)]
struct TableState {
    versions: Vec<RowVersion>,
    next_id: u64,
    last_write: Option<Timestamp>,
    retained_since: Option<Timestamp>,
}

pub struct VersionedTable {
    clock: Arc<dyn Clock>,
    state: RwLock<TableState>,
    read_high_water: AtomicI64,
}

impl VersionedTable {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: RwLock::new(TableState {
                next_id: 1,
                ..TableState::default()
            }),
            read_high_water: AtomicI64::new(i64::MIN),
        }
    }

    pub fn insert(
        &self,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Result<Record, Error> {
        let mut state = self.write_state()?;
        let at = self.write_time(&state);
        let record = Record {
            id: state.next_id,
            name: name.into(),
            email: email.into(),
            updated_at: at,
            created_at: at,
        };
        state.next_id += 1;
        state.last_write = Some(at);
        state.versions.push(RowVersion {
            record: record.clone(),
            row_start: at,
            row_end: Timestamp::MAX,
        });
        tracing::debug!(id = record.id, "inserted record");
        Ok(record)
    }

    pub fn update(
        &self,
        id: u64,
        name: Option<String>,
        email: Option<String>,
    ) -> Result<Record, Error> {
        let mut state = self.write_state()?;
        let at = self.write_time(&state);
        let current = current_version_mut(&mut state, id)?;
        current.row_end = at;
        let mut record = current.record.clone();
        if let Some(name) = name {
            record.name = name;
        }
        if let Some(email) = email {
            record.email = email;
        }
        record.updated_at = at;
        state.last_write = Some(at);
        state.versions.push(RowVersion {
            record: record.clone(),
            row_start: at,
            row_end: Timestamp::MAX,
        });
        tracing::debug!(id, "updated record");
        Ok(record)
    }

    pub fn delete(&self, id: u64) -> Result<(), Error> {
        let mut state = self.write_state()?;
        let at = self.write_time(&state);
        current_version_mut(&mut state, id)?.row_end = at;
        state.last_write = Some(at);
        tracing::debug!(id, "deleted record");
        Ok(())
    }

    /// Close every current row; returns how many were affected.
    pub fn clear(&self) -> Result<usize, Error> {
        let mut state = self.write_state()?;
        let at = self.write_time(&state);
        let mut affected = 0;
        for version in state.versions.iter_mut().filter(|v| v.is_current()) {
            version.row_end = at;
            affected += 1;
        }
        state.last_write = Some(at);
        Ok(affected)
    }

    /// Drop closed versions that ended at or before `horizon`.
    pub fn purge_history(&self, horizon: Timestamp) -> Result<PurgeReport, Error> {
        let mut state = self.write_state()?;
        let before = state.versions.len();
        state
            .versions
            .retain(|version| version.is_current() || version.row_end > horizon);
        let kept = state.versions.len();
        if state.retained_since.is_none_or(|since| since < horizon) {
            state.retained_since = Some(horizon);
        }
        Ok(PurgeReport {
            versions_removed: before - kept,
            versions_kept: kept,
        })
    }

    /// Current rows, in list order.
    pub fn current(&self) -> Result<Vec<Record>, Error> {
        let state = self.read_state()?;
        let mut rows: Vec<Record> = state
            .versions
            .iter()
            .filter(|v| v.is_current())
            .map(|v| v.record.clone())
            .collect();
        rows.sort_by(|a, b| compare(SortKey::NameThenId, a, b));
        Ok(rows)
    }

    /// Oldest instant that can still be read faithfully.
    pub fn retained_since(&self) -> Timestamp {
        self.read_state()
            .ok()
            .and_then(|state| state.retained_since)
            .unwrap_or(Timestamp::MIN)
    }

    fn write_time(&self, state: &TableState) -> Timestamp {
        let mut at = self.clock.now();
        let floor = self
            .read_high_water
            .load(Ordering::SeqCst)
            .max(state.last_write.map_or(i64::MIN, Timestamp::as_micros));
        if at.as_micros() <= floor {
            at = Timestamp::from_micros(floor.saturating_add(1));
        }
        at
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, TableState>, Error> {
        self.state
            .read()
            .map_err(|_| Error::new(ErrorKind::Query).with_message("table lock poisoned"))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, TableState>, Error> {
        self.state
            .write()
            .map_err(|_| Error::new(ErrorKind::Query).with_message("table lock poisoned"))
    }
}

impl SnapshotStore for VersionedTable {
    fn read_at(&self, spec: &QuerySpec) -> Result<Vec<Record>, Error> {
        let state = self.read_state()?;
        if let Some(since) = state.retained_since.filter(|since| spec.snapshot_time < *since) {
            return Err(Error::new(ErrorKind::ExpiredToken)
                .with_message(format!(
                    "snapshot {} is no longer retained (history kept since {since})",
                    spec.snapshot_time
                ))
                .with_hint("Restart the listing without a token."));
        }
        // Future snapshots must not drag the write clock forward.
        let observed = spec.snapshot_time.min(self.clock.now());
        self.read_high_water
            .fetch_max(observed.as_micros(), Ordering::SeqCst);

        let mut rows: Vec<&Record> = state
            .versions
            .iter()
            .filter(|v| v.visible_at(spec.snapshot_time))
            .map(|v| &v.record)
            .filter(|r| spec.updated_after.is_none_or(|after| r.updated_at > after))
            .collect();
        rows.sort_by(|a, b| compare(spec.order_by, a, b));

        let offset = usize::try_from(spec.offset).unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(spec.limit)
            .cloned()
            .collect())
    }
}

fn current_version_mut(state: &mut TableState, id: u64) -> Result<&mut RowVersion, Error> {
    state
        .versions
        .iter_mut()
        .find(|v| v.record.id == id && v.is_current())
        .ok_or_else(|| {
            Error::new(ErrorKind::NotFound).with_message(format!("no record with id {id}"))
        })
}

fn compare(order_by: SortKey, a: &Record, b: &Record) -> CmpOrdering {
    match order_by {
        SortKey::NameThenId => a.name.cmp(&b.name).then(a.id.cmp(&b.id)),
    }
}
