//! Status store seam and the in-process backend.
//!
//! The SQL layer backing element statuses, their chronological log and the
//! compacted history lives outside this crate; agents talk to it through
//! [`StatusStore`]. [`MemoryStore`] is the in-process implementation used by
//! the demo and the tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GridwatchError, Result};
use crate::state_machine::RssStatus;

/// Token owner marking an element as automatically managed. Elements held
/// under any other token are administratively pinned and never auto-inspected.
pub const AUTOMATIC_TOKEN_OWNER: &str = "rs_svc";

/// The three element families tracked by the status system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementFamily {
    Site,
    Resource,
    Node,
}

impl ElementFamily {
    pub const ALL: [ElementFamily; 3] = [
        ElementFamily::Site,
        ElementFamily::Resource,
        ElementFamily::Node,
    ];
}

impl fmt::Display for ElementFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementFamily::Site => write!(f, "Site"),
            ElementFamily::Resource => write!(f, "Resource"),
            ElementFamily::Node => write!(f, "Node"),
        }
    }
}

/// Current status of one (element, statusType) pair.
///
/// Created by synchronization from configuration, mutated by the inspection
/// cycle. The store owns these exclusively; the inspector reads a snapshot
/// and writes back a new status and check timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub name: String,
    pub status_type: String,
    pub status: RssStatus,
    pub element_type: String,
    pub reason: String,
    pub last_check_time: DateTime<Utc>,
    pub token_owner: String,
    pub token_expiration: DateTime<Utc>,
}

/// One chronological log entry, ordered by `id` within a family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRow {
    pub id: u64,
    pub name: String,
    pub status_type: String,
    pub status: RssStatus,
    pub reason: String,
    pub token_owner: String,
    pub recorded_at: DateTime<Utc>,
}

/// One compacted history entry: a point where status or token owner changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRow {
    pub name: String,
    pub status_type: String,
    pub status: RssStatus,
    pub reason: String,
    pub token_owner: String,
    pub recorded_at: DateTime<Utc>,
}

pub trait StatusStore: Send + Sync {
    /// All status rows of a family.
    fn select_elements(&self, family: ElementFamily) -> Result<Vec<StatusRecord>>;

    /// Persist a new status for an element and append a log entry.
    fn write_status(
        &self,
        family: ElementFamily,
        name: &str,
        status_type: &str,
        status: RssStatus,
        reason: &str,
        token_owner: &str,
    ) -> Result<()>;

    /// Log rows of a family, ordered by id ascending.
    fn select_log(&self, family: ElementFamily) -> Result<Vec<LogRow>>;

    /// Delete all log rows with id <= `last_id`.
    fn delete_log_up_to(&self, family: ElementFamily, last_id: u64) -> Result<()>;

    fn insert_history(&self, family: ElementFamily, rows: Vec<HistoryRow>) -> Result<()>;

    /// Most recent history row for one (name, statusType) key.
    fn last_history(
        &self,
        family: ElementFamily,
        name: &str,
        status_type: &str,
    ) -> Result<Option<HistoryRow>>;

    /// Purge history older than `cutoff`; returns the number of rows removed.
    fn delete_history_older_than(
        &self,
        family: ElementFamily,
        cutoff: DateTime<Utc>,
    ) -> Result<usize>;
}

#[derive(Debug, Default)]
struct FamilyTables {
    statuses: Vec<StatusRecord>,
    log: Vec<LogRow>,
    history: Vec<HistoryRow>,
    next_log_id: u64,
}

/// Mutex-protected in-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<ElementFamily, FamilyTables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a status row directly, bypassing the log. Used to seed the
    /// store the way configuration synchronization would.
    pub fn seed(&self, family: ElementFamily, record: StatusRecord) {
        let mut tables = self.lock();
        tables.entry(family).or_default().statuses.push(record);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ElementFamily, FamilyTables>> {
        // A poisoned store mutex means a panic already escaped a worker;
        // recover the data rather than cascade.
        self.tables
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl StatusStore for MemoryStore {
    fn select_elements(&self, family: ElementFamily) -> Result<Vec<StatusRecord>> {
        let tables = self.lock();
        Ok(tables
            .get(&family)
            .map(|t| t.statuses.clone())
            .unwrap_or_default())
    }

    fn write_status(
        &self,
        family: ElementFamily,
        name: &str,
        status_type: &str,
        status: RssStatus,
        reason: &str,
        token_owner: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let mut tables = self.lock();
        let t = tables.entry(family).or_default();

        match t
            .statuses
            .iter_mut()
            .find(|r| r.name == name && r.status_type == status_type)
        {
            Some(record) => {
                record.status = status;
                record.reason = reason.to_string();
                record.token_owner = token_owner.to_string();
                record.last_check_time = now;
            }
            None => {
                return Err(GridwatchError::Store(format!(
                    "no such element: {family}/{name}/{status_type}"
                )));
            }
        }

        t.next_log_id += 1;
        t.log.push(LogRow {
            id: t.next_log_id,
            name: name.to_string(),
            status_type: status_type.to_string(),
            status,
            reason: reason.to_string(),
            token_owner: token_owner.to_string(),
            recorded_at: now,
        });
        Ok(())
    }

    fn select_log(&self, family: ElementFamily) -> Result<Vec<LogRow>> {
        let tables = self.lock();
        Ok(tables
            .get(&family)
            .map(|t| t.log.clone())
            .unwrap_or_default())
    }

    fn delete_log_up_to(&self, family: ElementFamily, last_id: u64) -> Result<()> {
        let mut tables = self.lock();
        if let Some(t) = tables.get_mut(&family) {
            t.log.retain(|row| row.id > last_id);
        }
        Ok(())
    }

    fn insert_history(&self, family: ElementFamily, rows: Vec<HistoryRow>) -> Result<()> {
        let mut tables = self.lock();
        tables.entry(family).or_default().history.extend(rows);
        Ok(())
    }

    fn last_history(
        &self,
        family: ElementFamily,
        name: &str,
        status_type: &str,
    ) -> Result<Option<HistoryRow>> {
        let tables = self.lock();
        Ok(tables.get(&family).and_then(|t| {
            t.history
                .iter()
                .rev()
                .find(|h| h.name == name && h.status_type == status_type)
                .cloned()
        }))
    }

    fn delete_history_older_than(
        &self,
        family: ElementFamily,
        cutoff: DateTime<Utc>,
    ) -> Result<usize> {
        let mut tables = self.lock();
        let Some(t) = tables.get_mut(&family) else {
            return Ok(0);
        };
        let before = t.history.len();
        t.history.retain(|h| h.recorded_at >= cutoff);
        Ok(before - t.history.len())
    }
}

/// Build a status record with sensible defaults for seeding.
pub fn make_record(name: &str, status_type: &str, status: RssStatus) -> StatusRecord {
    let now = Utc::now();
    StatusRecord {
        name: name.to_string(),
        status_type: status_type.to_string(),
        status,
        element_type: "StorageElement".to_string(),
        reason: "Synchronized".to_string(),
        last_check_time: now,
        token_owner: AUTOMATIC_TOKEN_OWNER.to_string(),
        token_expiration: now + chrono::Duration::days(1),
    }
}
