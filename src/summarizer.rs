//! Log compaction.
//!
//! The status log grows by one row per write; most of those rows repeat the
//! previous status. This agent run-length-compacts the log per
//! (name, statusType) key into the history table, keeping only the rows where
//! status or token owner actually changed, then deletes the processed log
//! rows and purges history beyond the retention window.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Months, Utc};
use tracing::{error, info};

use crate::store::{ElementFamily, HistoryRow, LogRow, StatusStore};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SummaryReport {
    pub inserted: usize,
    pub purged: usize,
}

pub struct SummarizeLogsAgent {
    store: Arc<dyn StatusStore>,
    retention_months: u32,
}

impl SummarizeLogsAgent {
    pub fn new(store: Arc<dyn StatusStore>, retention_months: u32) -> Self {
        Self {
            store,
            retention_months,
        }
    }

    /// Summarize all three element families. A failure in one family is
    /// logged and the others still run.
    pub fn execute(&self) -> anyhow::Result<()> {
        for family in ElementFamily::ALL {
            match self.summarize_family(family) {
                Ok(report) => {
                    info!(family = %family, inserted = report.inserted,
                          purged = report.purged, "log summary pass done");
                }
                Err(e) => {
                    error!(family = %family, error = %e, "log summary pass failed");
                }
            }
        }
        Ok(())
    }

    pub fn summarize_family(&self, family: ElementFamily) -> anyhow::Result<SummaryReport> {
        let log = self.store.select_log(family)?;
        let last_id = log.last().map(|row| row.id);

        let mut inserted = 0;
        for (key, mut kept) in compact(log) {
            // Re-inserting the same (status, tokenOwner) boundary after a
            // restart would put a no-op row in history; drop it.
            if let Some(first) = kept.first()
                && let Some(latest) = self.store.last_history(family, &key.0, &key.1)?
                && first.status == latest.status
                && first.token_owner == latest.token_owner
            {
                kept.remove(0);
            }
            if kept.is_empty() {
                continue;
            }
            inserted += kept.len();
            let rows = kept.into_iter().map(history_row).collect();
            self.store.insert_history(family, rows)?;
        }

        // Only rows confirmed summarized are deleted.
        if let Some(last_id) = last_id {
            self.store.delete_log_up_to(family, last_id)?;
        }

        let cutoff = Utc::now()
            .checked_sub_months(Months::new(self.retention_months))
            .unwrap_or_else(Utc::now);
        let purged = self.store.delete_history_older_than(family, cutoff)?;

        Ok(SummaryReport { inserted, purged })
    }
}

/// Run-length compaction: group log rows by (name, statusType) preserving
/// chronological order, keep the first row of each key unconditionally, then
/// keep a row only when its status or token owner differs from the last kept
/// row of that key.
fn compact(log: Vec<LogRow>) -> Vec<((String, String), Vec<LogRow>)> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut kept: HashMap<(String, String), Vec<LogRow>> = HashMap::new();

    for row in log {
        let key = (row.name.clone(), row.status_type.clone());
        match kept.get_mut(&key) {
            None => {
                order.push(key.clone());
                kept.insert(key, vec![row]);
            }
            Some(rows) => {
                let last = rows.last().expect("kept lists are never empty");
                if last.status != row.status || last.token_owner != row.token_owner {
                    rows.push(row);
                }
            }
        }
    }

    order
        .into_iter()
        .map(|key| {
            let rows = kept.remove(&key).expect("every ordered key was inserted");
            (key, rows)
        })
        .collect()
}

fn history_row(row: LogRow) -> HistoryRow {
    HistoryRow {
        name: row.name,
        status_type: row.status_type,
        status: row.status,
        reason: row.reason,
        token_owner: row.token_owner,
        recorded_at: row.recorded_at,
    }
}
