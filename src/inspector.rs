//! Element inspection cycle.
//!
//! Every polling interval the agent pulls the elements that are due for a
//! re-check, hands each to the Policy Enforcement Point on a bounded pool of
//! worker threads, and resolves the proposed status through the state
//! machine. One element failing never aborts the cycle; only a failed fetch
//! of the element list does.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{CheckFrequencies, GridwatchConfig};
use crate::policy::{ElementDescriptor, PolicyEnforcer};
use crate::state_machine::RssMachine;
use crate::store::{AUTOMATIC_TOKEN_OWNER, ElementFamily, StatusRecord, StatusStore};

// Rough per-element evaluation estimate used to size the worker pool.
// A heuristic, not a contract; the pool is still capped by `max_threads`.
const SECS_PER_ELEMENT: u64 = 10;

/// Counters for one completed inspection cycle.
#[derive(Debug, Default, Serialize)]
pub struct CycleReport {
    pub checked: usize,
    pub transitions: usize,
    pub failures: usize,
}

pub struct ElementInspectorAgent {
    family: ElementFamily,
    store: Arc<dyn StatusStore>,
    enforcer: Arc<dyn PolicyEnforcer>,
    frequencies: CheckFrequencies,
    polling_interval_secs: u64,
    max_threads: usize,
}

impl ElementInspectorAgent {
    pub fn new(
        family: ElementFamily,
        store: Arc<dyn StatusStore>,
        enforcer: Arc<dyn PolicyEnforcer>,
        config: &GridwatchConfig,
    ) -> Self {
        Self {
            family,
            store,
            enforcer,
            frequencies: config.check_frequencies.clone(),
            polling_interval_secs: config.polling_interval_secs.max(1),
            max_threads: config.max_threads.max(1),
        }
    }

    /// The elements due for a re-check at `now`.
    ///
    /// Elements under a manual token are never auto-inspected, and an element
    /// is due once its per-status check frequency has elapsed since the last
    /// check. Order among due elements carries no meaning.
    pub fn elements_to_check(
        &self,
        now: DateTime<Utc>,
    ) -> crate::error::Result<VecDeque<StatusRecord>> {
        let rows = self.store.select_elements(self.family)?;
        Ok(rows
            .into_iter()
            .filter(|r| r.token_owner == AUTOMATIC_TOKEN_OWNER)
            .filter(|r| r.last_check_time + self.frequencies.for_status(r.status) <= now)
            .collect())
    }

    /// Run one inspection cycle: drain the due queue on a worker pool and
    /// block until every element has been attempted once.
    pub fn execute(&self) -> anyhow::Result<CycleReport> {
        let queue = self
            .elements_to_check(Utc::now())
            .with_context(|| format!("fetching {} elements to inspect", self.family))?;

        if queue.is_empty() {
            debug!(family = %self.family, "no elements due for inspection");
            return Ok(CycleReport::default());
        }

        let workers = self.pool_size(queue.len());
        info!(family = %self.family, due = queue.len(), workers, "starting inspection cycle");

        let queue = Mutex::new(queue);
        let report = CycleCounters::default();

        // The scope exit is the cycle barrier: no cycle ends with elements
        // still being evaluated.
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| self.worker(&queue, &report));
            }
        });

        Ok(report.freeze())
    }

    /// Workers needed for the current backlog: one per `SECS_PER_ELEMENT`
    /// of estimated work per polling interval, at least one, at most
    /// `max_threads`.
    fn pool_size(&self, queued: usize) -> usize {
        let estimated = queued as u64 * SECS_PER_ELEMENT;
        let workers = estimated.div_ceil(self.polling_interval_secs) as usize;
        workers.clamp(1, self.max_threads)
    }

    /// Drain the shared queue until it is empty. Each popped element is
    /// evaluated to completion before the next pop; per-element failures are
    /// logged and counted, never propagated.
    fn worker(&self, queue: &Mutex<VecDeque<StatusRecord>>, report: &CycleCounters) {
        loop {
            let record = {
                let mut queue = queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                queue.pop_front()
            };
            let Some(record) = record else {
                return;
            };
            self.inspect(&record, report);
            report.checked.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn inspect(&self, record: &StatusRecord, report: &CycleCounters) {
        let descriptor = ElementDescriptor {
            family: self.family,
            name: record.name.clone(),
            status_type: record.status_type.clone(),
            status: record.status,
            element_type: record.element_type.clone(),
        };

        let enforced = match self.enforcer.enforce(&descriptor) {
            Ok(enforced) => enforced,
            Err(e) => {
                warn!(family = %self.family, name = %record.name,
                      status_type = %record.status_type, error = %e,
                      "policy evaluation failed, skipping element this cycle");
                report.failures.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        let machine = RssMachine::new(Some(record.status));
        let resolved = match machine.next_state(&enforced.policy_combined.status) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(family = %self.family, name = %record.name, error = %e,
                      "policies proposed an invalid status");
                report.failures.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        if resolved != record.status.as_str() {
            // Persistence of the new status belongs to the enforcement
            // collaborator; the cycle only accounts for the transition.
            info!(family = %self.family, name = %record.name,
                  status_type = %record.status_type,
                  old = %record.status, new = %resolved,
                  reason = %enforced.policy_combined.reason,
                  "status transition");
            report.transitions.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
struct CycleCounters {
    checked: AtomicUsize,
    transitions: AtomicUsize,
    failures: AtomicUsize,
}

impl CycleCounters {
    fn freeze(&self) -> CycleReport {
        CycleReport {
            checked: self.checked.load(Ordering::SeqCst),
            transitions: self.transitions.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
        }
    }
}
