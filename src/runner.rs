//! Outer agent loop.
//!
//! Fires the inspection cycle and the log-summarization pass at their
//! configured wall-clock intervals until interrupted. The cycles themselves
//! are blocking thread-pool work, so they run on the blocking pool and each
//! tick waits for the previous cycle of its kind to finish.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::config::GridwatchConfig;
use crate::inspector::{CycleReport, ElementInspectorAgent};
use crate::policy::PolicyEnforcer;
use crate::store::{ElementFamily, StatusStore};
use crate::summarizer::SummarizeLogsAgent;

pub struct AgentRunner {
    config: GridwatchConfig,
    inspectors: Arc<Vec<ElementInspectorAgent>>,
    summarizer: Arc<SummarizeLogsAgent>,
}

impl AgentRunner {
    pub fn new(
        store: Arc<dyn StatusStore>,
        enforcer: Arc<dyn PolicyEnforcer>,
        config: GridwatchConfig,
    ) -> Self {
        let inspectors = ElementFamily::ALL
            .into_iter()
            .map(|family| {
                ElementInspectorAgent::new(family, store.clone(), enforcer.clone(), &config)
            })
            .collect();
        let summarizer = SummarizeLogsAgent::new(store, config.retention_months);
        Self {
            config,
            inspectors: Arc::new(inspectors),
            summarizer: Arc::new(summarizer),
        }
    }

    /// One inspection cycle over all families; the per-family reports are
    /// returned in `ElementFamily::ALL` order.
    pub fn inspect_once(&self) -> Result<Vec<CycleReport>> {
        self.inspectors.iter().map(|agent| agent.execute()).collect()
    }

    /// One summarization pass over all families.
    pub fn summarize_once(&self) -> Result<()> {
        self.summarizer.execute()
    }

    /// Run both agents on their intervals until ctrl-c.
    pub async fn run(self) -> Result<()> {
        let mut inspect_tick =
            tokio::time::interval(Duration::from_secs(self.config.polling_interval_secs.max(1)));
        let mut summarize_tick =
            tokio::time::interval(Duration::from_secs(self.config.summarize_interval_secs.max(1)));

        info!(
            polling_interval_secs = self.config.polling_interval_secs,
            summarize_interval_secs = self.config.summarize_interval_secs,
            "agent loop started"
        );

        loop {
            tokio::select! {
                _ = inspect_tick.tick() => {
                    let inspectors = self.inspectors.clone();
                    tokio::task::spawn_blocking(move || -> Result<()> {
                        for agent in inspectors.iter() {
                            agent.execute()?;
                        }
                        Ok(())
                    })
                    .await??;
                }
                _ = summarize_tick.tick() => {
                    let summarizer = self.summarizer.clone();
                    tokio::task::spawn_blocking(move || summarizer.execute()).await??;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as GwResult;
    use crate::policy::{ElementDescriptor, EnforcementResult, PolicyResult};
    use crate::state_machine::RssStatus;
    use crate::store::{AUTOMATIC_TOKEN_OWNER, MemoryStore, make_record};

    struct AlwaysActive;

    impl PolicyEnforcer for AlwaysActive {
        fn enforce(&self, _element: &ElementDescriptor) -> GwResult<EnforcementResult> {
            Ok(EnforcementResult {
                policy_combined: PolicyResult {
                    status: "Active".to_string(),
                    reason: "all probes green".to_string(),
                },
            })
        }
    }

    #[test]
    fn inspect_once_covers_all_families() {
        let store = Arc::new(MemoryStore::new());
        for family in ElementFamily::ALL {
            let mut record = make_record("element", "all", RssStatus::Unknown);
            record.last_check_time = chrono::Utc::now() - chrono::Duration::hours(1);
            store.seed(family, record);
        }

        let runner = AgentRunner::new(store, Arc::new(AlwaysActive), GridwatchConfig::default());
        let reports = runner.inspect_once().unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.checked == 1));
    }

    #[test]
    fn summarize_once_compacts_the_store() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            ElementFamily::Site,
            make_record("LCG.CERN.ch", "all", RssStatus::Active),
        );
        store
            .write_status(
                ElementFamily::Site,
                "LCG.CERN.ch",
                "all",
                RssStatus::Banned,
                "downtime",
                AUTOMATIC_TOKEN_OWNER,
            )
            .unwrap();

        let runner = AgentRunner::new(
            store.clone(),
            Arc::new(AlwaysActive),
            GridwatchConfig::default(),
        );
        runner.summarize_once().unwrap();
        assert!(store.select_log(ElementFamily::Site).unwrap().is_empty());
    }
}
