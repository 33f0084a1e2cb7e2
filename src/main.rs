mod cache;
mod cli;
mod config;
mod error;
mod inspector;
mod limiter;
mod policy;
mod runner;
mod state_machine;
mod store;
mod summarizer;
mod ui;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use config::GridwatchConfig;
use inspector::ElementInspectorAgent;
use limiter::{JobQuery, Limiter, LimiterCaches};
use policy::{ElementDescriptor, EnforcementResult, PolicyEnforcer, PolicyResult};
use runner::AgentRunner;
use state_machine::{RssMachine, RssStatus};
use store::{AUTOMATIC_TOKEN_OWNER, ElementFamily, MemoryStore, StatusStore, make_record};
use summarizer::SummarizeLogsAgent;
use ui::CycleProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "gridwatch=debug"
    } else {
        "gridwatch=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = GridwatchConfig::load(cli.config.as_deref())?;

    // The in-process store and built-in enforcer back the demo and one-shot
    // commands; a deployment wires its own StatusStore / PolicyEnforcer
    // implementations here.
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let enforcer = Arc::new(DemoEnforcer::new(store.clone()));

    match cli.command {
        Command::Run => {
            AgentRunner::new(store, enforcer, config).run().await?;
        }
        Command::Inspect { family } => match family {
            Some(family) => {
                let agent =
                    ElementInspectorAgent::new(family.into(), store, enforcer, &config);
                let report = agent.execute()?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            None => {
                let runner = AgentRunner::new(store, enforcer, config);
                for report in runner.inspect_once()? {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
        },
        Command::Summarize => {
            AgentRunner::new(store, enforcer, config).summarize_once()?;
        }
        Command::Demo => {
            demo(config)?;
        }
    }

    Ok(())
}

/// Built-in Policy Enforcement Point used by the demo: proposes a status from
/// the element name, resolves it through the state machine and persists the
/// result, the way a real PEP write-back collaborator would.
struct DemoEnforcer {
    store: Arc<dyn StatusStore>,
}

impl DemoEnforcer {
    fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    fn propose(name: &str) -> &'static str {
        if name.contains("flaky") { "Degraded" } else { "Active" }
    }
}

impl PolicyEnforcer for DemoEnforcer {
    fn enforce(&self, element: &ElementDescriptor) -> error::Result<EnforcementResult> {
        let proposed = Self::propose(&element.name);
        let machine = RssMachine::new(Some(element.status));
        let resolved = machine.next_state(proposed)?;

        self.store.write_status(
            element.family,
            &element.name,
            &element.status_type,
            RssStatus::from_str(&resolved)?,
            "demo probe",
            AUTOMATIC_TOKEN_OWNER,
        )?;

        Ok(EnforcementResult {
            policy_combined: PolicyResult {
                status: proposed.to_string(),
                reason: "demo probe".to_string(),
            },
        })
    }
}

/// Fixed job counts standing in for the job database.
struct DemoJobs;

impl JobQuery for DemoJobs {
    fn count_jobs(
        &self,
        _site: &str,
        attribute: &str,
        _states: &[&str],
    ) -> error::Result<HashMap<String, u64>> {
        match attribute {
            "JobType" => Ok(HashMap::from([
                ("Merge".to_string(), 2),
                ("MCGen".to_string(), 1),
            ])),
            _ => Ok(HashMap::new()),
        }
    }

    fn job_attributes(&self, _job_ref: &str) -> error::Result<HashMap<String, String>> {
        Ok(HashMap::from([("JobType".to_string(), "User".to_string())]))
    }
}

/// End-to-end demonstration over the in-process store: seed a few stale
/// elements, run an inspection cycle, compact the log, then show the
/// matching throttle.
fn demo(mut config: GridwatchConfig) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let stale = chrono::Utc::now() - chrono::Duration::hours(2);
    for (name, status) in [
        ("se-alpha.cern.ch", RssStatus::Active),
        ("se-flaky.gridka.de", RssStatus::Active),
        ("ce-down.pic.es", RssStatus::Banned),
        ("se-old.ral.uk", RssStatus::Unknown),
    ] {
        let mut record = make_record(name, "ReadAccess", status);
        record.last_check_time = stale;
        store.seed(ElementFamily::Resource, record);
    }

    let enforcer = Arc::new(DemoEnforcer::new(store.clone()));
    let agent = ElementInspectorAgent::new(
        ElementFamily::Resource,
        store.clone(),
        enforcer,
        &config,
    );

    let progress = CycleProgress::start(ElementFamily::Resource);
    let report = agent.execute()?;
    progress.complete(ElementFamily::Resource, &report);

    for record in store.select_elements(ElementFamily::Resource)? {
        println!("    {:<22} {:<12} {}", record.name, record.status_type, record.status);
    }

    SummarizeLogsAgent::new(store.clone(), config.retention_months).execute()?;
    println!(
        "  log compacted, {} log rows remaining",
        store.select_log(ElementFamily::Resource)?.len()
    );

    // Matching throttle: Merge jobs at CERN are capped at 2 and two are
    // already running, and a freshly dispatched User job incurs a delay.
    config.limiter.site_limits.insert(
        "LCG.CERN.ch".to_string(),
        HashMap::from([(
            "JobType".to_string(),
            HashMap::from([("Merge".to_string(), 2)]),
        )]),
    );
    config.limiter.site_delays.insert(
        "LCG.CERN.ch".to_string(),
        HashMap::from([(
            "JobType".to_string(),
            HashMap::from([("User".to_string(), 30)]),
        )]),
    );
    let limiter = Limiter::new(
        config.limiter.clone(),
        Arc::new(DemoJobs),
        Arc::new(LimiterCaches::new()),
    );

    let job_ref = uuid::Uuid::new_v4().to_string();
    limiter.update_delay_counters("LCG.CERN.ch", &job_ref)?;
    let cond = limiter.negative_cond_for_site("LCG.CERN.ch", None)?;
    println!("  matcher exclusions for LCG.CERN.ch: {}", serde_json::to_string(&cond)?);

    progress.print_report(&report);
    Ok(())
}
