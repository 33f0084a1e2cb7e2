//! Job-matching throttle.
//!
//! Computes, per site (and optionally per matched resource), the attribute
//! values a matching query must exclude: values whose running-job count has
//! reached its configured cap, and values still inside a post-dispatch
//! matching-delay window. The matcher itself consumes the resulting negative
//! conditions; this module never touches the matching query.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::cache::TtlCache;
use crate::config::{AttributeTable, LimiterConfig};
use crate::error::Result;

/// Job states that count toward a running limit.
pub const COUNTED_JOB_STATES: [&str; 3] = ["Running", "Matched", "Stalled"];

/// The job-schema attributes a limit or delay may be keyed on. Tables
/// configured on anything else are logged and skipped.
pub const JOB_ATTRIBUTES: [&str; 7] = [
    "JobType",
    "JobGroup",
    "Owner",
    "OwnerGroup",
    "Site",
    "Platform",
    "Priority",
];

// Live job counts and the global negative-condition result are both reused
// for this long before being re-queried.
const QUERY_CACHE_TTL: Duration = Duration::from_secs(10);

/// Attribute name -> values the matching query must exclude.
pub type NegativeCond = HashMap<String, Vec<String>>;

/// Live job-count and job-attribute lookups, backed by the job database.
pub trait JobQuery: Send + Sync {
    /// Count of jobs at `site` in any of `states`, grouped by the values of
    /// `attribute`.
    fn count_jobs(
        &self,
        site: &str,
        attribute: &str,
        states: &[&str],
    ) -> Result<HashMap<String, u64>>;

    /// Attribute values of one job.
    fn job_attributes(&self, job_ref: &str) -> Result<HashMap<String, String>>;
}

/// Shared caches for all limiter instances in the process. Created once at
/// startup and injected, so cache lifetime is explicit rather than hidden in
/// module state.
#[derive(Debug, Default)]
pub struct LimiterCaches {
    /// (site, attribute) -> live counts per value.
    counts: TtlCache<(String, String), HashMap<String, u64>>,
    /// (site, attribute, value) still inside its matching-delay window.
    delays: TtlCache<(String, String, String), ()>,
    /// The all-sites negative-condition result.
    negative: TtlCache<(), HashMap<String, NegativeCond>>,
}

impl LimiterCaches {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct Limiter {
    config: LimiterConfig,
    jobs: Arc<dyn JobQuery>,
    caches: Arc<LimiterCaches>,
}

impl Limiter {
    pub fn new(config: LimiterConfig, jobs: Arc<dyn JobQuery>, caches: Arc<LimiterCaches>) -> Self {
        Self {
            config,
            jobs,
            caches,
        }
    }

    /// Exclusion conditions for one site, optionally tightened by the
    /// resource-specific limit table when a concrete resource was matched.
    pub fn negative_cond_for_site(
        &self,
        site: &str,
        resource: Option<&str>,
    ) -> Result<NegativeCond> {
        let mut cond = NegativeCond::new();

        if self.config.check_job_limit {
            if let Some(table) = self.config.site_limits.get(site) {
                merge(&mut cond, self.running_condition(site, table)?);
            }
            if let Some(table) = resource.and_then(|r| self.config.resource_limits.get(r)) {
                merge(&mut cond, self.running_condition(site, table)?);
            }
        }

        if self.config.check_matching_delay {
            merge(&mut cond, self.delay_condition(site));
        }

        Ok(cond)
    }

    /// Exclusion conditions for every configured site, sites with nothing to
    /// exclude omitted. The whole result is cached for a few seconds since
    /// the matcher calls this on every query.
    pub fn negative_cond(&self) -> Result<HashMap<String, NegativeCond>> {
        if let Some(cached) = self.caches.negative.get(&()) {
            return Ok(cached);
        }

        let mut sites: Vec<&String> = self
            .config
            .site_limits
            .keys()
            .chain(self.config.site_delays.keys())
            .collect();
        sites.sort();
        sites.dedup();

        let mut result = HashMap::new();
        for site in sites {
            let cond = self.negative_cond_for_site(site, None)?;
            if !cond.is_empty() {
                result.insert(site.clone(), cond);
            }
        }

        self.caches
            .negative
            .insert((), result.clone(), QUERY_CACHE_TTL);
        Ok(result)
    }

    /// Register matching-delay penalties for the attributes of a job that
    /// just went through dispatch at `site`. An attribute value only incurs a
    /// delay when it is itself a key of the site's delay table.
    pub fn update_delay_counters(&self, site: &str, job_ref: &str) -> Result<()> {
        let Some(table) = self.config.site_delays.get(site) else {
            return Ok(());
        };
        let attributes = self.jobs.job_attributes(job_ref)?;

        for (attr, delays) in table {
            let Some(value) = attributes.get(attr) else {
                continue;
            };
            if let Some(delay_secs) = delays.get(value) {
                self.caches.delays.insert(
                    (site.to_string(), attr.clone(), value.clone()),
                    (),
                    Duration::from_secs(*delay_secs),
                );
            }
        }
        Ok(())
    }

    /// Values at or over their running-job cap for one limit table.
    fn running_condition(&self, site: &str, table: &AttributeTable) -> Result<NegativeCond> {
        let mut cond = NegativeCond::new();
        for (attr, limits) in table {
            if !JOB_ATTRIBUTES.contains(&attr.as_str()) {
                warn!(site, attribute = %attr, "limit configured on unknown job attribute, skipping");
                continue;
            }
            let counts = self.cached_counts(site, attr)?;
            for (value, limit) in limits {
                if counts.get(value).copied().unwrap_or(0) >= *limit {
                    cond.entry(attr.clone()).or_default().push(value.clone());
                }
            }
        }
        Ok(cond)
    }

    /// Whatever (attribute, value) pairs are still inside their delay window
    /// for this site. Pure cache read, nothing is computed here.
    fn delay_condition(&self, site: &str) -> NegativeCond {
        let mut cond = NegativeCond::new();
        for (key_site, attr, value) in self.caches.delays.live_keys() {
            if key_site == site {
                cond.entry(attr).or_default().push(value);
            }
        }
        cond
    }

    fn cached_counts(&self, site: &str, attr: &str) -> Result<HashMap<String, u64>> {
        let key = (site.to_string(), attr.to_string());
        if let Some(counts) = self.caches.counts.get(&key) {
            return Ok(counts);
        }
        let counts = self.jobs.count_jobs(site, attr, &COUNTED_JOB_STATES)?;
        self.caches.counts.insert(key, counts.clone(), QUERY_CACHE_TTL);
        Ok(counts)
    }
}

/// Union of two exclusion dicts: per attribute, the deduplicated union of
/// excluded values.
fn merge(into: &mut NegativeCond, from: NegativeCond) {
    for (attr, values) in from {
        let existing = into.entry(attr).or_default();
        for value in values {
            if !existing.contains(&value) {
                existing.push(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockJobs {
        counts: Mutex<HashMap<(String, String), HashMap<String, u64>>>,
        attributes: Mutex<HashMap<String, HashMap<String, String>>>,
        count_calls: AtomicUsize,
    }

    impl MockJobs {
        fn set_count(&self, site: &str, attr: &str, value: &str, count: u64) {
            self.counts
                .lock()
                .unwrap()
                .entry((site.to_string(), attr.to_string()))
                .or_default()
                .insert(value.to_string(), count);
        }

        fn set_job(&self, job_ref: &str, attrs: &[(&str, &str)]) {
            self.attributes.lock().unwrap().insert(
                job_ref.to_string(),
                attrs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
        }
    }

    impl JobQuery for MockJobs {
        fn count_jobs(
            &self,
            site: &str,
            attribute: &str,
            states: &[&str],
        ) -> Result<HashMap<String, u64>> {
            assert_eq!(states, COUNTED_JOB_STATES.as_slice());
            self.count_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .counts
                .lock()
                .unwrap()
                .get(&(site.to_string(), attribute.to_string()))
                .cloned()
                .unwrap_or_default())
        }

        fn job_attributes(&self, job_ref: &str) -> Result<HashMap<String, String>> {
            Ok(self
                .attributes
                .lock()
                .unwrap()
                .get(job_ref)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn limits_config(site: &str, attr: &str, value: &str, limit: u64) -> LimiterConfig {
        let mut config = LimiterConfig::default();
        config.site_limits.insert(
            site.to_string(),
            HashMap::from([(
                attr.to_string(),
                HashMap::from([(value.to_string(), limit)]),
            )]),
        );
        config
    }

    fn limiter(config: LimiterConfig, jobs: Arc<MockJobs>) -> Limiter {
        Limiter::new(config, jobs, Arc::new(LimiterCaches::new()))
    }

    #[test]
    fn merge_is_union_not_overwrite() {
        let mut a = NegativeCond::from([("JobType".to_string(), vec!["Merge".to_string()])]);
        let b = NegativeCond::from([(
            "JobType".to_string(),
            vec!["MCGen".to_string(), "Merge".to_string()],
        )]);
        merge(&mut a, b);
        let mut values = a["JobType"].clone();
        values.sort();
        assert_eq!(values, vec!["MCGen", "Merge"]);
    }

    #[test]
    fn limit_reached_excludes_value() {
        let jobs = Arc::new(MockJobs::default());
        jobs.set_count("LCG.CERN.ch", "JobType", "Merge", 2);
        let lim = limiter(limits_config("LCG.CERN.ch", "JobType", "Merge", 2), jobs);

        let cond = lim.negative_cond_for_site("LCG.CERN.ch", None).unwrap();
        assert_eq!(cond["JobType"], vec!["Merge"]);
    }

    #[test]
    fn below_limit_excludes_nothing() {
        let jobs = Arc::new(MockJobs::default());
        jobs.set_count("LCG.CERN.ch", "JobType", "Merge", 1);
        let lim = limiter(limits_config("LCG.CERN.ch", "JobType", "Merge", 2), jobs);

        let cond = lim.negative_cond_for_site("LCG.CERN.ch", None).unwrap();
        assert!(cond.is_empty());
    }

    #[test]
    fn unknown_attribute_is_skipped() {
        let jobs = Arc::new(MockJobs::default());
        let lim = limiter(
            limits_config("LCG.CERN.ch", "NotAnAttribute", "x", 0),
            jobs.clone(),
        );

        let cond = lim.negative_cond_for_site("LCG.CERN.ch", None).unwrap();
        assert!(cond.is_empty());
        assert_eq!(jobs.count_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn disabled_checks_exclude_nothing() {
        let jobs = Arc::new(MockJobs::default());
        jobs.set_count("LCG.CERN.ch", "JobType", "Merge", 100);
        let mut config = limits_config("LCG.CERN.ch", "JobType", "Merge", 1);
        config.check_job_limit = false;
        config.check_matching_delay = false;
        let lim = limiter(config, jobs);

        let cond = lim.negative_cond_for_site("LCG.CERN.ch", None).unwrap();
        assert!(cond.is_empty());
    }

    #[test]
    fn resource_limits_merge_with_site_limits() {
        let jobs = Arc::new(MockJobs::default());
        jobs.set_count("LCG.CERN.ch", "JobType", "Merge", 5);
        jobs.set_count("LCG.CERN.ch", "Owner", "alice", 5);

        let mut config = limits_config("LCG.CERN.ch", "JobType", "Merge", 2);
        config.resource_limits.insert(
            "ce.cern.ch".to_string(),
            HashMap::from([(
                "Owner".to_string(),
                HashMap::from([("alice".to_string(), 3)]),
            )]),
        );
        let lim = limiter(config, jobs);

        let site_only = lim.negative_cond_for_site("LCG.CERN.ch", None).unwrap();
        assert!(!site_only.contains_key("Owner"));

        let with_resource = lim
            .negative_cond_for_site("LCG.CERN.ch", Some("ce.cern.ch"))
            .unwrap();
        assert_eq!(with_resource["JobType"], vec!["Merge"]);
        assert_eq!(with_resource["Owner"], vec!["alice"]);
    }

    #[test]
    fn counts_are_cached_between_calls() {
        let jobs = Arc::new(MockJobs::default());
        jobs.set_count("LCG.CERN.ch", "JobType", "Merge", 2);
        let lim = limiter(
            limits_config("LCG.CERN.ch", "JobType", "Merge", 2),
            jobs.clone(),
        );

        lim.negative_cond_for_site("LCG.CERN.ch", None).unwrap();
        lim.negative_cond_for_site("LCG.CERN.ch", None).unwrap();
        assert_eq!(jobs.count_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_counter_registers_and_expires() {
        let jobs = Arc::new(MockJobs::default());
        jobs.set_job("job-1", &[("JobType", "Merge"), ("Owner", "alice")]);

        let mut config = LimiterConfig {
            check_job_limit: false,
            ..LimiterConfig::default()
        };
        config.site_delays.insert(
            "LCG.CERN.ch".to_string(),
            HashMap::from([(
                "JobType".to_string(),
                HashMap::from([("Merge".to_string(), 1)]),
            )]),
        );
        let lim = limiter(config, jobs);

        lim.update_delay_counters("LCG.CERN.ch", "job-1").unwrap();
        let cond = lim.negative_cond_for_site("LCG.CERN.ch", None).unwrap();
        assert_eq!(cond["JobType"], vec!["Merge"]);

        // Other sites are unaffected.
        let other = lim.negative_cond_for_site("LCG.GRIDKA.de", None).unwrap();
        assert!(other.is_empty());

        std::thread::sleep(Duration::from_millis(1100));
        let cond = lim.negative_cond_for_site("LCG.CERN.ch", None).unwrap();
        assert!(cond.is_empty());
    }

    #[test]
    fn delay_counter_ignores_unconfigured_values() {
        let jobs = Arc::new(MockJobs::default());
        jobs.set_job("job-1", &[("JobType", "User")]);

        let mut config = LimiterConfig::default();
        config.site_delays.insert(
            "LCG.CERN.ch".to_string(),
            HashMap::from([(
                "JobType".to_string(),
                HashMap::from([("Merge".to_string(), 60)]),
            )]),
        );
        let lim = limiter(config, jobs);

        lim.update_delay_counters("LCG.CERN.ch", "job-1").unwrap();
        let cond = lim.negative_cond_for_site("LCG.CERN.ch", None).unwrap();
        assert!(cond.is_empty());
    }

    #[test]
    fn global_negative_cond_covers_all_sites_and_skips_empty() {
        let jobs = Arc::new(MockJobs::default());
        jobs.set_count("LCG.CERN.ch", "JobType", "Merge", 9);
        jobs.set_count("LCG.GRIDKA.de", "JobType", "Merge", 0);

        let mut config = limits_config("LCG.CERN.ch", "JobType", "Merge", 2);
        config.site_limits.insert(
            "LCG.GRIDKA.de".to_string(),
            HashMap::from([(
                "JobType".to_string(),
                HashMap::from([("Merge".to_string(), 2)]),
            )]),
        );
        let lim = limiter(config, jobs.clone());

        let all = lim.negative_cond().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["LCG.CERN.ch"]["JobType"], vec!["Merge"]);

        // The all-sites result is cached as a whole.
        let calls_after_first = jobs.count_calls.load(Ordering::SeqCst);
        lim.negative_cond().unwrap();
        assert_eq!(jobs.count_calls.load(Ordering::SeqCst), calls_after_first);
    }
}
