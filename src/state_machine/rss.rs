use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::state::{StateDef, StateMachine};
use crate::error::{GridwatchError, Result};
use crate::policy::PolicyResult;

/// The six statuses an element can hold.
///
/// The numeric level orders statuses by severity (lower = more severe) and is
/// used only for sorting policy results, never for transition legality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RssStatus {
    Error,
    Banned,
    Probing,
    Degraded,
    Active,
    Unknown,
}

impl RssStatus {
    pub const ALL: [RssStatus; 6] = [
        RssStatus::Error,
        RssStatus::Banned,
        RssStatus::Probing,
        RssStatus::Degraded,
        RssStatus::Active,
        RssStatus::Unknown,
    ];

    pub fn level(self) -> i32 {
        match self {
            RssStatus::Error => 0,
            RssStatus::Banned => 1,
            RssStatus::Probing => 2,
            RssStatus::Degraded => 3,
            RssStatus::Active => 4,
            RssStatus::Unknown => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RssStatus::Error => "Error",
            RssStatus::Banned => "Banned",
            RssStatus::Probing => "Probing",
            RssStatus::Degraded => "Degraded",
            RssStatus::Active => "Active",
            RssStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for RssStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RssStatus {
    type Err = GridwatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Error" => Ok(RssStatus::Error),
            "Banned" => Ok(RssStatus::Banned),
            "Probing" => Ok(RssStatus::Probing),
            "Degraded" => Ok(RssStatus::Degraded),
            "Active" => Ok(RssStatus::Active),
            "Unknown" => Ok(RssStatus::Unknown),
            other => Err(GridwatchError::InvalidState(other.to_string())),
        }
    }
}

/// The resource-status state machine.
///
/// Every state is unrestricted except `Banned`, which only reaches `Error`,
/// `Banned` or `Probing` and redirects anything else to `Probing`; a banned
/// element must prove itself again before going back into production.
#[derive(Debug, Clone)]
pub struct RssMachine {
    machine: StateMachine,
}

impl RssMachine {
    pub fn new(current: Option<RssStatus>) -> Self {
        let states = HashMap::from([
            ("Unknown".to_string(), StateDef::new(5, &[], None)),
            ("Active".to_string(), StateDef::new(4, &[], None)),
            ("Degraded".to_string(), StateDef::new(3, &[], None)),
            ("Probing".to_string(), StateDef::new(2, &[], None)),
            (
                "Banned".to_string(),
                StateDef::new(1, &["Error", "Banned", "Probing"], Some("Probing")),
            ),
            ("Error".to_string(), StateDef::new(0, &[], None)),
        ]);
        Self {
            machine: StateMachine::new(current.map(RssStatus::as_str), states),
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.machine.current()
    }

    pub fn level_of(&self, name: &str) -> i32 {
        self.machine.level_of(name)
    }

    /// Resolve a proposed status against the current one without committing.
    pub fn next_state(&self, candidate: &str) -> Result<String> {
        self.machine.next_state(candidate)
    }

    pub fn set_state(&mut self, candidate: Option<&str>, no_warn: bool) -> Result<Option<String>> {
        self.machine.set_state(candidate, no_warn)
    }

    /// Sort policy results in place, most severe first (ascending level).
    /// Statuses that are not valid state names carry level -1 and sort ahead
    /// of everything.
    pub fn order_policy_results(&self, results: &mut [PolicyResult]) {
        results.sort_by_key(|r| self.machine.level_of(&r.status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: &str) -> PolicyResult {
        PolicyResult {
            status: status.to_string(),
            reason: String::new(),
        }
    }

    #[test]
    fn status_display_roundtrip() {
        for status in RssStatus::ALL {
            assert_eq!(status.as_str().parse::<RssStatus>().unwrap(), status);
        }
        assert!("NotAState".parse::<RssStatus>().is_err());
    }

    #[test]
    fn levels_are_ordered_by_severity() {
        assert_eq!(RssStatus::Error.level(), 0);
        assert_eq!(RssStatus::Banned.level(), 1);
        assert_eq!(RssStatus::Probing.level(), 2);
        assert_eq!(RssStatus::Degraded.level(), 3);
        assert_eq!(RssStatus::Active.level(), 4);
        assert_eq!(RssStatus::Unknown.level(), 5);
    }

    #[test]
    fn banned_redirects_to_probing() {
        let rss = RssMachine::new(Some(RssStatus::Banned));
        assert_eq!(rss.next_state("Active").unwrap(), "Probing");
        assert_eq!(rss.next_state("Degraded").unwrap(), "Probing");
        assert_eq!(rss.next_state("Unknown").unwrap(), "Probing");
    }

    #[test]
    fn banned_allows_its_own_map() {
        let rss = RssMachine::new(Some(RssStatus::Banned));
        assert_eq!(rss.next_state("Error").unwrap(), "Error");
        assert_eq!(rss.next_state("Banned").unwrap(), "Banned");
        assert_eq!(rss.next_state("Probing").unwrap(), "Probing");
    }

    #[test]
    fn unrestricted_states_move_freely() {
        for from in [RssStatus::Active, RssStatus::Error, RssStatus::Unknown] {
            let rss = RssMachine::new(Some(from));
            for to in RssStatus::ALL {
                assert_eq!(rss.next_state(to.as_str()).unwrap(), to.as_str());
            }
        }
    }

    #[test]
    fn fresh_machine_accepts_any_valid_status() {
        let rss = RssMachine::new(None);
        assert_eq!(rss.next_state("Banned").unwrap(), "Banned");
        assert!(rss.next_state("NotAState").is_err());
    }

    #[test]
    fn policy_results_sort_most_severe_first() {
        let rss = RssMachine::new(None);
        let mut results = vec![result("Active"), result("Error"), result("Banned")];
        rss.order_policy_results(&mut results);
        let order: Vec<&str> = results.iter().map(|r| r.status.as_str()).collect();
        assert_eq!(order, vec!["Error", "Banned", "Active"]);
    }

    #[test]
    fn unknown_status_sorts_first() {
        let rss = RssMachine::new(None);
        let mut results = vec![
            result("Active"),
            result("Error"),
            result("NotAState"),
            result("Banned"),
        ];
        rss.order_policy_results(&mut results);
        assert_eq!(results[0].status, "NotAState");
        assert_eq!(results[1].status, "Error");
    }
}
