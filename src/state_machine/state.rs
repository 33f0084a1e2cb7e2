use std::collections::HashMap;

use tracing::warn;

use crate::error::{GridwatchError, Result};

/// A single named state in a leveled transition graph.
///
/// `level` is an ordering key only (lower = more severe); it plays no part in
/// transition legality. `allowed` lists the state names reachable from here;
/// an empty list means the state places no restriction on outgoing
/// transitions. `default` is the fallback returned when a requested
/// transition is not in `allowed`.
#[derive(Debug, Clone)]
pub struct StateDef {
    pub level: i32,
    allowed: Vec<String>,
    default: Option<String>,
}

impl StateDef {
    pub fn new(level: i32, allowed: &[&str], default: Option<&str>) -> Self {
        Self {
            level,
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
            default: default.map(str::to_string),
        }
    }

    /// An unrestricted state has an empty `allowed` list. Note that
    /// [`StateMachine::set_state`] treats the same condition on the *current*
    /// state as terminal; both readings are preserved from the source system.
    pub fn is_unrestricted(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Resolve a requested transition against this state's rules.
    ///
    /// Transitions are advisory, not enforced: if `next` is not allowed and no
    /// default exists, `next` is returned anyway. Only a configured default
    /// actually redirects an illegal request.
    pub fn transition_rule(&self, next: &str) -> String {
        if self.is_unrestricted() || self.allowed.iter().any(|s| s == next) {
            return next.to_string();
        }
        match &self.default {
            Some(default) => default.clone(),
            None => next.to_string(),
        }
    }
}

/// A named, leveled state graph with a current position.
///
/// `current`, when set, is expected to name a key of `states`; this is
/// checked lazily on transition rather than on construction, so a machine may
/// be built in a transient invalid position before the first `set_state`.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: Option<String>,
    states: HashMap<String, StateDef>,
}

impl StateMachine {
    pub fn new(current: Option<&str>, states: HashMap<String, StateDef>) -> Self {
        Self {
            current: current.map(str::to_string),
            states,
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Ordering key of a state, or -1 for names not in the graph.
    /// Unknown names thus sort before every real state.
    pub fn level_of(&self, name: &str) -> i32 {
        self.states.get(name).map_or(-1, |s| s.level)
    }

    /// Resolve the state the machine would move to for `candidate`.
    ///
    /// With no current state there is no restriction and `candidate` passes
    /// through unchanged; otherwise the current state's transition rule
    /// decides. Unknown candidate names are an error.
    pub fn next_state(&self, candidate: &str) -> Result<String> {
        if !self.states.contains_key(candidate) {
            return Err(GridwatchError::InvalidState(candidate.to_string()));
        }
        match &self.current {
            None => Ok(candidate.to_string()),
            Some(current) => match self.states.get(current) {
                Some(def) => Ok(def.transition_rule(candidate)),
                // Transient invalid current position: no rule to apply.
                None => Ok(candidate.to_string()),
            },
        }
    }

    /// Move the machine toward `candidate` and return the committed state.
    ///
    /// Semantics, in order:
    /// - `None` resets the machine unconditionally.
    /// - A candidate equal to the current state is a no-op success.
    /// - An unknown candidate name is an error.
    /// - A current state with an empty `allowed` list is treated as terminal:
    ///   the machine stays put, a warning is emitted unless `no_warn`, and
    ///   the call still succeeds. This is the counterpart of the unrestricted
    ///   reading in [`StateDef::transition_rule`]; the asymmetry is inherited
    ///   behavior that downstream configuration relies on.
    /// - Otherwise the transition resolves through [`Self::next_state`] and
    ///   commits.
    pub fn set_state(&mut self, candidate: Option<&str>, no_warn: bool) -> Result<Option<String>> {
        let candidate = match candidate {
            None => {
                self.current = None;
                return Ok(None);
            }
            Some(c) => c,
        };

        if self.current.as_deref() == Some(candidate) {
            return Ok(Some(candidate.to_string()));
        }
        if !self.states.contains_key(candidate) {
            return Err(GridwatchError::InvalidState(candidate.to_string()));
        }

        if let Some(current) = &self.current
            && let Some(def) = self.states.get(current)
            && def.is_unrestricted()
        {
            if !no_warn {
                warn!(current = %current, candidate = %candidate, "state is terminal, not moving");
            }
            return Ok(self.current.clone());
        }

        let resolved = self.next_state(candidate)?;
        self.current = Some(resolved.clone());
        Ok(Some(resolved))
    }
}
