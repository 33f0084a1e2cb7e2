//! Policy evaluation seam.
//!
//! The inspector drives each element through a Policy Enforcement Point that
//! combines the individual policy verdicts into one proposed status. The PEP
//! itself lives behind [`PolicyEnforcer`]; this crate only consumes its
//! combined result.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::state_machine::RssStatus;
use crate::store::ElementFamily;

/// One combined policy verdict: a proposed status name plus the reason.
///
/// The status is kept as a string because policies may propose names the
/// state machine does not know; those sort first when ordering results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyResult {
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Reason")]
    pub reason: String,
}

/// Identity and current position of the element under evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub family: ElementFamily,
    pub name: String,
    pub status_type: String,
    pub status: RssStatus,
    pub element_type: String,
}

/// What the enforcement run decided for one element.
#[derive(Debug, Clone)]
pub struct EnforcementResult {
    pub policy_combined: PolicyResult,
}

/// The Policy Enforcement Point, from the caller's point of view a pure
/// function. Evaluation failures come back as error results; they must not
/// escape as panics into the worker threads.
pub trait PolicyEnforcer: Send + Sync {
    fn enforce(&self, element: &ElementDescriptor) -> Result<EnforcementResult>;
}
