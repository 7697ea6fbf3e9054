//! Mediation state machine.
//!
//! Routes one user interaction through translation, danger checking,
//! human approval, execution and post-failure repair. The graph is an
//! explicit set of steps over a single workflow record, driven by an
//! outer loop; every node is a plain function and testable in isolation.

mod driver;
mod nodes;

pub use driver::{Outcome, Workflow, WorkflowOptions};

use crate::exec::ExecutionResult;
use crate::safety::DangerVerdict;
use crate::translate::Candidate;

/// One user interaction. Exactly one input kind must be populated:
/// a natural-language request, a (failed command, error text) pair, or a
/// direct command. `intent` is an optional free-text hint for repair.
#[derive(Debug, Clone, Default)]
pub struct MediationRequest {
    pub user_request: Option<String>,
    pub failed_command: Option<String>,
    pub error_text: Option<String>,
    pub direct_command: Option<String>,
    pub intent: Option<String>,
}

impl MediationRequest {
    pub fn from_request(request: impl Into<String>) -> Self {
        Self {
            user_request: Some(request.into()),
            ..Default::default()
        }
    }

    pub fn from_failure(command: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            failed_command: Some(command.into()),
            error_text: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn from_direct(command: impl Into<String>) -> Self {
        Self {
            direct_command: Some(command.into()),
            ..Default::default()
        }
    }
}

/// Where the current candidate came from. Direct commands skip both the
/// danger check and the approval gate: a user typing a command has
/// already accepted responsibility for it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Source {
    #[default]
    Translated,
    Direct,
}

/// Outcome of the approval gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Safe (or direct) command approved without prompting.
    Auto,
    /// Human answered yes at the confirmation prompt.
    Approved,
    /// Human asked for a replan, with optional feedback.
    Rejected { feedback: String },
    /// Nothing will execute.
    Cancelled,
}

/// Steps of the mediation graph. `End` is the only terminal step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Route,
    FromRequest,
    FromError,
    FromDirect,
    DangerCheck,
    ApprovalGate,
    Run,
    Replan,
    ErrorDecision,
    End,
}

/// Mutable record threaded through the nodes.
#[derive(Default)]
pub(crate) struct WorkflowState {
    pub request: MediationRequest,
    pub source: Source,
    pub candidate: Option<Candidate>,
    pub verdict: Option<DangerVerdict>,
    pub approval: Option<ApprovalDecision>,
    pub result: Option<ExecutionResult>,
    /// Set by the run node on a non-zero exit, consumed by repair.
    pub last_command: Option<String>,
    pub last_error: Option<String>,
}

impl WorkflowState {
    pub fn new(request: MediationRequest) -> Self {
        Self {
            request,
            ..Default::default()
        }
    }

    pub fn candidate_command(&self) -> &str {
        self.candidate.as_ref().map(|c| c.command.as_str()).unwrap_or("")
    }

    pub fn candidate_explanation(&self) -> &str {
        self.candidate
            .as_ref()
            .map(|c| c.explanation.as_str())
            .unwrap_or("")
    }
}
