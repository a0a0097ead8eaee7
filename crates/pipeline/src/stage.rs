//! Stage identity, ordering, and the reviewer approval state machine.
//!
//! The five stages run in a fixed order. Each stage carries a [`StageStatus`]
//! that only moves through the transitions in [`StageStatus::apply`]; every
//! other combination is an illegal transition and is rejected before any
//! executor is invoked.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Stage identity
// ---------------------------------------------------------------------------

/// One of the five fixed steps of the survey-research pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Turns the research brief into a survey specification.
    Framing,
    /// Turns the specification into concrete survey questions.
    SurveyDesign,
    /// Describes who should receive the survey.
    CohortSelection,
    /// Hands the survey and cohort to the external distribution collaborator.
    Distribution,
    /// Hands collected responses to the external analysis collaborator.
    Analysis,
}

impl StageId {
    /// All stages in pipeline order.
    pub const ORDER: [StageId; 5] = [
        StageId::Framing,
        StageId::SurveyDesign,
        StageId::CohortSelection,
        StageId::Distribution,
        StageId::Analysis,
    ];

    /// The first stage of every pipeline.
    pub const FIRST: StageId = StageId::Framing;

    /// Zero-based position of this stage in [`StageId::ORDER`].
    pub fn index(self) -> usize {
        match self {
            StageId::Framing => 0,
            StageId::SurveyDesign => 1,
            StageId::CohortSelection => 2,
            StageId::Distribution => 3,
            StageId::Analysis => 4,
        }
    }

    /// The stage that follows this one, or `None` for the final stage.
    pub fn next(self) -> Option<StageId> {
        Self::ORDER.get(self.index() + 1).copied()
    }

    /// The stage that precedes this one, or `None` for [`StageId::Framing`].
    pub fn previous(self) -> Option<StageId> {
        self.index().checked_sub(1).map(|i| Self::ORDER[i])
    }

    /// Stable snake_case name used in logs, snapshots, and the CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            StageId::Framing => "framing",
            StageId::SurveyDesign => "survey_design",
            StageId::CohortSelection => "cohort_selection",
            StageId::Distribution => "distribution",
            StageId::Analysis => "analysis",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ORDER
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Approval state machine
// ---------------------------------------------------------------------------

/// Review status of a single stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// No artifact has been produced yet.
    #[default]
    Pending,
    /// An artifact exists and waits for the reviewer.
    AwaitingApproval,
    /// The reviewer accepted the current artifact.
    Approved,
}

/// A reviewer-driven event applied to one stage's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewAction {
    /// The stage's executor produced its first artifact.
    Generate,
    /// The stage's executor produced a revised artifact from feedback.
    Revise,
    /// The reviewer accepted the current artifact.
    Approve,
}

impl StageStatus {
    /// Applies `action` to this status.
    ///
    /// Returns `None` for an illegal transition. The full table:
    ///
    /// | From | Action | To |
    /// |------|--------|----|
    /// | `Pending` | `Generate` | `AwaitingApproval` |
    /// | `AwaitingApproval` | `Revise` | `AwaitingApproval` |
    /// | `AwaitingApproval` | `Approve` | `Approved` |
    pub fn apply(self, action: ReviewAction) -> Option<StageStatus> {
        match (self, action) {
            (StageStatus::Pending, ReviewAction::Generate) => Some(StageStatus::AwaitingApproval),
            (StageStatus::AwaitingApproval, ReviewAction::Revise) => {
                Some(StageStatus::AwaitingApproval)
            }
            (StageStatus::AwaitingApproval, ReviewAction::Approve) => Some(StageStatus::Approved),
            _ => None,
        }
    }

    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::AwaitingApproval => "awaiting_approval",
            StageStatus::Approved => "approved",
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------

/// Orchestrator operation names, carried by precondition errors and spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Advance,
    Revise,
    Approve,
    Reset,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Advance => "advance",
            Operation::Revise => "revise",
            Operation::Approve => "approve",
            Operation::Reset => "reset",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
