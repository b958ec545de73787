//! Lifecycle error type and the transition policy for leads, tasks and
//! opportunities.
//!
//! Every mutating path asks the `check_*` function for its entity before
//! writing a new state. The default policy is permissive inside each funnel;
//! terminal states are only reachable through their dedicated operations.

use thiserror::Error;
use uuid::Uuid;

use crate::models::{LeadStatus, OpportunityStage, TaskStatus};
use crate::store::StoreError;

/// Result type for lifecycle operations.
pub type CrmResult<T> = Result<T, CrmError>;

/// Why a lifecycle operation did not produce a result.
#[derive(Debug, Error)]
pub enum CrmError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    /// Lookup by natural key (e.g. a setting key) found nothing.
    #[error("{entity} '{key}' not found")]
    KeyNotFound { entity: &'static str, key: String },

    /// Conversion requires the qualifying lead status.
    #[error("lead {id} has status '{status}', only '{required}' leads can be converted")]
    NotQualified {
        id: Uuid,
        status: LeadStatus,
        required: LeadStatus,
    },

    #[error("lead {0} has already been converted")]
    AlreadyConverted(Uuid),

    #[error("opportunity {0} is already closed")]
    AlreadyClosed(Uuid),

    #[error("task {0} is already completed")]
    AlreadyCompleted(Uuid),

    #[error("{entity} cannot move from '{from}' to '{to}'{hint}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
        hint: &'static str,
    },

    /// Another request changed the record between read and write.
    #[error("{entity} {id} was modified concurrently, retry the request")]
    Conflict { entity: &'static str, id: Uuid },

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(StoreError),
}

impl CrmError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        CrmError::NotFound { entity, id }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CrmError::Validation(message.into())
    }
}

impl From<StoreError> for CrmError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => CrmError::NotFound { entity, id },
            StoreError::Conflict { entity, id } => CrmError::Conflict { entity, id },
            other => CrmError::Store(other),
        }
    }
}

/// Lead policy: any funnel status may follow any other. `converted` is set by
/// conversion only and nothing follows it.
pub fn check_lead_transition(from: LeadStatus, to: LeadStatus) -> CrmResult<()> {
    if from == to {
        return Ok(());
    }
    if to == LeadStatus::Converted {
        return Err(invalid("lead", from, to, " (use the convert operation)"));
    }
    if from == LeadStatus::Converted {
        return Err(invalid("lead", from, to, " (converted leads are final)"));
    }
    Ok(())
}

/// Task policy: free movement between open, in_progress, deferred and
/// cancelled. `completed` is set by completion only and nothing follows it.
pub fn check_task_transition(from: TaskStatus, to: TaskStatus) -> CrmResult<()> {
    if from == to {
        return Ok(());
    }
    if to == TaskStatus::Completed {
        return Err(invalid("task", from, to, " (use the complete operation)"));
    }
    if from == TaskStatus::Completed {
        return Err(invalid("task", from, to, " (completed tasks are final)"));
    }
    Ok(())
}

/// Opportunity policy: free movement between open stages. Closed stages are
/// set by closing only and are terminal.
pub fn check_stage_transition(
    id: Uuid,
    from: OpportunityStage,
    to: OpportunityStage,
) -> CrmResult<()> {
    if from == to {
        return Ok(());
    }
    if from.is_closed() {
        return Err(CrmError::AlreadyClosed(id));
    }
    if to.is_closed() {
        return Err(invalid(
            "opportunity",
            from,
            to,
            " (use the close operation)",
        ));
    }
    Ok(())
}

fn invalid(
    entity: &'static str,
    from: impl ToString,
    to: impl ToString,
    hint: &'static str,
) -> CrmError {
    CrmError::InvalidTransition {
        entity,
        from: from.to_string(),
        to: to.to_string(),
        hint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FUNNEL: [LeadStatus; 5] = [
        LeadStatus::Cold,
        LeadStatus::Warm,
        LeadStatus::Hot,
        LeadStatus::ToBeDone,
        LeadStatus::Disqualified,
    ];

    #[test]
    fn lead_funnel_is_unrestricted() {
        for from in FUNNEL {
            for to in FUNNEL {
                assert!(check_lead_transition(from, to).is_ok(), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn converted_is_terminal_and_not_settable() {
        assert!(check_lead_transition(LeadStatus::Hot, LeadStatus::Converted).is_err());
        assert!(check_lead_transition(LeadStatus::Converted, LeadStatus::Cold).is_err());
        assert!(check_lead_transition(LeadStatus::Converted, LeadStatus::Converted).is_ok());
    }

    #[test]
    fn task_completion_only_through_complete() {
        assert!(check_task_transition(TaskStatus::Open, TaskStatus::InProgress).is_ok());
        assert!(check_task_transition(TaskStatus::Cancelled, TaskStatus::Open).is_ok());
        assert!(matches!(
            check_task_transition(TaskStatus::Open, TaskStatus::Completed),
            Err(CrmError::InvalidTransition { .. })
        ));
        assert!(check_task_transition(TaskStatus::Completed, TaskStatus::Open).is_err());
    }

    #[test]
    fn closed_stages_are_terminal() {
        let id = Uuid::new_v4();
        assert!(
            check_stage_transition(id, OpportunityStage::Qualification, OpportunityStage::Negotiation)
                .is_ok()
        );
        assert!(matches!(
            check_stage_transition(id, OpportunityStage::Proposal, OpportunityStage::ClosedWon),
            Err(CrmError::InvalidTransition { .. })
        ));
        assert!(matches!(
            check_stage_transition(id, OpportunityStage::ClosedLost, OpportunityStage::Proposal),
            Err(CrmError::AlreadyClosed(_))
        ));
    }

    #[test]
    fn store_conflicts_keep_their_meaning() {
        let id = Uuid::new_v4();
        let err: CrmError = StoreError::Conflict {
            entity: "task",
            id,
        }
        .into();
        assert!(matches!(err, CrmError::Conflict { entity: "task", .. }));

        let err: CrmError = StoreError::Duplicate("uq".into()).into();
        assert!(matches!(err, CrmError::Store(StoreError::Duplicate(_))));
    }
}
