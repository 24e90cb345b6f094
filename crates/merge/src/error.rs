//! Merge error model.
//!
//! Two channels: [`MergeError`] aborts planning or execution (store failures,
//! oversized rosters, refusing a blocked plan), while [`ReportError`] values
//! are attached to individual plan elements and surface through
//! [`crate::plan::Plan::errors`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use clinic_core::{ClinicId, DomainError};
use clinic_infra::StoreError;

/// Business-rule conflict that blocks a merge until the data is fixed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, thiserror::Error)]
pub enum ReportError {
    #[error("MRN uniqueness error(s) for duplicate accounts. View error(s) on the 'Duplicates in Merged Workspace' tab")]
    DuplicateMrnInTargetWorkspace,
    #[error("Target workspace requires MRNs")]
    MrnRequiredInTargetWorkspace,
    #[error("Pending invites is source workspace")]
    PendingInvitesInSourceWorkspace,
    #[error("Settings mismatch")]
    WorkspaceSettingsMismatch,
    #[error("invalid site action for site: {0}")]
    InvalidSite(String),
}

/// Distinct error messages, sorted.
pub fn unique_error_messages(errors: &[ReportError]) -> Vec<String> {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Failure that aborts planning or execution.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("too many patients in clinic {clinic_id} ({count} > {limit})")]
    TooManyPatients {
        clinic_id: ClinicId,
        count: usize,
        limit: usize,
    },

    #[error("too many clinicians in clinic {clinic_id} ({count} > {limit})")]
    TooManyClinicians {
        clinic_id: ClinicId,
        count: usize,
        limit: usize,
    },

    #[error("the merge plan does not allow execution: {0}")]
    PlanPreventsMerge(String),

    #[error("unexpected {entity} plan action: {detail}")]
    UnexpectedAction { entity: &'static str, detail: String },

    #[error("target clinic {clinic_id} changed since the plan was created: {reason}")]
    StaleTarget { clinic_id: ClinicId, reason: String },

    #[error("report generation failed: {0}")]
    Report(String),
}

impl MergeError {
    pub fn unexpected(entity: &'static str, detail: impl Into<String>) -> Self {
        Self::UnexpectedAction {
            entity,
            detail: detail.into(),
        }
    }
}
