//! Clinic merge engine.
//!
//! Merging a source workspace into a target happens in three steps:
//!
//! - [`ClinicMergePlanner`] reads both workspaces and computes a
//!   [`ClinicMergePlan`] without writing anything. Blocking conflicts are
//!   attached to individual plan elements as [`ReportError`]s.
//! - [`ReportGenerator`] renders the plan for human review.
//! - [`ClinicPlanExecutor`] applies an accepted plan, phase by phase, and
//!   records every executed sub-plan for audit.

pub mod clinic;
pub mod clinicians;
pub mod cluster;
pub mod error;
pub mod executor;
pub mod patients;
pub mod plan;
pub mod report;
pub mod settings;
pub mod sites;
pub mod tags;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

#[cfg(test)]
mod integration_tests;

pub use clinic::{ClinicMergePlan, ClinicMergePlanner};
pub use clinicians::{ClinicianAction, ClinicianPlan, ClinicianPlans};
pub use cluster::{ConflictCategory, PatientAttribute, PatientCluster, PatientClusterReporter, PatientClusters};
pub use error::{MergeError, ReportError, unique_error_messages};
pub use executor::ClinicPlanExecutor;
pub use patients::{PatientAction, PatientPlan, PatientPlans};
pub use plan::{Plan, Planner};
pub use report::{ReportGenerator, Workbook};
pub use settings::{MembershipRestrictionsMergePlan, SettingsPlan, SettingsPlans};
pub use sites::{SiteAction, SitePlan, SitePlans};
pub use tags::{TagAction, TagPlan, TagPlans};
