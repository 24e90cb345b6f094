//! Persisted merge plans.
//!
//! Every executed merge writes one audit record per sub-plan, all sharing the
//! same [`PlanId`] and discriminated by [`PlanType`], so questions like "which
//! patients did merge X touch" can be answered after the fact.

#[cfg(feature = "postgres")]
pub mod postgres;

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clinic_core::PlanId;

use crate::error::StoreError;

#[cfg(feature = "postgres")]
pub use postgres::PostgresPlanStore;

/// Kind of sub-plan stored in a [`PersistedPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Clinic,
    Tag,
    Patient,
    Clinician,
    Site,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Clinic => "clinic",
            PlanType::Tag => "tag",
            PlanType::Patient => "patient",
            PlanType::Clinician => "clinician",
            PlanType::Site => "site",
        }
    }
}

impl core::fmt::Display for PlanType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clinic" => Ok(PlanType::Clinic),
            "tag" => Ok(PlanType::Tag),
            "patient" => Ok(PlanType::Patient),
            "clinician" => Ok(PlanType::Clinician),
            "site" => Ok(PlanType::Site),
            other => Err(StoreError::Serialization(format!("unknown plan type: {other}"))),
        }
    }
}

/// Audit record for one executed sub-plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedPlan {
    pub plan_id: PlanId,
    pub plan_type: PlanType,
    pub plan: serde_json::Value,
    pub created_time: DateTime<Utc>,
}

impl PersistedPlan {
    pub fn new<P: Serialize>(plan_id: PlanId, plan_type: PlanType, plan: &P) -> Result<Self, StoreError> {
        Ok(Self {
            plan_id,
            plan_type,
            plan: serde_json::to_value(plan)?,
            created_time: Utc::now(),
        })
    }
}

/// Append-only store of executed sub-plans.
pub trait PlanStore: Send + Sync {
    fn insert_plan(&self, plan: PersistedPlan) -> Result<(), StoreError>;

    /// Sub-plans of one merge in insertion order, optionally of one type.
    fn find_plans(&self, plan_id: PlanId, plan_type: Option<PlanType>) -> Result<Vec<PersistedPlan>, StoreError>;

    /// Distinct plan ids in the order they were first written.
    fn list_plan_ids(&self) -> Result<Vec<PlanId>, StoreError>;
}
