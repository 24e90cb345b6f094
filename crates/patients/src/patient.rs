use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use clinic_core::{AccountId, ClinicId, Entity, PatientId, TagId};
use clinic_workspace::Site;

/// Access a clinic has been granted to a patient's data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// The clinic manages the account on the patient's behalf.
    #[serde(default)]
    pub custodian: bool,
    #[serde(default)]
    pub upload: bool,
    #[serde(default)]
    pub note: bool,
    #[serde(default)]
    pub view: bool,
}

impl Permissions {
    pub fn custodial() -> Self {
        Self {
            custodian: true,
            upload: true,
            note: true,
            view: true,
        }
    }

    pub fn shared() -> Self {
        Self {
            custodian: false,
            upload: true,
            note: true,
            view: true,
        }
    }
}

/// Summary statistics computed elsewhere and attached to the patient.
///
/// Only the last upload time is interpreted here. Every other statistic is
/// carried through verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_upload_date: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub statistics: BTreeMap<String, serde_json::Value>,
}

/// A patient record inside one clinic workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub clinic_id: ClinicId,
    /// Absent for records no user has claimed yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<AccountId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mrn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub tags: Vec<TagId>,
    #[serde(default)]
    pub sites: Vec<Site>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<PatientSummary>,
}

impl Patient {
    pub fn new(clinic_id: ClinicId) -> Self {
        Self {
            id: PatientId::new(),
            clinic_id,
            account_id: None,
            mrn: None,
            full_name: None,
            birth_date: None,
            email: None,
            tags: Vec::new(),
            sites: Vec::new(),
            permissions: Some(Permissions::shared()),
            summary: None,
        }
    }

    /// The account is managed by clinic staff rather than claimed by the patient.
    pub fn is_custodial(&self) -> bool {
        self.permissions.is_some_and(|p| p.custodian)
    }

    pub fn last_upload_date(&self) -> Option<DateTime<Utc>> {
        self.summary.as_ref().and_then(|s| s.last_upload_date)
    }

    pub fn has_site(&self, site: &Site) -> bool {
        self.sites.iter().any(|s| s.same_entity(site))
    }

    /// Copy suitable for persistence after reporting: summary statistics are
    /// recomputed by the owning service and are not written back.
    pub fn without_summary(&self) -> Self {
        Self {
            summary: None,
            ..self.clone()
        }
    }
}

impl Entity for Patient {
    type Id = PatientId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn custodial_follows_permissions() {
        let mut patient = Patient::new(ClinicId::new());
        assert!(!patient.is_custodial());

        patient.permissions = Some(Permissions::custodial());
        assert!(patient.is_custodial());

        patient.permissions = None;
        assert!(!patient.is_custodial());
    }

    #[test]
    fn summary_statistics_survive_serialization() {
        let mut patient = Patient::new(ClinicId::new());
        let upload = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let mut statistics = BTreeMap::new();
        statistics.insert("timeInRange".to_string(), serde_json::json!(0.72));
        patient.summary = Some(PatientSummary {
            last_upload_date: Some(upload),
            statistics,
        });

        let json = serde_json::to_value(&patient).unwrap();
        let back: Patient = serde_json::from_value(json).unwrap();
        assert_eq!(back.last_upload_date(), Some(upload));
        assert_eq!(
            back.summary.unwrap().statistics.get("timeInRange"),
            Some(&serde_json::json!(0.72))
        );
    }

    #[test]
    fn without_summary_strips_only_the_summary() {
        let mut patient = Patient::new(ClinicId::new());
        patient.mrn = Some("A-1".into());
        patient.summary = Some(PatientSummary::default());

        let stripped = patient.without_summary();
        assert!(stripped.summary.is_none());
        assert_eq!(stripped.mrn.as_deref(), Some("A-1"));
        assert_eq!(stripped.id, patient.id);
    }
}
