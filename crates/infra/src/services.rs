//! Collaborator service contracts consumed by the merge engine.
//!
//! These mirror the CRUD repositories that own clinics, patients and
//! clinicians. Method names carry the entity so a single store type can
//! implement every trait without call-site ambiguity.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use clinic_clinicians::Clinician;
use clinic_core::{AccountId, ClinicId, ClinicianId, ExpectedVersion, PatientId, SiteId};
use clinic_patients::Patient;
use clinic_workspace::{Clinic, PatientTag, Site};

use crate::error::StoreError;

/// Offset/limit page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
}

impl Pagination {
    pub const DEFAULT_LIMIT: usize = 10;

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// The page following this one.
    pub fn next(self) -> Self {
        Self {
            offset: self.offset + self.limit,
            limit: self.limit,
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

/// Patient query. Every set field must match exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatientFilter {
    pub clinic_id: Option<ClinicId>,
    pub account_id: Option<AccountId>,
    pub mrn: Option<String>,
    pub full_name: Option<String>,
    pub birth_date: Option<NaiveDate>,
}

impl PatientFilter {
    pub fn clinic(clinic_id: ClinicId) -> Self {
        Self {
            clinic_id: Some(clinic_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, patient: &Patient) -> bool {
        fn eq<T: PartialEq>(want: &Option<T>, have: &Option<T>) -> bool {
            want.as_ref().is_none_or(|w| have.as_ref() == Some(w))
        }

        self.clinic_id.is_none_or(|c| c == patient.clinic_id)
            && eq(&self.account_id, &patient.account_id)
            && eq(&self.mrn, &patient.mrn)
            && eq(&self.full_name, &patient.full_name)
            && eq(&self.birth_date, &patient.birth_date)
    }
}

/// One page of patients plus the number of patients matching the filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientPage {
    pub patients: Vec<Patient>,
    pub total_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClinicianFilter {
    pub clinic_id: Option<ClinicId>,
}

impl ClinicianFilter {
    pub fn clinic(clinic_id: ClinicId) -> Self {
        Self {
            clinic_id: Some(clinic_id),
        }
    }

    pub fn matches(&self, clinician: &Clinician) -> bool {
        self.clinic_id.is_none_or(|c| c == clinician.clinic_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClinicianPage {
    pub clinicians: Vec<Clinician>,
    pub total_count: usize,
}

/// Clinic workspaces, their sites, tags, admins and share codes.
pub trait ClinicsService: Send + Sync {
    fn get_clinic(&self, id: ClinicId) -> Result<Clinic, StoreError>;

    fn list_clinics(&self) -> Result<Vec<Clinic>, StoreError>;

    fn create_clinic(&self, clinic: Clinic) -> Result<Clinic, StoreError>;

    /// Replace a clinic. Fails with `Conflict` when the stored version does
    /// not satisfy `expected`.
    fn update_clinic(&self, clinic: Clinic, expected: ExpectedVersion) -> Result<Clinic, StoreError>;

    /// Delete a clinic. Fails with `Conflict` while patients or clinicians
    /// still belong to it.
    fn delete_clinic(&self, id: ClinicId) -> Result<(), StoreError>;

    /// Add a site. Fails with `MaximumSitesExceeded` when the clinic is full
    /// and with `Conflict` when a site of the same name (any case) exists.
    fn create_site(&self, clinic_id: ClinicId, site: Site) -> Result<Site, StoreError>;

    fn update_site(&self, clinic_id: ClinicId, site_id: SiteId, site: Site) -> Result<Site, StoreError>;

    fn delete_site(&self, clinic_id: ClinicId, site_id: SiteId) -> Result<(), StoreError>;

    fn list_sites(&self, clinic_id: ClinicId) -> Result<Vec<Site>, StoreError>;

    /// Create a tag, or return the existing tag with the same name.
    fn create_patient_tag(&self, clinic_id: ClinicId, name: &str) -> Result<PatientTag, StoreError>;

    fn update_patient_count(&self, clinic_id: ClinicId, count: u64) -> Result<(), StoreError>;

    fn append_share_codes(&self, clinic_id: ClinicId, share_codes: &[String]) -> Result<(), StoreError>;

    fn add_admin(&self, clinic_id: ClinicId, account_id: &AccountId) -> Result<(), StoreError>;
}

/// Patient records.
pub trait PatientsService: Send + Sync {
    fn list_patients(&self, filter: &PatientFilter, page: Pagination) -> Result<PatientPage, StoreError>;

    fn get_patient(&self, clinic_id: ClinicId, patient_id: PatientId) -> Result<Patient, StoreError>;

    fn create_patient(&self, patient: Patient) -> Result<Patient, StoreError>;

    /// Replace a patient, possibly moving it to another clinic.
    fn update_patient(&self, patient: Patient) -> Result<Patient, StoreError>;

    fn remove_patient(&self, clinic_id: ClinicId, patient_id: PatientId) -> Result<(), StoreError>;

    /// Replace the embedded copy of `site_id` on every patient of a clinic.
    /// Returns the number of patients touched.
    fn update_patient_sites(&self, clinic_id: ClinicId, site_id: SiteId, site: &Site) -> Result<usize, StoreError>;

    /// Drop `site_id` from every patient of a clinic. Returns the number of
    /// patients touched.
    fn delete_patient_sites(&self, clinic_id: ClinicId, site_id: SiteId) -> Result<usize, StoreError>;

    fn count_patients(&self, clinic_id: ClinicId) -> Result<u64, StoreError>;
}

/// Clinician memberships and pending invites.
pub trait CliniciansService: Send + Sync {
    fn get_clinician(&self, clinic_id: ClinicId, clinician_id: ClinicianId) -> Result<Clinician, StoreError>;

    fn list_clinicians(&self, filter: &ClinicianFilter, page: Pagination) -> Result<ClinicianPage, StoreError>;

    fn create_clinician(&self, clinician: Clinician) -> Result<Clinician, StoreError>;

    fn update_clinician(&self, clinician: Clinician) -> Result<Clinician, StoreError>;

    fn remove_clinician(&self, clinic_id: ClinicId, clinician_id: ClinicianId) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_page_advances_by_limit() {
        let page = Pagination::default().with_limit(1000);
        assert_eq!(page.next().offset, 1000);
        assert_eq!(page.next().next().offset, 2000);
    }

    #[test]
    fn filter_requires_every_set_field() {
        let clinic_id = ClinicId::new();
        let mut patient = Patient::new(clinic_id);
        patient.mrn = Some("M1".into());

        let mut filter = PatientFilter::clinic(clinic_id);
        assert!(filter.matches(&patient));

        filter.mrn = Some("M1".into());
        assert!(filter.matches(&patient));

        filter.full_name = Some("Jane".into());
        assert!(!filter.matches(&patient));
    }
}
