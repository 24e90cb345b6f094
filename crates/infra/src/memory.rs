//! In-memory implementation of every collaborator service.
//!
//! Used by tests, the CLI and local development. Transactions take a full
//! snapshot of the state and restore it when the unit of work fails.
//! Transactions serialize with each other; plain writes issued from other
//! threads while a transaction is open are lost if it rolls back.

use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use clinic_clinicians::Clinician;
use clinic_core::{
    AccountId, ClinicId, ClinicianId, ExpectedVersion, PatientId, PlanId, SiteId,
};
use clinic_patients::Patient;
use clinic_workspace::{Clinic, MAX_SITES_PER_CLINIC, PatientTag, Site, site_exists_with_name};

use crate::error::StoreError;
use crate::plans::{PersistedPlan, PlanStore, PlanType};
use crate::services::{
    ClinicianFilter, ClinicianPage, CliniciansService, ClinicsService, Pagination, PatientFilter,
    PatientPage, PatientsService,
};
use crate::transaction::Transactional;

/// Serializable dump of an [`InMemoryStore`], also the CLI fixture format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub clinics: Vec<Clinic>,
    #[serde(default)]
    pub patients: Vec<Patient>,
    #[serde(default)]
    pub clinicians: Vec<Clinician>,
    #[serde(default)]
    pub plans: Vec<PersistedPlan>,
}

#[derive(Debug, Clone, Default)]
struct State {
    clinics: BTreeMap<ClinicId, Clinic>,
    patients: BTreeMap<PatientId, Patient>,
    clinicians: BTreeMap<ClinicianId, Clinician>,
    plans: Vec<PersistedPlan>,
}

impl State {
    fn clinic_mut(&mut self, id: ClinicId) -> Result<&mut Clinic, StoreError> {
        self.clinics
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("clinic", id))
    }

    fn account_taken(&self, clinic_id: ClinicId, account_id: &AccountId, except: PatientId) -> bool {
        self.patients.values().any(|p| {
            p.clinic_id == clinic_id && p.id != except && p.account_id.as_ref() == Some(account_id)
        })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    tx_lock: Mutex<()>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let state = State {
            clinics: snapshot.clinics.into_iter().map(|c| (c.id, c)).collect(),
            patients: snapshot.patients.into_iter().map(|p| (p.id, p)).collect(),
            clinicians: snapshot.clinicians.into_iter().map(|c| (c.id, c)).collect(),
            plans: snapshot.plans,
        };
        Self {
            state: RwLock::new(state),
            tx_lock: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        let state = self.read()?;
        Ok(StoreSnapshot {
            clinics: state.clinics.values().cloned().collect(),
            patients: state.patients.values().cloned().collect(),
            clinicians: state.clinicians.values().cloned().collect(),
            plans: state.plans.clone(),
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Storage("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Storage("in-memory store lock poisoned".to_string()))
    }

    /// Apply `f` to a clinic and bump its version.
    fn modify_clinic<T>(
        &self,
        id: ClinicId,
        f: impl FnOnce(&mut Clinic) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.write()?;
        let clinic = state.clinic_mut(id)?;
        let out = f(clinic)?;
        clinic.version += 1;
        Ok(out)
    }
}

impl Transactional for InMemoryStore {
    fn with_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<StoreError>,
    {
        let _guard = self
            .tx_lock
            .lock()
            .map_err(|_| StoreError::Storage("transaction lock poisoned".to_string()))?;
        let before = self.read()?.clone();

        match f() {
            Ok(value) => Ok(value),
            Err(err) => {
                debug!("rolling back in-memory transaction");
                *self.write()? = before;
                Err(err)
            }
        }
    }
}

impl ClinicsService for InMemoryStore {
    fn get_clinic(&self, id: ClinicId) -> Result<Clinic, StoreError> {
        self.read()?
            .clinics
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("clinic", id))
    }

    fn list_clinics(&self) -> Result<Vec<Clinic>, StoreError> {
        Ok(self.read()?.clinics.values().cloned().collect())
    }

    fn create_clinic(&self, clinic: Clinic) -> Result<Clinic, StoreError> {
        let mut state = self.write()?;
        if state.clinics.contains_key(&clinic.id) {
            return Err(StoreError::conflict(format!("clinic {} already exists", clinic.id)));
        }
        state.clinics.insert(clinic.id, clinic.clone());
        Ok(clinic)
    }

    fn update_clinic(&self, mut clinic: Clinic, expected: ExpectedVersion) -> Result<Clinic, StoreError> {
        let mut state = self.write()?;
        let current = state.clinic_mut(clinic.id)?;
        expected
            .check(current.version)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;
        clinic.version = current.version + 1;
        *current = clinic.clone();
        Ok(clinic)
    }

    fn delete_clinic(&self, id: ClinicId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if !state.clinics.contains_key(&id) {
            return Err(StoreError::not_found("clinic", id));
        }
        let patients = state.patients.values().filter(|p| p.clinic_id == id).count();
        let clinicians = state.clinicians.values().filter(|c| c.clinic_id == id).count();
        if patients > 0 || clinicians > 0 {
            return Err(StoreError::conflict(format!(
                "clinic {id} still has {patients} patient(s) and {clinicians} clinician(s)"
            )));
        }
        state.clinics.remove(&id);
        Ok(())
    }

    fn create_site(&self, clinic_id: ClinicId, site: Site) -> Result<Site, StoreError> {
        self.modify_clinic(clinic_id, |clinic| {
            if clinic.sites.len() >= MAX_SITES_PER_CLINIC {
                return Err(StoreError::MaximumSitesExceeded);
            }
            if site_exists_with_name(&clinic.sites, &site.name) {
                return Err(StoreError::conflict(format!("site {:?} already exists", site.name)));
            }
            if clinic.sites.iter().any(|s| s.id == site.id) {
                return Err(StoreError::conflict(format!("site {} already exists", site.id)));
            }
            clinic.sites.push(site.clone());
            Ok(site)
        })
    }

    fn update_site(&self, clinic_id: ClinicId, site_id: SiteId, site: Site) -> Result<Site, StoreError> {
        self.modify_clinic(clinic_id, |clinic| {
            let others: Vec<Site> = clinic.sites.iter().filter(|s| s.id != site_id).cloned().collect();
            if site_exists_with_name(&others, &site.name) {
                return Err(StoreError::conflict(format!("site {:?} already exists", site.name)));
            }
            let existing = clinic
                .sites
                .iter_mut()
                .find(|s| s.id == site_id)
                .ok_or_else(|| StoreError::not_found("site", site_id))?;
            existing.name = site.name.clone();
            Ok(existing.clone())
        })
    }

    fn delete_site(&self, clinic_id: ClinicId, site_id: SiteId) -> Result<(), StoreError> {
        self.modify_clinic(clinic_id, |clinic| {
            let before = clinic.sites.len();
            clinic.sites.retain(|s| s.id != site_id);
            if clinic.sites.len() == before {
                return Err(StoreError::not_found("site", site_id));
            }
            Ok(())
        })
    }

    fn list_sites(&self, clinic_id: ClinicId) -> Result<Vec<Site>, StoreError> {
        Ok(self.get_clinic(clinic_id)?.sites)
    }

    fn create_patient_tag(&self, clinic_id: ClinicId, name: &str) -> Result<PatientTag, StoreError> {
        if let Some(existing) = self.get_clinic(clinic_id)?.tag_by_name(name) {
            return Ok(existing.clone());
        }
        self.modify_clinic(clinic_id, |clinic| {
            let tag = PatientTag::new(name);
            clinic.patient_tags.push(tag.clone());
            Ok(tag)
        })
    }

    fn update_patient_count(&self, clinic_id: ClinicId, count: u64) -> Result<(), StoreError> {
        self.modify_clinic(clinic_id, |clinic| {
            clinic.patient_count = count;
            Ok(())
        })
    }

    fn append_share_codes(&self, clinic_id: ClinicId, share_codes: &[String]) -> Result<(), StoreError> {
        self.modify_clinic(clinic_id, |clinic| {
            for code in share_codes {
                if !clinic.share_codes.contains(code) {
                    clinic.share_codes.push(code.clone());
                }
            }
            Ok(())
        })
    }

    fn add_admin(&self, clinic_id: ClinicId, account_id: &AccountId) -> Result<(), StoreError> {
        self.modify_clinic(clinic_id, |clinic| {
            if !clinic.admins.contains(account_id) {
                clinic.admins.push(account_id.clone());
            }
            Ok(())
        })
    }
}

impl PatientsService for InMemoryStore {
    fn list_patients(&self, filter: &PatientFilter, page: Pagination) -> Result<PatientPage, StoreError> {
        let state = self.read()?;
        let matching: Vec<&Patient> = state.patients.values().filter(|p| filter.matches(p)).collect();
        let patients = matching
            .iter()
            .skip(page.offset)
            .take(page.limit)
            .map(|p| (*p).clone())
            .collect();
        Ok(PatientPage {
            patients,
            total_count: matching.len(),
        })
    }

    fn get_patient(&self, clinic_id: ClinicId, patient_id: PatientId) -> Result<Patient, StoreError> {
        self.read()?
            .patients
            .get(&patient_id)
            .filter(|p| p.clinic_id == clinic_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("patient", patient_id))
    }

    fn create_patient(&self, patient: Patient) -> Result<Patient, StoreError> {
        let mut state = self.write()?;
        if state.patients.contains_key(&patient.id) {
            return Err(StoreError::conflict(format!("patient {} already exists", patient.id)));
        }
        if let Some(account_id) = &patient.account_id {
            if state.account_taken(patient.clinic_id, account_id, patient.id) {
                return Err(StoreError::conflict(format!(
                    "account {account_id} is already a patient of clinic {}",
                    patient.clinic_id
                )));
            }
        }
        state.patients.insert(patient.id, patient.clone());
        Ok(patient)
    }

    fn update_patient(&self, patient: Patient) -> Result<Patient, StoreError> {
        let mut state = self.write()?;
        if !state.patients.contains_key(&patient.id) {
            return Err(StoreError::not_found("patient", patient.id));
        }
        if let Some(account_id) = &patient.account_id {
            if state.account_taken(patient.clinic_id, account_id, patient.id) {
                return Err(StoreError::conflict(format!(
                    "account {account_id} is already a patient of clinic {}",
                    patient.clinic_id
                )));
            }
        }
        state.patients.insert(patient.id, patient.clone());
        Ok(patient)
    }

    fn remove_patient(&self, clinic_id: ClinicId, patient_id: PatientId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        match state.patients.get(&patient_id) {
            Some(p) if p.clinic_id == clinic_id => {
                state.patients.remove(&patient_id);
                Ok(())
            }
            _ => Err(StoreError::not_found("patient", patient_id)),
        }
    }

    fn update_patient_sites(&self, clinic_id: ClinicId, site_id: SiteId, site: &Site) -> Result<usize, StoreError> {
        let mut state = self.write()?;
        let mut touched = 0;
        for patient in state.patients.values_mut().filter(|p| p.clinic_id == clinic_id) {
            for existing in patient.sites.iter_mut().filter(|s| s.id == site_id) {
                *existing = site.clone();
                touched += 1;
            }
        }
        Ok(touched)
    }

    fn delete_patient_sites(&self, clinic_id: ClinicId, site_id: SiteId) -> Result<usize, StoreError> {
        let mut state = self.write()?;
        let mut touched = 0;
        for patient in state.patients.values_mut().filter(|p| p.clinic_id == clinic_id) {
            let before = patient.sites.len();
            patient.sites.retain(|s| s.id != site_id);
            touched += before - patient.sites.len();
        }
        Ok(touched)
    }

    fn count_patients(&self, clinic_id: ClinicId) -> Result<u64, StoreError> {
        let state = self.read()?;
        Ok(state.patients.values().filter(|p| p.clinic_id == clinic_id).count() as u64)
    }
}

impl CliniciansService for InMemoryStore {
    fn get_clinician(&self, clinic_id: ClinicId, clinician_id: ClinicianId) -> Result<Clinician, StoreError> {
        self.read()?
            .clinicians
            .get(&clinician_id)
            .filter(|c| c.clinic_id == clinic_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("clinician", clinician_id))
    }

    fn list_clinicians(&self, filter: &ClinicianFilter, page: Pagination) -> Result<ClinicianPage, StoreError> {
        let state = self.read()?;
        let matching: Vec<&Clinician> = state.clinicians.values().filter(|c| filter.matches(c)).collect();
        let clinicians = matching
            .iter()
            .skip(page.offset)
            .take(page.limit)
            .map(|c| (*c).clone())
            .collect();
        Ok(ClinicianPage {
            clinicians,
            total_count: matching.len(),
        })
    }

    fn create_clinician(&self, clinician: Clinician) -> Result<Clinician, StoreError> {
        let mut state = self.write()?;
        if state.clinicians.contains_key(&clinician.id) {
            return Err(StoreError::conflict(format!("clinician {} already exists", clinician.id)));
        }
        if let Some(account_id) = &clinician.account_id {
            let taken = state.clinicians.values().any(|c| {
                c.clinic_id == clinician.clinic_id && c.account_id.as_ref() == Some(account_id)
            });
            if taken {
                return Err(StoreError::conflict(format!(
                    "account {account_id} is already a member of clinic {}",
                    clinician.clinic_id
                )));
            }
        }
        state.clinicians.insert(clinician.id, clinician.clone());
        Ok(clinician)
    }

    fn update_clinician(&self, clinician: Clinician) -> Result<Clinician, StoreError> {
        let mut state = self.write()?;
        if !state.clinicians.contains_key(&clinician.id) {
            return Err(StoreError::not_found("clinician", clinician.id));
        }
        state.clinicians.insert(clinician.id, clinician.clone());
        Ok(clinician)
    }

    fn remove_clinician(&self, clinic_id: ClinicId, clinician_id: ClinicianId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        match state.clinicians.get(&clinician_id) {
            Some(c) if c.clinic_id == clinic_id => {
                state.clinicians.remove(&clinician_id);
                Ok(())
            }
            _ => Err(StoreError::not_found("clinician", clinician_id)),
        }
    }
}

impl PlanStore for InMemoryStore {
    fn insert_plan(&self, plan: PersistedPlan) -> Result<(), StoreError> {
        self.write()?.plans.push(plan);
        Ok(())
    }

    fn find_plans(&self, plan_id: PlanId, plan_type: Option<PlanType>) -> Result<Vec<PersistedPlan>, StoreError> {
        Ok(self
            .read()?
            .plans
            .iter()
            .filter(|p| p.plan_id == plan_id && plan_type.is_none_or(|t| t == p.plan_type))
            .cloned()
            .collect())
    }

    fn list_plan_ids(&self) -> Result<Vec<PlanId>, StoreError> {
        let state = self.read()?;
        let mut ids: Vec<PlanId> = Vec::new();
        for plan in &state.plans {
            if !ids.contains(&plan.plan_id) {
                ids.push(plan.plan_id);
            }
        }
        Ok(ids)
    }
}
