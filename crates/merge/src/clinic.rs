//! Whole-workspace merge planning.
//!
//! [`ClinicMergePlanner`] reads both workspaces and their full rosters, runs
//! every entity planner and bundles the results into one immutable
//! [`ClinicMergePlan`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use clinic_clinicians::Clinician;
use clinic_core::{ClinicId, ValueObject};
use clinic_infra::{
    ClinicianFilter, CliniciansService, ClinicsService, MergeConfig, Pagination, PatientFilter,
    PatientsService,
};
use clinic_patients::Patient;
use clinic_workspace::Clinic;

use crate::clinicians::{ClinicianMergePlanner, ClinicianPlans};
use crate::cluster::{PatientClusterReporter, PatientClusters};
use crate::error::{MergeError, ReportError, unique_error_messages};
use crate::patients::{PatientMergePlanner, PatientPlans};
use crate::plan::{Plan, Planner, run_planners};
use crate::settings::{
    MembershipRestrictionsMergePlan, MembershipRestrictionsMergePlanner, SettingsPlans,
    SettingsReporterPlanner,
};
use crate::sites::{SiteMergePlanner, SitePlans};
use crate::tags::{TagMergePlanner, TagPlans};

/// Everything needed to review and execute a merge of `source` into
/// `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicMergePlan {
    pub source: Clinic,
    pub target: Clinic,
    /// Target version observed while planning.
    pub target_version: u64,
    pub membership_restrictions_plan: MembershipRestrictionsMergePlan,
    pub source_patient_clusters: PatientClusters,
    pub target_patient_clusters: PatientClusters,
    pub settings_plans: SettingsPlans,
    pub tag_plans: TagPlans,
    pub site_plans: SitePlans,
    pub clinician_plans: ClinicianPlans,
    pub patient_plans: PatientPlans,
    pub created_time: DateTime<Utc>,
}

impl ValueObject for ClinicMergePlan {}

impl ClinicMergePlan {
    /// Distinct error messages of every blocked sub-plan, sorted.
    pub fn error_messages(&self) -> Vec<String> {
        unique_error_messages(&self.errors())
    }
}

impl Plan for ClinicMergePlan {
    fn prevents_merge(&self) -> bool {
        self.membership_restrictions_plan.prevents_merge()
            || self.settings_plans.prevents_merge()
            || self.tag_plans.prevents_merge()
            || self.site_plans.prevents_merge()
            || self.clinician_plans.prevents_merge()
            || self.patient_plans.prevents_merge()
    }

    fn errors(&self) -> Vec<ReportError> {
        let mut errors = self.membership_restrictions_plan.errors();
        errors.extend(self.settings_plans.errors());
        errors.extend(self.tag_plans.errors());
        errors.extend(self.site_plans.errors());
        errors.extend(self.clinician_plans.errors());
        errors.extend(self.patient_plans.errors());
        errors
    }
}

/// Full rosters of one workspace.
#[derive(Debug, Clone, Default)]
struct Roster {
    patients: Vec<Patient>,
    clinicians: Vec<Clinician>,
}

/// Reads both workspaces and plans their merge. Never writes.
pub struct ClinicMergePlanner<'a, S> {
    store: &'a S,
    config: &'a MergeConfig,
    source_id: ClinicId,
    target_id: ClinicId,
}

impl<'a, S> ClinicMergePlanner<'a, S>
where
    S: ClinicsService + PatientsService + CliniciansService,
{
    pub fn new(store: &'a S, config: &'a MergeConfig, source_id: ClinicId, target_id: ClinicId) -> Self {
        Self {
            store,
            config,
            source_id,
            target_id,
        }
    }

    fn fetch_roster(&self, clinic: &Clinic) -> Result<Roster, MergeError> {
        let patients = self.fetch_patients(clinic)?;
        let clinicians = self.fetch_clinicians(clinic)?;
        debug!(
            clinic_id = %clinic.id,
            patients = patients.len(),
            clinicians = clinicians.len(),
            "fetched clinic roster"
        );
        Ok(Roster { patients, clinicians })
    }

    /// Patients are read in pages of `page_size`. The first page reports the
    /// total, so an oversized roster is rejected before the rest is read.
    fn fetch_patients(&self, clinic: &Clinic) -> Result<Vec<Patient>, MergeError> {
        let limit = clinic
            .patient_limit()
            .map_or(self.config.max_roster_size, |l| {
                (l.min(usize::MAX as u64) as usize).min(self.config.max_roster_size)
            });
        let filter = PatientFilter::clinic(clinic.id);
        let mut page = Pagination::default().with_limit(self.config.page_size());
        let mut patients = Vec::new();

        loop {
            let result = self.store.list_patients(&filter, page)?;
            if result.total_count > limit {
                return Err(MergeError::TooManyPatients {
                    clinic_id: clinic.id,
                    count: result.total_count,
                    limit,
                });
            }
            let fetched = result.patients.len();
            patients.extend(result.patients);
            if fetched < page.limit || patients.len() >= result.total_count {
                break;
            }
            page = page.next();
        }
        Ok(patients)
    }

    fn fetch_clinicians(&self, clinic: &Clinic) -> Result<Vec<Clinician>, MergeError> {
        let limit = self.config.max_roster_size;
        let filter = ClinicianFilter::clinic(clinic.id);
        let mut page = Pagination::default().with_limit(self.config.page_size());
        let mut clinicians = Vec::new();

        loop {
            let result = self.store.list_clinicians(&filter, page)?;
            if result.total_count > limit {
                return Err(MergeError::TooManyClinicians {
                    clinic_id: clinic.id,
                    count: result.total_count,
                    limit,
                });
            }
            let fetched = result.clinicians.len();
            clinicians.extend(result.clinicians);
            if fetched < page.limit || clinicians.len() >= result.total_count {
                break;
            }
            page = page.next();
        }
        Ok(clinicians)
    }
}

impl<S> Planner for ClinicMergePlanner<'_, S>
where
    S: ClinicsService + PatientsService + CliniciansService,
{
    type Output = ClinicMergePlan;

    fn plan(&self) -> Result<ClinicMergePlan, MergeError> {
        let source = self.store.get_clinic(self.source_id)?;
        let target = self.store.get_clinic(self.target_id)?;
        let source_roster = self.fetch_roster(&source)?;
        let target_roster = self.fetch_roster(&target)?;

        let membership_restrictions_plan = MembershipRestrictionsMergePlanner::new(&source, &target).plan()?;
        let source_patient_clusters = PatientClusterReporter::new(&source_roster.patients).plan()?;
        let target_patient_clusters = PatientClusterReporter::new(&target_roster.patients).plan()?;
        let settings_plans = run_planners(&SettingsReporterPlanner::all(&source, &target))?;
        let tag_plans = run_planners(&TagMergePlanner::for_clinics(&source, &target))?;
        let site_plans = run_planners(&SiteMergePlanner::for_clinics(&source, &target))?;
        let clinician_plans = run_planners(&ClinicianMergePlanner::for_rosters(
            &source,
            &target,
            &source_roster.clinicians,
            &target_roster.clinicians,
        ))?;
        let patient_plans = PatientMergePlanner::new(
            &source,
            &target,
            &source_roster.patients,
            &target_roster.patients,
        )
        .plan()?;

        let plan = ClinicMergePlan {
            target_version: target.version,
            source,
            target,
            membership_restrictions_plan,
            source_patient_clusters,
            target_patient_clusters,
            settings_plans,
            tag_plans,
            site_plans,
            clinician_plans,
            patient_plans,
            created_time: Utc::now(),
        };
        info!(
            source_clinic_id = %self.source_id,
            target_clinic_id = %self.target_id,
            patients = plan.patient_plans.len(),
            clinicians = plan.clinician_plans.len(),
            prevents_merge = plan.prevents_merge(),
            "computed clinic merge plan"
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clinic_clinicians::Role;
    use clinic_core::{AccountId, InviteId};
    use clinic_infra::InMemoryStore;
    use clinic_workspace::{MembershipRestriction, PatientCountSettings};

    fn store_with_clinics() -> (InMemoryStore, Clinic, Clinic) {
        let store = InMemoryStore::new();
        let source = store.create_clinic(Clinic::new("Source")).unwrap();
        let target = store.create_clinic(Clinic::new("Target")).unwrap();
        (store, source, target)
    }

    fn add_patients(store: &InMemoryStore, clinic: &Clinic, count: usize, prefix: &str) {
        for i in 0..count {
            let mut patient = Patient::new(clinic.id);
            patient.account_id = Some(AccountId::parse(format!("{prefix}-{i}")).unwrap());
            store.create_patient(patient).unwrap();
        }
    }

    #[test]
    fn plan_reads_rosters_across_pages() {
        let (store, source, target) = store_with_clinics();
        add_patients(&store, &source, 25, "s");
        add_patients(&store, &target, 7, "t");
        let config = MergeConfig::default().with_page_size(10);

        let plan = ClinicMergePlanner::new(&store, &config, source.id, target.id).plan().unwrap();
        assert_eq!(plan.patient_plans.len(), 32);
        assert_eq!(plan.patient_plans.resulting_patients_count(), 32);
        assert_eq!(plan.target_version, target.version);
        assert!(!plan.prevents_merge());
    }

    #[test]
    fn oversized_roster_is_rejected() {
        let (store, source, target) = store_with_clinics();
        add_patients(&store, &source, 12, "s");
        let config = MergeConfig::default().with_page_size(5).with_max_roster_size(10);

        let err = ClinicMergePlanner::new(&store, &config, source.id, target.id).plan().unwrap_err();
        assert!(matches!(err, MergeError::TooManyPatients { count: 12, limit: 10, .. }));
    }

    #[test]
    fn clinic_patient_limit_caps_the_roster() {
        let store = InMemoryStore::new();
        let mut limited = Clinic::new("Source");
        limited.patient_count_settings = Some(PatientCountSettings { hard_limit: Some(3) });
        let source = store.create_clinic(limited).unwrap();
        let target = store.create_clinic(Clinic::new("Target")).unwrap();
        add_patients(&store, &source, 4, "s");

        let config = MergeConfig::default();
        let err = ClinicMergePlanner::new(&store, &config, source.id, target.id).plan().unwrap_err();
        assert!(matches!(err, MergeError::TooManyPatients { limit: 3, .. }));
    }

    #[test]
    fn oversized_clinician_roster_is_rejected() {
        let (store, source, target) = store_with_clinics();
        for i in 0..3 {
            let account = AccountId::parse(format!("c-{i}")).unwrap();
            store
                .create_clinician(Clinician::member(target.id, account, vec![Role::ClinicMember]))
                .unwrap();
        }
        let config = MergeConfig::default().with_max_roster_size(2);

        let err = ClinicMergePlanner::new(&store, &config, source.id, target.id).plan().unwrap_err();
        assert!(matches!(err, MergeError::TooManyClinicians { count: 3, .. }));
    }

    #[test]
    fn any_blocked_sub_plan_blocks_the_clinic_plan() {
        let store = InMemoryStore::new();
        let mut restricted = Clinic::new("Source");
        restricted.membership_restrictions = vec![MembershipRestriction {
            email_domain: "clinic.org".into(),
            required_idp: None,
        }];
        let source = store.create_clinic(restricted).unwrap();
        let target = store.create_clinic(Clinic::new("Target")).unwrap();
        store
            .create_clinician(Clinician::invite(source.id, InviteId::parse("inv").unwrap(), "a@clinic.org"))
            .unwrap();

        let config = MergeConfig::default();
        let plan = ClinicMergePlanner::new(&store, &config, source.id, target.id).plan().unwrap();
        assert!(plan.membership_restrictions_plan.prevents_merge());
        assert!(plan.clinician_plans.prevents_merge());
        assert!(plan.prevents_merge());
        assert_eq!(plan.error_messages(), vec!["Pending invites is source workspace".to_string()]);
    }

    #[test]
    fn missing_clinic_is_a_store_error() {
        let (store, source, _) = store_with_clinics();
        let config = MergeConfig::default();
        let err = ClinicMergePlanner::new(&store, &config, source.id, ClinicId::new())
            .plan()
            .unwrap_err();
        assert!(matches!(err, MergeError::Store(e) if e.is_not_found()));
    }
}
