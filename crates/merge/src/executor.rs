//! Applies an accepted [`ClinicMergePlan`] to the store.
//!
//! Phases run in a fixed order, each inside its own transaction: tags, sites,
//! patients (one transaction per pass of `page_size` plans), clinicians and
//! finalization. A failure rolls back the phase in flight only; phases that
//! already committed stay applied and the caller has to re-plan.

use tracing::{error, info};

use clinic_core::{ClinicId, ExpectedVersion, PlanId};
use clinic_infra::{
    CliniciansService, ClinicsService, MergeConfig, PatientsService, PersistedPlan, PlanStore, PlanType,
    Transactional,
};

use crate::clinic::ClinicMergePlan;
use crate::clinicians::ClinicianPlanExecutor;
use crate::error::MergeError;
use crate::patients::PatientPlanExecutor;
use crate::plan::Plan;
use crate::sites::SitePlanExecutor;
use crate::tags::TagPlanExecutor;

pub struct ClinicPlanExecutor<'a, S, P> {
    store: &'a S,
    plans: &'a P,
    config: &'a MergeConfig,
}

impl<'a, S, P> ClinicPlanExecutor<'a, S, P>
where
    S: ClinicsService + PatientsService + CliniciansService + Transactional,
    P: PlanStore,
{
    /// `plans` receives one audit record per executed sub-plan. It is usually
    /// the same store as `store`, so records roll back with the data.
    pub fn new(store: &'a S, plans: &'a P, config: &'a MergeConfig) -> Self {
        Self { store, plans, config }
    }

    /// Execute `plan` and return the id its audit records are stored under.
    pub fn execute(&self, plan: &ClinicMergePlan) -> Result<PlanId, MergeError> {
        let source_id = plan.source.id;
        let target_id = plan.target.id;

        if plan.prevents_merge() {
            let reason = plan.error_messages().join("; ");
            error!(source_clinic_id = %source_id, target_clinic_id = %target_id, %reason, "cannot merge clinics");
            return Err(MergeError::PlanPreventsMerge(reason));
        }
        self.check_target_version(plan)?;

        let plan_id = PlanId::new();
        info!(%plan_id, source_clinic_id = %source_id, target_clinic_id = %target_id, "executing clinic merge plan");

        self.migrate_tags(plan, plan_id)?;
        self.migrate_sites(plan, plan_id)?;
        self.migrate_patients(plan, plan_id)?;
        self.migrate_clinicians(plan, plan_id)?;
        self.finalize(plan, plan_id)?;

        info!(%plan_id, source_clinic_id = %source_id, target_clinic_id = %target_id, "clinic merge completed");
        Ok(plan_id)
    }

    fn check_target_version(&self, plan: &ClinicMergePlan) -> Result<(), MergeError> {
        if !self.config.require_fresh_target {
            return Ok(());
        }
        let current = self.store.get_clinic(plan.target.id)?;
        ExpectedVersion::Exact(plan.target_version)
            .check(current.version)
            .map_err(|e| MergeError::StaleTarget {
                clinic_id: plan.target.id,
                reason: e.to_string(),
            })
    }

    fn persist<T: serde::Serialize>(&self, plan_id: PlanId, plan_type: PlanType, plan: &T) -> Result<(), MergeError> {
        self.plans.insert_plan(PersistedPlan::new(plan_id, plan_type, plan)?)?;
        Ok(())
    }

    fn migrate_tags(&self, plan: &ClinicMergePlan, plan_id: PlanId) -> Result<(), MergeError> {
        info!(source_clinic_id = %plan.source.id, target_clinic_id = %plan.target.id, "starting tags migration");
        let executor = TagPlanExecutor::new(self.store);
        self.store.with_transaction(|| {
            for tag_plan in plan.tag_plans.iter() {
                executor.execute(tag_plan)?;
                self.persist(plan_id, PlanType::Tag, tag_plan)?;
            }
            Ok(())
        })
    }

    fn migrate_sites(&self, plan: &ClinicMergePlan, plan_id: PlanId) -> Result<(), MergeError> {
        info!(source_clinic_id = %plan.source.id, target_clinic_id = %plan.target.id, "starting sites migration");
        let executor = SitePlanExecutor::new(self.store);
        self.store.with_transaction(|| {
            for site_plan in plan.site_plans.iter() {
                executor.execute(site_plan)?;
                self.persist(plan_id, PlanType::Site, site_plan)?;
            }
            Ok(())
        })
    }

    fn migrate_patients(&self, plan: &ClinicMergePlan, plan_id: PlanId) -> Result<(), MergeError> {
        info!(source_clinic_id = %plan.source.id, target_clinic_id = %plan.target.id, "starting patients migration");
        // Tag ids are resolved against the target as it is after tag migration.
        let executor = PatientPlanExecutor::new(self.store, plan.source.id, plan.target.id)?;

        for (pass, chunk) in plan.patient_plans.chunks(self.config.page_size()).enumerate() {
            info!(
                target_clinic_id = %plan.target.id,
                pass,
                patients = chunk.len(),
                "migrating patients pass"
            );
            self.store.with_transaction(|| {
                for patient_plan in chunk {
                    executor.execute(patient_plan)?;
                    self.persist(plan_id, PlanType::Patient, patient_plan)?;
                }
                Ok::<_, MergeError>(())
            })?;
        }
        Ok(())
    }

    fn migrate_clinicians(&self, plan: &ClinicMergePlan, plan_id: PlanId) -> Result<(), MergeError> {
        info!(source_clinic_id = %plan.source.id, target_clinic_id = %plan.target.id, "starting clinicians migration");
        let executor = ClinicianPlanExecutor::new(self.store);
        self.store.with_transaction(|| {
            for clinician_plan in plan.clinician_plans.iter() {
                executor.execute(clinician_plan, plan.target.id)?;
                self.persist(plan_id, PlanType::Clinician, clinician_plan)?;
            }
            Ok(())
        })
    }

    fn finalize(&self, plan: &ClinicMergePlan, plan_id: PlanId) -> Result<(), MergeError> {
        info!(source_clinic_id = %plan.source.id, target_clinic_id = %plan.target.id, "finalizing clinic merge");
        self.store.with_transaction(|| {
            self.finalize_clinics(plan.source.id, plan.target.id)?;
            self.persist(plan_id, PlanType::Clinic, plan)
        })
    }

    /// Retire the emptied source workspace. Its share codes keep working in
    /// the target.
    fn finalize_clinics(&self, source_id: ClinicId, target_id: ClinicId) -> Result<(), MergeError> {
        let source = self.store.get_clinic(source_id)?;
        self.store.delete_clinic(source_id)?;
        self.store.append_share_codes(target_id, &source.share_codes)?;
        let count = self.store.count_patients(target_id)?;
        self.store.update_patient_count(target_id, count)?;
        Ok(())
    }
}
