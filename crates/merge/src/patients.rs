//! Patient reconciliation across workspaces.
//!
//! Every source patient is compared with the target roster. A shared account
//! merges the two records; weaker matches are recorded as conflicts for
//! review without changing the action.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use clinic_core::{ClinicId, PatientId, TagId};
use clinic_infra::{ClinicsService, PatientsService};
use clinic_patients::Patient;
use clinic_workspace::Clinic;

use crate::cluster::{ConflictCategory, PatientAttribute};
use crate::error::{MergeError, ReportError};
use crate::plan::{Plan, Planner, plan_list};
use crate::sites::SitePlans;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatientAction {
    /// Target patient without a source counterpart.
    Retain,
    /// Source patient folded into the target record of the same account.
    Merge,
    /// Target record receiving a merge.
    MergeInto,
    /// Source patient moved to the target.
    Move,
}

/// A target patient resembling a source patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientConflict {
    pub category: ConflictCategory,
    pub attributes: BTreeSet<PatientAttribute>,
    pub patient: Patient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_patient: Option<Patient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_patient: Option<Patient>,
    #[serde(default)]
    pub conflicts: BTreeMap<ConflictCategory, Vec<PatientConflict>>,
    pub action: PatientAction,
    #[serde(default)]
    pub source_tag_names: Vec<String>,
    #[serde(default)]
    pub target_tag_names: Vec<String>,
    /// Tag names the resulting record carries, resolved against the target
    /// tag ids at execution time.
    #[serde(default)]
    pub post_migration_tag_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportError>,
}

impl PatientPlan {
    /// The record the plan is about: the source patient when there is one.
    pub fn patient(&self) -> Option<&Patient> {
        self.source_patient.as_ref().or(self.target_patient.as_ref())
    }

    pub fn has_conflicts(&self) -> bool {
        self.conflicts.values().any(|c| !c.is_empty())
    }

    pub fn conflicts_in(&self, category: ConflictCategory) -> &[PatientConflict] {
        self.conflicts.get(&category).map(Vec::as_slice).unwrap_or_default()
    }

    /// Names of the sites the resulting record carries, sorted
    /// case-insensitively.
    pub fn resulting_sites(&self, site_plans: &SitePlans) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        if let Some(source) = &self.source_patient {
            for site in &source.sites {
                let name = site_plans.renamed(site).unwrap_or(&site.name);
                names.push(name.to_string());
            }
        }
        if let Some(target) = &self.target_patient {
            names.extend(target.sites.iter().map(|s| s.name.clone()));
        }

        names.sort_by_key(|n| n.to_lowercase());
        names.dedup();
        names
    }
}

impl Plan for PatientPlan {
    fn prevents_merge(&self) -> bool {
        self.error.is_some()
    }

    fn errors(&self) -> Vec<ReportError> {
        self.error.iter().cloned().collect()
    }
}

plan_list!(PatientPlans, PatientPlan);

impl PatientPlans {
    /// Number of resulting records having at least one conflict per category.
    pub fn conflict_counts(&self) -> BTreeMap<ConflictCategory, usize> {
        let mut counts = BTreeMap::new();
        for plan in self.iter().filter(|p| p.action != PatientAction::MergeInto) {
            for (category, conflicts) in &plan.conflicts {
                if !conflicts.is_empty() {
                    *counts.entry(*category).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    pub fn resulting_patients_count(&self) -> usize {
        self.iter()
            .filter(|p| p.action != PatientAction::MergeInto)
            .count()
    }

    pub fn source_patient_plans(&self) -> impl Iterator<Item = &PatientPlan> {
        self.iter()
            .filter(|p| matches!(p.action, PatientAction::Move | PatientAction::Merge))
    }

    pub fn target_patient_plans(&self) -> impl Iterator<Item = &PatientPlan> {
        self.iter()
            .filter(|p| matches!(p.action, PatientAction::Retain | PatientAction::MergeInto))
    }
}

impl Plan for PatientPlans {
    fn prevents_merge(&self) -> bool {
        crate::plan::plans_prevent_merge(self)
    }

    fn errors(&self) -> Vec<ReportError> {
        crate::plan::plans_errors(self)
    }
}

/// Target roster indexed by identity attribute value.
struct AttributeIndex<'a> {
    patients: &'a [Patient],
    groups: HashMap<(PatientAttribute, String), Vec<usize>>,
}

impl<'a> AttributeIndex<'a> {
    fn new(patients: &'a [Patient]) -> Self {
        let mut groups: HashMap<(PatientAttribute, String), Vec<usize>> = HashMap::new();
        for (idx, patient) in patients.iter().enumerate() {
            for attr in PatientAttribute::ALL {
                if let Some(value) = attr.value(patient) {
                    groups.entry((attr, value)).or_default().push(idx);
                }
            }
        }
        Self { patients, groups }
    }

    fn conflicts_with(&self, patient: &Patient) -> Vec<PatientConflict> {
        let candidates: BTreeSet<usize> = PatientAttribute::ALL
            .into_iter()
            .filter_map(|attr| attr.value(patient).map(|v| (attr, v)))
            .filter_map(|key| self.groups.get(&key))
            .flatten()
            .copied()
            .collect();

        let mut conflicts: Vec<PatientConflict> = candidates
            .into_iter()
            .filter_map(|idx| {
                let candidate = &self.patients[idx];
                let attributes = PatientAttribute::shared(patient, candidate);
                ConflictCategory::classify(&attributes).map(|category| PatientConflict {
                    category,
                    attributes,
                    patient: candidate.clone(),
                })
            })
            .collect();

        conflicts.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then(a.attributes.len().cmp(&b.attributes.len()))
                .then_with(|| a.patient.full_name.cmp(&b.patient.full_name))
        });
        conflicts
    }
}

/// Plans every patient of both workspaces.
pub struct PatientMergePlanner<'a> {
    source: &'a Clinic,
    target: &'a Clinic,
    source_patients: &'a [Patient],
    target_patients: &'a [Patient],
}

impl<'a> PatientMergePlanner<'a> {
    pub fn new(
        source: &'a Clinic,
        target: &'a Clinic,
        source_patients: &'a [Patient],
        target_patients: &'a [Patient],
    ) -> Self {
        Self {
            source,
            target,
            source_patients,
            target_patients,
        }
    }

    fn plan_source_patient(&self, index: &AttributeIndex<'_>, patient: &Patient) -> PatientPlan {
        let mut conflicts: BTreeMap<ConflictCategory, Vec<PatientConflict>> = BTreeMap::new();
        for conflict in index.conflicts_with(patient) {
            conflicts.entry(conflict.category).or_default().push(conflict);
        }

        let source_tag_names = self.source.tag_names(&patient.tags);
        let mut plan = PatientPlan {
            source_patient: Some(patient.clone()),
            target_patient: None,
            conflicts,
            action: PatientAction::Move,
            source_tag_names: source_tag_names.clone(),
            target_tag_names: Vec::new(),
            post_migration_tag_names: source_tag_names,
            error: None,
        };

        let duplicate = plan
            .conflicts_in(ConflictCategory::DuplicateAccounts)
            .first()
            .map(|c| c.patient.clone());
        if let Some(target_patient) = duplicate {
            plan.action = PatientAction::Merge;
            plan.target_tag_names = self.target.tag_names(&target_patient.tags);
            plan.post_migration_tag_names = plan
                .source_tag_names
                .iter()
                .chain(&plan.target_tag_names)
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            plan.target_patient = Some(target_patient);
        }

        plan.error = self.source_plan_error(&plan, patient);
        plan
    }

    fn source_plan_error(&self, plan: &PatientPlan, patient: &Patient) -> Option<ReportError> {
        match plan.action {
            PatientAction::Merge
                if self.target.mrn_unique() && !plan.conflicts_in(ConflictCategory::MrnOnlyMatch).is_empty() =>
            {
                Some(ReportError::DuplicateMrnInTargetWorkspace)
            }
            PatientAction::Move
                if self.target.mrn_required() && patient.mrn.as_deref().is_none_or(|m| m.trim().is_empty()) =>
            {
                Some(ReportError::MrnRequiredInTargetWorkspace)
            }
            _ => None,
        }
    }
}

impl Planner for PatientMergePlanner<'_> {
    type Output = PatientPlans;

    fn plan(&self) -> Result<PatientPlans, MergeError> {
        let index = AttributeIndex::new(self.target_patients);

        let mut plans: Vec<PatientPlan> = self
            .source_patients
            .iter()
            .map(|patient| self.plan_source_patient(&index, patient))
            .collect();

        let claimed: BTreeSet<PatientId> = plans
            .iter()
            .filter_map(|p| p.target_patient.as_ref().map(|t| t.id))
            .collect();

        plans.extend(self.target_patients.iter().map(|patient| {
            let action = if claimed.contains(&patient.id) {
                PatientAction::MergeInto
            } else {
                PatientAction::Retain
            };
            let tag_names = self.target.tag_names(&patient.tags);
            PatientPlan {
                source_patient: None,
                target_patient: Some(patient.clone()),
                conflicts: BTreeMap::new(),
                action,
                source_tag_names: Vec::new(),
                target_tag_names: tag_names.clone(),
                post_migration_tag_names: tag_names,
                error: None,
            }
        }));

        Ok(PatientPlans(plans))
    }
}

/// Applies patient plans to the store.
///
/// Records are re-read before they are rewritten: the site phase may have
/// renamed or dropped sites since planning.
pub struct PatientPlanExecutor<'a, S> {
    store: &'a S,
    source_id: ClinicId,
    target_id: ClinicId,
    target_tags: HashMap<String, TagId>,
}

impl<'a, S> PatientPlanExecutor<'a, S>
where
    S: ClinicsService + PatientsService,
{
    /// Must be created after tags were migrated so every tag name resolves.
    pub fn new(store: &'a S, source_id: ClinicId, target_id: ClinicId) -> Result<Self, MergeError> {
        let target = store.get_clinic(target_id)?;
        let target_tags = target
            .patient_tags
            .into_iter()
            .map(|t| (t.name, t.id))
            .collect();
        Ok(Self {
            store,
            source_id,
            target_id,
            target_tags,
        })
    }

    pub fn execute(&self, plan: &PatientPlan) -> Result<(), MergeError> {
        match plan.action {
            PatientAction::Move => self.move_patient(plan),
            PatientAction::Merge => self.merge_patient(plan),
            PatientAction::MergeInto | PatientAction::Retain => {
                debug!(
                    patient_id = ?plan.target_patient.as_ref().map(|p| p.id),
                    action = ?plan.action,
                    "skipping patient plan - nothing to do"
                );
                Ok(())
            }
        }
    }

    fn resolve_tags(&self, names: &[String]) -> Vec<TagId> {
        names
            .iter()
            .filter_map(|name| {
                let id = self.target_tags.get(name).copied();
                if id.is_none() {
                    warn!(target_clinic_id = %self.target_id, tag = %name, "tag missing in target clinic");
                }
                id
            })
            .collect()
    }

    fn source_patient<'p>(&self, plan: &'p PatientPlan) -> Result<&'p Patient, MergeError> {
        plan.source_patient
            .as_ref()
            .ok_or_else(|| MergeError::unexpected("patient", format!("{:?} plan without source patient", plan.action)))
    }

    fn move_patient(&self, plan: &PatientPlan) -> Result<(), MergeError> {
        let planned = self.source_patient(plan)?;
        let mut patient = self.store.get_patient(self.source_id, planned.id)?;
        info!(
            patient_id = %patient.id,
            clinic_id = %self.source_id,
            target_clinic_id = %self.target_id,
            "moving patient"
        );

        patient.clinic_id = self.target_id;
        patient.tags = self.resolve_tags(&plan.post_migration_tag_names);
        self.store.update_patient(patient.without_summary())?;
        Ok(())
    }

    fn merge_patient(&self, plan: &PatientPlan) -> Result<(), MergeError> {
        let planned_source = self.source_patient(plan)?;
        let planned_target = plan
            .target_patient
            .as_ref()
            .ok_or_else(|| MergeError::unexpected("patient", "MERGE plan without target patient"))?;

        let source = self.store.get_patient(self.source_id, planned_source.id)?;
        let mut target = self.store.get_patient(self.target_id, planned_target.id)?;
        info!(
            patient_id = %source.id,
            target_patient_id = %target.id,
            clinic_id = %self.source_id,
            target_clinic_id = %self.target_id,
            "merging patient"
        );

        target.tags = self.resolve_tags(&plan.post_migration_tag_names);
        for site in source.sites {
            if !target.has_site(&site) {
                target.sites.push(site);
            }
        }

        self.store.update_patient(target.without_summary())?;
        self.store.remove_patient(self.source_id, source.id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::NaiveDate;
    use clinic_core::AccountId;
    use clinic_infra::InMemoryStore;
    use clinic_workspace::{MrnSettings, PatientTag, Site};

    fn patient(clinic: &Clinic, account: Option<&str>, name: &str, mrn: Option<&str>) -> Patient {
        let mut p = Patient::new(clinic.id);
        p.account_id = account.map(|a| AccountId::parse(a).unwrap());
        p.full_name = Some(name.to_string());
        p.mrn = mrn.map(str::to_string);
        p
    }

    fn plan_all(source: &Clinic, target: &Clinic, src: &[Patient], tgt: &[Patient]) -> PatientPlans {
        PatientMergePlanner::new(source, target, src, tgt).plan().unwrap()
    }

    #[test]
    fn shared_account_merges_and_pairs_with_merge_into() {
        let source = Clinic::new("Source");
        let target = Clinic::new("Target");
        let src = vec![patient(&source, Some("u1"), "Jane", Some("1"))];
        let tgt = vec![
            patient(&target, Some("u1"), "Jane D.", Some("2")),
            patient(&target, Some("u2"), "Bob", Some("3")),
        ];

        let plans = plan_all(&source, &target, &src, &tgt);
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[0].action, PatientAction::Merge);
        assert_eq!(plans[0].target_patient.as_ref().unwrap().id, tgt[0].id);
        assert_eq!(plans[1].action, PatientAction::MergeInto);
        assert_eq!(plans[2].action, PatientAction::Retain);
        assert_eq!(plans.resulting_patients_count(), 2);
        assert_eq!(plans.source_patient_plans().count(), 1);
        assert_eq!(plans.target_patient_plans().count(), 2);
    }

    #[test]
    fn weak_matches_are_recorded_without_changing_the_action() {
        let source = Clinic::new("Source");
        let target = Clinic::new("Target");
        let mut a = patient(&source, Some("u1"), "Jane", Some("1"));
        a.birth_date = NaiveDate::from_ymd_opt(1990, 5, 1);
        let mut likely = patient(&target, Some("u2"), "Jane", Some("9"));
        likely.birth_date = a.birth_date;
        let mrn_only = patient(&target, Some("u3"), "Other", Some("1"));

        let plans = plan_all(&source, &target, &[a], &[likely, mrn_only]);
        let plan = &plans[0];
        assert_eq!(plan.action, PatientAction::Move);
        assert_eq!(plan.conflicts_in(ConflictCategory::LikelyDuplicateAccounts).len(), 1);
        assert_eq!(plan.conflicts_in(ConflictCategory::MrnOnlyMatch).len(), 1);

        let counts = plans.conflict_counts();
        assert_eq!(counts[&ConflictCategory::LikelyDuplicateAccounts], 1);
        assert_eq!(counts[&ConflictCategory::MrnOnlyMatch], 1);
        assert!(!counts.contains_key(&ConflictCategory::DuplicateAccounts));
    }

    #[test]
    fn merge_takes_union_of_tag_names() {
        let mut source = Clinic::new("Source");
        source.patient_tags = vec![PatientTag::new("Pump"), PatientTag::new("CGM")];
        let mut target = Clinic::new("Target");
        target.patient_tags = vec![PatientTag::new("CGM"), PatientTag::new("Adult")];

        let mut src = patient(&source, Some("u1"), "Jane", None);
        src.tags = source.patient_tags.iter().map(|t| t.id).collect();
        let mut tgt = patient(&target, Some("u1"), "Jane", None);
        tgt.tags = vec![target.patient_tags[1].id];

        let plans = plan_all(&source, &target, &[src], &[tgt]);
        assert_eq!(
            plans[0].post_migration_tag_names,
            vec!["Adult".to_string(), "CGM".to_string(), "Pump".to_string()]
        );
    }

    #[test]
    fn duplicate_mrn_in_unique_target_blocks_the_merge() {
        let source = Clinic::new("Source");
        let mut target = Clinic::new("Target");
        target.mrn_settings = Some(MrnSettings {
            required: false,
            unique: true,
        });

        let src = vec![patient(&source, Some("u1"), "Jane", Some("m"))];
        let tgt = vec![
            patient(&target, Some("u1"), "Jane", Some("m2")),
            patient(&target, Some("u9"), "Someone Else", Some("m")),
        ];

        let plans = plan_all(&source, &target, &src, &tgt);
        assert_eq!(plans[0].action, PatientAction::Merge);
        assert_eq!(plans[0].error, Some(ReportError::DuplicateMrnInTargetWorkspace));
        assert!(plans.prevents_merge());
    }

    #[test]
    fn missing_mrn_blocks_move_into_mrn_required_target() {
        let source = Clinic::new("Source");
        let mut target = Clinic::new("Target");
        target.mrn_settings = Some(MrnSettings {
            required: true,
            unique: false,
        });

        let src = vec![patient(&source, Some("u1"), "Jane", None)];
        let plans = plan_all(&source, &target, &src, &[]);
        assert_eq!(plans[0].error, Some(ReportError::MrnRequiredInTargetWorkspace));
        assert_eq!(plans.errors(), vec![ReportError::MrnRequiredInTargetWorkspace]);
    }

    #[test]
    fn resulting_sites_follow_site_renames() {
        let mut source = Clinic::new("Source");
        source.sites = vec![Site::new("Main"), Site::new("annex")];
        let mut target = Clinic::new("Target");
        target.sites = vec![Site::new("Main")];

        let mut src = patient(&source, Some("u1"), "Jane", None);
        src.sites = source.sites.clone();
        let mut tgt = patient(&target, Some("u1"), "Jane", None);
        tgt.sites = target.sites.clone();

        let site_plans: SitePlans =
            crate::plan::run_planners(&crate::sites::SiteMergePlanner::for_clinics(&source, &target)).unwrap();
        let plans = plan_all(&source, &target, &[src], &[tgt]);

        assert_eq!(
            plans[0].resulting_sites(&site_plans),
            vec!["annex".to_string(), "Main".to_string(), "Main (2)".to_string()]
        );
    }

    #[test]
    fn executor_moves_and_merges_records() {
        let store = InMemoryStore::new();
        let mut source = Clinic::new("Source");
        source.patient_tags = vec![PatientTag::new("Pump")];
        let source = store.create_clinic(source).unwrap();
        let mut target = Clinic::new("Target");
        target.patient_tags = vec![PatientTag::new("Pump")];
        let target = store.create_clinic(target).unwrap();

        let mut moving = patient(&source, Some("u1"), "Mover", Some("1"));
        moving.tags = vec![source.patient_tags[0].id];
        let moving = store.create_patient(moving).unwrap();
        let merging = store.create_patient(patient(&source, Some("u2"), "Merger", Some("2"))).unwrap();
        let receiving = store.create_patient(patient(&target, Some("u2"), "Merger", Some("2"))).unwrap();

        let plans = plan_all(
            &source,
            &target,
            &[moving.clone(), merging.clone()],
            &[receiving.clone()],
        );
        let executor = PatientPlanExecutor::new(&store, source.id, target.id).unwrap();
        for plan in plans.iter() {
            executor.execute(plan).unwrap();
        }

        let moved = store.get_patient(target.id, moving.id).unwrap();
        assert_eq!(moved.tags, vec![target.patient_tags[0].id]);
        assert!(store.get_patient(source.id, merging.id).unwrap_err().is_not_found());
        assert_eq!(store.count_patients(target.id).unwrap(), 2);
        assert_eq!(store.count_patients(source.id).unwrap(), 0);
    }
}
