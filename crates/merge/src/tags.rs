//! Patient tag reconciliation.
//!
//! Tags are identified by name across workspaces. Source tags missing from
//! the target are created there; tags both sides share are unified under the
//! target's tag id.

use serde::{Deserialize, Serialize};
use tracing::debug;

use clinic_core::ClinicId;
use clinic_infra::ClinicsService;
use clinic_workspace::{Clinic, PatientTag};

use crate::error::{MergeError, ReportError};
use crate::plan::{Plan, Planner, plan_list};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagAction {
    /// The tag already exists in the target.
    Skip,
    /// Create the tag in the target.
    Create,
    /// Target tag, kept as-is.
    Retain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagPlan {
    pub name: String,
    pub action: TagAction,
    /// Names of the workspaces the tag is defined in, sorted.
    pub workspaces: Vec<String>,
    /// Target tag that absorbs a source tag of the same name.
    pub merge: bool,
    pub source_clinic_id: Option<ClinicId>,
    pub target_clinic_id: ClinicId,
}

impl Plan for TagPlan {
    fn prevents_merge(&self) -> bool {
        false
    }

    fn errors(&self) -> Vec<ReportError> {
        Vec::new()
    }
}

plan_list!(TagPlans, TagPlan);

impl TagPlans {
    /// Tags present in the target after the merge.
    pub fn resulting_tags_count(&self) -> usize {
        self.iter()
            .filter(|p| matches!(p.action, TagAction::Create | TagAction::Retain))
            .count()
    }

    pub fn duplicate_tags_count(&self) -> usize {
        self.iter().filter(|p| p.action == TagAction::Skip).count()
    }
}

impl Plan for TagPlans {
    fn prevents_merge(&self) -> bool {
        crate::plan::plans_prevent_merge(self)
    }

    fn errors(&self) -> Vec<ReportError> {
        crate::plan::plans_errors(self)
    }
}

pub enum TagMergePlanner<'a> {
    Source {
        tag: &'a PatientTag,
        source: &'a Clinic,
        target: &'a Clinic,
    },
    Target {
        tag: &'a PatientTag,
        source: &'a Clinic,
        target: &'a Clinic,
    },
}

impl<'a> TagMergePlanner<'a> {
    /// Planners for every tag of both workspaces, source tags first.
    pub fn for_clinics(source: &'a Clinic, target: &'a Clinic) -> Vec<Self> {
        let sources = source
            .patient_tags
            .iter()
            .map(|tag| TagMergePlanner::Source { tag, source, target });
        let targets = target
            .patient_tags
            .iter()
            .map(|tag| TagMergePlanner::Target { tag, source, target });
        sources.chain(targets).collect()
    }
}

impl Planner for TagMergePlanner<'_> {
    type Output = TagPlan;

    fn plan(&self) -> Result<TagPlan, MergeError> {
        let plan = match *self {
            TagMergePlanner::Source { tag, source, target } => {
                let mut plan = TagPlan {
                    name: tag.name.clone(),
                    action: TagAction::Create,
                    workspaces: vec![source.name.clone()],
                    merge: false,
                    source_clinic_id: Some(source.id),
                    target_clinic_id: target.id,
                };
                if target.tag_by_name(&tag.name).is_some() {
                    plan.action = TagAction::Skip;
                    plan.workspaces.push(target.name.clone());
                    plan.workspaces.sort();
                }
                plan
            }
            TagMergePlanner::Target { tag, source, target } => {
                let mut plan = TagPlan {
                    name: tag.name.clone(),
                    action: TagAction::Retain,
                    workspaces: vec![target.name.clone()],
                    merge: false,
                    source_clinic_id: None,
                    target_clinic_id: target.id,
                };
                if source.tag_by_name(&tag.name).is_some() {
                    plan.workspaces.push(source.name.clone());
                    plan.workspaces.sort();
                    plan.source_clinic_id = Some(source.id);
                    plan.merge = true;
                }
                plan
            }
        };
        Ok(plan)
    }
}

pub struct TagPlanExecutor<'a, S> {
    clinics: &'a S,
}

impl<'a, S: ClinicsService> TagPlanExecutor<'a, S> {
    pub fn new(clinics: &'a S) -> Self {
        Self { clinics }
    }

    pub fn execute(&self, plan: &TagPlan) -> Result<(), MergeError> {
        match plan.action {
            TagAction::Skip | TagAction::Retain => {
                debug!(tag = %plan.name, action = ?plan.action, "skipping tag");
                Ok(())
            }
            TagAction::Create => {
                self.clinics.create_patient_tag(plan.target_clinic_id, &plan.name)?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clinic_infra::InMemoryStore;

    use crate::plan::run_planners;

    fn clinic(name: &str, tags: &[&str]) -> Clinic {
        let mut clinic = Clinic::new(name);
        clinic.patient_tags = tags.iter().copied().map(PatientTag::new).collect();
        clinic
    }

    fn plans(source: &Clinic, target: &Clinic) -> TagPlans {
        run_planners(&TagMergePlanner::for_clinics(source, target)).unwrap()
    }

    #[test]
    fn source_only_tag_is_created() {
        let source = clinic("Source", &["Pump"]);
        let target = clinic("Target", &[]);

        let plans = plans(&source, &target);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].action, TagAction::Create);
        assert_eq!(plans[0].workspaces, vec!["Source".to_string()]);
    }

    #[test]
    fn shared_tag_is_skipped_and_merged() {
        let source = clinic("Source", &["CGM", "Pump"]);
        let target = clinic("Target", &["CGM", "Adult"]);

        let plans = plans(&source, &target);
        let skip = plans.iter().find(|p| p.name == "CGM" && p.action == TagAction::Skip).unwrap();
        assert_eq!(skip.workspaces, vec!["Source".to_string(), "Target".to_string()]);

        let retained = plans.iter().find(|p| p.name == "CGM" && p.action == TagAction::Retain).unwrap();
        assert!(retained.merge);
        assert_eq!(retained.workspaces.len(), 2);

        let adult = plans.iter().find(|p| p.name == "Adult").unwrap();
        assert!(!adult.merge);

        assert_eq!(plans.resulting_tags_count(), 3);
        assert_eq!(plans.duplicate_tags_count(), 1);
        assert!(!plans.prevents_merge());
    }

    #[test]
    fn executor_creates_only_new_tags() {
        let store = InMemoryStore::new();
        let source = clinic("Source", &["CGM", "Pump"]);
        let target = store.create_clinic(clinic("Target", &["CGM"])).unwrap();

        let executor = TagPlanExecutor::new(&store);
        for plan in plans(&source, &target).iter() {
            executor.execute(plan).unwrap();
        }

        let names: Vec<String> = store
            .get_clinic(target.id)
            .unwrap()
            .patient_tags
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["CGM".to_string(), "Pump".to_string()]);
    }
}
