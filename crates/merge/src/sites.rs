//! Site reconciliation.
//!
//! Source sites move to the target. A source site whose name is already used
//! in the target is renamed with a numeric suffix on the way.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use clinic_core::{ClinicId, Entity};
use clinic_infra::{ClinicsService, PatientsService, StoreError};
use clinic_workspace::{Clinic, Site, maybe_rename_site, site_exists_with_name};

use crate::error::{MergeError, ReportError};
use crate::plan::{Plan, Planner, plan_list};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SiteAction {
    /// The site can't be migrated as-is.
    Invalid,
    Move,
    Retain,
    /// Move under a new, collision-free name.
    Rename,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitePlan {
    pub site: Site,
    pub action: SiteAction,
    /// Name of the workspace the site comes from.
    pub source_workspace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_rename: Option<String>,
    pub source_clinic_id: Option<ClinicId>,
    pub target_clinic_id: ClinicId,
}

impl SitePlan {
    /// Name of the site once merged.
    pub fn name(&self) -> &str {
        self.expected_rename.as_deref().unwrap_or(&self.site.name)
    }
}

impl Plan for SitePlan {
    fn prevents_merge(&self) -> bool {
        self.action == SiteAction::Invalid
    }

    fn errors(&self) -> Vec<ReportError> {
        if self.prevents_merge() {
            vec![ReportError::InvalidSite(self.name().to_string())]
        } else {
            Vec::new()
        }
    }
}

plan_list!(SitePlans, SitePlan);

impl SitePlans {
    /// Sites present in the target after the merge.
    pub fn resulting_sites_count(&self) -> usize {
        self.len()
    }

    pub fn renamed_sites_count(&self) -> usize {
        self.iter().filter(|p| p.action == SiteAction::Rename).count()
    }

    /// Resulting name of a source site, if it is planned to be renamed.
    pub fn renamed(&self, site: &Site) -> Option<&str> {
        self.iter()
            .find(|p| p.action == SiteAction::Rename && p.site.id == site.id)
            .and_then(|p| p.expected_rename.as_deref())
    }
}

impl Plan for SitePlans {
    fn prevents_merge(&self) -> bool {
        crate::plan::plans_prevent_merge(self)
    }

    fn errors(&self) -> Vec<ReportError> {
        crate::plan::plans_errors(self)
    }
}

pub enum SiteMergePlanner<'a> {
    Source {
        site: &'a Site,
        source: &'a Clinic,
        target: &'a Clinic,
    },
    Target {
        site: &'a Site,
        target: &'a Clinic,
    },
}

impl<'a> SiteMergePlanner<'a> {
    /// Planners for every site of both workspaces, source sites first.
    pub fn for_clinics(source: &'a Clinic, target: &'a Clinic) -> Vec<Self> {
        let sources = source
            .sites
            .iter()
            .map(|site| SiteMergePlanner::Source { site, source, target });
        let targets = target
            .sites
            .iter()
            .map(|site| SiteMergePlanner::Target { site, target });
        sources.chain(targets).collect()
    }
}

impl Planner for SiteMergePlanner<'_> {
    type Output = SitePlan;

    fn plan(&self) -> Result<SitePlan, MergeError> {
        let plan = match *self {
            SiteMergePlanner::Source { site, source, target } => {
                let mut plan = SitePlan {
                    site: site.clone(),
                    action: SiteAction::Move,
                    source_workspace: source.name.clone(),
                    expected_rename: None,
                    source_clinic_id: Some(source.id),
                    target_clinic_id: target.id,
                };
                if site.name.trim().is_empty() {
                    plan.action = SiteAction::Invalid;
                } else if site_exists_with_name(&target.sites, &site.name) {
                    plan.action = SiteAction::Rename;
                    plan.expected_rename = Some(maybe_rename_site(site, &target.sites)?);
                }
                plan
            }
            SiteMergePlanner::Target { site, target } => SitePlan {
                site: site.clone(),
                action: SiteAction::Retain,
                source_workspace: target.name.clone(),
                expected_rename: None,
                source_clinic_id: None,
                target_clinic_id: target.id,
            },
        };
        Ok(plan)
    }
}

pub struct SitePlanExecutor<'a, S> {
    store: &'a S,
}

impl<'a, S> SitePlanExecutor<'a, S>
where
    S: ClinicsService + PatientsService,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn execute(&self, plan: &SitePlan) -> Result<(), MergeError> {
        match plan.action {
            SiteAction::Retain => {
                debug!(site = %plan.site.name, "retaining existing target site");
                Ok(())
            }
            SiteAction::Move => self.move_site(plan),
            SiteAction::Rename => self.rename_site(plan),
            SiteAction::Invalid => Err(MergeError::unexpected(
                "site",
                format!("invalid site action for site: {:?}", plan.name()),
            )),
        }
    }

    fn source_clinic_id(plan: &SitePlan) -> Result<ClinicId, MergeError> {
        plan.source_clinic_id
            .ok_or_else(|| MergeError::unexpected("site", format!("{:?} has no source clinic", plan.site.name)))
    }

    fn move_site(&self, plan: &SitePlan) -> Result<(), MergeError> {
        let source_id = Self::source_clinic_id(plan)?;
        match self.store.create_site(plan.target_clinic_id, plan.site.clone()) {
            Ok(_) => {
                debug!(site = %plan.site.name, "created new target site");
                Ok(())
            }
            Err(StoreError::MaximumSitesExceeded) => {
                let touched = self.store.delete_patient_sites(source_id, plan.site.id)?;
                warn!(
                    site = %plan.site.name,
                    patients = touched,
                    "clinic site creation failed: maximum sites exceeded, deleted from source patients"
                );
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// The rename is recomputed against the current target sites, which may
    /// have changed since planning.
    fn rename_site(&self, plan: &SitePlan) -> Result<(), MergeError> {
        let source_id = Self::source_clinic_id(plan)?;
        let target = self.store.get_clinic(plan.target_clinic_id)?;
        if let Some(existing) = target.sites.iter().find(|s| s.same_entity(&plan.site)) {
            debug!(site = %plan.site.name, target_name = %existing.name, "site already present in target");
            return Ok(());
        }
        let new_name = maybe_rename_site(&plan.site, &target.sites)?;
        if new_name == plan.site.name {
            debug!(site = %plan.site.name, "site marked for rename no longer collides");
            return Ok(());
        }

        let renamed = Site {
            name: new_name,
            ..plan.site.clone()
        };
        self.store.create_site(plan.target_clinic_id, renamed.clone())?;
        self.store.update_patient_sites(source_id, plan.site.id, &renamed)?;
        debug!(from = %plan.site.name, to = %renamed.name, "renamed source site");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clinic_infra::InMemoryStore;
    use clinic_patients::Patient;
    use clinic_workspace::MAX_SITES_PER_CLINIC;

    use crate::plan::run_planners;

    fn clinic(name: &str, sites: &[&str]) -> Clinic {
        let mut clinic = Clinic::new(name);
        clinic.sites = sites.iter().copied().map(Site::new).collect();
        clinic
    }

    fn plans(source: &Clinic, target: &Clinic) -> SitePlans {
        run_planners(&SiteMergePlanner::for_clinics(source, target)).unwrap()
    }

    #[test]
    fn colliding_site_is_renamed_past_existing_suffixes() {
        let source = clinic("Source", &["X", "Y"]);
        let target = clinic("Target", &["X", "X (2)", "X (3)"]);

        let plans = plans(&source, &target);
        let x = plans.iter().find(|p| p.site.name == "X" && p.source_clinic_id.is_some()).unwrap();
        assert_eq!(x.action, SiteAction::Rename);
        assert_eq!(x.name(), "X (4)");

        let y = plans.iter().find(|p| p.site.name == "Y").unwrap();
        assert_eq!(y.action, SiteAction::Move);

        assert_eq!(plans.resulting_sites_count(), 5);
        assert_eq!(plans.renamed_sites_count(), 1);
        assert_eq!(plans.renamed(&source.sites[0]), Some("X (4)"));
    }

    #[test]
    fn collisions_ignore_case() {
        let source = clinic("Source", &["downtown"]);
        let target = clinic("Target", &["Downtown"]);
        let plans = plans(&source, &target);
        assert_eq!(plans[0].action, SiteAction::Rename);
        assert_eq!(plans[0].name(), "downtown (2)");
    }

    #[test]
    fn blank_site_name_blocks_merge() {
        let source = clinic("Source", &[" "]);
        let target = clinic("Target", &[]);
        let plans = plans(&source, &target);
        assert!(plans.prevents_merge());
        assert_eq!(plans.errors().len(), 1);
    }

    #[test]
    fn rename_updates_source_patients() {
        let store = InMemoryStore::new();
        let source = store.create_clinic(clinic("Source", &["Main"])).unwrap();
        let target = store.create_clinic(clinic("Target", &["Main"])).unwrap();

        let mut patient = Patient::new(source.id);
        patient.sites = source.sites.clone();
        let patient = store.create_patient(patient).unwrap();

        let executor = SitePlanExecutor::new(&store);
        for plan in plans(&source, &target).iter() {
            executor.execute(plan).unwrap();
        }

        let names: Vec<String> = store.list_sites(target.id).unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Main".to_string(), "Main (2)".to_string()]);
        let patient = store.get_patient(source.id, patient.id).unwrap();
        assert_eq!(patient.sites[0].name, "Main (2)");
    }

    #[test]
    fn rename_recomputes_against_current_target() {
        let store = InMemoryStore::new();
        let source = store.create_clinic(clinic("Source", &["Main"])).unwrap();
        let target = store.create_clinic(clinic("Target", &["Main"])).unwrap();
        let plans = plans(&source, &target);

        // Another site took the planned name after planning.
        store.create_site(target.id, Site::new("Main (2)")).unwrap();

        let executor = SitePlanExecutor::new(&store);
        executor.execute(&plans[0]).unwrap();
        let sites = store.list_sites(target.id).unwrap();
        assert!(sites.iter().any(|s| s.name == "Main (3)" && s.id == source.sites[0].id));
    }

    #[test]
    fn site_over_capacity_is_dropped_from_source_patients() {
        let store = InMemoryStore::new();
        let source = store.create_clinic(clinic("Source", &["Overflow"])).unwrap();
        let names: Vec<String> = (0..MAX_SITES_PER_CLINIC).map(|i| format!("Site {i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let target = store.create_clinic(clinic("Target", &refs)).unwrap();

        let mut patient = Patient::new(source.id);
        patient.sites = source.sites.clone();
        let patient = store.create_patient(patient).unwrap();

        let executor = SitePlanExecutor::new(&store);
        executor.execute(&plans(&source, &target)[0]).unwrap();

        assert_eq!(store.list_sites(target.id).unwrap().len(), MAX_SITES_PER_CLINIC);
        assert!(store.get_patient(source.id, patient.id).unwrap().sites.is_empty());
    }
}
