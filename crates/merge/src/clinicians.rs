//! Clinician reconciliation.
//!
//! Clinicians are matched by account id only. A clinician present in both
//! workspaces keeps the target membership and its roles.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use clinic_clinicians::{Clinician, Role};
use clinic_core::ClinicId;
use clinic_infra::{CliniciansService, ClinicsService};
use clinic_workspace::Clinic;

use crate::error::{MergeError, ReportError};
use crate::plan::{Plan, Planner, plan_list};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClinicianAction {
    /// Target clinician without a source counterpart.
    Retain,
    /// Source clinician folded into the target membership of the same account.
    Merge,
    /// Target clinician receiving a merge.
    MergeInto,
    /// Source clinician moved to the target.
    Move,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicianPlan {
    pub clinician: Clinician,
    pub action: ClinicianAction,
    /// A source admin that becomes a plain member of the target.
    pub downgraded: bool,
    pub resulting_roles: Vec<Role>,
    /// Workspace names the clinician belongs to, sorted.
    pub workspaces: Vec<String>,
}

impl ClinicianPlan {
    pub fn is_pending_invite(&self) -> bool {
        self.clinician.is_pending_invite()
    }

    pub fn is_resulting_admin(&self) -> bool {
        self.resulting_roles.contains(&Role::ClinicAdmin)
    }

    /// Whether the clinician appears in the merged workspace as its own row.
    pub fn is_resulting_member(&self) -> bool {
        matches!(
            self.action,
            ClinicianAction::Move | ClinicianAction::Merge | ClinicianAction::Retain
        )
    }
}

impl Plan for ClinicianPlan {
    fn prevents_merge(&self) -> bool {
        self.action == ClinicianAction::Move && self.is_pending_invite()
    }

    fn errors(&self) -> Vec<ReportError> {
        if self.prevents_merge() {
            vec![ReportError::PendingInvitesInSourceWorkspace]
        } else {
            Vec::new()
        }
    }
}

plan_list!(ClinicianPlans, ClinicianPlan);

impl ClinicianPlans {
    /// Pending invites per workspace name.
    pub fn pending_invites_by_workspace(&self) -> BTreeMap<String, usize> {
        let mut result = BTreeMap::new();
        for plan in self.iter().filter(|p| p.is_pending_invite()) {
            if let Some(workspace) = plan.workspaces.first() {
                *result.entry(workspace.clone()).or_insert(0) += 1;
            }
        }
        result
    }

    pub fn downgraded_members_count(&self) -> usize {
        self.iter().filter(|p| p.downgraded).count()
    }

    /// Active members of the merged workspace, pending invites excluded.
    pub fn resulting_members(&self) -> impl Iterator<Item = &ClinicianPlan> {
        self.iter()
            .filter(|p| p.is_resulting_member() && !p.is_pending_invite())
    }
}

impl Plan for ClinicianPlans {
    fn prevents_merge(&self) -> bool {
        crate::plan::plans_prevent_merge(self)
    }

    fn errors(&self) -> Vec<ReportError> {
        crate::plan::plans_errors(self)
    }
}

pub enum ClinicianMergePlanner<'a> {
    Source {
        clinician: &'a Clinician,
        source: &'a Clinic,
        target: &'a Clinic,
        target_clinicians: &'a [Clinician],
    },
    Target {
        clinician: &'a Clinician,
        source: &'a Clinic,
        target: &'a Clinic,
        source_clinicians: &'a [Clinician],
    },
}

impl<'a> ClinicianMergePlanner<'a> {
    /// Planners for both rosters, source clinicians first.
    pub fn for_rosters(
        source: &'a Clinic,
        target: &'a Clinic,
        source_clinicians: &'a [Clinician],
        target_clinicians: &'a [Clinician],
    ) -> Vec<Self> {
        let sources = source_clinicians.iter().map(|clinician| ClinicianMergePlanner::Source {
            clinician,
            source,
            target,
            target_clinicians,
        });
        let targets = target_clinicians.iter().map(|clinician| ClinicianMergePlanner::Target {
            clinician,
            source,
            target,
            source_clinicians,
        });
        sources.chain(targets).collect()
    }
}

fn same_account<'c>(clinician: &Clinician, roster: &'c [Clinician]) -> Option<&'c Clinician> {
    let account_id = clinician.account_id.as_ref()?;
    roster.iter().find(|c| c.account_id.as_ref() == Some(account_id))
}

impl Planner for ClinicianMergePlanner<'_> {
    type Output = ClinicianPlan;

    fn plan(&self) -> Result<ClinicianPlan, MergeError> {
        let plan = match *self {
            ClinicianMergePlanner::Source {
                clinician,
                source,
                target,
                target_clinicians,
            } => {
                let mut plan = ClinicianPlan {
                    clinician: clinician.clone(),
                    action: ClinicianAction::Move,
                    downgraded: false,
                    resulting_roles: clinician.roles.clone(),
                    workspaces: vec![source.name.clone()],
                };
                if let Some(existing) = same_account(clinician, target_clinicians) {
                    plan.action = ClinicianAction::Merge;
                    plan.workspaces.push(target.name.clone());
                    plan.workspaces.sort();
                    plan.downgraded = clinician.is_admin() && !existing.is_admin();
                    plan.resulting_roles = existing.roles.clone();
                }
                plan
            }
            ClinicianMergePlanner::Target {
                clinician,
                source,
                target,
                source_clinicians,
            } => {
                let mut plan = ClinicianPlan {
                    clinician: clinician.clone(),
                    action: ClinicianAction::Retain,
                    downgraded: false,
                    resulting_roles: clinician.roles.clone(),
                    workspaces: vec![target.name.clone()],
                };
                if same_account(clinician, source_clinicians).is_some() {
                    plan.action = ClinicianAction::MergeInto;
                    plan.workspaces.push(source.name.clone());
                    plan.workspaces.sort();
                }
                plan
            }
        };
        Ok(plan)
    }
}

pub struct ClinicianPlanExecutor<'a, S> {
    store: &'a S,
}

impl<'a, S> ClinicianPlanExecutor<'a, S>
where
    S: ClinicsService + CliniciansService,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn execute(&self, plan: &ClinicianPlan, target_id: ClinicId) -> Result<(), MergeError> {
        let clinician = &plan.clinician;
        match plan.action {
            ClinicianAction::Move => {
                info!(
                    clinic_id = %clinician.clinic_id,
                    clinician_id = %clinician.id,
                    target_clinic_id = %target_id,
                    "moving clinician"
                );
                let mut current = self.store.get_clinician(clinician.clinic_id, clinician.id)?;
                current.clinic_id = target_id;
                let moved = self.store.update_clinician(current)?;
                if moved.is_admin() {
                    if let Some(account_id) = &moved.account_id {
                        self.store.add_admin(target_id, account_id)?;
                    }
                }
                Ok(())
            }
            ClinicianAction::Merge => {
                // Target roles win; nothing to fold into the target record.
                info!(
                    clinic_id = %clinician.clinic_id,
                    clinician_id = %clinician.id,
                    "removing clinician"
                );
                self.store.remove_clinician(clinician.clinic_id, clinician.id)?;
                Ok(())
            }
            ClinicianAction::MergeInto | ClinicianAction::Retain => {
                debug!(
                    clinic_id = %clinician.clinic_id,
                    clinician_id = %clinician.id,
                    action = ?plan.action,
                    "skipping clinician plan - nothing to do"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clinic_core::{AccountId, InviteId};
    use clinic_infra::InMemoryStore;

    use crate::plan::run_planners;

    fn member(clinic: &Clinic, account: &str, roles: Vec<Role>) -> Clinician {
        Clinician::member(clinic.id, AccountId::parse(account).unwrap(), roles)
    }

    fn plans(source: &Clinic, target: &Clinic, src: &[Clinician], tgt: &[Clinician]) -> ClinicianPlans {
        run_planners(&ClinicianMergePlanner::for_rosters(source, target, src, tgt)).unwrap()
    }

    #[test]
    fn shared_account_merges_and_keeps_target_roles() {
        let source = Clinic::new("Source");
        let target = Clinic::new("Target");
        let src = vec![member(&source, "u1", vec![Role::ClinicAdmin])];
        let tgt = vec![member(&target, "u1", vec![Role::ClinicMember])];

        let plans = plans(&source, &target, &src, &tgt);
        assert_eq!(plans[0].action, ClinicianAction::Merge);
        assert!(plans[0].downgraded);
        assert_eq!(plans[0].resulting_roles, vec![Role::ClinicMember]);
        assert_eq!(plans[0].workspaces, vec!["Source".to_string(), "Target".to_string()]);
        assert_eq!(plans[1].action, ClinicianAction::MergeInto);
        assert_eq!(plans.downgraded_members_count(), 1);
        assert_eq!(plans.resulting_members().count(), 1);
    }

    #[test]
    fn admin_merging_into_admin_is_not_downgraded() {
        let source = Clinic::new("Source");
        let target = Clinic::new("Target");
        let src = vec![member(&source, "u1", vec![Role::ClinicAdmin])];
        let tgt = vec![member(&target, "u1", vec![Role::ClinicAdmin])];

        let plans = plans(&source, &target, &src, &tgt);
        assert!(!plans[0].downgraded);
        assert!(plans[0].is_resulting_admin());
    }

    #[test]
    fn pending_invite_in_source_blocks_merge() {
        let source = Clinic::new("Source");
        let target = Clinic::new("Target");
        let src = vec![
            member(&source, "u1", vec![Role::ClinicMember]),
            Clinician::invite(source.id, InviteId::parse("inv-1").unwrap(), "new@clinic.org"),
        ];

        let plans = plans(&source, &target, &src, &[]);
        assert!(plans.prevents_merge());
        assert_eq!(plans.errors(), vec![ReportError::PendingInvitesInSourceWorkspace]);
        assert_eq!(plans.pending_invites_by_workspace().get("Source"), Some(&1));
    }

    #[test]
    fn executor_moves_admins_and_removes_merged_members() {
        let store = InMemoryStore::new();
        let source = store.create_clinic(Clinic::new("Source")).unwrap();
        let target = store.create_clinic(Clinic::new("Target")).unwrap();

        let admin = store
            .create_clinician(member(&source, "admin", vec![Role::ClinicAdmin]))
            .unwrap();
        let duplicate = store
            .create_clinician(member(&source, "dup", vec![Role::ClinicMember]))
            .unwrap();
        let existing = store
            .create_clinician(member(&target, "dup", vec![Role::ClinicMember]))
            .unwrap();

        let plans = plans(&source, &target, &[admin.clone(), duplicate.clone()], &[existing]);
        let executor = ClinicianPlanExecutor::new(&store);
        for plan in plans.iter() {
            executor.execute(plan, target.id).unwrap();
        }

        let moved = store.get_clinician(target.id, admin.id).unwrap();
        assert_eq!(moved.clinic_id, target.id);
        assert!(store.get_clinic(target.id).unwrap().is_admin(admin.account_id.as_ref().unwrap()));
        assert!(store.get_clinician(source.id, duplicate.id).unwrap_err().is_not_found());
    }
}
