//! End-to-end merges over the in-memory store.
//!
//! Flow: fixtures → InMemoryStore → ClinicMergePlanner → ClinicPlanExecutor
//!
//! Verifies:
//! - Plan aggregates match the conflicts injected by the generator
//! - Execution leaves one merged workspace and retires the source
//! - Every executed sub-plan is persisted under one plan id
//! - Patient passes commit independently

use clinic_core::ClinicId;
use clinic_patients::Patient;
use clinic_infra::{
    ClinicsService, InMemoryStore, MergeConfig, Pagination, PatientFilter, PatientsService, PlanStore, PlanType,
};

use crate::clinic::{ClinicMergePlan, ClinicMergePlanner};
use crate::cluster::ConflictCategory;
use crate::error::MergeError;
use crate::executor::ClinicPlanExecutor;
use crate::fixtures::{Data, Params, random_data};
use crate::patients::PatientAction;
use crate::plan::{Plan, Planner};
use crate::report::{ReportGenerator, SHEET_SUMMARY};

struct Merge {
    store: InMemoryStore,
    source_id: ClinicId,
    target_id: ClinicId,
}

fn load(data: &Data) -> Merge {
    Merge {
        store: InMemoryStore::from_snapshot(data.clone().into_snapshot()),
        source_id: data.source.id,
        target_id: data.target.id,
    }
}

fn plan(merge: &Merge, config: &MergeConfig) -> ClinicMergePlan {
    ClinicMergePlanner::new(&merge.store, config, merge.source_id, merge.target_id)
        .plan()
        .unwrap()
}

#[test]
fn plan_counts_match_injected_conflicts() {
    let data = random_data(Params::default());
    let merge = load(&data);
    let plan = plan(&merge, &MergeConfig::default());

    assert!(!plan.prevents_merge());
    assert_eq!(plan.patient_plans.resulting_patients_count(), 90);

    let counts = plan.patient_plans.conflict_counts();
    assert_eq!(counts.get(&ConflictCategory::DuplicateAccounts), Some(&10));
    assert_eq!(counts.get(&ConflictCategory::LikelyDuplicateAccounts), Some(&9));
    assert_eq!(counts.get(&ConflictCategory::NameOnlyMatch), Some(&8));
    assert_eq!(counts.get(&ConflictCategory::MrnOnlyMatch), Some(&7));

    let merges = plan.patient_plans.iter().filter(|p| p.action == PatientAction::Merge).count();
    let merge_intos = plan.patient_plans.iter().filter(|p| p.action == PatientAction::MergeInto).count();
    assert_eq!(merges, 10);
    assert_eq!(merge_intos, 10);
    for merged in plan.patient_plans.iter().filter(|p| p.action == PatientAction::Merge) {
        let account = merged.source_patient.as_ref().and_then(|p| p.account_id.as_ref());
        assert!(data.target_patients_with_duplicates.contains_key(account.unwrap()));
    }

    // Shared "Main Campus" is renamed on the way in.
    assert!(plan.site_plans.iter().any(|p| p.name() == "Main Campus (2)"));
}

#[test]
fn report_summarizes_the_plan() {
    let data = random_data(Params::default());
    let merge = load(&data);
    let plan = plan(&merge, &MergeConfig::default());

    let workbook = ReportGenerator::new(&plan).generate().unwrap();
    let summary = workbook.sheet(SHEET_SUMMARY).unwrap();
    let row = summary.find_row("Resulting Patient Accounts").unwrap();
    assert_eq!(summary.rows[row][1], crate::report::Cell::Number(90));
    let row = summary.find_row("Can execute merge plan?").unwrap();
    assert_eq!(summary.value(row, 1), "Yes");

    // Summaries are only stripped on write; the report still sees them.
    assert!(plan.patient_plans.iter().any(|p| p.patient().is_some_and(|p| p.summary.is_some())));
}

#[test]
fn execution_produces_the_merged_workspace() {
    let data = random_data(Params::default());
    let merge = load(&data);
    let config = MergeConfig::default();
    let plan = plan(&merge, &config);

    let plan_id = ClinicPlanExecutor::new(&merge.store, &merge.store, &config)
        .execute(&plan)
        .unwrap();
    let store = &merge.store;

    assert!(store.get_clinic(merge.source_id).unwrap_err().is_not_found());
    assert_eq!(store.count_patients(merge.source_id).unwrap(), 0);

    let target = store.get_clinic(merge.target_id).unwrap();
    assert_eq!(target.patient_count, 90);
    assert_eq!(store.count_patients(merge.target_id).unwrap(), 90);
    for code in &data.source.share_codes {
        assert!(target.share_codes.contains(code));
    }
    assert!(target.is_admin(data.source_admin.account_id.as_ref().unwrap()));
    assert!(target.is_admin(data.target_admin.account_id.as_ref().unwrap()));
    for tag in &data.source.patient_tags {
        assert!(target.tag_by_name(&tag.name).is_some());
    }
    assert!(target.sites.iter().any(|s| s.name == "Main Campus (2)"));

    // The first duplicate carries "Main Campus" on both sides.
    let first = &data.source_patients[0];
    let filter = PatientFilter {
        clinic_id: Some(merge.target_id),
        account_id: first.account_id.clone(),
        ..PatientFilter::default()
    };
    let merged = store.list_patients(&filter, Pagination::default()).unwrap();
    assert_eq!(merged.total_count, 1);
    let merged = &merged.patients[0];
    let sites: Vec<&str> = merged.sites.iter().map(|s| s.name.as_str()).collect();
    assert!(sites.contains(&"Main Campus"));
    assert!(sites.contains(&"Main Campus (2)"));
    assert!(merged.summary.is_none());

    let planned = plan
        .patient_plans
        .iter()
        .find(|p| p.action == PatientAction::Merge && p.source_patient.as_ref().map(|s| s.id) == Some(first.id))
        .unwrap();
    let mut tags = target.tag_names(&merged.tags);
    tags.sort();
    assert_eq!(tags, planned.post_migration_tag_names);

    let count = |plan_type| store.find_plans(plan_id, Some(plan_type)).unwrap().len();
    assert_eq!(count(PlanType::Tag), plan.tag_plans.len());
    assert_eq!(count(PlanType::Site), plan.site_plans.len());
    assert_eq!(count(PlanType::Patient), 100);
    assert_eq!(count(PlanType::Clinician), 2);
    assert_eq!(count(PlanType::Clinic), 1);
    assert_eq!(store.list_plan_ids().unwrap(), vec![plan_id]);
}

#[test]
fn large_rosters_are_planned_and_executed_in_passes() {
    let data = random_data(Params {
        source_patients: 1025,
        target_patients: 1025,
        ..Params::default()
    });
    let merge = load(&data);
    let config = MergeConfig::default();
    let plan = plan(&merge, &config);
    assert_eq!(plan.patient_plans.len(), 2050);
    assert_eq!(plan.patient_plans.resulting_patients_count(), 2050 - 10);

    let plan_id = ClinicPlanExecutor::new(&merge.store, &merge.store, &config)
        .execute(&plan)
        .unwrap();
    assert_eq!(merge.store.count_patients(merge.target_id).unwrap(), 2040);
    assert_eq!(
        merge.store.find_plans(plan_id, Some(PlanType::Patient)).unwrap().len(),
        2050
    );
}

/// A source patient planned for MOVE in the second pass of ten.
fn second_pass_move(plan: &ClinicMergePlan) -> Patient {
    plan.patient_plans[10..20]
        .iter()
        .find(|p| p.action == PatientAction::Move)
        .and_then(|p| p.source_patient.clone())
        .unwrap()
}

#[test]
fn failed_pass_keeps_earlier_passes() {
    let data = random_data(Params::default());
    let merge = load(&data);
    let config = MergeConfig::default().with_page_size(10);
    let plan = plan(&merge, &config);

    // The second pass hits a record removed after planning.
    let missing = second_pass_move(&plan);
    merge.store.remove_patient(merge.source_id, missing.id).unwrap();

    let err = ClinicPlanExecutor::new(&merge.store, &merge.store, &config)
        .execute(&plan)
        .unwrap_err();
    assert!(matches!(err, MergeError::Store(ref e) if e.is_not_found()));

    let store = &merge.store;
    let source_id = |i: usize| plan.patient_plans[i].source_patient.as_ref().map(|p| p.id).unwrap();
    for i in 0..10 {
        assert!(store.get_patient(merge.source_id, source_id(i)).unwrap_err().is_not_found());
    }
    for i in 10..20 {
        if source_id(i) != missing.id {
            assert!(store.get_patient(merge.source_id, source_id(i)).is_ok());
        }
    }
    assert!(store.get_clinic(merge.source_id).is_ok());

    let plan_id = store.list_plan_ids().unwrap()[0];
    assert_eq!(store.find_plans(plan_id, Some(PlanType::Patient)).unwrap().len(), 10);
    assert!(store.find_plans(plan_id, Some(PlanType::Clinic)).unwrap().is_empty());
}

#[test]
fn replanning_after_a_partial_failure_finishes_the_merge() {
    let data = random_data(Params::default());
    let merge = load(&data);
    let config = MergeConfig::default().with_page_size(10);
    let plan = plan(&merge, &config);
    let missing = second_pass_move(&plan);
    merge.store.remove_patient(merge.source_id, missing.id).unwrap();

    let executor = ClinicPlanExecutor::new(&merge.store, &merge.store, &config);
    assert!(executor.execute(&plan).is_err());

    let replanned = self::plan(&merge, &config);
    assert!(!replanned.prevents_merge());
    executor.execute(&replanned).unwrap();

    assert!(merge.store.get_clinic(merge.source_id).unwrap_err().is_not_found());
    assert_eq!(merge.store.count_patients(merge.target_id).unwrap(), 89);
    let target = merge.store.get_clinic(merge.target_id).unwrap();
    assert_eq!(target.sites.iter().filter(|s| s.name.starts_with("Main Campus")).count(), 2);
}
