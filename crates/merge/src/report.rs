//! Human-reviewable merge report.
//!
//! [`ReportGenerator`] renders a [`ClinicMergePlan`] into a [`Workbook`]: a
//! summary sheet followed by patient detail and duplicate review sheets.
//! The workbook is plain data and serializes to `.xlsx` with
//! [`Workbook::to_xlsx`]. Column layouts are consumed by audit tooling and
//! must stay stable.

use serde::{Deserialize, Serialize};

use clinic_patients::Patient;
use clinic_workspace::Clinic;

use crate::clinic::ClinicMergePlan;
use crate::clinicians::{ClinicianAction, ClinicianPlan};
use crate::cluster::{ConflictCategory, PatientClusters};
use crate::error::MergeError;
use crate::patients::{PatientAction, PatientPlan};
use crate::plan::Plan;
use crate::settings::SETTINGS_PARTIAL_SSO;
use crate::sites::{SiteAction, SitePlan, SitePlans};
use crate::tags::TagAction;

pub const SHEET_SUMMARY: &str = "Summary";
pub const SHEET_PATIENTS_IN_SOURCE_CLINIC: &str = "Patients in Source Clinic";
pub const SHEET_PATIENTS_IN_TARGET_CLINIC: &str = "Patients in Target Clinic";
pub const SHEET_DUPLICATES_IN_SOURCE_CLINIC: &str = "Duplicates in Source Clinic";
pub const SHEET_DUPLICATES_IN_TARGET_CLINIC: &str = "Duplicates in Target Clinic";
pub const SHEET_DUPLICATES_IN_MERGED_WORKSPACE: &str = "Duplicates in Merged Workspace";

/// Format of the "Report Generated" timestamp.
pub const REPORT_TIME_FORMAT: &str = "%B %e %Y %H:%M:%S UTC";
/// Format of the "Latest Upload" column.
pub const LAST_UPLOAD_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const FIRST_COLUMN_WIDTH: f64 = 50.0;

const PATIENT_COLUMNS: [&str; 8] = [
    "Name ---",
    "Claimed ---",
    "UUID ---",
    "DOB ---",
    "MRN ---",
    "Tags ---",
    "Sites ---",
    "Latest Upload ---",
];

/// Weak conflicts reviewed in the merged workspace sheet, in display order.
const REVIEWED_CONFLICTS: [(ConflictCategory, &str); 3] = [
    (ConflictCategory::LikelyDuplicateAccounts, "Review likely duplicate(s)"),
    (ConflictCategory::NameOnlyMatch, "Review duplicate name"),
    (ConflictCategory::MrnOnlyMatch, "Review duplicate MRN"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Empty,
    Text(String),
    Number(i64),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn count(value: usize) -> Self {
        Cell::Number(i64::try_from(value).unwrap_or(i64::MAX))
    }

    pub fn as_text(&self) -> &str {
        match self {
            Cell::Text(s) => s,
            _ => "",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rows: Vec::new(),
        }
    }

    fn row(&mut self, cells: Vec<Cell>) {
        self.rows.push(cells);
    }

    fn line(&mut self, text: &str) {
        self.rows.push(vec![Cell::text(text)]);
    }

    fn blank(&mut self) {
        self.rows.push(Vec::new());
    }

    /// Value of a cell, empty when out of range.
    pub fn value(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map_or("", Cell::as_text)
    }

    /// Index of the first row whose first cell starts with `prefix`.
    pub fn find_row(&self, prefix: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.first().is_some_and(|c| c.as_text().starts_with(prefix)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    /// Render as an `.xlsx` document.
    pub fn to_xlsx(&self) -> Result<Vec<u8>, MergeError> {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        for sheet in &self.sheets {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(&sheet.name).map_err(report_error)?;
            for (r, row) in sheet.rows.iter().enumerate() {
                let r = u32::try_from(r).map_err(|e| MergeError::Report(e.to_string()))?;
                for (c, cell) in row.iter().enumerate() {
                    let c = u16::try_from(c).map_err(|e| MergeError::Report(e.to_string()))?;
                    match cell {
                        Cell::Empty => {}
                        Cell::Text(text) => {
                            worksheet.write_string(r, c, text).map_err(report_error)?;
                        }
                        Cell::Number(n) => {
                            worksheet.write_number(r, c, *n as f64).map_err(report_error)?;
                        }
                    }
                }
            }
            worksheet.autofit();
            worksheet.set_column_width(0, FIRST_COLUMN_WIDTH).map_err(report_error)?;
        }
        workbook.save_to_buffer().map_err(report_error)
    }
}

fn report_error(err: rust_xlsxwriter::XlsxError) -> MergeError {
    MergeError::Report(err.to_string())
}

/// Builds the review workbook of a plan. Never mutates the plan.
pub struct ReportGenerator<'a> {
    plan: &'a ClinicMergePlan,
}

impl<'a> ReportGenerator<'a> {
    pub fn new(plan: &'a ClinicMergePlan) -> Self {
        Self { plan }
    }

    pub fn generate(&self) -> Result<Workbook, MergeError> {
        Ok(Workbook {
            sheets: vec![
                self.summary_sheet(),
                self.source_patients_sheet(),
                self.target_patients_sheet(),
                duplicates_sheet(
                    SHEET_DUPLICATES_IN_SOURCE_CLINIC,
                    &self.plan.source_patient_clusters,
                    &self.plan.source,
                ),
                duplicates_sheet(
                    SHEET_DUPLICATES_IN_TARGET_CLINIC,
                    &self.plan.target_patient_clusters,
                    &self.plan.target,
                ),
                self.merged_duplicates_sheet()?,
            ],
        })
    }

    fn summary_sheet(&self) -> Sheet {
        let mut sh = Sheet::new(SHEET_SUMMARY);
        self.add_summary_header(&mut sh);
        self.add_settings_summary(&mut sh);
        self.add_measures_summary(&mut sh);
        self.add_clinician_summary(&mut sh);
        self.add_tags_summary(&mut sh);
        self.add_sites_summary(&mut sh);
        sh
    }

    fn add_summary_header(&self, sh: &mut Sheet) {
        let plan = self.plan;
        sh.line("SUMMARY");
        sh.blank();
        sh.row(vec![
            Cell::text("Report Generated"),
            Cell::text(plan.created_time.format(REPORT_TIME_FORMAT).to_string()),
        ]);
        sh.blank();
        sh.row(vec![
            Cell::text("Merging from Workspace 1 (Source)"),
            Cell::text(&plan.source.name),
        ]);
        sh.row(vec![
            Cell::text("Merging to Workspace 2 (Target)"),
            Cell::text(&plan.target.name),
        ]);
        let can_execute = if plan.prevents_merge() {
            format!("No. {}", plan.error_messages().join("; "))
        } else {
            "Yes".to_string()
        };
        sh.row(vec![Cell::text("Can execute merge plan?"), Cell::text(can_execute)]);
        sh.blank();
    }

    fn add_settings_summary(&self, sh: &mut Sheet) {
        let plan = self.plan;
        sh.row(vec![
            Cell::text("Settings ---"),
            Cell::text("Do they match? ---"),
            Cell::text(format!("{} ---", plan.source.name)),
            Cell::text(format!("{} ---", plan.target.name)),
        ]);

        let restrictions = &plan.membership_restrictions_plan;
        sh.row(vec![
            Cell::text(SETTINGS_PARTIAL_SSO),
            yes_no(restrictions.values_match()),
            Cell::text(restrictions.source_display()),
            Cell::text(restrictions.target_display()),
        ]);
        for setting in plan.settings_plans.iter() {
            sh.row(vec![
                Cell::text(&setting.name),
                yes_no(setting.values_match()),
                Cell::text(&setting.source_value),
                Cell::text(&setting.target_value),
            ]);
        }
        sh.line(
            "*If the target clinic has partial SSO and the source clinic does not, the clinic users in the \
             source clinic should be manually invited to the target clinic before the merge. This way their \
             SSO configuration will be correct.",
        );
        sh.blank();
    }

    /// Resulting memberships split into admins and members. MERGE_INTO rows
    /// are reported by their source MERGE counterpart.
    fn resulting_clinicians(&self) -> (Vec<&ClinicianPlan>, Vec<&ClinicianPlan>) {
        self.plan
            .clinician_plans
            .iter()
            .filter(|p| p.action != ClinicianAction::MergeInto)
            .partition(|p| p.is_resulting_admin())
    }

    fn add_measures_summary(&self, sh: &mut Sheet) {
        let plan = self.plan;
        let (admins, members) = self.resulting_clinicians();
        let conflicts = plan.patient_plans.conflict_counts();
        let conflict = |category: ConflictCategory| conflicts.get(&category).copied().unwrap_or(0);

        sh.row(vec![Cell::text("Measures ---"), Cell::text("Count ---")]);
        let measures = [
            ("Resulting Members & Admins", admins.len() + members.len()),
            ("- Members downgraded from Admin", plan.clinician_plans.downgraded_members_count()),
            ("Resulting Tags", plan.tag_plans.resulting_tags_count()),
            ("- Duplicate tags that will be merged", plan.tag_plans.duplicate_tags_count()),
            ("Resulting Sites", plan.site_plans.resulting_sites_count()),
            ("- Duplicate sites that will be renamed", plan.site_plans.renamed_sites_count()),
            ("Resulting Patient Accounts", plan.patient_plans.resulting_patients_count()),
            ("- Duplicate Accounts", conflict(ConflictCategory::DuplicateAccounts)),
            ("- Likely Duplicate Accounts", conflict(ConflictCategory::LikelyDuplicateAccounts)),
            ("- Duplicate MRN Only", conflict(ConflictCategory::MrnOnlyMatch)),
            ("- Duplicate Name Only", conflict(ConflictCategory::NameOnlyMatch)),
        ];
        for (label, count) in measures {
            sh.row(vec![Cell::text(label), Cell::count(count)]);
        }
        sh.blank();
    }

    fn add_clinician_summary(&self, sh: &mut Sheet) {
        let (admins, members) = self.resulting_clinicians();

        sh.row(vec![
            Cell::text(format!("Resulting Admins ({})", admins.len())),
            Cell::text("Workspace ---"),
            Cell::text("Email ---"),
        ]);
        for plan in &admins {
            sh.row(clinician_row(plan));
        }
        sh.blank();

        sh.row(vec![
            Cell::text(format!("Resulting Members ({})", members.len())),
            Cell::text("Workspace ---"),
            Cell::text("Email ---"),
            Cell::text("Downgrade (Only if the person is an Admin at Workspace 1 but a Member at Workspace 2) ----"),
        ]);
        for plan in &members {
            let mut row = clinician_row(plan);
            if plan.downgraded {
                row.push(Cell::text("Yes"));
            }
            sh.row(row);
        }
        sh.blank();

        let pending = self.plan.clinician_plans.pending_invites_by_workspace();
        sh.row(vec![
            Cell::text(format!("Pending Invites ({})", pending.values().sum::<usize>())),
            Cell::text("Workspace ---"),
        ]);
        for (workspace, count) in pending {
            sh.row(vec![Cell::count(count), Cell::text(workspace)]);
        }
        sh.blank();
    }

    fn add_tags_summary(&self, sh: &mut Sheet) {
        let tags = &self.plan.tag_plans;
        sh.row(vec![
            Cell::text(format!("Resulting Tags ({}) ---", tags.resulting_tags_count())),
            Cell::text("Workspace ---"),
            Cell::text("Merge ---"),
        ]);
        for plan in tags.iter().filter(|p| p.action != TagAction::Skip) {
            let mut row = vec![Cell::text(&plan.name), Cell::text(plan.workspaces.join(", "))];
            if plan.merge {
                row.push(Cell::text("Yes"));
            }
            sh.row(row);
        }
        sh.blank();
    }

    fn add_sites_summary(&self, sh: &mut Sheet) {
        let sites = &self.plan.site_plans;
        sh.row(vec![
            Cell::text(format!("Resulting Sites ({}) ---", sites.resulting_sites_count())),
            Cell::text("Workspace ---"),
            Cell::text("Action ---"),
        ]);

        let mut sorted: Vec<&SitePlan> = sites.iter().collect();
        sorted.sort_by_key(|p| p.name().to_lowercase());
        for plan in sorted {
            let action = match plan.action {
                SiteAction::Move => "Create",
                SiteAction::Rename => "Rename",
                SiteAction::Retain => "Retain",
                SiteAction::Invalid => "Invalid",
            };
            sh.row(vec![
                Cell::text(plan.name()),
                Cell::text(&plan.source_workspace),
                Cell::text(action),
            ]);
        }
        sh.blank();
    }

    fn source_patients_sheet(&self) -> Sheet {
        let mut sh = Sheet::new(SHEET_PATIENTS_IN_SOURCE_CLINIC);
        sh.row(header(&[], &PATIENT_COLUMNS));
        sh.blank();
        for plan in self.plan.patient_plans.source_patient_plans() {
            if let Some(patient) = &plan.source_patient {
                let sites = source_site_names(patient, &self.plan.site_plans);
                sh.row(patient_row(patient, &plan.source_tag_names, sites));
            }
        }
        sh
    }

    fn target_patients_sheet(&self) -> Sheet {
        let mut sh = Sheet::new(SHEET_PATIENTS_IN_TARGET_CLINIC);
        sh.row(header(&[], &PATIENT_COLUMNS));
        sh.blank();
        for plan in self.plan.patient_plans.target_patient_plans() {
            if let Some(patient) = &plan.target_patient {
                sh.row(patient_row(patient, &plan.target_tag_names, site_names(patient)));
            }
        }
        sh
    }

    fn merged_duplicates_sheet(&self) -> Result<Sheet, MergeError> {
        let plan = self.plan;
        let mut sh = Sheet::new(SHEET_DUPLICATES_IN_MERGED_WORKSPACE);
        sh.line("MERGED WORKSPACE PATIENT REVIEW");
        sh.line(
            "- We have identified the following patients from the Source Clinic that appear to be duplicates \
             of one or more patients in the Target Clinic. You can see the original patient in the row next to \
             \"Patient 1,\" and what we are doing with the patient under the \"Status\" column",
        );
        sh.line(
            "- Accounts with the same UUID are exact matches. While all diabetes data is already synced, \
             workspaces may have different descriptive text for these accounts. All tags will be retained and \
             other fields will defer to the Target Clinic if they differ.",
        );
        sh.line(
            "- Likely duplicates match in at least 2 fields out of Name, DOB, and MRN (blank fields do not \
             count as matches). All of these accounts will be brought into the resulting workspace and should \
             be manually reviewed to remove duplicates.",
        );
        sh.blank();
        sh.row(header(&["", "Status ---", "Original Workspace ---"], &PATIENT_COLUMNS));

        let reviewed = plan
            .patient_plans
            .iter()
            .filter(|p| p.source_patient.is_some() && p.has_conflicts());
        for (i, patient_plan) in reviewed.enumerate() {
            self.add_merged_review(&mut sh, i + 1, patient_plan)?;
            sh.blank();
        }
        Ok(sh)
    }

    fn add_merged_review(&self, sh: &mut Sheet, number: usize, patient_plan: &PatientPlan) -> Result<(), MergeError> {
        let plan = self.plan;
        let Some(source) = &patient_plan.source_patient else {
            return Ok(());
        };

        let status = if patient_plan.prevents_merge() {
            "(ERROR)"
        } else if patient_plan.action == PatientAction::Merge {
            "(combined)"
        } else {
            "(retained)"
        };
        let mut row = vec![
            Cell::text(format!("Patient {number}")),
            Cell::text(status),
            Cell::text(&plan.source.name),
        ];
        row.extend(patient_row(
            source,
            &patient_plan.source_tag_names,
            source_site_names(source, &plan.site_plans),
        ));
        sh.row(row);

        match patient_plan.conflicts_in(ConflictCategory::DuplicateAccounts) {
            [] => {}
            [duplicate] => {
                sh.row(vec![Cell::Empty, Cell::text("Exact Match: Results in one claimed account")]);

                let mut result = vec![Cell::Empty, Cell::text("(result)"), Cell::Empty];
                result.extend(patient_row(
                    &duplicate.patient,
                    &patient_plan.post_migration_tag_names,
                    patient_plan.resulting_sites(&plan.site_plans),
                ));
                sh.row(result);

                let mut combined = vec![Cell::Empty, Cell::text("(combined)"), Cell::text(&plan.target.name)];
                combined.extend(patient_row(
                    &duplicate.patient,
                    &patient_plan.target_tag_names,
                    site_names(&duplicate.patient),
                ));
                sh.row(combined);
            }
            many => {
                return Err(MergeError::unexpected(
                    "patient",
                    format!("unexpected number of duplicate accounts {} for patient {}", many.len(), source.id),
                ));
            }
        }

        for (category, description) in REVIEWED_CONFLICTS {
            let conflicts = patient_plan.conflicts_in(category);
            if conflicts.is_empty() {
                continue;
            }
            sh.row(vec![Cell::Empty, Cell::text(description)]);
            for conflict in conflicts {
                let mut row = vec![Cell::Empty, Cell::text("(retained)"), Cell::text(&plan.target.name)];
                row.extend(patient_row(
                    &conflict.patient,
                    &plan.target.tag_names(&conflict.patient.tags),
                    site_names(&conflict.patient),
                ));
                sh.row(row);
            }
        }
        Ok(())
    }
}

fn duplicates_sheet(name: &str, clusters: &PatientClusters, clinic: &Clinic) -> Sheet {
    let mut sh = Sheet::new(name);
    sh.line(&clinic.name);
    sh.line("Review Possible Duplicates");
    sh.line(
        "- Below we list groups of patients that appear to be duplicate accounts. For each patient in the \
         group, you can see their connection with the other patients in the \"Likely Duplicates\", \"Name \
         Only Matches\" and \"MRN Only Matches\" columns.",
    );
    sh.line(
        "- If the patient matches another patient in the group on 2 or more of the following -- MRN, DOB or \
         name -- then we will list that matching patient's ID in the \"Likely Duplicates\" column. If the \
         patient matches another on name only, or MRN only, we list those IDs in the corresponding columns.",
    );
    sh.line("- Each patient appears only once, so after you resolve each group you don't have to backtrack.");
    sh.blank();

    let mut columns = PATIENT_COLUMNS.to_vec();
    columns[1] = "Claimed? ---";
    columns.extend(["Likely Duplicates ---", "Name Only Matches ---", "MRN Only Matches ---"]);
    sh.row(header(&[""], &columns));

    for (i, cluster) in clusters.iter().enumerate() {
        sh.line(&format!("Review {}", i + 1));
        for member in &cluster.patients {
            let mut row = vec![Cell::Empty];
            row.extend(patient_row(
                &member.patient,
                &clinic.tag_names(&member.patient.tags),
                site_names(&member.patient),
            ));
            for category in [
                ConflictCategory::LikelyDuplicateAccounts,
                ConflictCategory::NameOnlyMatch,
                ConflictCategory::MrnOnlyMatch,
            ] {
                let keys = member.conflicts.get(&category).map(|k| k.join(", ")).unwrap_or_default();
                row.push(Cell::text(keys));
            }
            sh.row(row);
        }
        sh.blank();
    }
    sh
}

fn header(leading: &[&str], columns: &[&str]) -> Vec<Cell> {
    leading
        .iter()
        .map(|c| if c.is_empty() { Cell::Empty } else { Cell::text(*c) })
        .chain(columns.iter().map(|c| Cell::text(*c)))
        .collect()
}

fn yes_no(value: bool) -> Cell {
    Cell::text(if value { "Yes" } else { "No" })
}

fn clinician_row(plan: &ClinicianPlan) -> Vec<Cell> {
    vec![
        Cell::text(plan.clinician.display_name()),
        Cell::text(plan.workspaces.join(", ")),
        Cell::text(plan.clinician.display_email()),
    ]
}

fn site_names(patient: &Patient) -> Vec<String> {
    patient.sites.iter().map(|s| s.name.clone()).collect()
}

/// Source site names as they will read in the target.
fn source_site_names(patient: &Patient, site_plans: &SitePlans) -> Vec<String> {
    patient
        .sites
        .iter()
        .map(|s| site_plans.renamed(s).unwrap_or(&s.name).to_string())
        .collect()
}

fn patient_row(patient: &Patient, tags: &[String], mut sites: Vec<String>) -> Vec<Cell> {
    let mut tags = tags.to_vec();
    tags.sort();
    tags.dedup();
    sites.sort_by_key(|s| s.to_lowercase());

    vec![
        Cell::text(patient.full_name.clone().unwrap_or_default()),
        Cell::text(if patient.is_custodial() { "-" } else { "Y" }),
        Cell::text(patient.account_id.as_ref().map(|a| a.to_string()).unwrap_or_default()),
        Cell::text(patient.birth_date.map(|d| d.to_string()).unwrap_or_default()),
        Cell::text(patient.mrn.clone().unwrap_or_default()),
        Cell::text(tags.join(", ")),
        Cell::text(sites.join(", ")),
        match patient.last_upload_date() {
            Some(at) => Cell::text(at.format(LAST_UPLOAD_TIME_FORMAT).to_string()),
            None => Cell::Empty,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use clinic_clinicians::{Clinician, Role};
    use clinic_core::{AccountId, ExpectedVersion};
    use clinic_infra::{CliniciansService, ClinicsService, InMemoryStore, MergeConfig, PatientsService};
    use clinic_patients::PatientSummary;
    use clinic_workspace::{MrnSettings, Site};

    use crate::clinic::ClinicMergePlanner;
    use crate::plan::Planner;

    const FIRST_PATIENT_ROW: usize = 2;
    const SITES_COL: usize = 6;
    const LATEST_UPLOAD_COL: usize = 7;

    struct Fixture {
        store: InMemoryStore,
        source: Clinic,
        target: Clinic,
    }

    fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let mut source = Clinic::new("Source Clinic");
        source.sites = vec![Site::new("Chicago"), Site::new("New York"), Site::new("Some Source Site")];
        let mut target = Clinic::new("Target Clinic");
        target.sites = vec![Site::new("Chicago"), Site::new("San Diego"), Site::new("Some Target Site")];
        let source = store.create_clinic(source).unwrap();
        let target = store.create_clinic(target).unwrap();

        let mut patient = Patient::new(source.id);
        patient.account_id = Some(AccountId::parse("src-1").unwrap());
        patient.full_name = Some("Ada Source".into());
        patient.sites = vec![source.sites[2].clone()];
        patient.summary = Some(PatientSummary {
            last_upload_date: Some(Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 6).unwrap()),
            ..PatientSummary::default()
        });
        store.create_patient(patient).unwrap();

        let mut patient = Patient::new(target.id);
        patient.account_id = Some(AccountId::parse("tgt-1").unwrap());
        patient.full_name = Some("Tess Target".into());
        patient.sites = vec![target.sites[2].clone()];
        store.create_patient(patient).unwrap();

        store
            .create_clinician(Clinician::member(
                source.id,
                AccountId::parse("admin").unwrap(),
                vec![Role::ClinicAdmin],
            ))
            .unwrap();

        Fixture { store, source, target }
    }

    fn plan(fixture: &Fixture) -> ClinicMergePlan {
        let config = MergeConfig::default();
        ClinicMergePlanner::new(&fixture.store, &config, fixture.source.id, fixture.target.id)
            .plan()
            .unwrap()
    }

    fn report(plan: &ClinicMergePlan) -> Workbook {
        ReportGenerator::new(plan).generate().unwrap()
    }

    #[test]
    fn sheets_follow_the_fixed_layout() {
        let workbook = report(&plan(&fixture()));
        let names: Vec<&str> = workbook.sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                SHEET_SUMMARY,
                SHEET_PATIENTS_IN_SOURCE_CLINIC,
                SHEET_PATIENTS_IN_TARGET_CLINIC,
                SHEET_DUPLICATES_IN_SOURCE_CLINIC,
                SHEET_DUPLICATES_IN_TARGET_CLINIC,
                SHEET_DUPLICATES_IN_MERGED_WORKSPACE,
            ]
        );
    }

    #[test]
    fn latest_upload_uses_fixed_format() {
        let workbook = report(&plan(&fixture()));
        let source = workbook.sheet(SHEET_PATIENTS_IN_SOURCE_CLINIC).unwrap();
        assert_eq!(source.value(FIRST_PATIENT_ROW, LATEST_UPLOAD_COL), "2024-03-09 14:05:06");
        let target = workbook.sheet(SHEET_PATIENTS_IN_TARGET_CLINIC).unwrap();
        assert_eq!(target.value(FIRST_PATIENT_ROW, LATEST_UPLOAD_COL), "");
    }

    #[test]
    fn patient_sheets_list_site_names() {
        let workbook = report(&plan(&fixture()));
        let source = workbook.sheet(SHEET_PATIENTS_IN_SOURCE_CLINIC).unwrap();
        assert_eq!(source.value(FIRST_PATIENT_ROW, SITES_COL), "Some Source Site");
        let target = workbook.sheet(SHEET_PATIENTS_IN_TARGET_CLINIC).unwrap();
        assert_eq!(target.value(FIRST_PATIENT_ROW, SITES_COL), "Some Target Site");
    }

    #[test]
    fn sites_summary_is_sorted_with_actions() {
        let workbook = report(&plan(&fixture()));
        let summary = workbook.sheet(SHEET_SUMMARY).unwrap();
        let start = summary.find_row("Resulting Sites (").unwrap();
        assert_eq!(summary.value(start, 0), "Resulting Sites (6) ---");

        let rows: Vec<(&str, &str)> = (start + 1..)
            .take_while(|&r| !summary.value(r, 0).is_empty())
            .map(|r| (summary.value(r, 0), summary.value(r, 2)))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("Chicago", "Retain"),
                ("Chicago (2)", "Rename"),
                ("New York", "Create"),
                ("San Diego", "Retain"),
                ("Some Source Site", "Create"),
                ("Some Target Site", "Retain"),
            ]
        );
    }

    #[test]
    fn summary_header_reports_blocking_errors() {
        let fixture = fixture();
        let mut target = fixture.store.get_clinic(fixture.target.id).unwrap();
        target.mrn_settings = Some(MrnSettings {
            required: true,
            unique: false,
        });
        fixture.store.update_clinic(target, ExpectedVersion::Any).unwrap();

        let workbook = report(&plan(&fixture));
        let summary = workbook.sheet(SHEET_SUMMARY).unwrap();
        let row = summary.find_row("Can execute merge plan?").unwrap();
        assert_eq!(summary.value(row, 1), "No. Settings mismatch; Target workspace requires MRNs");
    }

    #[test]
    fn blank_site_is_reported_as_invalid() {
        let fixture = fixture();
        let mut source = fixture.store.get_clinic(fixture.source.id).unwrap();
        source.sites.push(Site::new(" "));
        fixture.store.update_clinic(source, ExpectedVersion::Any).unwrap();

        let plan = plan(&fixture);
        assert!(plan.site_plans.prevents_merge());
        let workbook = report(&plan);
        let summary = workbook.sheet(SHEET_SUMMARY).unwrap();

        let row = summary.find_row("Can execute merge plan?").unwrap();
        assert!(summary.value(row, 1).starts_with("No. invalid site action for site:"));

        let start = summary.find_row("Resulting Sites (").unwrap();
        let invalid = (start + 1..summary.rows.len())
            .find(|&r| summary.value(r, 2) == "Invalid")
            .unwrap();
        assert_eq!(summary.value(invalid, 0), " ");
        assert_eq!(summary.value(invalid, 1), "Source Clinic");
    }

    #[test]
    fn report_generated_timestamp_format() {
        let mut plan = plan(&fixture());
        plan.created_time = Utc.with_ymd_and_hms(2024, 1, 5, 9, 30, 0).unwrap();
        let summary = report(&plan).sheets.remove(0);
        let row = summary.find_row("Report Generated").unwrap();
        assert_eq!(summary.value(row, 1), "January  5 2024 09:30:00 UTC");
    }

    #[test]
    fn merged_sheet_shows_combined_accounts() {
        let fixture = fixture();
        let mut duplicate = Patient::new(fixture.target.id);
        duplicate.account_id = Some(AccountId::parse("src-1").unwrap());
        duplicate.full_name = Some("Ada Target".into());
        fixture.store.create_patient(duplicate).unwrap();

        let workbook = report(&plan(&fixture));
        let merged = workbook.sheet(SHEET_DUPLICATES_IN_MERGED_WORKSPACE).unwrap();
        let row = merged.find_row("Patient 1").unwrap();
        assert_eq!(merged.value(row, 1), "(combined)");
        assert_eq!(merged.value(row, 3), "Ada Source");
        assert_eq!(merged.value(row + 1, 1), "Exact Match: Results in one claimed account");
        assert_eq!(merged.value(row + 2, 1), "(result)");
        assert_eq!(merged.value(row + 3, 2), "Target Clinic");
        assert!(merged.find_row("Patient 2").is_none());
    }

    #[test]
    fn workbook_renders_to_xlsx() {
        let bytes = report(&plan(&fixture())).to_xlsx().unwrap();
        // xlsx files are zip archives.
        assert_eq!(&bytes[..2], b"PK");
    }
}
