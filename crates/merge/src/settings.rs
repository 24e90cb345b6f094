//! Workspace settings comparison.
//!
//! Settings are never migrated. Mismatches are reported so reviewers can
//! reconcile them by hand; only membership restrictions can block a merge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use clinic_workspace::{Clinic, MembershipRestriction};

use crate::error::{MergeError, ReportError};
use crate::plan::{Plan, Planner, plan_list};

pub const SETTINGS_PARTIAL_SSO: &str = "Partial SSO*";
pub const SETTINGS_MRN_REQUIRED: &str = "MRN Required";
pub const SETTINGS_MRN_UNIQUE: &str = "MRN Unique";
pub const SETTINGS_GLUCOSE_UNITS: &str = "Glucose Units";
pub const SETTINGS_TIMEZONE: &str = "Timezone";

/// A compared workspace setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Setting {
    MrnRequired,
    MrnUnique,
    GlucoseUnits,
    Timezone,
}

impl Setting {
    pub const ALL: [Setting; 4] = [
        Setting::MrnRequired,
        Setting::MrnUnique,
        Setting::GlucoseUnits,
        Setting::Timezone,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Setting::MrnRequired => SETTINGS_MRN_REQUIRED,
            Setting::MrnUnique => SETTINGS_MRN_UNIQUE,
            Setting::GlucoseUnits => SETTINGS_GLUCOSE_UNITS,
            Setting::Timezone => SETTINGS_TIMEZONE,
        }
    }

    /// Display value of the setting in `clinic`.
    pub fn value(&self, clinic: &Clinic) -> String {
        match self {
            Setting::MrnRequired if clinic.mrn_required() => "Required".to_string(),
            Setting::MrnRequired => "Not Required".to_string(),
            Setting::MrnUnique if clinic.mrn_unique() => "Yes".to_string(),
            Setting::MrnUnique => "No".to_string(),
            Setting::GlucoseUnits => clinic.preferred_bg_units.clone(),
            Setting::Timezone => clinic.timezone.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPlan {
    pub name: String,
    pub source_value: String,
    pub target_value: String,
}

impl SettingsPlan {
    pub fn values_match(&self) -> bool {
        self.source_value == self.target_value
    }
}

impl Plan for SettingsPlan {
    /// Mismatched settings are informational.
    fn prevents_merge(&self) -> bool {
        false
    }

    fn errors(&self) -> Vec<ReportError> {
        if self.values_match() {
            Vec::new()
        } else {
            vec![ReportError::WorkspaceSettingsMismatch]
        }
    }
}

plan_list!(SettingsPlans, SettingsPlan);

impl Plan for SettingsPlans {
    fn prevents_merge(&self) -> bool {
        crate::plan::plans_prevent_merge(self)
    }

    fn errors(&self) -> Vec<ReportError> {
        crate::plan::plans_errors(self)
    }
}

/// Compares one setting between the two workspaces.
pub struct SettingsReporterPlanner<'a> {
    setting: Setting,
    source: &'a Clinic,
    target: &'a Clinic,
}

impl<'a> SettingsReporterPlanner<'a> {
    pub fn new(setting: Setting, source: &'a Clinic, target: &'a Clinic) -> Self {
        Self {
            setting,
            source,
            target,
        }
    }

    /// One planner per compared setting.
    pub fn all(source: &'a Clinic, target: &'a Clinic) -> Vec<Self> {
        Setting::ALL
            .into_iter()
            .map(|setting| Self::new(setting, source, target))
            .collect()
    }
}

impl Planner for SettingsReporterPlanner<'_> {
    type Output = SettingsPlan;

    fn plan(&self) -> Result<SettingsPlan, MergeError> {
        Ok(SettingsPlan {
            name: self.setting.name().to_string(),
            source_value: self.setting.value(self.source),
            target_value: self.setting.value(self.target),
        })
    }
}

/// Email-domain restrictions of both workspaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRestrictionsMergePlan {
    pub source_value: Vec<MembershipRestriction>,
    pub target_value: Vec<MembershipRestriction>,
}

impl MembershipRestrictionsMergePlan {
    pub fn name(&self) -> &'static str {
        SETTINGS_PARTIAL_SSO
    }

    pub fn source_display(&self) -> String {
        serialize_restrictions(&self.source_value)
    }

    pub fn target_display(&self) -> String {
        serialize_restrictions(&self.target_value)
    }

    pub fn values_match(&self) -> bool {
        self.source_display() == self.target_display()
    }
}

impl Plan for MembershipRestrictionsMergePlan {
    /// Blocks unless every source domain maps to the same identity provider
    /// in the target.
    fn prevents_merge(&self) -> bool {
        let target = restrictions_by_domain(&self.target_value);
        restrictions_by_domain(&self.source_value)
            .into_iter()
            .any(|(domain, idp)| target.get(domain) != Some(&idp))
    }

    fn errors(&self) -> Vec<ReportError> {
        Vec::new()
    }
}

fn serialize_restrictions(restrictions: &[MembershipRestriction]) -> String {
    if restrictions.is_empty() {
        return "N/A".to_string();
    }
    let mut list: Vec<String> = restrictions.iter().map(ToString::to_string).collect();
    list.sort();
    list.join(", ")
}

fn restrictions_by_domain(restrictions: &[MembershipRestriction]) -> BTreeMap<&str, Option<&str>> {
    restrictions
        .iter()
        .map(|r| (r.email_domain.as_str(), r.required_idp.as_deref()))
        .collect()
}

pub struct MembershipRestrictionsMergePlanner<'a> {
    source: &'a Clinic,
    target: &'a Clinic,
}

impl<'a> MembershipRestrictionsMergePlanner<'a> {
    pub fn new(source: &'a Clinic, target: &'a Clinic) -> Self {
        Self { source, target }
    }
}

impl Planner for MembershipRestrictionsMergePlanner<'_> {
    type Output = MembershipRestrictionsMergePlan;

    fn plan(&self) -> Result<MembershipRestrictionsMergePlan, MergeError> {
        Ok(MembershipRestrictionsMergePlan {
            source_value: self.source.membership_restrictions.clone(),
            target_value: self.target.membership_restrictions.clone(),
        })
    }
}
