use serde::{Deserialize, Serialize};

use clinic_core::{AccountId, AggregateRoot, ClinicId, Entity, TagId};

use crate::site::Site;

/// A patient tag defined in a clinic workspace.
///
/// Tag names are the stable identity across workspaces; ids are only
/// meaningful inside the owning clinic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientTag {
    pub id: TagId,
    pub name: String,
}

impl PatientTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TagId::new(),
            name: name.into(),
        }
    }
}

impl Entity for PatientTag {
    type Id = TagId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// MRN policy of a workspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MrnSettings {
    pub required: bool,
    pub unique: bool,
}

/// Email domain whose members must sign in through a given identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRestriction {
    pub email_domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_idp: Option<String>,
}

impl core::fmt::Display for MembershipRestriction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.required_idp {
            Some(idp) => write!(f, "{} ({})", self.email_domain, idp),
            None => f.write_str(&self.email_domain),
        }
    }
}

/// Patient population limits configured for a workspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientCountSettings {
    /// Maximum number of patients the workspace may hold, if limited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_limit: Option<u64>,
}

/// Snapshot of a clinic workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clinic {
    pub id: ClinicId,
    pub name: String,
    #[serde(default)]
    pub patient_tags: Vec<PatientTag>,
    #[serde(default)]
    pub sites: Vec<Site>,
    #[serde(default)]
    pub admins: Vec<AccountId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mrn_settings: Option<MrnSettings>,
    #[serde(default)]
    pub membership_restrictions: Vec<MembershipRestriction>,
    #[serde(default)]
    pub share_codes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_share_code: Option<String>,
    #[serde(default)]
    pub preferred_bg_units: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_count_settings: Option<PatientCountSettings>,
    #[serde(default)]
    pub patient_count: u64,
    #[serde(default)]
    pub version: u64,
}

impl Clinic {
    /// A fresh workspace with default settings and no members.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ClinicId::new(),
            name: name.into(),
            patient_tags: Vec::new(),
            sites: Vec::new(),
            admins: Vec::new(),
            mrn_settings: None,
            membership_restrictions: Vec::new(),
            share_codes: Vec::new(),
            canonical_share_code: None,
            preferred_bg_units: "mg/dL".to_string(),
            timezone: None,
            patient_count_settings: None,
            patient_count: 0,
            version: 0,
        }
    }

    pub fn mrn_required(&self) -> bool {
        self.mrn_settings.is_some_and(|s| s.required)
    }

    pub fn mrn_unique(&self) -> bool {
        self.mrn_settings.is_some_and(|s| s.unique)
    }

    pub fn is_admin(&self, account_id: &AccountId) -> bool {
        self.admins.contains(account_id)
    }

    pub fn tag_by_id(&self, id: &TagId) -> Option<&PatientTag> {
        self.patient_tags.iter().find(|t| &t.id == id)
    }

    pub fn tag_by_name(&self, name: &str) -> Option<&PatientTag> {
        self.patient_tags.iter().find(|t| t.name == name)
    }

    /// Names of the given tag ids; unknown ids are skipped.
    pub fn tag_names<'a>(&self, ids: impl IntoIterator<Item = &'a TagId>) -> Vec<String> {
        ids.into_iter()
            .filter_map(|id| self.tag_by_id(id))
            .map(|t| t.name.clone())
            .collect()
    }

    /// Hard limit on the patient population, if configured.
    pub fn patient_limit(&self) -> Option<u64> {
        self.patient_count_settings.and_then(|s| s.hard_limit)
    }
}

impl Entity for Clinic {
    type Id = ClinicId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl AggregateRoot for Clinic {
    type Id = ClinicId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
