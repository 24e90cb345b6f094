use serde::{Deserialize, Serialize};

use clinic_core::{AccountId, ClinicId, ClinicianId, Entity, InviteId};

/// Membership role inside a clinic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    ClinicAdmin,
    ClinicMember,
}

/// A clinician's membership in one clinic.
///
/// Either `account_id` is set (an active member) or `invite_id` is set (an
/// invite that has not been accepted yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clinician {
    pub id: ClinicianId,
    pub clinic_id: ClinicId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<AccountId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite_id: Option<InviteId>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Clinician {
    pub fn member(clinic_id: ClinicId, account_id: AccountId, roles: Vec<Role>) -> Self {
        Self {
            id: ClinicianId::new(),
            clinic_id,
            account_id: Some(account_id),
            invite_id: None,
            roles,
            email: None,
            name: None,
        }
    }

    pub fn invite(clinic_id: ClinicId, invite_id: InviteId, email: impl Into<String>) -> Self {
        Self {
            id: ClinicianId::new(),
            clinic_id,
            account_id: None,
            invite_id: Some(invite_id),
            roles: vec![Role::ClinicMember],
            email: Some(email.into()),
            name: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::ClinicAdmin)
    }

    pub fn is_pending_invite(&self) -> bool {
        self.account_id.is_none()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn display_email(&self) -> &str {
        self.email.as_deref().unwrap_or_default()
    }
}

impl Entity for Clinician {
    type Id = ClinicianId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
