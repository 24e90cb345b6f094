//! Clinic sites and the collision-free renaming rule used when sites move
//! between workspaces.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use clinic_core::{DomainError, DomainResult, Entity, SiteId};

/// Upper bound on sites per clinic.
pub const MAX_SITES_PER_CLINIC: usize = 50;

static NUMERIC_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" \((\d+)\)$").expect("static regex"));

/// A physical or logical location patients can be associated with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub name: String,
    #[serde(default)]
    pub patients: u64,
}

impl Site {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: SiteId::new(),
            name: name.into(),
            patients: 0,
        }
    }
}

impl Entity for Site {
    type Id = SiteId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Case-insensitive name lookup.
pub fn site_exists_with_name(sites: &[Site], name: &str) -> bool {
    let name = name.to_lowercase();
    sites.iter().any(|s| s.name.to_lowercase() == name)
}

/// Name `site` should carry once added to `target_sites`.
///
/// A site already present in the target (same id) keeps the name it has
/// there. Otherwise the numeric suffix is bumped until no target site
/// carries the name: "X" becomes "X (2)", "X (2)" becomes "X (3)", and so on.
pub fn maybe_rename_site(site: &Site, target_sites: &[Site]) -> DomainResult<String> {
    if let Some(existing) = target_sites.iter().find(|s| s.same_entity(site)) {
        return Ok(existing.name.clone());
    }

    let mut proposed = site.name.clone();
    while site_exists_with_name(target_sites, &proposed) {
        proposed = increment_suffix(&proposed)?;
    }
    Ok(proposed)
}

fn increment_suffix(name: &str) -> DomainResult<String> {
    let Some(caps) = NUMERIC_SUFFIX.captures(name) else {
        return Ok(format!("{name} (2)"));
    };
    let n: u64 = caps[1]
        .parse()
        .map_err(|e| DomainError::validation(format!("site name suffix of {name:?}: {e}")))?;
    let next = n
        .checked_add(1)
        .ok_or_else(|| DomainError::validation(format!("site name suffix of {name:?} cannot be incremented")))?;
    let base = &name[..caps.get(0).map_or(name.len(), |m| m.start())];
    Ok(format!("{base} ({next})"))
}
