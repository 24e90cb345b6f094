//! Clinic workspace domain module.
//!
//! A workspace is one clinic's tenant boundary: its settings, patient tags,
//! sites, admins and share codes. Pure data and rules, no IO.

pub mod clinic;
pub mod site;

pub use clinic::{
    Clinic, MembershipRestriction, MrnSettings, PatientCountSettings, PatientTag,
};
pub use site::{MAX_SITES_PER_CLINIC, Site, maybe_rename_site, site_exists_with_name};
