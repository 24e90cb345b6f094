//! Clinicians domain module (clinic members, admins and pending invites).

pub mod clinician;

pub use clinician::{Clinician, Role};
