//! Patients domain module.
//!
//! Patient records as they live inside one clinic workspace. The merge engine
//! reads these to detect duplicates and rewrites them when a workspace is
//! folded into another.

pub mod patient;

pub use patient::{Patient, PatientSummary, Permissions};
