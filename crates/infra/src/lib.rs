//! Infrastructure layer: collaborator service contracts, stores, config.
//!
//! The merge engine only talks to the traits in [`services`] and
//! [`plans`]. [`memory::InMemoryStore`] implements all of them for tests, the
//! CLI and local runs; a Postgres plan store is available behind the
//! `postgres` feature.

pub mod config;
pub mod error;
pub mod memory;
pub mod plans;
pub mod services;
pub mod transaction;

pub use config::MergeConfig;
pub use error::StoreError;
pub use memory::{InMemoryStore, StoreSnapshot};
pub use plans::{PersistedPlan, PlanStore, PlanType};
pub use services::{
    ClinicianFilter, ClinicianPage, CliniciansService, ClinicsService, Pagination, PatientFilter,
    PatientPage, PatientsService,
};
pub use transaction::Transactional;
