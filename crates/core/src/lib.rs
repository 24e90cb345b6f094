//! `clinic-core` — shared building blocks for the clinic workspace crates.
//!
//! Pure domain primitives: identifiers, the domain error model and the
//! optimistic concurrency token. No IO lives here.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AccountId, ClinicId, ClinicianId, InviteId, PatientId, PlanId, SiteId, TagId};
pub use value_object::ValueObject;
