//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Merge plans are value objects: once a planner produces one it is never
/// mutated, and re-planning yields a fresh value. Two plans with the same
/// contents are interchangeable.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
