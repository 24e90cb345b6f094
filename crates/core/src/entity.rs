//! Entities: records with an identity that survives renames and merges.

/// Anything the store keys by id: clinics, sites, tags, patients, clinicians.
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Whether `other` is the same record, regardless of its current fields.
    fn same_entity(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}
