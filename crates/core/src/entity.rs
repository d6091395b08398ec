//! Entity trait: records that keep their identity while their state changes.

/// A persisted record addressed by a strongly-typed identifier.
///
/// Jobs, job types and history entries all implement this so stores can key
/// their tables generically.
pub trait Entity {
    type Id: Copy + Eq + Ord + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> Self::Id;
}
