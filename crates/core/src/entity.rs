//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Entities compare by identity. A catalog product keeps the same identifier
/// while its purchased flag, trial status and storefront metadata change.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;

    /// Two entities are the same entity when their identifiers match.
    fn same_entity(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}
