//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Products and sales are plain records persisted through a store; they are
/// identified by id and nothing else.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
