//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attributes: a `Price`
/// of 499 minor units in `USD` equals any other such price, and a receipt
/// purchase record is defined entirely by its fields. To "modify" one, build
/// a new value.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
