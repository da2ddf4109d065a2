//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values
/// (e.g. `Money`, `DiscountRate`, a fee component embedded in a structure).
/// "Modifying" one means constructing a new value.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
