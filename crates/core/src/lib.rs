//! `iapkit-core` — foundation types shared by every iapkit crate.
//!
//! This crate contains **pure domain** primitives (no IO, no async).

pub mod entity;
pub mod error;
pub mod id;
pub mod kind;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::ProductIdentifier;
pub use kind::{DurationUnit, ProductKind};
pub use value_object::ValueObject;
