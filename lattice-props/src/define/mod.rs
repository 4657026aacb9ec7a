//! Property Definitions
//!
//! Schemas describe the properties of a map type: how values are coerced,
//! what defaults they start with, whether they are computed, and whether
//! they take part in serialization.
//!
//! # Pipeline
//!
//! ```text
//! MapSchema / ListSchema      raw entries, built once with a builder
//!         │
//!         ▼  compile (first instance, cached per schema)
//! Definition                  merged entry + wildcard, type resolved
//!         │
//!         ▼  installed into
//! AccessorTable               schema-level, plus one per instance for expandos
//!         │
//!         ▼  used by
//! ObservableMap / ObservableList
//! ```
//!
//! Named types are looked up in the runtime's [`TypeRegistry`].

pub(crate) mod accessor;
pub(crate) mod definition;
pub(crate) mod map;
mod schema;
mod types;

pub use accessor::SetResolver;
pub use definition::{Definition, PropertyKind, ResolveContext};
pub use map::ObservableMap;
pub use schema::{
    CoerceFn, Constructor, DefaultValue, Entry, FactoryFn, Getter, ListSchema, MapSchema,
    PropDef, SerializeFn, SerializeMode, Setter, TypeRef, ITEM_KEY, WILDCARD_KEY,
};
pub use types::{TypeFn, TypeRegistry};
