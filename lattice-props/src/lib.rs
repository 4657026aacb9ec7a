//! Lattice Props
//!
//! This crate provides a reactive property runtime: declarative schemas
//! describe each property's type, default, getter, setter and serialization
//! behavior, and live objects built from them track reads, coalesce writes
//! and propagate change notifications.
//!
//! It implements:
//!
//! - Schema compilation into normalized property definitions
//! - Observable maps with data, computed and expando properties
//! - Dependency-tracked computed properties, synchronous or resolved later
//! - Transactional batching with coalesced change records
//! - Observable lists with splice deltas and diff-based replacement
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `define`: schemas, definitions, the type registry, and [`ObservableMap`]
//! - `list`: [`ObservableList`] and its edit-script engine
//! - `reactive`: the [`Runtime`], events, signals, and computed handles
//! - `value`: the dynamic [`Value`] carried by properties and list items
//!
//! # Example
//!
//! ```rust,ignore
//! use lattice_props::{Getter, MapSchema, ObservableMap, Runtime, Value};
//!
//! let runtime = Runtime::new();
//! let schema = MapSchema::new()
//!     .prop("first", "string")
//!     .prop("last", "string")
//!     .prop("full", Getter::derived(|person| {
//!         Ok(Value::from(format!(
//!             "{} {}",
//!             person.get("first")?.to_display_string(),
//!             person.get("last")?.to_display_string(),
//!         )))
//!     }))
//!     .build();
//!
//! let person = ObservableMap::new(&runtime, &schema, Value::object([("first", "Ada")]))?;
//! person.on("full", |event| println!("full name is now {:?}", event.new_value));
//!
//! // One notification for both writes.
//! runtime.batch(|| -> lattice_props::Result<()> {
//!     person.set("first", "Grace")?;
//!     person.set("last", "Hopper")
//! })?;
//! ```

pub mod config;
pub mod define;
pub mod error;
pub mod list;
pub mod reactive;
pub mod value;

pub use config::{RuntimeConfig, SchemaPolicy};
pub use define::{
    Constructor, DefaultValue, Definition, Entry, Getter, ListSchema, MapSchema, ObservableMap,
    PropDef, PropertyKind, SerializeMode, SetResolver, Setter, TypeRef, TypeRegistry,
};
pub use error::{Error, Result};
pub use list::ObservableList;
pub use reactive::{
    BatchGuard, Event, EventKind, Listenable, ObjectId, Patch, ResolveScope, Resolver, Runtime,
    Signal, SubscriberId,
};
pub use value::{Object, Value};
