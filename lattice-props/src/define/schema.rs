//! Schema Input
//!
//! These are the raw, user-facing building blocks of a schema. Nothing here
//! is validated; [`Definition::resolve`](super::Definition::resolve) turns
//! each entry into a normalized definition when the schema is first used.
//!
//! A property entry is spelled one of three ways:
//!
//! - a type name: `"number"`,
//! - a constructor: `Constructor::map(address_schema)`,
//! - a [`PropDef`] with any subset of `type`, `Type`, `value`, `Value`,
//!   `get`, `set` and `serialize`.

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::accessor::SetResolver;
use super::definition::{CompiledList, CompiledMap};
use super::map::ObservableMap;
use crate::error::Result;
use crate::list::ObservableList;
use crate::reactive::{ResolveScope, Runtime};
use crate::value::Value;

/// Schema key holding the default entry for undeclared properties.
pub const WILDCARD_KEY: &str = "*";
/// Schema key holding a list's item entry.
pub const ITEM_KEY: &str = "#";

/// A user coercion function.
pub type CoerceFn = Rc<dyn Fn(Value) -> Result<Value>>;
/// Default factory, invoked with the instance being initialized.
pub type FactoryFn = Rc<dyn Fn(&ObservableMap) -> Result<Value>>;
/// Custom serializer for one property.
pub type SerializeFn = Rc<dyn Fn(&Value) -> Result<serde_json::Value>>;

/// How a computed property produces its value.
#[derive(Clone)]
pub enum Getter {
    /// Derived from reads of other properties.
    Derived(Rc<dyn Fn(&ObservableMap) -> Result<Value>>),
    /// Derived, also given the last value written through the setter.
    WithLastSet(Rc<dyn Fn(&ObservableMap, &Value) -> Result<Value>>),
    /// Publishes values through the [`ResolveScope`], now or later.
    Resolving(Rc<dyn Fn(&ObservableMap, &ResolveScope) -> Result<Option<Value>>>),
}

impl Getter {
    pub fn derived(f: impl Fn(&ObservableMap) -> Result<Value> + 'static) -> Self {
        Self::Derived(Rc::new(f))
    }

    pub fn with_last_set(f: impl Fn(&ObservableMap, &Value) -> Result<Value> + 'static) -> Self {
        Self::WithLastSet(Rc::new(f))
    }

    pub fn resolving(
        f: impl Fn(&ObservableMap, &ResolveScope) -> Result<Option<Value>> + 'static,
    ) -> Self {
        Self::Resolving(Rc::new(f))
    }
}

impl fmt::Debug for Getter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Getter::Derived(_) => "Getter::Derived",
            Getter::WithLastSet(_) => "Getter::WithLastSet",
            Getter::Resolving(_) => "Getter::Resolving",
        })
    }
}

/// Write hook. The new value passed in has already been type-coerced; the
/// third argument is the property's current value.
#[derive(Clone)]
pub enum Setter {
    /// The returned value is stored.
    Returning(Rc<dyn Fn(&ObservableMap, Value, &Value) -> Result<Value>>),
    /// The value passed to the [`SetResolver`] is stored, whenever that
    /// happens. Never calling it leaves the property unchanged.
    Resolving(Rc<dyn Fn(&ObservableMap, Value, SetResolver, &Value) -> Result<()>>),
    /// Runs for its side effects; the incoming value is stored as-is.
    SideEffect(Rc<dyn Fn(&ObservableMap, &Value, &Value) -> Result<()>>),
}

impl Setter {
    pub fn returning(f: impl Fn(&ObservableMap, Value, &Value) -> Result<Value> + 'static) -> Self {
        Self::Returning(Rc::new(f))
    }

    pub fn resolving(
        f: impl Fn(&ObservableMap, Value, SetResolver, &Value) -> Result<()> + 'static,
    ) -> Self {
        Self::Resolving(Rc::new(f))
    }

    pub fn side_effect(f: impl Fn(&ObservableMap, &Value, &Value) -> Result<()> + 'static) -> Self {
        Self::SideEffect(Rc::new(f))
    }
}

impl fmt::Debug for Setter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Setter::Returning(_) => "Setter::Returning",
            Setter::Resolving(_) => "Setter::Resolving",
            Setter::SideEffect(_) => "Setter::SideEffect",
        })
    }
}

/// The `value` field: a literal or a factory.
#[derive(Clone)]
pub enum DefaultValue {
    Literal(Value),
    Factory(FactoryFn),
}

impl DefaultValue {
    pub fn factory(f: impl Fn(&ObservableMap) -> Result<Value> + 'static) -> Self {
        Self::Factory(Rc::new(f))
    }
}

impl<T: Into<Value>> From<T> for DefaultValue {
    fn from(value: T) -> Self {
        Self::Literal(value.into())
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            DefaultValue::Factory(_) => f.write_str("Factory"),
        }
    }
}

/// The `serialize` field.
#[derive(Clone, Default)]
pub enum SerializeMode {
    #[default]
    Include,
    Skip,
    With(SerializeFn),
}

impl SerializeMode {
    pub fn with(f: impl Fn(&Value) -> Result<serde_json::Value> + 'static) -> Self {
        Self::With(Rc::new(f))
    }
}

impl From<bool> for SerializeMode {
    fn from(include: bool) -> Self {
        if include {
            Self::Include
        } else {
            Self::Skip
        }
    }
}

impl fmt::Debug for SerializeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SerializeMode::Include => "Include",
            SerializeMode::Skip => "Skip",
            SerializeMode::With(_) => "With",
        })
    }
}

/// The `type` field.
#[derive(Clone)]
pub enum TypeRef {
    /// A name looked up in the runtime's [`TypeRegistry`](super::TypeRegistry).
    Named(String),
    /// An inline coercion function.
    Coerce(CoerceFn),
    /// A nested map schema; plain objects are wrapped into maps of it.
    Map(Rc<MapSchema>),
    /// A nested list schema; plain arrays are wrapped into lists of it.
    List(Rc<ListSchema>),
}

impl TypeRef {
    pub fn coerce(f: impl Fn(Value) -> Result<Value> + 'static) -> Self {
        Self::Coerce(Rc::new(f))
    }
}

impl From<&str> for TypeRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for TypeRef {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl From<Rc<MapSchema>> for TypeRef {
    fn from(schema: Rc<MapSchema>) -> Self {
        Self::Map(schema)
    }
}

impl From<Rc<ListSchema>> for TypeRef {
    fn from(schema: Rc<ListSchema>) -> Self {
        Self::List(schema)
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => write!(f, "Named({name:?})"),
            TypeRef::Coerce(_) => f.write_str("Coerce"),
            TypeRef::Map(_) => f.write_str("Map"),
            TypeRef::List(_) => f.write_str("List"),
        }
    }
}

#[derive(Clone)]
enum ConstructorKind {
    Map(Rc<MapSchema>),
    List(Rc<ListSchema>),
    Custom {
        is_instance: Rc<dyn Fn(&Value) -> bool>,
        construct: Rc<dyn Fn(&Runtime, Value) -> Result<Value>>,
    },
}

/// A wrapper constructor (the `Type` and `Value` fields).
///
/// Values that are not already instances are passed to the constructor;
/// `null` and `undefined` pass through untouched.
#[derive(Clone)]
pub struct Constructor {
    name: Rc<str>,
    kind: ConstructorKind,
}

impl Constructor {
    /// Construct maps of `schema`.
    pub fn map(schema: Rc<MapSchema>) -> Self {
        Self {
            name: "ObservableMap".into(),
            kind: ConstructorKind::Map(schema),
        }
    }

    /// Construct lists of `schema`.
    pub fn list(schema: Rc<ListSchema>) -> Self {
        Self {
            name: "ObservableList".into(),
            kind: ConstructorKind::List(schema),
        }
    }

    pub fn custom(
        name: &str,
        is_instance: impl Fn(&Value) -> bool + 'static,
        construct: impl Fn(&Runtime, Value) -> Result<Value> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ConstructorKind::Custom {
                is_instance: Rc::new(is_instance),
                construct: Rc::new(construct),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_instance(&self, value: &Value) -> bool {
        match &self.kind {
            ConstructorKind::Map(schema) => value.as_map().is_some_and(|m| m.is_instance_of(schema)),
            ConstructorKind::List(schema) => {
                value.as_list().is_some_and(|l| l.is_instance_of(schema))
            }
            ConstructorKind::Custom { is_instance, .. } => is_instance(value),
        }
    }

    /// Build a new instance from `value`.
    pub fn construct(&self, runtime: &Runtime, value: Value) -> Result<Value> {
        match &self.kind {
            ConstructorKind::Map(schema) => Ok(ObservableMap::new(runtime, schema, value)?.into()),
            ConstructorKind::List(schema) => {
                Ok(ObservableList::from_value(runtime, schema, value)?.into())
            }
            ConstructorKind::Custom { construct, .. } => construct(runtime, value),
        }
    }

    /// Construct unless `value` is nullish or already an instance.
    pub fn wrap(&self, runtime: &Runtime, value: Value) -> Result<Value> {
        if value.is_nullish() || self.is_instance(&value) {
            Ok(value)
        } else {
            self.construct(runtime, value)
        }
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Constructor").field(&self.name).finish()
    }
}

/// An object-form schema entry. Every field is optional; missing fields are
/// taken from the wildcard entry.
#[derive(Clone, Default, Debug)]
pub struct PropDef {
    /// `type`: coercion applied to every written value.
    pub type_ref: Option<TypeRef>,
    /// `Type`: wrapper constructor applied after `type`.
    pub constructor: Option<Constructor>,
    /// `value`: default literal or factory.
    pub value: Option<DefaultValue>,
    /// `Value`: constructor invoked (with `undefined`) for the default.
    pub value_constructor: Option<Constructor>,
    pub get: Option<Getter>,
    pub set: Option<Setter>,
    pub serialize: Option<SerializeMode>,
}

impl PropDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ty(mut self, type_ref: impl Into<TypeRef>) -> Self {
        self.type_ref = Some(type_ref.into());
        self
    }

    pub fn constructor(mut self, constructor: Constructor) -> Self {
        self.constructor = Some(constructor);
        self
    }

    pub fn default_value(mut self, value: impl Into<DefaultValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn default_with(mut self, f: impl Fn(&ObservableMap) -> Result<Value> + 'static) -> Self {
        self.value = Some(DefaultValue::factory(f));
        self
    }

    pub fn default_constructor(mut self, constructor: Constructor) -> Self {
        self.value_constructor = Some(constructor);
        self
    }

    pub fn get(mut self, getter: Getter) -> Self {
        self.get = Some(getter);
        self
    }

    pub fn set(mut self, setter: Setter) -> Self {
        self.set = Some(setter);
        self
    }

    pub fn serialize(mut self, mode: impl Into<SerializeMode>) -> Self {
        self.serialize = Some(mode.into());
        self
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.type_ref.is_none()
            && self.constructor.is_none()
            && self.value.is_none()
            && self.value_constructor.is_none()
            && self.get.is_none()
            && self.set.is_none()
            && self.serialize.is_none()
    }
}

/// One raw schema entry.
#[derive(Clone, Debug)]
pub enum Entry {
    /// Shorthand for `PropDef::new().ty(name)`.
    Type(String),
    /// Shorthand for `PropDef::new().constructor(ctor)`.
    Constructor(Constructor),
    Def(PropDef),
}

impl Entry {
    pub(crate) fn to_prop_def(&self) -> PropDef {
        match self {
            Entry::Type(name) => PropDef::new().ty(name.as_str()),
            Entry::Constructor(ctor) => PropDef::new().constructor(ctor.clone()),
            Entry::Def(def) => def.clone(),
        }
    }
}

impl From<&str> for Entry {
    fn from(name: &str) -> Self {
        Entry::Type(name.to_string())
    }
}

impl From<Constructor> for Entry {
    fn from(ctor: Constructor) -> Self {
        Entry::Constructor(ctor)
    }
}

impl From<PropDef> for Entry {
    fn from(def: PropDef) -> Self {
        Entry::Def(def)
    }
}

impl From<Getter> for Entry {
    fn from(getter: Getter) -> Self {
        Entry::Def(PropDef::new().get(getter))
    }
}

/// Property schema for [`ObservableMap`]s.
///
/// Schemas are shared by `Rc`; instance checks compare schema identity.
/// The compiled form is built on first use and cached.
#[derive(Default)]
pub struct MapSchema {
    name: Option<String>,
    entries: IndexMap<String, Entry>,
    wildcard: Option<Entry>,
    compiled: OnceCell<Rc<CompiledMap>>,
}

impl MapSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// A display name used in diagnostics.
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Declare a property. The key `"*"` sets the wildcard entry.
    pub fn prop(mut self, name: &str, entry: impl Into<Entry>) -> Self {
        if name == WILDCARD_KEY {
            self.wildcard = Some(entry.into());
        } else {
            self.entries.insert(name.to_string(), entry.into());
        }
        self
    }

    pub fn wildcard(self, entry: impl Into<Entry>) -> Self {
        self.prop(WILDCARD_KEY, entry)
    }

    pub fn build(self) -> Rc<Self> {
        Rc::new(self)
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("ObservableMap")
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn wildcard_entry(&self) -> Option<&Entry> {
        self.wildcard.as_ref()
    }

    pub(crate) fn compiled_cell(&self) -> &OnceCell<Rc<CompiledMap>> {
        &self.compiled
    }
}

impl fmt::Debug for MapSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapSchema")
            .field("name", &self.name())
            .field("props", &self.entries.keys().collect::<Vec<_>>())
            .field("compiled", &self.compiled.get().is_some())
            .finish()
    }
}

/// Schema for [`ObservableList`]s: an item entry plus entries for named
/// (non-index) properties.
#[derive(Default)]
pub struct ListSchema {
    name: Option<String>,
    items: Option<Entry>,
    entries: IndexMap<String, Entry>,
    wildcard: Option<Entry>,
    compiled: OnceCell<Rc<CompiledList>>,
}

impl ListSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// The entry every item is coerced through.
    pub fn items(self, entry: impl Into<Entry>) -> Self {
        self.prop(ITEM_KEY, entry)
    }

    /// Declare a named property. `"#"` sets the item entry and `"*"` the
    /// wildcard.
    pub fn prop(mut self, name: &str, entry: impl Into<Entry>) -> Self {
        match name {
            ITEM_KEY => self.items = Some(entry.into()),
            WILDCARD_KEY => self.wildcard = Some(entry.into()),
            _ => {
                self.entries.insert(name.to_string(), entry.into());
            }
        }
        self
    }

    pub fn build(self) -> Rc<Self> {
        Rc::new(self)
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("ObservableList")
    }

    pub fn item_entry(&self) -> Option<&Entry> {
        self.items.as_ref()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn wildcard_entry(&self) -> Option<&Entry> {
        self.wildcard.as_ref()
    }

    pub(crate) fn compiled_cell(&self) -> &OnceCell<Rc<CompiledList>> {
        &self.compiled
    }
}

impl fmt::Debug for ListSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListSchema")
            .field("name", &self.name())
            .field("items", &self.items)
            .field("props", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_key_routes_to_wildcard() {
        let schema = MapSchema::new().prop("name", "string").prop("*", "number");
        assert_eq!(schema.entries().count(), 1);
        assert!(matches!(schema.wildcard_entry(), Some(Entry::Type(t)) if t == "number"));
    }

    #[test]
    fn item_key_routes_to_items() {
        let schema = ListSchema::new().prop("#", "number").prop("label", "string");
        assert!(matches!(schema.item_entry(), Some(Entry::Type(t)) if t == "number"));
        assert_eq!(schema.entries().count(), 1);
    }

    #[test]
    fn shorthand_entries_expand() {
        let def = Entry::from("date").to_prop_def();
        assert!(matches!(def.type_ref, Some(TypeRef::Named(ref n)) if n == "date"));
        assert!(PropDef::new().is_empty());
        assert!(!PropDef::new().serialize(false).is_empty());
    }
}
