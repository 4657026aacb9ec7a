//! Definition Resolver
//!
//! Turns a raw schema entry plus the schema's wildcard entry into a
//! normalized [`Definition`]. Fields merge one by one: whatever the entry
//! itself sets wins, everything else comes from the wildcard. An entry and a
//! wildcard that set nothing at all produce a passthrough data property.
//!
//! Malformed entries are handled according to the runtime's
//! [`SchemaPolicy`]: rejected with [`Error::Schema`] under `Strict`, or
//! degraded to passthrough with a warning under `Permissive`.

use std::fmt;
use std::rc::Rc;

use tracing::warn;

use super::accessor::AccessorTable;
use super::map::ObservableMap;
use super::schema::{
    Constructor, DefaultValue, Entry, Getter, ListSchema, MapSchema, PropDef, SerializeMode,
    Setter, TypeRef,
};
use super::types::{TypeKind, TypeRegistry};
use crate::config::SchemaPolicy;
use crate::error::{Error, Result};
use crate::reactive::Runtime;
use crate::value::Value;

/// Type name used for wildcard entries of schemas that don't declare one.
pub(crate) const DEFAULT_WILDCARD_TYPE: &str = "observable";

#[derive(Clone)]
pub(crate) enum TypeStep {
    Passthrough,
    Named(Rc<str>),
    Coerce(super::schema::CoerceFn),
    Map(Rc<MapSchema>),
    List(Rc<ListSchema>),
}

#[derive(Clone)]
pub(crate) enum DefaultSource {
    Literal(Value),
    Factory(super::schema::FactoryFn),
    Construct(Constructor),
}

/// Whether a property stores its value or derives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Data,
    Computed,
}

/// A normalized property definition.
///
/// A property is computed iff it has a getter. Computed properties never
/// write into the value store; with a setter, writes land in the handle's
/// last-set value instead.
pub struct Definition {
    name: Rc<str>,
    type_step: TypeStep,
    constructor: Option<Constructor>,
    default: Option<DefaultSource>,
    getter: Option<Getter>,
    setter: Option<Setter>,
    serialize: SerializeMode,
}

/// Inputs to [`Definition::resolve`] that come from the runtime.
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    pub registry: &'a TypeRegistry,
    pub policy: SchemaPolicy,
}

impl Definition {
    /// Resolve `entry` for `name`, filling missing fields from `wildcard`.
    pub fn resolve(
        name: &str,
        entry: Option<&Entry>,
        wildcard: Option<&Entry>,
        cx: ResolveContext<'_>,
    ) -> Result<Self> {
        let own = entry.map(Entry::to_prop_def).unwrap_or_default();
        let fallback = wildcard.map(Entry::to_prop_def).unwrap_or_default();
        let own = validate_entry(name, own, cx.policy)?;
        let fallback = validate_entry(name, fallback, cx.policy)?;

        if own.is_empty() && fallback.is_empty() {
            return Ok(Self::passthrough(name));
        }

        let mut type_ref = own.type_ref.or(fallback.type_ref);
        let constructor = own.constructor.or(fallback.constructor);
        // `value` and `Value` are one field for merge purposes.
        let (value, value_constructor) = if own.value.is_some() || own.value_constructor.is_some() {
            (own.value, own.value_constructor)
        } else {
            (fallback.value, fallback.value_constructor)
        };
        let mut getter = own.get.or(fallback.get);
        let mut setter = own.set.or(fallback.set);
        let explicit_serialize = own.serialize.or(fallback.serialize);

        let mut type_step = TypeStep::Passthrough;
        match type_ref.take() {
            None => {}
            Some(TypeRef::Named(type_name)) => match cx.registry.kind(&type_name) {
                Some(TypeKind::Compute) => {
                    if getter.is_some() {
                        reject(
                            cx.policy,
                            name,
                            "type",
                            "the `compute` type supplies its own getter",
                        )?;
                    } else {
                        let (get, set) = compute_accessors(name);
                        getter = Some(get);
                        setter = setter.or(Some(set));
                    }
                }
                Some(_) => type_step = TypeStep::Named(type_name.as_str().into()),
                None => reject(
                    cx.policy,
                    name,
                    "type",
                    format!("unknown type `{type_name}`"),
                )?,
            },
            Some(TypeRef::Coerce(f)) => type_step = TypeStep::Coerce(f),
            Some(TypeRef::Map(schema)) => type_step = TypeStep::Map(schema),
            Some(TypeRef::List(schema)) => type_step = TypeStep::List(schema),
        }

        let default = match (value, value_constructor) {
            (Some(DefaultValue::Literal(v)), _) => Some(DefaultSource::Literal(v)),
            (Some(DefaultValue::Factory(f)), _) => Some(DefaultSource::Factory(f)),
            (None, Some(ctor)) => Some(DefaultSource::Construct(ctor)),
            (None, None) => None,
        };

        let serialize = match explicit_serialize {
            Some(mode) => mode,
            None if getter.is_some() => SerializeMode::Skip,
            None => SerializeMode::Include,
        };

        Ok(Self {
            name: name.into(),
            type_step,
            constructor,
            default,
            getter,
            setter,
            serialize,
        })
    }

    /// Resolve a list item entry. Items are plain slots, so getters and
    /// setters are not allowed.
    pub fn resolve_item(entry: Option<&Entry>, cx: ResolveContext<'_>) -> Result<Self> {
        let mut def = entry.map(Entry::to_prop_def).unwrap_or_default();
        if def.get.is_some() || def.set.is_some() {
            reject(
                cx.policy,
                super::schema::ITEM_KEY,
                "get",
                "list items cannot have getters or setters",
            )?;
            def.get = None;
            def.set = None;
        }
        if def.is_empty() {
            def = PropDef::new().ty(DEFAULT_WILDCARD_TYPE);
        }
        Self::resolve(super::schema::ITEM_KEY, Some(&Entry::Def(def)), None, cx)
    }

    pub(crate) fn passthrough(name: &str) -> Self {
        Self {
            name: name.into(),
            type_step: TypeStep::Passthrough,
            constructor: None,
            default: None,
            getter: None,
            setter: None,
            serialize: SerializeMode::Include,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PropertyKind {
        if self.getter.is_some() {
            PropertyKind::Computed
        } else {
            PropertyKind::Data
        }
    }

    pub fn is_computed(&self) -> bool {
        self.getter.is_some()
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub(crate) fn getter(&self) -> Option<&Getter> {
        self.getter.as_ref()
    }

    pub(crate) fn setter(&self) -> Option<&Setter> {
        self.setter.as_ref()
    }

    pub(crate) fn serialize_mode(&self) -> &SerializeMode {
        &self.serialize
    }

    /// Run `value` through the type pipeline: `type`, then `Type`.
    pub fn coerce(&self, runtime: &Runtime, value: Value) -> Result<Value> {
        let value = match &self.type_step {
            TypeStep::Passthrough => value,
            TypeStep::Named(type_name) => runtime.registry().coerce(runtime, type_name, value)?,
            TypeStep::Coerce(f) => {
                if value.is_nullish() {
                    value
                } else {
                    f(value)?
                }
            }
            TypeStep::Map(schema) => Constructor::map(Rc::clone(schema)).wrap(runtime, value)?,
            TypeStep::List(schema) => Constructor::list(Rc::clone(schema)).wrap(runtime, value)?,
        };
        match &self.constructor {
            Some(ctor) => ctor.wrap(runtime, value),
            None => Ok(value),
        }
    }

    /// Produce the default for a fresh instance, before coercion.
    pub(crate) fn produce_default(&self, map: Option<&ObservableMap>, runtime: &Runtime) -> Result<Value> {
        match &self.default {
            None => Ok(Value::Undefined),
            Some(DefaultSource::Literal(v)) => Ok(v.clone()),
            Some(DefaultSource::Factory(f)) => match map {
                Some(map) => f(map),
                None => Ok(Value::Undefined),
            },
            Some(DefaultSource::Construct(ctor)) => ctor.construct(runtime, Value::Undefined),
        }
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("has_default", &self.default.is_some())
            .field("setter", &self.setter)
            .field("serialize", &self.serialize)
            .finish()
    }
}

fn reject(
    policy: SchemaPolicy,
    property: &str,
    field: &'static str,
    reason: impl Into<String>,
) -> Result<()> {
    let reason = reason.into();
    match policy {
        SchemaPolicy::Strict => Err(Error::schema(property, field, reason)),
        SchemaPolicy::Permissive => {
            warn!(property, field, %reason, "ignoring invalid schema field");
            Ok(())
        }
    }
}

/// Conflicts inside a single entry. Under the permissive policy both
/// conflicting fields are dropped.
fn validate_entry(name: &str, mut def: PropDef, policy: SchemaPolicy) -> Result<PropDef> {
    if def.type_ref.is_some() && def.constructor.is_some() {
        reject(policy, name, "type", "`type` and `Type` are mutually exclusive")?;
        def.type_ref = None;
        def.constructor = None;
    }
    if def.value.is_some() && def.value_constructor.is_some() {
        reject(policy, name, "value", "`value` and `Value` are mutually exclusive")?;
        def.value = None;
        def.value_constructor = None;
    }
    Ok(def)
}

/// The getter/setter pair behind the `compute` type. The property's last-set
/// value holds a [`Signal`](crate::Signal): reads go through it, writes of a
/// new signal replace it, and writes of anything else are forwarded into it.
fn compute_accessors(name: &str) -> (Getter, Setter) {
    let getter = Getter::with_last_set(|_, last_set| {
        Ok(match last_set.as_signal() {
            Some(signal) => signal.get(),
            None => last_set.clone(),
        })
    });
    let key: Rc<str> = name.into();
    let setter = Setter::returning(move |map, new_value, _| {
        if new_value.as_signal().is_some() {
            return Ok(new_value);
        }
        let last_set = map.last_set(&key);
        match last_set.as_signal() {
            Some(signal) => {
                signal.set(new_value);
                Ok(last_set)
            }
            None => Ok(new_value),
        }
    });
    (getter, setter)
}

/// A compiled map schema.
pub(crate) struct CompiledMap {
    pub accessors: AccessorTable,
    pub wildcard: Rc<Definition>,
}

/// A compiled list schema.
pub(crate) struct CompiledList {
    pub item: Rc<Definition>,
    pub accessors: AccessorTable,
    pub wildcard: Rc<Definition>,
}

fn map_wildcard(entry: Option<&Entry>) -> Entry {
    entry
        .cloned()
        .unwrap_or_else(|| Entry::from(DEFAULT_WILDCARD_TYPE))
}

/// Compile (or fetch the cached compilation of) a map schema.
pub(crate) fn compile_map(schema: &MapSchema, runtime: &Runtime) -> Result<Rc<CompiledMap>> {
    if let Some(compiled) = schema.compiled_cell().get() {
        return Ok(Rc::clone(compiled));
    }
    let cx = ResolveContext {
        registry: runtime.registry(),
        policy: runtime.config().schema_policy,
    };
    let wildcard_entry = map_wildcard(schema.wildcard_entry());
    let accessors = AccessorTable::default();
    for (name, entry) in schema.entries() {
        let def = Definition::resolve(name, Some(entry), Some(&wildcard_entry), cx)?;
        accessors.install(name, Rc::new(def));
    }
    let wildcard = Rc::new(Definition::resolve("*", Some(&wildcard_entry), None, cx)?);
    let compiled = Rc::new(CompiledMap { accessors, wildcard });
    Ok(Rc::clone(schema.compiled_cell().get_or_init(|| compiled)))
}

/// Compile (or fetch the cached compilation of) a list schema.
pub(crate) fn compile_list(schema: &ListSchema, runtime: &Runtime) -> Result<Rc<CompiledList>> {
    if let Some(compiled) = schema.compiled_cell().get() {
        return Ok(Rc::clone(compiled));
    }
    let cx = ResolveContext {
        registry: runtime.registry(),
        policy: runtime.config().schema_policy,
    };
    let item = Rc::new(Definition::resolve_item(schema.item_entry(), cx)?);

    let wildcard_entry = map_wildcard(schema.wildcard_entry());
    let accessors = AccessorTable::default();
    for (name, entry) in schema.entries() {
        let def = Definition::resolve(name, Some(entry), Some(&wildcard_entry), cx)?;
        if def.is_computed() || def.setter().is_some() {
            reject(
                cx.policy,
                name,
                "get",
                "list properties are plain data; getters and setters are not supported",
            )?;
            accessors.install(name, Rc::new(Definition::passthrough(name)));
            continue;
        }
        accessors.install(name, Rc::new(def));
    }
    let mut wildcard = Definition::resolve("*", Some(&wildcard_entry), None, cx)?;
    if wildcard.is_computed() || wildcard.setter().is_some() {
        reject(
            cx.policy,
            "*",
            "get",
            "list properties are plain data; getters and setters are not supported",
        )?;
        wildcard = Definition::passthrough("*");
    }

    let compiled = Rc::new(CompiledList {
        item,
        accessors,
        wildcard: Rc::new(wildcard),
    });
    Ok(Rc::clone(schema.compiled_cell().get_or_init(|| compiled)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict(registry: &TypeRegistry) -> ResolveContext<'_> {
        ResolveContext {
            registry,
            policy: SchemaPolicy::Strict,
        }
    }

    fn permissive(registry: &TypeRegistry) -> ResolveContext<'_> {
        ResolveContext {
            registry,
            policy: SchemaPolicy::Permissive,
        }
    }

    #[test]
    fn empty_entries_are_passthrough() {
        let registry = TypeRegistry::with_builtins();
        let def = Definition::resolve("x", None, None, strict(&registry)).unwrap();
        assert_eq!(def.kind(), PropertyKind::Data);
        assert!(matches!(def.type_step, TypeStep::Passthrough));
        assert!(matches!(def.serialize, SerializeMode::Include));
    }

    #[test]
    fn fields_merge_from_wildcard() {
        let registry = TypeRegistry::with_builtins();
        let entry = Entry::from(PropDef::new().default_value(3));
        let wildcard = Entry::from(PropDef::new().ty("number").serialize(false));
        let def = Definition::resolve("x", Some(&entry), Some(&wildcard), strict(&registry)).unwrap();

        assert!(matches!(def.type_step, TypeStep::Named(ref n) if &**n == "number"));
        assert!(matches!(def.default, Some(DefaultSource::Literal(_))));
        assert!(matches!(def.serialize, SerializeMode::Skip));
    }

    #[test]
    fn getters_default_to_not_serialized() {
        let registry = TypeRegistry::with_builtins();
        let entry = Entry::from(Getter::derived(|_| Ok(Value::from(1))));
        let def = Definition::resolve("x", Some(&entry), None, strict(&registry)).unwrap();
        assert!(def.is_computed());
        assert!(matches!(def.serialize, SerializeMode::Skip));

        let entry = Entry::from(
            PropDef::new()
                .get(Getter::derived(|_| Ok(Value::from(1))))
                .serialize(true),
        );
        let def = Definition::resolve("x", Some(&entry), None, strict(&registry)).unwrap();
        assert!(matches!(def.serialize, SerializeMode::Include));
    }

    #[test]
    fn unknown_type_is_rejected_when_strict() {
        let registry = TypeRegistry::with_builtins();
        let entry = Entry::from("nmuber");
        let err = Definition::resolve("age", Some(&entry), None, strict(&registry)).unwrap_err();
        assert!(matches!(err, Error::Schema { field: "type", .. }));

        let def = Definition::resolve("age", Some(&entry), None, permissive(&registry)).unwrap();
        assert!(matches!(def.type_step, TypeStep::Passthrough));
    }

    #[test]
    fn conflicting_fields_are_rejected() {
        let registry = TypeRegistry::with_builtins();
        let schema = MapSchema::new().build();

        let both_types = Entry::from(
            PropDef::new()
                .ty("number")
                .constructor(Constructor::map(Rc::clone(&schema))),
        );
        assert!(Definition::resolve("a", Some(&both_types), None, strict(&registry)).is_err());
        let def = Definition::resolve("a", Some(&both_types), None, permissive(&registry)).unwrap();
        assert!(def.constructor.is_none());

        let both_values = Entry::from(
            PropDef::new()
                .default_value(1)
                .default_constructor(Constructor::map(schema)),
        );
        let err = Definition::resolve("b", Some(&both_values), None, strict(&registry)).unwrap_err();
        assert!(matches!(err, Error::Schema { field: "value", .. }));
    }

    #[test]
    fn compute_type_supplies_accessors() {
        let registry = TypeRegistry::with_builtins();
        let entry = Entry::from("compute");
        let def = Definition::resolve("c", Some(&entry), None, strict(&registry)).unwrap();
        assert!(def.is_computed());
        assert!(matches!(def.setter, Some(Setter::Returning(_))));

        let clash = Entry::from(
            PropDef::new()
                .ty("compute")
                .get(Getter::derived(|_| Ok(Value::Undefined))),
        );
        assert!(Definition::resolve("c", Some(&clash), None, strict(&registry)).is_err());
    }

    #[test]
    fn item_definitions_cannot_be_computed() {
        let registry = TypeRegistry::with_builtins();
        let entry = Entry::from(PropDef::new().get(Getter::derived(|_| Ok(Value::Null))));
        assert!(Definition::resolve_item(Some(&entry), strict(&registry)).is_err());

        let def = Definition::resolve_item(Some(&entry), permissive(&registry)).unwrap();
        assert!(!def.is_computed());
    }
}
