//! Type Registry
//!
//! Named types usable in the `type` field of a schema entry. The registry is
//! built once, shared through the runtime by `Rc`, and only read afterwards.
//!
//! Built-ins:
//!
//! | name                | behavior                                              |
//! |---------------------|-------------------------------------------------------|
//! | `string`            | `to_display_string`; containers are an error          |
//! | `number`            | numeric conversion, `NaN` allowed                     |
//! | `boolean`           | `"false"`/`"0"`/falsy → `false`, everything else true |
//! | `htmlbool`          | like `boolean`, but `""` is `true`                    |
//! | `date`              | RFC 3339 / `YYYY-MM-DD` strings, epoch milliseconds   |
//! | `*`, `any`          | passthrough                                           |
//! | `observable`        | plain objects → maps, plain arrays → lists            |
//! | `compute`           | get/set pair over a [`Signal`](crate::Signal)          |
//!
//! Every coercer passes `null` and `undefined` through unchanged.

use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use indexmap::IndexMap;

use super::map::ObservableMap;
use super::schema::{ListSchema, MapSchema};
use crate::error::{Error, Result};
use crate::list::ObservableList;
use crate::reactive::Runtime;
use crate::value::{date_from_millis, Value};

/// A registered coercion.
pub type TypeFn = Rc<dyn Fn(&Runtime, Value) -> Result<Value>>;

#[derive(Clone)]
pub(crate) enum TypeKind {
    Coerce(TypeFn),
    Observable,
    Compute,
}

/// Named coercions available to schemas.
pub struct TypeRegistry {
    types: IndexMap<String, TypeKind>,
    plain_map: Rc<MapSchema>,
    plain_list: Rc<ListSchema>,
}

impl TypeRegistry {
    /// A registry with only `*`, `any`, `observable` and `compute`.
    pub fn empty() -> Self {
        let mut types = IndexMap::new();
        types.insert("*".to_string(), TypeKind::Coerce(Rc::new(passthrough)));
        types.insert("any".to_string(), TypeKind::Coerce(Rc::new(passthrough)));
        types.insert("observable".to_string(), TypeKind::Observable);
        types.insert("compute".to_string(), TypeKind::Compute);
        Self {
            types,
            plain_map: MapSchema::new().build(),
            plain_list: ListSchema::new().build(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("string", |_, v| to_string(v));
        registry.register("number", |_, v| Ok(to_number(v)));
        registry.register("boolean", |_, v| Ok(to_boolean(v)));
        registry.register("htmlbool", |_, v| Ok(to_htmlbool(v)));
        registry.register("date", |_, v| to_date(v));
        registry
    }

    /// Register (or replace) a named coercion.
    pub fn register(
        &mut self,
        name: &str,
        coerce: impl Fn(&Runtime, Value) -> Result<Value> + 'static,
    ) -> &mut Self {
        self.types
            .insert(name.to_string(), TypeKind::Coerce(Rc::new(coerce)));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub(crate) fn kind(&self, name: &str) -> Option<&TypeKind> {
        self.types.get(name)
    }

    /// Apply the named coercion. Unknown names pass the value through.
    pub fn coerce(&self, runtime: &Runtime, name: &str, value: Value) -> Result<Value> {
        match self.types.get(name) {
            Some(TypeKind::Coerce(f)) => f(runtime, value),
            Some(TypeKind::Observable) => self.to_observable(runtime, value),
            Some(TypeKind::Compute) | None => Ok(value),
        }
    }

    /// Schema used for maps created from plain objects by `observable`.
    pub fn plain_map_schema(&self) -> &Rc<MapSchema> {
        &self.plain_map
    }

    /// Schema used for lists created from plain arrays by `observable`.
    pub fn plain_list_schema(&self) -> &Rc<ListSchema> {
        &self.plain_list
    }

    fn to_observable(&self, runtime: &Runtime, value: Value) -> Result<Value> {
        match value {
            Value::Object(_) => Ok(ObservableMap::new(runtime, &self.plain_map, value)?.into()),
            Value::Array(items) => Ok(ObservableList::new(
                runtime,
                &self.plain_list,
                items.iter().cloned(),
            )?
            .into()),
            other => Ok(other),
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn passthrough(_: &Runtime, value: Value) -> Result<Value> {
    Ok(value)
}

fn to_string(value: Value) -> Result<Value> {
    match value {
        Value::Undefined | Value::Null | Value::String(_) => Ok(value),
        Value::Array(_) | Value::Object(_) | Value::Map(_) | Value::List(_) => Err(
            Error::coercion("string", format!("cannot convert {} to a string", value.type_name())),
        ),
        other => Ok(Value::from(other.to_display_string())),
    }
}

fn to_number(value: Value) -> Value {
    match value {
        Value::Undefined | Value::Null | Value::Number(_) => value,
        other => Value::Number(other.to_number()),
    }
}

fn to_boolean(value: Value) -> Value {
    match value {
        Value::Undefined | Value::Null | Value::Bool(_) => value,
        Value::String(s) => Value::Bool(!matches!(&*s, "false" | "0" | "")),
        other => Value::Bool(other.truthy()),
    }
}

fn to_htmlbool(value: Value) -> Value {
    match value {
        Value::Undefined | Value::Null | Value::Bool(_) => value,
        Value::String(s) => Value::Bool(!matches!(
            &*s,
            "false" | "0" | "null" | "undefined" | "NaN"
        )),
        other => Value::Bool(other.truthy()),
    }
}

fn to_date(value: Value) -> Result<Value> {
    match value {
        Value::Undefined | Value::Null | Value::Date(_) => Ok(value),
        Value::Number(ms) => date_from_millis(ms)
            .map(Value::Date)
            .ok_or_else(|| Error::coercion("date", format!("{ms} is not a valid timestamp"))),
        Value::String(s) => parse_date(&s)
            .map(Value::Date)
            .ok_or_else(|| Error::coercion("date", format!("cannot parse {s:?} as a date"))),
        other => Err(Error::coercion(
            "date",
            format!("cannot convert {} to a date", other.type_name()),
        )),
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
