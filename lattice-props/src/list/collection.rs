//! Observable Lists
//!
//! An [`ObservableList`] is a dense, zero-based sequence whose items are
//! coerced through the schema's item definition. Every mutation goes through
//! [`splice`](ObservableList::splice), which queues at most one `remove` and
//! one `add` delta followed by a `length` record, all in one transaction.
//!
//! Reads record a dependency on `"length"`, which every content change
//! emits, so a computed property over a list re-evaluates on any mutation.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use super::diff::edit_script;
use crate::define::accessor::{AccessorTable, ValueStore};
use crate::define::definition::{compile_list, CompiledList, Definition};
use crate::define::ListSchema;
use crate::error::{Error, Result};
use crate::reactive::event::{
    self, Event, EventHub, EventKind, EventTarget, Listener, KEYS_EVENT, LENGTH_EVENT,
};
use crate::reactive::{Listenable, ObjectId, Patch, Runtime, SubscriberId, Target};
use crate::value::{join_values, parse_number, Value};

/// Largest index an item can be written at. Numeric keys beyond it name
/// list properties instead of items.
pub const MAX_INDEX: usize = u32::MAX as usize - 1;

struct ListInner {
    id: ObjectId,
    runtime: Runtime,
    schema: Rc<ListSchema>,
    compiled: Rc<CompiledList>,
    items: RefCell<Vec<Value>>,
    expandos: AccessorTable,
    props: ValueStore,
    hub: EventHub,
}

impl EventTarget for ListInner {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn hub(&self) -> &EventHub {
        &self.hub
    }
}

/// A live sequence following a [`ListSchema`].
///
/// Cloning yields another handle to the same list.
#[derive(Clone)]
pub struct ObservableList {
    inner: Rc<ListInner>,
}

impl ObservableList {
    /// Create a list of `schema` holding `items`, each coerced through the
    /// item definition. No events are emitted.
    pub fn new(
        runtime: &Runtime,
        schema: &Rc<ListSchema>,
        items: impl IntoIterator<Item = Value>,
    ) -> Result<Self> {
        let compiled = compile_list(schema, runtime)?;
        let items = items
            .into_iter()
            .map(|item| compiled.item.coerce(runtime, item))
            .collect::<Result<Vec<_>>>()?;
        let list = Self {
            inner: Rc::new(ListInner {
                id: ObjectId::new(),
                runtime: runtime.clone(),
                schema: Rc::clone(schema),
                compiled,
                items: RefCell::new(items),
                expandos: AccessorTable::default(),
                props: ValueStore::default(),
                hub: EventHub::new(),
            }),
        };
        trace!(id = list.inner.id.raw(), len = list.len_untracked(), "list created");
        Ok(list)
    }

    /// Create a list from a plain array, another list (copied), or nullish
    /// for an empty list.
    pub fn from_value(runtime: &Runtime, schema: &Rc<ListSchema>, value: Value) -> Result<Self> {
        match value {
            Value::Undefined | Value::Null => Self::new(runtime, schema, Vec::new()),
            Value::Array(items) => Self::new(runtime, schema, items.iter().cloned()),
            Value::List(list) => Self::new(runtime, schema, list.to_vec_untracked()),
            other => Err(Error::coercion(
                "list",
                format!("cannot build a list from {}", other.type_name()),
            )),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    pub fn schema(&self) -> &Rc<ListSchema> {
        &self.inner.schema
    }

    /// Whether this list was built from exactly `schema`.
    pub fn is_instance_of(&self, schema: &Rc<ListSchema>) -> bool {
        Rc::ptr_eq(&self.inner.schema, schema)
    }

    pub fn ptr_eq(&self, other: &ObservableList) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The item at `index`, or `Undefined` past the end.
    pub fn get(&self, index: usize) -> Value {
        self.observe(LENGTH_EVENT);
        self.inner
            .items
            .borrow()
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.observe(LENGTH_EVENT);
        self.len_untracked()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn len_untracked(&self) -> usize {
        self.inner.items.borrow().len()
    }

    /// The items, shallowly copied.
    pub fn to_vec(&self) -> Vec<Value> {
        self.observe(LENGTH_EVENT);
        self.to_vec_untracked()
    }

    pub(crate) fn to_vec_untracked(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }

    /// Plain snapshot: nested maps and lists are converted recursively.
    pub fn get_all(&self) -> Result<Value> {
        let items = self
            .to_vec()
            .iter()
            .map(Value::to_plain)
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::from(items))
    }

    /// JSON array of the items. Named list properties are not included.
    pub fn serialize(&self) -> Result<serde_json::Value> {
        let items = self
            .to_vec()
            .iter()
            .map(Value::to_json)
            .collect::<Result<Vec<_>>>()?;
        Ok(serde_json::Value::Array(items))
    }

    /// Read by string key: numeric keys index into the list, anything else
    /// reads a named property.
    pub fn get_key(&self, key: &str) -> Result<Value> {
        if let Some(index) = parse_index(key) {
            return Ok(self.get(index));
        }
        self.observe(key);
        let Some(def) = self.prop_definition(key) else {
            return Ok(Value::Undefined);
        };
        if let Some(value) = self.inner.props.data(key) {
            return Ok(value);
        }
        if !def.has_default() {
            return Ok(Value::Undefined);
        }
        let runtime = &self.inner.runtime;
        let value = def.coerce(runtime, def.produce_default(None, runtime)?)?;
        self.inner.props.write(key, value.clone());
        Ok(value)
    }

    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.observe(LENGTH_EVENT);
        self.inner.items.borrow().iter().position(|item| item.same(value))
    }

    pub fn includes(&self, value: &Value) -> bool {
        self.index_of(value).is_some()
    }

    /// Display strings of the items joined by `separator`; nullish items
    /// become empty strings.
    pub fn join(&self, separator: &str) -> String {
        self.observe(LENGTH_EVENT);
        join_values(self.inner.items.borrow().iter(), separator)
    }

    /// A new list of the same schema holding `start..end`. Negative bounds
    /// count from the end.
    pub fn slice(&self, start: isize, end: Option<isize>) -> Result<ObservableList> {
        let items = self.to_vec();
        let len = items.len();
        let start = clamp_index(start, len);
        let end = end.map_or(len, |end| clamp_index(end, len)).max(start);
        self.derive(items[start..end].iter().cloned())
    }

    pub fn for_each(&self, mut f: impl FnMut(&Value, usize)) {
        for (index, item) in self.to_vec().iter().enumerate() {
            f(item, index);
        }
    }

    pub fn filter(&self, mut predicate: impl FnMut(&Value, usize) -> bool) -> Result<ObservableList> {
        let items = self.to_vec();
        self.derive(
            items
                .into_iter()
                .enumerate()
                .filter(|(index, item)| predicate(item, *index))
                .map(|(_, item)| item),
        )
    }

    /// A new list of the same schema; results are coerced like any item.
    pub fn map_items(&self, mut f: impl FnMut(&Value, usize) -> Value) -> Result<ObservableList> {
        let items = self.to_vec();
        self.derive(items.iter().enumerate().map(|(index, item)| f(item, index)))
    }

    /// A new list of the same schema: these items followed by `others`.
    /// Lists and arrays in `others` are flattened one level.
    pub fn concat(&self, others: impl IntoIterator<Item = Value>) -> Result<ObservableList> {
        let mut items = self.to_vec();
        for other in others {
            match other {
                Value::Array(more) => items.extend(more.iter().cloned()),
                Value::List(more) => items.extend(more.to_vec()),
                single => items.push(single),
            }
        }
        self.derive(items)
    }

    fn derive(&self, items: impl IntoIterator<Item = Value>) -> Result<ObservableList> {
        Self::new(&self.inner.runtime, &self.inner.schema, items)
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Remove `how_many` items at `index` and insert `items` there.
    ///
    /// A negative `index` counts from the end; it is clamped to the list.
    /// `None` removes everything from `index` on, a negative count removes
    /// nothing. Items are coerced first, so a coercion failure leaves the
    /// list untouched. Returns the removed items.
    pub fn splice(
        &self,
        index: isize,
        how_many: Option<isize>,
        items: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let items = self.coerce_items(items)?;
        let len = self.len_untracked();
        let start = clamp_index(index, len);
        let delete = match how_many {
            None => len - start,
            Some(count) => usize::try_from(count).unwrap_or(0).min(len - start),
        };
        Ok(self.splice_coerced(start, delete, items))
    }

    fn splice_coerced(&self, start: usize, delete: usize, items: Vec<Value>) -> Vec<Value> {
        let (removed, old_len, new_len) = {
            let mut current = self.inner.items.borrow_mut();
            if delete == items.len()
                && current[start..start + delete]
                    .iter()
                    .zip(&items)
                    .all(|(a, b)| a.same(b))
            {
                return current[start..start + delete].to_vec();
            }
            let old_len = current.len();
            let removed: Vec<Value> = current
                .splice(start..start + delete, items.iter().cloned())
                .collect();
            (removed, old_len, current.len())
        };

        let id = self.inner.id;
        let _batch = self.inner.runtime.batch_scope();
        if !removed.is_empty() {
            self.enqueue(Event::items_removed(id, removed.clone(), start));
        }
        if !items.is_empty() {
            self.enqueue(Event::items_added(id, items, start));
        }
        self.enqueue(Event::property(
            id,
            LENGTH_EVENT.into(),
            EventKind::Length,
            Value::from(new_len),
            Value::from(old_len),
        ));
        removed
    }

    fn coerce_items(&self, items: Vec<Value>) -> Result<Vec<Value>> {
        let runtime = &self.inner.runtime;
        items
            .into_iter()
            .map(|item| self.inner.compiled.item.coerce(runtime, item))
            .collect()
    }

    /// Write the item at `index`. Writing past the end pads the gap with
    /// `Undefined` in a single `add`. Indices above [`MAX_INDEX`] are
    /// rejected.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        if index > MAX_INDEX {
            return Err(Error::coercion(
                "index",
                format!("{index} exceeds the maximum list index {MAX_INDEX}"),
            ));
        }
        let len = self.len_untracked();
        if index < len {
            return self.splice(index as isize, Some(1), vec![value.into()]).map(drop);
        }
        let mut items = vec![Value::Undefined; index - len];
        items.push(value.into());
        let items = self.coerce_items(items)?;
        self.splice_coerced(len, 0, items);
        Ok(())
    }

    /// Write by string key: numeric keys index into the list, anything else
    /// writes a named property.
    pub fn set_key(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        match parse_index(key) {
            Some(index) => self.set(index, value),
            None => self.set_prop(key, value.into()),
        }
    }

    fn set_prop(&self, key: &str, value: Value) -> Result<()> {
        let (def, fresh) = match self.prop_definition(key) {
            Some(def) => (def, false),
            None => (Rc::clone(&self.inner.compiled.wildcard), true),
        };
        let value = def.coerce(&self.inner.runtime, value)?;
        let old = self.inner.props.data(key);
        if !fresh && old.as_ref().is_some_and(|old| old.same(&value)) {
            return Ok(());
        }

        let _batch = self.inner.runtime.batch_scope();
        if fresh {
            self.inner.expandos.install(key, def);
        }
        self.inner.props.write(key, value.clone());
        let kind = if old.is_some() { EventKind::Set } else { EventKind::Add };
        self.enqueue(Event::property(
            self.inner.id,
            key.into(),
            kind,
            value,
            old.unwrap_or_default(),
        ));
        if fresh {
            let names = self.inner.expandos.names();
            self.enqueue(Event::property(
                self.inner.id,
                KEYS_EVENT.into(),
                EventKind::Keys,
                Value::array(names.iter().map(|k| Value::from(&**k))),
                Value::Undefined,
            ));
        }
        Ok(())
    }

    fn prop_definition(&self, key: &str) -> Option<Rc<Definition>> {
        self.inner
            .compiled
            .accessors
            .get(key)
            .or_else(|| self.inner.expandos.get(key))
    }

    /// Append one item; returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        self.extend([value.into()])
    }

    /// Append several items in one splice; returns the new length.
    pub fn extend(&self, values: impl IntoIterator<Item = Value>) -> Result<usize> {
        let len = self.len_untracked();
        self.splice(len as isize, Some(0), values.into_iter().collect())?;
        Ok(self.len_untracked())
    }

    /// Remove and return the last item (`Undefined` when empty).
    pub fn pop(&self) -> Value {
        let len = self.len_untracked();
        if len == 0 {
            return Value::Undefined;
        }
        self.splice_coerced(len - 1, 1, Vec::new())
            .pop()
            .unwrap_or_default()
    }

    /// Remove and return the first item (`Undefined` when empty).
    pub fn shift(&self) -> Value {
        if self.len_untracked() == 0 {
            return Value::Undefined;
        }
        self.splice_coerced(0, 1, Vec::new())
            .into_iter()
            .next()
            .unwrap_or_default()
    }

    /// Insert items at the front; returns the new length.
    pub fn unshift(&self, values: impl IntoIterator<Item = Value>) -> Result<usize> {
        self.splice(0, Some(0), values.into_iter().collect())?;
        Ok(self.len_untracked())
    }

    /// Make the list hold `items`, emitting only the splices needed to get
    /// there.
    pub fn replace(&self, items: impl IntoIterator<Item = Value>) -> Result<()> {
        let items = self.coerce_items(items.into_iter().collect())?;
        let current = self.to_vec_untracked();
        let ops = edit_script(&current, &items, self.inner.runtime.config().diff_cell_limit);
        trace!(id = self.inner.id.raw(), ops = ops.len(), "replacing list contents");

        let _batch = self.inner.runtime.batch_scope();
        for op in ops {
            self.splice_coerced(op.index, op.delete_count, op.insert);
        }
        Ok(())
    }

    /// Reverse in place as one whole-range splice.
    pub fn reverse(&self) -> &Self {
        let mut items = self.to_vec_untracked();
        items.reverse();
        let len = items.len();
        self.splice_coerced(0, len, items);
        self
    }

    /// Sort by display string, `Undefined` last.
    pub fn sort(&self) -> &Self {
        self.sort_by(default_order)
    }

    /// Sort with `compare` as one whole-range splice. The sort is stable.
    pub fn sort_by(&self, compare: impl FnMut(&Value, &Value) -> Ordering) -> &Self {
        let mut items = self.to_vec_untracked();
        items.sort_by(compare);
        let len = items.len();
        self.splice_coerced(0, len, items);
        self
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    fn target_rc(&self) -> Rc<dyn EventTarget> {
        Rc::clone(&self.inner) as Rc<dyn EventTarget>
    }

    fn observe(&self, key: &str) {
        if self.inner.runtime.is_tracking() {
            self.inner.runtime.observe(self.target_rc(), key);
        }
    }

    fn enqueue(&self, event: Event) {
        self.inner.runtime.enqueue(self.target_rc(), event);
    }

    /// Listen on `key`: `"add"`, `"remove"`, `"length"`, or a named
    /// property.
    pub fn on(&self, key: &str, handler: impl Fn(&Event) + 'static) -> SubscriberId {
        event::bind(&*self.inner, key, Listener::User(Rc::new(handler)))
    }

    pub fn off(&self, key: &str, id: SubscriberId) -> bool {
        event::unbind(&*self.inner, key, id)
    }

    /// Receive the patches of each flushed transaction that touched this
    /// list.
    pub fn on_patches(&self, handler: impl Fn(&[Patch]) + 'static) -> SubscriberId {
        self.inner.hub.add_patches(Rc::new(handler))
    }

    pub fn off_patches(&self, id: SubscriberId) -> bool {
        self.inner.hub.remove_patches(id)
    }

    pub fn listener_count(&self, key: &str) -> usize {
        self.inner.hub.listener_count(key)
    }
}

impl Listenable for ObservableList {
    fn target(&self) -> Target {
        Target(self.target_rc())
    }
}

impl fmt::Debug for ObservableList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(self.inner.schema.name())
            .field("id", &self.inner.id.raw())
            .field("items", &*self.inner.items.borrow())
            .finish()
    }
}

/// Resolve a possibly negative index against `len`, clamped to `0..=len`.
fn clamp_index(index: isize, len: usize) -> usize {
    if index < 0 {
        len.saturating_sub(index.unsigned_abs())
    } else {
        index.unsigned_abs().min(len)
    }
}

/// Keys that address items: integers in `0..=MAX_INDEX`.
fn parse_index(key: &str) -> Option<usize> {
    let n = parse_number(key);
    let valid = n.is_finite() && n >= 0.0 && n.fract() == 0.0 && n <= MAX_INDEX as f64;
    (valid && !key.trim().is_empty()).then_some(n as usize)
}

fn default_order(a: &Value, b: &Value) -> Ordering {
    match (a.is_undefined(), b.is_undefined()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.to_display_string().cmp(&b.to_display_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define::TypeRef;

    fn numbers(runtime: &Runtime, items: &[i32]) -> ObservableList {
        let schema = ListSchema::new().items("number").build();
        ObservableList::new(runtime, &schema, items.iter().map(|&n| Value::from(n))).unwrap()
    }

    fn record(list: &ObservableList) -> Rc<RefCell<Vec<(EventKind, Option<usize>, Value)>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        for key in [event::ADD_EVENT, event::REMOVE_EVENT, LENGTH_EVENT] {
            let sink = Rc::clone(&seen);
            list.on(key, move |e| {
                let payload = match e.kind {
                    EventKind::Length => e.new_value.clone(),
                    _ => Value::from(e.items().to_vec()),
                };
                sink.borrow_mut().push((e.kind, e.index, payload));
            });
        }
        seen
    }

    #[test]
    fn items_are_coerced() {
        let runtime = Runtime::new();
        let schema = ListSchema::new().items("number").build();
        let list = ObservableList::new(&runtime, &schema, [Value::from("1"), Value::from(2)]).unwrap();
        assert_eq!(list.to_vec(), vec![Value::from(1), Value::from(2)]);
    }

    #[test]
    fn splice_pairs_remove_and_add() {
        let runtime = Runtime::new();
        let list = numbers(&runtime, &[1, 2, 3]);
        let seen = record(&list);

        let removed = list.splice(1, Some(1), vec![Value::from(9), Value::from(8)]).unwrap();
        assert_eq!(removed, vec![Value::from(2)]);
        assert_eq!(list.to_vec(), [1, 9, 8, 3].map(Value::from).to_vec());
        assert_eq!(
            *seen.borrow(),
            vec![
                (EventKind::Remove, Some(1), Value::array([2])),
                (EventKind::Add, Some(1), Value::array([9, 8])),
                (EventKind::Length, None, Value::from(4)),
            ]
        );
    }

    #[test]
    fn identical_splice_is_silent() {
        let runtime = Runtime::new();
        let list = numbers(&runtime, &[1, 2, 3]);
        let seen = record(&list);
        list.splice(1, Some(1), vec![Value::from(2)]).unwrap();
        list.splice(0, Some(0), Vec::new()).unwrap();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn negative_indices_count_from_the_end() {
        let runtime = Runtime::new();
        let list = numbers(&runtime, &[1, 2, 3]);
        let removed = list.splice(-1, None, Vec::new()).unwrap();
        assert_eq!(removed, vec![Value::from(3)]);
        let removed = list.splice(-10, Some(-1), vec![Value::from(0)]).unwrap();
        assert!(removed.is_empty());
        assert_eq!(list.to_vec(), [0, 1, 2].map(Value::from).to_vec());
    }

    #[test]
    fn writing_past_the_end_pads() {
        let runtime = Runtime::new();
        let list = numbers(&runtime, &[1]);
        let seen = record(&list);

        list.set(3, 4).unwrap();
        assert_eq!(
            list.to_vec(),
            vec![Value::from(1), Value::Undefined, Value::Undefined, Value::from(4)]
        );
        assert_eq!(
            seen.borrow()[0],
            (
                EventKind::Add,
                Some(1),
                Value::array([Value::Undefined, Value::Undefined, Value::from(4)])
            )
        );
    }

    #[test]
    fn coercion_failure_leaves_list_untouched() {
        let runtime = Runtime::new();
        let schema = ListSchema::new()
            .items(crate::define::PropDef::new().ty(TypeRef::coerce(|v| match v {
                Value::Number(_) => Ok(v),
                other => Err(Error::custom(format!("{} is not a number", other.type_name()))),
            })))
            .build();
        let list = ObservableList::new(&runtime, &schema, [Value::from(1)]).unwrap();
        let seen = record(&list);

        assert!(list.push("x").is_err());
        assert_eq!(list.to_vec(), vec![Value::from(1)]);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn replace_touches_only_changed_items() {
        let runtime = Runtime::new();
        let schema = ListSchema::new().build();
        let list = ObservableList::new(&runtime, &schema, ["a", "b", "c"].map(Value::from)).unwrap();
        let seen = record(&list);

        list.replace(["a", "x", "c"].map(Value::from)).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![
                (EventKind::Remove, Some(1), Value::array(["b"])),
                (EventKind::Add, Some(1), Value::array(["x"])),
                (EventKind::Length, None, Value::from(3)),
            ]
        );
    }

    #[test]
    fn stack_and_queue_helpers() {
        let runtime = Runtime::new();
        let list = numbers(&runtime, &[2]);
        assert_eq!(list.push(3).unwrap(), 2);
        assert_eq!(list.unshift([Value::from(1)]).unwrap(), 3);
        assert_eq!(list.pop(), Value::from(3));
        assert_eq!(list.shift(), Value::from(1));
        assert_eq!(list.to_vec(), vec![Value::from(2)]);
        list.pop();
        assert_eq!(list.pop(), Value::Undefined);
    }

    #[test]
    fn reverse_and_sort_are_whole_range_splices() {
        let runtime = Runtime::new();
        let list = numbers(&runtime, &[3, 1, 2]);
        let seen = record(&list);

        list.sort();
        assert_eq!(list.to_vec(), [1, 2, 3].map(Value::from).to_vec());
        list.reverse().sort_by(|a, b| a.to_number().total_cmp(&b.to_number()));
        assert_eq!(list.to_vec(), [1, 2, 3].map(Value::from).to_vec());
        // sort, reverse, sort: three remove/add/length triples
        assert_eq!(seen.borrow().len(), 9);
    }

    #[test]
    fn named_keys_are_properties() {
        let runtime = Runtime::new();
        let schema = ListSchema::new().prop("label", "string").build();
        let list = ObservableList::new(&runtime, &schema, Vec::new()).unwrap();

        list.set_key("label", 5).unwrap();
        assert_eq!(list.get_key("label").unwrap(), Value::from("5"));
        list.set_key("1", "b").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.get_key("1").unwrap(), Value::from("b"));

        list.set_key("extra", true).unwrap();
        assert_eq!(list.get_key("extra").unwrap(), Value::Bool(true));
    }

    #[test]
    fn oversized_indices_never_allocate() {
        let runtime = Runtime::new();
        let list = numbers(&runtime, &[1]);
        let seen = record(&list);

        assert!(matches!(list.set(usize::MAX, 5), Err(Error::Coercion { .. })));
        assert!(matches!(list.set(MAX_INDEX + 1, 5), Err(Error::Coercion { .. })));

        list.set_key("1e20", 5).unwrap();
        list.set_key("4294967295", 6).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.get_key("1e20").unwrap(), Value::from(5));
        assert_eq!(list.get_key("4294967295").unwrap(), Value::from(6));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn derived_lists_share_the_schema() {
        let runtime = Runtime::new();
        let list = numbers(&runtime, &[1, 2, 3, 4]);

        let evens = list.filter(|v, _| v.to_number() % 2.0 == 0.0).unwrap();
        assert!(evens.is_instance_of(list.schema()));
        assert_eq!(evens.to_vec(), [2, 4].map(Value::from).to_vec());

        let doubled = list.map_items(|v, _| Value::from(v.to_number() * 2.0)).unwrap();
        assert_eq!(doubled.get(3), Value::from(8));

        assert_eq!(list.slice(1, Some(-1)).unwrap().to_vec(), [2, 3].map(Value::from).to_vec());
        assert_eq!(list.concat([Value::array([5, 6])]).unwrap().len(), 6);
        assert_eq!(list.join("-"), "1-2-3-4");
        assert_eq!(list.index_of(&Value::from(3)), Some(2));
    }

    #[test]
    fn serialization() {
        let runtime = Runtime::new();
        let list = numbers(&runtime, &[1]);
        list.set(2, 3).unwrap();
        assert_eq!(list.serialize().unwrap(), serde_json::json!([1, null, 3]));
        assert_eq!(list.get_all().unwrap(), Value::array([Value::from(1), Value::Undefined, Value::from(3)]));
    }
}
