//! Integration Tests for the Property Runtime
//!
//! These tests verify that schemas, maps, lists, computed properties and
//! transactions work together correctly through the public API.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use lattice_props::{
    Error, Event, EventKind, Getter, ListSchema, MapSchema, ObservableList, ObservableMap, Patch,
    PropDef, Resolver, Runtime, Setter, Signal, Value,
};

fn person_schema() -> Rc<MapSchema> {
    MapSchema::new()
        .named("Person")
        .prop("first", "string")
        .prop("last", "string")
        .prop("born", "date")
        .prop(
            "full",
            Getter::derived(|person| {
                Ok(Value::from(format!(
                    "{} {}",
                    person.get("first")?.to_display_string(),
                    person.get("last")?.to_display_string()
                )))
            }),
        )
        .build()
}

fn person(runtime: &Runtime) -> ObservableMap {
    ObservableMap::new(
        runtime,
        &person_schema(),
        Value::object([("first", "Ada"), ("last", "Lovelace")]),
    )
    .unwrap()
}

fn collect(target: &ObservableMap, key: &str) -> Rc<RefCell<Vec<Event>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    target.on(key, move |event| sink.borrow_mut().push(event.clone()));
    seen
}

/// Writing the current value again emits nothing.
#[test]
fn setting_the_same_value_is_a_no_op() {
    let runtime = Runtime::new();
    let ada = person(&runtime);
    let seen = collect(&ada, "first");

    ada.set("first", "Ada").unwrap();
    assert!(seen.borrow().is_empty());

    ada.set("first", "Grace").unwrap();
    ada.set("first", "Grace").unwrap();
    assert_eq!(seen.borrow().len(), 1);
}

/// Two writes in one transaction produce one computed notification carrying
/// the value from before the transaction as its old value.
#[test]
fn batch_coalesces_computed_notifications() {
    let runtime = Runtime::new();
    let ada = person(&runtime);
    let seen = collect(&ada, "full");

    runtime
        .batch(|| -> lattice_props::Result<()> {
            ada.set("first", "Grace")?;
            ada.set("last", "Hopper")?;
            // Reads inside the transaction are never stale.
            assert_eq!(ada.get("full")?, Value::from("Grace Hopper"));
            Ok(())
        })
        .unwrap();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].kind, EventKind::Set);
    assert_eq!(seen[0].new_value, Value::from("Grace Hopper"));
    assert_eq!(seen[0].old_value, Value::from("Ada Lovelace"));
}

/// Binding and unbinding a listener on a computed property leaves no
/// subscription behind, including on computed properties it depends on.
#[test]
fn cold_hot_cold_leaves_no_residual_listeners() {
    let runtime = Runtime::new();
    let schema = MapSchema::new()
        .prop("x", "number")
        .prop("double", Getter::derived(|m| Ok(Value::from(m.get("x")?.to_number() * 2.0))))
        .prop(
            "quad",
            Getter::derived(|m| Ok(Value::from(m.get("double")?.to_number() * 2.0))),
        )
        .build();
    let map = ObservableMap::new(&runtime, &schema, Value::object([("x", 1)])).unwrap();

    // Cold reads evaluate on demand and subscribe to nothing.
    assert_eq!(map.get("quad").unwrap(), Value::from(4));
    assert_eq!(map.total_listener_count(), 0);

    let id = map.on("quad", |_| {});
    assert_eq!(map.listener_count("double"), 1);
    assert_eq!(map.listener_count("x"), 1);

    map.set("x", 2).unwrap();
    assert_eq!(map.get("quad").unwrap(), Value::from(8));

    assert!(map.off("quad", id));
    assert_eq!(map.total_listener_count(), 0);

    // Still correct when cold again.
    map.set("x", 3).unwrap();
    assert_eq!(map.get("quad").unwrap(), Value::from(12));
}

/// A diamond of computed properties recomputes each node once per change.
#[test]
fn diamond_dependencies_evaluate_once() {
    let runtime = Runtime::new();
    let evaluations = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&evaluations);
    let schema = MapSchema::new()
        .prop("x", "number")
        .prop("a", Getter::derived(|m| Ok(Value::from(m.get("x")?.to_number() + 1.0))))
        .prop("b", Getter::derived(|m| Ok(Value::from(m.get("x")?.to_number() * 10.0))))
        .prop(
            "sum",
            Getter::derived(move |m| {
                *counter.borrow_mut() += 1;
                Ok(Value::from(m.get("a")?.to_number() + m.get("b")?.to_number()))
            }),
        )
        .build();
    let map = ObservableMap::new(&runtime, &schema, Value::object([("x", 1)])).unwrap();
    let seen = collect(&map, "sum");
    assert_eq!(*evaluations.borrow(), 1);

    map.set("x", 2).unwrap();
    assert_eq!(*evaluations.borrow(), 2);
    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(seen.borrow()[0].new_value, Value::from(23));
}

/// Plain data survives a trip through a live instance.
#[test]
fn plain_round_trip() {
    let runtime = Runtime::new();
    let address = MapSchema::new()
        .named("Address")
        .prop("city", "string")
        .prop("zip", "string")
        .build();
    let schema = MapSchema::new()
        .prop("name", "string")
        .prop("age", "number")
        .prop("address", PropDef::new().ty(Rc::clone(&address)))
        .build();

    let plain = serde_json::json!({
        "name": "Ada",
        "age": 36,
        "address": {"city": "London", "zip": "W1"},
        "tags": ["math", "poetry"],
    });
    let map = ObservableMap::new(&runtime, &schema, Value::from(plain.clone())).unwrap();

    let nested = map.get("address").unwrap();
    assert!(nested.as_map().unwrap().is_instance_of(&address));
    assert!(map.get("tags").unwrap().as_list().is_some());

    assert_eq!(map.get_all().unwrap().to_json().unwrap(), plain);
    assert_eq!(map.serialize().unwrap(), plain);
}

/// `[1]` with `set(3, 4)` pads with undefined in one add event.
#[test]
fn list_writes_past_the_end_pad_in_one_event() {
    let runtime = Runtime::new();
    let list = ObservableList::new(&runtime, &ListSchema::new().build(), [Value::from(1)]).unwrap();
    let adds = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&adds);
    list.on("add", move |e| sink.borrow_mut().push((e.items().to_vec(), e.index)));

    list.set(3, 4).unwrap();
    assert_eq!(
        list.to_vec(),
        vec![Value::from(1), Value::Undefined, Value::Undefined, Value::from(4)]
    );
    assert_eq!(
        *adds.borrow(),
        vec![(
            vec![Value::Undefined, Value::Undefined, Value::from(4)],
            Some(1)
        )]
    );
}

/// Splices report removed items before inserted ones, both at the splice
/// position, and patch listeners see the same structure.
#[test]
fn splice_pairs_and_patches() {
    let runtime = Runtime::new();
    let list = ObservableList::new(
        &runtime,
        &ListSchema::new().build(),
        ["a", "b", "c"].map(Value::from),
    )
    .unwrap();
    let patches = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&patches);
    list.on_patches(move |batch| sink.borrow_mut().push(batch.to_vec()));

    list.replace(["a", "x", "c"].map(Value::from)).unwrap();
    assert_eq!(
        *patches.borrow(),
        vec![vec![
            Patch::Splice {
                index: 1,
                delete_count: 1,
                insert: Vec::new(),
            },
            Patch::Splice {
                index: 1,
                delete_count: 0,
                insert: vec![Value::from("x")],
            },
        ]]
    );

    let json = serde_json::to_value(&patches.borrow()[0]).unwrap();
    assert_eq!(json[0]["type"], "splice");
    assert_eq!(json[0]["deleteCount"], 1);
}

/// A computed property over a list follows every mutation.
#[test]
fn computed_over_list_contents() {
    let runtime = Runtime::new();
    let schema = MapSchema::new()
        .prop("items", PropDef::new().ty(ListSchema::new().items("number").build()))
        .prop(
            "total",
            Getter::derived(|m| {
                let items = m.get("items")?;
                let total = items
                    .as_list()
                    .map(|list| list.to_vec().iter().map(Value::to_number).sum::<f64>())
                    .unwrap_or(0.0);
                Ok(Value::from(total))
            }),
        )
        .build();
    let map = ObservableMap::new(
        &runtime,
        &schema,
        Value::object([("items", Value::array([1, 2]))]),
    )
    .unwrap();
    let seen = collect(&map, "total");

    let items = map.get("items").unwrap();
    let list = items.as_list().unwrap();
    list.push(3).unwrap();
    list.pop();
    list.extend([Value::from(10), Value::from(20)]).unwrap();

    let totals: Vec<Value> = seen.borrow().iter().map(|e| e.new_value.clone()).collect();
    assert_eq!(totals, [6, 3, 33].map(Value::from).to_vec());
}

/// A resolver publishes into a hot property immediately.
#[test]
fn resolver_publishes_while_hot() {
    let runtime = Runtime::new();
    let slot: Rc<RefCell<Option<Resolver>>> = Rc::new(RefCell::new(None));
    let stash = Rc::clone(&slot);
    let schema = MapSchema::new()
        .prop(
            "remote",
            Getter::resolving(move |_, scope| {
                *stash.borrow_mut() = Some(scope.resolver());
                Ok(None)
            }),
        )
        .build();
    let map = ObservableMap::new(&runtime, &schema, Value::Undefined).unwrap();
    let seen = collect(&map, "remote");

    let resolver = slot.borrow().clone().unwrap();
    assert!(resolver.is_live());
    resolver.resolve(5);
    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(seen.borrow()[0].new_value, Value::from(5));
    assert_eq!(map.get("remote").unwrap(), Value::from(5));

    // Identical values are dropped.
    resolver.resolve(5);
    assert_eq!(seen.borrow().len(), 1);
}

/// Resolvers handed out before the property went cold do nothing.
#[test]
fn resolving_after_teardown_is_a_no_op() {
    let runtime = Runtime::new();
    let slot: Rc<RefCell<Option<Resolver>>> = Rc::new(RefCell::new(None));
    let stash = Rc::clone(&slot);
    let schema = MapSchema::new()
        .prop(
            "remote",
            Getter::resolving(move |_, scope| {
                *stash.borrow_mut() = Some(scope.resolver());
                Ok(None)
            }),
        )
        .build();
    let map = ObservableMap::new(&runtime, &schema, Value::Undefined).unwrap();

    let seen = Rc::new(RefCell::new(0));
    let count = Rc::clone(&seen);
    let id = map.on("remote", move |_| *count.borrow_mut() += 1);
    let resolver = slot.borrow_mut().take().unwrap();

    assert!(map.off("remote", id));
    assert!(!resolver.is_live());
    resolver.resolve("late");
    assert_eq!(*seen.borrow(), 0);
    assert_eq!(map.get("remote").unwrap(), Value::Undefined);
}

/// The `compute` type reads through a signal and forwards writes into it.
#[test]
fn compute_type_wraps_a_signal() {
    let runtime = Runtime::new();
    let source = Signal::new(&runtime, 1);
    let schema = MapSchema::new()
        .prop("c", PropDef::new().ty("compute").default_value(source.clone()))
        .build();
    let map = ObservableMap::new(&runtime, &schema, Value::Undefined).unwrap();

    assert_eq!(map.get("c").unwrap(), Value::from(1));

    let seen = collect(&map, "c");
    source.set(2);
    assert_eq!(seen.borrow().last().unwrap().new_value, Value::from(2));

    map.set("c", 3).unwrap();
    assert_eq!(source.get_untracked(), Value::from(3));
    assert_eq!(seen.borrow().last().unwrap().new_value, Value::from(3));

    // Writing a new signal swaps the source.
    let replacement = Signal::new(&runtime, 10);
    map.set("c", replacement.clone()).unwrap();
    assert_eq!(map.get("c").unwrap(), Value::from(10));
    assert_eq!(source.listener_count(), 0);
    assert_eq!(replacement.listener_count(), 1);
}

/// Setter variants: returning, side-effect and resolving.
#[test]
fn setter_variants() {
    let runtime = Runtime::new();
    let resolved: Rc<RefCell<Option<lattice_props::SetResolver>>> = Rc::new(RefCell::new(None));
    let stash = Rc::clone(&resolved);
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    let schema = MapSchema::new()
        .prop(
            "upper",
            PropDef::new()
                .ty("string")
                .set(Setter::returning(|_, v, _| {
                    Ok(Value::from(v.to_display_string().to_uppercase()))
                })),
        )
        .prop(
            "logged",
            PropDef::new().set(Setter::side_effect(move |_, v, old| {
                sink.borrow_mut().push((old.clone(), v.clone()));
                Ok(())
            })),
        )
        .prop(
            "later",
            PropDef::new().set(Setter::resolving(move |_, _, resolver, _| {
                *stash.borrow_mut() = Some(resolver);
                Ok(())
            })),
        )
        .build();
    let map = ObservableMap::new(&runtime, &schema, Value::Undefined).unwrap();

    map.set("upper", "abc").unwrap();
    assert_eq!(map.get("upper").unwrap(), Value::from("ABC"));

    map.set("logged", 1).unwrap();
    map.set("logged", 2).unwrap();
    assert_eq!(
        *log.borrow(),
        vec![(Value::Undefined, Value::from(1)), (Value::from(1), Value::from(2))]
    );
    assert_eq!(map.get("logged").unwrap(), Value::from(2));

    map.set("later", "pending").unwrap();
    assert_eq!(map.get("later").unwrap(), Value::Undefined);
    let resolver = resolved.borrow_mut().take().unwrap();
    resolver.resolve("done").unwrap();
    assert_eq!(map.get("later").unwrap(), Value::from("done"));
}

/// A failed coercion leaves the store untouched and emits nothing.
#[test]
fn coercion_failure_is_local() {
    let runtime = Runtime::new();
    let ada = person(&runtime);
    ada.set("born", "1815-12-10").unwrap();
    let before = ada.get("born").unwrap();
    let seen = collect(&ada, "born");

    let err = ada.set("born", "the day after tomorrow").unwrap_err();
    assert!(matches!(err, Error::Coercion { type_name: "date", .. }));
    assert_eq!(ada.get("born").unwrap(), before);
    assert!(seen.borrow().is_empty());
}

#[test]
fn unbalanced_stop_is_reported() {
    let runtime = Runtime::new();
    assert_eq!(runtime.stop(), Err(Error::TransactionImbalance));

    runtime.start();
    assert_eq!(runtime.transaction_depth(), 1);
    assert_eq!(runtime.stop(), Ok(()));
    assert_eq!(runtime.stop(), Err(Error::TransactionImbalance));
}

/// Writes made by a listener are delivered after the current round.
#[test]
fn listener_writes_land_in_a_later_round() {
    let runtime = Runtime::new();
    let schema = MapSchema::new().prop("a", "number").prop("b", "number").build();
    let map = ObservableMap::new(&runtime, &schema, Value::Undefined).unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));

    let (writer, sink) = (map.clone(), Rc::clone(&log));
    map.on("a", move |e| {
        sink.borrow_mut().push(format!("a={}", e.new_value.to_display_string()));
        writer.set("b", e.new_value.to_number() * 10.0).unwrap();
        sink.borrow_mut().push("a done".to_string());
    });
    let sink = Rc::clone(&log);
    map.on("b", move |e| {
        sink.borrow_mut().push(format!("b={}", e.new_value.to_display_string()))
    });

    map.set("a", 1).unwrap();
    assert_eq!(*log.borrow(), vec!["a=1", "a done", "b=10"]);
}

/// Expando keys are announced and removable.
#[test]
fn failing_getters_recover_on_later_changes() {
    let runtime = Runtime::new();
    let schema = MapSchema::new()
        .prop("total", "number")
        .prop("count", "number")
        .prop(
            "average",
            Getter::derived(|m| {
                let count = m.get("count")?.to_number();
                if count == 0.0 {
                    return Err(Error::custom("no samples"));
                }
                Ok(Value::from(m.get("total")?.to_number() / count))
            }),
        )
        .build();
    let stats = ObservableMap::new(
        &runtime,
        &schema,
        Value::object([("total", 0), ("count", 0)]),
    )
    .unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    stats.on("average", move |e| sink.borrow_mut().push(e.new_value.clone()));
    assert!(stats.get("average").is_err());

    runtime
        .batch(|| -> lattice_props::Result<()> {
            stats.set("total", 10)?;
            stats.set("count", 4)
        })
        .unwrap();
    assert_eq!(*seen.borrow(), vec![Value::from(2.5)]);

    stats.set("count", 0).unwrap();
    assert_eq!(seen.borrow().len(), 1);

    stats.set("count", 2).unwrap();
    assert_eq!(*seen.borrow(), vec![Value::from(2.5), Value::from(5)]);
}

#[test]
fn expando_lifecycle() {
    let runtime = Runtime::new();
    let ada = person(&runtime);
    let keys = collect(&ada, "__keys");

    ada.set("nickname", "Countess").unwrap();
    assert_eq!(keys.borrow().len(), 1);
    assert!(ada.keys().iter().any(|k| k == "nickname"));

    assert!(ada.delete_key("nickname"));
    assert_eq!(keys.borrow().len(), 2);
    assert!(!ada.keys().iter().any(|k| k == "nickname"));
}

/// Resolvers can be called from a local task after an await.
#[tokio::test(flavor = "current_thread")]
async fn async_resolve_from_local_task() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let runtime = Runtime::new();
            let schema = MapSchema::new()
                .prop("query", "string")
                .prop(
                    "result",
                    Getter::resolving(|search, scope| {
                        let query = search.get("query")?.to_display_string();
                        let resolver = scope.resolver();
                        tokio::task::spawn_local(async move {
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            resolver.resolve(format!("results for {query}"));
                        });
                        Ok(None)
                    }),
                )
                .build();
            let search =
                ObservableMap::new(&runtime, &schema, Value::object([("query", "rust")])).unwrap();
            let seen = collect(&search, "result");

            tokio::time::sleep(Duration::from_millis(30)).await;
            assert_eq!(
                search.get("result").unwrap(),
                Value::from("results for rust")
            );

            search.set("query", "tokio").unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;

            let results: Vec<Value> = seen.borrow().iter().map(|e| e.new_value.clone()).collect();
            assert_eq!(
                results,
                vec![
                    Value::from("results for rust"),
                    Value::from("results for tokio")
                ]
            );
        })
        .await;
}
