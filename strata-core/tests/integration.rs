//! Integration Tests for the Context Engine
//!
//! These tests drive lookups, computed bindings, trackers and activation
//! together through the public API.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;

use strata_core::inject::{Descriptor, Injector};
use strata_core::{Context, ContextConfig, ContextError, NeutralValueMap, Slot, Value, WeakRegistry};

fn counter() -> Arc<AtomicI32> {
    Arc::new(AtomicI32::new(0))
}

/// Register a tracker on `context` that reads `key` and counts its runs.
fn track(context: &Context, key: &'static str, runs: &Arc<AtomicI32>) {
    let runs = runs.clone();
    context
        .run_and_track(move |ctx| {
            runs.fetch_add(1, Ordering::SeqCst);
            ctx.get(key)?;
            Ok(true)
        })
        .unwrap();
}

fn sum(ctx: &Context, _key: &str) -> strata_core::Result<Slot<Value>> {
    let x = ctx.get_as::<i64>("x")?.unwrap_or(0);
    let y = ctx.get_as::<i64>("y")?.unwrap_or(0);
    Ok(Slot::Present(Value::new(x + y)))
}

#[test]
fn child_without_binding_sees_parent_value() {
    let root = Context::create();
    let middle = root.create_child().unwrap();
    let leaf = middle.create_child().unwrap();
    root.set("theme", Value::new("dark")).unwrap();
    middle.set("layout", None).unwrap();

    for key in ["theme", "layout", "missing"] {
        assert_eq!(leaf.lookup(key).unwrap(), middle.lookup(key).unwrap());
    }
    assert_eq!(leaf.get_as::<&str>("theme").unwrap(), Some("dark"));
}

#[test]
fn parent_write_reaches_descendant_computation_once() {
    let runs = counter();
    let root = Context::create();
    let child = root.create_child().unwrap();
    root.set("x", Value::new(1_i64)).unwrap();
    child.set_function("sum", sum).unwrap();
    track(&child, "sum", &runs);
    assert_eq!(child.get_as::<i64>("sum").unwrap(), Some(1));

    root.set("x", Value::new(2_i64)).unwrap();
    assert_eq!(child.get_as::<i64>("sum").unwrap(), Some(2));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn equal_write_triggers_no_rerun() {
    let runs = counter();
    let root = Context::create();
    root.set("k", Value::new(String::from("v"))).unwrap();
    track(&root, "k", &runs);

    root.set("k", Value::new(String::from("v"))).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn computed_value_equal_after_change_triggers_no_rerun() {
    let runs = counter();
    let root = Context::create();
    root.set("x", Value::new(2_i64)).unwrap();
    root.set_function("parity", |ctx, _| {
        let x = ctx.get_as::<i64>("x")?.unwrap_or(0);
        Ok(Slot::Present(Value::new(x % 2)))
    })
    .unwrap();
    track(&root, "parity", &runs);

    root.set("x", Value::new(4_i64)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    root.set("x", Value::new(5_i64)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn reparenting_reruns_only_when_value_differs() {
    let runs = counter();
    let first = Context::create();
    let same = Context::create();
    let different = Context::create();
    first.set("k", Value::new(1)).unwrap();
    same.set("k", Value::new(1)).unwrap();
    different.set("k", Value::new(2)).unwrap();

    let child = first.create_child().unwrap();
    track(&child, "k", &runs);

    child.set_parent(Some(&first)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    child.set_parent(Some(&same)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    child.set_parent(Some(&different)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(child.get_as::<i32>("k").unwrap(), Some(2));

    // The old chain no longer wakes the tracker.
    same.set("k", Value::new(3)).unwrap();
    first.set("k", Value::new(3)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn invalidated_computation_leaves_no_listeners() {
    let root = Context::create();
    let window = root.create_named_child("window").unwrap();
    let part = window.create_named_child("part").unwrap();
    root.set("x", Value::new(3_i64)).unwrap();
    root.set("y", Value::new(4_i64)).unwrap();
    window.set_function("sum", sum).unwrap();

    assert_eq!(part.get_as::<i64>("sum").unwrap(), Some(7));
    assert!(part.listener_count() > 0);
    assert!(root.listener_count() > 0);

    window.set("sum", None).unwrap();
    for context in [&root, &window, &part] {
        assert_eq!(context.listener_count(), 0, "{context} still has listeners");
    }
    assert_eq!(part.lookup("sum").unwrap(), Slot::Null);
}

#[test]
fn invalidated_chain_of_computations_leaves_no_listeners() {
    let root = Context::create();
    let window = root.create_named_child("window").unwrap();
    let part = window.create_named_child("part").unwrap();
    root.set("x", Value::new(1_i64)).unwrap();
    root.set("y", Value::new(2_i64)).unwrap();
    window.set_function("sum", sum).unwrap();
    part.set_function("total", |ctx, _| {
        let sum = ctx.get_as::<i64>("sum")?.unwrap_or(0);
        Ok(Slot::Present(Value::new(sum * 10)))
    })
    .unwrap();

    assert_eq!(part.get_as::<i64>("total").unwrap(), Some(30));

    window.set("sum", None).unwrap();
    for context in [&root, &window, &part] {
        assert_eq!(context.listener_count(), 0, "{context} still has listeners");
    }

    assert_eq!(part.get_as::<i64>("total").unwrap(), Some(0));
    window.set("sum", Value::new(4_i64)).unwrap();
    assert_eq!(part.get_as::<i64>("total").unwrap(), Some(40));
}

#[test]
fn reparenting_revalidates_computations_through_the_old_chain() {
    let runs = counter();
    let double = |ctx: &Context, _: &str| {
        let x = ctx.get_as::<i64>("x")?.unwrap_or(0);
        Ok(Slot::Present(Value::new(x * 2)))
    };
    let first = Context::create_named("first");
    let same = Context::create_named("same");
    let different = Context::create_named("different");
    for (root, x) in [(&first, 1_i64), (&same, 1), (&different, 2)] {
        root.set("x", Value::new(x)).unwrap();
        root.set_function("double", double).unwrap();
    }

    let middle = first.create_named_child("middle").unwrap();
    let leaf = middle.create_named_child("leaf").unwrap();
    track(&leaf, "double", &runs);
    assert_eq!(leaf.get_as::<i64>("double").unwrap(), Some(2));

    middle.set_parent(Some(&same)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(first.listener_count(), 0);

    middle.set_parent(Some(&different)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(leaf.get_as::<i64>("double").unwrap(), Some(4));
    assert_eq!(same.listener_count(), 0);
}

#[test]
fn reparenting_keeps_computation_held_below_the_moved_context() {
    let runs = counter();
    let first = Context::create();
    let same = Context::create();
    let different = Context::create();
    first.set("x", Value::new(3_i64)).unwrap();
    same.set("x", Value::new(3_i64)).unwrap();
    different.set("x", Value::new(5_i64)).unwrap();

    let middle = first.create_child().unwrap();
    let leaf = middle.create_child().unwrap();
    middle
        .set_function("scaled", |ctx, _| {
            let x = ctx.get_as::<i64>("x")?.unwrap_or(0);
            Ok(Slot::Present(Value::new(x * 10)))
        })
        .unwrap();
    track(&leaf, "scaled", &runs);

    middle.set_parent(Some(&same)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(first.listener_count(), 0);

    middle.set_parent(Some(&different)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(leaf.get_as::<i64>("scaled").unwrap(), Some(50));
}

#[test]
fn tracker_recovers_after_its_provider_failed() {
    let runs = counter();
    let seen = Arc::new(AtomicI64::new(0));
    let root = Context::create();
    root.set("x", Value::new(1_i64)).unwrap();
    root.set_function("inverse", |ctx, _| {
        let x = ctx.get_as::<i64>("x")?.unwrap_or(0);
        if x == 0 {
            return Err(ContextError::callback("division by zero"));
        }
        Ok(Slot::Present(Value::new(100 / x)))
    })
    .unwrap();

    let (count, observer) = (runs.clone(), seen.clone());
    root.run_and_track(move |ctx| {
        count.fetch_add(1, Ordering::SeqCst);
        observer.store(ctx.get_as::<i64>("inverse")?.unwrap_or(-1), Ordering::SeqCst);
        Ok(true)
    })
    .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 100);

    assert!(root.set("x", Value::new(0_i64)).is_err());
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    root.set("x", Value::new(4_i64)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(seen.load(Ordering::SeqCst), 25);
}

#[test]
fn activation_chain_follows_the_branch() {
    let root = Context::create_named("root");
    let window = root.create_named_child("window").unwrap();
    let part = window.create_named_child("part").unwrap();
    let leaf = part.create_named_child("leaf").unwrap();

    leaf.activate_branch().unwrap();
    assert_eq!(root.active_leaf(), leaf);

    part.deactivate().unwrap();
    assert_eq!(root.active_leaf(), window);
    assert_eq!(part.active_child(), Some(leaf.clone()));

    leaf.activate_branch().unwrap();
    assert_eq!(root.active_leaf(), leaf);
}

#[test]
fn activate_swaps_pointer_without_touching_ancestors() {
    let root = Context::create();
    let window = root.create_child().unwrap();
    let left = window.create_child().unwrap();
    let right = window.create_child().unwrap();

    left.activate().unwrap();
    assert_eq!(window.active_child(), Some(left));
    assert_eq!(root.active_child(), None);

    right.activate().unwrap();
    assert_eq!(window.active_leaf(), right);
}

#[test]
fn neutral_map_keeps_null_apart_from_absent() {
    let map: NeutralValueMap<String, i32> = NeutralValueMap::new();
    map.put("k".to_string(), None);
    assert!(map.contains_key("k"));
    assert_eq!(map.get("k"), None);
    assert_eq!(map.put_and_get_old("k".to_string(), Some(1)), Slot::Null);

    assert_eq!(map.remove("k"), Slot::Present(1));
    assert!(!map.contains_key("k"));
    assert_eq!(map.put_and_get_old("k".to_string(), Some(2)), Slot::Absent);
}

#[test]
fn weak_registry_skips_dropped_entries_in_order() {
    let registry = WeakRegistry::new();
    let a = Arc::new("a");
    let b = Arc::new("b");
    let c = Arc::new("c");
    for item in [&a, &b, &c] {
        registry.insert(item);
    }

    let mut iter = registry.iter();
    assert_eq!(iter.next().as_deref(), Some(&"a"));
    drop(b);
    assert_eq!(iter.next().as_deref(), Some(&"c"));
    assert!(iter.remove());
    assert!(iter.next().is_none());

    assert_eq!(registry.snapshot(), vec![a]);
}

#[test]
fn sum_is_computed_per_requesting_context() {
    let root = Context::create();
    root.set_function("sum", sum).unwrap();
    let child = root.create_child().unwrap();
    child.set("x", Value::new(1_i64)).unwrap();
    child.set("y", Value::new(1_i64)).unwrap();
    assert_eq!(child.get_as::<i64>("sum").unwrap(), Some(2));

    root.set("x", Value::new(10_i64)).unwrap();
    root.set("y", Value::new(1_i64)).unwrap();
    assert_eq!(root.get_as::<i64>("sum").unwrap(), Some(11));
    assert_eq!(child.get_as::<i64>("sum").unwrap(), Some(2));

    child.remove("x").unwrap();
    assert_eq!(child.get_as::<i64>("sum").unwrap(), Some(11));
}

#[test]
fn get_active_follows_focus() {
    let runs = counter();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let root = Context::create();
    let editor = root.create_named_child("editor").unwrap();
    let outline = root.create_named_child("outline").unwrap();
    editor.set("selection", Value::new("text")).unwrap();
    outline.set("selection", Value::new("node")).unwrap();
    editor.activate_branch().unwrap();

    let (counter, log) = (runs.clone(), seen.clone());
    root.run_and_track(move |ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        log.lock().push(ctx.get_active("selection")?);
        Ok(true)
    })
    .unwrap();

    outline.set("selection", Value::new("other node")).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    outline.activate_branch().unwrap();
    editor.set("selection", Value::new("more text")).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(
        *seen.lock(),
        vec![Some(Value::new("text")), Some(Value::new("other node"))]
    );
}

#[test]
fn self_reading_provider_reports_cycle() {
    let root = Context::create();
    root.set_function("a", |ctx, _| Ok(Slot::from_option(ctx.get("b")?)))
        .unwrap();
    root.set_function("b", |ctx, _| Ok(Slot::from_option(ctx.get("a")?)))
        .unwrap();

    let err = root.get("a").unwrap_err();
    assert!(matches!(err, ContextError::Cycle { .. }));

    root.set("b", Value::new(5)).unwrap();
    assert_eq!(root.get_as::<i32>("a").unwrap(), Some(5));
}

#[test]
fn deep_provider_chain_hits_recursion_limit() {
    let config = ContextConfig {
        recursion_limit: 4,
        ..ContextConfig::default()
    };
    let root = Context::create_with_config(config).unwrap();
    for level in 0..8 {
        let next = format!("k{}", level + 1);
        root.set_function(&format!("k{level}"), move |ctx, _| {
            Ok(Slot::from_option(ctx.get(&next)?))
        })
        .unwrap();
    }

    assert!(matches!(
        root.get("k0"),
        Err(ContextError::RecursionLimit { limit: 4 })
    ));
    assert!(root.get("k6").is_ok());
}

#[test]
fn failed_provider_is_retried_on_next_lookup() {
    let calls = counter();
    let fail = Arc::new(AtomicBool::new(true));
    let root = Context::create();

    let (count, failing) = (calls.clone(), fail.clone());
    root.set_function("config", move |_, _| {
        count.fetch_add(1, Ordering::SeqCst);
        if failing.load(Ordering::SeqCst) {
            return Err(ContextError::callback("backend unavailable"));
        }
        Ok(Slot::Present(Value::new(42)))
    })
    .unwrap();

    let err = root.get("config").unwrap_err();
    assert_eq!(err.to_string(), "backend unavailable");

    fail.store(false, Ordering::SeqCst);
    assert_eq!(root.get_as::<i32>("config").unwrap(), Some(42));
    assert_eq!(root.get_as::<i32>("config").unwrap(), Some(42));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn tracker_error_is_returned_to_the_writer() {
    let healthy_runs = counter();
    let root = Context::create();
    root.set("x", Value::new(1)).unwrap();
    root.run_and_track(|ctx| {
        if ctx.get_as::<i32>("x")? == Some(2) {
            return Err(ContextError::callback("x must not be 2"));
        }
        Ok(true)
    })
    .unwrap();
    track(&root, "x", &healthy_runs);

    let err = root.set("x", Value::new(2)).unwrap_err();
    assert!(matches!(err, ContextError::Callback(_)));
    assert_eq!(healthy_runs.load(Ordering::SeqCst), 2);

    // The failing tracker still listens.
    root.set("x", Value::new(3)).unwrap();
    assert_eq!(root.tracker_count(), 2);
    assert_eq!(healthy_runs.load(Ordering::SeqCst), 3);
}

#[test]
fn tracker_stops_when_callback_returns_false() {
    let runs = counter();
    let root = Context::create();
    let count = runs.clone();
    root.run_and_track(move |ctx| {
        count.fetch_add(1, Ordering::SeqCst);
        Ok(ctx.get_as::<i32>("x")?.unwrap_or(0) < 2)
    })
    .unwrap();

    root.set("x", Value::new(1)).unwrap();
    root.set("x", Value::new(2)).unwrap();
    root.set("x", Value::new(3)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(root.tracker_count(), 0);
    assert_eq!(root.listener_count(), 0);
}

#[test]
fn disabled_short_circuit_reruns_on_every_notification() {
    let runs = counter();
    let config = ContextConfig::from_json(r#"{ "equality_short_circuit": false }"#).unwrap();
    let first = Context::create_with_config(config).unwrap();
    let second = Context::create();
    first.set("k", Value::new(1)).unwrap();
    second.set("k", Value::new(1)).unwrap();

    let child = first.create_child().unwrap();
    track(&child, "k", &runs);

    child.set_parent(Some(&second)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn unknown_config_field_is_rejected() {
    let err = ContextConfig::from_json(r#"{ "recursion": 3 }"#).unwrap_err();
    assert!(matches!(err, ContextError::Config(_)));
}

#[test]
fn injected_object_follows_its_requirements() {
    let root = Context::create();
    let view = root.create_child().unwrap();
    root.set("user", Value::new(String::from("ada"))).unwrap();

    let latest = Arc::new(parking_lot::Mutex::new(None));
    let descriptor = Descriptor::builder("Banner")
        .required("user")
        .optional("greeting")
        .build(|resolved| {
            let greeting = resolved
                .get_as::<String>("greeting")
                .unwrap_or_else(|| String::from("hello"));
            let user = resolved.get_as::<String>("user").unwrap_or_default();
            Ok(format!("{greeting} {user}"))
        });

    let sink = latest.clone();
    Injector::inject(descriptor, &view, move |banner| {
        *sink.lock() = Some((*banner).clone());
        Ok(())
    })
    .unwrap();
    assert_eq!(latest.lock().as_deref(), Some("hello ada"));

    view.set("greeting", Value::new(String::from("welcome"))).unwrap();
    assert_eq!(latest.lock().as_deref(), Some("welcome ada"));

    root.set("user", Value::new(String::from("grace"))).unwrap();
    assert_eq!(latest.lock().as_deref(), Some("welcome grace"));
}
