//! Determinism of the parallel diff path: forcing the size threshold low
//! (worker pool) versus high (inline) must yield byte-identical commits.

use weft_testing::{ops, TestHarness};

use weft_core::{Effect, Element, Registry, RuntimeConfig};

fn parallel_config() -> RuntimeConfig {
    RuntimeConfig {
        parallel_threshold: 1,
        workers: 4,
        ..RuntimeConfig::default()
    }
}

fn sequential_config() -> RuntimeConfig {
    RuntimeConfig {
        parallel_threshold: usize::MAX,
        workers: 1,
        ..RuntimeConfig::default()
    }
}

fn row(key: usize, value: i64) -> Element {
    Element::new("row")
        .key(format!("k{key}"))
        .prop("value", value)
        .child(Element::new("text").prop("label", value).build())
        .build()
}

fn initial_tree() -> Element {
    Element::new("list")
        .children((0..30).map(|i| row(i, i as i64)))
        .build()
}

fn mutated_tree() -> Element {
    // Reverse a block, drop a few rows, change some props, add fresh rows.
    let mut rows: Vec<Element> = Vec::new();
    for i in (10..20).rev() {
        rows.push(row(i, i as i64));
    }
    for i in 0..10 {
        rows.push(row(i, if i % 3 == 0 { 100 + i as i64 } else { i as i64 }));
    }
    for i in 25..30 {
        rows.push(row(i, i as i64));
    }
    for i in 40..44 {
        rows.push(row(i, i as i64));
    }
    Element::new("list").children(rows).build()
}

#[test]
fn threshold_does_not_change_the_effect_stream() {
    let mut parallel = TestHarness::with_config(Registry::builder().build(), parallel_config());
    let mut sequential =
        TestHarness::with_config(Registry::builder().build(), sequential_config());

    let mounted_parallel = parallel.mount(initial_tree());
    let mounted_sequential = sequential.mount(initial_tree());
    assert_eq!(mounted_parallel, mounted_sequential);

    let diffed_parallel = parallel.set_root(mutated_tree());
    let diffed_sequential = sequential.set_root(mutated_tree());
    assert_eq!(diffed_parallel, diffed_sequential);

    // The mutation exercised every effect kind.
    let kinds = ops(&diffed_parallel);
    for kind in ["create", "update", "delete", "move"] {
        assert!(kinds.contains(&kind), "expected a {kind} effect");
    }

    assert_eq!(parallel.batches(), sequential.batches());
}

#[test]
fn parallel_mount_allocates_unique_ids_parent_first() {
    let mut harness = TestHarness::with_config(Registry::builder().build(), parallel_config());
    let effects = harness.mount(initial_tree());
    // list + 30 rows + 30 texts
    assert_eq!(effects.len(), 61);
    let mut seen = std::collections::HashSet::new();
    for effect in &effects {
        match effect {
            Effect::Create { node, parent, .. } => {
                assert!(seen.insert(*node), "duplicate id {node:?}");
                if let Some(parent) = parent {
                    assert!(seen.contains(parent), "child created before its parent");
                }
            }
            other => panic!("expected create, got {other:?}"),
        }
    }
}

#[test]
fn large_keyed_rotation_stays_move_only_under_parallelism() {
    let list = |keys: &[usize]| {
        Element::new("list")
            .children(keys.iter().map(|&key| row(key, key as i64)))
            .build()
    };
    let forward: Vec<usize> = (0..24).collect();
    let mut rotated = forward.clone();
    rotated.rotate_left(1);

    let mut harness = TestHarness::with_config(Registry::builder().build(), parallel_config());
    harness.mount(list(&forward));
    let effects = harness.set_root(list(&rotated));
    assert!(
        effects
            .iter()
            .all(|effect| matches!(effect, Effect::Move { .. })),
        "rotation must not create or delete: {effects:?}"
    );
    // Rotating left moves the old head to the back; everything else keeps
    // its relative order.
    assert_eq!(effects.len(), 1);
    match &effects[0] {
        Effect::Move { index, .. } => assert_eq!(*index, 23),
        other => panic!("expected move, got {other:?}"),
    }
}
