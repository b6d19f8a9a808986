//! Lazy materialization: placeholders, in-place resolution, shape parity
//! with eager builds, and load-failure propagation.

#![allow(unused_crate_dependencies, missing_docs)]

mod common;

use common::{assets_dir, eval_bool, eval_number, eval_string, instance};
use slothlet_engine::{Mode, Slothlet};

#[test]
fn placeholders_resolve_on_first_use_and_keep_identity() {
    let mut api = instance("basic_api", Mode::Lazy);

    assert!(eval_bool(&mut api, "api.math.__slothletPlaceholder"));
    // Capture the placeholder before it resolves; it must *become* the node.
    assert!(eval_bool(
        &mut api,
        "globalThis.before = api.math; before === api.math"
    ));

    assert_eq!(eval_number(&mut api, "api.math.add(1, 2)"), 3.0);
    assert!(!eval_bool(&mut api, "api.math.__slothletPlaceholder"));
    assert!(eval_bool(&mut api, "before === api.math"));
    assert_eq!(eval_number(&mut api, "before.add(2, 2)"), 4.0);
}

#[test]
fn resolved_placeholder_enumerates_the_same_keys_as_eager() {
    let mut eager = instance("basic_api", Mode::Eager);
    let mut lazy = instance("basic_api", Mode::Lazy);

    for path in ["math", "string", "util", "multi_defaults", "selfref", "mixer"] {
        let keys = format!("Object.keys(api.{path}).sort().join(',')");
        // Touch the lazy sub-tree first so it materializes.
        let touch = format!("void api.{path}.__doesNotExist");
        eval_string(&mut lazy, &touch);
        assert_eq!(
            eval_string(&mut lazy, &keys),
            eval_string(&mut eager, &keys),
            "key mismatch at {path}"
        );
    }
}

#[test]
fn placeholder_paths_are_known_before_resolution() {
    let mut api = instance("basic_api", Mode::Lazy);
    assert_eq!(eval_string(&mut api, "api.math.__slothletPath"), "math");
    // Reading the path must not have materialized the placeholder.
    assert!(eval_bool(&mut api, "api.math.__slothletPlaceholder"));
}

#[test]
fn load_failures_surface_at_the_triggering_access_and_stick() {
    let mut api = Slothlet::builder(assets_dir("collision_api"))
        .mode(Mode::Lazy)
        .build()
        .expect("collisions are deferred in lazy mode");
    api.expose_global("api").expect("global registration");

    let first = api.eval("api.dup.anything");
    let message = first.expect_err("collision must fail the access").to_string();
    assert!(message.contains("aB"), "unexpected message: {message}");

    // Subsequent accesses re-throw instead of retrying.
    let second = api.eval("api.dup.anything");
    assert!(second.is_err());
}

#[test]
fn calls_through_unresolved_placeholders_work() {
    let mut api = Slothlet::builder(assets_dir("ctx_api"))
        .mode(Mode::Lazy)
        .context(serde_json::json!({ "user": "alice" }))
        .build()
        .expect("fixture tree should load");
    api.expose_global("api").expect("global registration");

    // `calc.double` resolves `self.math` through a second placeholder while
    // the first call is still on the stack.
    assert_eq!(eval_number(&mut api, "api.calc.double(4)"), 8.0);
}

#[test]
fn lazy_and_eager_agree_on_call_results() {
    let mut eager = instance("basic_api", Mode::Eager);
    let mut lazy = instance("basic_api", Mode::Lazy);

    for script in [
        "api.math.add(2, 3)",
        "api.string.reverse('abc')",
        "api.multi_defaults.volume.up(2)",
        "api.util.pad('x', 4)",
    ] {
        assert_eq!(
            eval_string(&mut lazy, script),
            eval_string(&mut eager, script),
            "result mismatch for {script}"
        );
    }
}
