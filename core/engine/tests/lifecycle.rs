//! Instance lifecycle: dynamic sub-APIs, hot reload, metadata guarding,
//! describe and shutdown.

#![allow(unused_crate_dependencies, missing_docs)]

mod common;

use common::{assets_dir, copy_tree, eval_bool, eval_number, eval_string, instance};
use indoc::indoc;
use slothlet_engine::{
    AddApiOptions, Mode, RemoveApi, Slothlet, SlothletError,
};

#[test]
fn add_api_attaches_a_sub_tree_with_metadata() {
    let mut api = instance("basic_api", Mode::Eager);

    api.add_api(
        "widgets",
        assets_dir("addon_api/widgets"),
        serde_json::json!({ "team": "ui" }),
        AddApiOptions::default(),
    )
    .expect("add_api should succeed");

    assert_eq!(
        eval_string(&mut api, "api.widgets.create('btn').kind"),
        "btn"
    );
    assert_eq!(eval_string(&mut api, "api.widgets.extra()"), "extra");
    assert_eq!(eval_string(&mut api, "api.widgets.__metadata.team"), "ui");
}

#[test]
fn add_api_respects_ownership_boundaries() {
    let mut api = Slothlet::builder(assets_dir("basic_api"))
        .mode(Mode::Eager)
        .allow_api_overwrite(false)
        .build()
        .expect("fixture tree should load");

    let result = api.add_api(
        "math",
        assets_dir("addon_api/widgets"),
        serde_json::Value::Null,
        AddApiOptions::default(),
    );
    assert!(matches!(result, Err(SlothletError::OwnershipDenied { .. })));
}

#[test]
fn force_overwrite_requires_hot_reload() {
    let mut api = instance("basic_api", Mode::Eager);
    let result = api.add_api(
        "math",
        assets_dir("addon_api/widgets"),
        serde_json::Value::Null,
        AddApiOptions {
            force_overwrite: true,
            module_id: None,
        },
    );
    assert!(matches!(result, Err(SlothletError::Config(_))));
}

#[test]
fn remove_api_detaches_by_module_id() {
    let mut api = instance("basic_api", Mode::Eager);
    api.add_api(
        "widgets",
        assets_dir("addon_api/widgets"),
        serde_json::Value::Null,
        AddApiOptions {
            force_overwrite: false,
            module_id: Some("widgets-pack".into()),
        },
    )
    .expect("add_api should succeed");
    assert_eq!(eval_string(&mut api, "typeof api.widgets"), "object");

    api.remove_api(&RemoveApi::ModuleId("widgets-pack".into()))
        .expect("remove_api should succeed");
    assert_eq!(eval_string(&mut api, "typeof api.widgets"), "undefined");
}

#[test]
fn reload_requires_the_hot_reload_flag() {
    let mut api = instance("basic_api", Mode::Eager);
    assert!(matches!(
        api.reload(None),
        Err(SlothletError::Config(_))
    ));
}

#[test]
fn hot_reload_rebuilds_in_place_and_preserves_the_outer_reference() {
    let dir = tempfile::tempdir().expect("temp dir");
    copy_tree(&assets_dir("reload_api"), dir.path());

    let mut api = Slothlet::builder(dir.path())
        .mode(Mode::Eager)
        .hot_reload(true)
        .build()
        .expect("fixture tree should load");
    api.expose_global("api").expect("global registration");

    assert_eq!(eval_number(&mut api, "api.counter.value()"), 1.0);
    assert!(eval_bool(&mut api, "globalThis.before = api; true"));

    std::fs::write(
        dir.path().join("counter/counter.mjs"),
        indoc! {r"
            export default {
                value() {
                    return 2;
                },
            };
        "},
    )
    .expect("rewrite fixture");

    api.reload(None).expect("reload should succeed");

    assert_eq!(eval_number(&mut api, "api.counter.value()"), 2.0);
    // The outer reference is mutated, not replaced.
    assert!(eval_bool(&mut api, "before === api"));
}

#[test]
fn reload_replays_dynamic_extensions() {
    let dir = tempfile::tempdir().expect("temp dir");
    copy_tree(&assets_dir("reload_api"), dir.path());

    let mut api = Slothlet::builder(dir.path())
        .mode(Mode::Eager)
        .hot_reload(true)
        .build()
        .expect("fixture tree should load");
    api.expose_global("api").expect("global registration");

    api.add_api(
        "widgets",
        assets_dir("addon_api/widgets"),
        serde_json::Value::Null,
        AddApiOptions::default(),
    )
    .expect("add_api should succeed");

    api.reload(None).expect("reload should succeed");
    assert_eq!(eval_string(&mut api, "api.widgets.extra()"), "extra");
}

#[test]
fn metadata_fields_are_write_once() {
    let mut api = instance("basic_api", Mode::Eager);

    // Assignment over an existing field is a silent no-op.
    eval_string(
        &mut api,
        "api.math.add.__metadata.sourceFile = 'forged.mjs'; 'ok'",
    );
    assert_eq!(
        eval_string(&mut api, "api.math.add.__metadata.sourceFile"),
        "math/math.mjs"
    );

    // Explicit redefinition is an error.
    assert!(api
        .eval("Object.defineProperty(api.math.add.__metadata, 'sourceFile', { value: 'x' })")
        .is_err());

    // Deletion is rejected: the trap answers false, and the field stays.
    assert!(!eval_bool(
        &mut api,
        "delete api.math.add.__metadata.sourceFile"
    ));
    assert_eq!(
        eval_string(&mut api, "api.math.add.__metadata.sourceFile"),
        "math/math.mjs"
    );

    // New fields are accepted, then freeze.
    eval_string(&mut api, "api.math.add.__metadata.note = 'hi'; 'ok'");
    assert_eq!(eval_string(&mut api, "api.math.add.__metadata.note"), "hi");
    eval_string(&mut api, "api.math.add.__metadata.note = 'changed'; 'ok'");
    assert_eq!(eval_string(&mut api, "api.math.add.__metadata.note"), "hi");
}

#[test]
fn describe_enumerates_reachable_paths() {
    let mut api = instance("basic_api", Mode::Eager);
    let tree = api.describe().expect("describe should succeed");

    assert_eq!(tree.path, "");
    assert_eq!(tree.kind, "object");
    let math = tree
        .children
        .iter()
        .find(|node| node.path == "math")
        .expect("math should be described");
    assert!(math
        .children
        .iter()
        .any(|node| node.path == "math.add" && node.kind == "function"));
}

#[test]
fn describe_reports_unresolved_placeholders_without_loading_them() {
    let mut api = instance("basic_api", Mode::Lazy);
    let tree = api.describe().expect("describe should succeed");

    let math = tree
        .children
        .iter()
        .find(|node| node.path == "math")
        .expect("math should be described");
    assert_eq!(math.kind, "placeholder");

    // The walk must not have materialized anything.
    assert!(eval_bool(&mut api, "api.math.__slothletPlaceholder"));
}

#[test]
fn management_methods_are_not_enumerable() {
    let mut api = instance("basic_api", Mode::Eager);
    assert!(!eval_bool(
        &mut api,
        "Object.keys(api).includes('shutdown')"
    ));
    assert_eq!(eval_string(&mut api, "typeof api.shutdown"), "function");
    assert_eq!(eval_string(&mut api, "typeof api.describe"), "function");
}

#[test]
fn shutdown_is_idempotent_and_blocks_further_calls() {
    let mut api = instance("basic_api", Mode::Eager);

    api.shutdown().expect("first shutdown");
    api.shutdown().expect("second shutdown is a no-op");

    assert!(matches!(
        api.call("math.add", &[1.into(), 2.into()]),
        Err(SlothletError::Lifecycle(_))
    ));
    // Wrapped callables refuse to run after shutdown.
    assert!(api.eval("api.math.add(1, 2)").is_err());
}

#[test]
fn shutdown_removes_management_methods() {
    let mut api = instance("basic_api", Mode::Eager);
    api.shutdown().expect("shutdown");
    assert_eq!(eval_string(&mut api, "typeof api.shutdown"), "undefined");
}

#[test]
fn instances_deregister_on_shutdown() {
    let before = slothlet_engine::live_instances();
    let mut api = instance("basic_api", Mode::Eager);
    assert_eq!(slothlet_engine::live_instances(), before + 1);
    api.shutdown().expect("shutdown");
    assert_eq!(slothlet_engine::live_instances(), before);
}
