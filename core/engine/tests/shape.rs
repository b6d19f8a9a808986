//! Composition-rule coverage over the checked-in fixture trees.

#![allow(unused_crate_dependencies, missing_docs)]

mod common;

use common::{assets_dir, eval_bool, eval_number, eval_string, instance};
use slothlet_engine::{ApiMode, Mode, Slothlet, SlothletError};

#[test]
fn same_named_file_flattens_into_its_folder() {
    let mut api = instance("basic_api", Mode::Eager);

    assert_eq!(eval_number(&mut api, "api.math.add(2, 3)"), 5.0);
    assert_eq!(eval_string(&mut api, "api.string.upper('abc')"), "ABC");
    // R1: the intermediate `math.math` property does not exist.
    assert_eq!(eval_string(&mut api, "typeof api.math.math"), "undefined");
}

#[test]
fn multi_default_category_mounts_each_default() {
    let mut api = instance("basic_api", Mode::Eager);

    assert_eq!(
        eval_string(&mut api, "api.multi_defaults.key('ENTER')"),
        "key:ENTER"
    );
    assert_eq!(eval_string(&mut api, "api.multi_defaults.power(true)"), "on");
    // The folder property comes from the filename, so `volume`, not
    // `setVolume`; the default itself stays callable with its named exports
    // attached.
    assert_eq!(
        eval_string(&mut api, "typeof api.multi_defaults.setVolume"),
        "undefined"
    );
    assert_eq!(
        eval_string(&mut api, "typeof api.multi_defaults.volume"),
        "function"
    );
    assert_eq!(eval_string(&mut api, "api.multi_defaults.volume(3)"), "volume:3");
    assert_eq!(eval_string(&mut api, "api.multi_defaults.volume.up(1)"), "up:1");
    assert_eq!(
        eval_string(&mut api, "api.multi_defaults.key.isModifier('SHIFT')"),
        "true"
    );
    // An export binding whose value carries a different code-level function
    // name mounts under that name, even beside the real default.
    assert_eq!(
        eval_string(&mut api, "typeof api.multi_defaults.volume.stepper"),
        "undefined"
    );
    assert_eq!(
        eval_string(&mut api, "api.multi_defaults.volume.adjust(2)"),
        "adjust:2"
    );
}

#[test]
fn function_name_preference_applies_beside_a_real_default() {
    let mut api = instance("basic_api", Mode::Eager);

    // R2: the own file has a callable default, so its named exports merge
    // onto the folder callable; `blend` is bound to a function named
    // `crossfade`, and the internal name wins.
    assert_eq!(eval_string(&mut api, "api.mixer(5)"), "mix:5");
    assert_eq!(eval_string(&mut api, "typeof api.mixer.blend"), "undefined");
    assert_eq!(eval_string(&mut api, "api.mixer.crossfade('a', 'b')"), "a~b");
    assert_eq!(eval_number(&mut api, "api.mixer.gain(3)"), 6.0);
}

#[test]
fn named_only_siblings_contribute_their_exports() {
    let mut api = instance("basic_api", Mode::Eager);

    assert_eq!(eval_string(&mut api, "api.util.pad('x', 3)"), "  x");
    assert_eq!(eval_number(&mut api, "api.util.clamp(5, 0, 3)"), 3.0);
}

#[test]
fn fallback_nested_object() {
    let mut api = instance("basic_api", Mode::Eager);
    assert_eq!(eval_string(&mut api, "api.nested.inner.ping()"), "pong");
}

#[test]
fn self_referential_default_acts_as_named_export() {
    let mut api = instance("basic_api", Mode::Eager);
    assert_eq!(eval_string(&mut api, "api.selfref.hammer('n')"), "bang:n");
    assert_eq!(eval_string(&mut api, "typeof api.selfref.tools"), "undefined");
}

#[test]
fn primitive_default_mounts_as_scalar_with_named_alongside() {
    let mut api = instance("basic_api", Mode::Eager);
    assert_eq!(eval_string(&mut api, "api.primitive.version"), "1.2.3");
    assert_eq!(eval_number(&mut api, "api.primitive.parse('1.2.3')[0]"), 1.0);
}

#[test]
fn same_name_file_merges_beside_siblings() {
    let mut api = instance("same_name_api", Mode::Eager);

    assert_eq!(eval_string(&mut api, "api.color.hex(255)"), "#0000ff");
    assert_eq!(eval_number(&mut api, "api.color.rgb(1, 2, 3)"), 66051.0);
    assert_eq!(
        eval_string(&mut api, "api.color.palette.warm()[0]"),
        "#ff0000"
    );
}

#[test]
fn root_function_module_makes_the_api_callable() {
    let mut api = instance("callable_root", Mode::Eager);

    assert_eq!(eval_string(&mut api, "typeof api"), "function");
    assert_eq!(eval_string(&mut api, "api('World')"), "Hello, World!");
    assert_eq!(
        eval_string(&mut api, "api.rootFunctionShout('World')"),
        "HELLO, WORLD!"
    );
}

#[test]
fn api_mode_object_demotes_a_callable_root() {
    let mut api = Slothlet::builder(assets_dir("callable_root"))
        .mode(Mode::Eager)
        .api_mode(ApiMode::Object)
        .build()
        .expect("fixture tree should load");
    api.expose_global("api").expect("global registration");

    assert_eq!(eval_string(&mut api, "typeof api"), "object");
    assert_eq!(eval_string(&mut api, "api.greet('World')"), "Hello, World!");
    assert_eq!(
        eval_string(&mut api, "api.rootFunctionShout('World')"),
        "HELLO, WORLD!"
    );
}

#[test]
fn api_mode_function_requires_a_callable_root() {
    let result = Slothlet::builder(assets_dir("basic_api"))
        .mode(Mode::Eager)
        .api_mode(ApiMode::Function)
        .build();
    assert!(matches!(result, Err(SlothletError::Config(_))));
}

#[test]
fn sanitization_collisions_are_rejected() {
    let result = Slothlet::builder(assets_dir("collision_api"))
        .mode(Mode::Eager)
        .build();
    match result {
        Err(SlothletError::NameCollision { name, .. }) => assert_eq!(name, "aB"),
        other => panic!("expected a name collision, got {other:?}"),
    }
}

#[test]
fn every_callable_carries_its_dotted_path() {
    let mut api = instance("basic_api", Mode::Eager);

    assert_eq!(
        eval_string(&mut api, "api.math.add.__slothletPath"),
        "math.add"
    );
    assert_eq!(
        eval_string(&mut api, "api.multi_defaults.volume.__slothletPath"),
        "multi_defaults.volume"
    );
    assert_eq!(eval_string(&mut api, "api.__slothletPath"), "");
}

#[test]
fn underscore_files_are_ignored() {
    let mut api = instance("basic_api", Mode::Eager);
    assert_eq!(eval_string(&mut api, "typeof api.math.scratch"), "undefined");
    assert!(!eval_bool(&mut api, "Object.keys(api.math).includes('nope')"));
}

#[test]
fn api_depth_caps_folder_recursion() {
    let mut api = Slothlet::builder(assets_dir("basic_api"))
        .mode(Mode::Eager)
        .api_depth(1)
        .build()
        .expect("fixture tree should load");
    api.expose_global("api").expect("global registration");

    assert_eq!(eval_string(&mut api, "typeof api.nested"), "object");
    assert_eq!(eval_string(&mut api, "typeof api.nested.inner"), "undefined");
    // Depth 1 still includes the root's direct folders.
    assert_eq!(eval_number(&mut api, "api.math.add(1, 1)"), 2.0);
}

#[test]
fn metadata_names_the_source_file() {
    let mut api = instance("basic_api", Mode::Eager);
    assert_eq!(
        eval_string(&mut api, "api.math.add.__metadata.sourceFile"),
        "math/math.mjs"
    );
    assert_eq!(
        eval_string(&mut api, "api.math.add.__sourceFolder"),
        "math"
    );
}
