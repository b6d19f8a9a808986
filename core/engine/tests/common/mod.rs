//! Shared fixtures and evaluation helpers for the integration suites.

// Not every suite uses every helper.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use boa_engine::builtins::promise::PromiseState;
use boa_engine::object::builtins::JsPromise;
use boa_engine::JsValue;
use slothlet_engine::{Mode, Slothlet, SlothletInstance};

/// Path of a checked-in fixture tree.
pub fn assets_dir(tree: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/assets")
        .join(tree)
}

/// Builds an instance over a fixture tree and exposes its root as `api`.
pub fn instance(tree: &str, mode: Mode) -> SlothletInstance {
    let mut api = Slothlet::builder(assets_dir(tree))
        .mode(mode)
        .build()
        .expect("fixture tree should load");
    api.expose_global("api").expect("global registration");
    api
}

pub fn eval_string(api: &mut SlothletInstance, src: &str) -> String {
    let value = api.eval(src).expect("script should evaluate");
    value
        .to_string(api.context_mut())
        .expect("string conversion")
        .to_std_string_escaped()
}

pub fn eval_number(api: &mut SlothletInstance, src: &str) -> f64 {
    let value = api.eval(src).expect("script should evaluate");
    value.to_number(api.context_mut()).expect("number conversion")
}

pub fn eval_bool(api: &mut SlothletInstance, src: &str) -> bool {
    api.eval(src).expect("script should evaluate").to_boolean()
}

/// Awaits a settled promise value, panicking on rejection or pending state.
pub fn settle(api: &mut SlothletInstance, value: JsValue) -> JsValue {
    let object = value
        .as_object()
        .cloned()
        .expect("expected a promise object");
    let promise = JsPromise::from_object(object).expect("expected a promise");
    match promise.state() {
        PromiseState::Fulfilled(v) => v,
        PromiseState::Rejected(reason) => panic!("promise rejected: {}", reason.display()),
        PromiseState::Pending => panic!("promise did not settle"),
    }
}

/// Recursively copies a fixture tree, for tests that mutate sources.
pub fn copy_tree(src: &Path, dst: &Path) {
    std::fs::create_dir_all(dst).expect("create target dir");
    for entry in std::fs::read_dir(src).expect("read fixture dir") {
        let entry = entry.expect("fixture entry");
        let target = dst.join(entry.file_name());
        if entry.path().is_dir() {
            copy_tree(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), &target).expect("copy fixture file");
        }
    }
}
