//! Context propagation: live bindings, overlays, async continuations,
//! emitter listeners and instance isolation.

#![allow(unused_crate_dependencies, missing_docs)]

mod common;

use common::{assets_dir, eval_number, eval_string, settle};
use slothlet_engine::{Mode, RuntimeKind, Slothlet, SlothletInstance};

fn ctx_instance(user: &str, mode: Mode) -> SlothletInstance {
    let mut api = Slothlet::builder(assets_dir("ctx_api"))
        .mode(mode)
        .context(serde_json::json!({ "user": user }))
        .build()
        .expect("fixture tree should load");
    api.expose_global("api").expect("global registration");
    api
}

#[test]
fn modules_read_the_instance_context() {
    let mut api = ctx_instance("alice", Mode::Eager);
    assert_eq!(eval_string(&mut api, "api.user.whoami()"), "alice");
}

#[test]
fn context_survives_await_boundaries() {
    let mut api = ctx_instance("alice", Mode::Eager);
    let promise = api
        .call("user.whoamiLater", &[])
        .expect("call should succeed");
    let value = settle(&mut api, promise);
    let value = value
        .to_string(api.context_mut())
        .expect("string conversion")
        .to_std_string_escaped();
    assert_eq!(value, "alice");
}

#[test]
fn per_request_overlay_merges_over_the_instance_context() {
    let mut api = ctx_instance("alice", Mode::Eager);

    let tagged = api
        .call_with_overlay(
            "user.tagged",
            &[boa_engine::js_string!("req").into()],
            &serde_json::json!({ "user": "bob" }),
        )
        .expect("overlay call should succeed");
    let tagged = tagged
        .to_string(api.context_mut())
        .expect("string conversion")
        .to_std_string_escaped();
    assert_eq!(tagged, "req:bob");

    // The overlay does not leak into later calls.
    assert_eq!(eval_string(&mut api, "api.user.tagged('req')"), "req:alice");
}

#[test]
fn concurrent_instances_observe_their_own_context() {
    let mut alice = ctx_instance("alice", Mode::Eager);
    let mut bob = ctx_instance("bob", Mode::Eager);

    // Interleave calls between the two instances.
    assert_eq!(eval_string(&mut alice, "api.user.whoami()"), "alice");
    assert_eq!(eval_string(&mut bob, "api.user.whoami()"), "bob");
    assert_eq!(eval_string(&mut alice, "api.user.tagged('x')"), "x:alice");
    assert_eq!(eval_string(&mut bob, "api.user.tagged('x')"), "x:bob");
}

#[test]
fn emitter_listeners_restore_their_registration_frame() {
    let mut api = ctx_instance("alice", Mode::Eager);

    eval_string(&mut api, "globalThis.socket = new EventEmitter(); 'ok'");
    // Registration happens inside a wrapped call, so the frame is captured.
    eval_string(&mut api, "api.events.tap(socket); 'ok'");
    // The emit fires outside any frame; the listener still sees the
    // registration-time context.
    eval_string(&mut api, "socket.emit('data'); 'ok'");
    assert_eq!(eval_string(&mut api, "api.events.lastSeen()"), "alice");
}

#[test]
fn live_instance_runtime_propagates_too() {
    let mut api = Slothlet::builder(assets_dir("ctx_api"))
        .mode(Mode::Eager)
        .runtime(RuntimeKind::LiveInstance)
        .context(serde_json::json!({ "user": "carol" }))
        .build()
        .expect("fixture tree should load");
    api.expose_global("api").expect("global registration");

    assert_eq!(eval_string(&mut api, "api.user.whoami()"), "carol");
}

#[test]
fn self_binding_reaches_sibling_modules() {
    let mut api = ctx_instance("alice", Mode::Eager);
    assert_eq!(eval_number(&mut api, "api.calc.double(21)"), 42.0);
}
