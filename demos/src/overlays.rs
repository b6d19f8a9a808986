//! Lazy mode plus per-request context overlays.
//!
//! One module reads the live `context` binding; the embedder threads a
//! request-scoped overlay through a single call chain without mutating the
//! instance default.

#![allow(clippy::print_stdout, missing_docs)]

use std::fs;

use slothlet_engine::{Mode, Slothlet, SlothletResult};

fn main() -> SlothletResult<()> {
    let dir = tempfile::tempdir().expect("temp dir");

    fs::create_dir_all(dir.path().join("who")).expect("mkdir");
    fs::write(
        dir.path().join("who/who.mjs"),
        r#"import { context } from "slothlet";

export default {
    ami() {
        return context.user;
    },
};
"#,
    )
    .expect("write module");

    let mut api = Slothlet::builder(dir.path())
        .mode(Mode::Lazy)
        .context(serde_json::json!({ "user": "default-user" }))
        .build()?;

    let plain = api.call("who.ami", &[])?;
    println!("who.ami() = {}", plain.display());

    let overlaid = api.call_with_overlay(
        "who.ami",
        &[],
        &serde_json::json!({ "user": "request-user" }),
    )?;
    println!("who.ami() with overlay = {}", overlaid.display());

    let plain_again = api.call("who.ami", &[])?;
    println!("who.ami() again = {}", plain_again.display());

    api.shutdown()
}
