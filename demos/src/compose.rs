//! Composes a small module tree eagerly and calls into it.
//!
//! The demo writes its module files into a temporary directory so it is
//! fully self-contained; point `Slothlet::builder` at your own directory in
//! real code.

#![allow(clippy::print_stdout, missing_docs)]

use std::fs;

use slothlet_engine::{Mode, Slothlet, SlothletResult};

fn main() -> SlothletResult<()> {
    let dir = tempfile::tempdir().expect("temp dir");

    fs::create_dir_all(dir.path().join("math")).expect("mkdir");
    fs::write(
        dir.path().join("math/math.mjs"),
        "export default {\n    add(a, b) {\n        return a + b;\n    },\n};\n",
    )
    .expect("write module");
    fs::create_dir_all(dir.path().join("string")).expect("mkdir");
    fs::write(
        dir.path().join("string/string.mjs"),
        "export default {\n    upper(s) {\n        return s.toUpperCase();\n    },\n};\n",
    )
    .expect("write module");

    let mut api = Slothlet::builder(dir.path()).mode(Mode::Eager).build()?;

    let sum = api.call("math.add", &[2.into(), 3.into()])?;
    println!("math.add(2, 3) = {}", sum.display());

    let upper = api.call("string.upper", &[boa_engine::js_string!("abc").into()])?;
    println!("string.upper('abc') = {}", upper.display());

    let tree = api.describe()?;
    println!(
        "described {} top-level entries",
        tree.children.len()
    );

    api.shutdown()
}
