//! Slothlet is a filesystem-driven API composition runtime.
//!
//! Point it at a directory of ECMAScript modules and it produces a single
//! composite API value whose shape mirrors the directory tree, subject to a
//! set of flattening and naming rules, and executes every API call inside a
//! per-instance context so module code can read a live `self` / `context` /
//! `reference` triad describing whichever instance invoked it.
//!
//! # Example
//!
//! ```no_run
//! use slothlet_engine::{Mode, Slothlet};
//!
//! # fn main() -> slothlet_engine::SlothletResult<()> {
//! let mut api = Slothlet::builder("./api")
//!     .mode(Mode::Eager)
//!     .context(serde_json::json!({ "user": "alice" }))
//!     .build()?;
//!
//! let sum = api.call("math.add", &[2.into(), 3.into()])?;
//! assert_eq!(sum.as_number(), Some(5.0));
//! api.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! Module files participate in the composition by whatever they export; a
//! module that wants the live bindings imports them from the well-known
//! specifier:
//!
//! ```text
//! import { self, context, reference } from "slothlet";
//!
//! export function whoami() {
//!     return context.user;
//! }
//! ```
//!
//! # Composition rules
//!
//! For a folder, the first matching rule wins:
//!
//! 1. a lone module file named like its folder *becomes* the folder;
//! 2. a same-named file merges its exports at folder level beside siblings;
//! 3. a file named `addapi` plays the same role for attached sub-APIs;
//! 4. several siblings with default exports each mount under their own name;
//! 5. named-only siblings contribute their named exports directly;
//! 6. anything else becomes a plain nested object.
//!
//! Property names come from the [`sanitize()`] mapping of filesystem
//! segments, except that a named export whose function name is already a
//! valid identifier keeps that name.

mod analysis;
mod builder;
mod config;
mod describe;
mod error;
mod instance;
mod loader;
mod meta;
mod runtime;
mod sanitize;
mod support;

pub use config::{AddApiOptions, ApiMode, Hook, Mode, RuntimeKind, SlothletOptions};
pub use describe::DescribeNode;
pub use error::{SlothletError, SlothletResult};
pub use instance::{live_instances, RemoveApi, Slothlet, SlothletBuilder, SlothletInstance};
pub use loader::RUNTIME_SPECIFIER;
pub use sanitize::{sanitize, sanitize_default, SanitizerRules};
