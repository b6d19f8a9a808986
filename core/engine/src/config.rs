//! Instance configuration.
//!
//! Everything is optional except the root directory. Incompatible
//! combinations are rejected with [`SlothletError::Config`] before any module
//! is loaded.

use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use boa_engine::{Context, JsResult, JsValue};

use crate::error::{SlothletError, SlothletResult};
use crate::sanitize::SanitizerRules;

/// When modules are loaded: everything up front, or on first access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Load and build the whole tree during construction.
    Eager,
    /// Install placeholder proxies that load on first access.
    #[default]
    Lazy,
}

/// Whether the outer API value is forced callable, forced object, or decided
/// by the root module's composed kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiMode {
    /// Callable iff the root composes to a function.
    #[default]
    Auto,
    /// The root must compose to a function; otherwise construction fails.
    Function,
    /// Always an object. A function-shaped root is exposed under its own
    /// sanitized name instead of becoming the root value.
    Object,
}

/// Which context-propagation implementation backs the live bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeKind {
    /// A stack of frames entered per call, restored around promise jobs.
    #[default]
    ScopedStorage,
    /// A single current-frame slot per instance; the last call wins.
    LiveInstance,
}

/// A path-pattern hook observing wrapped calls.
///
/// The pattern is a dotted path where `*` matches one segment and `**`
/// matches any suffix. The observer runs before the underlying function;
/// an error aborts the call.
#[derive(Clone)]
pub struct Hook {
    /// Dotted path pattern, e.g. `math.*` or `**`.
    pub pattern: String,
    /// Observer invoked with the matched path and the call arguments.
    pub observer: Rc<dyn Fn(&str, &[JsValue], &mut Context) -> JsResult<()>>,
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

impl Hook {
    /// Returns `true` when `path` is matched by this hook's pattern.
    pub(crate) fn matches(&self, path: &str) -> bool {
        fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
            match (pattern.first(), path.first()) {
                (None, None) => true,
                (Some(&"**"), _) => {
                    match_segments(&pattern[1..], path)
                        || (!path.is_empty() && match_segments(pattern, &path[1..]))
                }
                (Some(&p), Some(&s)) if p == "*" || p == s => {
                    match_segments(&pattern[1..], &path[1..])
                }
                _ => false,
            }
        }
        let pattern: Vec<&str> = self.pattern.split('.').collect();
        let path: Vec<&str> = path.split('.').collect();
        match_segments(&pattern, &path)
    }
}

/// Options accepted by the factory.
#[derive(Debug, Clone)]
pub struct SlothletOptions {
    /// Root of the module tree. Required.
    pub dir: PathBuf,
    /// Materialization mode. Defaults to [`Mode::Lazy`].
    pub mode: Mode,
    /// Maximum folder depth to recurse into, counted from the root.
    /// `None` means unlimited. Folders beyond the cap contribute nothing.
    pub api_depth: Option<usize>,
    /// Outer callable-vs-object policy.
    pub api_mode: ApiMode,
    /// Context propagation implementation.
    pub runtime: RuntimeKind,
    /// When `false`, `addApi` cannot replace paths owned by other modules.
    pub allow_api_overwrite: bool,
    /// Enables `reload` and is a precondition for `forceOverwrite`.
    pub hot_reload: bool,
    /// Seed for the instance's live `context` object.
    pub context: serde_json::Value,
    /// Merged onto the root composite without overwriting loaded properties.
    pub reference: serde_json::Value,
    /// Sanitizer rules; defaults apply when `None`.
    pub sanitizer: Option<SanitizerRules>,
    /// Call observers, matched by dotted path.
    pub hooks: Vec<Hook>,
}

impl SlothletOptions {
    /// Creates options with defaults for everything but `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            mode: Mode::default(),
            api_depth: None,
            api_mode: ApiMode::default(),
            runtime: RuntimeKind::default(),
            allow_api_overwrite: true,
            hot_reload: false,
            context: serde_json::Value::Null,
            reference: serde_json::Value::Null,
            sanitizer: None,
            hooks: Vec::new(),
        }
    }

    /// Validates option compatibility and the root directory.
    pub(crate) fn validate(&self) -> SlothletResult<()> {
        if self.api_depth == Some(0) {
            return Err(SlothletError::Config(
                "`api_depth` must be at least 1".into(),
            ));
        }
        if !self.dir.is_dir() {
            return Err(SlothletError::Io {
                path: self.dir.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "root directory does not exist",
                ),
            });
        }
        if !matches!(
            self.context,
            serde_json::Value::Null | serde_json::Value::Object(_)
        ) {
            return Err(SlothletError::Config(
                "`context` must be an object when provided".into(),
            ));
        }
        if !matches!(
            self.reference,
            serde_json::Value::Null | serde_json::Value::Object(_)
        ) {
            return Err(SlothletError::Config(
                "`reference` must be an object when provided".into(),
            ));
        }
        Ok(())
    }

    /// The effective sanitizer rules.
    pub(crate) fn sanitizer_rules(&self) -> SanitizerRules {
        self.sanitizer.clone().unwrap_or_default()
    }
}

/// Options accepted by `addApi`.
#[derive(Debug, Clone, Default)]
pub struct AddApiOptions {
    /// Overwrite an existing path even across ownership boundaries.
    /// Requires `hot_reload` on the instance.
    pub force_overwrite: bool,
    /// Caller-supplied module identifier recorded in the ownership table.
    pub module_id: Option<String>,
}

/// Immutable per-instance snapshot of the options that outlive construction.
#[derive(Debug, Clone)]
pub(crate) struct ConfigSnapshot {
    pub root_dir: PathBuf,
    pub mode: Mode,
    pub api_depth: Option<usize>,
    pub api_mode: ApiMode,
    pub runtime: RuntimeKind,
    pub allow_api_overwrite: bool,
    pub hot_reload: bool,
    pub sanitizer: SanitizerRules,
}

impl ConfigSnapshot {
    pub(crate) fn from_options(options: &SlothletOptions) -> Self {
        Self {
            root_dir: options.dir.clone(),
            mode: options.mode,
            api_depth: options.api_depth,
            api_mode: options.api_mode,
            runtime: options.runtime,
            allow_api_overwrite: options.allow_api_overwrite,
            hot_reload: options.hot_reload,
            sanitizer: options.sanitizer_rules(),
        }
    }

    /// Whether a folder at `depth` (the root's direct sub-folders are at
    /// depth 1) is still within the configured cap.
    pub(crate) fn within_depth(&self, depth: usize) -> bool {
        self.api_depth.is_none_or(|cap| depth <= cap)
    }

    pub(crate) fn root_dir(&self) -> &Path {
        &self.root_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hook(pattern: &str) -> Hook {
        Hook {
            pattern: pattern.into(),
            observer: Rc::new(|_, _, _| Ok(())),
        }
    }

    #[test]
    fn hook_patterns() {
        assert!(hook("math.add").matches("math.add"));
        assert!(hook("math.*").matches("math.add"));
        assert!(!hook("math.*").matches("math.nested.add"));
        assert!(hook("**").matches("anything.at.all"));
        assert!(hook("math.**").matches("math.nested.add"));
        assert!(!hook("string.*").matches("math.add"));
    }

    #[test]
    fn zero_depth_rejected() {
        let mut options = SlothletOptions::new(std::env::temp_dir());
        options.api_depth = Some(0);
        assert!(matches!(
            options.validate(),
            Err(SlothletError::Config(_))
        ));
    }
}
