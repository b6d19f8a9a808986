//! Filesystem module loader with a per-instance cache.
//!
//! Each instance owns one loader, so dropping cache entries on hot reload
//! never disturbs other instances. The loader also serves the well-known
//! `"slothlet"` specifier with the instance's synthetic runtime module.

use std::cell::RefCell;
use std::path::{Component, Path, PathBuf};

use boa_engine::builtins::promise::PromiseState;
use boa_engine::module::{ModuleLoader, Referrer};
use boa_engine::{Context, JsError, JsNativeError, JsResult, JsString, Module, Source};
use rustc_hash::FxHashMap;

use crate::error::{SlothletError, SlothletResult};

/// Import specifier resolved to the synthetic runtime module.
pub const RUNTIME_SPECIFIER: &str = "slothlet";

/// Module extensions recognized on disk.
pub(crate) const MODULE_EXTENSIONS: [&str; 2] = ["mjs", "js"];

/// Extension recognized as a module kind this substrate cannot evaluate.
pub(crate) const SCRIPT_EXTENSION: &str = "cjs";

/// A [`ModuleLoader`] rooted at the instance's module directory.
#[derive(Debug)]
pub(crate) struct SlothletModuleLoader {
    root: PathBuf,
    cache: RefCell<FxHashMap<PathBuf, Module>>,
    runtime_module: RefCell<Option<Module>>,
}

impl SlothletModuleLoader {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RefCell::new(FxHashMap::default()),
            runtime_module: RefCell::new(None),
        }
    }

    /// Installs the synthetic runtime module served for
    /// [`RUNTIME_SPECIFIER`].
    pub(crate) fn set_runtime_module(&self, module: Module) {
        *self.runtime_module.borrow_mut() = Some(module);
    }

    /// Loads, links and evaluates the module at `path`, driving the job
    /// queue until its evaluation promise settles. Results are cached per
    /// canonical path.
    pub(crate) fn load_sync(&self, path: &Path, context: &mut Context) -> SlothletResult<Module> {
        let canonical = path.canonicalize().map_err(|source| SlothletError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(module) = self.cache.borrow().get(&canonical) {
            return Ok(module.clone());
        }

        log::debug!("loading module {}", canonical.display());
        let source = Source::from_filepath(&canonical).map_err(|source| SlothletError::Io {
            path: canonical.clone(),
            source,
        })?;
        let module = Module::parse(source, None, context)
            .map_err(|err| SlothletError::load(&canonical, &err))?;

        // Insert before evaluation so relative imports between files of the
        // same tree resolve through the cache.
        self.cache
            .borrow_mut()
            .insert(canonical.clone(), module.clone());

        let promise = module.load_link_evaluate(context);
        context.run_jobs();
        match promise.state() {
            PromiseState::Fulfilled(_) => Ok(module),
            PromiseState::Rejected(reason) => {
                self.cache.borrow_mut().remove(&canonical);
                Err(SlothletError::load(
                    &canonical,
                    &JsError::from_opaque(reason),
                ))
            }
            PromiseState::Pending => {
                self.cache.borrow_mut().remove(&canonical);
                Err(SlothletError::Load {
                    path: canonical,
                    message: "module evaluation did not settle".into(),
                })
            }
        }
    }

    /// Drops every cache entry under `prefix`. Hot reload calls this before
    /// re-running the loader so fresh sources are picked up.
    pub(crate) fn invalidate(&self, prefix: &Path) {
        let canonical = prefix.canonicalize().unwrap_or_else(|_| prefix.to_path_buf());
        self.cache
            .borrow_mut()
            .retain(|path, _| !path.starts_with(&canonical));
        log::debug!("invalidated module cache under {}", canonical.display());
    }

    /// Clears the cache and the runtime module. Shutdown only.
    pub(crate) fn clear(&self) {
        self.cache.borrow_mut().clear();
        *self.runtime_module.borrow_mut() = None;
    }

    fn resolve(&self, specifier: &str, referrer: &Referrer) -> PathBuf {
        let base = referrer
            .path()
            .and_then(Path::parent)
            .map_or_else(|| self.root.clone(), Path::to_path_buf);
        let target = if let Some(stripped) = specifier.strip_prefix("./") {
            base.join(stripped)
        } else if specifier.starts_with("../") {
            base.join(specifier)
        } else if Path::new(specifier).is_absolute() {
            PathBuf::from(specifier)
        } else {
            self.root.join(specifier)
        };
        normalize(&target)
    }
}

impl ModuleLoader for SlothletModuleLoader {
    fn load_imported_module(
        &self,
        referrer: Referrer,
        specifier: JsString,
        finish_load: Box<dyn FnOnce(JsResult<Module>, &mut Context)>,
        context: &mut Context,
    ) {
        let specifier = specifier.to_std_string_escaped();

        if specifier == RUNTIME_SPECIFIER {
            let module = self.runtime_module.borrow().clone().ok_or_else(|| {
                JsNativeError::typ()
                    .with_message("runtime module is not installed")
                    .into()
            });
            finish_load(module, context);
            return;
        }

        let path = self.resolve(&specifier, &referrer);
        let result = self
            .load_sync(&path, context)
            .map_err(JsError::from);
        finish_load(result, context);
    }
}

/// Lexically removes `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// `true` when `path` has a recognized module extension.
pub(crate) fn is_module_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MODULE_EXTENSIONS.contains(&ext))
}

/// `true` when `path` is a recognized script-kind module this substrate
/// rejects rather than ignores.
pub(crate) fn is_script_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == SCRIPT_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_dot_components() {
        assert_eq!(
            normalize(Path::new("/a/b/../c/./d.mjs")),
            PathBuf::from("/a/c/d.mjs")
        );
    }

    #[test]
    fn module_extension_recognition() {
        assert!(is_module_file(Path::new("x/math.mjs")));
        assert!(is_module_file(Path::new("x/math.js")));
        assert!(!is_module_file(Path::new("x/math.cjs")));
        assert!(is_script_file(Path::new("x/math.cjs")));
        assert!(!is_module_file(Path::new("x/readme.md")));
        assert!(!is_module_file(Path::new("x/Makefile")));
    }
}
