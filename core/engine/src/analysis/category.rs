//! Folder scanning and build-plan construction.
//!
//! For every folder the analyzer loads the sibling module files, classifies
//! their exports and picks the first matching composition rule. The result
//! is a [`FolderBuildPlan`] the shape builder consumes; sub-folders are
//! listed but not planned here, so lazy materialization can defer them.

use std::fs;
use std::path::{Path, PathBuf};

use boa_engine::{Context, Module};

use crate::analysis::exports::{analyze_namespace, ParsedExports};
use crate::config::ConfigSnapshot;
use crate::error::{SlothletError, SlothletResult};
use crate::loader::{is_module_file, is_script_file, SlothletModuleLoader};
use crate::sanitize::sanitize;
use crate::support::Support;

/// Reserved sanitized base name triggering the add-api entry rule.
pub(crate) const ADDAPI_TOKEN: &str = "addapi";

/// A module file of one folder, loaded and classified.
#[derive(Debug, Clone)]
pub(crate) struct ModuleFileDescriptor {
    pub absolute_path: PathBuf,
    /// Path relative to the instance root, for diagnostics and metadata.
    pub folder_relative_path: PathBuf,
    pub base_name: String,
    pub sanitized_name: String,
    pub exports: ParsedExports,
    pub module: Module,
}

/// Which composition rule shapes a folder. First match wins, in rule order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FolderMode {
    /// R1: the only module file is the folder's own file; the folder becomes
    /// that module's composed value.
    FlattenSingleFile,
    /// R2: the own file's exports merge at folder level next to siblings.
    FlattenSameName,
    /// R3: a file sanitizing to `addapi` acts as the own file.
    FlattenAddApi,
    /// R4: two or more siblings carry real defaults; each mounts under its
    /// own property name.
    MultiDefaultCategory,
    /// R5: named-only siblings contribute their named exports directly.
    NamedOnlyCategory,
    /// R6: plain object with one property per child.
    NestedObject,
}

/// The category analyzer's output for one folder.
#[derive(Debug, Clone)]
pub(crate) struct FolderBuildPlan {
    pub dir: PathBuf,
    pub folder_sanitized_name: String,
    pub mode: FolderMode,
    /// Index into `files` of the own/entry file for R1–R3.
    pub own_index: Option<usize>,
    pub files: Vec<ModuleFileDescriptor>,
    /// Sub-folders within the depth cap: sanitized name and path.
    pub subdirs: Vec<(String, PathBuf)>,
    /// This folder's depth; the root is at 0, its direct sub-folders at 1.
    pub depth: usize,
}

/// `true` for names the loader must not treat as modules or categories.
fn is_ignored_name(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('_') || name.starts_with("__slothlet")
}

/// Scans `dir`, loads its module files and produces the folder's build plan.
///
/// `is_root` relaxes the own-file rule: a root directory containing exactly
/// one module file flattens that file into the root no matter its name, so
/// a lone root module with a function default can become the callable API.
pub(crate) fn plan_folder(
    dir: &Path,
    depth: usize,
    is_root: bool,
    config: &ConfigSnapshot,
    loader: &SlothletModuleLoader,
    support: &Support,
    context: &mut Context,
) -> SlothletResult<FolderBuildPlan> {
    let folder_name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let folder_sanitized_name = sanitize(folder_name, &config.sanitizer)?;

    let mut file_paths = Vec::new();
    let mut subdirs = Vec::new();
    let entries = fs::read_dir(dir).map_err(|source| SlothletError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| SlothletError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_ignored_name(name) {
            continue;
        }
        if path.is_dir() {
            if config.within_depth(depth + 1) {
                let stem = sanitize(name, &config.sanitizer)?;
                subdirs.push((stem, path));
            } else {
                log::trace!("skipping {} (beyond api depth)", path.display());
            }
        } else if is_module_file(&path) {
            file_paths.push(path);
        } else if is_script_file(&path) {
            return Err(SlothletError::Load {
                path,
                message: "script-kind modules (.cjs) are not supported by this host".into(),
            });
        }
    }
    file_paths.sort();
    subdirs.sort_by(|a, b| a.1.cmp(&b.1));

    let mut files = Vec::with_capacity(file_paths.len());
    for path in file_paths {
        files.push(load_descriptor(&path, config, loader, support, context)?);
    }

    let own_index = files
        .iter()
        .position(|f| f.sanitized_name == folder_sanitized_name);
    let addapi_index = files.iter().position(|f| f.sanitized_name == ADDAPI_TOKEN);
    let real_defaults = files
        .iter()
        .filter(|f| f.exports.has_real_default())
        .count();
    let any_named_only = files.iter().any(|f| f.exports.named_only());

    let (mode, own_index) = if files.len() == 1 && (own_index == Some(0) || is_root) {
        (FolderMode::FlattenSingleFile, Some(0))
    } else if own_index.is_some() {
        (FolderMode::FlattenSameName, own_index)
    } else if addapi_index.is_some() {
        (FolderMode::FlattenAddApi, addapi_index)
    } else if real_defaults >= 2 {
        (FolderMode::MultiDefaultCategory, None)
    } else if any_named_only {
        (FolderMode::NamedOnlyCategory, None)
    } else {
        (FolderMode::NestedObject, None)
    };

    log::debug!(
        "planned {} as {:?} ({} files, {} subdirs)",
        dir.display(),
        mode,
        files.len(),
        subdirs.len()
    );

    Ok(FolderBuildPlan {
        dir: dir.to_path_buf(),
        folder_sanitized_name,
        mode,
        own_index,
        files,
        subdirs,
        depth,
    })
}

fn load_descriptor(
    path: &Path,
    config: &ConfigSnapshot,
    loader: &SlothletModuleLoader,
    support: &Support,
    context: &mut Context,
) -> SlothletResult<ModuleFileDescriptor> {
    let base_name = path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_owned();
    let sanitized_name = sanitize(&base_name, &config.sanitizer)?;
    let module = loader.load_sync(path, context)?;
    let exports = analyze_namespace(&module, support, context)
        .map_err(|err| SlothletError::load(path, &err))?;
    if exports.has_mixed_exports {
        log::trace!("module {base_name} carries a default next to named exports");
    }
    let folder_relative_path = path
        .strip_prefix(config.root_dir())
        .unwrap_or(path)
        .to_path_buf();
    Ok(ModuleFileDescriptor {
        absolute_path: path.to_path_buf(),
        folder_relative_path,
        base_name,
        sanitized_name,
        exports,
        module,
    })
}
