//! The shape builder: build plans in, composite values out.

use std::path::Path;

use indexmap::IndexMap;

use boa_engine::{js_string, Context, JsObject, JsString, JsValue};
use boa_gc::Gc;

use crate::analysis::category::{plan_folder, FolderBuildPlan, FolderMode, ModuleFileDescriptor};
use crate::analysis::exports::{function_name, DefaultKind, NamedKind};
use crate::config::{ApiMode, Mode};
use crate::error::{SlothletError, SlothletResult};
use crate::instance::InstanceInner;
use crate::meta::make_metadata;
use crate::runtime::wrap_callable;
use crate::sanitize::is_valid_identifier;

/// Joins a dotted path prefix with a property name.
pub(crate) fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Tracks claimed property names of one folder so collisions are rejected
/// with both claimants named.
#[derive(Debug, Default)]
struct KeyLedger {
    used: IndexMap<String, String>,
}

impl KeyLedger {
    fn claim(&mut self, key: &str, source: &str) -> SlothletResult<()> {
        if let Some(first) = self.used.get(key) {
            return Err(SlothletError::NameCollision {
                name: key.to_owned(),
                first: first.clone(),
                second: source.to_owned(),
            });
        }
        self.used.insert(key.to_owned(), source.to_owned());
        Ok(())
    }
}

/// A module's composed value plus the properties that must be attached next
/// to it rather than onto it (a primitive default cannot carry named
/// exports).
struct ComposedModule {
    value: JsValue,
    alongside: Vec<(String, JsValue)>,
}

/// The property key a named export mounts under: the export value's
/// code-level function name when it is a valid identifier, the export name
/// otherwise.
fn preferred_key(
    value: &JsValue,
    export_name: &str,
    context: &mut Context,
) -> SlothletResult<String> {
    if let Some(name) = function_name(value, context)
        .map_err(|err| SlothletError::Load {
            path: export_name.into(),
            message: err.to_string(),
        })?
    {
        if is_valid_identifier(&name) {
            return Ok(name);
        }
    }
    Ok(export_name.to_owned())
}

/// Wraps a callable for context propagation and tags it with its path and
/// source metadata.
fn wrap_and_tag(
    callable: &JsObject,
    path: &str,
    desc: &ModuleFileDescriptor,
    inner: &Gc<InstanceInner>,
    context: &mut Context,
) -> SlothletResult<JsValue> {
    let err = |e: &boa_engine::JsError| SlothletError::load(&desc.absolute_path, e);

    let wrapped = wrap_callable(callable, path, inner, context).map_err(|e| err(&e))?;

    let folder = desc
        .folder_relative_path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .display()
        .to_string();
    let file = desc
        .folder_relative_path
        .display()
        .to_string();
    let support = inner.support().clone();
    let metadata = make_metadata(
        &[
            ("sourceFolder", JsString::from(folder.as_str()).into()),
            ("sourceFile", JsString::from(file.as_str()).into()),
            ("sourceLine", 1.into()),
        ],
        &support,
        context,
    )
    .map_err(|e| err(&e))?;

    let wrapped_value: JsValue = wrapped.into();
    for (key, value) in [
        ("__metadata", JsValue::from(metadata)),
        ("__sourceFolder", JsString::from(folder.as_str()).into()),
        ("__sourceFile", JsString::from(file.as_str()).into()),
        ("__sourceLine", 1.into()),
    ] {
        support
            .define_hidden(&wrapped_value, key, &value, context)
            .map_err(|e| err(&e))?;
    }
    Ok(wrapped_value)
}

fn fresh_object(context: &mut Context) -> JsObject {
    JsObject::with_object_proto(context.intrinsics())
}

fn set_member(
    node: &JsObject,
    key: &str,
    value: JsValue,
    context: &mut Context,
    desc_path: &Path,
) -> SlothletResult<()> {
    node.set(JsString::from(key), value, false, context)
        .map_err(|e| SlothletError::load(desc_path, &e))?;
    Ok(())
}

/// Builds one member value: functions are wrapped, objects are shallow-
/// rebuilt with their callable members wrapped, everything else passes
/// through.
fn build_member(
    value: &JsValue,
    path: &str,
    desc: &ModuleFileDescriptor,
    inner: &Gc<InstanceInner>,
    context: &mut Context,
) -> SlothletResult<JsValue> {
    let err = |e: &boa_engine::JsError| SlothletError::load(&desc.absolute_path, e);

    if let Some(object) = value.as_object().cloned() {
        if object.is_callable() {
            return wrap_and_tag(&object, path, desc, inner, context);
        }
        // One level deep: callables directly inside an exported object are
        // part of the API surface; deeper nesting passes through untouched.
        let node = fresh_object(context);
        let keys = inner
            .support()
            .enumerable_keys(value, context)
            .map_err(|e| err(&e))?;
        for key in keys {
            let member = object
                .get(JsString::from(key.as_str()), context)
                .map_err(|e| err(&e))?;
            let built = match member.as_object() {
                Some(m) if m.is_callable() => {
                    wrap_and_tag(&m.clone(), &join_path(path, &key), desc, inner, context)?
                }
                _ => member,
            };
            set_member(&node, &key, built, context, &desc.absolute_path)?;
        }
        inner
            .support()
            .define_hidden(
                &node.clone().into(),
                "__slothletPath",
                &JsString::from(path).into(),
                context,
            )
            .map_err(|e| err(&e))?;
        return Ok(node.into());
    }
    Ok(value.clone())
}

/// Composes a single module into its node value, honoring the module's
/// default kind. Named exports mount under [`preferred_key`] in every arm,
/// so a binding whose value carries a different code-level function name
/// keeps that name wherever the module ends up.
fn compose_module(
    desc: &ModuleFileDescriptor,
    path: &str,
    inner: &Gc<InstanceInner>,
    context: &mut Context,
) -> SlothletResult<ComposedModule> {
    let err = |e: &boa_engine::JsError| SlothletError::load(&desc.absolute_path, e);
    let namespace = desc.module.namespace(context);

    let named_values: Vec<(String, NamedKind, JsValue)> = {
        let mut out = Vec::new();
        for (name, kind) in &desc.exports.named {
            let value = namespace
                .get(JsString::from(name.as_str()), context)
                .map_err(|e| err(&e))?;
            out.push((name.clone(), *kind, value));
        }
        out
    };

    match &desc.exports.default_kind {
        DefaultKind::None | DefaultKind::SelfReferential(_) => {
            // Named-only shape: an object carrying each named export. A
            // self-referential default is its named binding, so it needs no
            // separate slot.
            let node = fresh_object(context);
            for (name, _kind, value) in &named_values {
                let key = preferred_key(value, name, context)?;
                let built = build_member(value, &join_path(path, &key), desc, inner, context)?;
                set_member(&node, &key, built, context, &desc.absolute_path)?;
            }
            tag_path(&node, path, inner, context)?;
            Ok(ComposedModule {
                value: node.into(),
                alongside: Vec::new(),
            })
        }
        DefaultKind::Function | DefaultKind::CallableWithProperties => {
            let default = namespace
                .get(js_string!("default"), context)
                .map_err(|e| err(&e))?;
            let callable = default.as_object().cloned().ok_or_else(|| {
                SlothletError::Load {
                    path: desc.absolute_path.clone(),
                    message: "default export vanished between analysis and build".into(),
                }
            })?;
            let wrapped = wrap_and_tag(&callable, path, desc, inner, context)?;
            let wrapped_obj = wrapped
                .as_object()
                .cloned()
                .expect("wrap_and_tag returns a function object");
            for (name, _kind, value) in &named_values {
                let key = preferred_key(value, name, context)?;
                let built = build_member(value, &join_path(path, &key), desc, inner, context)?;
                set_member(&wrapped_obj, &key, built, context, &desc.absolute_path)?;
            }
            Ok(ComposedModule {
                value: wrapped,
                alongside: Vec::new(),
            })
        }
        DefaultKind::Object => {
            let default = namespace
                .get(js_string!("default"), context)
                .map_err(|e| err(&e))?;
            let node_value = build_member(&default, path, desc, inner, context)?;
            let node = node_value
                .as_object()
                .cloned()
                .expect("object default composes to an object");
            for (name, _kind, value) in &named_values {
                let key = preferred_key(value, name, context)?;
                if node
                    .has_own_property(JsString::from(key.as_str()), context)
                    .map_err(|e| err(&e))?
                {
                    continue;
                }
                let built = build_member(value, &join_path(path, &key), desc, inner, context)?;
                set_member(&node, &key, built, context, &desc.absolute_path)?;
            }
            Ok(ComposedModule {
                value: node.into(),
                alongside: Vec::new(),
            })
        }
        DefaultKind::Primitive => {
            let default = namespace
                .get(js_string!("default"), context)
                .map_err(|e| err(&e))?;
            // A scalar cannot carry properties; named exports attach next to
            // it at the parent level.
            let mut alongside = Vec::new();
            for (name, _kind, value) in &named_values {
                let key = preferred_key(value, name, context)?;
                let built = build_member(value, &join_path(path, &key), desc, inner, context)?;
                alongside.push((key, built));
            }
            Ok(ComposedModule {
                value: default,
                alongside,
            })
        }
    }
}

fn tag_path(
    node: &JsObject,
    path: &str,
    inner: &Gc<InstanceInner>,
    context: &mut Context,
) -> SlothletResult<()> {
    inner
        .support()
        .define_hidden(
            &node.clone().into(),
            "__slothletPath",
            &JsString::from(path).into(),
            context,
        )
        .map_err(|e| SlothletError::Load {
            path: path.into(),
            message: e.to_string(),
        })
}

/// Contributes a module's named exports directly at folder level, with
/// function-name preference on the property keys. Used by R2, R3 and R5.
fn contribute_named_at_folder(
    node: &JsObject,
    desc: &ModuleFileDescriptor,
    folder_path: &str,
    ledger: &mut KeyLedger,
    inner: &Gc<InstanceInner>,
    context: &mut Context,
) -> SlothletResult<()> {
    let err = |e: &boa_engine::JsError| SlothletError::load(&desc.absolute_path, e);
    let namespace = desc.module.namespace(context);
    let source = desc.folder_relative_path.display().to_string();
    for name in desc.exports.named.keys() {
        let value = namespace
            .get(JsString::from(name.as_str()), context)
            .map_err(|e| err(&e))?;
        let key = preferred_key(&value, name, context)?;
        ledger.claim(&key, &source)?;
        let built = build_member(&value, &join_path(folder_path, &key), desc, inner, context)?;
        set_member(node, &key, built, context, &desc.absolute_path)?;
    }
    Ok(())
}

/// Builds the composite value for one planned folder.
pub(crate) fn build_folder_value(
    plan: &FolderBuildPlan,
    folder_path: &str,
    inner: &Gc<InstanceInner>,
    context: &mut Context,
) -> SlothletResult<JsValue> {
    let mut ledger = KeyLedger::default();
    log::trace!(
        "building folder {} from {}",
        plan.folder_sanitized_name,
        plan.dir.display()
    );

    let value: JsValue = match plan.mode {
        FolderMode::FlattenSingleFile => {
            let own = &plan.files[plan.own_index.expect("single-file plan has an own file")];
            let composed = compose_module(own, folder_path, inner, context)?;
            let source = own.folder_relative_path.display().to_string();
            if let Some(node) = composed.value.as_object() {
                let keys = inner
                    .support()
                    .enumerable_keys(&composed.value, context)
                    .map_err(|e| SlothletError::load(&own.absolute_path, &e))?;
                for key in keys {
                    ledger.claim(&key, &source)?;
                }
                for (name, member) in composed.alongside {
                    ledger.claim(&name, &source)?;
                    set_member(node, &name, member, context, &own.absolute_path)?;
                }
            }
            composed.value
        }
        FolderMode::FlattenSameName | FolderMode::FlattenAddApi => {
            let own = &plan.files[plan.own_index.expect("flatten plan has an own file")];
            let node: JsObject = if own.exports.has_real_default() {
                let composed = compose_module(own, folder_path, inner, context)?;
                match composed.value.as_object() {
                    Some(node) => {
                        let source = own.folder_relative_path.display().to_string();
                        let keys = inner
                            .support()
                            .enumerable_keys(&composed.value, context)
                            .map_err(|e| SlothletError::load(&own.absolute_path, &e))?;
                        for key in keys {
                            ledger.claim(&key, &source)?;
                        }
                        node.clone()
                    }
                    None => {
                        return Err(SlothletError::Load {
                            path: own.absolute_path.clone(),
                            message:
                                "a same-named file with a scalar default cannot merge with siblings"
                                    .into(),
                        })
                    }
                }
            } else {
                let node = fresh_object(context);
                contribute_named_at_folder(&node, own, folder_path, &mut ledger, inner, context)?;
                node
            };

            for (index, sibling) in plan.files.iter().enumerate() {
                if Some(index) == plan.own_index {
                    continue;
                }
                let source = sibling.folder_relative_path.display().to_string();
                ledger.claim(&sibling.sanitized_name, &source)?;
                let member_path = join_path(folder_path, &sibling.sanitized_name);
                let composed = compose_module(sibling, &member_path, inner, context)?;
                set_member(
                    &node,
                    &sibling.sanitized_name,
                    composed.value,
                    context,
                    &sibling.absolute_path,
                )?;
                for (name, member) in composed.alongside {
                    ledger.claim(&name, &source)?;
                    set_member(&node, &name, member, context, &sibling.absolute_path)?;
                }
            }
            tag_path(&node, folder_path, inner, context)?;
            node.into()
        }
        FolderMode::MultiDefaultCategory | FolderMode::NestedObject => {
            let node = fresh_object(context);
            for desc in &plan.files {
                let source = desc.folder_relative_path.display().to_string();
                ledger.claim(&desc.sanitized_name, &source)?;
                let member_path = join_path(folder_path, &desc.sanitized_name);
                let composed = compose_module(desc, &member_path, inner, context)?;
                set_member(
                    &node,
                    &desc.sanitized_name,
                    composed.value,
                    context,
                    &desc.absolute_path,
                )?;
                for (name, member) in composed.alongside {
                    ledger.claim(&name, &source)?;
                    set_member(&node, &name, member, context, &desc.absolute_path)?;
                }
            }
            tag_path(&node, folder_path, inner, context)?;
            node.into()
        }
        FolderMode::NamedOnlyCategory => {
            let node = fresh_object(context);
            for desc in &plan.files {
                if desc.exports.has_real_default() {
                    let source = desc.folder_relative_path.display().to_string();
                    ledger.claim(&desc.sanitized_name, &source)?;
                    let member_path = join_path(folder_path, &desc.sanitized_name);
                    let composed = compose_module(desc, &member_path, inner, context)?;
                    set_member(
                        &node,
                        &desc.sanitized_name,
                        composed.value,
                        context,
                        &desc.absolute_path,
                    )?;
                    for (name, member) in composed.alongside {
                        ledger.claim(&name, &source)?;
                        set_member(&node, &name, member, context, &desc.absolute_path)?;
                    }
                } else {
                    contribute_named_at_folder(
                        &node,
                        desc,
                        folder_path,
                        &mut ledger,
                        inner,
                        context,
                    )?;
                }
            }
            tag_path(&node, folder_path, inner, context)?;
            node.into()
        }
    };

    attach_subfolders(&value, plan, folder_path, &mut ledger, inner, context)?;
    Ok(value)
}

fn attach_subfolders(
    value: &JsValue,
    plan: &FolderBuildPlan,
    folder_path: &str,
    ledger: &mut KeyLedger,
    inner: &Gc<InstanceInner>,
    context: &mut Context,
) -> SlothletResult<()> {
    if plan.subdirs.is_empty() {
        return Ok(());
    }
    let Some(node) = value.as_object().cloned() else {
        return Err(SlothletError::Load {
            path: plan.dir.clone(),
            message: "sub-folders cannot attach to a scalar-valued folder".into(),
        });
    };
    for (name, dir) in &plan.subdirs {
        ledger.claim(name, &dir.display().to_string())?;
        let child_path = join_path(folder_path, name);
        let child: JsValue = match inner.mode() {
            Mode::Eager => build_folder(dir, plan.depth + 1, &child_path, inner, context)?,
            Mode::Lazy => crate::builder::lazy::make_placeholder(
                dir,
                &child_path,
                plan.depth + 1,
                inner,
                context,
            )
            .map_err(|e| SlothletError::load(dir, &e))?
            .into(),
        };
        set_member(&node, name, child, context, dir)?;
    }
    Ok(())
}

/// Plans and builds a folder in one step. Eager recursion and placeholder
/// materialization both land here.
pub(crate) fn build_folder(
    dir: &Path,
    depth: usize,
    folder_path: &str,
    inner: &Gc<InstanceInner>,
    context: &mut Context,
) -> SlothletResult<JsValue> {
    let plan = plan_folder(
        dir,
        depth,
        false,
        inner.config(),
        inner.loader(),
        inner.support(),
        context,
    )?;
    build_folder_value(&plan, folder_path, inner, context)
}

/// Builds the root composite, applying the root special case and the
/// configured `api_mode`.
pub(crate) fn build_root(
    inner: &Gc<InstanceInner>,
    context: &mut Context,
) -> SlothletResult<JsValue> {
    let root_dir = inner.config().root_dir().to_path_buf();
    let plan = plan_folder(
        &root_dir,
        0,
        true,
        inner.config(),
        inner.loader(),
        inner.support(),
        context,
    )?;
    let value = build_folder_value(&plan, "", inner, context)?;

    let callable = value.as_object().is_some_and(JsObject::is_callable);
    match inner.config().api_mode {
        ApiMode::Auto => Ok(value),
        ApiMode::Function => {
            if callable {
                Ok(value)
            } else {
                Err(SlothletError::Config(
                    "`api_mode = function` requires a root module with a function default".into(),
                ))
            }
        }
        ApiMode::Object => {
            if !callable {
                return Ok(value);
            }
            // Demote the callable root: mount the function under its own
            // name and expose its attached properties on a plain object.
            let function = value.as_object().cloned().expect("checked callable");
            let node = fresh_object(context);
            let key = function_name(&value, context)
                .ok()
                .flatten()
                .filter(|name| is_valid_identifier(name))
                .unwrap_or_else(|| "default".to_owned());
            inner
                .support()
                .copy_props(&node.clone().into(), &value, true, context)
                .map_err(|e| SlothletError::load(&root_dir, &e))?;
            set_member(&node, &key, function.into(), context, &root_dir)?;
            Ok(node.into())
        }
    }
}
