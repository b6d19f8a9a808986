//! Lazy placeholders.
//!
//! A placeholder stands in for a not-yet-built sub-folder node. It is a
//! proxy over a callable target so that both property access and invocation
//! can trigger materialization; once the real node is built, its enumerable
//! properties are copied onto the backing target and every trap forwards, so
//! the placeholder *becomes* the node while keeping the identity long-lived
//! references captured.
//!
//! State machine: `Unresolved → Loading → Ready`, or `Unresolved → Error`
//! with the failure re-thrown on every subsequent access. A single build is
//! shared: accesses during `Loading` observe the in-flight build instead of
//! starting another.

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};

use boa_engine::object::{FunctionObjectBuilder, ObjectInitializer};
use boa_engine::{
    js_string, Context, JsArgs, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction,
};
use boa_gc::{Finalize, Gc, GcRefCell, Trace};

use crate::builder::shape::build_folder;
use crate::instance::InstanceInner;
use crate::support::array_values;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unresolved,
    Loading,
    Ready,
    Error,
}

#[derive(Debug, Trace, Finalize)]
struct PlaceholderState {
    inner: Gc<InstanceInner>,
    target: JsObject,
    real: GcRefCell<Option<JsValue>>,
    #[unsafe_ignore_trace]
    dir: PathBuf,
    #[unsafe_ignore_trace]
    path: String,
    #[unsafe_ignore_trace]
    depth: usize,
    #[unsafe_ignore_trace]
    phase: Cell<Phase>,
    #[unsafe_ignore_trace]
    error: RefCell<Option<String>>,
}

impl PlaceholderState {
    /// Runs the shared build on first use and returns the real node.
    fn ensure(&self, context: &mut Context) -> JsResult<JsValue> {
        match self.phase.get() {
            Phase::Ready => Ok(self
                .real
                .borrow()
                .clone()
                .expect("ready placeholder holds its node")),
            Phase::Error => {
                let message = self
                    .error
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| "placeholder load failed".into());
                Err(JsNativeError::error().with_message(message).into())
            }
            Phase::Loading => Err(JsNativeError::error()
                .with_message(format!(
                    "circular materialization of `{}`",
                    self.path
                ))
                .into()),
            Phase::Unresolved => {
                self.phase.set(Phase::Loading);
                log::debug!("materializing {} from {}", self.path, self.dir.display());
                match build_folder(&self.dir, self.depth, &self.path, &self.inner, context) {
                    Ok(value) => {
                        *self.real.borrow_mut() = Some(value.clone());
                        self.phase.set(Phase::Ready);
                        // Becoming the node: the real node's enumerable
                        // properties land on the backing target so key
                        // enumeration matches an eager build.
                        self.inner
                            .support()
                            .copy_props(&self.target.clone().into(), &value, true, context)?;
                        self.inner.mark_materialized(&self.path);
                        Ok(value)
                    }
                    Err(err) => {
                        self.phase.set(Phase::Error);
                        let message = err.to_string();
                        *self.error.borrow_mut() = Some(message.clone());
                        Err(JsNativeError::error().with_message(message).into())
                    }
                }
            }
        }
    }

    fn is_resolved(&self) -> bool {
        self.phase.get() == Phase::Ready
    }
}

#[derive(Debug, Trace, Finalize)]
struct TrapCaptures {
    state: Gc<PlaceholderState>,
}

fn key_of(args: &[JsValue], context: &mut Context) -> JsResult<Option<String>> {
    let key = args.get_or_undefined(1);
    if key.is_string() {
        Ok(Some(key.to_string(context)?.to_std_string_escaped()))
    } else {
        Ok(None)
    }
}

/// Creates a placeholder proxy for the sub-folder at `dir`.
pub(crate) fn make_placeholder(
    dir: &Path,
    path: &str,
    depth: usize,
    inner: &Gc<InstanceInner>,
    context: &mut Context,
) -> JsResult<JsObject> {
    let segment = path.rsplit('.').next().unwrap_or(path);
    let target = FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_fn_ptr(|_, _, _| Ok(JsValue::undefined())),
    )
    .name(JsString::from(segment))
    .length(0)
    .build();
    let target = JsObject::from(target);

    let state = Gc::new(PlaceholderState {
        inner: inner.clone(),
        target: target.clone(),
        real: GcRefCell::new(None),
        dir: dir.to_path_buf(),
        path: path.to_owned(),
        depth,
        phase: Cell::new(Phase::Unresolved),
        error: RefCell::new(None),
    });

    let get_trap = unsafe { NativeFunction::from_closure_with_captures(
        |_, args, captures, context| {
            let state = &captures.state;
            let Some(key) = key_of(args, context)? else {
                return Ok(JsValue::undefined());
            };
            match key.as_str() {
                "__slothletPath" => return Ok(JsString::from(state.path.as_str()).into()),
                "__slothletPlaceholder" => return Ok((!state.is_resolved()).into()),
                // Before resolution the placeholder must not look like a
                // thenable, or awaiting an API sub-tree would try to chain
                // on it.
                "then" if !state.is_resolved() => return Ok(JsValue::undefined()),
                _ => {}
            }
            let real = state.ensure(context)?;
            match real.as_object() {
                Some(node) => node.get(JsString::from(key.as_str()), context),
                None => Ok(JsValue::undefined()),
            }
        },
        TrapCaptures {
            state: state.clone(),
        },
    ) };

    let set_trap = unsafe { NativeFunction::from_closure_with_captures(
        |_, args, captures, context| {
            let Some(key) = key_of(args, context)? else {
                return Ok(false.into());
            };
            let value = args.get_or_undefined(2).clone();
            let real = captures.state.ensure(context)?;
            if let Some(node) = real.as_object() {
                node.set(JsString::from(key.as_str()), value, false, context)?;
            }
            Ok(true.into())
        },
        TrapCaptures {
            state: state.clone(),
        },
    ) };

    let has_trap = unsafe { NativeFunction::from_closure_with_captures(
        |_, args, captures, context| {
            let state = &captures.state;
            let Some(key) = key_of(args, context)? else {
                return Ok(false.into());
            };
            if matches!(key.as_str(), "__slothletPath" | "__slothletPlaceholder") {
                return Ok(true.into());
            }
            let real = state.ensure(context)?;
            match real.as_object() {
                Some(node) => Ok(node
                    .has_property(JsString::from(key.as_str()), context)?
                    .into()),
                None => Ok(false.into()),
            }
        },
        TrapCaptures {
            state: state.clone(),
        },
    ) };

    let apply_trap = unsafe { NativeFunction::from_closure_with_captures(
        |_, args, captures, context| {
            let real = captures.state.ensure(context)?;
            let this = args.get_or_undefined(1).clone();
            let call_args = match args.get_or_undefined(2).as_object() {
                Some(list) => array_values(&list.clone(), context)?,
                None => Vec::new(),
            };
            match real.as_object().filter(|node| node.is_callable()) {
                Some(callable) => callable.call(&this, &call_args, context),
                None => Err(JsNativeError::typ()
                    .with_message(format!(
                        "`{}` is not callable",
                        captures.state.path
                    ))
                    .into()),
            }
        },
        TrapCaptures {
            state: state.clone(),
        },
    ) };

    let handler = ObjectInitializer::new(context)
        .function(get_trap, js_string!("get"), 3)
        .function(set_trap, js_string!("set"), 4)
        .function(has_trap, js_string!("has"), 2)
        .function(apply_trap, js_string!("apply"), 3)
        .build();

    let proxy = inner
        .support()
        .make_proxy(&target.into(), &handler, context)?;
    inner.register_placeholder(proxy.clone());
    Ok(proxy)
}
