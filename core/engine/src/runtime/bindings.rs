//! The `"slothlet"` runtime module.
//!
//! User modules import live bindings from the well-known specifier:
//!
//! ```text
//! import { self, context, reference, metadata, EventEmitter } from "slothlet";
//! ```
//!
//! `self`, `context` and `reference` are proxies whose traps consult the
//! innermost [`ContextFrame`](super::ContextFrame) of the owning instance at
//! read time, so modules observe the state of whichever instance invoked
//! them. Reads outside any frame see an empty, null-shaped value. Writes to
//! `context` members land in the frame's per-call overlay, never in the
//! instance default.

use boa_engine::module::SyntheticModuleInitializer;
use boa_engine::object::ObjectInitializer;
use boa_engine::{
    js_string, Context, JsArgs, JsObject, JsResult, JsValue, Module, NativeFunction,
};
use boa_gc::{Finalize, Gc, Trace};

use crate::instance::InstanceInner;
use crate::meta;
use crate::runtime::current_frame;

/// Which frame field a live proxy serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    SelfValue,
    Context,
    Reference,
}

#[derive(Debug, Trace, Finalize)]
struct BindingCaptures {
    inner: Gc<InstanceInner>,
    #[unsafe_ignore_trace]
    which: Binding,
}

// Symbol-keyed access falls through to nothing; the live bindings only model
// string properties.
fn string_key(args: &[JsValue]) -> Option<JsValue> {
    let key = args.get_or_undefined(1);
    key.is_string().then(|| key.clone())
}

fn get_member(object: &JsObject, key: &JsValue, context: &mut Context) -> JsResult<JsValue> {
    let key = key.to_string(context)?;
    object.get(key, context)
}

fn has_member(object: &JsObject, key: &JsValue, context: &mut Context) -> JsResult<bool> {
    let key = key.to_string(context)?;
    object.has_property(key, context)
}

fn live_proxy(
    inner: &Gc<InstanceInner>,
    which: Binding,
    context: &mut Context,
) -> JsResult<JsObject> {
    let target = JsObject::with_object_proto(context.intrinsics());

    let get_trap = unsafe { NativeFunction::from_closure_with_captures(
        |_, args, captures, context| {
            let Some(key) = string_key(args) else {
                return Ok(JsValue::undefined());
            };
            let Some(frame) = current_frame(&captures.inner) else {
                return Ok(JsValue::undefined());
            };
            match captures.which {
                Binding::SelfValue => match frame.self_value.as_object() {
                    Some(root) => get_member(&root.clone(), &key, context),
                    None => Ok(JsValue::undefined()),
                },
                Binding::Context => {
                    let name = key.to_string(context)?;
                    if frame.overlay.has_own_property(name.clone(), context)? {
                        frame.overlay.get(name, context)
                    } else {
                        frame.context.get(name, context)
                    }
                }
                Binding::Reference => get_member(&frame.reference, &key, context),
            }
        },
        BindingCaptures {
            inner: inner.clone(),
            which,
        },
    ) };

    let set_trap = unsafe { NativeFunction::from_closure_with_captures(
        |_, args, captures, context| {
            let Some(key) = string_key(args) else {
                return Ok(false.into());
            };
            let value = args.get_or_undefined(2).clone();
            let Some(frame) = current_frame(&captures.inner) else {
                // Nothing to write to; swallow rather than throw in strict
                // mode callers.
                return Ok(true.into());
            };
            match captures.which {
                Binding::Context => {
                    let name = key.to_string(context)?;
                    frame.overlay.set(name, value, false, context)?;
                }
                Binding::Reference => {
                    let name = key.to_string(context)?;
                    frame.reference.set(name, value, false, context)?;
                }
                Binding::SelfValue => {}
            }
            Ok(true.into())
        },
        BindingCaptures {
            inner: inner.clone(),
            which,
        },
    ) };

    let has_trap = unsafe { NativeFunction::from_closure_with_captures(
        |_, args, captures, context| {
            let Some(key) = string_key(args) else {
                return Ok(false.into());
            };
            let Some(frame) = current_frame(&captures.inner) else {
                return Ok(false.into());
            };
            let found = match captures.which {
                Binding::SelfValue => match frame.self_value.as_object() {
                    Some(root) => has_member(&root.clone(), &key, context)?,
                    None => false,
                },
                Binding::Context => {
                    has_member(&frame.overlay, &key, context)?
                        || has_member(&frame.context, &key, context)?
                }
                Binding::Reference => has_member(&frame.reference, &key, context)?,
            };
            Ok(found.into())
        },
        BindingCaptures {
            inner: inner.clone(),
            which,
        },
    ) };

    let handler = ObjectInitializer::new(context)
        .function(get_trap, js_string!("get"), 3)
        .function(set_trap, js_string!("set"), 4)
        .function(has_trap, js_string!("has"), 2)
        .build();

    inner
        .support()
        .make_proxy(&target.into(), &handler, context)
}

#[derive(Debug, Trace, Finalize)]
struct RuntimeModuleCaptures {
    self_proxy: JsObject,
    context_proxy: JsObject,
    reference_proxy: JsObject,
    metadata: JsObject,
    emitter: JsObject,
}

/// Builds the synthetic module served for the `"slothlet"` specifier.
pub(crate) fn create_runtime_module(
    inner: &Gc<InstanceInner>,
    emitter_constructor: &JsObject,
    context: &mut Context,
) -> JsResult<Module> {
    let captures = RuntimeModuleCaptures {
        self_proxy: live_proxy(inner, Binding::SelfValue, context)?,
        context_proxy: live_proxy(inner, Binding::Context, context)?,
        reference_proxy: live_proxy(inner, Binding::Reference, context)?,
        metadata: meta::introspection_object(inner, context)?,
        emitter: emitter_constructor.clone(),
    };

    Ok(Module::synthetic(
        &[
            js_string!("self"),
            js_string!("context"),
            js_string!("reference"),
            js_string!("metadata"),
            js_string!("EventEmitter"),
        ],
        unsafe { SyntheticModuleInitializer::from_closure_with_captures(
            |module, captures, _context| {
                module.set_export(&js_string!("self"), captures.self_proxy.clone().into())?;
                module.set_export(
                    &js_string!("context"),
                    captures.context_proxy.clone().into(),
                )?;
                module.set_export(
                    &js_string!("reference"),
                    captures.reference_proxy.clone().into(),
                )?;
                module.set_export(&js_string!("metadata"), captures.metadata.clone().into())?;
                module.set_export(&js_string!("EventEmitter"), captures.emitter.clone().into())?;
                Ok(())
            },
            captures,
        ) },
        None,
        None,
        context,
    ))
}
