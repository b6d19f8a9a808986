//! Write-once metadata objects and the introspection surface.
//!
//! Every composed callable carries a `__metadata` object guarded by a proxy:
//! assignments to an existing field are silent no-ops, explicit redefinition
//! attempts throw, deletions are rejected, and new fields are accepted and
//! then frozen. The introspection functions (`metadata.get`, `metadata.self`,
//! `metadata.caller`) resolve metadata through the composite or through the
//! active frame stack.

use boa_engine::object::ObjectInitializer;
use boa_engine::property::PropertyDescriptor;
use boa_engine::{
    js_string, Context, JsArgs, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction,
};
use boa_gc::{Finalize, Gc, Trace};

use crate::error::SlothletError;
use crate::instance::InstanceInner;
use crate::support::Support;

fn frozen_descriptor(value: JsValue) -> PropertyDescriptor {
    PropertyDescriptor::builder()
        .value(value)
        .writable(false)
        .enumerable(true)
        .configurable(false)
        .build()
}

fn trap_target(args: &[JsValue]) -> JsResult<JsObject> {
    args.get_or_undefined(0)
        .as_object()
        .cloned()
        .ok_or_else(|| {
            JsNativeError::typ()
                .with_message("proxy trap called without a target")
                .into()
        })
}

fn key_string(key: &JsValue, context: &mut Context) -> JsResult<Option<String>> {
    if key.is_string() {
        Ok(Some(key.to_string(context)?.to_std_string_escaped()))
    } else {
        Ok(None)
    }
}

/// Builds a guarded metadata object seeded with `fields`.
pub(crate) fn make_metadata(
    fields: &[(&str, JsValue)],
    support: &Support,
    context: &mut Context,
) -> JsResult<JsObject> {
    let target = JsObject::with_object_proto(context.intrinsics());
    for (key, value) in fields {
        target.define_property_or_throw(
            JsString::from(*key),
            frozen_descriptor(value.clone()),
            context,
        )?;
    }

    let set_trap = NativeFunction::from_fn_ptr(|_, args, context| {
        let target = trap_target(args)?;
        let key = args.get_or_undefined(1).clone();
        let value = args.get_or_undefined(2).clone();
        let Some(name) = key_string(&key, context)? else {
            return Ok(false.into());
        };
        if target.has_own_property(JsString::from(name.as_str()), context)? {
            // Overwrite by assignment is a silent no-op.
            return Ok(true.into());
        }
        target.define_property_or_throw(
            JsString::from(name.as_str()),
            frozen_descriptor(value),
            context,
        )?;
        Ok(true.into())
    });

    let define_trap = NativeFunction::from_fn_ptr(|_, args, context| {
        let target = trap_target(args)?;
        let key = args.get_or_undefined(1).clone();
        let descriptor = args.get_or_undefined(2).clone();
        let Some(name) = key_string(&key, context)? else {
            return Ok(false.into());
        };
        if target.has_own_property(JsString::from(name.as_str()), context)? {
            return Err(SlothletError::MetadataLock { field: name }.into());
        }
        let value = descriptor
            .as_object()
            .map(|desc| desc.get(js_string!("value"), context))
            .transpose()?
            .unwrap_or_default();
        target.define_property_or_throw(
            JsString::from(name.as_str()),
            frozen_descriptor(value),
            context,
        )?;
        Ok(true.into())
    });

    let delete_trap = NativeFunction::from_fn_ptr(|_, _args, _context| Ok(false.into()));

    let handler = ObjectInitializer::new(context)
        .function(set_trap, js_string!("set"), 4)
        .function(define_trap, js_string!("defineProperty"), 3)
        .function(delete_trap, js_string!("deleteProperty"), 2)
        .build();

    support.make_proxy(&target.into(), &handler, context)
}

/// Own string-keyed property names of `object`, in definition order.
pub(crate) fn own_string_keys(object: &JsObject, context: &mut Context) -> JsResult<Vec<String>> {
    let mut keys = Vec::new();
    for key in object.own_property_keys(context)? {
        if let boa_engine::property::PropertyKey::String(name) = key {
            keys.push(name.to_std_string_escaped());
        }
    }
    Ok(keys)
}

/// Walks a dotted path from `root`. Missing segments yield `undefined`.
pub(crate) fn resolve_dotted(
    root: &JsValue,
    path: &str,
    context: &mut Context,
) -> JsResult<JsValue> {
    if path.is_empty() {
        return Ok(root.clone());
    }
    let mut current = root.clone();
    for segment in path.split('.') {
        let Some(object) = current.as_object().cloned() else {
            return Ok(JsValue::undefined());
        };
        current = object.get(JsString::from(segment), context)?;
    }
    Ok(current)
}

fn metadata_of(value: &JsValue, context: &mut Context) -> JsResult<JsValue> {
    match value.as_object() {
        Some(object) => object.get(js_string!("__metadata"), context),
        None => Ok(JsValue::undefined()),
    }
}

#[derive(Debug, Trace, Finalize)]
struct IntrospectionCaptures {
    inner: Gc<InstanceInner>,
}

/// Builds the `metadata` export of the runtime module.
pub(crate) fn introspection_object(
    inner: &Gc<InstanceInner>,
    context: &mut Context,
) -> JsResult<JsObject> {
    let get = unsafe { NativeFunction::from_closure_with_captures(
        |_, args, captures, context| {
            let path = args.get_or_undefined(0);
            let path = if path.is_undefined() {
                String::new()
            } else {
                path.to_string(context)?.to_std_string_escaped()
            };
            let root = captures.inner.api_root();
            let value = resolve_dotted(&root, &path, context)?;
            metadata_of(&value, context)
        },
        IntrospectionCaptures {
            inner: inner.clone(),
        },
    ) };

    let self_fn = unsafe { NativeFunction::from_closure_with_captures(
        |_, _args, captures, context| {
            let Some(frame) = crate::runtime::current_frame(&captures.inner) else {
                return Ok(JsValue::undefined());
            };
            let root = captures.inner.api_root();
            let value = resolve_dotted(&root, &frame.path, context)?;
            metadata_of(&value, context)
        },
        IntrospectionCaptures {
            inner: inner.clone(),
        },
    ) };

    let caller_fn = unsafe { NativeFunction::from_closure_with_captures(
        |_, _args, captures, context| {
            // One frame above the currently executing callable.
            let caller_path = {
                let frames = captures.inner.frames();
                let frames = frames.borrow();
                frames
                    .len()
                    .checked_sub(2)
                    .and_then(|i| frames.get(i).map(|f| f.path.clone()))
            };
            let Some(path) = caller_path else {
                return Ok(JsValue::undefined());
            };
            let root = captures.inner.api_root();
            let value = resolve_dotted(&root, &path, context)?;
            metadata_of(&value, context)
        },
        IntrospectionCaptures {
            inner: inner.clone(),
        },
    ) };

    Ok(ObjectInitializer::new(context)
        .function(get, js_string!("get"), 1)
        .function(self_fn, js_string!("self"), 0)
        .function(caller_fn, js_string!("caller"), 0)
        .build())
}
