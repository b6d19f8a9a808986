//! An event-emitter class with frame-restoring listener registration.
//!
//! Listeners registered inside a wrapped call fire later, outside the
//! original frame. While an instance is live, the prototype's registration
//! methods are patched so every listener is wrapped to re-enter the frame
//! that was active at registration time, the way the live bindings expect.
//! Wrappers carry the owning instance id; shutdown reverts the patch and
//! removes only that instance's wrappers.

use boa_engine::object::builtins::JsArray;
use boa_engine::object::{FunctionObjectBuilder, ObjectInitializer};
use boa_engine::property::PropertyDescriptor;
use boa_engine::{
    js_string, Context, JsArgs, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction,
};
use boa_gc::{Finalize, Gc, GcRefCell, Trace};

use crate::instance::InstanceInner;
use crate::runtime::{current_frame, enter_frame, ContextFrame};
use crate::support::array_values;

const LISTENERS_KEY: &str = "__slothletListeners";
const ORIGINAL_KEY: &str = "__slothletOriginal";
const ONCE_KEY: &str = "__slothletOnce";
const PATCHED_KEY: &str = "__slothletPatched";

/// Constructor and prototype of the realm's `EventEmitter`.
#[derive(Debug, Clone, Trace, Finalize)]
pub(crate) struct EmitterHandles {
    pub(crate) constructor: JsObject,
    pub(crate) prototype: JsObject,
}

/// Bookkeeping for one instance's prototype patch.
#[derive(Debug, Trace, Finalize)]
pub(crate) struct EmitterPatch {
    prototype: JsObject,
    /// Method name → the unpatched function.
    originals: GcRefCell<Vec<(JsString, JsValue)>>,
    /// Wrappers registered while the patch was active:
    /// `(emitter, event, wrapper)`.
    wrappers: GcRefCell<Vec<(JsObject, JsString, JsObject)>>,
}

fn this_emitter(this: &JsValue) -> JsResult<JsObject> {
    this.as_object().cloned().ok_or_else(|| {
        JsNativeError::typ()
            .with_message("EventEmitter method called on a non-object")
            .into()
    })
}

fn hidden_descriptor(value: JsValue) -> PropertyDescriptor {
    PropertyDescriptor::builder()
        .value(value)
        .writable(false)
        .enumerable(false)
        .configurable(true)
        .build()
}

/// The emitter's event → listener-array map, created on first use.
fn listeners_map(emitter: &JsObject, context: &mut Context) -> JsResult<JsObject> {
    let map = emitter.get(JsString::from(LISTENERS_KEY), context)?;
    if let Some(map) = map.as_object() {
        return Ok(map.clone());
    }
    let map = JsObject::with_object_proto(context.intrinsics());
    emitter.define_property_or_throw(
        JsString::from(LISTENERS_KEY),
        hidden_descriptor(map.clone().into()),
        context,
    )?;
    Ok(map)
}

fn event_array(
    map: &JsObject,
    event: &JsString,
    context: &mut Context,
) -> JsResult<Option<JsObject>> {
    let array = map.get(event.clone(), context)?;
    Ok(array.as_object().cloned())
}

fn array_from(values: Vec<JsValue>, context: &mut Context) -> JsObject {
    JsArray::from_iter(values, context).into()
}

fn store_listener(
    emitter: &JsObject,
    event: &JsString,
    listener: JsValue,
    prepend: bool,
    context: &mut Context,
) -> JsResult<()> {
    let map = listeners_map(emitter, context)?;
    let mut values = match event_array(&map, event, context)? {
        Some(array) => array_values(&array, context)?,
        None => Vec::new(),
    };
    if prepend {
        values.insert(0, listener);
    } else {
        values.push(listener);
    }
    let array = array_from(values, context);
    map.set(event.clone(), array, false, context)?;
    Ok(())
}

fn event_name(args: &[JsValue], context: &mut Context) -> JsResult<JsString> {
    args.get_or_undefined(0).to_string(context)
}

fn marker_matches(
    candidate: &JsValue,
    listener: &JsValue,
    context: &mut Context,
) -> JsResult<bool> {
    if candidate.strict_equals(listener) {
        return Ok(true);
    }
    if let Some(object) = candidate.as_object() {
        let original = object.get(JsString::from(ORIGINAL_KEY), context)?;
        if !original.is_undefined() && original.strict_equals(listener) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn drop_listener(
    emitter: &JsObject,
    event: &JsString,
    listener: &JsValue,
    context: &mut Context,
) -> JsResult<()> {
    let map = listeners_map(emitter, context)?;
    let Some(array) = event_array(&map, event, context)? else {
        return Ok(());
    };
    let mut kept = Vec::new();
    let mut removed = false;
    for value in array_values(&array, context)? {
        if !removed && marker_matches(&value, listener, context)? {
            removed = true;
            continue;
        }
        kept.push(value);
    }
    let array = array_from(kept, context);
    map.set(event.clone(), array, false, context)?;
    Ok(())
}

fn on_impl(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let emitter = this_emitter(this)?;
    let event = event_name(args, context)?;
    store_listener(&emitter, &event, args.get_or_undefined(1).clone(), false, context)?;
    Ok(this.clone())
}

fn prepend_impl(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let emitter = this_emitter(this)?;
    let event = event_name(args, context)?;
    store_listener(&emitter, &event, args.get_or_undefined(1).clone(), true, context)?;
    Ok(this.clone())
}

fn once_impl(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let emitter = this_emitter(this)?;
    let event = event_name(args, context)?;
    let listener = args.get_or_undefined(1).clone();
    let wrapper = once_wrapper(&listener, context)?;
    store_listener(&emitter, &event, wrapper.into(), false, context)?;
    Ok(this.clone())
}

#[derive(Debug, Trace, Finalize)]
struct OnceCaptures {
    listener: JsValue,
}

/// A listener that `emit` removes after its first invocation, recognized by
/// the once marker.
fn once_wrapper(listener: &JsValue, context: &mut Context) -> JsResult<JsObject> {
    let wrapper = FunctionObjectBuilder::new(
        context.realm(),
        unsafe { NativeFunction::from_closure_with_captures(
            |this, args, captures, context| match captures.listener.as_object() {
                Some(callable) => callable.call(this, args, context),
                None => Ok(JsValue::undefined()),
            },
            OnceCaptures {
                listener: listener.clone(),
            },
        ) },
    )
    .name(js_string!("once"))
    .length(0)
    .build();
    let wrapper = JsObject::from(wrapper);
    wrapper.define_property_or_throw(
        JsString::from(ONCE_KEY),
        hidden_descriptor(true.into()),
        context,
    )?;
    wrapper.define_property_or_throw(
        JsString::from(ORIGINAL_KEY),
        hidden_descriptor(listener.clone()),
        context,
    )?;
    Ok(wrapper)
}

fn emit_impl(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let emitter = this_emitter(this)?;
    let event = event_name(args, context)?;
    let map = listeners_map(&emitter, context)?;
    let Some(array) = event_array(&map, &event, context)? else {
        return Ok(false.into());
    };
    let listeners = array_values(&array, context)?;
    if listeners.is_empty() {
        return Ok(false.into());
    }
    let call_args = args.get(1..).unwrap_or_default().to_vec();
    for listener in &listeners {
        let Some(callable) = listener.as_object().filter(|o| o.is_callable()).cloned() else {
            continue;
        };
        let is_once = callable.get(JsString::from(ONCE_KEY), context)?.to_boolean();
        if is_once {
            drop_listener(&emitter, &event, listener, context)?;
        }
        callable.call(this, &call_args, context)?;
    }
    Ok(true.into())
}

fn remove_impl(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let emitter = this_emitter(this)?;
    let event = event_name(args, context)?;
    drop_listener(&emitter, &event, args.get_or_undefined(1), context)?;
    Ok(this.clone())
}

fn remove_all_impl(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let emitter = this_emitter(this)?;
    let map = listeners_map(&emitter, context)?;
    if args.get_or_undefined(0).is_undefined() {
        for key in crate::meta::own_string_keys(&map, context)? {
            map.set(JsString::from(key.as_str()), JsValue::undefined(), false, context)?;
        }
    } else {
        let event = event_name(args, context)?;
        map.set(event, JsValue::undefined(), false, context)?;
    }
    Ok(this.clone())
}

fn listener_count_impl(
    this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let emitter = this_emitter(this)?;
    let event = event_name(args, context)?;
    let map = listeners_map(&emitter, context)?;
    let count = match event_array(&map, &event, context)? {
        Some(array) => array_values(&array, context)?.len(),
        None => 0,
    };
    Ok((count as i32).into())
}

#[derive(Debug, Trace, Finalize)]
struct ConstructorCaptures {
    prototype: JsObject,
}

/// Builds the `EventEmitter` class for one realm and registers it globally.
pub(crate) fn install(context: &mut Context) -> JsResult<EmitterHandles> {
    let prototype = ObjectInitializer::new(context)
        .function(NativeFunction::from_fn_ptr(on_impl), js_string!("on"), 2)
        .function(
            NativeFunction::from_fn_ptr(on_impl),
            js_string!("addListener"),
            2,
        )
        .function(
            NativeFunction::from_fn_ptr(prepend_impl),
            js_string!("prependListener"),
            2,
        )
        .function(NativeFunction::from_fn_ptr(once_impl), js_string!("once"), 2)
        .function(NativeFunction::from_fn_ptr(emit_impl), js_string!("emit"), 1)
        .function(NativeFunction::from_fn_ptr(remove_impl), js_string!("off"), 2)
        .function(
            NativeFunction::from_fn_ptr(remove_impl),
            js_string!("removeListener"),
            2,
        )
        .function(
            NativeFunction::from_fn_ptr(remove_all_impl),
            js_string!("removeAllListeners"),
            1,
        )
        .function(
            NativeFunction::from_fn_ptr(listener_count_impl),
            js_string!("listenerCount"),
            1,
        )
        .build();

    let constructor = FunctionObjectBuilder::new(
        context.realm(),
        unsafe { NativeFunction::from_closure_with_captures(
            |_, _args, captures, context| {
                let emitter = JsObject::with_object_proto(context.intrinsics());
                emitter.set_prototype(Some(captures.prototype.clone()));
                listeners_map(&emitter, context)?;
                Ok(emitter.into())
            },
            ConstructorCaptures {
                prototype: prototype.clone(),
            },
        ) },
    )
    .name(js_string!("EventEmitter"))
    .length(0)
    .constructor(true)
    .build();

    let constructor = JsObject::from(constructor);
    constructor.set(js_string!("prototype"), prototype.clone(), false, context)?;
    prototype.define_property_or_throw(
        js_string!("constructor"),
        hidden_descriptor(constructor.clone().into()),
        context,
    )?;

    context.register_global_property(
        js_string!("EventEmitter"),
        constructor.clone(),
        boa_engine::property::Attribute::WRITABLE | boa_engine::property::Attribute::CONFIGURABLE,
    )?;

    Ok(EmitterHandles {
        constructor,
        prototype,
    })
}

#[derive(Debug, Trace, Finalize)]
struct RegistrationCaptures {
    inner: Gc<InstanceInner>,
    original: JsObject,
}

#[derive(Debug, Trace, Finalize)]
struct RestoreCaptures {
    inner: Gc<InstanceInner>,
    listener: JsValue,
    frame: Option<ContextFrame>,
}

/// Wraps `listener` so that invoking it re-enters `frame`.
fn frame_restoring_listener(
    inner: &Gc<InstanceInner>,
    listener: &JsValue,
    frame: Option<ContextFrame>,
    context: &mut Context,
) -> JsResult<JsObject> {
    let wrapper = FunctionObjectBuilder::new(
        context.realm(),
        unsafe { NativeFunction::from_closure_with_captures(
            |this, args, captures, context| {
                let Some(callable) = captures.listener.as_object().cloned() else {
                    return Ok(JsValue::undefined());
                };
                let _guard = captures
                    .frame
                    .clone()
                    .map(|frame| enter_frame(&captures.inner, frame));
                callable.call(this, args, context)
            },
            RestoreCaptures {
                inner: inner.clone(),
                listener: listener.clone(),
                frame,
            },
        ) },
    )
    .name(js_string!("bound"))
    .length(0)
    .build();
    let wrapper = JsObject::from(wrapper);
    wrapper.define_property_or_throw(
        JsString::from(ORIGINAL_KEY),
        hidden_descriptor(listener.clone()),
        context,
    )?;
    wrapper.define_property_or_throw(
        js_string!("__slothletEmitterWrap"),
        hidden_descriptor(JsString::from(inner.id()).into()),
        context,
    )?;
    Ok(wrapper)
}

/// Patches the prototype's registration methods so listeners restore the
/// frame active at registration time.
pub(crate) fn patch_propagation(
    inner: &Gc<InstanceInner>,
    handles: &EmitterHandles,
    context: &mut Context,
) -> JsResult<()> {
    let patch = EmitterPatch {
        prototype: handles.prototype.clone(),
        originals: GcRefCell::new(Vec::new()),
        wrappers: GcRefCell::new(Vec::new()),
    };

    for method in ["on", "addListener", "prependListener", "once"] {
        let name = JsString::from(method);
        let original = handles.prototype.get(name.clone(), context)?;
        let Some(original_fn) = original.as_object().cloned() else {
            continue;
        };

        let patched = FunctionObjectBuilder::new(
            context.realm(),
            unsafe { NativeFunction::from_closure_with_captures(
                |this, args, captures, context| {
                    let event = args.get_or_undefined(0).clone();
                    let listener = args.get_or_undefined(1);
                    let registered = if listener.as_object().is_some_and(|o| o.is_callable()) {
                        let frame = current_frame(&captures.inner);
                        let wrapped = frame_restoring_listener(
                            &captures.inner,
                            listener,
                            frame,
                            context,
                        )?;
                        if let Some(emitter) = this.as_object() {
                            let event_str = event.to_string(context)?;
                            captures.inner.record_emitter_wrapper(
                                emitter.clone(),
                                event_str,
                                wrapped.clone(),
                            );
                        }
                        wrapped.into()
                    } else {
                        listener.clone()
                    };
                    captures
                        .original
                        .call(this, &[event, registered], context)
                },
                RegistrationCaptures {
                    inner: inner.clone(),
                    original: original_fn.clone(),
                },
            ) },
        )
        .name(name.clone())
        .length(2)
        .build();
        let patched = JsObject::from(patched);
        patched.define_property_or_throw(
            JsString::from(PATCHED_KEY),
            hidden_descriptor(JsString::from(inner.id()).into()),
            context,
        )?;

        patch
            .originals
            .borrow_mut()
            .push((name.clone(), original.clone()));
        handles.prototype.set(name, patched, false, context)?;
    }

    inner.set_emitter_patch(patch);
    Ok(())
}

/// Reverts the prototype patch and strips this instance's still-registered
/// wrappers. A no-op when the currently installed methods belong to another
/// instance.
pub(crate) fn unpatch_propagation(
    inner: &Gc<InstanceInner>,
    context: &mut Context,
) -> JsResult<()> {
    let Some(patch) = inner.take_emitter_patch() else {
        return Ok(());
    };

    for (name, original) in patch.originals.borrow().iter() {
        let current = patch.prototype.get(name.clone(), context)?;
        let ours = current
            .as_object()
            .map(|o| o.get(JsString::from(PATCHED_KEY), context))
            .transpose()?
            .is_some_and(|id| {
                id.as_string()
                    .is_some_and(|s| s.to_std_string_escaped() == inner.id())
            });
        if ours {
            patch
                .prototype
                .set(name.clone(), original.clone(), false, context)?;
        }
    }

    for (emitter, event, wrapper) in patch.wrappers.borrow().iter() {
        drop_listener(emitter, event, &wrapper.clone().into(), context)?;
    }
    Ok(())
}

impl EmitterPatch {
    pub(crate) fn record_wrapper(&self, emitter: JsObject, event: JsString, wrapper: JsObject) {
        self.wrappers.borrow_mut().push((emitter, event, wrapper));
    }
}
