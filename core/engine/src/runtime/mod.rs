//! Context propagation.
//!
//! Every callable exposed on a composite API is wrapped so that, for the
//! duration of the call, the instance's live `self`/`context`/`reference`
//! bindings resolve against a [`ContextFrame`] describing the caller's
//! instance. Frames live on a per-instance stack; the innermost frame wins,
//! and the frame-tracking job queue ([`queue::FrameQueue`]) re-enters the
//! frame that was active when a promise job was enqueued, so bindings stay
//! correct across `await` boundaries.

pub(crate) mod bindings;
pub(crate) mod emitter;
pub(crate) mod queue;

use boa_engine::object::FunctionObjectBuilder;
use boa_engine::{js_string, Context, JsObject, JsResult, JsString, JsValue, NativeFunction};
use boa_gc::{Finalize, Gc, Trace};

use crate::config::RuntimeKind;
use crate::error::SlothletError;
use crate::instance::InstanceInner;

/// The per-call record the live bindings read.
#[derive(Debug, Clone, Trace, Finalize)]
pub(crate) struct ContextFrame {
    /// Owning instance, so diagnostics can tell frames apart.
    #[unsafe_ignore_trace]
    pub instance_id: String,
    /// Dotted path of the wrapped callable that entered this frame.
    #[unsafe_ignore_trace]
    pub path: String,
    /// The composite API root at the time of the call.
    pub self_value: JsValue,
    /// The instance's context object.
    pub context: JsObject,
    /// The instance's reference object.
    pub reference: JsObject,
    /// Per-call overlay; writes to `context` members land here.
    pub overlay: JsObject,
}

impl ContextFrame {
    /// Builds the frame for a call on `inner` entering `path`.
    ///
    /// A pending overlay (installed by `call_with_overlay`) seeds the frame
    /// overlay and is consumed by the first frame that picks it up. Nested
    /// calls inherit the caller's overlay object, so request-scoped data
    /// threads through the whole call chain.
    pub(crate) fn for_call(
        inner: &Gc<InstanceInner>,
        path: &str,
        context: &mut Context,
    ) -> JsResult<Self> {
        let overlay = match inner.take_pending_overlay() {
            Some(seed) => seed,
            None => match current_frame(inner) {
                Some(parent) => parent.overlay.clone(),
                None => JsObject::with_object_proto(context.intrinsics()),
            },
        };
        Ok(Self {
            instance_id: inner.id().to_owned(),
            path: path.to_owned(),
            self_value: inner.api_root(),
            context: inner.context_object(),
            reference: inner.reference_object(),
            overlay,
        })
    }
}

/// Enters `frame` on `inner` according to the instance's runtime kind and
/// returns a guard that exits it.
///
/// `ScopedStorage` pushes onto the frame stack and pops on drop.
/// `LiveInstance` overwrites the single live slot and leaves it in place:
/// the last call wins, by design of that runtime kind.
pub(crate) fn enter_frame(inner: &Gc<InstanceInner>, frame: ContextFrame) -> FrameGuard {
    log::trace!(
        "entering frame for {} at `{}`",
        frame.instance_id,
        frame.path
    );
    let pops = match inner.runtime_kind() {
        RuntimeKind::ScopedStorage => {
            inner.frames().borrow_mut().push(frame);
            true
        }
        RuntimeKind::LiveInstance => {
            *inner.live_frame().borrow_mut() = Some(frame);
            false
        }
    };
    FrameGuard {
        inner: inner.clone(),
        pops,
    }
}

/// Exits a frame when dropped. Exists so early returns through `?` cannot
/// leave a stale frame on the stack.
pub(crate) struct FrameGuard {
    inner: Gc<InstanceInner>,
    pops: bool,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if self.pops {
            self.inner.frames().borrow_mut().pop();
        }
    }
}

/// Captures moved into every wrapper function.
#[derive(Debug, Trace, Finalize)]
struct WrapperCaptures {
    inner: Gc<InstanceInner>,
    target: JsObject,
    #[unsafe_ignore_trace]
    path: String,
}

/// Wraps `target` so invoking it enters a [`ContextFrame`] for `inner`.
///
/// The wrapper keeps the callable's observable identity: `typeof` stays
/// `"function"`, `name` and `length` mirror the underlying function, own
/// enumerable properties (attached named exports) remain reachable, and the
/// dotted path is assigned if absent so hooks can target the callable.
pub(crate) fn wrap_callable(
    target: &JsObject,
    path: &str,
    inner: &Gc<InstanceInner>,
    context: &mut Context,
) -> JsResult<JsObject> {
    let name = target.get(js_string!("name"), context)?;
    let name = if name.is_undefined() {
        JsString::default()
    } else {
        name.to_string(context)?
    };
    let length = target.get(js_string!("length"), context)?;
    let length = if length.is_undefined() {
        0
    } else {
        length.to_length(context)? as usize
    };

    let wrapper = FunctionObjectBuilder::new(
        context.realm(),
        unsafe { NativeFunction::from_closure_with_captures(
            |this, args, captures, context| {
                let inner = &captures.inner;
                if inner.is_shut_down() {
                    return Err(SlothletError::Lifecycle(inner.id().to_owned()).into());
                }
                inner.run_hooks(&captures.path, args, context)?;
                let frame = ContextFrame::for_call(inner, &captures.path, context)?;
                let _guard = enter_frame(inner, frame);
                captures.target.call(this, args, context)
            },
            WrapperCaptures {
                inner: inner.clone(),
                target: target.clone(),
                path: path.to_owned(),
            },
        ) },
    )
    .name(name)
    .length(length)
    .build();

    let wrapper_obj = JsObject::from(wrapper);
    let support = inner.support();
    // Attached named exports travel with the callable.
    support.copy_props(
        &wrapper_obj.clone().into(),
        &target.clone().into(),
        true,
        context,
    )?;
    support.define_hidden(
        &wrapper_obj.clone().into(),
        "__slothletPath",
        &JsString::from(path).into(),
        context,
    )?;
    Ok(wrapper_obj)
}

/// The innermost frame observable right now, if any.
pub(crate) fn current_frame(inner: &InstanceInner) -> Option<ContextFrame> {
    match inner.runtime_kind() {
        RuntimeKind::ScopedStorage => inner.frames().borrow().last().cloned(),
        RuntimeKind::LiveInstance => inner.live_frame().borrow().clone(),
    }
}
