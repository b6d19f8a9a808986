//! Engine-side support functions.
//!
//! A handful of object-shape operations (enumerable key probing, property
//! copying, in-place reconciliation) are easiest to express in the engine's
//! own language, so they are compiled once per context from a small script
//! and kept as callable handles for the lifetime of the instance.

use boa_engine::object::builtins::JsFunction;
use boa_engine::{js_string, Context, JsObject, JsResult, JsString, JsValue, Source};
use boa_gc::{Finalize, Trace};

const SUPPORT_SRC: &str = r#"({
    enumerableKeys: (v) =>
        v !== null && (typeof v === "object" || typeof v === "function")
            ? Object.keys(v)
            : [],
    copyProps: (dst, src, overwrite) => {
        for (const k of Object.keys(src)) {
            if (overwrite || !(k in dst)) {
                dst[k] = src[k];
            }
        }
        return dst;
    },
    defineHidden: (obj, key, value) => {
        Object.defineProperty(obj, key, {
            value,
            writable: false,
            enumerable: false,
            configurable: true,
        });
        return obj;
    },
    defineIfAbsent: (obj, key, value) => {
        if (!Object.getOwnPropertyDescriptor(obj, key)) {
            Object.defineProperty(obj, key, {
                value,
                writable: true,
                enumerable: true,
                configurable: true,
            });
        }
        return obj;
    },
    deleteProp: (obj, key) => {
        delete obj[key];
        return obj;
    },
    reconcile: (dst, src) => {
        for (const k of Object.keys(dst)) {
            if (!(k in src)) {
                delete dst[k];
            }
        }
        for (const k of Object.keys(src)) {
            dst[k] = src[k];
        }
        return dst;
    },
    makeProxy: (target, handler) => new Proxy(target, handler),
})"#;

/// Collects an array-like object into a vector of values.
pub(crate) fn array_values(array: &JsObject, context: &mut Context) -> JsResult<Vec<JsValue>> {
    let length = array
        .get(js_string!("length"), context)?
        .to_length(context)?;
    let mut values = Vec::with_capacity(length as usize);
    for i in 0..length {
        values.push(array.get(i as u32, context)?);
    }
    Ok(values)
}

/// Callable handles into the compiled support script.
#[derive(Debug, Clone, Trace, Finalize)]
pub(crate) struct Support {
    enumerable_keys: JsFunction,
    copy_props: JsFunction,
    define_hidden: JsFunction,
    define_if_absent: JsFunction,
    delete_prop: JsFunction,
    reconcile: JsFunction,
    make_proxy: JsFunction,
}

fn function_member(obj: &JsObject, name: &str, context: &mut Context) -> JsResult<JsFunction> {
    let value = obj.get(JsString::from(name), context)?;
    let object = value
        .as_object()
        .cloned()
        .ok_or_else(|| boa_engine::JsNativeError::typ().with_message("support member missing"))?;
    JsFunction::from_object(object).ok_or_else(|| {
        boa_engine::JsNativeError::typ()
            .with_message("support member is not callable")
            .into()
    })
}

impl Support {
    /// Compiles the support script in `context`.
    pub(crate) fn compile(context: &mut Context) -> JsResult<Self> {
        let table = context.eval(Source::from_bytes(SUPPORT_SRC))?;
        let table = table
            .as_object()
            .cloned()
            .ok_or_else(|| boa_engine::JsNativeError::typ().with_message("support table"))?;
        Ok(Self {
            enumerable_keys: function_member(&table, "enumerableKeys", context)?,
            copy_props: function_member(&table, "copyProps", context)?,
            define_hidden: function_member(&table, "defineHidden", context)?,
            define_if_absent: function_member(&table, "defineIfAbsent", context)?,
            delete_prop: function_member(&table, "deleteProp", context)?,
            reconcile: function_member(&table, "reconcile", context)?,
            make_proxy: function_member(&table, "makeProxy", context)?,
        })
    }

    /// Own enumerable string keys of `value`, or empty for non-objects.
    pub(crate) fn enumerable_keys(
        &self,
        value: &JsValue,
        context: &mut Context,
    ) -> JsResult<Vec<String>> {
        let keys = self
            .enumerable_keys
            .call(&JsValue::undefined(), &[value.clone()], context)?;
        let keys = keys
            .as_object()
            .cloned()
            .ok_or_else(|| boa_engine::JsNativeError::typ().with_message("key array"))?;
        let length = keys
            .get(js_string!("length"), context)?
            .to_u32(context)? as usize;
        let mut out = Vec::with_capacity(length);
        for i in 0..length {
            let key = keys.get(i as u32, context)?;
            out.push(key.to_string(context)?.to_std_string_escaped());
        }
        Ok(out)
    }

    /// Copies own enumerable properties of `src` onto `dst`.
    pub(crate) fn copy_props(
        &self,
        dst: &JsValue,
        src: &JsValue,
        overwrite: bool,
        context: &mut Context,
    ) -> JsResult<()> {
        self.copy_props.call(
            &JsValue::undefined(),
            &[dst.clone(), src.clone(), overwrite.into()],
            context,
        )?;
        Ok(())
    }

    /// Defines a non-enumerable, non-writable property.
    pub(crate) fn define_hidden(
        &self,
        obj: &JsValue,
        key: &str,
        value: &JsValue,
        context: &mut Context,
    ) -> JsResult<()> {
        self.define_hidden.call(
            &JsValue::undefined(),
            &[obj.clone(), JsString::from(key).into(), value.clone()],
            context,
        )?;
        Ok(())
    }

    /// Defines an enumerable data property only when absent. Used for the
    /// `reference` merge, which must not clobber loaded properties and must
    /// go through property definition so intrinsic keys like `name` work on
    /// function roots.
    pub(crate) fn define_if_absent(
        &self,
        obj: &JsValue,
        key: &str,
        value: &JsValue,
        context: &mut Context,
    ) -> JsResult<()> {
        self.define_if_absent.call(
            &JsValue::undefined(),
            &[obj.clone(), JsString::from(key).into(), value.clone()],
            context,
        )?;
        Ok(())
    }

    /// Deletes an own property.
    pub(crate) fn delete_prop(
        &self,
        obj: &JsValue,
        key: &str,
        context: &mut Context,
    ) -> JsResult<()> {
        self.delete_prop.call(
            &JsValue::undefined(),
            &[obj.clone(), JsString::from(key).into()],
            context,
        )?;
        Ok(())
    }

    /// Wraps `target` in a `Proxy` with the given handler object.
    pub(crate) fn make_proxy(
        &self,
        target: &JsValue,
        handler: &JsObject,
        context: &mut Context,
    ) -> JsResult<JsObject> {
        let proxy = self.make_proxy.call(
            &JsValue::undefined(),
            &[target.clone(), handler.clone().into()],
            context,
        )?;
        proxy
            .as_object()
            .cloned()
            .ok_or_else(|| {
                boa_engine::JsNativeError::typ()
                    .with_message("proxy construction returned a non-object")
                    .into()
            })
    }

    /// Overwrites `dst`'s own enumerable properties so they mirror `src`,
    /// deleting the ones `src` no longer has. Keeps `dst`'s identity; hot
    /// reload relies on this.
    pub(crate) fn reconcile(
        &self,
        dst: &JsValue,
        src: &JsValue,
        context: &mut Context,
    ) -> JsResult<()> {
        self.reconcile
            .call(&JsValue::undefined(), &[dst.clone(), src.clone()], context)?;
        Ok(())
    }
}
