//! Export-shape analysis of a loaded module.
//!
//! Classification works on the module namespace object after evaluation, so
//! top-level effects have already run, exactly as the host module system
//! requires. Every duck-typed question is answered once here and recorded as
//! a tagged variant; downstream code matches on the variants and never
//! re-probes values.

use indexmap::IndexMap;

use boa_engine::{js_string, Context, JsObject, JsResult, JsString, JsValue, Module};

use crate::support::Support;

/// The kind of a module's default export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DefaultKind {
    /// No default export.
    None,
    /// A function without own enumerable data.
    Function,
    /// A function carrying own enumerable data properties.
    CallableWithProperties,
    /// A plain object.
    Object,
    /// A scalar-shaped value.
    Primitive,
    /// The default is the same binding as the named export `name`; treated
    /// as "the default is actually that named export" for flattening.
    SelfReferential(String),
}

/// The kind of a single named export's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NamedKind {
    Function,
    Object,
    Primitive,
}

/// Everything the shape builder needs to know about one module's exports.
#[derive(Debug, Clone)]
pub(crate) struct ParsedExports {
    pub default_kind: DefaultKind,
    /// Named exports in namespace order, name → kind.
    pub named: IndexMap<String, NamedKind>,
    /// A non-self-referential default alongside named exports.
    pub has_mixed_exports: bool,
}

impl ParsedExports {
    /// `true` when the module contributes nothing but named bindings to the
    /// flattening rules. A self-referential default *is* its named binding,
    /// so it counts as named-only here.
    pub(crate) fn named_only(&self) -> bool {
        !self.has_real_default() && !self.named.is_empty()
    }

    /// `true` when the flattening rules should treat this module as having a
    /// real (non-self-referential) default.
    pub(crate) fn has_real_default(&self) -> bool {
        !matches!(
            self.default_kind,
            DefaultKind::None | DefaultKind::SelfReferential(_)
        )
    }
}

/// Reads `default` and the named bindings off a module namespace and
/// classifies them.
pub(crate) fn analyze_namespace(
    module: &Module,
    support: &Support,
    context: &mut Context,
) -> JsResult<ParsedExports> {
    let namespace = module.namespace(context);
    let export_names = namespace_keys(&namespace, context)?;

    let mut default_value = None;
    let mut named = IndexMap::new();
    for name in &export_names {
        let value = namespace.get(JsString::from(name.as_str()), context)?;
        if name == "default" {
            default_value = Some(value);
        } else {
            named.insert(name.clone(), classify_named(&value));
        }
    }

    let default_kind = match default_value {
        None => DefaultKind::None,
        Some(default) => {
            // A default that is one of the named bindings is a re-export of
            // that binding, not a separate default.
            let self_ref = export_names
                .iter()
                .filter(|n| n.as_str() != "default")
                .find(|n| {
                    namespace
                        .get(JsString::from(n.as_str()), context)
                        .is_ok_and(|v| !v.is_undefined() && v.strict_equals(&default))
                });
            match self_ref {
                Some(name) => DefaultKind::SelfReferential(name.clone()),
                None => classify_default(&default, support, context)?,
            }
        }
    };

    let has_mixed_exports = !named.is_empty()
        && !matches!(
            default_kind,
            DefaultKind::None | DefaultKind::SelfReferential(_)
        );

    Ok(ParsedExports {
        default_kind,
        named,
        has_mixed_exports,
    })
}

fn namespace_keys(namespace: &JsObject, context: &mut Context) -> JsResult<Vec<String>> {
    let mut names = Vec::new();
    for key in namespace.own_property_keys(context)? {
        if let boa_engine::property::PropertyKey::String(name) = key {
            names.push(name.to_std_string_escaped());
        }
    }
    Ok(names)
}

fn classify_default(
    default: &JsValue,
    support: &Support,
    context: &mut Context,
) -> JsResult<DefaultKind> {
    if let Some(object) = default.as_object() {
        if object.is_callable() {
            let own = support.enumerable_keys(default, context)?;
            return Ok(if own.is_empty() {
                DefaultKind::Function
            } else {
                DefaultKind::CallableWithProperties
            });
        }
        return Ok(DefaultKind::Object);
    }
    Ok(DefaultKind::Primitive)
}

fn classify_named(value: &JsValue) -> NamedKind {
    match value.as_object() {
        Some(object) if object.is_callable() => NamedKind::Function,
        Some(_) => NamedKind::Object,
        None => NamedKind::Primitive,
    }
}

/// Reads the code-level `name` of a callable, for function-name preference.
pub(crate) fn function_name(value: &JsValue, context: &mut Context) -> JsResult<Option<String>> {
    let Some(object) = value.as_object() else {
        return Ok(None);
    };
    if !object.is_callable() {
        return Ok(None);
    }
    let name = object.get(js_string!("name"), context)?;
    if name.is_undefined() {
        return Ok(None);
    }
    let name = name.to_string(context)?.to_std_string_escaped();
    Ok(if name.is_empty() { None } else { Some(name) })
}
