//! Serializable description of a composite API.

use serde::Serialize;

use boa_engine::{js_string, Context, JsValue};
use boa_gc::Gc;

use crate::error::{SlothletError, SlothletResult};
use crate::instance::InstanceInner;

/// Recursion cap for pathological self-referential composites.
const MAX_DEPTH: usize = 32;

/// One reachable node of the composite tree.
#[derive(Debug, Clone, Serialize)]
pub struct DescribeNode {
    /// Dotted path from the root; empty for the root itself.
    pub path: String,
    /// `"function"`, `"object"`, `"value"` or `"placeholder"`.
    pub kind: String,
    /// Metadata carried by the node, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Child nodes, keyed by their final path segment.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DescribeNode>,
}

/// Walks the composite below `value` and produces its description.
///
/// Unresolved lazy placeholders are reported as `"placeholder"` leaves and
/// are *not* materialized by the walk.
pub(crate) fn describe_value(
    value: &JsValue,
    path: &str,
    inner: &Gc<InstanceInner>,
    context: &mut Context,
    depth: usize,
) -> SlothletResult<DescribeNode> {
    let err = |e: &boa_engine::JsError| SlothletError::Load {
        path: path.into(),
        message: e.to_string(),
    };

    let Some(object) = value.as_object().cloned() else {
        return Ok(DescribeNode {
            path: path.to_owned(),
            kind: "value".into(),
            metadata: None,
            children: Vec::new(),
        });
    };

    let unresolved = object
        .get(js_string!("__slothletPlaceholder"), context)
        .map_err(|e| err(&e))?
        .to_boolean();
    if unresolved {
        return Ok(DescribeNode {
            path: path.to_owned(),
            kind: "placeholder".into(),
            metadata: None,
            children: Vec::new(),
        });
    }

    let metadata = {
        let value = object
            .get(js_string!("__metadata"), context)
            .map_err(|e| err(&e))?;
        if value.is_undefined() {
            None
        } else {
            value.to_json(context).ok()
        }
    };

    let kind = if object.is_callable() {
        "function"
    } else {
        "object"
    };

    let mut children = Vec::new();
    if depth < MAX_DEPTH {
        let keys = inner
            .support()
            .enumerable_keys(value, context)
            .map_err(|e| err(&e))?;
        for key in keys {
            let member = object
                .get(boa_engine::JsString::from(key.as_str()), context)
                .map_err(|e| err(&e))?;
            let child_path = crate::builder::shape::join_path(path, &key);
            children.push(describe_value(&member, &child_path, inner, context, depth + 1)?);
        }
    }

    Ok(DescribeNode {
        path: path.to_owned(),
        kind: kind.into(),
        metadata,
        children,
    })
}
