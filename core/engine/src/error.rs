//! Error types raised by the composition runtime.
//!
//! Loader-time failures surface out of the factory or out of
//! `addApi`/`reload`; call-time errors from user modules propagate unchanged
//! as [`JsError`]s. Nothing is retried.

use std::path::PathBuf;

use boa_engine::{JsError, JsNativeError};

/// Convenience alias for fallible operations in this crate.
pub type SlothletResult<T> = Result<T, SlothletError>;

/// The error kinds produced by the loader, the lifecycle surface and the
/// metadata guard.
///
/// Every variant that concerns a module or an API path carries that path in
/// its message. The composite state of the owning instance is left intact by
/// all of them; loader errors are all-or-nothing per sub-tree.
#[derive(Debug, thiserror::Error)]
pub enum SlothletError {
    /// A module source could not be read, parsed or evaluated.
    #[error("failed to load module `{path}`: {message}")]
    Load {
        /// Path of the offending module file or directory.
        path: PathBuf,
        /// Engine or I/O message describing the failure.
        message: String,
    },

    /// Two sources map to the same property name after sanitization.
    #[error("name collision on `{name}`: `{first}` and `{second}` both sanitize to it")]
    NameCollision {
        /// The colliding sanitized property name.
        name: String,
        /// Source of the first claimant.
        first: String,
        /// Source of the rejected claimant.
        second: String,
    },

    /// An `addApi` or `reload` would overwrite a path owned by another module.
    #[error("ownership denied for `{path}`: owned by `{owner}`")]
    OwnershipDenied {
        /// The contested API path.
        path: String,
        /// Identifier of the owning module.
        owner: String,
    },

    /// Incompatible configuration options.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Use of an instance after `shutdown`.
    #[error("instance `{0}` has been shut down")]
    Lifecycle(String),

    /// Attempt to overwrite an already-frozen metadata field.
    #[error("metadata field `{field}` is frozen and cannot be redefined")]
    MetadataLock {
        /// The locked field name.
        field: String,
    },

    /// The sanitizer produced an empty property name.
    #[error("segment `{segment}` sanitizes to an empty name")]
    InvalidName {
        /// The raw filesystem segment.
        segment: String,
    },

    /// Filesystem error outside of a specific module load.
    #[error("i/o error on `{path}`: {source}")]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl SlothletError {
    /// Builds a [`SlothletError::Load`] from an engine error, keeping the
    /// engine's message.
    pub(crate) fn load(path: impl Into<PathBuf>, err: &JsError) -> Self {
        Self::Load {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl From<SlothletError> for JsError {
    fn from(err: SlothletError) -> Self {
        match &err {
            SlothletError::Config(_) | SlothletError::MetadataLock { .. } => {
                JsNativeError::typ().with_message(err.to_string()).into()
            }
            _ => JsNativeError::error().with_message(err.to_string()).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_path() {
        let err = SlothletError::Load {
            path: PathBuf::from("api/math/math.mjs"),
            message: "unexpected token".into(),
        };
        assert!(err.to_string().contains("api/math/math.mjs"));

        let err = SlothletError::NameCollision {
            name: "util".into(),
            first: "util.mjs".into(),
            second: "util".into(),
        };
        assert!(err.to_string().contains("util.mjs"));
    }
}
