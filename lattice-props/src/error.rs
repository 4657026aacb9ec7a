//! Error types for the property runtime.
//!
//! Every failure is local to the access that caused it: a failed coercion
//! leaves the store untouched, a failed getter leaves the handle's
//! dependencies untouched, and nothing poisons the runtime.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by schema compilation, property access, and transactions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A malformed or conflicting definition entry (strict schema policy).
    #[error("invalid definition for `{property}` (field `{field}`): {reason}")]
    Schema {
        property: String,
        field: &'static str,
        reason: String,
    },

    /// A write to a computed property that has no setter.
    #[error("`{property}` is computed and has no setter")]
    WriteRejected { property: String },

    /// `stop()` was called without a matching `start()`.
    #[error("batch stop() called without a matching start()")]
    TransactionImbalance,

    /// A type coercer could not convert the incoming value.
    #[error("cannot coerce value to `{type_name}`: {reason}")]
    Coercion {
        type_name: &'static str,
        reason: String,
    },

    /// A user getter failed.
    #[error("getter for `{property}` failed: {reason}")]
    Getter { property: String, reason: String },

    /// A failure reported by a user hook (setter, default factory, listener).
    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub(crate) fn schema(
        property: impl Into<String>,
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::Schema {
            property: property.into(),
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn coercion(type_name: &'static str, reason: impl Into<String>) -> Self {
        Self::Coercion {
            type_name,
            reason: reason.into(),
        }
    }

    /// Build a getter failure for `property`.
    pub fn getter(property: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Getter {
            property: property.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a free-form error from a user hook.
    pub fn custom(reason: impl std::fmt::Display) -> Self {
        Self::Custom(reason.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_names_property_and_field() {
        let err = Error::schema("age", "type", "unknown type `nmuber`");
        let msg = err.to_string();
        assert!(msg.contains("`age`"));
        assert!(msg.contains("`type`"));
        assert!(msg.contains("nmuber"));
    }

    #[test]
    fn getter_error_wraps_display() {
        let err = Error::getter("total", 42);
        assert_eq!(
            err,
            Error::Getter {
                property: "total".into(),
                reason: "42".into()
            }
        );
    }
}
