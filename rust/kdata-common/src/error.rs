use std::fmt::Display;

use thiserror::Error;

/// The error type returned by every fallible kdata operation.
///
/// The payload is boxed to keep `Result<T>` small; use [`Error::kind`] (or
/// [`Error::root_kind`] to look through added context) to match on the failure.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    /// Returns the innermost error kind, skipping any `Context` wrappers.
    pub fn root_kind(&self) -> &ErrorKind {
        let mut kind = self.kind();
        while let ErrorKind::Context { source, .. } = kind {
            kind = source.kind();
        }
        kind
    }

    /// Wraps this error with a higher-level description of the failed operation.
    pub fn with_context(self, context: impl Into<String>) -> Error {
        Error(
            ErrorKind::Context {
                context: context.into(),
                source: self,
            }
            .into(),
        )
    }

    pub fn shape_incompatible(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::ShapeIncompatible {
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn schema_incompatible(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::SchemaIncompatible {
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn missing_attribute(attr: impl Into<String>, schema: impl Display) -> Error {
        Error(
            ErrorKind::MissingAttribute {
                attr: attr.into(),
                schema: schema.to_string(),
            }
            .into(),
        )
    }

    pub fn missing_object_schema(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::MissingObjectSchema {
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn duplicate_item_id() -> Error {
        Error(ErrorKind::DuplicateItemId.into())
    }

    pub fn insufficient_item_id(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InsufficientItemId {
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn immutable_bag_write() -> Error {
        Error(ErrorKind::ImmutableBagWrite.into())
    }

    pub fn conflicting_merge(
        item: impl Display,
        attr: impl Into<String>,
        existing: impl Display,
        incoming: impl Display,
    ) -> Error {
        Error(
            ErrorKind::ConflictingMerge {
                item: item.to_string(),
                attr: attr.into(),
                existing: existing.to_string(),
                incoming: incoming.to_string(),
            }
            .into(),
        )
    }

    pub fn unsupported_value(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::UnsupportedValue {
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_operation(name: impl Into<String>) -> Error {
        Error(ErrorKind::InvalidOperation { name: name.into() }.into())
    }

    pub fn not_implemented(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::NotImplemented {
                message: message.into(),
            }
            .into(),
        )
    }
}

/// Stable taxonomy of kdata failures.
///
/// The rendered messages are part of the contract with callers that wrap them
/// (e.g. an expression evaluator), so they should only change deliberately.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("{message}")]
    ShapeIncompatible { message: String },

    #[error("{message}")]
    SchemaIncompatible { message: String },

    #[error("the attribute '{attr}' is missing on the schema {schema}")]
    MissingAttribute { attr: String, schema: String },

    #[error("object schema is missing: {message}")]
    MissingObjectSchema { message: String },

    #[error("`itemid` cannot have duplicate ItemIds")]
    DuplicateItemId,

    #[error("{message}")]
    InsufficientItemId { message: String },

    #[error("DataBag is immutable, try DataSlice.fork_bag()")]
    ImmutableBagWrite,

    #[error("conflicting values for {attr} for {item}: {existing} vs {incoming}")]
    ConflictingMerge {
        item: String,
        attr: String,
        existing: String,
        incoming: String,
    },

    #[error("unsupported value: {message}")]
    UnsupportedValue { message: String },

    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid operation {name}")]
    InvalidOperation { name: String },

    #[error("not yet implemented: {message}")]
    NotImplemented { message: String },

    #[error("{context}\n\nThe cause is: {source}")]
    Context {
        context: String,
        #[source]
        source: Error,
    },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(_: std::convert::Infallible) -> Self {
        Error::invalid_operation("conversion")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_chain() {
        let err = Error::schema_incompatible("unsupported narrowing cast to INT64")
            .with_context("invalid indices DataSlice is provided");
        assert_eq!(
            err.to_string(),
            "invalid indices DataSlice is provided\n\nThe cause is: unsupported narrowing cast to INT64"
        );
        assert!(matches!(err.kind(), ErrorKind::Context { .. }));
        assert!(matches!(
            err.root_kind(),
            ErrorKind::SchemaIncompatible { .. }
        ));
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            Error::duplicate_item_id().to_string(),
            "`itemid` cannot have duplicate ItemIds"
        );
        assert_eq!(
            Error::conflicting_merge("$001", "a", 1, 2).to_string(),
            "conflicting values for a for $001: 1 vs 2"
        );
        assert_eq!(
            Error::missing_attribute("x", "ENTITY(a=INT32)").to_string(),
            "the attribute 'x' is missing on the schema ENTITY(a=INT32)"
        );
    }
}
