//! Compilation errors

use crate::ast::Span;
use crate::oracle::OracleError;
use thiserror::Error;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Error)]
pub enum CompileError {
    // ------------------------------------------------------------------
    // Build-time unsupported constructs
    // ------------------------------------------------------------------
    #[error("Unsupported construct at {span}: {construct}")]
    Unsupported { construct: String, span: Span },

    // ------------------------------------------------------------------
    // Type resolution (reported as-is from the type oracle)
    // ------------------------------------------------------------------
    #[error(transparent)]
    TypeResolution(#[from] OracleError),

    // ------------------------------------------------------------------
    // Layout inconsistencies
    // ------------------------------------------------------------------
    #[error("Field `{field}` of class `{class}` shadows the field inherited from `{ancestor}`")]
    FieldShadowing {
        class: String,
        field: String,
        ancestor: String,
    },

    #[error("Base class `{base}` of `{class}` is not a compiled class of this module")]
    UnknownBase { class: String, base: String },

    #[error("Inheritance cycle through class `{class}`")]
    InheritanceCycle { class: String },

    #[error("Class `{class}` cannot subclass final class `{base}`")]
    FinalBase { class: String, base: String },

    #[error("Method `{class}.{method}` overrides final method of `{ancestor}`")]
    FinalOverride {
        class: String,
        method: String,
        ancestor: String,
    },

    #[error("Method `{class}.{method}` does not match the signature of the method it overrides in `{ancestor}`")]
    IncompatibleOverride {
        class: String,
        method: String,
        ancestor: String,
    },

    // ------------------------------------------------------------------
    // Semantic errors found while building IR
    // ------------------------------------------------------------------
    #[error("Undeclared field `{field}` on class `{class}` at {span}")]
    UndeclaredField {
        class: String,
        field: String,
        span: Span,
    },

    #[error("Undefined name `{name}` at {span}")]
    UnknownName { name: String, span: Span },

    #[error("`{callee}` expects {expected} argument(s), got {found} at {span}")]
    Arity {
        callee: String,
        expected: usize,
        found: usize,
        span: Span,
    },

    #[error("Internal compiler error: {message}")]
    Internal { message: String },
}

impl CompileError {
    pub fn unsupported(construct: impl Into<String>, span: Span) -> Self {
        CompileError::Unsupported {
            construct: construct.into(),
            span,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CompileError::Internal {
            message: message.into(),
        }
    }
}
