use std::sync::Arc;

use thiserror::Error;

use crate::bytecode::verify::VerifyError;
use crate::lang::error_object::ErrorObject;
use crate::lang::value::Object;

/// Errors a script can catch.
///
/// Raised by operators, indexing, calls and natives, or by `Throw`. When no
/// handler takes one, the run ends with [`VmError::Uncaught`].
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("invalid operator: {left} {op} {right}")]
    InvalidOperator {
        op: String,
        left: String,
        right: String,
    },

    #[error("not indexable: {0}")]
    NotIndexable(String),

    #[error("not index-assignable: {0}")]
    NotIndexAssignable(String),

    #[error("not iterable: {0}")]
    NotIterable(String),

    #[error("not callable: {0}")]
    NotCallable(String),

    #[error("wrong number of arguments: want={want}, got={got}")]
    WrongNumArgs { want: String, got: usize },

    #[error("unexpected named argument: {0}")]
    UnexpectedNamedArg(String),

    #[error("invalid type for argument '{name}': expected {expected}, found {found}")]
    ArgumentType {
        name: String,
        expected: String,
        found: String,
    },

    #[error("index out of bounds: index {index}, length {length}")]
    IndexOutOfBounds { index: i64, length: usize },

    #[error("invalid index type: expected {expected}, found {found}")]
    InvalidIndex { expected: String, found: String },

    #[error("zero division")]
    ZeroDivision,

    #[error("cannot convert {from} to {to}")]
    Conversion { from: String, to: String },

    #[error("native function '{0}' is not linked")]
    UnlinkedNative(String),

    #[error("{0}")]
    Native(String),

    #[error("{0}")]
    Thrown(Arc<ErrorObject>),
}

impl RuntimeError {
    /// Name bound to the error object a catch block receives.
    pub fn name(&self) -> &str {
        match self {
            RuntimeError::InvalidOperator { .. } => "InvalidOperatorError",
            RuntimeError::NotIndexable(_) => "NotIndexableError",
            RuntimeError::NotIndexAssignable(_) => "NotIndexAssignableError",
            RuntimeError::NotIterable(_) => "NotIterableError",
            RuntimeError::NotCallable(_) => "NotCallableError",
            RuntimeError::WrongNumArgs { .. } => "WrongNumArgumentsError",
            RuntimeError::UnexpectedNamedArg(_) => "UnexpectedNamedArgError",
            RuntimeError::ArgumentType { .. } => "InvalidArgumentTypeError",
            RuntimeError::IndexOutOfBounds { .. } => "IndexOutOfBoundsError",
            RuntimeError::InvalidIndex { .. } => "InvalidIndexError",
            RuntimeError::ZeroDivision => "ZeroDivisionError",
            RuntimeError::Conversion { .. } => "TypeConversionError",
            RuntimeError::UnlinkedNative(_) => "UnlinkedNativeError",
            RuntimeError::Native(_) => "error",
            RuntimeError::Thrown(e) => &e.name,
        }
    }

    /// Wraps a thrown script value.
    pub fn thrown(value: Object) -> Self {
        match value {
            Object::Error(e) => RuntimeError::Thrown(e),
            other => RuntimeError::Thrown(Arc::new(
                ErrorObject::new("error", other.to_string()).with_cause(other),
            )),
        }
    }

    /// Error object bound by a catch block.
    pub fn to_object(&self) -> Object {
        match self {
            RuntimeError::Thrown(e) => Object::Error(e.clone()),
            other => {
                let message = other.to_string();
                Object::Error(Arc::new(ErrorObject::new(other.name(), message)))
            }
        }
    }
}

/// How a run ended when it did not return a value.
#[derive(Debug, Error)]
pub enum VmError {
    /// A catchable error reached the outermost frame without a handler.
    #[error("runtime error: {error}{}", call_stack(.trace))]
    Uncaught {
        #[source]
        error: RuntimeError,
        /// Innermost frame first: `name at offset` plus a source position
        /// when the program carries a file set.
        trace: Vec<String>,
    },
    /// Malformed bytecode or a resource limit: unknown opcode, stack or
    /// frame overflow, step limit.
    #[error("fatal: {0}")]
    Fatal(String),
    /// The abort handle was triggered.
    #[error("aborted")]
    Aborted,
    /// Static verification rejected the program before execution.
    #[error("{0}")]
    Verify(#[from] VerifyError),
}

fn call_stack(trace: &[String]) -> String {
    if trace.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n  call stack:");
    for (i, frame) in trace.iter().enumerate() {
        out.push_str(&format!("\n    {}: {}", i, frame));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thrown_wraps_plain_values() {
        let err = RuntimeError::thrown(Object::string("boom"));
        assert_eq!(err.name(), "error");
        assert_eq!(err.to_string(), "error: boom");
        let obj = err.to_object();
        assert_eq!(obj.index_get(&Object::string("cause")).unwrap(), Object::string("boom"));
    }

    #[test]
    fn test_fault_becomes_named_error_object() {
        let obj = RuntimeError::NotIndexable("int".to_string()).to_object();
        assert_eq!(
            obj.index_get(&Object::string("name")).unwrap(),
            Object::string("NotIndexableError")
        );
        assert_eq!(
            obj.index_get(&Object::string("message")).unwrap(),
            Object::string("not indexable: int")
        );
    }

    #[test]
    fn test_uncaught_display_lists_trace() {
        let err = VmError::Uncaught {
            error: RuntimeError::ZeroDivision,
            trace: vec!["f at 3".to_string(), "main at 10".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "runtime error: zero division\n  call stack:\n    0: f at 3\n    1: main at 10"
        );
    }

    #[test]
    fn test_uncaught_exposes_its_cause() {
        use std::error::Error as _;

        let err = VmError::Uncaught {
            error: RuntimeError::ZeroDivision,
            trace: Vec::new(),
        };
        assert_eq!(err.to_string(), "runtime error: zero division");
        let source = err.source().map(|e| e.to_string());
        assert_eq!(source.as_deref(), Some("zero division"));
        assert!(VmError::Aborted.source().is_none());
    }
}
