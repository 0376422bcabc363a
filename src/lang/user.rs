use std::any::Any;
use std::fmt;

use super::function::NamedArgs;
use super::iter::ObjectIterator;
use super::operator::Token;
use super::value::Object;
use crate::runtime::runtime_error::RuntimeError;

/// Host-defined value kind.
///
/// Every capability has a default that reports the operation as
/// unsupported, so implementors only override what their type can do.
pub trait UserObject: fmt::Debug + fmt::Display + Send + Sync + Any {
    fn type_name(&self) -> &str;

    fn is_falsy(&self) -> bool {
        false
    }

    fn equals(&self, other: &Object) -> bool {
        match other {
            Object::User(o) => std::ptr::addr_eq(self as *const Self, std::sync::Arc::as_ptr(o)),
            _ => false,
        }
    }

    fn index_get(&self, _index: &Object) -> Result<Object, RuntimeError> {
        Err(RuntimeError::NotIndexable(self.type_name().to_string()))
    }

    fn index_set(&self, _index: Object, _value: Object) -> Result<(), RuntimeError> {
        Err(RuntimeError::NotIndexAssignable(self.type_name().to_string()))
    }

    fn binary_op(&self, op: Token, right: &Object) -> Result<Object, RuntimeError> {
        Err(RuntimeError::InvalidOperator {
            op: op.symbol().to_string(),
            left: self.type_name().to_string(),
            right: right.type_name().to_string(),
        })
    }

    /// `None` means the value is not callable.
    fn call(&self, _args: &[Object], _named: &NamedArgs) -> Option<Result<Object, RuntimeError>> {
        None
    }

    fn deep_copy(&self) -> Option<Object> {
        None
    }

    fn iterate(&self) -> Option<Box<dyn ObjectIterator>> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}
