//! # Ember object model
//!
//! Every value the VM touches is an [`Object`]. Scalars are stored inline,
//! containers and callables are shared by reference, and captured locals
//! live in [`ObjectPtr`] cells.
//!
//! ## Conventions
//!
//! - Kind-level failures (bad operator, not indexable, ...) are reported as
//!   [`RuntimeError`](crate::runtime::RuntimeError) values so the engine can
//!   route them to script handlers.
//! - `deep_copy` returns `None` for kinds that are immutable or shared by
//!   identity; callers fall back to a plain clone.

pub mod builtin_type;
pub mod collections;
pub mod error_object;
pub mod function;
pub mod iter;
pub mod operator;
pub mod ptr;
pub mod user;
pub mod value;

pub use builtin_type::BuiltinType;
pub use collections::{Array, Dict, DictMap, SyncDict};
pub use error_object::ErrorObject;
pub use function::{CompiledFunction, NamedArgs, NamedParam, NativeFunction, Param, Symbol};
pub use iter::{IteratorObject, ObjectIterator, SnapshotIter};
pub use operator::Token;
pub use ptr::ObjectPtr;
pub use user::UserObject;
pub use value::{Kind, Object};
