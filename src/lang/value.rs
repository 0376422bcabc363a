use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use super::builtin_type::BuiltinType;
use super::collections::{Array, Dict, DictMap, SyncDict};
use super::error_object::ErrorObject;
use super::function::{CompiledFunction, NativeFunction};
use super::iter::{IteratorObject, SnapshotIter};
use super::ptr::ObjectPtr;
use super::user::UserObject;
use crate::runtime::runtime_error::RuntimeError;

/// Container nesting beyond which comparison gives up and encoding fails.
pub const MAX_NESTING: usize = 512;

/// Runtime value of the ember VM.
///
/// Everything the operand stack, the constant pool, globals and module
/// caches hold is an `Object`. Cloning is cheap: containers are shared by
/// reference, scalars are copied.
#[derive(Debug, Clone, Default)]
pub enum Object {
    #[default]
    Nil,

    /// `true` / `false`.
    Bool(bool),

    /// Two-state flag. Behaves like a bool but keeps its own type.
    Flag(bool),

    Int(i64),
    Uint(u64),
    Char(char),
    Float(f64),
    Decimal(Decimal),

    /// Immutable UTF-8 string.
    String(Arc<str>),

    /// Immutable byte string.
    Bytes(Arc<[u8]>),

    Array(Array),
    Dict(Dict),

    /// Dict whose every access goes through its own lock.
    SyncDict(SyncDict),

    /// Compiled function template, or a closure when `free` is populated.
    Function(Arc<CompiledFunction>),

    /// Host function.
    Native(Arc<NativeFunction>),

    /// Builtin type descriptor; calling it converts its argument.
    Type(BuiltinType),

    /// Boxed cell shared between a frame slot and closures.
    Ptr(ObjectPtr),

    /// Value bound by a catch block.
    Error(Arc<ErrorObject>),

    /// Stateful iterator created by `IterInit`.
    Iterator(IteratorObject),

    /// Host-defined value.
    User(Arc<dyn UserObject>),
}

/// Discriminant of an [`Object`], used where only the shape matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Nil,
    Bool,
    Flag,
    Int,
    Uint,
    Char,
    Float,
    Decimal,
    String,
    Bytes,
    Array,
    Dict,
    SyncDict,
    Function,
    Native,
    Type,
    Ptr,
    Error,
    Iterator,
    User,
}

impl Object {
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Object::String(s.into())
    }

    pub fn bytes(b: impl Into<Arc<[u8]>>) -> Self {
        Object::Bytes(b.into())
    }

    pub fn array(items: Vec<Object>) -> Self {
        Object::Array(Array::new(items))
    }

    pub fn dict(map: DictMap) -> Self {
        Object::Dict(Dict::new(map))
    }

    pub fn sync_dict(map: DictMap) -> Self {
        Object::SyncDict(SyncDict::new(map))
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Object::Error(Arc::new(ErrorObject::new(name, message)))
    }

    pub fn kind(&self) -> Kind {
        match self {
            Object::Nil => Kind::Nil,
            Object::Bool(_) => Kind::Bool,
            Object::Flag(_) => Kind::Flag,
            Object::Int(_) => Kind::Int,
            Object::Uint(_) => Kind::Uint,
            Object::Char(_) => Kind::Char,
            Object::Float(_) => Kind::Float,
            Object::Decimal(_) => Kind::Decimal,
            Object::String(_) => Kind::String,
            Object::Bytes(_) => Kind::Bytes,
            Object::Array(_) => Kind::Array,
            Object::Dict(_) => Kind::Dict,
            Object::SyncDict(_) => Kind::SyncDict,
            Object::Function(_) => Kind::Function,
            Object::Native(_) => Kind::Native,
            Object::Type(_) => Kind::Type,
            Object::Ptr(_) => Kind::Ptr,
            Object::Error(_) => Kind::Error,
            Object::Iterator(_) => Kind::Iterator,
            Object::User(_) => Kind::User,
        }
    }

    /// Type name as seen by scripts and parameter type assertions.
    pub fn type_name(&self) -> &str {
        match self {
            Object::Nil => "nil",
            Object::Bool(_) => "bool",
            Object::Flag(_) => "flag",
            Object::Int(_) => "int",
            Object::Uint(_) => "uint",
            Object::Char(_) => "char",
            Object::Float(_) => "float",
            Object::Decimal(_) => "decimal",
            Object::String(_) => "string",
            Object::Bytes(_) => "bytes",
            Object::Array(_) => "array",
            Object::Dict(_) => "dict",
            Object::SyncDict(_) => "syncDict",
            Object::Function(_) => "compiledFunction",
            Object::Native(_) => "function",
            Object::Type(_) => "type",
            Object::Ptr(_) => "objectPtr",
            Object::Error(_) => "error",
            Object::Iterator(_) => "iterator",
            Object::User(u) => u.type_name(),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Object::Nil)
    }

    pub fn is_falsy(&self) -> bool {
        match self {
            Object::Nil => true,
            Object::Bool(b) | Object::Flag(b) => !b,
            Object::Int(v) => *v == 0,
            Object::Uint(v) => *v == 0,
            Object::Char(c) => *c == '\0',
            Object::Float(f) => *f == 0.0 || f.is_nan(),
            Object::Decimal(d) => d.is_zero(),
            Object::String(s) => s.is_empty(),
            Object::Bytes(b) => b.is_empty(),
            Object::Array(a) => a.len() == 0,
            Object::Dict(d) => d.len() == 0,
            Object::SyncDict(d) => d.len() == 0,
            Object::User(u) => u.is_falsy(),
            Object::Function(_)
            | Object::Native(_)
            | Object::Type(_)
            | Object::Ptr(_)
            | Object::Error(_)
            | Object::Iterator(_) => false,
        }
    }

    /// Script-level equality.
    ///
    /// Numeric kinds compare by value across kinds, bool and flag compare by
    /// truth, containers compare element-wise, callables by identity.
    pub fn equals(&self, other: &Object) -> bool {
        self.equals_at(other, 0)
    }

    fn equals_at(&self, other: &Object, depth: usize) -> bool {
        use Object::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Bool(a) | Flag(a), Bool(b) | Flag(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Uint(a), Uint(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Decimal(a), Decimal(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Array(a), Array(b)) => {
                if a.ptr_eq(b) {
                    return true;
                }
                if depth >= MAX_NESTING {
                    return false;
                }
                let (a, b) = (a.read(), b.read());
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.equals_at(y, depth + 1))
            }
            (Dict(a), Dict(b)) => {
                a.ptr_eq(b)
                    || maps_match(&a.read(), &b.read(), depth, |x, y, d| x.equals_at(y, d))
            }
            (SyncDict(a), SyncDict(b)) => {
                a.ptr_eq(b)
                    || maps_match(&a.read(), &b.read(), depth, |x, y, d| x.equals_at(y, d))
            }
            (Function(a), Function(b)) => Arc::ptr_eq(a, b),
            (Native(a), Native(b)) => Arc::ptr_eq(a, b),
            (Type(a), Type(b)) => a == b,
            (Ptr(a), Ptr(b)) => a.ptr_eq(b),
            (Error(a), Error(b)) => Arc::ptr_eq(a, b) || a == b,
            (Iterator(a), Iterator(b)) => a.ptr_eq(b),
            (User(a), _) => a.equals(other),
            (_, User(b)) => b.equals(self),
            _ => match (self.numeric(), other.numeric()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    fn numeric(&self) -> Option<Numeric> {
        match self {
            Object::Int(v) => Some(Numeric::Int(*v as i128)),
            Object::Uint(v) => Some(Numeric::Int(*v as i128)),
            Object::Char(c) => Some(Numeric::Int(*c as i128)),
            Object::Float(f) => Some(Numeric::Float(*f)),
            Object::Decimal(d) => Some(Numeric::Decimal(*d)),
            _ => None,
        }
    }

    /// Returns a recursive copy for kinds that support copying, `None`
    /// for kinds that are immutable or shared by identity.
    pub fn deep_copy(&self) -> Option<Object> {
        match self {
            Object::Array(a) => Some(Object::Array(a.deep_copy())),
            Object::Dict(d) => Some(Object::Dict(d.deep_copy())),
            Object::SyncDict(d) => Some(Object::SyncDict(d.deep_copy())),
            Object::User(u) => u.deep_copy(),
            _ => None,
        }
    }

    pub fn index_get(&self, index: &Object) -> Result<Object, RuntimeError> {
        match self {
            Object::Array(a) => {
                let items = a.read();
                let i = index.as_index(items.len())?;
                Ok(items[i].clone())
            }
            Object::String(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = index.as_index(chars.len())?;
                Ok(Object::Char(chars[i]))
            }
            Object::Bytes(b) => {
                let i = index.as_index(b.len())?;
                Ok(Object::Int(b[i] as i64))
            }
            Object::Dict(d) => Ok(d.get(&index.to_string()).unwrap_or_default()),
            Object::SyncDict(d) => Ok(d.get(&index.to_string()).unwrap_or_default()),
            Object::Error(e) => Ok(e.select(&index.to_string())),
            Object::User(u) => u.index_get(index),
            _ => Err(RuntimeError::NotIndexable(self.type_name().to_string())),
        }
    }

    pub fn index_set(&self, index: Object, value: Object) -> Result<(), RuntimeError> {
        match self {
            Object::Array(a) => {
                let mut items = a.write();
                let i = index.as_index(items.len())?;
                items[i] = value;
                Ok(())
            }
            Object::Dict(d) => {
                d.insert(index.to_string(), value);
                Ok(())
            }
            Object::SyncDict(d) => {
                d.insert(index.to_string(), value);
                Ok(())
            }
            Object::User(u) => u.index_set(index, value),
            _ => Err(RuntimeError::NotIndexAssignable(
                self.type_name().to_string(),
            )),
        }
    }

    /// `target[low:high]`; a nil bound is open.
    pub fn slice(&self, low: &Object, high: &Object) -> Result<Object, RuntimeError> {
        let len = match self {
            Object::Array(a) => a.len(),
            Object::String(s) => s.chars().count(),
            Object::Bytes(b) => b.len(),
            _ => return Err(RuntimeError::NotIndexable(self.type_name().to_string())),
        };
        let lo = match low {
            Object::Nil => 0,
            other => other.as_bound(len)?,
        };
        let hi = match high {
            Object::Nil => len,
            other => other.as_bound(len)?,
        };
        if lo > hi {
            return Err(RuntimeError::IndexOutOfBounds {
                index: lo as i64,
                length: hi,
            });
        }
        Ok(match self {
            Object::Array(a) => Object::array(a.read()[lo..hi].to_vec()),
            Object::String(s) => Object::string(s.chars().skip(lo).take(hi - lo).collect::<String>()),
            Object::Bytes(b) => Object::bytes(&b[lo..hi]),
            _ => unreachable!("slice target checked above"),
        })
    }

    pub fn iterate(&self) -> Result<IteratorObject, RuntimeError> {
        let entries: Vec<(Object, Object)> = match self {
            Object::Array(a) => a
                .read()
                .iter()
                .enumerate()
                .map(|(i, v)| (Object::Int(i as i64), v.clone()))
                .collect(),
            Object::Dict(d) => dict_entries(&d.read()),
            Object::SyncDict(d) => dict_entries(&d.read()),
            Object::String(s) => s
                .chars()
                .enumerate()
                .map(|(i, c)| (Object::Int(i as i64), Object::Char(c)))
                .collect(),
            Object::Bytes(b) => b
                .iter()
                .enumerate()
                .map(|(i, v)| (Object::Int(i as i64), Object::Int(*v as i64)))
                .collect(),
            Object::User(u) => {
                return u
                    .iterate()
                    .map(IteratorObject::from_boxed)
                    .ok_or_else(|| RuntimeError::NotIterable(self.type_name().to_string()));
            }
            _ => return Err(RuntimeError::NotIterable(self.type_name().to_string())),
        };
        Ok(IteratorObject::new(SnapshotIter::new(entries)))
    }

    fn as_index(&self, len: usize) -> Result<usize, RuntimeError> {
        let index = match self {
            Object::Int(v) => *v,
            Object::Uint(v) => i64::try_from(*v).unwrap_or(i64::MAX),
            other => {
                return Err(RuntimeError::InvalidIndex {
                    expected: "int".to_string(),
                    found: other.type_name().to_string(),
                });
            }
        };
        if index < 0 || index as usize >= len {
            return Err(RuntimeError::IndexOutOfBounds { index, length: len });
        }
        Ok(index as usize)
    }

    fn as_bound(&self, len: usize) -> Result<usize, RuntimeError> {
        // a slice bound may equal the length
        match self {
            Object::Int(v) if *v >= 0 && *v as usize <= len => Ok(*v as usize),
            Object::Uint(v) if *v as usize <= len => Ok(*v as usize),
            Object::Int(v) => Err(RuntimeError::IndexOutOfBounds { index: *v, length: len }),
            Object::Uint(v) => Err(RuntimeError::IndexOutOfBounds {
                index: i64::try_from(*v).unwrap_or(i64::MAX),
                length: len,
            }),
            other => Err(RuntimeError::InvalidIndex {
                expected: "int".to_string(),
                found: other.type_name().to_string(),
            }),
        }
    }

    /// Formats nested values the way a literal would be written.
    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>, path: Option<&Path<'_>>) -> fmt::Result {
        match self {
            Object::String(s) => write!(f, "{:?}", s),
            Object::Char(c) => write!(f, "{:?}", c),
            other => other.fmt_in(f, path),
        }
    }

    /// `path` holds the containers being written around this value; meeting
    /// one of them again prints `[...]` or `{...}`.
    fn fmt_in(&self, f: &mut fmt::Formatter<'_>, path: Option<&Path<'_>>) -> fmt::Result {
        match self {
            Object::Array(a) => {
                let addr = a.addr();
                if path.is_some_and(|p| p.contains(addr)) {
                    return write!(f, "[...]");
                }
                let here = Path { addr, up: path };
                write!(f, "[")?;
                for (i, item) in a.to_vec().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_nested(f, Some(&here))?;
                }
                write!(f, "]")
            }
            Object::Dict(d) => {
                let map = d.read().clone();
                fmt_dict(f, d.addr(), map, path)
            }
            Object::SyncDict(d) => {
                let map = d.read().clone();
                fmt_dict(f, d.addr(), map, path)
            }
            Object::Nil => write!(f, "nil"),
            Object::Bool(b) => write!(f, "{}", b),
            Object::Flag(b) => write!(f, "{}", if *b { "on" } else { "off" }),
            Object::Int(v) => write!(f, "{}", v),
            Object::Uint(v) => write!(f, "{}", v),
            Object::Char(c) => write!(f, "{}", c),
            Object::Float(v) => write!(f, "{}", v),
            Object::Decimal(d) => write!(f, "{}", d),
            Object::String(s) => write!(f, "{}", s),
            Object::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Object::Function(func) => write!(f, "<compiledFunction {}>", func.name),
            Object::Native(n) => write!(f, "<function:{}>", n.name),
            Object::Type(t) => write!(f, "{}", t.name()),
            Object::Ptr(_) => write!(f, "<objectPtr>"),
            Object::Error(e) => write!(f, "{}", e),
            Object::Iterator(_) => write!(f, "<iterator>"),
            Object::User(u) => write!(f, "{}", u),
        }
    }

    /// Same kind and same contents, containers compared element-wise.
    fn same_at(&self, other: &Object, depth: usize) -> bool {
        use Object::*;
        match (self, other) {
            (Array(a), Array(b)) => {
                if a.ptr_eq(b) {
                    return true;
                }
                if depth >= MAX_NESTING {
                    return false;
                }
                let (a, b) = (a.read(), b.read());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.same_at(y, depth + 1))
            }
            (Dict(a), Dict(b)) => {
                a.ptr_eq(b) || maps_match(&a.read(), &b.read(), depth, |x, y, d| x.same_at(y, d))
            }
            (SyncDict(a), SyncDict(b)) => {
                if a.ptr_eq(b) {
                    return true;
                }
                // snapshot one side first so the two read locks are never nested
                let mine = a.read().clone();
                maps_match(&mine, &b.read(), depth, |x, y, d| x.same_at(y, d))
            }
            (Nil, Nil) => true,
            (Bool(a), Bool(b)) | (Flag(a), Flag(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Uint(a), Uint(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits() || a == b,
            (Decimal(a), Decimal(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Function(a), Function(b)) => Arc::ptr_eq(a, b) || a == b,
            (Native(a), Native(b)) => Arc::ptr_eq(a, b) || a.name == b.name,
            (Type(a), Type(b)) => a == b,
            (Ptr(a), Ptr(b)) => a.ptr_eq(b),
            (Error(a), Error(b)) => a == b,
            (Iterator(a), Iterator(b)) => a.ptr_eq(b),
            (User(a), User(b)) => Arc::ptr_eq(a, b) || a.equals(other),
            _ => false,
        }
    }
}

#[derive(Clone, Copy)]
enum Numeric {
    Int(i128),
    Float(f64),
    Decimal(Decimal),
}

impl PartialEq for Numeric {
    fn eq(&self, other: &Self) -> bool {
        match (*self, *other) {
            (Numeric::Int(a), Numeric::Int(b)) => a == b,
            (Numeric::Float(a), Numeric::Float(b)) => a == b,
            (Numeric::Int(a), Numeric::Float(b)) | (Numeric::Float(b), Numeric::Int(a)) => {
                a as f64 == b
            }
            (Numeric::Decimal(a), Numeric::Decimal(b)) => a == b,
            (Numeric::Decimal(d), Numeric::Int(i)) | (Numeric::Int(i), Numeric::Decimal(d)) => {
                Decimal::from_i128(i).is_some_and(|i| i == d)
            }
            (Numeric::Decimal(d), Numeric::Float(x)) | (Numeric::Float(x), Numeric::Decimal(d)) => {
                d.to_f64().is_some_and(|d| d == x)
            }
        }
    }
}

/// Chain of containers currently being formatted, innermost first.
struct Path<'a> {
    addr: usize,
    up: Option<&'a Path<'a>>,
}

impl Path<'_> {
    fn contains(&self, addr: usize) -> bool {
        let mut at = Some(self);
        while let Some(p) = at {
            if p.addr == addr {
                return true;
            }
            at = p.up;
        }
        false
    }
}

fn maps_match(
    a: &DictMap,
    b: &DictMap,
    depth: usize,
    same: impl Fn(&Object, &Object, usize) -> bool,
) -> bool {
    if depth >= MAX_NESTING {
        return false;
    }
    a.len() == b.len()
        && a
            .iter()
            .all(|(k, v)| b.get(k).is_some_and(|other| same(v, other, depth + 1)))
}

fn dict_entries(map: &DictMap) -> Vec<(Object, Object)> {
    map.iter()
        .map(|(k, v)| (Object::string(k.as_str()), v.clone()))
        .collect()
}

/// Structural equality: same kind and same contents. Unlike
/// [`Object::equals`] it never compares across kinds.
impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.same_at(other, 0)
    }
}

/// String conversion. Dict keys are produced through this impl.
impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_in(f, None)
    }
}

fn fmt_dict(
    f: &mut fmt::Formatter<'_>,
    addr: usize,
    map: DictMap,
    path: Option<&Path<'_>>,
) -> fmt::Result {
    if path.is_some_and(|p| p.contains(addr)) {
        return write!(f, "{{...}}");
    }
    let here = Path { addr, up: path };
    write!(f, "{{")?;
    for (i, (k, v)) in map.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}: ", k)?;
        v.fmt_nested(f, Some(&here))?;
    }
    write!(f, "}}")
}

impl From<bool> for Object {
    fn from(v: bool) -> Self {
        Object::Bool(v)
    }
}

impl From<i64> for Object {
    fn from(v: i64) -> Self {
        Object::Int(v)
    }
}

impl From<u64> for Object {
    fn from(v: u64) -> Self {
        Object::Uint(v)
    }
}

impl From<f64> for Object {
    fn from(v: f64) -> Self {
        Object::Float(v)
    }
}

impl From<char> for Object {
    fn from(v: char) -> Self {
        Object::Char(v)
    }
}

impl From<&str> for Object {
    fn from(v: &str) -> Self {
        Object::string(v)
    }
}

impl From<String> for Object {
    fn from(v: String) -> Self {
        Object::string(v)
    }
}

impl From<Vec<Object>> for Object {
    fn from(v: Vec<Object>) -> Self {
        Object::array(v)
    }
}
