use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use super::collections::{DictMap, SyncDict};
use super::error_object::ErrorObject;
use super::function::NamedArgs;
use super::value::Object;
use crate::runtime::runtime_error::RuntimeError;

/// Builtin type descriptor.
///
/// Calling a descriptor converts its single argument to that type; `error`
/// builds an error object from a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinType {
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
    Error,
}

impl BuiltinType {
    pub const ALL: [BuiltinType; 13] = [
        BuiltinType::Bool,
        BuiltinType::Flag,
        BuiltinType::Int,
        BuiltinType::Uint,
        BuiltinType::Char,
        BuiltinType::Float,
        BuiltinType::Decimal,
        BuiltinType::String,
        BuiltinType::Bytes,
        BuiltinType::Array,
        BuiltinType::Dict,
        BuiltinType::SyncDict,
        BuiltinType::Error,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinType::Bool => "bool",
            BuiltinType::Flag => "flag",
            BuiltinType::Int => "int",
            BuiltinType::Uint => "uint",
            BuiltinType::Char => "char",
            BuiltinType::Float => "float",
            BuiltinType::Decimal => "decimal",
            BuiltinType::String => "string",
            BuiltinType::Bytes => "bytes",
            BuiltinType::Array => "array",
            BuiltinType::Dict => "dict",
            BuiltinType::SyncDict => "syncDict",
            BuiltinType::Error => "error",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn call(self, args: &[Object], named: &NamedArgs) -> Result<Object, RuntimeError> {
        if let Some(key) = named.keys().next() {
            return Err(RuntimeError::UnexpectedNamedArg(key.clone()));
        }
        match (self, args) {
            (BuiltinType::Array, []) => return Ok(Object::array(Vec::new())),
            (BuiltinType::Dict, []) => return Ok(Object::dict(DictMap::new())),
            (BuiltinType::SyncDict, []) => return Ok(Object::SyncDict(SyncDict::default())),
            (BuiltinType::String, []) => return Ok(Object::string("")),
            (BuiltinType::Bytes, []) => return Ok(Object::bytes(Vec::<u8>::new())),
            (_, [_]) => {}
            _ => {
                return Err(RuntimeError::WrongNumArgs {
                    want: "1".to_string(),
                    got: args.len(),
                });
            }
        }
        let value = &args[0];
        let converted = match self {
            BuiltinType::Bool => Some(Object::Bool(!value.is_falsy())),
            BuiltinType::Flag => Some(Object::Flag(!value.is_falsy())),
            BuiltinType::Int => to_int(value).map(Object::Int),
            BuiltinType::Uint => to_int(value).map(|v| Object::Uint(v as u64)),
            BuiltinType::Char => to_char(value).map(Object::Char),
            BuiltinType::Float => to_float(value).map(Object::Float),
            BuiltinType::Decimal => to_decimal(value).map(Object::Decimal),
            BuiltinType::String => Some(Object::string(value.to_string())),
            BuiltinType::Bytes => match value {
                Object::Bytes(_) => Some(value.clone()),
                Object::String(s) => Some(Object::bytes(s.as_bytes())),
                Object::Array(a) => a
                    .read()
                    .iter()
                    .map(|v| to_int(v).and_then(|i| u8::try_from(i).ok()))
                    .collect::<Option<Vec<u8>>>()
                    .map(|b| Object::bytes(b)),
                _ => None,
            },
            BuiltinType::Array => match value {
                Object::Array(a) => Some(Object::Array(a.deep_copy())),
                other => other
                    .iterate()
                    .ok()
                    .map(|it| Object::array(it.collect_values())),
            },
            BuiltinType::Dict => match value {
                Object::Dict(_) => Some(value.clone()),
                Object::SyncDict(d) => Some(Object::dict(d.read().clone())),
                _ => None,
            },
            BuiltinType::SyncDict => match value {
                Object::SyncDict(_) => Some(value.clone()),
                Object::Dict(d) => Some(Object::SyncDict(SyncDict::new(d.read().clone()))),
                _ => None,
            },
            BuiltinType::Error => Some(Object::Error(Arc::new(ErrorObject::new(
                "error",
                value.to_string(),
            )))),
        };
        converted.ok_or_else(|| RuntimeError::Conversion {
            from: value.type_name().to_string(),
            to: self.name().to_string(),
        })
    }
}

pub(crate) fn to_int(value: &Object) -> Option<i64> {
    match value {
        Object::Int(v) => Some(*v),
        Object::Uint(v) => Some(*v as i64),
        Object::Char(c) => Some(*c as i64),
        Object::Bool(b) | Object::Flag(b) => Some(*b as i64),
        Object::Float(f) if f.is_finite() => Some(f.trunc() as i64),
        Object::Decimal(d) => d.trunc().to_i64(),
        Object::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn to_char(value: &Object) -> Option<char> {
    match value {
        Object::Char(c) => Some(*c),
        Object::Int(v) => u32::try_from(*v).ok().and_then(char::from_u32),
        Object::Uint(v) => u32::try_from(*v).ok().and_then(char::from_u32),
        Object::String(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(c),
                _ => None,
            }
        }
        _ => None,
    }
}

pub(crate) fn to_float(value: &Object) -> Option<f64> {
    match value {
        Object::Float(f) => Some(*f),
        Object::Int(v) => Some(*v as f64),
        Object::Uint(v) => Some(*v as f64),
        Object::Char(c) => Some(*c as u32 as f64),
        Object::Bool(b) | Object::Flag(b) => Some(*b as i64 as f64),
        Object::Decimal(d) => d.to_f64(),
        Object::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn to_decimal(value: &Object) -> Option<Decimal> {
    match value {
        Object::Decimal(d) => Some(*d),
        Object::Int(v) => Some(Decimal::from(*v)),
        Object::Uint(v) => Some(Decimal::from(*v)),
        Object::Char(c) => Some(Decimal::from(*c as u32)),
        Object::Bool(b) | Object::Flag(b) => Some(Decimal::from(*b as i64)),
        Object::Float(f) => Decimal::from_f64(*f),
        Object::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(t: BuiltinType, v: Object) -> Result<Object, RuntimeError> {
        t.call(&[v], &NamedArgs::new())
    }

    #[test]
    fn test_names_round_trip() {
        for t in BuiltinType::ALL {
            assert_eq!(BuiltinType::from_name(t.name()), Some(t));
        }
        assert_eq!(BuiltinType::from_name("nope"), None);
    }

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(convert(BuiltinType::Int, Object::string(" 42 ")).unwrap(), Object::Int(42));
        assert_eq!(convert(BuiltinType::Int, Object::Float(3.9)).unwrap(), Object::Int(3));
        assert_eq!(convert(BuiltinType::Float, Object::Int(2)).unwrap(), Object::Float(2.0));
        assert_eq!(convert(BuiltinType::Char, Object::Int(65)).unwrap(), Object::Char('A'));
        assert_eq!(
            convert(BuiltinType::Decimal, Object::string("1.25")).unwrap(),
            Object::Decimal(Decimal::new(125, 2))
        );
    }

    #[test]
    fn test_failed_conversion() {
        let err = convert(BuiltinType::Int, Object::string("abc")).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Conversion { ref from, ref to } if from == "string" && to == "int"
        ));
    }

    #[test]
    fn test_empty_constructors() {
        let empty = BuiltinType::Array.call(&[], &NamedArgs::new()).unwrap();
        assert_eq!(empty, Object::array(Vec::new()));
        assert!(matches!(
            BuiltinType::Int.call(&[], &NamedArgs::new()),
            Err(RuntimeError::WrongNumArgs { got: 0, .. })
        ));
    }

    #[test]
    fn test_error_constructor() {
        let e = convert(BuiltinType::Error, Object::string("boom")).unwrap();
        assert_eq!(e.index_get(&Object::string("message")).unwrap(), Object::string("boom"));
        assert_eq!(e.type_name(), "error");
    }
}
