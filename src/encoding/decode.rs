use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;

use super::error::DecodeError;
use super::registry::UserTypeRegistry;
use super::tag::{Tag, func_field};
use super::varint::{read_uvarint, unzigzag};
use crate::lang::builtin_type::BuiltinType;
use crate::lang::collections::DictMap;
use crate::lang::function::{CompiledFunction, NamedParam, NativeFunction, Param, Symbol};
use crate::lang::value::{MAX_NESTING, Object};

/// Deepest container nesting a payload may use.
pub const MAX_DEPTH: usize = MAX_NESTING;

/// Bounds-checked cursor over an encoded buffer.
pub(crate) struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: usize,
    registry: &'a UserTypeRegistry,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8], registry: &'a UserTypeRegistry) -> Self {
        Self {
            buf,
            pos: 0,
            depth: 0,
            registry,
        }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Fails unless every byte was consumed.
    pub fn finish(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn uvarint(&mut self) -> Result<u64, DecodeError> {
        let (v, n) = read_uvarint(&self.buf[self.pos..])?;
        self.pos += n;
        Ok(v)
    }

    pub fn count(&mut self) -> Result<usize, DecodeError> {
        usize::try_from(self.uvarint()?).map_err(|_| DecodeError::VarintOverflow)
    }

    /// Length-prefixed raw bytes.
    pub fn raw(&mut self) -> Result<&'a [u8], DecodeError> {
        let n = self.count()?;
        self.take(n)
    }

    pub fn str(&mut self) -> Result<&'a str, DecodeError> {
        Ok(std::str::from_utf8(self.raw()?)?)
    }

    /// Decoder over the next length-prefixed payload.
    pub fn nested(&mut self) -> Result<Decoder<'a>, DecodeError> {
        let bytes = self.raw()?;
        let mut d = Decoder::new(bytes, self.registry);
        d.depth = self.depth;
        Ok(d)
    }

    /// Reads a fixed-shape payload: one length byte, then a uvarint of
    /// exactly that many bytes. Length 0 is the zero value.
    fn fixed(&mut self, what: &'static str) -> Result<u64, DecodeError> {
        let n = self.u8()? as usize;
        if n == 0 {
            return Ok(0);
        }
        let bytes = self.take(n)?;
        let (v, used) = read_uvarint(bytes)?;
        if used != n {
            return Err(DecodeError::BadLength {
                what,
                expected: used.to_string(),
                found: n,
            });
        }
        Ok(v)
    }

    /// Preallocation hint that cannot exceed what the input could hold.
    fn capacity(&self, count: usize) -> usize {
        count.min(self.remaining())
    }

    pub fn object(&mut self) -> Result<Object, DecodeError> {
        if self.depth >= MAX_DEPTH {
            return Err(DecodeError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let obj = self.value();
        self.depth -= 1;
        obj
    }

    fn value(&mut self) -> Result<Object, DecodeError> {
        let byte = self.u8()?;
        let tag = Tag::from_u8(byte).ok_or(DecodeError::UnknownTag(byte))?;
        let obj = match tag {
            Tag::Nil => Object::Nil,
            Tag::True => Object::Bool(true),
            Tag::False => Object::Bool(false),
            Tag::FlagOn => Object::Flag(true),
            Tag::FlagOff => Object::Flag(false),
            Tag::Int => Object::Int(unzigzag(self.fixed("int")?)),
            Tag::Uint => Object::Uint(self.fixed("uint")?),
            Tag::Char => {
                let code = self.fixed("char")?;
                let c = u32::try_from(code)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or(DecodeError::InvalidChar(code))?;
                Object::Char(c)
            }
            Tag::Float => Object::Float(f64::from_bits(self.fixed("float")?)),
            Tag::Decimal => match self.u8()? as usize {
                0 => Object::Decimal(Decimal::ZERO),
                16 => {
                    let mut image = [0u8; 16];
                    image.copy_from_slice(self.take(16)?);
                    Object::Decimal(Decimal::deserialize(image))
                }
                n => {
                    return Err(DecodeError::BadLength {
                        what: "decimal",
                        expected: "0 or 16".to_string(),
                        found: n,
                    });
                }
            },
            Tag::String => Object::string(self.str()?),
            Tag::Bytes => Object::bytes(self.raw()?.to_vec()),
            Tag::Array => {
                let mut d = self.nested()?;
                let mut items = Vec::new();
                if !d.is_empty() {
                    let n = d.count()?;
                    items.reserve(d.capacity(n));
                    for _ in 0..n {
                        items.push(d.object()?);
                    }
                }
                d.finish()?;
                Object::array(items)
            }
            Tag::Dict => Object::dict(self.nested()?.dict_entries()?),
            Tag::SyncDict => Object::sync_dict(self.nested()?.dict_entries()?),
            Tag::CompiledFunction => Object::Function(Arc::new(self.function_payload()?)),
            Tag::NativeFunction => Object::Native(Arc::new(NativeFunction::unlinked(self.str()?))),
            Tag::Type => {
                let name = self.str()?;
                let t = BuiltinType::from_name(name)
                    .ok_or_else(|| DecodeError::UnknownType(name.to_string()))?;
                Object::Type(t)
            }
            Tag::Symbol => return Err(DecodeError::UnexpectedSymbol),
            Tag::Unknown => {
                let name = self.str()?;
                let bytes = self.raw()?;
                self.registry.decode(name, bytes)?
            }
        };
        Ok(obj)
    }

    fn dict_entries(mut self) -> Result<DictMap, DecodeError> {
        let mut map = DictMap::new();
        if !self.is_empty() {
            let n = self.count()?;
            map.reserve(self.capacity(n));
            for _ in 0..n {
                let key = self.str()?.to_string();
                let value = self.object()?;
                map.insert(key, value);
            }
        }
        self.finish()?;
        Ok(map)
    }

    fn symbols(&mut self) -> Result<Vec<Symbol>, DecodeError> {
        let n = self.count()?;
        let mut types = Vec::with_capacity(self.capacity(n));
        for _ in 0..n {
            let byte = self.u8()?;
            if byte != Tag::Symbol as u8 {
                return Err(DecodeError::UnexpectedKind {
                    expected: "symbol",
                    found: format!("tag {}", byte),
                });
            }
            types.push(Symbol::new(self.str()?));
        }
        Ok(types)
    }

    /// Reads a compiled function after its tag.
    pub fn function_payload(&mut self) -> Result<CompiledFunction, DecodeError> {
        let mut d = self.nested()?;
        let mut f = CompiledFunction::default();
        while !d.is_empty() {
            match d.u8()? {
                func_field::NAME => f.name = d.str()?.to_string(),
                func_field::PARAMS => {
                    let n = d.count()?;
                    f.params = Vec::with_capacity(d.capacity(n));
                    for _ in 0..n {
                        let name = d.str()?.to_string();
                        let types = d.symbols()?;
                        f.params.push(Param { name, types });
                    }
                }
                func_field::NAMED_PARAMS => {
                    let n = d.count()?;
                    f.named_params = Vec::with_capacity(d.capacity(n));
                    for _ in 0..n {
                        let name = d.str()?.to_string();
                        let default = d.object()?;
                        let types = d.symbols()?;
                        f.named_params.push(NamedParam {
                            name,
                            default,
                            types,
                        });
                    }
                }
                func_field::NUM_LOCALS => f.num_locals = d.count()?,
                func_field::INSTRUCTIONS => f.instructions = Arc::from(d.raw()?),
                func_field::VARIADIC => f.variadic = d.u8()? != 0,
                func_field::SOURCE_MAP => {
                    let n = d.count()?;
                    let mut map = BTreeMap::new();
                    for _ in 0..n {
                        let offset = d.count()?;
                        let pos = d.count()?;
                        map.insert(offset, pos);
                    }
                    f.source_map = map;
                }
                func_field::ALLOW_METHODS => f.allow_methods = d.u8()? != 0,
                other => return Err(DecodeError::UnknownFunctionField(other)),
            }
        }
        Ok(f)
    }

    /// Reads a value that must be a compiled function.
    pub fn function(&mut self) -> Result<CompiledFunction, DecodeError> {
        match self.object()? {
            Object::Function(f) => Ok(Arc::unwrap_or_clone(f)),
            other => Err(DecodeError::UnexpectedKind {
                expected: "compiledFunction",
                found: other.type_name().to_string(),
            }),
        }
    }
}
