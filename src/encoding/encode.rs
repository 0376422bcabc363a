use super::decode::MAX_DEPTH;
use super::error::EncodeError;
use super::registry::UserTypeRegistry;
use super::tag::{Tag, func_field};
use super::varint::{put_uvarint, uvarint_len, zigzag};
use crate::lang::collections::DictMap;
use crate::lang::function::{CompiledFunction, Symbol};
use crate::lang::value::Object;

/// Appends encoded values to a buffer.
pub(crate) struct Encoder<'r> {
    out: Vec<u8>,
    depth: usize,
    registry: &'r UserTypeRegistry,
}

impl<'r> Encoder<'r> {
    pub fn new(registry: &'r UserTypeRegistry) -> Self {
        Self {
            out: Vec::new(),
            depth: 0,
            registry,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    pub fn u8(&mut self, b: u8) {
        self.out.push(b);
    }

    pub fn uvarint(&mut self, v: u64) {
        put_uvarint(&mut self.out, v);
    }

    pub fn count(&mut self, n: usize) {
        self.uvarint(n as u64);
    }

    pub fn put(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    /// Length-prefixed raw bytes.
    pub fn raw(&mut self, bytes: &[u8]) {
        self.count(bytes.len());
        self.put(bytes);
    }

    pub fn str(&mut self, s: &str) {
        self.raw(s.as_bytes());
    }

    /// Writes whatever `f` produces behind a uvarint length.
    pub fn nested<F>(&mut self, f: F) -> Result<(), EncodeError>
    where
        F: FnOnce(&mut Encoder<'r>) -> Result<(), EncodeError>,
    {
        let mut inner = Encoder::new(self.registry);
        inner.depth = self.depth;
        f(&mut inner)?;
        self.raw(&inner.out);
        Ok(())
    }

    /// Tag, one length byte, then a uvarint of exactly that many bytes.
    fn fixed(&mut self, tag: Tag, v: u64) {
        self.u8(tag as u8);
        if v == 0 {
            self.u8(0);
        } else {
            self.u8(uvarint_len(v) as u8);
            self.uvarint(v);
        }
    }

    /// Containers that reach themselves fail with `TooDeep` instead of
    /// recursing forever.
    pub fn object(&mut self, obj: &Object) -> Result<(), EncodeError> {
        if self.depth >= MAX_DEPTH {
            return Err(EncodeError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let res = self.value(obj);
        self.depth -= 1;
        res
    }

    fn value(&mut self, obj: &Object) -> Result<(), EncodeError> {
        match obj {
            Object::Nil => self.u8(Tag::Nil as u8),
            Object::Bool(true) => self.u8(Tag::True as u8),
            Object::Bool(false) => self.u8(Tag::False as u8),
            Object::Flag(true) => self.u8(Tag::FlagOn as u8),
            Object::Flag(false) => self.u8(Tag::FlagOff as u8),
            Object::Int(v) => self.fixed(Tag::Int, zigzag(*v)),
            Object::Uint(v) => self.fixed(Tag::Uint, *v),
            Object::Char(c) => self.fixed(Tag::Char, u64::from(u32::from(*c))),
            Object::Float(f) => self.fixed(Tag::Float, f.to_bits()),
            Object::Decimal(d) => {
                self.u8(Tag::Decimal as u8);
                // only an unscaled positive zero may drop its image
                let image = d.serialize();
                if image == [0u8; 16] {
                    self.u8(0);
                } else {
                    self.u8(image.len() as u8);
                    self.put(&image);
                }
            }
            Object::String(s) => {
                self.u8(Tag::String as u8);
                self.str(s);
            }
            Object::Bytes(b) => {
                self.u8(Tag::Bytes as u8);
                self.raw(b);
            }
            Object::Array(a) => {
                self.u8(Tag::Array as u8);
                let items = a.read();
                self.nested(|e| {
                    if !items.is_empty() {
                        e.count(items.len());
                        for item in items.iter() {
                            e.object(item)?;
                        }
                    }
                    Ok(())
                })?;
            }
            Object::Dict(d) => {
                self.u8(Tag::Dict as u8);
                self.nested(|e| e.dict_entries(&d.read()))?;
            }
            Object::SyncDict(d) => {
                self.u8(Tag::SyncDict as u8);
                // held for the whole payload so the snapshot is consistent
                let map = d.read();
                self.nested(|e| e.dict_entries(&map))?;
            }
            Object::Function(f) => self.function(f)?,
            Object::Native(n) => {
                self.u8(Tag::NativeFunction as u8);
                self.str(&n.name);
            }
            Object::Type(t) => {
                self.u8(Tag::Type as u8);
                self.str(t.name());
            }
            Object::User(u) => {
                let bytes = self.registry.encode(u.as_ref())?;
                self.u8(Tag::Unknown as u8);
                self.str(u.type_name());
                self.raw(&bytes);
            }
            Object::Ptr(_) | Object::Error(_) | Object::Iterator(_) => {
                return Err(EncodeError::Unsupported(obj.type_name().to_string()));
            }
        }
        Ok(())
    }

    fn dict_entries(&mut self, map: &DictMap) -> Result<(), EncodeError> {
        if map.is_empty() {
            return Ok(());
        }
        self.count(map.len());
        for (k, v) in map {
            self.str(k);
            self.object(v)?;
        }
        Ok(())
    }

    fn symbols(&mut self, types: &[Symbol]) {
        self.count(types.len());
        for t in types {
            self.u8(Tag::Symbol as u8);
            self.str(t.as_str());
        }
    }

    /// Only fields that differ from their defaults are written; free
    /// variables never are.
    pub fn function(&mut self, f: &CompiledFunction) -> Result<(), EncodeError> {
        self.u8(Tag::CompiledFunction as u8);
        self.nested(|e| {
            if !f.name.is_empty() {
                e.u8(func_field::NAME);
                e.str(&f.name);
            }
            if !f.params.is_empty() {
                e.u8(func_field::PARAMS);
                e.count(f.params.len());
                for p in &f.params {
                    e.str(&p.name);
                    e.symbols(&p.types);
                }
            }
            if !f.named_params.is_empty() {
                e.u8(func_field::NAMED_PARAMS);
                e.count(f.named_params.len());
                for p in &f.named_params {
                    e.str(&p.name);
                    e.object(&p.default)?;
                    e.symbols(&p.types);
                }
            }
            if f.num_locals != 0 {
                e.u8(func_field::NUM_LOCALS);
                e.count(f.num_locals);
            }
            if !f.instructions.is_empty() {
                e.u8(func_field::INSTRUCTIONS);
                e.raw(&f.instructions);
            }
            if f.variadic {
                e.u8(func_field::VARIADIC);
                e.u8(1);
            }
            if !f.source_map.is_empty() {
                e.u8(func_field::SOURCE_MAP);
                e.count(f.source_map.len());
                for (&offset, &pos) in &f.source_map {
                    e.count(offset);
                    e.count(pos);
                }
            }
            if f.allow_methods {
                e.u8(func_field::ALLOW_METHODS);
                e.u8(1);
            }
            Ok(())
        })
    }
}
