//! # Binary persistence
//!
//! A program is written as a 6-byte header (`"EMBR"` signature, big-endian
//! version) followed by tagged fields. Every value inside starts with a
//! one-byte [`Tag`]; the same value encoding is available on its own through
//! [`encode_object`] and [`decode_object`].
//!
//! Host modules and natives are written by name. After decoding, a
//! [`ModuleDirectory`] puts the live members back (see [`relink`]).

pub mod container;
mod decode;
mod encode;
pub mod error;
pub mod registry;
pub mod relink;
pub mod tag;
pub mod varint;


pub use container::{SIGNATURE, VERSION};
pub use decode::MAX_DEPTH;
pub use error::{DecodeError, EncodeError};
pub use registry::{PersistentObject, UserTypeRegistry};
pub use relink::{MODULE_NAME_KEY, ModuleDirectory, ModuleMap, relink};
pub use tag::Tag;

use crate::lang::value::Object;
use decode::Decoder;
use encode::Encoder;

pub fn encode_object(obj: &Object) -> Result<Vec<u8>, EncodeError> {
    encode_object_with(obj, &UserTypeRegistry::default())
}

pub fn encode_object_with(obj: &Object, registry: &UserTypeRegistry) -> Result<Vec<u8>, EncodeError> {
    let mut e = Encoder::new(registry);
    e.object(obj)?;
    Ok(e.into_bytes())
}

/// Decodes exactly one value; trailing bytes are an error.
pub fn decode_object(bytes: &[u8]) -> Result<Object, DecodeError> {
    decode_object_with(bytes, &UserTypeRegistry::default())
}

pub fn decode_object_with(bytes: &[u8], registry: &UserTypeRegistry) -> Result<Object, DecodeError> {
    let mut d = Decoder::new(bytes, registry);
    let obj = d.object()?;
    d.finish()?;
    Ok(obj)
}
