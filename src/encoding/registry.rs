use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::error::{DecodeError, EncodeError};
use crate::lang::user::UserObject;
use crate::lang::value::Object;

/// User type that can be persisted under the `unknown` tag.
///
/// `TYPE_NAME` must equal what [`UserObject::type_name`] returns for the
/// type; it is the key written next to the payload.
pub trait PersistentObject: UserObject + Serialize + DeserializeOwned {
    const TYPE_NAME: &'static str;
}

type EncodeFn = fn(&dyn UserObject) -> Option<Result<Vec<u8>, postcard::Error>>;
type DecodeFn = fn(&[u8]) -> Result<Object, postcard::Error>;

#[derive(Clone, Copy)]
struct Entry {
    encode: EncodeFn,
    decode: DecodeFn,
}

/// Host-populated table of user types the codec may write and read.
///
/// Unregistered user values fail to encode. Native callables never go
/// through here.
#[derive(Clone, Default)]
pub struct UserTypeRegistry {
    entries: HashMap<&'static str, Entry>,
}

impl UserTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: PersistentObject>(&mut self) -> &mut Self {
        self.entries.insert(
            T::TYPE_NAME,
            Entry {
                encode: encode_as::<T>,
                decode: decode_as::<T>,
            },
        );
        self
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    pub(crate) fn encode(&self, obj: &dyn UserObject) -> Result<Vec<u8>, EncodeError> {
        let name = obj.type_name();
        let unknown = || EncodeError::UnknownUserType(name.to_string());
        let entry = self.entries.get(name).ok_or_else(unknown)?;
        let bytes = (entry.encode)(obj).ok_or_else(unknown)?;
        Ok(bytes?)
    }

    pub(crate) fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<Object, DecodeError> {
        let entry = self
            .entries
            .get(type_name)
            .ok_or_else(|| DecodeError::UnknownUserType(type_name.to_string()))?;
        Ok((entry.decode)(bytes)?)
    }
}

impl fmt::Debug for UserTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

fn encode_as<T: PersistentObject>(obj: &dyn UserObject) -> Option<Result<Vec<u8>, postcard::Error>> {
    obj.as_any()
        .downcast_ref::<T>()
        .map(|v| postcard::to_allocvec(v))
}

fn decode_as<T: PersistentObject>(bytes: &[u8]) -> Result<Object, postcard::Error> {
    let value: T = postcard::from_bytes(bytes)?;
    Ok(Object::User(Arc::new(value)))
}
