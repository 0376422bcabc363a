use indexmap::IndexMap;
use tracing::trace;

use super::error::DecodeError;
use crate::lang::collections::DictMap;
use crate::lang::value::Object;

/// Reserved key marking a dict constant as a stand-in for a host module.
pub const MODULE_NAME_KEY: &str = "__module_name__";

/// Host modules a decoded program is relinked against. Lookups never
/// mutate the directory.
pub trait ModuleDirectory {
    fn module(&self, name: &str) -> Option<&DictMap>;
}

/// Name -> module members.
#[derive(Debug, Clone, Default)]
pub struct ModuleMap(IndexMap<String, DictMap>);

impl ModuleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, members: DictMap) -> &mut Self {
        self.0.insert(name.into(), members);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl ModuleDirectory for ModuleMap {
    fn module(&self, name: &str) -> Option<&DictMap> {
        self.0.get(name)
    }
}

/// Swaps live module members into every placeholder dict reachable from
/// `constants`, then rejects natives left unlinked at the top level.
pub fn relink(constants: &[Object], modules: &dyn ModuleDirectory) -> Result<(), DecodeError> {
    for c in constants {
        relink_value(c, modules)?;
    }
    for c in constants {
        if let Object::Native(n) = c {
            if !n.is_linked() {
                return Err(DecodeError::UnlinkedNative(n.name.clone()));
            }
        }
    }
    Ok(())
}

fn relink_value(value: &Object, modules: &dyn ModuleDirectory) -> Result<(), DecodeError> {
    match value {
        Object::Dict(d) => {
            let name = match d.get(MODULE_NAME_KEY) {
                Some(Object::String(s)) => Some(s.to_string()),
                _ => None,
            };
            match name {
                Some(name) => {
                    let mut map = d.write();
                    relink_module(&name, &mut map, modules)
                }
                None => {
                    let values: Vec<Object> = d.read().values().cloned().collect();
                    values.iter().try_for_each(|v| relink_value(v, modules))
                }
            }
        }
        Object::SyncDict(d) => {
            let values: Vec<Object> = d.read().values().cloned().collect();
            values.iter().try_for_each(|v| relink_value(v, modules))
        }
        Object::Array(a) => a.to_vec().iter().try_for_each(|v| relink_value(v, modules)),
        Object::Function(f) => f
            .named_params
            .iter()
            .try_for_each(|p| relink_value(&p.default, modules)),
        _ => Ok(()),
    }
}

fn relink_module(
    name: &str,
    placeholder: &mut DictMap,
    modules: &dyn ModuleDirectory,
) -> Result<(), DecodeError> {
    let live = modules
        .module(name)
        .ok_or_else(|| DecodeError::ModuleNotFound(name.to_string()))?;

    for (key, slot) in placeholder.iter_mut() {
        if key == MODULE_NAME_KEY {
            continue;
        }
        let mismatch = |found: &str| DecodeError::ModuleShapeMismatch {
            module: name.to_string(),
            key: key.clone(),
            expected: slot.type_name().to_string(),
            found: found.to_string(),
        };
        let member = live.get(key).ok_or_else(|| mismatch("nothing"))?;
        if member.kind() != slot.kind() {
            return Err(mismatch(member.type_name()));
        }
        *slot = member.clone();
    }
    trace!(module = name, members = placeholder.len(), "module relinked");
    Ok(())
}
