use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::value::Object;

/// Insertion-ordered backing map shared by [`Dict`] and [`SyncDict`].
pub type DictMap = IndexMap<String, Object>;

// =============================================================================
// Array
// =============================================================================

/// Growable array shared by reference.
#[derive(Clone, Default)]
pub struct Array(Arc<RwLock<Vec<Object>>>);

impl Array {
    pub fn new(items: Vec<Object>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<Object>> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<Object>> {
        self.0.write()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&self, value: Object) {
        self.0.write().push(value);
    }

    pub fn to_vec(&self) -> Vec<Object> {
        self.0.read().clone()
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }

    /// Recursive copy. Shared and self-referencing members keep their
    /// shape in the copy.
    pub fn deep_copy(&self) -> Array {
        self.copy_with(&mut CopyMemo::default())
    }

    fn copy_with(&self, memo: &mut CopyMemo) -> Array {
        if let Some(Object::Array(done)) = memo.0.get(&self.addr()) {
            return done.clone();
        }
        let copy = Array::default();
        memo.0.insert(self.addr(), Object::Array(copy.clone()));
        let items = self.to_vec().iter().map(|v| copy_value(v, memo)).collect();
        *copy.write() = items;
        copy
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        Object::Array(self.clone()) == Object::Array(other.clone())
    }
}

// =============================================================================
// Dict
// =============================================================================

/// String-keyed map shared by reference.
///
/// Mutation through one handle is visible through every clone; use
/// [`Dict::deep_copy`] to detach.
#[derive(Clone, Default)]
pub struct Dict(Arc<RwLock<DictMap>>);

impl Dict {
    pub fn new(map: DictMap) -> Self {
        Self(Arc::new(RwLock::new(map)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, DictMap> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, DictMap> {
        self.0.write()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<Object> {
        self.0.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.read().contains_key(key)
    }

    pub fn insert(&self, key: impl Into<String>, value: Object) {
        self.0.write().insert(key.into(), value);
    }

    pub fn ptr_eq(&self, other: &Dict) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }

    pub fn deep_copy(&self) -> Dict {
        self.copy_with(&mut CopyMemo::default())
    }

    fn copy_with(&self, memo: &mut CopyMemo) -> Dict {
        if let Some(Object::Dict(done)) = memo.0.get(&self.addr()) {
            return done.clone();
        }
        let copy = Dict::default();
        memo.0.insert(self.addr(), Object::Dict(copy.clone()));
        let map = self.read().clone();
        *copy.write() = copy_map(&map, memo);
        copy
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Self) -> bool {
        Object::Dict(self.clone()) == Object::Dict(other.clone())
    }
}

// =============================================================================
// SyncDict
// =============================================================================

/// Dict meant to be shared across hosts and VMs.
///
/// Each operation takes the lock for its own duration only, so callers never
/// hold a guard across VM execution. Encoding reads the whole map under one
/// read lock.
#[derive(Clone, Default)]
pub struct SyncDict(Arc<RwLock<DictMap>>);

impl SyncDict {
    pub fn new(map: DictMap) -> Self {
        Self(Arc::new(RwLock::new(map)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, DictMap> {
        self.0.read()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<Object> {
        self.0.read().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Object) {
        self.0.write().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Object> {
        self.0.write().shift_remove(key)
    }

    pub fn ptr_eq(&self, other: &SyncDict) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }

    pub fn deep_copy(&self) -> SyncDict {
        self.copy_with(&mut CopyMemo::default())
    }

    fn copy_with(&self, memo: &mut CopyMemo) -> SyncDict {
        if let Some(Object::SyncDict(done)) = memo.0.get(&self.addr()) {
            return done.clone();
        }
        let copy = SyncDict::default();
        memo.0.insert(self.addr(), Object::SyncDict(copy.clone()));
        let map = self.read().clone();
        *copy.0.write() = copy_map(&map, memo);
        copy
    }
}

impl PartialEq for SyncDict {
    fn eq(&self, other: &Self) -> bool {
        Object::SyncDict(self.clone()) == Object::SyncDict(other.clone())
    }
}

// Debug goes through Display, which stops at self-references.
impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Array({})", Object::Array(self.clone()))
    }
}

impl fmt::Debug for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dict({})", Object::Dict(self.clone()))
    }
}

impl fmt::Debug for SyncDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncDict({})", Object::SyncDict(self.clone()))
    }
}

/// Copies made so far in one deep copy, keyed by source container address.
#[derive(Default)]
struct CopyMemo(HashMap<usize, Object>);

fn copy_value(value: &Object, memo: &mut CopyMemo) -> Object {
    match value {
        Object::Array(a) => Object::Array(a.copy_with(memo)),
        Object::Dict(d) => Object::Dict(d.copy_with(memo)),
        Object::SyncDict(d) => Object::SyncDict(d.copy_with(memo)),
        other => other.deep_copy().unwrap_or_else(|| other.clone()),
    }
}

fn copy_map(map: &DictMap, memo: &mut CopyMemo) -> DictMap {
    map.iter()
        .map(|(k, v)| (k.clone(), copy_value(v, memo)))
        .collect()
}
