use crate::lang::value::Object;

/// Per-VM memo of module values, one slot per module.
///
/// Values go in and come out as deep copies when their kind supports it, so
/// no importer can observe another importer's mutations and the constant
/// pool is never aliased.
#[derive(Debug, Default)]
pub struct ModuleCache(Vec<Option<Object>>);

impl ModuleCache {
    pub fn new(num_modules: usize) -> Self {
        Self(vec![None; num_modules])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the value to push and whether the module still needs to be
    /// initialized, or `None` for an out-of-range slot.
    pub fn load(&self, slot: usize, constant: &Object) -> Option<(Object, bool)> {
        match self.0.get(slot)? {
            Some(cached) => Some((copy_of(cached), false)),
            None => Some((copy_of(constant), true)),
        }
    }

    /// Caches `value`; returns `false` for an out-of-range slot.
    pub fn store(&mut self, slot: usize, value: &Object) -> bool {
        match self.0.get_mut(slot) {
            Some(entry) => {
                *entry = Some(copy_of(value));
                true
            }
            None => false,
        }
    }
}

fn copy_of(value: &Object) -> Object {
    value.deep_copy().unwrap_or_else(|| value.clone())
}
