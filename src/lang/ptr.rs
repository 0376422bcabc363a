use std::sync::Arc;

use parking_lot::Mutex;

use super::value::Object;

/// Single-slot mutable cell.
///
/// Captured locals live in an `ObjectPtr`: the enclosing frame slot and every
/// closure that captured it hold clones of the same cell, so a write through
/// any of them is seen by all.
#[derive(Debug, Clone, Default)]
pub struct ObjectPtr(Arc<Mutex<Object>>);

impl ObjectPtr {
    pub fn new(value: Object) -> Self {
        Self(Arc::new(Mutex::new(value)))
    }

    pub fn get(&self) -> Object {
        self.0.lock().clone()
    }

    pub fn set(&self, value: Object) {
        *self.0.lock() = value;
    }

    pub fn ptr_eq(&self, other: &ObjectPtr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Cells compare by identity.
impl PartialEq for ObjectPtr {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_alias() {
        let a = ObjectPtr::new(Object::Int(1));
        let b = a.clone();
        b.set(Object::Int(2));
        assert_eq!(a.get(), Object::Int(2));
        assert_eq!(a, b);
        assert_ne!(a, ObjectPtr::new(Object::Int(2)));
    }
}
