use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::value::Object;

/// Cursor over a container, driven by the `Iter*` instructions.
///
/// `next` advances and reports whether an element is available; `key` and
/// `value` read the current element and return nil before the first `next`
/// or after exhaustion.
pub trait ObjectIterator: Send {
    fn next(&mut self) -> bool;
    fn key(&self) -> Object;
    fn value(&self) -> Object;
}

/// Iterator over entries captured when iteration began.
///
/// Mutating the container inside the loop body does not affect the
/// sequence being walked.
pub struct SnapshotIter {
    entries: Vec<(Object, Object)>,
    pos: Option<usize>,
}

impl SnapshotIter {
    pub fn new(entries: Vec<(Object, Object)>) -> Self {
        Self { entries, pos: None }
    }

    fn current(&self) -> Option<&(Object, Object)> {
        self.pos.and_then(|p| self.entries.get(p))
    }
}

impl ObjectIterator for SnapshotIter {
    fn next(&mut self) -> bool {
        let next = self.pos.map_or(0, |p| p + 1);
        self.pos = Some(next.min(self.entries.len()));
        next < self.entries.len()
    }

    fn key(&self) -> Object {
        self.current().map(|(k, _)| k.clone()).unwrap_or_default()
    }

    fn value(&self) -> Object {
        self.current().map(|(_, v)| v.clone()).unwrap_or_default()
    }
}

/// Shared handle to a running iterator, as stored on the operand stack.
#[derive(Clone)]
pub struct IteratorObject(Arc<Mutex<Box<dyn ObjectIterator>>>);

impl IteratorObject {
    pub fn new(iter: impl ObjectIterator + 'static) -> Self {
        Self::from_boxed(Box::new(iter))
    }

    pub fn from_boxed(iter: Box<dyn ObjectIterator>) -> Self {
        Self(Arc::new(Mutex::new(iter)))
    }

    pub fn next(&self) -> bool {
        self.0.lock().next()
    }

    pub fn key(&self) -> Object {
        self.0.lock().key()
    }

    pub fn value(&self) -> Object {
        self.0.lock().value()
    }

    /// Drains the remaining values.
    pub fn collect_values(&self) -> Vec<Object> {
        let mut guard = self.0.lock();
        let mut out = Vec::new();
        while guard.next() {
            out.push(guard.value());
        }
        out
    }

    pub fn ptr_eq(&self, other: &IteratorObject) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for IteratorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IteratorObject")
    }
}
