use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use super::ptr::ObjectPtr;
use super::value::Object;
use crate::runtime::runtime_error::RuntimeError;

/// Named arguments passed alongside the positional ones.
pub type NamedArgs = IndexMap<String, Object>;

/// Type-assertion name attached to a parameter, e.g. `int` or `string`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Positional parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Param {
    pub name: String,
    /// Accepted type names; empty accepts anything.
    pub types: Vec<Symbol>,
}

impl Param {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: Vec::new(),
        }
    }

    pub fn typed(name: impl Into<String>, types: &[&str]) -> Self {
        Self {
            name: name.into(),
            types: types.iter().map(|t| Symbol::new(*t)).collect(),
        }
    }

    pub fn accepts(&self, value: &Object) -> bool {
        self.types.is_empty() || self.types.iter().any(|t| t.as_str() == value.type_name())
    }

    pub fn expected(&self) -> String {
        self.types
            .iter()
            .map(Symbol::as_str)
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Named parameter with its default value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedParam {
    pub name: String,
    pub default: Object,
    pub types: Vec<Symbol>,
}

impl NamedParam {
    pub fn new(name: impl Into<String>, default: Object) -> Self {
        Self {
            name: name.into(),
            default,
            types: Vec::new(),
        }
    }

    pub fn accepts(&self, value: &Object) -> bool {
        self.types.is_empty() || self.types.iter().any(|t| t.as_str() == value.type_name())
    }
}

// =============================================================================
// CompiledFunction
// =============================================================================

/// A unit of compiled code.
///
/// Functions in the constant pool are templates and never mutated. `Closure`
/// builds a fresh value that shares the template's code and carries its own
/// `free` cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFunction {
    pub name: String,
    pub params: Vec<Param>,
    /// The last positional parameter collects surplus arguments.
    pub variadic: bool,
    pub named_params: Vec<NamedParam>,
    pub num_locals: usize,
    pub instructions: Arc<[u8]>,
    pub free: Vec<ObjectPtr>,
    /// Instruction offset -> source position.
    pub source_map: BTreeMap<usize, usize>,
    pub allow_methods: bool,
}

impl CompiledFunction {
    pub fn new(name: impl Into<String>, instructions: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            ..Self::default()
        }
    }

    /// Number of stack slots the frame reserves above its base.
    pub fn frame_size(&self) -> usize {
        self.num_locals
            .max(self.params.len() + self.named_params.len())
    }

    /// Source position of the instruction at `offset`: the entry with the
    /// greatest key not past it.
    pub fn source_pos(&self, offset: usize) -> Option<usize> {
        self.source_map
            .range(..=offset)
            .next_back()
            .map(|(_, pos)| *pos)
    }

    /// Copy of this template carrying the given free cells.
    pub fn with_free(&self, free: Vec<ObjectPtr>) -> Self {
        Self {
            free,
            ..self.clone()
        }
    }
}

// =============================================================================
// NativeFunction
// =============================================================================

pub type NativeFn =
    Arc<dyn Fn(&[Object], &NamedArgs) -> Result<Object, RuntimeError> + Send + Sync>;

/// Host-provided callable.
///
/// A decoded program holds natives by name only; `func` is `None` until
/// relinking swaps in the live module member.
#[derive(Clone)]
pub struct NativeFunction {
    pub name: String,
    pub func: Option<NativeFn>,
}

impl NativeFunction {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Object], &NamedArgs) -> Result<Object, RuntimeError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Some(Arc::new(func)),
        }
    }

    pub fn unlinked(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            func: None,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.func.is_some()
    }

    pub fn call(&self, args: &[Object], named: &NamedArgs) -> Result<Object, RuntimeError> {
        match &self.func {
            Some(f) => f(args, named),
            None => Err(RuntimeError::UnlinkedNative(self.name.clone())),
        }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("linked", &self.is_linked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_pos_uses_closest_preceding_entry() {
        let mut f = CompiledFunction::new("f", vec![0u8; 10]);
        f.source_map.insert(0, 100);
        f.source_map.insert(4, 140);
        assert_eq!(f.source_pos(0), Some(100));
        assert_eq!(f.source_pos(3), Some(100));
        assert_eq!(f.source_pos(9), Some(140));
    }

    #[test]
    fn test_frame_size_covers_params() {
        let mut f = CompiledFunction::new("f", Vec::<u8>::new());
        f.params = vec![Param::new("a"), Param::new("b")];
        f.named_params = vec![NamedParam::new("c", Object::Nil)];
        f.num_locals = 1;
        assert_eq!(f.frame_size(), 3);
        f.num_locals = 5;
        assert_eq!(f.frame_size(), 5);
    }

    #[test]
    fn test_unlinked_native_errors() {
        let n = NativeFunction::unlinked("fmt.println");
        let err = n.call(&[], &NamedArgs::new()).unwrap_err();
        assert!(matches!(err, RuntimeError::UnlinkedNative(ref name) if name == "fmt.println"));
    }

    #[test]
    fn test_param_type_assertion() {
        let p = Param::typed("x", &["int", "uint"]);
        assert!(p.accepts(&Object::Uint(1)));
        assert!(!p.accepts(&Object::string("1")));
        assert_eq!(p.expected(), "int|uint");
        assert!(Param::new("y").accepts(&Object::Nil));
    }
}
