use std::sync::Arc;

use super::source::SourceFileSet;
use super::verify::{VerifyError, verify_function};
use crate::lang::function::CompiledFunction;
use crate::lang::value::Object;

/// A compiled program: the unit that is executed, persisted and reloaded.
///
/// Execution never mutates a `Bytecode`, so one instance can back any number
/// of VMs through an `Arc`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub file_set: Option<SourceFileSet>,
    pub main: Arc<CompiledFunction>,
    pub constants: Vec<Object>,
    /// Exact size of each VM's module cache.
    pub num_modules: usize,
    /// Carried through persistence; unused by the engine.
    pub num_embeds: usize,
}

impl Bytecode {
    pub fn new(main: CompiledFunction, constants: Vec<Object>) -> Self {
        Self {
            main: Arc::new(main),
            constants,
            ..Self::default()
        }
    }

    pub fn with_modules(mut self, num_modules: usize) -> Self {
        self.num_modules = num_modules;
        self
    }

    pub fn with_file_set(mut self, file_set: SourceFileSet) -> Self {
        self.file_set = Some(file_set);
        self
    }

    /// `main` followed by every function in the constant pool.
    pub fn functions(&self) -> impl Iterator<Item = &CompiledFunction> {
        std::iter::once(self.main.as_ref()).chain(self.constants.iter().filter_map(|c| match c {
            Object::Function(f) => Some(f.as_ref()),
            _ => None,
        }))
    }

    /// Statically checks every function's instruction stream.
    pub fn verify(&self) -> Result<(), VerifyError> {
        for f in self.functions() {
            verify_function(f, self.constants.len(), self.num_modules)?;
        }
        Ok(())
    }

    /// `name at offset`, with `file:line:col` appended when resolvable.
    pub fn describe_location(&self, f: &CompiledFunction, offset: usize) -> String {
        let name = if f.name.is_empty() { "<anonymous>" } else { &f.name };
        let pos = f
            .source_pos(offset)
            .and_then(|p| self.file_set.as_ref()?.position(p));
        match pos {
            Some(pos) => format!("{} at {} ({})", name, offset, pos),
            None => format!("{} at {}", name, offset),
        }
    }
}
