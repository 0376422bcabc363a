use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use super::op::{Opcode, make_instruction};
use crate::lang::function::CompiledFunction;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmError {
    #[error("label {0} was never bound")]
    UnboundLabel(usize),

    #[error("operand {value} does not fit in {width} byte(s) for {op:?}")]
    OperandOverflow {
        op: Opcode,
        value: usize,
        width: usize,
    },

    #[error("{op:?} expects {expected} operand(s), got {got}")]
    OperandCount {
        op: Opcode,
        expected: usize,
        got: usize,
    },
}

/// Forward-referenceable position in the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Builds an instruction stream, resolving labels to absolute offsets on
/// [`Assembler::finish`].
///
/// ```
/// use ember_vm::bytecode::{Assembler, Opcode};
///
/// let mut asm = Assembler::new();
/// let done = asm.label();
/// asm.emit(Opcode::True, &[]).unwrap();
/// asm.emit_jump(Opcode::JumpFalsy, done);
/// asm.emit(Opcode::Nil, &[]).unwrap();
/// asm.bind(done);
/// asm.emit(Opcode::Return, &[0]).unwrap();
/// let code = asm.finish().unwrap();
/// assert_eq!(&code[2..4], &[0u8, 5]);
/// ```
#[derive(Debug, Default)]
pub struct Assembler {
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
    source_map: BTreeMap<usize, usize>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset the next instruction will be written at.
    pub fn pos(&self) -> usize {
        self.code.len()
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current position.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.code.len());
    }

    /// Records the source position of the next instruction.
    pub fn mark(&mut self, source_pos: usize) {
        self.source_map.insert(self.code.len(), source_pos);
    }

    pub fn emit(&mut self, op: Opcode, operands: &[usize]) -> Result<usize, AsmError> {
        let widths = op.operand_widths();
        if widths.len() != operands.len() {
            return Err(AsmError::OperandCount {
                op,
                expected: widths.len(),
                got: operands.len(),
            });
        }
        for (&value, &width) in operands.iter().zip(widths) {
            if value >= 1 << (8 * width) {
                return Err(AsmError::OperandOverflow { op, value, width });
            }
        }
        let at = self.code.len();
        self.code.extend(make_instruction(op, operands));
        Ok(at)
    }

    /// Emits a single-target jump whose target is patched on `finish`.
    pub fn emit_jump(&mut self, op: Opcode, target: Label) -> usize {
        let at = self.code.len();
        self.code.extend(make_instruction(op, &[0]));
        self.fixups.push((at + 1, target));
        at
    }

    /// `SetupTry` with optional catch and finally targets; a missing target
    /// is encoded as 0.
    pub fn setup_try(&mut self, catch: Option<Label>, finally: Option<Label>) -> usize {
        let at = self.code.len();
        self.code.extend(make_instruction(Opcode::SetupTry, &[0, 0]));
        if let Some(l) = catch {
            self.fixups.push((at + 1, l));
        }
        if let Some(l) = finally {
            self.fixups.push((at + 3, l));
        }
        at
    }

    pub fn finish(self) -> Result<Vec<u8>, AsmError> {
        self.finish_with_map().map(|(code, _)| code)
    }

    pub fn finish_with_map(mut self) -> Result<(Vec<u8>, BTreeMap<usize, usize>), AsmError> {
        for (patch, label) in std::mem::take(&mut self.fixups) {
            let target = self.labels[label.0].ok_or(AsmError::UnboundLabel(label.0))?;
            let target = u16::try_from(target).map_err(|_| AsmError::OperandOverflow {
                op: Opcode::Jump,
                value: target,
                width: 2,
            })?;
            BigEndian::write_u16(&mut self.code[patch..patch + 2], target);
        }
        Ok((self.code, self.source_map))
    }

    /// Finishes into a function named `name` with its source map attached.
    pub fn into_function(self, name: impl Into<String>) -> Result<CompiledFunction, AsmError> {
        let (code, source_map) = self.finish_with_map()?;
        let mut f = CompiledFunction::new(name, code);
        f.source_map = source_map;
        Ok(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backward_and_forward_labels() {
        let mut asm = Assembler::new();
        let top = asm.label();
        let end = asm.label();
        asm.bind(top);
        asm.emit(Opcode::True, &[]).unwrap();
        asm.emit_jump(Opcode::JumpFalsy, end);
        asm.emit_jump(Opcode::Jump, top);
        asm.bind(end);
        let code = asm.finish().unwrap();
        assert_eq!(
            code,
            vec![
                Opcode::True as u8,
                Opcode::JumpFalsy as u8, 0, 7,
                Opcode::Jump as u8, 0, 0,
            ]
        );
    }

    #[test]
    fn test_unbound_label() {
        let mut asm = Assembler::new();
        let l = asm.label();
        asm.emit_jump(Opcode::Jump, l);
        assert_eq!(asm.finish(), Err(AsmError::UnboundLabel(0)));
    }

    #[test]
    fn test_operand_checks() {
        let mut asm = Assembler::new();
        assert!(matches!(
            asm.emit(Opcode::GetLocal, &[256]),
            Err(AsmError::OperandOverflow { width: 1, .. })
        ));
        assert!(matches!(
            asm.emit(Opcode::Call, &[1]),
            Err(AsmError::OperandCount { expected: 2, got: 1, .. })
        ));
    }

    #[test]
    fn test_setup_try_missing_catch_is_zero() {
        let mut asm = Assembler::new();
        let fin = asm.label();
        asm.setup_try(None, Some(fin));
        asm.bind(fin);
        let code = asm.finish().unwrap();
        assert_eq!(code, vec![Opcode::SetupTry as u8, 0, 0, 0, 5]);
    }

    #[test]
    fn test_source_marks() {
        let mut asm = Assembler::new();
        asm.mark(10);
        asm.emit(Opcode::Nil, &[]).unwrap();
        asm.mark(20);
        asm.emit(Opcode::Return, &[1]).unwrap();
        let f = asm.into_function("f").unwrap();
        assert_eq!(f.source_pos(1), Some(20));
        assert_eq!(f.source_pos(0), Some(10));
    }
}
