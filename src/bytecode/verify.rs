use thiserror::Error;

use super::op::{Opcode, read_operands};
use crate::lang::function::CompiledFunction;
use crate::lang::operator::Token;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("verify error in '{function}' at {offset}: {message}")]
pub struct VerifyError {
    pub function: String,
    pub offset: usize,
    pub message: String,
}

impl VerifyError {
    fn new(f: &CompiledFunction, offset: usize, message: impl Into<String>) -> Self {
        Self {
            function: f.name.clone(),
            offset,
            message: message.into(),
        }
    }
}

/// Checks one function's instruction stream without running it.
///
/// Catches what would otherwise surface as a fatal fault mid-run: unknown
/// opcodes, truncated operands, jump or handler targets outside the stream
/// or not on an instruction boundary, constant indices past the pool and
/// module slots past the cache.
///
/// NOTE: this does not track stack heights across branches; underflow is
/// still detected at run time.
pub fn verify_function(
    f: &CompiledFunction,
    num_constants: usize,
    num_modules: usize,
) -> Result<(), VerifyError> {
    let ins = &f.instructions[..];
    let mut boundaries = vec![false; ins.len() + 1];
    let mut targets: Vec<(usize, usize)> = Vec::new();

    let mut at = 0;
    while at < ins.len() {
        boundaries[at] = true;
        let Some(op) = Opcode::from_u8(ins[at]) else {
            return Err(VerifyError::new(f, at, format!("unknown opcode {}", ins[at])));
        };
        let Some((_, operands)) = read_operands(ins, at) else {
            return Err(VerifyError::new(
                f,
                at,
                format!("{} is missing operand bytes", op.mnemonic()),
            ));
        };

        use Opcode::*;
        match op {
            Constant | GetGlobal | SetGlobal | Closure | LoadModule => {
                if operands[0] >= num_constants {
                    return Err(VerifyError::new(
                        f,
                        at,
                        format!("constant index {} out of range ({})", operands[0], num_constants),
                    ));
                }
            }
            _ => {}
        }
        match op {
            LoadModule | StoreModule => {
                let slot = if op == LoadModule { operands[1] } else { operands[0] };
                if slot >= num_modules {
                    return Err(VerifyError::new(
                        f,
                        at,
                        format!("module slot {} out of range ({})", slot, num_modules),
                    ));
                }
            }
            BinaryOp | Unary => {
                if Token::from_u8(operands[0] as u8).is_none() {
                    return Err(VerifyError::new(
                        f,
                        at,
                        format!("unknown operator token {}", operands[0]),
                    ));
                }
            }
            Return | Throw if operands[0] > 1 => {
                return Err(VerifyError::new(
                    f,
                    at,
                    format!("{} operand must be 0 or 1", op.mnemonic()),
                ));
            }
            SetupTry => {
                // 0 means "no target"
                targets.extend(operands.iter().filter(|t| **t != 0).map(|t| (at, *t)));
            }
            _ if op.is_jump() => targets.push((at, operands[0])),
            _ => {}
        }
        at += op.width();
    }
    boundaries[ins.len()] = true;

    for (at, target) in targets {
        if target > ins.len() || !boundaries[target] {
            return Err(VerifyError::new(
                f,
                at,
                format!("jump target {} is not an instruction boundary", target),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::make_instruction;

    fn func(parts: &[Vec<u8>]) -> CompiledFunction {
        CompiledFunction::new("f", parts.concat())
    }

    #[test]
    fn test_valid_stream() {
        let f = func(&[
            make_instruction(Opcode::Constant, &[0]),
            make_instruction(Opcode::JumpFalsy, &[7]),
            make_instruction(Opcode::Nil, &[]),
            make_instruction(Opcode::Return, &[1]),
        ]);
        assert_eq!(verify_function(&f, 1, 0), Ok(()));
    }

    #[test]
    fn test_unknown_opcode() {
        let f = func(&[make_instruction(Opcode::Nil, &[]), vec![250]]);
        let err = verify_function(&f, 0, 0).unwrap_err();
        assert_eq!(err.offset, 1);
        assert!(err.message.contains("unknown opcode"));
    }

    #[test]
    fn test_truncated_operand() {
        let f = CompiledFunction::new("f", vec![Opcode::Constant as u8, 0]);
        let err = verify_function(&f, 1, 0).unwrap_err();
        assert!(err.message.contains("missing operand"));
    }

    #[test]
    fn test_jump_into_middle_of_instruction() {
        let f = func(&[
            make_instruction(Opcode::Jump, &[4]),
            make_instruction(Opcode::Constant, &[0]),
        ]);
        let err = verify_function(&f, 1, 0).unwrap_err();
        assert!(err.message.contains("boundary"));
    }

    #[test]
    fn test_constant_and_module_ranges() {
        let f = func(&[make_instruction(Opcode::Constant, &[3])]);
        assert!(verify_function(&f, 3, 0).is_err());
        let f = func(&[make_instruction(Opcode::StoreModule, &[0])]);
        assert!(verify_function(&f, 0, 0).is_err());
        assert!(verify_function(&f, 0, 1).is_ok());
    }

    #[test]
    fn test_handler_targets_zero_means_absent() {
        let f = func(&[
            make_instruction(Opcode::SetupTry, &[0, 5]),
            make_instruction(Opcode::Throw, &[0]),
        ]);
        assert!(verify_function(&f, 0, 0).is_ok());
    }
}
