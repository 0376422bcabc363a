//! Embeddable bytecode runtime for the ember scripting language.
//!
//! - [`lang`]: the object model.
//! - [`bytecode`]: instruction set, program container, assembler, verifier
//!   and disassembler.
//! - [`runtime`]: the stack machine.
//! - [`encoding`]: binary persistence of programs and module relinking.
//!
//! ```
//! use std::sync::Arc;
//!
//! use ember_vm::bytecode::{Assembler, Bytecode, Opcode};
//! use ember_vm::lang::{Object, Token};
//! use ember_vm::runtime::{RunOptions, Vm};
//!
//! let mut asm = Assembler::new();
//! asm.emit(Opcode::Constant, &[0]).unwrap();
//! asm.emit(Opcode::Constant, &[1]).unwrap();
//! asm.emit(Opcode::BinaryOp, &[Token::Add as usize]).unwrap();
//! asm.emit(Opcode::Return, &[1]).unwrap();
//! let main = asm.into_function("main").unwrap();
//!
//! let program = Bytecode::new(main, vec![Object::Int(40), Object::Int(2)]);
//! let bytes = program.encode().unwrap();
//! let program = Arc::new(Bytecode::decode(&bytes, None).unwrap());
//!
//! let result = Vm::new(program).run(RunOptions::default()).unwrap();
//! assert_eq!(result, Object::Int(42));
//! ```

pub mod bytecode;
pub mod encoding;
pub mod lang;
pub mod runtime;

pub use bytecode::Bytecode;
pub use encoding::{DecodeError, EncodeError, ModuleDirectory, ModuleMap};
pub use lang::Object;
pub use runtime::{RunOptions, RuntimeError, Vm, VmConfig, VmError};
