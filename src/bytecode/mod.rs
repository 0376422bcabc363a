pub mod asm;
pub mod disasm;
pub mod ir;
pub mod op;
pub mod source;
pub mod verify;

pub use asm::{AsmError, Assembler, Label};
pub use ir::Bytecode;
pub use op::{CALL_NAMED, CALL_SPREAD, Opcode, make_instruction};
pub use source::{SourceFile, SourceFileSet, SourcePosition};
pub use verify::VerifyError;
