// =============================================================================
// OPCODE - one-byte instruction codes
// =============================================================================
//
// An instruction is its opcode byte followed by big-endian operands whose
// widths come from `Opcode::operand_widths`. Jump and handler operands are
// absolute offsets into the owning function's instruction bytes.

use byteorder::{BigEndian, ByteOrder};

/// Call flag: the last positional argument is spread.
pub const CALL_SPREAD: u8 = 0b01;
/// Call flag: a named-arguments dict follows the positional arguments.
pub const CALL_NAMED: u8 = 0b10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    NoOp = 0,

    // literals
    Constant,
    Nil,
    True,
    False,
    Pop,

    // variables
    GetGlobal,
    SetGlobal,
    GetLocal,
    SetLocal,
    DefineLocal,
    GetFree,
    SetFree,
    GetLocalPtr,
    GetFreePtr,

    // operators
    BinaryOp,
    Unary,
    Equal,
    NotEqual,

    // ==========================================================================
    // Jumps (absolute targets)
    // ==========================================================================
    Jump,
    JumpFalsy,
    AndJump,
    OrJump,
    /// `?.` - jump keeping nil when the top is nil.
    JumpNil,
    /// `??` - jump keeping the value when the top is not nil, else pop.
    JumpNotNil,

    // containers
    Array,
    Dict,
    KeyValueArray,
    GetIndex,
    SetIndex,
    SliceIndex,

    // calls
    Call,
    Return,
    Closure,

    // iteration
    IterInit,
    IterNext,
    IterKey,
    IterValue,

    // modules
    LoadModule,
    StoreModule,

    // ==========================================================================
    // Exception handling
    // ==========================================================================
    SetupTry,
    SetupCatch,
    SetupFinally,
    Throw,
    Finalizer,
}

impl Opcode {
    pub const ALL: [Opcode; 45] = {
        use Opcode::*;
        [
            NoOp, Constant, Nil, True, False, Pop, GetGlobal, SetGlobal, GetLocal, SetLocal,
            DefineLocal, GetFree, SetFree, GetLocalPtr, GetFreePtr, BinaryOp, Unary, Equal,
            NotEqual, Jump, JumpFalsy, AndJump, OrJump, JumpNil, JumpNotNil, Array, Dict,
            KeyValueArray, GetIndex, SetIndex, SliceIndex, Call, Return, Closure, IterInit,
            IterNext, IterKey, IterValue, LoadModule, StoreModule, SetupTry, SetupCatch,
            SetupFinally, Throw, Finalizer,
        ]
    };

    pub fn from_u8(b: u8) -> Option<Self> {
        Self::ALL.get(b as usize).copied()
    }

    /// Byte width of each operand, in order.
    pub fn operand_widths(self) -> &'static [usize] {
        use Opcode::*;
        match self {
            NoOp | Nil | True | False | Pop | Equal | NotEqual | SetIndex | SliceIndex
            | IterInit | IterNext | IterKey | IterValue | SetupCatch | SetupFinally => &[],

            Constant | GetGlobal | SetGlobal | Jump | JumpFalsy | AndJump | OrJump | JumpNil
            | JumpNotNil | Array | Dict | KeyValueArray | StoreModule => &[2],

            GetLocal | SetLocal | DefineLocal | GetFree | SetFree | GetLocalPtr | GetFreePtr
            | BinaryOp | Unary | GetIndex | Return | Throw | Finalizer => &[1],

            Call => &[1, 1],
            Closure => &[2, 1],
            LoadModule | SetupTry => &[2, 2],
        }
    }

    /// Opcode byte plus operands.
    pub fn width(self) -> usize {
        1 + self.operand_widths().iter().sum::<usize>()
    }

    /// Whether every operand is an absolute instruction offset.
    pub fn is_jump(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Jump | JumpFalsy | AndJump | OrJump | JumpNil | JumpNotNil | SetupTry
        )
    }

    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            NoOp => "NOOP",
            Constant => "CONST",
            Nil => "NIL",
            True => "TRUE",
            False => "FALSE",
            Pop => "POP",
            GetGlobal => "GET_GLOBAL",
            SetGlobal => "SET_GLOBAL",
            GetLocal => "GET_LOCAL",
            SetLocal => "SET_LOCAL",
            DefineLocal => "DEF_LOCAL",
            GetFree => "GET_FREE",
            SetFree => "SET_FREE",
            GetLocalPtr => "GET_LOCAL_PTR",
            GetFreePtr => "GET_FREE_PTR",
            BinaryOp => "BINARY_OP",
            Unary => "UNARY",
            Equal => "EQUAL",
            NotEqual => "NOT_EQUAL",
            Jump => "JUMP",
            JumpFalsy => "JUMP_FALSY",
            AndJump => "AND_JUMP",
            OrJump => "OR_JUMP",
            JumpNil => "JUMP_NIL",
            JumpNotNil => "JUMP_NOT_NIL",
            Array => "ARRAY",
            Dict => "DICT",
            KeyValueArray => "KV_ARRAY",
            GetIndex => "GET_INDEX",
            SetIndex => "SET_INDEX",
            SliceIndex => "SLICE_INDEX",
            Call => "CALL",
            Return => "RETURN",
            Closure => "CLOSURE",
            IterInit => "ITER_INIT",
            IterNext => "ITER_NEXT",
            IterKey => "ITER_KEY",
            IterValue => "ITER_VALUE",
            LoadModule => "LOAD_MODULE",
            StoreModule => "STORE_MODULE",
            SetupTry => "SETUP_TRY",
            SetupCatch => "SETUP_CATCH",
            SetupFinally => "SETUP_FINALLY",
            Throw => "THROW",
            Finalizer => "FINALIZER",
        }
    }
}

/// Encodes one instruction. Operands are truncated to their declared width.
pub fn make_instruction(op: Opcode, operands: &[usize]) -> Vec<u8> {
    let mut out = Vec::with_capacity(op.width());
    out.push(op as u8);
    for (i, width) in op.operand_widths().iter().enumerate() {
        let value = operands.get(i).copied().unwrap_or(0);
        match width {
            1 => out.push(value as u8),
            _ => {
                let mut buf = [0u8; 2];
                BigEndian::write_u16(&mut buf, value as u16);
                out.extend_from_slice(&buf);
            }
        }
    }
    out
}

/// Decodes the operands of the instruction at `at`. Returns `None` when the
/// opcode is unknown or the operands run past the end.
pub fn read_operands(ins: &[u8], at: usize) -> Option<(Opcode, [usize; 2])> {
    let op = Opcode::from_u8(*ins.get(at)?)?;
    let mut operands = [0usize; 2];
    let mut pos = at + 1;
    for (i, width) in op.operand_widths().iter().enumerate() {
        operands[i] = match width {
            1 => *ins.get(pos)? as usize,
            _ => BigEndian::read_u16(ins.get(pos..pos + 2)?) as usize,
        };
        pos += width;
    }
    Some((op, operands))
}
