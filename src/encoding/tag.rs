/// Leading byte of every encoded value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Unknown = 0,
    Nil,
    True,
    False,
    FlagOn,
    FlagOff,
    Int,
    Uint,
    Char,
    Float,
    Decimal,
    String,
    Bytes,
    Array,
    Dict,
    SyncDict,
    CompiledFunction,
    NativeFunction,
    Type,
    Symbol,
}

impl Tag {
    pub const ALL: [Tag; 20] = [
        Tag::Unknown,
        Tag::Nil,
        Tag::True,
        Tag::False,
        Tag::FlagOn,
        Tag::FlagOff,
        Tag::Int,
        Tag::Uint,
        Tag::Char,
        Tag::Float,
        Tag::Decimal,
        Tag::String,
        Tag::Bytes,
        Tag::Array,
        Tag::Dict,
        Tag::SyncDict,
        Tag::CompiledFunction,
        Tag::NativeFunction,
        Tag::Type,
        Tag::Symbol,
    ];

    pub fn from_u8(b: u8) -> Option<Self> {
        Self::ALL.get(b as usize).copied()
    }
}

/// Field bytes inside a compiled-function payload.
pub mod func_field {
    pub const NAME: u8 = 0;
    pub const PARAMS: u8 = 1;
    pub const NAMED_PARAMS: u8 = 2;
    pub const NUM_LOCALS: u8 = 3;
    pub const INSTRUCTIONS: u8 = 4;
    pub const VARIADIC: u8 = 5;
    pub const SOURCE_MAP: u8 = 6;
    pub const ALLOW_METHODS: u8 = 7;
}
