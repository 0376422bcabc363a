use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("cannot encode a value of type {0}")]
    Unsupported(String),

    #[error("user type '{0}' is not registered")]
    UnknownUserType(String),

    #[error("values nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("postcard: {0}")]
    Postcard(#[from] postcard::Error),
}

/// Decode failures. A failed decode never yields a partial program.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid signature {0:#010x}")]
    InvalidSignature(u32),

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),

    #[error("unknown field tag {0}")]
    UnknownField(u8),

    #[error("unknown function field {0}")]
    UnknownFunctionField(u8),

    #[error("unknown type tag {0}")]
    UnknownTag(u8),

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("{0} trailing byte(s) after payload")]
    TrailingBytes(usize),

    #[error("varint overflow")]
    VarintOverflow,

    #[error("values nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("{what} has length {found}, expected {expected}")]
    BadLength {
        what: &'static str,
        expected: String,
        found: usize,
    },

    #[error("invalid UTF-8 in string")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("invalid char code point {0:#x}")]
    InvalidChar(u64),

    #[error("unknown builtin type '{0}'")]
    UnknownType(String),

    #[error("symbol outside a parameter list")]
    UnexpectedSymbol,

    #[error("expected {expected}, found {found}")]
    UnexpectedKind { expected: &'static str, found: String },

    #[error("user type '{0}' is not registered")]
    UnknownUserType(String),

    #[error("module '{0}' not found")]
    ModuleNotFound(String),

    #[error("module '{module}' member '{key}': expected {expected}, found {found}")]
    ModuleShapeMismatch {
        module: String,
        key: String,
        expected: String,
        found: String,
    },

    #[error("native function '{0}' was not relinked")]
    UnlinkedNative(String),

    #[error("postcard: {0}")]
    Postcard(#[from] postcard::Error),
}
