use thiserror::Error;

/// Errors raised while decoding a serialized object stream.
#[derive(Debug, Error)]
pub enum PickleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: u64 },

    #[error("stack underflow while executing {0}")]
    StackUnderflow(&'static str),

    #[error("no mark on the stack for {0}")]
    MarkNotFound(&'static str),

    #[error("memo entry {0} not found")]
    MemoMissing(u32),

    #[error("memo copies exceed {limit} values")]
    MemoCopyLimit { limit: usize },

    #[error("invalid literal at offset {offset}: {reason}")]
    InvalidLiteral { offset: u64, reason: String },

    #[error("integer of {0} bytes does not fit in 128 bits")]
    LongTooLarge(usize),

    #[error("{op} expected {expected}, found {found}")]
    UnexpectedType {
        op: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("cannot resolve global {module}.{name}")]
    UnresolvedGlobal { module: String, name: String },

    #[error("object of type {0} is not callable")]
    NotCallable(&'static str),

    #[error("persistent reference found but no persistent loader is installed")]
    MissingPersistentLoad,
}

pub type PickleResult<T> = Result<T, PickleError>;
