// error.rs - error taxonomy for identification, loading, and bytecode parsing.

use thiserror::Error;

/// Errors produced while identifying, loading, or parsing a Move binary.
///
/// Identification-time mismatches (magic, version) are reported as a negative
/// identification by [`crate::identify`]; [`crate::load`] surfaces them as
/// `UnrecognizedFormat` / `UnsupportedVersion`. All other variants abort the
/// construction of the unit being loaded.
#[derive(Debug, Error)]
pub enum Error {
    /// The input does not start with a known magic; "not my file".
    #[error("unrecognized file format")]
    UnrecognizedFormat,

    #[error("unsupported Move binary version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },

    /// A read would advance past the end of the buffer (truncated record).
    #[error("end of input at offset {offset:#x} (wanted {wanted} bytes, {available} available)")]
    EndOfInput {
        offset: usize,
        wanted: usize,
        available: usize,
    },

    #[error("{pool} index {index} out of range ({len} entries)")]
    IndexOutOfRange {
        pool: &'static str,
        index: usize,
        len: usize,
    },

    /// A table directory entry points outside the input buffer.
    #[error("table {kind:#04x} body [{offset:#x}..+{size:#x}] exceeds the input")]
    TableOutOfBounds { kind: u8, offset: u32, size: u32 },

    #[error("unknown table kind {0:#04x}")]
    UnknownTableKind(u8),

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// A variable-width integer exceeds its encodable range.
    #[error("varint at offset {offset:#x} exceeds its encodable range")]
    VarintOverflow { offset: usize },

    /// A pooled byte array or string declares a negative or oversized length.
    #[error("invalid data entry length {0}")]
    InvalidDataLength(i64),

    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    /// Reserved for operand kinds the decoder does not handle.
    #[error("unsupported operand kind for opcode {mnemonic}")]
    UnsupportedOperandKind { mnemonic: &'static str },

    #[error("operand stack underflow at instruction #{index}")]
    StackUnderflow { index: usize },

    #[error("non-zero operand stack depth {depth} at end of function")]
    UnbalancedStack { depth: i64 },

    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),

    /// A script must not define functions besides `main`.
    #[error("binary carries both a main entry and function definitions")]
    ConflictingFunctionTables,
}

pub type Result<T> = std::result::Result<T, Error>;
