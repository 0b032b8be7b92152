// movedis - Diem/Libra Move VM binary loader and disassembler core
//
// Decodes binary modules and scripts of Move file-format version 1.0 (both
// the LIBRAVM and DIEMVM brandings) into a typed in-memory representation
// suitable for disassembly and decompilation.
//
// # Architecture
//
// Loading works in several phases:
//
// 1. **Identification** (`module.rs`): magic and version probe
// 2. **Table decoding** (`module.rs`): directory scan, then typed pools
//    decoded in dependency rank
// 3. **Bytecode parsing** (`parser.rs`): per-function instruction decode
//    with stack-depth bookkeeping and branch-target rewriting
// 4. **Layout** (`module.rs`): pool entries mapped into a synthetic
//    address space (.data / .code / .imports) with segment and symbol
//    records for the embedding host
//
// `insn.rs` exposes per-instruction successor edges for control-flow
// reconstruction, and `fmt.rs` renders pools and disassembly listings.

pub mod error;
pub mod fmt;
pub mod format;
pub mod insn;
pub mod module;
mod parser;
pub mod pool;
pub mod reader;

pub use error::{Error, Result};
pub use format::{Opcode, OperandKind, SerializedType, TableKind, UnitKind};
pub use insn::{ControlFlow, Instruction, Operand};
pub use module::{identify, load, CompiledUnit, SectionInfo, SegmentInfo, SymbolInfo, SymbolKind};
pub use pool::{FunctionDef, FunctionSignature, Pool, SignatureToken};
