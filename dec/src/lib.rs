// movedec - stack-to-IR lifter and decompiler core for Move VM bytecode
//
// Consumes units decoded by `movedis` and turns their stack-oriented
// bytecode into a typed three-address IR:
//
// 1. **Block building** (`cfg.rs`): basic blocks over a parsed function,
//    edges from the per-instruction control-flow adapter
// 2. **Lifting** (`lift.rs`): symbolic operand stack, per-opcode lowering,
//    opaque untranslated nodes for Move's ownership/borrow operators
// 3. **Optimizer hooks** (`opt.rs`): discard filter, dead-store sweep,
//    post-hoc type refinement of untranslated nodes
// 4. **Reconstruction** (`rebuild.rs`): lifts every internal routine and
//    groups them under a synthetic class for module binaries
// 5. **Rendering** (`render.rs`): IR and pseudo-source listings
//
// `ir.rs` holds the statement/expression model, `types.rs` the bridge from
// Move signature tokens to host types. The `movedec` binary drives the
// whole pipeline from the command line.

pub mod cfg;
pub mod ir;
pub mod lift;
pub mod opt;
pub mod rebuild;
pub mod render;
pub mod types;

pub use lift::{lift_function, LiftError, Lifter, RoutineIr};
pub use rebuild::{rebuild, ClassRegistry, DecompiledUnit};
pub use types::{Prototype, TypeManager};

#[cfg(test)]
pub(crate) mod testutil {
    //! Synthetic Move binaries assembled as literal byte vectors.

    const SIG_EMPTY_FUNCTION: &[u8] = &[0x02, 0x00, 0x00];
    const HANDLE_FN0: &[u8] = &[0x00, 0x00, 0x00];

    /// A script whose `main` has no locals and the given bytecode.
    pub(crate) fn script_with_body(insn_count: u16, code: &[u8]) -> Vec<u8> {
        script_with_locals(insn_count, code, &[])
    }

    /// A script whose `main` declares locals of the given serialized types.
    pub(crate) fn script_with_locals(insn_count: u16, code: &[u8], local_types: &[u8]) -> Vec<u8> {
        build(&[
            (0x0C, SIG_EMPTY_FUNCTION.to_vec()),
            (0x0D, locals_signature(local_types)),
            (0x03, HANDLE_FN0.to_vec()),
            (0x07, function_def(insn_count, code)),
        ])
    }

    /// A module with a single internal function (FUNCTION_DEFS, no MAIN).
    pub(crate) fn module_with_body(insn_count: u16, code: &[u8]) -> Vec<u8> {
        build(&[
            (0x0C, SIG_EMPTY_FUNCTION.to_vec()),
            (0x0D, locals_signature(&[])),
            (0x03, HANDLE_FN0.to_vec()),
            (0x0A, function_def(insn_count, code)),
        ])
    }

    fn locals_signature(local_types: &[u8]) -> Vec<u8> {
        let mut body = vec![0x03, local_types.len() as u8];
        body.extend_from_slice(local_types);
        body
    }

    /// Function definition for handle 0, no flags, locals signature 0.
    fn function_def(insn_count: u16, code: &[u8]) -> Vec<u8> {
        let mut body = vec![0x00, 0x00, 0x00, 0x00];
        body.extend_from_slice(&insn_count.to_le_bytes());
        body.extend_from_slice(code);
        body
    }

    fn build(tables: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"DIEMVM\n\0");
        out.extend_from_slice(&[0x01, 0x00]);
        out.push(tables.len() as u8);
        let mut offset = (11 + tables.len() * 9) as u32;
        for (kind, body) in tables {
            out.push(*kind);
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&(body.len() as u32).to_le_bytes());
            offset += body.len() as u32;
        }
        for (_, body) in tables {
            out.extend_from_slice(body);
        }
        out
    }
}
