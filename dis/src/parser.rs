// parser.rs - per-function bytecode decoding and trivial stack analysis.
//
// Function bodies are pre-parsed while the container loads: instruction
// boundaries and pool references are only meaningful with the pools at
// hand, so nothing is deferred to a later analysis stage. Each decoded
// instruction carries the operand-stack depth observed before and after
// it, and branch targets are rewritten from instruction-index form to
// byte-delta form in a post-pass.

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::format::{Opcode, OperandKind};
use crate::insn::{Instruction, Operand};
use crate::module::CompiledUnit;
use crate::reader::ByteReader;

/// Decode `insn_count` instructions of one function body starting at
/// `offset`, bounded by `end`, and fill in their stack depths.
pub(crate) fn parse_function(
    unit: &CompiledUnit,
    fh_index: u16,
    insn_count: u16,
    offset: usize,
    end: usize,
) -> Result<Vec<Instruction>> {
    let sig = unit.function_signature(fh_index)?;
    let in_arity = sig.param_tokens.len();
    let out_arity = sig.return_tokens.len();
    debug!(
        "function {} (fh={fh_index}): in={in_arity}, out={out_arity}, {insn_count} instructions",
        unit.function_name(fh_index)
    );

    let start = offset;
    let mut offset = offset;
    let mut insns: Vec<Instruction> = Vec::with_capacity(insn_count as usize);
    let mut branch_indices: Vec<usize> = Vec::new();
    let mut depth: i64 = 0;

    for i in 0..insn_count {
        let mut insn = decode_instruction(unit, offset, end)?;
        insn.pre_exec_stack_depth = depth as u16;
        insn.index_in_function = i;
        insn.offset_in_function = (offset - start) as u32;

        let (pop_count, push_count) = effective_counts(unit, &insn, out_arity as u16)?;
        depth -= i64::from(pop_count);
        if depth < 0 {
            return Err(Error::StackUnderflow { index: i as usize });
        }
        depth += i64::from(push_count);
        insn.post_exec_stack_depth = depth as u16;

        if insn.opcode.is_branch() {
            branch_indices.push(i as usize);
        }

        trace!(
            "#{i}/{:04X}: {} [{},{}]",
            insn.offset_in_function,
            insn.opcode.mnemonic(),
            insn.pre_exec_stack_depth,
            insn.post_exec_stack_depth
        );

        offset += insn.size();
        if offset > end {
            return Err(Error::EndOfInput {
                offset,
                wanted: 0,
                available: 0,
            });
        }
        insns.push(insn);
    }

    if depth != 0 {
        return Err(Error::UnbalancedStack { depth });
    }

    // Branch targets are encoded as instruction indices; rewrite them to
    // byte deltas now that every instruction offset is known.
    for &i in &branch_indices {
        let target = match insns[i].operand {
            Some(Operand::Branch(t)) => t as usize,
            _ => {
                return Err(Error::UnresolvedReference(format!(
                    "branch instruction #{i} has no target operand"
                )))
            }
        };
        if target >= insns.len() {
            return Err(Error::UnresolvedReference(format!(
                "branch target index {target} out of range ({} instructions)",
                insns.len()
            )));
        }
        let delta = insns[target].offset_in_function as i64 - insns[i].offset_in_function as i64;
        insns[i].target_delta = Some(delta as i32);
    }

    Ok(insns)
}

/// Pop/push counts of one instruction, resolving the pool-dependent cases.
fn effective_counts(
    unit: &CompiledUnit,
    insn: &Instruction,
    out_arity: u16,
) -> Result<(u16, u16)> {
    let mut pop = insn.opcode.pop_count().map(u16::from);
    let mut push = insn.opcode.push_count().map(u16::from);
    match insn.opcode {
        Opcode::Ret => {
            // one value per return slot of the enclosing function
            pop = Some(out_arity);
        }
        Opcode::Pack => {
            let sd = operand_index(insn)?;
            pop = Some(unit.struct_field_count(sd)?);
        }
        Opcode::Unpack => {
            let sd = operand_index(insn)?;
            push = Some(unit.struct_field_count(sd)?);
        }
        Opcode::Call => {
            let fh = operand_index(insn)?;
            let sig = unit.function_signature(fh)?;
            pop = Some(sig.param_tokens.len() as u16);
            push = Some(sig.return_tokens.len() as u16);
        }
        _ => {}
    }
    Ok((pop.unwrap_or(0), push.unwrap_or(0)))
}

fn operand_index(insn: &Instruction) -> Result<u16> {
    insn.operand
        .and_then(|o| o.as_index())
        .map(|i| i as u16)
        .ok_or(Error::UnsupportedOperandKind {
            mnemonic: insn.opcode.mnemonic(),
        })
}

/// Decode a single instruction at `offset`.
fn decode_instruction(unit: &CompiledUnit, offset: usize, end: usize) -> Result<Instruction> {
    let bytes = unit.bytes();
    let mut r = ByteReader::window(bytes, offset, end)?;
    let b = r.u8()?;
    let opcode = Opcode::from_byte(b).ok_or(Error::UnknownOpcode(b))?;

    let operand = match opcode.operand_kind() {
        OperandKind::None => None,
        OperandKind::Branch => Some(Operand::Branch(r.u16_le()?)),
        OperandKind::ImmU64 => Some(Operand::ImmU64(r.i64_le()? as u64)),
        // u8, not varu16: no more than 256 locals per function
        OperandKind::IdxLocal => Some(Operand::Local(r.u8()?)),
        OperandKind::IdxAddress => Some(Operand::Address(checked_index(
            r.varu16()?,
            unit.address_pool.len(),
            "address pool",
        )?)),
        OperandKind::IdxByteArray => Some(Operand::ByteArray(checked_index(
            r.varu16()?,
            unit.bytearray_pool.len(),
            "bytearray pool",
        )?)),
        OperandKind::IdxString => Some(Operand::Str(checked_index(
            r.varu16()?,
            unit.string_pool.len(),
            "string pool",
        )?)),
        OperandKind::IdxFuncHandle => Some(Operand::FuncHandle(checked_index(
            r.varu16()?,
            unit.function_handles.len(),
            "function handle pool",
        )?)),
        OperandKind::IdxStructDef => Some(Operand::StructDef(checked_index(
            r.varu16()?,
            unit.struct_defs.len(),
            "struct definition pool",
        )?)),
        OperandKind::IdxFieldDef => Some(Operand::FieldDef(checked_index(
            r.varu16()?,
            unit.field_defs.len(),
            "field definition pool",
        )?)),
    };

    Ok(Instruction {
        opcode,
        raw: bytes[offset..r.position()].to_vec(),
        operand,
        pre_exec_stack_depth: 0,
        post_exec_stack_depth: 0,
        index_in_function: 0,
        offset_in_function: 0,
        target_delta: None,
    })
}

fn checked_index(index: u16, len: usize, pool: &'static str) -> Result<u16> {
    if (index as usize) < len {
        Ok(index)
    } else {
        Err(Error::UnresolvedReference(format!(
            "{pool} index {index} out of range ({len} entries)"
        )))
    }
}

impl CompiledUnit {
    /// The pre-parsed instruction whose mapped address matches, found by
    /// scanning the owning function's instruction list.
    pub fn instruction_at(&self, address: u64) -> Result<&Instruction> {
        for f in self.internal_functions() {
            let base = f.meta.mapped_address;
            if address >= base && address < base + u64::from(f.meta.mapped_size) {
                let wanted = (address - base) as u32;
                for insn in &f.code.instructions {
                    if insn.offset_in_function == wanted {
                        return Ok(insn);
                    }
                }
                break;
            }
        }
        Err(Error::UnresolvedReference(format!(
            "no pre-parsed instruction at address {address:#x}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::TableKind;
    use crate::module::testutil::{script_with_body, BinaryBuilder};
    use crate::module::{load, CODE_BASE};

    // LD_CONST 42; LD_CONST 8; ADD; RET
    const ARITH: &[u8] = &[
        0x06, 0x2A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
        0x06, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
        0x16, //
        0x02,
    ];

    #[test]
    fn arithmetic_stack_depths() {
        let unit = load(script_with_body(4, ARITH)).unwrap();
        let insns = &unit.main.as_ref().unwrap().code.instructions;
        let post: Vec<u16> = insns.iter().map(|i| i.post_exec_stack_depth).collect();
        assert_eq!(post, vec![1, 2, 1, 0]);
        for w in insns.windows(2) {
            assert_eq!(w[1].pre_exec_stack_depth, w[0].post_exec_stack_depth);
        }
        assert_eq!(insns[0].operand, Some(Operand::ImmU64(42)));
        let offsets: Vec<u32> = insns.iter().map(|i| i.offset_in_function).collect();
        assert_eq!(offsets, vec![0, 9, 18, 19]);
    }

    // LD_TRUE; BR_FALSE -> 2; BRANCH -> 3; RET; RET
    const COND: &[u8] = &[0x09, 0x04, 0x02, 0x00, 0x05, 0x03, 0x00, 0x02, 0x02];

    #[test]
    fn branch_deltas_resolve_to_offsets() {
        let unit = load(script_with_body(5, COND)).unwrap();
        let insns = &unit.main.as_ref().unwrap().code.instructions;
        let offsets: Vec<u32> = insns.iter().map(|i| i.offset_in_function).collect();
        assert_eq!(offsets, vec![0, 1, 4, 7, 8]);

        let br_false = &insns[1];
        assert_eq!(br_false.target_delta, Some(3));
        assert_eq!(
            br_false.offset_in_function as i64 + i64::from(br_false.target_delta.unwrap()),
            insns[2].offset_in_function as i64
        );
        let branch = &insns[2];
        assert_eq!(branch.target_delta, Some(3));
        assert!(insns[0].target_delta.is_none());
    }

    #[test]
    fn backward_branch_delta_is_negative() {
        // LD_TRUE; BR_TRUE -> 0; RET
        let body = &[0x09, 0x03, 0x00, 0x00, 0x02];
        let unit = load(script_with_body(3, body)).unwrap();
        let insns = &unit.main.as_ref().unwrap().code.instructions;
        assert_eq!(insns[1].target_delta, Some(-1));
    }

    #[test]
    fn stack_underflow_detected() {
        // POP on an empty stack
        let err = load(script_with_body(2, &[0x01, 0x02])).unwrap_err();
        assert!(matches!(err, Error::StackUnderflow { index: 0 }));
    }

    #[test]
    fn unbalanced_stack_detected() {
        // LD_TRUE; RET leaves one value behind
        let err = load(script_with_body(2, &[0x09, 0x02])).unwrap_err();
        assert!(matches!(err, Error::UnbalancedStack { depth: 1 }));
    }

    #[test]
    fn unknown_opcode_rejected() {
        let err = load(script_with_body(1, &[0xFE])).unwrap_err();
        assert!(matches!(err, Error::UnknownOpcode(0xFE)));
    }

    #[test]
    fn branch_target_out_of_range_rejected() {
        // BRANCH -> 7 in a 2-instruction body
        let err = load(script_with_body(2, &[0x05, 0x07, 0x00, 0x02])).unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference(_)));
    }

    #[test]
    fn operand_pool_indices_validated() {
        // LD_STR #0 with an empty string pool
        let err = load(script_with_body(2, &[0x08, 0x00, 0x01, 0x02])).unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference(_)));
    }

    #[test]
    fn instruction_lookup_by_address() {
        let unit = load(script_with_body(4, ARITH)).unwrap();
        let insn = unit.instruction_at(CODE_BASE + 18).unwrap();
        assert_eq!(insn.opcode, Opcode::Add);
        assert!(unit.instruction_at(CODE_BASE + 17).is_err());
        assert!(unit.instruction_at(0xDEAD).is_err());
    }

    #[test]
    fn truncated_body_rejected() {
        // LD_CONST with only three immediate bytes present
        let bytes = BinaryBuilder::new()
            .table(TableKind::FunctionSignatures as u8, vec![0x02, 0x00, 0x00])
            .table(TableKind::LocalsSignatures as u8, vec![0x03, 0x00])
            .table(TableKind::FunctionHandles as u8, vec![0x00, 0x00, 0x00])
            .table(
                TableKind::Main as u8,
                crate::module::testutil::function_def_body(1, &[0x06, 0x01, 0x02, 0x03]),
            )
            .build();
        assert!(matches!(load(bytes), Err(Error::EndOfInput { .. })));
    }
}
