// cfg.rs - basic-block reconstruction over a parsed function body.
//
// Block leaders are the function entry, every branch target, and every
// instruction following a terminator. Successor edges come from the
// per-instruction control-flow adapter.

use movedis::insn::ControlFlow;
use movedis::FunctionDef;

/// A basic block, as a half-open range of instruction indices within the
/// owning function.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Index of the first instruction.
    pub start: usize,
    /// Index one past the last instruction.
    pub end: usize,
    /// Absolute address of the first instruction.
    pub address: u64,
    /// Absolute successor addresses, fallthrough first.
    pub successors: Vec<u64>,
}

/// Partition a function's instructions into basic blocks, in address order.
pub fn build_blocks(func: &FunctionDef) -> Vec<BasicBlock> {
    let insns = &func.code.instructions;
    if insns.is_empty() {
        return Vec::new();
    }
    let base = func.meta.mapped_address;

    let mut leaders = vec![false; insns.len()];
    leaders[0] = true;
    for (i, insn) in insns.iter().enumerate() {
        let addr = base + u64::from(insn.offset_in_function);
        match insn.flow(addr) {
            ControlFlow::Return => {
                if i + 1 < insns.len() {
                    leaders[i + 1] = true;
                }
            }
            ControlFlow::Jump { target } => {
                mark_leader(&mut leaders, insns, base, target);
                if i + 1 < insns.len() {
                    leaders[i + 1] = true;
                }
            }
            ControlFlow::Branch { taken, .. } => {
                mark_leader(&mut leaders, insns, base, taken);
                if i + 1 < insns.len() {
                    leaders[i + 1] = true;
                }
            }
            ControlFlow::Call { .. } | ControlFlow::FallThrough { .. } => {}
        }
    }

    let mut blocks = Vec::new();
    let mut start = 0;
    for i in 1..=insns.len() {
        if i == insns.len() || leaders[i] {
            let last = &insns[i - 1];
            let last_addr = base + u64::from(last.offset_in_function);
            let successors = match last.flow(last_addr) {
                ControlFlow::Return => vec![],
                ControlFlow::Jump { target } => vec![target],
                ControlFlow::Branch { fallthrough, taken } => vec![fallthrough, taken],
                ControlFlow::Call { next } | ControlFlow::FallThrough { next } => {
                    if i == insns.len() {
                        vec![]
                    } else {
                        vec![next]
                    }
                }
            };
            blocks.push(BasicBlock {
                start,
                end: i,
                address: base + u64::from(insns[start].offset_in_function),
                successors,
            });
            start = i;
        }
    }
    blocks
}

fn mark_leader(
    leaders: &mut [bool],
    insns: &[movedis::Instruction],
    base: u64,
    target: u64,
) {
    let offset = target.wrapping_sub(base) as u32;
    if let Some(i) = insns.iter().position(|x| x.offset_in_function == offset) {
        leaders[i] = true;
    }
}
