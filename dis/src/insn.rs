// insn.rs - decoded instruction records and their control-flow edges.

use crate::format::{Opcode, OperandKind};

/// An inline (non-stack) instruction operand: a branch target, a uint64
/// immediate, or an index into one of the pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Target instruction index within the function, not a byte offset.
    Branch(u16),
    ImmU64(u64),
    Local(u8),
    Address(u16),
    ByteArray(u16),
    Str(u16),
    FuncHandle(u16),
    StructDef(u16),
    FieldDef(u16),
}

impl Operand {
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::Branch(_) => OperandKind::Branch,
            Operand::ImmU64(_) => OperandKind::ImmU64,
            Operand::Local(_) => OperandKind::IdxLocal,
            Operand::Address(_) => OperandKind::IdxAddress,
            Operand::ByteArray(_) => OperandKind::IdxByteArray,
            Operand::Str(_) => OperandKind::IdxString,
            Operand::FuncHandle(_) => OperandKind::IdxFuncHandle,
            Operand::StructDef(_) => OperandKind::IdxStructDef,
            Operand::FieldDef(_) => OperandKind::IdxFieldDef,
        }
    }

    /// Index payload for pool, local, and branch-target operands.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Operand::Branch(i)
            | Operand::Address(i)
            | Operand::ByteArray(i)
            | Operand::Str(i)
            | Operand::FuncHandle(i)
            | Operand::StructDef(i)
            | Operand::FieldDef(i) => Some(*i as usize),
            Operand::Local(i) => Some(*i as usize),
            Operand::ImmU64(_) => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Operand::ImmU64(v) => Some(*v),
            _ => None,
        }
    }
}

/// A decoded instruction, annotated with the operand-stack depths observed
/// around it during parsing.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Opcode,
    /// Raw encoded bytes, kept for display.
    pub raw: Vec<u8>,
    /// Zero or one inline operand.
    pub operand: Option<Operand>,
    pub pre_exec_stack_depth: u16,
    pub post_exec_stack_depth: u16,
    pub index_in_function: u16,
    /// Byte offset from the start of the function's instruction stream.
    pub offset_in_function: u32,
    /// Signed byte delta from this instruction to its branch target within
    /// the function. Branch opcodes only; negative for backward branches.
    pub target_delta: Option<i32>,
}

/// Control-flow effect of one instruction at absolute address `A`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFlow {
    /// No successors.
    Return,
    /// Unconditional jump.
    Jump { target: u64 },
    /// Conditional branch; falls through when not taken.
    Branch { fallthrough: u64, taken: u64 },
    /// Call edge; execution continues at the next instruction.
    Call { next: u64 },
    FallThrough { next: u64 },
}

impl Instruction {
    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        self.raw.len()
    }

    /// Branch target address, given the instruction's absolute address.
    fn target(&self, address: u64) -> u64 {
        let delta = i64::from(self.target_delta.unwrap_or(0));
        (address as i64 + delta) as u64
    }

    /// Control-flow edge(s) of this instruction at `address`.
    pub fn flow(&self, address: u64) -> ControlFlow {
        let next = address + self.size() as u64;
        match self.opcode {
            Opcode::Ret => ControlFlow::Return,
            Opcode::Branch => ControlFlow::Jump {
                target: self.target(address),
            },
            Opcode::BrTrue | Opcode::BrFalse => ControlFlow::Branch {
                fallthrough: next,
                taken: self.target(address),
            },
            Opcode::Call => ControlFlow::Call { next },
            _ => ControlFlow::FallThrough { next },
        }
    }

    /// Successor addresses, fallthrough first for conditional branches.
    pub fn successors(&self, address: u64) -> Vec<u64> {
        match self.flow(address) {
            ControlFlow::Return => vec![],
            ControlFlow::Jump { target } => vec![target],
            ControlFlow::Branch { fallthrough, taken } => vec![fallthrough, taken],
            ControlFlow::Call { next } | ControlFlow::FallThrough { next } => vec![next],
        }
    }
}
