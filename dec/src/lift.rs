// lift.rs - stack-to-IR lifting of parsed bytecode, one basic block at a
// time.
//
// The lifter keeps a symbolic operand stack: an index plus a growable
// array of slots caching the variable last written there and the Move
// type token it carried. Pushing a value of the same token reuses the
// slot's variable; anything else allocates a fresh `var<N>`. The stack
// index is re-seeded at every block entry from the parser's recorded
// pre-execution depth, which is authoritative at that program point.

use std::collections::HashMap;

use log::{trace, warn};
use thiserror::Error;

use movedis::format::Opcode;
use movedis::insn::Instruction;
use movedis::pool::{FunctionDef, FunctionSignature, SignatureToken};
use movedis::CompiledUnit;

use crate::cfg::{build_blocks, BasicBlock};
use crate::ir::{
    Expr, OperationType, RoutineContext, Statement, StatementKind, VarId,
};
use crate::types::{
    convert_prototype, convert_token, token_bits, Prototype, TypeKind, TypeManager, TypeRef,
};

/// Errors raised while lifting a routine. `UnsupportedConversion` aborts
/// only the block being lifted; everything else aborts the routine.
#[derive(Debug, Error)]
pub enum LiftError {
    #[error("cannot convert instruction: {mnemonic}")]
    UnsupportedConversion { mnemonic: String },

    #[error("operand stack underflow while lifting")]
    StackUnderflow,

    #[error("cannot resolve routine `{0}`")]
    UnresolvedRoutine(String),

    #[error("local slot {0} out of range")]
    InvalidLocal(usize),

    #[error("instruction carries no usable immediate operand")]
    MissingOperand,

    #[error(transparent)]
    Dis(#[from] movedis::Error),
}

/// A lifted routine: its synthesized prototype, the variable context, and
/// the flat IR statement stream.
#[derive(Debug)]
pub struct RoutineIr {
    pub name: String,
    pub flags: u8,
    pub address: u64,
    pub prototype: Prototype,
    pub ctx: RoutineContext,
    pub statements: Vec<Statement>,
}

struct StackSlot {
    var: VarId,
    token: Option<SignatureToken>,
}

/// Per-routine lifting state. Created fresh for each routine conversion.
pub struct Lifter<'a> {
    unit: &'a CompiledUnit,
    types: &'a mut TypeManager,
    prototypes: &'a mut HashMap<String, Prototype>,
    func: &'a FunctionDef,
    sig: &'a FunctionSignature,
    locals: &'a [SignatureToken],
    name: String,
    ctx: RoutineContext,
    local_slots: Vec<VarId>,
    stack: Vec<StackSlot>,
    stack_idx: usize,
    counter: u32,
}

impl<'a> Lifter<'a> {
    pub fn new(
        unit: &'a CompiledUnit,
        types: &'a mut TypeManager,
        prototypes: &'a mut HashMap<String, Prototype>,
        func: &'a FunctionDef,
    ) -> Result<Self, LiftError> {
        let sig = unit.function_signature(func.function_handle_index)?;
        let name = unit.function_name(func.function_handle_index);
        let locals = &unit.locals_of(func)?.tokens;

        // parameters occupy the first local slots, sharing their numbering
        let mut ctx = RoutineContext::new();
        let mut local_slots = Vec::with_capacity(locals.len());
        for (i, token) in locals.iter().enumerate() {
            let v = ctx.create_virtual_var(&format!("local{i}"), token_bits(token));
            let ty = convert_token(types, unit, token)?;
            ctx.set_var_type(v, ty);
            local_slots.push(v);
        }

        if !prototypes.contains_key(&name) {
            let proto = convert_prototype(types, unit, sig)?;
            prototypes.insert(name.clone(), proto);
        }

        Ok(Lifter {
            unit,
            types,
            prototypes,
            func,
            sig,
            locals,
            name,
            ctx,
            local_slots,
            stack: Vec::new(),
            stack_idx: 0,
            counter: 0,
        })
    }

    /// Lift one basic block, appending statements to `out`.
    pub fn lift_block(
        &mut self,
        block: &BasicBlock,
        out: &mut Vec<Statement>,
    ) -> Result<(), LiftError> {
        let insns = &self.func.code.instructions[block.start..block.end];
        for (k, insn) in insns.iter().enumerate() {
            if k == 0 {
                self.stack_idx = insn.pre_exec_stack_depth as usize;
            }
            let address = self.func.meta.mapped_address + u64::from(insn.offset_in_function);
            trace!("lifting {:#x}: {}", address, insn.opcode.mnemonic());
            self.lift_instruction(insn, address, out)?;
        }
        Ok(())
    }

    /// Consume the lifter, producing the routine record.
    pub fn finish(self, statements: Vec<Statement>) -> RoutineIr {
        let prototype = self
            .prototypes
            .get(&self.name)
            .cloned()
            .unwrap_or(Prototype {
                params: Vec::new(),
                returns: Vec::new(),
                convention: crate::types::CallingConvention::Unknown,
            });
        RoutineIr {
            name: self.name,
            flags: self.func.flags,
            address: self.func.meta.mapped_address,
            prototype,
            ctx: self.ctx,
            statements,
        }
    }

    fn lift_instruction(
        &mut self,
        insn: &Instruction,
        address: u64,
        out: &mut Vec<Statement>,
    ) -> Result<(), LiftError> {
        use Opcode::*;
        match insn.opcode {
            LdConst => {
                let value = insn
                    .operand
                    .and_then(|o| o.as_u64())
                    .ok_or(LiftError::MissingOperand)?;
                self.push_assign(
                    out,
                    address,
                    SignatureToken::U64,
                    Expr::Imm { value, bits: 64 },
                )?;
            }
            LdTrue | LdFalse => {
                let value = u64::from(insn.opcode == LdTrue);
                self.push_assign(
                    out,
                    address,
                    SignatureToken::Bool,
                    Expr::Imm { value, bits: 64 },
                )?;
            }
            LdAddr => {
                let idx = self.op_index(insn)?;
                let entry = self.unit.address_pool.get(idx as usize)?;
                self.push_assign(
                    out,
                    address,
                    SignatureToken::Address,
                    Expr::ImmBytes {
                        bytes: entry.bytes.to_vec(),
                        bits: 256,
                    },
                )?;
            }
            LdStr => {
                let idx = self.op_index(insn)?;
                let entry = self.unit.string_pool.get(idx as usize)?;
                let sym = data_symbol(entry.meta.mapped_address);
                self.push_assign(out, address, SignatureToken::String, sym)?;
            }
            LdByteArray => {
                let idx = self.op_index(insn)?;
                let entry = self.unit.bytearray_pool.get(idx as usize)?;
                let sym = data_symbol(entry.meta.mapped_address);
                self.push_assign(out, address, SignatureToken::ByteArray, sym)?;
            }
            CopyLoc | MoveLoc => {
                let idx = self.op_index(insn)? as usize;
                let var = self.local_slot(idx)?;
                let token = self.locals[idx].clone();
                self.push_assign(out, address, token, Expr::Var(var))?;
                if insn.opcode == MoveLoc {
                    // the moved-from local is invalidated by zeroing it
                    let bits = self.ctx.var(var).bits;
                    emit(
                        out,
                        address,
                        StatementKind::Assign {
                            dst: var,
                            src: Expr::Imm { value: 0, bits },
                        },
                    );
                }
            }
            StLoc => {
                let idx = self.op_index(insn)? as usize;
                let dst = self.local_slot(idx)?;
                let v = self.pop()?;
                emit(
                    out,
                    address,
                    StatementKind::Assign {
                        dst,
                        src: Expr::Var(v),
                    },
                );
            }
            Pop => {
                self.pop()?;
            }
            Branch => {
                let target = branch_target(insn, address);
                emit(
                    out,
                    address,
                    StatementKind::BranchAssign {
                        dst: self.ctx.pc,
                        target: Expr::imm(target),
                    },
                );
            }
            BrTrue | BrFalse => {
                let v = self.pop()?;
                let mut cond = Expr::Var(v);
                if insn.opcode == BrFalse {
                    cond = Expr::Op {
                        op: OperationType::LogNot,
                        args: vec![cond],
                    };
                }
                let taken = branch_target(insn, address);
                let fallthrough = address + insn.size() as u64;
                emit(
                    out,
                    address,
                    StatementKind::BranchAssign {
                        dst: self.ctx.pc,
                        target: Expr::Cond {
                            cond: Box::new(cond),
                            if_true: Box::new(Expr::imm(taken)),
                            if_false: Box::new(Expr::imm(fallthrough)),
                        },
                    },
                );
            }
            Not => {
                let a = self.pop()?;
                let res = Expr::zext(
                    Expr::Op {
                        op: OperationType::LogNot,
                        args: vec![Expr::Var(a)],
                    },
                    64,
                );
                self.push_assign(out, address, SignatureToken::U64, res)?;
            }
            Add | Sub | Mul | Mod | Div | BitOr | BitAnd | Xor | Or | And | Eq | Neq | Lt | Gt
            | Le | Ge => {
                let b = self.pop()?;
                let a = self.pop()?;
                let res = Expr::zext(
                    Expr::Op {
                        op: operation_type(insn.opcode),
                        args: vec![Expr::Var(a), Expr::Var(b)],
                    },
                    64,
                );
                self.push_assign(out, address, SignatureToken::U64, res)?;
            }
            Ret => {
                let arity = self.sig.return_tokens.len();
                let mut values = Vec::with_capacity(arity);
                for _ in 0..arity {
                    values.insert(0, Expr::Var(self.pop()?));
                }
                emit(out, address, StatementKind::Return { values });
            }
            Call => {
                let fh = self.op_index(insn)?;
                let fname = self.unit.function_name(fh);
                let sig = self.unit.function_signature(fh)?;

                let target = if let Some(def) = self.unit.function_by_name(&fname) {
                    Expr::Symbol {
                        name: fname.clone(),
                        address: Some(def.meta.mapped_address),
                    }
                } else {
                    let h = self.unit.function_handles.get(fh as usize)?;
                    if h.meta.mapped_address == 0 {
                        return Err(LiftError::UnresolvedRoutine(fname));
                    }
                    Expr::Symbol {
                        name: fname.clone(),
                        address: Some(h.meta.mapped_address),
                    }
                };

                if !self.prototypes.contains_key(&fname) {
                    let proto = convert_prototype(self.types, self.unit, sig)?;
                    self.prototypes.insert(fname.clone(), proto);
                }

                let mut params = Vec::with_capacity(sig.param_tokens.len());
                for _ in &sig.param_tokens {
                    params.insert(0, Expr::Var(self.pop()?));
                }
                let mut returns = Vec::with_capacity(sig.return_tokens.len());
                for t in &sig.return_tokens {
                    returns.push(self.push(t.clone())?);
                }
                emit(
                    out,
                    address,
                    StatementKind::Call {
                        target,
                        returns,
                        params,
                    },
                );
            }

            // The remaining opcodes encode ownership, borrow, or chain
            // semantics with no direct IR equivalent; they become opaque
            // nodes tagged with the opcode for later specialization.
            BorrowRef => {
                let sd_idx = self.op_index(insn)?;
                let sd = self.unit.struct_defs.get(sd_idx as usize)?;
                let arg = self.pop()?;
                let token = SignatureToken::reference_to(
                    SignatureToken::Struct(sd.struct_handle_index),
                    true,
                );
                let res = self.push(token)?;
                emit(
                    out,
                    address,
                    self.untranslated(insn, vec![res], vec![Expr::Var(arg)]),
                );
            }
            FreezeRef => {
                let r = self.pop()?;
                let (ty, bits) = {
                    let v = self.ctx.var(r);
                    (v.ty, v.bits)
                };
                let res = self.push_force(ty, bits);
                emit(
                    out,
                    address,
                    self.untranslated(insn, vec![res], vec![Expr::Var(r)]),
                );
            }
            LdRefField => {
                let f_idx = self.op_index(insn)?;
                let field = self.unit.field_defs.get(f_idx as usize)?;
                let r = self.pop()?;
                let field_token = self
                    .unit
                    .type_signatures
                    .get(field.signature_index as usize)?
                    .token
                    .clone();
                let token = SignatureToken::reference_to(field_token, true);
                let name_entry = self.unit.string_pool.get(field.name_index as usize)?;
                let name_sym = data_symbol(name_entry.meta.mapped_address);
                let res = self.push(token)?;
                emit(
                    out,
                    address,
                    self.untranslated(insn, vec![res], vec![Expr::Var(r), name_sym]),
                );
            }
            ReadRef => {
                let r = self.pop()?;
                let pointee = match self.ctx.var(r).ty.map(|t| self.types.kind(t)) {
                    Some(TypeKind::Reference { target }) => Some(*target),
                    _ => None,
                };
                let res = match pointee {
                    Some(target) => {
                        let bits = self.types.bits_of(target);
                        self.push_force(Some(target), bits)
                    }
                    None => self.push(SignatureToken::MutableReference(None))?,
                };
                emit(
                    out,
                    address,
                    self.untranslated(insn, vec![res], vec![Expr::Var(r)]),
                );
            }
            WriteRef => {
                let refval = self.pop()?;
                let val = self.pop()?;
                emit(
                    out,
                    address,
                    self.untranslated(insn, vec![], vec![Expr::Var(refval), Expr::Var(val)]),
                );
            }
            Pack => {
                let sd_idx = self.op_index(insn)?;
                let sd = self.unit.struct_defs.get(sd_idx as usize)?;
                let count = sd.field_count as usize;
                let mut operands = Vec::with_capacity(count);
                for _ in 0..count {
                    operands.push(Expr::Var(self.pop()?));
                }
                operands.reverse();
                let token = SignatureToken::reference_to(
                    SignatureToken::Struct(sd.struct_handle_index),
                    true,
                );
                let res = self.push(token)?;
                emit(out, address, self.untranslated(insn, vec![res], operands));
            }
            Unpack => {
                let sd_idx = self.op_index(insn)?;
                let sd = self.unit.struct_defs.get(sd_idx as usize)?;
                let instance = self.pop()?;
                let mut returns = Vec::with_capacity(sd.field_count as usize);
                for k in 0..sd.field_count {
                    let field = self
                        .unit
                        .field_defs
                        .get(sd.fields_index as usize + k as usize)?;
                    let token = self
                        .unit
                        .type_signatures
                        .get(field.signature_index as usize)?
                        .token
                        .clone();
                    returns.push(self.push(token)?);
                }
                emit(
                    out,
                    address,
                    self.untranslated(insn, returns, vec![Expr::Var(instance)]),
                );
            }
            MoveTo => {
                let arg = self.pop()?;
                emit(
                    out,
                    address,
                    self.untranslated(insn, vec![], vec![Expr::Var(arg)]),
                );
            }
            MoveFrom => {
                let arg = self.pop()?;
                // the moved resource is kept opaque, but it must occupy a
                // stack slot to stay in step with the parser's depths
                let res = self.push_force(None, 64);
                emit(
                    out,
                    address,
                    self.untranslated(insn, vec![res], vec![Expr::Var(arg)]),
                );
            }
            Exists => {
                let arg = self.pop()?;
                let res = self.push(SignatureToken::Bool)?;
                emit(
                    out,
                    address,
                    self.untranslated(insn, vec![res], vec![Expr::Var(arg)]),
                );
            }
            LdRefLoc => {
                let idx = self.op_index(insn)? as usize;
                let local = self.local_slot(idx)?;
                let token = SignatureToken::reference_to(self.locals[idx].clone(), false);
                let res = self.push(token)?;
                emit(
                    out,
                    address,
                    self.untranslated(insn, vec![res], vec![Expr::Var(local)]),
                );
            }
            Assert | EmitEvent | GetGasRemaining | GetTxnGasUnitPrice | GetTxnMaxGasUnits
            | GetTxnPublicKey | GetTxnSender | GetTxnSequenceNumber | CreateAccount
            | ReleaseRef => {
                let pop_count = insn.opcode.pop_count().unwrap_or(0) as usize;
                let push_count = insn.opcode.push_count().unwrap_or(0) as usize;

                // arguments are pushed first-to-last, so pop order reverses
                let mut operands = Vec::with_capacity(pop_count);
                for _ in 0..pop_count {
                    operands.push(Expr::Var(self.pop()?));
                }
                operands.reverse();

                let mut returns = Vec::new();
                if push_count == 1 {
                    let token = match insn.opcode {
                        GetTxnSequenceNumber | GetGasRemaining | GetTxnGasUnitPrice
                        | GetTxnMaxGasUnits => SignatureToken::U64,
                        GetTxnSender => SignatureToken::Address,
                        GetTxnPublicKey => SignatureToken::ByteArray,
                        _ => {
                            return Err(LiftError::UnsupportedConversion {
                                mnemonic: insn.opcode.hl_mnemonic(),
                            })
                        }
                    };
                    returns.push(self.push(token)?);
                }
                emit(out, address, self.untranslated(insn, returns, operands));
            }
        }
        Ok(())
    }

    fn untranslated(
        &self,
        insn: &Instruction,
        returns: Vec<VarId>,
        operands: Vec<Expr>,
    ) -> StatementKind {
        StatementKind::Untranslated {
            mnemonic: insn.opcode.hl_mnemonic(),
            opcode: insn.opcode as u8,
            returns,
            operands,
        }
    }

    fn op_index(&self, insn: &Instruction) -> Result<u16, LiftError> {
        insn.operand
            .and_then(|o| o.as_index())
            .map(|i| i as u16)
            .ok_or(LiftError::MissingOperand)
    }

    fn local_slot(&self, index: usize) -> Result<VarId, LiftError> {
        self.local_slots
            .get(index)
            .copied()
            .ok_or(LiftError::InvalidLocal(index))
    }

    fn fresh_var(&mut self, bits: u32) -> VarId {
        let name = format!("var{}", self.counter);
        self.counter += 1;
        self.ctx.create_virtual_var(&name, bits)
    }

    /// Push a value of known token type, reusing the slot's variable when
    /// the token matches what was last written there.
    fn push(&mut self, token: SignatureToken) -> Result<VarId, LiftError> {
        let ty = convert_token(self.types, self.unit, &token)?;
        let bits = token_bits(&token);
        let var = if self.stack_idx < self.stack.len() {
            let slot = &self.stack[self.stack_idx];
            if slot.token.as_ref() == Some(&token) {
                slot.var
            } else {
                let v = self.fresh_var(bits);
                self.ctx.set_var_type(v, ty);
                self.stack[self.stack_idx] = StackSlot {
                    var: v,
                    token: Some(token),
                };
                v
            }
        } else {
            let v = self.fresh_var(bits);
            self.ctx.set_var_type(v, ty);
            self.stack.push(StackSlot {
                var: v,
                token: Some(token),
            });
            v
        };
        self.stack_idx += 1;
        Ok(var)
    }

    /// Push a fresh, token-less variable with an explicit type and width.
    fn push_force(&mut self, ty: Option<TypeRef>, bits: u32) -> VarId {
        let v = self.fresh_var(bits);
        if let Some(t) = ty {
            self.ctx.set_var_type(v, t);
        }
        let slot = StackSlot { var: v, token: None };
        if self.stack_idx < self.stack.len() {
            self.stack[self.stack_idx] = slot;
        } else {
            self.stack.push(slot);
        }
        self.stack_idx += 1;
        v
    }

    fn pop(&mut self) -> Result<VarId, LiftError> {
        if self.stack_idx == 0 {
            return Err(LiftError::StackUnderflow);
        }
        self.stack_idx -= 1;
        Ok(self.stack[self.stack_idx].var)
    }

    fn push_assign(
        &mut self,
        out: &mut Vec<Statement>,
        address: u64,
        token: SignatureToken,
        src: Expr,
    ) -> Result<VarId, LiftError> {
        let dst = self.push(token)?;
        emit(out, address, StatementKind::Assign { dst, src });
        Ok(dst)
    }
}

fn emit(out: &mut Vec<Statement>, address: u64, kind: StatementKind) {
    out.push(Statement { address, kind });
}

fn data_symbol(address: u64) -> Expr {
    Expr::Symbol {
        name: format!("data_{address:x}"),
        address: Some(address),
    }
}

fn branch_target(insn: &Instruction, address: u64) -> u64 {
    (address as i64 + i64::from(insn.target_delta.unwrap_or(0))) as u64
}

fn operation_type(opcode: Opcode) -> OperationType {
    match opcode {
        Opcode::Add => OperationType::Add,
        Opcode::Sub => OperationType::Sub,
        Opcode::Mul => OperationType::MulU,
        Opcode::Mod => OperationType::RemU,
        Opcode::Div => OperationType::DivU,
        Opcode::BitOr => OperationType::Or,
        Opcode::BitAnd => OperationType::And,
        Opcode::Xor => OperationType::Xor,
        Opcode::Or => OperationType::LogOr,
        Opcode::And => OperationType::LogAnd,
        Opcode::Eq => OperationType::LogEq,
        Opcode::Neq => OperationType::LogNeq,
        Opcode::Lt => OperationType::LtU,
        Opcode::Gt => OperationType::GtU,
        Opcode::Le => OperationType::LeU,
        Opcode::Ge => OperationType::GeU,
        Opcode::Not => OperationType::LogNot,
        other => unreachable!("not an operation opcode: {other:?}"),
    }
}

/// Lift a complete routine: build its basic blocks and lift them in
/// address order.
pub fn lift_function(
    unit: &CompiledUnit,
    types: &mut TypeManager,
    prototypes: &mut HashMap<String, Prototype>,
    func: &FunctionDef,
) -> Result<RoutineIr, LiftError> {
    let blocks = build_blocks(func);
    let mut lifter = Lifter::new(unit, types, prototypes, func)?;
    let mut statements = Vec::new();
    for block in &blocks {
        let mut chunk = Vec::new();
        match lifter.lift_block(block, &mut chunk) {
            Ok(()) => statements.append(&mut chunk),
            Err(e @ LiftError::UnsupportedConversion { .. }) => {
                warn!("block at {:#x} not lifted: {e}", block.address);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(lifter.finish(statements))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{script_with_body, script_with_locals};
    use movedis::module::CODE_BASE;

    fn lift_script(bytes: Vec<u8>) -> RoutineIr {
        let unit = movedis::load(bytes).unwrap();
        let mut types = TypeManager::new();
        let mut protos = HashMap::new();
        let main = unit.main.as_ref().unwrap();
        lift_function(&unit, &mut types, &mut protos, main).unwrap()
    }

    #[test]
    fn empty_main_lifts_to_return() {
        let r = lift_script(script_with_body(1, &[0x02]));
        assert_eq!(r.statements.len(), 1);
        assert_eq!(
            r.statements[0].kind,
            StatementKind::Return { values: vec![] }
        );
        assert_eq!(r.statements[0].address, CODE_BASE);
    }

    #[test]
    fn arithmetic_three_address_form() {
        // LD_CONST 42; LD_CONST 8; ADD; RET
        let body = &[
            0x06, 0x2A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
            0x06, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
            0x16, 0x02,
        ];
        let r = lift_script(script_with_body(4, body));
        assert_eq!(r.statements.len(), 4);

        let (v0, v1) = match (&r.statements[0].kind, &r.statements[1].kind) {
            (
                StatementKind::Assign {
                    dst: a,
                    src: Expr::Imm { value: 42, .. },
                },
                StatementKind::Assign {
                    dst: b,
                    src: Expr::Imm { value: 8, .. },
                },
            ) => (*a, *b),
            other => panic!("unexpected: {other:?}"),
        };
        // the second push must not reuse the first slot's variable
        assert_ne!(v0, v1);

        match &r.statements[2].kind {
            StatementKind::Assign { dst, src } => {
                assert_ne!(*dst, v1);
                assert_eq!(
                    *src,
                    Expr::zext(
                        Expr::Op {
                            op: OperationType::Add,
                            args: vec![Expr::Var(v0), Expr::Var(v1)],
                        },
                        64
                    )
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            r.statements[3].kind,
            StatementKind::Return { .. }
        ));
    }

    #[test]
    fn conditional_branch_lowering() {
        // LD_TRUE; BR_FALSE -> 2; BRANCH -> 3; RET; RET
        let body = &[0x09, 0x04, 0x02, 0x00, 0x05, 0x03, 0x00, 0x02, 0x02];
        let r = lift_script(script_with_body(5, body));
        assert_eq!(r.statements.len(), 5);

        let v0 = match &r.statements[0].kind {
            StatementKind::Assign {
                dst,
                src: Expr::Imm { value: 1, .. },
            } => *dst,
            other => panic!("unexpected: {other:?}"),
        };
        match &r.statements[1].kind {
            StatementKind::BranchAssign { dst, target } => {
                assert_eq!(*dst, r.ctx.pc);
                assert_eq!(
                    *target,
                    Expr::Cond {
                        cond: Box::new(Expr::Op {
                            op: OperationType::LogNot,
                            args: vec![Expr::Var(v0)],
                        }),
                        if_true: Box::new(Expr::imm(CODE_BASE + 4)),
                        if_false: Box::new(Expr::imm(CODE_BASE + 4)),
                    }
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
        match &r.statements[2].kind {
            StatementKind::BranchAssign { target, .. } => {
                assert_eq!(*target, Expr::imm(CODE_BASE + 7));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(r.statements[3].kind, StatementKind::Return { .. }));
        assert!(matches!(r.statements[4].kind, StatementKind::Return { .. }));
    }

    #[test]
    fn locals_copy_store_and_move() {
        // locals: [u64]
        // LD_CONST 5; ST_LOC 0; MOVE_LOC 0; POP; RET
        let body = &[
            0x06, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
            0x0D, 0x00, //
            0x0C, 0x00, //
            0x01, 0x02,
        ];
        let r = lift_script(script_with_locals(5, body, &[0x02]));
        let local0 = r.ctx.var_by_name("local0").unwrap();

        // var0 = 5; local0 = var0; var1 = local0; local0 = 0; return
        assert_eq!(r.statements.len(), 5);
        match &r.statements[1].kind {
            StatementKind::Assign { dst, src } => {
                assert_eq!(*dst, local0);
                assert!(matches!(src, Expr::Var(_)));
            }
            other => panic!("unexpected: {other:?}"),
        }
        match &r.statements[3].kind {
            StatementKind::Assign {
                dst,
                src: Expr::Imm { value: 0, bits: 64 },
            } => assert_eq!(*dst, local0),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn slot_reuse_for_matching_tokens() {
        // LD_TRUE; POP; LD_TRUE; POP; RET
        let r = lift_script(script_with_body(5, &[0x09, 0x01, 0x09, 0x01, 0x02]));
        let (a, b) = match (&r.statements[0].kind, &r.statements[1].kind) {
            (
                StatementKind::Assign { dst: a, .. },
                StatementKind::Assign { dst: b, .. },
            ) => (*a, *b),
            other => panic!("unexpected: {other:?}"),
        };
        // same slot, same token: the variable is reused
        assert_eq!(a, b);
    }

    #[test]
    fn untranslated_carries_opcode_tag() {
        // GET_TXN_SENDER; POP; RET  (pop discards the pushed address)
        let r = lift_script(script_with_body(3, &[0x2B, 0x01, 0x02]));
        match &r.statements[0].kind {
            StatementKind::Untranslated {
                mnemonic,
                opcode,
                returns,
                operands,
            } => {
                assert_eq!(mnemonic, "GetTxnSender");
                assert_eq!(*opcode, 0x2B);
                assert_eq!(returns.len(), 1);
                assert!(operands.is_empty());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn assert_operands_keep_push_order() {
        // LD_TRUE; LD_CONST 7; ASSERT; RET
        let body = &[
            0x09, //
            0x06, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
            0x27, 0x02,
        ];
        let r = lift_script(script_with_body(4, body));
        let (cond_var, code_var) = match (&r.statements[0].kind, &r.statements[1].kind) {
            (
                StatementKind::Assign { dst: a, .. },
                StatementKind::Assign { dst: b, .. },
            ) => (*a, *b),
            other => panic!("unexpected: {other:?}"),
        };
        match &r.statements[2].kind {
            StatementKind::Untranslated { operands, .. } => {
                assert_eq!(
                    operands,
                    &vec![Expr::Var(cond_var), Expr::Var(code_var)]
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn assigned_values_fit_their_destination() {
        let bodies: [&[u8]; 3] = [
            // LD_CONST 42; LD_CONST 8; ADD; RET
            &[
                0x06, 0x2A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
                0x06, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
                0x16, 0x02,
            ],
            // LD_TRUE; BR_FALSE -> 2; BRANCH -> 3; RET; RET
            &[0x09, 0x04, 0x02, 0x00, 0x05, 0x03, 0x00, 0x02, 0x02],
            // GET_TXN_SENDER; POP; RET
            &[0x2B, 0x01, 0x02],
        ];
        let counts = [4u16, 5, 3];
        for (body, count) in bodies.iter().zip(counts) {
            let r = lift_script(script_with_body(count, body));
            for stm in &r.statements {
                if let StatementKind::Assign { dst, src } = &stm.kind {
                    assert!(
                        src.bits(&r.ctx) <= r.ctx.var(*dst).bits,
                        "{:?} wider than its destination",
                        src
                    );
                }
            }
        }
    }

    #[test]
    fn prototype_synthesized_for_routine() {
        let bytes = script_with_body(1, &[0x02]);
        let unit = movedis::load(bytes).unwrap();
        let mut types = TypeManager::new();
        let mut protos = HashMap::new();
        let main = unit.main.as_ref().unwrap();
        let r = lift_function(&unit, &mut types, &mut protos, main).unwrap();
        assert!(r.prototype.params.is_empty());
        assert!(r.prototype.returns.is_empty());
        assert_eq!(protos.len(), 1);
    }
}
