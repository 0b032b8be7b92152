// opt.rs - intermediate-optimizer hooks applied after lifting: the
// discard filter, a dead-store sweep that consults it, and post-hoc type
// refinement of untranslated nodes.

use std::collections::HashSet;

use log::debug;

use movedis::Opcode;

use crate::ir::{Expr, RoutineContext, StatementKind, VarId, VarKind};
use crate::lift::RoutineIr;
use crate::types::TypeManager;

/// Discard filter installed on the intermediate optimizer: a defined
/// routine-context variable may always be eliminated when its value
/// reaches the end of the routine unread. Machine registers may not.
pub fn can_discard(ctx: &RoutineContext, var: VarId) -> bool {
    ctx.var(var).kind == VarKind::Virtual
}

/// Drop assignments whose destination is never read, as approved by
/// [`can_discard`]. Runs to a fixpoint; returns the number of statements
/// removed.
pub fn sweep_dead_stores(routine: &mut RoutineIr) -> usize {
    let mut removed = 0;
    loop {
        let mut read: HashSet<VarId> = HashSet::new();
        for stm in &routine.statements {
            collect_reads(&stm.kind, &mut read);
        }
        let before = routine.statements.len();
        let ctx = &routine.ctx;
        routine
            .statements
            .retain(|stm| match &stm.kind {
                StatementKind::Assign { dst, .. } => {
                    read.contains(dst) || !can_discard(ctx, *dst)
                }
                _ => true,
            });
        let dropped = before - routine.statements.len();
        removed += dropped;
        if dropped == 0 {
            break;
        }
    }
    if removed > 0 {
        debug!("{}: {removed} dead stores swept", routine.name);
    }
    removed
}

fn collect_reads(kind: &StatementKind, read: &mut HashSet<VarId>) {
    match kind {
        StatementKind::Assign { src, .. } => collect_expr_reads(src, read),
        StatementKind::BranchAssign { target, .. } => collect_expr_reads(target, read),
        StatementKind::Return { values } => {
            for v in values {
                collect_expr_reads(v, read);
            }
        }
        StatementKind::Call { target, params, .. } => {
            collect_expr_reads(target, read);
            for p in params {
                collect_expr_reads(p, read);
            }
        }
        StatementKind::Untranslated { operands, .. } => {
            for o in operands {
                collect_expr_reads(o, read);
            }
        }
    }
}

fn collect_expr_reads(e: &Expr, read: &mut HashSet<VarId>) {
    match e {
        Expr::Var(id) => {
            read.insert(*id);
        }
        Expr::Op { args, .. } => {
            for a in args {
                collect_expr_reads(a, read);
            }
        }
        Expr::ZeroExtend { expr, .. } => collect_expr_reads(expr, read),
        Expr::Cond {
            cond,
            if_true,
            if_false,
        } => {
            collect_expr_reads(cond, read);
            collect_expr_reads(if_true, read);
            collect_expr_reads(if_false, read);
        }
        Expr::Imm { .. } | Expr::ImmBytes { .. } | Expr::Symbol { .. } => {}
    }
}

/// Refine variable types on untranslated nodes once the whole routine is
/// lifted: ASSERT's operand at index 1 is a `bool`, and GET_TXN_SENDER
/// yields an `address`.
pub fn apply_additional_types(routine: &mut RoutineIr, types: &TypeManager) {
    let t_bool = types.get("bool");
    let t_address = types.get("address");

    for stm in &routine.statements {
        let StatementKind::Untranslated {
            opcode,
            returns,
            operands,
            ..
        } = &stm.kind
        else {
            continue;
        };
        match Opcode::from_byte(*opcode) {
            Some(Opcode::Assert) => {
                if let (Some(t), Some(Expr::Var(v))) = (t_bool, operands.get(1)) {
                    routine.ctx.set_var_type(*v, t);
                }
            }
            Some(Opcode::GetTxnSender) => {
                if let (Some(t), Some(v)) = (t_address, returns.first()) {
                    routine.ctx.set_var_type(*v, t);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::lift::lift_function;
    use crate::testutil::script_with_body;

    fn lift(bytes: Vec<u8>) -> (RoutineIr, TypeManager) {
        let unit = movedis::load(bytes).unwrap();
        let mut types = TypeManager::new();
        let mut protos = HashMap::new();
        let main = unit.main.as_ref().unwrap();
        let r = lift_function(&unit, &mut types, &mut protos, main).unwrap();
        (r, types)
    }

    #[test]
    fn discard_filter_rejects_registers() {
        let (r, _) = lift(script_with_body(1, &[0x02]));
        assert!(!can_discard(&r.ctx, r.ctx.pc));
        assert!(!can_discard(&r.ctx, r.ctx.sp));
    }

    #[test]
    fn unread_stack_var_is_swept() {
        // LD_TRUE; POP; RET - the pushed value is discarded unread
        let (mut r, _) = lift(script_with_body(3, &[0x09, 0x01, 0x02]));
        assert_eq!(r.statements.len(), 2);
        assert_eq!(sweep_dead_stores(&mut r), 1);
        assert_eq!(r.statements.len(), 1);
        assert!(matches!(r.statements[0].kind, StatementKind::Return { .. }));
    }

    #[test]
    fn sweep_reaches_fixpoint_through_chains() {
        // LD_TRUE; LD_CONST 2; EQ; POP; RET
        // dropping the unread comparison makes both inputs dead in turn
        let body = &[
            0x09, //
            0x06, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
            0x21, 0x01, 0x02,
        ];
        let (mut r, _) = lift(script_with_body(5, body));
        assert_eq!(sweep_dead_stores(&mut r), 3);
        assert_eq!(r.statements.len(), 1);
    }

    #[test]
    fn live_values_survive_the_sweep() {
        // LD_TRUE; BR_FALSE -> 2; BRANCH -> 3; RET; RET
        let body = &[0x09, 0x04, 0x02, 0x00, 0x05, 0x03, 0x00, 0x02, 0x02];
        let (mut r, _) = lift(script_with_body(5, body));
        // the condition feeds the branch, so nothing is dead
        assert_eq!(sweep_dead_stores(&mut r), 0);
        assert_eq!(r.statements.len(), 5);
    }

    #[test]
    fn assert_second_operand_becomes_bool() {
        // LD_TRUE; LD_CONST 7; ASSERT; RET
        let body = &[
            0x09, //
            0x06, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
            0x27, 0x02,
        ];
        let (mut r, types) = lift(script_with_body(4, body));
        apply_additional_types(&mut r, &types);
        let StatementKind::Untranslated { operands, .. } = &r.statements[2].kind else {
            panic!("expected untranslated assert");
        };
        let Expr::Var(v) = operands[1] else {
            panic!("expected var operand");
        };
        assert_eq!(r.ctx.var(v).ty, types.get("bool"));
    }

    #[test]
    fn txn_sender_result_becomes_address() {
        // GET_TXN_SENDER; POP; RET
        let (mut r, types) = lift(script_with_body(3, &[0x2B, 0x01, 0x02]));
        apply_additional_types(&mut r, &types);
        let StatementKind::Untranslated { returns, .. } = &r.statements[0].kind else {
            panic!("expected untranslated node");
        };
        assert_eq!(r.ctx.var(returns[0]).ty, types.get("address"));
    }
}
