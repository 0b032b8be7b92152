// render.rs - textual listings of lifted routines: IR statements and a
// Move-flavored pseudo source. Modules render under a `module <Name>`
// header; function declarations carry their flag keywords.

use std::fmt::Write;

use itertools::Itertools;

use movedis::fmt::format_address;
use movedis::format::format_function_flags;

use crate::ir::{Expr, RoutineContext, Statement, StatementKind};
use crate::lift::RoutineIr;
use crate::rebuild::DecompiledUnit;
use crate::types::TypeManager;

pub fn format_expr(ctx: &RoutineContext, e: &Expr) -> String {
    match e {
        Expr::Imm { value, .. } => format!("{value:#x}"),
        Expr::ImmBytes { bytes, .. } => format_address(bytes),
        Expr::Var(id) => ctx.var(*id).name.clone(),
        Expr::Op { op, args } => format!(
            "{}({})",
            op.name(),
            args.iter().map(|a| format_expr(ctx, a)).join(", ")
        ),
        Expr::ZeroExtend { expr, bits } => {
            format!("zext({}, {bits})", format_expr(ctx, expr))
        }
        Expr::Cond {
            cond,
            if_true,
            if_false,
        } => format!(
            "cond({}, {}, {})",
            format_expr(ctx, cond),
            format_expr(ctx, if_true),
            format_expr(ctx, if_false)
        ),
        Expr::Symbol { name, .. } => name.clone(),
    }
}

pub fn format_statement(ctx: &RoutineContext, stm: &Statement) -> String {
    match &stm.kind {
        StatementKind::Assign { dst, src } => {
            format!("{} := {}", ctx.var(*dst).name, format_expr(ctx, src))
        }
        StatementKind::BranchAssign { dst, target } => {
            format!("{} := {}", ctx.var(*dst).name, format_expr(ctx, target))
        }
        StatementKind::Return { values } => {
            if values.is_empty() {
                "return".to_string()
            } else {
                format!(
                    "return {}",
                    values.iter().map(|v| format_expr(ctx, v)).join(", ")
                )
            }
        }
        StatementKind::Call {
            target,
            returns,
            params,
        } => {
            let call = format!(
                "call {}({})",
                format_expr(ctx, target),
                params.iter().map(|p| format_expr(ctx, p)).join(", ")
            );
            if returns.is_empty() {
                call
            } else {
                format!(
                    "{} := {call}",
                    returns.iter().map(|v| ctx.var(*v).name.clone()).join(", ")
                )
            }
        }
        StatementKind::Untranslated {
            mnemonic,
            opcode,
            returns,
            operands,
        } => {
            let node = format!(
                "{mnemonic}<{opcode:#04x}>({})",
                operands.iter().map(|o| format_expr(ctx, o)).join(", ")
            );
            if returns.is_empty() {
                node
            } else {
                format!(
                    "{} := {node}",
                    returns.iter().map(|v| ctx.var(*v).name.clone()).join(", ")
                )
            }
        }
    }
}

/// Declaration line of a routine: flag keywords, name, and the prototype
/// in `(params): (returns)` form.
pub fn render_prototype(routine: &RoutineIr, types: &TypeManager) -> String {
    let mut s = String::new();
    let flags = format_function_flags(routine.flags);
    if !flags.is_empty() {
        s.push_str(&flags);
        s.push(' ');
    }
    let params = routine
        .prototype
        .params
        .iter()
        .map(|t| types.display(*t))
        .join(", ");
    let returns = routine
        .prototype
        .returns
        .iter()
        .map(|t| types.display(*t))
        .join(", ");
    let _ = write!(s, "{}({params}): ({returns})", routine.name);
    s
}

/// One routine as an IR listing, statements prefixed by the address of
/// the bytecode instruction they came from.
pub fn render_routine(routine: &RoutineIr, types: &TypeManager, indent: &str) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "{indent}{} {{", render_prototype(routine, types));
    for stm in &routine.statements {
        let _ = writeln!(
            s,
            "{indent}    {:08x}  {}",
            stm.address,
            format_statement(&routine.ctx, stm)
        );
    }
    let _ = writeln!(s, "{indent}}}");
    s
}

/// Pseudo-source listing of a decompiled unit. Module binaries render
/// their routines inside a `module <Name>` block; scripts render `main`
/// bare.
pub fn render_source(dec: &DecompiledUnit) -> String {
    let mut s = String::new();
    match dec.module_class {
        Some(c) => {
            let class = dec.classes.get(c);
            let _ = writeln!(s, "module {} {{", class.name);
            for &m in &class.methods {
                let _ = writeln!(s);
                s.push_str(&render_routine(&dec.routines[m], &dec.types, "    "));
            }
            let _ = writeln!(s, "}}");
        }
        None => {
            for r in &dec.routines {
                s.push_str(&render_routine(r, &dec.types, ""));
            }
        }
    }
    s
}
