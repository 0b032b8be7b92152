// fmt.rs - textual rendering of pools, signatures, and disassembly.
//
// Rendering resolves pool indices through the owning unit, and never fails:
// an index that cannot be resolved renders as a placeholder so a damaged
// binary still produces a readable listing.

use std::fmt::Write;

use crate::format::{format_function_flags, Opcode};
use crate::insn::{Instruction, Operand};
use crate::module::CompiledUnit;
use crate::pool::{
    CodeUnit, FieldDef, FunctionDef, FunctionHandle, FunctionSignature, LocalSignature,
    SignatureToken, StructDef, StructHandle,
};

/// Big-endian byte string rendered as `0xHEX`, leading zeros trimmed.
pub fn format_address(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(2 + bytes.len() * 2);
    s.push_str("0x");
    let mut seen = false;
    for b in bytes {
        if !seen {
            if *b == 0 {
                continue;
            }
            seen = true;
            let _ = write!(s, "{b:X}");
        } else {
            let _ = write!(s, "{b:02X}");
        }
    }
    if !seen {
        s.push('0');
    }
    s
}

pub fn format_bytes_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02X}");
    }
    s
}

/// Source-form rendering of a signature token, struct handles resolved.
pub fn format_token(unit: &CompiledUnit, token: &SignatureToken) -> String {
    match token {
        SignatureToken::Reference(inner) => match inner {
            Some(t) => format!("& {}", format_token(unit, t)),
            None => "&".to_string(),
        },
        SignatureToken::MutableReference(inner) => match inner {
            Some(t) => format!("&mut {}", format_token(unit, t)),
            None => "&mut".to_string(),
        },
        SignatureToken::Struct(sh) => {
            format!("struct {}", unit.struct_handle_full_name(*sh))
        }
        _ => token.serialized_type().display().to_string(),
    }
}

pub fn format_function_signature(unit: &CompiledUnit, sig: &FunctionSignature) -> String {
    let params: Vec<String> = sig
        .param_tokens
        .iter()
        .map(|t| format_token(unit, t))
        .collect();
    let returns: Vec<String> = sig
        .return_tokens
        .iter()
        .map(|t| format_token(unit, t))
        .collect();
    format!("({}): ({})", params.join(", "), returns.join(", "))
}

pub fn format_local_signature(unit: &CompiledUnit, sig: &LocalSignature) -> String {
    sig.tokens
        .iter()
        .map(|t| format_token(unit, t))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_struct_handle(unit: &CompiledUnit, sh: &StructHandle, sh_index: u16) -> String {
    let prefix = if sh.is_resource { "resource " } else { "" };
    format!("{prefix}{}", unit.struct_handle_full_name(sh_index))
}

fn format_function_handle(unit: &CompiledUnit, h: &FunctionHandle) -> String {
    let module = unit.module_handle_full_name(h.module_handle_index);
    let name = unit
        .string_at(h.name_index)
        .unwrap_or("<?>");
    let sig = unit
        .function_signatures
        .get(h.signature_index as usize)
        .map(|s| format_function_signature(unit, s))
        .unwrap_or_else(|_| "(?)".to_string());
    format!("{module}.{name}{sig}")
}

fn format_field_def(unit: &CompiledUnit, f: &FieldDef) -> String {
    let name = unit.string_at(f.name_index).unwrap_or("<?>");
    let ty = unit
        .type_signatures
        .get(f.signature_index as usize)
        .map(|t| format_token(unit, &t.token))
        .unwrap_or_else(|_| "?".to_string());
    format!("{name}: {ty}")
}

fn format_struct_def(unit: &CompiledUnit, sd: &StructDef) -> String {
    let handle = unit
        .struct_handles
        .get(sd.struct_handle_index as usize)
        .map(|sh| format_struct_handle(unit, sh, sd.struct_handle_index))
        .unwrap_or_else(|_| format!("struct_{}", sd.struct_handle_index));
    let fields: Vec<String> = (0..sd.field_count)
        .map(|i| {
            unit.field_defs
                .get(sd.fields_index as usize + i as usize)
                .map(|f| format_field_def(unit, f))
                .unwrap_or_else(|_| "?".to_string())
        })
        .collect();
    format!("{handle} {{ {} }}", fields.join(", "))
}

fn format_function_def(unit: &CompiledUnit, f: &FunctionDef) -> String {
    let mut s = String::new();
    if f.flags != 0 {
        let _ = write!(s, "{} ", format_function_flags(f.flags));
    }
    let handle = unit
        .function_handles
        .get(f.function_handle_index as usize)
        .map(|h| format_function_handle(unit, h))
        .unwrap_or_else(|_| format!("fn_{}", f.function_handle_index));
    let _ = write!(s, "{handle}");
    let _ = write!(s, "\n{}", format_code_unit(unit, &f.code));
    s
}

fn format_code_unit(unit: &CompiledUnit, code: &CodeUnit) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "  max_stack_size: {}", code.max_stack_size);
    let locals = unit
        .local_signatures
        .get(code.locals_index as usize)
        .map(|l| format_local_signature(unit, l))
        .unwrap_or_else(|_| "?".to_string());
    let _ = writeln!(s, "  locals: {locals}");
    for insn in &code.instructions {
        let _ = writeln!(
            s,
            "  {}",
            format_instruction(unit, u64::from(insn.offset_in_function), insn)
        );
    }
    s
}

/// One disassembly line: the pre/post stack-depth annotation, the mnemonic,
/// and the resolved operand.
pub fn format_instruction(unit: &CompiledUnit, address: u64, insn: &Instruction) -> String {
    let mut body = insn.opcode.mnemonic().to_string();
    if let Some(op) = insn.operand {
        body.push(' ');
        body.push_str(&format_operand(unit, address, insn, op));
    }
    format!(
        "[{},{}]  {body}",
        insn.pre_exec_stack_depth, insn.post_exec_stack_depth
    )
}

pub fn format_operand(
    unit: &CompiledUnit,
    address: u64,
    insn: &Instruction,
    operand: Operand,
) -> String {
    match operand {
        Operand::Branch(_) => {
            let target = address as i64 + i64::from(insn.target_delta.unwrap_or(0));
            format!("{target:#x}")
        }
        Operand::ImmU64(v) => format!("{v:#x}"),
        Operand::Local(i) => format!("@{i}"),
        Operand::Address(i) => unit
            .address_pool
            .get(i as usize)
            .map(|a| format_address(&a.bytes))
            .unwrap_or_else(|_| format!("#{i}")),
        Operand::ByteArray(i) => unit
            .bytearray_pool
            .get(i as usize)
            .map(|b| format_bytes_hex(&b.bytes))
            .unwrap_or_else(|_| format!("#{i}")),
        Operand::Str(i) => unit
            .string_at(i)
            .map(|s| format!("{:?}", s))
            .unwrap_or_else(|| format!("#{i}")),
        Operand::FieldDef(i) => unit
            .field_defs
            .get(i as usize)
            .ok()
            .and_then(|f| unit.string_at(f.name_index))
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{i}")),
        Operand::FuncHandle(i) => unit.function_name(i),
        Operand::StructDef(i) => unit.struct_def_name(i),
    }
}

/// Header comment for the function mapped at `address`: its signature and
/// locals, e.g. for display above a disassembled routine.
pub fn method_header_comment(unit: &CompiledUnit, address: u64) -> Option<String> {
    let f = unit.function_by_address(address)?;
    let sig = unit
        .function_signature(f.function_handle_index)
        .map(|s| format_function_signature(unit, s))
        .unwrap_or_else(|_| "(?)".to_string());
    let locals = unit
        .local_signatures
        .get(f.code.locals_index as usize)
        .map(|l| format_local_signature(unit, l))
        .unwrap_or_else(|_| "?".to_string());
    Some(format!("Signature: {sig} / Locals: {locals}"))
}

impl CompiledUnit {
    /// Pretty-print every pool, in the style of the loader's debug dump.
    pub fn describe(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "Module Handles: [");
        for (i, _) in self.module_handles.iter().enumerate() {
            let _ = writeln!(s, "  {},", self.module_handle_full_name(i as u16));
        }
        let _ = writeln!(s, "]");
        let _ = writeln!(s, "Struct Handles: [");
        for (i, sh) in self.struct_handles.iter().enumerate() {
            let _ = writeln!(s, "  {},", format_struct_handle(self, sh, i as u16));
        }
        let _ = writeln!(s, "]");
        let _ = writeln!(s, "Function Handles: [");
        for h in self.function_handles.iter() {
            let _ = writeln!(s, "  {},", format_function_handle(self, h));
        }
        let _ = writeln!(s, "]");
        let _ = writeln!(s, "Struct Definitions: [");
        for sd in self.struct_defs.iter() {
            let _ = writeln!(s, "  {},", format_struct_def(self, sd));
        }
        let _ = writeln!(s, "]");
        let _ = writeln!(s, "Field Definitions: [");
        for f in self.field_defs.iter() {
            let _ = writeln!(s, "  {},", format_field_def(self, f));
        }
        let _ = writeln!(s, "]");
        let _ = writeln!(s, "Type Signatures: [");
        for t in self.type_signatures.iter() {
            let _ = writeln!(s, "  {},", format_token(self, &t.token));
        }
        let _ = writeln!(s, "]");
        let _ = writeln!(s, "Function Signatures: [");
        for sig in self.function_signatures.iter() {
            let _ = writeln!(s, "  {},", format_function_signature(self, sig));
        }
        let _ = writeln!(s, "]");
        let _ = writeln!(s, "Local Signatures: [");
        for sig in self.local_signatures.iter() {
            let _ = writeln!(s, "  {},", format_local_signature(self, sig));
        }
        let _ = writeln!(s, "]");
        let _ = writeln!(s, "Strings: [");
        for e in self.string_pool.iter() {
            let _ = writeln!(s, "  {:?},", e.text);
        }
        let _ = writeln!(s, "]");
        let _ = writeln!(s, "ByteArrays: [");
        for e in self.bytearray_pool.iter() {
            let _ = writeln!(s, "  {},", format_bytes_hex(&e.bytes));
        }
        let _ = writeln!(s, "]");
        let _ = writeln!(s, "Addresses: [");
        for e in self.address_pool.iter() {
            let _ = writeln!(s, "  {},", format_address(&e.bytes));
        }
        let _ = writeln!(s, "]");
        let _ = writeln!(s, "Function Definitions: [");
        for f in self.internal_functions() {
            let _ = writeln!(s, "  {},", format_function_def(self, f));
        }
        let _ = writeln!(s, "]");
        s
    }
}
