// format.rs - Move v1.0 binary format constants and opcode definitions.
//
// Covers both brandings of the container magic. Table layouts are described
// in module.rs next to their decoders.

/// Length in bytes of an account address.
pub const ADDRESS_LENGTH: usize = 0x20;

/// Original branding.
pub const MAGIC_LIBRA: [u8; 8] = *b"LIBRAVM\n";
/// Rebranded magic, NUL-padded to the same width.
pub const MAGIC_DIEM: [u8; 8] = *b"DIEMVM\n\0";

/// The only supported (major, minor) format version.
pub const SUPPORTED_VERSION: (u8, u8) = (1, 0);

/// Function definition flags.
pub mod flags {
    pub const PUBLIC: u8 = 1;
    pub const NATIVE: u8 = 2;
}

/// Render function flags as source keywords, e.g. `public native`.
pub fn format_function_flags(flags: u8) -> String {
    let mut s = String::new();
    let mut rest = flags;
    if rest & flags::PUBLIC != 0 {
        s.push_str("public ");
        rest &= !flags::PUBLIC;
    }
    if rest & flags::NATIVE != 0 {
        s.push_str("native ");
        rest &= !flags::NATIVE;
    }
    if rest != 0 {
        s.push_str(&format!("(0x{rest:X}) "));
    }
    s.trim_end().to_string()
}

/// Kind of a decoded binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Module,
    Script,
}

/// Table kinds of the directory, in file encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TableKind {
    ModuleHandles = 0x1,
    StructHandles = 0x2,
    FunctionHandles = 0x3,
    AddressPool = 0x4,
    StringPool = 0x5,
    ByteArrayPool = 0x6,
    /// Scripts only.
    Main = 0x7,
    /// Modules only.
    StructDefs = 0x8,
    /// Modules only.
    FieldDefs = 0x9,
    /// Modules only.
    FunctionDefs = 0xA,
    TypeSignatures = 0xB,
    FunctionSignatures = 0xC,
    LocalsSignatures = 0xD,
}

impl TableKind {
    pub fn from_byte(b: u8) -> Option<TableKind> {
        use TableKind::*;
        Some(match b {
            0x1 => ModuleHandles,
            0x2 => StructHandles,
            0x3 => FunctionHandles,
            0x4 => AddressPool,
            0x5 => StringPool,
            0x6 => ByteArrayPool,
            0x7 => Main,
            0x8 => StructDefs,
            0x9 => FieldDefs,
            0xA => FunctionDefs,
            0xB => TypeSignatures,
            0xC => FunctionSignatures,
            0xD => LocalsSignatures,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        use TableKind::*;
        match self {
            ModuleHandles => "MODULE_HANDLES",
            StructHandles => "STRUCT_HANDLES",
            FunctionHandles => "FUNCTION_HANDLES",
            AddressPool => "ADDRESS_POOL",
            StringPool => "STRING_POOL",
            ByteArrayPool => "BYTE_ARRAY_POOL",
            Main => "MAIN",
            StructDefs => "STRUCT_DEFS",
            FieldDefs => "FIELD_DEFS",
            FunctionDefs => "FUNCTION_DEFS",
            TypeSignatures => "TYPE_SIGNATURES",
            FunctionSignatures => "FUNCTION_SIGNATURES",
            LocalsSignatures => "LOCALS_SIGNATURES",
        }
    }
}

/// Per-record kind byte of the three signature tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SignatureKind {
    Type = 0x01,
    Function = 0x02,
    Local = 0x03,
}

impl SignatureKind {
    pub fn from_byte(b: u8) -> Option<SignatureKind> {
        match b {
            0x01 => Some(SignatureKind::Type),
            0x02 => Some(SignatureKind::Function),
            0x03 => Some(SignatureKind::Local),
            _ => None,
        }
    }
}

/// Serialized type tags used by signature tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SerializedType {
    Bool = 0x01,
    Integer = 0x02,
    String = 0x03,
    Address = 0x04,
    Reference = 0x05,
    MutableReference = 0x06,
    Struct = 0x07,
    ByteArray = 0x08,
}

impl SerializedType {
    pub fn from_byte(b: u8) -> Option<SerializedType> {
        use SerializedType::*;
        Some(match b {
            0x01 => Bool,
            0x02 => Integer,
            0x03 => String,
            0x04 => Address,
            0x05 => Reference,
            0x06 => MutableReference,
            0x07 => Struct,
            0x08 => ByteArray,
            _ => return None,
        })
    }

    /// Source-form rendering (`&`, `&mut`, lowercase names otherwise).
    pub fn display(&self) -> &'static str {
        use SerializedType::*;
        match self {
            Bool => "bool",
            Integer => "integer",
            String => "string",
            Address => "address",
            Reference => "&",
            MutableReference => "&mut",
            Struct => "struct",
            ByteArray => "bytearray",
        }
    }
}

/// Kind of the single inline operand an opcode may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No immediate operand.
    None,
    /// Branch target, as an instruction index within the function.
    Branch,
    /// uint64 constant.
    ImmU64,
    /// Index of a local variable (u8 encoded; hard cap of 256 locals).
    IdxLocal,
    IdxAddress,
    IdxByteArray,
    IdxString,
    IdxFuncHandle,
    IdxStructDef,
    IdxFieldDef,
}

/// The 53 opcodes of format version 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Pop = 0x01,
    Ret = 0x02,
    BrTrue = 0x03,
    BrFalse = 0x04,
    Branch = 0x05,
    LdConst = 0x06,
    LdAddr = 0x07,
    LdStr = 0x08,
    LdTrue = 0x09,
    LdFalse = 0x0A,
    CopyLoc = 0x0B,
    MoveLoc = 0x0C,
    StLoc = 0x0D,
    LdRefLoc = 0x0E,
    LdRefField = 0x0F,
    LdByteArray = 0x10,
    Call = 0x11,
    Pack = 0x12,
    Unpack = 0x13,
    ReadRef = 0x14,
    WriteRef = 0x15,
    Add = 0x16,
    Sub = 0x17,
    Mul = 0x18,
    Mod = 0x19,
    Div = 0x1A,
    BitOr = 0x1B,
    BitAnd = 0x1C,
    Xor = 0x1D,
    Or = 0x1E,
    And = 0x1F,
    Not = 0x20,
    Eq = 0x21,
    Neq = 0x22,
    Lt = 0x23,
    Gt = 0x24,
    Le = 0x25,
    Ge = 0x26,
    Assert = 0x27,
    GetTxnGasUnitPrice = 0x28,
    GetTxnMaxGasUnits = 0x29,
    GetGasRemaining = 0x2A,
    GetTxnSender = 0x2B,
    Exists = 0x2C,
    BorrowRef = 0x2D,
    ReleaseRef = 0x2E,
    MoveFrom = 0x2F,
    MoveTo = 0x30,
    CreateAccount = 0x31,
    EmitEvent = 0x32,
    GetTxnSequenceNumber = 0x33,
    GetTxnPublicKey = 0x34,
    FreezeRef = 0x35,
}

/// Every opcode, indexed by encoding minus one.
const ALL_OPCODES: [Opcode; 53] = [
    Opcode::Pop,
    Opcode::Ret,
    Opcode::BrTrue,
    Opcode::BrFalse,
    Opcode::Branch,
    Opcode::LdConst,
    Opcode::LdAddr,
    Opcode::LdStr,
    Opcode::LdTrue,
    Opcode::LdFalse,
    Opcode::CopyLoc,
    Opcode::MoveLoc,
    Opcode::StLoc,
    Opcode::LdRefLoc,
    Opcode::LdRefField,
    Opcode::LdByteArray,
    Opcode::Call,
    Opcode::Pack,
    Opcode::Unpack,
    Opcode::ReadRef,
    Opcode::WriteRef,
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Mod,
    Opcode::Div,
    Opcode::BitOr,
    Opcode::BitAnd,
    Opcode::Xor,
    Opcode::Or,
    Opcode::And,
    Opcode::Not,
    Opcode::Eq,
    Opcode::Neq,
    Opcode::Lt,
    Opcode::Gt,
    Opcode::Le,
    Opcode::Ge,
    Opcode::Assert,
    Opcode::GetTxnGasUnitPrice,
    Opcode::GetTxnMaxGasUnits,
    Opcode::GetGasRemaining,
    Opcode::GetTxnSender,
    Opcode::Exists,
    Opcode::BorrowRef,
    Opcode::ReleaseRef,
    Opcode::MoveFrom,
    Opcode::MoveTo,
    Opcode::CreateAccount,
    Opcode::EmitEvent,
    Opcode::GetTxnSequenceNumber,
    Opcode::GetTxnPublicKey,
    Opcode::FreezeRef,
];

impl Opcode {
    pub fn from_byte(b: u8) -> Option<Opcode> {
        ALL_OPCODES.get((b as usize).wrapping_sub(1)).copied()
    }

    pub fn all() -> &'static [Opcode] {
        &ALL_OPCODES
    }

    /// Low-level mnemonic, as encoded in the format reference.
    pub fn mnemonic(&self) -> &'static str {
        use Opcode::*;
        match self {
            Pop => "POP",
            Ret => "RET",
            BrTrue => "BR_TRUE",
            BrFalse => "BR_FALSE",
            Branch => "BRANCH",
            LdConst => "LD_CONST",
            LdAddr => "LD_ADDR",
            LdStr => "LD_STR",
            LdTrue => "LD_TRUE",
            LdFalse => "LD_FALSE",
            CopyLoc => "COPY_LOC",
            MoveLoc => "MOVE_LOC",
            StLoc => "ST_LOC",
            LdRefLoc => "LD_REF_LOC",
            LdRefField => "LD_REF_FIELD",
            LdByteArray => "LD_BYTEARRAY",
            Call => "CALL",
            Pack => "PACK",
            Unpack => "UNPACK",
            ReadRef => "READ_REF",
            WriteRef => "WRITE_REF",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Mod => "MOD",
            Div => "DIV",
            BitOr => "BIT_OR",
            BitAnd => "BIT_AND",
            Xor => "XOR",
            Or => "OR",
            And => "AND",
            Not => "NOT",
            Eq => "EQ",
            Neq => "NEQ",
            Lt => "LT",
            Gt => "GT",
            Le => "LE",
            Ge => "GE",
            Assert => "ASSERT",
            GetTxnGasUnitPrice => "GET_TXN_GAS_UNIT_PRICE",
            GetTxnMaxGasUnits => "GET_TXN_MAX_GAS_UNITS",
            GetGasRemaining => "GET_GAS_REMAINING",
            GetTxnSender => "GET_TXN_SENDER",
            Exists => "EXISTS",
            BorrowRef => "BORROW_REF",
            ReleaseRef => "RELEASE_REF",
            MoveFrom => "MOVE_FROM",
            MoveTo => "MOVE_TO",
            CreateAccount => "CREATE_ACCOUNT",
            EmitEvent => "EMIT_EVENT",
            GetTxnSequenceNumber => "GET_TXN_SEQUENCE_NUMBER",
            GetTxnPublicKey => "GET_TXN_PUBLIC_KEY",
            FreezeRef => "FREEZE_REF",
        }
    }

    /// High-level mnemonic used by the lifter for untranslated nodes.
    /// A few borrow/move opcodes have dedicated upstream names; the rest
    /// camel-case the low-level mnemonic.
    pub fn hl_mnemonic(&self) -> String {
        match self {
            Opcode::LdRefLoc => "BorrowLoc".to_string(),
            Opcode::LdRefField => "BorrowField".to_string(),
            Opcode::BorrowRef => "BorrowGlobal".to_string(),
            Opcode::MoveTo => "MoveToSender".to_string(),
            _ => self
                .mnemonic()
                .split('_')
                .map(|w| {
                    let mut cs = w.chars();
                    match cs.next() {
                        Some(c) => c.to_string() + &cs.as_str().to_lowercase(),
                        None => String::new(),
                    }
                })
                .collect(),
        }
    }

    /// Static pop count; `None` when it depends on a pool entry (RET, CALL,
    /// PACK).
    pub fn pop_count(&self) -> Option<u8> {
        use Opcode::*;
        Some(match self {
            Ret | Call | Pack => return None,
            Pop | BrTrue | BrFalse | StLoc | LdRefField | Unpack | ReadRef | Not | Exists
            | BorrowRef | ReleaseRef | MoveFrom | MoveTo | CreateAccount | FreezeRef => 1,
            WriteRef | Add | Sub | Mul | Mod | Div | BitOr | BitAnd | Xor | Or | And | Eq | Neq
            | Lt | Gt | Le | Ge | Assert => 2,
            EmitEvent => 3,
            Branch | LdConst | LdAddr | LdStr | LdTrue | LdFalse | CopyLoc | MoveLoc | LdRefLoc
            | LdByteArray | GetTxnGasUnitPrice | GetTxnMaxGasUnits | GetGasRemaining
            | GetTxnSender | GetTxnSequenceNumber | GetTxnPublicKey => 0,
        })
    }

    /// Static push count; `None` when it depends on a pool entry (CALL,
    /// UNPACK).
    pub fn push_count(&self) -> Option<u8> {
        use Opcode::*;
        Some(match self {
            Call | Unpack => return None,
            LdConst | LdAddr | LdStr | LdTrue | LdFalse | CopyLoc | MoveLoc | LdRefLoc
            | LdRefField | LdByteArray | Pack | ReadRef | Not | Add | Sub | Mul | Mod | Div
            | BitOr | BitAnd | Xor | Or | And | Eq | Neq | Lt | Gt | Le | Ge
            | GetTxnGasUnitPrice | GetTxnMaxGasUnits | GetGasRemaining | GetTxnSender | Exists
            | BorrowRef | MoveFrom | GetTxnSequenceNumber | GetTxnPublicKey | FreezeRef => 1,
            Pop | Ret | BrTrue | BrFalse | Branch | StLoc | WriteRef | Assert | ReleaseRef
            | MoveTo | CreateAccount | EmitEvent => 0,
        })
    }

    pub fn operand_kind(&self) -> OperandKind {
        use Opcode::*;
        match self {
            BrTrue | BrFalse | Branch => OperandKind::Branch,
            LdConst => OperandKind::ImmU64,
            CopyLoc | MoveLoc | StLoc | LdRefLoc => OperandKind::IdxLocal,
            LdAddr => OperandKind::IdxAddress,
            LdByteArray => OperandKind::IdxByteArray,
            LdStr => OperandKind::IdxString,
            Call => OperandKind::IdxFuncHandle,
            Pack | Unpack | Exists | BorrowRef | MoveFrom | MoveTo => OperandKind::IdxStructDef,
            LdRefField => OperandKind::IdxFieldDef,
            _ => OperandKind::None,
        }
    }

    /// Does this opcode branch within its function?
    pub fn is_branch(&self) -> bool {
        matches!(self, Opcode::BrTrue | Opcode::BrFalse | Opcode::Branch)
    }

    /// Reference documentation, where the format reference provides any.
    pub fn doc(&self) -> Option<&'static str> {
        match self {
            Opcode::CopyLoc => Some(
                "Push the local identified by `LocalIndex` onto the stack. The value is \
                 copied and the local is still safe to use",
            ),
            Opcode::MoveLoc => Some(
                "Push the local identified by `LocalIndex` onto the stack. The local is \
                 moved and it is invalid to use from that point on, unless a store \
                 operation writes to the local before any read to that local",
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_roundtrip() {
        assert_eq!(Opcode::all().len(), 53);
        for b in 0x01..=0x35u8 {
            let op = Opcode::from_byte(b).unwrap();
            assert_eq!(op as u8, b);
        }
        assert!(Opcode::from_byte(0x00).is_none());
        assert!(Opcode::from_byte(0x36).is_none());
    }

    #[test]
    fn opcode_static_counts() {
        assert_eq!(Opcode::Add.pop_count(), Some(2));
        assert_eq!(Opcode::Add.push_count(), Some(1));
        assert_eq!(Opcode::Ret.pop_count(), None);
        assert_eq!(Opcode::Ret.push_count(), Some(0));
        assert_eq!(Opcode::Call.pop_count(), None);
        assert_eq!(Opcode::Call.push_count(), None);
        assert_eq!(Opcode::Pack.pop_count(), None);
        assert_eq!(Opcode::Pack.push_count(), Some(1));
        assert_eq!(Opcode::Unpack.pop_count(), Some(1));
        assert_eq!(Opcode::Unpack.push_count(), None);
        assert_eq!(Opcode::EmitEvent.pop_count(), Some(3));
    }

    #[test]
    fn operand_kinds() {
        assert_eq!(Opcode::Branch.operand_kind(), OperandKind::Branch);
        assert_eq!(Opcode::LdConst.operand_kind(), OperandKind::ImmU64);
        assert_eq!(Opcode::CopyLoc.operand_kind(), OperandKind::IdxLocal);
        assert_eq!(Opcode::Call.operand_kind(), OperandKind::IdxFuncHandle);
        assert_eq!(Opcode::Add.operand_kind(), OperandKind::None);
    }

    #[test]
    fn hl_mnemonics() {
        assert_eq!(Opcode::LdRefLoc.hl_mnemonic(), "BorrowLoc");
        assert_eq!(Opcode::BorrowRef.hl_mnemonic(), "BorrowGlobal");
        assert_eq!(Opcode::MoveTo.hl_mnemonic(), "MoveToSender");
        assert_eq!(Opcode::GetTxnSender.hl_mnemonic(), "GetTxnSender");
        assert_eq!(Opcode::LdConst.hl_mnemonic(), "LdConst");
    }

    #[test]
    fn documented_opcodes() {
        assert!(Opcode::CopyLoc.doc().unwrap().contains("copied"));
        assert!(Opcode::MoveLoc.doc().unwrap().contains("moved"));
        assert!(Opcode::Add.doc().is_none());
    }

    #[test]
    fn flag_keywords() {
        assert_eq!(format_function_flags(0), "");
        assert_eq!(format_function_flags(flags::PUBLIC), "public");
        assert_eq!(
            format_function_flags(flags::PUBLIC | flags::NATIVE),
            "public native"
        );
        assert_eq!(format_function_flags(0x80), "(0x80)");
    }
}
