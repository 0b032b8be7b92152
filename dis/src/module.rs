// module.rs - Move binary container loader and virtual image layout.
//
// Loading is two-pass: the table directory is scanned first, then table
// bodies are decoded in dependency rank so that handles, pools, and
// signatures are resolvable by the time function bodies are parsed,
// whatever the on-disk table order. After decoding, pool entries are
// laid out in three pseudo segments:
//
//   .data    @ 0x0000_0000   addresses, bytearrays, strings
//   .code    @ 0x1000_0000   internal function bodies
//   .imports @ 0x2000_0000   one pointer slot per external function handle

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::format::{
    SerializedType, SignatureKind, TableKind, UnitKind, ADDRESS_LENGTH, MAGIC_DIEM, MAGIC_LIBRA,
    SUPPORTED_VERSION,
};
use crate::parser;
use crate::pool::{
    AddressEntry, BytearrayEntry, EntryMeta, FieldDef, FunctionDef, FunctionHandle,
    FunctionSignature, LocalSignature, ModuleHandle, Pool, SignatureToken, StringEntry, StructDef,
    StructHandle, TypeSignature,
};
use crate::reader::ByteReader;

pub const DATA_BASE: u64 = 0;
pub const CODE_BASE: u64 = 0x1000_0000;
pub const IMPORTS_BASE: u64 = 0x2000_0000;

/// Pointer width of the synthetic address space, in bytes.
pub const POINTER_SIZE: u32 = 8;

pub const SEG_READ: u32 = 1;
pub const SEG_WRITE: u32 = 2;
pub const SEG_EXEC: u32 = 4;
pub const SEG_RWX: u32 = SEG_READ | SEG_WRITE | SEG_EXEC;

pub const SYM_FUNCTION_CODE_CONTIGUOUS: u32 = 1;
pub const SYM_IMPORTED: u32 = 2;

/// A file-backed region, one per table directory entry.
#[derive(Debug, Clone)]
pub struct SectionInfo {
    pub name: &'static str,
    pub file_offset: u32,
    pub file_size: u32,
}

/// A region of the synthetic address space.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    pub name: &'static str,
    pub file_offset: u32,
    pub file_size: u32,
    pub virtual_base: u64,
    pub virtual_size: u64,
    pub flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Function,
    PtrFunction,
}

/// A named or anonymous location in the synthetic address space.
#[derive(Debug, Clone)]
pub struct SymbolInfo {
    pub kind: SymbolKind,
    pub flags: u32,
    /// Index of the backing entry in its pool.
    pub pool_index: usize,
    pub name: Option<String>,
    pub address: u64,
    pub size: u32,
    /// Rendered element type for data symbols, e.g. `char[5]`.
    pub data_type: Option<String>,
}

/// A fully decoded Move binary: the raw bytes, the typed pools, and the
/// synthetic layout records. Immutable once `load` returns.
#[derive(Debug)]
pub struct CompiledUnit {
    bytes: Vec<u8>,

    pub module_handles: Pool<ModuleHandle>,
    pub struct_handles: Pool<StructHandle>,
    pub function_handles: Pool<FunctionHandle>,
    pub address_pool: Pool<AddressEntry>,
    pub bytearray_pool: Pool<BytearrayEntry>,
    pub string_pool: Pool<StringEntry>,
    pub type_signatures: Pool<TypeSignature>,
    pub function_signatures: Pool<FunctionSignature>,
    pub local_signatures: Pool<LocalSignature>,
    /// Modules only.
    pub struct_defs: Pool<StructDef>,
    /// Modules only.
    pub field_defs: Pool<FieldDef>,
    /// Modules only.
    pub function_defs: Pool<FunctionDef>,
    /// Scripts only.
    pub main: Option<FunctionDef>,

    sections: Vec<SectionInfo>,
    segments: Vec<SegmentInfo>,
    symbols: Vec<SymbolInfo>,
}

/// Cheap probe: does the input look like a supported Move binary?
///
/// Magic or version mismatches yield a negative identification, never an
/// error; an unsupported version is additionally logged.
pub fn identify(bytes: &[u8]) -> bool {
    if bytes.len() < 10 {
        return false;
    }
    if bytes[..8] != MAGIC_LIBRA && bytes[..8] != MAGIC_DIEM {
        return false;
    }
    let (major, minor) = (bytes[8], bytes[9]);
    if (major, minor) != SUPPORTED_VERSION {
        warn!("unsupported Move binary version {major}.{minor}");
        return false;
    }
    true
}

/// Decode a Move binary into a [`CompiledUnit`].
pub fn load(bytes: Vec<u8>) -> Result<CompiledUnit> {
    if bytes.len() < 8 || (bytes[..8] != MAGIC_LIBRA && bytes[..8] != MAGIC_DIEM) {
        return Err(Error::UnrecognizedFormat);
    }
    if bytes.len() < 10 {
        return Err(Error::EndOfInput {
            offset: 8,
            wanted: 2,
            available: bytes.len() - 8,
        });
    }
    let (major, minor) = (bytes[8], bytes[9]);
    if (major, minor) != SUPPORTED_VERSION {
        return Err(Error::UnsupportedVersion { major, minor });
    }

    let mut unit = CompiledUnit::empty(bytes);
    let mut slices = scan_directory(&unit.bytes)?;
    for s in &slices {
        unit.sections.push(SectionInfo {
            name: s.kind.name(),
            file_offset: s.offset,
            file_size: s.size,
        });
    }

    // Decode bodies in dependency rank: function bodies last, everything
    // they reference first. The sort is stable, so same-rank tables keep
    // their on-disk order.
    slices.sort_by_key(|s| table_rank(s.kind));
    for s in &slices {
        let start = s.offset as usize;
        let end = start + s.size as usize;
        decode_table(&mut unit, s.kind, start, end)?;
    }

    if unit.main.is_some() && !unit.function_defs.is_empty() {
        return Err(Error::ConflictingFunctionTables);
    }

    compute_layout(&mut unit);

    debug!(
        "loaded {:?}: {} module handles, {} struct handles, {} function handles, \
         {} addresses, {} bytearrays, {} strings, {} functions",
        unit.kind(),
        unit.module_handles.len(),
        unit.struct_handles.len(),
        unit.function_handles.len(),
        unit.address_pool.len(),
        unit.bytearray_pool.len(),
        unit.string_pool.len(),
        unit.internal_functions().count(),
    );

    Ok(unit)
}

struct TableSlice {
    kind: TableKind,
    offset: u32,
    size: u32,
}

fn table_rank(kind: TableKind) -> u8 {
    match kind {
        TableKind::FunctionDefs | TableKind::Main => 1,
        _ => 0,
    }
}

fn scan_directory(bytes: &[u8]) -> Result<Vec<TableSlice>> {
    let mut r = ByteReader::window(bytes, 10, bytes.len())?;
    let table_count = r.u8()?;
    let mut slices = Vec::with_capacity(table_count as usize);
    for _ in 0..table_count {
        let raw_kind = r.u8()?;
        let kind = TableKind::from_byte(raw_kind).ok_or(Error::UnknownTableKind(raw_kind))?;
        let offset = r.u32_le()?;
        let size = r.u32_le()?;
        if offset & 0x8000_0000 != 0
            || size & 0x8000_0000 != 0
            || offset as usize + size as usize > bytes.len()
        {
            return Err(Error::TableOutOfBounds {
                kind: raw_kind,
                offset,
                size,
            });
        }
        slices.push(TableSlice { kind, offset, size });
    }
    Ok(slices)
}

fn decode_table(unit: &mut CompiledUnit, kind: TableKind, start: usize, end: usize) -> Result<()> {
    match kind {
        TableKind::ModuleHandles => {
            load_module_handles(&unit.bytes, &mut unit.module_handles, start, end)
        }
        TableKind::StructHandles => {
            load_struct_handles(&unit.bytes, &mut unit.struct_handles, start, end)
        }
        TableKind::FunctionHandles => {
            load_function_handles(&unit.bytes, &mut unit.function_handles, start, end)
        }
        TableKind::AddressPool => load_address_pool(&unit.bytes, &mut unit.address_pool, start, end),
        TableKind::ByteArrayPool => {
            load_bytearray_pool(&unit.bytes, &mut unit.bytearray_pool, start, end)
        }
        TableKind::StringPool => load_string_pool(&unit.bytes, &mut unit.string_pool, start, end),
        TableKind::TypeSignatures => {
            load_type_signatures(&unit.bytes, &mut unit.type_signatures, start, end)
        }
        TableKind::FunctionSignatures => {
            load_function_signatures(&unit.bytes, &mut unit.function_signatures, start, end)
        }
        TableKind::LocalsSignatures => {
            load_local_signatures(&unit.bytes, &mut unit.local_signatures, start, end)
        }
        TableKind::StructDefs => load_struct_defs(&unit.bytes, &mut unit.struct_defs, start, end),
        TableKind::FieldDefs => load_field_defs(&unit.bytes, &mut unit.field_defs, start, end),
        TableKind::FunctionDefs => {
            let defs = read_function_defs(unit, start, end, false)?;
            for d in defs {
                unit.function_defs.push(d);
            }
            Ok(())
        }
        TableKind::Main => {
            if unit.main.is_some() {
                return Err(Error::ConflictingFunctionTables);
            }
            let mut defs = read_function_defs(unit, start, end, true)?;
            unit.main = defs.pop();
            Ok(())
        }
    }
}

fn entry_meta(start: usize, end: usize) -> EntryMeta {
    EntryMeta {
        file_offset: start as u32,
        file_size: (end - start) as u32,
        ..EntryMeta::default()
    }
}

fn load_module_handles(
    bytes: &[u8],
    pool: &mut Pool<ModuleHandle>,
    start: usize,
    end: usize,
) -> Result<()> {
    let mut r = ByteReader::window(bytes, start, end)?;
    while r.available() > 0 {
        let entry_start = r.position();
        let address_index = r.varu16()?;
        let name_index = r.varu16()?;
        pool.push(ModuleHandle {
            address_index,
            name_index,
            meta: entry_meta(entry_start, r.position()),
        });
    }
    Ok(())
}

fn load_struct_handles(
    bytes: &[u8],
    pool: &mut Pool<StructHandle>,
    start: usize,
    end: usize,
) -> Result<()> {
    let mut r = ByteReader::window(bytes, start, end)?;
    while r.available() > 0 {
        let entry_start = r.position();
        let module_handle_index = r.varu16()?;
        let name_index = r.varu16()?;
        let is_resource = r.u8()? != 0;
        pool.push(StructHandle {
            module_handle_index,
            name_index,
            is_resource,
            meta: entry_meta(entry_start, r.position()),
        });
    }
    Ok(())
}

fn load_function_handles(
    bytes: &[u8],
    pool: &mut Pool<FunctionHandle>,
    start: usize,
    end: usize,
) -> Result<()> {
    let mut r = ByteReader::window(bytes, start, end)?;
    while r.available() > 0 {
        let entry_start = r.position();
        let module_handle_index = r.varu16()?;
        let name_index = r.varu16()?;
        let signature_index = r.varu16()?;
        pool.push(FunctionHandle {
            module_handle_index,
            name_index,
            signature_index,
            meta: entry_meta(entry_start, r.position()),
        });
    }
    Ok(())
}

fn load_address_pool(
    bytes: &[u8],
    pool: &mut Pool<AddressEntry>,
    start: usize,
    end: usize,
) -> Result<()> {
    let mut r = ByteReader::window(bytes, start, end)?;
    while r.available() > 0 {
        let entry_start = r.position();
        let raw = r.get(ADDRESS_LENGTH)?;
        let mut addr = [0u8; ADDRESS_LENGTH];
        addr.copy_from_slice(raw);
        pool.push(AddressEntry {
            bytes: addr,
            meta: entry_meta(entry_start, r.position()),
        });
    }
    Ok(())
}

fn read_data_length(r: &mut ByteReader<'_>) -> Result<usize> {
    let len = r.vari32()?;
    if !(0..=0xFFFF).contains(&len) {
        return Err(Error::InvalidDataLength(i64::from(len)));
    }
    Ok(len as usize)
}

fn load_bytearray_pool(
    bytes: &[u8],
    pool: &mut Pool<BytearrayEntry>,
    start: usize,
    end: usize,
) -> Result<()> {
    let mut r = ByteReader::window(bytes, start, end)?;
    while r.available() > 0 {
        let entry_start = r.position();
        let len = read_data_length(&mut r)?;
        let data = r.get(len)?.to_vec();
        pool.push(BytearrayEntry {
            bytes: data,
            meta: entry_meta(entry_start, r.position()),
        });
    }
    Ok(())
}

fn load_string_pool(
    bytes: &[u8],
    pool: &mut Pool<StringEntry>,
    start: usize,
    end: usize,
) -> Result<()> {
    let mut r = ByteReader::window(bytes, start, end)?;
    while r.available() > 0 {
        let entry_start = r.position();
        let len = read_data_length(&mut r)?;
        let text = String::from_utf8_lossy(r.get(len)?).into_owned();
        pool.push(StringEntry {
            text,
            meta: entry_meta(entry_start, r.position()),
        });
    }
    Ok(())
}

fn expect_signature_kind(r: &mut ByteReader<'_>, wanted: SignatureKind) -> Result<()> {
    let b = r.u8()?;
    match SignatureKind::from_byte(b) {
        Some(k) if k == wanted => Ok(()),
        _ => Err(Error::MalformedSignature(format!(
            "expected signature kind {wanted:?}, got {b:#04x}"
        ))),
    }
}

/// Recursive signature-token decoder shared by the three signature tables.
fn read_signature_token(r: &mut ByteReader<'_>) -> Result<SignatureToken> {
    let b = r.u8()?;
    let st = SerializedType::from_byte(b).ok_or_else(|| {
        Error::MalformedSignature(format!("unknown serialized type {b:#04x}"))
    })?;
    Ok(match st {
        SerializedType::Bool => SignatureToken::Bool,
        SerializedType::Integer => SignatureToken::U64,
        SerializedType::String => SignatureToken::String,
        SerializedType::Address => SignatureToken::Address,
        SerializedType::ByteArray => SignatureToken::ByteArray,
        SerializedType::Reference => {
            SignatureToken::reference_to(read_signature_token(r)?, false)
        }
        SerializedType::MutableReference => {
            SignatureToken::reference_to(read_signature_token(r)?, true)
        }
        SerializedType::Struct => SignatureToken::Struct(r.varu16()?),
    })
}

fn read_token_list(r: &mut ByteReader<'_>) -> Result<Vec<SignatureToken>> {
    let count = r.u8()?;
    let mut tokens = Vec::with_capacity(count as usize);
    for _ in 0..count {
        tokens.push(read_signature_token(r)?);
    }
    Ok(tokens)
}

fn load_type_signatures(
    bytes: &[u8],
    pool: &mut Pool<TypeSignature>,
    start: usize,
    end: usize,
) -> Result<()> {
    let mut r = ByteReader::window(bytes, start, end)?;
    while r.available() > 0 {
        let entry_start = r.position();
        expect_signature_kind(&mut r, SignatureKind::Type)?;
        let token = read_signature_token(&mut r)?;
        pool.push(TypeSignature {
            token,
            meta: entry_meta(entry_start, r.position()),
        });
    }
    Ok(())
}

fn load_function_signatures(
    bytes: &[u8],
    pool: &mut Pool<FunctionSignature>,
    start: usize,
    end: usize,
) -> Result<()> {
    let mut r = ByteReader::window(bytes, start, end)?;
    while r.available() > 0 {
        let entry_start = r.position();
        expect_signature_kind(&mut r, SignatureKind::Function)?;
        let return_tokens = read_token_list(&mut r)?;
        let param_tokens = read_token_list(&mut r)?;
        pool.push(FunctionSignature {
            return_tokens,
            param_tokens,
            meta: entry_meta(entry_start, r.position()),
        });
    }
    Ok(())
}

fn load_local_signatures(
    bytes: &[u8],
    pool: &mut Pool<LocalSignature>,
    start: usize,
    end: usize,
) -> Result<()> {
    let mut r = ByteReader::window(bytes, start, end)?;
    while r.available() > 0 {
        let entry_start = r.position();
        expect_signature_kind(&mut r, SignatureKind::Local)?;
        let tokens = read_token_list(&mut r)?;
        pool.push(LocalSignature {
            tokens,
            meta: entry_meta(entry_start, r.position()),
        });
    }
    Ok(())
}

fn load_struct_defs(
    bytes: &[u8],
    pool: &mut Pool<StructDef>,
    start: usize,
    end: usize,
) -> Result<()> {
    let mut r = ByteReader::window(bytes, start, end)?;
    while r.available() > 0 {
        let entry_start = r.position();
        let struct_handle_index = r.varu16()?;
        let field_count = r.varu16()?;
        let fields_index = r.varu16()?;
        pool.push(StructDef {
            struct_handle_index,
            field_count,
            fields_index,
            meta: entry_meta(entry_start, r.position()),
        });
    }
    Ok(())
}

fn load_field_defs(bytes: &[u8], pool: &mut Pool<FieldDef>, start: usize, end: usize) -> Result<()> {
    let mut r = ByteReader::window(bytes, start, end)?;
    while r.available() > 0 {
        let entry_start = r.position();
        let struct_handle_index = r.varu16()?;
        let name_index = r.varu16()?;
        let signature_index = r.varu16()?;
        pool.push(FieldDef {
            struct_handle_index,
            name_index,
            signature_index,
            meta: entry_meta(entry_start, r.position()),
        });
    }
    Ok(())
}

/// Decode function definitions, invoking the bytecode parser for each body.
/// When `single` is set, exactly one definition is read (the MAIN table).
fn read_function_defs(
    unit: &CompiledUnit,
    start: usize,
    end: usize,
    single: bool,
) -> Result<Vec<FunctionDef>> {
    let mut r = ByteReader::window(&unit.bytes, start, end)?;
    let mut defs = Vec::new();
    while r.available() > 0 {
        let entry_start = r.position();
        let function_handle_index = r.varu16()?;
        let flags = r.u8()?;
        let max_stack_size = r.varu16()?;
        let locals_index = r.varu16()?;
        let insn_count = r.u16_le()?;
        let code_offset = r.position();

        let instructions =
            parser::parse_function(unit, function_handle_index, insn_count, code_offset, end)?;
        let code_size: usize = instructions.iter().map(|i| i.size()).sum();
        r.skip(code_size)?;

        defs.push(FunctionDef {
            function_handle_index,
            flags,
            code: crate::pool::CodeUnit {
                max_stack_size,
                locals_index,
                instructions,
                code_offset: code_offset as u32,
            },
            meta: entry_meta(entry_start, r.position()),
        });
        if single {
            if r.available() > 0 {
                debug!("{} trailing bytes after main entry", r.available());
            }
            break;
        }
    }
    Ok(defs)
}

/// Stamp mapped addresses/sizes on pool entries and emit the segment and
/// symbol records of the synthetic address space.
fn compute_layout(unit: &mut CompiledUnit) {
    // .data: addresses, bytearrays, strings, in that order
    let mut addr = DATA_BASE;
    for (i, e) in unit.address_pool.iter_mut().enumerate() {
        e.meta.mapped_address = addr;
        e.meta.mapped_size = e.bytes.len() as u32;
        unit.symbols.push(SymbolInfo {
            kind: SymbolKind::Variable,
            flags: 0,
            pool_index: i,
            name: None,
            address: addr,
            size: e.meta.mapped_size,
            data_type: Some(format!("byte[{}]", e.meta.mapped_size)),
        });
        addr += u64::from(e.meta.mapped_size);
    }
    for (i, e) in unit.bytearray_pool.iter_mut().enumerate() {
        e.meta.mapped_address = addr;
        e.meta.mapped_size = e.bytes.len() as u32;
        unit.symbols.push(SymbolInfo {
            kind: SymbolKind::Variable,
            flags: 0,
            pool_index: i,
            name: None,
            address: addr,
            size: e.meta.mapped_size,
            data_type: Some(format!("byte[{}]", e.meta.mapped_size)),
        });
        addr += u64::from(e.meta.mapped_size);
    }
    for (i, e) in unit.string_pool.iter_mut().enumerate() {
        e.meta.mapped_address = addr;
        e.meta.mapped_size = e.mapped_bytes().len() as u32;
        unit.symbols.push(SymbolInfo {
            kind: SymbolKind::Variable,
            flags: 0,
            pool_index: i,
            name: None,
            address: addr,
            size: e.meta.mapped_size,
            data_type: Some(format!("char[{}]", e.meta.mapped_size)),
        });
        addr += u64::from(e.meta.mapped_size);
    }
    if addr > DATA_BASE {
        unit.segments.push(SegmentInfo {
            name: ".data",
            file_offset: 0,
            file_size: 0,
            virtual_base: DATA_BASE,
            virtual_size: addr - DATA_BASE,
            flags: SEG_RWX,
        });
    }

    // .code: internal function bodies, in pool order
    let names: Vec<String> = unit
        .internal_functions()
        .map(|f| unit.function_name(f.function_handle_index))
        .collect();
    let mut addr = CODE_BASE;
    for (i, e) in unit
        .main
        .iter_mut()
        .chain(unit.function_defs.iter_mut())
        .enumerate()
    {
        e.meta.mapped_address = addr;
        e.meta.mapped_size = e.code.instructions_byte_size() as u32;
        unit.symbols.push(SymbolInfo {
            kind: SymbolKind::Function,
            flags: SYM_FUNCTION_CODE_CONTIGUOUS,
            pool_index: i,
            name: Some(names[i].clone()),
            address: addr,
            size: e.meta.mapped_size,
            data_type: None,
        });
        addr += u64::from(e.meta.mapped_size);
    }
    if addr > CODE_BASE {
        unit.segments.push(SegmentInfo {
            name: ".code",
            file_offset: 0,
            file_size: 0,
            virtual_base: CODE_BASE,
            virtual_size: addr - CODE_BASE,
            flags: SEG_RWX,
        });
    }

    // .imports: one pointer slot per external function handle
    let externals = unit.external_function_handle_indices();
    let names: Vec<String> = externals
        .iter()
        .map(|&i| unit.function_name(i as u16))
        .collect();
    let mut addr = IMPORTS_BASE;
    for (k, &i) in externals.iter().enumerate() {
        if let Ok(h) = unit.function_handles.get_mut(i) {
            h.meta.mapped_address = addr;
            h.meta.mapped_size = POINTER_SIZE;
        }
        unit.symbols.push(SymbolInfo {
            kind: SymbolKind::PtrFunction,
            flags: SYM_IMPORTED,
            pool_index: i,
            name: Some(names[k].clone()),
            address: addr,
            size: POINTER_SIZE,
            data_type: None,
        });
        addr += u64::from(POINTER_SIZE);
    }
    if addr > IMPORTS_BASE {
        unit.segments.push(SegmentInfo {
            name: ".imports",
            file_offset: 0,
            file_size: 0,
            virtual_base: IMPORTS_BASE,
            virtual_size: addr - IMPORTS_BASE,
            flags: SEG_RWX,
        });
    }
}

impl CompiledUnit {
    fn empty(bytes: Vec<u8>) -> Self {
        CompiledUnit {
            bytes,
            module_handles: Pool::new("Module Handles"),
            struct_handles: Pool::new("Struct Handles"),
            function_handles: Pool::new("Function Handles"),
            address_pool: Pool::new("Addresses"),
            bytearray_pool: Pool::new("ByteArrays"),
            string_pool: Pool::new("Strings"),
            type_signatures: Pool::new("Type Signatures"),
            function_signatures: Pool::new("Function Signatures"),
            local_signatures: Pool::new("Local Signatures"),
            struct_defs: Pool::new("Struct Definitions"),
            field_defs: Pool::new("Field Definitions"),
            function_defs: Pool::new("Function Definitions"),
            main: None,
            sections: Vec::new(),
            segments: Vec::new(),
            symbols: Vec::new(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// A `main` entry makes the binary a script. A binary with neither
    /// `main` nor module definition tables is reported as a script.
    pub fn kind(&self) -> UnitKind {
        if self.main.is_some() {
            UnitKind::Script
        } else if !self.function_defs.is_empty()
            || !self.struct_defs.is_empty()
            || !self.field_defs.is_empty()
        {
            UnitKind::Module
        } else {
            UnitKind::Script
        }
    }

    pub fn sections(&self) -> &[SectionInfo] {
        &self.sections
    }

    pub fn segments(&self) -> &[SegmentInfo] {
        &self.segments
    }

    pub fn symbols(&self) -> &[SymbolInfo] {
        &self.symbols
    }

    /// `main` for scripts, the function definition pool for modules.
    pub fn internal_functions(&self) -> impl Iterator<Item = &FunctionDef> {
        self.main.iter().chain(self.function_defs.iter())
    }

    /// Function handles that do not back any internal definition; these make
    /// up the imports segment, in pool order.
    pub fn external_function_handle_indices(&self) -> Vec<usize> {
        let internal: Vec<usize> = self
            .internal_functions()
            .map(|f| f.function_handle_index as usize)
            .collect();
        (0..self.function_handles.len())
            .filter(|i| !internal.contains(i))
            .collect()
    }

    pub fn string_at(&self, index: u16) -> Option<&str> {
        self.string_pool
            .get(index as usize)
            .ok()
            .map(|e| e.text.as_str())
    }

    /// Display name of a function handle. The defining module's name is
    /// prepended unless it is the self module; unresolvable names fall back
    /// to an index-derived placeholder.
    pub fn function_name(&self, fh_index: u16) -> String {
        let Ok(h) = self.function_handles.get(fh_index as usize) else {
            return format!("fn_{fh_index}");
        };
        let Some(fname) = self.string_at(h.name_index) else {
            return format!("fn_{fh_index}");
        };
        let modname = self
            .module_handles
            .get(h.module_handle_index as usize)
            .ok()
            .and_then(|m| self.string_at(m.name_index));
        match modname {
            Some(m) if !m.eq_ignore_ascii_case("<self>") => format!("{m}_{fname}"),
            _ => fname.to_string(),
        }
    }

    pub fn function_signature(&self, fh_index: u16) -> Result<&FunctionSignature> {
        let h = self.function_handles.get(fh_index as usize)?;
        self.function_signatures.get(h.signature_index as usize)
    }

    pub fn struct_field_count(&self, sd_index: u16) -> Result<u16> {
        Ok(self.struct_defs.get(sd_index as usize)?.field_count)
    }

    /// Short display name of a struct definition.
    pub fn struct_def_name(&self, sd_index: u16) -> String {
        self.struct_defs
            .get(sd_index as usize)
            .ok()
            .and_then(|sd| self.struct_handles.get(sd.struct_handle_index as usize).ok())
            .and_then(|sh| self.string_at(sh.name_index))
            .map(str::to_string)
            .unwrap_or_else(|| format!("struct_{sd_index}"))
    }

    /// `Name@0xADDR.module` form of a struct handle.
    pub fn struct_handle_full_name(&self, sh_index: u16) -> String {
        let Ok(sh) = self.struct_handles.get(sh_index as usize) else {
            return format!("struct_{sh_index}");
        };
        let name = self
            .string_at(sh.name_index)
            .map(str::to_string)
            .unwrap_or_else(|| format!("struct_{sh_index}"));
        format!(
            "{name}@{}",
            self.module_handle_full_name(sh.module_handle_index)
        )
    }

    /// `0xADDR.name` form of a module handle.
    pub fn module_handle_full_name(&self, mh_index: u16) -> String {
        let Ok(m) = self.module_handles.get(mh_index as usize) else {
            return format!("module_{mh_index}");
        };
        let addr = self
            .address_pool
            .get(m.address_index as usize)
            .map(|a| crate::fmt::format_address(&a.bytes))
            .unwrap_or_else(|_| "0x?".to_string());
        let name = self
            .string_at(m.name_index)
            .map(str::to_string)
            .unwrap_or_else(|| format!("module_{mh_index}"));
        format!("{addr}.{name}")
    }

    pub fn function_by_address(&self, address: u64) -> Option<&FunctionDef> {
        self.internal_functions()
            .find(|f| f.meta.mapped_address == address)
    }

    pub fn function_by_name(&self, name: &str) -> Option<&FunctionDef> {
        self.internal_functions()
            .find(|f| self.function_name(f.function_handle_index) == name)
    }

    pub fn function_handle_by_name(&self, name: &str) -> Option<(usize, &FunctionHandle)> {
        self.function_handles
            .iter()
            .enumerate()
            .find(|(i, _)| self.function_name(*i as u16) == name)
    }

    pub fn locals_of(&self, func: &FunctionDef) -> Result<&LocalSignature> {
        self.local_signatures.get(func.code.locals_index as usize)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Assembles a synthetic binary: header, directory, then table bodies.
    pub(crate) struct BinaryBuilder {
        magic: [u8; 8],
        version: (u8, u8),
        tables: Vec<(u8, Vec<u8>)>,
    }

    impl BinaryBuilder {
        pub fn new() -> Self {
            BinaryBuilder {
                magic: MAGIC_DIEM,
                version: SUPPORTED_VERSION,
                tables: Vec::new(),
            }
        }

        pub fn magic(mut self, magic: [u8; 8]) -> Self {
            self.magic = magic;
            self
        }

        pub fn version(mut self, major: u8, minor: u8) -> Self {
            self.version = (major, minor);
            self
        }

        pub fn table(mut self, kind: u8, body: Vec<u8>) -> Self {
            self.tables.push((kind, body));
            self
        }

        pub fn build(self) -> Vec<u8> {
            let mut out = Vec::new();
            out.extend_from_slice(&self.magic);
            out.push(self.version.0);
            out.push(self.version.1);
            out.push(self.tables.len() as u8);
            let mut offset = (11 + self.tables.len() * 9) as u32;
            for (kind, body) in &self.tables {
                out.push(*kind);
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(&(body.len() as u32).to_le_bytes());
                offset += body.len() as u32;
            }
            for (_, body) in &self.tables {
                out.extend_from_slice(body);
            }
            out
        }
    }

    /// Encodes a MAIN (or FUNCTION_DEFS entry) body for handle 0, no flags,
    /// empty locals signature 0.
    pub(crate) fn function_def_body(insn_count: u16, code: &[u8]) -> Vec<u8> {
        let mut body = vec![
            0x00, // function handle index
            0x00, // flags
            0x00, // max stack size
            0x00, // locals signature index
        ];
        body.extend_from_slice(&insn_count.to_le_bytes());
        body.extend_from_slice(code);
        body
    }

    /// A script with `main` only: empty function signature, empty locals,
    /// one function handle, and the given bytecode.
    pub(crate) fn script_with_body(insn_count: u16, code: &[u8]) -> Vec<u8> {
        BinaryBuilder::new()
            .table(TableKind::FunctionSignatures as u8, vec![0x02, 0x00, 0x00])
            .table(TableKind::LocalsSignatures as u8, vec![0x03, 0x00])
            .table(TableKind::FunctionHandles as u8, vec![0x00, 0x00, 0x00])
            .table(TableKind::Main as u8, function_def_body(insn_count, code))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use crate::format::Opcode;

    #[test]
    fn empty_script_loads() {
        let bytes = BinaryBuilder::new().build();
        assert_eq!(bytes.len(), 11);
        assert!(identify(&bytes));
        let unit = load(bytes).unwrap();
        assert_eq!(unit.kind(), UnitKind::Script);
        assert!(unit.segments().is_empty());
        assert!(unit.symbols().is_empty());
        assert_eq!(unit.internal_functions().count(), 0);
    }

    #[test]
    fn libra_magic_accepted() {
        let bytes = BinaryBuilder::new().magic(MAGIC_LIBRA).build();
        assert!(identify(&bytes));
        assert!(load(bytes).is_ok());
    }

    #[test]
    fn magic_mismatch_is_negative_identification() {
        let mut bytes = BinaryBuilder::new().build();
        bytes[0] = 0x00;
        assert!(!identify(&bytes));
        assert!(matches!(load(bytes), Err(Error::UnrecognizedFormat)));
    }

    #[test]
    fn version_mismatch_is_negative_identification() {
        let bytes = BinaryBuilder::new().version(2, 0).build();
        assert!(!identify(&bytes));
        assert!(matches!(
            load(bytes),
            Err(Error::UnsupportedVersion { major: 2, minor: 0 })
        ));
    }

    #[test]
    fn minimal_script_parses_and_maps() {
        let unit = load(script_with_body(1, &[0x02])).unwrap();
        assert_eq!(unit.kind(), UnitKind::Script);
        assert_eq!(unit.internal_functions().count(), 1);

        let main = unit.main.as_ref().unwrap();
        assert_eq!(main.code.instructions.len(), 1);
        let ret = &main.code.instructions[0];
        assert_eq!(ret.opcode, Opcode::Ret);
        assert_eq!(ret.pre_exec_stack_depth, 0);
        assert_eq!(ret.post_exec_stack_depth, 0);
        assert_eq!(main.meta.mapped_address, CODE_BASE);
        assert_eq!(main.meta.mapped_size, 1);
        assert_eq!(main.code.instructions_byte_size(), 1);

        let code_seg = unit.segments().iter().find(|s| s.name == ".code").unwrap();
        assert_eq!(code_seg.virtual_size, 1);
        assert!(unit
            .symbols()
            .iter()
            .any(|s| s.kind == SymbolKind::Function && s.address == CODE_BASE));
    }

    #[test]
    fn table_order_is_irrelevant() {
        // MAIN listed (and stored) before the tables it depends on
        let bytes = BinaryBuilder::new()
            .table(TableKind::Main as u8, function_def_body(1, &[0x02]))
            .table(TableKind::FunctionHandles as u8, vec![0x00, 0x00, 0x00])
            .table(TableKind::LocalsSignatures as u8, vec![0x03, 0x00])
            .table(TableKind::FunctionSignatures as u8, vec![0x02, 0x00, 0x00])
            .build();
        let unit = load(bytes).unwrap();
        assert_eq!(unit.kind(), UnitKind::Script);
        assert_eq!(unit.internal_functions().count(), 1);
    }

    #[test]
    fn unknown_table_kind_rejected() {
        let bytes = BinaryBuilder::new().table(0x42, vec![]).build();
        assert!(matches!(load(bytes), Err(Error::UnknownTableKind(0x42))));
    }

    #[test]
    fn table_out_of_bounds_rejected() {
        let mut bytes = BinaryBuilder::new()
            .table(TableKind::StringPool as u8, vec![])
            .build();
        // directory entry size field at 11 + 5
        bytes[16] = 0xFF;
        assert!(matches!(
            load(bytes),
            Err(Error::TableOutOfBounds { .. })
        ));
    }

    #[test]
    fn script_with_function_defs_rejected() {
        let bytes = BinaryBuilder::new()
            .table(TableKind::FunctionSignatures as u8, vec![0x02, 0x00, 0x00])
            .table(TableKind::LocalsSignatures as u8, vec![0x03, 0x00])
            .table(
                TableKind::FunctionHandles as u8,
                vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
            )
            .table(TableKind::Main as u8, function_def_body(1, &[0x02]))
            .table(
                TableKind::FunctionDefs as u8,
                function_def_body(1, &[0x02]),
            )
            .build();
        assert!(matches!(
            load(bytes),
            Err(Error::ConflictingFunctionTables)
        ));
    }

    #[test]
    fn nested_signature_tokens_decode() {
        // TYPE_SIGNATURES: kind, &mut & struct #3
        let bytes = BinaryBuilder::new()
            .table(
                TableKind::TypeSignatures as u8,
                vec![0x01, 0x06, 0x05, 0x07, 0x03],
            )
            .build();
        let unit = load(bytes).unwrap();
        let token = &unit.type_signatures.get(0).unwrap().token;
        assert_eq!(
            *token,
            SignatureToken::reference_to(
                SignatureToken::reference_to(SignatureToken::Struct(3), false),
                true
            )
        );
    }

    fn encode_token(t: &SignatureToken, out: &mut Vec<u8>) {
        match t {
            SignatureToken::Bool => out.push(0x01),
            SignatureToken::U64 => out.push(0x02),
            SignatureToken::String => out.push(0x03),
            SignatureToken::Address => out.push(0x04),
            SignatureToken::ByteArray => out.push(0x08),
            SignatureToken::Reference(Some(inner)) => {
                out.push(0x05);
                encode_token(inner, out);
            }
            SignatureToken::MutableReference(Some(inner)) => {
                out.push(0x06);
                encode_token(inner, out);
            }
            SignatureToken::Struct(i) => {
                out.push(0x07);
                assert!(*i < 0x80, "single-byte varint range only");
                out.push(*i as u8);
            }
            other => panic!("unencodable token: {other:?}"),
        }
    }

    #[test]
    fn token_decode_inverts_encode() {
        let tokens = [
            SignatureToken::Bool,
            SignatureToken::U64,
            SignatureToken::Address,
            SignatureToken::reference_to(SignatureToken::ByteArray, false),
            SignatureToken::reference_to(
                SignatureToken::reference_to(SignatureToken::Struct(5), true),
                false,
            ),
        ];
        for t in &tokens {
            let mut body = vec![0x01];
            encode_token(t, &mut body);
            let bytes = BinaryBuilder::new()
                .table(TableKind::TypeSignatures as u8, body)
                .build();
            let unit = load(bytes).unwrap();
            assert_eq!(unit.type_signatures.get(0).unwrap().token, *t);
        }
    }

    #[test]
    fn bad_signature_kind_rejected() {
        let bytes = BinaryBuilder::new()
            .table(TableKind::TypeSignatures as u8, vec![0x02, 0x01])
            .build();
        assert!(matches!(load(bytes), Err(Error::MalformedSignature(_))));
    }

    #[test]
    fn data_layout_is_cumulative() {
        let mut addr = vec![0u8; ADDRESS_LENGTH];
        addr[ADDRESS_LENGTH - 1] = 0x7F;
        let bytes = BinaryBuilder::new()
            .table(TableKind::AddressPool as u8, addr)
            .table(TableKind::ByteArrayPool as u8, vec![0x03, 0xAA, 0xBB, 0xCC])
            .table(TableKind::StringPool as u8, vec![0x02, b'h', b'i'])
            .build();
        let unit = load(bytes).unwrap();

        let a = unit.address_pool.get(0).unwrap();
        assert_eq!(a.meta.mapped_address, DATA_BASE);
        assert_eq!(a.meta.mapped_size, 32);
        let b = unit.bytearray_pool.get(0).unwrap();
        assert_eq!(b.meta.mapped_address, DATA_BASE + 32);
        assert_eq!(b.meta.mapped_size, 3);
        let s = unit.string_pool.get(0).unwrap();
        assert_eq!(s.meta.mapped_address, DATA_BASE + 35);
        // NUL terminator included
        assert_eq!(s.meta.mapped_size, 3);

        let data_seg = unit.segments().iter().find(|s| s.name == ".data").unwrap();
        assert_eq!(data_seg.virtual_size, 38);
        assert_eq!(unit.symbols().len(), 3);
        assert_eq!(
            unit.symbols()[2].data_type.as_deref(),
            Some("char[3]")
        );
    }

    #[test]
    fn sections_track_directory() {
        let bytes = BinaryBuilder::new()
            .table(TableKind::StringPool as u8, vec![0x01, b'x'])
            .build();
        let unit = load(bytes).unwrap();
        assert_eq!(unit.sections().len(), 1);
        let s = &unit.sections()[0];
        assert_eq!(s.name, "STRING_POOL");
        assert_eq!(s.file_offset, 20);
        assert_eq!(s.file_size, 2);
    }

    #[test]
    fn loading_is_deterministic() {
        let bytes = script_with_body(1, &[0x02]);
        let a = load(bytes.clone()).unwrap();
        let b = load(bytes).unwrap();
        assert_eq!(a.describe(), b.describe());
        assert_eq!(a.symbols().len(), b.symbols().len());
    }
}
