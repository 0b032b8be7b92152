// pool.rs - typed, index-addressable pools and their entry records.
//
// Entries are plain records; cross-references between entries are indices
// into sibling pools, resolved through the owning CompiledUnit. Entries never
// hold pointers to each other.

use crate::error::{Error, Result};
use crate::format::SerializedType;
use crate::insn::Instruction;

/// File and memory placement of a pool entry. Stamped once by the loader,
/// read-only afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryMeta {
    pub file_offset: u32,
    pub file_size: u32,
    pub mapped_address: u64,
    pub mapped_size: u32,
}

/// An append-only ordered pool, looked up by 0-based index.
#[derive(Debug)]
pub struct Pool<T> {
    name: &'static str,
    entries: Vec<T>,
}

impl<T> Pool<T> {
    pub fn new(name: &'static str) -> Self {
        Pool {
            name,
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn push(&mut self, entry: T) {
        self.entries.push(entry);
    }

    pub fn get(&self, index: usize) -> Result<&T> {
        self.entries.get(index).ok_or(Error::IndexOutOfRange {
            pool: self.name,
            index,
            len: self.entries.len(),
        })
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut T> {
        let len = self.entries.len();
        self.entries.get_mut(index).ok_or(Error::IndexOutOfRange {
            pool: self.name,
            index,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.entries.iter_mut()
    }
}

/// A single element of a type-signature tree.
///
/// References decoded from a binary always carry their inner token; the
/// `None` forms stand for "reference to anything" and only appear in types
/// synthesized during lifting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureToken {
    Bool,
    U64,
    String,
    Address,
    ByteArray,
    Reference(Option<Box<SignatureToken>>),
    MutableReference(Option<Box<SignatureToken>>),
    /// Index into the struct handle pool.
    Struct(u16),
}

impl SignatureToken {
    pub fn serialized_type(&self) -> SerializedType {
        match self {
            SignatureToken::Bool => SerializedType::Bool,
            SignatureToken::U64 => SerializedType::Integer,
            SignatureToken::String => SerializedType::String,
            SignatureToken::Address => SerializedType::Address,
            SignatureToken::ByteArray => SerializedType::ByteArray,
            SignatureToken::Reference(_) => SerializedType::Reference,
            SignatureToken::MutableReference(_) => SerializedType::MutableReference,
            SignatureToken::Struct(_) => SerializedType::Struct,
        }
    }

    /// Wrap in a reference token.
    pub fn reference_to(inner: SignatureToken, mutable: bool) -> SignatureToken {
        if mutable {
            SignatureToken::MutableReference(Some(Box::new(inner)))
        } else {
            SignatureToken::Reference(Some(Box::new(inner)))
        }
    }
}

#[derive(Debug)]
pub struct ModuleHandle {
    pub address_index: u16,
    pub name_index: u16,
    pub meta: EntryMeta,
}

#[derive(Debug)]
pub struct StructHandle {
    pub module_handle_index: u16,
    pub name_index: u16,
    pub is_resource: bool,
    pub meta: EntryMeta,
}

#[derive(Debug)]
pub struct FunctionHandle {
    pub module_handle_index: u16,
    pub name_index: u16,
    pub signature_index: u16,
    pub meta: EntryMeta,
}

#[derive(Debug)]
pub struct AddressEntry {
    pub bytes: [u8; crate::format::ADDRESS_LENGTH],
    pub meta: EntryMeta,
}

#[derive(Debug)]
pub struct BytearrayEntry {
    pub bytes: Vec<u8>,
    pub meta: EntryMeta,
}

#[derive(Debug)]
pub struct StringEntry {
    pub text: String,
    pub meta: EntryMeta,
}

impl StringEntry {
    /// UTF-8 encoded, NUL-terminated image used for memory mapping.
    pub fn mapped_bytes(&self) -> Vec<u8> {
        let mut v = self.text.as_bytes().to_vec();
        v.push(0);
        v
    }
}

#[derive(Debug)]
pub struct TypeSignature {
    pub token: SignatureToken,
    pub meta: EntryMeta,
}

#[derive(Debug)]
pub struct FunctionSignature {
    pub return_tokens: Vec<SignatureToken>,
    pub param_tokens: Vec<SignatureToken>,
    pub meta: EntryMeta,
}

#[derive(Debug)]
pub struct LocalSignature {
    pub tokens: Vec<SignatureToken>,
    pub meta: EntryMeta,
}

#[derive(Debug)]
pub struct StructDef {
    pub struct_handle_index: u16,
    pub field_count: u16,
    /// Start of the contiguous field slice in the field definition pool.
    pub fields_index: u16,
    pub meta: EntryMeta,
}

#[derive(Debug)]
pub struct FieldDef {
    /// Back-reference to the struct handle using this field.
    pub struct_handle_index: u16,
    pub name_index: u16,
    pub signature_index: u16,
    pub meta: EntryMeta,
}

#[derive(Debug)]
pub struct FunctionDef {
    pub function_handle_index: u16,
    /// See [`crate::format::flags`].
    pub flags: u8,
    pub code: CodeUnit,
    pub meta: EntryMeta,
}

/// The body of a function definition.
#[derive(Debug)]
pub struct CodeUnit {
    pub max_stack_size: u16,
    pub locals_index: u16,
    pub instructions: Vec<Instruction>,
    /// File offset of the instruction stream.
    pub code_offset: u32,
}

impl CodeUnit {
    /// Total encoded size of the instruction stream in bytes.
    pub fn instructions_byte_size(&self) -> usize {
        self.instructions.iter().map(|i| i.size()).sum()
    }
}
