// types.rs - bridge between Move signature tokens and host-side types.
//
// The address type stays a wide primitive; bytearrays, strings, structs,
// and references are all pointer-sized. Named structures are created on
// demand the first time a signature mentions them.

use std::collections::HashMap;

use movedis::pool::SignatureToken;
use movedis::CompiledUnit;

use crate::lift::LiftError;

pub type TypeRef = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveCategory {
    Unsigned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Primitive {
        name: String,
        bits: u32,
        category: PrimitiveCategory,
    },
    Alias {
        name: String,
        target: TypeRef,
    },
    Reference {
        target: TypeRef,
    },
    VoidReference,
    Structure {
        name: String,
    },
}

/// Registry of host types, keyed by name for the named kinds.
#[derive(Debug)]
pub struct TypeManager {
    types: Vec<TypeKind>,
    by_name: HashMap<String, TypeRef>,
    void_reference: Option<TypeRef>,
}

impl TypeManager {
    /// An initialized manager carries the Move-specific primitives and
    /// aliases not present in common type libraries.
    pub fn new() -> Self {
        let mut tm = TypeManager {
            types: Vec::new(),
            by_name: HashMap::new(),
            void_reference: None,
        };
        let uchar = tm.create_named_primitive("unsigned char", 8, PrimitiveCategory::Unsigned);
        tm.create_named_primitive("bool", 64, PrimitiveCategory::Unsigned);
        tm.create_named_primitive("u64", 64, PrimitiveCategory::Unsigned);
        tm.create_named_primitive("address", 256, PrimitiveCategory::Unsigned);
        let byte = tm.create_alias("byte", uchar);
        let byte_ptr = tm.reference_to(byte);
        tm.create_alias("bytearray", byte_ptr);
        tm.create_alias("string", byte_ptr);
        tm
    }

    pub fn create_named_primitive(
        &mut self,
        name: &str,
        bits: u32,
        category: PrimitiveCategory,
    ) -> TypeRef {
        if let Some(&t) = self.by_name.get(name) {
            return t;
        }
        self.insert_named(
            name,
            TypeKind::Primitive {
                name: name.to_string(),
                bits,
                category,
            },
        )
    }

    pub fn create_alias(&mut self, name: &str, target: TypeRef) -> TypeRef {
        if let Some(&t) = self.by_name.get(name) {
            return t;
        }
        self.insert_named(
            name,
            TypeKind::Alias {
                name: name.to_string(),
                target,
            },
        )
    }

    pub fn get(&self, name: &str) -> Option<TypeRef> {
        self.by_name.get(name).copied()
    }

    pub fn kind(&self, t: TypeRef) -> &TypeKind {
        &self.types[t as usize]
    }

    pub fn get_or_create_structure(&mut self, name: &str) -> TypeRef {
        if let Some(&t) = self.by_name.get(name) {
            return t;
        }
        self.insert_named(
            name,
            TypeKind::Structure {
                name: name.to_string(),
            },
        )
    }

    pub fn reference_to(&mut self, target: TypeRef) -> TypeRef {
        // references are structural; reuse an existing identical one
        for (i, k) in self.types.iter().enumerate() {
            if *k == (TypeKind::Reference { target }) {
                return i as TypeRef;
            }
        }
        self.insert(TypeKind::Reference { target })
    }

    pub fn void_reference(&mut self) -> TypeRef {
        if let Some(t) = self.void_reference {
            return t;
        }
        let t = self.insert(TypeKind::VoidReference);
        self.void_reference = Some(t);
        t
    }

    fn insert(&mut self, kind: TypeKind) -> TypeRef {
        let t = self.types.len() as TypeRef;
        self.types.push(kind);
        t
    }

    fn insert_named(&mut self, name: &str, kind: TypeKind) -> TypeRef {
        let t = self.insert(kind);
        self.by_name.insert(name.to_string(), t);
        t
    }

    /// Value width of a type when held in an IR variable.
    pub fn bits_of(&self, t: TypeRef) -> u32 {
        match self.kind(t) {
            TypeKind::Primitive { bits, .. } => *bits,
            TypeKind::Alias { target, .. } => self.bits_of(*target),
            TypeKind::Reference { .. } | TypeKind::VoidReference | TypeKind::Structure { .. } => 64,
        }
    }

    pub fn display(&self, t: TypeRef) -> String {
        match self.kind(t) {
            TypeKind::Primitive { name, .. }
            | TypeKind::Alias { name, .. }
            | TypeKind::Structure { name } => name.clone(),
            TypeKind::Reference { target } => format!("{}*", self.display(*target)),
            TypeKind::VoidReference => "void*".to_string(),
        }
    }
}

impl Default for TypeManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Bit width of a value of signature-token type when held on the operand
/// stack: everything is register-sized except account addresses.
pub fn token_bits(token: &SignatureToken) -> u32 {
    match token {
        SignatureToken::Address => 256,
        _ => 64,
    }
}

/// Map a signature token to a host type. Structs become references to a
/// named structure derived from the handle's qualified name; references
/// without a known inner type map to a void reference.
pub fn convert_token(
    tm: &mut TypeManager,
    unit: &CompiledUnit,
    token: &SignatureToken,
) -> Result<TypeRef, LiftError> {
    Ok(match token {
        SignatureToken::Bool => tm
            .get("bool")
            .unwrap_or_else(|| tm.create_named_primitive("bool", 64, PrimitiveCategory::Unsigned)),
        SignatureToken::U64 => tm
            .get("u64")
            .unwrap_or_else(|| tm.create_named_primitive("u64", 64, PrimitiveCategory::Unsigned)),
        SignatureToken::Address => tm.get("address").unwrap_or_else(|| {
            tm.create_named_primitive("address", 256, PrimitiveCategory::Unsigned)
        }),
        SignatureToken::ByteArray => {
            let b = tm.get("byte").unwrap_or_else(|| {
                tm.create_named_primitive("unsigned char", 8, PrimitiveCategory::Unsigned)
            });
            let p = tm.reference_to(b);
            tm.create_alias("bytearray", p)
        }
        SignatureToken::String => {
            let b = tm.get("byte").unwrap_or_else(|| {
                tm.create_named_primitive("unsigned char", 8, PrimitiveCategory::Unsigned)
            });
            let p = tm.reference_to(b);
            tm.create_alias("string", p)
        }
        SignatureToken::Struct(sh) => {
            let name = unit
                .struct_handle_full_name(*sh)
                .replace(['@', '.'], "_");
            let s = tm.get_or_create_structure(&name);
            tm.reference_to(s)
        }
        SignatureToken::Reference(inner) | SignatureToken::MutableReference(inner) => match inner {
            None => tm.void_reference(),
            Some(t) => {
                let pointee = convert_token(tm, unit, t)?;
                tm.reference_to(pointee)
            }
        },
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prototype {
    pub params: Vec<TypeRef>,
    pub returns: Vec<TypeRef>,
    pub convention: CallingConvention,
}

/// Synthesize a host prototype from a Move function signature.
pub fn convert_prototype(
    tm: &mut TypeManager,
    unit: &CompiledUnit,
    sig: &movedis::FunctionSignature,
) -> Result<Prototype, LiftError> {
    let mut params = Vec::with_capacity(sig.param_tokens.len());
    for t in &sig.param_tokens {
        params.push(convert_token(tm, unit, t)?);
    }
    let mut returns = Vec::with_capacity(sig.return_tokens.len());
    for t in &sig.return_tokens {
        returns.push(convert_token(tm, unit, t)?);
    }
    Ok(Prototype {
        params,
        returns,
        convention: CallingConvention::Unknown,
    })
}
