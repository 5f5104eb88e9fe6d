//! Declared-type registry and the deterministic type-id hash.

use crate::function::TypeSig;
use sha3::{Digest, Keccak256};

/// Deterministic id of a declared type: the low 8 bytes of the Keccak-256
/// digest of the canonical type name, big-endian, as a signed integer. The
/// same hash is exposed to embedding hosts so enum values can be constructed
/// outside the VM.
pub fn type_id(name: &str) -> i64 {
    let digest = Keccak256::digest(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[24..32]);
    i64::from_be_bytes(bytes)
}

/// A type declaration carried in the program for destructors, enum decoding
/// and foreign-call marshalling.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TypeDecl {
    /// An object (table-backed record) type.
    Object {
        /// Declared name.
        name: String,
        /// Field names and types, in declaration order.
        fields: Vec<(String, TypeSig)>,
        /// Canonical name of the destructor function, when declared.
        destructor: Option<String>,
    },
    /// An enum type.
    Enum {
        /// Declared name.
        name: String,
        /// Variant names and integer values, in declaration order.
        variants: Vec<(String, i64)>,
    },
    /// A distinct (newtype) alias.
    Distinct {
        /// Declared name.
        name: String,
        /// Underlying type.
        base: TypeSig,
    },
}

impl TypeDecl {
    /// The declared name.
    pub fn name(&self) -> &str {
        match self {
            TypeDecl::Object { name, .. }
            | TypeDecl::Enum { name, .. }
            | TypeDecl::Distinct { name, .. } => name,
        }
    }
}

/// All type declarations of a program, addressable by name and by type-id.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TypeRegistry {
    decls: Vec<TypeDecl>,
}

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a declaration.
    pub fn push(&mut self, decl: TypeDecl) {
        self.decls.push(decl);
    }

    /// Look up a declaration by name.
    pub fn by_name(&self, name: &str) -> Option<&TypeDecl> {
        self.decls.iter().find(|d| d.name() == name)
    }

    /// Look up a declaration by its deterministic id.
    pub fn by_id(&self, id: i64) -> Option<&TypeDecl> {
        self.decls.iter().find(|d| type_id(d.name()) == id)
    }

    /// The display name of an enum variant, when the id and value resolve.
    pub fn enum_display(&self, id: i64, value: i64) -> Option<&str> {
        match self.by_id(id)? {
            TypeDecl::Enum { variants, .. } => variants
                .iter()
                .find(|(_, v)| *v == value)
                .map(|(name, _)| name.as_str()),
            _ => None,
        }
    }

    /// Iterate declarations in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &TypeDecl> {
        self.decls.iter()
    }

    /// Number of declarations.
    pub fn len(&self) -> usize {
        self.decls.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_id_is_deterministic_and_name_sensitive() {
        assert_eq!(type_id("Color"), type_id("Color"));
        assert_ne!(type_id("Color"), type_id("Colour"));
    }

    #[test]
    fn enum_display_resolves_through_the_hash() {
        let mut reg = TypeRegistry::new();
        reg.push(TypeDecl::Enum {
            name: "Color".into(),
            variants: vec![("red".into(), 0), ("green".into(), 1)],
        });
        assert_eq!(reg.enum_display(type_id("Color"), 1), Some("green"));
        assert_eq!(reg.enum_display(type_id("Color"), 7), None);
        assert_eq!(reg.enum_display(type_id("Size"), 0), None);
    }
}
