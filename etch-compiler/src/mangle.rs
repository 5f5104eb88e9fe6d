//! Canonical function-name mangling.
//!
//! Overloads share a plain name; the function table keys on the canonical
//! form `name__<params><ret>` where each type spells itself in the compact
//! prefix-free language of [`TypeSig::mangle`], so the concatenation decodes
//! unambiguously.

use crate::ast::Type;
use etch_bytecode::TypeSig;
use itertools::Itertools;

/// The canonical name of a function signature.
pub fn mangle(name: &str, params: &[TypeSig], ret: &TypeSig) -> String {
    let params = params.iter().map(TypeSig::mangle).join("");
    format!("{name}__{params}{}", ret.mangle())
}

/// Convenience over AST types.
pub fn mangle_types(name: &str, params: &[Type], ret: &Type) -> String {
    let params: Vec<TypeSig> = params.iter().map(Type::sig).collect();
    mangle(name, &params, &ret.sig())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overloads_get_distinct_canonical_names() {
        let int_one = mangle_types("f", &[Type::Int], &Type::Int);
        let float_one = mangle_types("f", &[Type::Float], &Type::Int);
        let two = mangle_types("f", &[Type::Int, Type::Int], &Type::Int);
        assert_eq!(int_one, "f__ii");
        assert_eq!(float_one, "f__fi");
        assert_eq!(two, "f__iii");
        assert_ne!(int_one, float_one);
        assert_ne!(int_one, two);
    }

    #[test]
    fn nested_types_spell_recursively() {
        let name = mangle_types(
            "g",
            &[Type::Option(Box::new(Type::Int))],
            &Type::Result(Box::new(Type::Str)),
        );
        assert_eq!(name, "g__oirs");
    }

    #[test]
    fn named_types_carry_a_length_prefix() {
        let name = mangle_types("h", &[Type::Named("Color".into())], &Type::Unit);
        assert_eq!(name, "h__n5Coloru");
    }

    #[test]
    fn zero_parameter_functions() {
        assert_eq!(mangle_types("main", &[], &Type::Unit), "main__u");
        assert_eq!(mangle_types("main", &[], &Type::Int), "main__i");
    }

    #[quickcheck_macros::quickcheck]
    fn named_type_spellings_never_collide_with_scalars(name: String) -> bool {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return true;
        }
        let named = mangle_types("f", &[Type::Named(name)], &Type::Unit);
        let scalar = mangle_types("f", &[Type::Int], &Type::Unit);
        named != scalar
    }
}
