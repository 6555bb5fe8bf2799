//! The bidirectional mapping between Nova's nominal type names and the
//! Nova VM's binary names and descriptors.
//!
//! This table is the single source of truth consulted by every code path
//! that emits a type check, a cast or a descriptor. A type with no mapping
//! reaching code generation is a fatal internal-compiler error: it means an
//! earlier stage produced an ill-typed HIR tree.

use crate::errors::CompileError;
use crate::hir::{HirType, HirTypeKind};
use crate::span::Span;
use rustc_hash::FxHashMap;

/// Single-letter descriptor codes for the primitive kinds.
const PRIMITIVE_DESCRIPTORS: &[(&str, char, &str)] = &[
    ("Int", 'I', "nova/lang/Int"),
    ("Long", 'J', "nova/lang/Long"),
    ("Float", 'F', "nova/lang/Float"),
    ("Double", 'D', "nova/lang/Double"),
    ("Boolean", 'Z', "nova/lang/Boolean"),
    ("Char", 'C', "nova/lang/Char"),
    ("Unit", 'V', "nova/lang/Unit"),
];

/// Built-in reference types and containers.
const BUILTIN_CLASSES: &[(&str, &str)] = &[
    ("Any", "nova/lang/Any"),
    ("Nothing", "nova/lang/Nothing"),
    ("String", "nova/lang/String"),
    ("Class", "nova/lang/Class"),
    ("Exception", "nova/lang/Exception"),
    ("List", "nova/collections/List"),
    ("MutableList", "nova/collections/MutableList"),
    ("Set", "nova/collections/Set"),
    ("Map", "nova/collections/Map"),
    ("Pair", "nova/collections/Pair"),
    ("Iterator", "nova/collections/Iterator"),
];

pub struct TypeMapping {
    primitive_descriptors: FxHashMap<&'static str, char>,
    boxed_names: FxHashMap<&'static str, &'static str>,
    builtin_names: FxHashMap<&'static str, &'static str>,
}

impl TypeMapping {
    pub fn new() -> Self {
        let mut primitive_descriptors = FxHashMap::default();
        let mut boxed_names = FxHashMap::default();
        for (name, descriptor, boxed) in PRIMITIVE_DESCRIPTORS {
            primitive_descriptors.insert(*name, *descriptor);
            boxed_names.insert(*name, *boxed);
        }

        let mut builtin_names = FxHashMap::default();
        for (name, binary) in BUILTIN_CLASSES {
            builtin_names.insert(*name, *binary);
        }

        Self {
            primitive_descriptors,
            boxed_names,
            builtin_names,
        }
    }

    /// The binary (slash-separated) name of a nominal class type.
    ///
    /// Built-ins map through the table; already-qualified names convert
    /// dot-to-slash; bare user names are qualified against `module`.
    pub fn binary_class_name(&self, name: &str, module: &str) -> String {
        if let Some(binary) = self.builtin_names.get(name) {
            return (*binary).to_string();
        }
        if name.starts_with("Function") && name[8..].chars().all(|c| c.is_ascii_digit()) {
            return format!("nova/lang/{}", name);
        }
        if name.contains('.') {
            return name.replace('.', "/");
        }
        format!("{}/{}", module.replace('.', "/"), name)
    }

    /// The boxed binary name for a primitive kind name.
    pub fn boxed_name(&self, primitive: &str) -> Option<&'static str> {
        self.boxed_names.get(primitive).copied()
    }

    /// Whether the name denotes a built-in runtime class.
    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtin_names.contains_key(name)
    }

    /// The nominal primitive name for a single-letter descriptor code.
    pub fn primitive_for_descriptor(&self, code: char) -> Option<&'static str> {
        PRIMITIVE_DESCRIPTORS
            .iter()
            .find(|(_, descriptor, _)| *descriptor == code)
            .map(|(name, _, _)| *name)
    }

    /// The field/value descriptor for an HIR type.
    ///
    /// Nullable primitives box; class types erase their arguments. An
    /// unresolved type variable here is fatal: every legitimate one was
    /// erased by specialization or the MIR boundary.
    pub fn descriptor(
        &self,
        ty: &HirType,
        module: &str,
        span: Span,
    ) -> Result<String, CompileError> {
        let primitive = match &ty.kind {
            HirTypeKind::Int => Some("Int"),
            HirTypeKind::Long => Some("Long"),
            HirTypeKind::Float => Some("Float"),
            HirTypeKind::Double => Some("Double"),
            HirTypeKind::Boolean => Some("Boolean"),
            HirTypeKind::Char => Some("Char"),
            HirTypeKind::Unit => Some("Unit"),
            _ => None,
        };

        if let Some(primitive) = primitive {
            if ty.nullable {
                let boxed = self.boxed_names.get(primitive).ok_or_else(|| {
                    CompileError::UnmappedType {
                        name: primitive.to_string(),
                        span,
                    }
                })?;
                return Ok(format!("L{};", boxed));
            }
            let code = self.primitive_descriptors.get(primitive).ok_or_else(|| {
                CompileError::UnmappedType {
                    name: primitive.to_string(),
                    span,
                }
            })?;
            return Ok(code.to_string());
        }

        match &ty.kind {
            HirTypeKind::Nothing => Ok("Lnova/lang/Nothing;".to_string()),
            HirTypeKind::Class { name, .. } => {
                Ok(format!("L{};", self.binary_class_name(name, module)))
            }
            HirTypeKind::Unresolved(name) => Err(CompileError::UnmappedType {
                name: name.clone(),
                span,
            }),
            _ => Err(CompileError::UnmappedType {
                name: ty.to_string(),
                span,
            }),
        }
    }

    /// A method descriptor `(<params>)<return>`.
    pub fn method_descriptor(
        &self,
        parameters: &[HirType],
        return_type: &HirType,
        module: &str,
        span: Span,
    ) -> Result<String, CompileError> {
        let mut descriptor = String::from("(");
        for parameter in parameters {
            descriptor.push_str(&self.descriptor(parameter, module, span)?);
        }
        descriptor.push(')');
        descriptor.push_str(&self.descriptor(return_type, module, span)?);
        Ok(descriptor)
    }
}

impl Default for TypeMapping {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> TypeMapping {
        TypeMapping::new()
    }

    #[test]
    fn test_primitive_descriptors() {
        let m = mapping();
        let span = Span::synthetic();
        assert_eq!(m.descriptor(&HirType::int(), "demo", span).unwrap(), "I");
        assert_eq!(m.descriptor(&HirType::long(), "demo", span).unwrap(), "J");
        assert_eq!(m.descriptor(&HirType::boolean(), "demo", span).unwrap(), "Z");
        assert_eq!(m.descriptor(&HirType::unit(), "demo", span).unwrap(), "V");
    }

    #[test]
    fn test_nullable_primitive_boxes() {
        let m = mapping();
        let span = Span::synthetic();
        assert_eq!(
            m.descriptor(&HirType::int().with_nullability(true), "demo", span)
                .unwrap(),
            "Lnova/lang/Int;"
        );
    }

    #[test]
    fn test_builtin_class_names() {
        let m = mapping();
        assert_eq!(m.binary_class_name("String", "demo"), "nova/lang/String");
        assert_eq!(
            m.binary_class_name("List", "demo"),
            "nova/collections/List"
        );
    }

    #[test]
    fn test_user_class_qualifies_against_module() {
        let m = mapping();
        assert_eq!(m.binary_class_name("Box", "demo"), "demo/Box");
        assert_eq!(m.binary_class_name("other.Box", "demo"), "other/Box");
    }

    #[test]
    fn test_class_descriptor_erases_arguments() {
        let m = mapping();
        let span = Span::synthetic();
        let list_of_int = HirType::class("List", vec![HirType::int()]);
        assert_eq!(
            m.descriptor(&list_of_int, "demo", span).unwrap(),
            "Lnova/collections/List;"
        );
    }

    #[test]
    fn test_unresolved_is_fatal() {
        let m = mapping();
        let span = Span::synthetic();
        let result = m.descriptor(&HirType::unresolved("T"), "demo", span);
        assert!(matches!(
            result,
            Err(CompileError::UnmappedType { .. })
        ));
    }

    #[test]
    fn test_method_descriptor() {
        let m = mapping();
        let span = Span::synthetic();
        assert_eq!(
            m.method_descriptor(
                &[HirType::int(), HirType::string()],
                &HirType::boolean(),
                "demo",
                span
            )
            .unwrap(),
            "(ILnova/lang/String;)Z"
        );
    }

    #[test]
    fn test_roundtrip_primitive_codes() {
        let m = mapping();
        for (name, code, _) in PRIMITIVE_DESCRIPTORS {
            assert_eq!(m.primitive_for_descriptor(*code), Some(*name));
            assert_eq!(
                m.boxed_name(name).unwrap(),
                format!("nova/lang/{}", name)
            );
        }
    }
}
