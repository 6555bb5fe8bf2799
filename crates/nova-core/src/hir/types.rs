use std::fmt;

/// The HIR type language: flatter than the structural `NovaType`.
///
/// Nullability is an independent flag rather than a wrapper, there is no
/// variance, and unresolved names (generic type variables awaiting
/// specialization) are explicit. `with_nullability` is the only sanctioned
/// way to derive a variant of an existing type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HirType {
    pub kind: HirTypeKind,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HirTypeKind {
    Int,
    Long,
    Float,
    Double,
    Boolean,
    Char,
    Unit,
    Nothing,
    /// A nominal class type, including the built-ins (`String`, `Any`,
    /// `List`, ...) and user classes by their declared name
    Class { name: String, type_args: Vec<HirType> },
    /// A generic type variable that survived analysis; erased by the
    /// reified-specialization pass or defaulted to `Any` by codegen rules
    Unresolved(String),
}

impl HirType {
    pub fn new(kind: HirTypeKind) -> Self {
        HirType {
            kind,
            nullable: false,
        }
    }

    /// A structurally equal type differing only in the nullability flag
    pub fn with_nullability(&self, nullable: bool) -> HirType {
        HirType {
            kind: self.kind.clone(),
            nullable,
        }
    }

    pub const fn int() -> HirType {
        HirType {
            kind: HirTypeKind::Int,
            nullable: false,
        }
    }

    pub const fn long() -> HirType {
        HirType {
            kind: HirTypeKind::Long,
            nullable: false,
        }
    }

    pub const fn float() -> HirType {
        HirType {
            kind: HirTypeKind::Float,
            nullable: false,
        }
    }

    pub const fn double() -> HirType {
        HirType {
            kind: HirTypeKind::Double,
            nullable: false,
        }
    }

    pub const fn boolean() -> HirType {
        HirType {
            kind: HirTypeKind::Boolean,
            nullable: false,
        }
    }

    pub const fn char() -> HirType {
        HirType {
            kind: HirTypeKind::Char,
            nullable: false,
        }
    }

    pub const fn unit() -> HirType {
        HirType {
            kind: HirTypeKind::Unit,
            nullable: false,
        }
    }

    pub const fn nothing() -> HirType {
        HirType {
            kind: HirTypeKind::Nothing,
            nullable: false,
        }
    }

    pub fn class(name: impl Into<String>, type_args: Vec<HirType>) -> HirType {
        HirType::new(HirTypeKind::Class {
            name: name.into(),
            type_args,
        })
    }

    pub fn string() -> HirType {
        HirType::class("String", Vec::new())
    }

    pub fn any() -> HirType {
        HirType::class("Any", Vec::new())
    }

    /// The type of the bare `null` literal
    pub fn null() -> HirType {
        HirType {
            kind: HirTypeKind::Nothing,
            nullable: true,
        }
    }

    pub fn unresolved(name: impl Into<String>) -> HirType {
        HirType::new(HirTypeKind::Unresolved(name.into()))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.kind,
            HirTypeKind::Int | HirTypeKind::Long | HirTypeKind::Float | HirTypeKind::Double
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.kind, HirTypeKind::Int | HirTypeKind::Long)
    }

    pub fn is_floating(&self) -> bool {
        matches!(self.kind, HirTypeKind::Float | HirTypeKind::Double)
    }

    pub fn is_unit(&self) -> bool {
        matches!(self.kind, HirTypeKind::Unit) && !self.nullable
    }

    /// True when no unresolved type variable occurs anywhere in the type
    pub fn is_concrete(&self) -> bool {
        match &self.kind {
            HirTypeKind::Unresolved(_) => false,
            HirTypeKind::Class { type_args, .. } => type_args.iter().all(HirType::is_concrete),
            _ => true,
        }
    }

    pub fn class_name(&self) -> Option<&str> {
        match &self.kind {
            HirTypeKind::Class { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for HirType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            HirTypeKind::Int => write!(f, "Int")?,
            HirTypeKind::Long => write!(f, "Long")?,
            HirTypeKind::Float => write!(f, "Float")?,
            HirTypeKind::Double => write!(f, "Double")?,
            HirTypeKind::Boolean => write!(f, "Boolean")?,
            HirTypeKind::Char => write!(f, "Char")?,
            HirTypeKind::Unit => write!(f, "Unit")?,
            HirTypeKind::Nothing => write!(f, "Nothing")?,
            HirTypeKind::Class { name, type_args } => {
                write!(f, "{}", name)?;
                if !type_args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in type_args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    write!(f, ">")?;
                }
            }
            HirTypeKind::Unresolved(name) => write!(f, "{}", name)?,
        }
        if self.nullable {
            write!(f, "?")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_nullability_is_structural() {
        let t = HirType::class("List", vec![HirType::int()]);
        let nullable = t.with_nullability(true);

        assert_eq!(t.kind, nullable.kind);
        assert!(nullable.nullable);
        assert!(!t.nullable);
    }

    #[test]
    fn test_is_concrete() {
        assert!(HirType::int().is_concrete());
        assert!(!HirType::unresolved("T").is_concrete());
        assert!(!HirType::class("List", vec![HirType::unresolved("T")]).is_concrete());
        assert!(HirType::class("List", vec![HirType::string()]).is_concrete());
    }

    #[test]
    fn test_display() {
        assert_eq!(HirType::int().to_string(), "Int");
        assert_eq!(HirType::string().with_nullability(true).to_string(), "String?");
        assert_eq!(
            HirType::class("Map", vec![HirType::int(), HirType::string()]).to_string(),
            "Map<Int, String>"
        );
    }
}
