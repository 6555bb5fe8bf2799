use std::fmt;

/// Numeric primitive kinds, totally ordered for promotion:
/// `Int < Long < Float < Double`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NumericKind {
    Int,
    Long,
    Float,
    Double,
}

impl NumericKind {
    pub fn rank(self) -> u8 {
        match self {
            NumericKind::Int => 0,
            NumericKind::Long => 1,
            NumericKind::Float => 2,
            NumericKind::Double => 3,
        }
    }

    /// The promotion result of a binary numeric operation
    pub fn promote(a: NumericKind, b: NumericKind) -> NumericKind {
        if a.rank() >= b.rank() {
            a
        } else {
            b
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            NumericKind::Int => "Int",
            NumericKind::Long => "Long",
            NumericKind::Float => "Float",
            NumericKind::Double => "Double",
        }
    }
}

/// The structural type used throughout semantic analysis.
///
/// Richer than the HIR type language (it keeps type variables and a
/// dedicated nullable wrapper) but flatter than the declared-type language
/// (no variance annotations, no spans).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NovaType {
    Numeric(NumericKind),
    Boolean,
    Char,
    String,
    Unit,
    /// The bottom type: `throw`/`return` expressions, the `null` literal's base
    Nothing,
    /// The universal top type
    Any,
    Nullable(Box<NovaType>),
    Class(ClassType),
    Function(FunctionSignature),
    /// An unbound generic type variable
    TypeVar(std::string::String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassType {
    pub name: std::string::String,
    pub type_args: Vec<NovaType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionSignature {
    pub parameters: Vec<NovaType>,
    pub return_type: Box<NovaType>,
}

impl NovaType {
    pub const INT: NovaType = NovaType::Numeric(NumericKind::Int);
    pub const LONG: NovaType = NovaType::Numeric(NumericKind::Long);
    pub const FLOAT: NovaType = NovaType::Numeric(NumericKind::Float);
    pub const DOUBLE: NovaType = NovaType::Numeric(NumericKind::Double);

    pub fn class(name: impl Into<std::string::String>, type_args: Vec<NovaType>) -> NovaType {
        NovaType::Class(ClassType {
            name: name.into(),
            type_args,
        })
    }

    pub fn list_of(element: NovaType) -> NovaType {
        NovaType::class("List", vec![element])
    }

    pub fn map_of(key: NovaType, value: NovaType) -> NovaType {
        NovaType::class("Map", vec![key, value])
    }

    pub fn pair_of(first: NovaType, second: NovaType) -> NovaType {
        NovaType::class("Pair", vec![first, second])
    }

    pub fn function(parameters: Vec<NovaType>, return_type: NovaType) -> NovaType {
        NovaType::Function(FunctionSignature {
            parameters,
            return_type: Box::new(return_type),
        })
    }

    pub fn nullable(inner: NovaType) -> NovaType {
        match inner {
            // T?? collapses to T?
            NovaType::Nullable(_) => inner,
            other => NovaType::Nullable(Box::new(other)),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, NovaType::Numeric(_))
    }

    pub fn numeric_kind(&self) -> Option<NumericKind> {
        match self {
            NovaType::Numeric(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, NovaType::Nullable(_))
    }

    /// Strip the nullable wrapper, if any
    pub fn non_null(&self) -> &NovaType {
        match self {
            NovaType::Nullable(inner) => inner,
            other => other,
        }
    }

    pub fn contains_type_var(&self) -> bool {
        match self {
            NovaType::TypeVar(_) => true,
            NovaType::Nullable(inner) => inner.contains_type_var(),
            NovaType::Class(class) => class.type_args.iter().any(NovaType::contains_type_var),
            NovaType::Function(sig) => {
                sig.parameters.iter().any(NovaType::contains_type_var)
                    || sig.return_type.contains_type_var()
            }
            _ => false,
        }
    }
}

/// The least upper bound used when folding collection-factory element types.
///
/// Identical types stay the same, numeric types promote along the rank
/// order, nullability is preserved on the result, and anything else widens
/// to `Any`.
pub fn common_super_type(a: &NovaType, b: &NovaType) -> NovaType {
    if a == b {
        return a.clone();
    }

    // Nullability distributes over the join of the base types
    if a.is_nullable() || b.is_nullable() {
        return NovaType::nullable(common_super_type(a.non_null(), b.non_null()));
    }

    match (a, b) {
        (NovaType::Numeric(ka), NovaType::Numeric(kb)) => {
            NovaType::Numeric(NumericKind::promote(*ka, *kb))
        }
        // Nothing is the identity of the join
        (NovaType::Nothing, other) | (other, NovaType::Nothing) => other.clone(),
        (NovaType::Class(ca), NovaType::Class(cb))
            if ca.name == cb.name && ca.type_args.len() == cb.type_args.len() =>
        {
            let args = ca
                .type_args
                .iter()
                .zip(cb.type_args.iter())
                .map(|(x, y)| common_super_type(x, y))
                .collect();
            NovaType::Class(ClassType {
                name: ca.name.clone(),
                type_args: args,
            })
        }
        _ => NovaType::Any,
    }
}

impl fmt::Display for NovaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NovaType::Numeric(kind) => write!(f, "{}", kind.name()),
            NovaType::Boolean => write!(f, "Boolean"),
            NovaType::Char => write!(f, "Char"),
            NovaType::String => write!(f, "String"),
            NovaType::Unit => write!(f, "Unit"),
            NovaType::Nothing => write!(f, "Nothing"),
            NovaType::Any => write!(f, "Any"),
            NovaType::Nullable(inner) => write!(f, "{}?", inner),
            NovaType::Class(class) => {
                write!(f, "{}", class.name)?;
                if !class.type_args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in class.type_args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            NovaType::Function(sig) => {
                write!(f, "(")?;
                for (i, p) in sig.parameters.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ") -> {}", sig.return_type)
            }
            NovaType::TypeVar(name) => write!(f, "{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promotion_order() {
        assert_eq!(
            NumericKind::promote(NumericKind::Int, NumericKind::Double),
            NumericKind::Double
        );
        assert_eq!(
            NumericKind::promote(NumericKind::Long, NumericKind::Float),
            NumericKind::Float
        );
        assert_eq!(
            NumericKind::promote(NumericKind::Int, NumericKind::Int),
            NumericKind::Int
        );
    }

    #[test]
    fn test_common_super_type_identical() {
        assert_eq!(
            common_super_type(&NovaType::String, &NovaType::String),
            NovaType::String
        );
    }

    #[test]
    fn test_common_super_type_numeric() {
        assert_eq!(
            common_super_type(&NovaType::INT, &NovaType::DOUBLE),
            NovaType::DOUBLE
        );
    }

    #[test]
    fn test_common_super_type_mismatch_widens_to_any() {
        assert_eq!(
            common_super_type(&NovaType::INT, &NovaType::String),
            NovaType::Any
        );
    }

    #[test]
    fn test_common_super_type_nullable() {
        let nullable_int = NovaType::nullable(NovaType::INT);
        let result = common_super_type(&nullable_int, &NovaType::DOUBLE);
        assert_eq!(result, NovaType::nullable(NovaType::DOUBLE));
    }

    #[test]
    fn test_common_super_type_generic_class() {
        let list_int = NovaType::list_of(NovaType::INT);
        let list_double = NovaType::list_of(NovaType::DOUBLE);
        assert_eq!(
            common_super_type(&list_int, &list_double),
            NovaType::list_of(NovaType::DOUBLE)
        );
    }

    #[test]
    fn test_nullable_collapses() {
        let t = NovaType::nullable(NovaType::nullable(NovaType::String));
        assert_eq!(t, NovaType::nullable(NovaType::String));
    }

    #[test]
    fn test_display() {
        assert_eq!(NovaType::list_of(NovaType::INT).to_string(), "List<Int>");
        assert_eq!(
            NovaType::nullable(NovaType::String).to_string(),
            "String?"
        );
        assert_eq!(
            NovaType::function(vec![NovaType::INT], NovaType::Boolean).to_string(),
            "(Int) -> Boolean"
        );
    }
}
