use crate::sema::nova_type::{FunctionSignature, NovaType};

/// Classified outcome of a declared-type compatibility check.
///
/// Every non-`Ok` outcome maps to one WARNING diagnostic; none of them stop
/// compilation on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    Ok,
    /// `null` (or a nullable value) flowing into a non-nullable slot
    NullToNonNull,
    /// A numeric initializer of higher rank than the declared kind
    NumericNarrowing,
    /// Base types that cannot be reconciled at all
    Incompatible,
}

/// Type compatibility checker
pub struct TypeCompatibility;

impl TypeCompatibility {
    /// Check if `source` is assignable to `target`
    pub fn is_assignable(source: &NovaType, target: &NovaType) -> bool {
        Self::check(source, target) == Compatibility::Ok
    }

    /// Check assignability and classify the failure
    pub fn check(source: &NovaType, target: &NovaType) -> Compatibility {
        if source == target {
            return Compatibility::Ok;
        }

        // Any absorbs everything, in both directions: unannotated code and
        // inference fallbacks must not cascade into mismatch warnings.
        if matches!(source, NovaType::Any) || matches!(target, NovaType::Any) {
            return Compatibility::Ok;
        }

        // Nothing is assignable to every type
        if matches!(source, NovaType::Nothing) {
            return Compatibility::Ok;
        }

        // An unbound type variable stands for an arbitrary type
        if matches!(source, NovaType::TypeVar(_)) || matches!(target, NovaType::TypeVar(_)) {
            return Compatibility::Ok;
        }

        match (source, target) {
            // T is assignable to T?; null's base type Nothing was handled above
            (_, NovaType::Nullable(t_inner)) => Self::check(source.non_null(), t_inner),

            // T? does not flow into a bare T
            (NovaType::Nullable(_), _) => Compatibility::NullToNonNull,

            (NovaType::Numeric(s_kind), NovaType::Numeric(t_kind)) => {
                if s_kind.rank() <= t_kind.rank() {
                    Compatibility::Ok
                } else {
                    Compatibility::NumericNarrowing
                }
            }

            (NovaType::Class(s_class), NovaType::Class(t_class)) => {
                if s_class.name != t_class.name
                    || s_class.type_args.len() != t_class.type_args.len()
                {
                    return Compatibility::Incompatible;
                }
                for (s_arg, t_arg) in s_class.type_args.iter().zip(t_class.type_args.iter()) {
                    if Self::check(s_arg, t_arg) != Compatibility::Ok {
                        return Compatibility::Incompatible;
                    }
                }
                Compatibility::Ok
            }

            (NovaType::Function(s_sig), NovaType::Function(t_sig)) => {
                if Self::is_function_assignable(s_sig, t_sig) {
                    Compatibility::Ok
                } else {
                    Compatibility::Incompatible
                }
            }

            _ => Compatibility::Incompatible,
        }
    }

    /// Function assignability: contravariant parameters, covariant return
    fn is_function_assignable(source: &FunctionSignature, target: &FunctionSignature) -> bool {
        if source.parameters.len() != target.parameters.len() {
            return false;
        }

        for (s_param, t_param) in source.parameters.iter().zip(target.parameters.iter()) {
            if !Self::is_assignable(t_param, s_param) {
                return false;
            }
        }

        Self::is_assignable(&source.return_type, &target.return_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical() {
        assert!(TypeCompatibility::is_assignable(
            &NovaType::String,
            &NovaType::String
        ));
    }

    #[test]
    fn test_numeric_widening_allowed() {
        assert_eq!(
            TypeCompatibility::check(&NovaType::INT, &NovaType::DOUBLE),
            Compatibility::Ok
        );
    }

    #[test]
    fn test_numeric_narrowing_flagged() {
        assert_eq!(
            TypeCompatibility::check(&NovaType::DOUBLE, &NovaType::INT),
            Compatibility::NumericNarrowing
        );
    }

    #[test]
    fn test_null_to_non_nullable() {
        let nullable_string = NovaType::nullable(NovaType::String);
        assert_eq!(
            TypeCompatibility::check(&nullable_string, &NovaType::String),
            Compatibility::NullToNonNull
        );
    }

    #[test]
    fn test_value_into_nullable() {
        let nullable_string = NovaType::nullable(NovaType::String);
        assert!(TypeCompatibility::is_assignable(
            &NovaType::String,
            &nullable_string
        ));
        assert!(TypeCompatibility::is_assignable(
            &NovaType::Nothing,
            &nullable_string
        ));
    }

    #[test]
    fn test_incompatible_base_types() {
        assert_eq!(
            TypeCompatibility::check(&NovaType::Boolean, &NovaType::String),
            Compatibility::Incompatible
        );
    }

    #[test]
    fn test_any_absorbs() {
        assert!(TypeCompatibility::is_assignable(&NovaType::INT, &NovaType::Any));
        assert!(TypeCompatibility::is_assignable(&NovaType::Any, &NovaType::INT));
    }

    #[test]
    fn test_generic_class_arguments() {
        let list_int = NovaType::list_of(NovaType::INT);
        let list_string = NovaType::list_of(NovaType::String);
        assert!(TypeCompatibility::is_assignable(&list_int, &list_int));
        assert_eq!(
            TypeCompatibility::check(&list_int, &list_string),
            Compatibility::Incompatible
        );
    }

    #[test]
    fn test_function_variance() {
        // (Any) -> Int is assignable to (Int) -> Any
        let source = NovaType::function(vec![NovaType::Any], NovaType::INT);
        let target = NovaType::function(vec![NovaType::INT], NovaType::Any);
        assert!(TypeCompatibility::is_assignable(&source, &target));
    }
}
