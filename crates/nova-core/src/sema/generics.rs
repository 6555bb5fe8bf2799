use crate::sema::nova_type::{ClassType, FunctionSignature, NovaType};
use rustc_hash::FxHashMap;

/// Bind generic type parameters by structurally matching each declared
/// parameter shape against the corresponding argument's inferred type.
///
/// Matching recurses through generic nesting, so `List<T>` against
/// `List<Int>` binds `T = Int`. The first binding for a parameter wins;
/// later conflicting occurrences are ignored rather than diagnosed here
/// (the call-site compatibility check reports those). Parameters that stay
/// unbound default to `Any` at the caller.
pub fn bind_type_parameters(
    type_params: &[String],
    param_types: &[NovaType],
    arg_types: &[NovaType],
) -> FxHashMap<String, NovaType> {
    let mut bindings: FxHashMap<String, NovaType> = FxHashMap::default();

    for (param, arg) in param_types.iter().zip(arg_types.iter()) {
        bind_from(param, arg, type_params, &mut bindings);
    }

    bindings
}

fn bind_from(
    param: &NovaType,
    arg: &NovaType,
    type_params: &[String],
    bindings: &mut FxHashMap<String, NovaType>,
) {
    match (param, arg) {
        (NovaType::TypeVar(name), _) => {
            if type_params.iter().any(|p| p == name) && !bindings.contains_key(name) {
                // Never bind a type variable to the bottom type of a bare
                // null argument; the nullable wrapper carries that instead.
                let bound = match arg {
                    NovaType::Nothing => NovaType::Any,
                    other => other.clone(),
                };
                bindings.insert(name.clone(), bound);
            }
        }
        (NovaType::Nullable(p_inner), _) => {
            bind_from(p_inner, arg.non_null(), type_params, bindings);
        }
        (_, NovaType::Nullable(a_inner)) => {
            bind_from(param, a_inner, type_params, bindings);
        }
        (NovaType::Class(p_class), NovaType::Class(a_class))
            if p_class.name == a_class.name
                && p_class.type_args.len() == a_class.type_args.len() =>
        {
            for (p_arg, a_arg) in p_class.type_args.iter().zip(a_class.type_args.iter()) {
                bind_from(p_arg, a_arg, type_params, bindings);
            }
        }
        (NovaType::Function(p_sig), NovaType::Function(a_sig))
            if p_sig.parameters.len() == a_sig.parameters.len() =>
        {
            for (p_param, a_param) in p_sig.parameters.iter().zip(a_sig.parameters.iter()) {
                bind_from(p_param, a_param, type_params, bindings);
            }
            bind_from(&p_sig.return_type, &a_sig.return_type, type_params, bindings);
        }
        _ => {}
    }
}

/// Replace every occurrence of a bound type variable with its binding.
/// Unbound variables are left in place.
pub fn substitute(ty: &NovaType, bindings: &FxHashMap<String, NovaType>) -> NovaType {
    match ty {
        NovaType::TypeVar(name) => bindings.get(name).cloned().unwrap_or_else(|| ty.clone()),
        NovaType::Nullable(inner) => NovaType::nullable(substitute(inner, bindings)),
        NovaType::Class(class) => NovaType::Class(ClassType {
            name: class.name.clone(),
            type_args: class
                .type_args
                .iter()
                .map(|arg| substitute(arg, bindings))
                .collect(),
        }),
        NovaType::Function(sig) => NovaType::Function(FunctionSignature {
            parameters: sig
                .parameters
                .iter()
                .map(|p| substitute(p, bindings))
                .collect(),
            return_type: Box::new(substitute(&sig.return_type, bindings)),
        }),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_bind_direct() {
        let bindings = bind_type_parameters(
            &params(&["T"]),
            &[NovaType::TypeVar("T".to_string())],
            &[NovaType::INT],
        );
        assert_eq!(bindings.get("T"), Some(&NovaType::INT));
    }

    #[test]
    fn test_bind_through_generic_nesting() {
        let bindings = bind_type_parameters(
            &params(&["T"]),
            &[NovaType::list_of(NovaType::TypeVar("T".to_string()))],
            &[NovaType::list_of(NovaType::INT)],
        );
        assert_eq!(bindings.get("T"), Some(&NovaType::INT));
    }

    #[test]
    fn test_bind_two_parameters() {
        let bindings = bind_type_parameters(
            &params(&["K", "V"]),
            &[NovaType::map_of(
                NovaType::TypeVar("K".to_string()),
                NovaType::TypeVar("V".to_string()),
            )],
            &[NovaType::map_of(NovaType::INT, NovaType::String)],
        );
        assert_eq!(bindings.get("K"), Some(&NovaType::INT));
        assert_eq!(bindings.get("V"), Some(&NovaType::String));
    }

    #[test]
    fn test_first_binding_wins() {
        let bindings = bind_type_parameters(
            &params(&["T"]),
            &[
                NovaType::TypeVar("T".to_string()),
                NovaType::TypeVar("T".to_string()),
            ],
            &[NovaType::INT, NovaType::String],
        );
        assert_eq!(bindings.get("T"), Some(&NovaType::INT));
    }

    #[test]
    fn test_unrelated_parameter_not_bound() {
        let bindings = bind_type_parameters(
            &params(&["T"]),
            &[NovaType::TypeVar("U".to_string())],
            &[NovaType::INT],
        );
        assert!(bindings.is_empty());
    }

    #[test]
    fn test_substitute() {
        let mut bindings = FxHashMap::default();
        bindings.insert("T".to_string(), NovaType::String);

        let ty = NovaType::list_of(NovaType::TypeVar("T".to_string()));
        assert_eq!(
            substitute(&ty, &bindings),
            NovaType::list_of(NovaType::String)
        );
    }

    #[test]
    fn test_substitute_leaves_unbound() {
        let bindings = FxHashMap::default();
        let ty = NovaType::TypeVar("T".to_string());
        assert_eq!(substitute(&ty, &bindings), ty);
    }
}
