//! Declaration-site variance checking.
//!
//! A linear scan over each class's member signatures: a covariant (`out`)
//! type parameter may only appear in producer positions (return types,
//! read-only property types), a contravariant (`in`) parameter only in
//! consumer positions (method parameters, setter values). Violations are
//! WARNING diagnostics naming the parameter and the offending position.

use crate::ast::statement::{ClassDeclaration, ClassMember, FunctionDeclaration};
use crate::ast::types::{Type, TypeKind, Variance};
use crate::diagnostics::DiagnosticHandler;

pub fn check_class_variance(class: &ClassDeclaration, handler: &dyn DiagnosticHandler) {
    for type_param in &class.type_parameters {
        let variance = type_param.variance;
        if variance == Variance::Invariant {
            continue;
        }
        let param_name = &type_param.name.node;

        for member in &class.members {
            match member {
                ClassMember::Function(function) => {
                    check_function(function, param_name, variance, handler);
                }
                ClassMember::Property(property) => {
                    let Some(annotation) = &property.type_annotation else {
                        continue;
                    };
                    if !type_mentions(annotation, param_name) {
                        continue;
                    }
                    // A mutable property is readable and writable, so it is
                    // simultaneously a producer and a consumer position.
                    if property.mutable && variance == Variance::Covariant {
                        handler.warning(
                            property.span,
                            &format!(
                                "variance violation: covariant type parameter '{}' ('out') occurs in 'in' position in mutable property '{}'",
                                param_name, property.name.node
                            ),
                        );
                    } else if variance == Variance::Contravariant {
                        handler.warning(
                            property.span,
                            &format!(
                                "variance violation: contravariant type parameter '{}' ('in') occurs in 'out' position in property '{}'",
                                param_name, property.name.node
                            ),
                        );
                    }
                }
            }
        }
    }
}

fn check_function(
    function: &FunctionDeclaration,
    param_name: &str,
    variance: Variance,
    handler: &dyn DiagnosticHandler,
) {
    // Parameters are consumer positions
    if variance == Variance::Covariant {
        for parameter in &function.parameters {
            let Some(annotation) = &parameter.type_annotation else {
                continue;
            };
            if type_mentions(annotation, param_name) {
                handler.warning(
                    parameter.span,
                    &format!(
                        "variance violation: covariant type parameter '{}' ('out') occurs in 'in' position in parameter '{}' of '{}'",
                        param_name, parameter.name.node, function.name.node
                    ),
                );
            }
        }
    }

    // The return type is a producer position
    if variance == Variance::Contravariant {
        if let Some(return_type) = &function.return_type {
            if type_mentions(return_type, param_name) {
                handler.warning(
                    return_type.span,
                    &format!(
                        "variance violation: contravariant type parameter '{}' ('in') occurs in 'out' position in return type of '{}'",
                        param_name, function.name.node
                    ),
                );
            }
        }
    }
}

/// True when `name` occurs anywhere inside the declared type
fn type_mentions(ty: &Type, name: &str) -> bool {
    match &ty.kind {
        TypeKind::Named(reference) => {
            reference.name.node == name
                || reference
                    .type_arguments
                    .iter()
                    .any(|arg| type_mentions(&arg.ty, name))
        }
        TypeKind::Nullable(inner) => type_mentions(inner, name),
        TypeKind::Function(function) => {
            function.parameters.iter().any(|p| type_mentions(p, name))
                || type_mentions(&function.return_type, name)
        }
    }
}
