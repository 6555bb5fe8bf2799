//! Declaration-site variance checking scenarios.

mod common;

use common::*;
use nova_core::ast::statement::{
    ClassDeclaration, ClassMember, Declaration, PropertyDeclaration, TypeParameter,
};
use nova_core::ast::types::Variance;
use nova_core::diagnostics::DiagnosticHandler;

fn class_with_type_param(
    name: &str,
    variance: Variance,
    members: Vec<ClassMember>,
) -> ClassDeclaration {
    ClassDeclaration {
        name: ident(name),
        type_parameters: vec![TypeParameter {
            name: ident("T"),
            variance,
            is_reified: false,
            span: span(),
        }],
        primary_constructor: Vec::new(),
        superclass: None,
        members,
        is_enum: false,
        enum_entries: Vec::new(),
        span: span(),
    }
}

fn method_taking_t(name: &str) -> ClassMember {
    ClassMember::Function(function(
        name,
        vec![param("item", named_type("T"))],
        None,
        block(Vec::new()),
    ))
}

fn method_returning_t(name: &str) -> ClassMember {
    ClassMember::Function(function(
        name,
        Vec::new(),
        Some(named_type("T")),
        block(vec![ret(Some(null()))]),
    ))
}

#[test]
fn test_covariant_parameter_in_consumer_position_warns() {
    let mut module = module(
        "test",
        vec![Declaration::Class(class_with_type_param(
            "Producer",
            Variance::Covariant,
            vec![method_taking_t("push")],
        ))],
    );
    let (_, handler) = analyze(&mut module);

    let warnings = warnings(&handler);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("variance violation"));
    assert!(warnings[0].contains("'out'"));
    assert!(warnings[0].contains("parameter 'item'"));
    assert!(warnings[0].contains("'push'"));
    assert!(!handler.has_errors());
}

#[test]
fn test_covariant_parameter_in_producer_position_is_fine() {
    let mut module = module(
        "test",
        vec![Declaration::Class(class_with_type_param(
            "Producer",
            Variance::Covariant,
            vec![method_returning_t("pull")],
        ))],
    );
    let (_, handler) = analyze(&mut module);

    // The null-to-T return produces no variance warning
    assert!(warnings(&handler)
        .iter()
        .all(|w| !w.contains("variance violation")));
}

#[test]
fn test_contravariant_parameter_in_producer_position_warns() {
    let mut module = module(
        "test",
        vec![Declaration::Class(class_with_type_param(
            "Consumer",
            Variance::Contravariant,
            vec![method_returning_t("pull")],
        ))],
    );
    let (_, handler) = analyze(&mut module);

    let violations: Vec<String> = warnings(&handler)
        .into_iter()
        .filter(|w| w.contains("variance violation"))
        .collect();
    assert_eq!(violations.len(), 1);
    assert!(violations[0].contains("'in'"));
    assert!(violations[0].contains("return type of 'pull'"));
}

#[test]
fn test_contravariant_parameter_in_consumer_position_is_fine() {
    let mut module = module(
        "test",
        vec![Declaration::Class(class_with_type_param(
            "Consumer",
            Variance::Contravariant,
            vec![method_taking_t("push")],
        ))],
    );
    let (_, handler) = analyze(&mut module);

    assert!(warnings(&handler)
        .iter()
        .all(|w| !w.contains("variance violation")));
}

#[test]
fn test_invariant_parameter_allows_both_positions() {
    let mut module = module(
        "test",
        vec![Declaration::Class(class_with_type_param(
            "Cell",
            Variance::Invariant,
            vec![method_taking_t("set"), method_returning_t("get")],
        ))],
    );
    let (_, handler) = analyze(&mut module);

    assert!(warnings(&handler)
        .iter()
        .all(|w| !w.contains("variance violation")));
}

#[test]
fn test_covariant_mutable_property_warns() {
    let member = ClassMember::Property(PropertyDeclaration {
        name: ident("current"),
        receiver: None,
        type_annotation: Some(named_type("T")),
        initializer: None,
        mutable: true,
        getter: None,
        setter: None,
        span: span(),
    });
    let mut module = module(
        "test",
        vec![Declaration::Class(class_with_type_param(
            "Producer",
            Variance::Covariant,
            vec![member],
        ))],
    );
    let (_, handler) = analyze(&mut module);

    let violations: Vec<String> = warnings(&handler)
        .into_iter()
        .filter(|w| w.contains("variance violation"))
        .collect();
    assert_eq!(violations.len(), 1);
    assert!(violations[0].contains("mutable property 'current'"));
}

#[test]
fn test_occurrence_inside_generic_argument_is_found() {
    // fun addAll(items: List<T>) on a covariant T
    let member = ClassMember::Function(function(
        "addAll",
        vec![param("items", generic_type("List", vec![named_type("T")]))],
        None,
        block(Vec::new()),
    ));
    let mut module = module(
        "test",
        vec![Declaration::Class(class_with_type_param(
            "Producer",
            Variance::Covariant,
            vec![member],
        ))],
    );
    let (_, handler) = analyze(&mut module);

    let violations: Vec<String> = warnings(&handler)
        .into_iter()
        .filter(|w| w.contains("variance violation"))
        .collect();
    assert_eq!(violations.len(), 1);
    assert!(violations[0].contains("parameter 'items'"));
}
