//! Reified-generic specialization (inline expansion).
//!
//! Every inline function with at least one reified type parameter is
//! monomorphized: call sites bound to concrete type-argument tuples are
//! rewritten to uniquely named specialized copies, with the bound type
//! substituted everywhere it occurs, including `is`/`as` targets and
//! `T::class` references (which become name string literals). Two call
//! sites with the same tuple share exactly one specialization, and the
//! generated name is a pure function of the key, so repeated runs converge
//! on identical output.
//!
//! A call site that escapes inference keeps calling the original name; in
//! that case one fallback copy with every reified parameter substituted by
//! the universal top type survives under the original name. Otherwise the
//! generic original is dropped.

use crate::config::OptimizationLevel;
use crate::errors::CompileError;
use crate::hir::{
    HirCall, HirCallee, HirDecl, HirExpr, HirExprKind, HirFunction, HirLiteral, HirModule,
    HirRewriter, HirType, HirTypeKind,
};
use crate::optimizer::HirPass;
use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use std::rc::Rc;
use tracing::debug;

/// A function name together with the ordered concrete type names bound to
/// its type parameters. Dictionary key for deduplication and the source of
/// the specialized name suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpecKey {
    pub function: String,
    pub type_names: Vec<String>,
}

impl SpecKey {
    pub fn new(function: impl Into<String>, type_args: &[HirType]) -> Self {
        SpecKey {
            function: function.into(),
            type_names: type_args.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// The specialized function's name: a pure function of the key.
    pub fn mangled_name(&self) -> String {
        let mut name = self.function.clone();
        for type_name in &self.type_names {
            name.push('$');
            name.push_str(&sanitize(type_name));
        }
        name
    }
}

fn sanitize(type_name: &str) -> String {
    type_name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

pub struct ReifiedSpecializationPass;

impl ReifiedSpecializationPass {
    pub fn new() -> Self {
        ReifiedSpecializationPass
    }
}

impl Default for ReifiedSpecializationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl HirPass for ReifiedSpecializationPass {
    fn name(&self) -> &'static str {
        "reified-specialization"
    }

    fn min_level(&self) -> OptimizationLevel {
        // Erasing reified parameters is required for codegen, not optional
        OptimizationLevel::O0
    }

    fn run(&mut self, module: &Rc<HirModule>) -> Result<Rc<HirModule>, CompileError> {
        // Phase 1: collect the specialization targets
        let mut targets: FxHashMap<String, Rc<HirDecl>> = FxHashMap::default();
        for decl in &module.declarations {
            if let HirDecl::Function(function) = decl.as_ref() {
                if function.has_reified_parameters() {
                    targets.insert(function.name.clone(), decl.clone());
                }
            }
        }

        if targets.is_empty() {
            return Ok(module.clone());
        }

        // Phase 2: rewrite call sites, creating specializations on demand
        let mut rewriter = CallSiteRewriter {
            targets: &targets,
            specializations: IndexMap::new(),
        };
        let rewritten = rewriter.walk_module(module);
        let specializations = rewriter.specializations;
        debug!(
            targets = targets.len(),
            specializations = specializations.len(),
            "reified specialization"
        );

        // Phase 3: find residual references to the original names. Any call
        // that still targets a generic original (no bindings, or a type
        // argument that stayed unresolved) keeps its fallback alive.
        let mut scan = ReferenceScan {
            targets: targets.keys().cloned().collect(),
            found: FxHashSet::default(),
        };
        scan.walk_module(&rewritten);
        for spec in specializations.values() {
            if let Some(body) = &spec.body {
                scan.rewrite_stmt(body);
            }
        }
        let residual = scan.found;

        // Phase 4: reassemble the module. Each original is replaced by its
        // specializations (in first-encounter order), plus an Any-substituted
        // fallback when it is still referenced.
        let mut declarations = Vec::with_capacity(rewritten.declarations.len());
        for decl in &rewritten.declarations {
            let function_name = match decl.as_ref() {
                HirDecl::Function(function) if targets.contains_key(&function.name) => {
                    function.name.clone()
                }
                _ => {
                    declarations.push(decl.clone());
                    continue;
                }
            };

            for (key, spec) in &specializations {
                if key.function == function_name {
                    declarations.push(Rc::new(HirDecl::Function(clone_function(spec))));
                }
            }

            if residual.contains(&function_name) {
                if let HirDecl::Function(function) = decl.as_ref() {
                    declarations.push(Rc::new(HirDecl::Function(make_fallback(function))));
                }
            }
        }

        Ok(HirModule::new(
            rewritten.name.clone(),
            declarations,
            rewritten.span,
        ))
    }
}

// =============================================================================
// Call-site rewriting
// =============================================================================

struct CallSiteRewriter<'a> {
    targets: &'a FxHashMap<String, Rc<HirDecl>>,
    specializations: IndexMap<SpecKey, Rc<HirFunction>>,
}

impl CallSiteRewriter<'_> {
    fn specialize(&mut self, target: &HirFunction, type_args: &[HirType]) -> String {
        let key = SpecKey::new(target.name.clone(), type_args);
        if self.specializations.contains_key(&key) {
            return key.mangled_name();
        }

        let mut bindings: FxHashMap<String, HirType> = FxHashMap::default();
        for (param, arg) in target.type_parameters.iter().zip(type_args.iter()) {
            bindings.insert(param.name.clone(), arg.clone());
        }

        let mut substituter = TypeSubstituter { bindings };
        let mut specialized = substituter
            .walk_function_parts(target)
            .unwrap_or_else(|| clone_function(target));
        specialized.name = key.mangled_name();
        specialized.type_parameters = Vec::new();

        let name = specialized.name.clone();
        self.specializations.insert(key, Rc::new(specialized));
        name
    }
}

impl HirRewriter for CallSiteRewriter<'_> {
    fn rewrite_expr(&mut self, expr: &Rc<HirExpr>) -> Rc<HirExpr> {
        let walked = self.walk_expr(expr);

        let HirExprKind::Call(call) = &walked.kind else {
            return walked;
        };
        let HirCallee::Function(name) = &call.callee else {
            return walked;
        };
        let Some(target_decl) = self.targets.get(name) else {
            return walked;
        };
        let HirDecl::Function(target) = target_decl.as_ref() else {
            return walked;
        };

        // Specialize only when every type parameter is bound to a concrete
        // type at this call site.
        if call.type_args.len() != target.type_parameters.len()
            || call.type_args.is_empty()
            || !call.type_args.iter().all(HirType::is_concrete)
        {
            return walked;
        }

        let specialized_name = self.specialize(target, &call.type_args);
        HirExpr::new(
            HirExprKind::Call(HirCall {
                callee: HirCallee::Function(specialized_name),
                args: call.args.clone(),
                type_args: Vec::new(),
            }),
            walked.ty.clone(),
            walked.span,
        )
    }
}

// =============================================================================
// Type substitution
// =============================================================================

struct TypeSubstituter {
    bindings: FxHashMap<String, HirType>,
}

impl HirRewriter for TypeSubstituter {
    fn rewrite_type(&mut self, ty: &HirType) -> HirType {
        substitute_type(ty, &self.bindings)
    }

    fn rewrite_expr(&mut self, expr: &Rc<HirExpr>) -> Rc<HirExpr> {
        // `T::class` becomes a string literal naming the bound type
        if let HirExprKind::ClassRef(target) = &expr.kind {
            if let HirTypeKind::Unresolved(name) = &target.kind {
                if let Some(bound) = self.bindings.get(name) {
                    return HirExpr::literal(
                        HirLiteral::String(bound.to_string()),
                        HirType::string(),
                        expr.span,
                    );
                }
            }
        }
        self.walk_expr(expr)
    }
}

fn substitute_type(ty: &HirType, bindings: &FxHashMap<String, HirType>) -> HirType {
    match &ty.kind {
        HirTypeKind::Unresolved(name) => match bindings.get(name) {
            Some(bound) => bound.with_nullability(ty.nullable || bound.nullable),
            None => ty.clone(),
        },
        HirTypeKind::Class { name, type_args } => HirType {
            kind: HirTypeKind::Class {
                name: name.clone(),
                type_args: type_args
                    .iter()
                    .map(|arg| substitute_type(arg, bindings))
                    .collect(),
            },
            nullable: ty.nullable,
        },
        _ => ty.clone(),
    }
}

// =============================================================================
// Residual-reference scan
// =============================================================================

struct ReferenceScan {
    targets: FxHashSet<String>,
    found: FxHashSet<String>,
}

impl HirRewriter for ReferenceScan {
    fn rewrite_expr(&mut self, expr: &Rc<HirExpr>) -> Rc<HirExpr> {
        if let HirExprKind::Call(call) = &expr.kind {
            if let HirCallee::Function(name) = &call.callee {
                if self.targets.contains(name) {
                    self.found.insert(name.clone());
                }
            }
        }
        self.walk_expr(expr)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn clone_function(function: &HirFunction) -> HirFunction {
    HirFunction {
        name: function.name.clone(),
        kind: function.kind,
        type_parameters: function.type_parameters.clone(),
        parameters: function.parameters.clone(),
        return_type: function.return_type.clone(),
        body: function.body.clone(),
        is_inline: function.is_inline,
        span: function.span,
    }
}

/// The fallback copy: every type parameter substituted with the universal
/// top type, under the original name.
fn make_fallback(function: &HirFunction) -> HirFunction {
    let bindings: FxHashMap<String, HirType> = function
        .type_parameters
        .iter()
        .map(|p| (p.name.clone(), HirType::any()))
        .collect();
    let mut substituter = TypeSubstituter { bindings };
    let mut fallback = substituter
        .walk_function_parts(function)
        .unwrap_or_else(|| clone_function(function));
    fallback.type_parameters = Vec::new();
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mangled_name_is_pure_function_of_key() {
        let key_a = SpecKey::new("identity", &[HirType::int()]);
        let key_b = SpecKey::new("identity", &[HirType::int()]);
        assert_eq!(key_a.mangled_name(), key_b.mangled_name());
        assert_eq!(key_a.mangled_name(), "identity$Int");
    }

    #[test]
    fn test_mangled_name_sanitizes_generics() {
        let key = SpecKey::new(
            "first",
            &[HirType::class("List", vec![HirType::string()])],
        );
        assert_eq!(key.mangled_name(), "first$List_String_");
    }

    #[test]
    fn test_distinct_tuples_distinct_names() {
        let int_key = SpecKey::new("identity", &[HirType::int()]);
        let string_key = SpecKey::new("identity", &[HirType::string()]);
        assert_ne!(int_key.mangled_name(), string_key.mangled_name());
    }

    #[test]
    fn test_substitute_type_preserves_nullability() {
        let mut bindings = FxHashMap::default();
        bindings.insert("T".to_string(), HirType::string());

        let nullable_t = HirType::unresolved("T").with_nullability(true);
        let substituted = substitute_type(&nullable_t, &bindings);
        assert_eq!(substituted, HirType::string().with_nullability(true));
    }
}
