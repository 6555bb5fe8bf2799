//! HIR optimizer.
//!
//! A fixed, ordered list of `HIR -> HIR` passes over `Rc`-shared immutable
//! trees. Every pass is a copy-on-change transform: it returns the input
//! `Rc` itself when nothing changed, so later passes and the code
//! generator can skip unchanged subtrees cheaply and `Rc::ptr_eq` serves
//! as the change detector.

use crate::config::OptimizationLevel;
use crate::errors::CompileError;
use crate::hir::HirModule;
use std::rc::Rc;
use tracing::{debug, info};

pub mod passes;

pub use passes::{ConstantFoldingPass, DeadCodeEliminationPass, ReifiedSpecializationPass};

/// A single HIR-to-HIR transform.
pub trait HirPass {
    fn name(&self) -> &'static str;

    /// The lowest optimization level at which this pass runs.
    fn min_level(&self) -> OptimizationLevel;

    /// Transform the module. Must return the input `Rc` unchanged when the
    /// pass found nothing to do.
    fn run(&mut self, module: &Rc<HirModule>) -> Result<Rc<HirModule>, CompileError>;
}

/// Runs the pass pipeline in its fixed order.
pub struct Optimizer {
    level: OptimizationLevel,
}

impl Optimizer {
    pub fn new(level: OptimizationLevel) -> Self {
        Self { level }
    }

    fn passes() -> Vec<Box<dyn HirPass>> {
        vec![
            Box::new(ConstantFoldingPass),
            Box::new(DeadCodeEliminationPass),
            // Specialization is semantic erasure of reified generics and
            // runs at every level.
            Box::new(ReifiedSpecializationPass::new()),
        ]
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        Self::passes().iter().map(|p| p.name()).collect()
    }

    pub fn optimize(&self, module: Rc<HirModule>) -> Result<Rc<HirModule>, CompileError> {
        let mut module = module;
        for mut pass in Self::passes() {
            if self.level < pass.min_level() {
                debug!(pass = pass.name(), level = ?self.level, "skipped");
                continue;
            }
            let before = module.clone();
            module = pass.run(&module)?;
            let changed = !Rc::ptr_eq(&before, &module);
            info!(pass = pass.name(), changed, "pass finished");
        }
        Ok(module)
    }
}
