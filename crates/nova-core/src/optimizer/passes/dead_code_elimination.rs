//! Dead-code elimination.
//!
//! Within any statement block, everything after the first terminator
//! (`return`, `throw`, `break`, `continue`) is unreachable and is dropped.
//! Only the terminator itself survives.

use crate::config::OptimizationLevel;
use crate::errors::CompileError;
use crate::hir::{HirModule, HirRewriter, HirStmt};
use crate::optimizer::HirPass;
use std::rc::Rc;

pub struct DeadCodeEliminationPass;

impl HirPass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn min_level(&self) -> OptimizationLevel {
        OptimizationLevel::O1
    }

    fn run(&mut self, module: &Rc<HirModule>) -> Result<Rc<HirModule>, CompileError> {
        Ok(self.walk_module(module))
    }
}

impl HirRewriter for DeadCodeEliminationPass {
    fn rewrite_stmt_list(&mut self, stmts: &[Rc<HirStmt>]) -> Vec<Rc<HirStmt>> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            let rewritten = self.rewrite_stmt(stmt);
            let is_terminator = rewritten.is_terminator();
            out.push(rewritten);
            if is_terminator {
                break;
            }
        }
        out
    }
}
