//! The compilation pipeline driver.
//!
//! `source AST -> (analyzer annotates in place) -> HIR -> pass pipeline ->
//! MIR -> container blobs`. Single-threaded and synchronous per
//! compilation unit: each stage is a pure function of its input plus the
//! analyzer's side tables, and no stage mutates a later stage's output.
//! Compiling independent modules in parallel is the caller's business; the
//! pipeline shares no mutable state between invocations.

use crate::ast::Module;
use crate::codegen::CodeGenerator;
use crate::config::CompilerOptions;
use crate::diagnostics::{Diagnostic, DiagnosticHandler};
use crate::errors::CompileError;
use crate::lower::HirLowering;
use crate::mir::MirLowering;
use crate::optimizer::Optimizer;
use crate::sema::SemanticAnalyzer;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::info;

/// The result of one pipeline invocation.
///
/// Output may exist alongside warnings; it is the consumer's decision
/// whether to reject on error-severity diagnostics. When analysis produced
/// errors the artifact map is empty, since lowering would be meaningless.
#[derive(Debug)]
pub struct CompiledUnit {
    /// Fully qualified class name -> container blob
    pub artifacts: IndexMap<String, Vec<u8>>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompiledUnit {
    pub fn has_artifacts(&self) -> bool {
        !self.artifacts.is_empty()
    }
}

pub struct Pipeline {
    options: CompilerOptions,
    handler: Arc<dyn DiagnosticHandler>,
}

impl Pipeline {
    pub fn new(options: CompilerOptions, handler: Arc<dyn DiagnosticHandler>) -> Self {
        Self { options, handler }
    }

    /// Compile one module to binary artifacts.
    ///
    /// User-facing problems surface in the returned diagnostics; an `Err`
    /// is always an internal-compiler error.
    pub fn compile(&self, module: &mut Module) -> Result<CompiledUnit, CompileError> {
        info!(module = %module.name, stage = "sema", "analyzing");
        let analyzer = SemanticAnalyzer::new(self.handler.clone());
        let analysis = analyzer.analyze(module)?;

        // Error-severity diagnostics gate the rest of the pipeline
        if self.handler.has_errors() {
            info!(module = %module.name, "analysis errors; skipping lowering");
            return Ok(CompiledUnit {
                artifacts: IndexMap::new(),
                diagnostics: self.handler.get_diagnostics(),
            });
        }

        info!(module = %module.name, stage = "hir-lowering", "lowering");
        let mut lowering = HirLowering::new(&analysis);
        let hir = lowering.lower_module(module)?;

        info!(module = %module.name, stage = "optimizer", level = ?self.options.optimization_level, "optimizing");
        let optimizer = Optimizer::new(self.options.optimization_level);
        let hir = optimizer.optimize(hir)?;

        if !self.options.emit {
            return Ok(CompiledUnit {
                artifacts: IndexMap::new(),
                diagnostics: self.handler.get_diagnostics(),
            });
        }

        info!(module = %module.name, stage = "mir-lowering", "flattening");
        let mir_lowering = MirLowering::new();
        let mir = mir_lowering.lower_module(&hir)?;

        info!(module = %module.name, stage = "codegen", "emitting");
        let generator = CodeGenerator::new();
        let artifacts = generator.emit_module(&mir)?;

        Ok(CompiledUnit {
            artifacts,
            diagnostics: self.handler.get_diagnostics(),
        })
    }
}
