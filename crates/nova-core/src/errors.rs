use crate::span::Span;
use thiserror::Error;

/// Fatal internal-compiler errors.
///
/// These abort the compilation unit immediately. User-facing problems (type
/// mismatches, variance violations) are never represented here; they flow
/// through the `DiagnosticHandler` instead.
#[derive(Debug, Error)]
pub enum CompileError {
    /// An AST or HIR node shape with no defined lowering reached a stage.
    #[error("{stage}: no lowering defined for {node} at {span}")]
    UnhandledNode {
        stage: &'static str,
        node: String,
        span: Span,
    },

    /// A type reached code generation with no binary mapping.
    #[error("codegen: no binary mapping for type '{name}' at {span}")]
    UnmappedType { name: String, span: Span },

    /// An internal invariant was violated (e.g. symbol-table corruption,
    /// a double-written annotation slot).
    #[error("{stage}: internal invariant violated at {span}: {message}")]
    Internal {
        stage: &'static str,
        message: String,
        span: Span,
    },
}

impl CompileError {
    pub fn internal(stage: &'static str, span: Span, message: impl Into<String>) -> Self {
        CompileError::Internal {
            stage,
            message: message.into(),
            span,
        }
    }

    pub fn unhandled(stage: &'static str, span: Span, node: impl Into<String>) -> Self {
        CompileError::UnhandledNode {
            stage,
            node: node.into(),
            span,
        }
    }

    /// The pipeline stage that raised this error.
    pub fn stage(&self) -> &'static str {
        match self {
            CompileError::UnhandledNode { stage, .. } => stage,
            CompileError::UnmappedType { .. } => "codegen",
            CompileError::Internal { stage, .. } => stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_stage_and_location() {
        let err = CompileError::internal("sema", Span::new(0, 1, 4, 2), "scope stack underflow");
        let text = err.to_string();
        assert!(text.contains("sema"));
        assert!(text.contains("4:2"));
        assert!(text.contains("scope stack underflow"));
    }

    #[test]
    fn test_unmapped_type_stage() {
        let err = CompileError::UnmappedType {
            name: "T".to_string(),
            span: Span::synthetic(),
        };
        assert_eq!(err.stage(), "codegen");
    }
}
