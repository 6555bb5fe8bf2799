use serde::{Deserialize, Serialize};

/// Optimization level for the HIR pass pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptimizationLevel {
    #[serde(rename = "O0")]
    O0,
    #[serde(rename = "O1")]
    O1,
    #[serde(rename = "O2")]
    O2,
    #[serde(rename = "O3")]
    O3,
}

impl Default for OptimizationLevel {
    fn default() -> Self {
        OptimizationLevel::O2
    }
}

/// Compiler options that control analysis and code generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerOptions {
    /// Optimization level for the HIR pass pipeline (default: O2)
    #[serde(default)]
    pub optimization_level: OptimizationLevel,

    /// Enable strict null checking diagnostics (default: true)
    #[serde(default = "default_true")]
    pub strict_null_checks: bool,

    /// Warn when a numeric initializer narrows the declared type (default: true)
    #[serde(default = "default_true")]
    pub warn_numeric_narrowing: bool,

    /// Emit binary artifacts (type check only when false, default: true)
    #[serde(default = "default_true")]
    pub emit: bool,

    /// Pretty-print diagnostics (default: true)
    #[serde(default = "default_true")]
    pub pretty: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            optimization_level: OptimizationLevel::default(),
            strict_null_checks: true,
            warn_numeric_narrowing: true,
            emit: true,
            pretty: true,
        }
    }
}

impl CompilerOptions {
    /// Parse options from a JSON configuration string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = CompilerOptions::default();
        assert_eq!(options.optimization_level, OptimizationLevel::O2);
        assert!(options.strict_null_checks);
        assert!(options.emit);
    }

    #[test]
    fn test_from_json() {
        let options =
            CompilerOptions::from_json(r#"{"optimizationLevel": "O0", "emit": false}"#).unwrap();
        assert_eq!(options.optimization_level, OptimizationLevel::O0);
        assert!(!options.emit);
        assert!(options.strict_null_checks);
    }

    #[test]
    fn test_level_ordering() {
        assert!(OptimizationLevel::O0 < OptimizationLevel::O1);
        assert!(OptimizationLevel::O2 < OptimizationLevel::O3);
    }
}
