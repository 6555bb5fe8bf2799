pub mod analyzer;
pub mod generics;
pub mod nova_type;
pub mod symbol_table;
pub mod type_compat;
pub mod variance;

pub use analyzer::{Analysis, SemanticAnalyzer, SideTables};
pub use nova_type::{common_super_type, ClassType, FunctionSignature, NovaType, NumericKind};
pub use symbol_table::{Scope, Symbol, SymbolKind, SymbolTable};
pub use type_compat::{Compatibility, TypeCompatibility};
