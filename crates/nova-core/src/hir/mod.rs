pub mod decl;
pub mod expr;
pub mod rewrite;
pub mod stmt;
pub mod types;

pub use decl::{
    HirClass, HirDecl, HirEnumEntry, HirField, HirFunction, HirFunctionKind, HirImport,
    HirModule, HirParameter, HirTypeAlias, HirTypeParameter,
};
pub use expr::{
    HirAssign, HirBinary, HirBinaryOp, HirBlockExpr, HirCall, HirCallee, HirCollectionKind,
    HirCollectionLiteral, HirConstructorCall, HirExpr, HirExprKind, HirIf, HirIndex, HirLambda,
    HirLiteral, HirMember, HirObjectLiteral, HirTypeCast, HirTypeCheck, HirUnary, HirUnaryOp,
};
pub use rewrite::HirRewriter;
pub use stmt::{
    HirBlock, HirCatch, HirExprStmt, HirLocal, HirLoop, HirLoopKind, HirReturn, HirStmt,
    HirThrow, HirTry,
};
pub use types::{HirType, HirTypeKind};
