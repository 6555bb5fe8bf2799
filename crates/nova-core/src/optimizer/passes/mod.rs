mod constant_folding;
pub use constant_folding::ConstantFoldingPass;

mod dead_code_elimination;
pub use dead_code_elimination::DeadCodeEliminationPass;

mod reified_specialization;
pub use reified_specialization::{ReifiedSpecializationPass, SpecKey};
