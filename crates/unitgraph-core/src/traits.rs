use crate::error::Result;
use crate::types::CompilationUnit;

/// External compiler hook: turns one compilation unit into its output
/// fragment. The engine drives this for every unit that misses the cache.
pub trait UnitCompiler: Send {
    fn compile(&self, unit: &CompilationUnit) -> Result<String>;
}

impl<F> UnitCompiler for F
where
    F: Fn(&CompilationUnit) -> Result<String> + Send,
{
    fn compile(&self, unit: &CompilationUnit) -> Result<String> {
        self(unit)
    }
}
