//! Incremental recompilation engine: tracks compilation units and their
//! dependency graph, detects which units an edit actually touched, and
//! reassembles output from cached and freshly compiled fragments.

pub mod change_detector;
pub mod engine;
pub mod unit_manager;

pub use change_detector::*;
pub use engine::*;
pub use unit_manager::*;

// Re-export common types for convenience
pub use unitgraph_core::{
    ChangeRecord, CompilationUnit, Result, Snapshot, UnitGraphError, UnitState, UnitType,
};
