#![forbid(unsafe_code)]
#![deny(unreachable_patterns)]

//! Incremental formula evaluation.
//!
//! Formula text is lexed and parsed into a [`CellFormula`]: an expression tree plus the flat
//! list of references it reads. The [`Engine`] places formulas in a [`DependencyManager`],
//! which keeps a graph of formula cells and a per-sheet spatial index of the regions each
//! formula reads. When the host reports a change, only formulas that read the changed cells
//! are recalculated, in dependency order, with circular references evaluating to
//! `#CIRCULAR!` instead of looping.
//!
//! Every structural mutation (placing or clearing a formula, inserting or removing rows and
//! columns) returns a [`RestoreData`] record that undoes it exactly.
//!
//! Hosts provide cell storage, named values and the function table through [`Environment`];
//! [`MemoryEnvironment`] is a complete in-memory implementation.

pub mod ast;
pub mod calc_settings;
mod engine;
pub mod environment;
pub mod eval;
mod formula;
pub mod functions;
pub mod graph;
pub mod parser;
mod value;

pub use calc_settings::{CalcSettings, CalculationMode};
pub use engine::{is_formula, Engine, EngineError, SheetEvent, SheetSubscription};
pub use environment::{CellWrite, Environment, MemoryEnvironment};
pub use eval::{EvaluationOptions, Evaluator, ExecutionContext, FormulaLookup};
pub use formula::{CellFormula, SyntaxTree};
pub use functions::{
    FunctionError, FunctionImpl, FunctionRegistry, FunctionSpec, FunctionTable, ValueType,
    Volatility,
};
pub use graph::{
    CalculationGroup, DependencyInfo, DependencyKind, DependencyManager, GraphSnapshot,
    RestoreData, VertexId, VertexKey,
};
pub use value::{CellValue, CellValueType, ErrorKind};

pub use formula_refs::{Address, Axis, CellAddress, Reference, ReferenceKind, Region};
