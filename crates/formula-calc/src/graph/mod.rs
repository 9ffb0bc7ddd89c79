//! Dependency tracking: the spatial reverse index, the vertex graph and the manager that keeps
//! both consistent with the formulas placed on each sheet.

mod dependency_graph;
mod dependency_manager;
mod region_index;

use core::fmt;

use formula_refs::{CellAddress, Region};
use serde::{Deserialize, Serialize};

pub use dependency_graph::{DependencyGraph, FormulaVertex};
pub use dependency_manager::{
    CalculationGroup, DependencyInfo, DependencyKind, DependencyManager, GraphChange,
    GraphSnapshot, RestoreData, ShiftDescriptor, VertexMove,
};
pub use region_index::{RegionChange, RegionIndex, RegionRestoreData};

/// Stable arena id of a vertex. Ids survive re-keying and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexId(pub(crate) u64);

impl VertexId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Position of a cell formula.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexKey {
    pub sheet: String,
    pub row: u32,
    pub col: u32,
}

impl VertexKey {
    pub fn new(sheet: impl Into<String>, row: u32, col: u32) -> Self {
        Self {
            sheet: sheet.into(),
            row,
            col,
        }
    }

    pub fn region(&self) -> Region {
        Region::cell(self.row, self.col)
    }
}

impl fmt::Display for VertexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        formula_refs::write_sheet_prefix(f, &self.sheet)?;
        write!(f, "{}", CellAddress::new(self.row, self.col))
    }
}
