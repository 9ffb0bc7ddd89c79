mod evaluator;

use std::collections::{HashMap, HashSet};

use formula_refs::Region;

use crate::formula::CellFormula;
use crate::graph::VertexKey;
use crate::value::CellValue;

pub use evaluator::{compare_values, Evaluator, MAX_MATERIALIZED_ARRAY_CELLS};

/// How many formulas may be evaluated on demand inside one another before a read is treated as
/// circular. Only members of a cycle are ever read before their turn, so hitting the limit
/// means the read is part of a cycle.
pub const MAX_EVALUATION_DEPTH: usize = 64;

/// Access to the formulas placed on sheets, so references to formula cells can be evaluated
/// (or flagged circular) within a pass.
pub trait FormulaLookup {
    fn formula_at(&self, sheet: &str, row: u32, col: u32) -> Option<&CellFormula>;

    /// Positions of formula cells on `sheet` inside `region`.
    fn formula_cells_in(&self, sheet: &str, region: Region) -> Vec<(u32, u32)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationOptions {
    /// When false, references evaluate to [`CellValue::Reference`] instead of cell contents.
    pub resolve_references: bool,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            resolve_references: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum EvaluationState {
    InProgress,
    Completed(CellValue),
}

/// Per-pass bookkeeping of which formulas are being or have been evaluated.
///
/// A formula found in progress when it is read again is part of a cycle and reads as
/// `#CIRCULAR!`. Formulas listed as pending (the rest of the pass) are evaluated on demand
/// when read before their turn; every other formula cell reads its last stored value.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    states: HashMap<VertexKey, EvaluationState>,
    pending: HashSet<VertexKey>,
    evaluations: usize,
    depth: usize,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context for a pass that will evaluate `pending`.
    pub fn for_pass(pending: impl IntoIterator<Item = VertexKey>) -> Self {
        Self {
            pending: pending.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn is_in_progress(&self, key: &VertexKey) -> bool {
        matches!(self.states.get(key), Some(EvaluationState::InProgress))
    }

    pub fn completed(&self, key: &VertexKey) -> Option<&CellValue> {
        match self.states.get(key) {
            Some(EvaluationState::Completed(value)) => Some(value),
            _ => None,
        }
    }

    pub fn is_pending(&self, key: &VertexKey) -> bool {
        self.pending.contains(key) && !self.states.contains_key(key)
    }

    /// Record a value without evaluating, e.g. for the rest of a circular group.
    pub fn set_completed(&mut self, key: VertexKey, value: CellValue) {
        self.states.insert(key, EvaluationState::Completed(value));
    }

    /// Number of formula evaluations started in this context.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Formulas currently being evaluated inside one another.
    pub fn depth(&self) -> usize {
        self.depth
    }

    fn at_depth_limit(&self) -> bool {
        self.depth >= MAX_EVALUATION_DEPTH
    }

    fn begin(&mut self, key: VertexKey) {
        self.evaluations += 1;
        self.depth += 1;
        self.states.insert(key, EvaluationState::InProgress);
    }

    fn finish(&mut self, key: VertexKey, value: CellValue) {
        self.depth = self.depth.saturating_sub(1);
        self.set_completed(key, value);
    }
}
