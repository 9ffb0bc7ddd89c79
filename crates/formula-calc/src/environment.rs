//! The contract between the engine and the cell store that hosts it.

use std::collections::BTreeMap;

use ahash::AHashMap;
use formula_refs::Axis;

use crate::functions::{FunctionRegistry, FunctionSpec, FunctionTable};
use crate::value::CellValue;

/// Everything the engine reads from or writes to its host.
///
/// Function lookup comes from the [`FunctionTable`] supertrait.
pub trait Environment: FunctionTable {
    fn sheet_exists(&self, sheet: &str) -> bool;

    fn cell_value(&self, sheet: &str, row: u32, col: u32) -> CellValue;

    /// Largest occupied `(row, col)` on `sheet`, used to bound whole-row/column ranges.
    fn used_extent(&self, sheet: &str) -> Option<(u32, u32)>;

    /// Write a computed value. Only called inside a recalculation pass and never a user edit.
    fn set_cell_value(&mut self, sheet: &str, row: u32, col: u32, value: CellValue);

    fn variable(&self, name: &str) -> Option<CellValue>;

    fn set_variable(&mut self, name: &str, value: CellValue);

    /// The formula text stored at a cell, when the store keeps it.
    fn formula_text(&self, _sheet: &str, _row: u32, _col: u32) -> Option<String> {
        None
    }

    /// Suspend change propagation until the matching [`Environment::end_batch`].
    fn begin_batch(&mut self) {}

    fn end_batch(&mut self) {}
}

/// A value written back by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CellWrite {
    pub sheet: String,
    pub row: u32,
    pub col: u32,
    pub value: CellValue,
}

#[derive(Debug, Clone, Default)]
struct MemorySheet {
    values: BTreeMap<(u32, u32), CellValue>,
    formulas: BTreeMap<(u32, u32), String>,
}

impl MemorySheet {
    fn shift(&mut self, index: u32, count: u32, axis: Axis, insert: bool) {
        self.values = shift_cells(std::mem::take(&mut self.values), index, count, axis, insert);
        self.formulas = shift_cells(std::mem::take(&mut self.formulas), index, count, axis, insert);
    }
}

fn shift_cells<T>(
    cells: BTreeMap<(u32, u32), T>,
    index: u32,
    count: u32,
    axis: Axis,
    insert: bool,
) -> BTreeMap<(u32, u32), T> {
    let last = index.saturating_add(count.saturating_sub(1));
    cells
        .into_iter()
        .filter_map(|((row, col), value)| {
            let pos = match axis {
                Axis::Row => row,
                Axis::Col => col,
            };
            let moved = if insert {
                if pos >= index {
                    pos.saturating_add(count)
                } else {
                    pos
                }
            } else if pos > last {
                pos - count
            } else if pos >= index {
                return None;
            } else {
                pos
            };
            Some(match axis {
                Axis::Row => ((moved, col), value),
                Axis::Col => ((row, moved), value),
            })
        })
        .collect()
}

/// An in-memory [`Environment`]: named sheets of values and formula text, variables and a
/// function registry.
///
/// Engine write-backs are recorded and can be drained with [`MemoryEnvironment::take_writes`].
#[derive(Debug, Clone)]
pub struct MemoryEnvironment {
    sheets: AHashMap<String, MemorySheet>,
    variables: AHashMap<String, CellValue>,
    functions: FunctionRegistry,
    writes: Vec<CellWrite>,
    batch_depth: usize,
    completed_batches: usize,
}

impl Default for MemoryEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEnvironment {
    /// An empty environment with the built-in functions registered.
    pub fn new() -> Self {
        Self::with_functions(FunctionRegistry::with_builtins())
    }

    pub fn with_functions(functions: FunctionRegistry) -> Self {
        Self {
            sheets: AHashMap::new(),
            variables: AHashMap::new(),
            functions,
            writes: Vec::new(),
            batch_depth: 0,
            completed_batches: 0,
        }
    }

    pub fn add_sheet(&mut self, name: impl Into<String>) {
        self.sheets.entry(name.into()).or_default();
    }

    pub fn remove_sheet(&mut self, name: &str) -> bool {
        self.sheets.remove(name).is_some()
    }

    pub fn functions_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.functions
    }

    /// Store a value as a user edit would. Creates the sheet when missing.
    pub fn set_value(&mut self, sheet: &str, row: u32, col: u32, value: impl Into<CellValue>) {
        let cells = &mut self.sheets.entry(sheet.to_string()).or_default().values;
        match value.into() {
            CellValue::Empty => {
                cells.remove(&(row, col));
            }
            value => {
                cells.insert((row, col), value);
            }
        }
    }

    /// Record the formula text shown when the cell is edited.
    pub fn set_formula_text(&mut self, sheet: &str, row: u32, col: u32, text: impl Into<String>) {
        self.sheets
            .entry(sheet.to_string())
            .or_default()
            .formulas
            .insert((row, col), text.into());
    }

    pub fn clear_formula_text(&mut self, sheet: &str, row: u32, col: u32) {
        if let Some(s) = self.sheets.get_mut(sheet) {
            s.formulas.remove(&(row, col));
        }
    }

    pub fn value(&self, sheet: &str, row: u32, col: u32) -> CellValue {
        self.cell_value(sheet, row, col)
    }

    /// Engine write-backs since the last call, in write order.
    pub fn take_writes(&mut self) -> Vec<CellWrite> {
        std::mem::take(&mut self.writes)
    }

    /// How many outermost batches have been closed.
    pub fn completed_batches(&self) -> usize {
        self.completed_batches
    }

    pub fn is_batching(&self) -> bool {
        self.batch_depth > 0
    }

    /// Shift stored cells after inserting `count` rows/columns at `index`.
    pub fn insert_row_col(&mut self, sheet: &str, index: u32, count: u32, axis: Axis) {
        if let Some(s) = self.sheets.get_mut(sheet) {
            s.shift(index, count, axis, true);
        }
    }

    /// Drop cells in the removed band and shift the ones after it.
    pub fn remove_row_col(&mut self, sheet: &str, index: u32, count: u32, axis: Axis) {
        if let Some(s) = self.sheets.get_mut(sheet) {
            s.shift(index, count, axis, false);
        }
    }
}

impl FunctionTable for MemoryEnvironment {
    fn function(&self, name: &str) -> Option<FunctionSpec> {
        self.functions.function(name)
    }
}

impl Environment for MemoryEnvironment {
    fn sheet_exists(&self, sheet: &str) -> bool {
        self.sheets.contains_key(sheet)
    }

    fn cell_value(&self, sheet: &str, row: u32, col: u32) -> CellValue {
        self.sheets
            .get(sheet)
            .and_then(|s| s.values.get(&(row, col)))
            .cloned()
            .unwrap_or(CellValue::Empty)
    }

    fn used_extent(&self, sheet: &str) -> Option<(u32, u32)> {
        let s = self.sheets.get(sheet)?;
        s.values
            .keys()
            .chain(s.formulas.keys())
            .fold(None, |acc, &(row, col)| match acc {
                None => Some((row, col)),
                Some((r, c)) => Some((r.max(row), c.max(col))),
            })
    }

    fn set_cell_value(&mut self, sheet: &str, row: u32, col: u32, value: CellValue) {
        self.writes.push(CellWrite {
            sheet: sheet.to_string(),
            row,
            col,
            value: value.clone(),
        });
        self.set_value(sheet, row, col, value);
    }

    fn variable(&self, name: &str) -> Option<CellValue> {
        self.variables.get(&name.to_ascii_uppercase()).cloned()
    }

    fn set_variable(&mut self, name: &str, value: CellValue) {
        self.variables.insert(name.to_ascii_uppercase(), value);
    }

    fn formula_text(&self, sheet: &str, row: u32, col: u32) -> Option<String> {
        self.sheets.get(sheet)?.formulas.get(&(row, col)).cloned()
    }

    fn begin_batch(&mut self) {
        self.batch_depth += 1;
    }

    fn end_batch(&mut self) {
        if self.batch_depth == 0 {
            return;
        }
        self.batch_depth -= 1;
        if self.batch_depth == 0 {
            self.completed_batches += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_values_are_not_stored() {
        let mut env = MemoryEnvironment::new();
        env.set_value("S", 1, 1, 5.0);
        assert_eq!(env.used_extent("S"), Some((1, 1)));
        env.set_value("S", 1, 1, CellValue::Empty);
        assert_eq!(env.used_extent("S"), None);
        assert!(env.sheet_exists("S"));
    }

    #[test]
    fn row_removal_drops_band_and_shifts_rest() {
        let mut env = MemoryEnvironment::new();
        for row in 0..5 {
            env.set_value("S", row, 0, f64::from(row));
        }
        env.remove_row_col("S", 1, 2, Axis::Row);
        assert_eq!(env.value("S", 0, 0), CellValue::Number(0.0));
        assert_eq!(env.value("S", 1, 0), CellValue::Number(3.0));
        assert_eq!(env.value("S", 2, 0), CellValue::Number(4.0));
        assert_eq!(env.value("S", 3, 0), CellValue::Empty);

        env.insert_row_col("S", 0, 1, Axis::Col);
        assert_eq!(env.value("S", 1, 1), CellValue::Number(3.0));
    }

    #[test]
    fn batches_nest() {
        let mut env = MemoryEnvironment::new();
        env.begin_batch();
        env.begin_batch();
        env.end_batch();
        assert!(env.is_batching());
        env.end_batch();
        env.end_batch();
        assert_eq!(env.completed_batches(), 1);
    }

    #[test]
    fn variables_are_case_insensitive() {
        let mut env = MemoryEnvironment::new();
        env.set_variable("Rate", CellValue::Number(0.5));
        assert_eq!(env.variable("RATE"), Some(CellValue::Number(0.5)));
    }
}
