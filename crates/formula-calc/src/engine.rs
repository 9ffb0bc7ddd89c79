use std::collections::BTreeSet;

use ahash::AHashMap;
use formula_refs::{Axis, Region};
use log::{debug, warn};
use thiserror::Error;

use crate::calc_settings::CalcSettings;
use crate::environment::Environment;
use crate::eval::{EvaluationOptions, Evaluator, ExecutionContext};
use crate::formula::CellFormula;
use crate::graph::{CalculationGroup, DependencyInfo, DependencyManager, RestoreData, VertexKey};
use crate::value::{CellValue, ErrorKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("sheet {0:?} is not attached to the engine")]
    SheetNotAttached(String),
}

/// Proof that a sheet is attached. Notifications for the sheet must present it.
///
/// Subscriptions are released with [`Engine::detach_sheet`]; attaching the same sheet again
/// invalidates the older subscription.
#[must_use = "a sheet stays attached until its subscription is passed to `detach_sheet`"]
#[derive(Debug, PartialEq, Eq)]
pub struct SheetSubscription {
    sheet: String,
    token: u64,
}

impl SheetSubscription {
    pub fn sheet(&self) -> &str {
        &self.sheet
    }
}

/// A change reported by the cell store.
#[derive(Debug, Clone, PartialEq)]
pub enum SheetEvent {
    /// Values or formulas changed at `positions` (row, col) and inside `regions`.
    CellsChanged {
        positions: Vec<(u32, u32)>,
        regions: Vec<Region>,
    },
    RowsRemoved { index: u32, count: u32 },
    ColumnsRemoved { index: u32, count: u32 },
}

/// Whether `text` is entered as a formula rather than a value.
pub fn is_formula(text: &str) -> bool {
    text.starts_with('=')
}

/// Incremental recalculation over an environment.
///
/// The engine owns the dependency graph of every formula placed through it and recalculates
/// only what a change can affect. Computed values are written back with
/// [`Environment::set_cell_value`], once per pass, between `begin_batch` and `end_batch`.
///
/// Every recalculating call takes `&mut self`, so an environment cannot raise a notification
/// that reaches the engine while a pass is writing back; a nested pass cannot start.
pub struct Engine<E: Environment> {
    env: E,
    deps: DependencyManager,
    settings: CalcSettings,
    sheets: AHashMap<String, u64>,
    next_token: u64,
    is_calculating: bool,
}

impl<E: Environment> Engine<E> {
    pub fn new(env: E) -> Self {
        Self::with_settings(env, CalcSettings::default())
    }

    pub fn with_settings(env: E, settings: CalcSettings) -> Self {
        Self {
            env,
            deps: DependencyManager::new(),
            settings,
            sheets: AHashMap::new(),
            next_token: 0,
            is_calculating: false,
        }
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut E {
        &mut self.env
    }

    pub fn settings(&self) -> &CalcSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: CalcSettings) {
        self.settings = settings;
    }

    pub fn dependency_manager(&self) -> &DependencyManager {
        &self.deps
    }

    pub fn is_attached(&self, sheet: &str) -> bool {
        self.sheets.contains_key(sheet)
    }

    pub fn attach_sheet(&mut self, sheet: impl Into<String>) -> SheetSubscription {
        let sheet = sheet.into();
        let token = self.next_token;
        self.next_token += 1;
        if self.sheets.insert(sheet.clone(), token).is_some() {
            debug!("re-attached sheet {sheet}");
        } else {
            debug!("attached sheet {sheet}");
        }
        SheetSubscription { sheet, token }
    }

    /// Detach a sheet and drop its formulas from the graph.
    pub fn detach_sheet(
        &mut self,
        subscription: SheetSubscription,
    ) -> Result<RestoreData, EngineError> {
        self.check_subscription(&subscription)?;
        self.sheets.remove(&subscription.sheet);
        debug!("detached sheet {}", subscription.sheet);
        Ok(self.deps.clear_sheet(&subscription.sheet))
    }

    /// Text to show while `row`/`col` is being edited: the stored formula text, else the
    /// rendering of the placed formula.
    pub fn before_cell_edit(
        &self,
        subscription: &SheetSubscription,
        row: u32,
        col: u32,
    ) -> Option<String> {
        self.check_subscription(subscription).ok()?;
        let sheet = subscription.sheet.as_str();
        self.env.formula_text(sheet, row, col).or_else(|| {
            self.deps
                .formula(sheet, row, col)
                .map(CellFormula::to_formula_string)
        })
    }

    pub fn parse_formula(&self, text: &str) -> CellFormula {
        CellFormula::parse(text, &self.env)
    }

    /// Evaluate a formula as if placed on `sheet`, without writing anything back.
    ///
    /// With `resolve_references` off, references evaluate to themselves.
    pub fn evaluate(
        &self,
        sheet: &str,
        formula: &CellFormula,
        resolve_references: bool,
    ) -> CellValue {
        let options = EvaluationOptions { resolve_references };
        let mut ctx = ExecutionContext::new();
        Evaluator::new(&self.env, &self.deps, options).evaluate(sheet, formula, &mut ctx)
    }

    pub fn formula(&self, sheet: &str, row: u32, col: u32) -> Option<&CellFormula> {
        self.deps.formula(sheet, row, col)
    }

    /// Place a formula. Nothing is recalculated until the store reports the change.
    pub fn set_formula(
        &mut self,
        sheet: &str,
        row: u32,
        col: u32,
        formula: CellFormula,
    ) -> Result<RestoreData, EngineError> {
        self.ensure_attached(sheet)?;
        Ok(self.deps.set_formula(sheet, row, col, formula))
    }

    pub fn remove_formula(
        &mut self,
        sheet: &str,
        row: u32,
        col: u32,
    ) -> Result<RestoreData, EngineError> {
        self.ensure_attached(sheet)?;
        Ok(self.deps.clear_formula(sheet, row, col))
    }

    pub fn insert_row_col_at(
        &mut self,
        sheet: &str,
        index: u32,
        count: u32,
        axis: Axis,
    ) -> Result<RestoreData, EngineError> {
        self.ensure_attached(sheet)?;
        Ok(self.deps.insert_row_col_at(sheet, index, count, axis))
    }

    pub fn remove_row_col_at(
        &mut self,
        sheet: &str,
        index: u32,
        count: u32,
        axis: Axis,
    ) -> Result<RestoreData, EngineError> {
        self.ensure_attached(sheet)?;
        Ok(self.deps.remove_row_col_at(sheet, index, count, axis))
    }

    /// Undo a record returned by one of the mutating calls. Restore newest records first.
    pub fn restore(&mut self, data: &RestoreData) {
        self.deps.restore(data);
    }

    pub fn dependencies(&self) -> Vec<DependencyInfo> {
        self.deps.dependencies()
    }

    /// React to a change reported by the cell store. Returns the number of formulas evaluated.
    pub fn handle_event(
        &mut self,
        subscription: &SheetSubscription,
        event: SheetEvent,
    ) -> Result<usize, EngineError> {
        self.check_subscription(subscription)?;
        if self.settings.is_manual() {
            return Ok(0);
        }

        let sheet = subscription.sheet.as_str();
        match event {
            SheetEvent::CellsChanged { positions, regions } => {
                let changed: Vec<Region> = positions
                    .into_iter()
                    .map(|(row, col)| Region::cell(row, col))
                    .chain(regions)
                    .collect();
                if !changed.iter().any(|r| self.deps.has_dependents(sheet, *r)) {
                    return Ok(0);
                }

                let mut roots = BTreeSet::new();
                for region in &changed {
                    roots.extend(self.deps.readers_of(sheet, *region));
                    roots.extend(self.deps.graph().vertices_in(sheet, *region));
                }
                roots.extend(self.deps.volatile_vertices());
                let order = self.deps.calculation_order_from(roots);
                Ok(self.run_pass(order))
            }
            SheetEvent::RowsRemoved { .. } | SheetEvent::ColumnsRemoved { .. } => {
                if !self.settings.recalculate_on_structural_edit {
                    return Ok(0);
                }
                let order = self.deps.calculation_order_for_sheet(sheet);
                Ok(self.run_pass(order))
            }
        }
    }

    /// Recalculate every formula on `sheet`.
    pub fn calculate_sheet(&mut self, sheet: &str) -> Result<usize, EngineError> {
        self.ensure_attached(sheet)?;
        let order = self.deps.calculation_order_for_sheet(sheet);
        Ok(self.run_pass(order))
    }

    /// Recalculate every formula on every attached sheet.
    pub fn calculate_all(&mut self) -> usize {
        let order = self.deps.calculation_order();
        self.run_pass(order)
    }

    /// Set a named value and recalculate everything; variables are not tracked per formula.
    pub fn set_variable(&mut self, name: &str, value: CellValue) -> usize {
        self.env.set_variable(name, value);
        self.calculate_all()
    }

    fn run_pass(&mut self, groups: Vec<CalculationGroup>) -> usize {
        if groups.is_empty() {
            return 0;
        }
        if self.is_calculating {
            warn!("recalculation requested while one is running; dropped");
            return 0;
        }
        let _guard = PassGuard::new(&mut self.is_calculating);

        let groups: Vec<(Vec<VertexKey>, bool)> = groups
            .into_iter()
            .map(|group| {
                let keys = group
                    .vertices
                    .iter()
                    .filter_map(|id| self.deps.key_of(*id).cloned())
                    .collect();
                (keys, group.cyclic)
            })
            .collect();
        let mut ctx =
            ExecutionContext::for_pass(groups.iter().flat_map(|(keys, _)| keys.iter().cloned()));
        debug!("recalculation pass over {} group(s)", groups.len());

        let mut results = Vec::new();
        let evaluator = Evaluator::new(&self.env, &self.deps, EvaluationOptions::default());
        for (keys, cyclic) in groups {
            let mut circular = false;
            for key in keys {
                if let Some(value) = ctx.completed(&key) {
                    let value = value.clone();
                    results.push((key, value));
                    continue;
                }
                if circular {
                    let value = CellValue::Error(ErrorKind::Circular);
                    ctx.set_completed(key.clone(), value.clone());
                    results.push((key, value));
                    continue;
                }
                let Some(formula) = self.deps.formula(&key.sheet, key.row, key.col) else {
                    continue;
                };
                let value = evaluator.evaluate_cell(&key, formula, &mut ctx);
                circular = cyclic && value.is_circular();
                results.push((key, value));
            }
        }

        let evaluations = ctx.evaluations();
        self.env.begin_batch();
        for (key, value) in results {
            self.env.set_cell_value(&key.sheet, key.row, key.col, value);
        }
        self.env.end_batch();
        debug!("recalculation pass done: {evaluations} formula(s) evaluated");
        evaluations
    }

    fn ensure_attached(&self, sheet: &str) -> Result<(), EngineError> {
        if self.sheets.contains_key(sheet) {
            Ok(())
        } else {
            Err(EngineError::SheetNotAttached(sheet.to_string()))
        }
    }

    fn check_subscription(&self, subscription: &SheetSubscription) -> Result<(), EngineError> {
        match self.sheets.get(&subscription.sheet) {
            Some(token) if *token == subscription.token => Ok(()),
            _ => Err(EngineError::SheetNotAttached(subscription.sheet.clone())),
        }
    }
}

/// Marks a pass as running; cleared on drop so a panic unwinding out of the environment does
/// not leave the engine refusing every later pass.
struct PassGuard<'a> {
    flag: &'a mut bool,
}

impl<'a> PassGuard<'a> {
    fn new(flag: &'a mut bool) -> Self {
        *flag = true;
        Self { flag }
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        *self.flag = false;
    }
}
