use std::cmp::Ordering;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

use formula_refs::{ReferenceKind, Region, MAX_INDEX};
use log::{trace, warn};
use smallvec::SmallVec;

use super::{EvaluationOptions, ExecutionContext, FormulaLookup};
use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::environment::Environment;
use crate::formula::CellFormula;
use crate::functions::{FunctionSpec, ValueType};
use crate::graph::VertexKey;
use crate::value::{CellValue, ErrorKind};

/// Largest range (in cells) a reference may expand to; bigger ranges evaluate to `#VALUE!`.
pub const MAX_MATERIALIZED_ARRAY_CELLS: u64 = 5_000_000;

/// Tree-walking evaluator over an environment and the formulas placed in it.
///
/// Evaluation never fails: every problem becomes a [`CellValue::Error`].
pub struct Evaluator<'a, E: Environment + ?Sized, L: FormulaLookup + ?Sized> {
    env: &'a E,
    formulas: &'a L,
    options: EvaluationOptions,
}

impl<'a, E: Environment + ?Sized, L: FormulaLookup + ?Sized> Evaluator<'a, E, L> {
    pub fn new(env: &'a E, formulas: &'a L, options: EvaluationOptions) -> Self {
        Self {
            env,
            formulas,
            options,
        }
    }

    /// Evaluate `formula` as if placed on `sheet`.
    pub fn evaluate(
        &self,
        sheet: &str,
        formula: &CellFormula,
        ctx: &mut ExecutionContext,
    ) -> CellValue {
        self.eval(sheet, formula, formula.root(), ctx).into_scalar()
    }

    /// Evaluate the formula placed at `key`, tracking it in `ctx`.
    pub fn evaluate_cell(
        &self,
        key: &VertexKey,
        formula: &CellFormula,
        ctx: &mut ExecutionContext,
    ) -> CellValue {
        ctx.begin(key.clone());
        let value = self.evaluate(&key.sheet, formula, ctx);
        trace!("evaluated {key} = {value}");
        ctx.finish(key.clone(), value.clone());
        value
    }

    fn eval(
        &self,
        sheet: &str,
        formula: &CellFormula,
        expr: &Expr,
        ctx: &mut ExecutionContext,
    ) -> CellValue {
        match expr {
            Expr::Literal(value) => value.clone(),
            Expr::Array(rows) => CellValue::Array(rows.clone()),
            Expr::Paren(inner) => self.eval(sheet, formula, inner, ctx),
            Expr::Unary { op, operand } => {
                unary(*op, self.eval(sheet, formula, operand, ctx))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(sheet, formula, left, ctx);
                let right = self.eval(sheet, formula, right, ctx);
                binary(*op, left, right)
            }
            Expr::Variable(name) => self
                .env
                .variable(name)
                .unwrap_or(CellValue::Error(ErrorKind::Name)),
            Expr::FunctionCall {
                name,
                args,
                function,
            } => self.call(sheet, formula, name, args, function.as_ref(), ctx),
            Expr::Reference(index) => self.reference_value(sheet, formula, *index, ctx),
        }
    }

    fn call(
        &self,
        sheet: &str,
        formula: &CellFormula,
        name: &str,
        args: &[Expr],
        function: Option<&FunctionSpec>,
        ctx: &mut ExecutionContext,
    ) -> CellValue {
        let Some(spec) = function else {
            return CellValue::Error(ErrorKind::Name);
        };
        if !spec.accepts_arity(args.len()) {
            return CellValue::Error(ErrorKind::Value);
        }

        let mut values: SmallVec<[CellValue; 4]> = SmallVec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let value = self.eval(sheet, formula, arg, ctx);
            let coerced = match spec.arg_type(i) {
                ValueType::Any => Ok(value),
                ValueType::Number => scalar(value).coerce_to_number().map(CellValue::Number),
                ValueType::Text => scalar(value).coerce_to_text().map(CellValue::Text),
                ValueType::Bool => scalar(value).coerce_to_bool().map(CellValue::Logical),
            };
            match coerced {
                Ok(v) => values.push(v),
                Err(e) => return CellValue::Error(e),
            }
        }

        let implementation = spec.implementation;
        match panic::catch_unwind(AssertUnwindSafe(|| implementation(&values))) {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                warn!("{name} failed: {err}");
                CellValue::Error(ErrorKind::NA)
            }
            Err(_) => {
                warn!("{name} panicked");
                CellValue::Error(ErrorKind::NA)
            }
        }
    }

    fn reference_value(
        &self,
        sheet: &str,
        formula: &CellFormula,
        index: usize,
        ctx: &mut ExecutionContext,
    ) -> CellValue {
        let Some(reference) = formula.references().get(index) else {
            return CellValue::Error(ErrorKind::Ref);
        };
        if !self.options.resolve_references {
            return CellValue::Reference(reference.clone());
        }
        if !reference.is_valid() {
            return CellValue::Error(ErrorKind::Ref);
        }
        if let ReferenceKind::Named(name) = reference.kind() {
            return self
                .env
                .variable(name)
                .unwrap_or(CellValue::Error(ErrorKind::Name));
        }

        let target = reference.sheet_or(sheet);
        if !self.env.sheet_exists(target) {
            return CellValue::Error(ErrorKind::Ref);
        }
        let Some(region) = reference.region() else {
            return CellValue::Error(ErrorKind::Ref);
        };
        match reference.kind() {
            ReferenceKind::Cell(_) => self.read_cell(target, region.top, region.left, ctx),
            _ => self.read_region(target, region, ctx),
        }
    }

    fn read_cell(&self, sheet: &str, row: u32, col: u32, ctx: &mut ExecutionContext) -> CellValue {
        if let Some(formula) = self.formulas.formula_at(sheet, row, col) {
            let key = VertexKey::new(sheet, row, col);
            if ctx.is_in_progress(&key) {
                return CellValue::Error(ErrorKind::Circular);
            }
            if let Some(value) = ctx.completed(&key) {
                return value.clone();
            }
            if ctx.is_pending(&key) {
                if ctx.at_depth_limit() {
                    trace!("{key} read at evaluation depth {}; treated as circular", ctx.depth());
                    return CellValue::Error(ErrorKind::Circular);
                }
                return self.evaluate_cell(&key, formula, ctx);
            }
        }
        self.env.cell_value(sheet, row, col)
    }

    /// Materialize a range row-major. Unbounded sides are clipped to the used part of the sheet.
    fn read_region(&self, sheet: &str, region: Region, ctx: &mut ExecutionContext) -> CellValue {
        let formula_cells: HashSet<(u32, u32)> = self
            .formulas
            .formula_cells_in(sheet, region)
            .into_iter()
            .collect();

        let mut bottom = region.bottom;
        let mut right = region.right;
        if bottom == MAX_INDEX || right == MAX_INDEX {
            let extent = formula_cells
                .iter()
                .copied()
                .chain(self.env.used_extent(sheet))
                .reduce(|(r1, c1), (r2, c2)| (r1.max(r2), c1.max(c2)));
            let Some((max_row, max_col)) = extent else {
                return CellValue::Array(Vec::new());
            };
            if bottom == MAX_INDEX {
                bottom = max_row;
            }
            if right == MAX_INDEX {
                right = max_col;
            }
        }
        if region.top > bottom || region.left > right {
            return CellValue::Array(Vec::new());
        }

        let cells = (u64::from(bottom) - u64::from(region.top) + 1)
            * (u64::from(right) - u64::from(region.left) + 1);
        if cells > MAX_MATERIALIZED_ARRAY_CELLS {
            warn!("range {region} on {sheet} is too large to evaluate ({cells} cells)");
            return CellValue::Error(ErrorKind::Value);
        }

        let rows = (region.top..=bottom)
            .map(|row| {
                (region.left..=right)
                    .map(|col| {
                        if formula_cells.contains(&(row, col)) {
                            self.read_cell(sheet, row, col, ctx)
                        } else {
                            self.env.cell_value(sheet, row, col)
                        }
                    })
                    .collect()
            })
            .collect();
        CellValue::Array(rows)
    }
}

/// Collapse to a single value; multi-cell arrays and raw references are `#VALUE!`.
fn scalar(value: CellValue) -> CellValue {
    match value.into_scalar() {
        CellValue::Array(_) | CellValue::Reference(_) => CellValue::Error(ErrorKind::Value),
        other => other,
    }
}

fn unary(op: UnaryOp, operand: CellValue) -> CellValue {
    let operand = scalar(operand);
    if let CellValue::Error(e) = operand {
        return CellValue::Error(e);
    }
    if op == UnaryOp::Plus {
        return operand;
    }
    match operand.coerce_to_number() {
        Ok(n) if op == UnaryOp::Minus => CellValue::Number(-n),
        Ok(n) => CellValue::Number(n / 100.0),
        Err(e) => CellValue::Error(e),
    }
}

fn binary(op: BinaryOp, left: CellValue, right: CellValue) -> CellValue {
    let left = scalar(left);
    let right = scalar(right);
    if let CellValue::Error(e) = left {
        return CellValue::Error(e);
    }
    if let CellValue::Error(e) = right {
        return CellValue::Error(e);
    }

    if op.is_comparison() {
        let Some(ordering) = compare_values(&left, &right) else {
            return CellValue::Error(ErrorKind::Value);
        };
        let result = match op {
            BinaryOp::Eq => ordering == Ordering::Equal,
            BinaryOp::Ne => ordering != Ordering::Equal,
            BinaryOp::Lt => ordering == Ordering::Less,
            BinaryOp::Gt => ordering == Ordering::Greater,
            BinaryOp::Le => ordering != Ordering::Greater,
            _ => ordering != Ordering::Less,
        };
        return CellValue::Logical(result);
    }

    if op == BinaryOp::Concat {
        return match (left.coerce_to_text(), right.coerce_to_text()) {
            (Ok(a), Ok(b)) => CellValue::Text(a + &b),
            (Err(e), _) | (_, Err(e)) => CellValue::Error(e),
        };
    }

    let (a, b) = match (left.coerce_to_number(), right.coerce_to_number()) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) | (_, Err(e)) => return CellValue::Error(e),
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return CellValue::Error(ErrorKind::Div0);
            }
            a / b
        }
        _ => {
            if a == 0.0 && b < 0.0 {
                return CellValue::Error(ErrorKind::Div0);
            }
            a.powf(b)
        }
    };
    if result.is_finite() {
        CellValue::Number(result)
    } else {
        CellValue::Error(ErrorKind::Value)
    }
}

/// Order two scalars the way comparison operators do.
///
/// Empty takes the type of the other side; text compares case-insensitively; mixed types order
/// numbers before text before logicals. Returns `None` for values that cannot be compared.
pub fn compare_values(left: &CellValue, right: &CellValue) -> Option<Ordering> {
    fn rank(value: &CellValue) -> Option<u8> {
        match value {
            CellValue::Number(_) => Some(0),
            CellValue::Text(_) => Some(1),
            CellValue::Logical(_) => Some(2),
            _ => None,
        }
    }
    fn blank_like(other: &CellValue) -> CellValue {
        match other {
            CellValue::Number(_) => CellValue::Number(0.0),
            CellValue::Text(_) => CellValue::Text(String::new()),
            CellValue::Logical(_) => CellValue::Logical(false),
            _ => CellValue::Empty,
        }
    }

    let left = match left {
        CellValue::Empty => blank_like(right),
        other => other.clone(),
    };
    let right = match right {
        CellValue::Empty => blank_like(&left),
        other => other.clone(),
    };

    match (&left, &right) {
        (CellValue::Empty, CellValue::Empty) => Some(Ordering::Equal),
        (CellValue::Number(a), CellValue::Number(b)) => a.partial_cmp(b),
        (CellValue::Text(a), CellValue::Text(b)) => Some(a.to_lowercase().cmp(&b.to_lowercase())),
        (CellValue::Logical(a), CellValue::Logical(b)) => Some(a.cmp(b)),
        _ => Some(rank(&left)?.cmp(&rank(&right)?)),
    }
}
