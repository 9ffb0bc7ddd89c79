use std::collections::HashMap;

use formula_calc::{Axis, CellFormula, DependencyManager, FunctionRegistry, GraphSnapshot};
use formula_refs::col_to_name;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

const SHEET: &str = "S";
const ROWS: u32 = 10;
const COLS: u32 = 6;

fn cell_text(row: u32, col: u32) -> String {
    format!("{}{}", col_to_name(col), row + 1)
}

/// One reference, rendered as formula text.
fn arb_reference() -> impl Strategy<Value = String> {
    prop_oneof![
        (0..ROWS, 0..COLS).prop_map(|(r, c)| cell_text(r, c)),
        (0..ROWS, 0..COLS, 0..4u32, 0..3u32).prop_map(|(r, c, h, w)| format!(
            "{}:{}",
            cell_text(r, c),
            cell_text(r + h, c + w)
        )),
        (0..ROWS, 0..3u32).prop_map(|(r, h)| format!("{}:{}", r + 1, r + h + 1)),
        (0..COLS, 0..2u32).prop_map(|(c, w)| format!(
            "{}:{}",
            col_to_name(c),
            col_to_name(c + w)
        )),
        (0..ROWS, 0..COLS).prop_map(|(r, c)| format!("Other!{}", cell_text(r, c))),
    ]
}

fn arb_formula() -> impl Strategy<Value = String> {
    prop::collection::vec(arb_reference(), 1..4)
        .prop_map(|refs| format!("=SUM({})", refs.join(",")))
}

#[derive(Debug, Clone)]
enum Op {
    Set { row: u32, col: u32, text: String },
    Clear { row: u32, col: u32 },
    Insert { index: u32, count: u32, axis: Axis },
    Remove { index: u32, count: u32, axis: Axis },
}

fn arb_axis() -> impl Strategy<Value = Axis> {
    prop_oneof![Just(Axis::Row), Just(Axis::Col)]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..ROWS, 0..COLS, arb_formula()).prop_map(|(row, col, text)| Op::Set { row, col, text }),
        1 => (0..ROWS, 0..COLS).prop_map(|(row, col)| Op::Clear { row, col }),
        1 => (0..ROWS, 1..3u32, arb_axis()).prop_map(|(index, count, axis)| Op::Insert { index, count, axis }),
        1 => (0..ROWS, 1..3u32, arb_axis()).prop_map(|(index, count, axis)| Op::Remove { index, count, axis }),
    ]
}

fn populated(formulas: &[(u32, u32, String)]) -> DependencyManager {
    let functions = FunctionRegistry::with_builtins();
    let mut deps = DependencyManager::new();
    for (row, col, text) in formulas {
        deps.set_formula(SHEET, *row, *col, CellFormula::parse(text, &functions));
    }
    deps
}

fn arb_placements() -> impl Strategy<Value = Vec<(u32, u32, String)>> {
    prop::collection::vec((0..ROWS, 0..COLS, arb_formula()), 0..8)
}

proptest! {
    #[test]
    fn has_dependents_matches_reference_regions(text in arb_formula()) {
        let functions = FunctionRegistry::with_builtins();
        let formula = CellFormula::parse(&text, &functions);
        let mut deps = DependencyManager::new();
        deps.set_formula(SHEET, 50, 50, formula.clone());

        let regions: Vec<_> = formula
            .references()
            .iter()
            .filter(|r| r.sheet().is_none())
            .filter_map(|r| r.region())
            .collect();
        for row in 0..ROWS + 4 {
            for col in 0..COLS + 4 {
                let expected = regions.iter().any(|r| r.contains(row, col));
                prop_assert_eq!(deps.has_dependents_at(SHEET, row, col), expected, "{} at {}", text, cell_text(row, col));
            }
        }
    }

    #[test]
    fn restore_undoes_every_operation(
        initial in arb_placements(),
        ops in prop::collection::vec(arb_op(), 1..8),
    ) {
        let functions = FunctionRegistry::with_builtins();
        let mut deps = populated(&initial);

        let mut history: Vec<(GraphSnapshot, _)> = Vec::new();
        for op in ops {
            let before = deps.snapshot();
            let restore = match op {
                Op::Set { row, col, text } => {
                    deps.set_formula(SHEET, row, col, CellFormula::parse(&text, &functions))
                }
                Op::Clear { row, col } => deps.clear_formula(SHEET, row, col),
                Op::Insert { index, count, axis } => deps.insert_row_col_at(SHEET, index, count, axis),
                Op::Remove { index, count, axis } => deps.remove_row_col_at(SHEET, index, count, axis),
            };
            history.push((before, restore));
        }

        for (before, restore) in history.into_iter().rev() {
            deps.restore(&restore);
            prop_assert_eq!(deps.snapshot(), before);
        }
    }

    #[test]
    fn insert_then_remove_restores_references(
        initial in arb_placements(),
        index in 0..ROWS,
        count in 1..4u32,
        axis in arb_axis(),
    ) {
        let mut deps = populated(&initial);
        let before = deps.snapshot();
        deps.insert_row_col_at(SHEET, index, count, axis);
        deps.remove_row_col_at(SHEET, index, count, axis);
        prop_assert_eq!(deps.snapshot(), before);
    }

    #[test]
    fn calculation_order_puts_precedents_first(initial in arb_placements()) {
        let deps = populated(&initial);
        let order = deps.calculation_order();
        let group_of: HashMap<_, _> = order
            .iter()
            .enumerate()
            .flat_map(|(i, group)| group.vertices.iter().map(move |id| (*id, i)))
            .collect();
        prop_assert_eq!(group_of.len(), deps.graph().len());

        for (from, to) in deps.graph().edges() {
            let (a, b) = (group_of[&from], group_of[&to]);
            prop_assert!(a <= b, "edge {:?} -> {:?} runs backwards", from, to);
            if a == b {
                prop_assert!(order[a].cyclic);
            }
        }
    }
}

#[test]
fn ordering_of_a_fixed_chain() {
    let deps = populated(&[
        (2, 0, "=A2".to_string()),
        (1, 0, "=A1".to_string()),
        (0, 0, "=B1".to_string()),
    ]);
    let keys: Vec<String> = deps
        .calculation_order()
        .iter()
        .flat_map(|g| g.vertices.iter())
        .filter_map(|id| deps.key_of(*id))
        .map(ToString::to_string)
        .collect();
    assert_eq!(keys, vec!["S!A1", "S!A2", "S!A3"]);
}
