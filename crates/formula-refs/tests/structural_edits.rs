use formula_refs::{Axis, CellAddress, ColAddress, Reference, Region, RowAddress};
use pretty_assertions::assert_eq;

fn a1(text: &str) -> CellAddress {
    CellAddress::from_a1(text).unwrap()
}

fn sample_references() -> Vec<Reference> {
    vec![
        Reference::cell(a1("A1")),
        Reference::cell(a1("$D$9")),
        Reference::cell_range(a1("B2"), a1("E7")),
        Reference::row_range(RowAddress::new(3, false), RowAddress::new(5, true)),
        Reference::col_range(ColAddress::new(1, false), ColAddress::new(1, false)),
        Reference::cell(a1("C3")).with_sheet(Some("Other".to_string())),
    ]
}

#[test]
fn insert_then_remove_restores_every_reference() {
    for axis in [Axis::Row, Axis::Col] {
        for index in 0..12 {
            for count in 1..4 {
                for r in sample_references() {
                    let back = r
                        .insert_row_col(index, count, axis)
                        .remove_row_col(index, count, axis);
                    assert_eq!(back, r, "axis={axis:?} index={index} count={count}");
                }
            }
        }
    }
}

#[test]
fn removing_rows_above_a_range_moves_it_up() {
    let r = Reference::cell_range(a1("B4"), a1("C6"));
    let moved = r.remove_row_col(0, 2, Axis::Row);
    assert_eq!(moved.to_string(), "B2:C4");
    assert_eq!(moved.region(), Some(Region::new(1, 3, 1, 2)));
}

#[test]
fn removing_part_of_a_range_shrinks_it() {
    let r = Reference::cell_range(a1("A2"), a1("A6"));
    assert_eq!(r.remove_row_col(3, 2, Axis::Row).to_string(), "A2:A4");
    assert_eq!(r.remove_row_col(0, 3, Axis::Row).to_string(), "A1:A3");
}

#[test]
fn column_reference_survives_row_edits() {
    let r = Reference::col_range(ColAddress::new(0, true), ColAddress::new(2, true));
    assert_eq!(r.insert_row_col(4, 10, Axis::Row), r);
    assert_eq!(r.remove_row_col(0, 100, Axis::Row), r);
    assert_eq!(r.to_string(), "$A:$C");
}
