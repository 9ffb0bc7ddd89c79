use std::collections::{BTreeMap, BTreeSet, HashSet};

use ahash::AHashMap;
use formula_refs::{Axis, Reference, Region};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use super::{DependencyGraph, RegionIndex, RegionRestoreData, VertexId, VertexKey};
use crate::eval::FormulaLookup;
use crate::formula::CellFormula;

/// A vertex position change made by a row/column edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexMove {
    pub id: VertexId,
    pub from: VertexKey,
    pub to: VertexKey,
}

/// The structural edit a restore record belongs to. `count` is negative for removals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftDescriptor {
    pub sheet: String,
    pub axis: Axis,
    pub index: u32,
    pub count: i64,
}

/// One reversible step of a graph mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphChange {
    VertexAdded {
        id: VertexId,
        key: VertexKey,
        formula: CellFormula,
    },
    VertexRemoved {
        id: VertexId,
        key: VertexKey,
        formula: CellFormula,
    },
    EdgeAdded {
        from: VertexId,
        to: VertexId,
    },
    EdgeRemoved {
        from: VertexId,
        to: VertexId,
    },
    VerticesMoved(Vec<VertexMove>),
    /// A formula whose references were rewritten; `old` is the formula as it was.
    FormulaReplaced {
        id: VertexId,
        old: CellFormula,
        new: CellFormula,
    },
    Regions {
        sheet: String,
        data: RegionRestoreData<VertexId>,
    },
    Shifted(ShiftDescriptor),
}

/// Inverse record returned by every mutating [`DependencyManager`] call.
///
/// Changes are kept in the order they were made and undone in reverse by
/// [`DependencyManager::restore`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RestoreData {
    changes: Vec<GraphChange>,
}

impl RestoreData {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> &[GraphChange] {
        &self.changes
    }

    pub fn append(&mut self, other: RestoreData) {
        self.changes.extend(other.changes);
    }

    fn push(&mut self, change: GraphChange) {
        self.changes.push(change);
    }

    pub fn vertices_added(&self) -> impl Iterator<Item = &VertexKey> {
        self.changes.iter().filter_map(|c| match c {
            GraphChange::VertexAdded { key, .. } => Some(key),
            _ => None,
        })
    }

    pub fn vertices_removed(&self) -> impl Iterator<Item = &VertexKey> {
        self.changes.iter().filter_map(|c| match c {
            GraphChange::VertexRemoved { key, .. } => Some(key),
            _ => None,
        })
    }

    pub fn edges_added(&self) -> impl Iterator<Item = (VertexId, VertexId)> + '_ {
        self.changes.iter().filter_map(|c| match c {
            GraphChange::EdgeAdded { from, to } => Some((*from, *to)),
            _ => None,
        })
    }

    pub fn edges_removed(&self) -> impl Iterator<Item = (VertexId, VertexId)> + '_ {
        self.changes.iter().filter_map(|c| match c {
            GraphChange::EdgeRemoved { from, to } => Some((*from, *to)),
            _ => None,
        })
    }

    pub fn shifts(&self) -> impl Iterator<Item = &ShiftDescriptor> {
        self.changes.iter().filter_map(|c| match c {
            GraphChange::Shifted(shift) => Some(shift),
            _ => None,
        })
    }

    /// Formulas as they were before their references were rewritten.
    pub fn formula_snapshots(&self) -> impl Iterator<Item = (VertexId, &CellFormula)> {
        self.changes.iter().filter_map(|c| match c {
            GraphChange::FormulaReplaced { id, old, .. } => Some((*id, old)),
            _ => None,
        })
    }
}

/// A group of vertices to evaluate together, in calculation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalculationGroup {
    pub vertices: Vec<VertexId>,
    /// More than one member, or a single member that reads itself.
    pub cyclic: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyKind {
    /// A vertex -> dependent edge.
    CalculationOrder,
    /// A region read by a formula.
    Region,
}

/// One dependency fact, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyInfo {
    pub kind: DependencyKind,
    pub precedent_sheet: String,
    pub precedent: Region,
    pub dependent_sheet: String,
    pub dependent: Region,
}

/// Id-free view of the manager's state, for comparing before/after an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSnapshot {
    /// Vertex position -> rendered formula.
    pub vertices: BTreeMap<VertexKey, String>,
    pub edges: BTreeSet<(VertexKey, VertexKey)>,
    /// Sheet -> sorted `(top, bottom, left, right, reader)` entries.
    pub regions: BTreeMap<String, Vec<(u32, u32, u32, u32, VertexKey)>>,
}

/// Keeps the dependency graph and the per-sheet region index consistent with the formulas
/// placed on each sheet.
#[derive(Debug, Default)]
pub struct DependencyManager {
    graph: DependencyGraph,
    regions: AHashMap<String, RegionIndex<VertexId>>,
}

impl DependencyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn formula(&self, sheet: &str, row: u32, col: u32) -> Option<&CellFormula> {
        let id = self.graph.id_of(&VertexKey::new(sheet, row, col))?;
        self.graph.vertex(id).map(|v| &v.formula)
    }

    pub fn vertex_id(&self, sheet: &str, row: u32, col: u32) -> Option<VertexId> {
        self.graph.id_of(&VertexKey::new(sheet, row, col))
    }

    pub fn key_of(&self, id: VertexId) -> Option<&VertexKey> {
        self.graph.vertex(id).map(|v| &v.key)
    }

    /// Place `formula` at a cell, replacing any formula already there.
    pub fn set_formula(
        &mut self,
        sheet: &str,
        row: u32,
        col: u32,
        formula: CellFormula,
    ) -> RestoreData {
        let mut restore = self.clear_formula(sheet, row, col);

        let key = VertexKey::new(sheet, row, col);
        let id = self.graph.add_vertex(key.clone(), formula.clone());
        restore.push(GraphChange::VertexAdded {
            id,
            key: key.clone(),
            formula: formula.clone(),
        });

        for reference in formula.references() {
            if reference.is_named() {
                warn!("named reference {reference} in {key} is not tracked for dependencies");
                continue;
            }
            if !reference.is_valid() {
                continue;
            }
            let Some(region) = reference.region() else {
                continue;
            };
            let target = reference.sheet_or(sheet);
            for precedent in self.graph.vertices_in(target, region) {
                self.add_edge(precedent, id, &mut restore);
            }
            let data = self
                .regions
                .entry(target.to_string())
                .or_default()
                .add(region, id);
            restore.push(GraphChange::Regions {
                sheet: target.to_string(),
                data,
            });
        }

        let dependents: BTreeSet<VertexId> = self
            .regions
            .get(sheet)
            .map(|index| index.get_data(Region::cell(row, col)).into_iter().collect())
            .unwrap_or_default();
        for dependent in dependents {
            self.add_edge(id, dependent, &mut restore);
        }

        restore
    }

    /// Remove the formula at a cell, with its edges and region registrations.
    pub fn clear_formula(&mut self, sheet: &str, row: u32, col: u32) -> RestoreData {
        let mut restore = RestoreData::default();
        let key = VertexKey::new(sheet, row, col);
        let Some(id) = self.graph.id_of(&key) else {
            return restore;
        };
        let Some(formula) = self.graph.vertex(id).map(|v| v.formula.clone()) else {
            return restore;
        };

        for reference in formula.references() {
            if reference.is_named() || !reference.is_valid() {
                continue;
            }
            let Some(region) = reference.region() else {
                continue;
            };
            let target = reference.sheet_or(sheet);
            if let Some(index) = self.regions.get_mut(target) {
                let data = index.delete(&[(region, id)]);
                if !data.is_empty() {
                    restore.push(GraphChange::Regions {
                        sheet: target.to_string(),
                        data,
                    });
                }
            }
        }

        for pred in self.graph.predecessors(id) {
            self.remove_edge(pred, id, &mut restore);
        }
        for succ in self.graph.successors(id) {
            self.remove_edge(id, succ, &mut restore);
        }

        if self.graph.remove_vertex(id).is_some() {
            restore.push(GraphChange::VertexRemoved { id, key, formula });
        }
        restore
    }

    /// Remove every formula on `sheet`.
    pub fn clear_sheet(&mut self, sheet: &str) -> RestoreData {
        let mut restore = RestoreData::default();
        for id in self.graph.vertices_in(sheet, Region::new(0, u32::MAX, 0, u32::MAX)) {
            if let Some(key) = self.key_of(id).cloned() {
                restore.append(self.clear_formula(&key.sheet, key.row, key.col));
            }
        }
        restore
    }

    /// Account for `count` rows/columns inserted before `index` on `sheet`.
    pub fn insert_row_col_at(
        &mut self,
        sheet: &str,
        index: u32,
        count: u32,
        axis: Axis,
    ) -> RestoreData {
        let mut restore = RestoreData::default();
        if count == 0 {
            return restore;
        }
        debug!("insert {count} {axis:?}(s) at {index} on {sheet}");
        restore.push(GraphChange::Shifted(ShiftDescriptor {
            sheet: sheet.to_string(),
            axis,
            index,
            count: i64::from(count),
        }));

        self.rewrite_readers(sheet, index, axis, &mut restore, |reference| {
            reference.insert_row_col(index, count, axis)
        });

        let moves: Vec<(VertexId, VertexKey)> = self
            .graph
            .vertices_in(sheet, Region::band_from(axis, index))
            .into_iter()
            .filter_map(|id| {
                let key = self.key_of(id)?;
                let to = shifted_key(key, axis, i64::from(count));
                Some((id, to))
            })
            .collect();
        self.move_vertices(moves, &mut restore);

        if let Some(regions) = self.regions.get_mut(sheet) {
            let data = regions.insert_row_col_at(index, count, axis);
            if !data.is_empty() {
                restore.push(GraphChange::Regions {
                    sheet: sheet.to_string(),
                    data,
                });
            }
        }
        restore
    }

    /// Account for `count` rows/columns removed at `index` on `sheet`.
    ///
    /// Formulas inside the band are cleared, references into it are clipped or invalidated, and
    /// everything after it moves back.
    pub fn remove_row_col_at(
        &mut self,
        sheet: &str,
        index: u32,
        count: u32,
        axis: Axis,
    ) -> RestoreData {
        let mut restore = RestoreData::default();
        if count == 0 {
            return restore;
        }
        debug!("remove {count} {axis:?}(s) at {index} on {sheet}");
        restore.push(GraphChange::Shifted(ShiftDescriptor {
            sheet: sheet.to_string(),
            axis,
            index,
            count: -i64::from(count),
        }));

        let last = index.saturating_add(count - 1);
        for id in self.graph.vertices_in(sheet, Region::band(axis, index, last)) {
            if let Some(key) = self.key_of(id).cloned() {
                restore.append(self.clear_formula(&key.sheet, key.row, key.col));
            }
        }

        self.rewrite_readers(sheet, index, axis, &mut restore, |reference| {
            reference.remove_row_col(index, count, axis)
        });

        let moves: Vec<(VertexId, VertexKey)> = match last.checked_add(1) {
            Some(after) => self
                .graph
                .vertices_in(sheet, Region::band_from(axis, after))
                .into_iter()
                .filter_map(|id| {
                    let key = self.key_of(id)?;
                    Some((id, shifted_key(key, axis, -i64::from(count))))
                })
                .collect(),
            None => Vec::new(),
        };
        self.move_vertices(moves, &mut restore);

        if let Some(regions) = self.regions.get_mut(sheet) {
            let data = regions.remove_row_col_at(index, count, axis);
            if !data.is_empty() {
                restore.push(GraphChange::Regions {
                    sheet: sheet.to_string(),
                    data,
                });
            }
        }
        restore
    }

    /// Replace the formulas of every vertex reading `sheet` at or after `index`, mapping each of
    /// their references into `sheet` through `map`.
    fn rewrite_readers<F>(
        &mut self,
        sheet: &str,
        index: u32,
        axis: Axis,
        restore: &mut RestoreData,
        map: F,
    ) where
        F: Fn(&Reference) -> Reference,
    {
        let readers = self.readers_of(sheet, Region::band_from(axis, index));

        for id in readers {
            let Some(vertex) = self.graph.vertex(id) else {
                continue;
            };
            let old = vertex.formula.clone();
            let formula_sheet = vertex.key.sheet.as_str();
            let references: Vec<_> = old
                .references()
                .iter()
                .map(|r| {
                    if r.sheet_or(formula_sheet) == sheet {
                        map(r)
                    } else {
                        r.clone()
                    }
                })
                .collect();
            if references.as_slice() == old.references() {
                continue;
            }
            let new = old.with_references(references);
            trace!("rewrote references of {}", vertex.key);
            self.graph.replace_formula(id, new.clone());
            restore.push(GraphChange::FormulaReplaced { id, old, new });
        }
    }

    fn move_vertices(&mut self, moves: Vec<(VertexId, VertexKey)>, restore: &mut RestoreData) {
        if moves.is_empty() {
            return;
        }
        let record: Vec<VertexMove> = moves
            .iter()
            .filter_map(|(id, to)| {
                Some(VertexMove {
                    id: *id,
                    from: self.key_of(*id)?.clone(),
                    to: to.clone(),
                })
            })
            .collect();
        self.graph.move_vertices(&moves);
        restore.push(GraphChange::VerticesMoved(record));
    }

    fn add_edge(&mut self, from: VertexId, to: VertexId, restore: &mut RestoreData) {
        if self.graph.add_edge(from, to) {
            trace!("edge {from:?} -> {to:?}");
            restore.push(GraphChange::EdgeAdded { from, to });
        }
    }

    fn remove_edge(&mut self, from: VertexId, to: VertexId, restore: &mut RestoreData) {
        if self.graph.remove_edge(from, to) {
            restore.push(GraphChange::EdgeRemoved { from, to });
        }
    }

    /// Undo a record returned by this manager. Records must be restored newest first.
    pub fn restore(&mut self, data: &RestoreData) {
        for change in data.changes.iter().rev() {
            match change {
                GraphChange::VertexAdded { id, .. } => {
                    self.graph.remove_vertex(*id);
                }
                GraphChange::VertexRemoved { id, key, formula } => {
                    self.graph.insert_vertex(*id, key.clone(), formula.clone());
                }
                GraphChange::EdgeAdded { from, to } => {
                    self.graph.remove_edge(*from, *to);
                }
                GraphChange::EdgeRemoved { from, to } => {
                    self.graph.add_edge(*from, *to);
                }
                GraphChange::VerticesMoved(moves) => {
                    let back: Vec<_> = moves.iter().map(|m| (m.id, m.from.clone())).collect();
                    self.graph.move_vertices(&back);
                }
                GraphChange::FormulaReplaced { id, old, .. } => {
                    self.graph.replace_formula(*id, old.clone());
                }
                GraphChange::Regions { sheet, data } => {
                    self.regions.entry(sheet.clone()).or_default().restore(data);
                }
                GraphChange::Shifted(_) => {}
            }
        }
    }

    /// Whether any formula reads, or sits in, `region` of `sheet`.
    pub fn has_dependents(&self, sheet: &str, region: Region) -> bool {
        self.regions.get(sheet).is_some_and(|index| index.any(region))
            || !self.graph.vertices_in(sheet, region).is_empty()
    }

    pub fn has_dependents_at(&self, sheet: &str, row: u32, col: u32) -> bool {
        self.has_dependents(sheet, Region::cell(row, col))
    }

    /// Vertices whose formula reads `region` of `sheet`.
    pub fn readers_of(&self, sheet: &str, region: Region) -> BTreeSet<VertexId> {
        self.regions
            .get(sheet)
            .map(|index| index.get_data(region).into_iter().collect())
            .unwrap_or_default()
    }

    /// Every vertex, grouped into strongly connected components, precedents first.
    pub fn calculation_order(&self) -> Vec<CalculationGroup> {
        self.groups(self.graph.strongly_connected_components())
    }

    /// Calculation order restricted to `roots` and everything downstream of them.
    pub fn calculation_order_from(
        &self,
        roots: impl IntoIterator<Item = VertexId>,
    ) -> Vec<CalculationGroup> {
        let reachable: HashSet<VertexId> = self.graph.reachable_from(roots);
        if reachable.is_empty() {
            return Vec::new();
        }
        let components = self
            .graph
            .strongly_connected_components()
            .into_iter()
            .filter(|component| component.iter().any(|id| reachable.contains(id)))
            .collect();
        self.groups(components)
    }

    /// Calculation order restricted to formulas on `sheet`.
    pub fn calculation_order_for_sheet(&self, sheet: &str) -> Vec<CalculationGroup> {
        self.calculation_order()
            .into_iter()
            .filter_map(|group| {
                let vertices: Vec<_> = group
                    .vertices
                    .into_iter()
                    .filter(|id| self.key_of(*id).is_some_and(|k| k.sheet == sheet))
                    .collect();
                (!vertices.is_empty()).then_some(CalculationGroup {
                    vertices,
                    cyclic: group.cyclic,
                })
            })
            .collect()
    }

    fn groups(&self, components: Vec<Vec<VertexId>>) -> Vec<CalculationGroup> {
        components
            .into_iter()
            .map(|vertices| {
                let cyclic = vertices.len() > 1
                    || vertices
                        .first()
                        .is_some_and(|id| self.graph.has_edge(*id, *id));
                CalculationGroup { vertices, cyclic }
            })
            .collect()
    }

    /// Vertices whose formula calls a volatile function.
    pub fn volatile_vertices(&self) -> Vec<VertexId> {
        let mut out: Vec<_> = self
            .graph
            .vertices()
            .filter(|v| v.formula.contains_volatile_call())
            .map(|v| v.id)
            .collect();
        out.sort_unstable();
        out
    }

    /// Every edge and every region registration, for diagnostics.
    pub fn dependencies(&self) -> Vec<DependencyInfo> {
        let mut out = Vec::new();
        for (from, to) in self.graph.edges() {
            let (Some(from), Some(to)) = (self.key_of(from), self.key_of(to)) else {
                continue;
            };
            out.push(DependencyInfo {
                kind: DependencyKind::CalculationOrder,
                precedent_sheet: from.sheet.clone(),
                precedent: from.region(),
                dependent_sheet: to.sheet.clone(),
                dependent: to.region(),
            });
        }

        let mut sheets: Vec<_> = self.regions.keys().collect();
        sheets.sort();
        for sheet in sheets {
            let Some(index) = self.regions.get(sheet) else {
                continue;
            };
            let mut facts: Vec<_> = index
                .iter()
                .filter_map(|(region, id)| {
                    let key = self.key_of(*id)?;
                    Some(DependencyInfo {
                        kind: DependencyKind::Region,
                        precedent_sheet: sheet.clone(),
                        precedent: region,
                        dependent_sheet: key.sheet.clone(),
                        dependent: key.region(),
                    })
                })
                .collect();
            facts.sort_by_key(|f| {
                (
                    f.precedent.top,
                    f.precedent.left,
                    f.precedent.bottom,
                    f.precedent.right,
                    f.dependent_sheet.clone(),
                    f.dependent.top,
                    f.dependent.left,
                )
            });
            out.extend(facts);
        }
        out
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let vertices = self
            .graph
            .vertices()
            .map(|v| (v.key.clone(), v.formula.to_formula_string()))
            .collect();
        let edges = self
            .graph
            .edges()
            .into_iter()
            .filter_map(|(from, to)| Some((self.key_of(from)?.clone(), self.key_of(to)?.clone())))
            .collect();
        let regions = self
            .regions
            .iter()
            .filter(|(_, index)| !index.is_empty())
            .map(|(sheet, index)| {
                let mut entries: Vec<_> = index
                    .iter()
                    .filter_map(|(r, id)| {
                        Some((r.top, r.bottom, r.left, r.right, self.key_of(*id)?.clone()))
                    })
                    .collect();
                entries.sort();
                (sheet.clone(), entries)
            })
            .collect();
        GraphSnapshot {
            vertices,
            edges,
            regions,
        }
    }
}

fn shifted_key(key: &VertexKey, axis: Axis, delta: i64) -> VertexKey {
    let apply = |value: u32| {
        u32::try_from((i64::from(value) + delta).max(0)).unwrap_or(u32::MAX)
    };
    match axis {
        Axis::Row => VertexKey::new(key.sheet.clone(), apply(key.row), key.col),
        Axis::Col => VertexKey::new(key.sheet.clone(), key.row, apply(key.col)),
    }
}

impl FormulaLookup for DependencyManager {
    fn formula_at(&self, sheet: &str, row: u32, col: u32) -> Option<&CellFormula> {
        self.formula(sheet, row, col)
    }

    fn formula_cells_in(&self, sheet: &str, region: Region) -> Vec<(u32, u32)> {
        self.graph
            .vertices_in(sheet, region)
            .into_iter()
            .filter_map(|id| self.key_of(id).map(|k| (k.row, k.col)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use pretty_assertions::assert_eq;

    fn formula(text: &str) -> CellFormula {
        CellFormula::parse(text, &FunctionRegistry::with_builtins())
    }

    fn key(row: u32, col: u32) -> VertexKey {
        VertexKey::new("S", row, col)
    }

    #[test]
    fn edges_follow_references_in_both_directions() {
        let mut deps = DependencyManager::new();
        // B1 reads A1 before A1 holds a formula; placing A1 later must link it.
        deps.set_formula("S", 0, 1, formula("=A1+1"));
        deps.set_formula("S", 0, 0, formula("=5"));
        deps.set_formula("S", 0, 2, formula("=SUM(A1:B1)"));

        let snapshot = deps.snapshot();
        let edges: Vec<_> = snapshot.edges.into_iter().collect();
        assert_eq!(
            edges,
            vec![
                (key(0, 0), key(0, 1)),
                (key(0, 0), key(0, 2)),
                (key(0, 1), key(0, 2)),
            ]
        );
    }

    #[test]
    fn replacing_a_formula_rebuilds_its_edges() {
        let mut deps = DependencyManager::new();
        deps.set_formula("S", 0, 0, formula("=1"));
        deps.set_formula("S", 1, 0, formula("=2"));
        deps.set_formula("S", 2, 0, formula("=A1"));
        deps.set_formula("S", 2, 0, formula("=A2"));
        let edges: Vec<_> = deps.snapshot().edges.into_iter().collect();
        assert_eq!(edges, vec![(key(1, 0), key(2, 0))]);
        assert_eq!(deps.graph().len(), 3);
    }

    #[test]
    fn clear_formula_unregisters_regions() {
        let mut deps = DependencyManager::new();
        deps.set_formula("S", 5, 5, formula("=A1:B2"));
        assert!(deps.has_dependents_at("S", 1, 1));
        deps.clear_formula("S", 5, 5);
        assert!(!deps.has_dependents_at("S", 1, 1));
        assert!(!deps.has_dependents_at("S", 5, 5));
        assert!(deps.dependencies().is_empty());
    }

    #[test]
    fn self_reference_is_a_cyclic_singleton() {
        let mut deps = DependencyManager::new();
        deps.set_formula("S", 0, 0, formula("=A1"));
        let order = deps.calculation_order();
        assert_eq!(order.len(), 1);
        assert!(order[0].cyclic);
    }

    #[test]
    fn cross_sheet_references_register_on_the_target_sheet() {
        let mut deps = DependencyManager::new();
        deps.set_formula("S", 0, 0, formula("=Other!B2"));
        assert!(deps.has_dependents_at("Other", 1, 1));
        assert!(!deps.has_dependents_at("S", 1, 1));

        deps.set_formula("Other", 1, 1, formula("=7"));
        assert_eq!(
            deps.snapshot().edges.into_iter().collect::<Vec<_>>(),
            vec![(VertexKey::new("Other", 1, 1), key(0, 0))]
        );
    }

    #[test]
    fn named_references_add_nothing() {
        use crate::ast::Expr;
        use crate::formula::SyntaxTree;

        let named = CellFormula::from_tree(SyntaxTree {
            root: Expr::Reference(0),
            references: vec![Reference::named("rate")],
            errors: Vec::new(),
        });
        let mut deps = DependencyManager::new();
        deps.set_formula("S", 0, 0, named);
        assert_eq!(deps.graph().edge_count(), 0);
        assert_eq!(deps.dependencies().len(), 0);
    }

    #[test]
    fn inserting_rows_moves_vertices_and_references() {
        let mut deps = DependencyManager::new();
        deps.set_formula("S", 0, 0, formula("=A3+A5"));
        deps.set_formula("S", 4, 0, formula("=A3"));
        let restore = deps.insert_row_col_at("S", 2, 2, Axis::Row);

        assert_eq!(deps.formula("S", 0, 0).map(|f| f.to_formula_string()), Some("=A5+A7".into()));
        assert_eq!(deps.formula("S", 6, 0).map(|f| f.to_formula_string()), Some("=A5".into()));
        assert!(deps.formula("S", 4, 0).is_none());
        assert_eq!(restore.shifts().count(), 1);
        assert_eq!(restore.formula_snapshots().count(), 2);
        let edges: Vec<_> = deps.snapshot().edges.into_iter().collect();
        assert_eq!(edges, vec![(key(6, 0), key(0, 0))]);
    }

    #[test]
    fn removing_rows_clears_invalidates_and_shifts() {
        let mut deps = DependencyManager::new();
        deps.set_formula("S", 1, 0, formula("=1"));
        deps.set_formula("S", 3, 0, formula("=A2*2"));
        deps.set_formula("S", 5, 0, formula("=A4+SUM(A1:A3)"));

        let restore = deps.remove_row_col_at("S", 1, 1, Axis::Row);
        assert_eq!(restore.vertices_removed().count(), 1);
        assert_eq!(deps.formula("S", 2, 0).map(|f| f.to_formula_string()), Some("=#REF!*2".into()));
        assert_eq!(
            deps.formula("S", 4, 0).map(|f| f.to_formula_string()),
            Some("=A3+SUM(A1:A2)".into())
        );
        let edges: Vec<_> = deps.snapshot().edges.into_iter().collect();
        assert_eq!(edges, vec![(key(2, 0), key(4, 0))]);
        assert!(!deps.has_dependents_at("S", 0, 5));
    }

    #[test]
    fn restore_undoes_structural_edits() {
        let mut deps = DependencyManager::new();
        deps.set_formula("S", 1, 0, formula("=1"));
        deps.set_formula("S", 3, 0, formula("=A2*2"));
        deps.set_formula("S", 5, 0, formula("=A4+SUM(A1:A3)+Other!A9"));
        let before = deps.snapshot();

        let removed = deps.remove_row_col_at("S", 1, 1, Axis::Row);
        let inserted = deps.insert_row_col_at("S", 0, 3, Axis::Row);
        let replaced = deps.set_formula("S", 0, 0, formula("=B1"));
        deps.restore(&replaced);
        deps.restore(&inserted);
        deps.restore(&removed);

        assert_eq!(deps.snapshot(), before);
    }

    #[test]
    fn targeted_order_covers_only_downstream_vertices() {
        let mut deps = DependencyManager::new();
        deps.set_formula("S", 0, 0, formula("=1"));
        deps.set_formula("S", 0, 1, formula("=A1"));
        deps.set_formula("S", 0, 2, formula("=B1"));
        deps.set_formula("S", 5, 5, formula("=2"));

        let root = deps.vertex_id("S", 0, 1).unwrap();
        let order: Vec<_> = deps
            .calculation_order_from([root])
            .into_iter()
            .flat_map(|g| g.vertices)
            .map(|id| deps.key_of(id).cloned().unwrap())
            .collect();
        assert_eq!(order, vec![key(0, 1), key(0, 2)]);
    }
}
