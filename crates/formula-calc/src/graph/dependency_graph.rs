use std::collections::{BTreeSet, HashMap, HashSet};

use ahash::AHashMap;
use formula_refs::Region;
use rstar::{RTree, RTreeObject, AABB};

use super::{VertexId, VertexKey};
use crate::formula::CellFormula;

/// A formula-bearing cell.
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaVertex {
    pub id: VertexId,
    pub key: VertexKey,
    pub formula: CellFormula,
}

#[derive(Debug, Clone, Copy)]
struct PositionEntry {
    id: VertexId,
    point: [i64; 2],
}

impl PartialEq for PositionEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.point == other.point
    }
}

impl RTreeObject for PositionEntry {
    type Envelope = AABB<[i64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

fn point(key: &VertexKey) -> [i64; 2] {
    [i64::from(key.row), i64::from(key.col)]
}

/// Directed graph of formula vertices; an edge `a -> b` means `b` reads `a`.
///
/// Vertices live in an arena keyed by [`VertexId`]. The position -> id map and the per-sheet
/// R-tree of positions are secondary indexes patched whenever a vertex moves.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    vertices: HashMap<VertexId, FormulaVertex>,
    keys: HashMap<VertexKey, VertexId>,
    positions: AHashMap<String, RTree<PositionEntry>>,
    succs: HashMap<VertexId, BTreeSet<VertexId>>,
    preds: HashMap<VertexId, BTreeSet<VertexId>>,
    next_id: u64,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertex(&self, id: VertexId) -> Option<&FormulaVertex> {
        self.vertices.get(&id)
    }

    pub fn id_of(&self, key: &VertexKey) -> Option<VertexId> {
        self.keys.get(key).copied()
    }

    pub fn vertices(&self) -> impl Iterator<Item = &FormulaVertex> {
        self.vertices.values()
    }

    /// Vertex ids in ascending order.
    pub fn ids(&self) -> Vec<VertexId> {
        let mut ids: Vec<_> = self.vertices.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Add a vertex under a fresh id. The key must not be occupied.
    pub fn add_vertex(&mut self, key: VertexKey, formula: CellFormula) -> VertexId {
        let id = VertexId(self.next_id);
        self.next_id += 1;
        self.insert_vertex(id, key, formula);
        id
    }

    /// Re-insert a vertex under a known id (used when undoing a removal).
    pub fn insert_vertex(&mut self, id: VertexId, key: VertexKey, formula: CellFormula) {
        debug_assert!(!self.keys.contains_key(&key), "vertex key {key} already occupied");
        self.next_id = self.next_id.max(id.0 + 1);
        self.index_position(id, &key);
        self.keys.insert(key.clone(), id);
        self.vertices.insert(id, FormulaVertex { id, key, formula });
    }

    /// Remove a vertex and every edge touching it.
    pub fn remove_vertex(&mut self, id: VertexId) -> Option<FormulaVertex> {
        let vertex = self.vertices.remove(&id)?;
        self.keys.remove(&vertex.key);
        self.unindex_position(id, &vertex.key);
        for succ in self.succs.remove(&id).unwrap_or_default() {
            if let Some(set) = self.preds.get_mut(&succ) {
                set.remove(&id);
            }
        }
        for pred in self.preds.remove(&id).unwrap_or_default() {
            if let Some(set) = self.succs.get_mut(&pred) {
                set.remove(&id);
            }
        }
        Some(vertex)
    }

    /// Swap in a new formula, returning the old one.
    pub fn replace_formula(&mut self, id: VertexId, formula: CellFormula) -> Option<CellFormula> {
        let vertex = self.vertices.get_mut(&id)?;
        Some(std::mem::replace(&mut vertex.formula, formula))
    }

    /// Re-key a batch of vertices.
    ///
    /// All old positions are released before any new one is claimed, so vertices may move onto
    /// each other's former positions.
    pub fn move_vertices(&mut self, moves: &[(VertexId, VertexKey)]) {
        let mut moved = Vec::with_capacity(moves.len());
        for (id, to) in moves {
            let Some(vertex) = self.vertices.get(id) else {
                continue;
            };
            let from = vertex.key.clone();
            self.keys.remove(&from);
            self.unindex_position(*id, &from);
            moved.push((*id, to.clone()));
        }
        for (id, to) in moved {
            self.index_position(id, &to);
            self.keys.insert(to.clone(), id);
            if let Some(vertex) = self.vertices.get_mut(&id) {
                vertex.key = to;
            }
        }
    }

    /// Vertices on `sheet` whose cell lies in `region`, in ascending id order.
    pub fn vertices_in(&self, sheet: &str, region: Region) -> Vec<VertexId> {
        let Some(tree) = self.positions.get(sheet) else {
            return Vec::new();
        };
        let envelope = AABB::from_corners(
            [i64::from(region.top), i64::from(region.left)],
            [i64::from(region.bottom), i64::from(region.right)],
        );
        let mut out: Vec<_> = tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|e| e.id)
            .collect();
        out.sort_unstable();
        out
    }

    pub fn add_edge(&mut self, from: VertexId, to: VertexId) -> bool {
        if !self.vertices.contains_key(&from) || !self.vertices.contains_key(&to) {
            return false;
        }
        let added = self.succs.entry(from).or_default().insert(to);
        self.preds.entry(to).or_default().insert(from);
        added
    }

    pub fn remove_edge(&mut self, from: VertexId, to: VertexId) -> bool {
        let removed = self
            .succs
            .get_mut(&from)
            .is_some_and(|set| set.remove(&to));
        if let Some(set) = self.preds.get_mut(&to) {
            set.remove(&from);
        }
        removed
    }

    pub fn has_edge(&self, from: VertexId, to: VertexId) -> bool {
        self.succs.get(&from).is_some_and(|set| set.contains(&to))
    }

    /// Vertices that read `id`.
    pub fn successors(&self, id: VertexId) -> Vec<VertexId> {
        self.succs
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Vertices that `id` reads.
    pub fn predecessors(&self, id: VertexId) -> Vec<VertexId> {
        self.preds
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every edge as `(precedent, dependent)`, sorted.
    pub fn edges(&self) -> Vec<(VertexId, VertexId)> {
        let mut out: Vec<_> = self
            .succs
            .iter()
            .flat_map(|(from, tos)| tos.iter().map(move |to| (*from, *to)))
            .collect();
        out.sort_unstable();
        out
    }

    pub fn edge_count(&self) -> usize {
        self.succs.values().map(BTreeSet::len).sum()
    }

    /// Vertices reachable from `roots` (inclusive) along edges.
    pub fn reachable_from(&self, roots: impl IntoIterator<Item = VertexId>) -> HashSet<VertexId> {
        let mut seen = HashSet::new();
        let mut stack: Vec<VertexId> = roots
            .into_iter()
            .filter(|id| self.vertices.contains_key(id))
            .collect();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(next) = self.succs.get(&id) {
                stack.extend(next.iter().copied().filter(|n| !seen.contains(n)));
            }
        }
        seen
    }

    /// Strongly connected components in topological order of the condensation: every component
    /// comes after all components containing one of its precedents.
    ///
    /// Iterative Tarjan; members of each component are sorted by id.
    pub fn strongly_connected_components(&self) -> Vec<Vec<VertexId>> {
        let mut index_of: HashMap<VertexId, usize> = HashMap::new();
        let mut lowlink: HashMap<VertexId, usize> = HashMap::new();
        let mut on_stack: HashSet<VertexId> = HashSet::new();
        let mut stack: Vec<VertexId> = Vec::new();
        let mut components = Vec::new();
        let mut next_index = 0usize;

        for root in self.ids() {
            if index_of.contains_key(&root) {
                continue;
            }
            let mut call: Vec<(VertexId, Vec<VertexId>, usize)> = Vec::new();
            index_of.insert(root, next_index);
            lowlink.insert(root, next_index);
            next_index += 1;
            stack.push(root);
            on_stack.insert(root);
            call.push((root, self.successors(root), 0));

            while let Some(frame) = call.last_mut() {
                let v = frame.0;
                if frame.2 < frame.1.len() {
                    let w = frame.1[frame.2];
                    frame.2 += 1;
                    match index_of.get(&w).copied() {
                        None => {
                            index_of.insert(w, next_index);
                            lowlink.insert(w, next_index);
                            next_index += 1;
                            stack.push(w);
                            on_stack.insert(w);
                            call.push((w, self.successors(w), 0));
                        }
                        Some(w_index) if on_stack.contains(&w) => {
                            if let Some(low) = lowlink.get_mut(&v) {
                                *low = (*low).min(w_index);
                            }
                        }
                        Some(_) => {}
                    }
                    continue;
                }

                call.pop();
                let v_low = lowlink.get(&v).copied().unwrap_or(0);
                if let Some((parent, ..)) = call.last() {
                    if let Some(low) = lowlink.get_mut(parent) {
                        *low = (*low).min(v_low);
                    }
                }
                if index_of.get(&v).copied() == Some(v_low) {
                    let mut component = Vec::new();
                    while let Some(member) = stack.pop() {
                        on_stack.remove(&member);
                        component.push(member);
                        if member == v {
                            break;
                        }
                    }
                    component.sort_unstable();
                    components.push(component);
                }
            }
        }

        // Tarjan emits sinks first.
        components.reverse();
        components
    }

    fn index_position(&mut self, id: VertexId, key: &VertexKey) {
        self.positions
            .entry(key.sheet.clone())
            .or_default()
            .insert(PositionEntry {
                id,
                point: point(key),
            });
    }

    fn unindex_position(&mut self, id: VertexId, key: &VertexKey) {
        if let Some(tree) = self.positions.get_mut(&key.sheet) {
            tree.remove(&PositionEntry {
                id,
                point: point(key),
            });
            if tree.size() == 0 {
                self.positions.remove(&key.sheet);
            }
        }
    }
}
