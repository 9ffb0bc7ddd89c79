use formula_refs::{Axis, Region};
use rstar::{RTree, RTreeObject, AABB};

#[derive(Debug, Clone)]
struct Entry<T> {
    region: Region,
    value: T,
}

impl<T: PartialEq> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.region == other.region && self.value == other.value
    }
}

impl<T> RTreeObject for Entry<T> {
    type Envelope = AABB<[i64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        envelope(&self.region)
    }
}

fn envelope(region: &Region) -> AABB<[i64; 2]> {
    AABB::from_corners(
        [i64::from(region.top), i64::from(region.left)],
        [i64::from(region.bottom), i64::from(region.right)],
    )
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegionChange<T> {
    Added(Region, T),
    Removed(Region, T),
}

/// Ordered record of the entries a mutation added and removed; enough to reverse it exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionRestoreData<T> {
    changes: Vec<RegionChange<T>>,
}

impl<T> Default for RegionRestoreData<T> {
    fn default() -> Self {
        Self {
            changes: Vec::new(),
        }
    }
}

impl<T> RegionRestoreData<T> {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> &[RegionChange<T>] {
        &self.changes
    }

    pub fn added(&self) -> impl Iterator<Item = (&Region, &T)> {
        self.changes.iter().filter_map(|c| match c {
            RegionChange::Added(r, v) => Some((r, v)),
            RegionChange::Removed(..) => None,
        })
    }

    pub fn removed(&self) -> impl Iterator<Item = (&Region, &T)> {
        self.changes.iter().filter_map(|c| match c {
            RegionChange::Removed(r, v) => Some((r, v)),
            RegionChange::Added(..) => None,
        })
    }

    pub fn merge(&mut self, other: RegionRestoreData<T>) {
        self.changes.extend(other.changes);
    }
}

/// Spatial multimap from regions to values, backed by an R-tree.
///
/// Answers "which values were registered against a region intersecting this one" without a
/// scan. The same `(region, value)` pair may be stored more than once.
#[derive(Debug, Clone)]
pub struct RegionIndex<T> {
    tree: RTree<Entry<T>>,
}

impl<T> Default for RegionIndex<T> {
    fn default() -> Self {
        Self { tree: RTree::new() }
    }
}

impl<T: Clone + PartialEq> RegionIndex<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    pub fn add(&mut self, region: Region, value: T) -> RegionRestoreData<T> {
        self.tree.insert(Entry {
            region,
            value: value.clone(),
        });
        RegionRestoreData {
            changes: vec![RegionChange::Added(region, value)],
        }
    }

    /// Remove one stored copy of each pair. Pairs that are not stored are skipped.
    pub fn delete(&mut self, entries: &[(Region, T)]) -> RegionRestoreData<T> {
        let mut data = RegionRestoreData::default();
        for (region, value) in entries {
            if self.remove_entry(*region, value) {
                data.changes
                    .push(RegionChange::Removed(*region, value.clone()));
            }
        }
        data
    }

    /// Values whose region intersects `region`, in no particular order.
    pub fn get_data(&self, region: Region) -> Vec<T> {
        self.tree
            .locate_in_envelope_intersecting(&envelope(&region))
            .map(|e| e.value.clone())
            .collect()
    }

    pub fn entries_intersecting(&self, region: Region) -> Vec<(Region, T)> {
        self.tree
            .locate_in_envelope_intersecting(&envelope(&region))
            .map(|e| (e.region, e.value.clone()))
            .collect()
    }

    pub fn any(&self, region: Region) -> bool {
        self.tree
            .locate_in_envelope_intersecting(&envelope(&region))
            .next()
            .is_some()
    }

    pub fn any_at(&self, row: u32, col: u32) -> bool {
        self.any(Region::cell(row, col))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Region, &T)> {
        self.tree.iter().map(|e| (e.region, &e.value))
    }

    /// Shift stored regions for `count` rows/columns inserted at `index`; straddling regions grow.
    pub fn insert_row_col_at(&mut self, index: u32, count: u32, axis: Axis) -> RegionRestoreData<T> {
        self.remap(index, axis, |region| {
            Some(region.insert_row_col(index, count, axis))
        })
    }

    /// Shift stored regions for `count` rows/columns removed at `index`.
    ///
    /// Regions inside the removed band are dropped; straddling regions are clipped.
    pub fn remove_row_col_at(&mut self, index: u32, count: u32, axis: Axis) -> RegionRestoreData<T> {
        self.remap(index, axis, |region| region.remove_row_col(index, count, axis))
    }

    fn remap<F>(&mut self, index: u32, axis: Axis, f: F) -> RegionRestoreData<T>
    where
        F: Fn(&Region) -> Option<Region>,
    {
        let affected = self.entries_intersecting(Region::band_from(axis, index));
        let mut removed = Vec::new();
        let mut added = Vec::new();
        for (region, value) in affected {
            let mapped = f(&region);
            if mapped == Some(region) {
                continue;
            }
            removed.push((region, value.clone()));
            if let Some(new_region) = mapped {
                added.push((new_region, value));
            }
        }

        // Remove everything before inserting so moved entries never collide with stale ones.
        let mut data = self.delete(&removed);
        for (region, value) in added {
            data.merge(self.add(region, value));
        }
        data
    }

    /// Reverse a record produced by this index.
    pub fn restore(&mut self, data: &RegionRestoreData<T>) {
        for change in data.changes.iter().rev() {
            match change {
                RegionChange::Added(region, value) => {
                    self.remove_entry(*region, value);
                }
                RegionChange::Removed(region, value) => {
                    self.tree.insert(Entry {
                        region: *region,
                        value: value.clone(),
                    });
                }
            }
        }
    }

    fn remove_entry(&mut self, region: Region, value: &T) -> bool {
        self.tree
            .remove(&Entry {
                region,
                value: value.clone(),
            })
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sorted(mut v: Vec<u32>) -> Vec<u32> {
        v.sort_unstable();
        v
    }

    #[test]
    fn finds_intersecting_regions() {
        let mut index = RegionIndex::new();
        index.add(Region::new(0, 4, 0, 0), 1u32);
        index.add(Region::cols(2, 2), 2);
        index.add(Region::cell(9, 9), 3);

        assert_eq!(sorted(index.get_data(Region::cell(3, 0))), vec![1]);
        assert_eq!(sorted(index.get_data(Region::new(0, 100, 0, 2))), vec![1, 2]);
        assert!(index.any_at(50_000, 2));
        assert!(!index.any_at(5, 0));
    }

    #[test]
    fn delete_removes_one_copy() {
        let mut index = RegionIndex::new();
        index.add(Region::cell(0, 0), 7u32);
        index.add(Region::cell(0, 0), 7);
        let data = index.delete(&[(Region::cell(0, 0), 7), (Region::cell(5, 5), 7)]);
        assert_eq!(data.removed().count(), 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn insert_and_remove_shift_regions() {
        let mut index = RegionIndex::new();
        index.add(Region::cell(1, 0), 1u32);
        index.add(Region::new(3, 5, 0, 0), 2);
        index.add(Region::cell(8, 0), 3);

        index.insert_row_col_at(2, 2, Axis::Row);
        let mut entries: Vec<_> = index.iter().map(|(r, v)| (*v, r)).collect();
        entries.sort_by_key(|(v, _)| *v);
        assert_eq!(
            entries,
            vec![
                (1, Region::cell(1, 0)),
                (2, Region::new(5, 7, 0, 0)),
                (3, Region::cell(10, 0)),
            ]
        );

        let data = index.remove_row_col_at(9, 3, Axis::Row);
        assert_eq!(data.removed().count(), 1);
        assert_eq!(data.added().count(), 0);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn restore_reverses_every_mutation() {
        let mut index = RegionIndex::new();
        index.add(Region::new(0, 3, 0, 1), 1u32);
        index.add(Region::cell(6, 6), 2);
        let before: Vec<_> = {
            let mut v: Vec<_> = index.iter().map(|(r, v)| (*v, r)).collect();
            v.sort_by_key(|(v, _)| *v);
            v
        };

        let mut log = Vec::new();
        log.push(index.remove_row_col_at(1, 2, Axis::Row));
        log.push(index.insert_row_col_at(0, 4, Axis::Col));
        log.push(index.add(Region::cell(2, 2), 3));
        log.push(index.remove_row_col_at(0, 20, Axis::Row));
        for data in log.iter().rev() {
            index.restore(data);
        }

        let mut after: Vec<_> = index.iter().map(|(r, v)| (*v, r)).collect();
        after.sort_by_key(|(v, _)| *v);
        assert_eq!(after, before);
    }
}
