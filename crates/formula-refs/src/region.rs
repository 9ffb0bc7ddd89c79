use core::fmt;

use serde::{Deserialize, Serialize};

use crate::address::col_to_name;

/// Bound used by unbounded row and column bands.
///
/// Shifting never moves a bound that equals the sentinel.
pub const MAX_INDEX: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    Row,
    Col,
}

/// An inclusive rectangle of cells, 0-indexed.
///
/// Row bands (`3:5`) span every column and column bands (`C:E`) span every row; the open side
/// is stored as [`MAX_INDEX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

impl Region {
    /// Build a region from two corners in any order.
    #[must_use]
    pub fn new(top: u32, bottom: u32, left: u32, right: u32) -> Self {
        Self {
            top: top.min(bottom),
            bottom: top.max(bottom),
            left: left.min(right),
            right: left.max(right),
        }
    }

    #[must_use]
    pub const fn cell(row: u32, col: u32) -> Self {
        Self {
            top: row,
            bottom: row,
            left: col,
            right: col,
        }
    }

    /// Every column of rows `start..=end`.
    #[must_use]
    pub fn rows(start: u32, end: u32) -> Self {
        Self::new(start, end, 0, MAX_INDEX)
    }

    /// Every row of columns `start..=end`.
    #[must_use]
    pub fn cols(start: u32, end: u32) -> Self {
        Self::new(0, MAX_INDEX, start, end)
    }

    /// The band `start..=end` along `axis`.
    #[must_use]
    pub fn band(axis: Axis, start: u32, end: u32) -> Self {
        match axis {
            Axis::Row => Self::rows(start, end),
            Axis::Col => Self::cols(start, end),
        }
    }

    /// Everything at or after `index` along `axis`.
    #[must_use]
    pub fn band_from(axis: Axis, index: u32) -> Self {
        Self::band(axis, index, MAX_INDEX)
    }

    #[must_use]
    pub fn start(&self, axis: Axis) -> u32 {
        match axis {
            Axis::Row => self.top,
            Axis::Col => self.left,
        }
    }

    #[must_use]
    pub fn end(&self, axis: Axis) -> u32 {
        match axis {
            Axis::Row => self.bottom,
            Axis::Col => self.right,
        }
    }

    /// Whether the region covers every row (or column) of the sheet.
    #[must_use]
    pub fn spans_axis(&self, axis: Axis) -> bool {
        self.start(axis) == 0 && self.end(axis) == MAX_INDEX
    }

    #[must_use]
    pub fn is_single_cell(&self) -> bool {
        self.top == self.bottom && self.left == self.right
    }

    #[must_use]
    pub fn height(&self) -> u64 {
        u64::from(self.bottom) - u64::from(self.top) + 1
    }

    #[must_use]
    pub fn width(&self) -> u64 {
        u64::from(self.right) - u64::from(self.left) + 1
    }

    #[must_use]
    pub fn contains(&self, row: u32, col: u32) -> bool {
        row >= self.top && row <= self.bottom && col >= self.left && col <= self.right
    }

    #[must_use]
    pub fn contains_region(&self, other: &Region) -> bool {
        other.top >= self.top
            && other.bottom <= self.bottom
            && other.left >= self.left
            && other.right <= self.right
    }

    #[must_use]
    pub fn intersects(&self, other: &Region) -> bool {
        self.top <= other.bottom
            && other.top <= self.bottom
            && self.left <= other.right
            && other.left <= self.right
    }

    /// Translate by a signed delta. Sentinel bounds stay put and results clamp at `0`.
    #[must_use]
    pub fn shift(&self, d_row: i64, d_col: i64) -> Self {
        Self {
            top: offset(self.top, d_row),
            bottom: offset(self.bottom, d_row),
            left: offset(self.left, d_col),
            right: offset(self.right, d_col),
        }
    }

    fn shift_axis(&self, axis: Axis, delta: i64) -> Self {
        match axis {
            Axis::Row => self.shift(delta, 0),
            Axis::Col => self.shift(0, delta),
        }
    }

    fn with_span(&self, axis: Axis, start: u32, end: u32) -> Self {
        match axis {
            Axis::Row => Self {
                top: start,
                bottom: end,
                ..*self
            },
            Axis::Col => Self {
                left: start,
                right: end,
                ..*self
            },
        }
    }

    /// The region after inserting `count` rows/columns before `index`.
    ///
    /// Regions starting at or after `index` move; regions straddling `index` grow.
    #[must_use]
    pub fn insert_row_col(&self, index: u32, count: u32, axis: Axis) -> Self {
        let (start, end) = (self.start(axis), self.end(axis));
        if self.spans_axis(axis) {
            *self
        } else if start >= index {
            self.shift_axis(axis, i64::from(count))
        } else if end >= index {
            self.with_span(axis, start, offset(end, i64::from(count)))
        } else {
            *self
        }
    }

    /// The region after removing `count` rows/columns starting at `index`.
    ///
    /// Returns `None` when the region lies entirely inside the removed band; otherwise the
    /// region is moved or clipped.
    #[must_use]
    pub fn remove_row_col(&self, index: u32, count: u32, axis: Axis) -> Option<Self> {
        if count == 0 {
            return Some(*self);
        }
        let last = index.saturating_add(count - 1);
        let (start, end) = (self.start(axis), self.end(axis));
        if end < index || self.spans_axis(axis) {
            return Some(*self);
        }
        if start > last {
            return Some(self.shift_axis(axis, -i64::from(count)));
        }
        if start >= index && end <= last {
            return None;
        }
        let new_start = start.min(index);
        let new_end = if end > last {
            offset(end, -i64::from(count))
        } else {
            // The band clips the tail of the region, and `start < index` here.
            index - 1
        };
        Some(self.with_span(axis, new_start, new_end))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole_rows = self.left == 0 && self.right == MAX_INDEX;
        let whole_cols = self.top == 0 && self.bottom == MAX_INDEX;
        if whole_rows && !whole_cols {
            return write!(
                f,
                "{}:{}",
                u64::from(self.top) + 1,
                u64::from(self.bottom) + 1
            );
        }
        if whole_cols {
            return write!(f, "{}:{}", col_to_name(self.left), col_to_name(self.right));
        }
        write!(f, "{}{}", col_to_name(self.left), u64::from(self.top) + 1)?;
        if !self.is_single_cell() {
            write!(
                f,
                ":{}{}",
                col_to_name(self.right),
                u64::from(self.bottom) + 1
            )?;
        }
        Ok(())
    }
}

fn offset(value: u32, delta: i64) -> u32 {
    if value == MAX_INDEX {
        return value;
    }
    let moved = (i64::from(value) + delta).clamp(0, i64::from(MAX_INDEX - 1));
    u32::try_from(moved).unwrap_or(MAX_INDEX - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_intersect_cells() {
        let col_b = Region::cols(1, 1);
        assert!(col_b.intersects(&Region::cell(500, 1)));
        assert!(!col_b.intersects(&Region::cell(500, 2)));
        assert!(Region::rows(3, 4).contains(4, 9_000));
    }

    #[test]
    fn insert_moves_or_grows() {
        let r = Region::new(2, 4, 0, 1);
        assert_eq!(r.insert_row_col(0, 2, Axis::Row), Region::new(4, 6, 0, 1));
        assert_eq!(r.insert_row_col(3, 2, Axis::Row), Region::new(2, 6, 0, 1));
        assert_eq!(r.insert_row_col(5, 2, Axis::Row), r);
        assert_eq!(r.insert_row_col(0, 1, Axis::Col), Region::new(2, 4, 1, 2));
    }

    #[test]
    fn remove_moves_clips_or_drops() {
        let r = Region::new(2, 4, 0, 0);
        assert_eq!(r.remove_row_col(0, 2, Axis::Row), Some(Region::new(0, 2, 0, 0)));
        assert_eq!(r.remove_row_col(3, 5, Axis::Row), Some(Region::new(2, 2, 0, 0)));
        assert_eq!(r.remove_row_col(1, 2, Axis::Row), Some(Region::new(1, 2, 0, 0)));
        assert_eq!(r.remove_row_col(2, 3, Axis::Row), None);
        assert_eq!(r.remove_row_col(5, 1, Axis::Row), Some(r));
    }

    #[test]
    fn sentinel_bounds_do_not_move() {
        let col = Region::cols(3, 3);
        assert_eq!(col.insert_row_col(0, 10, Axis::Row), col);
        assert_eq!(col.remove_row_col(0, 10, Axis::Row), Some(col));
        assert_eq!(
            Region::band_from(Axis::Row, 4).insert_row_col(2, 1, Axis::Row),
            Region::band_from(Axis::Row, 5)
        );
    }

    #[test]
    fn displays_in_a1_form() {
        assert_eq!(Region::cell(0, 0).to_string(), "A1");
        assert_eq!(Region::new(0, 1, 0, 2).to_string(), "A1:C2");
        assert_eq!(Region::rows(2, 3).to_string(), "3:4");
        assert_eq!(Region::cols(1, 1).to_string(), "B:B");
    }
}
