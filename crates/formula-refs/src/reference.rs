use core::fmt;

use serde::{Deserialize, Serialize};

use crate::address::{CellAddress, ColAddress, RowAddress};
use crate::region::{Axis, Region};

/// The shape of a reference.
///
/// Range endpoints always share an address kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    Cell(CellAddress),
    CellRange { start: CellAddress, end: CellAddress },
    RowRange { start: RowAddress, end: RowAddress },
    ColRange { start: ColAddress, end: ColAddress },
    Named(String),
}

/// A reference found in a formula, optionally qualified by a sheet name.
///
/// References are values: structural edits produce a new reference via
/// [`Reference::insert_row_col`] / [`Reference::remove_row_col`] instead of mutating in place.
/// A reference whose target was deleted stays in the formula but is marked invalid and
/// evaluates to `#REF!`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    kind: ReferenceKind,
    sheet: Option<String>,
    valid: bool,
}

impl Reference {
    #[must_use]
    pub fn new(kind: ReferenceKind) -> Self {
        Self {
            kind,
            sheet: None,
            valid: true,
        }
    }

    #[must_use]
    pub fn cell(address: CellAddress) -> Self {
        Self::new(ReferenceKind::Cell(address))
    }

    #[must_use]
    pub fn cell_range(start: CellAddress, end: CellAddress) -> Self {
        Self::new(ReferenceKind::CellRange { start, end })
    }

    #[must_use]
    pub fn row_range(start: RowAddress, end: RowAddress) -> Self {
        Self::new(ReferenceKind::RowRange { start, end })
    }

    #[must_use]
    pub fn col_range(start: ColAddress, end: ColAddress) -> Self {
        Self::new(ReferenceKind::ColRange { start, end })
    }

    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(ReferenceKind::Named(name.into()))
    }

    #[must_use]
    pub fn with_sheet(mut self, sheet: Option<String>) -> Self {
        self.sheet = sheet;
        self
    }

    #[must_use]
    pub fn kind(&self) -> &ReferenceKind {
        &self.kind
    }

    /// The explicit sheet qualifier, if the formula wrote one.
    #[must_use]
    pub fn sheet(&self) -> Option<&str> {
        self.sheet.as_deref()
    }

    /// The sheet this reference points into when it appears in a formula on `formula_sheet`.
    #[must_use]
    pub fn sheet_or<'a>(&'a self, formula_sheet: &'a str) -> &'a str {
        self.sheet.as_deref().unwrap_or(formula_sheet)
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    #[must_use]
    pub fn is_named(&self) -> bool {
        matches!(self.kind, ReferenceKind::Named(_))
    }

    #[must_use]
    pub fn invalidated(mut self) -> Self {
        self.valid = false;
        self
    }

    /// The minimal region the reference denotes. Named references have none.
    #[must_use]
    pub fn region(&self) -> Option<Region> {
        match &self.kind {
            ReferenceKind::Cell(a) => Some(Region::cell(a.row, a.col)),
            ReferenceKind::CellRange { start, end } => {
                Some(Region::new(start.row, end.row, start.col, end.col))
            }
            ReferenceKind::RowRange { start, end } => Some(Region::rows(start.row, end.row)),
            ReferenceKind::ColRange { start, end } => Some(Region::cols(start.col, end.col)),
            ReferenceKind::Named(_) => None,
        }
    }

    /// The same reference re-pointed at `region`, keeping `$` markers and sheet qualifier.
    #[must_use]
    pub fn with_region(&self, region: Region) -> Self {
        let kind = match &self.kind {
            ReferenceKind::Cell(a) => ReferenceKind::Cell(a.with_position(region.top, region.left)),
            ReferenceKind::CellRange { start, end } => {
                let (first, second) = ordered(start, end);
                ReferenceKind::CellRange {
                    start: first.with_position(region.top, region.left),
                    end: second.with_position(region.bottom, region.right),
                }
            }
            ReferenceKind::RowRange { start, end } => ReferenceKind::RowRange {
                start: RowAddress::new(region.top, start.fixed),
                end: RowAddress::new(region.bottom, end.fixed),
            },
            ReferenceKind::ColRange { start, end } => ReferenceKind::ColRange {
                start: ColAddress::new(region.left, start.fixed),
                end: ColAddress::new(region.right, end.fixed),
            },
            ReferenceKind::Named(_) => self.kind.clone(),
        };
        Self {
            kind,
            sheet: self.sheet.clone(),
            valid: self.valid,
        }
    }

    /// The reference after `count` rows/columns are inserted at `index`.
    #[must_use]
    pub fn insert_row_col(&self, index: u32, count: u32, axis: Axis) -> Self {
        match self.region() {
            Some(region) if self.valid => self.with_region(region.insert_row_col(index, count, axis)),
            _ => self.clone(),
        }
    }

    /// The reference after `count` rows/columns are removed at `index`.
    ///
    /// A reference entirely inside the removed band keeps its old coordinates but becomes
    /// invalid.
    #[must_use]
    pub fn remove_row_col(&self, index: u32, count: u32, axis: Axis) -> Self {
        match self.region() {
            Some(region) if self.valid => match region.remove_row_col(index, count, axis) {
                Some(moved) => self.with_region(moved),
                None => self.clone().invalidated(),
            },
            _ => self.clone(),
        }
    }
}

fn ordered<'a>(a: &'a CellAddress, b: &'a CellAddress) -> (&'a CellAddress, &'a CellAddress) {
    if (a.row, a.col) <= (b.row, b.col) {
        (a, b)
    } else {
        (b, a)
    }
}

/// Render a sheet qualifier, quoting names that are not plain identifiers.
pub fn write_sheet_prefix(f: &mut impl fmt::Write, sheet: &str) -> fmt::Result {
    let plain = !sheet.is_empty()
        && sheet
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
        && !sheet.starts_with(|c: char| c.is_ascii_digit());
    if plain {
        write!(f, "{sheet}!")
    } else {
        write!(f, "'{}'!", sheet.replace('\'', "''"))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.valid {
            return f.write_str("#REF!");
        }
        if let Some(sheet) = &self.sheet {
            write_sheet_prefix(f, sheet)?;
        }
        match &self.kind {
            ReferenceKind::Cell(a) => write!(f, "{a}"),
            ReferenceKind::CellRange { start, end } => write!(f, "{start}:{end}"),
            ReferenceKind::RowRange { start, end } => write!(f, "{start}:{end}"),
            ReferenceKind::ColRange { start, end } => write!(f, "{start}:{end}"),
            ReferenceKind::Named(name) => f.write_str(name),
        }
    }
}
