use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of rows addressable by A1 text.
pub const MAX_ROWS: u32 = 1_048_576;
/// Number of columns addressable by A1 text (`A`..=`XFD`).
pub const MAX_COLS: u32 = 16_384;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum A1ParseError {
    #[error("empty reference")]
    Empty,
    #[error("missing column letters")]
    MissingColumn,
    #[error("missing row number")]
    MissingRow,
    #[error("column is out of range")]
    InvalidColumn,
    #[error("row is out of range")]
    InvalidRow,
    #[error("unexpected trailing characters")]
    TrailingCharacters,
}

/// A single cell coordinate.
///
/// Rows and columns are **0-indexed**. The `*_fixed` flags record `$` markers; they never
/// influence evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellAddress {
    pub row: u32,
    pub col: u32,
    pub row_fixed: bool,
    pub col_fixed: bool,
}

impl CellAddress {
    #[must_use]
    pub const fn new(row: u32, col: u32) -> Self {
        Self {
            row,
            col,
            row_fixed: false,
            col_fixed: false,
        }
    }

    #[must_use]
    pub const fn fixed(row: u32, col: u32, row_fixed: bool, col_fixed: bool) -> Self {
        Self {
            row,
            col,
            row_fixed,
            col_fixed,
        }
    }

    /// Parse an A1-style address such as `B7` or `$B$7`.
    pub fn from_a1(a1: &str) -> Result<Self, A1ParseError> {
        let s = a1.trim();
        if s.is_empty() {
            return Err(A1ParseError::Empty);
        }

        let bytes = s.as_bytes();
        let mut idx = 0usize;
        let col_fixed = bytes.first() == Some(&b'$');
        if col_fixed {
            idx += 1;
        }

        let col_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_alphabetic() {
            idx += 1;
        }
        if idx == col_start {
            return Err(A1ParseError::MissingColumn);
        }
        let col = name_to_col(&s[col_start..idx])?;

        let row_fixed = bytes.get(idx) == Some(&b'$');
        if row_fixed {
            idx += 1;
        }

        let row_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_digit() {
            idx += 1;
        }
        if idx == row_start {
            return Err(A1ParseError::MissingRow);
        }
        if idx != bytes.len() {
            return Err(A1ParseError::TrailingCharacters);
        }

        let row = parse_row_number(&s[row_start..idx])?;
        Ok(Self {
            row,
            col,
            row_fixed,
            col_fixed,
        })
    }

    #[must_use]
    pub fn row_address(self) -> RowAddress {
        RowAddress::new(self.row, self.row_fixed)
    }

    #[must_use]
    pub fn col_address(self) -> ColAddress {
        ColAddress::new(self.col, self.col_fixed)
    }

    #[must_use]
    pub fn with_position(self, row: u32, col: u32) -> Self {
        Self { row, col, ..self }
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.col_address(), self.row_address())
    }
}

/// A whole-row coordinate (`3`, `$3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowAddress {
    pub row: u32,
    pub fixed: bool,
}

impl RowAddress {
    #[must_use]
    pub const fn new(row: u32, fixed: bool) -> Self {
        Self { row, fixed }
    }

    /// Parse `7` or `$7` (1-based text, 0-based result).
    pub fn parse(text: &str) -> Result<Self, A1ParseError> {
        let (fixed, digits) = match text.strip_prefix('$') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        if digits.is_empty() {
            return Err(A1ParseError::MissingRow);
        }
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(A1ParseError::TrailingCharacters);
        }
        Ok(Self::new(parse_row_number(digits)?, fixed))
    }
}

impl fmt::Display for RowAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fixed {
            f.write_str("$")?;
        }
        write!(f, "{}", u64::from(self.row) + 1)
    }
}

/// A whole-column coordinate (`C`, `$C`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColAddress {
    pub col: u32,
    pub fixed: bool,
}

impl ColAddress {
    #[must_use]
    pub const fn new(col: u32, fixed: bool) -> Self {
        Self { col, fixed }
    }

    /// Parse `C` or `$C`.
    pub fn parse(text: &str) -> Result<Self, A1ParseError> {
        let (fixed, letters) = match text.strip_prefix('$') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        Ok(Self::new(name_to_col(letters)?, fixed))
    }
}

impl fmt::Display for ColAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fixed {
            f.write_str("$")?;
        }
        f.write_str(&col_to_name(self.col))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressKind {
    Cell,
    Row,
    Col,
    Named,
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AddressKind::Cell => "cell",
            AddressKind::Row => "row",
            AddressKind::Col => "column",
            AddressKind::Named => "name",
        })
    }
}

/// A pre-resolved address produced by the lexer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
    Cell(CellAddress),
    Row(RowAddress),
    Col(ColAddress),
    Named(String),
}

impl Address {
    #[must_use]
    pub fn kind(&self) -> AddressKind {
        match self {
            Address::Cell(_) => AddressKind::Cell,
            Address::Row(_) => AddressKind::Row,
            Address::Col(_) => AddressKind::Col,
            Address::Named(_) => AddressKind::Named,
        }
    }

    /// Classify address-shaped text.
    ///
    /// Recognizes `A1`/`$A$1` cells, `$A` columns and `$1` rows. Bare letters and bare numbers
    /// are ambiguous with names and numeric literals, so they are left to the parser.
    #[must_use]
    pub fn parse(text: &str) -> Option<Address> {
        if let Ok(cell) = CellAddress::from_a1(text) {
            return Some(Address::Cell(cell));
        }
        let rest = text.strip_prefix('$')?;
        if rest.is_empty() {
            return None;
        }
        if rest.bytes().all(|b| b.is_ascii_digit()) {
            return RowAddress::parse(text).ok().map(Address::Row);
        }
        if rest.bytes().all(|b| b.is_ascii_alphabetic()) {
            return ColAddress::parse(text).ok().map(Address::Col);
        }
        None
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Cell(a) => a.fmt(f),
            Address::Row(a) => a.fmt(f),
            Address::Col(a) => a.fmt(f),
            Address::Named(name) => f.write_str(name),
        }
    }
}

/// Convert a 0-indexed column to its letters (`0` -> `A`, `27` -> `AB`).
#[must_use]
pub fn col_to_name(col: u32) -> String {
    let mut n = u64::from(col) + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        out.push(b'A' + rem);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Convert column letters (case-insensitive) to a 0-indexed column.
pub fn name_to_col(name: &str) -> Result<u32, A1ParseError> {
    if name.is_empty() {
        return Err(A1ParseError::MissingColumn);
    }
    let mut col: u32 = 0;
    for b in name.bytes() {
        if !b.is_ascii_alphabetic() {
            return Err(A1ParseError::InvalidColumn);
        }
        let digit = u32::from(b.to_ascii_uppercase() - b'A') + 1;
        col = col
            .checked_mul(26)
            .and_then(|c| c.checked_add(digit))
            .ok_or(A1ParseError::InvalidColumn)?;
        if col > MAX_COLS {
            return Err(A1ParseError::InvalidColumn);
        }
    }
    Ok(col - 1)
}

fn parse_row_number(digits: &str) -> Result<u32, A1ParseError> {
    let row_1_based: u32 = digits.parse().map_err(|_| A1ParseError::InvalidRow)?;
    if row_1_based == 0 || row_1_based > MAX_ROWS {
        return Err(A1ParseError::InvalidRow);
    }
    Ok(row_1_based - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_names_round_trip() {
        for (col, name) in [(0, "A"), (25, "Z"), (26, "AA"), (701, "ZZ"), (16_383, "XFD")] {
            assert_eq!(col_to_name(col), name);
            assert_eq!(name_to_col(name), Ok(col));
        }
        assert_eq!(name_to_col("xfe"), Err(A1ParseError::InvalidColumn));
    }

    #[test]
    fn parses_fixed_markers() {
        let addr = CellAddress::from_a1("$B7").unwrap();
        assert_eq!(addr, CellAddress::fixed(6, 1, false, true));
        assert_eq!(addr.to_string(), "$B7");
        assert_eq!(CellAddress::from_a1("B$7").unwrap().to_string(), "B$7");
    }

    #[test]
    fn rejects_malformed_cells() {
        assert_eq!(CellAddress::from_a1(""), Err(A1ParseError::Empty));
        assert_eq!(CellAddress::from_a1("7"), Err(A1ParseError::MissingColumn));
        assert_eq!(CellAddress::from_a1("B"), Err(A1ParseError::MissingRow));
        assert_eq!(CellAddress::from_a1("B0"), Err(A1ParseError::InvalidRow));
        assert_eq!(
            CellAddress::from_a1("B7x"),
            Err(A1ParseError::TrailingCharacters)
        );
    }

    #[test]
    fn classifies_address_shapes() {
        assert_eq!(Address::parse("C3").map(|a| a.kind()), Some(AddressKind::Cell));
        assert_eq!(
            Address::parse("$3"),
            Some(Address::Row(RowAddress::new(2, true)))
        );
        assert_eq!(
            Address::parse("$c"),
            Some(Address::Col(ColAddress::new(2, true)))
        );
        assert_eq!(Address::parse("C"), None);
        assert_eq!(Address::parse("total"), None);
        assert_eq!(Address::parse("$"), None);
    }
}
