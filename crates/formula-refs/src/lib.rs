#![forbid(unsafe_code)]

//! `formula-refs` defines how formulas point at cells.
//!
//! It is shared by the calc engine's parser (which produces [`Reference`]s), its dependency
//! graph (which indexes their [`Region`]s) and hosts that need to render or adjust reference
//! text after structural edits. Rows and columns are 0-indexed throughout.

mod address;
mod reference;
mod region;

pub use address::{
    col_to_name, name_to_col, A1ParseError, Address, AddressKind, CellAddress, ColAddress,
    RowAddress, MAX_COLS, MAX_ROWS,
};
pub use reference::{write_sheet_prefix, Reference, ReferenceKind};
pub use region::{Axis, Region, MAX_INDEX};
