use std::fmt;

use formula_refs::Reference;
use serde::{Deserialize, Serialize};

/// Value-level errors. Evaluation never fails any other way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A reference became invalid or could not be resolved.
    Ref,
    /// Unknown function or unresolved name.
    Name,
    /// The formula's dependency chain loops back to itself.
    Circular,
    /// Generic evaluation failure.
    NA,
    /// Operand of the wrong type.
    Value,
    Div0,
}

impl ErrorKind {
    pub fn as_code(self) -> &'static str {
        match self {
            ErrorKind::Ref => "#REF!",
            ErrorKind::Name => "#NAME?",
            ErrorKind::Circular => "#CIRCULAR!",
            ErrorKind::NA => "#N/A",
            ErrorKind::Value => "#VALUE!",
            ErrorKind::Div0 => "#DIV/0!",
        }
    }

    /// Match an error literal, case-insensitively.
    pub fn from_code(code: &str) -> Option<Self> {
        [
            ErrorKind::Ref,
            ErrorKind::Name,
            ErrorKind::Circular,
            ErrorKind::NA,
            ErrorKind::Value,
            ErrorKind::Div0,
        ]
        .into_iter()
        .find(|kind| kind.as_code().eq_ignore_ascii_case(code))
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellValueType {
    Empty,
    Number,
    Text,
    Logical,
    Array,
    Error,
    Reference,
}

/// The result of evaluating a formula, or the content of a cell.
///
/// `Reference` only appears when a formula is evaluated without resolving its references.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
    Logical(bool),
    Array(Vec<Vec<CellValue>>),
    Error(ErrorKind),
    Reference(Reference),
}

impl CellValue {
    pub fn value_type(&self) -> CellValueType {
        match self {
            CellValue::Empty => CellValueType::Empty,
            CellValue::Number(_) => CellValueType::Number,
            CellValue::Text(_) => CellValueType::Text,
            CellValue::Logical(_) => CellValueType::Logical,
            CellValue::Array(_) => CellValueType::Array,
            CellValue::Error(_) => CellValueType::Error,
            CellValue::Reference(_) => CellValueType::Reference,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }

    pub fn error(&self) -> Option<ErrorKind> {
        match self {
            CellValue::Error(e) => Some(*e),
            _ => None,
        }
    }

    pub fn is_circular(&self) -> bool {
        self.error() == Some(ErrorKind::Circular)
    }

    /// Collapse a 1x1 array to its element; every other value is returned unchanged.
    pub fn into_scalar(self) -> CellValue {
        match self {
            CellValue::Array(mut rows) if rows.len() == 1 && rows[0].len() == 1 => {
                rows.pop().and_then(|mut row| row.pop()).unwrap_or(CellValue::Empty)
            }
            other => other,
        }
    }

    /// Numeric coercion used by arithmetic operators.
    ///
    /// Empty is `0`, logicals are `1`/`0`, text must parse as a number.
    pub fn coerce_to_number(&self) -> Result<f64, ErrorKind> {
        match self {
            CellValue::Empty => Ok(0.0),
            CellValue::Number(n) => Ok(*n),
            CellValue::Logical(b) => Ok(if *b { 1.0 } else { 0.0 }),
            CellValue::Text(s) => s.trim().parse::<f64>().map_err(|_| ErrorKind::Value),
            CellValue::Error(e) => Err(*e),
            CellValue::Array(_) | CellValue::Reference(_) => Err(ErrorKind::Value),
        }
    }

    /// Text coercion used by `&`.
    pub fn coerce_to_text(&self) -> Result<String, ErrorKind> {
        match self {
            CellValue::Empty => Ok(String::new()),
            CellValue::Number(n) => Ok(format_number(*n)),
            CellValue::Text(s) => Ok(s.clone()),
            CellValue::Logical(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
            CellValue::Error(e) => Err(*e),
            CellValue::Array(_) | CellValue::Reference(_) => Err(ErrorKind::Value),
        }
    }

    pub fn coerce_to_bool(&self) -> Result<bool, ErrorKind> {
        match self {
            CellValue::Empty => Ok(false),
            CellValue::Number(n) => Ok(*n != 0.0),
            CellValue::Logical(b) => Ok(*b),
            CellValue::Text(s) => {
                if s.eq_ignore_ascii_case("TRUE") {
                    Ok(true)
                } else if s.eq_ignore_ascii_case("FALSE") {
                    Ok(false)
                } else {
                    Err(ErrorKind::Value)
                }
            }
            CellValue::Error(e) => Err(*e),
            CellValue::Array(_) | CellValue::Reference(_) => Err(ErrorKind::Value),
        }
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(value as f64)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Logical(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<ErrorKind> for CellValue {
    fn from(value: ErrorKind) -> Self {
        CellValue::Error(value)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Number(n) => f.write_str(&format_number(*n)),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Logical(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            CellValue::Error(e) => write!(f, "{e}"),
            CellValue::Reference(r) => write!(f, "{r}"),
            CellValue::Array(rows) => {
                f.write_str("{")?;
                for (i, row) in rows.iter().enumerate() {
                    if i > 0 {
                        f.write_str(";")?;
                    }
                    for (j, v) in row.iter().enumerate() {
                        if j > 0 {
                            f.write_str(",")?;
                        }
                        match v {
                            CellValue::Text(s) => write!(f, "\"{}\"", s.replace('"', "\"\""))?,
                            other => write!(f, "{other}")?,
                        }
                    }
                }
                f.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_coercion() {
        assert_eq!(CellValue::Empty.coerce_to_number(), Ok(0.0));
        assert_eq!(CellValue::Logical(true).coerce_to_number(), Ok(1.0));
        assert_eq!(CellValue::from(" 2.5 ").coerce_to_number(), Ok(2.5));
        assert_eq!(
            CellValue::from("abc").coerce_to_number(),
            Err(ErrorKind::Value)
        );
        assert_eq!(
            CellValue::Error(ErrorKind::Ref).coerce_to_number(),
            Err(ErrorKind::Ref)
        );
    }

    #[test]
    fn text_coercion_drops_integer_fraction() {
        assert_eq!(CellValue::Number(3.0).coerce_to_text().unwrap(), "3");
        assert_eq!(CellValue::Number(0.5).coerce_to_text().unwrap(), "0.5");
        assert_eq!(CellValue::Logical(false).coerce_to_text().unwrap(), "FALSE");
    }

    #[test]
    fn error_codes_round_trip() {
        for kind in [
            ErrorKind::Ref,
            ErrorKind::Name,
            ErrorKind::Circular,
            ErrorKind::NA,
            ErrorKind::Value,
            ErrorKind::Div0,
        ] {
            assert_eq!(ErrorKind::from_code(kind.as_code()), Some(kind));
        }
        assert_eq!(ErrorKind::from_code("#ref!"), Some(ErrorKind::Ref));
        assert_eq!(ErrorKind::from_code("#BOGUS"), None);
    }

    #[test]
    fn single_cell_array_collapses() {
        let v = CellValue::Array(vec![vec![CellValue::Number(4.0)]]);
        assert_eq!(v.into_scalar(), CellValue::Number(4.0));
        let wide = CellValue::Array(vec![vec![1.0.into(), 2.0.into()]]);
        assert_eq!(wide.clone().into_scalar(), wide);
    }
}
