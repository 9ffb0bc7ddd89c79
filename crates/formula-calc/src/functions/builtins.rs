use chrono::{Local, NaiveDate};

use super::{FunctionError, FunctionSpec, ValueType, Volatility};
use crate::value::{CellValue, ErrorKind};

const VARIADIC: usize = 255;

pub(super) static BUILTINS: &[FunctionSpec] = &[
    FunctionSpec {
        name: "SUM",
        min_args: 1,
        max_args: VARIADIC,
        volatility: Volatility::NonVolatile,
        arg_types: &[ValueType::Any],
        implementation: sum,
    },
    FunctionSpec {
        name: "AVERAGE",
        min_args: 1,
        max_args: VARIADIC,
        volatility: Volatility::NonVolatile,
        arg_types: &[ValueType::Any],
        implementation: average,
    },
    FunctionSpec {
        name: "IF",
        min_args: 2,
        max_args: 3,
        volatility: Volatility::NonVolatile,
        arg_types: &[ValueType::Bool, ValueType::Any],
        implementation: if_,
    },
    FunctionSpec {
        name: "AND",
        min_args: 1,
        max_args: VARIADIC,
        volatility: Volatility::NonVolatile,
        arg_types: &[ValueType::Any],
        implementation: and,
    },
    FunctionSpec {
        name: "OR",
        min_args: 1,
        max_args: VARIADIC,
        volatility: Volatility::NonVolatile,
        arg_types: &[ValueType::Any],
        implementation: or,
    },
    FunctionSpec {
        name: "NOT",
        min_args: 1,
        max_args: 1,
        volatility: Volatility::NonVolatile,
        arg_types: &[ValueType::Bool],
        implementation: not,
    },
    FunctionSpec {
        name: "CONCAT",
        min_args: 1,
        max_args: VARIADIC,
        volatility: Volatility::NonVolatile,
        arg_types: &[ValueType::Any],
        implementation: concat,
    },
    FunctionSpec {
        name: "ISERROR",
        min_args: 1,
        max_args: 1,
        volatility: Volatility::NonVolatile,
        arg_types: &[ValueType::Any],
        implementation: iserror,
    },
    FunctionSpec {
        name: "NOW",
        min_args: 0,
        max_args: 0,
        volatility: Volatility::Volatile,
        arg_types: &[],
        implementation: now,
    },
];

/// Numbers contributed by `args`.
///
/// Scalar arguments are coerced; inside arrays only numbers count and errors propagate.
fn numbers(args: &[CellValue]) -> Result<Vec<f64>, ErrorKind> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            CellValue::Array(rows) => {
                for value in rows.iter().flatten() {
                    match value {
                        CellValue::Number(n) => out.push(*n),
                        CellValue::Error(e) => return Err(*e),
                        _ => {}
                    }
                }
            }
            other => out.push(other.coerce_to_number()?),
        }
    }
    Ok(out)
}

fn logicals(args: &[CellValue]) -> Result<Vec<bool>, ErrorKind> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            CellValue::Array(rows) => {
                for value in rows.iter().flatten() {
                    match value {
                        CellValue::Number(_) | CellValue::Logical(_) => {
                            out.push(value.coerce_to_bool()?)
                        }
                        CellValue::Error(e) => return Err(*e),
                        _ => {}
                    }
                }
            }
            other => out.push(other.coerce_to_bool()?),
        }
    }
    if out.is_empty() {
        return Err(ErrorKind::Value);
    }
    Ok(out)
}

fn sum(args: &[CellValue]) -> Result<CellValue, FunctionError> {
    Ok(match numbers(args) {
        Ok(values) => CellValue::Number(values.iter().sum()),
        Err(e) => CellValue::Error(e),
    })
}

fn average(args: &[CellValue]) -> Result<CellValue, FunctionError> {
    Ok(match numbers(args) {
        Ok(values) if values.is_empty() => CellValue::Error(ErrorKind::Div0),
        Ok(values) => CellValue::Number(values.iter().sum::<f64>() / values.len() as f64),
        Err(e) => CellValue::Error(e),
    })
}

fn if_(args: &[CellValue]) -> Result<CellValue, FunctionError> {
    let condition = match args.first() {
        Some(CellValue::Logical(b)) => *b,
        Some(CellValue::Error(e)) => return Ok(CellValue::Error(*e)),
        _ => return Err(FunctionError::InvalidArgument { index: 0 }),
    };
    if condition {
        Ok(args.get(1).cloned().unwrap_or(CellValue::Logical(true)))
    } else {
        Ok(args.get(2).cloned().unwrap_or(CellValue::Logical(false)))
    }
}

fn and(args: &[CellValue]) -> Result<CellValue, FunctionError> {
    Ok(match logicals(args) {
        Ok(values) => CellValue::Logical(values.iter().all(|b| *b)),
        Err(e) => CellValue::Error(e),
    })
}

fn or(args: &[CellValue]) -> Result<CellValue, FunctionError> {
    Ok(match logicals(args) {
        Ok(values) => CellValue::Logical(values.iter().any(|b| *b)),
        Err(e) => CellValue::Error(e),
    })
}

fn not(args: &[CellValue]) -> Result<CellValue, FunctionError> {
    match args.first() {
        Some(CellValue::Logical(b)) => Ok(CellValue::Logical(!b)),
        Some(CellValue::Error(e)) => Ok(CellValue::Error(*e)),
        _ => Err(FunctionError::InvalidArgument { index: 0 }),
    }
}

fn concat(args: &[CellValue]) -> Result<CellValue, FunctionError> {
    let mut out = String::new();
    for value in args.iter().flat_map(|arg| match arg {
        CellValue::Array(rows) => rows.iter().flatten().collect::<Vec<_>>(),
        other => vec![other],
    }) {
        match value.coerce_to_text() {
            Ok(text) => out.push_str(&text),
            Err(e) => return Ok(CellValue::Error(e)),
        }
    }
    Ok(CellValue::Text(out))
}

fn iserror(args: &[CellValue]) -> Result<CellValue, FunctionError> {
    Ok(CellValue::Logical(args.first().is_some_and(CellValue::is_error)))
}

/// Local time as a serial day number counted from 1899-12-30.
fn now(_: &[CellValue]) -> Result<CellValue, FunctionError> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| FunctionError::Failed("invalid serial date epoch".to_string()))?;
    let elapsed = Local::now().naive_local() - epoch;
    Ok(CellValue::Number(
        elapsed.num_milliseconds() as f64 / 86_400_000.0,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(rows: Vec<Vec<CellValue>>) -> CellValue {
        CellValue::Array(rows)
    }

    #[test]
    fn sum_skips_text_inside_ranges_but_coerces_scalars() {
        let range = array(vec![vec![1.0.into(), "x".into()], vec![CellValue::Empty, 2.0.into()]]);
        assert_eq!(sum(&[range, "3".into()]), Ok(CellValue::Number(6.0)));
        assert_eq!(
            sum(&["x".into()]),
            Ok(CellValue::Error(ErrorKind::Value))
        );
    }

    #[test]
    fn average_of_nothing_divides_by_zero() {
        assert_eq!(
            average(&[array(vec![vec![CellValue::Empty]])]),
            Ok(CellValue::Error(ErrorKind::Div0))
        );
        assert_eq!(average(&[2.0.into(), 4.0.into()]), Ok(CellValue::Number(3.0)));
    }

    #[test]
    fn if_defaults_missing_branch_to_false() {
        assert_eq!(if_(&[false.into(), 1.0.into()]), Ok(CellValue::Logical(false)));
        assert_eq!(
            if_(&[true.into(), 1.0.into(), 2.0.into()]),
            Ok(CellValue::Number(1.0))
        );
    }

    #[test]
    fn logical_aggregates() {
        assert_eq!(and(&[true.into(), 1.0.into()]), Ok(CellValue::Logical(true)));
        assert_eq!(or(&[false.into(), 0.0.into()]), Ok(CellValue::Logical(false)));
        assert_eq!(
            and(&[array(vec![vec!["a".into()]])]),
            Ok(CellValue::Error(ErrorKind::Value))
        );
    }

    #[test]
    fn concat_flattens_arrays() {
        let range = array(vec![vec!["a".into(), 1.0.into()], vec![true.into(), CellValue::Empty]]);
        assert_eq!(concat(&[range, "!".into()]), Ok(CellValue::Text("a1TRUE!".into())));
    }

    #[test]
    fn iserror_and_now() {
        assert_eq!(
            iserror(&[ErrorKind::NA.into()]),
            Ok(CellValue::Logical(true))
        );
        assert_eq!(iserror(&[1.0.into()]), Ok(CellValue::Logical(false)));
        match now(&[]) {
            Ok(CellValue::Number(serial)) => assert!(serial > 40_000.0),
            other => panic!("unexpected NOW result {other:?}"),
        }
    }
}
