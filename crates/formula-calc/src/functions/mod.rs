//! The registrable function table consulted by the parser and the evaluator.

mod builtins;

use core::fmt;

use ahash::AHashMap;
use thiserror::Error;

use crate::value::CellValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Volatility {
    NonVolatile,
    /// The result can change without any referenced cell changing (e.g. `NOW`).
    Volatile,
}

/// Declared argument type. Arguments are coerced to it before the implementation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Passed through untouched, including errors and arrays.
    Any,
    Number,
    Text,
    Bool,
}

/// Internal failure of a function implementation.
///
/// The evaluator never propagates these; the calling cell gets `#N/A` instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FunctionError {
    #[error("argument {index} is not supported")]
    InvalidArgument { index: usize },
    #[error("{0}")]
    Failed(String),
}

pub type FunctionImpl = fn(&[CellValue]) -> Result<CellValue, FunctionError>;

#[derive(Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub volatility: Volatility,
    /// Per-position argument types; positions past the end reuse the last entry.
    pub arg_types: &'static [ValueType],
    pub implementation: FunctionImpl,
}

impl FunctionSpec {
    pub fn is_volatile(&self) -> bool {
        self.volatility == Volatility::Volatile
    }

    pub fn accepts_arity(&self, count: usize) -> bool {
        count >= self.min_args && count <= self.max_args
    }

    pub fn arg_type(&self, index: usize) -> ValueType {
        self.arg_types
            .get(index)
            .or_else(|| self.arg_types.last())
            .copied()
            .unwrap_or(ValueType::Any)
    }
}

impl fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("volatility", &self.volatility)
            .finish_non_exhaustive()
    }
}

impl PartialEq for FunctionSpec {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(other.name)
            && self.min_args == other.min_args
            && self.max_args == other.max_args
            && self.volatility == other.volatility
    }
}

/// Function lookup by (case-insensitive) name.
pub trait FunctionTable {
    fn function(&self, name: &str) -> Option<FunctionSpec>;
}

/// A map of function specs keyed by upper-cased name.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: AHashMap<String, FunctionSpec>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for spec in builtins::BUILTINS {
            registry.register(*spec);
        }
        registry
    }

    /// Register `spec`, returning the definition it replaced, if any.
    pub fn register(&mut self, spec: FunctionSpec) -> Option<FunctionSpec> {
        self.functions.insert(spec.name.to_ascii_uppercase(), spec)
    }

    pub fn get(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.get(&name.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl FunctionTable for FunctionRegistry {
    fn function(&self, name: &str) -> Option<FunctionSpec> {
        self.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = FunctionRegistry::with_builtins();
        assert!(registry.function("sum").is_some());
        assert!(registry.function("Sum").is_some());
        assert!(registry.function("NOPE").is_none());
    }

    #[test]
    fn now_is_the_only_volatile_builtin() {
        let registry = FunctionRegistry::with_builtins();
        let volatile: Vec<_> = builtins::BUILTINS
            .iter()
            .filter(|spec| spec.is_volatile())
            .map(|spec| spec.name)
            .collect();
        assert_eq!(volatile, vec!["NOW"]);
        assert_eq!(registry.len(), builtins::BUILTINS.len());
    }

    #[test]
    fn register_replaces_existing_definition() {
        fn one(_: &[CellValue]) -> Result<CellValue, FunctionError> {
            Ok(CellValue::Number(1.0))
        }
        let mut registry = FunctionRegistry::with_builtins();
        let previous = registry.register(FunctionSpec {
            name: "sum",
            min_args: 0,
            max_args: 0,
            volatility: Volatility::NonVolatile,
            arg_types: &[],
            implementation: one,
        });
        assert!(previous.is_some());
        let spec = registry.function("SUM").unwrap();
        assert_eq!((spec.implementation)(&[]), Ok(CellValue::Number(1.0)));
    }

    #[test]
    fn trailing_argument_types_repeat() {
        let registry = FunctionRegistry::with_builtins();
        let not = registry.function("NOT").unwrap();
        assert_eq!(not.arg_type(0), ValueType::Bool);
        let sum = registry.function("SUM").unwrap();
        assert_eq!(sum.arg_type(7), ValueType::Any);
    }
}
