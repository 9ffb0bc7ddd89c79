use std::sync::Arc;

use formula_refs::Reference;

use crate::ast::Expr;
use crate::functions::FunctionTable;
use crate::parser;

/// Parser output: the expression tree, its references in parse order and any diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxTree {
    pub root: Expr,
    pub references: Vec<Reference>,
    pub errors: Vec<String>,
}

/// A parsed formula as stored in the dependency graph.
///
/// Immutable: structural edits build a replacement with [`CellFormula::with_references`], which
/// shares the tree with the original. Cloning is cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct CellFormula {
    root: Arc<Expr>,
    references: Arc<[Reference]>,
    errors: Arc<[String]>,
    volatile: bool,
}

impl CellFormula {
    /// Parse `text` (which must start with `=`), resolving function names against `functions`.
    ///
    /// Never fails; problems are reported through [`CellFormula::errors`].
    pub fn parse(text: &str, functions: &dyn FunctionTable) -> Self {
        Self::from_tree(parser::parse_str(text, functions))
    }

    pub fn from_tree(tree: SyntaxTree) -> Self {
        let volatile = tree.root.contains_volatile_call();
        Self {
            root: Arc::new(tree.root),
            references: tree.references.into(),
            errors: tree.errors.into(),
            volatile,
        }
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn contains_volatile_call(&self) -> bool {
        self.volatile
    }

    /// The same formula reading `references` instead. Entries correspond by position.
    #[must_use]
    pub fn with_references(&self, references: Vec<Reference>) -> Self {
        debug_assert_eq!(references.len(), self.references.len());
        Self {
            root: Arc::clone(&self.root),
            references: references.into(),
            errors: Arc::clone(&self.errors),
            volatile: self.volatile,
        }
    }

    /// Render the formula text from the tree and the current references.
    pub fn to_formula_string(&self) -> String {
        let mut out = String::from("=");
        self.root.render(&self.references, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use formula_refs::Axis;

    #[test]
    fn renders_shifted_and_invalidated_references() {
        let functions = FunctionRegistry::with_builtins();
        let formula = CellFormula::parse("=SUM(A1:B3, $C$4)*2", &functions);
        assert_eq!(formula.to_formula_string(), "=SUM(A1:B3,$C$4)*2");

        let shifted: Vec<_> = formula
            .references()
            .iter()
            .map(|r| r.insert_row_col(0, 1, Axis::Row))
            .collect();
        let moved = formula.with_references(shifted);
        assert_eq!(moved.to_formula_string(), "=SUM(A2:B4,$C$5)*2");

        let removed: Vec<_> = formula
            .references()
            .iter()
            .map(|r| r.remove_row_col(3, 1, Axis::Row))
            .collect();
        assert_eq!(
            formula.with_references(removed).to_formula_string(),
            "=SUM(A1:B3,#REF!)*2"
        );
    }

    #[test]
    fn replacement_shares_tree_and_keeps_original_intact() {
        let functions = FunctionRegistry::with_builtins();
        let formula = CellFormula::parse("=A1", &functions);
        let moved = formula.with_references(vec![formula.references()[0].insert_row_col(
            0,
            2,
            Axis::Row,
        )]);
        assert!(Arc::ptr_eq(&formula.root, &moved.root));
        assert_eq!(formula.to_formula_string(), "=A1");
        assert_eq!(moved.to_formula_string(), "=A3");
    }

    #[test]
    fn volatility_is_recorded_up_front() {
        let functions = FunctionRegistry::with_builtins();
        assert!(CellFormula::parse("=1+IF(TRUE,NOW(),0)", &functions).contains_volatile_call());
        assert!(!CellFormula::parse("=SUM(1)", &functions).contains_volatile_call());
    }
}
