//! Recursive-descent, precedence-climbing formula parser.
//!
//! Parsing never fails. Each production has a recovery path that records a diagnostic and
//! yields an error literal, so callers always get a best-effort [`SyntaxTree`].

pub mod lexer;

use formula_refs::{name_to_col, Address, ColAddress, Reference, RowAddress, MAX_COLS, MAX_ROWS};

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::formula::SyntaxTree;
use crate::functions::FunctionTable;
use crate::value::{CellValue, ErrorKind};
use lexer::{lex, Span, Token, TokenKind};

/// Deepest nesting of groups, prefix operators and function calls a formula may use.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Lex and parse `formula`.
pub fn parse_str(formula: &str, functions: &dyn FunctionTable) -> SyntaxTree {
    let lexed = lex(formula);
    parse(lexed.tokens, lexed.errors, functions)
}

/// Parse a token stream. `errors` seeds the diagnostics (typically the lexer's).
pub fn parse(
    mut tokens: Vec<Token>,
    errors: Vec<String>,
    functions: &dyn FunctionTable,
) -> SyntaxTree {
    if !matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Eof)) {
        let end = tokens.last().map_or(0, |t| t.span.end);
        tokens.push(Token {
            kind: TokenKind::Eof,
            span: Span::new(end, end),
        });
    }
    tokens.retain(|t| !matches!(t.kind, TokenKind::Whitespace));

    let mut parser = Parser {
        tokens,
        pos: 0,
        errors,
        references: Vec::new(),
        functions,
        depth: 0,
        truncated: false,
    };
    let root = parser.parse_formula();
    SyntaxTree {
        root,
        references: parser.references,
        errors: parser.errors,
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<String>,
    references: Vec<Reference>,
    functions: &'a dyn FunctionTable,
    depth: usize,
    /// Set once the nesting limit cut the formula short; later closing tokens are not reported.
    truncated: bool,
}

impl Parser<'_> {
    fn parse_formula(&mut self) -> Expr {
        self.expect(&TokenKind::Eq);
        let expr = self.parse_expression();
        self.expect(&TokenKind::Eof);
        expr
    }

    fn parse_expression(&mut self) -> Expr {
        self.parse_binary(0)
    }

    fn parse_binary(&mut self, parent_precedence: u8) -> Expr {
        let mut left = self.parse_unary();
        loop {
            let Some(op) = binary_op(self.current()) else {
                return left;
            };
            let precedence = op.precedence();
            if precedence <= parent_precedence {
                return left;
            }
            self.advance();
            let right = self.parse_binary(precedence);
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Expr {
        let op = match self.current() {
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Minus => UnaryOp::Minus,
            _ => return self.parse_postfix(),
        };
        if !self.enter() {
            return self.too_deep();
        }
        let operand = self.parse_unary();
        self.leave();
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    fn parse_postfix(&mut self) -> Expr {
        let mut expr = self.parse_primary();
        while matches!(self.current(), TokenKind::Percent) {
            self.advance();
            expr = Expr::Unary {
                op: UnaryOp::Percent,
                operand: Box::new(expr),
            };
        }
        expr
    }

    fn parse_primary(&mut self) -> Expr {
        match self.current().clone() {
            TokenKind::LParen => {
                if !self.enter() {
                    return self.too_deep();
                }
                let inner = self.parse_expression();
                self.leave();
                self.expect(&TokenKind::RParen);
                Expr::Paren(Box::new(inner))
            }
            TokenKind::Identifier(name) => self.parse_identifier(name),
            TokenKind::LBrace => self.parse_array(),
            TokenKind::SheetLocator(sheet) => {
                self.advance();
                let token = self.advance();
                match try_convert_to_address(&token) {
                    Some(address) => self.parse_reference(address, Some(sheet)),
                    None => self.error_literal(
                        "Expected address token after sheet locator".to_string(),
                        ErrorKind::Ref,
                    ),
                }
            }
            TokenKind::Address(address) => {
                self.advance();
                self.parse_reference(address, None)
            }
            TokenKind::Number { .. } if matches!(self.peek(1), TokenKind::Colon) => {
                let token = self.advance();
                match try_convert_to_address(&token) {
                    Some(address) => self.parse_reference(address, None),
                    None => self.error_literal(
                        format!("Invalid row reference {}", literal_text(&token)),
                        ErrorKind::Ref,
                    ),
                }
            }
            _ => Expr::Literal(self.parse_literal()),
        }
    }

    fn parse_identifier(&mut self, name: String) -> Expr {
        if matches!(self.peek(1), TokenKind::LParen) {
            return self.parse_function_call(name);
        }
        let token = self.advance();
        if matches!(self.current(), TokenKind::Colon) {
            if let Some(address) = try_convert_to_address(&token) {
                return self.parse_reference(address, None);
            }
        }
        Expr::Variable(name)
    }

    fn parse_function_call(&mut self, name: String) -> Expr {
        if !self.enter() {
            return self.too_deep();
        }
        self.expect(&TokenKind::LParen);
        let mut args = Vec::new();
        while !matches!(self.current(), TokenKind::RParen | TokenKind::Eof) {
            args.push(self.parse_expression());
            if !matches!(self.current(), TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.leave();
        self.expect(&TokenKind::RParen);

        let function = self.functions.function(&name);
        if function.is_none() {
            self.errors.push(format!("Function {name} does not exist"));
        }
        Expr::FunctionCall {
            name,
            args,
            function,
        }
    }

    /// Continue a reference whose first address has already been consumed.
    fn parse_reference(&mut self, address: Address, sheet: Option<String>) -> Expr {
        if !matches!(self.current(), TokenKind::Colon) {
            let reference = match &address {
                Address::Cell(cell) => Reference::cell(*cell),
                Address::Named(name) => Reference::named(name.clone()),
                Address::Row(_) | Address::Col(_) => {
                    return self.error_literal(
                        format!("Incomplete {} reference {address}", address.kind()),
                        ErrorKind::Ref,
                    );
                }
            };
            return self.push_reference(reference.with_sheet(sheet));
        }

        self.advance();
        let mut same_sheet = true;
        if let TokenKind::SheetLocator(second_sheet) = self.current().clone() {
            self.advance();
            same_sheet = sheet.as_deref() == Some(second_sheet.as_str());
        }

        let token = self.advance();
        if !same_sheet {
            return self.error_literal(
                "References must be on the same sheet".to_string(),
                ErrorKind::Ref,
            );
        }
        let Some(end) = try_convert_to_address(&token) else {
            return self.error_literal("Invalid reference".to_string(), ErrorKind::Ref);
        };
        if end.kind() != address.kind() {
            return self.error_literal(
                format!("Invalid reference {} to {}", address.kind(), end.kind()),
                ErrorKind::Ref,
            );
        }

        let reference = match (address, end) {
            (Address::Cell(start), Address::Cell(end)) => Reference::cell_range(start, end),
            (Address::Row(start), Address::Row(end)) => Reference::row_range(start, end),
            (Address::Col(start), Address::Col(end)) => Reference::col_range(start, end),
            _ => return self.error_literal("Invalid reference".to_string(), ErrorKind::Ref),
        };
        self.push_reference(reference.with_sheet(sheet))
    }

    fn push_reference(&mut self, reference: Reference) -> Expr {
        self.references.push(reference);
        Expr::Reference(self.references.len() - 1)
    }

    fn parse_array(&mut self) -> Expr {
        self.advance();
        let mut rows = Vec::new();
        let mut row = Vec::new();
        if !matches!(self.current(), TokenKind::RBrace) {
            loop {
                row.push(self.parse_array_item());
                match self.current() {
                    TokenKind::Comma => {
                        self.advance();
                    }
                    TokenKind::Semicolon => {
                        self.advance();
                        rows.push(std::mem::take(&mut row));
                    }
                    _ => break,
                }
            }
        }
        rows.push(row);

        if rows.windows(2).any(|pair| pair[0].len() != pair[1].len()) {
            self.errors.push("Row lengths are not equal".to_string());
        }
        self.expect(&TokenKind::RBrace);
        Expr::Array(rows)
    }

    fn parse_array_item(&mut self) -> CellValue {
        if matches!(self.current(), TokenKind::Minus)
            && matches!(self.peek(1), TokenKind::Number { .. })
        {
            self.advance();
            return match self.parse_literal() {
                CellValue::Number(n) => CellValue::Number(-n),
                other => other,
            };
        }
        self.parse_literal()
    }

    fn parse_literal(&mut self) -> CellValue {
        let token = self.advance();
        match token.kind {
            TokenKind::Number { value, .. } => CellValue::Number(value),
            TokenKind::String(s) => CellValue::Text(s),
            TokenKind::Logical(b) => CellValue::Logical(b),
            TokenKind::Error(kind) => CellValue::Error(kind),
            other => {
                self.errors
                    .push(format!("Unable to parse literal {}", other.describe()));
                CellValue::Error(ErrorKind::NA)
            }
        }
    }

    /// Consume the token opening a nested level. Returns false, without consuming, once
    /// [`MAX_NESTING_DEPTH`] levels are open.
    fn enter(&mut self) -> bool {
        if self.depth >= MAX_NESTING_DEPTH {
            return false;
        }
        self.depth += 1;
        self.advance();
        true
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Skip the rest of the formula; nothing past the nesting limit is parsed.
    fn too_deep(&mut self) -> Expr {
        while !matches!(self.current(), TokenKind::Eof) {
            self.advance();
        }
        self.truncated = true;
        self.error_literal(
            format!("Expression nesting exceeds the {MAX_NESTING_DEPTH}-level limit"),
            ErrorKind::Value,
        )
    }

    fn error_literal(&mut self, message: String, kind: ErrorKind) -> Expr {
        self.errors.push(message);
        Expr::Literal(CellValue::Error(kind))
    }

    /// Consume the current token if it has the same kind as `expected`; otherwise record an
    /// error and stay put.
    fn expect(&mut self, expected: &TokenKind) -> bool {
        if std::mem::discriminant(self.current()) == std::mem::discriminant(expected) {
            self.advance();
            true
        } else if self.truncated {
            false
        } else {
            self.errors.push(format!(
                "Unexpected token: <{}>. Expected {}",
                self.current().describe(),
                expected.describe()
            ));
            false
        }
    }

    fn current(&self) -> &TokenKind {
        self.peek(0)
    }

    /// The token `offset` positions ahead; the trailing `Eof` repeats forever.
    fn peek(&self, offset: usize) -> &TokenKind {
        let index = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[index].kind
    }

    fn advance(&mut self) -> Token {
        let index = self.pos.min(self.tokens.len() - 1);
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        self.tokens[index].clone()
    }
}

fn binary_op(kind: &TokenKind) -> Option<BinaryOp> {
    Some(match kind {
        TokenKind::Eq => BinaryOp::Eq,
        TokenKind::Ne => BinaryOp::Ne,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::Le => BinaryOp::Le,
        TokenKind::Ge => BinaryOp::Ge,
        TokenKind::Amp => BinaryOp::Concat,
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Caret => BinaryOp::Pow,
        _ => return None,
    })
}

/// Address tokens convert directly; integers become rows and all-letter identifiers become
/// columns, so `1:3` and `A:C` parse as ranges.
fn try_convert_to_address(token: &Token) -> Option<Address> {
    match &token.kind {
        TokenKind::Address(address) => Some(address.clone()),
        TokenKind::Number {
            value,
            is_integer: true,
        } if *value >= 1.0 && *value <= f64::from(MAX_ROWS) => {
            Some(Address::Row(RowAddress::new(*value as u32 - 1, false)))
        }
        TokenKind::Identifier(name) if name.chars().all(|c| c.is_ascii_alphabetic()) => {
            match name_to_col(name) {
                Ok(col) if col < MAX_COLS => Some(Address::Col(ColAddress::new(col, false))),
                _ => None,
            }
        }
        _ => None,
    }
}

fn literal_text(token: &Token) -> String {
    match &token.kind {
        TokenKind::Number { value, .. } => value.to_string(),
        other => other.describe().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use formula_refs::{CellAddress, Region};

    fn parse_text(text: &str) -> SyntaxTree {
        parse_str(text, &FunctionRegistry::with_builtins())
    }

    fn render(tree: &SyntaxTree) -> String {
        let mut out = String::new();
        tree.root.render(&tree.references, &mut out);
        out
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let tree = parse_text("=1+2*3");
        assert!(tree.errors.is_empty());
        match &tree.root {
            Expr::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(**right, Expr::Binary { op: BinaryOp::Mul, .. })),
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn binaries_are_left_associative() {
        let tree = parse_text("=10-4-3");
        match &tree.root {
            Expr::Binary {
                op: BinaryOp::Sub,
                left,
                right,
            } => {
                assert!(matches!(**left, Expr::Binary { op: BinaryOp::Sub, .. }));
                assert_eq!(**right, Expr::Literal(CellValue::Number(3.0)));
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn percent_is_postfix_and_unary_binds_tightest() {
        let tree = parse_text("=-50%*2");
        match &tree.root {
            Expr::Binary {
                op: BinaryOp::Mul,
                left,
                ..
            } => match &**left {
                Expr::Unary {
                    op: UnaryOp::Minus,
                    operand,
                } => assert!(matches!(
                    **operand,
                    Expr::Unary {
                        op: UnaryOp::Percent,
                        ..
                    }
                )),
                other => panic!("unexpected operand {other:?}"),
            },
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn collects_references_in_parse_order() {
        let tree = parse_text("=A1+Sheet2!B2:C3+SUM(1:2, $D:E)");
        assert!(tree.errors.is_empty(), "{:?}", tree.errors);
        let regions: Vec<_> = tree.references.iter().map(|r| r.region()).collect();
        assert_eq!(
            regions,
            vec![
                Some(Region::cell(0, 0)),
                Some(Region::new(1, 2, 1, 2)),
                Some(Region::rows(0, 1)),
                Some(Region::cols(3, 4)),
            ]
        );
        assert_eq!(tree.references[1].sheet(), Some("Sheet2"));
        assert_eq!(render(&tree), "A1+Sheet2!B2:C3+SUM(1:2,$D:E)");
    }

    #[test]
    fn cross_sheet_range_is_a_reference_error() {
        let tree = parse_text("=Sheet1!A1:Sheet2!B2");
        assert_eq!(tree.errors, vec!["References must be on the same sheet".to_string()]);
        assert!(tree.references.is_empty());
    }

    #[test]
    fn qualified_range_end_may_repeat_the_sheet() {
        let tree = parse_text("='My Sheet'!A1:'My Sheet'!B2");
        assert!(tree.errors.is_empty(), "{:?}", tree.errors);
        assert_eq!(tree.references[0].to_string(), "'My Sheet'!A1:B2");
    }

    #[test]
    fn mismatched_range_kinds_are_a_reference_error() {
        let tree = parse_text("=A1:3");
        assert_eq!(tree.root, Expr::Literal(CellValue::Error(ErrorKind::Ref)));
        assert_eq!(tree.errors.len(), 1);
    }

    #[test]
    fn arrays_and_row_length_mismatch() {
        let tree = parse_text("={1,2;3,4}");
        assert!(tree.errors.is_empty());
        assert_eq!(
            tree.root,
            Expr::Array(vec![
                vec![1.0.into(), 2.0.into()],
                vec![3.0.into(), 4.0.into()]
            ])
        );

        let ragged = parse_text("={1,2;3}");
        assert_eq!(ragged.errors, vec!["Row lengths are not equal".to_string()]);
        assert!(matches!(ragged.root, Expr::Array(ref rows) if rows.len() == 2));
    }

    #[test]
    fn unknown_function_still_produces_a_call_node() {
        let tree = parse_text("=FOO(1,A1)");
        assert_eq!(tree.errors, vec!["Function FOO does not exist".to_string()]);
        match &tree.root {
            Expr::FunctionCall {
                name,
                args,
                function,
            } => {
                assert_eq!(name, "FOO");
                assert_eq!(args.len(), 2);
                assert!(function.is_none());
            }
            other => panic!("unexpected tree {other:?}"),
        }
        assert_eq!(tree.references.len(), 1);
    }

    #[test]
    fn missing_equals_is_reported_but_parsed() {
        let tree = parse_text("1+1");
        assert_eq!(tree.errors, vec!["Unexpected token: <Number>. Expected Equals".to_string()]);
        assert!(matches!(tree.root, Expr::Binary { op: BinaryOp::Add, .. }));
    }

    #[test]
    fn garbage_never_panics() {
        for text in ["=", "=(", "=)", "={", "=SUM(", "=A1:", "=Sheet1!", "=1+*2", "=#FOO", "=\"x"] {
            let tree = parse_text(text);
            assert!(!tree.errors.is_empty(), "{text} should report errors");
        }
    }

    #[test]
    fn nesting_up_to_the_limit_parses() {
        let depth = MAX_NESTING_DEPTH;
        let text = format!("={}1{}", "(".repeat(depth), ")".repeat(depth));
        let tree = parse_text(&text);
        assert!(tree.errors.is_empty(), "{:?}", tree.errors);
        assert_eq!(render(&tree), text[1..]);
    }

    #[test]
    fn nesting_past_the_limit_is_one_diagnostic() {
        let limit = format!("Expression nesting exceeds the {MAX_NESTING_DEPTH}-level limit");
        for text in [
            format!("={}1{}", "(".repeat(2000), ")".repeat(2000)),
            format!("={}1", "-".repeat(2000)),
            format!("={}1{}", "SUM(".repeat(2000), ")".repeat(2000)),
            format!("={}A1{}", "(-".repeat(50_000), ")".repeat(50_000)),
        ] {
            let tree = parse_text(&text);
            assert_eq!(tree.errors, vec![limit.clone()]);
        }
    }

    #[test]
    fn variables_and_error_literals() {
        let tree = parse_text("=rate*#N/A");
        assert!(tree.errors.is_empty());
        assert_eq!(
            tree.root,
            Expr::Binary {
                op: BinaryOp::Mul,
                left: Box::new(Expr::Variable("rate".to_string())),
                right: Box::new(Expr::Literal(CellValue::Error(ErrorKind::NA))),
            }
        );
    }

    #[test]
    fn fixed_markers_survive() {
        let tree = parse_text("=$A$1:B$2");
        assert_eq!(
            tree.references[0],
            Reference::cell_range(
                CellAddress::fixed(0, 0, true, true),
                CellAddress::fixed(1, 1, true, false)
            )
        );
    }
}
