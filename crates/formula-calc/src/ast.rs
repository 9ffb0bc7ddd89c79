use core::fmt;

use formula_refs::Reference;

use crate::functions::FunctionSpec;
use crate::value::{format_number, CellValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    /// Postfix `%`.
    Percent,
}

/// Binary operators, left-associative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    /// Binding power; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Gt
            | BinaryOp::Le
            | BinaryOp::Ge => 1,
            BinaryOp::Concat => 2,
            BinaryOp::Add | BinaryOp::Sub => 3,
            BinaryOp::Mul | BinaryOp::Div => 4,
            BinaryOp::Pow => 5,
        }
    }

    pub fn is_comparison(self) -> bool {
        self.precedence() == 1
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Concat => "&",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Expression tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Number, text, logical or error literal.
    Literal(CellValue),
    /// `{1,2;3,4}`; rows are kept as written even when their lengths differ.
    Array(Vec<Vec<CellValue>>),
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Paren(Box<Expr>),
    /// An unqualified name, resolved against the variable table at evaluation time.
    Variable(String),
    FunctionCall {
        name: String,
        args: Vec<Expr>,
        /// `None` when the name was unknown at parse time.
        function: Option<FunctionSpec>,
    },
    /// Index into the owning formula's reference list.
    Reference(usize),
}

impl Expr {
    /// Whether any function call in the tree is volatile.
    pub fn contains_volatile_call(&self) -> bool {
        match self {
            Expr::FunctionCall { args, function, .. } => {
                function.is_some_and(|f| f.is_volatile())
                    || args.iter().any(Expr::contains_volatile_call)
            }
            Expr::Unary { operand, .. } => operand.contains_volatile_call(),
            Expr::Binary { left, right, .. } => {
                left.contains_volatile_call() || right.contains_volatile_call()
            }
            Expr::Paren(inner) => inner.contains_volatile_call(),
            Expr::Literal(_) | Expr::Array(_) | Expr::Variable(_) | Expr::Reference(_) => false,
        }
    }

    /// Render back to formula text (without the leading `=`).
    pub fn render(&self, references: &[Reference], out: &mut String) {
        match self {
            Expr::Literal(value) => render_literal(value, out),
            Expr::Array(rows) => {
                out.push('{');
                for (i, row) in rows.iter().enumerate() {
                    if i > 0 {
                        out.push(';');
                    }
                    for (j, value) in row.iter().enumerate() {
                        if j > 0 {
                            out.push(',');
                        }
                        render_literal(value, out);
                    }
                }
                out.push('}');
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Plus => {
                    out.push('+');
                    operand.render(references, out);
                }
                UnaryOp::Minus => {
                    out.push('-');
                    operand.render(references, out);
                }
                UnaryOp::Percent => {
                    operand.render(references, out);
                    out.push('%');
                }
            },
            Expr::Binary { op, left, right } => {
                left.render(references, out);
                out.push_str(op.symbol());
                right.render(references, out);
            }
            Expr::Paren(inner) => {
                out.push('(');
                inner.render(references, out);
                out.push(')');
            }
            Expr::Variable(name) => out.push_str(name),
            Expr::FunctionCall { name, args, .. } => {
                out.push_str(name);
                out.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    arg.render(references, out);
                }
                out.push(')');
            }
            Expr::Reference(index) => match references.get(*index) {
                Some(reference) => out.push_str(&reference.to_string()),
                None => out.push_str("#REF!"),
            },
        }
    }
}

fn render_literal(value: &CellValue, out: &mut String) {
    match value {
        CellValue::Number(n) => out.push_str(&format_number(*n)),
        CellValue::Text(s) => {
            out.push('"');
            out.push_str(&s.replace('"', "\"\""));
            out.push('"');
        }
        other => out.push_str(&other.to_string()),
    }
}
