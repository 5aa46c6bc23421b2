//! Source syntax tree consumed by the compiler.
//!
//! There is no parser; programs are built directly, usually with the
//! helper constructors below:
//!
//! ```
//! use regmachine_compiler::ast::{BinaryOp, Expr, Program, Stmt};
//!
//! // function square(x) { return x * x; } square(4);
//! let program = Program::new(vec![
//!     Stmt::function(
//!         "square",
//!         &["x"],
//!         vec![Stmt::ret(Expr::binary(BinaryOp::Mul, Expr::name("x"), Expr::name("x")))],
//!     ),
//!     Stmt::expr(Expr::call(Expr::name("square"), vec![Expr::num(4.0)])),
//! ]);
//! assert_eq!(program.statements.len(), 2);
//! ```

/// Binary operators; each compiles to an application of the primitive
/// bound to its symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::StrictEq => "===",
            BinaryOp::StrictNe => "!==",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `!x`
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

/// Short-circuiting operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    Str(String),
    /// Variable reference
    Name(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `predicate ? consequent : alternative`
    Conditional {
        predicate: Box<Expr>,
        consequent: Box<Expr>,
        alternative: Box<Expr>,
    },
    /// `(params) => { body }`
    Lambda {
        params: Vec<String>,
        body: Vec<Stmt>,
    },
    Application {
        operator: Box<Expr>,
        operands: Vec<Expr>,
    },
}

impl Expr {
    pub fn num(n: f64) -> Self {
        Expr::Number(n)
    }

    pub fn string(s: &str) -> Self {
        Expr::Str(s.to_string())
    }

    pub fn name(name: &str) -> Self {
        Expr::Name(name.to_string())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn logical(op: LogicalOp, left: Expr, right: Expr) -> Self {
        Expr::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn conditional(predicate: Expr, consequent: Expr, alternative: Expr) -> Self {
        Expr::Conditional {
            predicate: Box::new(predicate),
            consequent: Box::new(consequent),
            alternative: Box::new(alternative),
        }
    }

    pub fn lambda(params: &[&str], body: Vec<Stmt>) -> Self {
        Expr::Lambda {
            params: params.iter().map(|p| p.to_string()).collect(),
            body,
        }
    }

    /// `(params) => expr`
    pub fn arrow(params: &[&str], body: Expr) -> Self {
        Expr::lambda(params, vec![Stmt::Return(body)])
    }

    pub fn call(operator: Expr, operands: Vec<Expr>) -> Self {
        Expr::Application {
            operator: Box::new(operator),
            operands,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `const name = value;`
    Const { name: String, value: Expr },
    /// `function name(params) { body }`
    Function {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
    },
    Return(Expr),
    /// `if (predicate) { consequent } else { alternative }`
    If {
        predicate: Expr,
        consequent: Vec<Stmt>,
        alternative: Option<Vec<Stmt>>,
    },
    Block(Vec<Stmt>),
    Expr(Expr),
}

impl Stmt {
    pub fn constant(name: &str, value: Expr) -> Self {
        Stmt::Const {
            name: name.to_string(),
            value,
        }
    }

    pub fn function(name: &str, params: &[&str], body: Vec<Stmt>) -> Self {
        Stmt::Function {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            body,
        }
    }

    pub fn ret(value: Expr) -> Self {
        Stmt::Return(value)
    }

    pub fn if_else(predicate: Expr, consequent: Vec<Stmt>, alternative: Vec<Stmt>) -> Self {
        Stmt::If {
            predicate,
            consequent,
            alternative: Some(alternative),
        }
    }

    pub fn if_then(predicate: Expr, consequent: Vec<Stmt>) -> Self {
        Stmt::If {
            predicate,
            consequent,
            alternative: None,
        }
    }

    pub fn expr(value: Expr) -> Self {
        Stmt::Expr(value)
    }

    /// Name this statement declares in its enclosing block, if any.
    pub fn declared_name(&self) -> Option<&str> {
        match self {
            Stmt::Const { name, .. } | Stmt::Function { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }
}

/// A whole program: the statements of the top-level block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Program { statements }
    }
}

/// Names declared directly in `stmts`, in order, without duplicates.
/// Nested blocks and function bodies are not searched.
pub fn scan_declarations(stmts: &[Stmt]) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    for name in stmts.iter().filter_map(Stmt::declared_name) {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_declarations_stays_in_block() {
        let stmts = vec![
            Stmt::constant("a", Expr::num(1.0)),
            Stmt::Block(vec![Stmt::constant("hidden", Expr::num(2.0))]),
            Stmt::function("f", &["x"], vec![Stmt::constant("local", Expr::num(3.0))]),
            Stmt::expr(Expr::name("a")),
        ];
        assert_eq!(scan_declarations(&stmts), vec!["a", "f"]);
    }

    #[test]
    fn test_arrow_wraps_return() {
        let arrow = Expr::arrow(&["x"], Expr::name("x"));
        assert_eq!(
            arrow,
            Expr::Lambda {
                params: vec!["x".to_string()],
                body: vec![Stmt::Return(Expr::name("x"))],
            }
        );
    }
}
