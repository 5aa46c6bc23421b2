//! Ready-made Source programs.

use crate::ast::{BinaryOp, Expr, Program, Stmt};

use BinaryOp::{Add, Div, Gt, Mul, StrictEq, Sub};

fn bin(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::binary(op, left, right)
}

fn call(name: &str, operands: Vec<Expr>) -> Expr {
    Expr::call(Expr::name(name), operands)
}

/// Newton's method on `2x² + 5x − 1`, starting from 1:
///
/// ```text
/// const precision = 0.000001;
/// function f(x) { return x*x*2 + 5*x - 1; }
/// function derivative(f) {
///     const h = 0.001;
///     return (x) => { return (f(x + h) - f(x - h)) / (2 * h); };
/// }
/// function newtonsMethod(guess, prevGuess) {
///     const myguess = guess === 0 ? 0 : guess;
///     if (math_abs(prevGuess - myguess) > precision) {
///         const new_prevGuess = myguess;
///         const approx = myguess - (f(myguess) / derivative(f)(myguess));
///         return newtonsMethod(approx, new_prevGuess);
///     } else {
///         return myguess;
///     }
/// }
/// newtonsMethod(1, 0);
/// ```
///
/// Evaluates to roughly `0.18614066163450715`.
pub fn newton() -> Program {
    let x = || Expr::name("x");
    let h = || Expr::name("h");
    let myguess = || Expr::name("myguess");

    let f = Stmt::function(
        "f",
        &["x"],
        vec![Stmt::ret(bin(
            Sub,
            bin(
                Add,
                bin(Mul, bin(Mul, x(), x()), Expr::num(2.0)),
                bin(Mul, Expr::num(5.0), x()),
            ),
            Expr::num(1.0),
        ))],
    );

    let derivative = Stmt::function(
        "derivative",
        &["f"],
        vec![
            Stmt::constant("h", Expr::num(0.001)),
            Stmt::ret(Expr::arrow(
                &["x"],
                bin(
                    Div,
                    bin(
                        Sub,
                        call("f", vec![bin(Add, x(), h())]),
                        call("f", vec![bin(Sub, x(), h())]),
                    ),
                    bin(Mul, Expr::num(2.0), h()),
                ),
            )),
        ],
    );

    let step = bin(
        Div,
        call("f", vec![myguess()]),
        Expr::call(call("derivative", vec![Expr::name("f")]), vec![myguess()]),
    );
    let newtons_method = Stmt::function(
        "newtonsMethod",
        &["guess", "prevGuess"],
        vec![
            Stmt::constant(
                "myguess",
                Expr::conditional(
                    bin(StrictEq, Expr::name("guess"), Expr::num(0.0)),
                    Expr::num(0.0),
                    Expr::name("guess"),
                ),
            ),
            Stmt::if_else(
                bin(
                    Gt,
                    call(
                        "math_abs",
                        vec![bin(Sub, Expr::name("prevGuess"), myguess())],
                    ),
                    Expr::name("precision"),
                ),
                vec![
                    Stmt::constant("new_prevGuess", myguess()),
                    Stmt::constant("approx", bin(Sub, myguess(), step)),
                    Stmt::ret(call(
                        "newtonsMethod",
                        vec![Expr::name("approx"), Expr::name("new_prevGuess")],
                    )),
                ],
                vec![Stmt::ret(myguess())],
            ),
        ],
    );

    Program::new(vec![
        Stmt::constant("precision", Expr::num(0.000001)),
        f,
        derivative,
        newtons_method,
        Stmt::expr(call("newtonsMethod", vec![Expr::num(1.0), Expr::num(0.0)])),
    ])
}

/// Recursive factorial; the call is not in tail position, so the stack
/// grows with `n`.
///
/// ```text
/// function factorial(n) { return n === 1 ? 1 : n * factorial(n - 1); }
/// factorial(n);
/// ```
pub fn factorial(n: f64) -> Program {
    let n_ = || Expr::name("n");
    Program::new(vec![
        Stmt::function(
            "factorial",
            &["n"],
            vec![Stmt::ret(Expr::conditional(
                bin(StrictEq, n_(), Expr::num(1.0)),
                Expr::num(1.0),
                bin(Mul, n_(), call("factorial", vec![bin(Sub, n_(), Expr::num(1.0))])),
            ))],
        ),
        Stmt::expr(call("factorial", vec![Expr::num(n)])),
    ])
}

/// Counts down to zero with a call in tail position; stack depth stays
/// flat regardless of `n`.
///
/// ```text
/// function count(n) { return n === 0 ? "done" : count(n - 1); }
/// count(n);
/// ```
pub fn countdown(n: f64) -> Program {
    let n_ = || Expr::name("n");
    Program::new(vec![
        Stmt::function(
            "count",
            &["n"],
            vec![Stmt::ret(Expr::conditional(
                bin(StrictEq, n_(), Expr::num(0.0)),
                Expr::string("done"),
                call("count", vec![bin(Sub, n_(), Expr::num(1.0))]),
            ))],
        ),
        Stmt::expr(call("count", vec![Expr::num(n)])),
    ])
}
