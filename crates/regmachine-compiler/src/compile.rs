//! Source to controller compiler.
//!
//! Follows the explicit-control compile model: every construct is compiled
//! against a *target* register that receives its value and a *linkage* that
//! says where control goes next. Calls in tail position are compiled with
//! `Return` linkage, which jumps straight into the callee with `continue`
//! untouched, so tail recursion runs in constant stack space.
//!
//! Scoping: a function body's declarations live in the frame that binds its
//! parameters; a nested block that declares names gets its own frame from
//! `extend_environment_block`. Declared names are bound to the unassigned
//! sentinel on entry, so reading one before its declaration runs faults.

use regmachine::{Inst, VExp, Value};
use tracing::debug;

use crate::ast::{scan_declarations, Expr, LogicalOp, Program, Stmt};
use crate::error::{CompileError, Result};
use crate::sequence::{
    append_instruction_sequences, append_sequences, end_with_linkage,
    parallel_instruction_sequences, preserving, tack_on_instruction_sequence, InstructionSeq,
    Linkage, Register, ALL_REGS,
};

use Register::{Argl, Continue, Env, Proc, Val};

/// Compile a whole program into controller text. The program's value ends
/// up in `val`.
pub fn compile_program(program: &Program) -> Result<Vec<Inst>> {
    Compiler::new().compile_program(program)
}

/// Either arm of a conditional.
#[derive(Clone, Copy)]
enum Branch<'a> {
    Expr(&'a Expr),
    Block(&'a [Stmt]),
}

/// Compiler state: the counter that keeps generated labels unique.
#[derive(Debug, Default)]
pub struct Compiler {
    label_counter: usize,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    fn make_label(&mut self, prefix: &str) -> String {
        self.label_counter += 1;
        format!("{}{}", prefix, self.label_counter)
    }

    pub fn compile_program(&mut self, program: &Program) -> Result<Vec<Inst>> {
        if program.statements.is_empty() {
            return Err(CompileError::EmptyProgram);
        }
        let declare = declare_unassigned(&scan_declarations(&program.statements));
        let body = self.compile_statements(&program.statements, Val, &Linkage::Next, false)?;
        let seq = append_instruction_sequences(declare, body);
        debug!(
            statements = program.statements.len(),
            instructions = seq.statements.len(),
            labels = self.label_counter,
            "compiled program"
        );
        Ok(seq.statements)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// `tail` marks the statements that end a function body; only there is
    /// `return` allowed, and falling off the end returns `undefined`.
    fn compile_statements(
        &mut self,
        stmts: &[Stmt],
        target: Register,
        linkage: &Linkage,
        tail: bool,
    ) -> Result<InstructionSeq> {
        match stmts {
            [] if tail => Ok(return_undefined()),
            [] => Ok(end_with_linkage(linkage, assign_undefined(target))),
            [last] => self.compile_statement(last, target, linkage, tail),
            [first, rest @ ..] => {
                let first = self.compile_statement(first, target, &Linkage::Next, false)?;
                let rest = self.compile_statements(rest, target, linkage, tail)?;
                Ok(preserving(&[Env, Continue], first, rest))
            }
        }
    }

    fn compile_statement(
        &mut self,
        stmt: &Stmt,
        target: Register,
        linkage: &Linkage,
        tail: bool,
    ) -> Result<InstructionSeq> {
        match stmt {
            Stmt::Return(value) if tail => self.compile_expr(value, Val, &Linkage::Return),
            Stmt::Return(_) => Err(CompileError::MisplacedReturn),
            Stmt::If {
                predicate,
                consequent,
                alternative,
            } => {
                let alternative = alternative.as_deref().unwrap_or(&[]);
                self.compile_if(
                    predicate,
                    Branch::Block(consequent),
                    Branch::Block(alternative),
                    target,
                    linkage,
                    tail,
                )
            }
            Stmt::Block(stmts) => self.compile_block(stmts, target, linkage, tail),
            _ if tail => {
                let code = self.compile_statement(stmt, Val, &Linkage::Next, false)?;
                Ok(preserving(&[Continue], code, return_undefined()))
            }
            Stmt::Const { name, value } => {
                let value_code = self.compile_expr(value, Val, &Linkage::Next)?;
                Ok(compile_declaration(name, value_code, target, linkage))
            }
            Stmt::Function { name, params, body } => {
                let value_code = self.compile_lambda(params, body, Val, &Linkage::Next)?;
                Ok(compile_declaration(name, value_code, target, linkage))
            }
            Stmt::Expr(value) => self.compile_expr(value, target, linkage),
        }
    }

    fn compile_block(
        &mut self,
        stmts: &[Stmt],
        target: Register,
        linkage: &Linkage,
        tail: bool,
    ) -> Result<InstructionSeq> {
        let body = self.compile_statements(stmts, target, linkage, tail)?;
        let names = scan_declarations(stmts);
        if names.is_empty() {
            return Ok(body);
        }
        let enter = InstructionSeq::new(
            &[Env],
            &[Env],
            vec![Inst::assign(
                "env",
                VExp::op("extend_environment_block", [Env.reg()]),
            )],
        );
        Ok(append_sequences([enter, declare_unassigned(&names), body]))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Compile `expr` so its value lands in `target`, then follow `linkage`.
    pub fn compile_expr(
        &mut self,
        expr: &Expr,
        target: Register,
        linkage: &Linkage,
    ) -> Result<InstructionSeq> {
        match expr {
            Expr::Number(n) => Ok(compile_constant(Value::Number(*n), target, linkage)),
            Expr::Bool(b) => Ok(compile_constant(Value::Bool(*b), target, linkage)),
            Expr::Str(s) => Ok(compile_constant(Value::string(s), target, linkage)),
            Expr::Name(name) => Ok(compile_name(name, target, linkage)),
            Expr::Binary { op, left, right } => {
                let operator = Expr::name(op.symbol());
                self.compile_application(&operator, &[&**left, &**right], target, linkage)
            }
            Expr::Unary { op, operand } => {
                let operator = Expr::name(op.symbol());
                self.compile_application(&operator, &[&**operand], target, linkage)
            }
            Expr::Logical { op, left, right } => {
                // a && b  is  a ? b : false;  a || b  is  a ? true : b
                let (constant_false, constant_true) = (Expr::Bool(false), Expr::Bool(true));
                let (consequent, alternative) = match op {
                    LogicalOp::And => (&**right, &constant_false),
                    LogicalOp::Or => (&constant_true, &**right),
                };
                self.compile_if(
                    left,
                    Branch::Expr(consequent),
                    Branch::Expr(alternative),
                    target,
                    linkage,
                    false,
                )
            }
            Expr::Conditional {
                predicate,
                consequent,
                alternative,
            } => self.compile_if(
                predicate,
                Branch::Expr(consequent),
                Branch::Expr(alternative),
                target,
                linkage,
                false,
            ),
            Expr::Lambda { params, body } => self.compile_lambda(params, body, target, linkage),
            Expr::Application { operator, operands } => {
                let operands: Vec<&Expr> = operands.iter().collect();
                self.compile_application(operator, &operands, target, linkage)
            }
        }
    }

    fn compile_if(
        &mut self,
        predicate: &Expr,
        consequent: Branch<'_>,
        alternative: Branch<'_>,
        target: Register,
        linkage: &Linkage,
        tail: bool,
    ) -> Result<InstructionSeq> {
        let t_branch = self.make_label("true_branch");
        let f_branch = self.make_label("false_branch");
        let after_if = self.make_label("after_if");

        let consequent_linkage = match linkage {
            Linkage::Next => Linkage::Label(after_if.clone()),
            other => other.clone(),
        };

        let p_code = self.compile_expr(predicate, Val, &Linkage::Next)?;
        let c_code = self.compile_branch(consequent, target, &consequent_linkage, tail)?;
        let a_code = self.compile_branch(alternative, target, linkage, tail)?;

        let test_code = InstructionSeq::new(
            &[Val],
            &[],
            vec![
                Inst::test("is_false", [Val.reg()]),
                Inst::branch(&f_branch),
            ],
        );
        let branches = parallel_instruction_sequences(
            append_instruction_sequences(InstructionSeq::label(&t_branch), c_code),
            append_instruction_sequences(InstructionSeq::label(&f_branch), a_code),
        );

        Ok(preserving(
            &[Env, Continue],
            p_code,
            append_sequences([test_code, branches, InstructionSeq::label(&after_if)]),
        ))
    }

    fn compile_branch(
        &mut self,
        branch: Branch<'_>,
        target: Register,
        linkage: &Linkage,
        tail: bool,
    ) -> Result<InstructionSeq> {
        match branch {
            Branch::Expr(expr) => self.compile_expr(expr, target, linkage),
            Branch::Block(stmts) => self.compile_block(stmts, target, linkage, tail),
        }
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    fn compile_lambda(
        &mut self,
        params: &[String],
        body: &[Stmt],
        target: Register,
        linkage: &Linkage,
    ) -> Result<InstructionSeq> {
        let proc_entry = self.make_label("entry");
        let after_lambda = self.make_label("after_lambda");

        let lambda_linkage = match linkage {
            Linkage::Next => Linkage::Label(after_lambda.clone()),
            other => other.clone(),
        };

        let make_proc = InstructionSeq::new(
            &[Env],
            &[target],
            vec![Inst::assign(
                target.name(),
                VExp::op(
                    "make_compiled_procedure",
                    [VExp::label(&proc_entry), Env.reg()],
                ),
            )],
        );
        let proc_body = self.compile_lambda_body(params, body, &proc_entry)?;

        Ok(append_instruction_sequences(
            tack_on_instruction_sequence(end_with_linkage(&lambda_linkage, make_proc), proc_body),
            InstructionSeq::label(&after_lambda),
        ))
    }

    fn compile_lambda_body(
        &mut self,
        params: &[String],
        body: &[Stmt],
        entry_label: &str,
    ) -> Result<InstructionSeq> {
        let param_list = Value::list(params.iter().map(|p| Value::string(p)));
        let entry = InstructionSeq::new(
            &[Env, Proc, Argl],
            &[Env],
            vec![
                Inst::label(entry_label),
                Inst::assign("env", VExp::op("compiled_procedure_env", [Proc.reg()])),
                Inst::assign(
                    "env",
                    VExp::op(
                        "extend_environment",
                        [VExp::constant(param_list), Argl.reg(), Env.reg()],
                    ),
                ),
            ],
        );
        let declare = declare_unassigned(&scan_declarations(body));
        let body_code = self.compile_statements(body, Val, &Linkage::Return, true)?;
        Ok(append_sequences([entry, declare, body_code]))
    }

    fn compile_application(
        &mut self,
        operator: &Expr,
        operands: &[&Expr],
        target: Register,
        linkage: &Linkage,
    ) -> Result<InstructionSeq> {
        let proc_code = self.compile_expr(operator, Proc, &Linkage::Next)?;
        let operand_codes = operands
            .iter()
            .map(|operand| self.compile_expr(operand, Val, &Linkage::Next))
            .collect::<Result<Vec<_>>>()?;
        let call = self.compile_procedure_call(target, linkage)?;

        Ok(preserving(
            &[Env, Continue],
            proc_code,
            preserving(&[Proc, Continue], construct_arglist(operand_codes), call),
        ))
    }

    /// Dispatch on the kind of procedure in `proc`.
    fn compile_procedure_call(
        &mut self,
        target: Register,
        linkage: &Linkage,
    ) -> Result<InstructionSeq> {
        let primitive_branch = self.make_label("primitive_branch");
        let compiled_branch = self.make_label("compiled_branch");
        let after_call = self.make_label("after_call");

        let compiled_linkage = match linkage {
            Linkage::Next => Linkage::Label(after_call.clone()),
            other => other.clone(),
        };

        let test_code = InstructionSeq::new(
            &[Proc],
            &[],
            vec![
                Inst::test("is_primitive_procedure", [Proc.reg()]),
                Inst::branch(&primitive_branch),
            ],
        );
        let compiled_case = append_instruction_sequences(
            InstructionSeq::label(&compiled_branch),
            self.compile_proc_appl(target, &compiled_linkage)?,
        );
        let primitive_case = append_instruction_sequences(
            InstructionSeq::label(&primitive_branch),
            end_with_linkage(
                linkage,
                InstructionSeq::new(
                    &[Proc, Argl],
                    &[target],
                    vec![Inst::assign(
                        target.name(),
                        VExp::op("apply_primitive_procedure", [Proc.reg(), Argl.reg()]),
                    )],
                ),
            ),
        );

        Ok(append_sequences([
            test_code,
            parallel_instruction_sequences(compiled_case, primitive_case),
            InstructionSeq::label(&after_call),
        ]))
    }

    /// Jump into a compiled procedure. With `Return` linkage the callee
    /// returns straight to our caller; nothing is saved.
    fn compile_proc_appl(&mut self, target: Register, linkage: &Linkage) -> Result<InstructionSeq> {
        let jump_to_entry = |continue_to: VExp| {
            vec![
                Inst::assign("continue", continue_to),
                Inst::assign("val", VExp::op("compiled_procedure_entry", [Proc.reg()])),
                Inst::goto_reg("val"),
            ]
        };

        match (target, linkage) {
            (Val, Linkage::Return) => Ok(InstructionSeq::new(
                &[Proc, Continue],
                ALL_REGS,
                vec![
                    Inst::assign("val", VExp::op("compiled_procedure_entry", [Proc.reg()])),
                    Inst::goto_reg("val"),
                ],
            )),
            (_, Linkage::Return) => Err(CompileError::ReturnTarget(target)),
            (Val, Linkage::Label(label)) => Ok(InstructionSeq::new(
                &[Proc],
                ALL_REGS,
                jump_to_entry(VExp::label(label)),
            )),
            _ => {
                let proc_return = self.make_label("proc_return");
                let mut statements = jump_to_entry(VExp::label(&proc_return));
                statements.push(Inst::label(&proc_return));
                if target != Val {
                    statements.push(Inst::assign(target.name(), Val.reg()));
                }
                if let Linkage::Label(label) = linkage {
                    statements.push(Inst::goto_label(label));
                }
                Ok(InstructionSeq::new(&[Proc], ALL_REGS, statements))
            }
        }
    }
}

// ----------------------------------------------------------------------
// Fragments that need no labels
// ----------------------------------------------------------------------

fn compile_constant(value: Value, target: Register, linkage: &Linkage) -> InstructionSeq {
    end_with_linkage(
        linkage,
        InstructionSeq::new(
            &[],
            &[target],
            vec![Inst::assign(target.name(), VExp::Const(value))],
        ),
    )
}

fn compile_name(name: &str, target: Register, linkage: &Linkage) -> InstructionSeq {
    end_with_linkage(
        linkage,
        InstructionSeq::new(
            &[Env],
            &[target],
            vec![Inst::assign(
                target.name(),
                VExp::op("lookup_variable_value", [VExp::constant(name), Env.reg()]),
            )],
        ),
    )
}

fn compile_declaration(
    name: &str,
    value_code: InstructionSeq,
    target: Register,
    linkage: &Linkage,
) -> InstructionSeq {
    let define = InstructionSeq::new(
        &[Env, Val],
        &[target],
        vec![
            Inst::perform(
                "define_constant",
                [VExp::constant(name), Val.reg(), Env.reg()],
            ),
            Inst::assign(target.name(), VExp::Const(Value::Undefined)),
        ],
    );
    end_with_linkage(linkage, preserving(&[Env], value_code, define))
}

/// Bind each of `names` to the unassigned sentinel in the current frame.
fn declare_unassigned(names: &[&str]) -> InstructionSeq {
    if names.is_empty() {
        return InstructionSeq::empty();
    }
    let statements = names
        .iter()
        .map(|name| {
            Inst::perform(
                "define_constant",
                [
                    VExp::constant(*name),
                    VExp::Const(Value::Unassigned),
                    Env.reg(),
                ],
            )
        })
        .collect();
    InstructionSeq::new(&[Env], &[], statements)
}

fn assign_undefined(target: Register) -> InstructionSeq {
    InstructionSeq::new(
        &[],
        &[target],
        vec![Inst::assign(target.name(), VExp::Const(Value::Undefined))],
    )
}

/// Function bodies that run off the end return `undefined`.
fn return_undefined() -> InstructionSeq {
    InstructionSeq::new(
        &[Continue],
        &[Val],
        vec![
            Inst::assign("val", VExp::Const(Value::Undefined)),
            Inst::goto_reg("continue"),
        ],
    )
}

/// Operands are evaluated right to left, consing onto `argl`.
fn construct_arglist(mut operand_codes: Vec<InstructionSeq>) -> InstructionSeq {
    operand_codes.reverse();
    let mut codes = operand_codes.into_iter();
    let Some(last) = codes.next() else {
        return InstructionSeq::new(
            &[],
            &[Argl],
            vec![Inst::assign("argl", VExp::Const(Value::Nil))],
        );
    };

    let code_to_get_last_arg = append_instruction_sequences(
        last,
        InstructionSeq::new(
            &[Val],
            &[Argl],
            vec![Inst::assign("argl", VExp::op("list", [Val.reg()]))],
        ),
    );
    if codes.len() == 0 {
        code_to_get_last_arg
    } else {
        preserving(&[Env], code_to_get_last_arg, code_to_get_rest_args(codes))
    }
}

fn code_to_get_rest_args(mut codes: std::vec::IntoIter<InstructionSeq>) -> InstructionSeq {
    let Some(next) = codes.next() else {
        return InstructionSeq::empty();
    };
    let code_for_next_arg = preserving(
        &[Argl],
        next,
        InstructionSeq::new(
            &[Val, Argl],
            &[Argl],
            vec![Inst::assign(
                "argl",
                VExp::op("cons", [Val.reg(), Argl.reg()]),
            )],
        ),
    );
    if codes.len() == 0 {
        code_for_next_arg
    } else {
        preserving(&[Env], code_for_next_arg, code_to_get_rest_args(codes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinaryOp;
    use std::collections::HashSet;

    fn compile(expr: &Expr) -> InstructionSeq {
        Compiler::new()
            .compile_expr(expr, Val, &Linkage::Next)
            .unwrap()
    }

    #[test]
    fn test_compile_constant() {
        let seq = compile(&Expr::num(42.0));
        assert_eq!(
            seq.statements,
            vec![Inst::assign("val", VExp::constant(42.0))]
        );
        assert!(seq.modifies_register(Val));
        assert!(!seq.needs_register(Env));
    }

    #[test]
    fn test_compile_name() {
        let seq = compile(&Expr::name("x"));
        assert!(seq.needs_register(Env));
        assert_eq!(seq.statements.len(), 1);
        assert_eq!(
            seq.statements[0].to_string(),
            "(assign val (op lookup_variable_value) (const \"x\") (reg env))"
        );
    }

    #[test]
    fn test_operator_is_primitive_application() {
        let seq = compile(&Expr::binary(BinaryOp::Add, Expr::num(1.0), Expr::num(2.0)));
        assert!(seq.statements.contains(&Inst::assign(
            "proc",
            VExp::op("lookup_variable_value", [VExp::constant("+"), VExp::reg("env")])
        )));
        assert!(seq
            .statements
            .iter()
            .any(|inst| matches!(inst, Inst::Test(op) if op.op_name == "is_primitive_procedure")));
    }

    #[test]
    fn test_tail_call_saves_nothing() {
        let lambda = Expr::arrow(&["x"], Expr::call(Expr::name("f"), vec![Expr::name("x")]));
        let seq = compile(&lambda);

        assert!(!seq.statements.iter().any(|inst| matches!(inst, Inst::Save(_))));
        assert!(seq.statements.contains(&Inst::goto_reg("val")));
    }

    #[test]
    fn test_non_tail_call_saves_continue() {
        // (x) => f(x) + 1
        let lambda = Expr::arrow(
            &["x"],
            Expr::binary(
                BinaryOp::Add,
                Expr::call(Expr::name("f"), vec![Expr::name("x")]),
                Expr::num(1.0),
            ),
        );
        let seq = compile(&lambda);
        assert!(seq.statements.contains(&Inst::save("continue")));
    }

    #[test]
    fn test_labels_are_unique() {
        let program = Program::new(vec![
            Stmt::function(
                "f",
                &["n"],
                vec![Stmt::ret(Expr::conditional(
                    Expr::name("n"),
                    Expr::call(Expr::name("f"), vec![Expr::Bool(false)]),
                    Expr::num(0.0),
                ))],
            ),
            Stmt::expr(Expr::call(Expr::name("f"), vec![Expr::Bool(true)])),
        ]);
        let controller = compile_program(&program).unwrap();
        let labels: Vec<_> = controller
            .iter()
            .filter_map(|inst| match inst {
                Inst::Label(name) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        let unique: HashSet<_> = labels.iter().collect();
        assert_eq!(labels.len(), unique.len());
    }

    #[test]
    fn test_declarations_start_unassigned() {
        let program = Program::new(vec![Stmt::constant("x", Expr::num(1.0))]);
        let controller = compile_program(&program).unwrap();
        assert_eq!(
            controller[0],
            Inst::perform(
                "define_constant",
                [
                    VExp::constant("x"),
                    VExp::Const(Value::Unassigned),
                    VExp::reg("env")
                ]
            )
        );
    }

    #[test]
    fn test_misplaced_return() {
        let top_level = Program::new(vec![Stmt::ret(Expr::num(1.0))]);
        assert_eq!(compile_program(&top_level), Err(CompileError::MisplacedReturn));

        let early = Program::new(vec![Stmt::function(
            "f",
            &[],
            vec![Stmt::ret(Expr::num(1.0)), Stmt::expr(Expr::num(2.0))],
        )]);
        assert_eq!(compile_program(&early), Err(CompileError::MisplacedReturn));
    }

    #[test]
    fn test_empty_program() {
        assert_eq!(
            compile_program(&Program::default()),
            Err(CompileError::EmptyProgram)
        );
    }

    #[test]
    fn test_return_linkage_needs_val() {
        let call = Expr::call(Expr::name("f"), vec![]);
        let err = Compiler::new()
            .compile_expr(&call, Proc, &Linkage::Return)
            .unwrap_err();
        assert_eq!(err, CompileError::ReturnTarget(Proc));
    }
}
