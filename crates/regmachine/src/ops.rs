//! Operations that compiled controllers invoke.
//!
//! Environments and closures are plain [`Value`]s to the controller; these
//! operations are the only code that looks inside them.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::operations::{Arity, OpContext, OpKind, OperationEntry};
use crate::value::{CompiledProcedure, Value};

/// Every machine operation a Source controller can reference.
pub fn machine_operations() -> Vec<OperationEntry> {
    vec![
        OperationEntry::new(
            "make_top_environment",
            OpKind::Machine,
            Arity::Exact(0),
            |ctx, _| Ok(Value::Env(ctx.frames.make_top())),
        ),
        OperationEntry::new(
            "make_default_top_environment",
            OpKind::Machine,
            Arity::Exact(0),
            |ctx, _| Ok(Value::Env(ctx.default_top_environment()?)),
        ),
        OperationEntry::new(
            "extend_environment",
            OpKind::Machine,
            Arity::Exact(3),
            extend_environment,
        ),
        OperationEntry::new(
            "extend_environment_block",
            OpKind::Machine,
            Arity::Exact(1),
            |ctx, args| {
                let base = args[0].as_env()?;
                Ok(Value::Env(ctx.frames.extend_empty(base)?))
            },
        ),
        OperationEntry::new(
            "define_constant",
            OpKind::Machine,
            Arity::Exact(3),
            |ctx, args| {
                let name = args[0].as_str()?;
                let env = args[2].as_env()?;
                ctx.frames.define(env, name, args[1].clone())?;
                Ok(Value::Undefined)
            },
        ),
        OperationEntry::new(
            "lookup_variable_value",
            OpKind::Machine,
            Arity::Exact(2),
            lookup_variable_value,
        ),
        OperationEntry::pure("list", Arity::AtLeast(0), |args| {
            Ok(Value::list(args.iter().cloned()))
        }),
        OperationEntry::pure("cons", Arity::Exact(2), |args| {
            Ok(Value::cons(args[0].clone(), args[1].clone()))
        }),
        OperationEntry::pure("is_false", Arity::Exact(1), |args| {
            Ok(Value::Bool(args[0].is_false()))
        }),
        OperationEntry::pure("make_compiled_procedure", Arity::Exact(2), |args| {
            let entry = match &args[0] {
                Value::Label(ip) => *ip,
                other => return Err(Error::type_mismatch("label", other)),
            };
            let env = args[1].as_env()?;
            Ok(Value::CompiledProcedure(CompiledProcedure { entry, env }))
        }),
        OperationEntry::pure("compiled_procedure_entry", Arity::Exact(1), |args| {
            Ok(Value::Label(args[0].as_compiled_procedure()?.entry))
        }),
        OperationEntry::pure("compiled_procedure_env", Arity::Exact(1), |args| {
            Ok(Value::Env(args[0].as_compiled_procedure()?.env))
        }),
        OperationEntry::pure("is_primitive_procedure", Arity::Exact(1), |args| {
            Ok(Value::Bool(matches!(args[0], Value::PrimitiveProcedure(_))))
        }),
        OperationEntry::new(
            "apply_primitive_procedure",
            OpKind::Machine,
            Arity::Exact(2),
            apply_primitive_procedure,
        ),
    ]
}

fn extend_environment(ctx: &mut OpContext<'_>, args: &[Value]) -> Result<Value> {
    let names = args[0].list_to_vec()?;
    let values = args[1].list_to_vec()?;
    let base = args[2].as_env()?;
    if names.len() != values.len() {
        return Err(Error::ArityMismatch {
            name: "extend_environment".to_string(),
            expected: Arity::Exact(names.len()),
            got: values.len(),
        });
    }
    let bindings = names
        .iter()
        .map(|name| name.as_str().map(Arc::<str>::from))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .zip(values);
    Ok(Value::Env(ctx.frames.extend(bindings, base)?))
}

fn lookup_variable_value(ctx: &mut OpContext<'_>, args: &[Value]) -> Result<Value> {
    let name = args[0].as_str()?;
    let env = args[1].as_env()?;
    match ctx.frames.lookup(env, name)? {
        None => Err(Error::UnboundVariable(name.to_string())),
        Some(Value::Unassigned) => Err(Error::UnassignedVariable(name.to_string())),
        Some(value) => Ok(value.clone()),
    }
}

/// Arity faults surface as they are; anything the native code raises is
/// wrapped with the primitive's name.
fn apply_primitive_procedure(ctx: &mut OpContext<'_>, args: &[Value]) -> Result<Value> {
    let primitive = args[0].as_primitive_procedure()?;
    let arguments = args[1].list_to_vec()?;
    match ctx.call(primitive.op, &arguments) {
        Err(err @ Error::ArityMismatch { .. }) => Err(err),
        Err(source) => Err(Error::Primitive {
            name: primitive.name.to_string(),
            source: Box::new(source),
        }),
        ok => ok,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::OperationTable;
    use crate::value::EnvId;
    use regmachine_common::Frames;

    struct Harness {
        frames: Frames<Value>,
        table: OperationTable,
    }

    impl Harness {
        fn new() -> Self {
            let mut table: OperationTable = machine_operations().into_iter().collect();
            table.insert(OperationEntry::primitive("add", Arity::Exact(2), |args| {
                Ok(Value::Number(args[0].as_number()? + args[1].as_number()?))
            }));
            Harness {
                frames: Frames::new(),
                table,
            }
        }

        fn call(&mut self, name: &str, args: &[Value]) -> Result<Value> {
            let id = self.table.resolve(name).unwrap();
            let mut ctx = OpContext {
                frames: &mut self.frames,
                operations: &self.table,
            };
            self.table.call(id, &mut ctx, args)
        }

        fn env(&mut self, name: &str, args: &[Value]) -> EnvId {
            self.call(name, args).unwrap().as_env().unwrap()
        }
    }

    fn names(items: &[&str]) -> Value {
        Value::list(items.iter().map(|s| Value::string(s)).collect::<Vec<_>>())
    }

    #[test]
    fn test_define_then_lookup() {
        let mut h = Harness::new();
        let top = h.env("make_top_environment", &[]);
        h.call(
            "define_constant",
            &[Value::string("x"), Value::Number(3.0), Value::Env(top)],
        )
        .unwrap();

        let inner = h.env("extend_environment_block", &[Value::Env(top)]);
        for env in [top, inner] {
            assert_eq!(
                h.call("lookup_variable_value", &[Value::string("x"), Value::Env(env)]),
                Ok(Value::Number(3.0))
            );
        }
        assert_eq!(
            h.call("lookup_variable_value", &[Value::string("y"), Value::Env(inner)]),
            Err(Error::UnboundVariable("y".to_string()))
        );
    }

    #[test]
    fn test_shadowing_leaves_outer_binding() {
        let mut h = Harness::new();
        let top = h.env("make_top_environment", &[]);
        h.call(
            "define_constant",
            &[Value::string("x"), Value::Number(1.0), Value::Env(top)],
        )
        .unwrap();
        let inner = h.env(
            "extend_environment",
            &[names(&["x"]), Value::list([Value::Number(2.0)]), Value::Env(top)],
        );

        let lookup = |h: &mut Harness, env| {
            h.call("lookup_variable_value", &[Value::string("x"), Value::Env(env)])
        };
        assert_eq!(lookup(&mut h, inner), Ok(Value::Number(2.0)));
        assert_eq!(lookup(&mut h, top), Ok(Value::Number(1.0)));
    }

    #[test]
    fn test_define_only_touches_innermost_frame() {
        let mut h = Harness::new();
        let top = h.env("make_top_environment", &[]);
        let inner = h.env("extend_environment_block", &[Value::Env(top)]);
        h.call(
            "define_constant",
            &[Value::string("z"), Value::Bool(true), Value::Env(inner)],
        )
        .unwrap();
        assert_eq!(
            h.call("lookup_variable_value", &[Value::string("z"), Value::Env(top)]),
            Err(Error::UnboundVariable("z".to_string()))
        );
    }

    #[test]
    fn test_unassigned_binding_is_reported() {
        let mut h = Harness::new();
        let top = h.env("make_top_environment", &[]);
        h.call(
            "define_constant",
            &[Value::string("later"), Value::Unassigned, Value::Env(top)],
        )
        .unwrap();
        assert_eq!(
            h.call("lookup_variable_value", &[Value::string("later"), Value::Env(top)]),
            Err(Error::UnassignedVariable("later".to_string()))
        );
    }

    #[test]
    fn test_extend_environment_length_mismatch() {
        let mut h = Harness::new();
        let top = h.env("make_top_environment", &[]);
        let err = h
            .call(
                "extend_environment",
                &[names(&["a", "b"]), Value::list([Value::Number(1.0)]), Value::Env(top)],
            )
            .unwrap_err();
        assert!(matches!(err, Error::ArityMismatch { got: 1, .. }));
    }

    #[test]
    fn test_compiled_procedure_accessors() {
        let mut h = Harness::new();
        let top = h.env("make_top_environment", &[]);
        let proc = h
            .call("make_compiled_procedure", &[Value::Label(12), Value::Env(top)])
            .unwrap();
        assert_eq!(
            h.call("compiled_procedure_entry", &[proc.clone()]),
            Ok(Value::Label(12))
        );
        assert_eq!(h.call("compiled_procedure_env", &[proc]), Ok(Value::Env(top)));

        let err = h
            .call("compiled_procedure_entry", &[Value::Number(1.0)])
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { expected: "compiled procedure", .. }));

        let err = h
            .call("compiled_procedure_env", &[Value::Nil])
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { expected: "compiled procedure", .. }));

        let err = h
            .call("make_compiled_procedure", &[Value::Number(12.0), Value::Env(top)])
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { expected: "label", .. }));
    }

    #[test]
    fn test_is_false() {
        let mut h = Harness::new();
        assert_eq!(h.call("is_false", &[Value::Bool(false)]), Ok(Value::Bool(true)));
        for v in [Value::Number(0.0), Value::Nil, Value::string(""), Value::Bool(true)] {
            assert_eq!(h.call("is_false", &[v]), Ok(Value::Bool(false)));
        }
    }

    #[test]
    fn test_apply_primitive_procedure() {
        let mut h = Harness::new();
        let top = h.env("make_default_top_environment", &[]);
        let add = h
            .call("lookup_variable_value", &[Value::string("add"), Value::Env(top)])
            .unwrap();
        assert_eq!(h.call("is_primitive_procedure", &[add.clone()]), Ok(Value::Bool(true)));

        let args = Value::list([Value::Number(2.0), Value::Number(3.0)]);
        assert_eq!(
            h.call("apply_primitive_procedure", &[add.clone(), args]),
            Ok(Value::Number(5.0))
        );

        let err = h
            .call(
                "apply_primitive_procedure",
                &[add.clone(), Value::list([Value::Number(2.0)])],
            )
            .unwrap_err();
        assert!(matches!(err, Error::ArityMismatch { got: 1, .. }));

        let err = h
            .call(
                "apply_primitive_procedure",
                &[add, Value::list([Value::Bool(true), Value::Number(1.0)])],
            )
            .unwrap_err();
        assert!(matches!(err, Error::Primitive { ref name, .. } if name == "add"));
        assert!(matches!(
            err,
            Error::Primitive { ref source, .. } if matches!(**source, Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_list_and_cons() {
        let mut h = Harness::new();
        assert_eq!(h.call("list", &[]), Ok(Value::Nil));
        assert_eq!(
            h.call("cons", &[Value::Number(1.0), Value::Nil]),
            Ok(Value::list([Value::Number(1.0)]))
        );
    }
}
