use std::sync::Arc;
use std::thread;
use std::time::Duration;

use indexmap::indexmap;
use pretty_assertions::assert_eq;

use super::{RunOptions, RuntimeError, Vm, VmConfig, VmError};
use crate::bytecode::{Assembler, Bytecode, CALL_NAMED, CALL_SPREAD, Label, Opcode, SourceFileSet};
use crate::lang::{CompiledFunction, NamedParam, NativeFunction, Object, Param, Token};

// =============================================================================
// Helpers
// =============================================================================

struct Code(Assembler);

impl Code {
    fn new() -> Self {
        Code(Assembler::new())
    }

    fn op(&mut self, op: Opcode, operands: &[usize]) -> &mut Self {
        self.0.emit(op, operands).unwrap();
        self
    }

    fn jump(&mut self, op: Opcode, target: Label) -> &mut Self {
        self.0.emit_jump(op, target);
        self
    }

    fn label(&mut self) -> Label {
        self.0.label()
    }

    fn bind(&mut self, label: Label) -> &mut Self {
        self.0.bind(label);
        self
    }

    fn setup_try(&mut self, catch: Option<Label>, finally: Option<Label>) -> &mut Self {
        self.0.setup_try(catch, finally);
        self
    }

    fn build(self, name: &str) -> CompiledFunction {
        self.0.into_function(name).unwrap()
    }
}

fn func_const(f: CompiledFunction) -> Object {
    Object::Function(Arc::new(f))
}

fn program(main: CompiledFunction, constants: Vec<Object>) -> Arc<Bytecode> {
    Arc::new(Bytecode::new(main, constants))
}

fn run(bc: Arc<Bytecode>) -> Result<Object, VmError> {
    Vm::new(bc).run(RunOptions::default())
}

fn run_args(bc: Arc<Bytecode>, args: Vec<Object>) -> Result<Object, VmError> {
    Vm::new(bc).run(RunOptions::with_args(args))
}

fn ints(values: &[i64]) -> Object {
    Object::array(values.iter().map(|v| Object::Int(*v)).collect())
}

/// main(a, ...rest) { return [a, rest] }
fn variadic_main() -> CompiledFunction {
    let mut c = Code::new();
    c.op(Opcode::GetLocal, &[0])
        .op(Opcode::GetLocal, &[1])
        .op(Opcode::Array, &[2])
        .op(Opcode::Return, &[1]);
    let mut main = c.build("main");
    main.params = vec![Param::new("a"), Param::new("rest")];
    main.variadic = true;
    main.num_locals = 1;
    main
}

// =============================================================================
// Basics
// =============================================================================

#[test]
fn test_arithmetic_and_return() {
    let mut c = Code::new();
    c.op(Opcode::Constant, &[0])
        .op(Opcode::Constant, &[1])
        .op(Opcode::BinaryOp, &[Token::Mul as usize])
        .op(Opcode::Return, &[1]);
    let bc = program(c.build("main"), vec![Object::Int(6), Object::Int(7)]);
    assert_eq!(run(bc).unwrap(), Object::Int(42));
}

#[test]
fn test_falling_off_the_end_returns_nil() {
    let mut c = Code::new();
    c.op(Opcode::True, &[]).op(Opcode::Pop, &[]);
    assert_eq!(run(program(c.build("main"), vec![])).unwrap(), Object::Nil);
}

#[test]
fn test_variadic_main() {
    let bc = program(
        variadic_main(),
        vec![
            Object::Nil,
            Object::Int(-1),
            Object::Int(1),
            Object::string("abc"),
            Object::array(vec![Object::Bool(true), Object::Bool(false)]),
        ],
    );
    let result = run_args(bc.clone(), vec![Object::Int(10), Object::Int(20), Object::Int(30)]);
    assert_eq!(
        result.unwrap(),
        Object::array(vec![Object::Int(10), ints(&[20, 30])])
    );

    let result = run_args(bc, vec![Object::Int(10)]);
    assert_eq!(result.unwrap(), Object::array(vec![Object::Int(10), ints(&[])]));
}

#[test]
fn test_main_wrong_arg_count() {
    let mut c = Code::new();
    c.op(Opcode::Nil, &[]).op(Opcode::Return, &[1]);
    let err = run_args(program(c.build("main"), vec![]), vec![Object::Int(1)]).unwrap_err();
    match err {
        VmError::Uncaught {
            error: RuntimeError::WrongNumArgs { want, got },
            trace,
        } => {
            assert_eq!((want.as_str(), got), ("0", 1));
            assert!(trace.is_empty());
        }
        other => panic!("unexpected: {other}"),
    }
}

#[test]
fn test_globals() {
    let mut c = Code::new();
    c.op(Opcode::Constant, &[1])
        .op(Opcode::SetGlobal, &[0])
        .op(Opcode::GetGlobal, &[0])
        .op(Opcode::GetGlobal, &[2])
        .op(Opcode::Array, &[2])
        .op(Opcode::Return, &[1]);
    let bc = program(
        c.build("main"),
        vec![Object::string("x"), Object::Int(5), Object::string("missing")],
    );
    let globals = Object::dict(indexmap! {});
    let mut vm = Vm::new(bc);
    let out = vm
        .run(RunOptions {
            globals: Some(globals.clone()),
            ..RunOptions::default()
        })
        .unwrap();
    assert_eq!(out, Object::array(vec![Object::Int(5), Object::Nil]));
    assert_eq!(globals.index_get(&Object::string("x")).unwrap(), Object::Int(5));
}

#[test]
fn test_nil_coalescing_and_short_circuit_jumps() {
    fn run_jump(first: Object, op: Opcode, then: Object) -> Object {
        let mut c = Code::new();
        let end = c.label();
        c.op(Opcode::Constant, &[0])
            .jump(op, end)
            .op(Opcode::Constant, &[1])
            .bind(end)
            .op(Opcode::Return, &[1]);
        run(program(c.build("main"), vec![first, then])).unwrap()
    }

    let dflt = Object::string("default");
    assert_eq!(run_jump(Object::Nil, Opcode::JumpNotNil, dflt.clone()), dflt);
    assert_eq!(run_jump(Object::Int(1), Opcode::JumpNotNil, dflt.clone()), Object::Int(1));
    assert_eq!(run_jump(Object::Nil, Opcode::AndJump, dflt.clone()), Object::Nil);
    assert_eq!(run_jump(Object::Int(0), Opcode::OrJump, dflt.clone()), dflt);
    assert_eq!(run_jump(Object::Int(2), Opcode::OrJump, dflt.clone()), Object::Int(2));

    // `?.` keeps nil and skips the selector
    let mut c = Code::new();
    let end = c.label();
    c.op(Opcode::Nil, &[])
        .jump(Opcode::JumpNil, end)
        .op(Opcode::Constant, &[0])
        .op(Opcode::GetIndex, &[1])
        .bind(end)
        .op(Opcode::Return, &[1]);
    let bc = program(c.build("main"), vec![Object::string("field")]);
    assert_eq!(run(bc).unwrap(), Object::Nil);
}

#[test]
fn test_iteration_sums_values() {
    let mut c = Code::new();
    let top = c.label();
    let end = c.label();
    c.op(Opcode::Constant, &[0])
        .op(Opcode::DefineLocal, &[0])
        .op(Opcode::Constant, &[1])
        .op(Opcode::IterInit, &[])
        .op(Opcode::DefineLocal, &[1])
        .bind(top)
        .op(Opcode::GetLocal, &[1])
        .op(Opcode::IterNext, &[])
        .jump(Opcode::JumpFalsy, end)
        .op(Opcode::GetLocal, &[0])
        .op(Opcode::GetLocal, &[1])
        .op(Opcode::IterValue, &[])
        .op(Opcode::BinaryOp, &[Token::Add as usize])
        .op(Opcode::SetLocal, &[0])
        .jump(Opcode::Jump, top)
        .bind(end)
        .op(Opcode::GetLocal, &[0])
        .op(Opcode::Return, &[1]);
    let mut main = c.build("main");
    main.num_locals = 2;
    let bc = program(main, vec![Object::Int(0), ints(&[1, 2, 3])]);
    assert_eq!(run(bc).unwrap(), Object::Int(6));
}

// =============================================================================
// Closures
// =============================================================================

#[test]
fn test_closures_share_captured_local() {
    // inc = fn() { x = x + 1 }
    let mut c = Code::new();
    c.op(Opcode::GetFree, &[0])
        .op(Opcode::Constant, &[3])
        .op(Opcode::BinaryOp, &[Token::Add as usize])
        .op(Opcode::SetFree, &[0])
        .op(Opcode::Return, &[0]);
    let inc = c.build("inc");

    // get = fn() { return x }
    let mut c = Code::new();
    c.op(Opcode::GetFree, &[0]).op(Opcode::Return, &[1]);
    let get = c.build("get");

    let mut c = Code::new();
    c.op(Opcode::Constant, &[2])
        .op(Opcode::DefineLocal, &[0])
        .op(Opcode::GetLocalPtr, &[0])
        .op(Opcode::Closure, &[0, 1])
        .op(Opcode::DefineLocal, &[1])
        .op(Opcode::GetLocalPtr, &[0])
        .op(Opcode::Closure, &[1, 1])
        .op(Opcode::DefineLocal, &[2])
        .op(Opcode::GetLocal, &[1])
        .op(Opcode::Call, &[0, 0])
        .op(Opcode::Pop, &[])
        .op(Opcode::GetLocal, &[1])
        .op(Opcode::Call, &[0, 0])
        .op(Opcode::Pop, &[])
        .op(Opcode::GetLocal, &[2])
        .op(Opcode::Call, &[0, 0])
        .op(Opcode::GetLocal, &[0])
        .op(Opcode::Array, &[2])
        .op(Opcode::Return, &[1]);
    let mut main = c.build("main");
    main.num_locals = 3;

    let bc = program(
        main,
        vec![func_const(inc), func_const(get), Object::Int(0), Object::Int(1)],
    );
    assert_eq!(run(bc.clone()).unwrap(), ints(&[2, 2]));

    // the templates in the constant pool are left untouched
    for c in &bc.constants[..2] {
        let Object::Function(f) = c else { unreachable!() };
        assert!(f.free.is_empty());
    }
}

// =============================================================================
// Calls
// =============================================================================

fn sum_native() -> NativeFunction {
    NativeFunction::new("sum", |args, named| {
        let mut total = 0;
        for a in args {
            match a {
                Object::Int(v) => total += v,
                other => {
                    return Err(RuntimeError::ArgumentType {
                        name: "value".to_string(),
                        expected: "int".to_string(),
                        found: other.type_name().to_string(),
                    });
                }
            }
        }
        let scale = match named.get("scale") {
            Some(Object::Int(s)) => *s,
            _ => 1,
        };
        Ok(Object::Int(total * scale))
    })
}

#[test]
fn test_native_call_with_named_and_spread_args() {
    let mut c = Code::new();
    c.op(Opcode::Constant, &[0])
        .op(Opcode::Constant, &[1])
        .op(Opcode::Constant, &[2])
        .op(Opcode::Constant, &[3])
        .op(Opcode::Constant, &[4])
        .op(Opcode::KeyValueArray, &[1])
        .op(Opcode::Call, &[2, CALL_NAMED as usize])
        .op(Opcode::Constant, &[0])
        .op(Opcode::Constant, &[1])
        .op(Opcode::Constant, &[5])
        .op(Opcode::Call, &[2, CALL_SPREAD as usize])
        .op(Opcode::Array, &[2])
        .op(Opcode::Return, &[1]);
    let bc = program(
        c.build("main"),
        vec![
            Object::Native(Arc::new(sum_native())),
            Object::Int(1),
            Object::Int(2),
            Object::string("scale"),
            Object::Int(10),
            ints(&[3, 4]),
        ],
    );
    assert_eq!(run(bc).unwrap(), ints(&[30, 8]));
}

#[test]
fn test_named_params_and_defaults() {
    let mut c = Code::new();
    c.op(Opcode::GetLocal, &[0])
        .op(Opcode::GetLocal, &[1])
        .op(Opcode::BinaryOp, &[Token::Add as usize])
        .op(Opcode::Return, &[1]);
    let mut f = c.build("f");
    f.params = vec![Param::new("a")];
    f.named_params = vec![NamedParam::new("b", Object::Int(10))];
    f.num_locals = 2;

    let constants = vec![
        func_const(f),
        Object::Int(1),
        Object::string("b"),
        Object::Int(5),
        Object::string("zzz"),
    ];

    let mut c = Code::new();
    c.op(Opcode::Constant, &[0])
        .op(Opcode::Constant, &[1])
        .op(Opcode::Call, &[1, 0])
        .op(Opcode::Constant, &[0])
        .op(Opcode::Constant, &[1])
        .op(Opcode::Constant, &[2])
        .op(Opcode::Constant, &[3])
        .op(Opcode::Dict, &[1])
        .op(Opcode::Call, &[1, CALL_NAMED as usize])
        .op(Opcode::Array, &[2])
        .op(Opcode::Return, &[1]);
    let bc = program(c.build("main"), constants.clone());
    assert_eq!(run(bc).unwrap(), ints(&[11, 6]));

    let mut c = Code::new();
    c.op(Opcode::Constant, &[0])
        .op(Opcode::Constant, &[1])
        .op(Opcode::Constant, &[4])
        .op(Opcode::Constant, &[3])
        .op(Opcode::Dict, &[1])
        .op(Opcode::Call, &[1, CALL_NAMED as usize])
        .op(Opcode::Return, &[1]);
    let err = run(program(c.build("main"), constants)).unwrap_err();
    assert!(matches!(
        err,
        VmError::Uncaught { error: RuntimeError::UnexpectedNamedArg(ref k), .. } if k == "zzz"
    ));
}

#[test]
fn test_parameter_type_assertion() {
    let mut c = Code::new();
    c.op(Opcode::GetLocal, &[0]).op(Opcode::Return, &[1]);
    let mut f = c.build("f");
    f.params = vec![Param::typed("x", &["int"])];

    let mut c = Code::new();
    c.op(Opcode::Constant, &[0])
        .op(Opcode::Constant, &[1])
        .op(Opcode::Call, &[1, 0])
        .op(Opcode::Return, &[1]);
    let bc = program(c.build("main"), vec![func_const(f), Object::string("s")]);
    match run(bc).unwrap_err() {
        VmError::Uncaught {
            error: RuntimeError::ArgumentType { name, expected, found },
            ..
        } => assert_eq!((name.as_str(), expected.as_str(), found.as_str()), ("x", "int", "string")),
        other => panic!("unexpected: {other}"),
    }
}

#[test]
fn test_builtin_type_is_callable() {
    let mut c = Code::new();
    c.op(Opcode::Constant, &[0])
        .op(Opcode::Constant, &[1])
        .op(Opcode::Call, &[1, 0])
        .op(Opcode::Return, &[1]);
    let bc = program(
        c.build("main"),
        vec![Object::Type(crate::lang::BuiltinType::Int), Object::string("12")],
    );
    assert_eq!(run(bc).unwrap(), Object::Int(12));
}

// =============================================================================
// Exceptions
// =============================================================================

#[test]
fn test_catch_then_finally_order() {
    let mut c = Code::new();
    let catch = c.label();
    let finally = c.label();
    c.op(Opcode::Array, &[0])
        .op(Opcode::DefineLocal, &[0])
        .setup_try(Some(catch), Some(finally))
        .op(Opcode::Constant, &[0])
        .op(Opcode::Throw, &[1])
        .bind(catch)
        .op(Opcode::SetupCatch, &[])
        .op(Opcode::DefineLocal, &[1])
        .op(Opcode::GetLocal, &[0])
        .op(Opcode::GetLocal, &[1])
        .op(Opcode::Constant, &[1])
        .op(Opcode::GetIndex, &[1])
        .op(Opcode::BinaryOp, &[Token::Add as usize])
        .op(Opcode::SetLocal, &[0])
        .bind(finally)
        .op(Opcode::SetupFinally, &[])
        .op(Opcode::GetLocal, &[0])
        .op(Opcode::Constant, &[2])
        .op(Opcode::BinaryOp, &[Token::Add as usize])
        .op(Opcode::SetLocal, &[0])
        .op(Opcode::Throw, &[0])
        .op(Opcode::GetLocal, &[0])
        .op(Opcode::Return, &[1]);
    let mut main = c.build("main");
    main.num_locals = 2;
    let bc = program(
        main,
        vec![Object::string("boom"), Object::string("message"), Object::string("finally")],
    );
    assert_eq!(
        run(bc).unwrap(),
        Object::array(vec![Object::string("boom"), Object::string("finally")])
    );
}

#[test]
fn test_rethrow_from_catch_unwinds_through_both_finally_blocks() {
    // try {
    //     try { throw "x" } catch e { log += "c"; throw e } finally { log += "1" }
    // } finally { log += "2" }
    fn append(c: &mut Code, piece: usize) {
        c.op(Opcode::GetGlobal, &[0])
            .op(Opcode::Constant, &[piece])
            .op(Opcode::BinaryOp, &[Token::Add as usize])
            .op(Opcode::SetGlobal, &[0]);
    }

    let mut c = Code::new();
    let outer_finally = c.label();
    let catch = c.label();
    let inner_finally = c.label();
    c.setup_try(None, Some(outer_finally))
        .setup_try(Some(catch), Some(inner_finally))
        .op(Opcode::Constant, &[1])
        .op(Opcode::Throw, &[1])
        .bind(catch)
        .op(Opcode::SetupCatch, &[])
        .op(Opcode::DefineLocal, &[0]);
    append(&mut c, 2);
    c.op(Opcode::GetLocal, &[0])
        .op(Opcode::Throw, &[1])
        .bind(inner_finally)
        .op(Opcode::SetupFinally, &[]);
    append(&mut c, 3);
    c.op(Opcode::Throw, &[0])
        .bind(outer_finally)
        .op(Opcode::SetupFinally, &[]);
    append(&mut c, 4);
    c.op(Opcode::Throw, &[0]).op(Opcode::Return, &[0]);
    let mut main = c.build("main");
    main.num_locals = 1;

    let bc = program(
        main,
        vec![
            Object::string("log"),
            Object::string("x"),
            Object::string("c"),
            Object::string("1"),
            Object::string("2"),
        ],
    );
    let globals = Object::dict(indexmap! { "log".to_string() => Object::string("") });
    let err = Vm::new(bc)
        .run(RunOptions {
            globals: Some(globals.clone()),
            ..RunOptions::default()
        })
        .unwrap_err();

    assert_eq!(globals.index_get(&Object::string("log")).unwrap(), Object::string("c12"));
    match err {
        VmError::Uncaught {
            error: RuntimeError::Thrown(e),
            ..
        } => assert_eq!(e.message, "x"),
        other => panic!("unexpected: {other}"),
    }
}

#[test]
fn test_runtime_fault_is_catchable() {
    let mut c = Code::new();
    let catch = c.label();
    c.setup_try(Some(catch), None)
        .op(Opcode::Nil, &[])
        .op(Opcode::Call, &[0, 0])
        .op(Opcode::Return, &[1])
        .bind(catch)
        .op(Opcode::SetupCatch, &[])
        .op(Opcode::Constant, &[0])
        .op(Opcode::GetIndex, &[1])
        .op(Opcode::Return, &[1]);
    let bc = program(c.build("main"), vec![Object::string("name")]);
    assert_eq!(run(bc).unwrap(), Object::string("NotCallableError"));
}

#[test]
fn test_finally_runs_before_error_leaves_frame() {
    // f() { try { throw "boom" } finally { ran = true } }
    let mut c = Code::new();
    let fin = c.label();
    c.setup_try(None, Some(fin))
        .op(Opcode::Constant, &[0])
        .op(Opcode::Throw, &[1])
        .bind(fin)
        .op(Opcode::SetupFinally, &[])
        .op(Opcode::True, &[])
        .op(Opcode::SetGlobal, &[1])
        .op(Opcode::Throw, &[0])
        .op(Opcode::Return, &[0]);
    let f = c.build("f");

    // main() { try { f() } catch e { return [e.message, ran] } }
    let mut c = Code::new();
    let catch = c.label();
    c.setup_try(Some(catch), None)
        .op(Opcode::Constant, &[2])
        .op(Opcode::Call, &[0, 0])
        .op(Opcode::Return, &[1])
        .bind(catch)
        .op(Opcode::SetupCatch, &[])
        .op(Opcode::Constant, &[3])
        .op(Opcode::GetIndex, &[1])
        .op(Opcode::GetGlobal, &[1])
        .op(Opcode::Array, &[2])
        .op(Opcode::Return, &[1]);
    let bc = program(
        c.build("main"),
        vec![
            Object::string("boom"),
            Object::string("ran"),
            func_const(f),
            Object::string("message"),
        ],
    );
    assert_eq!(
        run(bc).unwrap(),
        Object::array(vec![Object::string("boom"), Object::Bool(true)])
    );
}

#[test]
fn test_return_inside_try_runs_finally() {
    // f() { try { return 1 } finally { cleaned = true } }
    let mut c = Code::new();
    let fin = c.label();
    c.setup_try(None, Some(fin))
        .op(Opcode::Constant, &[0])
        .op(Opcode::Finalizer, &[0])
        .op(Opcode::Return, &[1])
        .bind(fin)
        .op(Opcode::SetupFinally, &[])
        .op(Opcode::True, &[])
        .op(Opcode::SetGlobal, &[1])
        .op(Opcode::Throw, &[0])
        .op(Opcode::Return, &[0]);
    let f = c.build("f");

    let mut c = Code::new();
    c.op(Opcode::Constant, &[2])
        .op(Opcode::Call, &[0, 0])
        .op(Opcode::GetGlobal, &[1])
        .op(Opcode::Array, &[2])
        .op(Opcode::Return, &[1]);
    let bc = program(
        c.build("main"),
        vec![Object::Int(1), Object::string("cleaned"), func_const(f)],
    );
    assert_eq!(
        run(bc).unwrap(),
        Object::array(vec![Object::Int(1), Object::Bool(true)])
    );
}

#[test]
fn test_uncaught_error_carries_trace() {
    let mut c = Code::new();
    c.op(Opcode::Constant, &[0])
        .op(Opcode::Constant, &[1])
        .op(Opcode::BinaryOp, &[Token::Quo as usize])
        .op(Opcode::Return, &[1]);
    let mut f = c.build("f");
    f.source_map.insert(6, 5);

    let mut c = Code::new();
    c.op(Opcode::Constant, &[2])
        .op(Opcode::Call, &[0, 0])
        .op(Opcode::Return, &[1]);

    let mut files = SourceFileSet::new(1);
    files.add_file("t.em", "a\nb / 0\n");
    let bc = Bytecode::new(
        c.build("main"),
        vec![Object::Int(1), Object::Int(0), func_const(f)],
    )
    .with_file_set(files);

    match run(Arc::new(bc)).unwrap_err() {
        VmError::Uncaught { error, trace } => {
            assert!(matches!(error, RuntimeError::ZeroDivision));
            assert_eq!(trace, vec!["f at 6 (t.em:2:3)".to_string(), "main at 3".to_string()]);
        }
        other => panic!("unexpected: {other}"),
    }
}

// =============================================================================
// Modules
// =============================================================================

fn module_program() -> Arc<Bytecode> {
    // init() { inits += 1; return {v: 1} }
    let mut c = Code::new();
    c.op(Opcode::GetGlobal, &[1])
        .op(Opcode::Constant, &[2])
        .op(Opcode::BinaryOp, &[Token::Add as usize])
        .op(Opcode::SetGlobal, &[1])
        .op(Opcode::Constant, &[3])
        .op(Opcode::Constant, &[2])
        .op(Opcode::Dict, &[1])
        .op(Opcode::Return, &[1]);
    let init = c.build("init");

    let mut c = Code::new();
    for local in 0..2 {
        let loaded = c.label();
        c.op(Opcode::LoadModule, &[0, 0])
            .jump(Opcode::JumpFalsy, loaded)
            .op(Opcode::Call, &[0, 0])
            .op(Opcode::StoreModule, &[0])
            .bind(loaded)
            .op(Opcode::DefineLocal, &[local]);
    }
    // first.v = 99; return [second.v, inits]
    c.op(Opcode::Constant, &[4])
        .op(Opcode::GetLocal, &[0])
        .op(Opcode::Constant, &[3])
        .op(Opcode::SetIndex, &[])
        .op(Opcode::GetLocal, &[1])
        .op(Opcode::Constant, &[3])
        .op(Opcode::GetIndex, &[1])
        .op(Opcode::GetGlobal, &[1])
        .op(Opcode::Array, &[2])
        .op(Opcode::Return, &[1]);
    let mut main = c.build("main");
    main.num_locals = 2;

    let bc = Bytecode::new(
        main,
        vec![
            func_const(init),
            Object::string("inits"),
            Object::Int(1),
            Object::string("v"),
            Object::Int(99),
        ],
    )
    .with_modules(1);
    Arc::new(bc)
}

#[test]
fn test_module_initializes_once_per_run() {
    let globals = Object::dict(indexmap! { "inits".to_string() => Object::Int(0) });
    let mut vm = Vm::new(module_program());
    let opts = RunOptions {
        globals: Some(globals.clone()),
        ..RunOptions::default()
    };

    assert_eq!(vm.run(opts.clone()).unwrap(), ints(&[1, 1]));
    // a new run starts with an empty module cache
    assert_eq!(vm.run(opts).unwrap(), ints(&[1, 2]));
}

// =============================================================================
// Limits and cancellation
// =============================================================================

fn spin() -> Arc<Bytecode> {
    let mut c = Code::new();
    let top = c.label();
    c.bind(top).jump(Opcode::Jump, top);
    program(c.build("main"), vec![])
}

#[test]
fn test_abort_from_another_thread() {
    let mut vm = Vm::new(spin());
    let handle = vm.abort_handle();
    let t = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.abort();
    });
    assert!(matches!(vm.run(RunOptions::default()), Err(VmError::Aborted)));
    t.join().unwrap();
}

#[test]
fn test_step_limit_is_fatal() {
    let config = VmConfig {
        max_steps: Some(100),
        ..VmConfig::default()
    };
    let err = Vm::with_config(spin(), config)
        .run(RunOptions::default())
        .unwrap_err();
    assert!(matches!(err, VmError::Fatal(ref m) if m.contains("step limit")));
}

#[test]
fn test_runaway_recursion_is_fatal() {
    let mut c = Code::new();
    c.op(Opcode::Constant, &[0])
        .op(Opcode::Call, &[0, 0])
        .op(Opcode::Return, &[1]);
    let f = c.build("f");
    let bc = program(f.clone(), vec![func_const(f)]);
    let config = VmConfig {
        max_frames: 16,
        ..VmConfig::default()
    };
    let err = Vm::with_config(bc, config).run(RunOptions::default()).unwrap_err();
    assert!(matches!(err, VmError::Fatal(ref m) if m.contains("call depth")));
}

#[test]
fn test_unknown_opcode() {
    let bc = program(CompiledFunction::new("main", vec![250u8]), vec![]);
    assert!(matches!(run(bc.clone()), Err(VmError::Verify(_))));

    let config = VmConfig {
        verify: false,
        ..VmConfig::default()
    };
    let err = Vm::with_config(bc, config).run(RunOptions::default()).unwrap_err();
    assert!(matches!(err, VmError::Fatal(ref m) if m.contains("unknown opcode 250")));
}

#[test]
fn test_vms_share_one_program() {
    let bc = program(variadic_main(), vec![]);
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let bc = bc.clone();
            thread::spawn(move || run_args(bc, vec![Object::Int(i), Object::Int(i + 1)]).unwrap())
        })
        .collect();
    for (i, h) in handles.into_iter().enumerate() {
        let i = i as i64;
        assert_eq!(
            h.join().unwrap(),
            Object::array(vec![Object::Int(i), ints(&[i + 1])])
        );
    }
}
