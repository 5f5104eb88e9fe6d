//! Embedding-surface tests: host callbacks, globals, the instruction
//! callback, breakpoints, and the serialize-reload law.

use etch_compiler::ast::{
    Block, Expr, ExternDecl, Function, Module, Pos, Stmt, Type,
};
use etch_vm::{
    CaptureBuffer, Context, ContextOptions, HookAction, ProgramState, Value,
};

fn pos() -> Pos {
    Pos::new(1, 1)
}

fn println_call(arg: Expr, arg_ty: Type) -> Stmt {
    Stmt::Expr {
        expr: Expr::Call {
            name: "println".into(),
            sig: vec![arg_ty],
            ret: Type::Unit,
            args: vec![arg],
        },
        pos: pos(),
    }
}

fn main_module(file: &str, stmts: Vec<Stmt>) -> Module {
    Module {
        file: file.into(),
        functions: vec![Function {
            name: "main".into(),
            params: vec![],
            ret: Type::Unit,
            body: Block::new(stmts),
            pos: pos(),
        }],
        ..Module::default()
    }
}

#[test]
fn host_callbacks_receive_args_and_user_data() {
    let mut module = main_module(
        "host.etch",
        vec![println_call(
            Expr::Call {
                name: "add_ints".into(),
                sig: vec![Type::Int, Type::Int],
                ret: Type::Int,
                args: vec![Expr::Int(20), Expr::Int(22)],
            },
            Type::Int,
        )],
    );
    module.host_decls.push(ExternDecl {
        name: "add_ints".into(),
        params: vec![Type::Int, Type::Int],
        ret: Type::Int,
        library: None,
        symbol: None,
    });

    let buffer = CaptureBuffer::new();
    let mut context = Context::new(ContextOptions::default());
    context.set_output(Box::new(buffer.clone()));
    context.compile(&module).unwrap();
    context.register_host_fn(
        "add_ints",
        Box::new(|user_data, args| {
            let calls = user_data
                .downcast_mut::<u32>()
                .expect("user data survives registration");
            *calls += 1;
            match (args.first(), args.get(1)) {
                (Some(Value::Int(a)), Some(Value::Int(b))) => Value::Int(a + b),
                _ => Value::Nil,
            }
        }),
        Box::new(0u32),
    );
    context.execute().unwrap();
    assert_eq!(buffer.contents(), "42\n");
}

#[test]
fn host_panics_surface_as_nil_not_propagation() {
    let mut module = main_module(
        "panic.etch",
        vec![println_call(
            Expr::Call {
                name: "explode".into(),
                sig: vec![],
                ret: Type::Int,
                args: vec![],
            },
            Type::Int,
        )],
    );
    module.host_decls.push(ExternDecl {
        name: "explode".into(),
        params: vec![],
        ret: Type::Int,
        library: None,
        symbol: None,
    });

    let buffer = CaptureBuffer::new();
    let mut context = Context::new(ContextOptions::default());
    context.set_output(Box::new(buffer.clone()));
    context.compile(&module).unwrap();
    context.register_host_fn(
        "explode",
        Box::new(|_, _| panic!("host bug")),
        Box::new(()),
    );
    // The exception is swallowed into a nil result; execution completes.
    context.execute().unwrap();
    assert_eq!(buffer.contents(), "nil\n");
}

#[test]
fn globals_round_trip_through_the_context() {
    let module = main_module(
        "globals.etch",
        vec![Stmt::Assign {
            target: etch_compiler::ast::LValue::Name("answer".into()),
            value: Expr::Int(41),
            pos: pos(),
        }],
    );
    let mut context = Context::new(ContextOptions::default());
    context.compile(&module).unwrap();

    assert!(!context.global_exists("answer"));
    context.execute().unwrap();
    assert!(context.global_exists("answer"));
    assert_eq!(context.global("answer"), Some(Value::Int(41)));

    context.set_global("answer", Value::Int(42));
    assert_eq!(context.global("answer"), Some(Value::Int(42)));
    assert!(!context.global_exists("missing"));
}

#[test]
fn instruction_hook_can_pause_and_resume() {
    let module = main_module(
        "hook.etch",
        vec![println_call(Expr::Int(9), Type::Int)],
    );
    let buffer = CaptureBuffer::new();
    let mut context = Context::new(ContextOptions::default());
    context.set_output(Box::new(buffer.clone()));
    context.compile(&module).unwrap();

    context.set_instruction_hook(Some(Box::new(|_, executed| {
        if executed >= 2 {
            HookAction::Stop
        } else {
            HookAction::Continue
        }
    })));
    // The program pauses before it can print.
    context.execute().unwrap();
    assert_eq!(context.instruction_count(), 2);
    assert_eq!(buffer.contents(), "");
    assert!(context.call_depth() > 0);

    context.set_instruction_hook(None);
    let state = context.resume().unwrap();
    assert!(matches!(state, ProgramState::Return(_)));
    assert_eq!(buffer.contents(), "9\n");
}

#[test]
fn breakpoints_suspend_with_an_inspectable_stack() {
    let module = main_module(
        "bp.etch",
        vec![println_call(Expr::Int(5), Type::Int)],
    );
    let buffer = CaptureBuffer::new();
    let mut context = Context::new(ContextOptions::default());
    context.set_output(Box::new(buffer.clone()));
    context.compile(&module).unwrap();

    let entry = context.vm().program().entry;
    context.set_breakpoint(entry + 1);
    context.execute().unwrap();

    assert_eq!(context.pc(), entry + 1);
    assert!(context.call_depth() >= 1);
    assert!(context.register_count() > 0);
    assert!(context.current_function().is_some());
    let snapshot = context.register_snapshot();
    assert_eq!(snapshot.len(), context.register_count());
    assert!(!context.call_stack().is_empty());

    context.remove_breakpoint(entry + 1);
    let state = context.resume().unwrap();
    assert!(matches!(state, ProgramState::Return(_)));
    assert_eq!(buffer.contents(), "5\n");
}

#[test]
fn serialized_programs_execute_identically() {
    let module = main_module(
        "roundtrip.etch",
        vec![
            println_call(Expr::Str("first".into()), Type::Str),
            println_call(Expr::Int(77), Type::Int),
        ],
    );
    let direct = CaptureBuffer::new();
    let mut context = Context::new(ContextOptions::default());
    context.set_output(Box::new(direct.clone()));
    context.compile(&module).unwrap();
    let bytes = context.program_bytes().unwrap();
    context.execute().unwrap();

    let reloaded = CaptureBuffer::new();
    let mut second = Context::new(ContextOptions::default());
    second.set_output(Box::new(reloaded.clone()));
    second.load_bytes(&bytes).unwrap();
    second.execute().unwrap();

    assert_eq!(direct.contents(), reloaded.contents());
    assert_eq!(direct.contents(), "first\n77\n");
}

#[test]
fn gc_frame_budget_exposes_statistics() {
    let module = main_module("gc.etch", vec![]);
    let mut context = Context::new(ContextOptions {
        gc_cycle_interval: 8,
        ..ContextOptions::default()
    });
    context.compile(&module).unwrap();
    context.set_gc_frame_budget(500);
    context.execute().unwrap();

    let stats = context.gc_stats();
    assert_eq!(stats.threshold, 8);
    assert!(stats.budget_remaining.is_some());
    // An idle heap never recommends a dedicated GC frame.
    assert!(!context.gc_frame_recommended());
}

#[test]
fn value_helpers_cover_the_host_surface() {
    let mut array = Value::Array(Box::new(vec![Value::Int(1), Value::Bool(true)]));
    assert_eq!(array.as_array().map(<[Value]>::len), Some(2));
    array.push(Value::str("x")).unwrap();
    assert_eq!(array.as_array().map(<[Value]>::len), Some(3));

    let some = Value::Some(Box::new(Value::Int(7)));
    assert_eq!(some.unwrap_inner(), Some(&Value::Int(7)));
    assert!(some.is_wrapper());

    let color = Value::enum_of("Color", 2, Some("blue"));
    match color {
        Value::Enum { type_id, value, .. } => {
            assert_eq!(type_id, etch_bytecode::type_id("Color"));
            assert_eq!(value, 2);
        }
        other => panic!("expected an enum value, got {other:?}"),
    }
}
