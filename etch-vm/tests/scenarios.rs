//! End-to-end scenarios: typed modules compiled through the context and
//! executed, asserting on captured output and observable VM state.

use etch_compiler::ast::{
    BinOp, Block, Expr, Function, Module, Param, Pos, Stmt, Type,
};
use etch_vm::{CaptureBuffer, Context, ContextOptions, Value};

fn pos() -> Pos {
    Pos::new(1, 1)
}

fn int(value: i64) -> Expr {
    Expr::Int(value)
}

fn name(n: &str) -> Expr {
    Expr::Name(n.into())
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        operand_ty: Type::Int,
    }
}

fn println_of(arg: Expr, arg_ty: Type) -> Stmt {
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

fn function(name: &str, params: Vec<Param>, ret: Type, stmts: Vec<Stmt>) -> Function {
    Function {
        name: name.into(),
        params,
        ret,
        body: Block::new(stmts),
        pos: pos(),
    }
}

fn run_module(module: &Module) -> (Context, String) {
    let buffer = CaptureBuffer::new();
    let mut context = Context::new(ContextOptions::default());
    context.set_output(Box::new(buffer.clone()));
    context.compile(module).expect("module compiles");
    let exit = context.execute().expect("module executes");
    assert_eq!(exit, 0);
    (context, buffer.contents())
}

#[test]
fn arithmetic_precedence_and_print() {
    let module = Module {
        file: "arith.etch".into(),
        functions: vec![function(
            "main",
            vec![],
            Type::Unit,
            vec![println_of(
                binary(BinOp::Add, int(2), binary(BinOp::Mul, int(3), int(4))),
                Type::Int,
            )],
        )],
        ..Module::default()
    };
    let (_, output) = run_module(&module);
    assert_eq!(output, "14\n");
}

#[test]
fn counted_loop_sums_the_first_hundred_integers() {
    let body = vec![
        Stmt::Let {
            name: "total".into(),
            ty: Type::Int,
            value: int(0),
            pos: pos(),
        },
        Stmt::ForRange {
            var: "i".into(),
            start: int(1),
            end: int(100),
            inclusive: true,
            body: Block::new(vec![Stmt::Assign {
                target: etch_compiler::ast::LValue::Name("total".into()),
                value: binary(BinOp::Add, name("total"), name("i")),
                pos: pos(),
            }]),
            pos: pos(),
        },
        println_of(name("total"), Type::Int),
    ];
    let module = Module {
        file: "sum.etch".into(),
        functions: vec![function("main", vec![], Type::Unit, body)],
        ..Module::default()
    };
    let (_, output) = run_module(&module);
    assert_eq!(output, "5050\n");
}

#[test]
fn option_propagation_short_circuits() {
    // fn f(x: int) -> option[int] { if x < 0 { return none }; some(x * 2) }
    let f = function(
        "f",
        vec![Param {
            name: "x".into(),
            ty: Type::Int,
        }],
        Type::Option(Box::new(Type::Int)),
        vec![
            Stmt::If {
                arms: vec![(
                    binary(BinOp::Lt, name("x"), int(0)),
                    Block::new(vec![Stmt::Return {
                        value: Some(Expr::NoneLit),
                        pos: pos(),
                    }]),
                )],
                else_block: None,
                pos: pos(),
            },
            Stmt::Return {
                value: Some(Expr::WrapSome(Box::new(binary(
                    BinOp::Mul,
                    name("x"),
                    int(2),
                )))),
                pos: pos(),
            },
        ],
    );
    // fn g(x: int) -> option[int] { let y = f(x)?; some(y + 1) }
    let g = function(
        "g",
        vec![Param {
            name: "x".into(),
            ty: Type::Int,
        }],
        Type::Option(Box::new(Type::Int)),
        vec![
            Stmt::Let {
                name: "y".into(),
                ty: Type::Int,
                value: Expr::Propagate(Box::new(Expr::Call {
                    name: "f".into(),
                    sig: vec![Type::Int],
                    ret: Type::Option(Box::new(Type::Int)),
                    args: vec![name("x")],
                })),
                pos: pos(),
            },
            Stmt::Return {
                value: Some(Expr::WrapSome(Box::new(binary(
                    BinOp::Add,
                    name("y"),
                    int(1),
                )))),
                pos: pos(),
            },
        ],
    );
    let module = Module {
        file: "prop.etch".into(),
        functions: vec![f, g],
        ..Module::default()
    };
    let buffer = CaptureBuffer::new();
    let mut context = Context::new(ContextOptions::default());
    context.set_output(Box::new(buffer.clone()));
    context.compile(&module).expect("module compiles");

    let some = context.call("g", vec![Value::Int(5)]).expect("g(5) runs");
    assert_eq!(some, Value::Some(Box::new(Value::Int(11))));

    let none = context.call("g", vec![Value::Int(-1)]).expect("g(-1) runs");
    assert_eq!(none, Value::None);
}

#[test]
fn cyclic_tables_are_reclaimed_by_the_collector() {
    // Two tables linking each other; the locals die when main returns.
    let table = |_: &str| Expr::TableLit {
        entries: vec![],
        type_name: None,
    };
    let body = vec![
        Stmt::Let {
            name: "a".into(),
            ty: Type::Table,
            value: table("a"),
            pos: pos(),
        },
        Stmt::Let {
            name: "b".into(),
            ty: Type::Table,
            value: table("b"),
            pos: pos(),
        },
        Stmt::Assign {
            target: etch_compiler::ast::LValue::Field {
                obj: name("a"),
                field: "link".into(),
            },
            value: name("b"),
            pos: pos(),
        },
        Stmt::Assign {
            target: etch_compiler::ast::LValue::Field {
                obj: name("b"),
                field: "link".into(),
            },
            value: name("a"),
            pos: pos(),
        },
    ];
    let module = Module {
        file: "cycle.etch".into(),
        functions: vec![function("main", vec![], Type::Unit, body)],
        ..Module::default()
    };
    let (mut context, _) = run_module(&module);

    // Refcounting alone cannot reclaim the pair.
    assert_eq!(context.freed_slots(), 0);
    let freed = context.collect_cycles();
    assert_eq!(freed, 2);
    assert_eq!(context.freed_slots(), 2);
}

#[test]
fn coroutine_yield_sequence_and_final_value_replay() {
    // fn gen() -> int { yield 1; yield 2; yield 3; 0 }
    let yield_stmt = |value: i64| Stmt::Expr {
        expr: Expr::Yield {
            value: Some(Box::new(int(value))),
        },
        pos: pos(),
    };
    let gen = function(
        "gen",
        vec![],
        Type::Int,
        vec![
            yield_stmt(1),
            yield_stmt(2),
            yield_stmt(3),
            Stmt::Return {
                value: Some(int(0)),
                pos: pos(),
            },
        ],
    );
    let resume = || Expr::Resume {
        coro: Box::new(name("c")),
        arg: None,
    };
    let mut body = vec![Stmt::Let {
        name: "c".into(),
        ty: Type::Coroutine,
        value: Expr::Spawn {
            name: "gen".into(),
            sig: vec![],
            ret: Type::Int,
            args: vec![],
        },
        pos: pos(),
    }];
    for _ in 0..5 {
        body.push(println_of(resume(), Type::Int));
    }
    let module = Module {
        file: "coro.etch".into(),
        functions: vec![gen, function("main", vec![], Type::Unit, body)],
        ..Module::default()
    };
    let (_, output) = run_module(&module);
    // Three yields, the return value, then the stored value replays.
    assert_eq!(output, "1\n2\n3\n0\n0\n");
}

#[test]
fn channel_backpressure_preserves_send_order() {
    let chan_ty = Type::Channel(Box::new(Type::Int));
    let chan_param = Param {
        name: "ch".into(),
        ty: chan_ty.clone(),
    };
    // fn producer(ch) { for i in 1..=5 { send ch <- i } }
    let producer = function(
        "producer",
        vec![chan_param.clone()],
        Type::Unit,
        vec![Stmt::ForRange {
            var: "i".into(),
            start: int(1),
            end: int(5),
            inclusive: true,
            body: Block::new(vec![Stmt::Expr {
                expr: Expr::ChanSend {
                    chan: Box::new(name("ch")),
                    value: Box::new(name("i")),
                },
                pos: pos(),
            }]),
            pos: pos(),
        }],
    );
    // fn consumer(ch) { for j in 1..=5 { println(recv ch) } }
    let consumer = function(
        "consumer",
        vec![chan_param],
        Type::Unit,
        vec![Stmt::ForRange {
            var: "j".into(),
            start: int(1),
            end: int(5),
            inclusive: true,
            body: Block::new(vec![println_of(
                Expr::ChanRecv {
                    chan: Box::new(name("ch")),
                },
                Type::Int,
            )]),
            pos: pos(),
        }],
    );

    let spawn = |func: &str| Expr::Spawn {
        name: func.into(),
        sig: vec![Type::Channel(Box::new(Type::Int))],
        ret: Type::Unit,
        args: vec![name("ch")],
    };
    let resume = |coro: &str| Stmt::Expr {
        expr: Expr::Resume {
            coro: Box::new(name(coro)),
            arg: None,
        },
        pos: pos(),
    };
    let mut body = vec![
        Stmt::Let {
            name: "ch".into(),
            ty: chan_ty,
            value: Expr::ChannelNew {
                elem_ty: Type::Int,
                capacity: 2,
            },
            pos: pos(),
        },
        Stmt::Let {
            name: "p".into(),
            ty: Type::Coroutine,
            value: spawn("producer"),
            pos: pos(),
        },
        Stmt::Let {
            name: "q".into(),
            ty: Type::Coroutine,
            value: spawn("consumer"),
            pos: pos(),
        },
    ];
    for _ in 0..6 {
        body.push(resume("p"));
        body.push(resume("q"));
    }
    let module = Module {
        file: "chan.etch".into(),
        functions: vec![producer, consumer, function("main", vec![], Type::Unit, body)],
        ..Module::default()
    };
    let (_, output) = run_module(&module);
    assert_eq!(output, "1\n2\n3\n4\n5\n");
}

#[test]
fn defers_run_lifo_on_return() {
    let print_str = |s: &str| println_of(Expr::Str(s.into()), Type::Str);
    let body = vec![
        Stmt::Defer {
            body: Block::new(vec![print_str("a")]),
            pos: pos(),
        },
        Stmt::Defer {
            body: Block::new(vec![print_str("b")]),
            pos: pos(),
        },
        print_str("c"),
    ];
    let module = Module {
        file: "defer.etch".into(),
        functions: vec![function("main", vec![], Type::Unit, body)],
        ..Module::default()
    };
    let (_, output) = run_module(&module);
    assert_eq!(output, "c\nb\na\n");
}

#[test]
fn destructors_run_when_the_last_reference_drops() {
    use etch_bytecode::TypeDecl;

    let cleanup = function(
        "cleanup",
        vec![Param {
            name: "r".into(),
            ty: Type::Named("Res".into()),
        }],
        Type::Unit,
        vec![println_of(Expr::Str("dtor".into()), Type::Str)],
    );
    let body = vec![
        Stmt::Let {
            name: "r".into(),
            ty: Type::Named("Res".into()),
            value: Expr::TableLit {
                entries: vec![("id".into(), int(1))],
                type_name: Some("Res".into()),
            },
            pos: pos(),
        },
        println_of(Expr::Str("before".into()), Type::Str),
    ];
    let module = Module {
        file: "dtor.etch".into(),
        types: vec![TypeDecl::Object {
            name: "Res".into(),
            fields: vec![("id".into(), etch_bytecode::TypeSig::Int)],
            destructor: Some("cleanup".into()),
        }],
        functions: vec![cleanup, function("main", vec![], Type::Unit, body)],
        ..Module::default()
    };
    let (_, output) = run_module(&module);
    assert_eq!(output, "before\ndtor\n");
}

#[test]
fn closures_capture_and_apply() {
    // fn adder(n: int, x: int) -> int { n + x }   (lifted lambda, capture n)
    let adder = function(
        "adder",
        vec![
            Param {
                name: "n".into(),
                ty: Type::Int,
            },
            Param {
                name: "x".into(),
                ty: Type::Int,
            },
        ],
        Type::Int,
        vec![Stmt::Return {
            value: Some(binary(BinOp::Add, name("n"), name("x"))),
            pos: pos(),
        }],
    );
    let body = vec![
        Stmt::Let {
            name: "add10".into(),
            ty: Type::Int,
            value: Expr::Lambda {
                func: "adder".into(),
                sig: vec![Type::Int, Type::Int],
                ret: Type::Int,
                captures: vec![int(10)],
            },
            pos: pos(),
        },
        println_of(
            Expr::CallClosure {
                callee: Box::new(name("add10")),
                args: vec![int(32)],
                has_result: true,
            },
            Type::Int,
        ),
    ];
    let module = Module {
        file: "closure.etch".into(),
        functions: vec![adder, function("main", vec![], Type::Unit, body)],
        ..Module::default()
    };
    let (_, output) = run_module(&module);
    assert_eq!(output, "42\n");
}

#[test]
fn match_statement_selects_the_first_matching_arm() {
    use etch_compiler::ast::{MatchArm, Pattern};

    // match classify(x): some(v) -> println(v); none -> println(-1)
    let classify = function(
        "classify",
        vec![Param {
            name: "x".into(),
            ty: Type::Int,
        }],
        Type::Option(Box::new(Type::Int)),
        vec![
            Stmt::If {
                arms: vec![(
                    binary(BinOp::Lt, name("x"), int(0)),
                    Block::new(vec![Stmt::Return {
                        value: Some(Expr::NoneLit),
                        pos: pos(),
                    }]),
                )],
                else_block: None,
                pos: pos(),
            },
            Stmt::Return {
                value: Some(Expr::WrapSome(Box::new(name("x")))),
                pos: pos(),
            },
        ],
    );
    let match_over = |arg: i64| Stmt::Match {
        scrutinee: Expr::Call {
            name: "classify".into(),
            sig: vec![Type::Int],
            ret: Type::Option(Box::new(Type::Int)),
            args: vec![int(arg)],
        },
        arms: vec![
            MatchArm {
                pattern: Pattern::Some(Box::new(Pattern::Bind("v".into()))),
                guard: None,
                body: Block::new(vec![println_of(name("v"), Type::Int)]),
            },
            MatchArm {
                pattern: Pattern::None,
                guard: None,
                body: Block::new(vec![println_of(int(-1), Type::Int)]),
            },
        ],
        pos: pos(),
    };
    let module = Module {
        file: "match.etch".into(),
        functions: vec![
            classify,
            function("main", vec![], Type::Unit, vec![match_over(7), match_over(-3)]),
        ],
        ..Module::default()
    };
    let (_, output) = run_module(&module);
    assert_eq!(output, "7\n-1\n");
}
