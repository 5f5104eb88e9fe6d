//! Static properties of compiled programs: mangling, table layout, loop
//! lowering, fusion, lifetimes and the serialized round trip.

use etch_asm::Opcode;
use etch_compiler::ast::{
    BinOp, Block, Expr, Function, Module, Param, Pos, Stmt, Type,
};
use etch_compiler::{compile, compile_with, CompileOptions, ErrorKind};
use etch_bytecode::{FunctionKind, Program};

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

fn function(name: &str, params: Vec<Param>, ret: Type, stmts: Vec<Stmt>) -> Function {
    Function {
        name: name.into(),
        params,
        ret,
        body: Block::new(stmts),
        pos: pos(),
    }
}

fn main_module(stmts: Vec<Stmt>) -> Module {
    Module {
        file: "test.etch".into(),
        functions: vec![function("main", vec![], Type::Unit, stmts)],
        ..Module::default()
    }
}

fn opcodes_of(program: &Program) -> Vec<Opcode> {
    program
        .instructions
        .iter()
        .filter_map(|insn| insn.opcode().ok())
        .collect()
}

#[test]
fn overloads_get_distinct_table_entries() {
    let module = Module {
        file: "overloads.etch".into(),
        functions: vec![
            function(
                "f",
                vec![Param {
                    name: "x".into(),
                    ty: Type::Int,
                }],
                Type::Int,
                vec![Stmt::Return {
                    value: Some(name("x")),
                    pos: pos(),
                }],
            ),
            function(
                "f",
                vec![Param {
                    name: "x".into(),
                    ty: Type::Float,
                }],
                Type::Float,
                vec![Stmt::Return {
                    value: Some(name("x")),
                    pos: pos(),
                }],
            ),
        ],
        ..Module::default()
    };
    let program = compile(&module).unwrap();
    let int_version = program.functions.by_name("f__ii").unwrap();
    let float_version = program.functions.by_name("f__ff").unwrap();
    assert_ne!(int_version, float_version);
}

#[test]
fn duplicate_signatures_are_rejected() {
    let one = function("f", vec![], Type::Unit, vec![]);
    let module = Module {
        file: "dup.etch".into(),
        functions: vec![one.clone(), one],
        ..Module::default()
    };
    let error = compile(&module).unwrap_err();
    assert_eq!(error.kind, ErrorKind::NameResolution);
}

#[test]
fn unknown_callee_is_a_name_resolution_error() {
    let module = main_module(vec![Stmt::Expr {
        expr: Expr::Call {
            name: "ghost".into(),
            sig: vec![],
            ret: Type::Unit,
            args: vec![],
        },
        pos: pos(),
    }]);
    let error = compile(&module).unwrap_err();
    assert_eq!(error.kind, ErrorKind::NameResolution);
}

#[test]
fn break_outside_a_loop_is_rejected() {
    let module = main_module(vec![Stmt::Break { pos: pos() }]);
    let error = compile(&module).unwrap_err();
    assert_eq!(error.kind, ErrorKind::InvalidControlFlow);
}

#[test]
fn counted_ranges_use_the_int_loop_pair() {
    let module = main_module(vec![Stmt::ForRange {
        var: "i".into(),
        start: int(1),
        end: int(10),
        inclusive: true,
        body: Block::new(vec![]),
        pos: pos(),
    }]);
    let program = compile(&module).unwrap();
    let opcodes = opcodes_of(&program);
    assert!(opcodes.contains(&Opcode::FORIPREP));
    assert!(opcodes.contains(&Opcode::FORILOOP));
    assert!(!opcodes.contains(&Opcode::FORPREP));
}

#[test]
fn container_iteration_uses_the_generic_loop_pair() {
    let module = main_module(vec![
        Stmt::Let {
            name: "items".into(),
            ty: Type::Array(Box::new(Type::Int)),
            value: Expr::ArrayLit {
                items: vec![int(1), int(2)],
            },
            pos: pos(),
        },
        Stmt::ForEach {
            var: "item".into(),
            var_ty: Type::Int,
            iterable: name("items"),
            body: Block::new(vec![]),
            pos: pos(),
        },
    ]);
    let program = compile(&module).unwrap();
    let opcodes = opcodes_of(&program);
    assert!(opcodes.contains(&Opcode::FORPREP));
    assert!(opcodes.contains(&Opcode::FORLOOP));
}

#[test]
fn equal_constants_are_pooled_once() {
    let print = |s: &str| Stmt::Expr {
        expr: Expr::Call {
            name: "print".into(),
            sig: vec![Type::Str],
            ret: Type::Unit,
            args: vec![Expr::Str(s.into())],
        },
        pos: pos(),
    };
    let module = main_module(vec![print("dup"), print("dup"), print("other")]);
    let program = compile(&module).unwrap();
    let strings = program
        .constants
        .iter()
        .filter(|c| matches!(c, etch_bytecode::Constant::Str(s) if s == "dup"))
        .count();
    assert_eq!(strings, 1);
}

#[test]
fn named_variables_have_lifetime_records() {
    let module = main_module(vec![
        Stmt::Let {
            name: "x".into(),
            ty: Type::Int,
            value: int(3),
            pos: pos(),
        },
        Stmt::Let {
            name: "y".into(),
            ty: Type::Int,
            value: binary(BinOp::Add, name("x"), int(1)),
            pos: pos(),
        },
    ]);
    let program = compile(&module).unwrap();
    let main = program.functions.by_name("main__u").unwrap();
    let records = program.lifetimes.get(main);
    let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
    assert!(names.contains(&"x"));
    assert!(names.contains(&"y"));

    let desc = program.functions.get(main).unwrap();
    for record in records {
        assert!(record.register < desc.max_registers);
        assert!(record.start_pc <= record.end_pc);
        assert!(desc.entry <= record.def_pc && record.end_pc <= desc.end);
    }
}

#[test]
fn propagation_is_recorded_on_the_descriptor() {
    let module = Module {
        file: "prop.etch".into(),
        functions: vec![
            function(
                "inner",
                vec![],
                Type::Option(Box::new(Type::Int)),
                vec![Stmt::Return {
                    value: Some(Expr::WrapSome(Box::new(int(1)))),
                    pos: pos(),
                }],
            ),
            function(
                "outer",
                vec![],
                Type::Option(Box::new(Type::Int)),
                vec![Stmt::Return {
                    value: Some(Expr::WrapSome(Box::new(Expr::Propagate(Box::new(
                        Expr::Call {
                            name: "inner".into(),
                            sig: vec![],
                            ret: Type::Option(Box::new(Type::Int)),
                            args: vec![],
                        },
                    ))))),
                    pos: pos(),
                }],
            ),
        ],
        ..Module::default()
    };
    let program = compile(&module).unwrap();
    let outer = program.functions.by_name("outer__oi").unwrap();
    let inner = program.functions.by_name("inner__oi").unwrap();
    assert!(program.functions.get(outer).unwrap().propagates.is_some());
    assert!(program.functions.get(inner).unwrap().propagates.is_none());
}

#[test]
fn multiply_add_chains_emit_the_fused_form() {
    // y = a * b + c, with the product temp dying at the add.
    let module = main_module(vec![
        Stmt::Let {
            name: "a".into(),
            ty: Type::Int,
            value: int(3),
            pos: pos(),
        },
        Stmt::Let {
            name: "b".into(),
            ty: Type::Int,
            value: int(4),
            pos: pos(),
        },
        Stmt::Let {
            name: "c".into(),
            ty: Type::Int,
            value: int(5),
            pos: pos(),
        },
        Stmt::Let {
            name: "y".into(),
            ty: Type::Int,
            value: binary(
                BinOp::Add,
                binary(BinOp::Mul, name("a"), name("b")),
                name("c"),
            ),
            pos: pos(),
        },
    ]);
    let program = compile(&module).unwrap();
    assert!(opcodes_of(&program).contains(&Opcode::IMULADD));
}

#[test]
fn comparisons_feeding_branches_fuse_into_cmpjmp() {
    let module = main_module(vec![Stmt::While {
        cond: binary(BinOp::Lt, int(0), int(1)),
        body: Block::new(vec![Stmt::Break { pos: pos() }]),
        pos: pos(),
    }]);
    let program = compile(&module).unwrap();
    // The while-condition TEST over a comparison store stays; the direct
    // cmp+jmp pattern appears in pattern lowering. Either way at least the
    // comparison ran through the peephole without disturbing the loop.
    assert!(program.check().is_ok());
}

#[test]
fn release_mode_strips_debug_spans_and_dead_stores() {
    let stmts = vec![
        Stmt::Let {
            name: "kept".into(),
            ty: Type::Int,
            value: int(1),
            pos: pos(),
        },
        Stmt::Expr {
            expr: Expr::Call {
                name: "println".into(),
                sig: vec![Type::Int],
                ret: Type::Unit,
                args: vec![name("kept")],
            },
            pos: pos(),
        },
    ];
    let debug = compile_with(&main_module(stmts.clone()), &CompileOptions::default())
        .unwrap();
    let release = compile_with(
        &main_module(stmts),
        &CompileOptions { release: true },
    )
    .unwrap();

    assert!(debug.debug.iter().count() > 0);
    assert_eq!(release.debug.iter().count(), 0);
    assert!(release.instructions.len() <= debug.instructions.len());
}

#[test]
fn compiled_programs_survive_the_byte_round_trip() {
    let module = main_module(vec![
        Stmt::Let {
            name: "x".into(),
            ty: Type::Int,
            value: binary(BinOp::Mul, int(6), int(7)),
            pos: pos(),
        },
        Stmt::Expr {
            expr: Expr::Call {
                name: "println".into(),
                sig: vec![Type::Int],
                ret: Type::Unit,
                args: vec![name("x")],
            },
            pos: pos(),
        },
    ]);
    let program = compile(&module).unwrap();
    let bytes = program.to_bytes();
    let reloaded = Program::from_bytes(&bytes).unwrap();
    assert_eq!(program, reloaded);
}

#[test]
fn builtins_and_extern_decls_share_the_function_table() {
    let mut module = main_module(vec![]);
    module.host_decls.push(etch_compiler::ast::ExternDecl {
        name: "notify".into(),
        params: vec![Type::Str],
        ret: Type::Unit,
        library: None,
        symbol: None,
    });
    module.foreign_decls.push(etch_compiler::ast::ExternDecl {
        name: "native_sqrt".into(),
        params: vec![Type::Float],
        ret: Type::Float,
        library: Some("libm".into()),
        symbol: Some("sqrt".into()),
    });
    let program = compile(&module).unwrap();

    let host = program.functions.by_name("notify").unwrap();
    assert_eq!(program.functions.get(host).unwrap().kind, FunctionKind::Host);

    let foreign = program.functions.by_name("native_sqrt").unwrap();
    let desc = program.functions.get(foreign).unwrap();
    assert_eq!(desc.kind, FunctionKind::Foreign);
    assert_eq!(desc.library.as_deref(), Some("libm"));
    assert_eq!(desc.symbol.as_deref(), Some("sqrt"));

    let builtin = program.functions.by_name("println").unwrap();
    assert_eq!(
        program.functions.get(builtin).unwrap().kind,
        FunctionKind::Builtin
    );
}

#[test]
fn every_destination_register_stays_inside_the_window() {
    // The emitted-program invariant the loader re-checks.
    let module = main_module(vec![Stmt::Let {
        name: "x".into(),
        ty: Type::Int,
        value: binary(
            BinOp::Add,
            binary(BinOp::Mul, int(2), int(3)),
            binary(BinOp::Mul, int(4), int(5)),
        ),
        pos: pos(),
    }]);
    let program = compile(&module).unwrap();
    assert!(program.check().is_ok());
}
