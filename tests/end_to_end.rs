// Integration tests exercising the compiler and VM together, end to end,
// on hand-built ASTs (parsing is out of scope for this crate).

use monkey_vm::ast::{Expr, HashPair, Program, Stmt};
use monkey_vm::compiler::Compiler;
use monkey_vm::errors::VmError;
use monkey_vm::object::Value;
use monkey_vm::vm::VM;

fn int(n: i64) -> Expr {
    Expr::IntegerLiteral(n)
}

fn ident(name: &str) -> Expr {
    Expr::Identifier(name.to_string())
}

fn infix(left: Expr, operator: &str, right: Expr) -> Expr {
    Expr::InfixExpression { left: Box::new(left), operator: operator.to_string(), right: Box::new(right) }
}

fn call(function: Expr, arguments: Vec<Expr>) -> Expr {
    Expr::CallExpression { function: Box::new(function), arguments }
}

fn expr_stmt(e: Expr) -> Stmt {
    Stmt::ExpressionStatement(e)
}

fn run(program: Program) -> Value {
    let mut compiler = Compiler::new();
    compiler.compile_program(&program).expect("compilation should succeed");
    let bytecode = compiler.bytecode();
    let mut vm = VM::new(bytecode);
    vm.run().expect("vm execution should succeed");
    vm.last_popped_stack_element()
}

fn run_err(program: Program) -> VmError {
    let mut compiler = Compiler::new();
    compiler.compile_program(&program).expect("compilation should succeed");
    let bytecode = compiler.bytecode();
    let mut vm = VM::new(bytecode);
    vm.run().expect_err("vm execution should fail")
}

#[test]
fn arithmetic_pipeline_matches_expected_precedence() {
    // 50 / 2 * 2 + 10 - 5 == 55
    let program = Program::new(vec![expr_stmt(infix(
        infix(infix(infix(int(50), "/", int(2)), "*", int(2)), "+", int(10)),
        "-",
        int(5),
    ))]);
    assert_eq!(run(program), Value::Integer(55));
}

#[test]
fn higher_order_function_returning_a_closure() {
    // let newAdder = fn(a, b) { fn(c) { a + b + c } }; let addThree = newAdder(1, 2); addThree(8);
    let program = Program::new(vec![
        Stmt::Let {
            name: "newAdder".into(),
            value: Expr::FunctionLiteral {
                parameters: vec!["a".into(), "b".into()],
                body: vec![expr_stmt(Expr::FunctionLiteral {
                    parameters: vec!["c".into()],
                    body: vec![expr_stmt(infix(infix(ident("a"), "+", ident("b")), "+", ident("c")))],
                    name: None,
                })],
                name: Some("newAdder".into()),
            },
        },
        Stmt::Let { name: "addThree".into(), value: call(ident("newAdder"), vec![int(1), int(2)]) },
        expr_stmt(call(ident("addThree"), vec![int(8)])),
    ]);
    assert_eq!(run(program), Value::Integer(11));
}

#[test]
fn recursive_fibonacci() {
    let fib_body = vec![expr_stmt(Expr::IfExpression {
        condition: Box::new(infix(ident("x"), "<", int(2))),
        consequence: vec![expr_stmt(ident("x"))],
        alternative: Some(vec![expr_stmt(infix(
            call(ident("fib"), vec![infix(ident("x"), "-", int(1))]),
            "+",
            call(ident("fib"), vec![infix(ident("x"), "-", int(2))]),
        ))]),
    })];

    let program = Program::new(vec![
        Stmt::Let {
            name: "fib".into(),
            value: Expr::FunctionLiteral {
                parameters: vec!["x".into()],
                body: fib_body,
                name: Some("fib".into()),
            },
        },
        expr_stmt(call(ident("fib"), vec![int(10)])),
    ]);
    assert_eq!(run(program), Value::Integer(55));
}

#[test]
fn array_and_hash_literals_with_builtins() {
    // let arr = [1, 2, 3]; len(push(arr, 4))
    let program = Program::new(vec![
        Stmt::Let { name: "arr".into(), value: Expr::ArrayLiteral(vec![int(1), int(2), int(3)]) },
        expr_stmt(call(ident("len"), vec![call(ident("push"), vec![ident("arr"), int(4)])])),
    ]);
    assert_eq!(run(program), Value::Integer(4));
}

#[test]
fn hash_literal_preserves_insertion_order_on_display() {
    let pairs: Vec<HashPair> =
        vec![(Expr::StringLiteral("b".into()), int(2)), (Expr::StringLiteral("a".into()), int(1))];
    let program = Program::new(vec![expr_stmt(Expr::HashLiteral(pairs))]);
    assert_eq!(run(program).to_string(), "{b: 2, a: 1}");
}

#[test]
fn calling_a_non_function_is_a_vm_error() {
    let program = Program::new(vec![expr_stmt(call(int(5), vec![]))]);
    let err = run_err(program);
    assert_eq!(err, VmError::new("calling non-function and non-built-in: INTEGER"));
}

#[test]
fn wrong_argument_count_on_user_function_is_a_vm_error() {
    let program = Program::new(vec![
        Stmt::Let {
            name: "f".into(),
            value: Expr::FunctionLiteral { parameters: vec!["a".into()], body: vec![], name: None },
        },
        expr_stmt(call(ident("f"), vec![int(1), int(2)])),
    ]);
    let err = run_err(program);
    assert_eq!(err, VmError::wrong_argument_count(1, 2));
}

#[test]
fn unknown_identifier_fails_at_compile_time_not_runtime() {
    let mut compiler = Compiler::new();
    let program = Program::new(vec![expr_stmt(ident("doesNotExist"))]);
    let err = compiler.compile_program(&program).unwrap_err();
    assert_eq!(err.to_string(), "identifier not found: doesNotExist");
}
