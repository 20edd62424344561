// File: src/compiler.rs
//
// Bytecode compiler for the Monkey language. Walks the AST once, emitting
// instructions into the innermost `CompilationScope` on a stack of scopes
// (one per function body currently being compiled, the outermost being
// the top-level program). Jumps are back-patched after the fact: emit a
// placeholder operand, remember its offset, and `change_operand` it once
// the real target is known.

use crate::ast::{Expr, HashPair, Program, Stmt};
use crate::bytecode::{make, Instructions, Opcode};
use crate::errors::CompileError;
use crate::object::{CompiledFunction, Value};
use crate::symbol_table::{SymbolScope, SymbolTable};

/// The instructions and constant pool produced by a successful compile,
/// ready to be handed to the VM.
#[derive(Debug, Clone)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Value>,
}

#[derive(Debug, Clone, Copy, Default)]
struct EmittedInstruction {
    opcode: Option<Opcode>,
    position: usize,
}

#[derive(Debug, Clone, Default)]
struct CompilationScope {
    instructions: Instructions,
    last_instruction: EmittedInstruction,
    previous_instruction: EmittedInstruction,
}

pub struct Compiler {
    constants: Vec<Value>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
}

impl Compiler {
    pub fn new() -> Self {
        Compiler {
            constants: Vec::new(),
            symbol_table: SymbolTable::new_global(),
            scopes: vec![CompilationScope::default()],
        }
    }

    /// Resume compiling into a previously produced constant pool and
    /// symbol table, as the REPL does between successive inputs.
    pub fn with_state(symbol_table: SymbolTable, constants: Vec<Value>) -> Self {
        Compiler { constants, symbol_table, scopes: vec![CompilationScope::default()] }
    }

    pub fn into_symbol_table(self) -> SymbolTable {
        self.symbol_table
    }

    pub fn compile_program(&mut self, program: &Program) -> Result<(), CompileError> {
        for statement in &program.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    pub fn bytecode(&self) -> Bytecode {
        Bytecode { instructions: self.scopes[0].instructions.clone(), constants: self.constants.clone() }
    }

    fn compile_statement(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::ExpressionStatement(expr) => {
                self.compile_expr(expr)?;
                self.emit(Opcode::Pop, &[]);
            }
            Stmt::Let { name, value } => {
                // Define before compiling the value so a function literal's
                // body can resolve its own name: this is what makes
                // recursion (`let fib = fn(x) { fib(x - 1) }`) work.
                let symbol = self.symbol_table.define(name);
                self.compile_expr(value)?;
                match symbol.scope {
                    SymbolScope::Global => self.emit(Opcode::SetGlobal, &[symbol.index]),
                    SymbolScope::Local => self.emit(Opcode::SetLocal, &[symbol.index]),
                    SymbolScope::Free | SymbolScope::Builtin => {
                        unreachable!("let always defines a Global or Local symbol")
                    }
                };
            }
            Stmt::Return(expr) => {
                self.compile_expr(expr)?;
                self.emit(Opcode::ReturnValue, &[]);
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &[Stmt]) -> Result<(), CompileError> {
        for statement in block {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::IntegerLiteral(value) => {
                let constant = self.add_constant(Value::Integer(*value));
                self.emit(Opcode::Constant, &[constant]);
            }
            Expr::StringLiteral(value) => {
                let constant = self.add_constant(Value::string(value.as_str()));
                self.emit(Opcode::Constant, &[constant]);
            }
            Expr::Boolean(true) => {
                self.emit(Opcode::True, &[]);
            }
            Expr::Boolean(false) => {
                self.emit(Opcode::False, &[]);
            }
            Expr::Identifier(name) => self.compile_identifier(name)?,
            Expr::PrefixExpression { operator, right } => {
                self.compile_expr(right)?;
                match operator.as_str() {
                    "!" => self.emit(Opcode::Bang, &[]),
                    "-" => self.emit(Opcode::Minus, &[]),
                    other => return Err(CompileError::unknown_operator(other)),
                };
            }
            Expr::InfixExpression { left, operator, right } => {
                self.compile_infix(left, operator, right)?;
            }
            Expr::IfExpression { condition, consequence, alternative } => {
                self.compile_if(condition, consequence, alternative.as_deref())?;
            }
            Expr::FunctionLiteral { parameters, body, .. } => {
                self.compile_function_literal(parameters, body)?;
            }
            Expr::CallExpression { function, arguments } => {
                self.compile_expr(function)?;
                for argument in arguments {
                    self.compile_expr(argument)?;
                }
                self.emit(Opcode::Call, &[arguments.len()]);
            }
            Expr::ArrayLiteral(elements) => {
                for element in elements {
                    self.compile_expr(element)?;
                }
                self.emit(Opcode::Array, &[elements.len()]);
            }
            Expr::HashLiteral(pairs) => {
                self.compile_hash_literal(pairs)?;
            }
            Expr::IndexExpression { left, index } => {
                self.compile_expr(left)?;
                self.compile_expr(index)?;
                self.emit(Opcode::Index, &[]);
            }
        }
        Ok(())
    }

    fn compile_identifier(&mut self, name: &str) -> Result<(), CompileError> {
        let symbol = self
            .symbol_table
            .resolve(name)
            .ok_or_else(|| CompileError::identifier_not_found(name))?;
        self.load_symbol(&symbol);
        Ok(())
    }

    fn load_symbol(&mut self, symbol: &crate::symbol_table::Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::GetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(Opcode::GetLocal, &[symbol.index]),
            SymbolScope::Free => self.emit(Opcode::GetFree, &[symbol.index]),
            SymbolScope::Builtin => self.emit(Opcode::GetBuiltin, &[symbol.index]),
        };
    }

    fn compile_infix(&mut self, left: &Expr, operator: &str, right: &Expr) -> Result<(), CompileError> {
        // `<` has no opcode of its own: compile it as the operands swapped
        // through `>`, same as the book's tree-walking evaluator.
        if operator == "<" {
            self.compile_expr(right)?;
            self.compile_expr(left)?;
            self.emit(Opcode::GreaterThan, &[]);
            return Ok(());
        }

        self.compile_expr(left)?;
        self.compile_expr(right)?;

        match operator {
            "+" => self.emit(Opcode::Add, &[]),
            "-" => self.emit(Opcode::Sub, &[]),
            "*" => self.emit(Opcode::Mul, &[]),
            "/" => self.emit(Opcode::Div, &[]),
            ">" => self.emit(Opcode::GreaterThan, &[]),
            "==" => self.emit(Opcode::Equal, &[]),
            "!=" => self.emit(Opcode::NotEqual, &[]),
            other => return Err(CompileError::unknown_operator(other)),
        };
        Ok(())
    }

    fn compile_if(
        &mut self,
        condition: &Expr,
        consequence: &[Stmt],
        alternative: Option<&[Stmt]>,
    ) -> Result<(), CompileError> {
        self.compile_expr(condition)?;
        let jump_not_truthy_pos = self.emit(Opcode::JumpNotTruthy, &[9999]);

        self.compile_block(consequence)?;
        if self.last_instruction_is(Opcode::Pop) {
            self.remove_last_pop();
        }

        let jump_pos = self.emit(Opcode::Jump, &[9999]);
        let after_consequence_pos = self.current_instructions().len();
        self.change_operand(jump_not_truthy_pos, after_consequence_pos);

        match alternative {
            None => {
                self.emit(Opcode::Null, &[]);
            }
            Some(alternative) => {
                self.compile_block(alternative)?;
                if self.last_instruction_is(Opcode::Pop) {
                    self.remove_last_pop();
                }
            }
        }

        let after_alternative_pos = self.current_instructions().len();
        self.change_operand(jump_pos, after_alternative_pos);

        Ok(())
    }

    fn compile_function_literal(
        &mut self,
        parameters: &[String],
        body: &[Stmt],
    ) -> Result<(), CompileError> {
        self.enter_scope();

        for parameter in parameters {
            self.symbol_table.define(parameter);
        }

        self.compile_block(body)?;

        if self.last_instruction_is(Opcode::Pop) {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(Opcode::ReturnValue) {
            self.emit(Opcode::Return, &[]);
        }

        let free_symbols = self.symbol_table.free_symbols.clone();
        let num_locals = self.symbol_table.num_definitions();
        let instructions = self.leave_scope();

        for symbol in &free_symbols {
            self.load_symbol(symbol);
        }

        let compiled_function = CompiledFunction {
            instructions,
            num_locals,
            num_parameters: parameters.len(),
        };
        let constant = self.add_constant(Value::CompiledFunction(std::rc::Rc::new(compiled_function)));
        self.emit(Opcode::Closure, &[constant, free_symbols.len()]);
        Ok(())
    }

    fn compile_hash_literal(&mut self, pairs: &[HashPair]) -> Result<(), CompileError> {
        for (key, value) in pairs {
            self.compile_expr(key)?;
            self.compile_expr(value)?;
        }
        self.emit(Opcode::Hash, &[pairs.len() * 2]);
        Ok(())
    }

    // -- scope management --------------------------------------------

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        let outer = std::mem::replace(&mut self.symbol_table, SymbolTable::new());
        self.symbol_table = SymbolTable::new_enclosed(outer);
    }

    fn leave_scope(&mut self) -> Instructions {
        let scope = self.scopes.pop().expect("leave_scope called with no scope on the stack");
        let outer = std::mem::replace(&mut self.symbol_table, SymbolTable::new());
        self.symbol_table = outer.pop();
        scope.instructions
    }

    fn current_scope(&mut self) -> &mut CompilationScope {
        self.scopes.last_mut().expect("compiler always has at least one scope")
    }

    fn current_instructions(&mut self) -> &Instructions {
        &self.current_scope().instructions
    }

    // -- emission helpers ----------------------------------------------

    fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    fn emit(&mut self, op: Opcode, operands: &[usize]) -> usize {
        let instruction = make(op, operands);
        let position = self.current_scope().instructions.add(&instruction);

        let scope = self.current_scope();
        scope.previous_instruction = scope.last_instruction;
        scope.last_instruction = EmittedInstruction { opcode: Some(op), position };

        position
    }

    fn last_instruction_is(&mut self, op: Opcode) -> bool {
        if self.current_scope().instructions.is_empty() {
            return false;
        }
        self.current_scope().last_instruction.opcode == Some(op)
    }

    fn remove_last_pop(&mut self) {
        let scope = self.current_scope();
        let last_pos = scope.last_instruction.position;
        scope.instructions.truncate(last_pos);
        scope.last_instruction = scope.previous_instruction;
    }

    fn replace_last_pop_with_return(&mut self) {
        let scope = self.current_scope();
        let last_pos = scope.last_instruction.position;
        let return_instruction = make(Opcode::ReturnValue, &[]);
        scope.instructions.replace(last_pos, &return_instruction);
        scope.last_instruction.opcode = Some(Opcode::ReturnValue);
    }

    fn change_operand(&mut self, position: usize, operand: usize) {
        let scope = self.current_scope();
        let op = Opcode::from_byte(scope.instructions[position]).expect("valid opcode at position");
        let new_instruction = make(op, &[operand]);
        scope.instructions.replace(position, &new_instruction);
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}
