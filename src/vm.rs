// File: src/vm.rs
//
// Stack-based virtual machine executing the compiler's bytecode. One
// `Frame` per call (the top-level program counts as frame zero), each
// owning the closure it's executing and the base pointer into the shared
// value stack where its locals live.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::bytecode::Opcode;
use crate::compiler::Bytecode;
use crate::errors::VmError;
use crate::object::{Closure, CompiledFunction, Value, FALSE, NULL, TRUE};

const STACK_SIZE: usize = 2048;
const GLOBALS_SIZE: usize = 65536;
const MAX_FRAMES: usize = 1024;

struct Frame {
    closure: Closure,
    ip: isize,
    base_pointer: usize,
}

impl Frame {
    fn new(closure: Closure, base_pointer: usize) -> Self {
        Frame { closure, ip: -1, base_pointer }
    }

    fn instructions(&self) -> &[u8] {
        &self.closure.function.instructions.0
    }
}

pub struct VM {
    constants: Vec<Value>,
    stack: Vec<Value>,
    globals: Vec<Option<Value>>,
    frames: Vec<Frame>,
    last_popped: Value,
}

impl VM {
    pub fn new(bytecode: Bytecode) -> Self {
        VM::with_globals(bytecode, vec![None; GLOBALS_SIZE])
    }

    /// Start a new VM sharing a globals table from a previous run, as the
    /// REPL does between successive inputs.
    pub fn with_globals(bytecode: Bytecode, globals: Vec<Option<Value>>) -> Self {
        let main_function =
            CompiledFunction { instructions: bytecode.instructions, num_locals: 0, num_parameters: 0 };
        let main_closure = Closure { function: Rc::new(main_function), free: Rc::from(Vec::new()) };
        VM {
            constants: bytecode.constants,
            stack: Vec::with_capacity(STACK_SIZE),
            globals,
            frames: vec![Frame::new(main_closure, 0)],
            last_popped: NULL,
        }
    }

    pub fn into_globals(self) -> Vec<Option<Value>> {
        self.globals
    }

    /// The value of the last expression statement popped from the stack.
    /// This is the VM's answer, since a fully executed program leaves the
    /// stack empty: every `OpPop` pops, nothing else is left behind.
    pub fn last_popped_stack_element(&self) -> Value {
        self.last_popped.clone()
    }

    pub fn run(&mut self) -> Result<(), VmError> {
        loop {
            let ins_len = self.current_frame().instructions().len();
            if self.current_frame().ip >= ins_len as isize - 1 {
                break;
            }
            self.current_frame_mut().ip += 1;
            let ip = self.current_frame().ip as usize;
            let op_byte = self.current_frame().instructions()[ip];
            let op = Opcode::from_byte(op_byte)
                .ok_or_else(|| VmError::new(format!("unknown opcode {op_byte}")))?;

            match op {
                Opcode::Constant => {
                    let const_index = self.read_u16(ip + 1);
                    self.current_frame_mut().ip += 2;
                    let value = self.constants[const_index].clone();
                    self.push(value)?;
                }
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                    let right = self.pop()?;
                    let left = self.pop()?;
                    let result = Self::execute_binary_operation(op, left, right)?;
                    self.push(result)?;
                }
                Opcode::True => self.push(TRUE)?,
                Opcode::False => self.push(FALSE)?,
                Opcode::Null => self.push(NULL)?,
                Opcode::Equal | Opcode::NotEqual | Opcode::GreaterThan => {
                    let right = self.pop()?;
                    let left = self.pop()?;
                    let result = Self::execute_comparison(op, left, right)?;
                    self.push(Value::Boolean(result))?;
                }
                Opcode::Minus => {
                    let operand = self.pop()?;
                    match operand {
                        Value::Integer(i) => self.push(Value::Integer(-i))?,
                        other => {
                            return Err(VmError::new(format!(
                                "unsupported type for negation: {}",
                                other.type_name()
                            )))
                        }
                    }
                }
                Opcode::Bang => {
                    let operand = self.pop()?;
                    self.push(Value::Boolean(!operand.is_truthy()))?;
                }
                Opcode::Jump => {
                    let target = self.read_u16(ip + 1);
                    self.current_frame_mut().ip = target as isize - 1;
                }
                Opcode::JumpNotTruthy => {
                    let target = self.read_u16(ip + 1);
                    self.current_frame_mut().ip += 2;
                    let condition = self.pop()?;
                    if !condition.is_truthy() {
                        self.current_frame_mut().ip = target as isize - 1;
                    }
                }
                Opcode::SetGlobal => {
                    let index = self.read_u16(ip + 1);
                    self.current_frame_mut().ip += 2;
                    let value = self.pop()?;
                    let slot =
                        self.globals.get_mut(index).ok_or_else(|| VmError::new("missing global slot"))?;
                    *slot = Some(value);
                }
                Opcode::GetGlobal => {
                    let index = self.read_u16(ip + 1);
                    self.current_frame_mut().ip += 2;
                    let value = self
                        .globals
                        .get(index)
                        .and_then(|slot| slot.clone())
                        .ok_or_else(|| VmError::new("missing global slot"))?;
                    self.push(value)?;
                }
                Opcode::SetLocal => {
                    let index = self.read_u8(ip + 1) as usize;
                    self.current_frame_mut().ip += 1;
                    let base = self.current_frame().base_pointer;
                    let value = self.pop()?;
                    self.stack[base + index] = value;
                }
                Opcode::GetLocal => {
                    let index = self.read_u8(ip + 1) as usize;
                    self.current_frame_mut().ip += 1;
                    let base = self.current_frame().base_pointer;
                    self.push(self.stack[base + index].clone())?;
                }
                Opcode::Array => {
                    let count = self.read_u16(ip + 1);
                    self.current_frame_mut().ip += 2;
                    let start = self.stack.len() - count;
                    let elements = self.stack.split_off(start);
                    self.push(Value::array(elements))?;
                }
                Opcode::Hash => {
                    let count = self.read_u16(ip + 1);
                    self.current_frame_mut().ip += 2;
                    let start = self.stack.len() - count;
                    let entries = self.stack.split_off(start);
                    let mut map = IndexMap::new();
                    for pair in entries.chunks(2) {
                        let key = pair[0].clone();
                        let value = pair[1].clone();
                        let hash_key = key
                            .hash_key()
                            .ok_or_else(|| VmError::unusable_as_hash_key(key.type_name()))?;
                        map.insert(hash_key, (key, value));
                    }
                    self.push(Value::Hash(Rc::new(map)))?;
                }
                Opcode::Index => {
                    let index = self.pop()?;
                    let left = self.pop()?;
                    let result = Self::execute_index(left, index)?;
                    self.push(result)?;
                }
                Opcode::Call => {
                    let num_args = self.read_u8(ip + 1) as usize;
                    self.current_frame_mut().ip += 1;
                    self.call_function(num_args)?;
                }
                Opcode::ReturnValue => {
                    let return_value = self.pop()?;
                    let frame = self.frames.pop().expect("frame stack must not be empty");
                    self.stack.truncate(frame.base_pointer - 1);
                    self.push(return_value)?;
                }
                Opcode::Return => {
                    let frame = self.frames.pop().expect("frame stack must not be empty");
                    self.stack.truncate(frame.base_pointer - 1);
                    self.push(NULL)?;
                }
                Opcode::GetBuiltin => {
                    let index = self.read_u8(ip + 1) as usize;
                    self.current_frame_mut().ip += 1;
                    let (_, func) = crate::builtins::BUILTINS[index];
                    self.push(Value::Builtin(func))?;
                }
                Opcode::Closure => {
                    let const_index = self.read_u16(ip + 1);
                    let num_free = self.read_u8(ip + 3) as usize;
                    self.current_frame_mut().ip += 3;
                    self.push_closure(const_index, num_free)?;
                }
                Opcode::GetFree => {
                    let index = self.read_u8(ip + 1) as usize;
                    self.current_frame_mut().ip += 1;
                    let value = self.current_frame().closure.free[index].clone();
                    self.push(value)?;
                }
            }
        }
        Ok(())
    }

    fn current_frame(&self) -> &Frame {
        self.frames.last().expect("VM always has at least the top-level frame")
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("VM always has at least the top-level frame")
    }

    fn read_u16(&self, pos: usize) -> usize {
        let ins = self.current_frame().instructions();
        ((ins[pos] as usize) << 8) | ins[pos + 1] as usize
    }

    fn read_u8(&self, pos: usize) -> u8 {
        self.current_frame().instructions()[pos]
    }

    fn push(&mut self, value: Value) -> Result<(), VmError> {
        if self.stack.len() >= STACK_SIZE {
            return Err(VmError::new("stack overflow"));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, VmError> {
        let value = self.stack.pop().ok_or_else(|| VmError::new("stack underflow"))?;
        self.last_popped = value.clone();
        Ok(value)
    }

    fn execute_binary_operation(op: Opcode, left: Value, right: Value) -> Result<Value, VmError> {
        match (left, right) {
            (Value::Integer(l), Value::Integer(r)) => {
                let result = match op {
                    Opcode::Add => l.wrapping_add(r),
                    Opcode::Sub => l.wrapping_sub(r),
                    Opcode::Mul => l.wrapping_mul(r),
                    Opcode::Div => floor_div(l, r)?,
                    _ => unreachable!("execute_binary_operation called with non-arithmetic opcode"),
                };
                Ok(Value::Integer(result))
            }
            (Value::String(l), Value::String(r)) if op == Opcode::Add => {
                Ok(Value::string(format!("{l}{r}")))
            }
            (left, right) => {
                Err(VmError::unsupported_types(operator_symbol(op), left.type_name(), right.type_name()))
            }
        }
    }

    fn execute_comparison(op: Opcode, left: Value, right: Value) -> Result<bool, VmError> {
        match (&left, &right) {
            (Value::Integer(l), Value::Integer(r)) => Ok(match op {
                Opcode::Equal => l == r,
                Opcode::NotEqual => l != r,
                Opcode::GreaterThan => l > r,
                _ => unreachable!("execute_comparison called with non-comparison opcode"),
            }),
            _ => match op {
                Opcode::Equal => Ok(left == right),
                Opcode::NotEqual => Ok(left != right),
                Opcode::GreaterThan => {
                    Err(VmError::unknown_operator(">", left.type_name(), right.type_name()))
                }
                _ => unreachable!("execute_comparison called with non-comparison opcode"),
            },
        }
    }

    fn execute_index(left: Value, index: Value) -> Result<Value, VmError> {
        match (&left, &index) {
            (Value::Array(elements), Value::Integer(i)) => {
                if *i < 0 || *i as usize >= elements.len() {
                    Ok(NULL)
                } else {
                    Ok(elements[*i as usize].clone())
                }
            }
            (Value::Hash(map), key) => {
                let hash_key =
                    key.hash_key().ok_or_else(|| VmError::unusable_as_hash_key(key.type_name()))?;
                Ok(map.get(&hash_key).map(|(_, v)| v.clone()).unwrap_or(NULL))
            }
            _ => Err(VmError::new(format!("index operator not supported: {}", left.type_name()))),
        }
    }

    fn call_function(&mut self, num_args: usize) -> Result<(), VmError> {
        let callee_index = self.stack.len() - 1 - num_args;
        let callee = self.stack[callee_index].clone();
        match callee {
            Value::Closure(closure) => {
                if closure.function.num_parameters != num_args {
                    return Err(VmError::wrong_argument_count(closure.function.num_parameters, num_args));
                }
                if self.frames.len() >= MAX_FRAMES {
                    return Err(VmError::new("frame stack overflow"));
                }
                let num_locals = closure.function.num_locals;
                let base_pointer = self.stack.len() - num_args;
                self.frames.push(Frame::new(closure, base_pointer));
                self.stack.resize(base_pointer + num_locals, NULL);
                Ok(())
            }
            Value::Builtin(func) => {
                let args = self.stack[self.stack.len() - num_args..].to_vec();
                let result = func(&args)?;
                self.stack.truncate(callee_index);
                self.push(result)
            }
            other => Err(VmError::new(format!(
                "calling non-function and non-built-in: {}",
                other.type_name()
            ))),
        }
    }

    fn push_closure(&mut self, const_index: usize, num_free: usize) -> Result<(), VmError> {
        let function = match &self.constants[const_index] {
            Value::CompiledFunction(f) => f.clone(),
            other => return Err(VmError::new(format!("not a function: {}", other.type_name()))),
        };
        let start = self.stack.len() - num_free;
        let free = self.stack.split_off(start);
        self.push(Value::Closure(Closure { function, free: Rc::from(free) }))
    }
}

fn floor_div(a: i64, b: i64) -> Result<i64, VmError> {
    if b == 0 {
        return Err(VmError::new("division by zero"));
    }
    let q = a / b;
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn operator_symbol(op: Opcode) -> &'static str {
    match op {
        Opcode::Add => "+",
        Opcode::Sub => "-",
        Opcode::Mul => "*",
        Opcode::Div => "/",
        _ => "?",
    }
}
