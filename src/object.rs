// File: src/object.rs
//
// Runtime value types for the Monkey virtual machine. Every value is
// immutable once constructed; operations that appear to mutate a
// container (e.g. `push`) build and return a new one. Values are shared
// by reference counting rather than deep-cloned, since no mutation is
// ever observable through a shared handle.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::bytecode::Instructions;
use crate::errors::VmError;

/// A function whose body has been compiled to bytecode, but which has not
/// yet been wrapped in a `Closure` (and so has not yet captured any free
/// variables).
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub num_locals: usize,
    pub num_parameters: usize,
}

/// A compiled function plus the values of its free variables, captured at
/// the point the closure was created.
#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub function: Rc<CompiledFunction>,
    pub free: Rc<[Value]>,
}

/// A built-in function: pure, takes its arguments by reference, and
/// returns a freshly constructed `Value`.
pub type BuiltinFn = fn(&[Value]) -> Result<Value, VmError>;

/// The subset of `Value` that may legally appear as a hash key. Integers,
/// booleans and strings have value equality; everything else does not and
/// is rejected by the compiler/VM before reaching here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Integer(i64),
    Boolean(bool),
    String(Rc<str>),
}

/// Runtime values manipulated by the compiler's constant pool and the VM's
/// stack.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Boolean(bool),
    Null,
    String(Rc<str>),
    Array(Rc<Vec<Value>>),
    /// Insertion-ordered so that display order matches source order.
    Hash(Rc<IndexMap<HashKey, (Value, Value)>>),
    CompiledFunction(Rc<CompiledFunction>),
    Closure(Closure),
    Builtin(BuiltinFn),
}

pub const TRUE: Value = Value::Boolean(true);
pub const FALSE: Value = Value::Boolean(false);
pub const NULL: Value = Value::Null;

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn array(elements: Vec<Value>) -> Self {
        Value::Array(Rc::new(elements))
    }

    /// Truthy per the language's boolean-coercion rule: NULL and `false`
    /// are the only falsy values.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Boolean(false))
    }

    /// The value's hash key, if it has value-equality semantics.
    pub fn hash_key(&self) -> Option<HashKey> {
        match self {
            Value::Integer(i) => Some(HashKey::Integer(*i)),
            Value::Boolean(b) => Some(HashKey::Boolean(*b)),
            Value::String(s) => Some(HashKey::String(s.clone())),
            _ => None,
        }
    }

    /// A short name for error messages ("INTEGER", "BOOLEAN", ...).
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "INTEGER",
            Value::Boolean(_) => "BOOLEAN",
            Value::Null => "NULL",
            Value::String(_) => "STRING",
            Value::Array(_) => "ARRAY",
            Value::Hash(_) => "HASH",
            Value::CompiledFunction(_) => "COMPILED_FUNCTION_OBJ",
            Value::Closure(_) => "CLOSURE",
            Value::Builtin(_) => "BUILTIN",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{i}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Null => write!(f, "null"),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(elements) => {
                write!(f, "[")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "]")
            }
            Value::Hash(map) => {
                write!(f, "{{")?;
                for (i, (_, (k, v))) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::CompiledFunction(_) => write!(f, "CompiledFunction[...]"),
            Value::Closure(c) => write!(f, "Closure[{:p}]", Rc::as_ptr(&c.function)),
            Value::Builtin(_) => write!(f, "builtin function"),
        }
    }
}
