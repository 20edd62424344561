// File: src/builtins.rs
//
// Built-in functions available in every Monkey program without an import
// or declaration. The table order is load-bearing: the compiler assigns
// each name's `OpGetBuiltin` index by position here, and the VM indexes
// into the same slice at call time, so the two must never drift apart.

use crate::errors::VmError;
use crate::object::Value;

pub static BUILTINS: &[(&str, crate::object::BuiltinFn)] = &[
    ("len", builtin_len),
    ("first", builtin_first),
    ("last", builtin_last),
    ("rest", builtin_rest),
    ("push", builtin_push),
    ("puts", builtin_puts),
];

fn builtin_len(args: &[Value]) -> Result<Value, VmError> {
    if args.len() != 1 {
        return Err(VmError::wrong_argument_count(1, args.len()));
    }
    match &args[0] {
        Value::String(s) => Ok(Value::Integer(s.chars().count() as i64)),
        Value::Array(elements) => Ok(Value::Integer(elements.len() as i64)),
        other => Err(VmError::new(format!(
            "argument to `len` not supported, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_first(args: &[Value]) -> Result<Value, VmError> {
    if args.len() != 1 {
        return Err(VmError::wrong_argument_count(1, args.len()));
    }
    match &args[0] {
        Value::Array(elements) => Ok(elements.first().cloned().unwrap_or(Value::Null)),
        other => Err(VmError::new(format!(
            "argument to `first` must be ARRAY, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_last(args: &[Value]) -> Result<Value, VmError> {
    if args.len() != 1 {
        return Err(VmError::wrong_argument_count(1, args.len()));
    }
    match &args[0] {
        Value::Array(elements) => Ok(elements.last().cloned().unwrap_or(Value::Null)),
        other => Err(VmError::new(format!(
            "argument to `last` must be ARRAY, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_rest(args: &[Value]) -> Result<Value, VmError> {
    if args.len() != 1 {
        return Err(VmError::wrong_argument_count(1, args.len()));
    }
    match &args[0] {
        Value::Array(elements) => {
            if elements.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(Value::array(elements[1..].to_vec()))
            }
        }
        other => Err(VmError::new(format!(
            "argument to `rest` must be ARRAY, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_push(args: &[Value]) -> Result<Value, VmError> {
    if args.len() != 2 {
        return Err(VmError::wrong_argument_count(2, args.len()));
    }
    match &args[0] {
        Value::Array(elements) => {
            let mut new_elements = elements.as_ref().clone();
            new_elements.push(args[1].clone());
            Ok(Value::array(new_elements))
        }
        other => Err(VmError::new(format!(
            "argument to `push` must be ARRAY, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_puts(args: &[Value]) -> Result<Value, VmError> {
    for arg in args {
        println!("{arg}");
    }
    Ok(Value::Null)
}
