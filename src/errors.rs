// File: src/errors.rs
//
// Error types for the Monkey compiler and virtual machine. Unlike a
// source-level diagnostic, neither carries line/column information:
// source-level error reporting is out of scope (parsing is an external
// concern), so both are just a message plus enough structure for callers
// to match on the failure.

use std::fmt;

/// Failure while compiling an AST node. Carries a human-readable message;
/// the compiler instance that produced it must be discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError(pub String);

impl CompileError {
    pub fn unknown_operator(op: &str) -> Self {
        CompileError(format!("unknown operator: {op}"))
    }

    pub fn identifier_not_found(name: &str) -> Self {
        CompileError(format!("identifier not found: {name}"))
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CompileError {}

/// Failure while running bytecode. Carries a human-readable message; the
/// VM instance that produced it must be discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmError(pub String);

impl VmError {
    pub fn new(message: impl Into<String>) -> Self {
        VmError(message.into())
    }

    pub fn unsupported_types(op: &str, left: &str, right: &str) -> Self {
        VmError(format!("unsupported types for binary operation: {left} {op} {right}"))
    }

    pub fn unknown_operator(op: &str, left: &str, right: &str) -> Self {
        VmError(format!("unknown operator: {left} {op} {right}"))
    }

    pub fn wrong_argument_count(want: usize, got: usize) -> Self {
        VmError(format!("wrong number of arguments: want={want}, got={got}"))
    }

    pub fn unusable_as_hash_key(type_name: &str) -> Self {
        VmError(format!("unusable as hash key: {type_name}"))
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for VmError {}
