//! IR Functions

use super::class::ClassId;
use super::stmt::Stmt;
use super::value::{Local, Repr};
use crate::oracle::ResolvedType;
use std::fmt;

/// Module function identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

/// Implicit first parameter of a compiled function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    /// Module function or static method
    None,
    /// Instance method: native code receives a typed instance pointer
    Instance(ClassId),
    /// Class method: receives the class object
    Class(ClassId),
}

/// A function body with its resolved signature
#[derive(Debug, Clone, PartialEq)]
pub struct FuncIR {
    pub name: String,
    /// Base C identifier; the native body is `{c_name}_native`
    pub c_name: String,
    pub receiver: Receiver,
    pub params: Vec<Local>,
    pub ret: ResolvedType,
    /// Non-parameter locals, in order of first assignment
    pub locals: Vec<Local>,
    pub body: Vec<Stmt>,
}

impl FuncIR {
    pub fn new(name: impl Into<String>, c_name: impl Into<String>, receiver: Receiver) -> Self {
        Self {
            name: name.into(),
            c_name: c_name.into(),
            receiver,
            params: Vec::new(),
            ret: ResolvedType::None,
            locals: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn ret_repr(&self) -> Repr {
        Repr::from(&self.ret)
    }

    pub fn native_name(&self) -> String {
        format!("{}_native", self.c_name)
    }

    /// Number of boxed arguments the runtime passes (receiver included)
    pub fn boxed_arity(&self) -> usize {
        let receiver = match self.receiver {
            Receiver::None => 0,
            Receiver::Instance(_) | Receiver::Class(_) => 1,
        };
        receiver + self.params.len()
    }

    /// Count of statements, nested bodies included
    pub fn statement_count(&self) -> usize {
        self.body.iter().map(Stmt::count).sum()
    }
}
