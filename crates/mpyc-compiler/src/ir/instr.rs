//! IR Instructions
//!
//! Side-effecting steps. Each produces at most one temporary; instructions
//! are collected into the prelude of the statement or value that needs them.

use super::class::{ClassId, FieldRef, MethodRef};
use super::function::FuncId;
use super::value::{Temp, Value};
use crate::ast::BoolOp;
use crate::bindings::BindingFunction;
use crate::oracle::ContainerKind;

/// How an instance method call is bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallVia {
    /// Let the layout decide: dispatch-table slot when overridable
    Dispatch,
    /// Call exactly this implementation (`super().m()`, property accessors)
    Exact,
}

/// Runtime builtins lowered to runtime API calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Print,
    Len,
    Abs,
    Int,
    Float,
    Str,
    Bool,
    Min,
    Max,
    ListAppend,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        let builtin = match name {
            "print" => Builtin::Print,
            "len" => Builtin::Len,
            "abs" => Builtin::Abs,
            "int" => Builtin::Int,
            "float" => Builtin::Float,
            "str" => Builtin::Str,
            "bool" => Builtin::Bool,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            _ => return None,
        };
        Some(builtin)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Len => "len",
            Builtin::Abs => "abs",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Str => "str",
            Builtin::Bool => "bool",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::ListAppend => "list.append",
        }
    }
}

/// A prelude of instructions paired with the value it produces
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub prelude: Vec<Instr>,
    pub value: Value,
}

/// IR instructions
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Direct call of a compiled module function
    Call {
        result: Option<Temp>,
        func: FuncId,
        args: Vec<Value>,
    },
    /// Direct call of an external binding's published symbol
    ExternCall {
        result: Option<Temp>,
        library: String,
        function: BindingFunction,
        args: Vec<Value>,
    },
    /// Instance method call on a compiled class
    MethodCall {
        result: Option<Temp>,
        receiver: Value,
        /// Static class of the receiver
        class: ClassId,
        method: MethodRef,
        via: CallVia,
        args: Vec<Value>,
    },
    StaticCall {
        result: Option<Temp>,
        method: MethodRef,
        args: Vec<Value>,
    },
    ClassMethodCall {
        result: Option<Temp>,
        cls: Value,
        method: MethodRef,
        args: Vec<Value>,
    },
    /// Method call resolved by the runtime (`mp_load_method`)
    DynamicCall {
        result: Option<Temp>,
        receiver: Value,
        method: String,
        args: Vec<Value>,
    },
    /// Call of an arbitrary callable object
    CallObject {
        result: Option<Temp>,
        callee: Value,
        args: Vec<Value>,
    },
    /// Instantiate a compiled class through its constructor slot
    New {
        result: Option<Temp>,
        class: ClassId,
        args: Vec<Value>,
    },
    ContainerNew {
        result: Temp,
        kind: ContainerKind,
        items: Vec<Value>,
    },
    DictNew {
        result: Temp,
        entries: Vec<(Value, Value)>,
    },
    /// A runtime slice object; an omitted bound is `None`
    SliceNew {
        result: Temp,
        lower: Option<Value>,
        upper: Option<Value>,
        step: Option<Value>,
    },
    GetItem {
        result: Option<Temp>,
        container: Value,
        index: Value,
    },
    SetItem {
        container: Value,
        index: Value,
        value: Value,
    },
    FieldWrite {
        object: Value,
        field: FieldRef,
        value: Value,
    },
    /// Attribute read on an object of unknown class
    LoadAttr {
        result: Option<Temp>,
        object: Value,
        attr: String,
    },
    /// Attribute write on an object of unknown class
    StoreAttr {
        object: Value,
        attr: String,
        value: Value,
    },
    RuntimeCall {
        result: Option<Temp>,
        func: Builtin,
        args: Vec<Value>,
    },
    /// `and`/`or` whose later operands need their own preludes
    ShortCircuit {
        result: Temp,
        op: BoolOp,
        first: Value,
        rest: Vec<Branch>,
    },
    /// Conditional expression whose branches need their own preludes
    Select {
        result: Temp,
        test: Value,
        body: Branch,
        orelse: Branch,
    },
}

impl Instr {
    /// The temporary this instruction defines, if any
    pub fn result(&self) -> Option<&Temp> {
        match self {
            Instr::Call { result, .. }
            | Instr::ExternCall { result, .. }
            | Instr::MethodCall { result, .. }
            | Instr::StaticCall { result, .. }
            | Instr::ClassMethodCall { result, .. }
            | Instr::DynamicCall { result, .. }
            | Instr::CallObject { result, .. }
            | Instr::New { result, .. }
            | Instr::GetItem { result, .. }
            | Instr::LoadAttr { result, .. }
            | Instr::RuntimeCall { result, .. } => result.as_ref(),
            Instr::ContainerNew { result, .. }
            | Instr::DictNew { result, .. }
            | Instr::SliceNew { result, .. }
            | Instr::ShortCircuit { result, .. }
            | Instr::Select { result, .. } => Some(result),
            Instr::SetItem { .. }
            | Instr::FieldWrite { .. }
            | Instr::StoreAttr { .. } => None,
        }
    }

    /// Drop the result of a call whose value is never read
    ///
    /// Returns `false` when the instruction must keep its result.
    pub fn discard_result(&mut self) -> bool {
        match self {
            Instr::Call { result, .. }
            | Instr::ExternCall { result, .. }
            | Instr::MethodCall { result, .. }
            | Instr::StaticCall { result, .. }
            | Instr::ClassMethodCall { result, .. }
            | Instr::DynamicCall { result, .. }
            | Instr::CallObject { result, .. }
            | Instr::New { result, .. }
            | Instr::GetItem { result, .. }
            | Instr::LoadAttr { result, .. }
            | Instr::RuntimeCall { result, .. } => {
                *result = None;
                true
            }
            _ => false,
        }
    }
}
