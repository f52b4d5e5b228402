//! IR Values and Temporaries
//!
//! Values are pure: reading one has no side effect and never requires
//! running code that is not already in a prelude.

use super::class::{ClassId, FieldRef};
use crate::ast::{BinOp, BoolOp, CmpOp, UnaryOp};
use crate::oracle::ResolvedType;
use std::fmt;

/// Native representation of a value in generated code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Repr {
    /// `mp_int_t`
    Int,
    /// `mp_float_t`
    Float,
    /// `bool`
    Bool,
    /// `mp_obj_t` (boxed)
    Obj,
    /// no value (`void` returns)
    Void,
}

impl Repr {
    pub fn is_scalar(&self) -> bool {
        matches!(self, Repr::Int | Repr::Float | Repr::Bool)
    }
}

impl From<&ResolvedType> for Repr {
    fn from(ty: &ResolvedType) -> Self {
        match ty {
            ResolvedType::Int => Repr::Int,
            ResolvedType::Float => Repr::Float,
            ResolvedType::Bool => Repr::Bool,
            ResolvedType::None => Repr::Void,
            _ => Repr::Obj,
        }
    }
}

/// Temporary identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TempId(pub u32);

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_tmp{}", self.0)
    }
}

/// Where a temporary's value came from
///
/// An element read out of a container is boxed, but still carries the
/// container's declared element type. Arithmetic uses that type to pick the
/// native path.
#[derive(Debug, Clone, PartialEq)]
pub enum Origin {
    Computed,
    Element(ResolvedType),
}

/// A temporary produced by exactly one instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Temp {
    pub id: TempId,
    pub ty: ResolvedType,
    pub origin: Origin,
}

impl Temp {
    pub fn repr(&self) -> Repr {
        Repr::from(&self.ty)
    }
}

/// A named local or parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Local {
    pub name: String,
    pub ty: ResolvedType,
}

impl Local {
    pub fn new(name: impl Into<String>, ty: ResolvedType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    pub fn repr(&self) -> Repr {
        Repr::from(&self.ty)
    }
}

/// Constants
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    None,
}

impl Const {
    pub fn ty(&self) -> ResolvedType {
        match self {
            Const::Int(_) => ResolvedType::Int,
            Const::Float(_) => ResolvedType::Float,
            Const::Bool(_) => ResolvedType::Bool,
            Const::Str(_) => ResolvedType::Str,
            Const::None => ResolvedType::None,
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::Int(v) => write!(f, "{}", v),
            Const::Float(v) => write!(f, "{:?}", v),
            Const::Bool(true) => write!(f, "True"),
            Const::Bool(false) => write!(f, "False"),
            Const::Str(s) => write!(f, "\"{}\"", s.escape_default()),
            Const::None => write!(f, "None"),
        }
    }
}

/// Which arithmetic implementation an operation uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithPath {
    /// Native C arithmetic on unboxed operands
    Native,
    /// Runtime dispatch (`mp_binary_op` and friends) on boxed operands
    Generic,
}

/// One link of a (possibly chained) comparison
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub op: CmpOp,
    pub right: Value,
    pub path: ArithPath,
}

/// Pure IR values
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Const(Const),
    Name(Local),
    /// The receiver of an instance method
    SelfRef { class: ClassId, name: String },
    /// A compiled class object
    ClassRef { class: ClassId, name: String },
    Temp(Temp),
    BinOp {
        op: BinOp,
        left: Box<Value>,
        right: Box<Value>,
        ty: ResolvedType,
        path: ArithPath,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Value>,
        ty: ResolvedType,
        path: ArithPath,
    },
    Compare {
        left: Box<Value>,
        comparisons: Vec<Comparison>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Value>,
        ty: ResolvedType,
    },
    FieldRead {
        object: Box<Value>,
        field: FieldRef,
        ty: ResolvedType,
    },
    Select {
        test: Box<Value>,
        body: Box<Value>,
        orelse: Box<Value>,
        ty: ResolvedType,
    },
}

impl Value {
    pub fn ty(&self) -> ResolvedType {
        match self {
            Value::Const(c) => c.ty(),
            Value::Name(local) => local.ty.clone(),
            Value::SelfRef { name, .. } => ResolvedType::Class(name.clone()),
            Value::ClassRef { name, .. } => ResolvedType::ClassObject(name.clone()),
            Value::Temp(temp) => temp.ty.clone(),
            Value::BinOp { ty, .. }
            | Value::UnaryOp { ty, .. }
            | Value::BoolOp { ty, .. }
            | Value::FieldRead { ty, .. }
            | Value::Select { ty, .. } => ty.clone(),
            Value::Compare { .. } => ResolvedType::Bool,
        }
    }

    pub fn repr(&self) -> Repr {
        Repr::from(&self.ty())
    }

    /// Type used to choose an arithmetic path: element reads report the
    /// container's declared element type instead of their boxed type
    pub fn effective_ty(&self) -> ResolvedType {
        match self {
            Value::Temp(Temp {
                origin: Origin::Element(elem),
                ..
            }) => elem.clone(),
            other => other.ty(),
        }
    }

    pub fn is_none_const(&self) -> bool {
        matches!(self, Value::Const(Const::None))
    }
}
