//! Object-model IR
//!
//! Classes own their fields and methods. The base class is referenced by
//! [`ClassId`] into the owning [`ModuleIR`](super::ModuleIR); dispatch tables
//! are derived by the layout resolver rather than stored here.

use super::function::FuncIR;
use super::value::{Const, Repr};
use crate::ast::Span;
use crate::oracle::ResolvedType;
use std::fmt;

/// Class identifier (index into the module's class list)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

impl ClassId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class{}", self.0)
    }
}

/// Chain of composition accessors leading to a field
///
/// A field declared `hops` levels above the accessing class is reached
/// through `hops` embedded base structs, each named `super`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessPath {
    hops: u32,
    field: String,
}

impl AccessPath {
    pub fn new(hops: u32, field: impl Into<String>) -> Self {
        Self {
            hops,
            field: field.into(),
        }
    }

    pub fn hops(&self) -> u32 {
        self.hops
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// One more level of embedding
    pub fn through_base(&self) -> Self {
        Self {
            hops: self.hops + 1,
            field: self.field.clone(),
        }
    }

    /// C member designator, e.g. `super.super.x`
    pub fn to_c(&self) -> String {
        let mut out = "super.".repeat(self.hops as usize);
        out.push_str(&self.field);
        out
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_c())
    }
}

/// A declared field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldIR {
    pub name: String,
    pub ty: ResolvedType,
    pub default: Option<Const>,
}

impl FieldIR {
    pub fn new(name: impl Into<String>, ty: ResolvedType) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
        }
    }

    pub fn repr(&self) -> Repr {
        Repr::from(&self.ty)
    }
}

/// Reference to a field as seen through an instance of `owner`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Static class of the instance the field is read from
    pub owner: ClassId,
    /// Class declaring the field
    pub declared_in: ClassId,
    /// Index into the declaring class's own fields
    pub index: usize,
}

/// Reference to a method implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub class: ClassId,
    pub index: usize,
}

/// How a method binds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Ordinary instance method
    Instance,
    /// `@staticmethod`
    Static,
    /// `@classmethod`
    ClassMethod,
    /// `@property`
    Getter,
    /// `@<name>.setter`
    Setter,
}

/// Special methods the object emitter maps onto runtime slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialMethod {
    Init,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Hash,
    Len,
    Bool,
    Iter,
    Next,
    Str,
    Repr,
    /// Any other dunder: compiled but not bound to a slot
    Other,
}

impl SpecialMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        let special = match name {
            "__init__" => SpecialMethod::Init,
            "__eq__" => SpecialMethod::Eq,
            "__ne__" => SpecialMethod::Ne,
            "__lt__" => SpecialMethod::Lt,
            "__le__" => SpecialMethod::Le,
            "__gt__" => SpecialMethod::Gt,
            "__ge__" => SpecialMethod::Ge,
            "__hash__" => SpecialMethod::Hash,
            "__len__" => SpecialMethod::Len,
            "__bool__" => SpecialMethod::Bool,
            "__iter__" => SpecialMethod::Iter,
            "__next__" => SpecialMethod::Next,
            "__str__" => SpecialMethod::Str,
            "__repr__" => SpecialMethod::Repr,
            n if n.starts_with("__") && n.ends_with("__") && n.len() > 4 => SpecialMethod::Other,
            _ => return None,
        };
        Some(special)
    }

    /// Ordering/equality methods
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            SpecialMethod::Eq
                | SpecialMethod::Ne
                | SpecialMethod::Lt
                | SpecialMethod::Le
                | SpecialMethod::Gt
                | SpecialMethod::Ge
        )
    }
}

/// Method flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodFlags {
    pub kind: MethodKind,
    pub is_final: bool,
    pub special: Option<SpecialMethod>,
}

impl MethodFlags {
    pub fn instance() -> Self {
        Self {
            kind: MethodKind::Instance,
            is_final: false,
            special: None,
        }
    }

    /// Eligible for a dispatch-table slot
    pub fn is_virtual(&self) -> bool {
        self.kind == MethodKind::Instance && self.special.is_none()
    }

    pub fn is_property(&self) -> bool {
        matches!(self.kind, MethodKind::Getter | MethodKind::Setter)
    }
}

/// A method of a class
#[derive(Debug, Clone, PartialEq)]
pub struct MethodIR {
    pub name: String,
    pub flags: MethodFlags,
    /// Parameters exclude the receiver
    pub func: FuncIR,
}

impl MethodIR {
    pub fn params(&self) -> &[super::value::Local] {
        &self.func.params
    }

    pub fn ret(&self) -> &ResolvedType {
        &self.func.ret
    }

    pub fn c_name(&self) -> &str {
        &self.func.c_name
    }

    /// Same parameter and return representations
    pub fn signature_matches(&self, other: &MethodIR) -> bool {
        self.func.params.len() == other.func.params.len()
            && self
                .func
                .params
                .iter()
                .zip(&other.func.params)
                .all(|(a, b)| a.repr() == b.repr())
            && Repr::from(&self.func.ret) == Repr::from(&other.func.ret)
    }
}

/// A compiled class
#[derive(Debug, Clone, PartialEq)]
pub struct ClassIR {
    pub id: ClassId,
    pub name: String,
    /// `{module}_{Class}`
    pub c_name: String,
    pub base: Option<ClassId>,
    pub fields: Vec<FieldIR>,
    pub methods: Vec<MethodIR>,
    pub is_final: bool,
    pub is_dataclass: bool,
    pub span: Span,
}

impl ClassIR {
    pub fn new(id: ClassId, name: impl Into<String>, c_name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            c_name: c_name.into(),
            base: None,
            fields: Vec::new(),
            methods: Vec::new(),
            is_final: false,
            is_dataclass: false,
            span: Span::default(),
        }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Own method by name; for properties the getter is returned
    pub fn method_index(&self, name: &str) -> Option<usize> {
        self.methods
            .iter()
            .position(|m| m.name == name && m.flags.kind != MethodKind::Setter)
    }

    pub fn setter_index(&self, name: &str) -> Option<usize> {
        self.methods
            .iter()
            .position(|m| m.name == name && m.flags.kind == MethodKind::Setter)
    }

    pub fn special(&self, special: SpecialMethod) -> Option<usize> {
        self.methods
            .iter()
            .position(|m| m.flags.special == Some(special))
    }

    /// C identifiers derived from the class name
    pub fn obj_type(&self) -> String {
        format!("{}_obj_t", self.c_name)
    }

    pub fn vtable_type(&self) -> String {
        format!("{}_vtable_t", self.c_name)
    }

    pub fn type_object(&self) -> String {
        format!("{}_type", self.c_name)
    }
}
