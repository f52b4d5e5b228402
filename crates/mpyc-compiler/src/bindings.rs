//! External native-library bindings
//!
//! Descriptions produced by the FFI stub subsystem. A compiled module that
//! imports a binding library calls the library's published C symbols
//! directly, and reads its enum members as integer literals.

use crate::ir::Repr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scalar C types that cross a binding boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CType {
    Int,
    Uint,
    Float,
    Double,
    Bool,
    Str,
    Ptr,
    Void,
}

impl CType {
    /// C spelling used in forward declarations
    pub fn c_decl(&self) -> &'static str {
        match self {
            CType::Int => "mp_int_t",
            CType::Uint => "mp_uint_t",
            CType::Float => "float",
            CType::Double => "mp_float_t",
            CType::Bool => "bool",
            CType::Str => "const char *",
            CType::Ptr => "void *",
            CType::Void => "void",
        }
    }

    /// Representation the value takes on the compiled side
    pub fn repr(&self) -> Repr {
        match self {
            CType::Int | CType::Uint => Repr::Int,
            CType::Float | CType::Double => Repr::Float,
            CType::Bool => Repr::Bool,
            CType::Str | CType::Ptr => Repr::Obj,
            CType::Void => Repr::Void,
        }
    }
}

/// A function published by a binding library
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingFunction {
    /// Name as seen from Python (`lib.create`)
    pub name: String,
    /// Published C symbol
    pub symbol: String,
    #[serde(default)]
    pub params: Vec<CType>,
    #[serde(default = "void_type")]
    pub ret: CType,
}

fn void_type() -> CType {
    CType::Void
}

impl BindingFunction {
    /// Forward declaration of the published symbol
    pub fn forward_decl(&self) -> String {
        let params = if self.params.is_empty() {
            "void".to_string()
        } else {
            self.params
                .iter()
                .map(|p| p.c_decl())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let ret = self.ret.c_decl();
        let sep = if ret.ends_with('*') { "" } else { " " };
        format!("extern {}{}{}({});", ret, sep, self.symbol, params)
    }

    pub fn uses_pointers(&self) -> bool {
        self.ret == CType::Ptr || self.params.contains(&CType::Ptr)
    }
}

/// One binding library
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingLibrary {
    pub name: String,
    /// C header declaring the library's symbols
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub functions: Vec<BindingFunction>,
    /// `Enum -> Member -> value`
    #[serde(default)]
    pub enums: BTreeMap<String, BTreeMap<String, i64>>,
    /// Module-level integer constants
    #[serde(default)]
    pub constants: BTreeMap<String, i64>,
}

impl BindingLibrary {
    pub fn function(&self, name: &str) -> Option<&BindingFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn enum_member(&self, enum_name: &str, member: &str) -> Option<i64> {
        self.enums.get(enum_name)?.get(member).copied()
    }

    pub fn constant(&self, name: &str) -> Option<i64> {
        self.constants.get(name).copied()
    }

    pub fn has_enum(&self, name: &str) -> bool {
        self.enums.contains_key(name)
    }
}
