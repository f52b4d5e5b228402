//! Type oracle interface
//!
//! Static type resolution is performed by an external service. The compiler
//! consumes its answers through [`TypeOracle`]: per-function parameter,
//! return and local types, and per-class field and method types. Type strings
//! arrive in the resolver's textual form (`int`, `list[float]`,
//! `pkg.shapes.Point`, ...) and are mapped onto [`ResolvedType`].
//!
//! [`TypeTable`] is the table-backed implementation, deserialized from the
//! JSON document the front end produces.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors reported by a type oracle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("no type information for function `{0}`")]
    MissingFunction(String),

    #[error("no type information for class `{0}`")]
    MissingClass(String),

    #[error("no type information for method `{class}.{method}`")]
    MissingMethod { class: String, method: String },

    #[error("no type information for field `{class}.{field}`")]
    MissingField { class: String, field: String },

    #[error("invalid type `{text}`: {reason}")]
    BadType { text: String, reason: String },
}

// ============================================================================
// Resolved types
// ============================================================================

/// Container families of the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    List,
    Dict,
    Tuple,
    Set,
}

impl ContainerKind {
    pub fn name(&self) -> &'static str {
        match self {
            ContainerKind::List => "list",
            ContainerKind::Dict => "dict",
            ContainerKind::Tuple => "tuple",
            ContainerKind::Set => "set",
        }
    }
}

/// Element type of a string (indexing a `str` yields a `str`)
static STR_ELEMENT: ResolvedType = ResolvedType::Str;

/// A type after resolution, with module qualification stripped
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResolvedType {
    Int,
    Float,
    Bool,
    Str,
    None,
    /// Anything the compiler treats as an opaque runtime object
    Object,
    /// A container; `elem` is the element type for list/set/tuple and the
    /// value type for dict, when it is known and uniform
    Container {
        kind: ContainerKind,
        elem: Option<Box<ResolvedType>>,
    },
    /// Instance of a user class
    Class(String),
    /// The class object itself (`type[Point]`, the `cls` of a classmethod)
    ClassObject(String),
}

impl ResolvedType {
    /// Parse a resolver type string
    pub fn parse(text: &str) -> Result<ResolvedType, OracleError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(bad_type(text, "empty type"));
        }

        // Unions and optionals are only representable as boxed objects
        if split_top_level(trimmed, '|')?.len() > 1 {
            return Ok(ResolvedType::Object);
        }

        let (head, args) = match trimmed.find('[') {
            Some(open) => {
                if !trimmed.ends_with(']') {
                    return Err(bad_type(text, "unbalanced brackets"));
                }
                let inner = &trimmed[open + 1..trimmed.len() - 1];
                (&trimmed[..open], Some(split_top_level(inner, ',')?))
            }
            None => (trimmed, None),
        };

        let head = strip_qualification(head.trim());
        let parse_args = |args: &[&str]| -> Result<Vec<ResolvedType>, OracleError> {
            args.iter().map(|arg| ResolvedType::parse(arg)).collect()
        };

        let ty = match (head, args) {
            ("int", None) => ResolvedType::Int,
            ("float", None) => ResolvedType::Float,
            ("bool", None) => ResolvedType::Bool,
            ("str", None) => ResolvedType::Str,
            ("None" | "NoneType", None) => ResolvedType::None,
            ("object" | "Any", None) => ResolvedType::Object,
            ("list" | "List", args) => container(ContainerKind::List, args, parse_args)?,
            ("set" | "Set", args) => container(ContainerKind::Set, args, parse_args)?,
            ("dict" | "Dict", None) => ResolvedType::Container {
                kind: ContainerKind::Dict,
                elem: None,
            },
            ("dict" | "Dict", Some(args)) => {
                if args.len() != 2 {
                    return Err(bad_type(text, "dict takes a key and a value type"));
                }
                let value = ResolvedType::parse(args[1])?;
                ResolvedType::Container {
                    kind: ContainerKind::Dict,
                    elem: Some(Box::new(value)),
                }
            }
            ("tuple" | "Tuple", None) => ResolvedType::Container {
                kind: ContainerKind::Tuple,
                elem: None,
            },
            ("tuple" | "Tuple", Some(args)) => {
                let elems = parse_args(&args)?;
                let elem = match elems.split_first() {
                    Some((first, rest)) if rest.iter().all(|t| t == first) => {
                        Some(Box::new(first.clone()))
                    }
                    _ => None,
                };
                ResolvedType::Container {
                    kind: ContainerKind::Tuple,
                    elem,
                }
            }
            ("Optional", Some(_)) => ResolvedType::Object,
            ("type" | "Type", Some(args)) if args.len() == 1 => {
                match ResolvedType::parse(args[0])? {
                    ResolvedType::Class(name) => ResolvedType::ClassObject(name),
                    _ => ResolvedType::Object,
                }
            }
            ("Callable" | "Iterator" | "Iterable" | "Generator", _) => ResolvedType::Object,
            (name, None) => {
                if !is_identifier(name) {
                    return Err(bad_type(text, "not an identifier"));
                }
                ResolvedType::Class(name.to_string())
            }
            (_, Some(_)) => return Err(bad_type(text, "unsupported generic type")),
        };
        Ok(ty)
    }

    /// Known scalar (held unboxed in native code)
    pub fn is_scalar(&self) -> bool {
        matches!(self, ResolvedType::Int | ResolvedType::Float | ResolvedType::Bool)
    }

    /// Numeric for arithmetic purposes (bool participates as an integer)
    pub fn is_numeric(&self) -> bool {
        self.is_scalar()
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            ResolvedType::Class(name) => Some(name),
            _ => None,
        }
    }

    /// Element type of a container, when declared
    pub fn element(&self) -> Option<&ResolvedType> {
        match self {
            ResolvedType::Container { elem: Some(elem), .. } => Some(elem),
            ResolvedType::Str => Some(&STR_ELEMENT),
            _ => None,
        }
    }

    pub fn list_of(elem: ResolvedType) -> Self {
        ResolvedType::Container {
            kind: ContainerKind::List,
            elem: Some(Box::new(elem)),
        }
    }
}

impl fmt::Display for ResolvedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedType::Int => write!(f, "int"),
            ResolvedType::Float => write!(f, "float"),
            ResolvedType::Bool => write!(f, "bool"),
            ResolvedType::Str => write!(f, "str"),
            ResolvedType::None => write!(f, "None"),
            ResolvedType::Object => write!(f, "object"),
            ResolvedType::Container { kind, elem: None } => write!(f, "{}", kind.name()),
            ResolvedType::Container {
                kind,
                elem: Some(elem),
            } => write!(f, "{}[{}]", kind.name(), elem),
            ResolvedType::Class(name) => write!(f, "{}", name),
            ResolvedType::ClassObject(name) => write!(f, "type[{}]", name),
        }
    }
}

fn container(
    kind: ContainerKind,
    args: Option<Vec<&str>>,
    parse_args: impl Fn(&[&str]) -> Result<Vec<ResolvedType>, OracleError>,
) -> Result<ResolvedType, OracleError> {
    let elem = match args {
        None => None,
        Some(args) => {
            let mut parsed = parse_args(&args)?;
            if parsed.len() != 1 {
                return Err(bad_type(
                    &format!("{}[...]", kind.name()),
                    "expected exactly one element type",
                ));
            }
            parsed.pop().map(Box::new)
        }
    };
    Ok(ResolvedType::Container { kind, elem })
}

fn bad_type(text: &str, reason: &str) -> OracleError {
    OracleError::BadType {
        text: text.to_string(),
        reason: reason.to_string(),
    }
}

/// Strip dotted module qualification (`pkg.mod.Point` -> `Point`)
pub fn strip_qualification(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot) => &name[dot + 1..],
        None => name,
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split on `sep` outside of brackets
fn split_top_level(text: &str, sep: char) -> Result<Vec<&str>, OracleError> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth < 0 {
                    return Err(bad_type(text, "unbalanced brackets"));
                }
            }
            c if c == sep && depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(bad_type(text, "unbalanced brackets"));
    }
    parts.push(text[start..].trim());
    Ok(parts)
}

// ============================================================================
// Oracle interface
// ============================================================================

/// Resolved signature of a function or method (methods exclude `self`/`cls`)
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSig {
    pub params: Vec<(String, ResolvedType)>,
    pub ret: ResolvedType,
    pub locals: FxHashMap<String, ResolvedType>,
}

/// Resolved class description
#[derive(Debug, Clone, PartialEq)]
pub struct ClassSig {
    pub name: String,
    /// Fields declared by this class (not inherited ones), in order
    pub fields: Vec<(String, ResolvedType)>,
    pub methods: FxHashMap<String, FunctionSig>,
    pub base: Option<String>,
}

impl ClassSig {
    pub fn field(&self, name: &str) -> Option<&ResolvedType> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, ty)| ty)
    }

    pub fn method(&self, name: &str) -> Result<&FunctionSig, OracleError> {
        self.methods
            .get(name)
            .ok_or_else(|| OracleError::MissingMethod {
                class: self.name.clone(),
                method: name.to_string(),
            })
    }
}

/// Source of resolved types consumed by the IR builder
pub trait TypeOracle {
    fn function(&self, name: &str) -> Result<FunctionSig, OracleError>;
    fn class(&self, name: &str) -> Result<ClassSig, OracleError>;
}

// ============================================================================
// Table-backed oracle
// ============================================================================

/// Raw function entry as produced by the front end
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionTypes {
    #[serde(default)]
    pub params: Vec<(String, String)>,
    #[serde(default = "none_type")]
    pub ret: String,
    #[serde(default)]
    pub locals: FxHashMap<String, String>,
}

fn none_type() -> String {
    "None".to_string()
}

/// Raw class entry as produced by the front end
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassTypes {
    #[serde(default)]
    pub fields: Vec<(String, String)>,
    #[serde(default)]
    pub methods: FxHashMap<String, FunctionTypes>,
    #[serde(default)]
    pub base: Option<String>,
}

/// Table of resolved types keyed by function and class name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeTable {
    #[serde(default)]
    pub functions: FxHashMap<String, FunctionTypes>,
    #[serde(default)]
    pub classes: FxHashMap<String, ClassTypes>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function: `params` as `(name, type)` pairs
    pub fn with_function(mut self, name: &str, params: &[(&str, &str)], ret: &str) -> Self {
        self.functions.insert(name.to_string(), function_types(params, ret));
        self
    }

    /// Add a local variable type to an already registered function
    pub fn with_local(mut self, function: &str, local: &str, ty: &str) -> Self {
        self.functions
            .entry(function.to_string())
            .or_default()
            .locals
            .insert(local.to_string(), ty.to_string());
        self
    }

    /// Register a class with its own fields
    pub fn with_class(mut self, name: &str, base: Option<&str>, fields: &[(&str, &str)]) -> Self {
        let entry = self.classes.entry(name.to_string()).or_default();
        entry.base = base.map(str::to_string);
        entry.fields = fields
            .iter()
            .map(|(n, t)| (n.to_string(), t.to_string()))
            .collect();
        self
    }

    /// Register a method of a class (`params` exclude `self`/`cls`)
    pub fn with_method(
        mut self,
        class: &str,
        method: &str,
        params: &[(&str, &str)],
        ret: &str,
    ) -> Self {
        self.classes
            .entry(class.to_string())
            .or_default()
            .methods
            .insert(method.to_string(), function_types(params, ret));
        self
    }

    fn lookup<'t, T>(map: &'t FxHashMap<String, T>, name: &str) -> Option<&'t T> {
        map.get(name).or_else(|| {
            let short = strip_qualification(name);
            map.iter()
                .find(|(key, _)| strip_qualification(key) == short)
                .map(|(_, value)| value)
        })
    }
}

fn function_types(params: &[(&str, &str)], ret: &str) -> FunctionTypes {
    FunctionTypes {
        params: params
            .iter()
            .map(|(n, t)| (n.to_string(), t.to_string()))
            .collect(),
        ret: ret.to_string(),
        locals: FxHashMap::default(),
    }
}

fn resolve_function(raw: &FunctionTypes) -> Result<FunctionSig, OracleError> {
    let params = raw
        .params
        .iter()
        .map(|(name, ty)| Ok((name.clone(), ResolvedType::parse(ty)?)))
        .collect::<Result<Vec<_>, OracleError>>()?;
    let locals = raw
        .locals
        .iter()
        .map(|(name, ty)| Ok((name.clone(), ResolvedType::parse(ty)?)))
        .collect::<Result<FxHashMap<_, _>, OracleError>>()?;
    Ok(FunctionSig {
        params,
        ret: ResolvedType::parse(&raw.ret)?,
        locals,
    })
}

impl TypeOracle for TypeTable {
    fn function(&self, name: &str) -> Result<FunctionSig, OracleError> {
        let raw = Self::lookup(&self.functions, name)
            .ok_or_else(|| OracleError::MissingFunction(name.to_string()))?;
        resolve_function(raw)
    }

    fn class(&self, name: &str) -> Result<ClassSig, OracleError> {
        let raw = Self::lookup(&self.classes, name)
            .ok_or_else(|| OracleError::MissingClass(name.to_string()))?;
        let fields = raw
            .fields
            .iter()
            .map(|(field, ty)| Ok((field.clone(), ResolvedType::parse(ty)?)))
            .collect::<Result<Vec<_>, OracleError>>()?;
        let methods = raw
            .methods
            .iter()
            .map(|(method, sig)| Ok((method.clone(), resolve_function(sig)?)))
            .collect::<Result<FxHashMap<_, _>, OracleError>>()?;
        Ok(ClassSig {
            name: strip_qualification(name).to_string(),
            fields,
            methods,
            base: raw
                .base
                .as_deref()
                .map(|b| strip_qualification(b).to_string())
                .filter(|b| b != "object"),
        })
    }
}
