//! C types, boxing and identifiers
//!
//! The boxing boundary: scalars cross into runtime calls as `mp_obj_t` and
//! come back out through the matching `mp_obj_get_*` accessor.

use crate::ir::{AccessPath, Repr};
use once_cell::sync::Lazy;
use rustc_hash::FxHashSet;

/// C keywords and runtime names a Python identifier must not shadow
static RESERVED: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    [
        "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
        "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
        "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch",
        "typedef", "union", "unsigned", "void", "volatile", "while", "bool", "true", "false",
        "self", "args", "n_args", "n_kw", "type", "dest", "attr", "print", "kind", "op",
        "lhs_in", "rhs_in", "self_in", "cls_in", "nlr", "NULL",
    ]
    .into_iter()
    .collect()
});

/// C type holding a value of this representation
pub fn c_type(repr: Repr) -> &'static str {
    match repr {
        Repr::Int => "mp_int_t",
        Repr::Float => "mp_float_t",
        Repr::Bool => "bool",
        Repr::Obj => "mp_obj_t",
        Repr::Void => "void",
    }
}

/// Representation used to store a value in a variable or field
pub fn storage(repr: Repr) -> Repr {
    match repr {
        Repr::Void => Repr::Obj,
        other => other,
    }
}

/// Zero value of a stored representation
pub fn zero(repr: Repr) -> &'static str {
    match storage(repr) {
        Repr::Int => "0",
        Repr::Float => "MICROPY_FLOAT_CONST(0.0)",
        Repr::Bool => "false",
        _ => "mp_const_none",
    }
}

/// Box a native value
pub fn box_value(repr: Repr, code: &str) -> String {
    match repr {
        Repr::Int => format!("mp_obj_new_int({})", code),
        Repr::Float => format!("mp_obj_new_float({})", code),
        Repr::Bool => format!("mp_obj_new_bool({})", code),
        Repr::Obj => code.to_string(),
        Repr::Void => "mp_const_none".to_string(),
    }
}

/// Unbox a runtime object
pub fn unbox_value(repr: Repr, code: &str) -> String {
    match repr {
        Repr::Int => format!("mp_obj_get_int({})", code),
        Repr::Float => format!("mp_obj_get_float({})", code),
        Repr::Bool => format!("mp_obj_is_true({})", code),
        Repr::Obj | Repr::Void => code.to_string(),
    }
}

/// Convert `code` from one representation to another
pub fn convert(code: &str, from: Repr, to: Repr) -> String {
    match (from, to) {
        _ if from == to => code.to_string(),
        (Repr::Obj, to) => unbox_value(to, code),
        (from, Repr::Obj) => box_value(from, code),
        (Repr::Void, _) => zero(to).to_string(),
        (_, Repr::Void) => code.to_string(),
        (Repr::Int, Repr::Float) | (Repr::Bool, Repr::Float) => format!("(mp_float_t)({})", code),
        (Repr::Float, Repr::Int) | (Repr::Bool, Repr::Int) => format!("(mp_int_t)({})", code),
        (_, Repr::Bool) => format!("({} != 0)", code),
        _ => code.to_string(),
    }
}

/// Truth value of `code` as a C condition
pub fn truth(code: &str, repr: Repr) -> String {
    match repr {
        Repr::Bool => code.to_string(),
        Repr::Int | Repr::Float => format!("({} != 0)", code),
        Repr::Obj => format!("mp_obj_is_true({})", code),
        Repr::Void => "false".to_string(),
    }
}

/// Field kind tag used by the generated attribute tables
pub fn field_kind(repr: Repr) -> &'static str {
    match storage(repr) {
        Repr::Int => "MPYC_FIELD_INT",
        Repr::Float => "MPYC_FIELD_FLOAT",
        Repr::Bool => "MPYC_FIELD_BOOL",
        _ => "MPYC_FIELD_OBJ",
    }
}

/// C identifier for a Python name
pub fn sanitize_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    if RESERVED.contains(out.as_str()) || out.starts_with("_tmp") || out.starts_with("_mpyc") {
        out.push('_');
    }
    out
}

/// Struct member holding a field; never collides with the members the
/// object layout reserves
pub fn member_name(field: &str) -> String {
    let mut name = sanitize_name(field);
    if matches!(name.as_str(), "base" | "super" | "vtable") {
        name.push('_');
    }
    name
}

/// C member designator of a field access path
pub fn member_path(path: &AccessPath) -> String {
    let mut out = "super.".repeat(path.hops() as usize);
    out.push_str(&member_name(path.field()));
    out
}

pub fn qstr(name: &str) -> String {
    format!("MP_QSTR_{}", name)
}

/// Quoted C string literal
pub fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_ascii_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Float literal in the runtime's float precision
pub fn float_literal(value: f64) -> String {
    if value.is_nan() {
        return "MICROPY_FLOAT_C_FUN(nan)(\"\")".to_string();
    }
    if value.is_infinite() {
        let sign = if value < 0.0 { "-" } else { "" };
        return format!("{}(mp_float_t)INFINITY", sign);
    }
    format!("MICROPY_FLOAT_CONST({:?})", value)
}

/// Integer literal as `mp_int_t`
pub fn int_literal(value: i64) -> String {
    if i32::try_from(value).is_ok() {
        value.to_string()
    } else {
        format!("(mp_int_t){}LL", value)
    }
}
