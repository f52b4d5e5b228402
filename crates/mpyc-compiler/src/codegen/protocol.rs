//! Protocol Slot Emission
//!
//! Special methods become handlers the runtime calls from its generic
//! operator, hashing, iteration and printing machinery. Each slot uses the
//! nearest implementation in the inheritance chain.

use super::ctype::{box_value, member_path, storage, unbox_value};
use super::expr::compare_op_tag;
use super::function::wrapper_name;
use super::writer::CodeWriter;
use crate::ast::CmpOp;
use crate::error::{CompileError, CompileResult};
use crate::ir::{ClassId, MethodRef, Repr, SpecialMethod};
use crate::layout::ResolvedModule;
use crate::oracle::ResolvedType;

/// Comparison special methods and the operator each one implements
const COMPARISONS: [(SpecialMethod, CmpOp); 6] = [
    (SpecialMethod::Eq, CmpOp::Eq),
    (SpecialMethod::Ne, CmpOp::NotEq),
    (SpecialMethod::Lt, CmpOp::Lt),
    (SpecialMethod::Le, CmpOp::LtE),
    (SpecialMethod::Gt, CmpOp::Gt),
    (SpecialMethod::Ge, CmpOp::GtE),
];

/// Unary slots and the runtime tag dispatching to each
const UNARY: [(SpecialMethod, &str); 3] = [
    (SpecialMethod::Hash, "MP_UNARY_OP_HASH"),
    (SpecialMethod::Len, "MP_UNARY_OP_LEN"),
    (SpecialMethod::Bool, "MP_UNARY_OP_BOOL"),
];

/// How a type is iterated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IterPlan {
    /// The iter slot is `iternext`; getting an iterator returns the object
    IterNext(MethodRef),
    /// The iter slot returns a separate iterator object
    GetIter(MethodRef),
}

/// How a type prints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PrintPlan {
    /// `__str__` for `str()`, `__repr__` otherwise
    StrAndRepr { str: MethodRef, repr: MethodRef },
    /// `__repr__` for both kinds
    Repr(MethodRef),
    /// `__str__` for `str()`, the default form otherwise
    Str(MethodRef),
    /// Generated `Name(field=value, ...)` form
    Dataclass,
}

/// Slot handlers a class needs, derived from its special methods
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ClassProtocol {
    pub comparisons: Vec<(CmpOp, MethodRef)>,
    pub dataclass_eq: bool,
    pub unary: Vec<(&'static str, MethodRef)>,
    pub iter: Option<IterPlan>,
    pub print: Option<PrintPlan>,
}

impl ClassProtocol {
    pub fn of(resolved: &ResolvedModule, class: ClassId) -> Self {
        let module = &resolved.module;
        let find = |special| module.find_special(class, special);
        let is_dataclass = module.class(class).is_dataclass;

        let comparisons: Vec<(CmpOp, MethodRef)> = COMPARISONS
            .iter()
            .filter_map(|(special, op)| find(*special).map(|m| (*op, m)))
            .collect();
        let dataclass_eq = is_dataclass && find(SpecialMethod::Eq).is_none();

        let unary = UNARY
            .iter()
            .filter_map(|(special, tag)| find(*special).map(|m| (*tag, m)))
            .collect();

        // `__next__` alone does not make a type iterable
        let iter = match (find(SpecialMethod::Iter), find(SpecialMethod::Next)) {
            (Some(_), Some(next)) => Some(IterPlan::IterNext(next)),
            (Some(iter), None) => Some(IterPlan::GetIter(iter)),
            (None, _) => None,
        };

        let print = match (find(SpecialMethod::Str), find(SpecialMethod::Repr)) {
            (Some(str), Some(repr)) => Some(PrintPlan::StrAndRepr { str, repr }),
            (None, Some(repr)) => Some(PrintPlan::Repr(repr)),
            (Some(str), None) => Some(PrintPlan::Str(str)),
            (None, None) if is_dataclass => Some(PrintPlan::Dataclass),
            (None, None) => None,
        };

        Self {
            comparisons,
            dataclass_eq,
            unary,
            iter,
            print,
        }
    }

    pub fn has_binary_op(&self) -> bool {
        !self.comparisons.is_empty() || self.dataclass_eq
    }

    /// Type flags for `MP_DEFINE_CONST_OBJ_TYPE`
    pub fn flags(&self) -> String {
        let mut flags = Vec::new();
        let handles_eq = self.dataclass_eq || self.comparisons.iter().any(|(op, _)| *op == CmpOp::Eq);
        if handles_eq {
            flags.push("MP_TYPE_FLAG_EQ_CHECKS_OTHER_TYPE");
        }
        if self.comparisons.iter().any(|(op, _)| *op == CmpOp::NotEq) {
            flags.push("MP_TYPE_FLAG_EQ_HAS_NEQ_TEST");
        }
        match self.iter {
            Some(IterPlan::IterNext(_)) => flags.push("MP_TYPE_FLAG_ITER_IS_ITERNEXT"),
            Some(IterPlan::GetIter(_)) => flags.push("MP_TYPE_FLAG_ITER_IS_GETITER"),
            None => {}
        }
        if flags.is_empty() {
            "MP_TYPE_FLAG_NONE".to_string()
        } else {
            flags.join(" | ")
        }
    }
}

/// Combined comparison handler: one case per implemented operator, the
/// unhandled sentinel for everything else
pub(crate) fn emit_binary_op(
    w: &mut CodeWriter,
    resolved: &ResolvedModule,
    class: ClassId,
    protocol: &ClassProtocol,
) -> CompileResult<()> {
    let module = &resolved.module;
    let ir = module.class(class);
    w.open(format!(
        "static mp_obj_t {}_binary_op(mp_binary_op_t op, mp_obj_t lhs_in, mp_obj_t rhs_in) {{",
        ir.c_name
    ));
    w.line(format!("{} *self = MP_OBJ_TO_PTR(lhs_in);", ir.obj_type()));
    w.open("switch (op) {");

    for (op, method) in &protocol.comparisons {
        let target = module.method(*method);
        let [param] = target.params() else {
            return Err(CompileError::unsupported(
                format!(
                    "`{}.{}` must take exactly one operand",
                    module.class(method.class).name,
                    target.name
                ),
                ir.span,
            ));
        };
        w.open(format!("case {}: {{", compare_op_tag(*op)));
        // Operands of another type are left to the runtime
        let foreign = match &param.ty {
            ResolvedType::Class(name) => module.get_class_by_name(name).map(|other| {
                format!(
                    "!mp_obj_is_subclass_fast(MP_OBJ_FROM_PTR(mp_obj_get_type(rhs_in)), MP_OBJ_FROM_PTR(&{}))",
                    other.type_object()
                )
            }),
            ResolvedType::Int => Some("!mp_obj_is_int(rhs_in)".to_string()),
            ResolvedType::Float => {
                Some("!mp_obj_is_float(rhs_in) && !mp_obj_is_int(rhs_in)".to_string())
            }
            _ => None,
        };
        if let Some(test) = foreign {
            w.line(format!("if ({}) {{", test));
            w.line("    return MP_OBJ_NULL;");
            w.line("}");
        }
        let owner = module.class(method.class).obj_type();
        let call = format!(
            "{}(({} *)self, {})",
            target.func.native_name(),
            owner,
            unbox_value(storage(param.repr()), "rhs_in")
        );
        match target.func.ret_repr() {
            Repr::Void => {
                w.line(format!("{};", call));
                w.line("return mp_const_none;");
            }
            repr => w.line(format!("return {};", box_value(repr, &call))),
        }
        w.close("}");
    }

    if protocol.dataclass_eq {
        w.open("case MP_BINARY_OP_EQUAL: {");
        w.line("if (mp_obj_get_type(rhs_in) != mp_obj_get_type(lhs_in)) {");
        w.line("    return MP_OBJ_NULL;");
        w.line("}");
        w.line(format!("{} *other = MP_OBJ_TO_PTR(rhs_in);", ir.obj_type()));
        let tests: Vec<String> = resolved
            .layout(class)
            .fields
            .iter()
            .map(|slot| {
                let path = member_path(&slot.path);
                match storage(module.field(slot.field).repr()) {
                    Repr::Obj => format!("mp_obj_equal(self->{0}, other->{0})", path),
                    _ => format!("self->{0} == other->{0}", path),
                }
            })
            .collect();
        if tests.is_empty() {
            w.line("return mp_const_true;");
        } else {
            w.line(format!(
                "return mp_obj_new_bool({});",
                tests.join("\n        && ")
            ));
        }
        w.close("}");
    }

    w.line("default:");
    w.line("    return MP_OBJ_NULL;");
    w.close("}");
    w.close("}");
    Ok(())
}

pub(crate) fn emit_unary_op(
    w: &mut CodeWriter,
    resolved: &ResolvedModule,
    class: ClassId,
    protocol: &ClassProtocol,
) {
    let module = &resolved.module;
    w.open(format!(
        "static mp_obj_t {}_unary_op(mp_unary_op_t op, mp_obj_t self_in) {{",
        module.class(class).c_name
    ));
    w.open("switch (op) {");
    for (tag, method) in &protocol.unary {
        let target = &module.method(*method).func;
        w.line(format!("case {}:", tag));
        w.line(format!("    return {}(self_in);", wrapper_name(target)));
    }
    w.line("default:");
    w.line("    return MP_OBJ_NULL;");
    w.close("}");
    w.close("}");
}

/// Iteration slot; `__next__` raising StopIteration (or a subclass) ends
/// iteration with the exhaustion sentinel, anything else propagates
pub(crate) fn emit_iter(
    w: &mut CodeWriter,
    resolved: &ResolvedModule,
    class: ClassId,
    plan: IterPlan,
) {
    let module = &resolved.module;
    let c_name = &module.class(class).c_name;
    match plan {
        IterPlan::IterNext(next) => {
            let next = &module.method(next).func;
            w.open(format!(
                "static mp_obj_t {}_iternext(mp_obj_t self_in) {{",
                c_name
            ));
            w.line("nlr_buf_t nlr;");
            w.open("if (nlr_push(&nlr) == 0) {");
            w.line(format!("mp_obj_t result = {}(self_in);", wrapper_name(next)));
            w.line("nlr_pop();");
            w.line("return result;");
            w.close("}");
            w.line("mp_obj_t exc = MP_OBJ_FROM_PTR(nlr.ret_val);");
            w.open("if (mp_obj_is_subclass_fast(MP_OBJ_FROM_PTR(mp_obj_get_type(exc)), MP_OBJ_FROM_PTR(&mp_type_StopIteration))) {");
            w.line("return MP_OBJ_STOP_ITERATION;");
            w.close("}");
            w.line("nlr_jump(nlr.ret_val);");
            w.close("}");
        }
        IterPlan::GetIter(iter) => {
            let iter = &module.method(iter).func;
            w.open(format!(
                "static mp_obj_t {}_getiter(mp_obj_t self_in, mp_obj_iter_buf_t *iter_buf) {{",
                c_name
            ));
            w.line("(void)iter_buf;");
            w.line(format!("return {}(self_in);", wrapper_name(iter)));
            w.close("}");
        }
    }
}

/// Name of the iter slot function
pub(crate) fn iter_slot(c_name: &str, plan: IterPlan) -> String {
    match plan {
        IterPlan::IterNext(_) => format!("{}_iternext", c_name),
        IterPlan::GetIter(_) => format!("{}_getiter", c_name),
    }
}

pub(crate) fn emit_print(
    w: &mut CodeWriter,
    resolved: &ResolvedModule,
    class: ClassId,
    plan: PrintPlan,
) {
    let module = &resolved.module;
    let ir = module.class(class);
    let wrapper = |method: MethodRef| wrapper_name(&module.method(method).func);
    w.open(format!(
        "static void {}_print(const mp_print_t *print, mp_obj_t self_in, mp_print_kind_t kind) {{",
        ir.c_name
    ));
    match plan {
        PrintPlan::StrAndRepr { str, repr } => {
            w.line(format!(
                "mp_obj_t result = (kind == PRINT_STR) ? {}(self_in) : {}(self_in);",
                wrapper(str),
                wrapper(repr)
            ));
            w.line("mp_obj_print_helper(print, result, PRINT_STR);");
        }
        PrintPlan::Repr(repr) => {
            w.line("(void)kind;");
            w.line(format!(
                "mp_obj_print_helper(print, {}(self_in), PRINT_STR);",
                wrapper(repr)
            ));
        }
        PrintPlan::Str(str) => {
            w.open("if (kind == PRINT_STR) {");
            w.line(format!(
                "mp_obj_print_helper(print, {}(self_in), PRINT_STR);",
                wrapper(str)
            ));
            w.dedent();
            w.open("} else {");
            w.line(format!("mp_printf(print, \"<{} object>\");", ir.name));
            w.close("}");
        }
        PrintPlan::Dataclass => {
            w.line(format!("{} *self = MP_OBJ_TO_PTR(self_in);", ir.obj_type()));
            w.line("(void)kind;");
            w.line(format!("mp_printf(print, \"{}(\");", ir.name));
            for (i, slot) in resolved.layout(class).fields.iter().enumerate() {
                let field = module.field(slot.field);
                let separator = if i > 0 { ", " } else { "" };
                let path = member_path(&slot.path);
                match storage(field.repr()) {
                    // INT_FMT matches the width of mp_int_t
                    Repr::Int => w.line(format!(
                        "mp_printf(print, \"{}{}=\" INT_FMT, self->{});",
                        separator, field.name, path
                    )),
                    Repr::Bool => w.line(format!(
                        "mp_printf(print, \"{}{}=%s\", self->{} ? \"True\" : \"False\");",
                        separator, field.name, path
                    )),
                    repr => {
                        w.line(format!("mp_printf(print, \"{}{}=\");", separator, field.name));
                        w.line(format!(
                            "mp_obj_print_helper(print, {}, PRINT_REPR);",
                            box_value(repr, &format!("self->{}", path))
                        ));
                    }
                }
            }
            w.line("mp_printf(print, \")\");");
        }
    }
    w.close("}");
}
