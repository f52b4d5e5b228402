//! Function Emission
//!
//! Every compiled function becomes a native C function taking and returning
//! unboxed scalars, plus (unless it is a property accessor) a boxed wrapper
//! the runtime can call.

use super::ctype::{box_value, c_type, sanitize_name, storage, unbox_value, zero};
use super::writer::CodeWriter;
use super::Helpers;
use crate::error::CompileResult;
use crate::ir::stmt::protected_writes;
use crate::ir::{FuncIR, Receiver, Repr, Stmt};
use crate::layout::ResolvedModule;
use crate::CompileOptions;
use log::trace;

/// Largest arity with a fixed-arity `MP_DEFINE_CONST_FUN_OBJ_N` macro
const MAX_FIXED_ARITY: usize = 3;

/// Emits the body of one function
pub(crate) struct FunctionEmitter<'r> {
    pub(super) resolved: &'r ResolvedModule,
    pub(super) options: &'r CompileOptions,
    pub(super) helpers: &'r mut Helpers,
    pub(super) func: &'r FuncIR,
    pub(super) w: CodeWriter,
    /// nlr buffers protecting the code being emitted, outermost first
    pub(super) frames: Vec<String>,
    /// nlr buffers of the enclosing `except` bodies, innermost last
    pub(super) handlers: Vec<String>,
    next_scratch: usize,
}

impl<'r> FunctionEmitter<'r> {
    pub fn new(
        resolved: &'r ResolvedModule,
        options: &'r CompileOptions,
        helpers: &'r mut Helpers,
        func: &'r FuncIR,
    ) -> Self {
        Self {
            resolved,
            options,
            helpers,
            func,
            w: CodeWriter::new(),
            frames: Vec::new(),
            handlers: Vec::new(),
            next_scratch: 0,
        }
    }

    /// Fresh hidden C identifier
    pub(super) fn scratch(&mut self, prefix: &str) -> String {
        let name = format!("_mpyc_{}{}", prefix, self.next_scratch);
        self.next_scratch += 1;
        name
    }

    /// Emit the native function
    pub fn emit_native(mut self) -> CompileResult<CodeWriter> {
        let func = self.func;
        self.w.open(format!("{} {{", native_prototype(self.resolved, func)));

        let protected = protected_writes(&func.body);
        for local in &func.locals {
            let repr = storage(local.repr());
            let name = sanitize_name(&local.name);
            let qualifier = if protected.contains(&local.name) {
                "volatile "
            } else {
                ""
            };
            self.w.line(format!(
                "{}{} {} = {};",
                qualifier,
                c_type(repr),
                name,
                zero(repr)
            ));
            self.w.line(format!("(void){};", name));
        }
        if !func.locals.is_empty() {
            self.w.blank();
        }

        self.block(&func.body)?;

        let ends_in_return = matches!(func.body.last(), Some(Stmt::Return { .. }));
        if func.ret_repr() != Repr::Void && !ends_in_return {
            self.w.line(format!("return {};", zero(func.ret_repr())));
        }
        self.w.close("}");
        trace!(
            "emitted `{}` ({} hidden variable(s))",
            func.native_name(),
            self.next_scratch
        );
        Ok(self.w)
    }
}

/// Native signature, e.g. `static mp_int_t m_add_native(mp_int_t a, mp_int_t b)`
pub(crate) fn native_prototype(resolved: &ResolvedModule, func: &FuncIR) -> String {
    let mut params = Vec::with_capacity(func.params.len() + 1);
    match func.receiver {
        Receiver::Instance(class) => {
            params.push(format!("{} *self", resolved.module.class(class).obj_type()))
        }
        Receiver::Class(_) => params.push("mp_obj_t cls".to_string()),
        Receiver::None => {}
    }
    let protected = protected_writes(&func.body);
    for param in &func.params {
        let qualifier = if protected.contains(&param.name) {
            "volatile "
        } else {
            ""
        };
        params.push(format!(
            "{}{} {}",
            qualifier,
            c_type(storage(param.repr())),
            sanitize_name(&param.name)
        ));
    }
    let params = if params.is_empty() {
        "void".to_string()
    } else {
        params.join(", ")
    };
    format!(
        "static {} {}({})",
        c_type(func.ret_repr()),
        func.native_name(),
        params
    )
}

/// Name of the runtime function object for a wrapper
pub(crate) fn function_object(func: &FuncIR, wrapped_in_descriptor: bool) -> String {
    if wrapped_in_descriptor {
        format!("{}_fun_obj", func.c_name)
    } else {
        format!("{}_obj", func.c_name)
    }
}

pub(crate) fn wrapper_name(func: &FuncIR) -> String {
    format!("{}_mp", func.c_name)
}

/// Emit the boxed wrapper of `func` and its function object
pub(crate) fn emit_wrapper(
    w: &mut CodeWriter,
    resolved: &ResolvedModule,
    func: &FuncIR,
    object_name: &str,
) {
    let arity = func.boxed_arity();
    let variadic = arity > MAX_FIXED_ARITY;

    // Boxed inputs in call order: receiver first
    let mut inputs: Vec<String> = Vec::with_capacity(arity);
    match func.receiver {
        Receiver::Instance(_) => inputs.push("self_in".to_string()),
        Receiver::Class(_) => inputs.push("cls_in".to_string()),
        Receiver::None => {}
    }
    inputs.extend((0..func.params.len()).map(|i| format!("arg{}_obj", i)));

    let signature = if variadic {
        "size_t n_args, const mp_obj_t *args".to_string()
    } else if inputs.is_empty() {
        "void".to_string()
    } else {
        inputs
            .iter()
            .map(|name| format!("mp_obj_t {}", name))
            .collect::<Vec<_>>()
            .join(", ")
    };
    w.open(format!(
        "static mp_obj_t {}({}) {{",
        wrapper_name(func),
        signature
    ));

    let input = |i: usize| -> String {
        if variadic {
            format!("args[{}]", i)
        } else {
            inputs[i].clone()
        }
    };
    if variadic {
        w.line("(void)n_args;");
    }

    let mut call_args = Vec::with_capacity(arity);
    let mut next = 0;
    match func.receiver {
        Receiver::Instance(class) => {
            let obj_type = resolved.module.class(class).obj_type();
            w.line(format!("{} *self = MP_OBJ_TO_PTR({});", obj_type, input(0)));
            call_args.push("self".to_string());
            next = 1;
        }
        Receiver::Class(_) => {
            call_args.push(input(0));
            next = 1;
        }
        Receiver::None => {}
    }
    for param in &func.params {
        let repr = storage(param.repr());
        let name = sanitize_name(&param.name);
        w.line(format!(
            "{} {} = {};",
            c_type(repr),
            name,
            unbox_value(repr, &input(next))
        ));
        call_args.push(name);
        next += 1;
    }

    let call = format!("{}({})", func.native_name(), call_args.join(", "));
    match func.ret_repr() {
        Repr::Void => {
            w.line(format!("{};", call));
            w.line("return mp_const_none;");
        }
        repr => w.line(format!("return {};", box_value(repr, &call))),
    }
    w.close("}");

    if variadic {
        w.line(format!(
            "static MP_DEFINE_CONST_FUN_OBJ_VAR_BETWEEN({}, {}, {}, {});",
            object_name,
            arity,
            arity,
            wrapper_name(func)
        ));
    } else {
        w.line(format!(
            "static MP_DEFINE_CONST_FUN_OBJ_{}({}, {});",
            arity,
            object_name,
            wrapper_name(func)
        ));
    }
}
