//! C Code Generation
//!
//! Emits one MicroPython user C module from a [`ResolvedModule`]. Sections
//! are generated independently and assembled in declaration order:
//!
//! 1. includes, forward typedefs and external declarations
//! 2. arithmetic helpers actually used by the bodies
//! 3. dispatch table and instance structs, base before derived
//! 4. prototypes of every native function and constructor
//! 5. native functions with their boxed wrappers
//! 6. per-class slot handlers, tables and type objects
//! 7. the module globals table and registration

pub mod build_files;
mod ctype;
mod expr;
mod function;
mod object;
mod protocol;
mod stmt;
mod writer;

pub use ctype::sanitize_name;
pub use writer::CodeWriter;

use crate::error::CompileResult;
use crate::ir::{FuncIR, MethodKind, Receiver};
use crate::layout::ResolvedModule;
use crate::CompileOptions;
use ctype::qstr;
use function::{emit_wrapper, function_object, native_prototype, FunctionEmitter};
use log::debug;
use object::{method_has_wrapper, ClassEmitter};

/// Helper functions referenced by generated bodies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Helpers {
    pub int_floordiv: bool,
    pub int_mod: bool,
    pub float_div: bool,
    pub float_floordiv: bool,
    pub float_mod: bool,
}

/// Generated files of one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedModule {
    /// `<module>.c`
    pub c_source: String,
    /// `micropython.mk`
    pub makefile: Option<String>,
    /// `micropython.cmake`
    pub cmake: Option<String>,
}

/// Generate the C module and its build files
pub fn generate(
    resolved: &ResolvedModule,
    options: &CompileOptions,
) -> CompileResult<GeneratedModule> {
    let module = &resolved.module;
    let mut helpers = Helpers::default();

    // Bodies first: they decide which helpers are needed
    let mut bodies = CodeWriter::new();
    for func in &module.functions {
        emit_function(&mut bodies, resolved, options, &mut helpers, func, Some(false))?;
    }
    for &class in &resolved.order {
        for method in &module.class(class).methods {
            let wrapper = method_has_wrapper(method.flags.kind, method.flags.special).then_some(
                matches!(method.flags.kind, MethodKind::Static | MethodKind::ClassMethod),
            );
            emit_function(&mut bodies, resolved, options, &mut helpers, &method.func, wrapper)?;
        }
    }

    let mut classes = CodeWriter::new();
    for &class in &resolved.order {
        ClassEmitter::new(resolved, class).emit(&mut classes)?;
    }
    let field_tables = resolved
        .order
        .iter()
        .any(|&class| !resolved.layout(class).fields.is_empty());

    let mut w = CodeWriter::new();
    if options.header_comment {
        w.line(format!(
            "/* Generated by mpyc from Python module `{}`. Do not edit. */",
            module.name
        ));
        w.blank();
    }
    for include in [
        "\"py/runtime.h\"",
        "\"py/obj.h\"",
        "\"py/objtype.h\"",
        "<stddef.h>",
        "<string.h>",
        "<math.h>",
    ] {
        w.line(format!("#include {}", include));
    }
    for header in &module.includes {
        w.line(format!("#include \"{}\"", header));
    }
    w.blank();

    if !resolved.order.is_empty() {
        for &class in &resolved.order {
            object::emit_forward_declarations(&mut w, resolved, class);
        }
        for &class in &resolved.order {
            w.line(format!(
                "extern const mp_obj_type_t {};",
                module.class(class).type_object()
            ));
        }
        w.blank();
    }

    if !module.externs.is_empty() {
        for function in &module.externs {
            w.line(function.forward_decl());
        }
        if module.externs.iter().any(|f| f.uses_pointers()) {
            w.line("extern void *mp_to_ptr(mp_obj_t obj);");
            w.line("extern mp_obj_t ptr_to_mp(void *ptr);");
        }
        w.blank();
    }

    emit_helpers(&mut w, helpers, options.checked_division);
    if field_tables {
        object::emit_field_helper(&mut w, &module.c_name);
    }

    for &class in &resolved.order {
        object::emit_structs(&mut w, resolved, class);
    }

    let prototypes = module
        .functions
        .iter()
        .chain(module.classes.iter().flat_map(|c| c.methods.iter().map(|m| &m.func)))
        .map(|func| format!("{};", native_prototype(resolved, func)))
        .chain(resolved.order.iter().map(|&class| {
            format!(
                "static mp_obj_t {}_make_new(const mp_obj_type_t *type, size_t n_args, size_t n_kw, const mp_obj_t *args);",
                module.class(class).c_name
            )
        }))
        .collect::<Vec<_>>();
    if !prototypes.is_empty() {
        w.lines(&prototypes);
        w.blank();
    }

    w.append(bodies);
    w.append(classes);
    emit_registration(&mut w, resolved);

    debug!(
        "generated `{}`: {} function(s), {} class(es), {:?}",
        module.name,
        module.functions.len(),
        module.classes.len(),
        helpers
    );

    let c_name = &module.c_name;
    Ok(GeneratedModule {
        c_source: w.into_string(),
        makefile: options
            .emit_makefile
            .then(|| build_files::makefile(&module.name, c_name)),
        cmake: options
            .emit_cmake
            .then(|| build_files::cmake(&module.name, c_name)),
    })
}

/// Native body, then (when `wrapper` is set) the boxed wrapper; the flag
/// says whether the function object is wrapped in a method descriptor
fn emit_function(
    w: &mut CodeWriter,
    resolved: &ResolvedModule,
    options: &CompileOptions,
    helpers: &mut Helpers,
    func: &FuncIR,
    wrapper: Option<bool>,
) -> CompileResult<()> {
    let native = FunctionEmitter::new(resolved, options, helpers, func).emit_native()?;
    w.append(native);
    w.blank();
    if let Some(in_descriptor) = wrapper {
        emit_wrapper(w, resolved, func, &function_object(func, in_descriptor));
        w.blank();
    }
    debug!(
        "emitted `{}`{}",
        func.c_name,
        match func.receiver {
            Receiver::None => "",
            Receiver::Instance(_) => " (method)",
            Receiver::Class(_) => " (classmethod)",
        }
    );
    Ok(())
}

/// Python-semantics arithmetic on native operands
fn emit_helpers(w: &mut CodeWriter, helpers: Helpers, checked: bool) {
    let zero_check = |w: &mut CodeWriter, message: &str| {
        if checked {
            w.open("if (b == 0) {");
            w.line(format!(
                "mp_raise_msg(&mp_type_ZeroDivisionError, MP_ERROR_TEXT(\"{}\"));",
                message
            ));
            w.close("}");
        }
    };

    if helpers.int_floordiv {
        w.open("static inline mp_int_t mpyc_int_floordiv(mp_int_t a, mp_int_t b) {");
        zero_check(w, "integer division by zero");
        w.line("mp_int_t q = a / b;");
        w.open("if ((a % b != 0) && ((a < 0) != (b < 0))) {");
        w.line("q -= 1;");
        w.close("}");
        w.line("return q;");
        w.close("}");
        w.blank();
    }
    if helpers.int_mod {
        w.open("static inline mp_int_t mpyc_int_mod(mp_int_t a, mp_int_t b) {");
        zero_check(w, "integer modulo by zero");
        w.line("mp_int_t r = a % b;");
        w.open("if (r != 0 && ((r < 0) != (b < 0))) {");
        w.line("r += b;");
        w.close("}");
        w.line("return r;");
        w.close("}");
        w.blank();
    }
    if helpers.float_div {
        w.open("static inline mp_float_t mpyc_float_div(mp_float_t a, mp_float_t b) {");
        zero_check(w, "float division by zero");
        w.line("return a / b;");
        w.close("}");
        w.blank();
    }
    if helpers.float_floordiv {
        w.open("static inline mp_float_t mpyc_float_floordiv(mp_float_t a, mp_float_t b) {");
        zero_check(w, "float divmod()");
        w.line("return MICROPY_FLOAT_C_FUN(floor)(a / b);");
        w.close("}");
        w.blank();
    }
    if helpers.float_mod {
        w.open("static inline mp_float_t mpyc_float_mod(mp_float_t a, mp_float_t b) {");
        zero_check(w, "float modulo");
        w.line("mp_float_t r = MICROPY_FLOAT_C_FUN(fmod)(a, b);");
        w.open("if (r != 0 && ((r < 0) != (b < 0))) {");
        w.line("r += b;");
        w.close("}");
        w.line("return r;");
        w.close("}");
        w.blank();
    }
}

/// Module globals table and registration with the runtime
fn emit_registration(w: &mut CodeWriter, resolved: &ResolvedModule) {
    let module = &resolved.module;
    let m = &module.c_name;

    w.open(format!(
        "static const mp_rom_map_elem_t {}_module_globals_table[] = {{",
        m
    ));
    w.line(format!(
        "{{ MP_ROM_QSTR(MP_QSTR___name__), MP_ROM_QSTR({}) }},",
        qstr(&module.name)
    ));
    for func in &module.functions {
        w.line(format!(
            "{{ MP_ROM_QSTR({}), MP_ROM_PTR(&{}) }},",
            qstr(&func.name),
            function_object(func, false)
        ));
    }
    for class in &module.classes {
        w.line(format!(
            "{{ MP_ROM_QSTR({}), MP_ROM_PTR(&{}) }},",
            qstr(&class.name),
            class.type_object()
        ));
    }
    w.close("};");
    w.line(format!(
        "static MP_DEFINE_CONST_DICT({0}_module_globals, {0}_module_globals_table);",
        m
    ));
    w.blank();
    w.open(format!("const mp_obj_module_t {}_user_cmodule = {{", m));
    w.line(".base = { &mp_type_module },");
    w.line(format!(".globals = (mp_obj_dict_t *)&{}_module_globals,", m));
    w.close("};");
    w.blank();
    w.line(format!(
        "MP_REGISTER_MODULE({}, {}_user_cmodule);",
        qstr(&module.name),
        m
    ));
}
