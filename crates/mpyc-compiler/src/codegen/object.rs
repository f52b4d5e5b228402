//! Object Emission
//!
//! Turns resolved classes into C: instance structs embedding their base
//! struct as `super`, dispatch table structs and instances, the constructor,
//! the attribute handler, the method table and the type object.

use super::ctype::{
    box_value, c_type, convert, field_kind, member_name, member_path, qstr, sanitize_name, storage,
    unbox_value, zero,
};
use super::expr::constant;
use super::function::function_object;
use super::protocol::{self, ClassProtocol};
use super::writer::CodeWriter;
use crate::error::{CompileError, CompileResult};
use crate::ir::{ClassId, Constructor, MethodKind, MethodRef, Repr, SpecialMethod};
use crate::layout::{ResolvedModule, VTABLE_MEMBER};
use log::trace;

/// Member name of a dispatch slot in a table struct
pub(crate) fn slot_member(method: &str) -> String {
    sanitize_name(method)
}

/// C function pointer type of a dispatch slot viewed through `class`
fn slot_pointer_type(resolved: &ResolvedModule, class: ClassId, method: MethodRef) -> String {
    let module = &resolved.module;
    let func = &module.method(method).func;
    let mut params = vec![format!("{} *", module.class(class).obj_type())];
    params.extend(func.params.iter().map(|p| c_type(storage(p.repr())).to_string()));
    format!("{} (*)({})", c_type(func.ret_repr()), params.join(", "))
}

/// Forward typedefs of a class's structs
pub(crate) fn emit_forward_declarations(w: &mut CodeWriter, resolved: &ResolvedModule, class: ClassId) {
    let ir = resolved.module.class(class);
    w.line(format!("typedef struct _{0} {0};", ir.obj_type()));
    if resolved.layout(class).vtable.is_some() {
        w.line(format!("typedef struct _{0} {0};", ir.vtable_type()));
    }
}

/// Dispatch table struct, then instance struct
pub(crate) fn emit_structs(w: &mut CodeWriter, resolved: &ResolvedModule, class: ClassId) {
    let module = &resolved.module;
    let ir = module.class(class);
    let layout = resolved.layout(class);

    if let Some(vtable) = &layout.vtable {
        w.open(format!("struct _{} {{", ir.vtable_type()));
        w.line("const mp_obj_type_t *type;");
        for entry in &vtable.entries {
            let func = &module.method(entry.implementation).func;
            let mut params = vec![format!("{} *self", ir.obj_type())];
            params.extend(
                func.params
                    .iter()
                    .map(|p| format!("{} {}", c_type(storage(p.repr())), sanitize_name(&p.name))),
            );
            w.line(format!(
                "{} (*{})({});",
                c_type(func.ret_repr()),
                slot_member(&entry.name),
                params.join(", ")
            ));
        }
        w.close("};");
        w.blank();
    }

    w.open(format!("struct _{} {{", ir.obj_type()));
    match ir.base {
        Some(base) => w.line(format!("{} super;", module.class(base).obj_type())),
        None => {
            w.line("mp_obj_base_t base;");
            if layout.owns_vtable_pointer() {
                w.line(format!("const {} *{};", ir.vtable_type(), VTABLE_MEMBER));
            }
        }
    }
    for slot in layout.own_fields() {
        let field = module.field(slot.field);
        w.line(format!(
            "{} {};",
            c_type(storage(field.repr())),
            member_name(slot.path.field())
        ));
    }
    w.close("};");
    if ir.base.is_some() {
        w.line(format!(
            "_Static_assert(offsetof({}, super) == 0, \"{} must start with its base\");",
            ir.obj_type(),
            ir.name
        ));
    }
    w.blank();
}

/// Shared field-table attribute helper, emitted once per module
pub(crate) fn emit_field_helper(w: &mut CodeWriter, module_c_name: &str) {
    w.line("enum { MPYC_FIELD_OBJ, MPYC_FIELD_INT, MPYC_FIELD_FLOAT, MPYC_FIELD_BOOL };");
    w.blank();
    w.open("typedef struct {");
    w.line("qstr name;");
    w.line("uint16_t offset;");
    w.line("uint8_t kind;");
    w.close(format!("}} {}_field_t;", module_c_name));
    w.blank();
    w.open(format!(
        "static bool {0}_field_attr(void *self, const {0}_field_t *fields, size_t n, qstr attr, mp_obj_t *dest) {{",
        module_c_name
    ));
    w.open("for (size_t i = 0; i < n; i++) {");
    w.open("if (fields[i].name != attr) {");
    w.line("continue;");
    w.close("}");
    w.line("char *slot = (char *)self + fields[i].offset;");
    w.open("if (dest[0] == MP_OBJ_NULL) {");
    w.open("switch (fields[i].kind) {");
    w.line("case MPYC_FIELD_INT: dest[0] = mp_obj_new_int(*(mp_int_t *)slot); break;");
    w.line("case MPYC_FIELD_FLOAT: dest[0] = mp_obj_new_float(*(mp_float_t *)slot); break;");
    w.line("case MPYC_FIELD_BOOL: dest[0] = mp_obj_new_bool(*(bool *)slot); break;");
    w.line("default: dest[0] = *(mp_obj_t *)slot; break;");
    w.close("}");
    w.dedent();
    w.open("} else if (dest[0] == MP_OBJ_SENTINEL && dest[1] != MP_OBJ_NULL) {");
    w.open("switch (fields[i].kind) {");
    w.line("case MPYC_FIELD_INT: *(mp_int_t *)slot = mp_obj_get_int(dest[1]); break;");
    w.line("case MPYC_FIELD_FLOAT: *(mp_float_t *)slot = mp_obj_get_float(dest[1]); break;");
    w.line("case MPYC_FIELD_BOOL: *(bool *)slot = mp_obj_is_true(dest[1]); break;");
    w.line("default: *(mp_obj_t *)slot = dest[1]; break;");
    w.close("}");
    w.line("dest[0] = MP_OBJ_NULL;");
    w.close("}");
    w.line("return true;");
    w.close("}");
    w.line("return false;");
    w.close("}");
    w.blank();
}

/// Everything of a class after its methods: slot handlers, dispatch table
/// instance, constructor, method table and the type object
pub(crate) struct ClassEmitter<'r> {
    resolved: &'r ResolvedModule,
    class: ClassId,
    protocol: ClassProtocol,
}

impl<'r> ClassEmitter<'r> {
    pub fn new(resolved: &'r ResolvedModule, class: ClassId) -> Self {
        Self {
            resolved,
            class,
            protocol: ClassProtocol::of(resolved, class),
        }
    }

    /// Instances expose fields or properties to interpreted code
    pub fn has_attr_handler(&self) -> bool {
        !self.resolved.layout(self.class).fields.is_empty()
            || self.resolved.module.has_properties(self.class)
    }

    pub fn emit(&self, w: &mut CodeWriter) -> CompileResult<()> {
        let ir = self.resolved.module.class(self.class);
        trace!("emitting class `{}` ({:?})", ir.name, self.protocol);

        if self.has_attr_handler() {
            self.emit_attr(w);
        }
        if let Some(plan) = self.protocol.print {
            protocol::emit_print(w, self.resolved, self.class, plan);
            w.blank();
        }
        if self.protocol.has_binary_op() {
            protocol::emit_binary_op(w, self.resolved, self.class, &self.protocol)?;
            w.blank();
        }
        if !self.protocol.unary.is_empty() {
            protocol::emit_unary_op(w, self.resolved, self.class, &self.protocol);
            w.blank();
        }
        if let Some(plan) = self.protocol.iter {
            protocol::emit_iter(w, self.resolved, self.class, plan);
            w.blank();
        }
        self.emit_vtable_instance(w);
        self.emit_make_new(w)?;
        let has_locals = self.emit_locals_dict(w);
        self.emit_type(w, has_locals);
        Ok(())
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Field table, then the handler: properties first, fields second, and
    /// a miss on load falls through to the method table
    fn emit_attr(&self, w: &mut CodeWriter) {
        let module = &self.resolved.module;
        let ir = module.class(self.class);
        let layout = self.resolved.layout(self.class);
        let m = &module.c_name;

        if !layout.fields.is_empty() {
            w.open(format!("static const {}_field_t {}_fields[] = {{", m, ir.c_name));
            for slot in &layout.fields {
                let field = module.field(slot.field);
                w.line(format!(
                    "{{ {}, offsetof({}, {}), {} }},",
                    qstr(&field.name),
                    ir.obj_type(),
                    member_path(&slot.path),
                    field_kind(field.repr())
                ));
            }
            w.close("};");
            w.blank();
        }

        w.open(format!(
            "static void {}_attr(mp_obj_t self_in, qstr attr, mp_obj_t *dest) {{",
            ir.c_name
        ));
        w.line(format!("{} *self = MP_OBJ_TO_PTR(self_in);", ir.obj_type()));
        w.line("(void)self;");

        for (name, getter) in self.properties() {
            let getter_fn = &module.method(getter).func;
            let owner = module.class(getter.class).obj_type();
            w.open(format!("if (attr == {}) {{", qstr(&name)));
            w.open("if (dest[0] == MP_OBJ_NULL) {");
            let call = format!("{}(({} *)self)", getter_fn.native_name(), owner);
            if getter_fn.ret_repr() == Repr::Void {
                w.line(format!("{};", call));
                w.line("dest[0] = mp_const_none;");
            } else {
                w.line(format!("dest[0] = {};", box_value(getter_fn.ret_repr(), &call)));
            }
            if let Some(setter) = module.find_setter(self.class, &name) {
                let setter_fn = &module.method(setter).func;
                let owner = module.class(setter.class).obj_type();
                let arg = setter_fn
                    .params
                    .first()
                    .map(|p| unbox_value(storage(p.repr()), "dest[1]"))
                    .unwrap_or_else(|| "dest[1]".to_string());
                w.dedent();
                w.open("} else if (dest[0] == MP_OBJ_SENTINEL && dest[1] != MP_OBJ_NULL) {");
                w.line(format!("{}(({} *)self, {});", setter_fn.native_name(), owner, arg));
                w.line("dest[0] = MP_OBJ_NULL;");
            }
            w.close("}");
            w.line("return;");
            w.close("}");
        }

        if !layout.fields.is_empty() {
            w.open(format!(
                "if ({}_field_attr(self, {}_fields, MP_ARRAY_SIZE({}_fields), attr, dest)) {{",
                m, ir.c_name, ir.c_name
            ));
            w.line("return;");
            w.close("}");
        }
        w.open("if (dest[0] == MP_OBJ_NULL) {");
        w.line("dest[1] = MP_OBJ_SENTINEL;");
        w.close("}");
        w.close("}");
        w.blank();
    }

    /// Visible properties (nearest getter), in chain order from the root
    fn properties(&self) -> Vec<(String, MethodRef)> {
        let module = &self.resolved.module;
        let mut chain = module.class_chain(self.class);
        chain.reverse();
        let mut names: Vec<String> = Vec::new();
        for id in chain {
            for method in &module.class(id).methods {
                if method.flags.kind == MethodKind::Getter && !names.contains(&method.name) {
                    names.push(method.name.clone());
                }
            }
        }
        names
            .into_iter()
            .filter_map(|name| {
                module
                    .find_method(self.class, &name)
                    .filter(|m| module.method(*m).flags.kind == MethodKind::Getter)
                    .map(|m| (name, m))
            })
            .collect()
    }

    // ========================================================================
    // Dispatch table instance and constructor
    // ========================================================================

    fn emit_vtable_instance(&self, w: &mut CodeWriter) {
        let module = &self.resolved.module;
        let ir = module.class(self.class);
        let Some(vtable) = &self.resolved.layout(self.class).vtable else {
            return;
        };
        w.open(format!(
            "static const {} {}_vtable_inst = {{",
            ir.vtable_type(),
            ir.c_name
        ));
        w.line(format!(".type = &{},", ir.type_object()));
        for entry in &vtable.entries {
            let native = module.method(entry.implementation).func.native_name();
            if entry.implementation.class == self.class {
                w.line(format!(".{} = {},", slot_member(&entry.name), native));
            } else {
                // Inherited: same code, receiver viewed through this class
                w.line(format!(
                    ".{} = ({}){},",
                    slot_member(&entry.name),
                    slot_pointer_type(self.resolved, self.class, entry.implementation),
                    native
                ));
            }
        }
        w.close("};");
        w.blank();
    }

    fn emit_make_new(&self, w: &mut CodeWriter) -> CompileResult<()> {
        let module = &self.resolved.module;
        let ir = module.class(self.class);
        let layout = self.resolved.layout(self.class);
        let constructor = module.constructor(self.class);

        w.open(format!(
            "static mp_obj_t {}_make_new(const mp_obj_type_t *type, size_t n_args, size_t n_kw, const mp_obj_t *args) {{",
            ir.c_name
        ));

        // Positional arguments: `__init__` parameters, or the fields of the
        // dataclass the constructor comes from, which lead the layout
        let dataclass_args = matches!(constructor, Constructor::Dataclass(_));
        let (required, total) = match constructor {
            Constructor::Dataclass(dataclass) => {
                let defaults: Vec<bool> = module
                    .all_fields(dataclass)
                    .into_iter()
                    .map(|field| module.field(field).default.is_some())
                    .collect();
                let required = defaults.iter().take_while(|d| !**d).count();
                if defaults[required..].iter().any(|d| !*d) {
                    let owner = module.class(dataclass);
                    return Err(CompileError::unsupported(
                        format!(
                            "field without a default after a defaulted field in `{}`",
                            owner.name
                        ),
                        owner.span,
                    ));
                }
                (required, defaults.len())
            }
            Constructor::Init(init) => {
                let n = module.method(init).params().len();
                (n, n)
            }
            Constructor::Default => (0, 0),
        };
        w.line(format!(
            "mp_arg_check_num(n_args, n_kw, {}, {}, false);",
            required, total
        ));
        w.line(format!(
            "{} *self = mp_obj_malloc({}, type);",
            ir.obj_type(),
            ir.obj_type()
        ));
        if let Some(path) = &layout.vtable_path {
            let root = module.class(self.resolved.root(self.class));
            w.line(format!(
                "self->{} = (const {} *)&{}_vtable_inst;",
                path.to_c(),
                root.vtable_type(),
                ir.c_name
            ));
        }

        for (i, slot) in layout.fields.iter().enumerate() {
            let field = module.field(slot.field);
            let repr = storage(field.repr());
            let initial = match &field.default {
                Some(c) => {
                    let (code, natural) = constant(c);
                    convert(&code, natural, repr)
                }
                None => zero(repr).to_string(),
            };
            let path = member_path(&slot.path);
            if dataclass_args && i < required {
                let arg = unbox_value(repr, &format!("args[{}]", i));
                w.line(format!("self->{} = {};", path, arg));
            } else if dataclass_args && i < total {
                let arg = unbox_value(repr, &format!("args[{}]", i));
                w.line(format!(
                    "self->{} = n_args > {} ? {} : {};",
                    path, i, arg, initial
                ));
            } else {
                w.line(format!("self->{} = {};", path, initial));
            }
        }

        if let Constructor::Init(init) = constructor {
            let init_fn = &module.method(init).func;
            let owner = module.class(init.class).obj_type();
            let mut args = vec![format!("({} *)self", owner)];
            args.extend(init_fn.params.iter().enumerate().map(|(i, p)| {
                unbox_value(storage(p.repr()), &format!("args[{}]", i))
            }));
            w.line(format!("{}({});", init_fn.native_name(), args.join(", ")));
        } else if !dataclass_args {
            w.line("(void)args;");
        }
        w.line("return MP_OBJ_FROM_PTR(self);");
        w.close("}");
        w.blank();
        Ok(())
    }

    // ========================================================================
    // Method table and type object
    // ========================================================================

    /// Methods reachable by name, nearest implementation first found
    fn exported_methods(&self) -> Vec<(String, MethodRef)> {
        let module = &self.resolved.module;
        let mut chain = module.class_chain(self.class);
        chain.reverse();
        let mut names: Vec<String> = Vec::new();
        for id in chain {
            for method in &module.class(id).methods {
                let exported = !method.flags.is_property()
                    && method.flags.special != Some(SpecialMethod::Init);
                if exported && !names.contains(&method.name) {
                    names.push(method.name.clone());
                }
            }
        }
        names
            .into_iter()
            .filter_map(|name| module.find_method(self.class, &name).map(|m| (name, m)))
            .filter(|(_, m)| {
                let flags = &module.method(*m).flags;
                !flags.is_property() && flags.special != Some(SpecialMethod::Init)
            })
            .collect()
    }

    fn emit_locals_dict(&self, w: &mut CodeWriter) -> bool {
        let module = &self.resolved.module;
        let ir = module.class(self.class);
        let methods = self.exported_methods();
        if methods.is_empty() {
            return false;
        }

        // Static and class methods are wrapped once, by their owner
        let mut wrapped_any = false;
        for (_, method) in &methods {
            let target = module.method(*method);
            let descriptor = match target.flags.kind {
                MethodKind::Static => "mp_type_staticmethod",
                MethodKind::ClassMethod => "mp_type_classmethod",
                _ => continue,
            };
            if method.class != self.class {
                continue;
            }
            w.line(format!(
                "static const mp_rom_obj_static_class_method_t {} = {{{{&{}}}, MP_ROM_PTR(&{})}};",
                function_object(&target.func, false),
                descriptor,
                function_object(&target.func, true)
            ));
            wrapped_any = true;
        }
        if wrapped_any {
            w.blank();
        }

        w.open(format!(
            "static const mp_rom_map_elem_t {}_locals_dict_table[] = {{",
            ir.c_name
        ));
        for (name, method) in &methods {
            let target = module.method(*method);
            w.line(format!(
                "{{ MP_ROM_QSTR({}), MP_ROM_PTR(&{}) }},",
                qstr(name),
                function_object(&target.func, false)
            ));
        }
        w.close("};");
        w.line(format!(
            "static MP_DEFINE_CONST_DICT({0}_locals_dict, {0}_locals_dict_table);",
            ir.c_name
        ));
        w.blank();
        true
    }

    fn emit_type(&self, w: &mut CodeWriter, has_locals: bool) {
        let module = &self.resolved.module;
        let ir = module.class(self.class);
        let mut slots = vec![format!("make_new, {}_make_new", ir.c_name)];
        if self.protocol.print.is_some() {
            slots.push(format!("print, {}_print", ir.c_name));
        }
        if self.has_attr_handler() {
            slots.push(format!("attr, {}_attr", ir.c_name));
        }
        if self.protocol.has_binary_op() {
            slots.push(format!("binary_op, {}_binary_op", ir.c_name));
        }
        if !self.protocol.unary.is_empty() {
            slots.push(format!("unary_op, {}_unary_op", ir.c_name));
        }
        if let Some(plan) = self.protocol.iter {
            slots.push(format!("iter, {}", protocol::iter_slot(&ir.c_name, plan)));
        }
        if let Some(base) = ir.base {
            slots.push(format!("parent, &{}", module.class(base).type_object()));
        }
        if has_locals {
            slots.push(format!("locals_dict, &{}_locals_dict", ir.c_name));
        }

        w.open("MP_DEFINE_CONST_OBJ_TYPE(");
        w.line(format!("{},", ir.type_object()));
        w.line(format!("{},", qstr(&ir.name)));
        w.line(format!("{},", self.protocol.flags()));
        let last = slots.len() - 1;
        for (i, slot) in slots.iter().enumerate() {
            w.line(if i == last {
                slot.clone()
            } else {
                format!("{},", slot)
            });
        }
        w.close(");");
        w.blank();
    }
}

/// Whether a class keeps a boxed wrapper for interpreted callers
pub(crate) fn method_has_wrapper(kind: MethodKind, special: Option<SpecialMethod>) -> bool {
    kind != MethodKind::Getter && kind != MethodKind::Setter && special != Some(SpecialMethod::Init)
}
