//! Expression and Instruction Emission
//!
//! Values render to C expressions in their natural representation; callers
//! convert at the point of use. Instructions render to C statements binding
//! their result temporary.

use super::ctype::{
    box_value, c_type, convert, float_literal, int_literal, member_path, qstr, sanitize_name,
    storage, string_literal, truth,
};
use super::function::FunctionEmitter;
use crate::ast::{BinOp, BoolOp, CmpOp, UnaryOp};
use crate::bindings::{BindingFunction, CType};
use crate::error::{CompileError, CompileResult};
use crate::ir::{
    ArithPath, Branch, Builtin, CallVia, ClassId, Comparison, Const, Instr, Local, MethodRef,
    Repr, Temp, Value,
};
use crate::layout::Dispatch;
use crate::oracle::{ContainerKind, ResolvedType};

impl<'r> FunctionEmitter<'r> {
    // ========================================================================
    // Values
    // ========================================================================

    /// C expression for `value` and the representation it evaluates to
    pub(super) fn value(&mut self, value: &Value) -> CompileResult<(String, Repr)> {
        let rendered = match value {
            Value::Const(c) => constant(c),
            Value::Name(local) => (sanitize_name(&local.name), storage(local.repr())),
            Value::SelfRef { .. } => ("MP_OBJ_FROM_PTR(self)".to_string(), Repr::Obj),
            Value::ClassRef { class, .. } => (
                format!(
                    "MP_OBJ_FROM_PTR(&{})",
                    self.resolved.module.class(*class).type_object()
                ),
                Repr::Obj,
            ),
            Value::Temp(temp) => (temp.id.to_string(), storage(temp.repr())),
            Value::BinOp {
                op,
                left,
                right,
                ty,
                path,
            } => self.binary(*op, left, right, ty, *path)?,
            Value::UnaryOp {
                op,
                operand,
                ty,
                path,
            } => self.unary(*op, operand, ty, *path)?,
            Value::Compare { left, comparisons } => (self.compare(left, comparisons)?, Repr::Bool),
            Value::BoolOp { op, values, ty } => self.bool_op(*op, values, ty)?,
            Value::FieldRead { object, field, .. } => {
                let path = member_path(self.resolved.access_path(*field)?);
                let ptr = self.instance_ptr(object, field.owner)?;
                let repr = storage(self.resolved.module.field(*field).repr());
                (format!("{}->{}", ptr, path), repr)
            }
            Value::Select {
                test,
                body,
                orelse,
                ty,
            } => {
                let repr = storage(Repr::from(ty));
                let test = self.condition(test)?;
                let body = self.value_as(body, repr)?;
                let orelse = self.value_as(orelse, repr)?;
                (format!("({} ? {} : {})", test, body, orelse), repr)
            }
        };
        Ok(rendered)
    }

    /// C expression for `value` converted to `repr`
    pub(super) fn value_as(&mut self, value: &Value, repr: Repr) -> CompileResult<String> {
        let (code, natural) = self.value(value)?;
        Ok(convert(&code, natural, repr))
    }

    pub(super) fn boxed(&mut self, value: &Value) -> CompileResult<String> {
        self.value_as(value, Repr::Obj)
    }

    /// C condition testing the truth of `value`
    pub(super) fn condition(&mut self, value: &Value) -> CompileResult<String> {
        let (code, repr) = self.value(value)?;
        Ok(truth(&code, repr))
    }

    /// Typed pointer to the instance `value` refers to, viewed as `class`
    pub(super) fn instance_ptr(&mut self, value: &Value, class: ClassId) -> CompileResult<String> {
        let obj_type = self.resolved.module.class(class).obj_type();
        match value {
            Value::SelfRef { class: own, .. } if *own == class => Ok("self".to_string()),
            Value::SelfRef { .. } => Ok(format!("(({} *)self)", obj_type)),
            other => {
                let code = self.boxed(other)?;
                Ok(format!("(({} *)MP_OBJ_TO_PTR({}))", obj_type, code))
            }
        }
    }

    fn binary(
        &mut self,
        op: BinOp,
        left: &Value,
        right: &Value,
        ty: &ResolvedType,
        path: ArithPath,
    ) -> CompileResult<(String, Repr)> {
        let repr = storage(Repr::from(ty));
        if path == ArithPath::Generic || !repr.is_scalar() || op == BinOp::Pow {
            let l = self.boxed(left)?;
            let r = self.boxed(right)?;
            return Ok((
                format!("mp_binary_op({}, {}, {})", binary_op_tag(op), l, r),
                Repr::Obj,
            ));
        }

        let l = self.value_as(left, repr)?;
        let r = self.value_as(right, repr)?;
        let checked = self.options.checked_division;
        let code = match (op, repr) {
            (BinOp::Div, _) if checked => {
                self.helpers.float_div = true;
                format!("mpyc_float_div({}, {})", l, r)
            }
            (BinOp::FloorDiv, Repr::Float) => {
                self.helpers.float_floordiv = true;
                format!("mpyc_float_floordiv({}, {})", l, r)
            }
            (BinOp::FloorDiv, _) => {
                self.helpers.int_floordiv = true;
                format!("mpyc_int_floordiv({}, {})", l, r)
            }
            (BinOp::Mod, Repr::Float) => {
                self.helpers.float_mod = true;
                format!("mpyc_float_mod({}, {})", l, r)
            }
            (BinOp::Mod, _) => {
                self.helpers.int_mod = true;
                format!("mpyc_int_mod({}, {})", l, r)
            }
            (op, _) => format!("({} {} {})", l, op.symbol(), r),
        };
        Ok((code, repr))
    }

    fn unary(
        &mut self,
        op: UnaryOp,
        operand: &Value,
        ty: &ResolvedType,
        path: ArithPath,
    ) -> CompileResult<(String, Repr)> {
        if op == UnaryOp::Not {
            return Ok((format!("(!{})", self.condition(operand)?), Repr::Bool));
        }
        let repr = storage(Repr::from(ty));
        if path == ArithPath::Generic || !repr.is_scalar() {
            let tag = match op {
                UnaryOp::Neg => "MP_UNARY_OP_NEGATIVE",
                UnaryOp::Pos => "MP_UNARY_OP_POSITIVE",
                _ => "MP_UNARY_OP_INVERT",
            };
            let code = self.boxed(operand)?;
            return Ok((format!("mp_unary_op({}, {})", tag, code), Repr::Obj));
        }
        let code = self.value_as(operand, repr)?;
        let code = match op {
            UnaryOp::Neg => format!("(-{})", code),
            UnaryOp::Invert => format!("(~{})", code),
            _ => code,
        };
        Ok((code, repr))
    }

    fn compare(&mut self, left: &Value, comparisons: &[Comparison]) -> CompileResult<String> {
        let mut links = Vec::with_capacity(comparisons.len());
        let mut previous = left;
        for link in comparisons {
            links.push(self.compare_link(previous, link)?);
            previous = &link.right;
        }
        Ok(if links.len() == 1 {
            links.remove(0)
        } else {
            format!("({})", links.join(" && "))
        })
    }

    fn compare_link(&mut self, left: &Value, link: &Comparison) -> CompileResult<String> {
        let right = &link.right;
        if link.path == ArithPath::Native {
            let float = [left, right]
                .iter()
                .any(|v| v.effective_ty() == ResolvedType::Float);
            let repr = if float { Repr::Float } else { Repr::Int };
            let l = self.value_as(left, repr)?;
            let r = self.value_as(right, repr)?;
            return Ok(format!("({} {} {})", l, link.op.symbol(), r));
        }

        let l = self.boxed(left)?;
        let r = self.boxed(right)?;
        let code = match link.op {
            CmpOp::Eq => format!("mp_obj_equal({}, {})", l, r),
            CmpOp::NotEq => format!("(!mp_obj_equal({}, {}))", l, r),
            CmpOp::Is => format!("({} == {})", l, r),
            CmpOp::IsNot => format!("({} != {})", l, r),
            CmpOp::NotIn => format!(
                "(!mp_obj_is_true(mp_binary_op(MP_BINARY_OP_IN, {}, {})))",
                l, r
            ),
            op => format!(
                "mp_obj_is_true(mp_binary_op({}, {}, {}))",
                compare_op_tag(op),
                l,
                r
            ),
        };
        Ok(code)
    }

    fn bool_op(
        &mut self,
        op: BoolOp,
        values: &[Value],
        ty: &ResolvedType,
    ) -> CompileResult<(String, Repr)> {
        let repr = storage(Repr::from(ty));
        if repr == Repr::Bool {
            let joiner = if op == BoolOp::And { " && " } else { " || " };
            let parts = values
                .iter()
                .map(|v| self.condition(v))
                .collect::<CompileResult<Vec<_>>>()?;
            return Ok((format!("({})", parts.join(joiner)), Repr::Bool));
        }

        // Python returns the deciding operand itself
        let Some((last, rest)) = values.split_last() else {
            return Err(CompileError::internal("empty boolean operation"));
        };
        let mut code = self.value_as(last, repr)?;
        for value in rest.iter().rev() {
            let test = self.condition(value)?;
            let this = self.value_as(value, repr)?;
            code = match op {
                BoolOp::And => format!("({} ? {} : {})", test, code, this),
                BoolOp::Or => format!("({} ? {} : {})", test, this, code),
            };
        }
        Ok((code, repr))
    }

    // ========================================================================
    // Instructions
    // ========================================================================

    pub(super) fn prelude(&mut self, prelude: &[Instr]) -> CompileResult<()> {
        for instr in prelude {
            self.instr(instr)?;
        }
        Ok(())
    }

    /// Bind the result of `code` (of representation `natural`) to `result`
    fn bind(&mut self, result: Option<&Temp>, code: &str, natural: Repr) {
        match result {
            Some(temp) => {
                let repr = storage(temp.repr());
                if natural == Repr::Void {
                    self.w.line(format!("{};", code));
                    self.w
                        .line(format!("{} {} = mp_const_none;", c_type(repr), temp.id));
                } else {
                    self.w.line(format!(
                        "{} {} = {};",
                        c_type(repr),
                        temp.id,
                        convert(code, natural, repr)
                    ));
                }
            }
            None if natural == Repr::Void => self.w.line(format!("{};", code)),
            None => self.w.line(format!("(void){};", code)),
        }
    }

    fn declare(&mut self, temp: &Temp) {
        let repr = storage(temp.repr());
        self.w.line(format!("{} {};", c_type(repr), temp.id));
    }

    fn assign(&mut self, temp: &Temp, value: &Value) -> CompileResult<()> {
        let code = self.value_as(value, storage(temp.repr()))?;
        self.w.line(format!("{} = {};", temp.id, code));
        Ok(())
    }

    /// Arguments converted to the parameter representations of a callee
    fn call_args(&mut self, params: &[Local], args: &[Value]) -> CompileResult<Vec<String>> {
        if params.len() != args.len() {
            return Err(CompileError::internal(format!(
                "call passes {} argument(s) to {} parameter(s)",
                args.len(),
                params.len()
            )));
        }
        params
            .iter()
            .zip(args)
            .map(|(param, arg)| self.value_as(arg, storage(param.repr())))
            .collect()
    }

    /// `(const mp_obj_t[]){...}` or `NULL`
    fn boxed_array(&mut self, args: &[Value]) -> CompileResult<String> {
        if args.is_empty() {
            return Ok("NULL".to_string());
        }
        let items = args
            .iter()
            .map(|a| self.boxed(a))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(format!("(mp_obj_t[]){{{}}}", items.join(", ")))
    }

    pub(super) fn instr(&mut self, instr: &Instr) -> CompileResult<()> {
        match instr {
            Instr::Call { result, func, args } => {
                let resolved = self.resolved;
                let callee = resolved
                    .module
                    .get_function(*func)
                    .ok_or_else(|| CompileError::internal(format!("unknown function {}", func)))?;
                let args = self.call_args(&callee.params, args)?;
                let code = format!("{}({})", callee.native_name(), args.join(", "));
                self.bind(result.as_ref(), &code, callee.ret_repr());
            }
            Instr::ExternCall {
                result,
                function,
                args,
                ..
            } => {
                let (code, natural) = self.extern_call(function, args)?;
                self.bind(result.as_ref(), &code, natural);
            }
            Instr::MethodCall {
                result,
                receiver,
                class,
                method,
                via,
                args,
            } => {
                let (code, natural) = self.method_call(receiver, *class, *method, *via, args)?;
                self.bind(result.as_ref(), &code, natural);
            }
            Instr::StaticCall {
                result,
                method,
                args,
            } => {
                let resolved = self.resolved;
                let target = &resolved.module.method(*method).func;
                let args = self.call_args(&target.params, args)?;
                let code = format!("{}({})", target.native_name(), args.join(", "));
                self.bind(result.as_ref(), &code, target.ret_repr());
            }
            Instr::ClassMethodCall {
                result,
                cls,
                method,
                args,
            } => {
                let resolved = self.resolved;
                let target = &resolved.module.method(*method).func;
                let mut call = vec![self.boxed(cls)?];
                call.extend(self.call_args(&target.params, args)?);
                let code = format!("{}({})", target.native_name(), call.join(", "));
                self.bind(result.as_ref(), &code, target.ret_repr());
            }
            Instr::DynamicCall {
                result,
                receiver,
                method,
                args,
            } => {
                let dest = self.scratch("dest");
                let receiver = self.boxed(receiver)?;
                let args = args
                    .iter()
                    .map(|a| self.boxed(a))
                    .collect::<CompileResult<Vec<_>>>()?;
                if let Some(temp) = result {
                    self.declare(temp);
                }
                self.w.open("{");
                self.w.line(format!("mp_obj_t {}[{}];", dest, 2 + args.len()));
                self.w.line(format!(
                    "mp_load_method({}, {}, {});",
                    receiver,
                    qstr(method),
                    dest
                ));
                for (i, arg) in args.iter().enumerate() {
                    self.w.line(format!("{}[{}] = {};", dest, i + 2, arg));
                }
                let call = format!("mp_call_method_n_kw({}, 0, {})", args.len(), dest);
                match result {
                    Some(temp) => {
                        let repr = storage(temp.repr());
                        self.w.line(format!(
                            "{} = {};",
                            temp.id,
                            convert(&call, Repr::Obj, repr)
                        ));
                    }
                    None => self.w.line(format!("{};", call)),
                }
                self.w.close("}");
            }
            Instr::CallObject {
                result,
                callee,
                args,
            } => {
                let callee = self.boxed(callee)?;
                let argv = self.boxed_array(args)?;
                let code = format!(
                    "mp_call_function_n_kw({}, {}, 0, {})",
                    callee,
                    args.len(),
                    argv
                );
                self.bind(result.as_ref(), &code, Repr::Obj);
            }
            Instr::New {
                result,
                class,
                args,
            } => {
                let class = self.resolved.module.class(*class);
                let (make_new, type_object) =
                    (format!("{}_make_new", class.c_name), class.type_object());
                let argv = self.boxed_array(args)?;
                let code = format!(
                    "{}(&{}, {}, 0, {})",
                    make_new,
                    type_object,
                    args.len(),
                    argv
                );
                self.bind(result.as_ref(), &code, Repr::Obj);
            }
            Instr::ContainerNew {
                result,
                kind,
                items,
            } => {
                let argv = self.boxed_array(items)?;
                let code = match kind {
                    ContainerKind::Tuple => {
                        format!("mp_obj_new_tuple({}, {})", items.len(), argv)
                    }
                    ContainerKind::Set => format!("mp_obj_new_set({}, {})", items.len(), argv),
                    ContainerKind::List => format!("mp_obj_new_list({}, {})", items.len(), argv),
                    ContainerKind::Dict => format!("mp_obj_new_dict({})", items.len()),
                };
                self.bind(Some(result), &code, Repr::Obj);
            }
            Instr::DictNew { result, entries } => {
                self.bind(
                    Some(result),
                    &format!("mp_obj_new_dict({})", entries.len()),
                    Repr::Obj,
                );
                for (key, value) in entries {
                    let key = self.boxed(key)?;
                    let value = self.boxed(value)?;
                    self.w.line(format!(
                        "mp_obj_dict_store({}, {}, {});",
                        result.id, key, value
                    ));
                }
            }
            Instr::SliceNew {
                result,
                lower,
                upper,
                step,
            } => {
                let mut bounds = Vec::with_capacity(3);
                for bound in [lower, upper, step] {
                    bounds.push(match bound {
                        Some(value) => self.boxed(value)?,
                        None => "mp_const_none".to_string(),
                    });
                }
                let code = format!("mp_obj_new_slice({})", bounds.join(", "));
                self.bind(Some(result), &code, Repr::Obj);
            }
            Instr::GetItem {
                result,
                container,
                index,
            } => {
                let container = self.boxed(container)?;
                let index = self.boxed(index)?;
                let code = format!("mp_obj_subscr({}, {}, MP_OBJ_SENTINEL)", container, index);
                self.bind(result.as_ref(), &code, Repr::Obj);
            }
            Instr::SetItem {
                container,
                index,
                value,
            } => {
                let container = self.boxed(container)?;
                let index = self.boxed(index)?;
                let value = self.boxed(value)?;
                self.w
                    .line(format!("mp_obj_subscr({}, {}, {});", container, index, value));
            }
            Instr::FieldWrite {
                object,
                field,
                value,
            } => {
                let path = member_path(self.resolved.access_path(*field)?);
                let repr = storage(self.resolved.module.field(*field).repr());
                let value = self.value_as(value, repr)?;
                let ptr = self.instance_ptr(object, field.owner)?;
                self.w.line(format!("{}->{} = {};", ptr, path, value));
            }
            Instr::LoadAttr {
                result,
                object,
                attr,
            } => {
                let object = self.boxed(object)?;
                let code = format!("mp_load_attr({}, {})", object, qstr(attr));
                self.bind(result.as_ref(), &code, Repr::Obj);
            }
            Instr::StoreAttr {
                object,
                attr,
                value,
            } => {
                let object = self.boxed(object)?;
                let value = self.boxed(value)?;
                self.w
                    .line(format!("mp_store_attr({}, {}, {});", object, qstr(attr), value));
            }
            Instr::RuntimeCall { result, func, args } => {
                self.runtime_call(result.as_ref(), *func, args)?;
            }
            Instr::ShortCircuit {
                result,
                op,
                first,
                rest,
            } => self.short_circuit(result, *op, first, rest)?,
            Instr::Select {
                result,
                test,
                body,
                orelse,
            } => {
                self.declare(result);
                let test = self.condition(test)?;
                self.w.open(format!("if ({}) {{", test));
                self.branch(result, body)?;
                self.w.dedent();
                self.w.open("} else {");
                self.branch(result, orelse)?;
                self.w.close("}");
            }
        }
        Ok(())
    }

    fn branch(&mut self, result: &Temp, branch: &Branch) -> CompileResult<()> {
        self.prelude(&branch.prelude)?;
        self.assign(result, &branch.value)
    }

    /// Later operands (and their preludes) run only while the result does
    /// not already decide the outcome
    fn short_circuit(
        &mut self,
        result: &Temp,
        op: BoolOp,
        first: &Value,
        rest: &[Branch],
    ) -> CompileResult<()> {
        let repr = storage(result.repr());
        let first = self.value_as(first, repr)?;
        self.w
            .line(format!("{} {} = {};", c_type(repr), result.id, first));
        for branch in rest {
            let test = truth(&result.id.to_string(), repr);
            let test = match op {
                BoolOp::And => test,
                BoolOp::Or => format!("!{}", test),
            };
            self.w.open(format!("if ({}) {{", test));
            self.branch(result, branch)?;
        }
        for _ in rest {
            self.w.close("}");
        }
        Ok(())
    }

    fn method_call(
        &mut self,
        receiver: &Value,
        class: ClassId,
        method: MethodRef,
        via: CallVia,
        args: &[Value],
    ) -> CompileResult<(String, Repr)> {
        let resolved = self.resolved;
        let target = &resolved.module.method(method).func;
        let dispatch = match via {
            CallVia::Exact => Dispatch::Direct(method),
            CallVia::Dispatch => resolved.dispatch(class, method),
        };
        let mut call_args = self.call_args(&target.params, args)?;

        let code = match dispatch {
            Dispatch::Direct(implementation) => {
                let callee = &resolved.module.method(implementation).func;
                let ptr = self.instance_ptr(receiver, implementation.class)?;
                call_args.insert(0, ptr);
                format!("{}({})", callee.native_name(), call_args.join(", "))
            }
            Dispatch::Slot(slot) => {
                let layout = resolved.layout(class);
                let (vtable_path, entry) = match (&layout.vtable_path, &layout.vtable) {
                    (Some(path), Some(vtable)) => (path.to_c(), vtable.entries[slot].name.clone()),
                    _ => {
                        return Err(CompileError::internal(format!(
                            "slot dispatch on {} without a dispatch table",
                            class
                        )))
                    }
                };
                let vtable_type = resolved.module.class(class).vtable_type();
                let ptr = self.instance_ptr(receiver, class)?;
                let table = format!("((const {} *){}->{})", vtable_type, ptr, vtable_path);
                call_args.insert(0, ptr);
                format!(
                    "{}->{}({})",
                    table,
                    super::object::slot_member(&entry),
                    call_args.join(", ")
                )
            }
        };
        Ok((code, target.ret_repr()))
    }

    /// Direct call of a binding library's published symbol
    fn extern_call(
        &mut self,
        function: &BindingFunction,
        args: &[Value],
    ) -> CompileResult<(String, Repr)> {
        if function.params.len() != args.len() {
            return Err(CompileError::internal(format!(
                "`{}` takes {} argument(s), {} given",
                function.symbol,
                function.params.len(),
                args.len()
            )));
        }
        let mut converted = Vec::with_capacity(args.len());
        for (ctype, arg) in function.params.iter().zip(args) {
            let code = match ctype {
                CType::Int => self.value_as(arg, Repr::Int)?,
                CType::Uint => format!("(mp_uint_t){}", self.value_as(arg, Repr::Int)?),
                CType::Float => format!("(float){}", self.value_as(arg, Repr::Float)?),
                CType::Double => self.value_as(arg, Repr::Float)?,
                CType::Bool => self.value_as(arg, Repr::Bool)?,
                CType::Str => format!("mp_obj_str_get_str({})", self.boxed(arg)?),
                CType::Ptr => format!("mp_to_ptr({})", self.boxed(arg)?),
                CType::Void => {
                    return Err(CompileError::internal(format!(
                        "`{}` declares a void parameter",
                        function.symbol
                    )))
                }
            };
            converted.push(code);
        }
        let call = format!("{}({})", function.symbol, converted.join(", "));
        let rendered = match function.ret {
            CType::Int => (call, Repr::Int),
            CType::Uint => (format!("(mp_int_t){}", call), Repr::Int),
            CType::Float | CType::Double => (format!("(mp_float_t){}", call), Repr::Float),
            CType::Bool => (call, Repr::Bool),
            CType::Str => (format!("mp_obj_new_str_from_cstr({})", call), Repr::Obj),
            CType::Ptr => (format!("ptr_to_mp({})", call), Repr::Obj),
            CType::Void => (call, Repr::Void),
        };
        Ok(rendered)
    }

    fn runtime_call(
        &mut self,
        result: Option<&Temp>,
        builtin: Builtin,
        args: &[Value],
    ) -> CompileResult<()> {
        let (code, natural) = match builtin {
            Builtin::Print => {
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.w.line("mp_print_str(&mp_plat_print, \" \");");
                    }
                    let arg = self.boxed(arg)?;
                    self.w
                        .line(format!("mp_obj_print_helper(&mp_plat_print, {}, PRINT_STR);", arg));
                }
                self.w.line("mp_print_str(&mp_plat_print, \"\\n\");");
                if let Some(temp) = result {
                    self.bind(Some(temp), "mp_const_none", Repr::Obj);
                }
                return Ok(());
            }
            Builtin::ListAppend => {
                let [list, item] = args else {
                    return Err(CompileError::internal("list.append takes one argument"));
                };
                let list = self.boxed(list)?;
                let item = self.boxed(item)?;
                (format!("mp_obj_list_append({}, {})", list, item), Repr::Obj)
            }
            Builtin::Len => {
                let arg = self.boxed(single(builtin, args)?)?;
                (format!("mp_obj_get_int(mp_obj_len({}))", arg), Repr::Int)
            }
            Builtin::Abs => {
                let arg = single(builtin, args)?;
                let (code, repr) = self.value(arg)?;
                match repr {
                    Repr::Int => (format!("({0} < 0 ? -{0} : {0})", code), Repr::Int),
                    Repr::Float => (format!("MICROPY_FLOAT_C_FUN(fabs)({})", code), Repr::Float),
                    Repr::Bool => (format!("(mp_int_t)({})", code), Repr::Int),
                    _ => (
                        format!("mp_unary_op(MP_UNARY_OP_ABS, {})", box_value(repr, &code)),
                        Repr::Obj,
                    ),
                }
            }
            Builtin::Bool => match args.first() {
                Some(arg) => (self.condition(arg)?, Repr::Bool),
                None => ("false".to_string(), Repr::Bool),
            },
            Builtin::Int | Builtin::Float | Builtin::Str => {
                let (target, type_object) = match builtin {
                    Builtin::Int => (Repr::Int, "mp_type_int"),
                    Builtin::Float => (Repr::Float, "mp_type_float"),
                    _ => (Repr::Obj, "mp_type_str"),
                };
                match args.first() {
                    None => (
                        format!("mp_call_function_0(MP_OBJ_FROM_PTR(&{}))", type_object),
                        Repr::Obj,
                    ),
                    Some(arg) => {
                        let (code, repr) = self.value(arg)?;
                        if repr.is_scalar() && target.is_scalar() {
                            (convert(&code, repr, target), target)
                        } else {
                            (
                                format!(
                                    "mp_call_function_1(MP_OBJ_FROM_PTR(&{}), {})",
                                    type_object,
                                    box_value(repr, &code)
                                ),
                                Repr::Obj,
                            )
                        }
                    }
                }
            }
            Builtin::Min | Builtin::Max => {
                let scalar = result
                    .map(|t| storage(t.repr()))
                    .filter(|r| matches!(r, Repr::Int | Repr::Float));
                match (scalar, args) {
                    (Some(repr), [a, b]) => {
                        let a = self.value_as(a, repr)?;
                        let b = self.value_as(b, repr)?;
                        let cmp = if builtin == Builtin::Min { "<" } else { ">" };
                        (format!("(({0}) {2} ({1}) ? ({0}) : ({1}))", a, b, cmp), repr)
                    }
                    _ => {
                        let builtin_obj = if builtin == Builtin::Min {
                            "mp_builtin_min_obj"
                        } else {
                            "mp_builtin_max_obj"
                        };
                        let argv = self.boxed_array(args)?;
                        (
                            format!(
                                "mp_call_function_n_kw(MP_OBJ_FROM_PTR(&{}), {}, 0, {})",
                                builtin_obj,
                                args.len(),
                                argv
                            ),
                            Repr::Obj,
                        )
                    }
                }
            }
        };
        self.bind(result, &code, natural);
        Ok(())
    }
}

fn single(builtin: Builtin, args: &[Value]) -> CompileResult<&Value> {
    match args {
        [arg] => Ok(arg),
        _ => Err(CompileError::internal(format!(
            "`{}` takes exactly one argument",
            builtin.name()
        ))),
    }
}

pub(super) fn constant(c: &Const) -> (String, Repr) {
    match c {
        Const::Int(v) => (int_literal(*v), Repr::Int),
        Const::Float(v) => (float_literal(*v), Repr::Float),
        Const::Bool(v) => (v.to_string(), Repr::Bool),
        Const::Str(s) => (
            format!("mp_obj_new_str({}, {})", string_literal(s), s.len()),
            Repr::Obj,
        ),
        Const::None => ("mp_const_none".to_string(), Repr::Obj),
    }
}

/// Runtime tag of a binary operator
pub(crate) fn binary_op_tag(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "MP_BINARY_OP_ADD",
        BinOp::Sub => "MP_BINARY_OP_SUBTRACT",
        BinOp::Mul => "MP_BINARY_OP_MULTIPLY",
        BinOp::Div => "MP_BINARY_OP_TRUE_DIVIDE",
        BinOp::FloorDiv => "MP_BINARY_OP_FLOOR_DIVIDE",
        BinOp::Mod => "MP_BINARY_OP_MODULO",
        BinOp::Pow => "MP_BINARY_OP_POWER",
        BinOp::LShift => "MP_BINARY_OP_LSHIFT",
        BinOp::RShift => "MP_BINARY_OP_RSHIFT",
        BinOp::BitAnd => "MP_BINARY_OP_AND",
        BinOp::BitOr => "MP_BINARY_OP_OR",
        BinOp::BitXor => "MP_BINARY_OP_XOR",
    }
}

/// Runtime tag of a comparison operator
pub(crate) fn compare_op_tag(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "MP_BINARY_OP_EQUAL",
        CmpOp::NotEq => "MP_BINARY_OP_NOT_EQUAL",
        CmpOp::Lt => "MP_BINARY_OP_LESS",
        CmpOp::LtE => "MP_BINARY_OP_LESS_EQUAL",
        CmpOp::Gt => "MP_BINARY_OP_MORE",
        CmpOp::GtE => "MP_BINARY_OP_MORE_EQUAL",
        CmpOp::In | CmpOp::NotIn => "MP_BINARY_OP_IN",
        CmpOp::Is | CmpOp::IsNot => "MP_BINARY_OP_IS",
    }
}
