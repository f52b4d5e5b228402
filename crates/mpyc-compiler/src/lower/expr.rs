//! Expression Lowering
//!
//! Every expression lowers to a pure [`Value`] plus instructions appended to
//! the caller's prelude, children first and left to right. Calls and
//! container constructions always introduce one fresh temporary.

use super::{const_value, Lowerer};
use crate::ast::{BinOp, BoolOp, CmpOp, Constant, Expr, Keyword, Span, UnaryOp};
use crate::bindings::CType;
use crate::error::{CompileError, CompileResult};
use crate::ir::{
    ArithPath, Branch, Builtin, CallVia, ClassId, Comparison, Const, Constructor, Instr, MethodKind,
    MethodRef, Origin, Temp, Value,
};
use crate::oracle::{ContainerKind, ResolvedType};
use log::trace;

impl<'a> Lowerer<'a> {
    /// Lower an expression, appending its setup to `prelude`
    pub(super) fn lower_expr(
        &mut self,
        expr: &Expr,
        prelude: &mut Vec<Instr>,
    ) -> CompileResult<Value> {
        match expr {
            Expr::Constant { value, .. } => Ok(Value::Const(constant(value))),
            Expr::Name { id, span } => self.lower_name(id, *span),
            Expr::BinOp {
                left, op, right, ..
            } => {
                let left = self.lower_expr(left, prelude)?;
                let right = self.lower_expr(right, prelude)?;
                Ok(binary(*op, left, right))
            }
            Expr::UnaryOp { op, operand, .. } => {
                let operand = self.lower_expr(operand, prelude)?;
                Ok(unary(*op, operand))
            }
            Expr::BoolOp { op, values, span } => self.lower_bool_op(*op, values, *span, prelude),
            Expr::Compare {
                left,
                ops,
                comparators,
                span,
            } => self.lower_compare(left, ops, comparators, *span, prelude),
            Expr::Call {
                func,
                args,
                keywords,
                span,
            } => self.lower_call(func, args, keywords, *span, prelude),
            Expr::Attribute { value, attr, span } => {
                self.lower_attribute(value, attr, *span, prelude)
            }
            Expr::Subscript { value, index, .. } => {
                let container = self.lower_expr(value, prelude)?;
                let sliced = matches!(**index, Expr::Slice { .. });
                let index = self.lower_expr(index, prelude)?;
                let temp = match container.ty().element() {
                    // a slice of a sequence is a sequence of the same kind
                    _ if sliced => self.fresh_temp(match container.ty() {
                        ty @ (ResolvedType::Container { .. } | ResolvedType::Str) => ty,
                        _ => ResolvedType::Object,
                    }),
                    Some(elem) => {
                        let elem = elem.clone();
                        self.fresh_temp_with(ResolvedType::Object, Origin::Element(elem))
                    }
                    None => self.fresh_temp(ResolvedType::Object),
                };
                prelude.push(Instr::GetItem {
                    result: Some(temp.clone()),
                    container,
                    index,
                });
                Ok(Value::Temp(temp))
            }
            Expr::Slice {
                lower, upper, step, ..
            } => {
                let mut bound = |b: &Option<Box<Expr>>, prelude: &mut Vec<Instr>| {
                    b.as_deref()
                        .map(|e| self.lower_expr(e, prelude))
                        .transpose()
                };
                let lower = bound(lower, prelude)?;
                let upper = bound(upper, prelude)?;
                let step = bound(step, prelude)?;
                let temp = self.fresh_temp(ResolvedType::Object);
                prelude.push(Instr::SliceNew {
                    result: temp.clone(),
                    lower,
                    upper,
                    step,
                });
                Ok(Value::Temp(temp))
            }
            Expr::List { elts, .. } => self.lower_container(ContainerKind::List, elts, prelude),
            Expr::Tuple { elts, .. } => self.lower_container(ContainerKind::Tuple, elts, prelude),
            Expr::Set { elts, .. } => self.lower_container(ContainerKind::Set, elts, prelude),
            Expr::Dict { keys, values, span } => {
                if keys.len() != values.len() {
                    return Err(CompileError::unsupported("dict unpacking", *span));
                }
                let mut entries = Vec::with_capacity(keys.len());
                for (key, value) in keys.iter().zip(values) {
                    let key = self.lower_expr(key, prelude)?;
                    let value = self.lower_expr(value, prelude)?;
                    entries.push((key, value));
                }
                let elem = uniform_type(entries.iter().map(|(_, v)| v.ty()));
                let temp = self.fresh_temp(ResolvedType::Container {
                    kind: ContainerKind::Dict,
                    elem: elem.map(Box::new),
                });
                prelude.push(Instr::DictNew {
                    result: temp.clone(),
                    entries,
                });
                Ok(Value::Temp(temp))
            }
            Expr::IfExp {
                test, body, orelse, ..
            } => self.lower_if_exp(test, body, orelse, prelude),
            Expr::Lambda { span } => Err(CompileError::unsupported("lambda expression", *span)),
            Expr::ListComp { span } => {
                Err(CompileError::unsupported("list comprehension", *span))
            }
            Expr::DictComp { span } => {
                Err(CompileError::unsupported("dict comprehension", *span))
            }
            Expr::GeneratorExp { span } => {
                Err(CompileError::unsupported("generator expression", *span))
            }
            Expr::Yield { span } => Err(CompileError::unsupported("yield expression", *span)),
            Expr::Await { span } => Err(CompileError::unsupported("await expression", *span)),
            Expr::Starred { span } => {
                Err(CompileError::unsupported("starred expression", *span))
            }
        }
    }

    fn lower_name(&mut self, id: &str, span: Span) -> CompileResult<Value> {
        if let Some(local) = self.scope.get(id) {
            return Ok(Value::Name(local.clone()));
        }
        if self.is_self(id) {
            if let Some(class) = self.self_class() {
                return Ok(Value::SelfRef {
                    class,
                    name: self.module.class(class).name.clone(),
                });
            }
        }
        match id {
            "True" => return Ok(Value::Const(Const::Bool(true))),
            "False" => return Ok(Value::Const(Const::Bool(false))),
            "None" => return Ok(Value::Const(Const::None)),
            _ => {}
        }
        if let Some(class) = self.module.get_class_id(id) {
            return Ok(Value::ClassRef {
                class,
                name: id.to_string(),
            });
        }
        if self.module.get_function_id(id).is_some() {
            return Err(CompileError::unsupported(
                format!("function `{}` used as a value", id),
                span,
            ));
        }
        Err(CompileError::UnknownName {
            name: id.to_string(),
            span,
        })
    }

    fn lower_container(
        &mut self,
        kind: ContainerKind,
        elts: &[Expr],
        prelude: &mut Vec<Instr>,
    ) -> CompileResult<Value> {
        let items = self.lower_args(elts, prelude)?;
        let elem = uniform_type(items.iter().map(Value::ty));
        let temp = self.fresh_temp(ResolvedType::Container {
            kind,
            elem: elem.map(Box::new),
        });
        prelude.push(Instr::ContainerNew {
            result: temp.clone(),
            kind,
            items,
        });
        Ok(Value::Temp(temp))
    }

    fn lower_args(&mut self, args: &[Expr], prelude: &mut Vec<Instr>) -> CompileResult<Vec<Value>> {
        args.iter().map(|arg| self.lower_expr(arg, prelude)).collect()
    }

    // ========================================================================
    // Short-circuit and conditional expressions
    // ========================================================================

    fn lower_bool_op(
        &mut self,
        op: BoolOp,
        values: &[Expr],
        span: Span,
        prelude: &mut Vec<Instr>,
    ) -> CompileResult<Value> {
        let (first, rest) = values
            .split_first()
            .ok_or_else(|| CompileError::unsupported("empty boolean operation", span))?;
        let first = self.lower_expr(first, prelude)?;

        // Later operands only run when reached, so each keeps its own prelude
        let mut branches = Vec::with_capacity(rest.len());
        for expr in rest {
            let (value, own) = self.build_expr(expr)?;
            branches.push(Branch {
                prelude: own,
                value,
            });
        }

        let ty = uniform_type(
            std::iter::once(first.ty()).chain(branches.iter().map(|b| b.value.ty())),
        )
        .unwrap_or(ResolvedType::Object);

        if branches.iter().all(|b| b.prelude.is_empty()) {
            let mut values = vec![first];
            values.extend(branches.into_iter().map(|b| b.value));
            return Ok(Value::BoolOp { op, values, ty });
        }

        let result = self.fresh_temp(ty);
        prelude.push(Instr::ShortCircuit {
            result: result.clone(),
            op,
            first,
            rest: branches,
        });
        Ok(Value::Temp(result))
    }

    fn lower_if_exp(
        &mut self,
        test: &Expr,
        body: &Expr,
        orelse: &Expr,
        prelude: &mut Vec<Instr>,
    ) -> CompileResult<Value> {
        let test = self.lower_expr(test, prelude)?;
        let (body_value, body_prelude) = self.build_expr(body)?;
        let (else_value, else_prelude) = self.build_expr(orelse)?;
        let ty = uniform_type([body_value.ty(), else_value.ty()].into_iter())
            .unwrap_or(ResolvedType::Object);

        if body_prelude.is_empty() && else_prelude.is_empty() {
            return Ok(Value::Select {
                test: Box::new(test),
                body: Box::new(body_value),
                orelse: Box::new(else_value),
                ty,
            });
        }

        let result = self.fresh_temp(ty);
        prelude.push(Instr::Select {
            result: result.clone(),
            test,
            body: Branch {
                prelude: body_prelude,
                value: body_value,
            },
            orelse: Branch {
                prelude: else_prelude,
                value: else_value,
            },
        });
        Ok(Value::Temp(result))
    }

    // ========================================================================
    // Comparisons
    // ========================================================================

    fn lower_compare(
        &mut self,
        left: &Expr,
        ops: &[CmpOp],
        comparators: &[Expr],
        span: Span,
        prelude: &mut Vec<Instr>,
    ) -> CompileResult<Value> {
        if ops.is_empty() || ops.len() != comparators.len() {
            return Err(CompileError::unsupported("malformed comparison", span));
        }
        let left = self.lower_expr(left, prelude)?;

        // Every operand is evaluated up front, left to right
        let mut comparisons = Vec::with_capacity(ops.len());
        let mut previous = left.effective_ty();
        for (op, expr) in ops.iter().zip(comparators) {
            let right = self.lower_expr(expr, prelude)?;
            let right_ty = right.effective_ty();
            let path = if op.is_ordering() && previous.is_numeric() && right_ty.is_numeric() {
                ArithPath::Native
            } else {
                ArithPath::Generic
            };
            trace!("comparison `{}` takes the {:?} path", op.symbol(), path);
            previous = right_ty;
            comparisons.push(Comparison {
                op: *op,
                right,
                path,
            });
        }
        Ok(Value::Compare {
            left: Box::new(left),
            comparisons,
        })
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    fn lower_attribute(
        &mut self,
        value: &Expr,
        attr: &str,
        span: Span,
        prelude: &mut Vec<Instr>,
    ) -> CompileResult<Value> {
        if let Some(constant) = self.binding_constant(value, attr, span)? {
            return Ok(Value::Const(Const::Int(constant)));
        }

        let object = self.lower_expr(value, prelude)?;
        let Some(class) = self.compiled_class(&object.ty()) else {
            let temp = self.fresh_temp(ResolvedType::Object);
            prelude.push(Instr::LoadAttr {
                result: Some(temp.clone()),
                object,
                attr: attr.to_string(),
            });
            return Ok(Value::Temp(temp));
        };

        if let Some(field) = self.module.find_field(class, attr) {
            let ty = self.module.field(field).ty.clone();
            return Ok(Value::FieldRead {
                object: Box::new(object),
                field,
                ty,
            });
        }

        match self.module.find_method(class, attr) {
            Some(method) if self.module.method(method).flags.kind == MethodKind::Getter => {
                let ret = self.module.method(method).ret().clone();
                let temp = self.fresh_temp(ret);
                prelude.push(Instr::MethodCall {
                    result: Some(temp.clone()),
                    receiver: object,
                    class,
                    method,
                    via: CallVia::Exact,
                    args: Vec::new(),
                });
                Ok(Value::Temp(temp))
            }
            Some(_) => Err(CompileError::unsupported(
                format!("bound method `{}` used as a value", attr),
                span,
            )),
            None => Err(CompileError::UndeclaredField {
                class: self.module.class(class).name.clone(),
                field: attr.to_string(),
                span,
            }),
        }
    }

    /// `lib.CONST` or `lib.Enum.MEMBER` of an imported binding library
    fn binding_constant(&self, value: &Expr, attr: &str, span: Span) -> CompileResult<Option<i64>> {
        match value {
            Expr::Name { id, .. } if !self.scope.contains_key(id) => {
                let Some(&index) = self.imports.get(id) else {
                    return Ok(None);
                };
                let lib = &self.bindings[index];
                if let Some(constant) = lib.constant(attr) {
                    return Ok(Some(constant));
                }
                if lib.function(attr).is_some() {
                    return Err(CompileError::unsupported(
                        format!("binding function `{}.{}` used as a value", id, attr),
                        span,
                    ));
                }
                Err(CompileError::UnknownName {
                    name: format!("{}.{}", id, attr),
                    span,
                })
            }
            Expr::Attribute {
                value: inner,
                attr: enum_name,
                ..
            } => match inner.as_ref() {
                Expr::Name { id, .. } if !self.scope.contains_key(id) => {
                    let Some(&index) = self.imports.get(id) else {
                        return Ok(None);
                    };
                    let lib = &self.bindings[index];
                    lib.enum_member(enum_name, attr)
                        .map(Some)
                        .ok_or_else(|| CompileError::UnknownName {
                            name: format!("{}.{}.{}", id, enum_name, attr),
                            span,
                        })
                }
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn lower_call(
        &mut self,
        func: &Expr,
        args: &[Expr],
        keywords: &[Keyword],
        span: Span,
        prelude: &mut Vec<Instr>,
    ) -> CompileResult<Value> {
        if let Some(keyword) = keywords.first() {
            return Err(CompileError::unsupported(
                format!("keyword argument `{}` in call", keyword.arg),
                span,
            ));
        }
        match func {
            Expr::Name { id, .. } if !self.scope.contains_key(id) => {
                self.lower_named_call(id, args, span, prelude)
            }
            Expr::Attribute {
                value: receiver,
                attr,
                ..
            } => self.lower_method_call(receiver, attr, args, span, prelude),
            callee => {
                let callee = self.lower_expr(callee, prelude)?;
                let args = self.lower_args(args, prelude)?;
                self.emit_call(prelude, ResolvedType::Object, |result| Instr::CallObject {
                    result,
                    callee,
                    args,
                })
            }
        }
    }

    /// Append a call producing `ret`; `None` results get no temporary
    fn emit_call(
        &mut self,
        prelude: &mut Vec<Instr>,
        ret: ResolvedType,
        build: impl FnOnce(Option<Temp>) -> Instr,
    ) -> CompileResult<Value> {
        if ret == ResolvedType::None {
            prelude.push(build(None));
            return Ok(Value::Const(Const::None));
        }
        let temp = self.fresh_temp(ret);
        prelude.push(build(Some(temp.clone())));
        Ok(Value::Temp(temp))
    }

    fn lower_named_call(
        &mut self,
        name: &str,
        args: &[Expr],
        span: Span,
        prelude: &mut Vec<Instr>,
    ) -> CompileResult<Value> {
        if let Some(id) = self.module.get_function_id(name) {
            let func = self
                .module
                .get_function(id)
                .ok_or_else(|| CompileError::internal("function vanished"))?;
            check_arity(name, func.params.len(), func.params.len(), args.len(), span)?;
            let ret = func.ret.clone();
            let args = self.lower_args(args, prelude)?;
            return self.emit_call(prelude, ret, |result| Instr::Call {
                result,
                func: id,
                args,
            });
        }

        if let Some(class) = self.module.get_class_id(name) {
            let (min, max) = self.constructor_arity(class);
            check_arity(name, min, max, args.len(), span)?;
            let args = self.lower_args(args, prelude)?;
            return self.emit_call(prelude, ResolvedType::Class(name.to_string()), |result| {
                Instr::New {
                    result,
                    class,
                    args,
                }
            });
        }

        if name == "range" {
            return Err(CompileError::unsupported("range() outside a for loop", span));
        }
        if name == "super" {
            return Err(CompileError::unsupported(
                "super() other than as a method call receiver",
                span,
            ));
        }

        if let Some(builtin) = Builtin::from_name(name) {
            let args = self.lower_args(args, prelude)?;
            let ret = builtin_result(builtin, &args, span)?;
            return self.emit_call(prelude, ret, |result| Instr::RuntimeCall {
                result,
                func: builtin,
                args,
            });
        }

        if super::stmt::is_builtin_exception(name) {
            return Err(CompileError::unsupported(
                format!("`{}` constructed outside a raise statement", name),
                span,
            ));
        }
        Err(CompileError::UnknownName {
            name: name.to_string(),
            span,
        })
    }

    /// Accepted positional argument counts of a class constructor
    fn constructor_arity(&self, class: ClassId) -> (usize, usize) {
        match self.module.constructor(class) {
            Constructor::Init(init) => {
                let n = self.module.method(init).params().len();
                (n, n)
            }
            Constructor::Dataclass(dataclass) => {
                let fields = self.module.all_fields(dataclass);
                let required = fields
                    .iter()
                    .filter(|f| self.module.field(**f).default.is_none())
                    .count();
                (required, fields.len())
            }
            Constructor::Default => (0, 0),
        }
    }

    fn lower_method_call(
        &mut self,
        receiver: &Expr,
        attr: &str,
        args: &[Expr],
        span: Span,
        prelude: &mut Vec<Instr>,
    ) -> CompileResult<Value> {
        // super().m(...)
        if let Expr::Call {
            func,
            args: super_args,
            ..
        } = receiver
        {
            if matches!(func.as_ref(), Expr::Name { id, .. } if id == "super") {
                if !super_args.is_empty() {
                    return Err(CompileError::unsupported("super() with arguments", span));
                }
                return self.lower_super_call(attr, args, span, prelude);
            }
        }

        if let Expr::Name { id, .. } = receiver {
            if !self.scope.contains_key(id) && !self.is_self(id) {
                // lib.function(...)
                if let Some(&index) = self.imports.get(id) {
                    return self.lower_extern_call(index, id, attr, args, span, prelude);
                }
                // Class.static_method(...)
                if let Some(class) = self.module.get_class_id(id) {
                    let cls = Value::ClassRef {
                        class,
                        name: id.to_string(),
                    };
                    return self.lower_class_call(class, cls, attr, args, span, prelude);
                }
            }
        }

        let object = self.lower_expr(receiver, prelude)?;
        let object_ty = object.ty();

        if let ResolvedType::ClassObject(name) = &object_ty {
            if let Some(class) = self.module.get_class_id(name) {
                return self.lower_class_call(class, object, attr, args, span, prelude);
            }
        }

        if let Some(class) = self.compiled_class(&object_ty) {
            let Some(method) = self.module.find_method(class, attr) else {
                if let Some(field) = self.module.find_field(class, attr) {
                    // A field holding a callable
                    let ty = self.module.field(field).ty.clone();
                    let callee = Value::FieldRead {
                        object: Box::new(object),
                        field,
                        ty,
                    };
                    let args = self.lower_args(args, prelude)?;
                    return self.emit_call(prelude, ResolvedType::Object, |result| {
                        Instr::CallObject {
                            result,
                            callee,
                            args,
                        }
                    });
                }
                return Err(CompileError::UnknownName {
                    name: format!("{}.{}", self.module.class(class).name, attr),
                    span,
                });
            };
            return self.lower_bound_call(
                object,
                class,
                method,
                CallVia::Dispatch,
                args,
                span,
                prelude,
            );
        }

        if attr == "append" && args.len() == 1 {
            if let ResolvedType::Container {
                kind: ContainerKind::List,
                ..
            } = object_ty
            {
                let args = vec![object, self.lower_expr(&args[0], prelude)?];
                prelude.push(Instr::RuntimeCall {
                    result: None,
                    func: Builtin::ListAppend,
                    args,
                });
                return Ok(Value::Const(Const::None));
            }
        }

        let args = self.lower_args(args, prelude)?;
        let temp = self.fresh_temp(ResolvedType::Object);
        prelude.push(Instr::DynamicCall {
            result: Some(temp.clone()),
            receiver: object,
            method: attr.to_string(),
            args,
        });
        Ok(Value::Temp(temp))
    }

    /// Call of `method` found on the static class of `object`
    #[allow(clippy::too_many_arguments)]
    fn lower_bound_call(
        &mut self,
        object: Value,
        class: ClassId,
        method: MethodRef,
        via: CallVia,
        args: &[Expr],
        span: Span,
        prelude: &mut Vec<Instr>,
    ) -> CompileResult<Value> {
        let ir = self.module.method(method);
        let qualified = format!("{}.{}", self.module.class(method.class).name, ir.name);
        let kind = ir.flags.kind;
        let ret = ir.ret().clone();
        let arity = ir.params().len();

        match kind {
            MethodKind::Getter | MethodKind::Setter => Err(CompileError::unsupported(
                format!("call of property `{}`", qualified),
                span,
            )),
            MethodKind::Instance => {
                check_arity(&qualified, arity, arity, args.len(), span)?;
                let args = self.lower_args(args, prelude)?;
                self.emit_call(prelude, ret, |result| Instr::MethodCall {
                    result,
                    receiver: object,
                    class,
                    method,
                    via,
                    args,
                })
            }
            MethodKind::Static => {
                check_arity(&qualified, arity, arity, args.len(), span)?;
                let args = self.lower_args(args, prelude)?;
                self.emit_call(prelude, ret, |result| Instr::StaticCall {
                    result,
                    method,
                    args,
                })
            }
            MethodKind::ClassMethod => {
                check_arity(&qualified, arity, arity, args.len(), span)?;
                let name = self.module.class(class).name.clone();
                let args = self.lower_args(args, prelude)?;
                self.emit_call(prelude, ret, |result| Instr::ClassMethodCall {
                    result,
                    cls: Value::ClassRef { class, name },
                    method,
                    args,
                })
            }
        }
    }

    /// `Class.m(...)` or `cls.m(...)`
    fn lower_class_call(
        &mut self,
        class: ClassId,
        cls: Value,
        attr: &str,
        args: &[Expr],
        span: Span,
        prelude: &mut Vec<Instr>,
    ) -> CompileResult<Value> {
        let method = self
            .module
            .find_method(class, attr)
            .ok_or_else(|| CompileError::UnknownName {
                name: format!("{}.{}", self.module.class(class).name, attr),
                span,
            })?;
        let ir = self.module.method(method);
        let qualified = format!("{}.{}", self.module.class(method.class).name, ir.name);
        let kind = ir.flags.kind;
        let arity = ir.params().len();
        let ret = ir.ret().clone();

        match kind {
            MethodKind::Static => {
                check_arity(&qualified, arity, arity, args.len(), span)?;
                let args = self.lower_args(args, prelude)?;
                self.emit_call(prelude, ret, |result| Instr::StaticCall {
                    result,
                    method,
                    args,
                })
            }
            MethodKind::ClassMethod => {
                check_arity(&qualified, arity, arity, args.len(), span)?;
                let args = self.lower_args(args, prelude)?;
                self.emit_call(prelude, ret, |result| Instr::ClassMethodCall {
                    result,
                    cls,
                    method,
                    args,
                })
            }
            MethodKind::Instance => {
                // Class.m(obj, ...) names the implementation explicitly
                let (first, rest) = args.split_first().ok_or_else(|| CompileError::Arity {
                    callee: qualified.clone(),
                    expected: arity + 1,
                    found: 0,
                    span,
                })?;
                check_arity(&qualified, arity, arity, rest.len(), span)?;
                let object = self.lower_expr(first, prelude)?;
                let args = self.lower_args(rest, prelude)?;
                self.emit_call(prelude, ret, |result| Instr::MethodCall {
                    result,
                    receiver: object,
                    class,
                    method,
                    via: CallVia::Exact,
                    args,
                })
            }
            MethodKind::Getter | MethodKind::Setter => Err(CompileError::unsupported(
                format!("call of property `{}`", qualified),
                span,
            )),
        }
    }

    fn lower_super_call(
        &mut self,
        attr: &str,
        args: &[Expr],
        span: Span,
        prelude: &mut Vec<Instr>,
    ) -> CompileResult<Value> {
        let class = self
            .self_class()
            .ok_or_else(|| CompileError::unsupported("super() outside an instance method", span))?;
        let base = self
            .module
            .class(class)
            .base
            .ok_or_else(|| CompileError::unsupported("super() in a class without a base", span))?;
        let receiver = Value::SelfRef {
            class,
            name: self.module.class(class).name.clone(),
        };

        match self.module.find_method(base, attr) {
            Some(method) => {
                self.lower_bound_call(receiver, base, method, CallVia::Exact, args, span, prelude)
            }
            // object.__init__ takes no arguments and does nothing
            None if attr == "__init__" && args.is_empty() => Ok(Value::Const(Const::None)),
            None => Err(CompileError::UnknownName {
                name: format!("super().{}", attr),
                span,
            }),
        }
    }

    fn lower_extern_call(
        &mut self,
        library: usize,
        alias: &str,
        attr: &str,
        args: &[Expr],
        span: Span,
        prelude: &mut Vec<Instr>,
    ) -> CompileResult<Value> {
        let lib = &self.bindings[library];
        let function = lib
            .function(attr)
            .cloned()
            .ok_or_else(|| CompileError::UnknownName {
                name: format!("{}.{}", alias, attr),
                span,
            })?;
        let library_name = lib.name.clone();
        let callee = format!("{}.{}", alias, attr);
        check_arity(
            &callee,
            function.params.len(),
            function.params.len(),
            args.len(),
            span,
        )?;
        self.module.add_extern(&function);
        let args = self.lower_args(args, prelude)?;
        let ret = ctype_result(function.ret);
        self.emit_call(prelude, ret, |result| Instr::ExternCall {
            result,
            library: library_name,
            function,
            args,
        })
    }
}

// ============================================================================
// Typing helpers
// ============================================================================

fn constant(value: &Constant) -> Const {
    match value {
        Constant::Int(v) => Const::Int(*v),
        Constant::Float(v) => Const::Float(*v),
        Constant::Bool(v) => Const::Bool(*v),
        Constant::Str(v) => Const::Str(v.clone()),
        Constant::None => Const::None,
    }
}

/// Common type of a sequence of values, if there is exactly one
fn uniform_type(mut types: impl Iterator<Item = ResolvedType>) -> Option<ResolvedType> {
    let first = types.next()?;
    types.all(|t| t == first).then_some(first)
}

/// Numeric promotion: bool behaves as int, any float makes a float
fn promote(left: &ResolvedType, right: &ResolvedType) -> ResolvedType {
    if *left == ResolvedType::Float || *right == ResolvedType::Float {
        ResolvedType::Float
    } else {
        ResolvedType::Int
    }
}

/// Type and arithmetic path of a binary operation
///
/// Operand provenance decides the path: an element read out of a typed
/// container counts as its element type even though it is held boxed.
pub(crate) fn binary(op: BinOp, left: Value, right: Value) -> Value {
    let lt = left.effective_ty();
    let rt = right.effective_ty();
    let (ty, path) = if lt.is_numeric() && rt.is_numeric() {
        let promoted = promote(&lt, &rt);
        match op {
            BinOp::Div => (ResolvedType::Float, ArithPath::Native),
            BinOp::Pow => (promoted, ArithPath::Generic),
            op if op.is_bitwise() && promoted == ResolvedType::Float => {
                (ResolvedType::Object, ArithPath::Generic)
            }
            _ => (promoted, ArithPath::Native),
        }
    } else if lt == ResolvedType::Str && rt == ResolvedType::Str && op == BinOp::Add {
        (ResolvedType::Str, ArithPath::Generic)
    } else if matches!(lt, ResolvedType::Container { .. }) && lt == rt && op == BinOp::Add {
        (lt.clone(), ArithPath::Generic)
    } else {
        (ResolvedType::Object, ArithPath::Generic)
    };
    trace!("`{}` on {} and {} takes the {:?} path", op.symbol(), lt, rt, path);
    Value::BinOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
        ty,
        path,
    }
}

fn unary(op: UnaryOp, operand: Value) -> Value {
    let ty = operand.effective_ty();
    let (ty, path) = match op {
        UnaryOp::Not => (ResolvedType::Bool, ArithPath::Native),
        UnaryOp::Neg | UnaryOp::Pos if ty.is_numeric() => {
            (promote(&ty, &ResolvedType::Int), ArithPath::Native)
        }
        UnaryOp::Invert if ty == ResolvedType::Int || ty == ResolvedType::Bool => {
            (ResolvedType::Int, ArithPath::Native)
        }
        _ => (ResolvedType::Object, ArithPath::Generic),
    };
    Value::UnaryOp {
        op,
        operand: Box::new(operand),
        ty,
        path,
    }
}

fn check_arity(
    callee: &str,
    min: usize,
    max: usize,
    found: usize,
    span: Span,
) -> CompileResult<()> {
    if found < min || found > max {
        return Err(CompileError::Arity {
            callee: callee.to_string(),
            expected: if found < min { min } else { max },
            found,
            span,
        });
    }
    Ok(())
}

fn builtin_result(builtin: Builtin, args: &[Value], span: Span) -> CompileResult<ResolvedType> {
    let name = builtin.name();
    let ty = match builtin {
        Builtin::Print => ResolvedType::None,
        Builtin::Len => {
            check_arity(name, 1, 1, args.len(), span)?;
            ResolvedType::Int
        }
        Builtin::Abs => {
            check_arity(name, 1, 1, args.len(), span)?;
            let ty = args[0].effective_ty();
            if ty.is_numeric() {
                promote(&ty, &ResolvedType::Int)
            } else {
                ResolvedType::Object
            }
        }
        Builtin::Int => {
            check_arity(name, 0, 1, args.len(), span)?;
            ResolvedType::Int
        }
        Builtin::Float => {
            check_arity(name, 0, 1, args.len(), span)?;
            ResolvedType::Float
        }
        Builtin::Str => {
            check_arity(name, 0, 1, args.len(), span)?;
            ResolvedType::Str
        }
        Builtin::Bool => {
            check_arity(name, 0, 1, args.len(), span)?;
            ResolvedType::Bool
        }
        Builtin::Min | Builtin::Max => {
            check_arity(name, 1, usize::MAX, args.len(), span)?;
            if args.len() == 1 {
                args[0]
                    .ty()
                    .element()
                    .cloned()
                    .unwrap_or(ResolvedType::Object)
            } else {
                uniform_type(args.iter().map(Value::effective_ty))
                    .filter(ResolvedType::is_numeric)
                    .unwrap_or(ResolvedType::Object)
            }
        }
        Builtin::ListAppend => ResolvedType::None,
    };
    Ok(ty)
}

/// Compiled-side type of a binding function's return value
fn ctype_result(ret: CType) -> ResolvedType {
    match ret {
        CType::Int | CType::Uint => ResolvedType::Int,
        CType::Float | CType::Double => ResolvedType::Float,
        CType::Bool => ResolvedType::Bool,
        CType::Str => ResolvedType::Str,
        CType::Ptr => ResolvedType::Object,
        CType::Void => ResolvedType::None,
    }
}

/// Constant step of a `range()` call (`range(a, b, -1)`)
pub(super) fn constant_step(expr: &Expr) -> Option<i64> {
    match const_value(expr)? {
        Const::Int(step) => Some(step),
        _ => None,
    }
}
