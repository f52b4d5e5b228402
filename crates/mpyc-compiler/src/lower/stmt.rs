//! Statement Lowering
//!
//! Converts AST statements to IR statements, attaching to each the prelude
//! of its controlling expression.

use super::expr::{binary, constant_step};
use super::Lowerer;
use crate::ast::{self, BinOp, Constant, ExceptHandler, Expr, Span};
use crate::error::{CompileError, CompileResult};
use crate::ir::{CallVia, Const, Handler, Instr, MethodKind, Origin, RaiseKind, Stmt, Value};
use crate::oracle::strip_qualification;
use crate::oracle::ResolvedType;

/// Built-in exception classes the runtime provides as `mp_type_<Name>`
const BUILTIN_EXCEPTIONS: &[&str] = &[
    "BaseException",
    "Exception",
    "ArithmeticError",
    "AssertionError",
    "AttributeError",
    "EOFError",
    "ImportError",
    "IndexError",
    "KeyError",
    "KeyboardInterrupt",
    "LookupError",
    "MemoryError",
    "NameError",
    "NotImplementedError",
    "OSError",
    "OverflowError",
    "RuntimeError",
    "StopIteration",
    "SyntaxError",
    "SystemExit",
    "TypeError",
    "ValueError",
    "ZeroDivisionError",
];

pub(super) fn is_builtin_exception(name: &str) -> bool {
    BUILTIN_EXCEPTIONS.contains(&name)
}

impl<'a> Lowerer<'a> {
    pub(super) fn lower_block(&mut self, body: &[ast::Stmt]) -> CompileResult<Vec<Stmt>> {
        let mut out = Vec::with_capacity(body.len());
        for stmt in body {
            self.lower_stmt(stmt, &mut out)?;
        }
        Ok(out)
    }

    /// Lower a statement
    fn lower_stmt(&mut self, stmt: &ast::Stmt, out: &mut Vec<Stmt>) -> CompileResult<()> {
        match stmt {
            ast::Stmt::Expr { value, .. } => self.lower_expr_stmt(value, out),
            ast::Stmt::Assign {
                target,
                value,
                span,
            } => self.lower_assign(target, value, None, *span, out),
            ast::Stmt::AnnAssign {
                target,
                annotation,
                value,
                span,
            } => match value {
                Some(value) => self.lower_assign(target, value, Some(annotation), *span, out),
                None => self.declare_annotated(target, annotation, *span),
            },
            ast::Stmt::AugAssign {
                target,
                op,
                value,
                span,
            } => self.lower_aug_assign(target, *op, value, *span, out),
            ast::Stmt::Return { value, span } => self.lower_return(value.as_ref(), *span, out),
            ast::Stmt::If {
                test, body, orelse, ..
            } => {
                let (test, prelude) = self.build_expr(test)?;
                let body = self.lower_block(body)?;
                let orelse = self.lower_block(orelse)?;
                out.push(Stmt::If {
                    prelude,
                    test,
                    body,
                    orelse,
                });
                Ok(())
            }
            ast::Stmt::While { test, body, .. } => {
                let (test, prelude) = self.build_expr(test)?;
                let body = self.lower_loop_body(body)?;
                out.push(Stmt::While {
                    prelude,
                    test,
                    body,
                });
                Ok(())
            }
            ast::Stmt::For {
                target,
                iter,
                body,
                span,
            } => self.lower_for(target, iter, body, *span, out),
            ast::Stmt::Break { span } => {
                self.check_loop_exit("break", *span)?;
                out.push(Stmt::Break);
                Ok(())
            }
            ast::Stmt::Continue { span } => {
                self.check_loop_exit("continue", *span)?;
                out.push(Stmt::Continue);
                Ok(())
            }
            ast::Stmt::Pass { .. } => Ok(()),
            ast::Stmt::Raise { exc, span } => self.lower_raise(exc.as_ref(), *span, out),
            ast::Stmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
                span,
            } => self.lower_try(body, handlers, orelse, finalbody, *span, out),
            ast::Stmt::FunctionDef(def) => Err(CompileError::unsupported(
                format!("nested function definition `{}`", def.name),
                def.span,
            )),
            ast::Stmt::ClassDef(def) => Err(CompileError::unsupported(
                format!("nested class definition `{}`", def.name),
                def.span,
            )),
            ast::Stmt::Import { span, .. } | ast::Stmt::ImportFrom { span, .. } => Err(
                CompileError::unsupported("import inside a function", *span),
            ),
            ast::Stmt::With { span } => Err(CompileError::unsupported("with statement", *span)),
            ast::Stmt::Global { span } => {
                Err(CompileError::unsupported("global statement", *span))
            }
            ast::Stmt::Nonlocal { span } => {
                Err(CompileError::unsupported("nonlocal statement", *span))
            }
            ast::Stmt::Delete { span, .. } => {
                Err(CompileError::unsupported("del statement", *span))
            }
            ast::Stmt::AsyncFunctionDef { span, .. } => {
                Err(CompileError::unsupported("async function definition", *span))
            }
        }
    }

    fn lower_expr_stmt(&mut self, value: &Expr, out: &mut Vec<Stmt>) -> CompileResult<()> {
        // Docstrings and other bare string literals
        if let Expr::Constant {
            value: Constant::Str(_),
            ..
        } = value
        {
            return Ok(());
        }

        let (value, mut prelude) = self.build_expr(value)?;
        // The result of a call statement is never read
        let value = match value {
            Value::Temp(temp)
                if prelude
                    .last()
                    .and_then(Instr::result)
                    .is_some_and(|r| r.id == temp.id) =>
            {
                if prelude.last_mut().is_some_and(|last| last.discard_result()) {
                    None
                } else {
                    Some(Value::Temp(temp))
                }
            }
            Value::Const(_) => None,
            other => Some(other),
        };
        out.push(Stmt::Eval { prelude, value });
        Ok(())
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    fn declare_annotated(
        &mut self,
        target: &Expr,
        annotation: &str,
        span: Span,
    ) -> CompileResult<()> {
        match target {
            Expr::Name { id, .. } => {
                let ty = ResolvedType::parse(annotation)?;
                self.local_for_assign(id, &ty);
                Ok(())
            }
            _ => Err(CompileError::unsupported(
                "annotation without value on a non-name target",
                span,
            )),
        }
    }

    fn lower_assign(
        &mut self,
        target: &Expr,
        value: &Expr,
        annotation: Option<&String>,
        span: Span,
        out: &mut Vec<Stmt>,
    ) -> CompileResult<()> {
        // The right-hand side is evaluated before the target's subexpressions
        let (value, mut prelude) = self.build_expr(value)?;

        match target {
            Expr::Name { id, span } => {
                if self.is_self(id) || self.receiver_name.as_deref() == Some(id.as_str()) {
                    return Err(CompileError::unsupported(
                        format!("assignment to receiver `{}`", id),
                        *span,
                    ));
                }
                if let Some(annotation) = annotation {
                    if !self.scope.contains_key(id) && !self.local_types.contains_key(id) {
                        let ty = ResolvedType::parse(annotation)?;
                        self.local_for_assign(id, &ty);
                    }
                }
                let target = self.local_for_assign(id, &value.ty());
                out.push(Stmt::Assign {
                    prelude,
                    target,
                    value,
                });
            }
            Expr::Attribute {
                value: object,
                attr,
                span,
            } => {
                let object = self.lower_expr(object, &mut prelude)?;
                self.store_attribute(object, attr, value, *span, &mut prelude)?;
                out.push(Stmt::Eval {
                    prelude,
                    value: None,
                });
            }
            Expr::Subscript {
                value: container,
                index,
                ..
            } => {
                let container = self.lower_expr(container, &mut prelude)?;
                let index = self.lower_expr(index, &mut prelude)?;
                prelude.push(Instr::SetItem {
                    container,
                    index,
                    value,
                });
                out.push(Stmt::Eval {
                    prelude,
                    value: None,
                });
            }
            Expr::Tuple { span, .. } | Expr::List { span, .. } => {
                return Err(CompileError::unsupported("tuple unpacking", *span))
            }
            _ => return Err(CompileError::unsupported("assignment target", span)),
        }
        Ok(())
    }

    /// Append the store of `value` into `object.attr`
    fn store_attribute(
        &mut self,
        object: Value,
        attr: &str,
        value: Value,
        span: Span,
        prelude: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        let Some(class) = self.compiled_class(&object.ty()) else {
            prelude.push(Instr::StoreAttr {
                object,
                attr: attr.to_string(),
                value,
            });
            return Ok(());
        };

        if let Some(field) = self.module.find_field(class, attr) {
            prelude.push(Instr::FieldWrite {
                object,
                field,
                value,
            });
            return Ok(());
        }

        if let Some(setter) = self.module.find_setter(class, attr) {
            prelude.push(Instr::MethodCall {
                result: None,
                receiver: object,
                class,
                method: setter,
                via: CallVia::Exact,
                args: vec![value],
            });
            return Ok(());
        }

        let class_name = self.module.class(class).name.clone();
        match self.module.find_method(class, attr) {
            Some(method) if self.module.method(method).flags.kind == MethodKind::Getter => Err(
                CompileError::unsupported(
                    format!("assignment to read-only property `{}.{}`", class_name, attr),
                    span,
                ),
            ),
            _ => Err(CompileError::UndeclaredField {
                class: class_name,
                field: attr.to_string(),
                span,
            }),
        }
    }

    fn lower_aug_assign(
        &mut self,
        target: &Expr,
        op: BinOp,
        value: &Expr,
        span: Span,
        out: &mut Vec<Stmt>,
    ) -> CompileResult<()> {
        let mut prelude = Vec::new();
        match target {
            Expr::Name { id, span } => {
                let current = match self.scope.get(id) {
                    Some(local) => Value::Name(local.clone()),
                    None => {
                        return Err(CompileError::UnknownName {
                            name: id.clone(),
                            span: *span,
                        })
                    }
                };
                let rhs = self.lower_expr(value, &mut prelude)?;
                let target = self.local_for_assign(id, &current.ty());
                out.push(Stmt::Assign {
                    prelude,
                    target,
                    value: binary(op, current, rhs),
                });
            }
            Expr::Attribute {
                value: object,
                attr,
                span,
            } => {
                // The object is evaluated once and read back as a pure value
                let object = self.lower_expr(object, &mut prelude)?;
                let current = self.load_attribute(&object, attr, *span, &mut prelude)?;
                let rhs = self.lower_expr(value, &mut prelude)?;
                self.store_attribute(object, attr, binary(op, current, rhs), *span, &mut prelude)?;
                out.push(Stmt::Eval {
                    prelude,
                    value: None,
                });
            }
            Expr::Subscript {
                value: container,
                index,
                ..
            } => {
                let container = self.lower_expr(container, &mut prelude)?;
                let index = self.lower_expr(index, &mut prelude)?;
                let elem = container.ty().element().cloned();
                let temp = match elem {
                    Some(elem) => self.fresh_temp_with(ResolvedType::Object, Origin::Element(elem)),
                    None => self.fresh_temp(ResolvedType::Object),
                };
                prelude.push(Instr::GetItem {
                    result: Some(temp.clone()),
                    container: container.clone(),
                    index: index.clone(),
                });
                let rhs = self.lower_expr(value, &mut prelude)?;
                prelude.push(Instr::SetItem {
                    container,
                    index,
                    value: binary(op, Value::Temp(temp), rhs),
                });
                out.push(Stmt::Eval {
                    prelude,
                    value: None,
                });
            }
            _ => return Err(CompileError::unsupported("augmented assignment target", span)),
        }
        Ok(())
    }

    /// Read `object.attr` for a read-modify-write
    fn load_attribute(
        &mut self,
        object: &Value,
        attr: &str,
        span: Span,
        prelude: &mut Vec<Instr>,
    ) -> CompileResult<Value> {
        let Some(class) = self.compiled_class(&object.ty()) else {
            let temp = self.fresh_temp(ResolvedType::Object);
            prelude.push(Instr::LoadAttr {
                result: Some(temp.clone()),
                object: object.clone(),
                attr: attr.to_string(),
            });
            return Ok(Value::Temp(temp));
        };
        if let Some(field) = self.module.find_field(class, attr) {
            return Ok(Value::FieldRead {
                object: Box::new(object.clone()),
                field,
                ty: self.module.field(field).ty.clone(),
            });
        }
        match self.module.find_method(class, attr) {
            Some(getter) if self.module.method(getter).flags.kind == MethodKind::Getter => {
                let temp = self.fresh_temp(self.module.method(getter).ret().clone());
                prelude.push(Instr::MethodCall {
                    result: Some(temp.clone()),
                    receiver: object.clone(),
                    class,
                    method: getter,
                    via: CallVia::Exact,
                    args: Vec::new(),
                });
                Ok(Value::Temp(temp))
            }
            _ => Err(CompileError::UndeclaredField {
                class: self.module.class(class).name.clone(),
                field: attr.to_string(),
                span,
            }),
        }
    }

    // ========================================================================
    // Control flow
    // ========================================================================

    fn lower_return(
        &mut self,
        value: Option<&Expr>,
        span: Span,
        out: &mut Vec<Stmt>,
    ) -> CompileResult<()> {
        if self.finally_depth > 0 {
            return Err(CompileError::unsupported(
                "return inside a try block with finally",
                span,
            ));
        }
        let Some(expr) = value else {
            out.push(Stmt::Return {
                prelude: Vec::new(),
                value: None,
            });
            return Ok(());
        };
        let (value, prelude) = self.build_expr(expr)?;
        let value = if value.is_none_const() { None } else { Some(value) };
        out.push(Stmt::Return { prelude, value });
        Ok(())
    }

    fn lower_loop_body(&mut self, body: &[ast::Stmt]) -> CompileResult<Vec<Stmt>> {
        self.loop_stack.push(self.try_depth);
        let lowered = self.lower_block(body);
        self.loop_stack.pop();
        lowered
    }

    fn check_loop_exit(&self, keyword: &str, span: Span) -> CompileResult<()> {
        match self.loop_stack.last() {
            None => Err(CompileError::unsupported(
                format!("`{}` outside a loop", keyword),
                span,
            )),
            Some(&depth) if depth != self.try_depth => Err(CompileError::unsupported(
                format!("`{}` out of a try block", keyword),
                span,
            )),
            Some(_) => Ok(()),
        }
    }

    fn lower_for(
        &mut self,
        target: &str,
        iter: &Expr,
        body: &[ast::Stmt],
        span: Span,
        out: &mut Vec<Stmt>,
    ) -> CompileResult<()> {
        if self.receiver_name.as_deref() == Some(target) {
            return Err(CompileError::unsupported(
                format!("loop variable shadows receiver `{}`", target),
                span,
            ));
        }

        if let Expr::Call {
            func, args, span, ..
        } = iter
        {
            let is_range = matches!(func.as_ref(), Expr::Name { id, .. }
                if id == "range" && !self.scope.contains_key(id));
            if is_range {
                return self.lower_for_range(target, args, body, *span, out);
            }
        }

        let (iterable, prelude) = self.build_expr(iter)?;
        let elem = iterable
            .ty()
            .element()
            .cloned()
            .unwrap_or(ResolvedType::Object);
        let var = self.local_for_assign(target, &elem);
        let body = self.lower_loop_body(body)?;
        out.push(Stmt::ForIter {
            prelude,
            var,
            iterable,
            body,
        });
        Ok(())
    }

    fn lower_for_range(
        &mut self,
        target: &str,
        args: &[Expr],
        body: &[ast::Stmt],
        span: Span,
        out: &mut Vec<Stmt>,
    ) -> CompileResult<()> {
        let mut prelude = Vec::new();
        let (start, stop, step) = match args {
            [stop] => (
                Value::Const(Const::Int(0)),
                self.lower_expr(stop, &mut prelude)?,
                1,
            ),
            [start, stop] => (
                self.lower_expr(start, &mut prelude)?,
                self.lower_expr(stop, &mut prelude)?,
                1,
            ),
            [start, stop, step] => {
                let step = constant_step(step).ok_or_else(|| {
                    CompileError::unsupported("range() with a non-constant step", span)
                })?;
                if step == 0 {
                    return Err(CompileError::unsupported("range() with a zero step", span));
                }
                (
                    self.lower_expr(start, &mut prelude)?,
                    self.lower_expr(stop, &mut prelude)?,
                    step,
                )
            }
            _ => {
                return Err(CompileError::Arity {
                    callee: "range".to_string(),
                    expected: 3,
                    found: args.len(),
                    span,
                })
            }
        };
        for bound in [&start, &stop] {
            if !bound.effective_ty().is_numeric() && bound.ty() != ResolvedType::Object {
                return Err(CompileError::unsupported(
                    format!("range() bound of type `{}`", bound.ty()),
                    span,
                ));
            }
        }

        let var = self.local_for_assign(target, &ResolvedType::Int);
        if var.ty != ResolvedType::Int {
            return Err(CompileError::unsupported(
                format!("range() loop variable `{}` typed `{}`", target, var.ty),
                span,
            ));
        }
        let body = self.lower_loop_body(body)?;
        out.push(Stmt::ForRange {
            prelude,
            var,
            start,
            stop,
            step,
            body,
        });
        Ok(())
    }

    // ========================================================================
    // Exceptions
    // ========================================================================

    fn lower_raise(
        &mut self,
        exc: Option<&Expr>,
        span: Span,
        out: &mut Vec<Stmt>,
    ) -> CompileResult<()> {
        let Some(exc) = exc else {
            if self.handler_depth == 0 {
                return Err(CompileError::unsupported(
                    "bare raise outside an except block",
                    span,
                ));
            }
            out.push(Stmt::Raise {
                prelude: Vec::new(),
                kind: RaiseKind::Reraise,
            });
            return Ok(());
        };

        let mut prelude = Vec::new();
        let kind = match exc {
            Expr::Name { id, .. } if is_builtin_exception(id) && !self.scope.contains_key(id) => {
                RaiseKind::Builtin {
                    class: id.clone(),
                    message: None,
                }
            }
            Expr::Call {
                func, args, span, ..
            } if matches!(func.as_ref(), Expr::Name { id, .. } if is_builtin_exception(id)) => {
                let class = match func.as_ref() {
                    Expr::Name { id, .. } => id.clone(),
                    _ => return Err(CompileError::internal("exception name vanished")),
                };
                let message = match args.as_slice() {
                    [] => None,
                    [message] => Some(self.lower_expr(message, &mut prelude)?),
                    _ => {
                        return Err(CompileError::unsupported(
                            format!("`{}` raised with more than one argument", class),
                            *span,
                        ))
                    }
                };
                RaiseKind::Builtin { class, message }
            }
            other => RaiseKind::Object(self.lower_expr(other, &mut prelude)?),
        };
        out.push(Stmt::Raise { prelude, kind });
        Ok(())
    }

    fn lower_try(
        &mut self,
        body: &[ast::Stmt],
        handlers: &[ExceptHandler],
        orelse: &[ast::Stmt],
        finalbody: &[ast::Stmt],
        span: Span,
        out: &mut Vec<Stmt>,
    ) -> CompileResult<()> {
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(CompileError::unsupported(
                "try without except or finally",
                span,
            ));
        }
        let has_finally = !finalbody.is_empty();

        // Everything before `finally` runs under the finally's handler
        if has_finally {
            self.finally_depth += 1;
            self.try_depth += 1;
        }

        self.try_depth += 1;
        let body = self.lower_block(body);
        self.try_depth -= 1;
        let body = body?;

        let mut lowered = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let class = match &handler.exc_type {
                None => None,
                Some(name) => {
                    let name = strip_qualification(name);
                    if !is_builtin_exception(name) {
                        return Err(CompileError::unsupported(
                            format!("except clause for non-builtin exception `{}`", name),
                            span,
                        ));
                    }
                    Some(name.to_string())
                }
            };
            let bind = handler
                .name
                .as_ref()
                .map(|name| self.local_for_assign(name, &ResolvedType::Object));
            if let Some(bind) = &bind {
                if bind.ty != ResolvedType::Object {
                    return Err(CompileError::unsupported(
                        format!("exception variable `{}` typed `{}`", bind.name, bind.ty),
                        span,
                    ));
                }
            }
            self.handler_depth += 1;
            let handler_body = self.lower_block(&handler.body);
            self.handler_depth -= 1;
            lowered.push(Handler {
                class,
                bind,
                body: handler_body?,
            });
        }
        let orelse = self.lower_block(orelse)?;

        if has_finally {
            self.finally_depth -= 1;
            self.try_depth -= 1;
        }
        let finally = self.lower_block(finalbody)?;

        out.push(Stmt::Try {
            body,
            handlers: lowered,
            orelse,
            finally,
        });
        Ok(())
    }
}
