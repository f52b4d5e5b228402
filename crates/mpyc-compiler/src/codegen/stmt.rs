//! Statement Emission
//!
//! Exception handling maps onto the runtime's non-local return buffers:
//! `nlr_push` returns zero on entry and non-zero when a raise unwinds to it.
//! `frames` tracks the buffers pushed around the code being emitted so that
//! a `return` can pop them before leaving the function.

use super::ctype::{c_type, convert, sanitize_name, storage, string_literal, zero};
use super::function::FunctionEmitter;
use crate::error::{CompileError, CompileResult};
use crate::ir::{Const, Handler, Local, RaiseKind, Repr, Stmt, Value};

impl<'r> FunctionEmitter<'r> {
    pub(super) fn block(&mut self, body: &[Stmt]) -> CompileResult<()> {
        for stmt in body {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::Eval { prelude, value } => {
                self.prelude(prelude)?;
                if let Some(value) = value {
                    if !matches!(value, Value::Const(_) | Value::Name(_)) {
                        let (code, _) = self.value(value)?;
                        self.w.line(format!("(void)({});", code));
                    }
                }
            }
            Stmt::Assign {
                prelude,
                target,
                value,
            } => {
                self.prelude(prelude)?;
                self.assign_local(target, value)?;
            }
            Stmt::Return { prelude, value } => {
                self.prelude(prelude)?;
                self.return_stmt(value.as_ref())?;
            }
            Stmt::If {
                prelude,
                test,
                body,
                orelse,
            } => {
                self.prelude(prelude)?;
                self.if_chain(test, body, orelse)?;
            }
            Stmt::While {
                prelude,
                test,
                body,
            } => {
                if prelude.is_empty() {
                    let test = self.condition(test)?;
                    self.w.open(format!("while ({}) {{", test));
                } else {
                    // The prelude runs again before every test
                    self.w.open("while (1) {");
                    self.prelude(prelude)?;
                    let test = self.condition(test)?;
                    self.w.line(format!("if (!({})) break;", test));
                }
                self.block(body)?;
                self.w.close("}");
            }
            Stmt::ForRange {
                prelude,
                var,
                start,
                stop,
                step,
                body,
            } => {
                self.prelude(prelude)?;
                self.for_range(var, start, stop, *step, body)?;
            }
            Stmt::ForIter {
                prelude,
                var,
                iterable,
                body,
            } => {
                self.prelude(prelude)?;
                self.for_iter(var, iterable, body)?;
            }
            Stmt::Break => self.w.line("break;"),
            Stmt::Continue => self.w.line("continue;"),
            Stmt::Raise { prelude, kind } => {
                self.prelude(prelude)?;
                self.raise(kind)?;
            }
            Stmt::Try {
                body,
                handlers,
                orelse,
                finally,
            } => {
                if finally.is_empty() {
                    self.try_except(body, handlers, orelse)?;
                } else {
                    self.try_finally(body, handlers, orelse, finally)?;
                }
            }
        }
        Ok(())
    }

    fn assign_local(&mut self, target: &Local, value: &Value) -> CompileResult<()> {
        let code = self.value_as(value, storage(target.repr()))?;
        self.w
            .line(format!("{} = {};", sanitize_name(&target.name), code));
        Ok(())
    }

    fn return_stmt(&mut self, value: Option<&Value>) -> CompileResult<()> {
        let ret = self.func.ret_repr();
        let pops = self.frames.len();

        if ret == Repr::Void {
            if let Some(value) = value {
                if !matches!(value, Value::Const(_)) {
                    let (code, _) = self.value(value)?;
                    self.w.line(format!("(void)({});", code));
                }
            }
            for _ in 0..pops {
                self.w.line("nlr_pop();");
            }
            self.w.line("return;");
            return Ok(());
        }

        let code = match value {
            Some(value) => self.value_as(value, ret)?,
            None => zero(ret).to_string(),
        };
        if pops == 0 {
            self.w.line(format!("return {};", code));
        } else {
            // Evaluate while still protected, then leave the frames
            self.w.open("{");
            self.w
                .line(format!("{} _mpyc_ret = {};", c_type(ret), code));
            for _ in 0..pops {
                self.w.line("nlr_pop();");
            }
            self.w.line("return _mpyc_ret;");
            self.w.close("}");
        }
        Ok(())
    }

    fn if_chain(&mut self, test: &Value, body: &[Stmt], orelse: &[Stmt]) -> CompileResult<()> {
        let test = self.condition(test)?;
        self.w.open(format!("if ({}) {{", test));
        self.block(body)?;

        let mut orelse = orelse;
        loop {
            match orelse {
                [] => break,
                [Stmt::If {
                    prelude,
                    test,
                    body,
                    orelse: next,
                }] if prelude.is_empty() => {
                    let test = self.condition(test)?;
                    self.w.dedent();
                    self.w.open(format!("}} else if ({}) {{", test));
                    self.block(body)?;
                    orelse = next;
                }
                other => {
                    self.w.dedent();
                    self.w.open("} else {");
                    self.block(other)?;
                    break;
                }
            }
        }
        self.w.close("}");
        Ok(())
    }

    fn for_range(
        &mut self,
        var: &Local,
        start: &Value,
        stop: &Value,
        step: i64,
        body: &[Stmt],
    ) -> CompileResult<()> {
        let counter = self.scratch("i");
        let limit = self.scratch("stop");
        let start = self.value_as(start, Repr::Int)?;
        let stop = self.value_as(stop, Repr::Int)?;
        let (cmp, advance) = if step > 0 {
            ("<", format!("{} += {}", counter, step))
        } else {
            (">", format!("{} -= {}", counter, step.unsigned_abs()))
        };

        self.w.open("{");
        self.w.line(format!("mp_int_t {} = {};", limit, stop));
        self.w.open(format!(
            "for (mp_int_t {c} = {}; {c} {} {}; {}) {{",
            start,
            cmp,
            limit,
            advance,
            c = counter
        ));
        let var_repr = storage(var.repr());
        self.w.line(format!(
            "{} = {};",
            sanitize_name(&var.name),
            convert(&counter, Repr::Int, var_repr)
        ));
        self.block(body)?;
        self.w.close("}");
        self.w.close("}");
        Ok(())
    }

    fn for_iter(&mut self, var: &Local, iterable: &Value, body: &[Stmt]) -> CompileResult<()> {
        let buf = self.scratch("iter_buf");
        let iter = self.scratch("iter");
        let item = self.scratch("item");
        let iterable = self.boxed(iterable)?;

        self.w.open("{");
        self.w.line(format!("mp_obj_iter_buf_t {};", buf));
        self.w
            .line(format!("mp_obj_t {} = mp_getiter({}, &{});", iter, iterable, buf));
        self.w.line(format!("mp_obj_t {};", item));
        self.w.open(format!(
            "while (({} = mp_iternext({})) != MP_OBJ_STOP_ITERATION) {{",
            item, iter
        ));
        let var_repr = storage(var.repr());
        self.w.line(format!(
            "{} = {};",
            sanitize_name(&var.name),
            convert(&item, Repr::Obj, var_repr)
        ));
        self.block(body)?;
        self.w.close("}");
        self.w.close("}");
        Ok(())
    }

    fn raise(&mut self, kind: &RaiseKind) -> CompileResult<()> {
        match kind {
            RaiseKind::Builtin { class, message } => {
                let type_object = format!("&mp_type_{}", class);
                match message {
                    Some(Value::Const(Const::Str(text))) => self.w.line(format!(
                        "mp_raise_msg({}, MP_ERROR_TEXT({}));",
                        type_object,
                        string_literal(text)
                    )),
                    Some(message) => {
                        let message = self.boxed(message)?;
                        self.w.line(format!(
                            "nlr_raise(mp_obj_new_exception_arg1({}, {}));",
                            type_object, message
                        ));
                    }
                    None => self.w.line(format!("mp_raise_type({});", type_object)),
                }
            }
            RaiseKind::Object(value) => {
                let value = self.boxed(value)?;
                self.w
                    .line(format!("nlr_raise(mp_make_raise_obj({}));", value));
            }
            RaiseKind::Reraise => match self.handlers.last() {
                Some(buf) => {
                    let line = format!("nlr_jump({}.ret_val);", buf);
                    self.w.line(line);
                }
                None => {
                    return Err(CompileError::internal(
                        "bare raise outside an exception handler",
                    ))
                }
            },
        }
        Ok(())
    }

    /// `try`/`except`/`else` without `finally`
    fn try_except(
        &mut self,
        body: &[Stmt],
        handlers: &[Handler],
        orelse: &[Stmt],
    ) -> CompileResult<()> {
        let buf = self.scratch("nlr");
        self.w.open("{");
        self.w.line(format!("nlr_buf_t {};", buf));
        self.w.open(format!("if (nlr_push(&{}) == 0) {{", buf));

        self.frames.push(buf.clone());
        let protected = self.block(body);
        self.frames.pop();
        protected?;
        self.w.line("nlr_pop();");
        // `else` runs outside the handlers' protection
        self.block(orelse)?;

        self.w.dedent();
        self.w.open("} else {");
        self.dispatch_handlers(&buf, handlers)?;
        self.w.close("}");
        self.w.close("}");
        Ok(())
    }

    /// The handler chain of a caught exception; unmatched exceptions
    /// propagate to the next enclosing buffer
    fn dispatch_handlers(&mut self, buf: &str, handlers: &[Handler]) -> CompileResult<()> {
        let exc = self.scratch("exc");
        self.w
            .line(format!("mp_obj_t {} = MP_OBJ_FROM_PTR({}.ret_val);", exc, buf));
        self.w.line(format!("(void){};", exc));

        self.handlers.push(buf.to_string());
        let result = self.handler_chain(buf, &exc, handlers);
        self.handlers.pop();
        result
    }

    fn handler_chain(&mut self, buf: &str, exc: &str, handlers: &[Handler]) -> CompileResult<()> {
        let mut catch_all = false;
        for (i, handler) in handlers.iter().enumerate() {
            let opener = match &handler.class {
                Some(class) => {
                    let test = format!(
                        "mp_obj_is_subclass_fast(MP_OBJ_FROM_PTR(mp_obj_get_type({})), MP_OBJ_FROM_PTR(&mp_type_{}))",
                        exc, class
                    );
                    if i == 0 {
                        format!("if ({}) {{", test)
                    } else {
                        format!("}} else if ({}) {{", test)
                    }
                }
                None if i == 0 => {
                    catch_all = true;
                    "{".to_string()
                }
                None => {
                    catch_all = true;
                    "} else {".to_string()
                }
            };
            if i > 0 {
                self.w.dedent();
            }
            self.w.open(opener);
            if let Some(bind) = &handler.bind {
                self.w
                    .line(format!("{} = {};", sanitize_name(&bind.name), exc));
            }
            self.block(&handler.body)?;
            if catch_all {
                break;
            }
        }

        if handlers.is_empty() {
            self.w.line(format!("nlr_jump({}.ret_val);", buf));
            return Ok(());
        }
        if !catch_all {
            self.w.dedent();
            self.w.open("} else {");
            self.w.line(format!("nlr_jump({}.ret_val);", buf));
        }
        self.w.close("}");
        Ok(())
    }

    /// `try` with `finally`: the whole statement runs inside an outer buffer
    /// whose handler runs the final block and re-raises
    fn try_finally(
        &mut self,
        body: &[Stmt],
        handlers: &[Handler],
        orelse: &[Stmt],
        finally: &[Stmt],
    ) -> CompileResult<()> {
        let outer = self.scratch("nlr");
        self.w.open("{");
        self.w.line(format!("nlr_buf_t {};", outer));
        self.w.open(format!("if (nlr_push(&{}) == 0) {{", outer));

        self.frames.push(outer.clone());
        let protected = if handlers.is_empty() {
            self.block(body).and_then(|_| self.block(orelse))
        } else {
            self.try_except(body, handlers, orelse)
        };
        self.frames.pop();
        protected?;
        self.w.line("nlr_pop();");

        self.w.dedent();
        self.w.open("} else {");
        self.block(finally)?;
        self.w.line(format!("nlr_jump({}.ret_val);", outer));
        self.w.close("}");
        self.block(finally)?;
        self.w.close("}");
        Ok(())
    }
}
