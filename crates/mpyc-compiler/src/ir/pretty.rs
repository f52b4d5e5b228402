//! Pretty-printing for IR
//!
//! Provides human-readable output for debugging IR structures.

use super::class::{ClassIR, MethodKind};
use super::function::{FuncIR, Receiver};
use super::instr::{Branch, CallVia, Instr};
use super::module::ModuleIR;
use super::stmt::{RaiseKind, Stmt};
use super::value::{ArithPath, Value};
use std::fmt::Write;

/// Trait for pretty-printing IR constructs
pub trait PrettyPrint {
    fn pretty_print(&self) -> String;
}

impl PrettyPrint for ModuleIR {
    fn pretty_print(&self) -> String {
        let mut output = String::new();
        writeln!(output, "; module {} (c: {})", self.name, self.c_name).unwrap();
        for header in &self.includes {
            writeln!(output, "; include \"{}\"", header).unwrap();
        }
        for ext in &self.externs {
            writeln!(output, "; extern {}", ext.forward_decl()).unwrap();
        }
        writeln!(output).unwrap();

        for class in &self.classes {
            output.push_str(&pretty_class(self, class));
            writeln!(output).unwrap();
        }

        for func in &self.functions {
            output.push_str(&func.pretty_print());
            writeln!(output).unwrap();
        }

        output
    }
}

fn pretty_class(module: &ModuleIR, class: &ClassIR) -> String {
    let mut output = String::new();
    let mut header = format!("class {}", class.name);
    if let Some(base) = class.base {
        write!(header, "({})", module.class(base).name).unwrap();
    }
    if class.is_final {
        header.push_str(" final");
    }
    if class.is_dataclass {
        header.push_str(" dataclass");
    }
    writeln!(output, "{} {{", header).unwrap();

    for field in &class.fields {
        match &field.default {
            Some(default) => {
                writeln!(output, "  field {}: {} = {}", field.name, field.ty, default).unwrap()
            }
            None => writeln!(output, "  field {}: {}", field.name, field.ty).unwrap(),
        }
    }

    for method in &class.methods {
        let kind = match method.flags.kind {
            MethodKind::Instance => "method",
            MethodKind::Static => "staticmethod",
            MethodKind::ClassMethod => "classmethod",
            MethodKind::Getter => "getter",
            MethodKind::Setter => "setter",
        };
        let fin = if method.flags.is_final { " final" } else { "" };
        writeln!(output, "  ; {}{}", kind, fin).unwrap();
        for line in method.func.pretty_print().lines() {
            writeln!(output, "  {}", line).unwrap();
        }
    }

    writeln!(output, "}}").unwrap();
    output
}

impl PrettyPrint for FuncIR {
    fn pretty_print(&self) -> String {
        let mut output = String::new();

        let mut params: Vec<String> = Vec::new();
        match self.receiver {
            Receiver::Instance(_) => params.push("self".to_string()),
            Receiver::Class(_) => params.push("cls".to_string()),
            Receiver::None => {}
        }
        params.extend(self.params.iter().map(|p| format!("{}: {}", p.name, p.ty)));
        writeln!(
            output,
            "fn {}({}) -> {} {{",
            self.name,
            params.join(", "),
            self.ret
        )
        .unwrap();

        if !self.locals.is_empty() {
            let locals: Vec<String> = self
                .locals
                .iter()
                .map(|l| format!("{}: {}", l.name, l.ty))
                .collect();
            writeln!(output, "  ; locals: {}", locals.join(", ")).unwrap();
        }

        for stmt in &self.body {
            write_stmt(&mut output, stmt, 1);
        }

        writeln!(output, "}}").unwrap();
        output
    }
}

fn write_prelude(output: &mut String, prelude: &[Instr], indent: usize) {
    let prefix = "  ".repeat(indent);
    for instr in prelude {
        writeln!(output, "{}| {}", prefix, format_instr(instr, indent)).unwrap();
    }
}

fn write_block(output: &mut String, body: &[Stmt], indent: usize) {
    for stmt in body {
        write_stmt(output, stmt, indent);
    }
}

fn write_stmt(output: &mut String, stmt: &Stmt, indent: usize) {
    let prefix = "  ".repeat(indent);
    write_prelude(output, stmt.prelude(), indent);
    match stmt {
        Stmt::Eval {
            value: Some(value), ..
        } => writeln!(output, "{}eval {}", prefix, format_value(value)).unwrap(),
        Stmt::Eval { value: None, .. } => {}
        Stmt::Assign { target, value, .. } => {
            writeln!(output, "{}{} = {}", prefix, target.name, format_value(value)).unwrap()
        }
        Stmt::Return { value, .. } => match value {
            Some(value) => writeln!(output, "{}return {}", prefix, format_value(value)).unwrap(),
            None => writeln!(output, "{}return", prefix).unwrap(),
        },
        Stmt::If {
            test, body, orelse, ..
        } => {
            writeln!(output, "{}if {}:", prefix, format_value(test)).unwrap();
            write_block(output, body, indent + 1);
            if !orelse.is_empty() {
                writeln!(output, "{}else:", prefix).unwrap();
                write_block(output, orelse, indent + 1);
            }
        }
        Stmt::While { test, body, .. } => {
            writeln!(output, "{}while {}:", prefix, format_value(test)).unwrap();
            write_block(output, body, indent + 1);
        }
        Stmt::ForRange {
            var,
            start,
            stop,
            step,
            body,
            ..
        } => {
            writeln!(
                output,
                "{}for {} in range({}, {}, {}):",
                prefix,
                var.name,
                format_value(start),
                format_value(stop),
                step
            )
            .unwrap();
            write_block(output, body, indent + 1);
        }
        Stmt::ForIter {
            var,
            iterable,
            body,
            ..
        } => {
            writeln!(
                output,
                "{}for {} in {}:",
                prefix,
                var.name,
                format_value(iterable)
            )
            .unwrap();
            write_block(output, body, indent + 1);
        }
        Stmt::Break => writeln!(output, "{}break", prefix).unwrap(),
        Stmt::Continue => writeln!(output, "{}continue", prefix).unwrap(),
        Stmt::Raise { kind, .. } => match kind {
            RaiseKind::Builtin { class, message } => match message {
                Some(message) => {
                    writeln!(output, "{}raise {}({})", prefix, class, format_value(message))
                        .unwrap()
                }
                None => writeln!(output, "{}raise {}", prefix, class).unwrap(),
            },
            RaiseKind::Object(value) => {
                writeln!(output, "{}raise {}", prefix, format_value(value)).unwrap()
            }
            RaiseKind::Reraise => writeln!(output, "{}raise", prefix).unwrap(),
        },
        Stmt::Try {
            body,
            handlers,
            orelse,
            finally,
        } => {
            writeln!(output, "{}try:", prefix).unwrap();
            write_block(output, body, indent + 1);
            for handler in handlers {
                let class = handler.class.as_deref().unwrap_or("BaseException");
                match &handler.bind {
                    Some(bind) => {
                        writeln!(output, "{}except {} as {}:", prefix, class, bind.name).unwrap()
                    }
                    None => writeln!(output, "{}except {}:", prefix, class).unwrap(),
                }
                write_block(output, &handler.body, indent + 1);
            }
            if !orelse.is_empty() {
                writeln!(output, "{}else:", prefix).unwrap();
                write_block(output, orelse, indent + 1);
            }
            if !finally.is_empty() {
                writeln!(output, "{}finally:", prefix).unwrap();
                write_block(output, finally, indent + 1);
            }
        }
    }
}

fn format_args(args: &[Value]) -> String {
    args.iter().map(format_value).collect::<Vec<_>>().join(", ")
}

fn assign_prefix(instr: &Instr) -> String {
    match instr.result() {
        Some(temp) => format!("{}: {} = ", temp.id, temp.ty),
        None => String::new(),
    }
}

fn format_branch(branch: &Branch, indent: usize) -> String {
    let mut out = String::from("{");
    for instr in &branch.prelude {
        write!(out, " {};", format_instr(instr, indent)).unwrap();
    }
    write!(out, " {} }}", format_value(&branch.value)).unwrap();
    out
}

fn format_instr(instr: &Instr, indent: usize) -> String {
    let dest = assign_prefix(instr);
    let body = match instr {
        Instr::Call { func, args, .. } => format!("call {}({})", func, format_args(args)),
        Instr::ExternCall {
            library,
            function,
            args,
            ..
        } => format!(
            "extern {}.{} [{}]({})",
            library,
            function.name,
            function.symbol,
            format_args(args)
        ),
        Instr::MethodCall {
            receiver,
            method,
            via,
            args,
            ..
        } => {
            let via = match via {
                CallVia::Dispatch => "",
                CallVia::Exact => " exact",
            };
            format!(
                "method{} {}.m{}:{}({})",
                via,
                format_value(receiver),
                method.class,
                method.index,
                format_args(args)
            )
        }
        Instr::StaticCall { method, args, .. } => format!(
            "static {}:{}({})",
            method.class,
            method.index,
            format_args(args)
        ),
        Instr::ClassMethodCall {
            cls, method, args, ..
        } => format!(
            "classmethod {}.m{}:{}({})",
            format_value(cls),
            method.class,
            method.index,
            format_args(args)
        ),
        Instr::DynamicCall {
            receiver,
            method,
            args,
            ..
        } => format!(
            "dynamic {}.{}({})",
            format_value(receiver),
            method,
            format_args(args)
        ),
        Instr::CallObject { callee, args, .. } => {
            format!("call_object {}({})", format_value(callee), format_args(args))
        }
        Instr::New { class, args, .. } => format!("new {}({})", class, format_args(args)),
        Instr::ContainerNew { kind, items, .. } => {
            format!("{} [{}]", kind.name(), format_args(items))
        }
        Instr::DictNew { entries, .. } => {
            let entries: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}: {}", format_value(k), format_value(v)))
                .collect();
            format!("dict {{{}}}", entries.join(", "))
        }
        Instr::SliceNew {
            lower, upper, step, ..
        } => {
            let bound = |b: &Option<Value>| b.as_ref().map(format_value).unwrap_or_default();
            format!("slice {}:{}:{}", bound(lower), bound(upper), bound(step))
        }
        Instr::GetItem {
            container, index, ..
        } => format!("{}[{}]", format_value(container), format_value(index)),
        Instr::SetItem {
            container,
            index,
            value,
        } => format!(
            "{}[{}] = {}",
            format_value(container),
            format_value(index),
            format_value(value)
        ),
        Instr::FieldWrite {
            object,
            field,
            value,
        } => format!(
            "{}.f{}:{} = {}",
            format_value(object),
            field.declared_in,
            field.index,
            format_value(value)
        ),
        Instr::LoadAttr { object, attr, .. } => {
            format!("getattr {}.{}", format_value(object), attr)
        }
        Instr::StoreAttr {
            object,
            attr,
            value,
        } => format!(
            "setattr {}.{} = {}",
            format_value(object),
            attr,
            format_value(value)
        ),
        Instr::RuntimeCall { func, args, .. } => {
            format!("runtime {}({})", func.name(), format_args(args))
        }
        Instr::ShortCircuit {
            op, first, rest, ..
        } => {
            let mut out = format!("{} {}", format!("{:?}", op).to_lowercase(), format_value(first));
            for branch in rest {
                write!(out, " then {}", format_branch(branch, indent)).unwrap();
            }
            out
        }
        Instr::Select {
            test, body, orelse, ..
        } => format!(
            "select {} ? {} : {}",
            format_value(test),
            format_branch(body, indent),
            format_branch(orelse, indent)
        ),
    };
    format!("{}{}", dest, body)
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Const(c) => c.to_string(),
        Value::Name(local) => local.name.clone(),
        Value::SelfRef { name, .. } => format!("self<{}>", name),
        Value::ClassRef { name, .. } => format!("<class {}>", name),
        Value::Temp(temp) => temp.id.to_string(),
        Value::BinOp {
            op,
            left,
            right,
            path,
            ..
        } => format!(
            "({} {}{} {})",
            format_value(left),
            op.symbol(),
            path_marker(*path),
            format_value(right)
        ),
        Value::UnaryOp { op, operand, .. } => format!("({:?} {})", op, format_value(operand)),
        Value::Compare { left, comparisons } => {
            let mut out = format!("({}", format_value(left));
            for cmp in comparisons {
                write!(
                    out,
                    " {}{} {}",
                    cmp.op.symbol(),
                    path_marker(cmp.path),
                    format_value(&cmp.right)
                )
                .unwrap();
            }
            out.push(')');
            out
        }
        Value::BoolOp { op, values, .. } => {
            let sep = format!(" {:?} ", op).to_lowercase();
            format!(
                "({})",
                values.iter().map(format_value).collect::<Vec<_>>().join(&sep)
            )
        }
        Value::FieldRead { object, field, .. } => format!(
            "{}.f{}:{}",
            format_value(object),
            field.declared_in,
            field.index
        ),
        Value::Select {
            test, body, orelse, ..
        } => format!(
            "({} if {} else {})",
            format_value(body),
            format_value(test),
            format_value(orelse)
        ),
    }
}

fn path_marker(path: ArithPath) -> &'static str {
    match path {
        ArithPath::Native => "",
        ArithPath::Generic => "~",
    }
}
