//! Test harness for end-to-end compilation and execution
//!
//! Lowers an AST, resolves class layouts and runs the resolved IR on a
//! reference interpreter that models the object runtime the generated C
//! targets:
//!
//! - an instance is a nest of structs, the derived struct embedding its base
//!   as its first member, and fields are reached by walking access paths
//! - virtual calls read the implementation from the dispatch table installed
//!   in the root struct
//! - comparisons, iteration and printing go through the same slot plans the
//!   emitted handlers follow (nearest special method in the class chain)

#![allow(dead_code)]

use mpyc_compiler::ast::{self, BinOp, BoolOp, CmpOp, UnaryOp};
use mpyc_compiler::ir::{
    Builtin, CallVia, ClassId, Const, Constructor, FieldRef, FuncIR, Handler, Instr, MethodKind,
    MethodRef, RaiseKind, Receiver, Repr, SpecialMethod, Stmt, Value,
};
use mpyc_compiler::layout::{Dispatch, ResolvedModule, VTABLE_MEMBER};
use mpyc_compiler::oracle::{ContainerKind, ResolvedType, TypeTable};
use mpyc_compiler::{CompileError, CompileInput, Compiler};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

// ============================================================================
// Runtime values
// ============================================================================

/// A raised exception
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    pub class: String,
    pub message: Option<String>,
}

/// One level of an instance: the struct of `class`, whose first member is
/// the struct of its base
#[derive(Debug)]
pub struct Struct {
    pub class: ClassId,
    pub base: Option<Box<Struct>>,
    /// Own fields in declaration order
    pub fields: Vec<RtValue>,
    /// Class whose dispatch table is installed (root struct only)
    pub vtable: Option<ClassId>,
}

#[derive(Debug)]
pub struct Instance {
    pub class: ClassId,
    pub body: RefCell<Struct>,
}

#[derive(Debug, Clone)]
pub enum RtValue {
    None,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    List(Rc<RefCell<Vec<RtValue>>>),
    Tuple(Rc<Vec<RtValue>>),
    Set(Rc<RefCell<Vec<RtValue>>>),
    Dict(Rc<RefCell<Vec<(RtValue, RtValue)>>>),
    Object(Rc<Instance>),
    Class(ClassId),
    Exception(Rc<Exception>),
    /// `slice(lower, upper, step)`
    Slice(Option<i64>, Option<i64>, Option<i64>),
}

impl RtValue {
    pub fn list(items: Vec<RtValue>) -> Self {
        RtValue::List(Rc::new(RefCell::new(items)))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            RtValue::Int(v) => Some(*v),
            RtValue::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            RtValue::Float(v) => Some(*v),
            RtValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RtValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RtValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn is_number(&self) -> bool {
        matches!(self, RtValue::Int(_) | RtValue::Float(_) | RtValue::Bool(_))
    }
}

/// Why execution stopped
#[derive(Debug, Clone)]
pub enum RtError {
    /// An exception propagated out of the called function
    Raised(Rc<Exception>),
    /// The IR asked for something the runtime model cannot do
    Fault(String),
}

impl RtError {
    pub fn exception_class(&self) -> Option<&str> {
        match self {
            RtError::Raised(exc) => Some(&exc.class),
            RtError::Fault(_) => None,
        }
    }
}

impl fmt::Display for RtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtError::Raised(exc) => match &exc.message {
                Some(message) => write!(f, "{}: {}", exc.class, message),
                None => write!(f, "{}", exc.class),
            },
            RtError::Fault(message) => write!(f, "fault: {}", message),
        }
    }
}

fn raise(class: &str, message: impl Into<String>) -> RtError {
    RtError::Raised(Rc::new(Exception {
        class: class.to_string(),
        message: Some(message.into()),
    }))
}

fn fault(message: impl Into<String>) -> RtError {
    RtError::Fault(message.into())
}

/// Error type for e2e tests
#[derive(Debug)]
pub enum E2EError {
    Compile(CompileError),
    Runtime(RtError),
}

impl fmt::Display for E2EError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            E2EError::Compile(e) => write!(f, "Compile error: {}", e),
            E2EError::Runtime(e) => write!(f, "Runtime error: {}", e),
        }
    }
}

impl std::error::Error for E2EError {}

pub type E2EResult<T> = Result<T, E2EError>;

// ============================================================================
// Builtin exception hierarchy
// ============================================================================

fn exception_base(name: &str) -> Option<&'static str> {
    match name {
        "BaseException" => None,
        "Exception" | "KeyboardInterrupt" | "SystemExit" => Some("BaseException"),
        "ZeroDivisionError" | "OverflowError" => Some("ArithmeticError"),
        "IndexError" | "KeyError" => Some("LookupError"),
        "NotImplementedError" => Some("RuntimeError"),
        _ => Some("Exception"),
    }
}

pub fn exception_is_subclass(class: &str, ancestor: &str) -> bool {
    let mut current = Some(class);
    while let Some(name) = current {
        if name == ancestor {
            return true;
        }
        current = exception_base(name);
    }
    false
}

// ============================================================================
// Source builders
// ============================================================================

pub fn module(body: Vec<ast::Stmt>) -> ast::Module {
    ast::Module { body }
}

/// `self.<name>`
pub fn self_attr(name: &str) -> ast::Expr {
    ast::Expr::attr(ast::Expr::name("self"), name)
}

/// `left op0 c0 op1 c1 ...`
pub fn chain(left: ast::Expr, links: Vec<(CmpOp, ast::Expr)>) -> ast::Expr {
    let (ops, comparators) = links.into_iter().unzip();
    ast::Expr::Compare {
        left: Box::new(left),
        ops,
        comparators,
        span: ast::Span::default(),
    }
}

/// `try: body` with `except <class> as <name>: handler` clauses
pub fn try_stmt(
    body: Vec<ast::Stmt>,
    handlers: Vec<(Option<&str>, Option<&str>, Vec<ast::Stmt>)>,
    finalbody: Vec<ast::Stmt>,
) -> ast::Stmt {
    ast::Stmt::Try {
        body,
        handlers: handlers
            .into_iter()
            .map(|(exc_type, name, body)| ast::ExceptHandler {
                exc_type: exc_type.map(str::to_string),
                name: name.map(str::to_string),
                body,
            })
            .collect(),
        orelse: Vec::new(),
        finalbody,
        span: ast::Span::default(),
    }
}

// ============================================================================
// Compilation entry points
// ============================================================================

/// Lower and resolve `module` (module name `m`)
pub fn compile(module: ast::Module, types: TypeTable) -> E2EResult<Program> {
    // RUST_LOG=mpyc_compiler=trace shows lowering and layout decisions
    let _ = env_logger::builder().is_test(true).try_init();
    let input = CompileInput::new("m", module, types);
    let resolved = Compiler::default()
        .check(&input)
        .map_err(E2EError::Compile)?;
    Ok(Program::new(resolved))
}

/// Compile, panicking with the diagnostic on failure
pub fn compile_ok(module: ast::Module, types: TypeTable) -> Program {
    match compile(module, types) {
        Ok(program) => program,
        Err(e) => panic!("Compilation failed: {}", e),
    }
}

/// Compile, expecting a diagnostic
pub fn compile_err(module: ast::Module, types: TypeTable) -> CompileError {
    match compile(module, types) {
        Ok(_) => panic!("Compilation unexpectedly succeeded"),
        Err(E2EError::Compile(e)) => e,
        Err(e) => panic!("Unexpected failure: {}", e),
    }
}

/// Compile and call module function `function`, expecting an int result
pub fn expect_int(module: ast::Module, types: TypeTable, function: &str, expected: i64) {
    let program = compile_ok(module, types);
    match program.call(function, vec![]) {
        Ok(value) => assert_eq!(
            value.as_int(),
            Some(expected),
            "Wrong result of `{}`: {:?}",
            function,
            value
        ),
        Err(e) => panic!("Execution of `{}` failed: {}", function, e),
    }
}

// ============================================================================
// Interpreter
// ============================================================================

enum Flow {
    Next,
    Break,
    Continue,
    Return(RtValue),
}

struct Frame {
    this: Option<RtValue>,
    locals: HashMap<String, RtValue>,
    temps: HashMap<u32, RtValue>,
    /// Exceptions being handled, innermost last
    handling: Vec<Rc<Exception>>,
}

/// A resolved module ready to run
pub struct Program {
    pub resolved: ResolvedModule,
    output: RefCell<Vec<String>>,
}

impl Program {
    pub fn new(resolved: ResolvedModule) -> Self {
        Self {
            resolved,
            output: RefCell::new(Vec::new()),
        }
    }

    /// Lines written by `print`
    pub fn output(&self) -> Vec<String> {
        self.output.borrow().clone()
    }

    pub fn class_id(&self, name: &str) -> ClassId {
        self.resolved
            .module
            .get_class_id(name)
            .unwrap_or_else(|| panic!("no class `{}`", name))
    }

    // ------------------------------------------------------------------------
    // Entry points used by tests (the interpreted side of the boundary)
    // ------------------------------------------------------------------------

    /// Call module-level function `name`
    pub fn call(&self, name: &str, args: Vec<RtValue>) -> Result<RtValue, RtError> {
        let module = &self.resolved.module;
        let id = module
            .get_function_id(name)
            .ok_or_else(|| fault(format!("no function `{}`", name)))?;
        let func = module
            .get_function(id)
            .ok_or_else(|| fault("function vanished"))?;
        self.call_func(func, None, args)
    }

    /// `Class(args)` from interpreted code
    pub fn instantiate(&self, class: &str, args: Vec<RtValue>) -> Result<RtValue, RtError> {
        self.construct(self.class_id(class), args)
    }

    /// `obj.name(args)` from interpreted code, looked up in the type's
    /// method table
    pub fn call_method(
        &self,
        receiver: &RtValue,
        name: &str,
        args: Vec<RtValue>,
    ) -> Result<RtValue, RtError> {
        self.dynamic_call(receiver, name, args)
    }

    /// `obj.name` from interpreted code, through the attribute handler
    pub fn get_attr(&self, object: &RtValue, name: &str) -> Result<RtValue, RtError> {
        self.load_attr(object, name)
    }

    pub fn set_attr(&self, object: &RtValue, name: &str, value: RtValue) -> Result<(), RtError> {
        self.store_attr(object, name, value)
    }

    /// The binary-op slot of the left operand's type: `None` is the
    /// "unhandled" answer
    pub fn binary_op_slot(
        &self,
        op: CmpOp,
        lhs: &RtValue,
        rhs: &RtValue,
    ) -> Result<Option<RtValue>, RtError> {
        let RtValue::Object(obj) = lhs else {
            return Ok(None);
        };
        let module = &self.resolved.module;
        let special = match op {
            CmpOp::Eq => SpecialMethod::Eq,
            CmpOp::NotEq => SpecialMethod::Ne,
            CmpOp::Lt => SpecialMethod::Lt,
            CmpOp::LtE => SpecialMethod::Le,
            CmpOp::Gt => SpecialMethod::Gt,
            CmpOp::GtE => SpecialMethod::Ge,
            _ => return Ok(None),
        };
        match module.find_special(obj.class, special) {
            Some(method) => {
                let ir = module.method(method);
                let accepts = match ir.params().first().map(|p| &p.ty) {
                    Some(ResolvedType::Class(name)) => module
                        .get_class_id(name)
                        .map_or(true, |expected| self.is_instance(rhs, expected)),
                    Some(ResolvedType::Int) => matches!(rhs, RtValue::Int(_)),
                    Some(ResolvedType::Float) => {
                        matches!(rhs, RtValue::Int(_) | RtValue::Float(_))
                    }
                    _ => true,
                };
                if !accepts {
                    return Ok(None);
                }
                let result = self.call_func(&ir.func, Some(lhs.clone()), vec![rhs.clone()])?;
                Ok(Some(result))
            }
            None if special == SpecialMethod::Eq && module.class(obj.class).is_dataclass => {
                let RtValue::Object(other) = rhs else {
                    return Ok(None);
                };
                if other.class != obj.class {
                    return Ok(None);
                }
                for field in module.all_fields(obj.class) {
                    let a = self.read_field(lhs, field)?;
                    let b = self.read_field(rhs, field)?;
                    if !self.equal(&a, &b)? {
                        return Ok(Some(RtValue::Bool(false)));
                    }
                }
                Ok(Some(RtValue::Bool(true)))
            }
            None => Ok(None),
        }
    }

    /// `iter(obj)`
    pub fn get_iter(&self, value: &RtValue) -> Result<RtValue, RtError> {
        let obj = self.instance(value)?;
        let module = &self.resolved.module;
        let iter = module
            .find_special(obj.class, SpecialMethod::Iter)
            .ok_or_else(|| raise("TypeError", "object not iterable"))?;
        if module.find_special(obj.class, SpecialMethod::Next).is_some() {
            return Ok(value.clone());
        }
        self.call_func(&module.method(iter).func, Some(value.clone()), vec![])
    }

    /// The iternext slot: `None` is the exhaustion sentinel
    pub fn iter_next_slot(&self, iterator: &RtValue) -> Result<Option<RtValue>, RtError> {
        let obj = self.instance(iterator)?;
        let module = &self.resolved.module;
        let next = module
            .find_special(obj.class, SpecialMethod::Next)
            .ok_or_else(|| raise("TypeError", "object not an iterator"))?;
        match self.call_func(&module.method(next).func, Some(iterator.clone()), vec![]) {
            Ok(value) => Ok(Some(value)),
            Err(RtError::Raised(exc)) if exception_is_subclass(&exc.class, "StopIteration") => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// `bool(value)`
    pub fn is_true(&self, value: &RtValue) -> Result<bool, RtError> {
        self.truthy(value)
    }

    /// `str(value)`
    pub fn str_of(&self, value: &RtValue) -> Result<String, RtError> {
        match value {
            RtValue::Str(s) => Ok(s.clone()),
            RtValue::Object(_) => self.print_object(value, false),
            RtValue::Exception(exc) => Ok(exc.message.clone().unwrap_or_default()),
            other => self.repr_of(other),
        }
    }

    /// `repr(value)`
    pub fn repr_of(&self, value: &RtValue) -> Result<String, RtError> {
        let join = |items: &[RtValue]| -> Result<String, RtError> {
            Ok(items
                .iter()
                .map(|item| self.repr_of(item))
                .collect::<Result<Vec<_>, _>>()?
                .join(", "))
        };
        Ok(match value {
            RtValue::None => "None".to_string(),
            RtValue::Int(v) => v.to_string(),
            RtValue::Float(v) => format!("{:?}", v),
            RtValue::Bool(true) => "True".to_string(),
            RtValue::Bool(false) => "False".to_string(),
            RtValue::Str(s) => format!("'{}'", s),
            RtValue::List(items) => format!("[{}]", join(&items.borrow())?),
            RtValue::Tuple(items) if items.len() == 1 => format!("({},)", join(items)?),
            RtValue::Tuple(items) => format!("({})", join(items)?),
            RtValue::Set(items) => format!("{{{}}}", join(&items.borrow())?),
            RtValue::Dict(entries) => {
                let entries = entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| Ok(format!("{}: {}", self.repr_of(k)?, self.repr_of(v)?)))
                    .collect::<Result<Vec<_>, RtError>>()?;
                format!("{{{}}}", entries.join(", "))
            }
            RtValue::Object(_) => self.print_object(value, true)?,
            RtValue::Class(class) => {
                format!("<class '{}'>", self.resolved.module.class(*class).name)
            }
            RtValue::Exception(exc) => match &exc.message {
                Some(message) => format!("{}('{}')", exc.class, message),
                None => format!("{}()", exc.class),
            },
            RtValue::Slice(lower, upper, step) => {
                let bound = |b: &Option<i64>| b.map_or("None".to_string(), |v| v.to_string());
                format!("slice({}, {}, {})", bound(lower), bound(upper), bound(step))
            }
        })
    }

    /// Implementation installed in `class`'s dispatch table for `method`
    pub fn vtable_implementation(&self, class: &str, method: &str) -> Option<String> {
        let module = &self.resolved.module;
        let vtable = self.resolved.layout(self.class_id(class)).vtable.as_ref()?;
        let entry = vtable.entries.iter().find(|e| e.name == method)?;
        Some(format!(
            "{}.{}",
            module.class(entry.implementation.class).name,
            module.method(entry.implementation).name
        ))
    }

    // ------------------------------------------------------------------------
    // Object model
    // ------------------------------------------------------------------------

    fn instance<'v>(&self, value: &'v RtValue) -> Result<&'v Rc<Instance>, RtError> {
        match value {
            RtValue::Object(obj) => Ok(obj),
            other => Err(fault(format!("expected an instance, got {:?}", other))),
        }
    }

    fn is_instance(&self, value: &RtValue, class: ClassId) -> bool {
        matches!(value, RtValue::Object(obj) if self.resolved.module.is_subclass(obj.class, class))
    }

    /// Levels between the most-derived struct and the struct of `target`
    fn cast_hops(&self, dynamic: ClassId, target: ClassId) -> Result<u32, RtError> {
        self.resolved
            .module
            .class_chain(dynamic)
            .iter()
            .position(|&c| c == target)
            .map(|hops| hops as u32)
            .ok_or_else(|| {
                fault(format!(
                    "instance of `{}` is not a `{}`",
                    self.resolved.module.class(dynamic).name,
                    self.resolved.module.class(target).name
                ))
            })
    }

    fn new_struct(&self, class: ClassId) -> Struct {
        let ir = self.resolved.module.class(class);
        Struct {
            class,
            base: ir.base.map(|base| Box::new(self.new_struct(base))),
            fields: ir
                .fields
                .iter()
                .map(|field| match &field.default {
                    Some(value) => coerce(constant(value), &field.ty),
                    None => zero(&field.ty),
                })
                .collect(),
            vtable: None,
        }
    }

    fn construct(&self, class: ClassId, args: Vec<RtValue>) -> Result<RtValue, RtError> {
        let module = &self.resolved.module;
        let layout = self.resolved.layout(class);
        let mut body = self.new_struct(class);
        if let Some(path) = &layout.vtable_path {
            if path.field() != VTABLE_MEMBER {
                return Err(fault("dispatch table path names a field"));
            }
            level_mut(&mut body, path.hops())?.vtable = Some(class);
        }
        let object = RtValue::Object(Rc::new(Instance {
            class,
            body: RefCell::new(body),
        }));

        match module.constructor(class) {
            Constructor::Init(init) => {
                self.call_func(&module.method(init).func, Some(object.clone()), args)?;
            }
            Constructor::Dataclass(dataclass) => {
                let fields = module.all_fields(dataclass);
                if args.len() > fields.len() {
                    return Err(raise("TypeError", "too many positional arguments"));
                }
                for (field, arg) in fields.into_iter().zip(args) {
                    let field = FieldRef {
                        owner: class,
                        ..field
                    };
                    self.write_field(&object, field, arg)?;
                }
            }
            Constructor::Default if !args.is_empty() => {
                return Err(raise("TypeError", "function takes 0 positional arguments"));
            }
            Constructor::Default => {}
        }
        Ok(object)
    }

    fn read_field(&self, object: &RtValue, field: FieldRef) -> Result<RtValue, RtError> {
        let obj = self.instance(object)?;
        let path = self
            .resolved
            .access_path(field)
            .map_err(|e| fault(e.to_string()))?;
        let hops = self.cast_hops(obj.class, field.owner)? + path.hops();
        let body = obj.body.borrow();
        let level = level(&body, hops)?;
        let index = self.member_index(level.class, path.field())?;
        Ok(level.fields[index].clone())
    }

    fn write_field(&self, object: &RtValue, field: FieldRef, value: RtValue) -> Result<(), RtError> {
        let obj = self.instance(object)?;
        let path = self
            .resolved
            .access_path(field)
            .map_err(|e| fault(e.to_string()))?;
        let hops = self.cast_hops(obj.class, field.owner)? + path.hops();
        let ty = self.resolved.module.field(field).ty.clone();
        let mut body = obj.body.borrow_mut();
        let level = level_mut(&mut body, hops)?;
        let index = self.member_index(level.class, path.field())?;
        level.fields[index] = coerce(value, &ty);
        Ok(())
    }

    fn member_index(&self, class: ClassId, name: &str) -> Result<usize, RtError> {
        self.resolved
            .module
            .class(class)
            .field_index(name)
            .ok_or_else(|| {
                fault(format!(
                    "struct of `{}` has no member `{}`",
                    self.resolved.module.class(class).name,
                    name
                ))
            })
    }

    /// Implementation in dispatch table slot `slot`, reached through the
    /// table pointer of the static class's layout
    fn vtable_entry(
        &self,
        receiver: &RtValue,
        static_class: ClassId,
        slot: usize,
    ) -> Result<MethodRef, RtError> {
        let obj = self.instance(receiver)?;
        let path = self
            .resolved
            .layout(static_class)
            .vtable_path
            .as_ref()
            .ok_or_else(|| fault("slot dispatch without a dispatch table"))?;
        let hops = self.cast_hops(obj.class, static_class)? + path.hops();
        let installed = {
            let body = obj.body.borrow();
            level(&body, hops)?
                .vtable
                .ok_or_else(|| fault("no dispatch table installed"))?
        };
        self.resolved
            .layout(installed)
            .vtable
            .as_ref()
            .and_then(|table| table.entries.get(slot))
            .map(|entry| entry.implementation)
            .ok_or_else(|| fault(format!("dispatch table slot {} out of bounds", slot)))
    }

    fn load_attr(&self, object: &RtValue, name: &str) -> Result<RtValue, RtError> {
        let RtValue::Object(obj) = object else {
            return Err(raise("AttributeError", format!("no attribute '{}'", name)));
        };
        let module = &self.resolved.module;
        if let Some(method) = module.find_method(obj.class, name) {
            if module.method(method).flags.kind == MethodKind::Getter {
                return self.call_func(&module.method(method).func, Some(object.clone()), vec![]);
            }
        }
        match module.find_field(obj.class, name) {
            Some(field) => self.read_field(object, field),
            None => Err(raise("AttributeError", format!("no attribute '{}'", name))),
        }
    }

    fn store_attr(&self, object: &RtValue, name: &str, value: RtValue) -> Result<(), RtError> {
        let RtValue::Object(obj) = object else {
            return Err(raise("AttributeError", format!("no attribute '{}'", name)));
        };
        let module = &self.resolved.module;
        if let Some(setter) = module.find_setter(obj.class, name) {
            self.call_func(&module.method(setter).func, Some(object.clone()), vec![value])?;
            return Ok(());
        }
        match module.find_field(obj.class, name) {
            Some(field) => self.write_field(object, field, value),
            None => Err(raise("AttributeError", format!("no attribute '{}'", name))),
        }
    }

    fn print_object(&self, value: &RtValue, repr: bool) -> Result<String, RtError> {
        let obj = self.instance(value)?;
        let module = &self.resolved.module;
        let str_method = module.find_special(obj.class, SpecialMethod::Str);
        let repr_method = module.find_special(obj.class, SpecialMethod::Repr);
        let chosen = match (repr, str_method, repr_method) {
            (false, Some(method), _) => Some(method),
            (_, _, Some(method)) => Some(method),
            _ => None,
        };
        if let Some(method) = chosen {
            let result = self.call_func(&module.method(method).func, Some(value.clone()), vec![])?;
            return self.str_of(&result);
        }
        let class = module.class(obj.class);
        if class.is_dataclass && str_method.is_none() {
            let mut parts = Vec::new();
            for field in module.all_fields(obj.class) {
                let current = self.read_field(value, field)?;
                parts.push(format!(
                    "{}={}",
                    module.field(field).name,
                    self.repr_of(&current)?
                ));
            }
            return Ok(format!("{}({})", class.name, parts.join(", ")));
        }
        Ok(format!("<{} object>", class.name))
    }

    // ------------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------------

    fn call_func(
        &self,
        func: &FuncIR,
        receiver: Option<RtValue>,
        args: Vec<RtValue>,
    ) -> Result<RtValue, RtError> {
        if args.len() != func.params.len() {
            return Err(raise(
                "TypeError",
                format!(
                    "`{}` takes {} positional arguments but {} were given",
                    func.name,
                    func.params.len(),
                    args.len()
                ),
            ));
        }
        let mut frame = Frame {
            this: None,
            locals: HashMap::new(),
            temps: HashMap::new(),
            handling: Vec::new(),
        };
        match func.receiver {
            Receiver::Instance(_) => frame.this = receiver,
            Receiver::Class(_) => {
                let cls = receiver.ok_or_else(|| fault("classmethod without its class"))?;
                frame.locals.insert("cls".to_string(), cls);
            }
            Receiver::None => {}
        }
        for local in &func.locals {
            frame.locals.insert(local.name.clone(), zero(&local.ty));
        }
        for (param, arg) in func.params.iter().zip(args) {
            frame.locals.insert(param.name.clone(), coerce(arg, &param.ty));
        }
        match self.block(&mut frame, &func.body)? {
            Flow::Return(value) => Ok(coerce(value, &func.ret)),
            _ => Ok(zero(&func.ret)),
        }
    }

    fn invoke(
        &self,
        receiver: RtValue,
        class: ClassId,
        method: MethodRef,
        via: CallVia,
        args: Vec<RtValue>,
    ) -> Result<RtValue, RtError> {
        let target = match via {
            CallVia::Exact => method,
            CallVia::Dispatch => match self.resolved.dispatch(class, method) {
                Dispatch::Direct(target) => target,
                Dispatch::Slot(slot) => self.vtable_entry(&receiver, class, slot)?,
            },
        };
        let func = &self.resolved.module.method(target).func;
        self.call_func(func, Some(receiver), args)
    }

    /// Call by name, as the runtime does through `mp_load_method`
    fn dynamic_call(
        &self,
        receiver: &RtValue,
        name: &str,
        args: Vec<RtValue>,
    ) -> Result<RtValue, RtError> {
        let module = &self.resolved.module;
        match receiver {
            RtValue::Object(obj) => {
                let method = module
                    .find_method(obj.class, name)
                    .ok_or_else(|| raise("AttributeError", format!("no attribute '{}'", name)))?;
                let ir = module.method(method);
                match ir.flags.kind {
                    MethodKind::Instance => self.call_func(&ir.func, Some(receiver.clone()), args),
                    MethodKind::Static => self.call_func(&ir.func, None, args),
                    MethodKind::ClassMethod => {
                        self.call_func(&ir.func, Some(RtValue::Class(obj.class)), args)
                    }
                    MethodKind::Getter | MethodKind::Setter => {
                        Err(raise("TypeError", "property object isn't callable"))
                    }
                }
            }
            RtValue::Class(class) => {
                let method = module
                    .find_method(*class, name)
                    .ok_or_else(|| raise("AttributeError", format!("no attribute '{}'", name)))?;
                let ir = module.method(method);
                match ir.flags.kind {
                    MethodKind::Static => self.call_func(&ir.func, None, args),
                    MethodKind::ClassMethod => self.call_func(&ir.func, Some(receiver.clone()), args),
                    _ => Err(raise("TypeError", "unbound method call")),
                }
            }
            RtValue::List(items) => match (name, args.as_slice()) {
                ("append", [item]) => {
                    items.borrow_mut().push(item.clone());
                    Ok(RtValue::None)
                }
                ("pop", []) => items
                    .borrow_mut()
                    .pop()
                    .ok_or_else(|| raise("IndexError", "pop from empty list")),
                _ => Err(raise("AttributeError", format!("list has no attribute '{}'", name))),
            },
            RtValue::Str(s) => match name {
                "upper" => Ok(RtValue::Str(s.to_uppercase())),
                "lower" => Ok(RtValue::Str(s.to_lowercase())),
                _ => Err(raise("AttributeError", format!("str has no attribute '{}'", name))),
            },
            RtValue::Dict(entries) => match (name, args.as_slice()) {
                ("keys", []) => Ok(RtValue::list(
                    entries.borrow().iter().map(|(k, _)| k.clone()).collect(),
                )),
                ("values", []) => Ok(RtValue::list(
                    entries.borrow().iter().map(|(_, v)| v.clone()).collect(),
                )),
                _ => Err(raise("AttributeError", format!("dict has no attribute '{}'", name))),
            },
            other => Err(raise(
                "AttributeError",
                format!("{:?} has no attribute '{}'", other, name),
            )),
        }
    }

    fn runtime_call(&self, builtin: Builtin, args: Vec<RtValue>) -> Result<RtValue, RtError> {
        match (builtin, args.as_slice()) {
            (Builtin::Print, _) => {
                let line = args
                    .iter()
                    .map(|arg| self.str_of(arg))
                    .collect::<Result<Vec<_>, _>>()?
                    .join(" ");
                self.output.borrow_mut().push(line);
                Ok(RtValue::None)
            }
            (Builtin::Len, [value]) => self.len(value).map(RtValue::Int),
            (Builtin::Abs, [RtValue::Int(v)]) => Ok(RtValue::Int(v.abs())),
            (Builtin::Abs, [RtValue::Float(v)]) => Ok(RtValue::Float(v.abs())),
            (Builtin::Int, [RtValue::Float(v)]) => Ok(RtValue::Int(v.trunc() as i64)),
            (Builtin::Int, [RtValue::Str(s)]) => s
                .trim()
                .parse()
                .map(RtValue::Int)
                .map_err(|_| raise("ValueError", format!("invalid syntax for integer: '{}'", s))),
            (Builtin::Int, [value]) if value.is_number() => {
                value.as_int().map(RtValue::Int).ok_or_else(|| fault("int()"))
            }
            (Builtin::Float, [RtValue::Str(s)]) => s
                .trim()
                .parse()
                .map(RtValue::Float)
                .map_err(|_| raise("ValueError", format!("can't convert to float: '{}'", s))),
            (Builtin::Float, [value]) if value.is_number() => {
                Ok(RtValue::Float(to_float(value)))
            }
            (Builtin::Str, [value]) => self.str_of(value).map(RtValue::Str),
            (Builtin::Bool, [value]) => self.truthy(value).map(RtValue::Bool),
            (Builtin::Min | Builtin::Max, _) => {
                let items = match args.as_slice() {
                    [single] => self.items(single)?,
                    _ => args.clone(),
                };
                let mut best: Option<RtValue> = None;
                for item in items {
                    best = Some(match best {
                        None => item,
                        Some(current) => {
                            let op = if builtin == Builtin::Min { CmpOp::Lt } else { CmpOp::Gt };
                            if self.compare(op, &item, &current)? {
                                item
                            } else {
                                current
                            }
                        }
                    });
                }
                best.ok_or_else(|| raise("ValueError", "arg is an empty sequence"))
            }
            (Builtin::ListAppend, [RtValue::List(items), item]) => {
                items.borrow_mut().push(item.clone());
                Ok(RtValue::None)
            }
            _ => Err(raise(
                "TypeError",
                format!("unsupported arguments for {}()", builtin.name()),
            )),
        }
    }

    fn len(&self, value: &RtValue) -> Result<i64, RtError> {
        Ok(match value {
            RtValue::Str(s) => s.chars().count() as i64,
            RtValue::List(items) | RtValue::Set(items) => items.borrow().len() as i64,
            RtValue::Tuple(items) => items.len() as i64,
            RtValue::Dict(entries) => entries.borrow().len() as i64,
            RtValue::Object(obj) => {
                let module = &self.resolved.module;
                let method = module
                    .find_special(obj.class, SpecialMethod::Len)
                    .ok_or_else(|| raise("TypeError", "object has no len"))?;
                let result = self.call_func(&module.method(method).func, Some(value.clone()), vec![])?;
                result.as_int().ok_or_else(|| fault("__len__ result"))?
            }
            _ => return Err(raise("TypeError", "object has no len")),
        })
    }

    /// Elements of an iterable, for builtins taking one
    fn items(&self, value: &RtValue) -> Result<Vec<RtValue>, RtError> {
        Ok(match value {
            RtValue::List(items) | RtValue::Set(items) => items.borrow().clone(),
            RtValue::Tuple(items) => items.as_ref().clone(),
            RtValue::Str(s) => s.chars().map(|c| RtValue::Str(c.to_string())).collect(),
            RtValue::Dict(entries) => entries.borrow().iter().map(|(k, _)| k.clone()).collect(),
            RtValue::Object(_) => {
                let iterator = self.get_iter(value)?;
                let mut items = Vec::new();
                while let Some(item) = self.iter_next_slot(&iterator)? {
                    items.push(item);
                }
                items
            }
            _ => return Err(raise("TypeError", "object not iterable")),
        })
    }

    // ------------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------------

    fn truthy(&self, value: &RtValue) -> Result<bool, RtError> {
        Ok(match value {
            RtValue::None => false,
            RtValue::Int(v) => *v != 0,
            RtValue::Float(v) => *v != 0.0,
            RtValue::Bool(b) => *b,
            RtValue::Str(s) => !s.is_empty(),
            RtValue::List(items) | RtValue::Set(items) => !items.borrow().is_empty(),
            RtValue::Tuple(items) => !items.is_empty(),
            RtValue::Dict(entries) => !entries.borrow().is_empty(),
            RtValue::Object(obj) => {
                let module = &self.resolved.module;
                if let Some(method) = module.find_special(obj.class, SpecialMethod::Bool) {
                    let result =
                        self.call_func(&module.method(method).func, Some(value.clone()), vec![])?;
                    return self.truthy(&result);
                }
                if module.find_special(obj.class, SpecialMethod::Len).is_some() {
                    return Ok(self.len(value)? != 0);
                }
                true
            }
            RtValue::Class(_) | RtValue::Exception(_) | RtValue::Slice(..) => true,
        })
    }

    fn equal(&self, a: &RtValue, b: &RtValue) -> Result<bool, RtError> {
        self.compare(CmpOp::Eq, a, b)
    }

    fn compare(&self, op: CmpOp, lhs: &RtValue, rhs: &RtValue) -> Result<bool, RtError> {
        match op {
            CmpOp::Is => return Ok(identical(lhs, rhs)),
            CmpOp::IsNot => return Ok(!identical(lhs, rhs)),
            CmpOp::In => return self.contains(rhs, lhs),
            CmpOp::NotIn => return Ok(!self.contains(rhs, lhs)?),
            _ => {}
        }

        if let RtValue::Object(_) = lhs {
            if let Some(result) = self.binary_op_slot(op, lhs, rhs)? {
                return self.truthy(&result);
            }
            return match op {
                CmpOp::NotEq => match self.binary_op_slot(CmpOp::Eq, lhs, rhs)? {
                    Some(result) => Ok(!self.truthy(&result)?),
                    None => Ok(!identical(lhs, rhs)),
                },
                CmpOp::Eq => Ok(identical(lhs, rhs)),
                _ => Err(raise(
                    "TypeError",
                    format!("unsupported types for {}", op.symbol()),
                )),
            };
        }

        if lhs.is_number() && rhs.is_number() {
            let ordering = match (lhs, rhs) {
                (RtValue::Float(_), _) | (_, RtValue::Float(_)) => {
                    to_float(lhs).partial_cmp(&to_float(rhs))
                }
                _ => lhs.as_int().partial_cmp(&rhs.as_int()),
            };
            return Ok(ordering.map_or(false, |o| ordering_holds(op, o)));
        }
        match (lhs, rhs) {
            (RtValue::Str(a), RtValue::Str(b)) => Ok(ordering_holds(op, a.cmp(b))),
            (RtValue::List(a), RtValue::List(b)) if matches!(op, CmpOp::Eq | CmpOp::NotEq) => {
                let (a, b) = (a.borrow().clone(), b.borrow().clone());
                let mut same = a.len() == b.len();
                for (x, y) in a.iter().zip(&b) {
                    if !same {
                        break;
                    }
                    same = self.equal(x, y)?;
                }
                Ok(same == (op == CmpOp::Eq))
            }
            _ => match op {
                CmpOp::Eq => Ok(identical(lhs, rhs)),
                CmpOp::NotEq => Ok(!identical(lhs, rhs)),
                _ => Err(raise(
                    "TypeError",
                    format!("unsupported types for {}", op.symbol()),
                )),
            },
        }
    }

    fn contains(&self, container: &RtValue, item: &RtValue) -> Result<bool, RtError> {
        if let (RtValue::Str(haystack), RtValue::Str(needle)) = (container, item) {
            return Ok(haystack.contains(needle.as_str()));
        }
        for candidate in self.items(container)? {
            if self.equal(&candidate, item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn binary(&self, op: BinOp, lhs: RtValue, rhs: RtValue) -> Result<RtValue, RtError> {
        match (&lhs, &rhs) {
            (RtValue::Int(_) | RtValue::Bool(_), RtValue::Int(_) | RtValue::Bool(_)) => {
                int_arith(op, lhs.as_int().unwrap_or(0), rhs.as_int().unwrap_or(0))
            }
            (a, b) if a.is_number() && b.is_number() => float_arith(op, to_float(a), to_float(b)),
            (RtValue::Str(a), RtValue::Str(b)) if op == BinOp::Add => {
                Ok(RtValue::Str(format!("{}{}", a, b)))
            }
            (RtValue::Str(s), RtValue::Int(n)) if op == BinOp::Mul => {
                Ok(RtValue::Str(s.repeat((*n).max(0) as usize)))
            }
            (RtValue::List(a), RtValue::List(b)) if op == BinOp::Add => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Ok(RtValue::list(items))
            }
            _ => Err(raise(
                "TypeError",
                format!("unsupported types for {}", op.symbol()),
            )),
        }
    }

    fn unary(&self, op: UnaryOp, operand: RtValue) -> Result<RtValue, RtError> {
        match (op, &operand) {
            (UnaryOp::Not, _) => Ok(RtValue::Bool(!self.truthy(&operand)?)),
            (UnaryOp::Neg, RtValue::Float(v)) => Ok(RtValue::Float(-v)),
            (UnaryOp::Pos, RtValue::Float(_)) => Ok(operand),
            (UnaryOp::Neg, value) if value.is_number() => {
                Ok(RtValue::Int(-value.as_int().unwrap_or(0)))
            }
            (UnaryOp::Pos, value) if value.is_number() => {
                Ok(RtValue::Int(value.as_int().unwrap_or(0)))
            }
            (UnaryOp::Invert, RtValue::Int(v)) => Ok(RtValue::Int(!v)),
            _ => Err(raise("TypeError", "unsupported type for unary operator")),
        }
    }

    fn get_item(&self, container: &RtValue, index: &RtValue) -> Result<RtValue, RtError> {
        if let RtValue::Slice(lower, upper, step) = index {
            return match container {
                RtValue::List(items) => {
                    let items = items.borrow();
                    let picked = slice_indices(*lower, *upper, *step, items.len())?;
                    Ok(RtValue::list(picked.into_iter().map(|i| items[i].clone()).collect()))
                }
                RtValue::Tuple(items) => {
                    let picked = slice_indices(*lower, *upper, *step, items.len())?;
                    Ok(RtValue::Tuple(Rc::new(
                        picked.into_iter().map(|i| items[i].clone()).collect(),
                    )))
                }
                RtValue::Str(s) => {
                    let chars: Vec<char> = s.chars().collect();
                    let picked = slice_indices(*lower, *upper, *step, chars.len())?;
                    Ok(RtValue::Str(picked.into_iter().map(|i| chars[i]).collect()))
                }
                _ => Err(raise("TypeError", "object isn't subscriptable")),
            };
        }
        match container {
            RtValue::List(items) => {
                let items = items.borrow();
                let i = sequence_index(index, items.len(), "list")?;
                Ok(items[i].clone())
            }
            RtValue::Tuple(items) => {
                let i = sequence_index(index, items.len(), "tuple")?;
                Ok(items[i].clone())
            }
            RtValue::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = sequence_index(index, chars.len(), "string")?;
                Ok(RtValue::Str(chars[i].to_string()))
            }
            RtValue::Dict(entries) => {
                let entries = entries.borrow().clone();
                for (key, value) in entries {
                    if self.equal(&key, index)? {
                        return Ok(value);
                    }
                }
                Err(raise("KeyError", self.repr_of(index)?))
            }
            _ => Err(raise("TypeError", "object isn't subscriptable")),
        }
    }

    fn set_item(&self, container: &RtValue, index: &RtValue, value: RtValue) -> Result<(), RtError> {
        match container {
            RtValue::List(items) => {
                let mut items = items.borrow_mut();
                let i = sequence_index(index, items.len(), "list")?;
                items[i] = value;
                Ok(())
            }
            RtValue::Dict(entries) => {
                let position = {
                    let current = entries.borrow().clone();
                    let mut found = None;
                    for (i, (key, _)) in current.iter().enumerate() {
                        if self.equal(key, index)? {
                            found = Some(i);
                            break;
                        }
                    }
                    found
                };
                let mut entries = entries.borrow_mut();
                match position {
                    Some(i) => entries[i].1 = value,
                    None => entries.push((index.clone(), value)),
                }
                Ok(())
            }
            _ => Err(raise("TypeError", "object doesn't support item assignment")),
        }
    }

    // ------------------------------------------------------------------------
    // Values and instructions
    // ------------------------------------------------------------------------

    fn value(&self, frame: &Frame, value: &Value) -> Result<RtValue, RtError> {
        Ok(match value {
            Value::Const(c) => constant(c),
            Value::Name(local) => frame
                .locals
                .get(&local.name)
                .cloned()
                .ok_or_else(|| fault(format!("unbound local `{}`", local.name)))?,
            Value::SelfRef { .. } => frame
                .this
                .clone()
                .ok_or_else(|| fault("self outside an instance method"))?,
            Value::ClassRef { class, .. } => RtValue::Class(*class),
            Value::Temp(temp) => frame
                .temps
                .get(&temp.id.0)
                .cloned()
                .ok_or_else(|| fault(format!("{} read before its instruction ran", temp.id)))?,
            Value::BinOp {
                op,
                left,
                right,
                ty,
                ..
            } => {
                let left = self.value(frame, left)?;
                let right = self.value(frame, right)?;
                coerce(self.binary(*op, left, right)?, ty)
            }
            Value::UnaryOp {
                op, operand, ty, ..
            } => {
                let operand = self.value(frame, operand)?;
                coerce(self.unary(*op, operand)?, ty)
            }
            Value::Compare { left, comparisons } => {
                let mut lhs = self.value(frame, left)?;
                let rights = comparisons
                    .iter()
                    .map(|c| self.value(frame, &c.right))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut result = true;
                for (comparison, rhs) in comparisons.iter().zip(rights) {
                    if !self.compare(comparison.op, &lhs, &rhs)? {
                        result = false;
                        break;
                    }
                    lhs = rhs;
                }
                RtValue::Bool(result)
            }
            Value::BoolOp { op, values, ty } => {
                let mut current = RtValue::None;
                for (i, value) in values.iter().enumerate() {
                    current = self.value(frame, value)?;
                    let last = i + 1 == values.len();
                    let truth = self.truthy(&current)?;
                    if !last && ((*op == BoolOp::And && !truth) || (*op == BoolOp::Or && truth)) {
                        break;
                    }
                }
                if Repr::from(ty) == Repr::Bool {
                    RtValue::Bool(self.truthy(&current)?)
                } else {
                    current
                }
            }
            Value::FieldRead { object, field, .. } => {
                let object = self.value(frame, object)?;
                self.read_field(&object, *field)?
            }
            Value::Select {
                test,
                body,
                orelse,
                ty,
            } => {
                let chosen = if self.truthy(&self.value(frame, test)?)? {
                    body
                } else {
                    orelse
                };
                coerce(self.value(frame, chosen)?, ty)
            }
        })
    }

    fn values(&self, frame: &Frame, values: &[Value]) -> Result<Vec<RtValue>, RtError> {
        values.iter().map(|v| self.value(frame, v)).collect()
    }

    fn prelude(&self, frame: &mut Frame, prelude: &[Instr]) -> Result<(), RtError> {
        for instr in prelude {
            self.instr(frame, instr)?;
        }
        Ok(())
    }

    fn instr(&self, frame: &mut Frame, instr: &Instr) -> Result<(), RtError> {
        let module = &self.resolved.module;
        let produced = match instr {
            Instr::Call { func, args, .. } => {
                let func = module
                    .get_function(*func)
                    .ok_or_else(|| fault(format!("no function {}", func)))?;
                let args = self.values(frame, args)?;
                Some(self.call_func(func, None, args)?)
            }
            Instr::ExternCall { function, .. } => {
                return Err(fault(format!(
                    "native symbol `{}` is not available to the interpreter",
                    function.symbol
                )))
            }
            Instr::MethodCall {
                receiver,
                class,
                method,
                via,
                args,
                ..
            } => {
                let receiver = self.value(frame, receiver)?;
                let args = self.values(frame, args)?;
                Some(self.invoke(receiver, *class, *method, *via, args)?)
            }
            Instr::StaticCall { method, args, .. } => {
                let args = self.values(frame, args)?;
                Some(self.call_func(&module.method(*method).func, None, args)?)
            }
            Instr::ClassMethodCall {
                cls, method, args, ..
            } => {
                let cls = self.value(frame, cls)?;
                let args = self.values(frame, args)?;
                Some(self.call_func(&module.method(*method).func, Some(cls), args)?)
            }
            Instr::DynamicCall {
                receiver,
                method,
                args,
                ..
            } => {
                let receiver = self.value(frame, receiver)?;
                let args = self.values(frame, args)?;
                Some(self.dynamic_call(&receiver, method, args)?)
            }
            Instr::CallObject { callee, args, .. } => {
                let callee = self.value(frame, callee)?;
                let args = self.values(frame, args)?;
                match callee {
                    RtValue::Class(class) => Some(self.construct(class, args)?),
                    _ => return Err(raise("TypeError", "object isn't callable")),
                }
            }
            Instr::New { class, args, .. } => {
                let args = self.values(frame, args)?;
                Some(self.construct(*class, args)?)
            }
            Instr::ContainerNew { kind, items, .. } => {
                let items = self.values(frame, items)?;
                Some(match kind {
                    ContainerKind::List => RtValue::list(items),
                    ContainerKind::Tuple => RtValue::Tuple(Rc::new(items)),
                    ContainerKind::Set => {
                        let mut unique: Vec<RtValue> = Vec::new();
                        for item in items {
                            let mut seen = false;
                            for existing in &unique {
                                if self.equal(existing, &item)? {
                                    seen = true;
                                    break;
                                }
                            }
                            if !seen {
                                unique.push(item);
                            }
                        }
                        RtValue::Set(Rc::new(RefCell::new(unique)))
                    }
                    ContainerKind::Dict => {
                        return Err(fault("dict built from a sequence of items"))
                    }
                })
            }
            Instr::DictNew { entries, .. } => {
                let dict = RtValue::Dict(Rc::new(RefCell::new(Vec::new())));
                for (key, value) in entries {
                    let key = self.value(frame, key)?;
                    let value = self.value(frame, value)?;
                    self.set_item(&dict, &key, value)?;
                }
                Some(dict)
            }
            Instr::SliceNew {
                lower, upper, step, ..
            } => {
                let mut bounds = [None; 3];
                for (slot, bound) in bounds.iter_mut().zip([lower, upper, step]) {
                    if let Some(bound) = bound {
                        *slot = match self.value(frame, bound)? {
                            RtValue::None => None,
                            value => Some(value.as_int().ok_or_else(|| {
                                raise("TypeError", "slice indices must be integers")
                            })?),
                        };
                    }
                }
                Some(RtValue::Slice(bounds[0], bounds[1], bounds[2]))
            }
            Instr::GetItem {
                container, index, ..
            } => {
                let container = self.value(frame, container)?;
                let index = self.value(frame, index)?;
                Some(self.get_item(&container, &index)?)
            }
            Instr::SetItem {
                container,
                index,
                value,
            } => {
                let container = self.value(frame, container)?;
                let index = self.value(frame, index)?;
                let value = self.value(frame, value)?;
                self.set_item(&container, &index, value)?;
                None
            }
            Instr::FieldWrite {
                object,
                field,
                value,
            } => {
                let object = self.value(frame, object)?;
                let value = self.value(frame, value)?;
                self.write_field(&object, *field, value)?;
                None
            }
            Instr::LoadAttr { object, attr, .. } => {
                let object = self.value(frame, object)?;
                Some(self.load_attr(&object, attr)?)
            }
            Instr::StoreAttr {
                object,
                attr,
                value,
            } => {
                let object = self.value(frame, object)?;
                let value = self.value(frame, value)?;
                self.store_attr(&object, attr, value)?;
                None
            }
            Instr::RuntimeCall { func, args, .. } => {
                let args = self.values(frame, args)?;
                Some(self.runtime_call(*func, args)?)
            }
            Instr::ShortCircuit {
                result,
                op,
                first,
                rest,
            } => {
                let mut current = self.value(frame, first)?;
                for branch in rest {
                    let truth = self.truthy(&current)?;
                    if (*op == BoolOp::And && !truth) || (*op == BoolOp::Or && truth) {
                        break;
                    }
                    self.prelude(frame, &branch.prelude)?;
                    current = self.value(frame, &branch.value)?;
                }
                if result.repr() == Repr::Bool {
                    current = RtValue::Bool(self.truthy(&current)?);
                }
                frame.temps.insert(result.id.0, coerce(current, &result.ty));
                None
            }
            Instr::Select {
                result,
                test,
                body,
                orelse,
            } => {
                let branch = if self.truthy(&self.value(frame, test)?)? {
                    body
                } else {
                    orelse
                };
                self.prelude(frame, &branch.prelude)?;
                let value = self.value(frame, &branch.value)?;
                frame.temps.insert(result.id.0, coerce(value, &result.ty));
                None
            }
        };
        if let (Some(temp), Some(value)) = (instr.result(), produced) {
            frame.temps.insert(temp.id.0, coerce(value, &temp.ty));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------------

    fn block(&self, frame: &mut Frame, body: &[Stmt]) -> Result<Flow, RtError> {
        for stmt in body {
            match self.stmt(frame, stmt)? {
                Flow::Next => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Next)
    }

    /// One loop iteration; `Some` ends the loop with that outcome
    fn iteration(&self, frame: &mut Frame, body: &[Stmt]) -> Result<Option<Flow>, RtError> {
        Ok(match self.block(frame, body)? {
            Flow::Next | Flow::Continue => None,
            Flow::Break => Some(Flow::Next),
            ret @ Flow::Return(_) => Some(ret),
        })
    }

    fn stmt(&self, frame: &mut Frame, stmt: &Stmt) -> Result<Flow, RtError> {
        match stmt {
            Stmt::Eval { prelude, value } => {
                self.prelude(frame, prelude)?;
                if let Some(value) = value {
                    self.value(frame, value)?;
                }
                Ok(Flow::Next)
            }
            Stmt::Assign {
                prelude,
                target,
                value,
            } => {
                self.prelude(frame, prelude)?;
                let value = coerce(self.value(frame, value)?, &target.ty);
                frame.locals.insert(target.name.clone(), value);
                Ok(Flow::Next)
            }
            Stmt::Return { prelude, value } => {
                self.prelude(frame, prelude)?;
                let value = match value {
                    Some(value) => self.value(frame, value)?,
                    None => RtValue::None,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If {
                prelude,
                test,
                body,
                orelse,
            } => {
                self.prelude(frame, prelude)?;
                if self.truthy(&self.value(frame, test)?)? {
                    self.block(frame, body)
                } else {
                    self.block(frame, orelse)
                }
            }
            Stmt::While {
                prelude,
                test,
                body,
            } => loop {
                self.prelude(frame, prelude)?;
                if !self.truthy(&self.value(frame, test)?)? {
                    return Ok(Flow::Next);
                }
                if let Some(done) = self.iteration(frame, body)? {
                    return Ok(done);
                }
            },
            Stmt::ForRange {
                prelude,
                var,
                start,
                stop,
                step,
                body,
            } => {
                self.prelude(frame, prelude)?;
                let start = self.value(frame, start)?;
                let stop = self.value(frame, stop)?;
                let (mut i, stop) = match (start.as_int(), stop.as_int()) {
                    (Some(start), Some(stop)) => (start, stop),
                    _ => return Err(raise("TypeError", "range() bounds must be int")),
                };
                while (*step > 0 && i < stop) || (*step < 0 && i > stop) {
                    frame.locals.insert(var.name.clone(), RtValue::Int(i));
                    if let Some(done) = self.iteration(frame, body)? {
                        return Ok(done);
                    }
                    i += step;
                }
                Ok(Flow::Next)
            }
            Stmt::ForIter {
                prelude,
                var,
                iterable,
                body,
            } => {
                self.prelude(frame, prelude)?;
                let iterable = self.value(frame, iterable)?;
                if let RtValue::Object(_) = iterable {
                    let iterator = self.get_iter(&iterable)?;
                    while let Some(item) = self.iter_next_slot(&iterator)? {
                        frame.locals.insert(var.name.clone(), coerce(item, &var.ty));
                        if let Some(done) = self.iteration(frame, body)? {
                            return Ok(done);
                        }
                    }
                    return Ok(Flow::Next);
                }
                // Lists are read live, so appends during the loop are seen
                let mut index = 0;
                loop {
                    let item = match &iterable {
                        RtValue::List(items) => items.borrow().get(index).cloned(),
                        other => self.items(other)?.get(index).cloned(),
                    };
                    let Some(item) = item else {
                        return Ok(Flow::Next);
                    };
                    frame.locals.insert(var.name.clone(), coerce(item, &var.ty));
                    if let Some(done) = self.iteration(frame, body)? {
                        return Ok(done);
                    }
                    index += 1;
                }
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Raise { prelude, kind } => {
                self.prelude(frame, prelude)?;
                let exception = match kind {
                    RaiseKind::Builtin { class, message } => {
                        let message = match message {
                            Some(message) => Some(self.str_of(&self.value(frame, message)?)?),
                            None => None,
                        };
                        Rc::new(Exception {
                            class: class.clone(),
                            message,
                        })
                    }
                    RaiseKind::Object(value) => match self.value(frame, value)? {
                        RtValue::Exception(exc) => exc,
                        _ => {
                            return Err(raise(
                                "TypeError",
                                "exceptions must derive from BaseException",
                            ))
                        }
                    },
                    RaiseKind::Reraise => frame
                        .handling
                        .last()
                        .cloned()
                        .ok_or_else(|| fault("re-raise outside a handler"))?,
                };
                Err(RtError::Raised(exception))
            }
            Stmt::Try {
                body,
                handlers,
                orelse,
                finally,
            } => {
                let outcome = match self.block(frame, body) {
                    Ok(Flow::Next) => self.block(frame, orelse),
                    Ok(flow) => Ok(flow),
                    Err(RtError::Raised(exc)) => self.handle(frame, handlers, exc),
                    Err(e) => Err(e),
                };
                if finally.is_empty() {
                    return outcome;
                }
                match self.block(frame, finally)? {
                    Flow::Next => outcome,
                    other => Ok(other),
                }
            }
        }
    }

    fn handle(
        &self,
        frame: &mut Frame,
        handlers: &[Handler],
        exception: Rc<Exception>,
    ) -> Result<Flow, RtError> {
        let handler = handlers.iter().find(|h| match &h.class {
            Some(class) => exception_is_subclass(&exception.class, class),
            None => true,
        });
        let Some(handler) = handler else {
            return Err(RtError::Raised(exception));
        };
        if let Some(bind) = &handler.bind {
            frame
                .locals
                .insert(bind.name.clone(), RtValue::Exception(exception.clone()));
        }
        frame.handling.push(exception);
        let result = self.block(frame, &handler.body);
        frame.handling.pop();
        result
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn level(body: &Struct, hops: u32) -> Result<&Struct, RtError> {
    let mut current = body;
    for _ in 0..hops {
        current = current
            .base
            .as_deref()
            .ok_or_else(|| fault("access path leaves the struct"))?;
    }
    Ok(current)
}

fn level_mut(body: &mut Struct, hops: u32) -> Result<&mut Struct, RtError> {
    let mut current = body;
    for _ in 0..hops {
        current = current
            .base
            .as_deref_mut()
            .ok_or_else(|| fault("access path leaves the struct"))?;
    }
    Ok(current)
}

fn constant(value: &Const) -> RtValue {
    match value {
        Const::Int(v) => RtValue::Int(*v),
        Const::Float(v) => RtValue::Float(*v),
        Const::Bool(b) => RtValue::Bool(*b),
        Const::Str(s) => RtValue::Str(s.clone()),
        Const::None => RtValue::None,
    }
}

/// Initial value of a native slot of type `ty`
fn zero(ty: &ResolvedType) -> RtValue {
    match ty {
        ResolvedType::Int => RtValue::Int(0),
        ResolvedType::Float => RtValue::Float(0.0),
        ResolvedType::Bool => RtValue::Bool(false),
        _ => RtValue::None,
    }
}

/// Conversion performed when a value is stored into a native slot
fn coerce(value: RtValue, ty: &ResolvedType) -> RtValue {
    match (ty, value) {
        (ResolvedType::Float, RtValue::Int(v)) => RtValue::Float(v as f64),
        (ResolvedType::Float, RtValue::Bool(b)) => RtValue::Float(b as i64 as f64),
        (ResolvedType::Int, RtValue::Bool(b)) => RtValue::Int(b as i64),
        (_, value) => value,
    }
}

fn to_float(value: &RtValue) -> f64 {
    match value {
        RtValue::Float(v) => *v,
        other => other.as_int().unwrap_or(0) as f64,
    }
}

fn identical(a: &RtValue, b: &RtValue) -> bool {
    match (a, b) {
        (RtValue::None, RtValue::None) => true,
        (RtValue::Int(x), RtValue::Int(y)) => x == y,
        (RtValue::Bool(x), RtValue::Bool(y)) => x == y,
        (RtValue::Float(x), RtValue::Float(y)) => x == y,
        (RtValue::Str(x), RtValue::Str(y)) => x == y,
        (RtValue::Object(x), RtValue::Object(y)) => Rc::ptr_eq(x, y),
        (RtValue::List(x), RtValue::List(y)) => Rc::ptr_eq(x, y),
        (RtValue::Class(x), RtValue::Class(y)) => x == y,
        (RtValue::Exception(x), RtValue::Exception(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

fn ordering_holds(op: CmpOp, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        CmpOp::Eq => ordering == Equal,
        CmpOp::NotEq => ordering != Equal,
        CmpOp::Lt => ordering == Less,
        CmpOp::LtE => ordering != Greater,
        CmpOp::Gt => ordering == Greater,
        CmpOp::GtE => ordering != Less,
        _ => false,
    }
}

fn sequence_index(index: &RtValue, len: usize, kind: &str) -> Result<usize, RtError> {
    let i = index
        .as_int()
        .ok_or_else(|| raise("TypeError", format!("{} indices must be integers", kind)))?;
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(raise("IndexError", format!("{} index out of range", kind)));
    }
    Ok(resolved as usize)
}

/// Positions selected by `[lower:upper:step]` over a sequence of `len` items
fn slice_indices(
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
    len: usize,
) -> Result<Vec<usize>, RtError> {
    let len = len as i64;
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(raise("ValueError", "slice step cannot be zero"));
    }
    let (floor, ceiling) = if step > 0 { (0, len) } else { (-1, len - 1) };
    let clamp = |bound: i64| {
        let bound = if bound < 0 { bound + len } else { bound };
        bound.clamp(floor, ceiling)
    };
    let (mut i, end) = if step > 0 {
        (lower.map_or(0, clamp), upper.map_or(len, clamp))
    } else {
        (lower.map_or(len - 1, clamp), upper.map_or(-1, clamp))
    };
    let mut picked = Vec::new();
    while (step > 0 && i < end) || (step < 0 && i > end) {
        picked.push(i as usize);
        i += step;
    }
    Ok(picked)
}

fn int_arith(op: BinOp, a: i64, b: i64) -> Result<RtValue, RtError> {
    let zero_check = |message: &str| {
        if b == 0 {
            Err(raise("ZeroDivisionError", message))
        } else {
            Ok(())
        }
    };
    Ok(RtValue::Int(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            zero_check("division by zero")?;
            return Ok(RtValue::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            zero_check("integer division by zero")?;
            let q = a / b;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            zero_check("integer modulo by zero")?;
            let r = a % b;
            if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow if b < 0 => return Ok(RtValue::Float((a as f64).powf(b as f64))),
        BinOp::Pow => a.wrapping_pow(b as u32),
        BinOp::LShift => a.wrapping_shl(b as u32),
        BinOp::RShift => a >> b.min(63),
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
    }))
}

fn float_arith(op: BinOp, a: f64, b: f64) -> Result<RtValue, RtError> {
    let zero_check = |message: &str| {
        if b == 0.0 {
            Err(raise("ZeroDivisionError", message))
        } else {
            Ok(())
        }
    };
    Ok(RtValue::Float(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            zero_check("float division by zero")?;
            a / b
        }
        BinOp::FloorDiv => {
            zero_check("float divmod()")?;
            (a / b).floor()
        }
        BinOp::Mod => {
            zero_check("float modulo")?;
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => a.powf(b),
        _ => {
            return Err(raise(
                "TypeError",
                format!("unsupported types for {}", op.symbol()),
            ))
        }
    }))
}
