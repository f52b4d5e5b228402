//! AST to IR Lowering
//!
//! Converts the annotated AST into the IR representation. Types come from
//! the [`TypeOracle`]; the builder never guesses one it cannot justify, and
//! rejects syntax it cannot model with [`CompileError::Unsupported`].
//!
//! Lowering runs in two passes: declarations first (function signatures,
//! class shells, bases, fields and method signatures), then bodies, so that
//! a body can call anything declared anywhere in the module.

mod expr;
mod stmt;

use crate::ast::{self, ClassDef, Constant, Expr, FunctionDef, Span};
use crate::bindings::BindingLibrary;
use crate::error::{CompileError, CompileResult};
use crate::ir::{
    ClassIR, ClassId, Const, FieldIR, FuncIR, FuncId, Instr, Local, MethodFlags, MethodIR,
    MethodKind, MethodRef, ModuleIR, Origin, Receiver, SpecialMethod, Temp, TempId, Value,
};
use crate::oracle::{ClassSig, FunctionSig, ResolvedType, TypeOracle};
use log::{debug, trace, warn};
use rustc_hash::FxHashMap;

/// Modules whose `from ... import ...` only carries annotations
const ANNOTATION_MODULES: &[&str] = &["typing", "dataclasses", "__future__", "micropython"];

/// A body waiting for the second pass
enum Pending<'m> {
    Function(FuncId, &'m FunctionDef),
    Method(MethodRef, &'m FunctionDef),
}

/// AST to IR lowerer
pub struct Lowerer<'a> {
    /// Type information for functions, methods, locals and fields
    oracle: &'a dyn TypeOracle,
    /// External binding libraries available to `import`
    bindings: &'a [BindingLibrary],
    /// Module under construction
    module: ModuleIR,
    /// Import alias to binding library index
    imports: FxHashMap<String, usize>,

    // ---- per-function state ----
    /// Next temporary ID
    next_temp: u32,
    /// Names in scope (parameters and assigned locals)
    scope: FxHashMap<String, Local>,
    /// Non-parameter locals, in order of first assignment
    local_order: Vec<Local>,
    /// Local types reported by the oracle for the current function
    local_types: FxHashMap<String, ResolvedType>,
    /// Receiver of the current function
    receiver: Receiver,
    /// Name bound to the receiver (`self` / `cls`)
    receiver_name: Option<String>,
    /// Try depth at entry of each enclosing loop
    loop_stack: Vec<usize>,
    /// Active protected regions
    try_depth: usize,
    /// Active protected regions that have a `finally`
    finally_depth: usize,
    /// Nesting of `except` bodies
    handler_depth: usize,
}

impl<'a> Lowerer<'a> {
    /// Create a new lowerer for module `name` (C prefix `c_name`)
    pub fn new(
        oracle: &'a dyn TypeOracle,
        bindings: &'a [BindingLibrary],
        name: &str,
        c_name: &str,
    ) -> Self {
        Self {
            oracle,
            bindings,
            module: ModuleIR::new(name, c_name),
            imports: FxHashMap::default(),
            next_temp: 0,
            scope: FxHashMap::default(),
            local_order: Vec::new(),
            local_types: FxHashMap::default(),
            receiver: Receiver::None,
            receiver_name: None,
            loop_stack: Vec::new(),
            try_depth: 0,
            finally_depth: 0,
            handler_depth: 0,
        }
    }

    /// Lower an AST module to IR
    pub fn lower_module(mut self, module: &ast::Module) -> CompileResult<ModuleIR> {
        let mut pending = Vec::new();
        let mut class_defs: Vec<(ClassId, &ClassDef)> = Vec::new();

        // First pass: collect module-level declarations
        for stmt in &module.body {
            match stmt {
                ast::Stmt::FunctionDef(def) => {
                    let func = self.declare_function(def)?;
                    let id = self.module.add_function(func);
                    pending.push(Pending::Function(id, def));
                }
                ast::Stmt::ClassDef(def) => {
                    let class = self.declare_class(def)?;
                    let id = self.module.add_class(class);
                    class_defs.push((id, def));
                }
                ast::Stmt::Import {
                    module: name,
                    alias,
                    span,
                } => self.declare_import(name, alias.as_deref(), *span)?,
                ast::Stmt::ImportFrom {
                    module: name, span, ..
                } => {
                    if !ANNOTATION_MODULES.contains(&name.as_str()) {
                        return Err(CompileError::unsupported(
                            format!("`from {} import ...`", name),
                            *span,
                        ));
                    }
                }
                ast::Stmt::Expr {
                    value:
                        Expr::Constant {
                            value: Constant::Str(_),
                            ..
                        },
                    ..
                } => {}
                ast::Stmt::Pass { .. } => {}
                other => {
                    return Err(CompileError::unsupported(
                        "module-level statement other than a definition or import",
                        other.span(),
                    ))
                }
            }
        }

        // Bases, then members in base-before-derived order
        for (id, def) in &class_defs {
            self.resolve_base(*id, def)?;
        }
        let order = self.module.topological_order()?;
        for id in order {
            if let Some((_, def)) = class_defs.iter().find(|(cid, _)| *cid == id) {
                self.declare_members(id, *def, &mut pending)?;
            }
        }

        // Second pass: bodies
        for item in pending {
            match item {
                Pending::Function(id, def) => {
                    let sig = self.oracle.function(&def.name)?;
                    let func = self
                        .module
                        .get_function(id)
                        .cloned()
                        .ok_or_else(|| CompileError::internal("function vanished"))?;
                    let func = self.lower_body(func, &def.body, &def.params, sig.locals)?;
                    if let Some(slot) = self.module.get_function_mut(id) {
                        *slot = func;
                    }
                }
                Pending::Method(method, def) => {
                    let class_name = self.module.class(method.class).name.clone();
                    let key = match self.module.method(method).flags.kind {
                        MethodKind::Setter => format!("{}.setter", def.name),
                        _ => def.name.clone(),
                    };
                    let locals = self
                        .oracle
                        .class(&class_name)?
                        .methods
                        .get(&key)
                        .map(|sig| sig.locals.clone())
                        .unwrap_or_default();
                    let func = self.module.method(method).func.clone();
                    let func = self.lower_body(func, &def.body, &def.params, locals)?;
                    if let Some(class) = self.module.get_class_mut(method.class) {
                        class.methods[method.index].func = func;
                    }
                }
            }
        }

        debug!(
            "lowered module `{}`: {} function(s), {} class(es), {} statement(s)",
            self.module.name,
            self.module.function_count(),
            self.module.class_count(),
            self.module.total_statement_count()
        );
        Ok(self.module)
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    fn declare_import(&mut self, name: &str, alias: Option<&str>, span: Span) -> CompileResult<()> {
        let index = self
            .bindings
            .iter()
            .position(|lib| lib.name == name)
            .ok_or_else(|| {
                CompileError::unsupported(format!("import of non-binding module `{}`", name), span)
            })?;
        if let Some(header) = &self.bindings[index].header {
            self.module.add_include(header);
        }
        let bound = alias.unwrap_or(name).to_string();
        debug!("import binding library `{}` as `{}`", name, bound);
        self.imports.insert(bound, index);
        Ok(())
    }

    fn declare_function(&mut self, def: &FunctionDef) -> CompileResult<FuncIR> {
        if let Some(decorator) = def.decorators.first() {
            return Err(CompileError::unsupported(
                format!("decorator `@{}` on a module function", decorator),
                def.span,
            ));
        }
        let sig = self.oracle.function(&def.name)?;
        let c_name = format!("{}_{}", self.module.c_name, def.name);
        let mut func = FuncIR::new(&def.name, c_name, Receiver::None);
        func.params = bind_params(&def.name, &def.params, &sig, def.span)?;
        func.ret = sig.ret;
        trace!("declared function `{}`", def.name);
        Ok(func)
    }

    fn declare_class(&mut self, def: &ClassDef) -> CompileResult<ClassIR> {
        if def.bases.len() > 1 {
            return Err(CompileError::unsupported(
                format!("multiple inheritance in class `{}`", def.name),
                def.span,
            ));
        }
        if let Some(keyword) = def.keywords.first() {
            return Err(CompileError::unsupported(
                format!("class keyword `{}` on `{}`", keyword, def.name),
                def.span,
            ));
        }

        let c_name = format!("{}_{}", self.module.c_name, def.name);
        let mut class = ClassIR::new(ClassId(0), &def.name, c_name);
        class.span = def.span;
        for decorator in &def.decorators {
            match decorator_name(decorator) {
                "final" => class.is_final = true,
                "dataclass" => class.is_dataclass = true,
                other => {
                    return Err(CompileError::unsupported(
                        format!("class decorator `@{}`", other),
                        def.span,
                    ))
                }
            }
        }
        Ok(class)
    }

    fn resolve_base(&mut self, id: ClassId, def: &ClassDef) -> CompileResult<()> {
        let base_name = match def.bases.first() {
            Some(base) => crate::oracle::strip_qualification(base),
            None => return Ok(()),
        };
        if base_name == "object" {
            return Ok(());
        }
        let base = self
            .module
            .get_class_id(base_name)
            .ok_or_else(|| CompileError::UnknownBase {
                class: def.name.clone(),
                base: base_name.to_string(),
            })?;
        if let Some(class) = self.module.get_class_mut(id) {
            class.base = Some(base);
        }
        Ok(())
    }

    fn declare_members<'m>(
        &mut self,
        id: ClassId,
        def: &'m ClassDef,
        pending: &mut Vec<Pending<'m>>,
    ) -> CompileResult<()> {
        let sig = self.oracle.class(&def.name)?;
        let class_c_name = self.module.class(id).c_name.clone();
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        let mut method_defs = Vec::new();

        for stmt in &def.body {
            match stmt {
                ast::Stmt::AnnAssign {
                    target: Expr::Name { id: name, .. },
                    annotation,
                    value,
                    span,
                } => {
                    let ty = match sig.field(name) {
                        Some(ty) => ty.clone(),
                        None => ResolvedType::parse(annotation)?,
                    };
                    let mut field = FieldIR::new(name, ty);
                    if let Some(value) = value {
                        field.default = Some(const_value(value).ok_or_else(|| {
                            CompileError::unsupported(
                                format!("non-constant default for field `{}`", name),
                                *span,
                            )
                        })?);
                    }
                    fields.push(field);
                }
                ast::Stmt::FunctionDef(method) => {
                    let ir = self.declare_method(id, &class_c_name, &sig, method)?;
                    method_defs.push(method);
                    methods.push(ir);
                }
                ast::Stmt::Expr {
                    value:
                        Expr::Constant {
                            value: Constant::Str(_),
                            ..
                        },
                    ..
                }
                | ast::Stmt::Pass { .. } => {}
                ast::Stmt::Assign { span, .. } => {
                    return Err(CompileError::unsupported(
                        format!("class attribute without annotation in `{}`", def.name),
                        *span,
                    ))
                }
                other => {
                    return Err(CompileError::unsupported(
                        format!("statement in body of class `{}`", def.name),
                        other.span(),
                    ))
                }
            }
        }

        // Attributes the oracle saw assigned but the class body did not
        // annotate are declared by this class unless an ancestor owns them
        let inherited: Vec<String> = match self.module.class(id).base {
            Some(base) => self
                .module
                .all_fields(base)
                .into_iter()
                .map(|f| self.module.field(f).name.clone())
                .collect(),
            None => Vec::new(),
        };
        for (name, ty) in &sig.fields {
            if fields.iter().any(|f: &FieldIR| &f.name == name) || inherited.contains(name) {
                continue;
            }
            trace!("field `{}.{}` declared from type information", def.name, name);
            fields.push(FieldIR::new(name, ty.clone()));
        }

        let class = self
            .module
            .get_class_mut(id)
            .ok_or_else(|| CompileError::internal("class vanished"))?;
        class.fields = fields;
        class.methods = methods;
        for (index, method) in method_defs.into_iter().enumerate() {
            pending.push(Pending::Method(MethodRef { class: id, index }, method));
        }
        debug!(
            "declared class `{}`: {} field(s), {} method(s)",
            def.name,
            class.fields.len(),
            class.methods.len()
        );
        Ok(())
    }

    fn declare_method(
        &mut self,
        class: ClassId,
        class_c_name: &str,
        sig: &ClassSig,
        def: &FunctionDef,
    ) -> CompileResult<MethodIR> {
        let mut flags = MethodFlags::instance();
        let setter = format!("{}.setter", def.name);
        for decorator in &def.decorators {
            match decorator_name(decorator) {
                "staticmethod" => flags.kind = MethodKind::Static,
                "classmethod" => flags.kind = MethodKind::ClassMethod,
                "property" => flags.kind = MethodKind::Getter,
                "final" => flags.is_final = true,
                name if name == setter => flags.kind = MethodKind::Setter,
                other => {
                    return Err(CompileError::unsupported(
                        format!("method decorator `@{}`", other),
                        def.span,
                    ))
                }
            }
        }
        if flags.kind == MethodKind::Instance {
            flags.special = SpecialMethod::from_name(&def.name);
        }

        let (receiver, suffix) = match flags.kind {
            MethodKind::Instance => (Receiver::Instance(class), ""),
            MethodKind::Getter => (Receiver::Instance(class), "_get"),
            MethodKind::Setter => (Receiver::Instance(class), "_set"),
            MethodKind::ClassMethod => (Receiver::Class(class), ""),
            MethodKind::Static => (Receiver::None, ""),
        };
        let explicit = match receiver {
            Receiver::None => &def.params[..],
            _ => {
                if def.params.is_empty() {
                    return Err(CompileError::unsupported(
                        format!("method `{}` without a receiver parameter", def.name),
                        def.span,
                    ));
                }
                &def.params[1..]
            }
        };

        let method_sig = match flags.kind {
            MethodKind::Setter => setter_sig(sig, &def.name)?,
            _ => sig.method(&def.name)?.clone(),
        };
        let qualified = format!("{}.{}", sig.name, def.name);
        let c_name = format!("{}_{}{}", class_c_name, def.name, suffix);
        let mut func = FuncIR::new(&def.name, c_name, receiver);
        func.params = bind_params(&qualified, explicit, &method_sig, def.span)?;
        func.ret = method_sig.ret;
        if flags.kind == MethodKind::Getter && !func.params.is_empty() {
            return Err(CompileError::Arity {
                callee: qualified,
                expected: 0,
                found: func.params.len(),
                span: def.span,
            });
        }
        if flags.special == Some(SpecialMethod::Init) && func.ret != ResolvedType::None {
            warn!("`{}` declares a return type; it is ignored", qualified);
            func.ret = ResolvedType::None;
        }

        Ok(MethodIR {
            name: def.name.clone(),
            flags,
            func,
        })
    }

    // ========================================================================
    // Bodies
    // ========================================================================

    fn lower_body(
        &mut self,
        mut func: FuncIR,
        body: &[ast::Stmt],
        ast_params: &[String],
        local_types: FxHashMap<String, ResolvedType>,
    ) -> CompileResult<FuncIR> {
        self.next_temp = 0;
        self.scope.clear();
        self.local_order.clear();
        self.local_types = local_types;
        self.receiver = func.receiver;
        self.receiver_name = None;
        self.loop_stack.clear();
        self.try_depth = 0;
        self.finally_depth = 0;
        self.handler_depth = 0;

        match func.receiver {
            Receiver::None => {}
            Receiver::Instance(_) => self.receiver_name = ast_params.first().cloned(),
            Receiver::Class(class) => {
                if let Some(name) = ast_params.first() {
                    let class_name = self.module.class(class).name.clone();
                    // The native parameter is always `cls`
                    self.scope.insert(
                        name.clone(),
                        Local::new("cls", ResolvedType::ClassObject(class_name)),
                    );
                    self.receiver_name = Some(name.clone());
                }
            }
        }
        for param in &func.params {
            self.scope.insert(param.name.clone(), param.clone());
        }

        func.body = self.lower_block(body)?;
        func.locals = std::mem::take(&mut self.local_order);
        trace!(
            "lowered body of `{}`: {} statement(s), {} temporaries",
            func.name,
            func.statement_count(),
            self.next_temp
        );
        Ok(func)
    }

    /// Allocate a fresh temporary
    fn fresh_temp(&mut self, ty: ResolvedType) -> Temp {
        self.fresh_temp_with(ty, Origin::Computed)
    }

    fn fresh_temp_with(&mut self, ty: ResolvedType, origin: Origin) -> Temp {
        let id = TempId(self.next_temp);
        self.next_temp += 1;
        Temp { id, ty, origin }
    }

    /// Local bound to `name`, declaring it on first assignment
    fn local_for_assign(&mut self, name: &str, value_ty: &ResolvedType) -> Local {
        if let Some(local) = self.scope.get(name) {
            return local.clone();
        }
        let ty = match self.local_types.get(name) {
            Some(ty) => ty.clone(),
            None => {
                trace!("local `{}` typed from its first assignment", name);
                match value_ty {
                    // A bare `None` gives nothing to hold on to
                    ResolvedType::None => ResolvedType::Object,
                    other => other.clone(),
                }
            }
        };
        let local = Local::new(name, ty);
        self.scope.insert(name.to_string(), local.clone());
        self.local_order.push(local.clone());
        local
    }

    /// Class of the current instance receiver
    fn self_class(&self) -> Option<ClassId> {
        match self.receiver {
            Receiver::Instance(class) => Some(class),
            _ => None,
        }
    }

    fn is_self(&self, name: &str) -> bool {
        matches!(self.receiver, Receiver::Instance(_))
            && self.receiver_name.as_deref() == Some(name)
    }

    /// Compiled class behind a resolved type
    fn compiled_class(&self, ty: &ResolvedType) -> Option<ClassId> {
        ty.class_name().and_then(|name| self.module.get_class_id(name))
    }

    /// Build an expression into its value and prelude
    pub fn build_expr(&mut self, expr: &Expr) -> CompileResult<(Value, Vec<Instr>)> {
        let mut prelude = Vec::new();
        let value = self.lower_expr(expr, &mut prelude)?;
        Ok((value, prelude))
    }
}

/// Pair parameter names from the AST with the oracle's types, by position
fn bind_params(
    callee: &str,
    names: &[String],
    sig: &FunctionSig,
    span: Span,
) -> CompileResult<Vec<Local>> {
    if names.len() != sig.params.len() {
        return Err(CompileError::Arity {
            callee: callee.to_string(),
            expected: sig.params.len(),
            found: names.len(),
            span,
        });
    }
    Ok(names
        .iter()
        .zip(&sig.params)
        .map(|(name, (_, ty))| Local::new(name, ty.clone()))
        .collect())
}

/// Setter signature: declared as `name.setter`, or derived from the getter
fn setter_sig(sig: &ClassSig, name: &str) -> CompileResult<FunctionSig> {
    if let Some(setter) = sig.methods.get(&format!("{}.setter", name)) {
        return Ok(setter.clone());
    }
    let getter = sig.method(name)?;
    Ok(FunctionSig {
        params: vec![("value".to_string(), getter.ret.clone())],
        ret: ResolvedType::None,
        locals: FxHashMap::default(),
    })
}

/// `typing.final` -> `final`, `dataclasses.dataclass` -> `dataclass`
fn decorator_name(decorator: &str) -> &str {
    match decorator.strip_suffix(".setter") {
        Some(_) => decorator,
        None => crate::oracle::strip_qualification(decorator),
    }
}

/// Compile-time constant value of a literal expression
fn const_value(expr: &Expr) -> Option<Const> {
    match expr {
        Expr::Constant { value, .. } => Some(match value {
            Constant::Int(v) => Const::Int(*v),
            Constant::Float(v) => Const::Float(*v),
            Constant::Bool(v) => Const::Bool(*v),
            Constant::Str(v) => Const::Str(v.clone()),
            Constant::None => Const::None,
        }),
        Expr::UnaryOp {
            op: ast::UnaryOp::Neg,
            operand,
            ..
        } => match const_value(operand)? {
            Const::Int(v) => Some(Const::Int(v.checked_neg()?)),
            Const::Float(v) => Some(Const::Float(-v)),
            _ => None,
        },
        _ => None,
    }
}
