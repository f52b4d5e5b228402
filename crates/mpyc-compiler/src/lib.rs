//! mpyc Compiler
//!
//! Ahead-of-time compilation of annotated Python modules to MicroPython
//! user C modules. The pipeline has three stages:
//!
//! - **Lowering** (`lower`): the annotated AST becomes IR. Every side effect
//!   an expression needs is hoisted into an ordered prelude, so evaluation
//!   order never depends on the C compiler.
//! - **Layout** (`layout`): classes get embedded-base struct layouts, field
//!   access paths and dispatch tables.
//! - **Code generation** (`codegen`): native functions, boxed wrappers,
//!   protocol slot handlers, type objects and module registration.
//!
//! # Example
//!
//! ```rust,ignore
//! use mpyc_compiler::{CompileInput, CompileOptions, Compiler};
//!
//! let input = CompileInput::from_json(&std::fs::read_to_string("shapes.json")?)?;
//! let module = Compiler::new(CompileOptions::default()).compile(&input)?;
//! std::fs::write("shapes.c", &module.c_source)?;
//! ```

#![warn(rust_2018_idioms)]

// ============================================================================
// Modules
// ============================================================================

/// Annotated syntax tree handed over by the parser
pub mod ast;

/// External native-library binding descriptions
pub mod bindings;

/// C emission
pub mod codegen;

pub mod error;

/// Intermediate representation
pub mod ir;

/// Class layout resolution
pub mod layout;

/// AST to IR lowering
pub mod lower;

/// Type oracle interface and the table-backed oracle
pub mod oracle;

// ============================================================================
// Re-exports
// ============================================================================

pub use bindings::{BindingFunction, BindingLibrary, CType};
pub use error::{CompileError, CompileResult};
pub use ir::{ModuleIR, PrettyPrint};
pub use layout::ResolvedModule;
pub use oracle::{ResolvedType, TypeOracle, TypeTable};

use log::{debug, info};
use serde::Deserialize;

// ============================================================================
// Options and input
// ============================================================================

/// Code generation options
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Overrides the module name of the input
    pub module_name: Option<String>,
    /// Raise `ZeroDivisionError` for `//`, `%` and `/` on native operands
    pub checked_division: bool,
    /// Produce `micropython.mk`
    pub emit_makefile: bool,
    /// Produce `micropython.cmake`
    pub emit_cmake: bool,
    /// Leading comment naming the source module
    pub header_comment: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            module_name: None,
            checked_division: true,
            emit_makefile: true,
            emit_cmake: true,
            header_comment: true,
        }
    }
}

/// One module to compile: its AST, the oracle's types and the binding
/// libraries its imports may refer to
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompileInput {
    pub module: String,
    #[serde(default)]
    pub ast: ast::Module,
    #[serde(default)]
    pub types: TypeTable,
    #[serde(default)]
    pub bindings: Vec<BindingLibrary>,
}

impl CompileInput {
    pub fn new(module: impl Into<String>, ast: ast::Module, types: TypeTable) -> Self {
        Self {
            module: module.into(),
            ast,
            types,
            bindings: Vec::new(),
        }
    }

    pub fn with_bindings(mut self, library: BindingLibrary) -> Self {
        self.bindings.push(library);
        self
    }

    /// Parse the JSON document produced by the front end
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// The generated files of one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledModule {
    /// Python module name (the `import` name)
    pub name: String,
    /// C prefix of every generated symbol
    pub c_name: String,
    pub c_source: String,
    pub makefile: Option<String>,
    pub cmake: Option<String>,
}

// ============================================================================
// Compiler
// ============================================================================

/// Compilation driver
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Module name after the `module_name` override, and its C prefix
    pub fn module_names(&self, input: &CompileInput) -> (String, String) {
        let name = self
            .options
            .module_name
            .clone()
            .unwrap_or_else(|| input.module.clone());
        let c_name = codegen::sanitize_name(&name);
        (name, c_name)
    }

    /// Lower the input to IR
    pub fn lower_ir(&self, input: &CompileInput) -> CompileResult<ModuleIR> {
        let (name, c_name) = self.module_names(input);
        debug!("lowering `{}` (c prefix `{}`)", name, c_name);
        lower::Lowerer::new(&input.types, &input.bindings, &name, &c_name).lower_module(&input.ast)
    }

    /// Lower and resolve layouts without generating code
    pub fn check(&self, input: &CompileInput) -> CompileResult<ResolvedModule> {
        let module = self.lower_ir(input)?;
        debug!(
            "resolving layout of `{}` ({} class(es))",
            module.name,
            module.classes.len()
        );
        layout::resolve(module)
    }

    /// Compile the input to a complete set of output files
    pub fn compile(&self, input: &CompileInput) -> CompileResult<CompiledModule> {
        let resolved = self.check(input)?;
        let generated = codegen::generate(&resolved, &self.options)?;
        info!(
            "compiled `{}`: {} function(s), {} class(es)",
            resolved.module.name,
            resolved.module.functions.len(),
            resolved.module.classes.len()
        );
        Ok(CompiledModule {
            name: resolved.module.name.clone(),
            c_name: resolved.module.c_name.clone(),
            c_source: generated.c_source,
            makefile: generated.makefile,
            cmake: generated.cmake,
        })
    }
}
