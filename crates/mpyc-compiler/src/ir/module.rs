//! IR Module
//!
//! Top-level container for a compilation unit.

use super::class::{
    ClassIR, ClassId, FieldIR, FieldRef, MethodIR, MethodKind, MethodRef, SpecialMethod,
};
use super::function::{FuncIR, FuncId};
use crate::bindings::BindingFunction;
use crate::error::{CompileError, CompileResult};
use rustc_hash::{FxHashMap, FxHashSet};

/// How instances of a class take their positional constructor arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constructor {
    /// An `__init__`, declared or inherited
    Init(MethodRef),
    /// The generated constructor of this dataclass, possibly an ancestor;
    /// its parameters are the dataclass's fields root-first
    Dataclass(ClassId),
    /// No arguments
    Default,
}

/// An IR module (compilation unit)
#[derive(Debug, Clone)]
pub struct ModuleIR {
    /// Module name as imported from Python
    pub name: String,
    /// Identifier prefix for generated C symbols
    pub c_name: String,
    /// Module-level functions
    pub functions: Vec<FuncIR>,
    /// Classes, in declaration order
    pub classes: Vec<ClassIR>,
    /// Binding functions called directly, in first-use order
    pub externs: Vec<BindingFunction>,
    /// Headers of imported binding libraries
    pub includes: Vec<String>,
    /// Function lookup by name
    function_map: FxHashMap<String, FuncId>,
    /// Class lookup by name
    class_map: FxHashMap<String, ClassId>,
}

impl ModuleIR {
    /// Create a new empty module
    pub fn new(name: impl Into<String>, c_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            c_name: c_name.into(),
            functions: Vec::new(),
            classes: Vec::new(),
            externs: Vec::new(),
            includes: Vec::new(),
            function_map: FxHashMap::default(),
            class_map: FxHashMap::default(),
        }
    }

    /// Add a function to the module
    pub fn add_function(&mut self, func: FuncIR) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.function_map.insert(func.name.clone(), id);
        self.functions.push(func);
        id
    }

    /// Add a class to the module; its `id` is overwritten with the assigned one
    pub fn add_class(&mut self, mut class: ClassIR) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        class.id = id;
        self.class_map.insert(class.name.clone(), id);
        self.classes.push(class);
        id
    }

    /// Record a binding function as used (once)
    pub fn add_extern(&mut self, function: &BindingFunction) {
        if !self.externs.iter().any(|f| f.symbol == function.symbol) {
            self.externs.push(function.clone());
        }
    }

    pub fn add_include(&mut self, header: &str) {
        if !self.includes.iter().any(|h| h == header) {
            self.includes.push(header.to_string());
        }
    }

    pub fn get_function(&self, id: FuncId) -> Option<&FuncIR> {
        self.functions.get(id.0 as usize)
    }

    pub fn get_function_mut(&mut self, id: FuncId) -> Option<&mut FuncIR> {
        self.functions.get_mut(id.0 as usize)
    }

    pub fn get_function_id(&self, name: &str) -> Option<FuncId> {
        self.function_map.get(name).copied()
    }

    pub fn get_class(&self, id: ClassId) -> Option<&ClassIR> {
        self.classes.get(id.index())
    }

    pub fn get_class_mut(&mut self, id: ClassId) -> Option<&mut ClassIR> {
        self.classes.get_mut(id.index())
    }

    pub fn get_class_id(&self, name: &str) -> Option<ClassId> {
        self.class_map.get(name).copied()
    }

    pub fn get_class_by_name(&self, name: &str) -> Option<&ClassIR> {
        self.get_class_id(name).and_then(|id| self.get_class(id))
    }

    /// Class by an ID this module handed out
    pub fn class(&self, id: ClassId) -> &ClassIR {
        &self.classes[id.index()]
    }

    pub fn method(&self, method: MethodRef) -> &MethodIR {
        &self.class(method.class).methods[method.index]
    }

    pub fn field(&self, field: FieldRef) -> &FieldIR {
        &self.class(field.declared_in).fields[field.index]
    }

    // ========================================================================
    // Inheritance graph
    // ========================================================================

    /// `class` followed by its ancestors, most-derived first
    ///
    /// Bounded by the class count, so a cyclic graph cannot loop forever;
    /// [`Self::topological_order`] reports such graphs.
    pub fn class_chain(&self, class: ClassId) -> Vec<ClassId> {
        let mut chain = vec![class];
        let mut current = self.class(class).base;
        while let Some(base) = current {
            if chain.len() > self.classes.len() || chain.contains(&base) {
                break;
            }
            chain.push(base);
            current = self.class(base).base;
        }
        chain
    }

    /// Number of ancestors
    pub fn depth(&self, class: ClassId) -> usize {
        self.class_chain(class).len() - 1
    }

    /// `ancestor` is `class` or one of its bases
    pub fn is_subclass(&self, class: ClassId, ancestor: ClassId) -> bool {
        self.class_chain(class).contains(&ancestor)
    }

    /// Base-before-derived order by depth-first traversal of the
    /// inheritance graph; declaration order breaks ties
    pub fn topological_order(&self) -> CompileResult<Vec<ClassId>> {
        let mut order = Vec::with_capacity(self.classes.len());
        let mut done: FxHashSet<ClassId> = FxHashSet::default();
        let mut visiting: FxHashSet<ClassId> = FxHashSet::default();

        for class in &self.classes {
            self.visit(class.id, &mut order, &mut done, &mut visiting)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        id: ClassId,
        order: &mut Vec<ClassId>,
        done: &mut FxHashSet<ClassId>,
        visiting: &mut FxHashSet<ClassId>,
    ) -> CompileResult<()> {
        if done.contains(&id) {
            return Ok(());
        }
        if !visiting.insert(id) {
            return Err(CompileError::InheritanceCycle {
                class: self.class(id).name.clone(),
            });
        }
        if let Some(base) = self.class(id).base {
            self.visit(base, order, done, visiting)?;
        }
        visiting.remove(&id);
        done.insert(id);
        order.push(id);
        Ok(())
    }

    /// Nearest method named `name` (getters stand for their property)
    pub fn find_method(&self, class: ClassId, name: &str) -> Option<MethodRef> {
        self.class_chain(class).into_iter().find_map(|id| {
            self.class(id)
                .method_index(name)
                .map(|index| MethodRef { class: id, index })
        })
    }

    /// Nearest setter of property `name`
    pub fn find_setter(&self, class: ClassId, name: &str) -> Option<MethodRef> {
        self.class_chain(class).into_iter().find_map(|id| {
            self.class(id)
                .setter_index(name)
                .map(|index| MethodRef { class: id, index })
        })
    }

    /// Nearest special method of the given kind
    pub fn find_special(&self, class: ClassId, special: SpecialMethod) -> Option<MethodRef> {
        self.class_chain(class).into_iter().find_map(|id| {
            self.class(id)
                .special(special)
                .map(|index| MethodRef { class: id, index })
        })
    }

    /// Constructor of `class`: the nearest class in its chain that declares
    /// `__init__` or is a dataclass decides
    pub fn constructor(&self, class: ClassId) -> Constructor {
        for id in self.class_chain(class) {
            let ir = self.class(id);
            if let Some(index) = ir.special(SpecialMethod::Init) {
                return Constructor::Init(MethodRef { class: id, index });
            }
            if ir.is_dataclass {
                return Constructor::Dataclass(id);
            }
        }
        Constructor::Default
    }

    /// Field `name` as seen through an instance of `class`
    pub fn find_field(&self, class: ClassId, name: &str) -> Option<FieldRef> {
        self.class_chain(class).into_iter().find_map(|id| {
            self.class(id).field_index(name).map(|index| FieldRef {
                owner: class,
                declared_in: id,
                index,
            })
        })
    }

    /// All fields visible from `class`, root-first
    pub fn all_fields(&self, class: ClassId) -> Vec<FieldRef> {
        let mut chain = self.class_chain(class);
        chain.reverse();
        chain
            .into_iter()
            .flat_map(|id| {
                (0..self.class(id).fields.len()).map(move |index| FieldRef {
                    owner: class,
                    declared_in: id,
                    index,
                })
            })
            .collect()
    }

    /// Iterate over all methods of all classes
    pub fn methods(&self) -> impl Iterator<Item = (MethodRef, &MethodIR)> {
        self.classes.iter().flat_map(|class| {
            class.methods.iter().enumerate().map(move |(index, m)| {
                (
                    MethodRef {
                        class: class.id,
                        index,
                    },
                    m,
                )
            })
        })
    }

    /// Declares or inherits a property
    pub fn has_properties(&self, class: ClassId) -> bool {
        self.class_chain(class).into_iter().any(|id| {
            self.class(id)
                .methods
                .iter()
                .any(|m| m.flags.kind == MethodKind::Getter)
        })
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Total statement count across functions and methods
    pub fn total_statement_count(&self) -> usize {
        self.functions
            .iter()
            .map(FuncIR::statement_count)
            .chain(self.methods().map(|(_, m)| m.func.statement_count()))
            .sum()
    }
}
