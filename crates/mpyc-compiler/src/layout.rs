//! Class Layout Resolver
//!
//! Computes, for every class in base-before-derived order, the embedded
//! struct layout of its fields, the access path of every visible field and
//! the dispatch table merging inherited and overriding methods.
//!
//! A derived struct starts with its base struct by value (a member named
//! `super`), so a pointer to the derived struct is a valid pointer to every
//! ancestor struct. The dispatch table pointer lives only in the root struct
//! of a hierarchy, and only when the root is not final.

use crate::error::{CompileError, CompileResult};
use crate::ir::{AccessPath, ClassId, FieldRef, MethodKind, MethodRef, ModuleIR};
use log::{debug, trace};
use rustc_hash::FxHashMap;

/// Name of the dispatch table pointer member in a root struct
pub const VTABLE_MEMBER: &str = "vtable";

/// One dispatch table slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VtableEntry {
    pub name: String,
    /// Implementation installed in this class's table
    pub implementation: MethodRef,
    /// Implementation comes from an ancestor
    pub inherited: bool,
}

/// Dispatch table of a class, slots in ancestor-first order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vtable {
    pub entries: Vec<VtableEntry>,
}

impl Vtable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot of method `name`
    pub fn slot(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    /// Append a new slot, returning its index
    pub fn add_method(&mut self, name: &str, implementation: MethodRef) -> usize {
        self.entries.push(VtableEntry {
            name: name.to_string(),
            implementation,
            inherited: false,
        });
        self.entries.len() - 1
    }

    /// Replace the implementation in slot `index`
    pub fn override_method(&mut self, index: usize, implementation: MethodRef) -> CompileResult<()> {
        match self.entries.get_mut(index) {
            Some(entry) => {
                entry.implementation = implementation;
                entry.inherited = false;
                Ok(())
            }
            None => Err(CompileError::internal(format!(
                "vtable slot {} out of bounds",
                index
            ))),
        }
    }

    /// Copy of this table as seen by a subclass
    fn inherit(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|entry| VtableEntry {
                    inherited: true,
                    ..entry.clone()
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A field visible from a class with its resolved access path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSlot {
    pub field: FieldRef,
    pub path: AccessPath,
}

/// Resolved layout of one class
#[derive(Debug, Clone, PartialEq)]
pub struct ClassLayout {
    pub class: ClassId,
    /// Number of ancestors
    pub depth: usize,
    /// Every visible field, root-first; the prefix up to the base's field
    /// count is the base layout
    pub fields: Vec<FieldSlot>,
    /// Hierarchy carries a dispatch table
    pub vtable: Option<Vtable>,
    /// Path to the dispatch table pointer
    pub vtable_path: Option<AccessPath>,
    /// Number of fields declared by ancestors
    pub inherited_fields: usize,
}

impl ClassLayout {
    /// Access path of a field seen through this class
    pub fn path(&self, field: FieldRef) -> Option<&AccessPath> {
        self.fields
            .iter()
            .find(|slot| slot.field.declared_in == field.declared_in && slot.field.index == field.index)
            .map(|slot| &slot.path)
    }

    /// Fields declared by the class itself
    pub fn own_fields(&self) -> &[FieldSlot] {
        &self.fields[self.inherited_fields..]
    }

    /// Struct carries the dispatch table pointer member itself
    pub fn owns_vtable_pointer(&self) -> bool {
        self.depth == 0 && self.vtable.is_some()
    }
}

/// How a method call through a static class reaches its implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Call the implementation directly
    Direct(MethodRef),
    /// Load the function pointer from this dispatch table slot
    Slot(usize),
}

/// A module whose class layouts have been resolved
///
/// Immutable once built: emitters only read it.
#[derive(Debug, Clone)]
pub struct ResolvedModule {
    pub module: ModuleIR,
    /// Base-before-derived order
    pub order: Vec<ClassId>,
    layouts: FxHashMap<ClassId, ClassLayout>,
}

impl ResolvedModule {
    pub fn layout(&self, class: ClassId) -> &ClassLayout {
        &self.layouts[&class]
    }

    /// Access path of `field` from an instance of `field.owner`
    pub fn access_path(&self, field: FieldRef) -> CompileResult<&AccessPath> {
        self.layout(field.owner).path(field).ok_or_else(|| {
            CompileError::internal(format!(
                "field {}#{} is not visible from {}",
                field.declared_in, field.index, field.owner
            ))
        })
    }

    /// Root of the hierarchy `class` belongs to
    pub fn root(&self, class: ClassId) -> ClassId {
        self.module
            .class_chain(class)
            .last()
            .copied()
            .unwrap_or(class)
    }

    /// Choose direct or table dispatch for `method` called on an instance
    /// whose static class is `static_class`
    pub fn dispatch(&self, static_class: ClassId, method: MethodRef) -> Dispatch {
        let class = self.module.class(static_class);
        let target = self.module.method(method);
        if class.is_final || target.flags.is_final || !target.flags.is_virtual() {
            return Dispatch::Direct(method);
        }
        match self
            .layout(static_class)
            .vtable
            .as_ref()
            .and_then(|vtable| vtable.slot(&target.name))
        {
            Some(slot) => Dispatch::Slot(slot),
            None => Dispatch::Direct(method),
        }
    }
}

/// Resolve layouts and dispatch tables for every class of `module`
pub fn resolve(module: ModuleIR) -> CompileResult<ResolvedModule> {
    let order = module.topological_order()?;
    let mut layouts: FxHashMap<ClassId, ClassLayout> = FxHashMap::default();

    for &id in &order {
        check_inheritance(&module, id)?;
        let layout = resolve_class(&module, id, &layouts)?;
        debug!(
            "layout of {}: {} field(s), {} slot(s){}",
            module.class(id).name,
            layout.fields.len(),
            layout.vtable.as_ref().map_or(0, Vtable::len),
            if layout.vtable.is_none() { ", no vtable" } else { "" }
        );
        layouts.insert(id, layout);
    }

    Ok(ResolvedModule {
        module,
        order,
        layouts,
    })
}

/// Reject shadowed fields and illegal overrides
fn check_inheritance(module: &ModuleIR, id: ClassId) -> CompileResult<()> {
    let class = module.class(id);
    let Some(base) = class.base else {
        return Ok(());
    };

    let base_class = module.class(base);
    if base_class.is_final {
        return Err(CompileError::FinalBase {
            class: class.name.clone(),
            base: base_class.name.clone(),
        });
    }

    for field in &class.fields {
        if let Some(inherited) = module.find_field(base, &field.name) {
            return Err(CompileError::FieldShadowing {
                class: class.name.clone(),
                field: field.name.clone(),
                ancestor: module.class(inherited.declared_in).name.clone(),
            });
        }
    }

    for method in &class.methods {
        if method.flags.kind == MethodKind::Setter {
            continue;
        }
        let Some(overridden) = module.find_method(base, &method.name) else {
            continue;
        };
        let ancestor = module.method(overridden);
        let ancestor_class = module.class(overridden.class).name.clone();
        if ancestor.flags.is_final {
            return Err(CompileError::FinalOverride {
                class: class.name.clone(),
                method: method.name.clone(),
                ancestor: ancestor_class,
            });
        }
        // `__init__` and static helpers may change shape freely
        if method.flags.kind == MethodKind::Instance && method.flags.special.is_some() {
            continue;
        }
        let compatible = ancestor.flags.kind == method.flags.kind
            && (method.flags.kind == MethodKind::Static
                || method.flags.kind == MethodKind::ClassMethod
                || method.signature_matches(ancestor));
        if !compatible {
            return Err(CompileError::IncompatibleOverride {
                class: class.name.clone(),
                method: method.name.clone(),
                ancestor: ancestor_class,
            });
        }
    }
    Ok(())
}

fn resolve_class(
    module: &ModuleIR,
    id: ClassId,
    resolved: &FxHashMap<ClassId, ClassLayout>,
) -> CompileResult<ClassLayout> {
    let class = module.class(id);
    let base_layout = match class.base {
        Some(base) => Some(resolved.get(&base).ok_or_else(|| {
            CompileError::internal(format!(
                "base of `{}` resolved after the class",
                class.name
            ))
        })?),
        None => None,
    };

    // Base fields keep their order, one hop further away
    let mut fields: Vec<FieldSlot> = base_layout
        .map(|base| {
            base.fields
                .iter()
                .map(|slot| FieldSlot {
                    field: FieldRef {
                        owner: id,
                        ..slot.field
                    },
                    path: slot.path.through_base(),
                })
                .collect()
        })
        .unwrap_or_default();
    let inherited_fields = fields.len();
    fields.extend(class.fields.iter().enumerate().map(|(index, field)| FieldSlot {
        field: FieldRef {
            owner: id,
            declared_in: id,
            index,
        },
        path: AccessPath::new(0, field.name.clone()),
    }));

    let (mut vtable, vtable_path) = match base_layout {
        Some(base) => (
            base.vtable.as_ref().map(Vtable::inherit),
            base.vtable_path.as_ref().map(AccessPath::through_base),
        ),
        // A final root can never be overridden
        None if class.is_final => (None, None),
        None => (Some(Vtable::new()), Some(AccessPath::new(0, VTABLE_MEMBER))),
    };

    if let Some(vtable) = vtable.as_mut() {
        for (index, method) in class.methods.iter().enumerate() {
            if !method.flags.is_virtual() {
                continue;
            }
            let implementation = MethodRef { class: id, index };
            match vtable.slot(&method.name) {
                Some(slot) => {
                    trace!("{}.{} overrides slot {}", class.name, method.name, slot);
                    vtable.override_method(slot, implementation)?;
                }
                // New methods of a final class, and final methods, never
                // need late binding
                None if class.is_final || method.flags.is_final => {
                    trace!("{}.{} bound directly", class.name, method.name);
                }
                None => {
                    let slot = vtable.add_method(&method.name, implementation);
                    trace!("{}.{} takes slot {}", class.name, method.name, slot);
                }
            }
        }
    }

    Ok(ClassLayout {
        class: id,
        depth: base_layout.map_or(0, |base| base.depth + 1),
        fields,
        vtable,
        vtable_path,
        inherited_fields,
    })
}
