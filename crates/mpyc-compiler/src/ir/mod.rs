//! Intermediate Representation
//!
//! Typed IR between the annotated syntax tree and C emission. Expressions
//! are split into pure [`Value`]s and side-effecting [`Instr`]uctions: every
//! value that needs computation is paired with a prelude of instructions that
//! must run, in order, immediately before it is read.

pub mod class;
pub mod function;
pub mod instr;
pub mod module;
pub mod pretty;
pub mod stmt;
pub mod value;

pub use crate::ast::{BinOp, BoolOp, CmpOp, UnaryOp};
pub use class::{
    AccessPath, ClassIR, ClassId, FieldIR, FieldRef, MethodFlags, MethodIR, MethodKind, MethodRef,
    SpecialMethod,
};
pub use function::{FuncIR, FuncId, Receiver};
pub use instr::{Branch, Builtin, CallVia, Instr};
pub use module::{Constructor, ModuleIR};
pub use pretty::PrettyPrint;
pub use stmt::{Handler, RaiseKind, Stmt};
pub use value::{ArithPath, Comparison, Const, Local, Origin, Repr, Temp, TempId, Value};
