//! IR Statements
//!
//! Control flow. Every statement that evaluates an expression carries the
//! prelude of that expression, emitted immediately before its own code.

use super::instr::Instr;
use super::value::{Local, Value};
use rustc_hash::FxHashSet;

/// What a `raise` raises
#[derive(Debug, Clone, PartialEq)]
pub enum RaiseKind {
    /// A built-in exception class, optionally with a message argument
    Builtin {
        class: String,
        message: Option<Value>,
    },
    /// An exception object (e.g. one bound by `except ... as e`)
    Object(Value),
    /// Bare `raise` inside a handler
    Reraise,
}

/// One `except` clause
#[derive(Debug, Clone, PartialEq)]
pub struct Handler {
    /// Built-in exception class name; `None` catches everything
    pub class: Option<String>,
    pub bind: Option<Local>,
    pub body: Vec<Stmt>,
}

/// IR statements
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Run a prelude (and read a value, if one remains)
    Eval {
        prelude: Vec<Instr>,
        value: Option<Value>,
    },
    Assign {
        prelude: Vec<Instr>,
        target: Local,
        value: Value,
    },
    Return {
        prelude: Vec<Instr>,
        value: Option<Value>,
    },
    If {
        prelude: Vec<Instr>,
        test: Value,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    /// The prelude is re-evaluated before every test
    While {
        prelude: Vec<Instr>,
        test: Value,
        body: Vec<Stmt>,
    },
    /// `for var in range(start, stop, step)` with a constant step
    ForRange {
        prelude: Vec<Instr>,
        var: Local,
        start: Value,
        stop: Value,
        step: i64,
        body: Vec<Stmt>,
    },
    /// `for var in iterable` through the runtime iterator protocol
    ForIter {
        prelude: Vec<Instr>,
        var: Local,
        iterable: Value,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Raise {
        prelude: Vec<Instr>,
        kind: RaiseKind,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<Handler>,
        orelse: Vec<Stmt>,
        finally: Vec<Stmt>,
    },
}

impl Stmt {
    /// Number of statements including nested ones
    pub fn count(&self) -> usize {
        let nested = |body: &[Stmt]| body.iter().map(Stmt::count).sum::<usize>();
        1 + match self {
            Stmt::If { body, orelse, .. } => nested(body) + nested(orelse),
            Stmt::While { body, .. }
            | Stmt::ForRange { body, .. }
            | Stmt::ForIter { body, .. } => nested(body),
            Stmt::Try {
                body,
                handlers,
                orelse,
                finally,
            } => {
                nested(body)
                    + handlers.iter().map(|h| nested(&h.body)).sum::<usize>()
                    + nested(orelse)
                    + nested(finally)
            }
            _ => 0,
        }
    }

    /// The prelude attached to this statement
    pub fn prelude(&self) -> &[Instr] {
        match self {
            Stmt::Eval { prelude, .. }
            | Stmt::Assign { prelude, .. }
            | Stmt::Return { prelude, .. }
            | Stmt::If { prelude, .. }
            | Stmt::While { prelude, .. }
            | Stmt::ForRange { prelude, .. }
            | Stmt::ForIter { prelude, .. }
            | Stmt::Raise { prelude, .. } => prelude,
            Stmt::Break | Stmt::Continue | Stmt::Try { .. } => &[],
        }
    }
}

/// Names of locals written while an nlr buffer is pushed
///
/// A `longjmp` back into `nlr_push` leaves non-volatile automatics that
/// changed after the push indeterminate, so these need `volatile` storage.
/// The body, handlers and `else` of every `try` count as protected: with a
/// `finally` all three run under the outer buffer.
pub fn protected_writes(body: &[Stmt]) -> FxHashSet<String> {
    let mut names = FxHashSet::default();
    collect_writes(body, false, &mut names);
    names
}

fn collect_writes(body: &[Stmt], protected: bool, names: &mut FxHashSet<String>) {
    for stmt in body {
        match stmt {
            Stmt::Assign { target, .. } => {
                if protected {
                    names.insert(target.name.clone());
                }
            }
            Stmt::If { body, orelse, .. } => {
                collect_writes(body, protected, names);
                collect_writes(orelse, protected, names);
            }
            Stmt::While { body, .. } => collect_writes(body, protected, names),
            Stmt::ForRange { var, body, .. } | Stmt::ForIter { var, body, .. } => {
                if protected {
                    names.insert(var.name.clone());
                }
                collect_writes(body, protected, names);
            }
            Stmt::Try {
                body,
                handlers,
                orelse,
                finally,
            } => {
                collect_writes(body, true, names);
                for handler in handlers {
                    if let Some(bind) = &handler.bind {
                        names.insert(bind.name.clone());
                    }
                    collect_writes(&handler.body, true, names);
                }
                collect_writes(orelse, true, names);
                collect_writes(finally, protected, names);
            }
            Stmt::Eval { .. }
            | Stmt::Return { .. }
            | Stmt::Break
            | Stmt::Continue
            | Stmt::Raise { .. } => {}
        }
    }
}
