//! Subcommand implementations

pub mod check;
pub mod compile;
pub mod ir;

use anyhow::Context;
use mpyc_compiler::CompileInput;
use std::path::Path;

/// Read and parse a compile input document
pub fn read_input(path: &Path) -> anyhow::Result<CompileInput> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let input = CompileInput::from_json(&text)
        .with_context(|| format!("malformed compile input {}", path.display()))?;
    log::debug!(
        "read module `{}` from {} ({} binding librar{})",
        input.module,
        path.display(),
        input.bindings.len(),
        if input.bindings.len() == 1 { "y" } else { "ies" }
    );
    Ok(input)
}
