//! `mpyc check`: lower and resolve layouts, report the outcome.

use crate::output::StyledOutput;
use mpyc_compiler::Compiler;
use std::path::Path;

pub fn execute(input: &Path, out: &mut StyledOutput) -> anyhow::Result<()> {
    let input = super::read_input(input)?;
    let resolved = Compiler::default().check(&input)?;
    let module = &resolved.module;

    out.success("ok");
    out.plain(&format!(
        ": module `{}` ({} function(s), {} class(es))",
        module.name,
        module.functions.len(),
        module.classes.len()
    ));
    out.newline();
    Ok(())
}
