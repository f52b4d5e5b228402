//! `mpyc ir`: print the lowered IR.

use crate::output::StyledOutput;
use mpyc_compiler::{CompileOptions, Compiler, PrettyPrint};
use std::path::Path;

pub fn execute(
    input: &Path,
    module_name: Option<String>,
    out: &mut StyledOutput,
) -> anyhow::Result<()> {
    let input = super::read_input(input)?;
    let compiler = Compiler::new(CompileOptions {
        module_name,
        ..CompileOptions::default()
    });
    let module = compiler.lower_ir(&input)?;
    out.plain(&module.pretty_print());
    Ok(())
}
