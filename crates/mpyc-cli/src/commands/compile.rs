//! `mpyc compile`: generate the C unit and build files of a module.

use crate::config::Config;
use crate::output::StyledOutput;
use anyhow::Context;
use mpyc_compiler::{CompileOptions, CompiledModule, Compiler};
use std::path::{Path, PathBuf};

const DEFAULT_OUT_DIR: &str = "build";

pub struct CompileArgs {
    pub input: PathBuf,
    pub out_dir: Option<PathBuf>,
    pub module_name: Option<String>,
    pub no_checked_division: bool,
    pub no_build_files: bool,
}

/// Command-line flags take precedence over the configuration file
fn effective_options(args: &CompileArgs, config: &Config) -> CompileOptions {
    let mut options = config.compile.clone();
    if args.module_name.is_some() {
        options.module_name = args.module_name.clone();
    }
    if args.no_checked_division {
        options.checked_division = false;
    }
    if args.no_build_files {
        options.emit_makefile = false;
        options.emit_cmake = false;
    }
    options
}

fn effective_out_dir(args: &CompileArgs, config: &Config) -> PathBuf {
    args.out_dir
        .clone()
        .or_else(|| config.output.dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR))
}

/// Write the generated files under `<out_dir>/<module>/`
fn write_module(module: &CompiledModule, out_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let dir = out_dir.join(&module.name);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("cannot create output directory {}", dir.display()))?;

    let mut files = vec![(dir.join(format!("{}.c", module.name)), &module.c_source)];
    if let Some(makefile) = &module.makefile {
        files.push((dir.join("micropython.mk"), makefile));
    }
    if let Some(cmake) = &module.cmake {
        files.push((dir.join("micropython.cmake"), cmake));
    }

    let mut written = Vec::with_capacity(files.len());
    for (path, contents) in files {
        std::fs::write(&path, contents)
            .with_context(|| format!("cannot write {}", path.display()))?;
        log::debug!("wrote {} ({} bytes)", path.display(), contents.len());
        written.push(path);
    }
    Ok(written)
}

pub fn execute(args: CompileArgs, config: Config, out: &mut StyledOutput) -> anyhow::Result<()> {
    let options = effective_options(&args, &config);
    let out_dir = effective_out_dir(&args, &config);
    let input = super::read_input(&args.input)?;

    let module = Compiler::new(options).compile(&input)?;
    let written = write_module(&module, &out_dir)?;

    out.success("Compiled");
    out.plain(" module ");
    out.bold(&format!("`{}`", module.name));
    out.plain(&format!(" ({} lines of C)", module.c_source.lines().count()));
    out.newline();
    for path in written {
        out.plain("  ");
        out.info(&path.display().to_string());
        out.newline();
    }
    Ok(())
}
