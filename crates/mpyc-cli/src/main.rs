//! mpyc command-line driver
//!
//! Compiles the JSON documents produced by the front end (annotated AST,
//! type table and binding descriptions) into MicroPython user C modules.

mod commands;
mod config;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mpyc")]
#[command(about = "Ahead-of-time compiler for MicroPython user C modules", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Colored output: auto, always, never
    #[arg(long, global = true, value_parser = ["auto", "always", "never"])]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a module to C sources
    Compile {
        /// Compile input (JSON)
        input: PathBuf,
        /// Output directory (a subdirectory per module is created)
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
        /// Override the module name
        #[arg(long)]
        module_name: Option<String>,
        /// Omit zero-divisor checks on native arithmetic
        #[arg(long)]
        no_checked_division: bool,
        /// Do not write micropython.mk / micropython.cmake
        #[arg(long)]
        no_build_files: bool,
        /// Configuration file (defaults to ./mpyc.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Lower and resolve class layouts without generating code
    Check {
        /// Compile input (JSON)
        input: PathBuf,
    },

    /// Print the IR of a module
    Ir {
        /// Compile input (JSON)
        input: PathBuf,
        /// Override the module name
        #[arg(long)]
        module_name: Option<String>,
    },
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn run(cli: Cli, out: &mut output::StyledOutput) -> anyhow::Result<()> {
    match cli.command {
        Commands::Compile {
            input,
            out_dir,
            module_name,
            no_checked_division,
            no_build_files,
            config,
        } => {
            let config = config::Config::load(config.as_deref())?;
            commands::compile::execute(
                commands::compile::CompileArgs {
                    input,
                    out_dir,
                    module_name,
                    no_checked_division,
                    no_build_files,
                },
                config,
                out,
            )
        }
        Commands::Check { input } => commands::check::execute(&input, out),
        Commands::Ir { input, module_name } => {
            commands::ir::execute(&input, module_name, out)
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);
    let choice = output::resolve_color_choice(cli.color.as_deref());
    let mut out = output::StyledOutput::new(choice);

    if let Err(e) = run(cli, &mut out) {
        out.stderr_error("error");
        out.stderr_plain(&format!(": {:#}\n", e));
        std::process::exit(1);
    }
}
