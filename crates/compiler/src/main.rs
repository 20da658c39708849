//! Opal Compiler CLI
//!
//! Command-line interface for compiling .opl programs to stack-machine
//! assembly.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use opalc::CompilerConfig;
use std::io;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

#[derive(ClapParser)]
#[command(name = "opalc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Opal compiler - compile .opl programs to stack assembly", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile an .opl file to assembly
    Build {
        /// Input .opl source file
        input: PathBuf,

        /// Output assembly path (defaults to the input with an .opa extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Additional #include search directories
        #[arg(long = "include", value_name = "DIR")]
        include_paths: Vec<PathBuf>,

        /// Disable the AST and peephole optimizers
        #[arg(long)]
        no_optimize: bool,

        /// Strip comments from the emitted assembly
        #[arg(long)]
        no_comments: bool,

        /// Path to a compiler configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            include_paths,
            no_optimize,
            no_comments,
            config,
        } => {
            let output = output.unwrap_or_else(|| input.with_extension("opa"));

            let mut config = match config {
                Some(path) => match CompilerConfig::load(&path) {
                    Ok(config) => config,
                    Err(e) => {
                        eprintln!("{}", e);
                        process::exit(1);
                    }
                },
                None => CompilerConfig::new(),
            };
            config.include_paths.extend(include_paths);
            if no_optimize {
                config.optimize = false;
            }
            if no_comments {
                config.emit_comments = false;
            }

            let start = Instant::now();
            match opalc::compile_file(&input, &output, &config) {
                Ok(()) => {
                    println!("elapsed time: {}ms", start.elapsed().as_millis());
                }
                Err(e) => {
                    eprintln!("{}", e);
                    process::exit(1);
                }
            }
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
        }
    }
}
