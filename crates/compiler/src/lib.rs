//! Opal Compiler Library
//!
//! Compiles Opal source (`.opl`) to a textual stack-machine assembly
//! (`.opa`). The pipeline is a straight line: preprocessor and lexer
//! produce tokens, the parser builds an AST, the semantic pass resolves
//! and types it in place, the AST optimizer folds what it can, the code
//! generator lowers to a linked instruction stream, and the peephole
//! optimizer rewrites that stream before emission.
//!
//! ```rust,ignore
//! use opalc::{CompilerConfig, compile_to_asm};
//!
//! let asm = compile_to_asm("int main() { return 0; }", "demo.opl",
//!                          &CompilerConfig::new())?;
//! ```

pub mod asm;
pub mod ast;
pub mod builtins;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod interner;
pub mod lexer;
pub mod operators;
pub mod optimizer;
pub mod parser;
pub mod peephole;
pub mod pp_expr;
pub mod preprocessor;
pub mod semantic;
pub mod token;
pub mod types;

pub use config::CompilerConfig;
pub use diagnostics::{CompileError, Diagnostic, Severity};

use crate::operators::OverloadTable;
use crate::preprocessor::Preprocessor;
use crate::token::Span;
use crate::types::TypeTable;
use std::path::Path;

/// Compile a source string to its assembly text.
pub fn compile_to_asm(
    source: &str,
    filename: &str,
    config: &CompilerConfig,
) -> Result<String, CompileError> {
    let mut pp = Preprocessor::new(config.include_paths.clone());
    let tokens = preprocessor::tokenize_program(source, filename, &mut pp)?;
    for warning in &pp.warnings {
        tracing::warn!("{}", warning.render().trim_end());
    }
    tracing::debug!(tokens = tokens.len(), "tokenized {}", filename);

    let mut types = TypeTable::new();
    let mut program = parser::parse_program(tokens, &mut types)?;
    tracing::debug!(
        functions = program.functions.len(),
        globals = program.global_declarations.len(),
        "parsed program"
    );

    let mut overloads = OverloadTable::new();
    semantic::analyze(&mut program, &mut types, &mut overloads)?;

    if program.find_function("main").is_none() {
        return Err(Diagnostic::error(
            Span::synthetic(),
            "no 'main' function defined",
        )
        .into());
    }

    if config.optimize {
        for _ in 0..config.ast_opt_passes {
            optimizer::optimize_program(&mut program);
        }
    }

    let mut instructions = codegen::generate(&program, &types, &overloads)?;
    tracing::debug!(instructions = instructions.len(), "generated code");

    if config.optimize {
        for _ in 0..config.peephole_passes {
            peephole::optimize(&mut instructions);
        }
        tracing::debug!(instructions = instructions.len(), "after peephole");
    }

    Ok(instructions.emit_text(config.emit_comments))
}

/// Compile a source file to an assembly file.
pub fn compile_file(
    input: &Path,
    output: &Path,
    config: &CompilerConfig,
) -> Result<(), CompileError> {
    let source = std::fs::read_to_string(input).map_err(|source| CompileError::Io {
        path: input.to_path_buf(),
        source,
    })?;
    let asm = compile_to_asm(&source, &input.display().to_string(), config)?;
    std::fs::write(output, asm).map_err(|source| CompileError::Io {
        path: output.to_path_buf(),
        source,
    })?;
    Ok(())
}
