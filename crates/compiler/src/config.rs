//! Compiler configuration
//!
//! Built programmatically with the `with_*` methods or loaded from a TOML
//! file. Every field has a default, so a partial config file is fine.

use crate::diagnostics::CompileError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Number of whole-program iterations both optimizers run by default.
/// The passes are locally monotone, so a fixed bound reaches their fixed
/// point on real programs.
pub const DEFAULT_OPT_PASSES: u32 = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Run the AST optimizer and the assembly peephole optimizer
    pub optimize: bool,
    /// Iterations of the AST optimization pass
    pub ast_opt_passes: u32,
    /// Iterations of the assembly peephole pass
    pub peephole_passes: u32,
    /// Extra directories searched by `#include`
    pub include_paths: Vec<PathBuf>,
    /// Keep `// ...` annotations in the emitted assembly
    pub emit_comments: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            optimize: true,
            ast_opt_passes: DEFAULT_OPT_PASSES,
            peephole_passes: DEFAULT_OPT_PASSES,
            include_paths: Vec::new(),
            emit_comments: true,
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_include_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.include_paths.push(path.into());
        self
    }

    pub fn without_optimization(mut self) -> Self {
        self.optimize = false;
        self
    }

    pub fn with_comments(mut self, emit_comments: bool) -> Self {
        self.emit_comments = emit_comments;
        self
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, CompileError> {
        let text = std::fs::read_to_string(path).map_err(|source| CompileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text)
            .map_err(|e| CompileError::Internal(format!("invalid config file: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CompilerConfig::new();
        assert!(config.optimize);
        assert_eq!(config.ast_opt_passes, 15);
        assert_eq!(config.peephole_passes, 15);
        assert!(config.emit_comments);
    }

    #[test]
    fn test_builder() {
        let config = CompilerConfig::new()
            .without_optimization()
            .with_include_path("lib")
            .with_comments(false);
        assert!(!config.optimize);
        assert_eq!(config.include_paths.len(), 1);
        assert!(!config.emit_comments);
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opal.toml");
        std::fs::write(&path, "optimize = false\npeephole_passes = 3\n").unwrap();
        let config = CompilerConfig::load(&path).unwrap();
        assert!(!config.optimize);
        assert_eq!(config.peephole_passes, 3);
        // untouched fields keep their defaults
        assert_eq!(config.ast_opt_passes, 15);
    }
}
