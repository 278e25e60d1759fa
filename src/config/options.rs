use std::path::{Path, PathBuf};

use crate::diagnostic::Diagnostic;
use crate::kernel::Backend;
use crate::span::Span;

/// File name searched for next to a kernel description.
pub const CONFIG_FILE: &str = "pixkern.toml";

/// Knobs of one lowering run that are not part of the kernel itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LowerOptions {
    /// Unroll reductions over constant masks and inline their coefficients.
    pub propagate_constants: bool,
    /// Size on-chip tiles symbolically so a later stage can pick the block size.
    pub explore: bool,
    /// Overrides `KernelSpec::backend` when set.
    pub backend: Option<Backend>,
}

impl Default for LowerOptions {
    fn default() -> Self {
        Self {
            propagate_constants: true,
            explore: false,
            backend: None,
        }
    }
}

impl LowerOptions {
    /// Load options from a `pixkern.toml` file.
    pub fn load(path: &Path) -> Result<Self, Diagnostic> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Diagnostic::error(
                format!("cannot read config '{}': {}", path.display(), e),
                Span::dummy(),
            )
        })?;
        Self::parse_toml(&content, path)
    }

    /// Look for `pixkern.toml` in `dir` and its ancestors.
    pub fn find(dir: &Path) -> Option<PathBuf> {
        let mut current = dir;
        loop {
            let candidate = current.join(CONFIG_FILE);
            if candidate.exists() {
                return Some(candidate);
            }
            current = current.parent()?;
        }
    }

    fn parse_toml(content: &str, path: &Path) -> Result<Self, Diagnostic> {
        let err =
            |msg: String| Diagnostic::error(format!("{}: {}", path.display(), msg), Span::dummy());

        let mut options = LowerOptions::default();
        let mut section = String::new();

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                section = trimmed[1..trimmed.len() - 1].trim().to_string();
                continue;
            }
            if let Some((key, value)) = trimmed.split_once('=') {
                let key = key.trim();
                let value = value.trim();
                let unquoted = value.trim_matches('"');

                match (section.as_str(), key) {
                    ("lower", "propagate_constants") => {
                        options.propagate_constants = parse_bool(value)
                            .ok_or_else(|| err(format!("invalid lower.propagate_constants: {}", value)))?;
                    }
                    ("lower", "explore") => {
                        options.explore = parse_bool(value)
                            .ok_or_else(|| err(format!("invalid lower.explore: {}", value)))?;
                    }
                    ("lower", "backend") => {
                        let backend = Backend::parse(unquoted)
                            .ok_or_else(|| err(format!("unknown backend '{}'", unquoted)))?;
                        options.backend = Some(backend);
                    }
                    _ => {}
                }
            }
        }

        Ok(options)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}
