pub mod hash;
pub mod lower;
pub mod variants;

use std::path::{Path, PathBuf};
use std::process;

use clap::Args;
use pixkern::diagnostic::Diagnostic;
use pixkern::kernel::{Backend, KernelSpec};
use pixkern::{lower_kernel, LowerOptions, LoweredKernel};

/// Flags shared by every command that lowers a kernel.
#[derive(Args, Clone, Debug, Default)]
pub struct LowerFlags {
    /// Backend override (cuda, opencl, cpu)
    #[arg(long)]
    pub backend: Option<String>,
    /// Config file (default: nearest pixkern.toml above the input)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Keep reductions as loops and read mask coefficients from memory
    #[arg(long)]
    pub no_const_prop: bool,
    /// Size tiles symbolically for block-size exploration
    #[arg(long)]
    pub explore: bool,
}

/// Load a kernel description or exit with an error.
pub fn load_spec(path: &Path) -> KernelSpec {
    match KernelSpec::load(path) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("error: {}", e.message);
            process::exit(1);
        }
    }
}

/// Build lowering options: config file first, then command-line flags.
pub fn resolve_options(input: &Path, flags: &LowerFlags) -> Result<LowerOptions, Diagnostic> {
    let config_path = match &flags.config {
        Some(p) => Some(p.clone()),
        None => LowerOptions::find(input.parent().unwrap_or(Path::new("."))),
    };
    let mut options = match config_path {
        Some(p) => LowerOptions::load(&p)?,
        None => LowerOptions::default(),
    };

    if flags.no_const_prop {
        options.propagate_constants = false;
    }
    if flags.explore {
        options.explore = true;
    }
    if let Some(name) = &flags.backend {
        let backend = Backend::parse(name).ok_or_else(|| {
            Diagnostic::error(
                format!("unknown backend '{}'", name),
                pixkern::span::Span::dummy(),
            )
            .with_help("expected one of: cuda, opencl, cpu".to_string())
        })?;
        options.backend = Some(backend);
    }
    Ok(options)
}

/// Render diagnostics against the kernel's source text when it has one.
pub fn report(spec: &KernelSpec, diagnostics: &[Diagnostic]) {
    match &spec.source {
        Some(source) => {
            pixkern::diagnostic::render_diagnostics(diagnostics, &source.name, &source.text)
        }
        None => {
            for d in diagnostics {
                d.render_plain();
            }
        }
    }
}

/// Load, configure and lower one kernel; exits with status 1 on any fatal error.
pub fn lower_input(input: &Path, flags: &LowerFlags) -> LoweredKernel {
    let spec = load_spec(input);
    let options = match resolve_options(input, flags) {
        Ok(o) => o,
        Err(e) => {
            e.render_plain();
            process::exit(1);
        }
    };
    match lower_kernel(&spec, &options) {
        Ok(kernel) => {
            report(&spec, &kernel.warnings);
            kernel
        }
        Err(e) => {
            report(&spec, &e.diagnostics);
            process::exit(1);
        }
    }
}
