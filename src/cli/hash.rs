use std::path::PathBuf;
use std::process;

use pixkern::diagnostic::Diagnostic;
use pixkern::{lower_kernel, ContentHash, ErrorScope, KernelSpec};
use rayon::prelude::*;

use super::{report, resolve_options, LowerFlags};

/// Why one input could not be hashed. The kernel is kept so diagnostics render against its source.
struct Failure {
    spec: Option<KernelSpec>,
    diagnostics: Vec<Diagnostic>,
    scope: ErrorScope,
}

impl Failure {
    fn early(diagnostic: Diagnostic) -> Self {
        Self {
            spec: None,
            diagnostics: vec![diagnostic],
            scope: ErrorScope::Kernel,
        }
    }

    fn render(&self) {
        match &self.spec {
            Some(spec) => report(spec, &self.diagnostics),
            None => self.diagnostics.iter().for_each(Diagnostic::render_plain),
        }
    }
}

pub fn cmd_hash(inputs: Vec<PathBuf>, full: bool, flags: LowerFlags) {
    let results: Vec<_> = inputs
        .par_iter()
        .map(|input| -> Result<ContentHash, Failure> {
            let spec = KernelSpec::load(input).map_err(Failure::early)?;
            let options = resolve_options(input, &flags).map_err(Failure::early)?;
            match lower_kernel(&spec, &options) {
                Ok(kernel) => Ok(pixkern::content_hash(&kernel)),
                Err(e) => Err(Failure {
                    spec: Some(spec),
                    diagnostics: e.diagnostics,
                    scope: e.scope,
                }),
            }
        })
        .collect();

    // A compilation-scope failure voids the whole run: no kernel is printed.
    let mut aborted = false;
    for (input, result) in inputs.iter().zip(&results) {
        if let Err(failure) = result {
            if failure.scope == ErrorScope::Compilation {
                failure.render();
                eprintln!("error: compilation aborted by '{}'", input.display());
                aborted = true;
            }
        }
    }
    if aborted {
        process::exit(1);
    }

    let mut failed = false;
    for (input, result) in inputs.iter().zip(results) {
        match result {
            Ok(hash) if full => println!("{} {}", hash.to_hex(), input.display()),
            Ok(hash) => println!("{} {}", hash, input.display()),
            Err(failure) => {
                failure.render();
                eprintln!("error: cannot hash '{}'", input.display());
                failed = true;
            }
        }
    }
    if failed {
        process::exit(1);
    }
}
