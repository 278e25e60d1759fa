use std::path::PathBuf;

use clap::Args;
use pixkern::ast::display::format_expr;
use pixkern::ast::Stmt;

use super::{lower_input, LowerFlags};

#[derive(Args)]
pub struct VariantsArgs {
    /// Kernel description file (.json)
    pub input: PathBuf,
    #[command(flatten)]
    pub flags: LowerFlags,
}

pub fn cmd_variants(args: VariantsArgs) {
    let kernel = lower_input(&args.input, &args.flags);

    // A single variant is inlined without a dispatch table; its guard is `true`.
    let arms = kernel.body.stmts.iter().find_map(|s| match s {
        Stmt::Dispatch(arms) => Some(arms),
        _ => None,
    });

    println!(
        "{:<14} {:>4} {:>7} {:>5} {:>6}  {:<8} guard",
        "variant", "top", "bottom", "left", "right", "bounds"
    );
    for v in &kernel.variants {
        let flag = |b: bool| if b { "x" } else { "-" };
        let mut bounds = String::new();
        if v.check_left || v.check_right {
            bounds.push('x');
        }
        if v.requires_bounds_check {
            bounds.push('y');
        }
        if bounds.is_empty() {
            bounds.push('-');
        }
        let guard = arms
            .and_then(|arms| arms.iter().find(|a| a.label == v.kind.label()))
            .map(|a| format_expr(&a.guard))
            .unwrap_or_else(|| "true".to_string());
        println!(
            "{:<14} {:>4} {:>7} {:>5} {:>6}  {:<8} {}",
            v.kind.label(),
            flag(v.needs_top),
            flag(v.needs_bottom),
            flag(v.needs_left),
            flag(v.needs_right),
            bounds,
            guard
        );
    }
}
