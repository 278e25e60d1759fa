use std::path::PathBuf;

use clap::Args;
use pixkern::ast::display::format_block;

use super::{lower_input, LowerFlags};

#[derive(Args)]
pub struct LowerArgs {
    /// Kernel description file (.json)
    pub input: PathBuf,
    #[command(flatten)]
    pub flags: LowerFlags,
    /// Print the lowered body as JSON instead of text
    #[arg(long)]
    pub json: bool,
}

pub fn cmd_lower(args: LowerArgs) {
    let kernel = lower_input(&args.input, &args.flags);

    if args.json {
        match serde_json::to_string_pretty(&kernel.body) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("error: cannot serialize lowered body: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    println!("// kernel {} ({})", kernel.name, kernel.backend.name());
    let params: Vec<&str> = kernel.params.iter().map(String::as_str).collect();
    println!("// params: {}", params.join(", "));
    for plan in &kernel.plans {
        println!("// {}: {}", plan.accessor, plan.tier.name());
    }
    print!("{}", format_block(&kernel.body, 0));
    eprintln!(
        "Lowered {} -> {} variant(s), {} tile(s)",
        args.input.display(),
        kernel.variants.len(),
        kernel.tiles.len()
    );
}
