pub mod options;

pub use options::{LowerOptions, CONFIG_FILE};
