pub mod ast;
pub mod config;
pub mod diagnostic;
pub mod hash;
pub mod kernel;
pub mod lower;
pub mod span;

pub use config::LowerOptions;
pub use hash::{content_hash, ContentHash};
pub use kernel::{Backend, KernelSpec};
pub use lower::{lower_kernel, lower_kernel_into, ErrorScope, LowerError, LoweredKernel};
