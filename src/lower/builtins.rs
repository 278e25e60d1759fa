//! Math builtins callable from kernel bodies, per backend.
//!
//! A call in the body names the single-precision C spelling (`expf`,
//! `fabsf`, ...). Each backend maps that to its own spelling or has no
//! equivalent; a name with no entry at all is unsupported everywhere.

use crate::kernel::Backend;

/// One row of the builtin table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuiltinFn {
    pub name: &'static str,
    pub arity: usize,
    pub cuda: Option<&'static str>,
    pub opencl: Option<&'static str>,
    pub cpu: Option<&'static str>,
}

impl BuiltinFn {
    pub fn spelling(&self, backend: Backend) -> Option<&'static str> {
        match backend {
            Backend::Cuda => self.cuda,
            Backend::OpenCl => self.opencl,
            Backend::CpuLoop => self.cpu,
        }
    }
}

const fn everywhere(name: &'static str, arity: usize, opencl: &'static str) -> BuiltinFn {
    BuiltinFn {
        name,
        arity,
        cuda: Some(name),
        opencl: Some(opencl),
        cpu: Some(name),
    }
}

const TABLE: &[BuiltinFn] = &[
    everywhere("sqrtf", 1, "sqrt"),
    everywhere("expf", 1, "exp"),
    everywhere("exp2f", 1, "exp2"),
    everywhere("logf", 1, "log"),
    everywhere("log2f", 1, "log2"),
    everywhere("powf", 2, "pow"),
    everywhere("fabsf", 1, "fabs"),
    everywhere("floorf", 1, "floor"),
    everywhere("ceilf", 1, "ceil"),
    everywhere("roundf", 1, "round"),
    everywhere("sinf", 1, "sin"),
    everywhere("cosf", 1, "cos"),
    everywhere("tanf", 1, "tan"),
    everywhere("atan2f", 2, "atan2"),
    everywhere("fminf", 2, "fmin"),
    everywhere("fmaxf", 2, "fmax"),
    everywhere("sqrt", 1, "sqrt"),
    everywhere("exp", 1, "exp"),
    everywhere("fabs", 1, "fabs"),
    everywhere("min", 2, "min"),
    everywhere("max", 2, "max"),
    everywhere("abs", 1, "abs"),
    BuiltinFn {
        name: "rsqrtf",
        arity: 1,
        cuda: Some("rsqrtf"),
        opencl: Some("rsqrt"),
        cpu: None,
    },
    BuiltinFn {
        name: "__expf",
        arity: 1,
        cuda: Some("__expf"),
        opencl: Some("native_exp"),
        cpu: None,
    },
    BuiltinFn {
        name: "native_exp",
        arity: 1,
        cuda: None,
        opencl: Some("native_exp"),
        cpu: None,
    },
];

/// Look up a builtin by its body spelling.
pub fn lookup(name: &str) -> Option<&'static BuiltinFn> {
    TABLE.iter().find(|b| b.name == name)
}

/// Backend spelling of `name`, or `None` when the backend has no equivalent.
pub fn resolve(name: &str, backend: Backend) -> Option<&'static str> {
    lookup(name).and_then(|b| b.spelling(backend))
}

/// Body spellings usable on `backend`, in table order.
pub fn supported_names(backend: Backend) -> Vec<&'static str> {
    TABLE
        .iter()
        .filter(|b| b.spelling(backend).is_some())
        .map(|b| b.name)
        .collect()
}
