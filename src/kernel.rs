//! `KernelSpec`: the resolved kernel description handed over by the front end.
//!
//! The front end has already discovered the kernel class, its accessors,
//! masks and scalar members, and translated the per-pixel body into the
//! generic [`Block`](crate::ast::Block) model. The lowering engine only
//! reads a `KernelSpec`; it never mutates one.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ast::{Block, Ty};
use crate::diagnostic::Diagnostic;
use crate::span::Span;

/// Execution form the kernel is lowered to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Block/thread grid (CUDA-style).
    Cuda,
    /// Work-group/work-item grid (OpenCL-style).
    OpenCl,
    /// Plain loop nest for a polyhedral optimizer.
    CpuLoop,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Cuda => "cuda",
            Backend::OpenCl => "opencl",
            Backend::CpuLoop => "cpu",
        }
    }

    pub fn parse(name: &str) -> Option<Backend> {
        match name {
            "cuda" | "gpu-a" => Some(Backend::Cuda),
            "opencl" | "ocl" | "gpu-b" => Some(Backend::OpenCl),
            "cpu" | "cpu-loop" | "polly" => Some(Backend::CpuLoop),
            _ => None,
        }
    }

    pub fn is_gpu(&self) -> bool {
        !matches!(self, Backend::CpuLoop)
    }
}

/// Boundary policy of a read accessor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryMode {
    /// Out-of-image reads are the author's problem; no handling is generated.
    #[default]
    Undefined,
    Clamp,
    Repeat,
    Mirror,
    Constant(f64),
}

impl BoundaryMode {
    pub fn is_defined(&self) -> bool {
        !matches!(self, BoundaryMode::Undefined)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    None,
    NearestNeighbor,
}

/// Where the caller would like an accessor's pixels to come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageHint {
    #[default]
    Global,
    /// Stage through the on-chip tile buffer.
    Local,
    /// Read through the cached read-only surface path.
    Texture,
}

/// The write target and the iteration space it spans.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IterationSpace {
    pub name: String,
    #[serde(default = "default_pixel_ty")]
    pub pixel: Ty,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub offset_x: u32,
    #[serde(default)]
    pub offset_y: u32,
    #[serde(default)]
    pub stride: Option<u32>,
}

/// A read accessor: an image viewed through a window with a boundary policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Accessor {
    pub name: String,
    #[serde(default = "default_pixel_ty")]
    pub pixel: Ty,
    #[serde(default = "one")]
    pub size_x: u32,
    #[serde(default = "one")]
    pub size_y: u32,
    #[serde(default)]
    pub boundary: BoundaryMode,
    #[serde(default)]
    pub interpolation: Interpolation,
    #[serde(default)]
    pub storage: StorageHint,
    /// Crop offset inside the underlying image.
    #[serde(default)]
    pub offset_x: u32,
    #[serde(default)]
    pub offset_y: u32,
}

impl Accessor {
    pub fn half_x(&self) -> u32 {
        self.size_x / 2
    }

    pub fn half_y(&self) -> u32 {
        self.size_y / 2
    }

    pub fn cells(&self) -> Option<u32> {
        self.size_x.checked_mul(self.size_y)
    }

    pub fn is_window(&self) -> bool {
        self.size_x > 1 || self.size_y > 1
    }

    pub fn has_offset(&self) -> bool {
        self.offset_x != 0 || self.offset_y != 0
    }

    pub fn width_param(&self) -> String {
        format!("{}_width", self.name)
    }

    pub fn height_param(&self) -> String {
        format!("{}_height", self.name)
    }

    pub fn stride_param(&self) -> String {
        format!("{}_stride", self.name)
    }

    pub fn offset_x_param(&self) -> String {
        format!("{}_offset_x", self.name)
    }

    pub fn offset_y_param(&self) -> String {
        format!("{}_offset_y", self.name)
    }
}

/// A window of coefficients used by reductions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mask {
    pub name: String,
    #[serde(default = "default_mask_ty")]
    pub elem: Ty,
    pub size_x: u32,
    pub size_y: u32,
    /// Row-major coefficients when known at compile time; `None` for runtime masks.
    #[serde(default)]
    pub values: Option<Vec<f64>>,
    #[serde(default)]
    pub decl_span: Span,
}

impl Mask {
    pub fn is_constant(&self) -> bool {
        self.values.is_some()
    }

    /// Window cell count; `None` when it does not fit in `u32`.
    pub fn cells(&self) -> Option<u32> {
        self.size_x.checked_mul(self.size_y)
    }

    /// Coefficient at window cell `(x, y)`, row-major.
    pub fn value_at(&self, x: u32, y: u32) -> Option<f64> {
        let index = y.checked_mul(self.size_x)?.checked_add(x)?;
        self.values.as_ref()?.get(index as usize).copied()
    }
}

/// A scalar kernel-class member, passed as a kernel parameter of the same name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalarParam {
    pub name: String,
    pub ty: Ty,
}

/// The kernel author's source text, used only to render diagnostics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceText {
    pub name: String,
    pub text: String,
}

/// A resolved single-pixel kernel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KernelSpec {
    pub name: String,
    pub body: Block,
    pub output: IterationSpace,
    #[serde(default)]
    pub accessors: Vec<Accessor>,
    #[serde(default)]
    pub masks: Vec<Mask>,
    #[serde(default)]
    pub scalars: Vec<ScalarParam>,
    #[serde(default = "one")]
    pub pixels_per_thread: u32,
    #[serde(default)]
    pub vectorize: bool,
    pub backend: Backend,
    #[serde(default = "default_threads_x")]
    pub threads_x: u32,
    #[serde(default = "one")]
    pub threads_y: u32,
    #[serde(default)]
    pub source: Option<SourceText>,
}

impl KernelSpec {
    pub fn accessor(&self, name: &str) -> Option<&Accessor> {
        self.accessors.iter().find(|a| a.name == name)
    }

    pub fn mask(&self, name: &str) -> Option<&Mask> {
        self.masks.iter().find(|m| m.name == name)
    }

    pub fn scalar(&self, name: &str) -> Option<&ScalarParam> {
        self.scalars.iter().find(|s| s.name == name)
    }

    /// Parse a JSON kernel description.
    pub fn from_json(content: &str) -> Result<Self, Diagnostic> {
        serde_json::from_str(content).map_err(|e| {
            Diagnostic::error(format!("invalid kernel description: {}", e), Span::dummy())
        })
    }

    /// Load a JSON kernel description from disk.
    pub fn load(path: &Path) -> Result<Self, Diagnostic> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Diagnostic::error(
                format!("cannot read kernel description '{}': {}", path.display(), e),
                Span::dummy(),
            )
        })?;
        Self::from_json(&content).map_err(|d| Diagnostic {
            message: format!("{}: {}", path.display(), d.message),
            ..d
        })
    }
}

fn one() -> u32 {
    1
}

fn default_threads_x() -> u32 {
    32
}

fn default_pixel_ty() -> Ty {
    Ty::Float
}

fn default_mask_ty() -> Ty {
    Ty::Float
}
