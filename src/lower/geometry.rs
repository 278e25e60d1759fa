//! Thread and iteration geometry: where a thread (or loop iteration) finds
//! the output pixels it owns.

use tracing::debug;

use crate::ast::{Block, Dim, Expr, Intrinsic, Stmt, Ty};
use crate::kernel::{Accessor, Backend, Interpolation, KernelSpec};

/// Fixed iteration domain of the CPU loop nest, columns.
pub const CPU_DOMAIN_WIDTH: i64 = 4096;
/// Fixed iteration domain of the CPU loop nest, rows.
pub const CPU_DOMAIN_HEIGHT: i64 = 2048;

pub const GID_X: &str = "gid_x";
pub const GID_Y: &str = "gid_y";

/// Id queries of a GPU thread grid. Only the semantic is chosen here; the
/// printer spells them for the backend.
#[derive(Clone, Debug, PartialEq)]
pub struct ThreadIds {
    pub local_x: Expr,
    pub local_y: Expr,
    pub group_x: Expr,
    pub group_y: Expr,
    pub local_size_x: Expr,
    pub local_size_y: Expr,
}

impl ThreadIds {
    fn new() -> Self {
        Self {
            local_x: Expr::Builtin(Intrinsic::LocalId(Dim::X)),
            local_y: Expr::Builtin(Intrinsic::LocalId(Dim::Y)),
            group_x: Expr::Builtin(Intrinsic::GroupId(Dim::X)),
            group_y: Expr::Builtin(Intrinsic::GroupId(Dim::Y)),
            local_size_x: Expr::Builtin(Intrinsic::LocalSize(Dim::X)),
            local_size_y: Expr::Builtin(Intrinsic::LocalSize(Dim::Y)),
        }
    }

    /// Tile row of this thread at tiling iteration `p`.
    pub fn local_row_at(&self, p: u32) -> Expr {
        row_step(self.local_y.clone(), &self.local_size_y, p)
    }
}

/// How the output domain is walked.
#[derive(Clone, Debug, PartialEq)]
pub enum Grid {
    Threads(ThreadIds),
    LoopNest,
}

/// Geometry of one lowering run.
#[derive(Clone, Debug, PartialEq)]
pub struct Geometry {
    pub backend: Backend,
    pub grid: Grid,
    pub gid_x: Expr,
    pub gid_y: Expr,
    /// Declarations emitted once at body entry.
    pub preamble: Vec<Stmt>,
}

impl Geometry {
    pub fn plan(spec: &KernelSpec, backend: Backend) -> Geometry {
        let ppt = spec.pixels_per_thread;
        let mut preamble = Vec::new();

        let grid = match backend {
            Backend::Cuda => {
                let ids = ThreadIds::new();
                let gid_x = Expr::add(
                    Expr::mul(ids.local_size_x.clone(), ids.group_x.clone()),
                    ids.local_x.clone(),
                );
                let mut block_row = Expr::mul(ids.local_size_y.clone(), ids.group_y.clone());
                if ppt > 1 {
                    block_row = Expr::mul(block_row, Expr::Int(ppt as i64));
                }
                let gid_y = Expr::add(block_row, ids.local_y.clone());
                preamble.push(gid_decl(GID_X, gid_x));
                preamble.push(gid_decl(GID_Y, gid_y));
                Grid::Threads(ids)
            }
            Backend::OpenCl => {
                let ids = ThreadIds::new();
                let gid_x = Expr::Builtin(Intrinsic::GlobalId(Dim::X));
                let gid_y = if ppt > 1 {
                    Expr::add(
                        Expr::mul(
                            Expr::mul(ids.local_size_y.clone(), ids.group_y.clone()),
                            Expr::Int(ppt as i64),
                        ),
                        ids.local_y.clone(),
                    )
                } else {
                    Expr::Builtin(Intrinsic::GlobalId(Dim::Y))
                };
                preamble.push(gid_decl(GID_X, gid_x));
                preamble.push(gid_decl(GID_Y, gid_y));
                Grid::Threads(ids)
            }
            Backend::CpuLoop => Grid::LoopNest,
        };

        for acc in &spec.accessors {
            if acc.interpolation != Interpolation::None {
                preamble.push(scale_decl(acc, Dim::X));
                preamble.push(scale_decl(acc, Dim::Y));
            }
        }

        debug!(
            backend = backend.name(),
            ppt,
            preamble = preamble.len(),
            "planned geometry"
        );

        Geometry {
            backend,
            grid,
            gid_x: Expr::var(GID_X),
            gid_y: Expr::var(GID_Y),
            preamble,
        }
    }

    pub fn threads(&self) -> Option<&ThreadIds> {
        match &self.grid {
            Grid::Threads(ids) => Some(ids),
            Grid::LoopNest => None,
        }
    }

    /// `gid_y` at tiling iteration `p`: the base row plus `p` tile heights.
    pub fn gid_y_at(&self, p: u32) -> Expr {
        match &self.grid {
            Grid::Threads(ids) => row_step(self.gid_y.clone(), &ids.local_size_y, p),
            Grid::LoopNest => self.gid_y.clone(),
        }
    }

    /// Wrap `body` in the CPU loop nest over the fixed domain. The loop
    /// indices are named after the gid bindings, so the body needs no renaming.
    pub fn loop_nest(&self, spec: &KernelSpec, body: Block) -> Stmt {
        let inner = Stmt::For {
            var: GID_X.to_string(),
            start: Expr::Int(spec.output.offset_x as i64),
            end: Expr::Int(CPU_DOMAIN_WIDTH),
            body,
        };
        Stmt::For {
            var: GID_Y.to_string(),
            start: Expr::Int(spec.output.offset_y as i64),
            end: Expr::Int(CPU_DOMAIN_HEIGHT),
            body: Block::new(vec![inner]),
        }
    }
}

/// Name of the scale-factor binding of an interpolated accessor.
pub fn scale_name(accessor: &str, dim: Dim) -> String {
    match dim {
        Dim::X => format!("{}_scale_x", accessor),
        Dim::Y => format!("{}_scale_y", accessor),
    }
}

fn row_step(base: Expr, step: &Expr, p: u32) -> Expr {
    if p == 0 {
        base
    } else {
        Expr::add(base, Expr::mul(Expr::Int(p as i64), step.clone()))
    }
}

fn gid_decl(name: &str, init: Expr) -> Stmt {
    Stmt::Decl {
        name: name.to_string(),
        ty: Ty::Int,
        init: Some(init),
        span: Default::default(),
    }
}

fn scale_decl(acc: &Accessor, dim: Dim) -> Stmt {
    let (acc_extent, is_extent) = match dim {
        Dim::X => (acc.width_param(), "is_width"),
        Dim::Y => (acc.height_param(), "is_height"),
    };
    Stmt::Decl {
        name: scale_name(&acc.name, dim),
        ty: Ty::Float,
        init: Some(Expr::binary(
            crate::ast::BinOp::Div,
            Expr::cast(Ty::Float, Expr::Param(acc_extent)),
            Expr::Param(is_extent.to_string()),
        )),
        span: Default::default(),
    }
}
