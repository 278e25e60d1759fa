//! Translation of logical pixel accesses into physical reads and writes.
//!
//! Every read accessor gets an [`AccessPlan`] once per lowering run. The
//! resolver then maps `acc(dx, dy)`, `acc.getPixel(x, y)`, `output()` and
//! mask reads onto buffer subscripts, tile subscripts or surface fetches,
//! wrapping them in boundary handling for the sides the active variant
//! covers.

use tracing::debug;

use crate::ast::{BinOp, Dim, Expr, Ty, UnOp};
use crate::kernel::{Accessor, Backend, BoundaryMode, Interpolation, KernelSpec, Mask, StorageHint};

use super::border::BorderVariant;
use super::geometry::scale_name;
use super::rewrite::Substitution;

/// Where an accessor's pixels are read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageTier {
    Direct,
    Tile,
    Surface,
}

impl StorageTier {
    pub fn name(&self) -> &'static str {
        match self {
            StorageTier::Direct => "direct",
            StorageTier::Tile => "tile",
            StorageTier::Surface => "surface",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessPlan {
    pub accessor: String,
    pub tier: StorageTier,
}

/// Pick the storage tier of one accessor.
pub fn plan_storage(acc: &Accessor, backend: Backend) -> StorageTier {
    match backend {
        Backend::CpuLoop => StorageTier::Direct,
        Backend::Cuda | Backend::OpenCl => match acc.storage {
            StorageHint::Global => StorageTier::Direct,
            StorageHint::Local => {
                if acc.is_window() && acc.interpolation == Interpolation::None {
                    StorageTier::Tile
                } else {
                    StorageTier::Direct
                }
            }
            StorageHint::Texture => StorageTier::Surface,
        },
    }
}

/// Plans for every read accessor, in declaration order.
pub fn plan_all(spec: &KernelSpec, backend: Backend) -> Vec<AccessPlan> {
    spec.accessors
        .iter()
        .map(|acc| {
            let tier = plan_storage(acc, backend);
            debug!(accessor = %acc.name, tier = tier.name(), "planned access");
            AccessPlan {
                accessor: acc.name.clone(),
                tier,
            }
        })
        .collect()
}

pub fn tile_name(accessor: &str) -> String {
    format!("_smem{}", accessor)
}

pub fn vector_view_name(accessor: &str) -> String {
    format!("{}4", accessor)
}

pub fn surface_name(kernel: &str, accessor: &str) -> String {
    format!("_tex_{}_{}", kernel, accessor)
}

pub fn constant_mask_name(kernel: &str, mask: &str) -> String {
    format!("_const_{}_{}", kernel, mask)
}

pub struct AccessResolver<'a> {
    spec: &'a KernelSpec,
    backend: Backend,
    plans: &'a [AccessPlan],
}

impl<'a> AccessResolver<'a> {
    pub fn new(spec: &'a KernelSpec, backend: Backend, plans: &'a [AccessPlan]) -> Self {
        Self {
            spec,
            backend,
            plans,
        }
    }

    pub fn tier(&self, accessor: &str) -> StorageTier {
        self.plans
            .iter()
            .find(|p| p.accessor == accessor)
            .map(|p| p.tier)
            .unwrap_or(StorageTier::Direct)
    }

    /// `acc(dx, dy)`: a read relative to the current output pixel.
    pub fn read_relative(
        &self,
        acc: &Accessor,
        dx: Expr,
        dy: Expr,
        env: &Substitution,
        variant: &BorderVariant,
    ) -> Expr {
        match (self.tier(&acc.name), &env.local_x, &env.local_y) {
            (StorageTier::Tile, Some(lx), Some(ly)) => {
                let row = Expr::add_offset(
                    Expr::add_offset(ly.clone(), dy),
                    Expr::Int(acc.half_y() as i64),
                );
                let col = Expr::add_offset(
                    Expr::add_offset(lx.clone(), dx),
                    Expr::Int(acc.half_x() as i64),
                );
                Expr::index2(Expr::Var(tile_name(&acc.name)), row, col)
            }
            _ => {
                let (x, y) = self.base_coords(acc, env);
                self.fetch(
                    acc,
                    Expr::add_offset(x, dx),
                    Expr::add_offset(y, dy),
                    env,
                    variant,
                )
            }
        }
    }

    /// Read at image coordinates `(x, y)` from global memory or the
    /// surface, applying the variant's boundary handling. Tile staging
    /// reads through here as well.
    pub fn fetch(
        &self,
        acc: &Accessor,
        x: Expr,
        y: Expr,
        env: &Substitution,
        variant: &BorderVariant,
    ) -> Expr {
        let (x, y, outside) = if variant.handles_any() {
            self.apply_boundary(acc, x, y, variant)
        } else {
            (x, y, None)
        };
        let read = self.physical_read(acc, x, y, env);
        match (outside, acc.boundary) {
            (Some(cond), BoundaryMode::Constant(value)) => {
                Expr::select(cond, pixel_literal(&acc.pixel, value), read)
            }
            _ => read,
        }
    }

    /// `acc.getPixel(x, y)`: absolute coordinates, no boundary handling.
    pub fn read_absolute(&self, acc: &Accessor, x: Expr, y: Expr, env: &Substitution) -> Expr {
        self.physical_read(acc, x, y, env)
    }

    fn physical_read(&self, acc: &Accessor, x: Expr, y: Expr, env: &Substitution) -> Expr {
        let (x, y) = if acc.has_offset() {
            (
                Expr::add(x, Expr::Param(acc.offset_x_param())),
                Expr::add(y, Expr::Param(acc.offset_y_param())),
            )
        } else {
            (x, y)
        };
        match self.tier(&acc.name) {
            StorageTier::Surface => Expr::SurfaceRead {
                surface: surface_name(&self.spec.name, &acc.name),
                x: Box::new(x),
                y: Box::new(y),
            },
            StorageTier::Direct | StorageTier::Tile => {
                let base = env.buffer(&acc.name);
                match self.backend {
                    Backend::CpuLoop => Expr::index2(base, y, x),
                    Backend::Cuda | Backend::OpenCl => Expr::index(
                        base,
                        Expr::add(Expr::mul(y, Expr::Param(acc.stride_param())), x),
                    ),
                }
            }
        }
    }

    /// Coordinates of the current pixel in the accessor's own image.
    fn base_coords(&self, acc: &Accessor, env: &Substitution) -> (Expr, Expr) {
        match acc.interpolation {
            Interpolation::None => (env.gid_x.clone(), env.gid_y.clone()),
            Interpolation::NearestNeighbor => (
                self.nearest(acc, Dim::X, env),
                self.nearest(acc, Dim::Y, env),
            ),
        }
    }

    fn nearest(&self, acc: &Accessor, dim: Dim, env: &Substitution) -> Expr {
        let (gid, offset) = match dim {
            Dim::X => (env.gid_x.clone(), "is_offset_x"),
            Dim::Y => (env.gid_y.clone(), "is_offset_y"),
        };
        let centered = Expr::add(
            Expr::cast(Ty::Float, Expr::sub(gid, Expr::param(offset))),
            Expr::Float(0.5),
        );
        Expr::cast(
            Ty::Int,
            Expr::mul(Expr::Var(scale_name(&acc.name, dim)), centered),
        )
    }

    /// `acc.getX()` / `acc.getY()`.
    pub fn accessor_coord(&self, acc: &Accessor, dim: Dim, env: &Substitution) -> Expr {
        match acc.interpolation {
            Interpolation::NearestNeighbor => self.nearest(acc, dim, env),
            Interpolation::None => self.kernel_coord(dim, env),
        }
    }

    /// `getX()` / `getY()` of the kernel: position inside the iteration space.
    pub fn kernel_coord(&self, dim: Dim, env: &Substitution) -> Expr {
        match dim {
            Dim::X => Expr::sub(env.gid_x.clone(), Expr::param("is_offset_x")),
            Dim::Y => Expr::sub(env.gid_y.clone(), Expr::param("is_offset_y")),
        }
    }

    /// `output()`: the write target at the current pixel.
    pub fn output(&self, env: &Substitution) -> Expr {
        self.output_write(env.gid_x.clone(), env.gid_y.clone(), env)
    }

    /// `outputAtPixel(x, y)`: iteration-space relative coordinates.
    pub fn output_at(&self, x: Expr, y: Expr, env: &Substitution) -> Expr {
        self.output_write(
            Expr::add(x, Expr::param("is_offset_x")),
            Expr::add(y, Expr::param("is_offset_y")),
            env,
        )
    }

    fn output_write(&self, x: Expr, y: Expr, env: &Substitution) -> Expr {
        let base = env.buffer(&self.spec.output.name);
        match self.backend {
            Backend::CpuLoop => Expr::index2(base, y, x),
            Backend::Cuda | Backend::OpenCl => Expr::index(
                base,
                Expr::add(Expr::mul(y, Expr::param("is_stride")), x),
            ),
        }
    }

    /// The array a mask is read from: constant memory for compile-time
    /// masks, a kernel parameter otherwise.
    pub fn mask_symbol(&self, mask: &Mask) -> Expr {
        if mask.is_constant() {
            Expr::Var(constant_mask_name(&self.spec.name, &mask.name))
        } else {
            Expr::Param(mask.name.clone())
        }
    }

    /// Mask element at zero-based cell `(col, row)`.
    pub fn mask_cell(&self, mask: &Mask, col: Expr, row: Expr) -> Expr {
        let symbol = self.mask_symbol(mask);
        match self.backend {
            Backend::Cuda | Backend::CpuLoop => Expr::index2(symbol, row, col),
            Backend::OpenCl => Expr::index(
                symbol,
                Expr::add_offset(Expr::mul(row, Expr::Int(mask.size_x as i64)), col),
            ),
        }
    }

    /// Mask element at center-relative offset `(x, y)`.
    pub fn mask_at(&self, mask: &Mask, x: Expr, y: Expr) -> Expr {
        let col = Expr::add_offset(x, Expr::Int((mask.size_x / 2) as i64));
        let row = Expr::add_offset(y, Expr::Int((mask.size_y / 2) as i64));
        self.mask_cell(mask, col, row)
    }

    /// Rewrite coordinates for the sides `variant` handles. For the constant
    /// policy the coordinates are kept and the out-of-image condition is
    /// returned instead.
    fn apply_boundary(
        &self,
        acc: &Accessor,
        x: Expr,
        y: Expr,
        variant: &BorderVariant,
    ) -> (Expr, Expr, Option<Expr>) {
        let width = Expr::Param(acc.width_param());
        let height = Expr::Param(acc.height_param());
        match acc.boundary {
            BoundaryMode::Undefined => (x, y, None),
            BoundaryMode::Constant(_) => {
                let mut outside = Vec::new();
                if variant.needs_left {
                    outside.push(Expr::lt(x.clone(), Expr::Int(0)));
                }
                if variant.needs_right {
                    outside.push(Expr::ge(x.clone(), width));
                }
                if variant.needs_top {
                    outside.push(Expr::lt(y.clone(), Expr::Int(0)));
                }
                if variant.needs_bottom {
                    outside.push(Expr::ge(y.clone(), height));
                }
                let cond = outside
                    .into_iter()
                    .reduce(|a, b| Expr::binary(BinOp::Or, a, b));
                (x, y, cond)
            }
            mode @ (BoundaryMode::Clamp | BoundaryMode::Repeat | BoundaryMode::Mirror) => {
                let x = adjust(mode, x, &width, variant.needs_left, variant.needs_right);
                let y = adjust(mode, y, &height, variant.needs_top, variant.needs_bottom);
                (x, y, None)
            }
        }
    }
}

/// Fold a coordinate back into `[0, extent)` on the requested sides.
fn adjust(mode: BoundaryMode, coord: Expr, extent: &Expr, low: bool, high: bool) -> Expr {
    let mut c = coord;
    if low {
        let replacement = match mode {
            BoundaryMode::Repeat => Expr::add(c.clone(), extent.clone()),
            BoundaryMode::Mirror => Expr::sub(
                Expr::Unary {
                    op: UnOp::Neg,
                    expr: Box::new(c.clone()),
                },
                Expr::Int(1),
            ),
            BoundaryMode::Clamp | BoundaryMode::Constant(_) | BoundaryMode::Undefined => {
                Expr::Int(0)
            }
        };
        c = Expr::select(Expr::lt(c.clone(), Expr::Int(0)), replacement, c);
    }
    if high {
        let replacement = match mode {
            BoundaryMode::Repeat => Expr::sub(c.clone(), extent.clone()),
            BoundaryMode::Mirror => Expr::sub(
                Expr::sub(Expr::mul(Expr::Int(2), extent.clone()), c.clone()),
                Expr::Int(1),
            ),
            BoundaryMode::Clamp | BoundaryMode::Constant(_) | BoundaryMode::Undefined => {
                Expr::sub(extent.clone(), Expr::Int(1))
            }
        };
        c = Expr::select(Expr::ge(c.clone(), extent.clone()), replacement, c);
    }
    c
}

fn pixel_literal(ty: &Ty, value: f64) -> Expr {
    match ty {
        Ty::Float | Ty::Double => Expr::Float(value),
        other => Expr::cast(other.clone(), Expr::Float(value)),
    }
}

/// A mask coefficient as a literal of the mask's element type.
pub fn mask_literal(mask: &Mask, value: f64) -> Expr {
    match mask.elem {
        Ty::Float | Ty::Double => Expr::Float(value),
        _ => Expr::Int(value as i64),
    }
}
