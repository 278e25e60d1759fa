//! Staging of window accessors through on-chip tiles.
//!
//! Each tiled accessor gets one buffer per thread group. Before the body
//! runs, every thread copies one row slice per staging iteration into the
//! tile (halo included), and a single barrier follows the last copy.

use tracing::debug;

use crate::ast::{AssignOp, Block, Expr, Stmt, TileDecl};
use crate::kernel::{Backend, KernelSpec};

use super::access::{tile_name, AccessPlan, AccessResolver, StorageTier};
use super::border::BorderVariant;
use super::geometry::{Geometry, ThreadIds};
use super::rewrite::Substitution;

pub const BSX_EXPLORE: &str = "BSX_EXPLORE";
pub const BSY_EXPLORE: &str = "BSY_EXPLORE";

/// Shape of one accessor's tile.
#[derive(Clone, Debug, PartialEq)]
pub struct TileLayout {
    pub accessor: String,
    pub decl: TileDecl,
    pub half_x: u32,
    pub half_y: u32,
    /// Columns written by staging: the block width plus both halos.
    pub filled_cols: Expr,
    /// Staging iterations needed to cover every tile row.
    pub iterations: u32,
}

impl TileLayout {
    fn plan(spec: &KernelSpec, accessor: &str, backend: Backend, explore: bool) -> Option<Self> {
        let acc = spec.accessor(accessor)?;
        let (tx, ty) = (spec.threads_x, spec.threads_y);
        let ppt = spec.pixels_per_thread;
        let (hx, hy) = (acc.half_x(), acc.half_y());
        let bank_pad = match backend {
            Backend::Cuda => 1,
            Backend::OpenCl | Backend::CpuLoop => 0,
        };

        let iterations = (ppt * ty + acc.size_y - 1).div_ceil(ty);
        let elem = if spec.vectorize {
            acc.pixel.widen4()
        } else {
            acc.pixel.clone()
        };

        let (rows, cols, filled_cols) = if explore {
            let filled = Expr::add_offset(Expr::param(BSX_EXPLORE), Expr::Int(2 * hx as i64));
            (
                Expr::add_offset(
                    Expr::mul(Expr::param(BSY_EXPLORE), Expr::Int(ppt as i64)),
                    Expr::Int(acc.size_y as i64 - 1),
                ),
                Expr::add_offset(filled.clone(), Expr::Int(bank_pad)),
                filled,
            )
        } else {
            let filled = (tx + 2 * hx) as i64;
            (
                Expr::Int((iterations * ty) as i64),
                Expr::Int(filled + bank_pad),
                Expr::Int(filled),
            )
        };

        debug!(
            accessor,
            iterations,
            rows = ?rows,
            cols = ?cols,
            explore,
            "sized tile"
        );

        Some(Self {
            accessor: accessor.to_string(),
            decl: TileDecl {
                name: tile_name(accessor),
                elem,
                rows,
                cols,
            },
            half_x: hx,
            half_y: hy,
            filled_cols,
            iterations,
        })
    }
}

/// All tiles of one kernel.
#[derive(Clone, Debug, PartialEq)]
pub struct TilingStager {
    layouts: Vec<TileLayout>,
    threads_x: u32,
    explore: bool,
}

impl TilingStager {
    pub fn new(spec: &KernelSpec, plans: &[AccessPlan], backend: Backend, explore: bool) -> Self {
        let layouts = plans
            .iter()
            .filter(|p| p.tier == StorageTier::Tile)
            .filter_map(|p| TileLayout::plan(spec, &p.accessor, backend, explore))
            .collect();
        Self {
            layouts,
            threads_x: spec.threads_x,
            explore,
        }
    }

    pub fn layouts(&self) -> &[TileLayout] {
        &self.layouts
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    pub fn decls(&self) -> Vec<TileDecl> {
        self.layouts.iter().map(|l| l.decl.clone()).collect()
    }

    /// Staging iterations of the deepest tile.
    pub fn iterations(&self) -> u32 {
        self.layouts.iter().map(|l| l.iterations).max().unwrap_or(0)
    }

    /// Copy statements for every tile followed by one barrier; empty when
    /// nothing is tiled.
    pub fn stage(
        &self,
        spec: &KernelSpec,
        resolver: &AccessResolver<'_>,
        geometry: &Geometry,
        ids: &ThreadIds,
        env: &Substitution,
        variant: &BorderVariant,
    ) -> Vec<Stmt> {
        if self.layouts.is_empty() {
            return Vec::new();
        }
        let mut stmts = Vec::new();
        for p in 0..self.iterations() {
            let row = ids.local_row_at(p);
            let gid_y = geometry.gid_y_at(p);
            for layout in self.layouts.iter().filter(|l| p < l.iterations) {
                let Some(acc) = spec.accessor(&layout.accessor) else {
                    continue;
                };
                let chunks = (self.threads_x + 2 * layout.half_x).div_ceil(self.threads_x);
                let partial = (self.threads_x + 2 * layout.half_x) % self.threads_x != 0;
                for c in 0..chunks {
                    let shift = if c == 0 {
                        None
                    } else {
                        Some(Expr::mul(Expr::Int(c as i64), ids.local_size_x.clone()))
                    };
                    let col = match &shift {
                        Some(s) => Expr::add(ids.local_x.clone(), s.clone()),
                        None => ids.local_x.clone(),
                    };
                    let mut x = Expr::add_offset(env.gid_x.clone(), Expr::Int(-(layout.half_x as i64)));
                    if let Some(s) = shift {
                        x = Expr::add(x, s);
                    }
                    let y = Expr::add_offset(gid_y.clone(), Expr::Int(-(layout.half_y as i64)));
                    let value = resolver.fetch(acc, x, y, env, variant);
                    let store = Stmt::Assign {
                        target: Expr::index2(
                            Expr::Var(layout.decl.name.clone()),
                            row.clone(),
                            col.clone(),
                        ),
                        op: AssignOp::Set,
                        value,
                    };

                    let mut guards = Vec::new();
                    if c > 0 && (partial || self.explore) && c + 1 == chunks {
                        guards.push(Expr::lt(col, layout.filled_cols.clone()));
                    }
                    if self.explore {
                        guards.push(Expr::lt(row.clone(), layout.decl.rows.clone()));
                    }
                    stmts.push(match Expr::all(guards) {
                        Some(cond) => Stmt::If {
                            cond,
                            then_block: Block::new(vec![store]),
                            else_block: None,
                        },
                        None => store,
                    });
                }
            }
        }
        stmts.push(Stmt::Barrier);
        debug!(
            variant = variant.kind.label(),
            statements = stmts.len(),
            "staged tiles"
        );
        stmts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::StorageHint;
    use crate::lower::access::plan_all;
    use crate::lower::tests::sample_spec;

    fn tiled_spec(backend: Backend) -> KernelSpec {
        let mut spec = sample_spec(backend);
        spec.threads_y = 4;
        spec.pixels_per_thread = 2;
        let acc = &mut spec.accessors[0];
        acc.size_x = 3;
        acc.size_y = 5;
        acc.storage = StorageHint::Local;
        spec
    }

    fn stores(stmts: &[Stmt]) -> usize {
        stmts
            .iter()
            .filter(|s| !matches!(s, Stmt::Barrier))
            .count()
    }

    #[test]
    fn concrete_tile_is_padded_on_cuda() {
        let spec = tiled_spec(Backend::Cuda);
        let plans = plan_all(&spec, Backend::Cuda);
        let stager = TilingStager::new(&spec, &plans, Backend::Cuda, false);
        let layout = &stager.layouts()[0];
        assert_eq!(layout.iterations, 3);
        assert_eq!(layout.decl.rows, Expr::Int(12));
        assert_eq!(layout.decl.cols, Expr::Int(35));
        assert_eq!(layout.filled_cols, Expr::Int(34));
        assert_eq!(layout.decl.name, "_smeminput");
    }

    #[test]
    fn opencl_tile_has_no_bank_padding() {
        let spec = tiled_spec(Backend::OpenCl);
        let plans = plan_all(&spec, Backend::OpenCl);
        let stager = TilingStager::new(&spec, &plans, Backend::OpenCl, false);
        assert_eq!(stager.layouts()[0].decl.cols, Expr::Int(34));
    }

    #[test]
    fn explore_mode_sizes_symbolically() {
        let spec = tiled_spec(Backend::Cuda);
        let plans = plan_all(&spec, Backend::Cuda);
        let stager = TilingStager::new(&spec, &plans, Backend::Cuda, true);
        let decl = &stager.layouts()[0].decl;
        let mut params = Vec::new();
        decl.rows.walk(&mut |e| {
            if let Expr::Param(p) = e {
                params.push(p.clone());
            }
        });
        decl.cols.walk(&mut |e| {
            if let Expr::Param(p) = e {
                params.push(p.clone());
            }
        });
        assert_eq!(params, vec![BSY_EXPLORE.to_string(), BSX_EXPLORE.to_string()]);
    }

    #[test]
    fn staging_ends_with_single_barrier() {
        let spec = tiled_spec(Backend::Cuda);
        let plans = plan_all(&spec, Backend::Cuda);
        let stager = TilingStager::new(&spec, &plans, Backend::Cuda, false);
        let geometry = Geometry::plan(&spec, Backend::Cuda);
        let ids = geometry.threads().unwrap().clone();
        let resolver = AccessResolver::new(&spec, Backend::Cuda, &plans);
        let env = Substitution::new(geometry.gid_x.clone(), geometry.gid_y.clone());
        let stmts = stager.stage(
            &spec,
            &resolver,
            &geometry,
            &ids,
            &env,
            &BorderVariant::interior(),
        );
        // 3 staging rows, 34 columns over a 32-wide block.
        assert_eq!(stores(&stmts), 6);
        assert_eq!(stmts.last(), Some(&Stmt::Barrier));
        assert_eq!(
            stmts.iter().filter(|s| matches!(s, Stmt::Barrier)).count(),
            1
        );
        // The second chunk of each row is partial and guarded.
        assert!(matches!(stmts[1], Stmt::If { .. }));
        assert!(matches!(stmts[0], Stmt::Assign { .. }));
    }

    #[test]
    fn point_accessors_stage_nothing() {
        let mut spec = sample_spec(Backend::Cuda);
        spec.accessors[0].storage = StorageHint::Local;
        let plans = plan_all(&spec, Backend::Cuda);
        let stager = TilingStager::new(&spec, &plans, Backend::Cuda, false);
        assert!(stager.is_empty());
        let geometry = Geometry::plan(&spec, Backend::Cuda);
        let ids = geometry.threads().unwrap().clone();
        let resolver = AccessResolver::new(&spec, Backend::Cuda, &plans);
        let env = Substitution::new(geometry.gid_x.clone(), geometry.gid_y.clone());
        let stmts = stager.stage(
            &spec,
            &resolver,
            &geometry,
            &ids,
            &env,
            &BorderVariant::interior(),
        );
        assert!(stmts.is_empty());
    }
}
