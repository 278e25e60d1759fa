//! The kernel lowering engine.
//!
//! [`lower_kernel`] turns one [`KernelSpec`] into one synthesized procedure
//! body for the chosen backend:
//!
//! 1. `geometry` decides how a thread (or loop iteration) finds its pixels.
//! 2. `access` picks a storage tier per read accessor.
//! 3. `border` selects the boundary variants and builds their guards.
//! 4. `tiling` sizes on-chip tiles and emits the staging copies.
//! 5. `rewrite` clones the body once per variant and tiling iteration,
//!    resolving every logical access; `convolve` expands reductions inside
//!    those clones.
//!
//! All lookup state lives in a [`LowerCtx`] owned by one call; nothing is
//! shared between kernels.

pub mod access;
pub mod border;
pub mod builtins;
pub mod convolve;
pub mod geometry;
pub mod rewrite;
pub mod tiling;

#[cfg(test)]
pub(crate) mod tests;

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use tracing::{debug, trace};

use crate::ast::{Block, Expr, Stmt, TileDecl};
use crate::config::LowerOptions;
use crate::diagnostic::{Diagnostic, DiagnosticSink};
use crate::kernel::{Backend, KernelSpec};
use crate::span::Span;

use access::{AccessPlan, AccessResolver};
use border::{BorderPlanner, BorderVariant};
use geometry::{Geometry, Grid, ThreadIds};
use rewrite::{Rewriter, Substitution};
use tiling::TilingStager;

/// How far a fatal error reaches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorScope {
    /// Structural violation: this kernel produces no output.
    Kernel,
    /// Capability gap: the whole compilation stops.
    Compilation,
}

/// Failure of one lowering run with everything reported up to that point.
#[derive(Clone, Debug, PartialEq)]
pub struct LowerError {
    pub diagnostics: Vec<Diagnostic>,
    pub scope: ErrorScope,
}

impl LowerError {
    /// The fatal diagnostic that stopped lowering.
    pub fn primary(&self) -> Option<&Diagnostic> {
        self.diagnostics.iter().find(|d| d.is_error())
    }
}

impl fmt::Display for LowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.primary() {
            Some(d) => write!(f, "{}", d.message),
            None => write!(f, "lowering failed"),
        }
    }
}

impl std::error::Error for LowerError {}

/// The result of lowering one kernel.
#[derive(Clone, Debug, PartialEq)]
pub struct LoweredKernel {
    pub name: String,
    pub backend: Backend,
    /// Every kernel parameter the body reads; the launcher must supply them.
    pub params: BTreeSet<String>,
    pub tiles: Vec<TileDecl>,
    /// Selected boundary variants in dispatch order.
    pub variants: Vec<BorderVariant>,
    pub plans: Vec<AccessPlan>,
    pub body: Block,
    pub warnings: Vec<Diagnostic>,
}

/// Per-invocation state shared by all passes.
pub(crate) struct LowerCtx<'a> {
    pub spec: &'a KernelSpec,
    pub options: &'a LowerOptions,
    pub backend: Backend,
    pub resolver: AccessResolver<'a>,
    diagnostics: Vec<Diagnostic>,
    warned: HashSet<(Span, String)>,
    next_id: u32,
}

impl<'a> LowerCtx<'a> {
    fn new(
        spec: &'a KernelSpec,
        options: &'a LowerOptions,
        backend: Backend,
        plans: &'a [AccessPlan],
    ) -> Self {
        Self {
            spec,
            options,
            backend,
            resolver: AccessResolver::new(spec, backend, plans),
            diagnostics: Vec::new(),
            warned: HashSet::new(),
            next_id: 0,
        }
    }

    /// Report a structural violation; lowering of this kernel stops.
    pub fn fatal(&mut self, diagnostic: Diagnostic) -> ErrorScope {
        debug!(message = %diagnostic.message, "fatal lowering error");
        self.diagnostics.push(diagnostic);
        ErrorScope::Kernel
    }

    /// Report a capability gap; the whole compilation stops.
    pub fn abort_compilation(&mut self, diagnostic: Diagnostic) -> ErrorScope {
        debug!(message = %diagnostic.message, "aborting compilation");
        self.diagnostics.push(diagnostic);
        ErrorScope::Compilation
    }

    /// Report a warning once per call site, however often the body is cloned.
    pub fn warn_once(&mut self, diagnostic: Diagnostic) {
        if self
            .warned
            .insert((diagnostic.span, diagnostic.message.clone()))
        {
            self.diagnostics.push(diagnostic);
        }
    }

    pub fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Lower `spec`, collecting diagnostics into the returned value.
pub fn lower_kernel(spec: &KernelSpec, options: &LowerOptions) -> Result<LoweredKernel, LowerError> {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    match lower_kernel_into(spec, options, &mut diagnostics) {
        Ok(kernel) => Ok(kernel),
        Err(scope) => Err(LowerError { diagnostics, scope }),
    }
}

/// Lower `spec`, reporting every diagnostic into `sink`.
///
/// On success the warnings are also attached to the returned kernel. On
/// failure nothing but the diagnostics is produced.
pub fn lower_kernel_into(
    spec: &KernelSpec,
    options: &LowerOptions,
    sink: &mut dyn DiagnosticSink,
) -> Result<LoweredKernel, ErrorScope> {
    let backend = options.backend.unwrap_or(spec.backend);
    debug!(kernel = %spec.name, backend = backend.name(), "lowering kernel");

    let plans = access::plan_all(spec, backend);
    let (result, diagnostics) = {
        let mut ctx = LowerCtx::new(spec, options, backend, &plans);
        let result = lower(&mut ctx, &plans);
        (result, ctx.diagnostics)
    };

    let warnings: Vec<Diagnostic> = diagnostics
        .iter()
        .filter(|d| !d.is_error())
        .cloned()
        .collect();
    for diagnostic in diagnostics {
        sink.report(diagnostic);
    }

    let (body, tiles, variants) = result?;
    let params = collect_params(&body);
    debug!(
        kernel = %spec.name,
        variants = variants.len(),
        tiles = tiles.len(),
        params = params.len(),
        "lowered kernel"
    );
    Ok(LoweredKernel {
        name: spec.name.clone(),
        backend,
        params,
        tiles,
        variants,
        plans,
        body,
        warnings,
    })
}

type Lowered = (Block, Vec<TileDecl>, Vec<BorderVariant>);

fn lower(ctx: &mut LowerCtx<'_>, plans: &[AccessPlan]) -> Result<Lowered, ErrorScope> {
    validate(ctx)?;
    let spec = ctx.spec;
    let explore = ctx.options.explore;
    let geometry = Geometry::plan(spec, ctx.backend);

    let mut base = Substitution::new(geometry.gid_x.clone(), geometry.gid_y.clone());
    let mut stmts = geometry.preamble.clone();
    if spec.vectorize {
        stmts.extend(vector_views(spec, &mut base));
    }

    match &geometry.grid {
        Grid::LoopNest => {
            let body = Rewriter::new(ctx, base, BorderVariant::interior()).rewrite_block(&spec.body)?;
            stmts.push(geometry.loop_nest(spec, body));
            Ok((Block::new(stmts), Vec::new(), vec![BorderVariant::interior()]))
        }
        Grid::Threads(ids) => {
            base.local_x = Some(ids.local_x.clone());
            base.local_y = Some(ids.local_y.clone());

            let planner = BorderPlanner::new(spec, explore);
            let variants = planner.plan();
            let stager = TilingStager::new(spec, plans, ctx.backend, explore);
            let tiles = stager.decls();
            stmts.extend(tiles.iter().cloned().map(Stmt::Tile));

            let lowering = VariantLowering {
                geometry: &geometry,
                ids,
                stager: &stager,
                base: &base,
            };
            if variants.len() > 1 {
                let arms = planner.dispatch(&variants, ids, |variant| lowering.body(ctx, variant))?;
                stmts.push(Stmt::Dispatch(arms));
            } else {
                for variant in &variants {
                    stmts.extend(lowering.body(ctx, variant)?.stmts);
                }
            }
            Ok((Block::new(stmts), tiles, variants))
        }
    }
}

/// Everything needed to emit one variant's body on a thread grid.
struct VariantLowering<'g> {
    geometry: &'g Geometry,
    ids: &'g ThreadIds,
    stager: &'g TilingStager,
    base: &'g Substitution,
}

impl VariantLowering<'_> {
    /// Staging, then one clone of the kernel body per pixel of the thread,
    /// each under its own row bindings and bounds checks.
    fn body(&self, ctx: &mut LowerCtx<'_>, variant: &BorderVariant) -> Result<Block, ErrorScope> {
        let spec = ctx.spec;
        let mut stmts = self.stager.stage(
            spec,
            &ctx.resolver,
            self.geometry,
            self.ids,
            self.base,
            variant,
        );

        let mut rows = Vec::new();
        for p in 0..spec.pixels_per_thread {
            let mut env = self.base.clone();
            env.gid_y = self.geometry.gid_y_at(p);
            env.local_y = Some(self.ids.local_row_at(p));
            let clone = Rewriter::new(ctx, env.clone(), *variant).rewrite_block(&spec.body)?;
            trace!(variant = variant.kind.label(), p, stmts = clone.stmts.len(), "cloned body");
            rows.push(match variant.y_check(&env.gid_y) {
                Some(cond) => Stmt::If {
                    cond,
                    then_block: clone,
                    else_block: None,
                },
                None => Stmt::Block(clone),
            });
        }

        match variant.x_check(&self.base.gid_x) {
            Some(cond) => stmts.push(Stmt::If {
                cond,
                then_block: Block::new(rows),
                else_block: None,
            }),
            None => stmts.extend(rows),
        }
        Ok(Block::new(stmts))
    }
}

/// Kernel-level checks that do not depend on the body.
fn validate(ctx: &mut LowerCtx<'_>) -> Result<(), ErrorScope> {
    let spec = ctx.spec;
    if spec.pixels_per_thread == 0 {
        return Err(ctx.fatal(Diagnostic::error(
            format!("kernel '{}': pixels_per_thread must be at least 1", spec.name),
            Span::dummy(),
        )));
    }
    if ctx.backend.is_gpu() && (spec.threads_x == 0 || spec.threads_y == 0) {
        return Err(ctx.fatal(Diagnostic::error(
            format!(
                "kernel '{}': thread block {}x{} is empty",
                spec.name, spec.threads_x, spec.threads_y
            ),
            Span::dummy(),
        )));
    }
    for mask in &spec.masks {
        let Some(cells) = mask.cells() else {
            return Err(ctx.fatal(Diagnostic::error(
                format!(
                    "mask '{}' window {}x{} is too large",
                    mask.name, mask.size_x, mask.size_y
                ),
                mask.decl_span,
            )));
        };
        if cells == 0 {
            return Err(ctx.fatal(Diagnostic::error(
                format!("mask '{}' has an empty window", mask.name),
                mask.decl_span,
            )));
        }
        if let Some(values) = &mask.values {
            if values.len() != cells as usize {
                return Err(ctx.fatal(Diagnostic::error(
                    format!(
                        "mask '{}' has {} coefficients, expected {}x{}",
                        mask.name,
                        values.len(),
                        mask.size_x,
                        mask.size_y
                    ),
                    mask.decl_span,
                )));
            }
        }
    }
    for acc in &spec.accessors {
        if acc.size_x == 0 || acc.size_y == 0 {
            return Err(ctx.fatal(Diagnostic::error(
                format!("accessor '{}' has an empty window", acc.name),
                Span::dummy(),
            )));
        }
        if acc.cells().is_none() {
            return Err(ctx.fatal(Diagnostic::error(
                format!(
                    "accessor '{}' window {}x{} is too large",
                    acc.name, acc.size_x, acc.size_y
                ),
                Span::dummy(),
            )));
        }
        // Tile rows and columns are computed in u32 from these.
        let rows = spec
            .pixels_per_thread
            .checked_mul(spec.threads_y)
            .and_then(|r| r.checked_add(acc.size_y))
            .and_then(|r| r.checked_add(spec.threads_y));
        let cols = spec.threads_x.checked_add(acc.size_x);
        if ctx.backend.is_gpu() && (rows.is_none() || cols.is_none()) {
            return Err(ctx.fatal(
                Diagnostic::error(
                    format!(
                        "accessor '{}': block {}x{} with {} pixels per thread is too large",
                        acc.name, spec.threads_x, spec.threads_y, spec.pixels_per_thread
                    ),
                    Span::dummy(),
                )
                .with_note("the staged footprint must fit in 32 bits".to_string()),
            ));
        }
    }
    Ok(())
}

/// 4-lane views of every image, bound in `env` so reads go through them.
fn vector_views(spec: &KernelSpec, env: &mut Substitution) -> Vec<Stmt> {
    let images = spec
        .accessors
        .iter()
        .map(|a| (&a.name, &a.pixel))
        .chain(std::iter::once((&spec.output.name, &spec.output.pixel)));
    images
        .map(|(name, pixel)| {
            let view = access::vector_view_name(name);
            env.bind(name, Expr::Var(view.clone()));
            Stmt::Decl {
                name: view,
                ty: pixel.widen4(),
                init: Some(Expr::cast(pixel.widen4(), Expr::Param(name.clone()))),
                span: Span::dummy(),
            }
        })
        .collect()
}

/// Names of every kernel parameter referenced by `body`.
pub fn collect_params(body: &Block) -> BTreeSet<String> {
    let mut params = BTreeSet::new();
    let mut visit = |e: &Expr| {
        if let Expr::Param(name) = e {
            params.insert(name.clone());
        }
    };
    body.walk_exprs(&mut visit);
    params
}
