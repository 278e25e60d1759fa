//! Boundary-variant planning and the dispatch table that selects a variant
//! per thread block at run time.
//!
//! Up to ten specializations of the body exist: the fallback, four corners,
//! four edges and the plain interior case. Each is guarded by a comparison of
//! the block coordinate against four driver-supplied thresholds. The table is
//! evaluated in [`VariantKind::PRIORITY`] order and the first guard that
//! holds wins.

use tracing::{debug, trace};

use crate::ast::{BinOp, Block, DispatchArm, Expr};
use crate::kernel::KernelSpec;

use super::geometry::ThreadIds;

pub const START_LEFT: &str = "start_left";
pub const START_RIGHT: &str = "start_right";
pub const START_TOP: &str = "start_top";
pub const START_BOTTOM: &str = "start_bottom";
pub const FALL_BACK: &str = "fall_back";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VariantKind {
    Fallback,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Top,
    Bottom,
    Left,
    Right,
    NoBorder,
}

impl VariantKind {
    /// Dispatch order: fallback, corners, edges, interior.
    pub const PRIORITY: [VariantKind; 10] = [
        VariantKind::Fallback,
        VariantKind::TopLeft,
        VariantKind::TopRight,
        VariantKind::BottomLeft,
        VariantKind::BottomRight,
        VariantKind::Top,
        VariantKind::Bottom,
        VariantKind::Left,
        VariantKind::Right,
        VariantKind::NoBorder,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            VariantKind::Fallback => "fall_back",
            VariantKind::TopLeft => "top_left",
            VariantKind::TopRight => "top_right",
            VariantKind::BottomLeft => "bottom_left",
            VariantKind::BottomRight => "bottom_right",
            VariantKind::Top => "top",
            VariantKind::Bottom => "bottom",
            VariantKind::Left => "left",
            VariantKind::Right => "right",
            VariantKind::NoBorder => "no_border",
        }
    }

    pub fn is_corner(&self) -> bool {
        matches!(
            self,
            VariantKind::TopLeft
                | VariantKind::TopRight
                | VariantKind::BottomLeft
                | VariantKind::BottomRight
        )
    }
}

/// One selected specialization of the body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BorderVariant {
    pub kind: VariantKind,
    pub needs_top: bool,
    pub needs_bottom: bool,
    pub needs_left: bool,
    pub needs_right: bool,
    /// Guard each output row against the iteration-space height.
    pub requires_bounds_check: bool,
    /// Guard against the left edge of the iteration space.
    pub check_left: bool,
    /// Guard against the right edge of the iteration space.
    pub check_right: bool,
}

impl BorderVariant {
    /// A variant that handles no image edge; used for the CPU loop nest.
    pub fn interior() -> Self {
        Self {
            kind: VariantKind::NoBorder,
            needs_top: false,
            needs_bottom: false,
            needs_left: false,
            needs_right: false,
            requires_bounds_check: false,
            check_left: false,
            check_right: false,
        }
    }

    pub fn handles_any(&self) -> bool {
        self.needs_top || self.needs_bottom || self.needs_left || self.needs_right
    }

    /// Column guard `[is_offset_x, is_width + is_offset_x)` restricted to the
    /// sides this variant checks.
    pub fn x_check(&self, gid_x: &Expr) -> Option<Expr> {
        let mut terms = Vec::new();
        if self.check_left {
            terms.push(Expr::ge(gid_x.clone(), Expr::param("is_offset_x")));
        }
        if self.check_right {
            terms.push(Expr::lt(
                gid_x.clone(),
                Expr::add(Expr::param("is_width"), Expr::param("is_offset_x")),
            ));
        }
        Expr::all(terms)
    }

    /// Row guard `[is_offset_y, is_height + is_offset_y)` for one output row.
    pub fn y_check(&self, gid_y: &Expr) -> Option<Expr> {
        if !self.requires_bounds_check {
            return None;
        }
        Expr::all(vec![
            Expr::ge(gid_y.clone(), Expr::param("is_offset_y")),
            Expr::lt(
                gid_y.clone(),
                Expr::add(Expr::param("is_height"), Expr::param("is_offset_y")),
            ),
        ])
    }
}

/// Decides which variants a kernel needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BorderPlanner {
    handling: bool,
    kernel_x: bool,
    kernel_y: bool,
    threads_y: u32,
    ppt: u32,
    explore: bool,
}

impl BorderPlanner {
    pub fn new(spec: &KernelSpec, explore: bool) -> Self {
        let mut kernel_x = false;
        let mut kernel_y = false;
        for acc in &spec.accessors {
            if acc.boundary.is_defined() {
                kernel_x |= acc.size_x > 1;
                kernel_y |= acc.size_y > 1;
            }
        }
        Self {
            handling: kernel_x || kernel_y,
            kernel_x,
            kernel_y,
            threads_y: spec.threads_y,
            ppt: spec.pixels_per_thread,
            explore,
        }
    }

    /// Some accessor with a window and a defined boundary policy exists.
    pub fn needs_handling(&self) -> bool {
        self.handling
    }

    /// Variants considered before structural filtering.
    pub fn candidates(&self) -> Vec<VariantKind> {
        if self.handling {
            VariantKind::PRIORITY.to_vec()
        } else {
            vec![VariantKind::NoBorder]
        }
    }

    /// Whether `kind` can ever be reached for this kernel.
    pub fn is_possible(&self, kind: VariantKind) -> bool {
        match kind {
            VariantKind::Fallback | VariantKind::NoBorder | VariantKind::Right => true,
            VariantKind::TopLeft
            | VariantKind::TopRight
            | VariantKind::BottomLeft
            | VariantKind::BottomRight => self.kernel_x && self.kernel_y,
            VariantKind::Top => self.kernel_y,
            VariantKind::Bottom => {
                self.kernel_y || self.threads_y > 1 || self.ppt > 1 || self.explore
            }
            VariantKind::Left => self.kernel_x,
        }
    }

    pub fn variant(&self, kind: VariantKind) -> BorderVariant {
        if !self.handling {
            return BorderVariant {
                requires_bounds_check: true,
                check_left: true,
                check_right: true,
                ..BorderVariant::interior()
            };
        }

        let (kx, ky) = (self.kernel_x, self.kernel_y);
        let (top, bottom, left, right) = match kind {
            VariantKind::Fallback => (ky, ky, kx, kx),
            VariantKind::TopLeft => (true, false, true, false),
            VariantKind::TopRight => (true, false, false, true),
            VariantKind::BottomLeft => (false, true, true, false),
            VariantKind::BottomRight => (false, true, false, true),
            VariantKind::Top => (true, false, false, false),
            // Without corners the bottom variant also covers both bottom corners.
            VariantKind::Bottom => (false, true, kx && !ky, kx && !ky),
            VariantKind::Left => (false, false, true, false),
            VariantKind::Right => (false, false, false, true),
            VariantKind::NoBorder => (false, false, false, false),
        };

        let any = top || bottom || left || right;
        BorderVariant {
            kind,
            needs_top: top,
            needs_bottom: bottom,
            needs_left: left,
            needs_right: right,
            requires_bounds_check: any && (!ky || bottom),
            check_left: any && (!kx || left),
            check_right: any && (!kx || right),
        }
    }

    /// Selected variants in dispatch order.
    pub fn plan(&self) -> Vec<BorderVariant> {
        let variants: Vec<BorderVariant> = self
            .candidates()
            .into_iter()
            .filter(|kind| {
                let keep = self.is_possible(*kind);
                if !keep {
                    trace!(variant = kind.label(), "variant cannot occur, skipped");
                }
                keep
            })
            .map(|kind| self.variant(kind))
            .collect();
        debug!(
            handling = self.handling,
            kernel_x = self.kernel_x,
            kernel_y = self.kernel_y,
            selected = variants.len(),
            "planned boundary variants"
        );
        variants
    }

    /// Runtime predicate selecting `kind`.
    pub fn guard(&self, kind: VariantKind, ids: &ThreadIds) -> Expr {
        let left = || Expr::lt(ids.group_x.clone(), Expr::param(START_LEFT));
        let right = || Expr::ge(ids.group_x.clone(), Expr::param(START_RIGHT));
        let top = || Expr::lt(ids.group_y.clone(), Expr::param(START_TOP));
        let bottom = || Expr::ge(ids.group_y.clone(), Expr::param(START_BOTTOM));
        match kind {
            VariantKind::Fallback => Expr::binary(BinOp::Ne, Expr::param(FALL_BACK), Expr::Int(0)),
            VariantKind::TopLeft => Expr::and(left(), top()),
            VariantKind::TopRight => Expr::and(right(), top()),
            VariantKind::BottomLeft => Expr::and(left(), bottom()),
            VariantKind::BottomRight => Expr::and(right(), bottom()),
            VariantKind::Top => top(),
            VariantKind::Bottom => bottom(),
            VariantKind::Left => left(),
            VariantKind::Right => right(),
            VariantKind::NoBorder => Expr::Bool(true),
        }
    }

    /// Build the dispatch table, one arm per variant in order.
    pub fn dispatch<E>(
        &self,
        variants: &[BorderVariant],
        ids: &ThreadIds,
        mut body: impl FnMut(&BorderVariant) -> Result<Block, E>,
    ) -> Result<Vec<DispatchArm>, E> {
        variants
            .iter()
            .map(|variant| {
                Ok(DispatchArm {
                    label: variant.kind.label().to_string(),
                    guard: self.guard(variant.kind, ids),
                    body: body(variant)?,
                })
            })
            .collect()
    }
}
