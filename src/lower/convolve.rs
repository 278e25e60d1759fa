//! Window reductions: `reduce(mask, mode, [&] { ... return v; })`.
//!
//! A reduction over a constant mask is unrolled cell by cell with the
//! coefficients inlined; any other mask becomes a two-level loop over the
//! window. Either way the accumulator is a fresh local declared in front of
//! the statement that contains the reduction, and the reduction expression
//! itself becomes a read of that local.

use tracing::debug;

use crate::ast::{AssignOp, Block, CaptureKind, Expr, Lambda, Stmt};
use crate::diagnostic::Diagnostic;
use crate::kernel::Mask;
use crate::span::Span;

use super::access::{mask_literal, AccessResolver};
use super::rewrite::Rewriter;
use super::ErrorScope;

/// How cell values are folded into the accumulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReduceMode {
    Sum,
    Min,
    Max,
    Prod,
}

impl ReduceMode {
    pub fn name(&self) -> &'static str {
        match self {
            ReduceMode::Sum => "sum",
            ReduceMode::Min => "min",
            ReduceMode::Max => "max",
            ReduceMode::Prod => "prod",
        }
    }

    /// Statement folding `value` into `acc`.
    pub fn fold(&self, acc: Expr, value: Expr) -> Stmt {
        match self {
            ReduceMode::Sum => Stmt::Assign {
                target: acc,
                op: AssignOp::Add,
                value,
            },
            ReduceMode::Prod => Stmt::Assign {
                target: acc,
                op: AssignOp::Mul,
                value,
            },
            ReduceMode::Min => replace_if(crate::ast::BinOp::Lt, acc, value),
            ReduceMode::Max => replace_if(crate::ast::BinOp::Gt, acc, value),
        }
    }
}

fn replace_if(op: crate::ast::BinOp, acc: Expr, value: Expr) -> Stmt {
    Stmt::If {
        cond: Expr::binary(op, value.clone(), acc.clone()),
        then_block: Block::new(vec![Stmt::Assign {
            target: acc,
            op: AssignOp::Set,
            value,
        }]),
        else_block: None,
    }
}

const SUPPORTED_MODES: &str = "sum, min, max, prod";

/// The window cell a clone of the reduction body stands for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cell {
    /// Unrolled: a literal cell, coefficients inlined.
    Fixed { x: u32, y: u32 },
    /// Loop form: live references to the loop indices.
    Loop { x: String, y: String },
}

/// Reduction context visible while rewriting its body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReduceScope {
    pub mask: String,
    pub half_x: u32,
    pub half_y: u32,
    pub cell: Cell,
    pub accumulator: String,
    pub mode: ReduceMode,
}

impl ReduceScope {
    /// Window offsets of `acc(mask)` relative to the center pixel.
    pub fn offsets(&self) -> (Expr, Expr) {
        let (hx, hy) = (self.half_x, self.half_y);
        match &self.cell {
            Cell::Fixed { x, y } => (
                Expr::Int(*x as i64 - hx as i64),
                Expr::Int(*y as i64 - hy as i64),
            ),
            Cell::Loop { x, y } => (
                Expr::sub(Expr::var(x), Expr::Int(hx as i64)),
                Expr::sub(Expr::var(y), Expr::Int(hy as i64)),
            ),
        }
    }
}

/// `mask()` inside the reduction body.
pub fn mask_value(resolver: &AccessResolver<'_>, mask: &Mask, scope: &ReduceScope) -> Expr {
    match &scope.cell {
        Cell::Fixed { x, y } => match mask.value_at(*x, *y) {
            Some(value) => mask_literal(mask, value),
            None => resolver.mask_cell(mask, Expr::Int(*x as i64), Expr::Int(*y as i64)),
        },
        Cell::Loop { x, y } => resolver.mask_cell(mask, Expr::var(x), Expr::var(y)),
    }
}

/// Turn the body's `return value;` into the accumulator update for this cell.
pub fn accumulate(env: &super::rewrite::Substitution, value: Expr) -> Stmt {
    let Some(scope) = &env.reduce else {
        return Stmt::Return(Some(value));
    };
    let acc = Expr::var(&scope.accumulator);
    let init = Stmt::Assign {
        target: acc.clone(),
        op: AssignOp::Set,
        value: value.clone(),
    };
    match &scope.cell {
        Cell::Fixed { x: 0, y: 0 } => init,
        Cell::Fixed { .. } => scope.mode.fold(acc, value),
        Cell::Loop { x, y } => Stmt::If {
            cond: Expr::and(
                Expr::eq(Expr::var(x), Expr::Int(0)),
                Expr::eq(Expr::var(y), Expr::Int(0)),
            ),
            then_block: Block::new(vec![init]),
            else_block: Some(Block::new(vec![scope.mode.fold(acc, value)])),
        },
    }
}

/// Expand one `reduce(...)` call. The accumulator declaration and the
/// expansion are hoisted in front of the current statement.
pub(crate) fn expand(rw: &mut Rewriter<'_, '_>, args: &[Expr], span: Span) -> Result<Expr, ErrorScope> {
    let spec = rw.ctx.spec;
    let [mask_arg, mode_arg, body_arg] = args else {
        return Err(rw.ctx.fatal(Diagnostic::error(
            format!(
                "reduce expects 3 arguments (mask, mode, body), found {}",
                args.len()
            ),
            span,
        )));
    };

    let Some(mask_name) = mask_arg.member_name() else {
        return Err(rw.ctx.fatal(Diagnostic::error(
            "first argument of reduce must be a mask member of the kernel".to_string(),
            mask_arg.span().or(span),
        )));
    };
    let Some(mask) = spec.mask(mask_name) else {
        return Err(rw.ctx.fatal(Diagnostic::error(
            format!("no mask named '{}' in kernel", mask_name),
            mask_arg.span().or(span),
        )));
    };
    if rw.env.reduce.is_some() {
        return Err(rw.ctx.fatal(Diagnostic::error(
            "nested reductions are not supported".to_string(),
            span,
        )));
    }

    let propagate = rw.ctx.options.propagate_constants;
    if propagate && !mask.is_constant() {
        rw.ctx.warn_once(
            Diagnostic::warning(
                format!(
                    "mask '{}' is not constant; reduction is lowered as a loop",
                    mask.name
                ),
                span,
            )
            .with_related(mask.decl_span, "mask declared here".to_string()),
        );
    }

    let mode = parse_mode(rw, mode_arg, span)?;
    let lambda = match body_arg {
        Expr::Lambda(lambda) => lambda.as_ref(),
        other => {
            return Err(rw.ctx.fatal(Diagnostic::error(
                "third argument of reduce must be a lambda".to_string(),
                other.span().or(span),
            )));
        }
    };
    check_captures(rw, lambda)?;

    let id = rw.ctx.next_id();
    let accumulator = format!("_conv_tmp{}", id);
    let ty = if spec.vectorize {
        lambda.ret_ty.widen_value()
    } else {
        lambda.ret_ty.clone()
    };
    rw.hoist(Stmt::Decl {
        name: accumulator.clone(),
        ty,
        init: None,
        span,
    });

    let scope = |cell| ReduceScope {
        mask: mask.name.clone(),
        half_x: mask.size_x / 2,
        half_y: mask.size_y / 2,
        cell,
        accumulator: accumulator.clone(),
        mode,
    };

    if propagate && mask.is_constant() {
        debug!(
            mask = %mask.name,
            mode = mode.name(),
            cells = u64::from(mask.size_x) * u64::from(mask.size_y),
            "unrolling reduction"
        );
        for y in 0..mask.size_y {
            for x in 0..mask.size_x {
                let env = rw.env.with_reduce(scope(Cell::Fixed { x, y }));
                let body = rw.nested(env).rewrite_block(&lambda.body)?;
                rw.hoist(Stmt::Block(body));
            }
        }
    } else {
        let (cx, cy) = (format!("_conv_x{}", id), format!("_conv_y{}", id));
        debug!(mask = %mask.name, mode = mode.name(), "looping reduction");
        let env = rw.env.with_reduce(scope(Cell::Loop {
            x: cx.clone(),
            y: cy.clone(),
        }));
        let body = rw.nested(env).rewrite_block(&lambda.body)?;
        rw.hoist(Stmt::For {
            var: cy,
            start: Expr::Int(0),
            end: Expr::Int(mask.size_y as i64),
            body: Block::new(vec![Stmt::For {
                var: cx,
                start: Expr::Int(0),
                end: Expr::Int(mask.size_x as i64),
                body,
            }]),
        });
    }

    Ok(Expr::Var(accumulator))
}

fn parse_mode(rw: &mut Rewriter<'_, '_>, arg: &Expr, call: Span) -> Result<ReduceMode, ErrorScope> {
    let Expr::Enum { name, span } = arg else {
        return Err(rw.ctx.fatal(Diagnostic::error(
            "second argument of reduce must be a reduction mode".to_string(),
            arg.span().or(call),
        )));
    };
    let span = span.or(call);
    match name.to_ascii_lowercase().as_str() {
        "sum" => Ok(ReduceMode::Sum),
        "min" => Ok(ReduceMode::Min),
        "max" => Ok(ReduceMode::Max),
        "prod" | "product" => Ok(ReduceMode::Prod),
        "median" => Err(rw.ctx.fatal(
            Diagnostic::error("reduction mode 'median' is not supported".to_string(), span)
                .with_help(format!("supported modes are: {}", SUPPORTED_MODES)),
        )),
        _ => Err(rw.ctx.fatal(
            Diagnostic::error(format!("unknown reduction mode '{}'", name), span)
                .with_help(format!("supported modes are: {}", SUPPORTED_MODES)),
        )),
    }
}

fn check_captures(rw: &mut Rewriter<'_, '_>, lambda: &Lambda) -> Result<(), ErrorScope> {
    let by_copy = lambda
        .captures
        .iter()
        .find(|c| c.kind == CaptureKind::ByCopy)
        .map(|c| format!("capture of '{}' by copy", c.name))
        .or_else(|| {
            (lambda.default_capture == Some(CaptureKind::ByCopy))
                .then(|| "default capture by copy '[=]'".to_string())
        });
    match by_copy {
        Some(what) => Err(rw.ctx.fatal(
            Diagnostic::error(
                format!("{} is not supported in a reduction body", what),
                lambda.span,
            )
            .with_help("capture by reference with '[&]'".to_string()),
        )),
        None => Ok(()),
    }
}
