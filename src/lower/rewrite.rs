//! Rewriting a kernel body under a substitution environment.
//!
//! One [`Rewriter`] pass turns a logical body into a physical one: member
//! accesses become buffer reads, kernel methods become output writes, math
//! calls are respelled for the backend, and reductions are expanded in place.
//! The driver runs it once per variant and tiling iteration; the reduction
//! expander runs it once per mask cell (or once for the loop form) with a
//! narrower environment.

use std::collections::BTreeMap;

use tracing::trace;

use crate::ast::{Block, Dim, Expr, Stmt};
use crate::diagnostic::Diagnostic;
use crate::span::Span;

use super::border::BorderVariant;
use super::builtins;
use super::convolve::{self, ReduceScope};
use super::{ErrorScope, LowerCtx};

/// The bindings one clone of the body is rewritten under.
#[derive(Clone, Debug, PartialEq)]
pub struct Substitution {
    pub gid_x: Expr,
    pub gid_y: Expr,
    /// Tile column of this thread; `None` outside a thread grid.
    pub local_x: Option<Expr>,
    /// Tile row of this thread at the current tiling iteration.
    pub local_y: Option<Expr>,
    /// Image name to the expression that addresses its buffer.
    bindings: BTreeMap<String, Expr>,
    /// The reduction whose cell is being rewritten, if any.
    pub reduce: Option<ReduceScope>,
}

impl Substitution {
    pub fn new(gid_x: Expr, gid_y: Expr) -> Self {
        Self {
            gid_x,
            gid_y,
            local_x: None,
            local_y: None,
            bindings: BTreeMap::new(),
            reduce: None,
        }
    }

    pub fn bind(&mut self, name: &str, expr: Expr) {
        self.bindings.insert(name.to_string(), expr);
    }

    /// Buffer of an image; unbound names are kernel parameters.
    pub fn buffer(&self, name: &str) -> Expr {
        self.bindings
            .get(name)
            .cloned()
            .unwrap_or_else(|| Expr::Param(name.to_string()))
    }

    pub fn with_reduce(&self, scope: ReduceScope) -> Self {
        Self {
            reduce: Some(scope),
            ..self.clone()
        }
    }
}

pub struct Rewriter<'r, 'a> {
    pub(crate) ctx: &'r mut LowerCtx<'a>,
    pub(crate) env: Substitution,
    pub(crate) variant: BorderVariant,
    /// Statements to emit before the statement currently being rewritten.
    hoisted: Vec<Stmt>,
}

impl<'r, 'a> Rewriter<'r, 'a> {
    pub(crate) fn new(ctx: &'r mut LowerCtx<'a>, env: Substitution, variant: BorderVariant) -> Self {
        Self {
            ctx,
            env,
            variant,
            hoisted: Vec::new(),
        }
    }

    /// A rewriter for a nested scope sharing this run's context.
    pub(crate) fn nested(&mut self, env: Substitution) -> Rewriter<'_, 'a> {
        Rewriter {
            ctx: &mut *self.ctx,
            env,
            variant: self.variant,
            hoisted: Vec::new(),
        }
    }

    pub(crate) fn hoist(&mut self, stmt: Stmt) {
        self.hoisted.push(stmt);
    }

    pub fn rewrite_block(&mut self, block: &Block) -> Result<Block, ErrorScope> {
        let outer = std::mem::take(&mut self.hoisted);
        let mut stmts = Vec::with_capacity(block.stmts.len());
        let result = block
            .stmts
            .iter()
            .try_for_each(|stmt| self.rewrite_stmt(stmt, &mut stmts));
        self.hoisted = outer;
        result.map(|()| Block::new(stmts))
    }

    fn rewrite_stmt(&mut self, stmt: &Stmt, out: &mut Vec<Stmt>) -> Result<(), ErrorScope> {
        let rewritten = match stmt {
            Stmt::Decl {
                name,
                ty,
                init,
                span,
            } => {
                let ty = if self.ctx.spec.vectorize {
                    ty.widen_value()
                } else {
                    ty.clone()
                };
                let init = init.as_ref().map(|e| self.rewrite_expr(e)).transpose()?;
                Stmt::Decl {
                    name: name.clone(),
                    ty,
                    init,
                    span: *span,
                }
            }
            Stmt::Assign { target, op, value } => Stmt::Assign {
                target: self.rewrite_expr(target)?,
                op: *op,
                value: self.rewrite_expr(value)?,
            },
            Stmt::Expr(e) => Stmt::Expr(self.rewrite_expr(e)?),
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => Stmt::If {
                cond: self.rewrite_expr(cond)?,
                then_block: self.rewrite_block(then_block)?,
                else_block: else_block
                    .as_ref()
                    .map(|b| self.rewrite_block(b))
                    .transpose()?,
            },
            Stmt::For {
                var,
                start,
                end,
                body,
            } => Stmt::For {
                var: var.clone(),
                start: self.rewrite_expr(start)?,
                end: self.rewrite_expr(end)?,
                body: self.rewrite_block(body)?,
            },
            Stmt::Return(Some(value)) if self.env.reduce.is_some() => {
                let value = self.rewrite_expr(value)?;
                convolve::accumulate(&self.env, value)
            }
            Stmt::Return(None) if self.env.reduce.is_some() => {
                return Err(self.ctx.fatal(Diagnostic::error(
                    "reduction body must return a value".to_string(),
                    Span::dummy(),
                )));
            }
            Stmt::Return(value) => Stmt::Return(
                value.as_ref().map(|e| self.rewrite_expr(e)).transpose()?,
            ),
            Stmt::Block(block) => Stmt::Block(self.rewrite_block(block)?),
            Stmt::Tile(_) | Stmt::Barrier | Stmt::Dispatch(_) => {
                return Err(self.ctx.fatal(Diagnostic::error(
                    "kernel body contains a statement reserved for lowered code".to_string(),
                    Span::dummy(),
                )));
            }
        };
        out.append(&mut self.hoisted);
        out.push(rewritten);
        Ok(())
    }

    pub fn rewrite_expr(&mut self, expr: &Expr) -> Result<Expr, ErrorScope> {
        match expr {
            Expr::Int(_) | Expr::Float(_) | Expr::Bool(_) | Expr::Var(_) | Expr::Param(_) => {
                Ok(expr.clone())
            }
            Expr::Builtin(_) => Ok(expr.clone()),
            Expr::Member { name, span } => self.rewrite_member(name, *span),
            Expr::Unary { op, expr } => Ok(Expr::Unary {
                op: *op,
                expr: Box::new(self.rewrite_expr(expr)?),
            }),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.rewrite_expr(lhs)?;
                let rhs = self.rewrite_expr(rhs)?;
                Ok(Expr::binary(*op, lhs, rhs))
            }
            Expr::Select {
                cond,
                then_expr,
                else_expr,
            } => {
                let cond = self.rewrite_expr(cond)?;
                let then_expr = self.rewrite_expr(then_expr)?;
                let else_expr = self.rewrite_expr(else_expr)?;
                Ok(Expr::select(cond, then_expr, else_expr))
            }
            Expr::Cast { ty, expr } => {
                let ty = if self.ctx.spec.vectorize {
                    ty.widen_value()
                } else {
                    ty.clone()
                };
                Ok(Expr::cast(ty, self.rewrite_expr(expr)?))
            }
            Expr::Call { func, args, span } => match func.as_str() {
                "reduce" | "convolve" => convolve::expand(self, args, *span),
                _ => self.rewrite_builtin_call(func, args, *span),
            },
            Expr::Apply { target, args, span } => self.rewrite_apply(target, args, *span),
            Expr::Method {
                receiver,
                method,
                args,
                span,
            } => self.rewrite_method(receiver.as_deref(), method, args, *span),
            Expr::Lambda(lambda) => Err(self.ctx.fatal(Diagnostic::error(
                "lambda is only allowed as the body of a reduction".to_string(),
                lambda.span,
            ))),
            Expr::Enum { name, span } => Err(self.ctx.fatal(Diagnostic::error(
                format!("enumerator '{}' is only allowed as a reduction mode", name),
                *span,
            ))),
            Expr::Index { base, index } => {
                let base = self.rewrite_expr(base)?;
                let index = self.rewrite_expr(index)?;
                Ok(Expr::index(base, index))
            }
            Expr::Index2 { base, row, col } => {
                let base = self.rewrite_expr(base)?;
                let row = self.rewrite_expr(row)?;
                let col = self.rewrite_expr(col)?;
                Ok(Expr::index2(base, row, col))
            }
            Expr::SurfaceRead { surface, x, y } => Ok(Expr::SurfaceRead {
                surface: surface.clone(),
                x: Box::new(self.rewrite_expr(x)?),
                y: Box::new(self.rewrite_expr(y)?),
            }),
        }
    }

    fn rewrite_args(&mut self, args: &[Expr]) -> Result<Vec<Expr>, ErrorScope> {
        args.iter().map(|a| self.rewrite_expr(a)).collect()
    }

    fn unknown_member(&mut self, name: &str, span: Span) -> ErrorScope {
        self.ctx.fatal(
            Diagnostic::error(
                format!("no accessor, mask or scalar named '{}' in kernel", name),
                span,
            )
            .with_note("every member used in the body needs a mapping to a kernel parameter".to_string()),
        )
    }

    fn rewrite_member(&mut self, name: &str, span: Span) -> Result<Expr, ErrorScope> {
        let spec = self.ctx.spec;
        if spec.scalar(name).is_some() {
            return Ok(Expr::Param(name.to_string()));
        }
        if spec.accessor(name).is_some() || spec.mask(name).is_some() {
            return Err(self.ctx.fatal(
                Diagnostic::error(format!("'{}' must be called to read a value", name), span)
                    .with_help(format!("write '{}()' or '{}(dx, dy)'", name, name)),
            ));
        }
        Err(self.unknown_member(name, span))
    }

    fn rewrite_builtin_call(
        &mut self,
        func: &str,
        args: &[Expr],
        span: Span,
    ) -> Result<Expr, ErrorScope> {
        let backend = self.ctx.backend;
        let entry = builtins::lookup(func);
        let Some(spelling) = entry.and_then(|b| b.spelling(backend)) else {
            let supported = builtins::supported_names(backend).join(", ");
            return Err(self.ctx.abort_compilation(
                Diagnostic::error(
                    format!(
                        "call to unsupported function '{}' for the {} backend",
                        func,
                        backend.name()
                    ),
                    span,
                )
                .with_note(format!("supported functions are: {}", supported)),
            ));
        };
        if let Some(entry) = entry {
            if entry.arity != args.len() {
                return Err(self.ctx.fatal(Diagnostic::error(
                    format!(
                        "'{}' takes {} argument(s), found {}",
                        func,
                        entry.arity,
                        args.len()
                    ),
                    span,
                )));
            }
        }
        let args = self.rewrite_args(args)?;
        trace!(func, spelling, "respelled builtin");
        Ok(Expr::Call {
            func: spelling.to_string(),
            args,
            span,
        })
    }

    fn rewrite_apply(&mut self, target: &Expr, args: &[Expr], span: Span) -> Result<Expr, ErrorScope> {
        let spec = self.ctx.spec;
        let Some(name) = target.member_name() else {
            return Err(self.ctx.fatal(Diagnostic::error(
                "only accessors and masks can be called".to_string(),
                span,
            )));
        };

        if let Some(acc) = spec.accessor(name) {
            let (dx, dy) = match args {
                [] => (Expr::Int(0), Expr::Int(0)),
                [mask_arg] => self.reduce_offsets(mask_arg, span)?,
                [dx, dy] => (self.rewrite_expr(dx)?, self.rewrite_expr(dy)?),
                _ => {
                    return Err(self.ctx.fatal(Diagnostic::error(
                        format!(
                            "accessor '{}' takes 0, 1 (mask) or 2 (dx, dy) arguments, found {}",
                            name,
                            args.len()
                        ),
                        span,
                    )));
                }
            };
            return Ok(self
                .ctx
                .resolver
                .read_relative(acc, dx, dy, &self.env, &self.variant));
        }

        if let Some(mask) = spec.mask(name) {
            return match args {
                [] => match self.env.reduce.as_ref().filter(|s| s.mask == mask.name) {
                    Some(scope) => Ok(convolve::mask_value(&self.ctx.resolver, mask, scope)),
                    None => Err(self.ctx.fatal(Diagnostic::error(
                        format!("'{}()' is only valid inside a reduction over '{}'", name, name),
                        span,
                    ))),
                },
                [x, y] => {
                    let x = self.rewrite_expr(x)?;
                    let y = self.rewrite_expr(y)?;
                    self.mask_at(mask, x, y, span)
                }
                _ => Err(self.ctx.fatal(Diagnostic::error(
                    format!("mask '{}' takes 0 or 2 arguments, found {}", name, args.len()),
                    span,
                ))),
            };
        }

        Err(self.unknown_member(name, span))
    }

    /// `mask(x, y)`: folded to the coefficient when both offsets are literal.
    fn mask_at(
        &mut self,
        mask: &crate::kernel::Mask,
        x: Expr,
        y: Expr,
        span: Span,
    ) -> Result<Expr, ErrorScope> {
        if let (Expr::Int(dx), Expr::Int(dy), true) =
            (&x, &y, self.ctx.options.propagate_constants)
        {
            let col = dx + (mask.size_x / 2) as i64;
            let row = dy + (mask.size_y / 2) as i64;
            if col < 0 || row < 0 || col >= mask.size_x as i64 || row >= mask.size_y as i64 {
                return Err(self.ctx.fatal(Diagnostic::error(
                    format!(
                        "offset ({}, {}) lies outside the {}x{} mask '{}'",
                        dx, dy, mask.size_x, mask.size_y, mask.name
                    ),
                    span,
                )));
            }
            if let Some(value) = mask.value_at(col as u32, row as u32) {
                return Ok(super::access::mask_literal(mask, value));
            }
        }
        Ok(self.ctx.resolver.mask_at(mask, x, y))
    }

    /// Window offsets of `acc(mask)` for the current reduction cell.
    fn reduce_offsets(&mut self, mask_arg: &Expr, span: Span) -> Result<(Expr, Expr), ErrorScope> {
        let scope = mask_arg
            .member_name()
            .and_then(|m| self.env.reduce.as_ref().filter(|s| s.mask == m));
        match scope {
            Some(scope) => Ok(scope.offsets()),
            None => Err(self.ctx.fatal(Diagnostic::error(
                "an accessor can only be indexed by the mask of the enclosing reduction".to_string(),
                span,
            ))),
        }
    }

    fn rewrite_method(
        &mut self,
        receiver: Option<&Expr>,
        method: &str,
        args: &[Expr],
        span: Span,
    ) -> Result<Expr, ErrorScope> {
        let spec = self.ctx.spec;
        let Some(receiver) = receiver else {
            return match (method, args) {
                ("output", []) => Ok(self.ctx.resolver.output(&self.env)),
                ("outputAtPixel", [x, y]) => {
                    let x = self.rewrite_expr(x)?;
                    let y = self.rewrite_expr(y)?;
                    Ok(self.ctx.resolver.output_at(x, y, &self.env))
                }
                ("getX", []) => Ok(self.ctx.resolver.kernel_coord(Dim::X, &self.env)),
                ("getY", []) => Ok(self.ctx.resolver.kernel_coord(Dim::Y, &self.env)),
                _ => Err(self.ctx.fatal(Diagnostic::error(
                    format!("unsupported kernel method '{}' with {} argument(s)", method, args.len()),
                    span,
                ))),
            };
        };

        let Some(name) = receiver.member_name() else {
            return Err(self.ctx.fatal(Diagnostic::error(
                format!("method '{}' must be called on an accessor", method),
                span,
            )));
        };
        let Some(acc) = spec.accessor(name) else {
            return Err(self.unknown_member(name, receiver.span()));
        };
        match (method, args) {
            ("getPixel", [x, y]) => {
                let x = self.rewrite_expr(x)?;
                let y = self.rewrite_expr(y)?;
                Ok(self.ctx.resolver.read_absolute(acc, x, y, &self.env))
            }
            ("getX", []) => Ok(self.ctx.resolver.accessor_coord(acc, Dim::X, &self.env)),
            ("getY", []) => Ok(self.ctx.resolver.accessor_coord(acc, Dim::Y, &self.env)),
            _ => Err(self.ctx.fatal(Diagnostic::error(
                format!(
                    "unsupported accessor method '{}.{}' with {} argument(s)",
                    name,
                    method,
                    args.len()
                ),
                span,
            ))),
        }
    }
}
