//! Pretty-printing for lowered bodies.
//!
//! This is a backend-neutral C-like rendering used by `pixkern lower --dump`,
//! the `variants` listing and test failure messages. It is not a code
//! generator: intrinsics print as `local_id(0)`, tiles as `tile` declarations
//! and the boundary dispatch as labeled arms.

use super::{Block, Expr, Intrinsic, Stmt, Ty, UnOp};

const INDENT: &str = "    ";

/// Format a type for display.
pub fn format_ty(ty: &Ty) -> String {
    ty.as_str()
}

/// Format a block, one statement per line, at the given indent depth.
pub fn format_block(block: &Block, depth: usize) -> String {
    let mut out = String::new();
    for stmt in &block.stmts {
        write_stmt(&mut out, stmt, depth);
    }
    out
}

/// Format a single statement (may span several lines).
pub fn format_stmt(stmt: &Stmt) -> String {
    let mut out = String::new();
    write_stmt(&mut out, stmt, 0);
    out
}

fn pad(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn write_braced(out: &mut String, block: &Block, depth: usize) {
    out.push_str("{\n");
    out.push_str(&format_block(block, depth + 1));
    pad(out, depth);
    out.push('}');
}

fn write_stmt(out: &mut String, stmt: &Stmt, depth: usize) {
    pad(out, depth);
    match stmt {
        Stmt::Decl { name, ty, init, .. } => {
            out.push_str(&format!("{} {}", format_ty(ty), name));
            if let Some(init) = init {
                out.push_str(&format!(" = {}", format_expr(init)));
            }
            out.push(';');
        }
        Stmt::Assign { target, op, value } => {
            out.push_str(&format!(
                "{} {} {};",
                format_expr(target),
                op.as_str(),
                format_expr(value)
            ));
        }
        Stmt::Expr(e) => out.push_str(&format!("{};", format_expr(e))),
        Stmt::If {
            cond,
            then_block,
            else_block,
        } => {
            out.push_str(&format!("if ({}) ", format_expr(cond)));
            write_braced(out, then_block, depth);
            if let Some(b) = else_block {
                out.push_str(" else ");
                write_braced(out, b, depth);
            }
        }
        Stmt::For {
            var,
            start,
            end,
            body,
        } => {
            out.push_str(&format!(
                "for (int {v} = {}; {v} < {}; {v}++) ",
                format_expr(start),
                format_expr(end),
                v = var
            ));
            write_braced(out, body, depth);
        }
        Stmt::Return(None) => out.push_str("return;"),
        Stmt::Return(Some(e)) => out.push_str(&format!("return {};", format_expr(e))),
        Stmt::Block(b) => write_braced(out, b, depth),
        Stmt::Tile(tile) => {
            out.push_str(&format!(
                "tile {} {}[{}][{}];",
                format_ty(&tile.elem),
                tile.name,
                format_expr(&tile.rows),
                format_expr(&tile.cols)
            ));
        }
        Stmt::Barrier => out.push_str("barrier();"),
        Stmt::Dispatch(arms) => {
            out.push_str("dispatch {\n");
            for arm in arms {
                pad(out, depth + 1);
                out.push_str(&format!("{} if ({}) ", arm.label, format_expr(&arm.guard)));
                write_braced(out, &arm.body, depth + 1);
                out.push('\n');
            }
            pad(out, depth);
            out.push('}');
        }
    }
    out.push('\n');
}

/// Format an intrinsic as `name(dim)`.
pub fn format_intrinsic(intrinsic: &Intrinsic) -> String {
    let (name, dim) = match intrinsic {
        Intrinsic::LocalId(d) => ("local_id", d),
        Intrinsic::GroupId(d) => ("group_id", d),
        Intrinsic::LocalSize(d) => ("local_size", d),
        Intrinsic::GlobalId(d) => ("global_id", d),
        Intrinsic::NumGroups(d) => ("num_groups", d),
    };
    format!("{}({})", name, dim.index())
}

fn format_args(args: &[Expr]) -> String {
    args.iter().map(format_expr).collect::<Vec<_>>().join(", ")
}

/// Operands that need parentheses when nested under an operator.
fn format_operand(e: &Expr) -> String {
    match e {
        Expr::Binary { .. } | Expr::Select { .. } | Expr::Cast { .. } => {
            format!("({})", format_expr(e))
        }
        _ => format_expr(e),
    }
}

/// Format an expression. Nested operators are fully parenthesized.
pub fn format_expr(expr: &Expr) -> String {
    match expr {
        Expr::Int(v) => v.to_string(),
        Expr::Float(v) => {
            if v.fract() == 0.0 && v.is_finite() {
                format!("{:.1}f", v)
            } else {
                format!("{}f", v)
            }
        }
        Expr::Bool(b) => b.to_string(),
        Expr::Var(name) | Expr::Param(name) => name.clone(),
        Expr::Member { name, .. } => format!("this.{}", name),
        Expr::Unary { op, expr } => {
            let sym = match op {
                UnOp::Neg => "-",
                UnOp::Not => "!",
            };
            format!("{}{}", sym, format_operand(expr))
        }
        Expr::Binary { op, lhs, rhs } => format!(
            "{} {} {}",
            format_operand(lhs),
            op.as_str(),
            format_operand(rhs)
        ),
        Expr::Select {
            cond,
            then_expr,
            else_expr,
        } => format!(
            "{} ? {} : {}",
            format_operand(cond),
            format_operand(then_expr),
            format_operand(else_expr)
        ),
        Expr::Cast { ty, expr } => format!("({}){}", format_ty(ty), format_operand(expr)),
        Expr::Call { func, args, .. } => format!("{}({})", func, format_args(args)),
        Expr::Apply { target, args, .. } => {
            format!("{}({})", format_operand(target), format_args(args))
        }
        Expr::Method {
            receiver,
            method,
            args,
            ..
        } => match receiver {
            Some(r) => format!("{}.{}({})", format_operand(r), method, format_args(args)),
            None => format!("{}({})", method, format_args(args)),
        },
        Expr::Lambda(lambda) => {
            format!(
                "[&]() -> {} {{ {}}}",
                format_ty(&lambda.ret_ty),
                format_block(&lambda.body, 0).replace('\n', " ")
            )
        }
        Expr::Enum { name, .. } => name.clone(),
        Expr::Builtin(intrinsic) => format_intrinsic(intrinsic),
        Expr::Index { base, index } => format!("{}[{}]", format_operand(base), format_expr(index)),
        Expr::Index2 { base, row, col } => format!(
            "{}[{}][{}]",
            format_operand(base),
            format_expr(row),
            format_expr(col)
        ),
        Expr::SurfaceRead { surface, x, y } => {
            format!("read({}, {}, {})", surface, format_expr(x), format_expr(y))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AssignOp, BinOp, Dim, DispatchArm, TileDecl};

    #[test]
    fn test_nested_binary_is_parenthesized() {
        let e = Expr::add(
            Expr::mul(
                Expr::Builtin(Intrinsic::LocalSize(Dim::X)),
                Expr::Builtin(Intrinsic::GroupId(Dim::X)),
            ),
            Expr::Builtin(Intrinsic::LocalId(Dim::X)),
        );
        assert_eq!(
            format_expr(&e),
            "(local_size(0) * group_id(0)) + local_id(0)"
        );
    }

    #[test]
    fn test_literals_and_casts() {
        assert_eq!(format_expr(&Expr::Float(2.0)), "2.0f");
        assert_eq!(format_expr(&Expr::Float(0.0625)), "0.0625f");
        let cast = Expr::cast(Ty::Int, Expr::binary(BinOp::Div, Expr::var("a"), Expr::Int(2)));
        assert_eq!(format_expr(&cast), "(int)(a / 2)");
    }

    #[test]
    fn test_index_and_surface() {
        let e = Expr::index2(Expr::var("_smeminput"), Expr::Int(1), Expr::var("lx"));
        assert_eq!(format_expr(&e), "_smeminput[1][lx]");
        let s = Expr::SurfaceRead {
            surface: "_tex_blur_input".to_string(),
            x: Box::new(Expr::var("x")),
            y: Box::new(Expr::var("y")),
        };
        assert_eq!(format_expr(&s), "read(_tex_blur_input, x, y)");
    }

    #[test]
    fn test_for_loop_and_assign() {
        let stmt = Stmt::For {
            var: "i".to_string(),
            start: Expr::Int(0),
            end: Expr::Int(3),
            body: Block::new(vec![Stmt::Assign {
                target: Expr::var("acc"),
                op: AssignOp::Add,
                value: Expr::var("i"),
            }]),
        };
        assert_eq!(
            format_stmt(&stmt),
            "for (int i = 0; i < 3; i++) {\n    acc += i;\n}\n"
        );
    }

    #[test]
    fn test_dispatch_tile_and_barrier() {
        let block = Block::new(vec![
            Stmt::Tile(TileDecl {
                name: "_smeminput".to_string(),
                elem: Ty::Float,
                rows: Expr::Int(3),
                cols: Expr::Int(35),
            }),
            Stmt::Barrier,
            Stmt::Dispatch(vec![DispatchArm {
                label: "no_border".to_string(),
                guard: Expr::Bool(true),
                body: Block::new(vec![Stmt::Return(None)]),
            }]),
        ]);
        let text = format_block(&block, 0);
        assert!(text.starts_with("tile float _smeminput[3][35];\nbarrier();\n"));
        assert!(text.contains("dispatch {\n    no_border if (true) {\n        return;\n    }\n}\n"));
    }
}
