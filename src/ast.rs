//! The statement/expression model shared by kernel bodies and lowered output.
//!
//! Input bodies use the logical forms (`Member`, `Apply`, `Method`, `Call`
//! with `reduce`, `Lambda`, `Enum`). The lowering engine replaces those with
//! physical forms (`Param`, `Builtin`, `Index`, `Index2`, `SurfaceRead`,
//! `Select`) and adds the synthesized statements `Tile`, `Barrier` and
//! `Dispatch`. A printer for a concrete backend consumes the result.

pub mod display;

use serde::{Deserialize, Serialize};

use crate::span::Span;

/// Scalar and vector types that appear in declarations and casts.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ty {
    Bool,
    Uchar,
    Int,
    Uint,
    Float,
    Double,
    /// N-lane SIMD vector of the element type.
    Vector(Box<Ty>, u8),
}

impl Ty {
    pub fn is_arithmetic(&self) -> bool {
        matches!(self, Ty::Uchar | Ty::Int | Ty::Uint | Ty::Float | Ty::Double)
    }

    /// The 4-lane form of an arithmetic type; other types are returned as-is.
    pub fn widen4(&self) -> Ty {
        if self.is_arithmetic() {
            Ty::Vector(Box::new(self.clone()), 4)
        } else {
            self.clone()
        }
    }

    /// Vectorized form of a local value. Only floating types carry pixel
    /// lanes; integer locals count and index, so they stay scalar.
    pub fn widen_value(&self) -> Ty {
        match self {
            Ty::Float | Ty::Double => self.widen4(),
            _ => self.clone(),
        }
    }

    pub fn as_str(&self) -> String {
        match self {
            Ty::Bool => "bool".to_string(),
            Ty::Uchar => "uchar".to_string(),
            Ty::Int => "int".to_string(),
            Ty::Uint => "uint".to_string(),
            Ty::Float => "float".to_string(),
            Ty::Double => "double".to_string(),
            Ty::Vector(elem, n) => format!("{}{}", elem.as_str(), n),
        }
    }
}

/// A sequence of statements forming one lexical scope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self { stmts }
    }

    /// Visit every expression in the block, depth-first, parents first.
    pub fn walk_exprs(&self, f: &mut dyn FnMut(&Expr)) {
        for stmt in &self.stmts {
            stmt.walk_exprs(f);
        }
    }

    /// Visit every statement in the block, including nested ones.
    pub fn walk_stmts(&self, f: &mut dyn FnMut(&Stmt)) {
        for stmt in &self.stmts {
            stmt.walk_stmts(f);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

impl AssignOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignOp::Set => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
        }
    }
}

/// An on-chip tile buffer shared by one thread group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileDecl {
    pub name: String,
    pub elem: Ty,
    /// Row count; symbolic in exploration mode.
    pub rows: Expr,
    /// Column count including halo and bank padding; symbolic in exploration mode.
    pub cols: Expr,
}

/// One arm of the boundary dispatch table: taken when `guard` holds and no
/// earlier arm matched. Control joins after the last arm.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatchArm {
    pub label: String,
    pub guard: Expr,
    pub body: Block,
}

/// Statements.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stmt {
    Decl {
        name: String,
        ty: Ty,
        init: Option<Expr>,
        #[serde(default)]
        span: Span,
    },
    Assign {
        target: Expr,
        op: AssignOp,
        value: Expr,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then_block: Block,
        else_block: Option<Block>,
    },
    /// `for (int var = start; var < end; var++)`
    For {
        var: String,
        start: Expr,
        end: Expr,
        body: Block,
    },
    Return(Option<Expr>),
    Block(Block),
    Tile(TileDecl),
    /// Thread-group barrier over on-chip memory.
    Barrier,
    /// First-match-wins dispatch over boundary variants.
    Dispatch(Vec<DispatchArm>),
}

impl Stmt {
    pub fn walk_exprs(&self, f: &mut dyn FnMut(&Expr)) {
        match self {
            Stmt::Decl { init, .. } => {
                if let Some(e) = init {
                    e.walk(f);
                }
            }
            Stmt::Assign { target, value, .. } => {
                target.walk(f);
                value.walk(f);
            }
            Stmt::Expr(e) => e.walk(f),
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                cond.walk(f);
                then_block.walk_exprs(f);
                if let Some(b) = else_block {
                    b.walk_exprs(f);
                }
            }
            Stmt::For {
                start, end, body, ..
            } => {
                start.walk(f);
                end.walk(f);
                body.walk_exprs(f);
            }
            Stmt::Return(e) => {
                if let Some(e) = e {
                    e.walk(f);
                }
            }
            Stmt::Block(b) => b.walk_exprs(f),
            Stmt::Tile(tile) => {
                tile.rows.walk(f);
                tile.cols.walk(f);
            }
            Stmt::Barrier => {}
            Stmt::Dispatch(arms) => {
                for arm in arms {
                    arm.guard.walk(f);
                    arm.body.walk_exprs(f);
                }
            }
        }
    }

    pub fn walk_stmts(&self, f: &mut dyn FnMut(&Stmt)) {
        f(self);
        match self {
            Stmt::If {
                then_block,
                else_block,
                ..
            } => {
                then_block.walk_stmts(f);
                if let Some(b) = else_block {
                    b.walk_stmts(f);
                }
            }
            Stmt::For { body, .. } | Stmt::Block(body) => body.walk_stmts(f),
            Stmt::Dispatch(arms) => {
                for arm in arms {
                    arm.body.walk_stmts(f);
                }
            }
            _ => {}
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dim {
    X,
    Y,
}

impl Dim {
    pub fn index(&self) -> u8 {
        match self {
            Dim::X => 0,
            Dim::Y => 1,
        }
    }
}

/// Thread-geometry queries. The engine picks the semantic; the backend
/// printer picks the spelling (`threadIdx.x`, `get_local_id(0)`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intrinsic {
    LocalId(Dim),
    GroupId(Dim),
    LocalSize(Dim),
    GlobalId(Dim),
    NumGroups(Dim),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureKind {
    ByRef,
    ByCopy,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    pub name: String,
    pub kind: CaptureKind,
}

/// The per-cell body of a reduction: `[&] () -> ret_ty { ... return v; }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    #[serde(default)]
    pub captures: Vec<Capture>,
    #[serde(default)]
    pub default_capture: Option<CaptureKind>,
    pub ret_ty: Ty,
    pub body: Block,
    #[serde(default)]
    pub span: Span,
}

/// Expressions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Int(i64),
    Float(f64),
    Bool(bool),
    /// A local variable or loop index.
    Var(String),
    /// A kernel parameter supplied by the surrounding driver.
    Param(String),
    /// A kernel-class member: accessor, mask or scalar.
    Member {
        name: String,
        #[serde(default)]
        span: Span,
    },
    Unary {
        op: UnOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Select {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Cast {
        ty: Ty,
        expr: Box<Expr>,
    },
    /// Free function call: math builtins and `reduce`/`convolve`.
    Call {
        func: String,
        args: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    /// Call operator on a member: `acc(dx, dy)`, `acc()`, `acc(mask)`, `mask(x, y)`, `mask()`.
    Apply {
        target: Box<Expr>,
        args: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    /// Method call; `receiver == None` means the kernel itself (`output()`, `getX()`).
    Method {
        receiver: Option<Box<Expr>>,
        method: String,
        args: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    Lambda(Box<Lambda>),
    /// An enumerator token such as a reduction mode.
    Enum {
        name: String,
        #[serde(default)]
        span: Span,
    },
    Builtin(Intrinsic),
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    /// `base[row][col]`
    Index2 {
        base: Box<Expr>,
        row: Box<Expr>,
        col: Box<Expr>,
    },
    /// Read through the cached read-only surface path at absolute coordinates.
    SurfaceRead {
        surface: String,
        x: Box<Expr>,
        y: Box<Expr>,
    },
}

impl Expr {
    pub fn var(name: &str) -> Expr {
        Expr::Var(name.to_string())
    }

    pub fn param(name: &str) -> Expr {
        Expr::Param(name.to_string())
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Add, lhs, rhs)
    }

    pub fn sub(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Sub, lhs, rhs)
    }

    pub fn mul(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Mul, lhs, rhs)
    }

    pub fn and(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::And, lhs, rhs)
    }

    pub fn lt(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Lt, lhs, rhs)
    }

    pub fn ge(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Ge, lhs, rhs)
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Eq, lhs, rhs)
    }

    pub fn select(cond: Expr, then_expr: Expr, else_expr: Expr) -> Expr {
        Expr::Select {
            cond: Box::new(cond),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        }
    }

    pub fn cast(ty: Ty, expr: Expr) -> Expr {
        Expr::Cast {
            ty,
            expr: Box::new(expr),
        }
    }

    pub fn index(base: Expr, index: Expr) -> Expr {
        Expr::Index {
            base: Box::new(base),
            index: Box::new(index),
        }
    }

    pub fn index2(base: Expr, row: Expr, col: Expr) -> Expr {
        Expr::Index2 {
            base: Box::new(base),
            row: Box::new(row),
            col: Box::new(col),
        }
    }

    /// `lhs + rhs`, dropping a literal zero on the right.
    pub fn add_offset(lhs: Expr, rhs: Expr) -> Expr {
        match rhs {
            Expr::Int(0) => lhs,
            rhs => Expr::add(lhs, rhs),
        }
    }

    /// Conjunction of optional terms; `None` when there are none.
    pub fn all(terms: Vec<Expr>) -> Option<Expr> {
        terms.into_iter().reduce(Expr::and)
    }

    /// Name of the member this expression refers to, if it is one.
    pub fn member_name(&self) -> Option<&str> {
        match self {
            Expr::Member { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Expr::Member { span, .. }
            | Expr::Call { span, .. }
            | Expr::Apply { span, .. }
            | Expr::Method { span, .. }
            | Expr::Enum { span, .. } => *span,
            Expr::Lambda(lambda) => lambda.span,
            _ => Span::dummy(),
        }
    }

    /// Visit this expression and its subexpressions, parents first.
    /// Lambda bodies are visited as well.
    pub fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Unary { expr, .. } | Expr::Cast { expr, .. } => expr.walk(f),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.walk(f);
                rhs.walk(f);
            }
            Expr::Select {
                cond,
                then_expr,
                else_expr,
            } => {
                cond.walk(f);
                then_expr.walk(f);
                else_expr.walk(f);
            }
            Expr::Call { args, .. } => {
                for a in args {
                    a.walk(f);
                }
            }
            Expr::Apply { target, args, .. } => {
                target.walk(f);
                for a in args {
                    a.walk(f);
                }
            }
            Expr::Method { receiver, args, .. } => {
                if let Some(r) = receiver {
                    r.walk(f);
                }
                for a in args {
                    a.walk(f);
                }
            }
            Expr::Lambda(lambda) => lambda.body.walk_exprs(f),
            Expr::Index { base, index } => {
                base.walk(f);
                index.walk(f);
            }
            Expr::Index2 { base, row, col } => {
                base.walk(f);
                row.walk(f);
                col.walk(f);
            }
            Expr::SurfaceRead { x, y, .. } => {
                x.walk(f);
                y.walk(f);
            }
            Expr::Int(_)
            | Expr::Float(_)
            | Expr::Bool(_)
            | Expr::Var(_)
            | Expr::Param(_)
            | Expr::Member { .. }
            | Expr::Enum { .. }
            | Expr::Builtin(_) => {}
        }
    }
}
