//! Content addressing for lowered kernels: structural serialization + BLAKE3.
//!
//! A lowered kernel is serialized into a tagged byte stream and hashed.
//! Two lowerings of the same `KernelSpec` with the same options always give
//! the same hash, which is what `pixkern hash` and the determinism tests
//! rely on. Diagnostics and spans do not take part.

use crate::ast::*;
use crate::lower::LoweredKernel;

// ─── Serialization Format Tags ─────────────────────────────────────

const TAG_KERNEL: u8 = 0x01;
const TAG_DECL: u8 = 0x02;
const TAG_ASSIGN: u8 = 0x03;
const TAG_EXPR_STMT: u8 = 0x04;
const TAG_IF: u8 = 0x05;
const TAG_FOR: u8 = 0x06;
const TAG_RETURN: u8 = 0x07;
const TAG_BLOCK: u8 = 0x08;
const TAG_TILE: u8 = 0x09;
const TAG_BARRIER: u8 = 0x0A;
const TAG_DISPATCH: u8 = 0x0B;

const TAG_INT: u8 = 0x20;
const TAG_FLOAT: u8 = 0x21;
const TAG_BOOL: u8 = 0x22;
const TAG_VAR: u8 = 0x23;
const TAG_PARAM: u8 = 0x24;
const TAG_MEMBER: u8 = 0x25;
const TAG_UNARY: u8 = 0x26;
const TAG_BINARY: u8 = 0x27;
const TAG_SELECT: u8 = 0x28;
const TAG_CAST: u8 = 0x29;
const TAG_CALL: u8 = 0x2A;
const TAG_APPLY: u8 = 0x2B;
const TAG_METHOD: u8 = 0x2C;
const TAG_LAMBDA: u8 = 0x2D;
const TAG_ENUM: u8 = 0x2E;
const TAG_INTRINSIC: u8 = 0x2F;
const TAG_INDEX: u8 = 0x30;
const TAG_INDEX2: u8 = 0x31;
const TAG_SURFACE: u8 = 0x32;

const TAG_TY_BOOL: u8 = 0x80;
const TAG_TY_UCHAR: u8 = 0x81;
const TAG_TY_INT: u8 = 0x82;
const TAG_TY_UINT: u8 = 0x83;
const TAG_TY_FLOAT: u8 = 0x84;
const TAG_TY_DOUBLE: u8 = 0x85;
const TAG_TY_VECTOR: u8 = 0x86;

// Bumped whenever the byte layout changes.
const HASH_VERSION: u8 = 1;

// ─── Content Hash ──────────────────────────────────────────────────

/// A 256-bit BLAKE3 content hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(pub [u8; 32]);

/// Digits of the short form; `i`, `l`, `o` and `u` are left out so a
/// hash copied off a terminal is not misread.
const SHORT_ALPHABET: &[u8; 32] = b"0123456789abcdefghjkmnpqrstvwxyz";
const SHORT_DIGITS: u32 = 8;

impl ContentHash {
    /// All 64 lowercase hex digits of the kernel digest; `hash --full` prints this.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// The leading 40 bits of the digest as eight base-32 digits. This is
    /// what `pixkern hash` and `Display` show, enough to tell lowered kernels apart
    /// in a listing.
    pub fn to_short(&self) -> String {
        let prefix = self.0[..5]
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        (0..SHORT_DIGITS)
            .rev()
            .map(|digit| SHORT_ALPHABET[((prefix >> (digit * 5)) & 0x1f) as usize] as char)
            .collect()
    }
}

impl std::fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.to_short())
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.to_short())
    }
}

// ─── Serializer ────────────────────────────────────────────────────

/// Deterministic byte encoding of lowered bodies.
#[derive(Default)]
pub struct Serializer {
    buf: Vec<u8>,
}

impl Serializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize a whole lowered kernel.
    pub fn kernel(mut self, kernel: &LoweredKernel) -> Vec<u8> {
        self.write_u8(HASH_VERSION);
        self.write_u8(TAG_KERNEL);
        self.write_str(&kernel.name);
        self.write_str(kernel.backend.name());
        self.write_u32(kernel.params.len() as u32);
        for param in &kernel.params {
            self.write_str(param);
        }
        self.serialize_block(&kernel.body);
        self.buf
    }

    // ─── Helpers ───────────────────────────────────────────────

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_str(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn write_opt(&mut self, present: bool) {
        self.write_u8(u8::from(present));
    }

    // ─── Types ─────────────────────────────────────────────────

    fn serialize_type(&mut self, ty: &Ty) {
        match ty {
            Ty::Bool => self.write_u8(TAG_TY_BOOL),
            Ty::Uchar => self.write_u8(TAG_TY_UCHAR),
            Ty::Int => self.write_u8(TAG_TY_INT),
            Ty::Uint => self.write_u8(TAG_TY_UINT),
            Ty::Float => self.write_u8(TAG_TY_FLOAT),
            Ty::Double => self.write_u8(TAG_TY_DOUBLE),
            Ty::Vector(elem, lanes) => {
                self.write_u8(TAG_TY_VECTOR);
                self.serialize_type(elem);
                self.write_u8(*lanes);
            }
        }
    }

    // ─── Statements ────────────────────────────────────────────

    fn serialize_block(&mut self, block: &Block) {
        self.write_u8(TAG_BLOCK);
        self.write_u32(block.stmts.len() as u32);
        for stmt in &block.stmts {
            self.serialize_stmt(stmt);
        }
    }

    fn serialize_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Decl { name, ty, init, .. } => {
                self.write_u8(TAG_DECL);
                self.write_str(name);
                self.serialize_type(ty);
                self.write_opt(init.is_some());
                if let Some(init) = init {
                    self.serialize_expr(init);
                }
            }
            Stmt::Assign { target, op, value } => {
                self.write_u8(TAG_ASSIGN);
                self.write_u8(*op as u8);
                self.serialize_expr(target);
                self.serialize_expr(value);
            }
            Stmt::Expr(e) => {
                self.write_u8(TAG_EXPR_STMT);
                self.serialize_expr(e);
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                self.write_u8(TAG_IF);
                self.serialize_expr(cond);
                self.serialize_block(then_block);
                self.write_opt(else_block.is_some());
                if let Some(b) = else_block {
                    self.serialize_block(b);
                }
            }
            Stmt::For {
                var,
                start,
                end,
                body,
            } => {
                self.write_u8(TAG_FOR);
                self.write_str(var);
                self.serialize_expr(start);
                self.serialize_expr(end);
                self.serialize_block(body);
            }
            Stmt::Return(value) => {
                self.write_u8(TAG_RETURN);
                self.write_opt(value.is_some());
                if let Some(v) = value {
                    self.serialize_expr(v);
                }
            }
            Stmt::Block(b) => self.serialize_block(b),
            Stmt::Tile(tile) => {
                self.write_u8(TAG_TILE);
                self.write_str(&tile.name);
                self.serialize_type(&tile.elem);
                self.serialize_expr(&tile.rows);
                self.serialize_expr(&tile.cols);
            }
            Stmt::Barrier => self.write_u8(TAG_BARRIER),
            Stmt::Dispatch(arms) => {
                self.write_u8(TAG_DISPATCH);
                self.write_u32(arms.len() as u32);
                for arm in arms {
                    self.write_str(&arm.label);
                    self.serialize_expr(&arm.guard);
                    self.serialize_block(&arm.body);
                }
            }
        }
    }

    // ─── Expressions ───────────────────────────────────────────

    fn serialize_exprs(&mut self, exprs: &[Expr]) {
        self.write_u32(exprs.len() as u32);
        for e in exprs {
            self.serialize_expr(e);
        }
    }

    fn serialize_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Int(v) => {
                self.write_u8(TAG_INT);
                self.write_u64(*v as u64);
            }
            Expr::Float(v) => {
                self.write_u8(TAG_FLOAT);
                self.write_u64(v.to_bits());
            }
            Expr::Bool(b) => {
                self.write_u8(TAG_BOOL);
                self.write_u8(u8::from(*b));
            }
            Expr::Var(name) => {
                self.write_u8(TAG_VAR);
                self.write_str(name);
            }
            Expr::Param(name) => {
                self.write_u8(TAG_PARAM);
                self.write_str(name);
            }
            Expr::Member { name, .. } => {
                self.write_u8(TAG_MEMBER);
                self.write_str(name);
            }
            Expr::Unary { op, expr } => {
                self.write_u8(TAG_UNARY);
                self.write_u8(*op as u8);
                self.serialize_expr(expr);
            }
            Expr::Binary { op, lhs, rhs } => {
                self.write_u8(TAG_BINARY);
                self.write_u8(*op as u8);
                self.serialize_expr(lhs);
                self.serialize_expr(rhs);
            }
            Expr::Select {
                cond,
                then_expr,
                else_expr,
            } => {
                self.write_u8(TAG_SELECT);
                self.serialize_expr(cond);
                self.serialize_expr(then_expr);
                self.serialize_expr(else_expr);
            }
            Expr::Cast { ty, expr } => {
                self.write_u8(TAG_CAST);
                self.serialize_type(ty);
                self.serialize_expr(expr);
            }
            Expr::Call { func, args, .. } => {
                self.write_u8(TAG_CALL);
                self.write_str(func);
                self.serialize_exprs(args);
            }
            Expr::Apply { target, args, .. } => {
                self.write_u8(TAG_APPLY);
                self.serialize_expr(target);
                self.serialize_exprs(args);
            }
            Expr::Method {
                receiver,
                method,
                args,
                ..
            } => {
                self.write_u8(TAG_METHOD);
                self.write_opt(receiver.is_some());
                if let Some(r) = receiver {
                    self.serialize_expr(r);
                }
                self.write_str(method);
                self.serialize_exprs(args);
            }
            Expr::Lambda(lambda) => {
                self.write_u8(TAG_LAMBDA);
                self.serialize_type(&lambda.ret_ty);
                self.serialize_block(&lambda.body);
            }
            Expr::Enum { name, .. } => {
                self.write_u8(TAG_ENUM);
                self.write_str(name);
            }
            Expr::Builtin(intrinsic) => {
                self.write_u8(TAG_INTRINSIC);
                let (kind, dim) = match intrinsic {
                    Intrinsic::LocalId(d) => (0, d),
                    Intrinsic::GroupId(d) => (1, d),
                    Intrinsic::LocalSize(d) => (2, d),
                    Intrinsic::GlobalId(d) => (3, d),
                    Intrinsic::NumGroups(d) => (4, d),
                };
                self.write_u8(kind);
                self.write_u8(dim.index());
            }
            Expr::Index { base, index } => {
                self.write_u8(TAG_INDEX);
                self.serialize_expr(base);
                self.serialize_expr(index);
            }
            Expr::Index2 { base, row, col } => {
                self.write_u8(TAG_INDEX2);
                self.serialize_expr(base);
                self.serialize_expr(row);
                self.serialize_expr(col);
            }
            Expr::SurfaceRead { surface, x, y } => {
                self.write_u8(TAG_SURFACE);
                self.write_str(surface);
                self.serialize_expr(x);
                self.serialize_expr(y);
            }
        }
    }
}

// ─── Public API ────────────────────────────────────────────────────

/// Hash arbitrary bytes.
pub fn hash_bytes(bytes: &[u8]) -> ContentHash {
    ContentHash(*blake3::hash(bytes).as_bytes())
}

/// Content hash of a lowered kernel.
pub fn content_hash(kernel: &LoweredKernel) -> ContentHash {
    hash_bytes(&Serializer::new().kernel(kernel))
}
