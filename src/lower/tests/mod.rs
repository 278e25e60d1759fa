//! Lowering tests that exercise the whole engine.


use crate::ast::{
    AssignOp, Block, Capture, CaptureKind, Expr, Lambda, Stmt, Ty,
};
use crate::config::LowerOptions;
use crate::diagnostic::{Diagnostic, Severity};
use crate::kernel::{
    Accessor, Backend, BoundaryMode, Interpolation, IterationSpace, KernelSpec, Mask, StorageHint,
};
use crate::span::Span;

use super::border::VariantKind;
use super::{lower_kernel, lower_kernel_into, ErrorScope, LoweredKernel};

// ─── Fixtures ──────────────────────────────────────────────────────

pub(crate) fn member(name: &str) -> Expr {
    Expr::Member {
        name: name.to_string(),
        span: Span::dummy(),
    }
}

pub(crate) fn read(acc: &str, dx: i64, dy: i64) -> Expr {
    Expr::Apply {
        target: Box::new(member(acc)),
        args: vec![Expr::Int(dx), Expr::Int(dy)],
        span: Span::dummy(),
    }
}

pub(crate) fn apply(target: &str, args: Vec<Expr>) -> Expr {
    Expr::Apply {
        target: Box::new(member(target)),
        args,
        span: Span::dummy(),
    }
}

pub(crate) fn output() -> Expr {
    Expr::Method {
        receiver: None,
        method: "output".to_string(),
        args: vec![],
        span: Span::dummy(),
    }
}

pub(crate) fn write_output(value: Expr) -> Stmt {
    Stmt::Assign {
        target: output(),
        op: AssignOp::Set,
        value,
    }
}

pub(crate) fn lambda(body: Vec<Stmt>) -> Lambda {
    Lambda {
        captures: vec![],
        default_capture: Some(CaptureKind::ByRef),
        ret_ty: Ty::Float,
        body: Block::new(body),
        span: Span::new(0, 30, 60),
    }
}

pub(crate) fn reduce_with(mask: &str, mode: &str, body: Lambda) -> Expr {
    Expr::Call {
        func: "reduce".to_string(),
        args: vec![
            member(mask),
            Expr::Enum {
                name: mode.to_string(),
                span: Span::new(0, 20, 24),
            },
            Expr::Lambda(Box::new(body)),
        ],
        span: Span::new(0, 10, 60),
    }
}

/// `reduce(mask, mode, [&] { return mask() * input(mask); })`
pub(crate) fn weighted_reduce(mask: &str, mode: &str) -> Expr {
    reduce_with(
        mask,
        mode,
        lambda(vec![Stmt::Return(Some(Expr::mul(
            apply(mask, vec![]),
            apply("input", vec![member(mask)]),
        )))]),
    )
}

pub(crate) fn sample_spec(backend: Backend) -> KernelSpec {
    KernelSpec {
        name: "copy".to_string(),
        body: Block::new(vec![write_output(read("input", 0, 0))]),
        output: IterationSpace {
            name: "out".to_string(),
            pixel: Ty::Float,
            width: 4096,
            height: 4096,
            offset_x: 0,
            offset_y: 0,
            stride: None,
        },
        accessors: vec![Accessor {
            name: "input".to_string(),
            pixel: Ty::Float,
            size_x: 1,
            size_y: 1,
            boundary: BoundaryMode::Undefined,
            interpolation: Interpolation::None,
            storage: StorageHint::Global,
            offset_x: 0,
            offset_y: 0,
        }],
        masks: vec![],
        scalars: vec![],
        pixels_per_thread: 1,
        vectorize: false,
        backend,
        threads_x: 32,
        threads_y: 1,
        source: None,
    }
}

pub(crate) const BLUR_WEIGHTS: [f64; 9] = [0.0625, 0.125, 0.0625, 0.125, 0.25, 0.125, 0.0625, 0.125, 0.0625];

/// A 3x3 weighted reduction over `input` written to `out`.
pub(crate) fn blur_spec(backend: Backend, mode: &str, constant: bool) -> KernelSpec {
    let mut spec = sample_spec(backend);
    spec.name = "blur".to_string();
    spec.accessors[0].size_x = 3;
    spec.accessors[0].size_y = 3;
    spec.masks.push(Mask {
        name: "m".to_string(),
        elem: Ty::Float,
        size_x: 3,
        size_y: 3,
        values: constant.then(|| BLUR_WEIGHTS.to_vec()),
        decl_span: Span::new(0, 0, 8),
    });
    spec.body = Block::new(vec![write_output(weighted_reduce("m", mode))]);
    spec
}

fn no_prop() -> LowerOptions {
    LowerOptions {
        propagate_constants: false,
        ..LowerOptions::default()
    }
}

fn count_stmts(kernel: &LoweredKernel, pred: impl Fn(&Stmt) -> bool) -> usize {
    let mut n = 0;
    kernel.body.walk_stmts(&mut |s| {
        if pred(s) {
            n += 1;
        }
    });
    n
}

fn accumulator_updates(kernel: &LoweredKernel, wanted: AssignOp) -> usize {
    count_stmts(kernel, |s| {
        matches!(s, Stmt::Assign { target: Expr::Var(v), op, .. }
            if v.starts_with("_conv_tmp") && *op == wanted)
    })
}

fn params_of(expr: &Expr) -> Vec<String> {
    let mut params = Vec::new();
    expr.walk(&mut |e| {
        if let Expr::Param(p) = e {
            params.push(p.clone());
        }
    });
    params
}

// ─── Variants and staging ──────────────────────────────────────────

#[test]
fn point_kernel_has_single_variant_and_no_staging() {
    for backend in [Backend::Cuda, Backend::OpenCl] {
        let kernel = lower_kernel(&sample_spec(backend), &LowerOptions::default()).unwrap();
        assert_eq!(kernel.variants.len(), 1);
        assert_eq!(kernel.variants[0].kind, VariantKind::NoBorder);
        assert!(kernel.tiles.is_empty());
        assert_eq!(count_stmts(&kernel, |s| matches!(s, Stmt::Barrier)), 0);
        assert_eq!(count_stmts(&kernel, |s| matches!(s, Stmt::Dispatch(_))), 0);
    }
}

#[test]
fn clamp_window_dispatches_with_corner_guard() {
    let mut spec = sample_spec(Backend::Cuda);
    spec.accessors[0].size_x = 3;
    spec.accessors[0].size_y = 3;
    spec.accessors[0].boundary = BoundaryMode::Clamp;
    spec.body = Block::new(vec![write_output(Expr::add(read("input", -1, -1), read("input", 1, 1)))]);

    let kernel = lower_kernel(&spec, &LowerOptions::default()).unwrap();
    assert_eq!(kernel.variants.len(), 10);

    let Some(Stmt::Dispatch(arms)) = kernel.body.stmts.last() else {
        panic!("expected a dispatch table at the end of the body");
    };
    let labels: Vec<_> = arms.iter().map(|a| a.label.as_str()).collect();
    assert_eq!(labels[0], "fall_back");
    assert_eq!(labels[9], "no_border");
    let top_left = arms.iter().find(|a| a.label == "top_left").unwrap();
    let guard_params = params_of(&top_left.guard);
    assert!(guard_params.contains(&"start_left".to_string()));
    assert!(guard_params.contains(&"start_top".to_string()));

    for p in ["is_offset_x", "is_width", "is_offset_y", "is_height", "start_bottom", "input_width"] {
        assert!(kernel.params.contains(p), "missing parameter {}", p);
    }

    // The fallback variant checks the iteration space on both axes.
    let Stmt::If { cond, then_block, .. } = &arms[0].body.stmts[0] else {
        panic!("expected x bounds check");
    };
    let x_params = params_of(cond);
    assert_eq!(x_params, vec!["is_offset_x", "is_width", "is_offset_x"]);
    let Stmt::If { cond: y_cond, .. } = &then_block.stmts[0] else {
        panic!("expected y bounds check");
    };
    assert_eq!(params_of(y_cond), vec!["is_offset_y", "is_height", "is_offset_y"]);
}

#[test]
fn tiled_accessor_is_staged_before_use() {
    let mut spec = blur_spec(Backend::Cuda, "sum", true);
    spec.accessors[0].storage = StorageHint::Local;
    spec.threads_y = 4;
    let kernel = lower_kernel(&spec, &LowerOptions::default()).unwrap();
    assert_eq!(kernel.tiles.len(), 1);
    assert_eq!(kernel.tiles[0].name, "_smeminput");
    assert!(matches!(kernel.body.stmts[2], Stmt::Tile(_)));
    // Undefined boundary: one variant, one barrier.
    assert_eq!(count_stmts(&kernel, |s| matches!(s, Stmt::Barrier)), 1);
    let barrier_pos = kernel
        .body
        .stmts
        .iter()
        .position(|s| matches!(s, Stmt::Barrier))
        .unwrap();
    assert!(matches!(kernel.body.stmts[barrier_pos + 1], Stmt::If { .. }));
}

// ─── Reductions ────────────────────────────────────────────────────

#[test]
fn constant_sum_unrolls_into_nine_terms() {
    let kernel = lower_kernel(&blur_spec(Backend::Cuda, "sum", true), &LowerOptions::default()).unwrap();
    assert_eq!(accumulator_updates(&kernel, AssignOp::Set), 1);
    assert_eq!(accumulator_updates(&kernel, AssignOp::Add), 8);
    assert_eq!(count_stmts(&kernel, |s| matches!(s, Stmt::For { .. })), 0);
    assert!(kernel.warnings.is_empty());
    // Coefficients are inlined; the constant mask is never read.
    assert!(!kernel.params.iter().any(|p| p == "m"));
}

#[test]
fn product_unrolls_with_multiplication() {
    let kernel = lower_kernel(&blur_spec(Backend::OpenCl, "prod", true), &LowerOptions::default()).unwrap();
    assert_eq!(accumulator_updates(&kernel, AssignOp::Set), 1);
    assert_eq!(accumulator_updates(&kernel, AssignOp::Mul), 8);
}

#[test]
fn runtime_mask_loops_and_warns_once() {
    let mut spec = blur_spec(Backend::Cuda, "min", false);
    spec.accessors[0].boundary = BoundaryMode::Mirror;
    let kernel = lower_kernel(&spec, &LowerOptions::default()).unwrap();
    assert_eq!(kernel.variants.len(), 10);
    // One loop nest per variant clone.
    assert_eq!(
        count_stmts(&kernel, |s| matches!(s, Stmt::For { var, .. } if var.starts_with("_conv_y"))),
        10
    );
    assert_eq!(kernel.warnings.len(), 1);
    let warning = &kernel.warnings[0];
    assert_eq!(warning.severity, Severity::Warning);
    assert_eq!(warning.span, Span::new(0, 10, 60));
    assert_eq!(warning.related[0].0, Span::new(0, 0, 8));
    assert!(kernel.params.contains("m"));
}

#[test]
fn disabled_propagation_loops_silently() {
    let kernel = lower_kernel(&blur_spec(Backend::Cuda, "max", true), &no_prop()).unwrap();
    assert!(kernel.warnings.is_empty());
    assert_eq!(count_stmts(&kernel, |s| matches!(s, Stmt::For { .. })), 2);
    assert_eq!(accumulator_updates(&kernel, AssignOp::Set), 2);
}

#[test]
fn median_is_fatal_and_produces_nothing() {
    let err = lower_kernel(&blur_spec(Backend::Cuda, "median", true), &LowerOptions::default())
        .unwrap_err();
    assert_eq!(err.scope, ErrorScope::Kernel);
    let primary = err.primary().unwrap();
    assert!(primary.message.contains("median"));
    assert!(primary.help.as_ref().unwrap().contains("sum, min, max, prod"));
}

#[test]
fn unknown_mode_is_fatal() {
    let err = lower_kernel(&blur_spec(Backend::Cuda, "average", true), &LowerOptions::default())
        .unwrap_err();
    assert!(err.to_string().contains("unknown reduction mode 'average'"));
}

#[test]
fn reduce_arity_is_checked() {
    let mut spec = blur_spec(Backend::Cuda, "sum", true);
    spec.body = Block::new(vec![write_output(Expr::Call {
        func: "reduce".to_string(),
        args: vec![member("m"), Expr::Enum { name: "sum".to_string(), span: Span::dummy() }],
        span: Span::new(0, 1, 2),
    })]);
    let err = lower_kernel(&spec, &LowerOptions::default()).unwrap_err();
    assert!(err.to_string().contains("expects 3 arguments"));
}

#[test]
fn mask_argument_must_be_a_member() {
    let mut spec = blur_spec(Backend::Cuda, "sum", true);
    let mut body = lambda(vec![Stmt::Return(Some(Expr::Float(1.0)))]);
    body.captures.clear();
    spec.body = Block::new(vec![write_output(Expr::Call {
        func: "reduce".to_string(),
        args: vec![
            Expr::var("m"),
            Expr::Enum { name: "sum".to_string(), span: Span::dummy() },
            Expr::Lambda(Box::new(body)),
        ],
        span: Span::new(0, 1, 2),
    })]);
    let err = lower_kernel(&spec, &LowerOptions::default()).unwrap_err();
    assert!(err.to_string().contains("must be a mask member"));
}

#[test]
fn capture_by_copy_is_rejected() {
    let mut spec = blur_spec(Backend::Cuda, "sum", true);
    let mut body = lambda(vec![Stmt::Return(Some(apply("input", vec![member("m")])))]);
    body.captures.push(Capture {
        name: "scale".to_string(),
        kind: CaptureKind::ByCopy,
    });
    spec.body = Block::new(vec![write_output(reduce_with("m", "sum", body))]);
    let err = lower_kernel(&spec, &LowerOptions::default()).unwrap_err();
    assert!(err.to_string().contains("capture of 'scale' by copy"));

    let mut body = lambda(vec![Stmt::Return(Some(Expr::Float(0.0)))]);
    body.default_capture = Some(CaptureKind::ByCopy);
    spec.body = Block::new(vec![write_output(reduce_with("m", "sum", body))]);
    let err = lower_kernel(&spec, &LowerOptions::default()).unwrap_err();
    assert!(err.to_string().contains("[=]"));
}

#[test]
fn nested_reduction_is_rejected() {
    let mut spec = blur_spec(Backend::Cuda, "sum", true);
    let inner = weighted_reduce("m", "sum");
    spec.body = Block::new(vec![write_output(reduce_with(
        "m",
        "sum",
        lambda(vec![Stmt::Return(Some(inner))]),
    ))]);
    let err = lower_kernel(&spec, &LowerOptions::default()).unwrap_err();
    assert!(err.to_string().contains("nested reductions"));
}

// ─── Access errors ─────────────────────────────────────────────────

#[test]
fn unknown_member_is_fatal() {
    let mut spec = sample_spec(Backend::OpenCl);
    spec.body = Block::new(vec![write_output(read("missing", 0, 0))]);
    let err = lower_kernel(&spec, &LowerOptions::default()).unwrap_err();
    assert_eq!(err.scope, ErrorScope::Kernel);
    assert!(err.to_string().contains("'missing'"));
}

#[test]
fn scalar_member_becomes_parameter() {
    let mut spec = sample_spec(Backend::Cuda);
    spec.scalars.push(crate::kernel::ScalarParam {
        name: "gain".to_string(),
        ty: Ty::Float,
    });
    spec.body = Block::new(vec![write_output(Expr::mul(read("input", 0, 0), member("gain")))]);
    let kernel = lower_kernel(&spec, &LowerOptions::default()).unwrap();
    assert!(kernel.params.contains("gain"));
}

#[test]
fn unsupported_builtin_aborts_compilation() {
    let mut spec = sample_spec(Backend::Cuda);
    spec.body = Block::new(vec![write_output(Expr::Call {
        func: "printf".to_string(),
        args: vec![],
        span: Span::new(0, 3, 9),
    })]);
    let err = lower_kernel(&spec, &LowerOptions::default()).unwrap_err();
    assert_eq!(err.scope, ErrorScope::Compilation);
    let primary = err.primary().unwrap();
    assert!(primary.notes[0].starts_with("supported functions are: "));
    assert!(primary.notes[0].contains("sqrtf"));
}

#[test]
fn builtin_is_respelled_for_opencl() {
    let mut spec = sample_spec(Backend::OpenCl);
    spec.body = Block::new(vec![write_output(Expr::Call {
        func: "expf".to_string(),
        args: vec![read("input", 0, 0)],
        span: Span::dummy(),
    })]);
    let kernel = lower_kernel(&spec, &LowerOptions::default()).unwrap();
    let mut funcs = Vec::new();
    kernel.body.walk_exprs(&mut |e| {
        if let Expr::Call { func, .. } = e {
            funcs.push(func.clone());
        }
    });
    assert_eq!(funcs, vec!["exp".to_string()]);
}

// ─── Kernel-level behaviour ────────────────────────────────────────

#[test]
fn lowering_is_deterministic() {
    let mut spec = blur_spec(Backend::Cuda, "sum", false);
    spec.accessors[0].boundary = BoundaryMode::Repeat;
    spec.pixels_per_thread = 2;
    spec.threads_y = 2;
    let a = lower_kernel(&spec, &LowerOptions::default()).unwrap();
    let b = lower_kernel(&spec, &LowerOptions::default()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn cpu_backend_is_a_plain_loop_nest() {
    let kernel = lower_kernel(&blur_spec(Backend::CpuLoop, "sum", true), &LowerOptions::default()).unwrap();
    let Some(Stmt::For { var, end, .. }) = kernel.body.stmts.last() else {
        panic!("expected loop nest");
    };
    assert_eq!(var, "gid_y");
    assert_eq!(*end, Expr::Int(2048));
    let mut intrinsics = 0;
    kernel.body.walk_exprs(&mut |e| {
        if matches!(e, Expr::Builtin(_)) {
            intrinsics += 1;
        }
    });
    assert_eq!(intrinsics, 0);
    assert!(kernel.tiles.is_empty());
}

#[test]
fn backend_option_overrides_spec() {
    let options = LowerOptions {
        backend: Some(Backend::CpuLoop),
        ..LowerOptions::default()
    };
    let kernel = lower_kernel(&sample_spec(Backend::Cuda), &options).unwrap();
    assert_eq!(kernel.backend, Backend::CpuLoop);
}

#[test]
fn vectorize_widens_floating_locals_only() {
    let mut spec = sample_spec(Backend::OpenCl);
    spec.vectorize = true;
    spec.body = Block::new(vec![
        Stmt::Decl {
            name: "v".to_string(),
            ty: Ty::Float,
            init: Some(read("input", 0, 0)),
            span: Span::dummy(),
        },
        Stmt::Decl {
            name: "row".to_string(),
            ty: Ty::Int,
            init: Some(Expr::cast(Ty::Int, Expr::var("v"))),
            span: Span::dummy(),
        },
        write_output(Expr::var("v")),
    ]);
    let kernel = lower_kernel(&spec, &LowerOptions::default()).unwrap();
    let mut decls = Vec::new();
    kernel.body.walk_stmts(&mut |s| {
        if let Stmt::Decl { name, ty, .. } = s {
            decls.push((name.clone(), ty.clone()));
        }
    });
    let float4 = Ty::Float.widen4();
    assert!(decls.contains(&("input4".to_string(), float4.clone())));
    assert!(decls.contains(&("out4".to_string(), float4.clone())));
    assert!(decls.contains(&("v".to_string(), float4)));
    assert!(decls.contains(&("row".to_string(), Ty::Int)));
    let mut int_casts = Vec::new();
    kernel.body.walk_exprs(&mut |e| {
        if let Expr::Cast { ty, .. } = e {
            int_casts.push(ty.clone());
        }
    });
    assert!(int_casts.contains(&Ty::Int), "{:?}", int_casts);
    assert!(!int_casts.contains(&Ty::Int.widen4()));
    let mut reads_view = false;
    kernel.body.walk_exprs(&mut |e| {
        if let Expr::Index { base, .. } = e {
            reads_view |= **base == Expr::var("input4");
        }
    });
    assert!(reads_view);
}

#[test]
fn zero_pixels_per_thread_is_fatal() {
    let mut spec = sample_spec(Backend::Cuda);
    spec.pixels_per_thread = 0;
    let err = lower_kernel(&spec, &LowerOptions::default()).unwrap_err();
    assert!(err.to_string().contains("pixels_per_thread"));
}

#[test]
fn oversized_mask_window_is_fatal() {
    let mut spec = blur_spec(Backend::Cuda, "sum", false);
    spec.masks[0].size_x = u32::MAX;
    spec.masks[0].size_y = 2;
    let err = lower_kernel(&spec, &LowerOptions::default()).unwrap_err();
    assert_eq!(err.scope, ErrorScope::Kernel);
    assert!(err.to_string().contains("window 4294967295x2 is too large"), "{}", err);
}

#[test]
fn oversized_accessor_window_is_fatal() {
    let mut spec = sample_spec(Backend::OpenCl);
    spec.accessors[0].size_x = 65536;
    spec.accessors[0].size_y = 65536;
    let err = lower_kernel(&spec, &LowerOptions::default()).unwrap_err();
    assert_eq!(err.scope, ErrorScope::Kernel);
    assert!(err.to_string().contains("accessor 'input' window"), "{}", err);
}

#[test]
fn oversized_thread_footprint_is_fatal() {
    let mut spec = sample_spec(Backend::Cuda);
    spec.threads_y = 2;
    spec.pixels_per_thread = u32::MAX;
    let err = lower_kernel(&spec, &LowerOptions::default()).unwrap_err();
    assert_eq!(err.scope, ErrorScope::Kernel);
    let primary = err.primary().unwrap();
    assert!(primary.message.contains("is too large"), "{}", primary.message);
    assert_eq!(primary.notes, vec!["the staged footprint must fit in 32 bits".to_string()]);
}

#[test]
fn sink_receives_every_diagnostic() {
    let mut sink: Vec<Diagnostic> = Vec::new();
    let spec = blur_spec(Backend::OpenCl, "sum", false);
    let kernel = lower_kernel_into(&spec, &LowerOptions::default(), &mut sink).unwrap();
    assert_eq!(sink.len(), 1);
    assert_eq!(sink, kernel.warnings);

    let mut sink: Vec<Diagnostic> = Vec::new();
    let spec = blur_spec(Backend::OpenCl, "median", false);
    let scope = lower_kernel_into(&spec, &LowerOptions::default(), &mut sink).unwrap_err();
    assert_eq!(scope, ErrorScope::Kernel);
    // The loop-form warning precedes the fatal error.
    assert_eq!(sink.len(), 2);
    assert!(sink[1].is_error());
}
